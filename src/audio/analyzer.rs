//! Analyzer tap: the most recent time-domain samples leaving the graph.

use parking_lot::Mutex;
use std::sync::Arc;

struct Ring {
    samples: Vec<f32>,
    write_pos: usize,
    filled: usize,
}

/// Shared read/write handle onto a fixed-size ring of mono samples.
///
/// The audio thread writes the post-panner mono downmix; the render thread
/// snapshots the latest window for spectrum analysis.
#[derive(Clone)]
pub struct AnalyzerTap {
    ring: Arc<Mutex<Ring>>,
    capacity: usize,
}

impl AnalyzerTap {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            ring: Arc::new(Mutex::new(Ring {
                samples: vec![0.0; capacity],
                write_pos: 0,
                filled: 0,
            })),
            capacity,
        }
    }

    /// Window length in samples
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Append stereo frames as their mono downmix
    pub fn write(&self, frames: &[[f32; 2]]) {
        let mut ring = self.ring.lock();
        for frame in frames {
            let pos = ring.write_pos;
            ring.samples[pos] = (frame[0] + frame[1]) * 0.5;
            ring.write_pos = (pos + 1) % self.capacity;
        }
        ring.filled = (ring.filled + frames.len()).min(self.capacity);
    }

    /// Copy the latest window into `out`, oldest sample first. Slots never
    /// written read as silence.
    pub fn snapshot(&self, out: &mut Vec<f32>) {
        let ring = self.ring.lock();
        out.clear();
        out.extend_from_slice(&ring.samples[ring.write_pos..]);
        out.extend_from_slice(&ring.samples[..ring.write_pos]);
    }

    /// Number of samples written so far, saturating at the capacity
    pub fn filled(&self) -> usize {
        self.ring.lock().filled
    }

    /// Forget all written samples
    pub fn clear(&self) {
        let mut ring = self.ring.lock();
        ring.samples.iter_mut().for_each(|s| *s = 0.0);
        ring.write_pos = 0;
        ring.filled = 0;
    }
}
