//! Decoded audio tracks.

use log::{info, warn};
use std::path::Path;

use crate::error::AudioError;

/// A fully decoded stereo track held in memory
#[derive(Debug, Clone)]
pub struct TrackBuffer {
    frames: Vec<[f32; 2]>,
    sample_rate: u32,
}

impl TrackBuffer {
    /// Wrap already decoded stereo frames
    pub fn from_frames(frames: Vec<[f32; 2]>, sample_rate: u32) -> Result<Self, AudioError> {
        if frames.is_empty() {
            return Err(AudioError::EmptyTrack);
        }
        if sample_rate == 0 {
            return Err(AudioError::UnsupportedFormat("sample rate 0".to_string()));
        }
        Ok(Self {
            frames,
            sample_rate,
        })
    }

    /// Decode a WAV file. Mono is duplicated to both channels; channels past
    /// the second are dropped.
    pub fn open_wav(path: &Path) -> Result<Self, AudioError> {
        let decode_err = |source| AudioError::Decode {
            path: path.to_path_buf(),
            source,
        };
        let reader = hound::WavReader::open(path).map_err(decode_err)?;
        let spec = reader.spec();
        let channels = spec.channels as usize;
        if channels == 0 {
            return Err(AudioError::UnsupportedFormat("zero channels".to_string()));
        }
        if channels > 2 {
            warn!(
                "{} has {} channels, keeping the first two",
                path.display(),
                channels
            );
        }

        let samples: Vec<f32> = match spec.sample_format {
            hound::SampleFormat::Float => reader
                .into_samples::<f32>()
                .collect::<Result<_, _>>()
                .map_err(decode_err)?,
            hound::SampleFormat::Int => {
                if spec.bits_per_sample == 0 || spec.bits_per_sample > 32 {
                    return Err(AudioError::UnsupportedFormat(format!(
                        "{}-bit integer samples",
                        spec.bits_per_sample
                    )));
                }
                let scale = 1.0 / (1u64 << (spec.bits_per_sample - 1)) as f32;
                reader
                    .into_samples::<i32>()
                    .map(|s| s.map(|v| v as f32 * scale))
                    .collect::<Result<_, _>>()
                    .map_err(decode_err)?
            }
        };

        let frames: Vec<[f32; 2]> = samples
            .chunks_exact(channels)
            .map(|chunk| {
                if channels == 1 {
                    [chunk[0], chunk[0]]
                } else {
                    [chunk[0], chunk[1]]
                }
            })
            .collect();

        let track = Self::from_frames(frames, spec.sample_rate)?;
        info!(
            "Loaded {} ({:.1}s @ {} Hz, {} ch)",
            path.display(),
            track.duration_s(),
            spec.sample_rate,
            channels
        );
        Ok(track)
    }

    pub fn frames(&self) -> &[[f32; 2]] {
        &self.frames
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn duration_s(&self) -> f64 {
        self.frames.len() as f64 / self.sample_rate as f64
    }
}
