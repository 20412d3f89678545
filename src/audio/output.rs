//! Audio output: the cpal stream and the playback slot it renders from.

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use log::{error, info, warn};
use parking_lot::Mutex;
use std::sync::Arc;

use super::element::MediaElement;
use super::graph::AudioGraph;
use crate::error::AudioError;
use crate::params::EffectParameters;

/// The element and effects graph of the loaded track
pub struct Playback {
    pub element: MediaElement,
    pub graph: AudioGraph,
    scratch: Vec<[f32; 2]>,
}

impl Playback {
    pub fn new(element: MediaElement, graph: AudioGraph) -> Self {
        let mut playback = Self {
            element,
            graph,
            scratch: Vec::new(),
        };
        let apply_volume = !playback.graph.is_connected();
        playback.element.set_apply_volume(apply_volume);
        playback
    }

    /// Apply effect parameters: graph nodes plus the element's rate and
    /// volume. Returns the number of graph nodes re-targeted.
    pub fn configure(&mut self, params: &EffectParameters) -> usize {
        let changed = self.graph.configure(params);
        let applied = *self.graph.params();
        self.element.set_playback_rate(applied.playback_rate);
        self.element.set_volume(applied.volume);
        self.element.set_apply_volume(!self.graph.is_connected());
        changed
    }

    /// Render stereo frames at the graph's sample rate into `frames`
    pub fn render_frames(&mut self, frames: &mut [[f32; 2]]) {
        let rate = self.graph.sample_rate();
        for frame in frames.iter_mut() {
            *frame = self.element.next_frame(rate).unwrap_or([0.0; 2]);
        }
        self.graph.process(frames);
        self.element.sync_clock();
    }

    /// Render into an interleaved device buffer with `channels` channels
    pub fn render(&mut self, out: &mut [f32], channels: usize) {
        let channels = channels.max(1);
        let frame_count = out.len() / channels;
        let mut scratch = std::mem::take(&mut self.scratch);
        scratch.clear();
        scratch.resize(frame_count, [0.0; 2]);
        self.render_frames(&mut scratch);

        for (dst, src) in out.chunks_mut(channels).zip(&scratch) {
            if channels == 1 {
                dst[0] = (src[0] + src[1]) * 0.5;
            } else {
                dst[0] = src[0];
                dst[1] = src[1];
                dst[2..].iter_mut().for_each(|s| *s = 0.0);
            }
        }
        self.scratch = scratch;
    }
}

/// Slot shared between the session and the audio callback
pub type PlaybackSlot = Arc<Mutex<Option<Playback>>>;

pub fn playback_slot() -> PlaybackSlot {
    Arc::new(Mutex::new(None))
}

/// State of the output context
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextState {
    Suspended,
    Running,
    Closed,
}

/// Output device context. Starts suspended; `resume` is called on the first
/// play action.
pub struct AudioContext {
    stream: Option<cpal::Stream>,
    state: ContextState,
    sample_rate: u32,
}

impl AudioContext {
    /// Open the default output device and render `slot` into it
    pub fn open(slot: PlaybackSlot) -> Result<Self, AudioError> {
        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or_else(|| AudioError::InitFailure("no audio output device found".to_string()))?;

        let supported = device
            .default_output_config()
            .map_err(|e| AudioError::InitFailure(format!("failed to get audio config: {}", e)))?;
        if supported.sample_format() != cpal::SampleFormat::F32 {
            warn!(
                "Device prefers {:?} samples, requesting f32",
                supported.sample_format()
            );
        }

        let sample_rate = supported.sample_rate().0;
        let config: cpal::StreamConfig = supported.into();
        let channels = config.channels as usize;

        info!(
            "Audio: {} @ {}Hz, {} ch",
            device.name().unwrap_or_else(|_| "Unknown".to_string()),
            sample_rate,
            channels
        );

        let stream = device
            .build_output_stream(
                &config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    let mut slot = slot.lock();
                    match slot.as_mut() {
                        Some(playback) => playback.render(data, channels),
                        None => data.iter_mut().for_each(|s| *s = 0.0),
                    }
                },
                |err| error!("Audio stream error: {}", err),
                None,
            )
            .map_err(|e| AudioError::InitFailure(format!("failed to build audio stream: {}", e)))?;

        // Some hosts start streams on creation
        if let Err(e) = stream.pause() {
            warn!("Could not suspend new audio stream: {}", e);
        }

        Ok(Self {
            stream: Some(stream),
            state: ContextState::Suspended,
            sample_rate,
        })
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn state(&self) -> ContextState {
        self.state
    }

    /// Start the device stream. Failures are logged and leave the context
    /// suspended so the next play action retries.
    pub fn resume(&mut self) {
        if self.state != ContextState::Suspended {
            return;
        }
        let Some(stream) = self.stream.as_ref() else {
            return;
        };
        match stream.play() {
            Ok(()) => {
                info!("Audio context running");
                self.state = ContextState::Running;
            }
            Err(e) => warn!("Failed to resume audio context: {}", e),
        }
    }

    /// Release the device
    pub fn close(&mut self) {
        if self.stream.take().is_some() {
            info!("Audio context closed");
        }
        self.state = ContextState::Closed;
    }
}

impl Drop for AudioContext {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::source::TrackBuffer;
    use crate::params::GraphConfig;

    fn playback(connected: bool) -> Playback {
        let frames = vec![[0.5, 0.5]; 64];
        let track = Arc::new(TrackBuffer::from_frames(frames, 44100).unwrap());
        let mut graph = AudioGraph::new(44100, GraphConfig::default(), 256).unwrap();
        if connected {
            graph.connect();
        }
        Playback::new(MediaElement::new(track), graph)
    }

    #[test]
    fn test_render_silence_when_paused() {
        let mut pb = playback(false);
        let mut out = vec![1.0; 8];
        pb.render(&mut out, 2);
        assert!(out.iter().all(|s| *s == 0.0));
    }

    #[test]
    fn test_passthrough_volume_applied_by_element() {
        let mut pb = playback(false);
        pb.configure(&EffectParameters {
            volume: 0.5,
            ..Default::default()
        });
        pb.element.play();
        let mut out = vec![0.0; 4];
        pb.render(&mut out, 2);
        assert_eq!(out, vec![0.25; 4]);
    }

    #[test]
    fn test_mono_device_downmix() {
        let mut pb = playback(false);
        pb.element.play();
        let mut out = vec![0.0; 3];
        pb.render(&mut out, 1);
        assert_eq!(out, vec![0.5; 3]);
    }

    #[test]
    fn test_configure_sets_rate() {
        let mut pb = playback(true);
        pb.configure(&EffectParameters {
            playback_rate: 3.0,
            ..Default::default()
        });
        assert_eq!(pb.element.playback_rate(), 1.6);
    }
}
