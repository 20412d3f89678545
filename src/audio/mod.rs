//! Audio playback, effects chain and analysis.
//!
//! A decoded track is played by a [`MediaElement`] whose samples run through
//! the [`AudioGraph`] effects chain into the device (or an offline writer).
//! The graph's [`AnalyzerTap`] feeds the spectrum sampler.

mod analyzer;
mod element;
mod graph;
pub mod nodes;
mod output;
mod source;

pub use analyzer::AnalyzerTap;
pub use element::{ClockHandle, MediaElement, PlaybackClock, TransportState};
pub use graph::AudioGraph;
pub use output::{playback_slot, AudioContext, ContextState, Playback, PlaybackSlot};
pub use source::TrackBuffer;
