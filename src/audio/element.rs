//! Media element: owns the playback position of the loaded track.

use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;

use super::source::TrackBuffer;

/// Read-only view of the playback clock
pub trait PlaybackClock {
    /// Elapsed seconds of the active source
    fn current_time(&self) -> f64;

    fn is_playing(&self) -> bool;

    fn has_ended(&self) -> bool;
}

/// Transport state of the media element
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum TransportState {
    Paused = 0,
    Playing = 1,
    Ended = 2,
}

impl TransportState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => TransportState::Playing,
            2 => TransportState::Ended,
            _ => TransportState::Paused,
        }
    }
}

struct ClockShared {
    time_bits: AtomicU64,
    state: AtomicU8,
}

/// Lock-free handle onto a media element's clock, readable from any thread
#[derive(Clone)]
pub struct ClockHandle {
    shared: Arc<ClockShared>,
}

impl ClockHandle {
    fn new() -> Self {
        Self {
            shared: Arc::new(ClockShared {
                time_bits: AtomicU64::new(0f64.to_bits()),
                state: AtomicU8::new(TransportState::Paused as u8),
            }),
        }
    }

    fn publish(&self, time: f64, state: TransportState) {
        self.shared.time_bits.store(time.to_bits(), Ordering::Release);
        self.shared.state.store(state as u8, Ordering::Release);
    }

    pub fn state(&self) -> TransportState {
        TransportState::from_u8(self.shared.state.load(Ordering::Acquire))
    }
}

impl PlaybackClock for ClockHandle {
    fn current_time(&self) -> f64 {
        f64::from_bits(self.shared.time_bits.load(Ordering::Acquire))
    }

    fn is_playing(&self) -> bool {
        self.state() == TransportState::Playing
    }

    fn has_ended(&self) -> bool {
        self.state() == TransportState::Ended
    }
}

/// Plays a decoded track at a variable rate.
///
/// Rate changes resample by linear interpolation, so pitch follows rate.
/// Volume is only applied here when no effects graph is connected.
pub struct MediaElement {
    track: Arc<TrackBuffer>,
    /// Read position in source frames
    position: f64,
    rate: f64,
    volume: f32,
    apply_volume: bool,
    state: TransportState,
    clock: ClockHandle,
}

impl MediaElement {
    pub fn new(track: Arc<TrackBuffer>) -> Self {
        Self {
            track,
            position: 0.0,
            rate: 1.0,
            volume: 1.0,
            apply_volume: false,
            state: TransportState::Paused,
            clock: ClockHandle::new(),
        }
    }

    pub fn clock(&self) -> ClockHandle {
        self.clock.clone()
    }

    pub fn track(&self) -> &TrackBuffer {
        &self.track
    }

    pub fn duration_s(&self) -> f64 {
        self.track.duration_s()
    }

    pub fn state(&self) -> TransportState {
        self.state
    }

    fn current_time(&self) -> f64 {
        self.position / self.track.sample_rate() as f64
    }

    fn publish(&self) {
        self.clock.publish(self.current_time(), self.state);
    }

    /// Start or resume. An ended element restarts from the top.
    pub fn play(&mut self) {
        if self.state == TransportState::Ended {
            self.position = 0.0;
        }
        self.state = TransportState::Playing;
        self.publish();
    }

    pub fn pause(&mut self) {
        if self.state == TransportState::Playing {
            self.state = TransportState::Paused;
        }
        self.publish();
    }

    /// Pause and rewind to the start
    pub fn stop(&mut self) {
        self.state = TransportState::Paused;
        self.position = 0.0;
        self.publish();
    }

    /// Jump to `seconds`, clamped into the track
    pub fn seek(&mut self, seconds: f64) {
        let seconds = if seconds.is_finite() { seconds } else { 0.0 };
        let max = self.track.len().saturating_sub(1) as f64;
        self.position = (seconds * self.track.sample_rate() as f64).clamp(0.0, max);
        if self.state == TransportState::Ended {
            self.state = TransportState::Paused;
        }
        self.publish();
    }

    pub fn set_playback_rate(&mut self, rate: f32) {
        self.rate = rate.clamp(0.5, 1.6) as f64;
    }

    pub fn playback_rate(&self) -> f32 {
        self.rate as f32
    }

    pub fn set_volume(&mut self, volume: f32) {
        self.volume = volume.clamp(0.0, 1.0);
    }

    /// Whether the element itself applies volume (no graph downstream)
    pub fn set_apply_volume(&mut self, apply: bool) {
        self.apply_volume = apply;
    }

    /// Produce the next output frame at `out_rate` Hz, or `None` when not
    /// playing. Reaching the end of the track switches to `Ended`.
    pub fn next_frame(&mut self, out_rate: u32) -> Option<[f32; 2]> {
        if self.state != TransportState::Playing {
            return None;
        }
        let frames = self.track.frames();
        let idx = self.position.floor() as usize;
        if idx + 1 >= frames.len() {
            self.state = TransportState::Ended;
            self.position = frames.len() as f64;
            self.publish();
            return None;
        }

        let frac = (self.position - idx as f64) as f32;
        let a = frames[idx];
        let b = frames[idx + 1];
        let gain = if self.apply_volume { self.volume } else { 1.0 };
        let out = [
            (a[0] + (b[0] - a[0]) * frac) * gain,
            (a[1] + (b[1] - a[1]) * frac) * gain,
        ];

        self.position += self.rate * self.track.sample_rate() as f64 / out_rate.max(1) as f64;
        Some(out)
    }

    /// Publish the position after a rendered block
    pub fn sync_clock(&self) {
        self.publish();
    }

    /// Advance the clock without rendering samples (no output device)
    pub fn advance(&mut self, dt: f64) {
        if self.state != TransportState::Playing || dt <= 0.0 {
            return;
        }
        self.position += dt * self.rate * self.track.sample_rate() as f64;
        if self.position >= self.track.len() as f64 {
            self.position = self.track.len() as f64;
            self.state = TransportState::Ended;
        }
        self.publish();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn element(len: usize) -> MediaElement {
        let frames = (0..len).map(|i| [i as f32, -(i as f32)]).collect();
        MediaElement::new(Arc::new(TrackBuffer::from_frames(frames, 100).unwrap()))
    }

    #[test]
    fn test_paused_produces_nothing() {
        let mut el = element(10);
        assert!(el.next_frame(100).is_none());
        assert_eq!(el.clock().current_time(), 0.0);
    }

    #[test]
    fn test_rate_resamples() {
        let mut el = element(10);
        el.set_playback_rate(1.5);
        el.play();
        assert_eq!(el.next_frame(100), Some([0.0, 0.0]));
        assert_eq!(el.next_frame(100), Some([1.5, -1.5]));
    }

    #[test]
    fn test_end_of_track() {
        let mut el = element(3);
        el.play();
        while el.next_frame(100).is_some() {}
        let clock = el.clock();
        assert!(clock.has_ended());
        assert!(!clock.is_playing());

        el.play();
        assert!(el.clock().is_playing());
        assert_eq!(el.clock().current_time(), 0.0);
    }

    #[test]
    fn test_advance_and_stop() {
        let mut el = element(1000);
        let clock = el.clock();
        el.play();
        el.advance(0.5);
        assert_relative_eq!(clock.current_time(), 0.5);

        el.pause();
        el.advance(0.5);
        assert_relative_eq!(clock.current_time(), 0.5);

        el.stop();
        assert_eq!(clock.current_time(), 0.0);
        assert!(!clock.is_playing());
    }

    #[test]
    fn test_seek_clamps() {
        let mut el = element(100);
        el.seek(-3.0);
        assert_eq!(el.clock().current_time(), 0.0);
        el.seek(50.0);
        assert_relative_eq!(el.clock().current_time(), 0.99);
    }

    #[test]
    fn test_volume_only_in_passthrough() {
        let mut el = element(10);
        el.set_volume(0.5);
        el.play();
        el.next_frame(100);
        assert_eq!(el.next_frame(100), Some([1.0, -1.0]));
        el.set_apply_volume(true);
        assert_eq!(el.next_frame(100), Some([1.0, -1.0]));
    }
}
