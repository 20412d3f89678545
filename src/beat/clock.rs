//! Reconciles the beat list with the playback clock.

use log::{debug, warn};

use super::detector::EnergyDetector;
use crate::params::{BeatDetection, SENSITIVITY_RANGE};
use crate::spectrum::BandEnergy;

/// Where a beat event came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BeatSource {
    /// An entry of the supplied beat list
    Scheduled,
    /// Inferred from bass energy
    Detected,
}

/// A beat that became due this frame
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BeatEvent {
    /// Timestamp of the beat (seconds from track start)
    pub time: f64,
    /// Index into the beat list, for scheduled beats
    pub index: Option<usize>,
    pub source: BeatSource,
    /// 1.0 for scheduled beats, energy over threshold for detected ones
    pub strength: f32,
}

/// Drop invalid entries and restore ordering
fn sanitize(mut beats: Vec<f64>) -> Vec<f64> {
    let before = beats.len();
    beats.retain(|t| t.is_finite() && *t >= 0.0);
    if beats.len() != before {
        warn!(
            "Dropped {} invalid beat timestamp(s)",
            before - beats.len()
        );
    }
    if beats.windows(2).any(|w| w[0] > w[1]) {
        warn!("Beat list was not sorted, sorting");
        beats.sort_by(|a, b| a.total_cmp(b));
    }
    beats
}

/// Emits every beat-list entry exactly once as playback passes it.
///
/// With an empty list, beats are inferred by an [`EnergyDetector`] instead.
#[derive(Debug, Clone)]
pub struct BeatClock {
    beats: Vec<f64>,
    cursor: usize,
    last_time: Option<f64>,
    seek_epsilon_s: f64,
    sensitivity: f32,
    detector: EnergyDetector,
}

impl BeatClock {
    pub fn new(beats: Vec<f64>, config: BeatDetection) -> Self {
        let beats = sanitize(beats);
        debug!("Beat clock with {} scheduled beat(s)", beats.len());
        Self {
            beats,
            cursor: 0,
            last_time: None,
            seek_epsilon_s: config.seek_epsilon_s,
            sensitivity: 1.0,
            detector: EnergyDetector::new(config),
        }
    }

    /// True when beats come from the energy detector
    pub fn is_fallback(&self) -> bool {
        self.beats.is_empty()
    }

    /// The full beat list, for look-ahead consumers
    pub fn schedule(&self) -> &[f64] {
        &self.beats
    }

    /// Index of the next beat-list entry not yet emitted
    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn sensitivity(&self) -> f32 {
        self.sensitivity
    }

    pub fn set_sensitivity(&mut self, sensitivity: f32) {
        if sensitivity.is_finite() {
            self.sensitivity =
                sensitivity.clamp(*SENSITIVITY_RANGE.start(), *SENSITIVITY_RANGE.end());
        }
    }

    /// Re-derive the cursor for a position reached by seeking: entries at or
    /// before `now` count as passed.
    fn resync(&mut self, now: f64) {
        self.cursor = self.beats.partition_point(|t| *t <= now);
        self.detector.reset_refractory();
        debug!("Beat clock resync at {:.3}s -> cursor {}", now, self.cursor);
    }

    /// Beats that became due at playback time `now`
    pub fn poll(&mut self, now: f64, bands: &BandEnergy) -> Vec<BeatEvent> {
        if !now.is_finite() {
            return Vec::new();
        }
        if let Some(last) = self.last_time {
            if now < last - self.seek_epsilon_s {
                self.resync(now);
            }
        }
        self.last_time = Some(now);

        if self.beats.is_empty() {
            return self
                .detector
                .feed(now, bands.bass, self.sensitivity)
                .map(|strength| BeatEvent {
                    time: now,
                    index: None,
                    source: BeatSource::Detected,
                    strength,
                })
                .into_iter()
                .collect();
        }

        let mut events = Vec::new();
        while self.cursor < self.beats.len() && self.beats[self.cursor] <= now {
            events.push(BeatEvent {
                time: self.beats[self.cursor],
                index: Some(self.cursor),
                source: BeatSource::Scheduled,
                strength: 1.0,
            });
            self.cursor += 1;
        }
        events
    }

    /// Back to the start of the track
    pub fn reset(&mut self) {
        self.cursor = 0;
        self.last_time = None;
        self.detector.reset();
    }
}
