//! Energy-threshold beat detector used when no beat list is available.

use std::collections::VecDeque;

use crate::params::BeatDetection;

/// Adaptive bass-energy onset detector.
///
/// Keeps a rolling window of recent bass samples; a sample fires when it
/// exceeds the window average scaled by the sensitivity, clears the energy
/// floor, and falls outside the refractory interval of the last detection.
#[derive(Debug, Clone)]
pub struct EnergyDetector {
    config: BeatDetection,
    history: VecDeque<f32>,
    last_fire: Option<f64>,
}

impl EnergyDetector {
    pub fn new(config: BeatDetection) -> Self {
        let capacity = config.history_len.max(1);
        Self {
            config,
            history: VecDeque::with_capacity(capacity),
            last_fire: None,
        }
    }

    /// Rolling average of the samples seen before the current one
    pub fn average(&self) -> f32 {
        if self.history.is_empty() {
            0.0
        } else {
            self.history.iter().sum::<f32>() / self.history.len() as f32
        }
    }

    /// Threshold multiplier for a sensitivity value
    pub fn threshold_factor(&self, sensitivity: f32) -> f32 {
        1.0 + (sensitivity - 1.0) * self.config.sensitivity_gain
    }

    /// Feed one bass sample at time `now`. Returns the detection strength
    /// (energy over threshold) when a beat fires.
    pub fn feed(&mut self, now: f64, bass: f32, sensitivity: f32) -> Option<f32> {
        let bass = if bass.is_finite() { bass.max(0.0) } else { 0.0 };
        let warmed_up = !self.history.is_empty();
        let threshold = self.average() * self.threshold_factor(sensitivity);

        if self.history.len() == self.config.history_len.max(1) {
            self.history.pop_front();
        }
        self.history.push_back(bass);

        if !warmed_up || bass < self.config.energy_floor || bass <= threshold {
            return None;
        }
        if let Some(last) = self.last_fire {
            if now - last < self.config.refractory_s {
                return None;
            }
        }

        self.last_fire = Some(now);
        Some(if threshold > 0.0 { bass / threshold } else { 1.0 })
    }

    /// Forget the refractory anchor (after a seek)
    pub fn reset_refractory(&mut self) {
        self.last_fire = None;
    }

    /// Forget everything
    pub fn reset(&mut self) {
        self.history.clear();
        self.last_fire = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn warmed(level: f32) -> EnergyDetector {
        let mut det = EnergyDetector::new(BeatDetection::default());
        for i in 0..8 {
            assert!(det.feed(i as f64 * 0.016, level, 1.0).is_none());
        }
        det
    }

    #[test]
    fn test_refractory_blocks_second_transient() {
        let mut det = warmed(0.125);
        assert!(det.feed(0.5, 0.4, 1.0).is_some());
        assert!(det.feed(0.55, 0.8, 1.0).is_none());
        assert!(det.feed(0.70, 2.0, 1.0).is_some());
    }

    #[test]
    fn test_floor_suppresses_quiet_signal() {
        let mut det = warmed(0.001);
        assert!(det.feed(1.0, 0.01, 1.0).is_none());
    }

    #[test]
    fn test_sensitivity_raises_threshold() {
        let det = EnergyDetector::new(BeatDetection::default());
        assert!(det.threshold_factor(2.5) > det.threshold_factor(1.0));
        assert!(det.threshold_factor(0.3) < 1.0);

        let mut strict = warmed(0.25);
        assert!(strict.feed(1.0, 0.3, 2.5).is_none());
        let mut loose = warmed(0.25);
        assert!(loose.feed(1.0, 0.3, 1.0).is_some());
    }

    #[test]
    fn test_steady_energy_never_fires() {
        let mut det = warmed(0.5);
        for i in 0..100 {
            assert!(det.feed(1.0 + i as f64 * 0.016, 0.5, 1.0).is_none());
        }
    }
}
