//! Audio analysis, signal-graph and beat-detection configuration.

use std::ops::Range;

use crate::error::AudioError;

/// Spectrum analyzer configuration with band split fractions
#[derive(Debug, Clone)]
pub struct AnalyzerConfig {
    /// FFT window size (must be power of 2); the frequency frame holds half
    /// as many bins
    pub fft_size: usize,

    /// Temporal smoothing between consecutive frames (0 = none, <1)
    pub smoothing: f32,

    /// Magnitude mapped to byte value 0 (dB)
    pub min_decibels: f32,

    /// Magnitude mapped to byte value 255 (dB)
    pub max_decibels: f32,

    /// Fraction of bins counted as bass, from bin 0
    pub bass_fraction: f32,

    /// Fraction of bins where treble starts; mid sits in between
    pub treble_start_fraction: f32,
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            fft_size: 2048,
            smoothing: 0.85,
            min_decibels: -100.0,
            max_decibels: -30.0,
            bass_fraction: 0.15,
            treble_start_fraction: 0.65,
        }
    }
}

impl AnalyzerConfig {
    /// Number of frequency bins in a frame
    pub fn bin_count(&self) -> usize {
        self.fft_size / 2
    }

    fn split_at(&self, fraction: f32) -> usize {
        ((self.bin_count() as f32 * fraction).floor() as usize).min(self.bin_count())
    }

    /// Bin range for bass energy
    pub fn bass_bins(&self) -> Range<usize> {
        0..self.split_at(self.bass_fraction)
    }

    /// Bin range for mid energy
    pub fn mid_bins(&self) -> Range<usize> {
        self.split_at(self.bass_fraction)..self.split_at(self.treble_start_fraction)
    }

    /// Bin range for treble energy
    pub fn treble_bins(&self) -> Range<usize> {
        self.split_at(self.treble_start_fraction)..self.bin_count()
    }

    /// Validate configuration (FFT size must be power of 2, etc.)
    pub fn validate(&self) -> Result<(), AudioError> {
        if !self.fft_size.is_power_of_two() || self.fft_size < 32 {
            return Err(AudioError::InvalidConfig(format!(
                "FFT size must be a power of 2 >= 32, got {}",
                self.fft_size
            )));
        }
        if !(0.0..1.0).contains(&self.smoothing) {
            return Err(AudioError::InvalidConfig(format!(
                "smoothing must be in [0, 1), got {}",
                self.smoothing
            )));
        }
        if self.min_decibels >= self.max_decibels {
            return Err(AudioError::InvalidConfig(
                "min_decibels must be below max_decibels".to_string(),
            ));
        }
        if !(0.0 < self.bass_fraction && self.bass_fraction < self.treble_start_fraction)
            || self.treble_start_fraction >= 1.0
        {
            return Err(AudioError::InvalidConfig(
                "band fractions must satisfy 0 < bass < treble start < 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Fixed properties of the effects signal graph
#[derive(Debug, Clone)]
pub struct GraphConfig {
    /// Low-shelf corner frequency (Hz)
    pub low_shelf_hz: f32,

    /// High-shelf corner frequency (Hz)
    pub high_shelf_hz: f32,

    /// Resonance of the low-pass sweep filter
    pub sweep_q: f32,

    /// Longest supported delay (seconds)
    pub max_delay_s: f32,

    /// Reverb impulse length (seconds)
    pub reverb_length_s: f32,

    /// Reverb impulse decay exponent
    pub reverb_decay: f32,

    /// Seed for the reverb impulse noise
    pub reverb_seed: u64,

    /// Waveshaper amount used when distortion is on
    pub distortion_amount: f32,

    /// Waveshaper curve resolution (points)
    pub distortion_curve_len: usize,
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            low_shelf_hz: 200.0,
            high_shelf_hz: 4000.0,
            sweep_q: 1.2,
            max_delay_s: 5.0,
            reverb_length_s: 2.5,
            reverb_decay: 3.0,
            reverb_seed: 0x50_4e_49_43,
            distortion_amount: 400.0,
            distortion_curve_len: 44100,
        }
    }
}

/// Beat reconciliation and fallback detector settings
#[derive(Debug, Clone)]
pub struct BeatDetection {
    /// Backward clock jump treated as a seek (seconds)
    pub seek_epsilon_s: f64,

    /// Rolling window of bass samples for the adaptive threshold
    pub history_len: usize,

    /// Minimum time between two synthetic beats (seconds)
    pub refractory_s: f64,

    /// Bass energy below this never counts as a beat (normalized 0..1)
    pub energy_floor: f32,

    /// How strongly sensitivity moves the threshold away from the average
    pub sensitivity_gain: f32,
}

impl Default for BeatDetection {
    fn default() -> Self {
        Self {
            seek_epsilon_s: 0.01,
            history_len: 8,
            refractory_s: 0.12,
            energy_floor: 0.02,
            sensitivity_gain: 0.9,
        }
    }
}

/// Audio constants
pub mod audio_constants {
    /// Sample rate used when no output device dictates one
    pub const DEFAULT_SAMPLE_RATE: u32 = 44100;

    /// Partition size of the FFT convolver (samples, adds this much latency
    /// to the wet path)
    pub const CONVOLVER_BLOCK: usize = 512;

    /// Lowest and highest sample rates the graph accepts
    pub const MIN_SAMPLE_RATE: u32 = 8000;
    pub const MAX_SAMPLE_RATE: u32 = 192_000;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_band_ranges_partition_bins() {
        let config = AnalyzerConfig::default();

        let bass = config.bass_bins();
        let mid = config.mid_bins();
        let treble = config.treble_bins();

        assert_eq!(bass.start, 0);
        assert_eq!(bass.end, 153); // floor(1024 * 0.15)
        assert_eq!(mid.start, bass.end);
        assert_eq!(treble.start, mid.end);
        assert_eq!(treble.end, config.bin_count());
    }

    #[test]
    fn test_validate_rejects_bad_fft_size() {
        let config = AnalyzerConfig {
            fft_size: 1000,
            ..Default::default()
        };
        assert!(config.validate().is_err());
        assert!(AnalyzerConfig::default().validate().is_ok());
    }
}
