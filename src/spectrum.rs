//! Spectrum sampling: analyzer tap -> frequency frame + band energies.

use rustfft::{num_complex::Complex, Fft, FftPlanner};
use std::f32::consts::PI;
use std::ops::Range;
use std::sync::Arc;

use crate::audio::AnalyzerTap;
use crate::params::AnalyzerConfig;

/// Normalized energy of the three frequency bands (each 0..1)
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct BandEnergy {
    pub bass: f32,
    pub mid: f32,
    pub treble: f32,
}

impl BandEnergy {
    /// Mean of the three bands
    pub fn overall(&self) -> f32 {
        (self.bass + self.mid + self.treble) / 3.0
    }
}

/// Hann window function for FFT analysis
pub fn hann_window(index: usize, size: usize) -> f32 {
    0.5 * (1.0 - ((2.0 * PI * index as f32) / (size as f32 - 1.0)).cos())
}

/// Turns the analyzer's time-domain window into byte magnitudes per bin
pub struct SpectrumSampler {
    config: AnalyzerConfig,
    fft: Arc<dyn Fft<f32>>,
    window: Vec<f32>,
    time_domain: Vec<f32>,
    buffer: Vec<Complex<f32>>,
    /// Smoothed linear magnitudes
    smoothed: Vec<f32>,
    frame: Vec<u8>,
    bass_bins: Range<usize>,
    mid_bins: Range<usize>,
    treble_bins: Range<usize>,
    bands: BandEnergy,
}

impl SpectrumSampler {
    pub fn new(config: AnalyzerConfig) -> Self {
        let size = config.fft_size;
        let mut planner = FftPlanner::new();
        let fft = planner.plan_fft_forward(size);
        let window = (0..size).map(|i| hann_window(i, size)).collect();
        let bins = config.bin_count();
        Self {
            fft,
            window,
            time_domain: Vec::with_capacity(size),
            buffer: vec![Complex::new(0.0, 0.0); size],
            smoothed: vec![0.0; bins],
            frame: vec![0; bins],
            bass_bins: config.bass_bins(),
            mid_bins: config.mid_bins(),
            treble_bins: config.treble_bins(),
            bands: BandEnergy::default(),
            config,
        }
    }

    /// The latest frequency frame (fft_size / 2 bytes)
    pub fn frame(&self) -> &[u8] {
        &self.frame
    }

    /// The band energies of the latest sample
    pub fn bands(&self) -> BandEnergy {
        self.bands
    }

    /// Sample the tap. With no tap the frame and bands are all zero.
    pub fn sample(&mut self, tap: Option<&AnalyzerTap>) -> BandEnergy {
        let Some(tap) = tap else {
            self.frame.iter_mut().for_each(|b| *b = 0);
            self.smoothed.iter_mut().for_each(|m| *m = 0.0);
            self.bands = BandEnergy::default();
            return self.bands;
        };

        let size = self.config.fft_size;
        tap.snapshot(&mut self.time_domain);
        // Latest `size` samples; a shorter tap is zero-padded at the front
        let latest = &self.time_domain[self.time_domain.len().saturating_sub(size)..];
        let offset = size - latest.len();
        for (i, slot) in self.buffer.iter_mut().enumerate() {
            let sample = if i < offset { 0.0 } else { latest[i - offset] };
            *slot = Complex::new(sample * self.window[i], 0.0);
        }
        self.fft.process(&mut self.buffer);

        let tau = self.config.smoothing;
        let range_db = self.config.max_decibels - self.config.min_decibels;
        let norm = 1.0 / size as f32;
        for (k, (smoothed, byte)) in self
            .smoothed
            .iter_mut()
            .zip(self.frame.iter_mut())
            .enumerate()
        {
            let magnitude = self.buffer[k].norm() * norm;
            *smoothed = tau * *smoothed + (1.0 - tau) * magnitude;
            let db = if *smoothed > 0.0 {
                20.0 * smoothed.log10()
            } else {
                f32::NEG_INFINITY
            };
            let scaled = 255.0 * (db - self.config.min_decibels) / range_db;
            *byte = scaled.clamp(0.0, 255.0) as u8;
        }

        self.bands = BandEnergy {
            bass: band_mean(&self.frame, &self.bass_bins),
            mid: band_mean(&self.frame, &self.mid_bins),
            treble: band_mean(&self.frame, &self.treble_bins),
        };
        self.bands
    }
}

fn band_mean(frame: &[u8], bins: &Range<usize>) -> f32 {
    if bins.is_empty() {
        return 0.0;
    }
    let sum: u32 = frame[bins.clone()].iter().map(|b| *b as u32).sum();
    sum as f32 / bins.len() as f32 / 255.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hann_window() {
        let size = 1024;

        // Hann window should be 0 at edges, 1 at center
        assert!((hann_window(0, size) - 0.0).abs() < 0.01);
        assert!((hann_window(size - 1, size) - 0.0).abs() < 0.01);
        assert!((hann_window(size / 2, size) - 1.0).abs() < 0.01);
    }

    #[test]
    fn test_no_tap_yields_zero() {
        let mut sampler = SpectrumSampler::new(AnalyzerConfig::default());
        let bands = sampler.sample(None);
        assert_eq!(bands, BandEnergy::default());
        assert_eq!(sampler.frame().len(), 1024);
        assert!(sampler.frame().iter().all(|b| *b == 0));
    }

    #[test]
    fn test_silent_tap_is_zero() {
        let tap = AnalyzerTap::new(2048);
        tap.write(&vec![[0.0, 0.0]; 2048]);
        let mut sampler = SpectrumSampler::new(AnalyzerConfig::default());
        assert_eq!(sampler.sample(Some(&tap)), BandEnergy::default());
    }

    #[test]
    fn test_low_tone_lands_in_bass() {
        let tap = AnalyzerTap::new(2048);
        // Bin 20 of 1024: well inside the bass band
        let frames: Vec<[f32; 2]> = (0..2048)
            .map(|i| {
                let s = (2.0 * PI * 20.0 * i as f32 / 2048.0).sin();
                [s, s]
            })
            .collect();
        tap.write(&frames);

        let mut sampler = SpectrumSampler::new(AnalyzerConfig::default());
        let mut bands = BandEnergy::default();
        for _ in 0..30 {
            bands = sampler.sample(Some(&tap));
        }
        assert!(bands.bass > bands.mid);
        assert!(bands.bass > bands.treble);
        assert!(sampler.frame()[20] > 200);
    }
}
