//! Signal-processing nodes of the effects chain.
//!
//! Every node processes interleaved stereo frames (`[left, right]`) one at a
//! time and only recomputes its coefficients when a parameter changes.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rustfft::{num_complex::Complex, Fft, FftPlanner};
use std::f32::consts::PI;
use std::sync::Arc;

use crate::params::audio_constants::DEFAULT_SAMPLE_RATE;

/// Stereo frame
pub type Frame = [f32; 2];

#[derive(Debug, Clone, Copy, PartialEq)]
enum BiquadShape {
    LowShelf { gain_db: f32 },
    HighShelf { gain_db: f32 },
    LowPass { q: f32 },
}

/// RBJ cookbook biquad with independent state per channel
#[derive(Clone, Debug)]
pub struct Biquad {
    sample_rate: f32,
    freq: f32,
    shape: BiquadShape,
    // Coefficients (normalized by a0)
    b0: f32,
    b1: f32,
    b2: f32,
    a1: f32,
    a2: f32,
    // State per channel
    x1: Frame,
    x2: Frame,
    y1: Frame,
    y2: Frame,
}

impl Biquad {
    /// Low-shelf with shelf slope 1
    pub fn low_shelf(sample_rate: f32, freq: f32, gain_db: f32) -> Self {
        Self::with_shape(sample_rate, freq, BiquadShape::LowShelf { gain_db })
    }

    /// High-shelf with shelf slope 1
    pub fn high_shelf(sample_rate: f32, freq: f32, gain_db: f32) -> Self {
        Self::with_shape(sample_rate, freq, BiquadShape::HighShelf { gain_db })
    }

    pub fn low_pass(sample_rate: f32, freq: f32, q: f32) -> Self {
        Self::with_shape(sample_rate, freq, BiquadShape::LowPass { q })
    }

    fn with_shape(sample_rate: f32, freq: f32, shape: BiquadShape) -> Self {
        let mut filter = Self {
            sample_rate,
            freq,
            shape,
            b0: 1.0,
            b1: 0.0,
            b2: 0.0,
            a1: 0.0,
            a2: 0.0,
            x1: [0.0; 2],
            x2: [0.0; 2],
            y1: [0.0; 2],
            y2: [0.0; 2],
        };
        filter.update_coefficients();
        filter
    }

    /// Change the shelf gain. Returns true when the coefficients changed.
    pub fn set_gain_db(&mut self, gain_db: f32) -> bool {
        let shape = match self.shape {
            BiquadShape::LowShelf { .. } => BiquadShape::LowShelf { gain_db },
            BiquadShape::HighShelf { .. } => BiquadShape::HighShelf { gain_db },
            other => other,
        };
        self.retarget(self.freq, shape)
    }

    /// Change the corner frequency. Returns true when the coefficients changed.
    pub fn set_frequency(&mut self, freq: f32) -> bool {
        self.retarget(freq, self.shape)
    }

    pub fn frequency(&self) -> f32 {
        self.freq
    }

    fn retarget(&mut self, freq: f32, shape: BiquadShape) -> bool {
        if freq == self.freq && shape == self.shape {
            return false;
        }
        self.freq = freq;
        self.shape = shape;
        self.update_coefficients();
        true
    }

    fn update_coefficients(&mut self) {
        let nyquist = self.sample_rate * 0.5;
        let freq = self.freq.clamp(1.0, nyquist * 0.999);
        let w0 = 2.0 * PI * freq / self.sample_rate;
        let cos_w0 = w0.cos();
        let sin_w0 = w0.sin();

        let (b0, b1, b2, a0, a1, a2) = match self.shape {
            BiquadShape::LowShelf { gain_db } => {
                let a = 10.0_f32.powf(gain_db / 40.0);
                // Shelf slope S = 1
                let alpha = sin_w0 / 2.0 * std::f32::consts::SQRT_2;
                let two_sqrt_a_alpha = 2.0 * a.sqrt() * alpha;
                (
                    a * ((a + 1.0) - (a - 1.0) * cos_w0 + two_sqrt_a_alpha),
                    2.0 * a * ((a - 1.0) - (a + 1.0) * cos_w0),
                    a * ((a + 1.0) - (a - 1.0) * cos_w0 - two_sqrt_a_alpha),
                    (a + 1.0) + (a - 1.0) * cos_w0 + two_sqrt_a_alpha,
                    -2.0 * ((a - 1.0) + (a + 1.0) * cos_w0),
                    (a + 1.0) + (a - 1.0) * cos_w0 - two_sqrt_a_alpha,
                )
            }
            BiquadShape::HighShelf { gain_db } => {
                let a = 10.0_f32.powf(gain_db / 40.0);
                let alpha = sin_w0 / 2.0 * std::f32::consts::SQRT_2;
                let two_sqrt_a_alpha = 2.0 * a.sqrt() * alpha;
                (
                    a * ((a + 1.0) + (a - 1.0) * cos_w0 + two_sqrt_a_alpha),
                    -2.0 * a * ((a - 1.0) + (a + 1.0) * cos_w0),
                    a * ((a + 1.0) + (a - 1.0) * cos_w0 - two_sqrt_a_alpha),
                    (a + 1.0) - (a - 1.0) * cos_w0 + two_sqrt_a_alpha,
                    2.0 * ((a - 1.0) - (a + 1.0) * cos_w0),
                    (a + 1.0) - (a - 1.0) * cos_w0 - two_sqrt_a_alpha,
                )
            }
            BiquadShape::LowPass { q } => {
                let alpha = sin_w0 / (2.0 * q.max(1e-4));
                (
                    (1.0 - cos_w0) / 2.0,
                    1.0 - cos_w0,
                    (1.0 - cos_w0) / 2.0,
                    1.0 + alpha,
                    -2.0 * cos_w0,
                    1.0 - alpha,
                )
            }
        };

        self.b0 = b0 / a0;
        self.b1 = b1 / a0;
        self.b2 = b2 / a0;
        self.a1 = a1 / a0;
        self.a2 = a2 / a0;
    }

    /// Reset filter state
    pub fn reset(&mut self) {
        self.x1 = [0.0; 2];
        self.x2 = [0.0; 2];
        self.y1 = [0.0; 2];
        self.y2 = [0.0; 2];
    }

    /// Process one stereo frame
    pub fn process(&mut self, input: Frame) -> Frame {
        let mut out = [0.0; 2];
        for ch in 0..2 {
            let y = self.b0 * input[ch] + self.b1 * self.x1[ch] + self.b2 * self.x2[ch]
                - self.a1 * self.y1[ch]
                - self.a2 * self.y2[ch];
            self.x2[ch] = self.x1[ch];
            self.x1[ch] = input[ch];
            self.y2[ch] = self.y1[ch];
            self.y1[ch] = y;
            out[ch] = y;
        }
        out
    }

    /// Magnitude response at `freq`, used to check the filter shapes
    pub fn magnitude_at(&self, freq: f32) -> f32 {
        let w = 2.0 * PI * freq / self.sample_rate;
        let z1 = Complex::new(w.cos(), -w.sin());
        let z2 = z1 * z1;
        let num = Complex::new(self.b0, 0.0) + z1 * self.b1 + z2 * self.b2;
        let den = Complex::new(1.0, 0.0) + z1 * self.a1 + z2 * self.a2;
        (num / den).norm()
    }
}

/// Linear gain node
#[derive(Clone, Debug)]
pub struct Gain {
    value: f32,
}

impl Gain {
    pub fn new(value: f32) -> Self {
        Self { value }
    }

    pub fn value(&self) -> f32 {
        self.value
    }

    /// Returns true when the gain changed
    pub fn set(&mut self, value: f32) -> bool {
        if self.value == value {
            return false;
        }
        self.value = value;
        true
    }

    pub fn process(&self, input: Frame) -> Frame {
        [input[0] * self.value, input[1] * self.value]
    }
}

/// Stereo delay line fed back through a feedback gain.
///
/// The delay path outputs the delayed signal only; the dry signal travels on
/// its own path. A delay time of zero disables the path entirely.
#[derive(Clone, Debug)]
pub struct FeedbackDelay {
    buffer: Vec<Frame>,
    write_pos: usize,
    sample_rate: f32,
    delay_samples: f32,
    feedback: Gain,
}

impl FeedbackDelay {
    pub fn new(sample_rate: f32, max_delay_s: f32) -> Self {
        let capacity = ((sample_rate * max_delay_s).ceil() as usize).max(1) + 2;
        Self {
            buffer: vec![[0.0; 2]; capacity],
            write_pos: 0,
            sample_rate,
            delay_samples: 0.0,
            feedback: Gain::new(0.0),
        }
    }

    /// Longest representable delay (seconds)
    pub fn max_delay_s(&self) -> f32 {
        (self.buffer.len() - 2) as f32 / self.sample_rate
    }

    /// Returns true when the delay time changed
    pub fn set_delay_s(&mut self, seconds: f32) -> bool {
        let samples = (seconds.clamp(0.0, self.max_delay_s()) * self.sample_rate).max(0.0);
        // Anything shorter than one frame would interpolate into the slot about to be overwritten
        let samples = if samples > 0.0 { samples.max(1.0) } else { 0.0 };
        if samples == self.delay_samples {
            return false;
        }
        if samples == 0.0 {
            // Disabled path: drop whatever is still circulating
            self.buffer.iter_mut().for_each(|f| *f = [0.0; 2]);
        }
        self.delay_samples = samples;
        true
    }

    /// Feedback is clamped to [0, 0.95]. Returns true when it changed.
    pub fn set_feedback(&mut self, feedback: f32) -> bool {
        self.feedback.set(feedback.clamp(0.0, 0.95))
    }

    pub fn feedback(&self) -> f32 {
        self.feedback.value()
    }

    pub fn is_enabled(&self) -> bool {
        self.delay_samples > 0.0
    }

    fn read(&self) -> Frame {
        let len = self.buffer.len();
        let pos = self.write_pos as f32 - self.delay_samples;
        let pos = if pos < 0.0 { pos + len as f32 } else { pos };
        let i0 = pos.floor() as usize % len;
        let i1 = (i0 + 1) % len;
        let frac = pos - pos.floor();
        let a = self.buffer[i0];
        let b = self.buffer[i1];
        [
            a[0] + (b[0] - a[0]) * frac,
            a[1] + (b[1] - a[1]) * frac,
        ]
    }

    pub fn process(&mut self, input: Frame) -> Frame {
        if !self.is_enabled() {
            return [0.0; 2];
        }
        let delayed = self.read();
        let fed = self.feedback.process(delayed);
        self.buffer[self.write_pos] = [input[0] + fed[0], input[1] + fed[1]];
        self.write_pos = (self.write_pos + 1) % self.buffer.len();
        delayed
    }
}

/// Generate a decaying-noise stereo impulse response
pub fn noise_impulse(sample_rate: f32, length_s: f32, decay: f32, seed: u64) -> [Vec<f32>; 2] {
    let len = ((sample_rate * length_s) as usize).max(1);
    let mut rng = StdRng::seed_from_u64(seed);
    let mut channel = || {
        (0..len)
            .map(|i| {
                let envelope = (1.0 - i as f32 / len as f32).powf(decay);
                (rng.gen::<f32>() * 2.0 - 1.0) * envelope
            })
            .collect::<Vec<f32>>()
    };
    let left = channel();
    let right = channel();
    [left, right]
}

/// Equal-power normalization scale for an impulse response, calibrated so a
/// noise impulse lands at a comparable loudness to the dry signal
pub fn impulse_normalization(impulse: &[Vec<f32>; 2], sample_rate: f32) -> f32 {
    const GAIN_CALIBRATION: f32 = 0.00125;
    const MIN_POWER: f32 = 0.000125;

    let count: usize = impulse.iter().map(Vec::len).sum();
    let energy: f32 = impulse.iter().flatten().map(|s| s * s).sum();
    let power = if count == 0 {
        MIN_POWER
    } else {
        (energy / count as f32).sqrt().max(MIN_POWER)
    };
    (1.0 / power) * GAIN_CALIBRATION * (DEFAULT_SAMPLE_RATE as f32 / sample_rate)
}

/// Uniformly partitioned overlap-save convolver for one channel
struct PartitionedConvolver {
    block: usize,
    forward: Arc<dyn Fft<f32>>,
    inverse: Arc<dyn Fft<f32>>,
    partitions: Vec<Vec<Complex<f32>>>,
    /// Frequency-domain delay line of past input blocks (ring)
    history: Vec<Vec<Complex<f32>>>,
    history_head: usize,
    /// Last two input blocks (overlap-save window)
    window: Vec<f32>,
    input: Vec<f32>,
    output: Vec<f32>,
    pos: usize,
    scratch: Vec<Complex<f32>>,
    accum: Vec<Complex<f32>>,
}

impl PartitionedConvolver {
    fn new(impulse: &[f32], scale: f32, block: usize, planner: &mut FftPlanner<f32>) -> Self {
        let fft_len = block * 2;
        let forward = planner.plan_fft_forward(fft_len);
        let inverse = planner.plan_fft_inverse(fft_len);

        let partitions: Vec<Vec<Complex<f32>>> = impulse
            .chunks(block)
            .map(|chunk| {
                let mut buf = vec![Complex::new(0.0, 0.0); fft_len];
                for (dst, &s) in buf.iter_mut().zip(chunk) {
                    *dst = Complex::new(s * scale, 0.0);
                }
                forward.process(&mut buf);
                buf
            })
            .collect();
        let count = partitions.len().max(1);

        Self {
            block,
            forward,
            inverse,
            partitions,
            history: vec![vec![Complex::new(0.0, 0.0); fft_len]; count],
            history_head: 0,
            window: vec![0.0; fft_len],
            input: vec![0.0; block],
            output: vec![0.0; block],
            pos: 0,
            scratch: vec![Complex::new(0.0, 0.0); fft_len],
            accum: vec![Complex::new(0.0, 0.0); fft_len],
        }
    }

    fn process(&mut self, sample: f32) -> f32 {
        let out = self.output[self.pos];
        self.input[self.pos] = sample;
        self.pos += 1;
        if self.pos == self.block {
            self.pos = 0;
            self.run_block();
        }
        out
    }

    fn run_block(&mut self) {
        let block = self.block;
        let fft_len = block * 2;

        self.window.copy_within(block.., 0);
        self.window[block..].copy_from_slice(&self.input);

        for (dst, &s) in self.scratch.iter_mut().zip(&self.window) {
            *dst = Complex::new(s, 0.0);
        }
        self.forward.process(&mut self.scratch);

        let slots = self.history.len();
        self.history_head = (self.history_head + slots - 1) % slots;
        self.history[self.history_head].copy_from_slice(&self.scratch);

        self.accum.iter_mut().for_each(|c| *c = Complex::new(0.0, 0.0));
        for (p, partition) in self.partitions.iter().enumerate() {
            let spectrum = &self.history[(self.history_head + p) % slots];
            for ((acc, x), h) in self.accum.iter_mut().zip(spectrum).zip(partition) {
                *acc += x * h;
            }
        }

        self.inverse.process(&mut self.accum);
        let norm = 1.0 / fft_len as f32;
        for (dst, c) in self.output.iter_mut().zip(&self.accum[block..]) {
            *dst = c.re * norm;
        }
    }
}

/// Stereo convolution reverb (wet signal only, one block of latency)
pub struct Convolver {
    channels: [PartitionedConvolver; 2],
}

impl Convolver {
    pub fn new(impulse: &[Vec<f32>; 2], sample_rate: f32, block: usize) -> Self {
        let scale = impulse_normalization(impulse, sample_rate);
        let mut planner = FftPlanner::new();
        let left = PartitionedConvolver::new(&impulse[0], scale, block, &mut planner);
        let right = PartitionedConvolver::new(&impulse[1], scale, block, &mut planner);
        Self {
            channels: [left, right],
        }
    }

    pub fn process(&mut self, input: Frame) -> Frame {
        [
            self.channels[0].process(input[0]),
            self.channels[1].process(input[1]),
        ]
    }
}

/// Distortion curve for amount `k` with `len` points
pub fn distortion_curve(k: f32, len: usize) -> Vec<f32> {
    let deg = PI / 180.0;
    let len = len.max(2);
    (0..len)
        .map(|i| {
            let x = i as f32 * 2.0 / len as f32 - 1.0;
            (3.0 + k) * x * 20.0 * deg / (PI + k * x.abs())
        })
        .collect()
}

/// Curve lookup with linear interpolation across the curve index space
fn shape(curve: &[f32], x: f32) -> f32 {
    let last = curve.len() - 1;
    let v = last as f32 * 0.5 * (x + 1.0);
    if v <= 0.0 {
        curve[0]
    } else if v >= last as f32 {
        curve[last]
    } else {
        let k = v.floor() as usize;
        let f = v - k as f32;
        (1.0 - f) * curve[k] + f * curve[k + 1]
    }
}

/// Waveshaper switched between identity and a fixed distortion curve
pub struct WaveShaper {
    curve: Vec<f32>,
    enabled: bool,
}

impl WaveShaper {
    pub fn new(amount: f32, curve_len: usize) -> Self {
        Self {
            curve: distortion_curve(amount, curve_len),
            enabled: false,
        }
    }

    /// Returns true when the switch changed
    pub fn set_enabled(&mut self, enabled: bool) -> bool {
        if self.enabled == enabled {
            return false;
        }
        self.enabled = enabled;
        true
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn process(&self, input: Frame) -> Frame {
        if !self.enabled {
            return input;
        }
        [shape(&self.curve, input[0]), shape(&self.curve, input[1])]
    }
}

/// Equal-power stereo panner
#[derive(Clone, Debug)]
pub struct StereoPanner {
    pan: f32,
    gain_l: f32,
    gain_r: f32,
}

impl StereoPanner {
    pub fn new(pan: f32) -> Self {
        let mut panner = Self {
            pan: f32::NAN,
            gain_l: 0.0,
            gain_r: 0.0,
        };
        panner.set_pan(pan);
        panner
    }

    pub fn pan(&self) -> f32 {
        self.pan
    }

    /// Returns true when the pan position changed
    pub fn set_pan(&mut self, pan: f32) -> bool {
        let pan = pan.clamp(-1.0, 1.0);
        if pan == self.pan {
            return false;
        }
        self.pan = pan;
        let x = if pan <= 0.0 { pan + 1.0 } else { pan };
        self.gain_l = (x * PI / 2.0).cos();
        self.gain_r = (x * PI / 2.0).sin();
        true
    }

    pub fn process(&self, input: Frame) -> Frame {
        let [l, r] = input;
        if self.pan <= 0.0 {
            [l + r * self.gain_l, r * self.gain_r]
        } else {
            [l * self.gain_l, r + l * self.gain_r]
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    const SR: f32 = 44100.0;

    #[test]
    fn test_low_shelf_boosts_bass_only() {
        let filter = Biquad::low_shelf(SR, 200.0, 12.0);
        assert_relative_eq!(filter.magnitude_at(20.0), 10f32.powf(12.0 / 20.0), epsilon = 0.2);
        assert_relative_eq!(filter.magnitude_at(10_000.0), 1.0, epsilon = 0.01);
    }

    #[test]
    fn test_high_shelf_cuts_treble() {
        let filter = Biquad::high_shelf(SR, 4000.0, -10.0);
        assert!(filter.magnitude_at(18_000.0) < 0.4);
        assert_relative_eq!(filter.magnitude_at(50.0), 1.0, epsilon = 0.01);
    }

    #[test]
    fn test_low_pass_retarget_reports_change() {
        let mut filter = Biquad::low_pass(SR, 12000.0, 1.2);
        assert!(!filter.set_frequency(12000.0));
        assert!(filter.set_frequency(500.0));
        assert!(filter.magnitude_at(8000.0) < 0.05);
    }

    #[test]
    fn test_delay_zero_time_is_silent() {
        let mut delay = FeedbackDelay::new(SR, 5.0);
        delay.set_feedback(0.5);
        for _ in 0..100 {
            assert_eq!(delay.process([1.0, 1.0]), [0.0, 0.0]);
        }
    }

    #[test]
    fn test_delay_echo_and_feedback() {
        let mut delay = FeedbackDelay::new(1000.0, 1.0);
        delay.set_delay_s(0.01); // 10 samples
        delay.set_feedback(0.5);

        let mut out = Vec::new();
        for i in 0..40 {
            let x = if i == 0 { 1.0 } else { 0.0 };
            out.push(delay.process([x, x])[0]);
        }
        assert_relative_eq!(out[10], 1.0);
        assert_relative_eq!(out[20], 0.5);
        assert_relative_eq!(out[30], 0.25);
        assert_eq!(out[5], 0.0);
    }

    #[test]
    fn test_sub_sample_delay_reads_no_stale_frames() {
        let mut delay = FeedbackDelay::new(1000.0, 0.1);
        delay.set_delay_s(0.05);
        for _ in 0..200 {
            delay.process([1.0, 1.0]);
        }

        // Half a sample at 1 kHz rounds up to one
        assert!(delay.set_delay_s(0.0005));
        let out: Vec<f32> = (0..10).map(|_| delay.process([0.0, 0.0])[0]).collect();
        assert_relative_eq!(out[0], 1.0);
        assert!(out[1..].iter().all(|&s| s == 0.0));
    }

    #[test]
    fn test_feedback_clamped() {
        let mut delay = FeedbackDelay::new(SR, 1.0);
        delay.set_feedback(1.5);
        assert_eq!(delay.feedback(), 0.95);
    }

    #[test]
    fn test_waveshaper_identity_when_off() {
        let shaper = WaveShaper::new(400.0, 44100);
        for x in [-1.0, -0.3, 0.0, 0.42, 1.0] {
            assert_eq!(shaper.process([x, -x]), [x, -x]);
        }
    }

    #[test]
    fn test_waveshaper_curve_is_odd_and_bounded() {
        let mut shaper = WaveShaper::new(400.0, 44100);
        shaper.set_enabled(true);
        let [a, b] = shaper.process([0.5, -0.5]);
        assert_relative_eq!(a, -b, epsilon = 1e-3);
        assert!(a > 0.0 && a < 0.4);
    }

    #[test]
    fn test_panner_laws() {
        let center = StereoPanner::new(0.0);
        let out = center.process([0.3, 0.7]);
        assert_relative_eq!(out[0], 0.3, epsilon = 1e-6);
        assert_relative_eq!(out[1], 0.7, epsilon = 1e-6);

        let left = StereoPanner::new(-1.0);
        let out = left.process([0.3, 0.7]);
        assert_relative_eq!(out[0], 1.0, epsilon = 1e-6);
        assert_relative_eq!(out[1], 0.0, epsilon = 1e-6);

        let right = StereoPanner::new(1.0);
        let out = right.process([0.3, 0.7]);
        assert_relative_eq!(out[0], 0.0, epsilon = 1e-6);
        assert_relative_eq!(out[1], 1.0, epsilon = 1e-6);
    }

    #[test]
    fn test_convolver_matches_direct_convolution() {
        let impulse = [vec![1.0, 0.5, 0.0, 0.25, 0.1], vec![0.0, 1.0, 0.0, 0.0, 0.0]];
        let scale = impulse_normalization(&impulse, SR);
        let mut conv = Convolver::new(&impulse, SR, 4);

        let input: Vec<f32> = (0..24).map(|i| ((i * 7) % 5) as f32 - 2.0).collect();
        let output: Vec<Frame> = input.iter().map(|&x| conv.process([x, x])).collect();

        // One block of latency
        for n in 4..input.len() {
            let t = n - 4;
            let expected: f32 = (0..impulse[0].len())
                .filter(|&k| k <= t)
                .map(|k| impulse[0][k] * input[t - k])
                .sum();
            assert_relative_eq!(output[n][0] / scale, expected, epsilon = 1e-3);
        }
    }

    #[test]
    fn test_noise_impulse_decays() {
        let [left, right] = noise_impulse(1000.0, 1.0, 3.0, 7);
        assert_eq!(left.len(), 1000);
        assert_ne!(left, right);
        let head: f32 = left[..100].iter().map(|s| s.abs()).sum();
        let tail: f32 = left[900..].iter().map(|s| s.abs()).sum();
        assert!(head > tail * 10.0);
    }
}
