//! The effects signal chain.
//!
//! Topology (fixed once connected):
//!
//! ```text
//! source -> low-shelf -> high-shelf -> low-pass sweep -+-> dry gain ----------+
//!                                                      +-> reverb -> wet gain +-> shaper -> master -> panner -> tap
//!                                                      +-> delay <-> feedback +
//! ```

use log::{debug, info};

use super::analyzer::AnalyzerTap;
use super::nodes::{noise_impulse, Biquad, Convolver, FeedbackDelay, Frame, Gain, StereoPanner, WaveShaper};
use crate::error::AudioError;
use crate::params::audio_constants::{CONVOLVER_BLOCK, MAX_SAMPLE_RATE, MIN_SAMPLE_RATE};
use crate::params::{EffectParameters, GraphConfig};

/// Connected nodes of one track's chain
struct SignalChain {
    low_shelf: Biquad,
    high_shelf: Biquad,
    sweep: Biquad,
    dry: Gain,
    reverb: Convolver,
    wet: Gain,
    delay: FeedbackDelay,
    shaper: WaveShaper,
    master: Gain,
    panner: StereoPanner,
    tap: AnalyzerTap,
}

impl SignalChain {
    fn build(sample_rate: u32, config: &GraphConfig, tap_len: usize) -> Self {
        let sr = sample_rate as f32;
        let defaults = EffectParameters::default();
        let impulse = noise_impulse(
            sr,
            config.reverb_length_s,
            config.reverb_decay,
            config.reverb_seed,
        );

        let mut chain = Self {
            low_shelf: Biquad::low_shelf(sr, config.low_shelf_hz, defaults.bass_db),
            high_shelf: Biquad::high_shelf(sr, config.high_shelf_hz, defaults.treble_db),
            sweep: Biquad::low_pass(sr, defaults.sweep_hz, config.sweep_q),
            dry: Gain::new(defaults.dry_gain()),
            reverb: Convolver::new(&impulse, sr, CONVOLVER_BLOCK),
            wet: Gain::new(defaults.reverb_wet),
            delay: FeedbackDelay::new(sr, config.max_delay_s),
            shaper: WaveShaper::new(config.distortion_amount, config.distortion_curve_len),
            master: Gain::new(defaults.volume),
            panner: StereoPanner::new(defaults.pan),
            tap: AnalyzerTap::new(tap_len),
        };
        chain.apply(&defaults);
        chain
    }

    /// Push parameter values into the nodes, counting the nodes that changed
    fn apply(&mut self, p: &EffectParameters) -> usize {
        let changes = [
            self.low_shelf.set_gain_db(p.bass_db),
            self.high_shelf.set_gain_db(p.treble_db),
            self.sweep.set_frequency(p.sweep_hz),
            self.dry.set(p.dry_gain()),
            self.wet.set(p.reverb_wet),
            self.delay.set_delay_s(p.delay_time_s()),
            self.delay.set_feedback(p.delay_feedback),
            self.shaper.set_enabled(p.distortion),
            self.master.set(p.volume),
            self.panner.set_pan(p.pan),
        ];
        changes.iter().filter(|changed| **changed).count()
    }

    #[inline]
    fn process_frame(&mut self, input: Frame) -> Frame {
        let x = self.low_shelf.process(input);
        let x = self.high_shelf.process(x);
        let x = self.sweep.process(x);

        let dry = self.dry.process(x);
        let wet = self.wet.process(self.reverb.process(x));
        let echo = self.delay.process(x);

        let sum = [
            dry[0] + wet[0] + echo[0],
            dry[1] + wet[1] + echo[1],
        ];
        let shaped = self.shaper.process(sum);
        self.panner.process(self.master.process(shaped))
    }
}

/// Effects graph for the active track.
///
/// Without a connected chain the graph is a passthrough with no analyzer.
pub struct AudioGraph {
    sample_rate: u32,
    config: GraphConfig,
    tap_len: usize,
    chain: Option<SignalChain>,
    params: EffectParameters,
}

impl AudioGraph {
    pub fn new(sample_rate: u32, config: GraphConfig, tap_len: usize) -> Result<Self, AudioError> {
        if !(MIN_SAMPLE_RATE..=MAX_SAMPLE_RATE).contains(&sample_rate) {
            return Err(AudioError::InvalidConfig(format!(
                "sample rate {} Hz outside {}..={}",
                sample_rate, MIN_SAMPLE_RATE, MAX_SAMPLE_RATE
            )));
        }
        Ok(Self {
            sample_rate,
            config,
            tap_len,
            chain: None,
            params: EffectParameters::default(),
        })
    }

    /// Graph that never connects: samples pass through untouched
    pub fn passthrough(sample_rate: u32) -> Self {
        Self {
            sample_rate,
            config: GraphConfig::default(),
            tap_len: 0,
            chain: None,
            params: EffectParameters::default(),
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn is_connected(&self) -> bool {
        self.chain.is_some()
    }

    /// Build the node chain for a newly loaded track. Connecting again is a
    /// no-op; the current parameters are applied to the fresh nodes.
    pub fn connect(&mut self) {
        if self.chain.is_some() || self.tap_len == 0 {
            return;
        }
        let mut chain = SignalChain::build(self.sample_rate, &self.config, self.tap_len);
        chain.apply(&self.params);
        info!(
            "Audio graph connected @ {} Hz (reverb {:.1}s, delay max {:.0}s)",
            self.sample_rate, self.config.reverb_length_s, self.config.max_delay_s
        );
        self.chain = Some(chain);
    }

    /// Re-target live node parameters without touching the topology.
    ///
    /// Values are clamped first. Returns the number of nodes whose value
    /// actually changed, so applying the same parameters twice returns 0 the
    /// second time.
    pub fn configure(&mut self, params: &EffectParameters) -> usize {
        self.params = params.clamped();
        match self.chain.as_mut() {
            Some(chain) => {
                let changed = chain.apply(&self.params);
                if changed > 0 {
                    debug!("Graph re-targeted {} node(s)", changed);
                }
                changed
            }
            None => 0,
        }
    }

    /// Current (clamped) parameters
    pub fn params(&self) -> &EffectParameters {
        &self.params
    }

    /// Read handle onto the analyzer, absent when not connected
    pub fn analyzer_tap(&self) -> Option<AnalyzerTap> {
        self.chain.as_ref().map(|chain| chain.tap.clone())
    }

    /// Release all nodes; the graph reverts to passthrough
    pub fn dispose(&mut self) {
        if self.chain.take().is_some() {
            debug!("Audio graph disposed");
        }
    }

    /// Process frames in place and feed the analyzer tap
    pub fn process(&mut self, frames: &mut [Frame]) {
        let Some(chain) = self.chain.as_mut() else {
            return;
        };
        for frame in frames.iter_mut() {
            *frame = chain.process_frame(*frame);
        }
        chain.tap.write(frames);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn connected() -> AudioGraph {
        let mut graph = AudioGraph::new(44100, GraphConfig::default(), 2048).unwrap();
        graph.connect();
        graph
    }

    #[test]
    fn test_passthrough_leaves_samples_untouched() {
        let mut graph = AudioGraph::passthrough(44100);
        let mut frames = vec![[0.25, -0.5], [1.0, 0.0]];
        graph.process(&mut frames);
        assert_eq!(frames, vec![[0.25, -0.5], [1.0, 0.0]]);
        assert!(graph.analyzer_tap().is_none());
    }

    #[test]
    fn test_configure_is_idempotent() {
        let mut graph = connected();
        let params = EffectParameters {
            bass_db: 8.0,
            treble_db: 2.0,
            delay_time_ms: 120.0,
            delay_feedback: 0.35,
            reverb_wet: 0.2,
            sweep_hz: 8000.0,
            ..Default::default()
        };
        assert!(graph.configure(&params) > 0);
        assert_eq!(graph.configure(&params), 0);
    }

    #[test]
    fn test_configure_clamps_feedback() {
        let mut graph = connected();
        graph.configure(&EffectParameters {
            delay_feedback: 1.7,
            ..Default::default()
        });
        assert_eq!(graph.params().delay_feedback, 0.95);
    }

    #[test]
    fn test_dispose_reverts_to_passthrough() {
        let mut graph = connected();
        assert!(graph.analyzer_tap().is_some());
        graph.dispose();
        assert!(!graph.is_connected());
        assert!(graph.analyzer_tap().is_none());
    }

    #[test]
    fn test_processing_feeds_tap() {
        let mut graph = connected();
        let tap = graph.analyzer_tap().unwrap();
        let mut frames: Vec<Frame> = (0..4096)
            .map(|i| {
                let s = (i as f32 * 0.05).sin() * 0.5;
                [s, s]
            })
            .collect();
        graph.process(&mut frames);
        assert_eq!(tap.filled(), 2048);

        let mut window = Vec::new();
        tap.snapshot(&mut window);
        assert!(window.iter().any(|s| s.abs() > 0.01));
    }

    #[test]
    fn test_rejects_bad_sample_rate() {
        assert!(AudioGraph::new(1000, GraphConfig::default(), 2048).is_err());
    }
}
