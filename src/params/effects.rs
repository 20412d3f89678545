//! Effects-rack parameters with fixed ranges and defaults.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::RangeInclusive;
use std::str::FromStr;

/// Master volume range (linear gain)
pub const VOLUME_RANGE: RangeInclusive<f32> = 0.0..=1.0;
/// Stereo pan range (-1 = hard left, +1 = hard right)
pub const PAN_RANGE: RangeInclusive<f32> = -1.0..=1.0;
/// Low-shelf boost range (dB)
pub const BASS_DB_RANGE: RangeInclusive<f32> = 0.0..=20.0;
/// High-shelf gain range (dB)
pub const TREBLE_DB_RANGE: RangeInclusive<f32> = -10.0..=10.0;
/// Delay time range (milliseconds)
pub const DELAY_TIME_MS_RANGE: RangeInclusive<f32> = 0.0..=1200.0;
/// Delay feedback range. Anything at or above 1.0 self-oscillates.
pub const DELAY_FEEDBACK_RANGE: RangeInclusive<f32> = 0.0..=0.95;
/// Reverb wet mix range (dry = 1 - wet)
pub const REVERB_WET_RANGE: RangeInclusive<f32> = 0.0..=1.0;
/// Playback rate range (also shifts pitch)
pub const PLAYBACK_RATE_RANGE: RangeInclusive<f32> = 0.5..=1.6;
/// Low-pass sweep cutoff range (Hz)
pub const SWEEP_HZ_RANGE: RangeInclusive<f32> = 60.0..=12000.0;

/// Live parameters of the effects rack.
///
/// Field names serialize with the same keys the preset storage has always
/// used, so stored presets stay readable.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EffectParameters {
    /// Master gain (linear)
    pub volume: f32,

    /// Stereo position
    pub pan: f32,

    /// Low-shelf (200 Hz) gain in dB
    #[serde(rename = "bass")]
    pub bass_db: f32,

    /// High-shelf (4 kHz) gain in dB
    #[serde(rename = "treble")]
    pub treble_db: f32,

    /// Feedback delay time in milliseconds (0 disables the delay path)
    #[serde(rename = "delayTime")]
    pub delay_time_ms: f32,

    /// Feedback gain around the delay line
    pub delay_feedback: f32,

    /// Reverb wet gain; the dry path gets `1 - reverb_wet`
    pub reverb_wet: f32,

    /// Source playback rate. There is no pitch correction, so this is also
    /// the pitch control.
    pub playback_rate: f32,

    /// Low-pass sweep cutoff in Hz
    #[serde(rename = "sweep")]
    pub sweep_hz: f32,

    /// Fixed waveshaper distortion on/off
    #[serde(rename = "robot")]
    pub distortion: bool,
}

impl Default for EffectParameters {
    fn default() -> Self {
        Self {
            volume: 1.0,
            pan: 0.0,
            bass_db: 0.0,
            treble_db: 0.0,
            delay_time_ms: 0.0,
            delay_feedback: 0.25,
            reverb_wet: 0.25,
            playback_rate: 1.0,
            sweep_hz: 12000.0,
            distortion: false,
        }
    }
}

/// Clamp into range; non-finite input falls back to `fallback`.
fn clamp_or(value: f32, range: &RangeInclusive<f32>, fallback: f32) -> f32 {
    if value.is_finite() {
        value.clamp(*range.start(), *range.end())
    } else {
        fallback
    }
}

impl EffectParameters {
    /// Copy with every control forced into its valid range.
    pub fn clamped(&self) -> Self {
        let d = Self::default();
        Self {
            volume: clamp_or(self.volume, &VOLUME_RANGE, d.volume),
            pan: clamp_or(self.pan, &PAN_RANGE, d.pan),
            bass_db: clamp_or(self.bass_db, &BASS_DB_RANGE, d.bass_db),
            treble_db: clamp_or(self.treble_db, &TREBLE_DB_RANGE, d.treble_db),
            delay_time_ms: clamp_or(self.delay_time_ms, &DELAY_TIME_MS_RANGE, d.delay_time_ms),
            delay_feedback: clamp_or(self.delay_feedback, &DELAY_FEEDBACK_RANGE, d.delay_feedback),
            reverb_wet: clamp_or(self.reverb_wet, &REVERB_WET_RANGE, d.reverb_wet),
            playback_rate: clamp_or(self.playback_rate, &PLAYBACK_RATE_RANGE, d.playback_rate),
            sweep_hz: clamp_or(self.sweep_hz, &SWEEP_HZ_RANGE, d.sweep_hz),
            distortion: self.distortion,
        }
    }

    /// Dry path gain, complementary to the reverb wet gain.
    pub fn dry_gain(&self) -> f32 {
        (1.0 - self.reverb_wet).max(0.0)
    }

    /// Delay time in seconds.
    pub fn delay_time_s(&self) -> f32 {
        self.delay_time_ms.max(0.0) / 1000.0
    }

    /// Set one control by name. Values are clamped like any other input.
    pub fn set(&mut self, control: EffectControl, value: f32) {
        match control {
            EffectControl::Volume => self.volume = value,
            EffectControl::Pan => self.pan = value,
            EffectControl::Bass => self.bass_db = value,
            EffectControl::Treble => self.treble_db = value,
            EffectControl::DelayTime => self.delay_time_ms = value,
            EffectControl::DelayFeedback => self.delay_feedback = value,
            EffectControl::ReverbWet => self.reverb_wet = value,
            EffectControl::PlaybackRate => self.playback_rate = value,
            EffectControl::Sweep => self.sweep_hz = value,
            EffectControl::Robot => self.distortion = value >= 0.5,
        }
        *self = self.clamped();
    }

    /// Read one control by name (booleans read as 0.0 / 1.0).
    pub fn get(&self, control: EffectControl) -> f32 {
        match control {
            EffectControl::Volume => self.volume,
            EffectControl::Pan => self.pan,
            EffectControl::Bass => self.bass_db,
            EffectControl::Treble => self.treble_db,
            EffectControl::DelayTime => self.delay_time_ms,
            EffectControl::DelayFeedback => self.delay_feedback,
            EffectControl::ReverbWet => self.reverb_wet,
            EffectControl::PlaybackRate => self.playback_rate,
            EffectControl::Sweep => self.sweep_hz,
            EffectControl::Robot => f32::from(u8::from(self.distortion)),
        }
    }
}

/// Named effect controls
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EffectControl {
    Volume,
    Pan,
    Bass,
    Treble,
    DelayTime,
    DelayFeedback,
    ReverbWet,
    PlaybackRate,
    Sweep,
    Robot,
}

impl EffectControl {
    pub const ALL: [EffectControl; 10] = [
        EffectControl::Volume,
        EffectControl::Pan,
        EffectControl::Bass,
        EffectControl::Treble,
        EffectControl::DelayTime,
        EffectControl::DelayFeedback,
        EffectControl::ReverbWet,
        EffectControl::PlaybackRate,
        EffectControl::Sweep,
        EffectControl::Robot,
    ];

    pub fn name(self) -> &'static str {
        match self {
            EffectControl::Volume => "volume",
            EffectControl::Pan => "pan",
            EffectControl::Bass => "bass",
            EffectControl::Treble => "treble",
            EffectControl::DelayTime => "delayTime",
            EffectControl::DelayFeedback => "delayFeedback",
            EffectControl::ReverbWet => "reverbWet",
            EffectControl::PlaybackRate => "playbackRate",
            EffectControl::Sweep => "sweep",
            EffectControl::Robot => "robot",
        }
    }
}

impl fmt::Display for EffectControl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for EffectControl {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().replace(['_', '-'], "").to_ascii_lowercase();
        EffectControl::ALL
            .into_iter()
            .find(|c| c.name().to_ascii_lowercase() == wanted)
            .ok_or_else(|| format!("unknown effect control '{}'", s))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_feedback_always_clamped() {
        for raw in [-3.0, 0.0, 0.5, 0.95, 1.0, 1.7, 1e9, f32::INFINITY] {
            let p = EffectParameters {
                delay_feedback: raw,
                ..Default::default()
            }
            .clamped();
            assert!((0.0..=0.95).contains(&p.delay_feedback), "raw {raw}");
        }
    }

    #[test]
    fn test_nan_falls_back_to_default() {
        let p = EffectParameters {
            sweep_hz: f32::NAN,
            ..Default::default()
        }
        .clamped();
        assert_eq!(p.sweep_hz, 12000.0);
    }

    #[test]
    fn test_dry_wet_complementary() {
        let p = EffectParameters {
            reverb_wet: 0.3,
            ..Default::default()
        };
        assert!((p.dry_gain() + p.reverb_wet - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_control_names_parse() {
        assert_eq!("delayFeedback".parse(), Ok(EffectControl::DelayFeedback));
        assert_eq!("delay_feedback".parse(), Ok(EffectControl::DelayFeedback));
        assert_eq!("ROBOT".parse(), Ok(EffectControl::Robot));
        assert!("flanger".parse::<EffectControl>().is_err());
    }

    #[test]
    fn test_set_clamps() {
        let mut p = EffectParameters::default();
        p.set(EffectControl::PlaybackRate, 4.0);
        assert_eq!(p.playback_rate, 1.6);
        p.set(EffectControl::Robot, 1.0);
        assert!(p.distortion);
    }

    #[test]
    fn test_serializes_with_storage_keys() {
        let json = serde_json::to_value(EffectParameters::default()).unwrap();
        for key in EffectControl::ALL {
            assert!(json.get(key.name()).is_some(), "missing {}", key);
        }
    }
}
