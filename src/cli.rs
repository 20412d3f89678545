//! Command-line argument parsing.

use clap::Parser;
use log::{info, warn};
use std::io;
use std::path::PathBuf;

use crate::modes::ModeKind;
use crate::params::{ColorTheme, EffectControl, EffectParameters, RecordingConfig, VisualParams};

/// Command line arguments
#[derive(Parser, Debug)]
#[command(name = "SonicPlay")]
#[command(about = "Beat-synchronized music visualizer with an effects rack", long_about = None)]
pub struct Args {
    /// WAV file to play
    #[arg(value_name = "TRACK")]
    pub track: Option<PathBuf>,

    /// JSON beat list (`[0.5, 1.0, ...]` seconds); live detection without it
    #[arg(long, value_name = "FILE")]
    pub beats: Option<PathBuf>,

    /// Visual mode: ripple, retro, scope, circular, mesh, rhythm, bars
    #[arg(long, value_name = "MODE", default_value = "ripple")]
    pub mode: String,

    /// Color theme: neon, light, blue, cyberpunk, vaporwave, galaxy, vibrant
    #[arg(long, value_name = "THEME", default_value = "neon")]
    pub theme: String,

    /// Beat sensitivity multiplier (0.3 - 2.5)
    #[arg(long, value_name = "X", default_value = "1.0")]
    pub sensitivity: f32,

    /// Ambient element count (20 - 120)
    #[arg(long, value_name = "N", default_value = "55")]
    pub elements: usize,

    /// Image or GIF loop shown behind the retro grid
    #[arg(long, value_name = "FILE")]
    pub backdrop: Option<PathBuf>,

    /// Load a named effects preset
    #[arg(long, value_name = "NAME")]
    pub preset: Option<String>,

    /// Save the resulting effects under NAME
    #[arg(long, value_name = "NAME")]
    pub save_preset: Option<String>,

    /// Delete a named preset
    #[arg(long, value_name = "NAME")]
    pub delete_preset: Option<String>,

    /// Print the stored preset names and exit
    #[arg(long)]
    pub list_presets: bool,

    /// Override one effect control, e.g. `--set delayFeedback=0.4` (repeatable)
    #[arg(long = "set", value_name = "NAME=VALUE")]
    pub overrides: Vec<String>,

    /// Render headless for SECONDS, writing PNG frames and a WAV file
    #[arg(long, value_name = "SECONDS")]
    pub record: Option<f32>,

    /// Output directory for --record
    #[arg(long, value_name = "DIR", default_value = "recording")]
    pub out: PathBuf,
}

impl Args {
    /// Parse the visual mode, falling back to the ripple field
    pub fn parse_mode(&self) -> ModeKind {
        match self.mode.parse() {
            Ok(kind) => {
                info!("Mode: {}", kind);
                kind
            }
            Err(e) => {
                warn!("{}, using {}", e, ModeKind::default());
                ModeKind::default()
            }
        }
    }

    /// Visual parameters from the theme, sensitivity and element flags
    pub fn visual_params(&self) -> VisualParams {
        let theme = self.theme.parse().unwrap_or_else(|e| {
            warn!("{}, using {}", e, ColorTheme::default());
            ColorTheme::default()
        });
        let params = VisualParams {
            sensitivity: self.sensitivity,
            element_count: self.elements,
            theme,
            ..VisualParams::default()
        };
        let clamped = params.clamped();
        if clamped != params {
            warn!(
                "Visual settings clamped to sensitivity {:.2}, {} elements",
                clamped.sensitivity, clamped.element_count
            );
        }
        clamped
    }

    /// Parse `--set name=value` overrides
    pub fn effect_overrides(&self) -> Result<Vec<(EffectControl, f32)>, String> {
        self.overrides.iter().map(|raw| parse_override(raw)).collect()
    }

    /// Apply the overrides on top of `base`
    pub fn apply_overrides(&self, base: &EffectParameters) -> Result<EffectParameters, String> {
        let mut params = *base;
        for (control, value) in self.effect_overrides()? {
            params.set(control, value);
        }
        Ok(params)
    }

    /// Create recording configuration if recording mode is enabled
    pub fn create_recording_config(&self) -> io::Result<Option<RecordingConfig>> {
        let Some(duration) = self.record else {
            return Ok(None);
        };
        let mut config = RecordingConfig::new(duration.max(0.0));
        config.output_dir = self.out.clone();

        std::fs::create_dir_all(config.frames_dir())?;
        info!(
            "Recording {:.1}s at {} fps into {}",
            config.duration_secs,
            config.fps,
            config.output_dir.display()
        );
        Ok(Some(config))
    }
}

/// `name=value`, where value is a number or `on`/`off` for toggles
fn parse_override(raw: &str) -> Result<(EffectControl, f32), String> {
    let (name, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected NAME=VALUE, got '{}'", raw))?;
    let control: EffectControl = name.parse()?;
    let value = match value.trim().to_ascii_lowercase().as_str() {
        "on" | "true" => 1.0,
        "off" | "false" => 0.0,
        number => number
            .parse::<f32>()
            .map_err(|_| format!("invalid value '{}' for {}", value, control))?,
    };
    Ok((control, value))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(extra: &[&str]) -> Args {
        let mut argv = vec!["sonicplay"];
        argv.extend_from_slice(extra);
        Args::parse_from(argv)
    }

    #[test]
    fn test_defaults() {
        let a = args(&[]);
        assert!(a.track.is_none());
        assert_eq!(a.parse_mode(), ModeKind::RippleField);
        assert_eq!(a.visual_params(), VisualParams::default());
        assert!(a.create_recording_config().unwrap().is_none());
    }

    #[test]
    fn test_mode_and_theme_names() {
        let a = args(&["--mode", "bars", "--theme", "vibrant"]);
        assert_eq!(a.parse_mode(), ModeKind::SpectrumBars);
        assert_eq!(a.visual_params().theme, ColorTheme::Vibrant);
        assert_eq!(args(&["--mode", "disco"]).parse_mode(), ModeKind::RippleField);
    }

    #[test]
    fn test_visual_flags_are_clamped() {
        let a = args(&["--theme", "galaxy", "--sensitivity", "9", "--elements", "3"]);
        let p = a.visual_params();
        assert_eq!(p.theme, ColorTheme::Galaxy);
        assert_eq!(p.sensitivity, 2.5);
        assert_eq!(p.element_count, 20);
    }

    #[test]
    fn test_effect_overrides() {
        let a = args(&[
            "song.wav",
            "--set",
            "delayFeedback=3",
            "--set",
            "robot=on",
            "--set",
            "pan=-0.5",
        ]);
        let p = a.apply_overrides(&EffectParameters::default()).unwrap();
        assert_eq!(p.delay_feedback, 0.95);
        assert!(p.distortion);
        assert_eq!(p.pan, -0.5);

        let bad = args(&["--set", "wobble=1"]);
        assert!(bad.apply_overrides(&EffectParameters::default()).is_err());
        let bad = args(&["--set", "volume"]);
        assert!(bad.effect_overrides().is_err());
    }

    #[test]
    fn test_recording_config_creates_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("rec");
        let a = args(&["--record", "2", "--out", out.to_str().unwrap()]);
        let config = a.create_recording_config().unwrap().unwrap();
        assert_eq!(config.total_frames(), 120);
        assert!(out.join("frames").is_dir());
    }
}
