//! Live visual configuration supplied by the shell.

use std::fmt;
use std::ops::RangeInclusive;
use std::str::FromStr;

use crate::frame::Color;

/// Beat sensitivity range (multiplier)
pub const SENSITIVITY_RANGE: RangeInclusive<f32> = 0.3..=2.5;
/// Background element / particle count range
pub const ELEMENT_COUNT_RANGE: RangeInclusive<usize> = 20..=120;

/// Color themes offered to the listener
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ColorTheme {
    #[default]
    Neon,
    Light,
    Blue,
    Cyberpunk,
    Vaporwave,
    Galaxy,
    /// Accents cycle through the rainbow over time
    Vibrant,
}

/// Phase speed of the Vibrant accent cycle
const VIBRANT_RAD_PER_S: f64 = 0.25;

/// Sine-phased RGB, channels two radians apart
fn rainbow(t: f32) -> Color {
    let channel = |phase: f32| (128.0 + 127.0 * (t + phase).sin()) / 255.0;
    Color::rgba(channel(0.0), channel(2.0), channel(4.0), 1.0)
}

/// Resolved colors for a theme
#[derive(Debug, Clone, Copy)]
pub struct Palette {
    pub background: Color,
    pub ring: Color,
    pub dot: Color,
    pub link: Color,
    /// Rotation applied to the hue cycles of the HSB-driven modes (degrees)
    pub hue_offset: f32,
}

impl ColorTheme {
    pub const ALL: [ColorTheme; 7] = [
        ColorTheme::Neon,
        ColorTheme::Light,
        ColorTheme::Blue,
        ColorTheme::Cyberpunk,
        ColorTheme::Vaporwave,
        ColorTheme::Galaxy,
        ColorTheme::Vibrant,
    ];

    pub fn name(self) -> &'static str {
        match self {
            ColorTheme::Neon => "neon",
            ColorTheme::Light => "light",
            ColorTheme::Blue => "blue",
            ColorTheme::Cyberpunk => "cyberpunk",
            ColorTheme::Vaporwave => "vaporwave",
            ColorTheme::Galaxy => "galaxy",
            ColorTheme::Vibrant => "vibrant",
        }
    }

    /// Next theme in the cycle
    pub fn next(self) -> Self {
        let idx = Self::ALL.iter().position(|t| *t == self).unwrap_or(0);
        Self::ALL[(idx + 1) % Self::ALL.len()]
    }

    /// Palette at the start of the animation
    pub fn palette(self) -> Palette {
        self.palette_at(0.0)
    }

    /// Palette `elapsed` seconds into the animation; only Vibrant moves
    pub fn palette_at(self, elapsed: f64) -> Palette {
        match self {
            ColorTheme::Neon => Palette {
                background: Color::rgb8(2, 1, 10),
                ring: Color::rgb8(120, 200, 255),
                dot: Color::rgb8(120, 140, 180),
                link: Color::rgb8(100, 120, 160),
                hue_offset: 0.0,
            },
            ColorTheme::Light => Palette {
                background: Color::rgb8(236, 236, 240),
                ring: Color::rgb8(40, 40, 40),
                dot: Color::rgb8(60, 60, 60),
                link: Color::rgb8(90, 90, 90),
                hue_offset: 0.0,
            },
            ColorTheme::Blue => Palette {
                background: Color::rgb8(2, 6, 20),
                ring: Color::rgb8(80, 150, 240),
                dot: Color::rgb8(130, 170, 230),
                link: Color::rgb8(110, 150, 210),
                hue_offset: 200.0,
            },
            ColorTheme::Cyberpunk => Palette {
                background: Color::rgb8(7, 2, 18),
                ring: Color::rgb8(0, 255, 240),
                dot: Color::rgb8(255, 0, 200),
                link: Color::rgb8(185, 223, 243),
                hue_offset: 160.0,
            },
            ColorTheme::Vaporwave => Palette {
                background: Color::rgb8(28, 8, 88),
                ring: Color::rgb8(255, 154, 158),
                dot: Color::rgb8(161, 196, 253),
                link: Color::rgb8(255, 233, 242),
                hue_offset: 300.0,
            },
            ColorTheme::Galaxy => Palette {
                background: Color::rgb8(2, 8, 20),
                ring: Color::rgb8(127, 92, 255),
                dot: Color::rgb8(0, 255, 213),
                link: Color::rgb8(200, 234, 255),
                hue_offset: 250.0,
            },
            ColorTheme::Vibrant => {
                let t = (elapsed * VIBRANT_RAD_PER_S) as f32;
                Palette {
                    background: Color::rgb8(6, 6, 12),
                    ring: rainbow(t),
                    dot: rainbow(t + 1.2),
                    link: Color::rgb8(230, 230, 230),
                    hue_offset: t.to_degrees().rem_euclid(360.0),
                }
            }
        }
    }
}

impl fmt::Display for ColorTheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ColorTheme {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase();
        ColorTheme::ALL
            .into_iter()
            .find(|t| t.name() == wanted)
            .ok_or_else(|| format!("unknown theme '{}'", s))
    }
}

/// Options of the retro grid mode
#[derive(Debug, Clone, PartialEq)]
pub struct RetroGridOptions {
    /// Line brightness/width multiplier (0.5 - 3.0)
    pub intensity: f32,

    /// Scroll speed in grid cells per second (0.1 - 2.0)
    pub grid_speed: f32,

    /// Number of vertical grid lines (12 - 60)
    pub grid_cols: u32,
}

impl Default for RetroGridOptions {
    fn default() -> Self {
        Self {
            intensity: 1.0,
            grid_speed: 0.6,
            grid_cols: 36,
        }
    }
}

/// User-adjustable visual parameters, re-read by the modes every frame
#[derive(Debug, Clone, PartialEq)]
pub struct VisualParams {
    /// Beat sensitivity multiplier
    pub sensitivity: f32,

    /// Ambient element / particle count
    pub element_count: usize,

    pub theme: ColorTheme,

    pub retro_grid: RetroGridOptions,
}

impl Default for VisualParams {
    fn default() -> Self {
        Self {
            sensitivity: 1.0,
            element_count: 55,
            theme: ColorTheme::Neon,
            retro_grid: RetroGridOptions::default(),
        }
    }
}

impl VisualParams {
    /// Copy with every value forced into its valid range
    pub fn clamped(&self) -> Self {
        let sensitivity = if self.sensitivity.is_finite() {
            self.sensitivity
                .clamp(*SENSITIVITY_RANGE.start(), *SENSITIVITY_RANGE.end())
        } else {
            1.0
        };
        Self {
            sensitivity,
            element_count: self
                .element_count
                .clamp(*ELEMENT_COUNT_RANGE.start(), *ELEMENT_COUNT_RANGE.end()),
            theme: self.theme,
            retro_grid: RetroGridOptions {
                intensity: self.retro_grid.intensity.clamp(0.5, 3.0),
                grid_speed: self.retro_grid.grid_speed.clamp(0.1, 2.0),
                grid_cols: self.retro_grid.grid_cols.clamp(12, 60),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clamped_ranges() {
        let p = VisualParams {
            sensitivity: 9.0,
            element_count: 3,
            ..Default::default()
        }
        .clamped();
        assert_eq!(p.sensitivity, 2.5);
        assert_eq!(p.element_count, 20);
    }

    #[test]
    fn test_theme_cycle_wraps() {
        let mut theme = ColorTheme::Neon;
        for _ in 0..ColorTheme::ALL.len() {
            theme = theme.next();
        }
        assert_eq!(theme, ColorTheme::Neon);
        assert_eq!("Galaxy".parse(), Ok(ColorTheme::Galaxy));
    }

    #[test]
    fn test_only_vibrant_animates() {
        let a = ColorTheme::Vibrant.palette_at(0.0);
        let b = ColorTheme::Vibrant.palette_at(4.0);
        assert_ne!(a.ring, b.ring);
        assert_eq!(a.background, b.background);
        assert!(b.hue_offset > a.hue_offset);

        let neon = ColorTheme::Neon;
        assert_eq!(neon.palette_at(0.0).ring, neon.palette_at(4.0).ring);
    }
}
