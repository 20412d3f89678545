//! Visual modes: interchangeable beat-driven renderers.
//!
//! Each mode owns its transient entities and turns one [`FrameContext`] into
//! draw ops. Rates in the modes are expressed per 60 fps frame and scaled by
//! [`FrameContext::frames`], so behavior is the same at any frame rate.

mod circular;
mod knob_scope;
mod polygon_mesh;
mod retro_grid;
mod rhythm;
mod ripple;
mod spectrum_bars;

use glam::Vec2;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use crate::beat::BeatEvent;
use crate::error::ModeFault;
use crate::frame::Frame;
use crate::params::{EffectParameters, Palette, VisualParams};
use crate::spectrum::BandEnergy;

pub use circular::CircularWaveform;
pub use knob_scope::KnobPanelScope;
pub use polygon_mesh::PolygonMesh;
pub use retro_grid::{BackdropLoop, RetroGrid};
pub use rhythm::{GamePhase, RhythmGame};
pub use ripple::RippleField;
pub use spectrum_bars::SpectrumBars;

/// The available visual modes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ModeKind {
    #[default]
    RippleField,
    RetroGrid,
    KnobScope,
    CircularWaveform,
    PolygonMesh,
    RhythmGame,
    SpectrumBars,
}

impl ModeKind {
    pub const ALL: [ModeKind; 7] = [
        ModeKind::RippleField,
        ModeKind::RetroGrid,
        ModeKind::KnobScope,
        ModeKind::CircularWaveform,
        ModeKind::PolygonMesh,
        ModeKind::RhythmGame,
        ModeKind::SpectrumBars,
    ];

    pub fn name(self) -> &'static str {
        match self {
            ModeKind::RippleField => "ripple",
            ModeKind::RetroGrid => "retro",
            ModeKind::KnobScope => "scope",
            ModeKind::CircularWaveform => "circular",
            ModeKind::PolygonMesh => "mesh",
            ModeKind::RhythmGame => "rhythm",
            ModeKind::SpectrumBars => "bars",
        }
    }

    /// Mode for a 0-based slot (F1 = 0)
    pub fn from_index(index: usize) -> Option<Self> {
        Self::ALL.get(index).copied()
    }
}

impl fmt::Display for ModeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ModeKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase();
        ModeKind::ALL
            .into_iter()
            .find(|m| m.name() == wanted)
            .ok_or_else(|| {
                let names: Vec<_> = ModeKind::ALL.iter().map(|m| m.name()).collect();
                format!("unknown mode '{}' (expected one of {})", s, names.join(", "))
            })
    }
}

/// Drawing surface size in pixels
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Viewport {
    pub width: f32,
    pub height: f32,
}

impl Viewport {
    pub fn new(width: f32, height: f32) -> Self {
        Self {
            width: width.max(1.0),
            height: height.max(1.0),
        }
    }

    pub fn size(&self) -> Vec2 {
        Vec2::new(self.width, self.height)
    }

    pub fn center(&self) -> Vec2 {
        self.size() * 0.5
    }

    pub fn max_side(&self) -> f32 {
        self.width.max(self.height)
    }

    pub fn min_side(&self) -> f32 {
        self.width.min(self.height)
    }
}

/// Keys forwarded to the active mode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Key {
    Space,
    Enter,
    Escape,
    Digit(u8),
    Other,
}

/// Pointer and keyboard input, in canvas pixels
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum InputEvent {
    PointerDown(Vec2),
    PointerUp(Vec2),
    PointerMove { pos: Vec2, pressed: bool },
    DoubleClick(Vec2),
    Key(Key),
}

/// Requests a mode sends back to the session
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ModeEvent {
    /// Seek to a fraction (0..1) of the track
    SeekFraction(f32),
    /// Start playback
    RequestPlay,
    /// A game session finished
    SessionEnded { hits: u32, misses: u32 },
}

/// Everything a mode sees for one frame
#[derive(Debug, Clone, Copy)]
pub struct FrameContext<'a> {
    /// Seconds since the previous frame (already clamped)
    pub dt: f32,
    /// Seconds since the engine started
    pub elapsed: f64,
    /// Playback position (seconds)
    pub time: f64,
    /// Beats that became due this frame
    pub beats: &'a [BeatEvent],
    pub bands: BandEnergy,
    /// Frequency frame (byte magnitude per bin)
    pub spectrum: &'a [u8],
    /// Whole beat list, empty in fallback mode
    pub schedule: &'a [f64],
    pub params: &'a VisualParams,
    /// Current effect settings of the audio graph
    pub effects: EffectParameters,
    pub viewport: Viewport,
    pub playing: bool,
    pub ended: bool,
    /// Track length (seconds), 0 when unknown
    pub duration: f64,
}

impl FrameContext<'_> {
    /// Elapsed time in 60 fps frames
    pub fn frames(&self) -> f32 {
        self.dt * 60.0
    }

    /// Theme colors at this frame's point of the animation
    pub fn palette(&self) -> Palette {
        self.params.theme.palette_at(self.elapsed)
    }

    pub fn beat(&self) -> bool {
        !self.beats.is_empty()
    }

    /// Decay `value` by `per_frame` scaled to this frame's length
    pub fn decay(&self, value: f32, per_frame: f32) -> f32 {
        value - per_frame * self.frames()
    }
}

/// Common lifecycle of the visual modes
pub trait VisualMode {
    fn kind(&self) -> ModeKind;

    /// Called once before the first frame
    fn on_activate(&mut self, viewport: Viewport) {
        self.on_resize(viewport);
    }

    /// Produce this frame's draw ops
    fn on_frame(&mut self, ctx: &FrameContext<'_>, frame: &mut Frame) -> Result<(), ModeFault>;

    fn on_input(&mut self, _event: &InputEvent) {}

    fn on_resize(&mut self, _viewport: Viewport) {}

    /// Called once when the mode is switched away from or faults
    fn on_deactivate(&mut self) {}

    /// Live transient entities (ripples, particles, gems, ...)
    fn entity_count(&self) -> usize;

    /// Short mode-specific status for the HUD
    fn status_line(&self) -> Option<String> {
        None
    }

    fn drain_events(&mut self) -> Vec<ModeEvent> {
        Vec::new()
    }
}

/// Pre-decoded assets handed to modes at construction
#[derive(Clone, Default)]
pub struct ModeAssets {
    pub backdrop: Option<Arc<BackdropLoop>>,
}

/// Build a fresh mode instance
pub fn create(kind: ModeKind, seed: u64, assets: &ModeAssets) -> Box<dyn VisualMode> {
    match kind {
        ModeKind::RippleField => Box::new(RippleField::new(seed)),
        ModeKind::RetroGrid => Box::new(RetroGrid::new(seed, assets.backdrop.clone())),
        ModeKind::KnobScope => Box::new(KnobPanelScope::new(seed)),
        ModeKind::CircularWaveform => Box::new(CircularWaveform::new(seed)),
        ModeKind::PolygonMesh => Box::new(PolygonMesh::new(seed)),
        ModeKind::RhythmGame => Box::new(RhythmGame::new(seed)),
        ModeKind::SpectrumBars => Box::new(SpectrumBars::new(seed)),
    }
}

/// Linear remap of `value` from one range to another
pub(crate) fn map_range(value: f32, from: (f32, f32), to: (f32, f32)) -> f32 {
    let span = from.1 - from.0;
    if span == 0.0 {
        return to.0;
    }
    to.0 + (value - from.0) / span * (to.1 - to.0)
}

/// Frame ops can only be produced from finite values
pub(crate) fn ensure_finite(kind: ModeKind, what: &str, value: f32) -> Result<(), ModeFault> {
    if value.is_finite() {
        Ok(())
    } else {
        Err(ModeFault::new(kind, format!("{} is not finite", what)))
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;

    #[test]
    fn test_mode_names_round_trip() {
        for kind in ModeKind::ALL {
            assert_eq!(kind.name().parse::<ModeKind>(), Ok(kind));
        }
        assert!("disco".parse::<ModeKind>().is_err());
    }

    #[test]
    fn test_every_mode_renders_and_reports_kind() {
        let harness = Harness::new();
        let beats = [scheduled_beat(1.0)];
        for kind in ModeKind::ALL {
            let mut mode = create(kind, 42, &ModeAssets::default());
            assert_eq!(mode.kind(), kind);
            mode.on_activate(harness.viewport);

            let mut frame = Frame::new(800.0, 600.0);
            for i in 0..30 {
                frame.reset(Some(kind));
                let beats: &[BeatEvent] = if i == 10 { &beats } else { &[] };
                mode.on_frame(&harness.ctx(i as f64 / 60.0, beats), &mut frame)
                    .unwrap();
            }
            assert!(!frame.ops.is_empty(), "{} drew nothing", kind);
            mode.on_deactivate();
        }
    }

    #[test]
    fn test_map_range() {
        assert_eq!(map_range(60.0, (0.0, 120.0), (120.0, 10.0)), 65.0);
        assert_eq!(map_range(1.0, (1.0, 1.0), (3.0, 4.0)), 3.0);
    }
}
