//! Polygon mesh: concentric noise-warped polygons, a skeleton grid and random chords.

use glam::{Mat2, Vec2};
use noise::{NoiseFn, Perlin};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::f32::consts::TAU;

use super::{ensure_finite, map_range, FrameContext, InputEvent, Key, ModeKind, Viewport, VisualMode};
use crate::error::ModeFault;
use crate::frame::{Blend, Clear, Color, Frame, Shape, Style};
use crate::spectrum::BandEnergy;

const RINGS: usize = 9;
const SKELETON_LAYERS: usize = 12;
const CHORDS: usize = 120;
const NOISE_SCALE: f32 = 0.0025;
/// Vertical squash so the mesh covers a landscape canvas
const SQUASH: f32 = 0.72;
/// Rotation velocity kept per frame
const ROTATION_DAMPING: f32 = 0.92;

struct Ripple {
    /// Relative to the canvas centre, in mesh space
    pos: Vec2,
    radius: f32,
    /// 0..100
    life: f32,
}

/// Noise warp and angular ripple of one outline pass
struct WarpPass {
    /// Peak noise displacement (pixels)
    warp: f32,
    /// Warp gain: base + mids × slope
    warp_gain: (f32, f32),
    scale: Vec2,
    offset: Vec2,
    /// Noise field scroll per frame
    drift: Vec2,
    /// Angular ripple amplitude: base + treble × slope
    ripple: (f32, f32),
    /// Angular ripple speed per frame and its growth per ring
    ripple_speed: (f32, f32),
}

const GLOW_PASS: WarpPass = WarpPass {
    warp: 60.0,
    warp_gain: (0.4, 1.7),
    scale: Vec2::new(1.1, 0.9),
    offset: Vec2::new(0.03, -0.02),
    drift: Vec2::new(0.0014, 0.0011),
    ripple: (2.0, 8.0),
    ripple_speed: (0.002, 0.06),
};

const FILAMENT_PASS: WarpPass = WarpPass {
    warp: 30.0,
    warp_gain: (0.6, 1.2),
    scale: Vec2::new(1.2, 0.8),
    offset: Vec2::new(-0.02, 0.03),
    drift: Vec2::new(0.0017, 0.0013),
    ripple: (1.8, 6.0),
    ripple_speed: (0.004, 0.05),
};

pub struct PolygonMesh {
    rng: StdRng,
    perlin: Perlin,
    viewport: Viewport,
    ripples: Vec<Ripple>,
    rotation: f32,
    rotation_vel: f32,
    flash: f32,
    frame_count: f32,
    trance: bool,
    last_pointer: Option<Vec2>,
}

impl PolygonMesh {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            perlin: Perlin::new(seed as u32),
            viewport: Viewport::new(1.0, 1.0),
            ripples: Vec::new(),
            rotation: 0.0,
            rotation_vel: 0.0,
            flash: 0.0,
            frame_count: 0.0,
            trance: false,
            last_pointer: None,
        }
    }

    pub fn is_trance(&self) -> bool {
        self.trance
    }

    /// Three-octave Perlin in 0..1
    fn noise01(&self, x: f32, y: f32) -> f32 {
        let mut sum = 0.0;
        let mut amp = 1.0;
        let mut freq = 1.0;
        let mut norm = 0.0;
        for _ in 0..3 {
            sum += amp * self.perlin.get([(x * freq) as f64, (y * freq) as f64]) as f32;
            norm += amp;
            amp *= 0.55;
            freq *= 2.0;
        }
        (sum / norm * 0.5 + 0.5).clamp(0.0, 1.0)
    }

    fn max_radius(&self) -> f32 {
        self.viewport.size().length() * 0.62
    }

    /// Mesh space (centred, squashed, rotated) to canvas pixels
    fn to_canvas(&self, rotation: Mat2, r: f32, a: f32) -> Vec2 {
        self.viewport.center() + rotation * Vec2::new(r * a.cos(), r * a.sin() * SQUASH)
    }

    fn ring_outline(
        &self,
        rotation: Mat2,
        ring: usize,
        pass: &WarpPass,
        boost: f32,
        bands: BandEnergy,
    ) -> Vec<Vec2> {
        let fc = self.frame_count;
        let ringf = ring as f32;
        let ring_scale = map_range(ringf, (0.0, (RINGS - 1) as f32), (0.20, 1.05));
        let sides = 6 + ring * 2;
        let points = sides * 6;
        let max_r = self.max_radius();
        let warp_gain = pass.warp_gain.0 + bands.mid * pass.warp_gain.1;
        let ripple_amp = pass.ripple.0 + bands.treble * pass.ripple.1;
        let ripple_speed = pass.ripple_speed.0 * (1.0 + ringf * pass.ripple_speed.1);
        (0..=points)
            .map(|i| {
                let a = TAU * i as f32 / points as f32;
                // Sawtooth radius keeps the polygonal look
                let base = ring_scale * max_r * (0.3 + 0.7 * (i % sides) as f32 / sides as f32);
                let nx = a.cos() * base * NOISE_SCALE * pass.scale.x + ringf * pass.offset.x;
                let ny = a.sin() * base * NOISE_SCALE * pass.scale.y + ringf * pass.offset.y;
                let n = self.noise01(nx + fc * pass.drift.x, ny - fc * pass.drift.y);
                let warp = map_range(n, (0.0, 1.0), (-pass.warp, pass.warp)) * warp_gain;
                let ripple = (a * (sides / 2) as f32 + fc * ripple_speed).sin() * ripple_amp;
                self.to_canvas(rotation, base + warp + ripple + boost, a)
            })
            .collect()
    }
}

impl VisualMode for PolygonMesh {
    fn kind(&self) -> ModeKind {
        ModeKind::PolygonMesh
    }

    fn on_resize(&mut self, viewport: Viewport) {
        self.viewport = viewport;
    }

    fn on_frame(&mut self, ctx: &FrameContext<'_>, frame: &mut Frame) -> Result<(), ModeFault> {
        let frames = ctx.frames();
        self.frame_count += frames;
        let fc = self.frame_count;
        let hue_offset = ctx.palette().hue_offset;
        let trail = if self.trance { 6.0 } else { 28.0 };
        frame.clear = Clear::Fade(Color::hsba(8.0, 0.1, 0.12, trail / 255.0));

        let beat = ctx.beat();
        if beat {
            self.flash = 120.0;
        }
        if self.flash > 0.0 {
            let alpha = 14.0 + self.flash / 8.0;
            frame.fill_screen(
                Color::hsba(hue_offset + fc * 0.9, 0.9, 0.9, alpha / 255.0),
                Blend::Additive,
            );
            let decay = if self.trance { 1.2 } else { 3.6 };
            self.flash = ctx.decay(self.flash, decay).max(0.0);
        }

        self.rotation += self.rotation_vel * frames;
        self.rotation_vel *= ROTATION_DAMPING.powf(frames);
        ensure_finite(self.kind(), "rotation", self.rotation)?;
        let rotation = Mat2::from_angle(self.rotation);

        let bands = ctx.bands;
        let max_r = self.max_radius();

        for ring in (0..RINGS).rev() {
            let ringf = ring as f32;
            let ring_scale = map_range(ringf, (0.0, (RINGS - 1) as f32), (0.20, 1.05));
            let hue = hue_offset + fc * 0.4 + ringf * 28.0;

            let glow_boost = if beat { (12.0 + bands.bass * 40.0) * (1.0 + ringf * 0.06) } else { 0.0 };
            let glow = self.ring_outline(rotation, ring, &GLOW_PASS, glow_boost, bands);
            frame.polyline(
                glow,
                true,
                Style::Stroke {
                    color: Color::hsba(hue + 60.0, 0.9, 0.92, (32.0 + bands.bass * 90.0) / 255.0),
                    width: 10.0 * ring_scale * (0.4 + bands.bass * 0.9),
                },
                Blend::Additive,
            );

            let filament_boost = if beat { (6.0 + bands.bass * 18.0) * (1.0 + ringf * 0.04) } else { 0.0 };
            let filament = self.ring_outline(rotation, ring, &FILAMENT_PASS, filament_boost, bands);
            frame.polyline(
                filament,
                true,
                Style::Stroke {
                    color: Color::hsba(hue + 180.0, 0.92, 0.96, 220.0 / 255.0),
                    width: 1.6 + ringf * 0.12,
                },
                Blend::Normal,
            );
        }

        let skeleton_width = 1.2 + bands.bass * 1.6;
        for layer in 0..SKELETON_LAYERS {
            let layerf = layer as f32;
            let t = layerf / (SKELETON_LAYERS - 1) as f32;
            let base = map_range(t, (0.0, 1.0), (max_r * 0.08, max_r * 1.02));
            let sides = 8 + (t * 24.0) as usize;
            let pts = sides * 6;
            let boost = if beat { 4.0 + bands.bass * 16.0 } else { 0.0 };
            let outline = (0..=pts)
                .map(|i| {
                    let a = TAU * i as f32 / pts as f32;
                    let nx = a.cos() * base * NOISE_SCALE * 1.4 + layerf * 0.02;
                    let ny = a.sin() * base * NOISE_SCALE - layerf * 0.01;
                    let n = self.noise01(nx + fc * 0.0009, ny - fc * 0.0007);
                    let warp = map_range(n, (0.0, 1.0), (-18.0, 18.0)) * (0.4 + bands.treble * 1.1);
                    self.to_canvas(rotation, base + warp + boost, a)
                })
                .collect();
            let alpha = 18.0 + t * 48.0 + bands.bass * 24.0;
            frame.polyline(
                outline,
                true,
                Style::Stroke {
                    color: Color::hsba(hue_offset + fc * 0.9 + layerf * 22.0, 0.78, 0.88, alpha / 255.0),
                    width: skeleton_width,
                },
                Blend::Normal,
            );
        }

        let chord_width = 0.9 + bands.bass * 1.2;
        let chord_alpha = 36.0 + if beat { 80.0 } else { 0.0 };
        for i in 0..CHORDS {
            let a1 = self.rng.gen_range(0.0..TAU);
            let a2 = a1 + self.rng.gen_range(0.02..TAU * 0.5);
            let r1 = self.rng.gen_range(max_r * 0.15..max_r * 1.02);
            let r2 = self.rng.gen_range(max_r * 0.15..max_r * 1.02);
            frame.line(
                self.to_canvas(rotation, r1, a1),
                self.to_canvas(rotation, r2, a2),
                Color::hsba(hue_offset + fc + i as f32 * 5.0, 0.86, 0.94, chord_alpha / 255.0),
                chord_width,
            );
        }

        let fade = if self.trance { 0.7 } else { 1.8 };
        let center = self.viewport.center();
        for ripple in &mut self.ripples {
            ripple.radius += (6.0 + bands.bass * 36.0) * frames;
            ripple.life -= fade * frames;
            frame.push(
                Shape::Circle {
                    center: center + rotation * ripple.pos,
                    radius: ripple.radius,
                },
                Style::Stroke {
                    color: Color::hsba(
                        hue_offset + fc * 0.6 + ripple.radius,
                        0.92,
                        0.96,
                        ripple.life.max(0.0) / 255.0,
                    ),
                    width: 2.0 + bands.bass * 3.0,
                },
                Blend::Additive,
            );
        }
        self.ripples.retain(|r| r.life > 0.0);
        Ok(())
    }

    fn on_input(&mut self, event: &InputEvent) {
        match *event {
            InputEvent::PointerDown(pos) => {
                self.last_pointer = Some(pos);
                // Ripples live in mesh space and turn with it
                let local = Mat2::from_angle(-self.rotation) * (pos - self.viewport.center());
                self.ripples.push(Ripple {
                    pos: local,
                    radius: 8.0,
                    life: 100.0,
                });
            }
            InputEvent::PointerUp(_) => self.last_pointer = None,
            InputEvent::PointerMove { pos, pressed } => {
                if pressed {
                    if let Some(last) = self.last_pointer {
                        self.rotation_vel += (pos.x - last.x) * 0.0009;
                    }
                }
                self.last_pointer = Some(pos);
            }
            InputEvent::Key(Key::Space) => self.trance = !self.trance,
            _ => {}
        }
    }

    fn on_deactivate(&mut self) {
        self.ripples.clear();
        self.flash = 0.0;
    }

    fn entity_count(&self) -> usize {
        self.ripples.len()
    }

    fn status_line(&self) -> Option<String> {
        Some(format!(
            "trance {}, {} ripples",
            if self.trance { "on" } else { "off" },
            self.ripples.len()
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modes::test_support::*;

    fn active() -> (PolygonMesh, Harness) {
        let harness = Harness::new();
        let mut mode = PolygonMesh::new(11);
        mode.on_activate(harness.viewport);
        (mode, harness)
    }

    #[test]
    fn test_ring_and_skeleton_counts() {
        let (mut mode, harness) = active();
        let mut frame = Frame::new(800.0, 600.0);
        mode.on_frame(&harness.ctx(0.0, &[]), &mut frame).unwrap();

        let outlines = frame
            .ops
            .iter()
            .filter(|op| matches!(op.shape, Shape::Polyline { closed: true, .. }))
            .count();
        assert_eq!(outlines, RINGS * 2 + SKELETON_LAYERS);
        let chords = frame
            .ops
            .iter()
            .filter(|op| matches!(op.shape, Shape::Line { .. }))
            .count();
        assert_eq!(chords, CHORDS);
    }

    #[test]
    fn test_outermost_ring_has_most_sides() {
        let (mode, _) = active();
        let outline = mode.ring_outline(
            Mat2::IDENTITY,
            RINGS - 1,
            &FILAMENT_PASS,
            0.0,
            BandEnergy::default(),
        );
        assert_eq!(outline.len(), (6 + 2 * (RINGS - 1)) * 6 + 1);
    }

    #[test]
    fn test_drag_rotation_damps() {
        let (mut mode, harness) = active();
        mode.on_input(&InputEvent::PointerDown(Vec2::new(100.0, 100.0)));
        mode.on_input(&InputEvent::PointerMove {
            pos: Vec2::new(200.0, 100.0),
            pressed: true,
        });
        assert!((mode.rotation_vel - 0.09).abs() < 1e-6);

        let mut frame = Frame::new(800.0, 600.0);
        for i in 0..120 {
            frame.reset(None);
            mode.on_frame(&harness.ctx(i as f64 / 60.0, &[]), &mut frame).unwrap();
        }
        assert!(mode.rotation_vel.abs() < 1e-4);
        assert!(mode.rotation > 0.5);
    }

    #[test]
    fn test_trance_slows_ripple_fade() {
        let (mut mode, harness) = active();
        mode.on_input(&InputEvent::Key(Key::Space));
        mode.on_input(&InputEvent::PointerDown(Vec2::new(400.0, 300.0)));
        let mut frame = Frame::new(800.0, 600.0);
        // 100 life at 0.7/frame outlasts 100 frames
        for i in 0..100 {
            frame.reset(None);
            mode.on_frame(&harness.ctx(i as f64 / 60.0, &[]), &mut frame).unwrap();
        }
        assert_eq!(mode.entity_count(), 1);
    }

    #[test]
    fn test_beat_sets_flash() {
        let (mut mode, harness) = active();
        let mut frame = Frame::new(800.0, 600.0);
        mode.on_frame(&harness.ctx(0.0, &[scheduled_beat(0.0)]), &mut frame)
            .unwrap();
        assert!((mode.flash - (120.0 - 3.6)).abs() < 1e-4);
    }
}
