//! Circular waveform: neon ribbons breathing and rotating around the centre.

use glam::{Mat2, Vec2};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::f32::consts::TAU;

use super::{ensure_finite, map_range, FrameContext, InputEvent, Key, ModeKind, Viewport, VisualMode};
use crate::error::ModeFault;
use crate::frame::{Blend, Clear, Color, Frame, Shape, Style};

const RIBBONS: usize = 4;
const RIBBON_POINTS: usize = 320;

struct Shockwave {
    radius: f32,
    /// 1 at spawn, removed at 0
    life: f32,
    thickness: f32,
}

pub struct CircularWaveform {
    rng: StdRng,
    viewport: Viewport,
    shockwaves: Vec<Shockwave>,
    angle: f32,
    frame_count: f32,
    /// Full-canvas bloom, 0..255
    flash: f32,
    aura: f32,
    trance: bool,
    pressed: bool,
    last_pointer: Option<Vec2>,
}

impl CircularWaveform {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            viewport: Viewport::new(1.0, 1.0),
            shockwaves: Vec::new(),
            angle: 0.0,
            frame_count: 0.0,
            flash: 0.0,
            aura: 0.0,
            trance: false,
            pressed: false,
            last_pointer: None,
        }
    }

    pub fn is_trance(&self) -> bool {
        self.trance
    }

    fn trail_alpha(&self) -> f32 {
        if self.trance {
            12.0
        } else {
            24.0
        }
    }

    fn spawn_shockwave(&mut self, base_radius: f32) {
        self.shockwaves.push(Shockwave {
            radius: base_radius * 1.1,
            life: 1.0,
            thickness: 8.0,
        });
    }
}

impl VisualMode for CircularWaveform {
    fn kind(&self) -> ModeKind {
        ModeKind::CircularWaveform
    }

    fn on_resize(&mut self, viewport: Viewport) {
        self.viewport = viewport;
    }

    fn on_frame(&mut self, ctx: &FrameContext<'_>, frame: &mut Frame) -> Result<(), ModeFault> {
        let frames = ctx.frames();
        self.frame_count += frames;
        let fc = self.frame_count;
        let hue_base = ctx.palette().hue_offset;
        frame.clear = Clear::Fade(Color::hsba(5.0, 0.1, 0.15, self.trail_alpha() / 255.0));

        let bands = ctx.bands;
        if ctx.beat() {
            self.aura = self.aura.max(60.0);
            self.flash = 120.0;
        }

        let breath = map_range((fc * 0.015).sin(), (-1.0, 1.0), (0.96, 1.06));
        let trance_scale = if self.trance { 1.06 } else { 1.0 };
        let base_radius =
            self.viewport.min_side() * 0.22 * (1.0 + bands.bass * 0.9) * breath * trance_scale;
        ensure_finite(self.kind(), "base radius", base_radius)?;

        let spin = if self.pressed { 0.02 } else { 0.0 };
        self.angle += (0.002 + spin + bands.treble * 0.005) * frames;
        let rotation = Mat2::from_angle(self.angle);
        let center = self.viewport.center();

        if self.aura > 0.0 {
            for g in 0..5 {
                let diameter = base_radius * (2.0 + g as f32 * 0.08) + self.aura * 0.5;
                frame.push(
                    Shape::Circle {
                        center,
                        radius: diameter * 0.5,
                    },
                    Style::Stroke {
                        color: Color::hsba(hue_base + fc * 0.6 + g as f32 * 50.0, 0.9, 1.0, 60.0 / 255.0),
                        width: (5 - g) as f32,
                    },
                    Blend::Additive,
                );
            }
            self.aura = ctx.decay(self.aura, 1.5).max(0.0);
        }

        // Slow wobble squashes everything below into an ellipse
        let tilt = map_range(
            (fc * 0.004 + (fc * 0.001).sin()).cos(),
            (-1.0, 1.0),
            (0.88, 1.0),
        );

        if ctx.beat() {
            self.spawn_shockwave(base_radius * 0.98);
            if self.rng.gen::<f32>() < 0.55 {
                self.spawn_shockwave(base_radius * 0.6);
            }
        }

        for (i, wave) in self.shockwaves.iter_mut().enumerate() {
            wave.life -= 0.005 * frames;
            wave.radius += (4.0 + 8.0 * (0.5 + bands.bass)) * frames;
            let alpha = (160.0 * wave.life).clamp(0.0, 160.0);
            frame.push(
                Shape::Ellipse {
                    center,
                    radii: Vec2::new(wave.radius, wave.radius * 0.8 * tilt),
                    rotation: self.angle,
                },
                Style::Stroke {
                    color: Color::hsba(hue_base + fc * 0.6 + i as f32 * 40.0, 0.9, 0.8, alpha / 255.0),
                    width: wave.thickness * (1.0 + (1.0 - wave.life) * 1.5),
                },
                Blend::Additive,
            );
        }
        self.shockwaves.retain(|w| w.life > 0.0);

        let spectrum = ctx.spectrum;
        for r in 0..RIBBONS {
            let rf = r as f32;
            let mut points = Vec::with_capacity(RIBBON_POINTS + 1);
            for i in 0..=RIBBON_POINTS {
                let a = TAU * i as f32 / RIBBON_POINTS as f32;
                let amp = if spectrum.is_empty() {
                    0.0
                } else {
                    let idx = i * (spectrum.len() - 1) / RIBBON_POINTS;
                    spectrum[idx] as f32 / 255.0
                };
                let slow = (a * 2.0 + fc * 0.01 + rf).sin() * (20.0 + bands.bass * 40.0);
                let mid = (a * 6.0 + fc * 0.02 + rf * 0.5).sin() * (10.0 + bands.mid * 30.0);
                let fast = (a * 14.0 + fc * 0.05 + rf).sin() * (4.0 + bands.treble * 18.0);
                let radius = base_radius * (1.0 + rf * 0.08) + slow + mid + fast + amp * 90.0;
                let local = Vec2::new(radius * a.cos(), radius * a.sin() * tilt);
                points.push(center + rotation * local);
            }
            frame.polyline(
                points,
                true,
                Style::Stroke {
                    color: Color::hsba(hue_base + fc * 0.6 + rf * 90.0, 0.9, 1.0, 180.0 / 255.0),
                    width: 2.2 + if ctx.beat() { 0.8 } else { 0.0 },
                },
                Blend::Normal,
            );
        }

        if self.flash > 3.0 {
            let hue = hue_base + fc * 1.5 + self.rng.gen_range(0.0..30.0);
            frame.fill_screen(Color::hsba(hue, 0.9, 0.7, self.flash / 255.0), Blend::Additive);
            self.flash = ctx.decay(self.flash, 3.5).max(0.0);
        }
        Ok(())
    }

    fn on_input(&mut self, event: &InputEvent) {
        match *event {
            InputEvent::PointerDown(pos) => {
                self.pressed = true;
                self.last_pointer = Some(pos);
            }
            InputEvent::PointerUp(_) => {
                self.pressed = false;
                self.last_pointer = None;
            }
            InputEvent::PointerMove { pos, pressed } => {
                if pressed {
                    if let Some(last) = self.last_pointer {
                        self.angle += (pos.x - last.x) * 0.008;
                    }
                }
                self.last_pointer = Some(pos);
            }
            InputEvent::DoubleClick(_) => self.aura = self.aura.max(120.0),
            InputEvent::Key(Key::Space) => self.trance = !self.trance,
            _ => {}
        }
    }

    fn on_deactivate(&mut self) {
        self.shockwaves.clear();
        self.flash = 0.0;
        self.aura = 0.0;
    }

    fn entity_count(&self) -> usize {
        self.shockwaves.len()
    }

    fn status_line(&self) -> Option<String> {
        Some(format!(
            "trance {}, {} shockwaves",
            if self.trance { "on" } else { "off" },
            self.shockwaves.len()
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modes::test_support::*;

    fn active() -> (CircularWaveform, Harness) {
        let harness = Harness::new();
        let mut mode = CircularWaveform::new(3);
        mode.on_activate(harness.viewport);
        (mode, harness)
    }

    #[test]
    fn test_beat_spawns_shockwave_and_flash() {
        let (mut mode, harness) = active();
        let mut frame = Frame::new(800.0, 600.0);
        let beats = [scheduled_beat(1.0)];
        mode.on_frame(&harness.ctx(1.0, &beats), &mut frame).unwrap();

        assert!(matches!(mode.entity_count(), 1 | 2));
        assert_eq!(mode.flash, 120.0 - 3.5);
        let flashes = frame
            .ops
            .iter()
            .filter(|op| op.blend == Blend::Additive && matches!(op.shape, Shape::Rect { .. }))
            .count();
        assert_eq!(flashes, 1);
    }

    #[test]
    fn test_four_closed_ribbons() {
        let (mut mode, harness) = active();
        let mut frame = Frame::new(800.0, 600.0);
        mode.on_frame(&harness.ctx(0.0, &[]), &mut frame).unwrap();
        let ribbons: Vec<_> = frame
            .ops
            .iter()
            .filter_map(|op| match &op.shape {
                Shape::Polyline { points, closed } => Some((points.len(), *closed)),
                _ => None,
            })
            .collect();
        assert_eq!(ribbons, vec![(RIBBON_POINTS + 1, true); RIBBONS]);
    }

    #[test]
    fn test_flash_decays_away() {
        let (mut mode, harness) = active();
        let mut frame = Frame::new(800.0, 600.0);
        let beats = [scheduled_beat(0.0)];
        mode.on_frame(&harness.ctx(0.0, &beats), &mut frame).unwrap();
        for i in 1..40 {
            frame.reset(None);
            mode.on_frame(&harness.ctx(i as f64 / 60.0, &[]), &mut frame).unwrap();
        }
        assert!(mode.flash <= 3.0);
    }

    #[test]
    fn test_space_toggles_trance() {
        let (mut mode, _) = active();
        assert_eq!(mode.trail_alpha(), 24.0);
        mode.on_input(&InputEvent::Key(Key::Space));
        assert!(mode.is_trance());
        assert_eq!(mode.trail_alpha(), 12.0);
    }

    #[test]
    fn test_drag_spins() {
        let (mut mode, _) = active();
        mode.on_input(&InputEvent::PointerDown(Vec2::new(100.0, 100.0)));
        mode.on_input(&InputEvent::PointerMove {
            pos: Vec2::new(150.0, 100.0),
            pressed: true,
        });
        assert!((mode.angle - 0.4).abs() < 1e-6);
    }
}
