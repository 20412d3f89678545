//! Spectrum bars: the player's own view. Perspective bars over the frequency
//! frame, a treble-fed particle fountain and a backdrop tinted by the
//! bass/treble balance.

use glam::Vec2;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use super::{ensure_finite, FrameContext, ModeKind, Viewport, VisualMode};
use crate::error::ModeFault;
use crate::frame::{Blend, Clear, Color, Frame, Shape, Style};
use crate::params::EffectParameters;

const BAR_COUNT: usize = 64;
/// Gap between bars (pixels)
const BAR_GAP: f32 = 2.0;
/// Bins below this fraction of the frame count as bass
const BASS_SPLIT: f32 = 0.15;
/// Bins from this fraction up count as treble
const TREBLE_SPLIT: f32 = 0.65;
/// Horizontal slices of the backdrop gradient
const GRADIENT_STEPS: usize = 12;
/// Live particles allowed per unit of element count
const SPARKS_PER_ELEMENT: usize = 10;

struct Spark {
    pos: Vec2,
    vel: Vec2,
    radius: f32,
    hue: f32,
    /// Remaining life in 60 fps frames
    life: f32,
}

/// Mean byte magnitude of the bass and treble bins
fn band_means(spectrum: &[u8]) -> (f32, f32) {
    let n = spectrum.len();
    let bass_cut = (n as f32 * BASS_SPLIT) as usize;
    let treble_start = ((n as f32 * TREBLE_SPLIT) as usize).min(n);
    let mean = |bins: &[u8]| {
        if bins.is_empty() {
            0.0
        } else {
            bins.iter().map(|&v| v as f32).sum::<f32>() / bins.len() as f32
        }
    };
    (mean(&spectrum[..bass_cut]), mean(&spectrum[treble_start..]))
}

/// How hard reverb and off-unity playback rate push the particles
pub fn intensity_factor(effects: &EffectParameters) -> f32 {
    1.0 + effects.reverb_wet * 1.2 + (effects.playback_rate - 1.0).abs() * 1.1
}

pub struct SpectrumBars {
    rng: StdRng,
    viewport: Viewport,
    sparks: Vec<Spark>,
    /// Fractional particle spawns carried between frames
    spawn_carry: f32,
    /// Beat flash on the glow, 0..1
    pulse: f32,
}

impl SpectrumBars {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            viewport: Viewport::new(1.0, 1.0),
            sparks: Vec::new(),
            spawn_carry: 0.0,
            pulse: 0.0,
        }
    }

    fn draw_backdrop(&self, bass: f32, treble: f32, frame: &mut Frame) {
        let hue = (220.0 + (treble - bass) * 0.6).clamp(0.0, 360.0);
        let lightness = (30.0 + bass / 255.0 * 25.0).min(60.0) / 100.0;
        let step = self.viewport.height / GRADIENT_STEPS as f32;
        for i in 0..GRADIENT_STEPS {
            // Opaque at the top, transparent at the bottom
            let alpha = 1.0 - (i as f32 + 0.5) / GRADIENT_STEPS as f32;
            frame.rect(
                Vec2::new(0.0, i as f32 * step),
                Vec2::new(self.viewport.width, step + 1.0),
                0.0,
                Style::Fill(Color::hsla(hue, 0.6, lightness, alpha)),
            );
        }
    }

    fn draw_glow(&self, glow: f32, color: Color, frame: &mut Frame) {
        let opacity = 0.02 + glow * 0.3;
        frame.push(
            Shape::Ellipse {
                center: Vec2::new(self.viewport.width * 0.5, self.viewport.height * 0.8),
                radii: Vec2::new(self.viewport.width * 0.6, self.viewport.height * 0.35),
                rotation: 0.0,
            },
            Style::Fill(color.with_alpha(opacity)),
            Blend::Additive,
        );
    }

    fn draw_bars(&self, spectrum: &[u8], frame: &mut Frame) {
        if spectrum.is_empty() {
            return;
        }
        let (w, h) = (self.viewport.width, self.viewport.height);
        let step = (spectrum.len() / BAR_COUNT).max(1);
        let bar_width = w / BAR_COUNT as f32 * 0.9;
        let base_y = h * 0.8;
        let left = (w - BAR_COUNT as f32 * (bar_width + BAR_GAP)) / 2.0;

        for i in 0..BAR_COUNT {
            let v = spectrum.get(i * step).copied().unwrap_or(0) as f32 / 255.0;
            let along = i as f32 / BAR_COUNT as f32;
            // Higher bars stand taller and wider at the top
            let height = v * h * 0.6 * (0.6 + along);
            if height <= 0.0 {
                continue;
            }
            let hue = 200.0 + along * 160.0 + v * 60.0;
            let top_width = bar_width * (0.7 + along * 0.6);
            let x = left + i as f32 * (bar_width + BAR_GAP);
            let inset = (bar_width - top_width) / 2.0;
            frame.polyline(
                vec![
                    Vec2::new(x, base_y),
                    Vec2::new(x + bar_width, base_y),
                    Vec2::new(x + inset + top_width, base_y - height),
                    Vec2::new(x + inset, base_y - height),
                ],
                true,
                Style::Fill(Color::hsla(hue, 0.8, 0.55, 1.0)),
                Blend::Normal,
            );
        }
    }

    fn spawn_spark(&mut self) {
        let pos = Vec2::new(
            self.rng.gen_range(0.0..=self.viewport.width),
            self.viewport.height - self.rng.gen_range(0.0..30.0),
        );
        let vel = Vec2::new(
            (self.rng.gen::<f32>() - 0.5) * 2.4,
            -2.0 - self.rng.gen::<f32>() * 3.0,
        );
        self.sparks.push(Spark {
            pos,
            vel,
            radius: 2.0 + self.rng.gen::<f32>() * 6.0,
            hue: self.rng.gen_range(0.0..360.0),
            life: 40.0 + self.rng.gen::<f32>() * 40.0,
        });
    }

    fn update_sparks(&mut self, ctx: &FrameContext<'_>, treble: f32, intensity: f32) {
        let frames = ctx.frames();
        let per_frame = (1.0 + (treble / 30.0).min(6.0) * intensity).floor();
        self.spawn_carry += per_frame * frames;
        let cap = ctx.params.element_count * SPARKS_PER_ELEMENT;
        while self.spawn_carry >= 1.0 {
            self.spawn_carry -= 1.0;
            if self.sparks.len() < cap {
                self.spawn_spark();
            }
        }

        let floor = self.viewport.height + 50.0;
        self.sparks.retain_mut(|s| {
            s.pos += s.vel * frames;
            s.vel.y += 0.08 * frames;
            s.life -= frames;
            s.life > 0.0 && s.pos.y <= floor
        });
    }
}

impl VisualMode for SpectrumBars {
    fn kind(&self) -> ModeKind {
        ModeKind::SpectrumBars
    }

    fn on_resize(&mut self, viewport: Viewport) {
        self.viewport = viewport;
    }

    fn on_frame(&mut self, ctx: &FrameContext<'_>, frame: &mut Frame) -> Result<(), ModeFault> {
        let palette = ctx.palette();
        frame.clear = Clear::Full(palette.background.with_alpha(1.0));

        let (bass, treble) = band_means(ctx.spectrum);
        let intensity = intensity_factor(&ctx.effects);
        ensure_finite(self.kind(), "intensity", intensity)?;

        if ctx.beat() {
            self.pulse = 1.0;
        }
        let glow = (bass / 120.0).min(1.0) * (1.0 + (ctx.effects.playback_rate - 1.0).abs() * 0.8);
        let glow = (glow + self.pulse * 0.5).min(1.5);
        self.pulse = ctx.decay(self.pulse, 0.05).max(0.0);

        self.draw_backdrop(bass, treble, frame);
        self.draw_glow(glow, palette.ring, frame);
        self.draw_bars(ctx.spectrum, frame);

        self.update_sparks(ctx, treble, intensity);
        for s in &self.sparks {
            let alpha = (s.life / 60.0).clamp(0.0, 1.0);
            frame.circle(s.pos, s.radius, Style::Fill(Color::hsla(s.hue, 0.8, 0.6, alpha)));
        }
        Ok(())
    }

    fn on_deactivate(&mut self) {
        self.sparks.clear();
        self.spawn_carry = 0.0;
        self.pulse = 0.0;
    }

    fn entity_count(&self) -> usize {
        self.sparks.len()
    }

    fn status_line(&self) -> Option<String> {
        Some(format!("{} particles", self.sparks.len()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::DrawOp;
    use crate::modes::test_support::*;
    use approx::assert_relative_eq;

    fn active() -> (SpectrumBars, Harness) {
        let harness = Harness::new();
        let mut mode = SpectrumBars::new(3);
        mode.on_activate(harness.viewport);
        (mode, harness)
    }

    fn filled_quads(ops: &[DrawOp]) -> usize {
        ops.iter()
            .filter(|op| matches!(&op.shape, Shape::Polyline { points, closed: true } if points.len() == 4))
            .count()
    }

    #[test]
    fn test_band_means_split_the_frame() {
        let mut spectrum = vec![0u8; 100];
        spectrum[..15].fill(200);
        spectrum[65..].fill(50);
        assert_eq!(band_means(&spectrum), (200.0, 50.0));
        assert_eq!(band_means(&[]), (0.0, 0.0));
    }

    #[test]
    fn test_intensity_follows_reverb_and_rate() {
        let dry = EffectParameters {
            reverb_wet: 0.0,
            playback_rate: 1.0,
            ..Default::default()
        };
        assert_relative_eq!(intensity_factor(&dry), 1.0);

        let washed = EffectParameters {
            reverb_wet: 0.5,
            playback_rate: 1.5,
            ..Default::default()
        };
        assert_relative_eq!(intensity_factor(&washed), 2.15, epsilon = 1e-5);
    }

    #[test]
    fn test_one_bar_per_slot_and_silence_draws_none() {
        let (mut mode, mut harness) = active();
        let mut frame = Frame::new(800.0, 600.0);
        mode.on_frame(&harness.ctx(0.0, &[]), &mut frame).unwrap();
        assert_eq!(filled_quads(&frame.ops), BAR_COUNT);

        harness.spectrum.fill(0);
        frame.reset(None);
        mode.on_frame(&harness.ctx(0.1, &[]), &mut frame).unwrap();
        assert_eq!(filled_quads(&frame.ops), 0);
    }

    #[test]
    fn test_treble_feeds_the_fountain() {
        let (mut quiet, mut harness) = active();
        harness.spectrum.fill(0);
        let mut frame = Frame::new(800.0, 600.0);
        for i in 0..10 {
            frame.reset(None);
            quiet.on_frame(&harness.ctx(i as f64 / 60.0, &[]), &mut frame).unwrap();
        }
        // One spark per frame without treble
        assert_eq!(quiet.entity_count(), 10);

        let (mut loud, mut harness) = active();
        harness.spectrum.fill(255);
        for i in 0..10 {
            frame.reset(None);
            loud.on_frame(&harness.ctx(i as f64 / 60.0, &[]), &mut frame).unwrap();
        }
        assert!(loud.entity_count() > 50);
    }

    #[test]
    fn test_sparks_fall_and_expire() {
        let (mut mode, mut harness) = active();
        harness.spectrum.fill(0);
        let mut frame = Frame::new(800.0, 600.0);
        mode.on_frame(&harness.ctx(0.0, &[]), &mut frame).unwrap();
        let first_vy = mode.sparks[0].vel.y;
        mode.on_frame(&harness.ctx(1.0 / 60.0, &[]), &mut frame).unwrap();
        assert_relative_eq!(mode.sparks[0].vel.y, first_vy + 0.08, epsilon = 1e-4);

        mode.on_deactivate();
        assert_eq!(mode.entity_count(), 0);
    }

    #[test]
    fn test_particle_count_is_capped_by_elements() {
        let (mut mode, mut harness) = active();
        harness.spectrum.fill(255);
        harness.params.element_count = 20;
        let mut frame = Frame::new(800.0, 600.0);
        for i in 0..60 {
            frame.reset(None);
            mode.on_frame(&harness.ctx(i as f64 / 60.0, &[]), &mut frame).unwrap();
        }
        assert!(mode.entity_count() <= 20 * SPARKS_PER_ELEMENT);
    }
}
