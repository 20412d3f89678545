//! Ripple field: drifting dots joined by faint lines, rings on beats and clicks.

use glam::Vec2;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use super::{map_range, FrameContext, InputEvent, ModeKind, Viewport, VisualMode};
use crate::error::ModeFault;
use crate::frame::{Clear, Color, Frame, Style};

/// Dots closer than this are connected (pixels)
const LINK_DISTANCE: f32 = 120.0;
/// Beat rings spawn inside this fraction of the canvas
const SPAWN_MARGIN: f32 = 0.12;
/// Beat rings spawned in one frame; a larger burst (after a seek) is folded
/// into the last ring
const MAX_BEAT_RINGS: usize = 3;

struct Dot {
    pos: Vec2,
    vel: Vec2,
    radius: f32,
}

struct Ring {
    pos: Vec2,
    radius: f32,
    /// 0..255
    alpha: f32,
    interactive: bool,
    /// Stroke width (pixels)
    width: f32,
}

impl Ring {
    fn new(pos: Vec2, interactive: bool, start_radius: f32) -> Self {
        Self {
            pos,
            radius: start_radius,
            alpha: 255.0,
            interactive,
            width: if interactive { 3.0 } else { 2.0 },
        }
    }

    fn update(&mut self, frames: f32) {
        let (grow, fade) = if self.interactive { (8.0, 6.0) } else { (5.0, 3.0) };
        self.radius += grow * frames;
        self.alpha -= fade * frames;
    }

    fn finished(&self, viewport: &Viewport) -> bool {
        self.alpha < 0.0 || self.radius > viewport.max_side() * 1.5
    }
}

pub struct RippleField {
    rng: StdRng,
    viewport: Viewport,
    dots: Vec<Dot>,
    rings: Vec<Ring>,
}

impl RippleField {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            viewport: Viewport::new(1.0, 1.0),
            dots: Vec::new(),
            rings: Vec::new(),
        }
    }

    fn random_dot(&mut self) -> Dot {
        Dot {
            pos: Vec2::new(
                self.rng.gen_range(0.0..=self.viewport.width),
                self.rng.gen_range(0.0..=self.viewport.height),
            ),
            vel: Vec2::new(
                self.rng.gen_range(-0.25..=0.25),
                self.rng.gen_range(-0.25..=0.25),
            ),
            radius: self.rng.gen_range(1.0..=2.2),
        }
    }

    /// Grow or shrink the dot population to `count`
    fn sync_dot_count(&mut self, count: usize) {
        self.dots.truncate(count);
        while self.dots.len() < count {
            let dot = self.random_dot();
            self.dots.push(dot);
        }
    }

    /// `weight` is the number of beats the ring stands for
    fn spawn_beat_ring(&mut self, weight: usize) {
        let lo = SPAWN_MARGIN;
        let hi = 1.0 - SPAWN_MARGIN;
        let pos = Vec2::new(
            self.rng.gen_range(lo..=hi) * self.viewport.width,
            self.rng.gen_range(lo..=hi) * self.viewport.height,
        );
        let mut ring = Ring::new(pos, false, 6.0);
        ring.width *= (weight as f32).sqrt();
        self.rings.push(ring);
    }
}

impl VisualMode for RippleField {
    fn kind(&self) -> ModeKind {
        ModeKind::RippleField
    }

    fn on_resize(&mut self, viewport: Viewport) {
        self.viewport = viewport;
        for dot in &mut self.dots {
            dot.pos = dot.pos.clamp(Vec2::ZERO, viewport.size());
        }
    }

    fn on_frame(&mut self, ctx: &FrameContext<'_>, frame: &mut Frame) -> Result<(), ModeFault> {
        let palette = ctx.palette();
        let frames = ctx.frames();
        frame.clear = Clear::Fade(palette.background.with_alpha8(30.0));

        self.sync_dot_count(ctx.params.element_count);
        let size = self.viewport.size();
        for dot in &mut self.dots {
            dot.pos += dot.vel * frames;
            if dot.pos.x < 0.0 || dot.pos.x > size.x {
                dot.vel.x = -dot.vel.x;
            }
            if dot.pos.y < 0.0 || dot.pos.y > size.y {
                dot.vel.y = -dot.vel.y;
            }
            frame.circle(dot.pos, dot.radius * 0.5, Style::Fill(palette.dot.with_alpha8(120.0)));
        }

        for (i, a) in self.dots.iter().enumerate() {
            for b in &self.dots[i + 1..] {
                let d = a.pos.distance(b.pos);
                if d < LINK_DISTANCE {
                    let alpha = map_range(d, (0.0, LINK_DISTANCE), (120.0, 10.0));
                    frame.line(a.pos, b.pos, palette.link.with_alpha8(alpha), 0.9);
                }
            }
        }

        let beats = ctx.beats.len();
        let spawned = beats.min(MAX_BEAT_RINGS);
        for i in 0..spawned {
            let weight = if i + 1 == spawned { beats - i } else { 1 };
            self.spawn_beat_ring(weight);
        }

        let viewport = self.viewport;
        self.rings.retain_mut(|ring| {
            ring.update(frames);
            !ring.finished(&viewport)
        });
        for ring in &self.rings {
            frame.circle(
                ring.pos,
                ring.radius,
                Style::Stroke {
                    color: palette.ring.with_alpha8(ring.alpha),
                    width: ring.width,
                },
            );
        }
        Ok(())
    }

    fn on_input(&mut self, event: &InputEvent) {
        match *event {
            InputEvent::PointerDown(pos) => self.rings.push(Ring::new(pos, true, 6.0)),
            InputEvent::PointerMove { pos, pressed: true } => {
                self.rings.push(Ring::new(pos, true, 4.0))
            }
            _ => {}
        }
    }

    fn on_deactivate(&mut self) {
        self.rings.clear();
        self.dots.clear();
    }

    fn entity_count(&self) -> usize {
        self.rings.len()
    }

    fn status_line(&self) -> Option<String> {
        Some(format!("{} dots, {} rings", self.dots.len(), self.rings.len()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modes::test_support::*;

    fn active() -> (RippleField, Harness) {
        let harness = Harness::new();
        let mut mode = RippleField::new(7);
        mode.on_activate(harness.viewport);
        (mode, harness)
    }

    #[test]
    fn test_one_ring_per_beat_inside_margin() {
        let (mut mode, harness) = active();
        let mut frame = Frame::new(800.0, 600.0);
        let beats = [scheduled_beat(1.0), scheduled_beat(1.0)];
        mode.on_frame(&harness.ctx(1.0, &beats), &mut frame).unwrap();

        assert_eq!(mode.rings.len(), 2);
        for ring in &mode.rings {
            assert!(ring.pos.x >= 0.12 * 800.0 && ring.pos.x <= 0.88 * 800.0);
            assert!(ring.pos.y >= 0.12 * 600.0 && ring.pos.y <= 0.88 * 600.0);
        }
    }

    #[test]
    fn test_beat_burst_is_folded() {
        let (mut mode, harness) = active();
        let mut frame = Frame::new(800.0, 600.0);
        let beats: Vec<_> = (0..40).map(|i| scheduled_beat(i as f64 * 0.5)).collect();
        mode.on_frame(&harness.ctx(20.0, &beats), &mut frame).unwrap();

        assert_eq!(mode.rings.len(), MAX_BEAT_RINGS);
        assert_eq!(mode.rings[0].width, 2.0);
        // The last ring carries the remaining 38 beats
        assert!((mode.rings[2].width - 2.0 * 38f32.sqrt()).abs() < 1e-4);
    }

    #[test]
    fn test_rings_fade_out() {
        let (mut mode, harness) = active();
        mode.on_input(&InputEvent::PointerDown(Vec2::new(10.0, 10.0)));
        let mut frame = Frame::new(800.0, 600.0);
        // Click rings fade 6/frame: gone after 43 frames
        for i in 0..43 {
            frame.reset(None);
            mode.on_frame(&harness.ctx(i as f64 / 60.0, &[]), &mut frame).unwrap();
        }
        assert_eq!(mode.entity_count(), 0);
    }

    #[test]
    fn test_dot_count_follows_params() {
        let (mut mode, mut harness) = active();
        let mut frame = Frame::new(800.0, 600.0);
        mode.on_frame(&harness.ctx(0.0, &[]), &mut frame).unwrap();
        assert_eq!(mode.dots.len(), 55);

        harness.params.element_count = 20;
        mode.on_frame(&harness.ctx(0.1, &[]), &mut frame).unwrap();
        assert_eq!(mode.dots.len(), 20);
    }

    #[test]
    fn test_drag_spawns_small_rings() {
        let (mut mode, _) = active();
        mode.on_input(&InputEvent::PointerMove {
            pos: Vec2::new(5.0, 5.0),
            pressed: true,
        });
        mode.on_input(&InputEvent::PointerMove {
            pos: Vec2::new(6.0, 5.0),
            pressed: false,
        });
        assert_eq!(mode.rings.len(), 1);
        assert_eq!(mode.rings[0].radius, 4.0);
    }
}
