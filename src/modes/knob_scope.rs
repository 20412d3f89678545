//! Knob panel scope: layered sine waves above an effects pedal with rotary knobs.

use glam::Vec2;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::f32::consts::PI;

use super::{FrameContext, InputEvent, Key, ModeEvent, ModeKind, Viewport, VisualMode};
use crate::error::ModeFault;
use crate::frame::{Blend, Clear, Color, Frame, Shape, Style};

const KNOB_RADIUS: f32 = 30.0;
const KNOB_MIN: f32 = -5.0 * PI / 6.0;
const KNOB_MAX: f32 = 5.0 * PI / 6.0;
/// Knob rotation per pixel of vertical drag
const KNOB_DRAG: f32 = 0.01;
const PEDAL_SIZE: Vec2 = Vec2::new(280.0, 360.0);
const FOOTSWITCH_RADIUS: f32 = 30.0;
/// Horizontal step between wave vertices (pixels)
const WAVE_STEP: f32 = 6.0;

/// What a knob controls
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KnobRole {
    /// Track position
    Position,
    /// Wave amplitude (0 … 2)
    Level,
    /// Wave shape factor (0.5 … 2.0)
    Tone,
    /// Wave count (1 … 6)
    Mode,
}

struct Knob {
    role: KnobRole,
    pos: Vec2,
    angle: f32,
    dragging: bool,
}

impl Knob {
    fn new(role: KnobRole) -> Self {
        Self {
            role,
            pos: Vec2::ZERO,
            angle: -PI / 2.0,
            dragging: false,
        }
    }

    /// Knob position mapped linearly onto 0..1
    fn normalized(&self) -> f32 {
        (self.angle - KNOB_MIN) / (KNOB_MAX - KNOB_MIN)
    }

    fn hit(&self, p: Vec2) -> bool {
        p.distance(self.pos) < KNOB_RADIUS + 6.0
    }
}

pub struct KnobPanelScope {
    rng: StdRng,
    viewport: Viewport,
    knobs: [Knob; 4],
    bypass: bool,
    wave_count: usize,
    shape: f32,
    level: f32,
    hue_shift: f32,
    glow: f32,
    frame_count: f32,
    last_pointer: Option<Vec2>,
    events: Vec<ModeEvent>,
}

impl KnobPanelScope {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            viewport: Viewport::new(1.0, 1.0),
            knobs: [
                Knob::new(KnobRole::Position),
                Knob::new(KnobRole::Level),
                Knob::new(KnobRole::Tone),
                Knob::new(KnobRole::Mode),
            ],
            bypass: false,
            wave_count: 3,
            shape: 1.0,
            level: 1.0,
            hue_shift: 0.0,
            glow: 0.0,
            frame_count: 0.0,
            last_pointer: None,
            events: Vec::new(),
        }
    }

    pub fn is_bypassed(&self) -> bool {
        self.bypass
    }

    pub fn wave_count(&self) -> usize {
        self.wave_count
    }

    fn pedal_origin(&self) -> Vec2 {
        Vec2::new(
            self.viewport.width * 0.5 - PEDAL_SIZE.x * 0.5,
            self.viewport.height * 0.5,
        )
    }

    fn footswitch(&self) -> Vec2 {
        let origin = self.pedal_origin();
        Vec2::new(origin.x + PEDAL_SIZE.x * 0.5, origin.y + PEDAL_SIZE.y - 46.0)
    }

    fn layout(&mut self) {
        let cx = self.viewport.width * 0.5;
        let py = self.viewport.height * 0.6;
        let slots = [
            Vec2::new(cx - 80.0, py - 40.0),
            Vec2::new(cx + 80.0, py - 40.0),
            Vec2::new(cx - 80.0, py + 70.0),
            Vec2::new(cx + 80.0, py + 70.0),
        ];
        for (knob, pos) in self.knobs.iter_mut().zip(slots) {
            knob.pos = pos;
        }
    }

    fn apply_knob(&mut self, index: usize) {
        let Some(knob) = self.knobs.get(index) else {
            return;
        };
        let n = knob.normalized();
        match knob.role {
            KnobRole::Position => self.events.push(ModeEvent::SeekFraction(n)),
            KnobRole::Level => self.level = n * 2.0,
            KnobRole::Tone => self.shape = 0.5 + 1.5 * n,
            KnobRole::Mode => self.wave_count = (1.0 + n * 5.0) as usize,
        }
    }

    fn toggle_bypass(&mut self) {
        self.bypass = !self.bypass;
        if self.bypass {
            self.level = 1.0;
            for knob in &mut self.knobs {
                knob.dragging = false;
            }
        }
    }

    fn draw_waves(&mut self, beat: bool, hue_offset: f32, frame: &mut Frame) {
        let origin = Vec2::new(self.viewport.width * 0.1, self.viewport.height * 0.18);
        let w = self.viewport.width * 0.8;
        let h = self.viewport.height * 0.18;
        let steps = (w / WAVE_STEP) as usize;

        for i in 0..self.wave_count {
            let fi = i as f32;
            let swing = h * 0.4 * self.level * (self.frame_count * 0.01 + fi).sin();
            let mut points = Vec::with_capacity(steps + 1);
            for step in 0..=steps {
                let x = step as f32 * WAVE_STEP;
                let t = x / w * PI * 4.0;
                let mut y = h * 0.5 + (t * self.shape + fi).sin() * swing;
                if beat {
                    y += self.rng.gen_range(-4.0..=4.0);
                }
                points.push(origin + Vec2::new(x, y));
            }
            frame.polyline(
                points,
                false,
                Style::Stroke {
                    color: Color::hsba(hue_offset + self.hue_shift + fi * 60.0, 0.8, 1.0, 220.0 / 255.0),
                    width: if beat { 4.0 } else { 2.0 },
                },
                Blend::Normal,
            );
        }
    }

    fn draw_pedal(&self, frame: &mut Frame) {
        let origin = self.pedal_origin();
        let cyan = Color::rgb8(0, 255, 255);

        frame.rect(
            origin + Vec2::new(12.0, 18.0),
            PEDAL_SIZE,
            22.0,
            Style::Fill(Color::rgba8(0, 0, 0, 150)),
        );
        frame.rect(origin, PEDAL_SIZE, 22.0, Style::Fill(Color::rgb8(20, 20, 25)));
        frame.rect(
            origin + Vec2::new(0.0, PEDAL_SIZE.y * 0.5),
            Vec2::new(PEDAL_SIZE.x, PEDAL_SIZE.y * 0.5),
            22.0,
            Style::Fill(Color::rgb8(40, 40, 45)),
        );
        if self.glow > 0.0 {
            frame.push(
                Shape::Ellipse {
                    center: origin + PEDAL_SIZE * 0.5,
                    radii: Vec2::new(PEDAL_SIZE.x * 0.8 + self.glow, PEDAL_SIZE.y * 0.6 + self.glow)
                        * 0.5,
                    rotation: 0.0,
                },
                Style::Fill(Color::rgba8(0, 255, 255, 80)),
                Blend::Additive,
            );
        }
        frame.rect(
            origin + Vec2::new(10.0, 8.0),
            Vec2::new(PEDAL_SIZE.x - 20.0, 12.0),
            6.0,
            Style::Fill(Color::rgba8(255, 255, 255, 40)),
        );
        frame.rect(origin, PEDAL_SIZE, 22.0, Style::Stroke { color: cyan, width: 3.0 });

        let switch = self.footswitch();
        frame.circle(switch, 27.0, Style::Fill(Color::rgb8(60, 60, 60)));
        frame.circle(
            switch,
            27.0,
            Style::Stroke {
                color: Color::rgb8(180, 180, 180),
                width: 2.0,
            },
        );
        let led = if self.bypass { Color::rgb8(0, 255, 120) } else { cyan };
        frame.circle(switch - Vec2::new(0.0, 32.0), 7.0, Style::Fill(led));
    }

    fn draw_knob(knob: &Knob, frame: &mut Frame) {
        let r = KNOB_RADIUS;
        frame.circle(
            knob.pos + Vec2::new(4.0, 6.0),
            r * 1.05,
            Style::Fill(Color::rgba8(0, 0, 0, 120)),
        );
        // Light rim fading to a darker centre
        for (i, shade) in [250u8, 225, 200, 180].into_iter().enumerate() {
            frame.circle(knob.pos, r * (1.0 - i as f32 * 0.2), Style::Fill(Color::rgb8(shade, shade, shade)));
        }
        frame.circle(
            knob.pos - Vec2::splat(r / 3.0),
            4.0,
            Style::Fill(Color::rgba8(255, 255, 255, 200)),
        );
        frame.line(
            knob.pos,
            knob.pos + Vec2::from_angle(knob.angle) * r * 0.7,
            Color::rgb8(50, 200, 255),
            3.0,
        );
    }
}

impl VisualMode for KnobPanelScope {
    fn kind(&self) -> ModeKind {
        ModeKind::KnobScope
    }

    fn on_resize(&mut self, viewport: Viewport) {
        self.viewport = viewport;
        self.layout();
    }

    fn on_frame(&mut self, ctx: &FrameContext<'_>, frame: &mut Frame) -> Result<(), ModeFault> {
        let frames = ctx.frames();
        self.frame_count += frames;
        frame.clear = Clear::Full(Color::rgb8(15, 15, 15));

        self.hue_shift = (self.hue_shift + 0.5 * frames) % 360.0;
        let beat = ctx.beat();
        if beat {
            self.glow = 20.0;
        }
        self.glow = ctx.decay(self.glow, 1.0).max(0.0);

        self.draw_waves(beat, ctx.palette().hue_offset, frame);
        self.draw_pedal(frame);
        for knob in &self.knobs {
            Self::draw_knob(knob, frame);
        }
        Ok(())
    }

    fn on_input(&mut self, event: &InputEvent) {
        match *event {
            InputEvent::PointerDown(pos) => {
                self.last_pointer = Some(pos);
                let mut used = false;
                for knob in &mut self.knobs {
                    if knob.hit(pos) {
                        knob.dragging = true;
                        used = true;
                    }
                }
                if !used && pos.distance(self.footswitch()) < FOOTSWITCH_RADIUS {
                    self.toggle_bypass();
                }
            }
            InputEvent::PointerUp(_) => {
                self.last_pointer = None;
                for knob in &mut self.knobs {
                    knob.dragging = false;
                }
            }
            InputEvent::PointerMove { pos, pressed } => {
                let dy = self.last_pointer.map_or(0.0, |last| last.y - pos.y);
                self.last_pointer = Some(pos);
                if !pressed || self.bypass || dy == 0.0 {
                    return;
                }
                for index in 0..self.knobs.len() {
                    let knob = &mut self.knobs[index];
                    if knob.dragging {
                        knob.angle = (knob.angle + dy * KNOB_DRAG).clamp(KNOB_MIN, KNOB_MAX);
                        self.apply_knob(index);
                    }
                }
            }
            InputEvent::Key(Key::Space) => self.toggle_bypass(),
            InputEvent::Key(Key::Digit(d @ 1..=4)) => self.apply_knob(d as usize - 1),
            _ => {}
        }
    }

    fn on_deactivate(&mut self) {
        self.events.clear();
    }

    fn entity_count(&self) -> usize {
        0
    }

    fn status_line(&self) -> Option<String> {
        Some(format!(
            "{} waves, shape {:.2}, level {:.2}{}",
            self.wave_count,
            self.shape,
            self.level,
            if self.bypass { ", bypass" } else { "" }
        ))
    }

    fn drain_events(&mut self) -> Vec<ModeEvent> {
        std::mem::take(&mut self.events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modes::test_support::*;

    fn active() -> KnobPanelScope {
        let mut mode = KnobPanelScope::new(1);
        mode.on_activate(Viewport::new(800.0, 720.0));
        mode
    }

    fn drag(mode: &mut KnobPanelScope, knob: usize, dy: f32) {
        let start = mode.knobs[knob].pos;
        mode.on_input(&InputEvent::PointerDown(start));
        mode.on_input(&InputEvent::PointerMove {
            pos: start - Vec2::new(0.0, dy),
            pressed: true,
        });
        mode.on_input(&InputEvent::PointerUp(start));
    }

    #[test]
    fn test_knob_range_and_mapping() {
        let mut mode = active();
        // Far past the top of the range
        drag(&mut mode, 2, 1000.0);
        assert_eq!(mode.knobs[2].angle, KNOB_MAX);
        assert!((mode.shape - 2.0).abs() < 1e-5);

        drag(&mut mode, 3, -1000.0);
        assert_eq!(mode.wave_count(), 1);
        drag(&mut mode, 3, 1000.0);
        assert_eq!(mode.wave_count(), 6);
    }

    #[test]
    fn test_position_knob_requests_seek() {
        let mut mode = active();
        drag(&mut mode, 0, 50.0);
        let events = mode.drain_events();
        let Some(ModeEvent::SeekFraction(n)) = events.last().copied() else {
            panic!("no seek request: {:?}", events);
        };
        assert!(n > 0.2 && n < 0.4);
        assert!(mode.drain_events().is_empty());
    }

    #[test]
    fn test_bypass_freezes_knobs() {
        let mut mode = active();
        mode.on_input(&InputEvent::Key(Key::Space));
        assert!(mode.is_bypassed());
        let before = mode.knobs[1].angle;
        drag(&mut mode, 1, 80.0);
        assert_eq!(mode.knobs[1].angle, before);

        // Footswitch click releases it
        let switch = mode.footswitch();
        mode.on_input(&InputEvent::PointerDown(switch));
        assert!(!mode.is_bypassed());
    }

    #[test]
    fn test_digit_reapplies_knob() {
        let mut mode = active();
        mode.knobs[3].angle = 0.0;
        mode.on_input(&InputEvent::Key(Key::Digit(4)));
        assert_eq!(mode.wave_count(), 3);
        mode.on_input(&InputEvent::Key(Key::Digit(1)));
        assert_eq!(mode.drain_events().len(), 1);
    }

    #[test]
    fn test_beat_widens_strokes_and_pulses_glow() {
        let mut mode = active();
        let harness = Harness::new();
        let mut frame = Frame::new(800.0, 720.0);
        let beats = [scheduled_beat(0.5)];
        mode.on_frame(&harness.ctx(0.5, &beats), &mut frame).unwrap();
        assert_eq!(mode.glow, 19.0);
        let widths: Vec<f32> = frame
            .ops
            .iter()
            .filter_map(|op| match (&op.shape, op.style) {
                (Shape::Polyline { .. }, Style::Stroke { width, .. }) => Some(width),
                _ => None,
            })
            .collect();
        assert_eq!(widths, vec![4.0; 3]);
    }
}
