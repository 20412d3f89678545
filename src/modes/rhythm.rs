//! Rhythm game: gems fly down three lanes and land on the beats; slice them with the blade.

use glam::{Mat2, Vec2};
use log::info;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use super::{map_range, FrameContext, InputEvent, Key, ModeEvent, ModeKind, Viewport, VisualMode};
use crate::beat::BeatSource;
use crate::error::ModeFault;
use crate::frame::{Blend, Clear, Color, Frame, Shape, Style};

const LANES: i32 = 3;
/// Seconds a gem is in flight before its beat
const LEAD_TIME: f64 = 2.0;
/// Gems are spawned this much early so a frame boundary never delays them
const SPAWN_SLACK: f64 = 0.05;
/// Depth at spawn; reaches 0 exactly on the beat
const MAX_DEPTH: f32 = 1200.0;
/// Gems can only be hit closer than this
const HIT_DEPTH: f32 = 220.0;
/// An unhit gem counts as missed this long after its beat
const MISS_WINDOW: f64 = 0.15;
/// Blade speed (px/frame) that counts as a slash
const SLASH_SPEED: f32 = 6.0;
const BLADE_SMOOTHING: f32 = 0.65;
const FOCAL: f32 = 800.0;

/// Lifecycle of one game session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GamePhase {
    /// Waiting for click or Enter
    Ready,
    Playing,
    /// Final counts were reported
    Finished,
}

struct Gem {
    beat_time: f64,
    lane: i32,
    depth: f32,
    size: f32,
    hue: f32,
}

struct Particle {
    pos: Vec2,
    vel: Vec2,
    life: f32,
    hue: f32,
}

struct Projection {
    pos: Vec2,
    scale: f32,
}

#[derive(Default)]
struct Blade {
    pos: Vec2,
    vel: Vec2,
    target: Option<Vec2>,
    pressed: bool,
}

impl Blade {
    fn update(&mut self, frames: f32) {
        let Some(target) = self.target else {
            self.vel = Vec2::ZERO;
            return;
        };
        self.vel = target - self.pos;
        self.pos += self.vel * (1.0 - BLADE_SMOOTHING.powf(frames));
    }

    fn speed(&self) -> f32 {
        self.vel.length()
    }
}

pub struct RhythmGame {
    rng: StdRng,
    viewport: Viewport,
    phase: GamePhase,
    gems: Vec<Gem>,
    particles: Vec<Particle>,
    blade: Blade,
    /// Next schedule entry to spawn
    next_beat: usize,
    last_time: f64,
    hits: u32,
    misses: u32,
    pulse: f32,
    frame_count: f32,
    trance: bool,
    events: Vec<ModeEvent>,
}

impl RhythmGame {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            viewport: Viewport::new(1.0, 1.0),
            phase: GamePhase::Ready,
            gems: Vec::new(),
            particles: Vec::new(),
            blade: Blade::default(),
            next_beat: 0,
            last_time: 0.0,
            hits: 0,
            misses: 0,
            pulse: 0.0,
            frame_count: 0.0,
            trance: false,
            events: Vec::new(),
        }
    }

    pub fn phase(&self) -> GamePhase {
        self.phase
    }

    /// (hits, misses)
    pub fn score(&self) -> (u32, u32) {
        (self.hits, self.misses)
    }

    fn start(&mut self) {
        if self.phase == GamePhase::Finished {
            self.hits = 0;
            self.misses = 0;
            self.gems.clear();
        }
        self.phase = GamePhase::Playing;
        self.events.push(ModeEvent::RequestPlay);
        info!("Rhythm game started");
    }

    fn finish(&mut self) {
        if self.phase != GamePhase::Playing {
            return;
        }
        self.phase = GamePhase::Finished;
        self.gems.clear();
        self.events.push(ModeEvent::SessionEnded {
            hits: self.hits,
            misses: self.misses,
        });
        info!("Rhythm game over: {} hits, {} misses", self.hits, self.misses);
    }

    fn spawn_gem(&mut self, beat_time: f64) {
        let lane = self.rng.gen_range(0..LANES) - LANES / 2;
        let size = 36.0 + self.rng.gen_range(0.0..18.0);
        let hue = 120.0 + lane as f32 * 60.0 + self.rng.gen_range(0.0..60.0);
        self.gems.push(Gem {
            beat_time,
            lane,
            depth: MAX_DEPTH,
            size,
            hue,
        });
    }

    fn spawn_due(&mut self, ctx: &FrameContext<'_>) {
        let now = ctx.time;
        if ctx.schedule.is_empty() {
            // Detected beats land one lead time later
            for beat in ctx.beats.iter().filter(|b| b.source == BeatSource::Detected) {
                self.spawn_gem(beat.time + LEAD_TIME);
            }
            return;
        }

        // Seeking back rewinds the spawn cursor and drops gems in flight
        if now + 0.01 < self.last_time || self.next_beat > ctx.schedule.len() {
            self.gems.clear();
            self.next_beat = ctx.schedule.partition_point(|&b| b <= now);
        }
        while let Some(&beat) = ctx.schedule.get(self.next_beat) {
            if beat - LEAD_TIME > now + SPAWN_SLACK {
                break;
            }
            // Beats skipped over by a forward seek are not spawned
            if beat + MISS_WINDOW >= now {
                self.spawn_gem(beat);
            }
            self.next_beat += 1;
        }
    }

    fn project(&self, gem: &Gem) -> Projection {
        let s = FOCAL / (FOCAL + gem.depth);
        let x = gem.lane as f32 * self.viewport.width * 0.22;
        let y = -50.0;
        let center = self.viewport.center();
        Projection {
            pos: Vec2::new(center.x + x * s, center.y + (y + (1.0 - s) * 200.0) * s),
            scale: s,
        }
    }

    fn burst(&mut self, at: Vec2, hue: f32, count: usize) {
        for _ in 0..count {
            self.particles.push(Particle {
                pos: at,
                vel: Vec2::new(self.rng.gen_range(-6.0..=6.0), self.rng.gen_range(-6.0..=6.0)),
                life: self.rng.gen_range(60.0..=90.0),
                hue,
            });
        }
    }

    /// Resolve hits and misses for gems in flight
    fn judge(&mut self, now: f64) {
        let slashing = self.blade.speed() > SLASH_SPEED || self.blade.pressed;
        let mut i = 0;
        while i < self.gems.len() {
            let gem = &self.gems[i];
            let p = self.project(gem);
            let dist_sq = self.blade.pos.distance_squared(p.pos);
            if gem.depth < HIT_DEPTH
                && slashing
                && dist_sq < gem.size * gem.size * p.scale * 2.0
            {
                let hue = gem.hue;
                self.gems.swap_remove(i);
                self.hits += 1;
                self.burst(p.pos, hue, 18);
                self.pulse = 14.0;
                continue;
            }
            if now > gem.beat_time + MISS_WINDOW {
                let hue = gem.hue + 180.0;
                self.gems.swap_remove(i);
                self.misses += 1;
                self.burst(p.pos, hue, 8);
                continue;
            }
            i += 1;
        }
    }

    fn draw_grid(&self, ctx: &FrameContext<'_>, hue_offset: f32, frame: &mut Frame) {
        const COLS: f32 = 12.0;
        const ROWS: usize = 18;
        const SPACING: f32 = 90.0;
        let millis = (ctx.elapsed * 1000.0) as f32;
        let center = self.viewport.center() + Vec2::new(0.0, 90.0);
        let rotation = Mat2::from_angle(millis * 0.00022);
        let half = Vec2::new(COLS * SPACING, ROWS as f32 * SPACING) * 0.5;
        for i in 0..ROWS {
            let depth = i as f32 * SPACING + (millis * 0.25) % SPACING;
            let s = 900.0 / (900.0 + depth * 6.0);
            let corners = [
                Vec2::new(-half.x, -half.y),
                Vec2::new(half.x, -half.y),
                Vec2::new(half.x, half.y),
                Vec2::new(-half.x, half.y),
            ]
            .map(|c| center + rotation * (c * s))
            .to_vec();
            frame.polyline(
                corners,
                true,
                Style::Stroke {
                    color: Color::hsba(
                        hue_offset + self.frame_count * 0.6 + i as f32 * 6.0,
                        0.8,
                        0.9,
                        50.0 / 255.0,
                    ),
                    width: 2.0 * (1.0 - i as f32 / ROWS as f32),
                },
                Blend::Normal,
            );
        }
    }

    fn draw_gem(&self, gem: &Gem, hue_offset: f32, frame: &mut Frame) {
        let p = self.project(gem);
        let half = gem.size * p.scale * 0.5;
        let spin = Mat2::from_angle(self.frame_count * 0.008 + gem.lane as f32);
        let corners: Vec<Vec2> = [
            Vec2::new(-half, -half),
            Vec2::new(half, -half),
            Vec2::new(half, half),
            Vec2::new(-half, half),
        ]
        .iter()
        .map(|&c| p.pos + spin * c)
        .collect();
        let hue = hue_offset + gem.hue;
        frame.polyline(
            corners.clone(),
            true,
            Style::Fill(Color::hsba(hue, 0.9, 1.0, 18.0 / 255.0)),
            Blend::Normal,
        );
        frame.polyline(
            corners,
            true,
            Style::Stroke {
                color: Color::hsba(hue, 0.9, 1.0, 220.0 / 255.0),
                width: 2.0 * p.scale,
            },
            Blend::Normal,
        );
        let third = gem.size * p.scale / 3.0;
        frame.line(
            p.pos + spin * Vec2::splat(-third),
            p.pos + spin * Vec2::splat(third),
            Color::WHITE.with_alpha8(120.0),
            1.2 * p.scale,
        );
    }

    fn draw_blade(&self, frame: &mut Frame) {
        let pos = self.blade.pos;
        let from = pos + Vec2::new(-18.0, 28.0);
        let to = pos + Vec2::new(18.0, -28.0);
        let magenta = Color::hsba(320.0, 0.9, 1.0, 1.0);
        frame.line(from, to, magenta.with_alpha8(220.0), 6.0);
        frame.line(from, to, Color::WHITE.with_alpha8(120.0), 2.0);
        frame.circle(pos, 5.0, Style::Fill(magenta.with_alpha8(180.0)));
    }

    fn draw_shockwave(&self, hue_offset: f32, frame: &mut Frame) {
        let alpha = map_range(self.pulse, (0.0, 20.0), (0.0, 80.0));
        let center = self.viewport.center();
        for i in 0..3 {
            let fi = i as f32;
            let diameter = Vec2::new(
                200.0 + (20.0 - self.pulse) * 8.0 + fi * 120.0,
                200.0 + (20.0 - self.pulse) * 4.0 + fi * 80.0,
            );
            frame.push(
                Shape::Ellipse {
                    center,
                    radii: diameter * 0.5,
                    rotation: 0.0,
                },
                Style::Stroke {
                    color: Color::hsba(
                        hue_offset + self.frame_count * 1.2 + fi * 40.0,
                        0.9,
                        0.9,
                        alpha / 255.0,
                    ),
                    width: 6.0 - fi * 2.0,
                },
                Blend::Additive,
            );
        }
    }
}

impl VisualMode for RhythmGame {
    fn kind(&self) -> ModeKind {
        ModeKind::RhythmGame
    }

    fn on_activate(&mut self, viewport: Viewport) {
        self.on_resize(viewport);
        self.blade.pos = viewport.center();
    }

    fn on_resize(&mut self, viewport: Viewport) {
        self.viewport = viewport;
    }

    fn on_frame(&mut self, ctx: &FrameContext<'_>, frame: &mut Frame) -> Result<(), ModeFault> {
        let frames = ctx.frames();
        self.frame_count += frames;
        let hue_offset = ctx.palette().hue_offset;
        let trail = if self.trance { 16.0 } else { 24.0 };
        frame.clear = Clear::Fade(Color::hsba(10.0, 0.1, 0.12, trail / 255.0));

        self.draw_grid(ctx, hue_offset, frame);
        if self.phase != GamePhase::Playing {
            frame.fill_screen(Color::BLACK.with_alpha8(160.0), Blend::Normal);
        }

        if self.phase == GamePhase::Playing {
            if ctx.ended {
                self.finish();
            } else if ctx.playing {
                self.spawn_due(ctx);
            }
        }
        self.last_time = ctx.time;

        let now = ctx.time;
        for gem in &mut self.gems {
            gem.depth = (MAX_DEPTH * ((gem.beat_time - now) / LEAD_TIME) as f32).clamp(0.0, MAX_DEPTH);
        }
        // Far gems first
        self.gems.sort_by(|a, b| b.depth.total_cmp(&a.depth));
        for gem in &self.gems {
            self.draw_gem(gem, hue_offset, frame);
        }

        let damping = 0.98f32.powf(frames);
        for p in &mut self.particles {
            p.pos += p.vel * frames;
            p.vel *= damping;
            p.life -= frames;
            let alpha = (p.life / 100.0).max(0.0);
            frame.circle(
                p.pos,
                (4.0 + alpha * 6.0) * 0.5,
                Style::Fill(Color::hsba(hue_offset + p.hue, 0.9, 1.0, alpha)),
            );
        }
        self.particles.retain(|p| p.life > 0.0);

        self.blade.update(frames);
        self.draw_blade(frame);
        if self.phase == GamePhase::Playing {
            self.judge(now);
        }

        if ctx.beat() {
            self.pulse = self.pulse.max(10.0 + ctx.bands.bass * 30.0);
        }
        if self.pulse > 0.0 {
            self.draw_shockwave(hue_offset, frame);
            self.pulse = ctx.decay(self.pulse, 0.8).max(0.0);
        }
        Ok(())
    }

    fn on_input(&mut self, event: &InputEvent) {
        match *event {
            InputEvent::PointerDown(pos) => {
                self.blade.target = Some(pos);
                self.blade.pressed = true;
                if self.phase != GamePhase::Playing {
                    self.start();
                }
            }
            InputEvent::PointerUp(pos) => {
                self.blade.target = Some(pos);
                self.blade.pressed = false;
            }
            InputEvent::PointerMove { pos, pressed } => {
                self.blade.target = Some(pos);
                self.blade.pressed = pressed;
            }
            InputEvent::Key(Key::Enter) if self.phase != GamePhase::Playing => self.start(),
            InputEvent::Key(Key::Escape) => self.finish(),
            InputEvent::Key(Key::Space) => self.trance = !self.trance,
            _ => {}
        }
    }

    fn on_deactivate(&mut self) {
        self.gems.clear();
        self.particles.clear();
        self.events.clear();
    }

    fn entity_count(&self) -> usize {
        self.gems.len() + self.particles.len()
    }

    fn status_line(&self) -> Option<String> {
        let phase = match self.phase {
            GamePhase::Ready => "click or Enter to start",
            GamePhase::Playing => "playing",
            GamePhase::Finished => "game over",
        };
        Some(format!("Hits: {} | Misses: {} ({})", self.hits, self.misses, phase))
    }

    fn drain_events(&mut self) -> Vec<ModeEvent> {
        std::mem::take(&mut self.events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::beat::BeatEvent;
    use crate::modes::test_support::*;

    fn started(schedule: Vec<f64>) -> (RhythmGame, Harness) {
        let mut harness = Harness::new();
        harness.schedule = schedule;
        let mut game = RhythmGame::new(5);
        game.on_activate(harness.viewport);
        game.on_input(&InputEvent::Key(Key::Enter));
        assert_eq!(game.drain_events(), vec![ModeEvent::RequestPlay]);
        (game, harness)
    }

    fn run(game: &mut RhythmGame, harness: &Harness, from: f64, to: f64) {
        let mut frame = Frame::new(800.0, 600.0);
        let mut t = from;
        while t <= to + 1e-9 {
            frame.reset(None);
            game.on_frame(&harness.ctx(t, &[]), &mut frame).unwrap();
            t += 1.0 / 60.0;
        }
    }

    #[test]
    fn test_gem_lands_on_beat() {
        let (mut game, harness) = started(vec![5.0]);
        run(&mut game, &harness, 2.0, 2.9);
        assert!(game.gems.is_empty());

        run(&mut game, &harness, 2.95, 3.0);
        assert_eq!(game.gems.len(), 1);
        assert!(game.gems[0].depth <= MAX_DEPTH);

        run(&mut game, &harness, 5.0, 5.0);
        assert_eq!(game.gems.len(), 1);
        assert!(game.gems[0].depth.abs() < 1e-3);
    }

    #[test]
    fn test_unhit_gem_is_a_miss() {
        let (mut game, harness) = started(vec![5.0]);
        run(&mut game, &harness, 3.0, 5.2);
        assert!(game.gems.is_empty());
        assert_eq!(game.score(), (0, 1));
        assert_eq!(game.particles.len(), 8);
    }

    #[test]
    fn test_blade_on_gem_is_a_hit() {
        let (mut game, harness) = started(vec![5.0]);
        run(&mut game, &harness, 3.0, 4.5);
        let gem = &game.gems[0];
        // Where the gem lands at depth 0
        let landing = Vec2::new(400.0 + gem.lane as f32 * 800.0 * 0.22, 300.0 - 50.0);
        game.on_input(&InputEvent::PointerDown(landing));
        run(&mut game, &harness, 4.5 + 1.0 / 60.0, 5.1);

        assert_eq!(game.score(), (1, 0));
        assert!(game.gems.is_empty());
        assert_eq!(game.particles.len(), 18);
    }

    #[test]
    fn test_detected_beats_spawn_one_lead_later() {
        let (mut game, harness) = started(Vec::new());
        let beat = BeatEvent {
            time: 1.0,
            index: None,
            source: BeatSource::Detected,
            strength: 1.2,
        };
        let mut frame = Frame::new(800.0, 600.0);
        game.on_frame(&harness.ctx(1.0, &[beat]), &mut frame).unwrap();
        assert_eq!(game.gems.len(), 1);
        assert_eq!(game.gems[0].beat_time, 3.0);
        assert_eq!(game.gems[0].depth, MAX_DEPTH);
    }

    #[test]
    fn test_escape_reports_final_counts() {
        let (mut game, harness) = started(vec![5.0]);
        run(&mut game, &harness, 3.0, 5.2);
        game.on_input(&InputEvent::Key(Key::Escape));
        assert_eq!(game.phase(), GamePhase::Finished);
        assert_eq!(
            game.drain_events(),
            vec![ModeEvent::SessionEnded { hits: 0, misses: 1 }]
        );
    }

    #[test]
    fn test_audio_end_finishes_game() {
        let (mut game, harness) = started(vec![5.0]);
        let mut ctx = harness.ctx(6.0, &[]);
        ctx.ended = true;
        ctx.playing = false;
        let mut frame = Frame::new(800.0, 600.0);
        game.on_frame(&ctx, &mut frame).unwrap();
        assert_eq!(game.phase(), GamePhase::Finished);
        assert_eq!(game.drain_events().len(), 1);
    }

    #[test]
    fn test_seek_back_respawns() {
        let (mut game, harness) = started(vec![5.0]);
        run(&mut game, &harness, 3.0, 3.5);
        assert_eq!(game.gems.len(), 1);
        run(&mut game, &harness, 1.0, 1.0);
        assert!(game.gems.is_empty());
        run(&mut game, &harness, 3.0, 3.0);
        assert_eq!(game.gems.len(), 1);
    }
}
