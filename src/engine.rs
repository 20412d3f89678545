//! Frame-driven render loop: samples the spectrum, polls beats and drives the active mode.

use log::{debug, error, info};
use std::collections::VecDeque;
use std::panic::{catch_unwind, AssertUnwindSafe};

use crate::audio::{AnalyzerTap, PlaybackClock};
use crate::beat::{BeatClock, BeatEvent};
use crate::error::ModeFault;
use crate::frame::{Clear, Frame};
use crate::modes::{self, FrameContext, InputEvent, ModeAssets, ModeEvent, ModeKind, Viewport, VisualMode};
use crate::params::{AnalyzerConfig, BeatDetection, EffectParameters, RenderConfig, VisualParams};
use crate::spectrum::{BandEnergy, SpectrumSampler};

/// Things the engine reports back to the session
#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    /// The active mode failed and was deactivated
    Fault(ModeFault),
    /// A request raised by the active mode
    Mode(ModeEvent),
}

/// Rolling frame-time average over the last second of frames
#[derive(Debug, Default)]
pub struct FrameStats {
    frame_times: VecDeque<f64>,
    frames: u64,
}

impl FrameStats {
    fn record(&mut self, dt: f64) {
        self.frames += 1;
        self.frame_times.push_back(dt);
        if self.frame_times.len() > 60 {
            self.frame_times.pop_front();
        }
    }

    pub fn fps(&self) -> f32 {
        if self.frame_times.is_empty() {
            return 0.0;
        }
        let avg = self.frame_times.iter().sum::<f64>() / self.frame_times.len() as f64;
        if avg > 0.0 {
            (1.0 / avg) as f32
        } else {
            0.0
        }
    }

    /// Frames rendered since the engine was created
    pub fn frames(&self) -> u64 {
        self.frames
    }
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "panic".to_string()
    }
}

pub struct RenderEngine {
    running: bool,
    mode: Option<Box<dyn VisualMode>>,
    /// Last mode selected, also when it has faulted
    selected: ModeKind,
    assets: ModeAssets,
    seed: u64,
    spectrum: SpectrumSampler,
    beats: BeatClock,
    detection: BeatDetection,
    tap: Option<AnalyzerTap>,
    params: VisualParams,
    effects: EffectParameters,
    viewport: Viewport,
    frame: Frame,
    force_clear: bool,
    elapsed: f64,
    /// Track length in seconds, 0 when nothing is loaded
    duration: f64,
    max_frame_dt: f64,
    bands: BandEnergy,
    beat_count: u64,
    /// Set once the beats up to the end of the track have been flushed
    end_flushed: bool,
    events: Vec<EngineEvent>,
    stats: FrameStats,
}

impl RenderEngine {
    pub fn new(
        config: &RenderConfig,
        analyzer: AnalyzerConfig,
        detection: BeatDetection,
        params: VisualParams,
        assets: ModeAssets,
    ) -> Self {
        let viewport = Viewport::new(config.window_width as f32, config.window_height as f32);
        let params = params.clamped();
        let mut beats = BeatClock::new(Vec::new(), detection.clone());
        beats.set_sensitivity(params.sensitivity);
        Self {
            running: false,
            mode: None,
            selected: ModeKind::default(),
            assets,
            seed: config.seed,
            spectrum: SpectrumSampler::new(analyzer),
            beats,
            detection,
            tap: None,
            params,
            effects: EffectParameters::default(),
            viewport,
            frame: Frame::new(viewport.width, viewport.height),
            force_clear: true,
            elapsed: 0.0,
            duration: 0.0,
            max_frame_dt: config.max_frame_dt_s as f64,
            bands: BandEnergy::default(),
            beat_count: 0,
            end_flushed: false,
            events: Vec::new(),
            stats: FrameStats::default(),
        }
    }

    /// Start the loop; returns false if it was already running
    pub fn start(&mut self) -> bool {
        if self.running {
            return false;
        }
        self.running = true;
        if self.mode.is_none() {
            self.select_mode(self.selected);
        }
        info!("Render engine started ({})", self.selected);
        true
    }

    /// Stop the loop; returns false if it was already stopped
    pub fn stop(&mut self) -> bool {
        if !self.running {
            return false;
        }
        self.running = false;
        info!("Render engine stopped");
        true
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    /// Install the beat list and analyzer of a newly loaded track
    pub fn load_track(&mut self, beats: Vec<f64>, tap: Option<AnalyzerTap>, duration: f64) {
        self.beats = BeatClock::new(beats, self.detection.clone());
        self.duration = duration.max(0.0);
        self.beats.set_sensitivity(self.params.sensitivity);
        self.tap = tap;
        self.beat_count = 0;
        self.end_flushed = false;
    }

    pub fn set_analyzer(&mut self, tap: Option<AnalyzerTap>) {
        self.tap = tap;
    }

    pub fn beat_clock(&self) -> &BeatClock {
        &self.beats
    }

    pub fn params(&self) -> &VisualParams {
        &self.params
    }

    /// Apply new visual parameters from the next frame on
    pub fn set_params(&mut self, params: VisualParams) {
        self.params = params.clamped();
        self.beats.set_sensitivity(self.params.sensitivity);
    }

    /// Effect settings the modes may react to
    pub fn set_effects(&mut self, effects: &EffectParameters) {
        self.effects = effects.clamped();
    }

    /// Tear down the current mode and activate `kind` with fresh state
    pub fn select_mode(&mut self, kind: ModeKind) {
        let mode = modes::create(kind, self.seed, &self.assets);
        self.activate(mode);
    }

    fn activate(&mut self, mut mode: Box<dyn VisualMode>) {
        self.deactivate_current();
        let kind = mode.kind();
        let viewport = self.viewport;
        let activated = catch_unwind(AssertUnwindSafe(|| mode.on_activate(viewport)));
        self.selected = kind;
        self.force_clear = true;
        match activated {
            Ok(()) => {
                info!("Mode: {}", kind);
                self.mode = Some(mode);
            }
            Err(payload) => self.record_fault(ModeFault::new(kind, panic_message(payload))),
        }
    }

    /// Mode currently producing frames, None after a fault
    pub fn active_mode(&self) -> Option<ModeKind> {
        self.mode.as_ref().map(|m| m.kind())
    }

    pub fn selected_mode(&self) -> ModeKind {
        self.selected
    }

    pub fn mode_status(&self) -> Option<String> {
        self.mode.as_ref().and_then(|m| m.status_line())
    }

    pub fn entity_count(&self) -> usize {
        self.mode.as_ref().map_or(0, |m| m.entity_count())
    }

    pub fn resize(&mut self, width: u32, height: u32) {
        let viewport = Viewport::new(width as f32, height as f32);
        if viewport == self.viewport {
            return;
        }
        debug!("Engine resize {}x{}", width, height);
        self.viewport = viewport;
        self.frame = Frame::new(viewport.width, viewport.height);
        self.force_clear = true;
        if let Some(mode) = self.mode.as_mut() {
            mode.on_resize(viewport);
        }
    }

    pub fn viewport(&self) -> Viewport {
        self.viewport
    }

    pub fn input(&mut self, event: &InputEvent) {
        let Some(mode) = self.mode.as_mut() else {
            return;
        };
        if let Err(payload) = catch_unwind(AssertUnwindSafe(|| mode.on_input(event))) {
            let kind = mode.kind();
            self.fault(ModeFault::new(kind, panic_message(payload)));
        }
    }

    /// Render one frame at the clock's position; returns whether another frame is wanted
    pub fn tick(&mut self, clock: &dyn PlaybackClock, dt: f64) -> bool {
        if !self.running {
            return false;
        }
        let dt = if dt.is_finite() { dt.clamp(0.0, self.max_frame_dt) } else { 0.0 };
        self.elapsed += dt;
        self.stats.record(dt);

        let now = clock.current_time();
        let playing = clock.is_playing();
        let ended = clock.has_ended();
        self.bands = self.spectrum.sample(self.tap.as_ref());
        // Stopped or paused playback emits no beats. The frame that reaches
        // the end of the track still polls once, up to the end.
        let flush_end = ended && !self.end_flushed;
        self.end_flushed = ended;
        let beats: Vec<BeatEvent> = if playing || flush_end {
            self.beats.poll(now, &self.bands)
        } else {
            Vec::new()
        };
        self.beat_count += beats.len() as u64;

        self.frame.reset(self.mode.as_ref().map(|m| m.kind()));
        let mut fault = None;
        if let Some(mode) = self.mode.as_mut() {
            let ctx = FrameContext {
                dt: dt as f32,
                elapsed: self.elapsed,
                time: now,
                beats: &beats,
                bands: self.bands,
                spectrum: self.spectrum.frame(),
                schedule: self.beats.schedule(),
                params: &self.params,
                effects: self.effects,
                viewport: self.viewport,
                playing,
                ended,
                duration: self.duration,
            };
            let frame = &mut self.frame;
            let result = catch_unwind(AssertUnwindSafe(|| mode.on_frame(&ctx, frame)));
            fault = match result {
                Ok(Ok(())) => None,
                Ok(Err(e)) => Some(e),
                Err(payload) => Some(ModeFault::new(mode.kind(), panic_message(payload))),
            };
            if fault.is_none() {
                self.events
                    .extend(mode.drain_events().into_iter().map(EngineEvent::Mode));
            }
        }
        if let Some(fault) = fault {
            self.fault(fault);
        }

        if self.force_clear {
            let background = self.params.theme.palette_at(self.elapsed).background;
            self.frame.clear = Clear::Full(background.with_alpha(1.0));
            self.force_clear = false;
        }
        true
    }

    /// Display list of the last rendered frame
    pub fn frame(&self) -> &Frame {
        &self.frame
    }

    pub fn bands(&self) -> BandEnergy {
        self.bands
    }

    pub fn spectrum(&self) -> &[u8] {
        self.spectrum.frame()
    }

    /// Beats delivered to modes since the track was loaded
    pub fn beat_count(&self) -> u64 {
        self.beat_count
    }

    pub fn stats(&self) -> &FrameStats {
        &self.stats
    }

    pub fn drain_events(&mut self) -> Vec<EngineEvent> {
        std::mem::take(&mut self.events)
    }

    fn deactivate_current(&mut self) {
        if let Some(mut mode) = self.mode.take() {
            let kind = mode.kind();
            if catch_unwind(AssertUnwindSafe(|| mode.on_deactivate())).is_err() {
                error!("Mode {} panicked while deactivating", kind);
            }
            debug!("Deactivated {}", kind);
        }
    }

    fn fault(&mut self, fault: ModeFault) {
        self.deactivate_current();
        self.frame.reset(None);
        self.force_clear = true;
        self.record_fault(fault);
    }

    fn record_fault(&mut self, fault: ModeFault) {
        error!("{}", fault);
        self.events.push(EngineEvent::Fault(fault));
    }
}

/// Fixed-step frame clock for offline rendering
#[derive(Debug, Clone, Copy)]
pub struct FixedTick {
    dt: f64,
    frame: u64,
}

impl FixedTick {
    pub fn new(fps: u32) -> Self {
        Self {
            dt: 1.0 / fps.max(1) as f64,
            frame: 0,
        }
    }

    pub fn dt(&self) -> f64 {
        self.dt
    }

    /// Index of the next frame
    pub fn frame(&self) -> u64 {
        self.frame
    }

    /// Time at the start of the next frame
    pub fn time(&self) -> f64 {
        self.frame as f64 * self.dt
    }

    pub fn advance(&mut self) -> f64 {
        self.frame += 1;
        self.dt
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::Style;
    use glam::Vec2;
    use std::cell::Cell;

    struct FakeClock {
        time: Cell<f64>,
        playing: Cell<bool>,
        ended: Cell<bool>,
    }

    impl FakeClock {
        fn at(time: f64, playing: bool) -> Self {
            Self {
                time: Cell::new(time),
                playing: Cell::new(playing),
                ended: Cell::new(false),
            }
        }

        fn playing() -> Self {
            Self::at(0.0, true)
        }

        fn step(&self, dt: f64) {
            self.time.set(self.time.get() + dt);
        }

        /// Jump to the end of a track of length `duration`
        fn end(&self, duration: f64) {
            self.time.set(duration);
            self.playing.set(false);
            self.ended.set(true);
        }
    }

    impl PlaybackClock for FakeClock {
        fn current_time(&self) -> f64 {
            self.time.get()
        }
        fn is_playing(&self) -> bool {
            self.playing.get()
        }
        fn has_ended(&self) -> bool {
            self.ended.get()
        }
    }

    /// Draws one circle per frame, then fails on the given frame
    struct Flaky {
        frames: usize,
        fail_at: usize,
        panic: bool,
    }

    impl VisualMode for Flaky {
        fn kind(&self) -> ModeKind {
            ModeKind::RetroGrid
        }

        fn on_frame(&mut self, _ctx: &FrameContext<'_>, frame: &mut Frame) -> Result<(), ModeFault> {
            self.frames += 1;
            frame.circle(Vec2::splat(10.0), 5.0, Style::Fill(crate::frame::Color::WHITE));
            if self.frames == self.fail_at {
                if self.panic {
                    panic!("boom");
                }
                return Err(ModeFault::new(self.kind(), "bad state"));
            }
            Ok(())
        }

        fn entity_count(&self) -> usize {
            0
        }
    }

    fn engine() -> RenderEngine {
        let config = RenderConfig {
            window_width: 320,
            window_height: 240,
            ..RenderConfig::default()
        };
        RenderEngine::new(
            &config,
            AnalyzerConfig::default(),
            BeatDetection::default(),
            VisualParams::default(),
            ModeAssets::default(),
        )
    }

    #[test]
    fn test_start_stop_idempotent() {
        let mut engine = engine();
        let clock = FakeClock::playing();
        assert!(!engine.tick(&clock, 0.016));

        assert!(engine.start());
        assert!(!engine.start());
        assert!(engine.tick(&clock, 0.016));
        assert_eq!(engine.active_mode(), Some(ModeKind::RippleField));

        assert!(engine.stop());
        assert!(!engine.stop());
        assert!(!engine.tick(&clock, 0.016));
    }

    #[test]
    fn test_scheduled_beats_reach_the_mode_once() {
        let mut engine = engine();
        engine.load_track(vec![0.05, 0.1], None, 10.0);
        engine.start();
        let clock = FakeClock::playing();
        for _ in 0..20 {
            clock.step(1.0 / 60.0);
            engine.tick(&clock, 1.0 / 60.0);
        }
        assert_eq!(engine.beat_count(), 2);
        assert_eq!(engine.beat_clock().cursor(), 2);
    }

    #[test]
    fn test_paused_clock_emits_no_beats() {
        let mut engine = engine();
        engine.load_track(vec![0.0, 0.01], None, 10.0);
        engine.start();
        let clock = FakeClock::at(1.0, false);
        engine.tick(&clock, 0.016);
        assert_eq!(engine.beat_count(), 0);
    }

    #[test]
    fn test_beat_in_final_frame_is_emitted() {
        let mut engine = engine();
        engine.load_track(vec![0.5, 0.99], None, 1.0);
        engine.start();
        let clock = FakeClock::playing();
        for _ in 0..59 {
            clock.step(1.0 / 60.0);
            engine.tick(&clock, 1.0 / 60.0);
        }
        assert_eq!(engine.beat_count(), 1);

        clock.end(1.0);
        engine.tick(&clock, 1.0 / 60.0);
        assert_eq!(engine.beat_count(), 2);

        // Later frames past the end emit nothing
        engine.tick(&clock, 1.0 / 60.0);
        engine.tick(&clock, 1.0 / 60.0);
        assert_eq!(engine.beat_count(), 2);
        assert_eq!(engine.beat_clock().cursor(), 2);
    }

    #[test]
    fn test_mode_switch_starts_clean() {
        let mut engine = engine();
        engine.start();
        let clock = FakeClock::playing();
        engine.input(&InputEvent::PointerDown(Vec2::new(20.0, 20.0)));
        engine.tick(&clock, 0.016);
        assert_eq!(engine.entity_count(), 1);

        engine.select_mode(ModeKind::CircularWaveform);
        engine.tick(&clock, 0.016);
        let frame = engine.frame();
        assert_eq!(frame.owner, Some(ModeKind::CircularWaveform));
        assert!(matches!(frame.clear, Clear::Full(_)));
        assert_eq!(engine.entity_count(), 0);

        // Trails resume after the first frame
        engine.tick(&clock, 0.016);
        assert!(matches!(engine.frame().clear, Clear::Fade(_)));
    }

    #[test]
    fn test_fault_isolated_and_loop_continues() {
        for panic in [false, true] {
            let mut engine = engine();
            engine.start();
            engine.activate(Box::new(Flaky {
                frames: 0,
                fail_at: 2,
                panic,
            }));
            let clock = FakeClock::playing();
            assert!(engine.tick(&clock, 0.016));
            assert_eq!(engine.frame().ops.len(), 1);

            assert!(engine.tick(&clock, 0.016));
            assert_eq!(engine.active_mode(), None);
            assert!(engine.frame().ops.is_empty());
            let events = engine.drain_events();
            assert!(matches!(
                events.as_slice(),
                [EngineEvent::Fault(ModeFault { mode: ModeKind::RetroGrid, .. })]
            ));

            // Keeps ticking with empty frames, and other modes still work
            assert!(engine.tick(&clock, 0.016));
            engine.select_mode(ModeKind::PolygonMesh);
            assert!(engine.tick(&clock, 0.016));
            assert!(!engine.frame().ops.is_empty());
        }
    }

    #[test]
    fn test_mode_events_are_forwarded() {
        let mut engine = engine();
        engine.start();
        engine.select_mode(ModeKind::RhythmGame);
        engine.input(&InputEvent::Key(crate::modes::Key::Enter));
        engine.tick(&FakeClock::playing(), 0.016);
        assert_eq!(
            engine.drain_events(),
            vec![EngineEvent::Mode(ModeEvent::RequestPlay)]
        );
    }

    #[test]
    fn test_dt_is_clamped() {
        let mut engine = engine();
        engine.start();
        engine.tick(&FakeClock::playing(), 5.0);
        assert!((engine.elapsed - 0.1).abs() < 1e-6);
    }

    #[test]
    fn test_fixed_tick() {
        let mut tick = FixedTick::new(60);
        for _ in 0..60 {
            tick.advance();
        }
        assert_eq!(tick.frame(), 60);
        assert!((tick.time() - 1.0).abs() < 1e-9);
    }
}
