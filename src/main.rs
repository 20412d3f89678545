//! SonicPlay - beat-synchronized music visualizer
//!
//! Plays a WAV track through the effects rack while one of seven visual
//! modes reacts to its beats and spectrum.

use anyhow::Context;
use clap::Parser;
use glam::Vec2;
use log::{error, info, warn};
use std::sync::Arc;
use std::time::{Duration, Instant};
use winit::{
    application::ApplicationHandler,
    event::*,
    event_loop::{ActiveEventLoop, EventLoop},
    keyboard::{KeyCode, PhysicalKey},
    window::{Window, WindowId},
};

use sonicplay::canvas::Canvas;
use sonicplay::cli::Args;
use sonicplay::engine::{EngineEvent, FixedTick};
use sonicplay::modes::{BackdropLoop, InputEvent, Key, ModeAssets, ModeKind};
use sonicplay::params::{EffectParameters, RecordingConfig};
use sonicplay::presets::{FileStore, KeyValueStore, MemoryStore, PresetStore};
use sonicplay::rendering::Presenter;
use sonicplay::session::{read_beat_list, Session, SessionConfig};

const DOUBLE_CLICK: Duration = Duration::from_millis(350);
const DOUBLE_CLICK_SLOP_PX: f32 = 6.0;
const TITLE_INTERVAL: Duration = Duration::from_millis(500);
const SEEK_STEP_S: f64 = 5.0;

/// Everything needed to open a session, resolved from the command line
struct Startup {
    config: SessionConfig,
    assets: ModeAssets,
    effects: EffectParameters,
    mode: ModeKind,
    beats: Vec<f64>,
}

/// Main application state
struct App {
    window: Option<Arc<Window>>,
    presenter: Option<Presenter>,
    session: Session,
    canvas: Canvas,

    // Pointer state in canvas pixels
    cursor: Vec2,
    pressed: bool,
    last_click: Option<(Instant, Vec2)>,

    last_frame: Instant,
    last_title: Instant,
    last_fault: Option<String>,
}

impl App {
    fn new(session: Session) -> Self {
        let viewport = session.engine().viewport();
        Self {
            window: None,
            presenter: None,
            canvas: Canvas::new(viewport.width as u32, viewport.height as u32),
            session,
            cursor: Vec2::ZERO,
            pressed: false,
            last_click: None,
            last_frame: Instant::now(),
            last_title: Instant::now(),
            last_fault: None,
        }
    }
}

impl ApplicationHandler for App {
    fn about_to_wait(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(window) = &self.window {
            window.request_redraw();
        }
    }

    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() {
            return; // Already initialized
        }

        let viewport = self.session.engine().viewport();
        let window_attributes = Window::default_attributes()
            .with_title("SonicPlay")
            .with_inner_size(winit::dpi::PhysicalSize::new(
                viewport.width as u32,
                viewport.height as u32,
            ));

        let window = match event_loop.create_window(window_attributes) {
            Ok(window) => Arc::new(window),
            Err(e) => {
                error!("Failed to create window: {}", e);
                event_loop.exit();
                return;
            }
        };

        match pollster::block_on(Presenter::new(Arc::clone(&window))) {
            Ok(presenter) => {
                let (width, height) = presenter.size();
                self.resize(width, height);
                self.presenter = Some(presenter);
            }
            Err(e) => {
                error!("{}", e);
                event_loop.exit();
                return;
            }
        }

        info!("SonicPlay is running");
        info!("F1-F7 mode | T theme | [ ] sensitivity | - = elements | P play/pause | <- -> seek");
        self.window = Some(window);
        self.last_frame = Instant::now();
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _window_id: WindowId, event: WindowEvent) {
        match event {
            WindowEvent::CloseRequested => event_loop.exit(),
            WindowEvent::Resized(size) => {
                if let Some(presenter) = self.presenter.as_mut() {
                    presenter.resize(size.width, size.height);
                }
                self.resize(size.width, size.height);
            }
            WindowEvent::KeyboardInput {
                event:
                    KeyEvent {
                        state: ElementState::Pressed,
                        physical_key: PhysicalKey::Code(code),
                        ..
                    },
                ..
            } => self.key_pressed(event_loop, code),
            WindowEvent::CursorMoved { position, .. } => {
                self.cursor = Vec2::new(position.x as f32, position.y as f32);
                let event = InputEvent::PointerMove {
                    pos: self.cursor,
                    pressed: self.pressed,
                };
                self.session.engine_mut().input(&event);
            }
            WindowEvent::MouseInput {
                state,
                button: MouseButton::Left,
                ..
            } => self.mouse_button(state),
            WindowEvent::RedrawRequested => self.render_frame(event_loop),
            _ => {}
        }
    }
}

impl App {
    fn resize(&mut self, width: u32, height: u32) {
        if width == 0 || height == 0 {
            return; // Minimized
        }
        self.canvas.resize(width, height);
        self.session.engine_mut().resize(width, height);
    }

    fn key_pressed(&mut self, event_loop: &ActiveEventLoop, code: KeyCode) {
        let mode_slot = match code {
            KeyCode::F1 => Some(0),
            KeyCode::F2 => Some(1),
            KeyCode::F3 => Some(2),
            KeyCode::F4 => Some(3),
            KeyCode::F5 => Some(4),
            KeyCode::F6 => Some(5),
            KeyCode::F7 => Some(6),
            _ => None,
        };
        if let Some(kind) = mode_slot.and_then(ModeKind::from_index) {
            self.last_fault = None;
            self.session.engine_mut().select_mode(kind);
            return;
        }

        match code {
            KeyCode::KeyP => {
                if let Err(e) = self.session.toggle_play() {
                    warn!("{}", e);
                }
                return;
            }
            KeyCode::ArrowLeft | KeyCode::ArrowRight => {
                let step = if code == KeyCode::ArrowLeft { -SEEK_STEP_S } else { SEEK_STEP_S };
                let target = self.session.current_time() + step;
                if let Err(e) = self.session.seek(target) {
                    warn!("{}", e);
                }
                return;
            }
            _ => {}
        }

        let engine = self.session.engine_mut();
        let mut params = engine.params().clone();
        match code {
            KeyCode::KeyT => params.theme = params.theme.next(),
            KeyCode::BracketLeft => params.sensitivity -= 0.1,
            KeyCode::BracketRight => params.sensitivity += 0.1,
            KeyCode::Minus => params.element_count = params.element_count.saturating_sub(5),
            KeyCode::Equal => params.element_count += 5,
            // Escape belongs to the rhythm game while it is active
            KeyCode::Escape if engine.active_mode() != Some(ModeKind::RhythmGame) => {
                event_loop.exit();
                return;
            }
            other => {
                engine.input(&InputEvent::Key(mode_key(other)));
                return;
            }
        }
        engine.set_params(params);
        let applied = engine.params();
        info!(
            "Theme {} | sensitivity {:.1} | {} elements",
            applied.theme, applied.sensitivity, applied.element_count
        );
    }

    fn mouse_button(&mut self, state: ElementState) {
        let pos = self.cursor;
        let engine = self.session.engine_mut();
        match state {
            ElementState::Pressed => {
                self.pressed = true;
                engine.input(&InputEvent::PointerDown(pos));
                let now = Instant::now();
                let double = self.last_click.is_some_and(|(at, at_pos)| {
                    now.duration_since(at) <= DOUBLE_CLICK
                        && at_pos.distance(pos) <= DOUBLE_CLICK_SLOP_PX
                });
                if double {
                    engine.input(&InputEvent::DoubleClick(pos));
                    self.last_click = None;
                } else {
                    self.last_click = Some((now, pos));
                }
            }
            ElementState::Released => {
                self.pressed = false;
                engine.input(&InputEvent::PointerUp(pos));
            }
        }
    }

    /// Render a single frame
    fn render_frame(&mut self, event_loop: &ActiveEventLoop) {
        let now = Instant::now();
        let dt = now.duration_since(self.last_frame).as_secs_f64();
        self.last_frame = now;

        match self.session.tick(dt) {
            Ok(events) => {
                for event in events {
                    if let EngineEvent::Fault(fault) = event {
                        self.last_fault = Some(fault.to_string());
                    }
                }
            }
            Err(e) => warn!("{}", e),
        }

        self.canvas.draw(self.session.engine().frame());
        if let Some(presenter) = self.presenter.as_mut() {
            match presenter.present(&self.canvas) {
                Ok(()) => {}
                Err(wgpu::SurfaceError::Lost | wgpu::SurfaceError::Outdated) => presenter.reconfigure(),
                Err(wgpu::SurfaceError::OutOfMemory) => {
                    error!("GPU out of memory");
                    event_loop.exit();
                }
                Err(e) => warn!("Surface error: {}", e),
            }
        }

        if now.duration_since(self.last_title) >= TITLE_INTERVAL {
            self.last_title = now;
            self.update_title();
        }
    }

    /// HUD in the window title
    fn update_title(&self) {
        let Some(window) = &self.window else {
            return;
        };
        let engine = self.session.engine();
        let params = engine.params();
        let mut title = format!(
            "SonicPlay | {} | {} | sens {:.1} | {:.0} fps | {:.1}/{:.1}s",
            engine.selected_mode(),
            params.theme,
            params.sensitivity,
            engine.stats().fps(),
            self.session.current_time(),
            self.session.duration(),
        );
        if let Some(status) = engine.mode_status() {
            title.push_str(" | ");
            title.push_str(&status);
        }
        if let Some(fault) = &self.last_fault {
            title.push_str(" | ");
            title.push_str(fault);
        }
        window.set_title(&title);
    }
}

fn mode_key(code: KeyCode) -> Key {
    match code {
        KeyCode::Space => Key::Space,
        KeyCode::Enter | KeyCode::NumpadEnter => Key::Enter,
        KeyCode::Escape => Key::Escape,
        KeyCode::Digit1 => Key::Digit(1),
        KeyCode::Digit2 => Key::Digit(2),
        KeyCode::Digit3 => Key::Digit(3),
        KeyCode::Digit4 => Key::Digit(4),
        KeyCode::Digit5 => Key::Digit(5),
        KeyCode::Digit6 => Key::Digit(6),
        KeyCode::Digit7 => Key::Digit(7),
        KeyCode::Digit8 => Key::Digit(8),
        KeyCode::Digit9 => Key::Digit(9),
        _ => Key::Other,
    }
}

fn open_presets() -> PresetStore {
    let store: Box<dyn KeyValueStore> = match FileStore::default_location() {
        Some(store) => {
            info!("Presets in {}", store.dir().display());
            Box::new(store)
        }
        None => {
            warn!("No data directory; presets last for this run only");
            Box::new(MemoryStore::new())
        }
    };
    PresetStore::open(store)
}

fn load_assets(args: &Args) -> ModeAssets {
    let backdrop = args.backdrop.as_ref().and_then(|path| match BackdropLoop::open(path) {
        Ok(backdrop) => {
            info!("Backdrop {} ({} frames)", path.display(), backdrop.len());
            Some(Arc::new(backdrop))
        }
        Err(e) => {
            warn!("Ignoring backdrop {}: {}", path.display(), e);
            None
        }
    });
    ModeAssets { backdrop }
}

/// Open a session on `track` with the resolved effects and mode
fn prepare(session: &mut Session, args: &Args, startup: Startup) -> anyhow::Result<()> {
    session.set_effects(&startup.effects);
    session.engine_mut().select_mode(startup.mode);
    match &args.track {
        Some(track) => {
            session
                .load_track(track, startup.beats)
                .with_context(|| format!("could not load {}", track.display()))?;
            // The rhythm game starts playback itself
            if startup.mode != ModeKind::RhythmGame {
                session.play()?;
            }
        }
        None => info!("No track given, showing the idle visuals"),
    }
    session.engine_mut().start();
    Ok(())
}

/// Headless fixed-tick rendering to PNG frames plus the processed audio
fn record(args: &Args, recording: RecordingConfig, presets: PresetStore, startup: Startup) -> anyhow::Result<()> {
    let mut session = Session::offline(
        startup.config.clone(),
        presets,
        startup.assets.clone(),
        &recording.audio_path(),
    )?;
    prepare(&mut session, args, startup)?;

    let viewport = session.engine().viewport();
    let mut canvas = Canvas::new(viewport.width as u32, viewport.height as u32);
    let mut tick = FixedTick::new(recording.fps);
    let total = recording.total_frames();

    for index in 0..total {
        let dt = tick.advance();
        session.tick(dt)?;
        canvas.draw(session.engine().frame());
        canvas
            .save_png(&recording.frame_path(index))
            .with_context(|| format!("could not save frame {}", index))?;
        if index % recording.fps.max(1) as usize == 0 {
            info!("Recorded {}/{} frames ({:.1}s)", index, total, tick.time());
        }
    }
    session.finish()?;

    info!(
        "Done. Encode with: ffmpeg -framerate {} -i {}/frame_%05d.png -i {} -c:v libx264 -pix_fmt yuv420p -c:a aac out.mp4",
        recording.fps,
        recording.frames_dir().display(),
        recording.audio_path().display()
    );
    Ok(())
}

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let mut presets = open_presets();
    if let Some(name) = &args.delete_preset {
        presets.delete(name)?;
    }
    if args.list_presets {
        for name in presets.list() {
            println!("{}", name);
        }
        return Ok(());
    }

    let base = match &args.preset {
        Some(name) => presets.load(name)?,
        None => EffectParameters::default(),
    };
    let effects = args.apply_overrides(&base).map_err(anyhow::Error::msg)?;
    if let Some(name) = &args.save_preset {
        presets.save(name, &effects)?;
    }

    let beats = match &args.beats {
        Some(path) => read_beat_list(path)?,
        None => Vec::new(),
    };
    let startup = Startup {
        config: SessionConfig {
            visual: args.visual_params(),
            ..SessionConfig::default()
        },
        assets: load_assets(&args),
        effects,
        mode: args.parse_mode(),
        beats,
    };

    if let Some(recording) = args.create_recording_config()? {
        return record(&args, recording, presets, startup);
    }

    let mut session = Session::with_device(startup.config.clone(), presets, startup.assets.clone());
    prepare(&mut session, &args, startup)?;

    let event_loop = EventLoop::new()?;
    let mut app = App::new(session);
    event_loop.run_app(&mut app)?;
    Ok(())
}
