//! Playback session: track loading, transport, effects, presets and the
//! render engine behind one facade for the shell.

use log::{debug, info, warn};
use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::audio::{
    playback_slot, AudioContext, AudioGraph, ClockHandle, MediaElement, Playback, PlaybackClock,
    PlaybackSlot, TrackBuffer,
};
use crate::engine::{EngineEvent, RenderEngine};
use crate::error::{AudioError, SessionError};
use crate::modes::{ModeAssets, ModeEvent};
use crate::params::{
    audio_constants, AnalyzerConfig, BeatDetection, EffectControl, EffectParameters, GraphConfig,
    RenderConfig, VisualParams,
};
use crate::presets::PresetStore;

/// Static configuration of a session
#[derive(Debug, Clone, Default)]
pub struct SessionConfig {
    pub render: RenderConfig,
    pub analyzer: AnalyzerConfig,
    pub detection: BeatDetection,
    pub graph: GraphConfig,
    pub visual: VisualParams,
}

type WavOut = hound::WavWriter<BufWriter<File>>;

/// Renders playback into a WAV file in step with the frame clock
pub struct OfflineOutput {
    writer: Option<WavOut>,
    path: PathBuf,
    sample_rate: u32,
    /// Fractional frames carried between ticks
    carry: f64,
    buffer: Vec<[f32; 2]>,
    written: u64,
}

impl OfflineOutput {
    pub fn create(path: &Path, sample_rate: u32) -> Result<Self, AudioError> {
        let spec = hound::WavSpec {
            channels: 2,
            sample_rate,
            bits_per_sample: 32,
            sample_format: hound::SampleFormat::Float,
        };
        let writer = hound::WavWriter::create(path, spec)?;
        info!("Recording audio to {}", path.display());
        Ok(Self {
            writer: Some(writer),
            path: path.to_path_buf(),
            sample_rate,
            carry: 0.0,
            buffer: Vec::new(),
            written: 0,
        })
    }

    /// Render `dt` seconds of `playback` (silence when nothing is loaded)
    fn render(&mut self, playback: Option<&mut Playback>, dt: f64) -> Result<(), AudioError> {
        let Some(writer) = self.writer.as_mut() else {
            return Ok(());
        };
        let exact = dt.max(0.0) * self.sample_rate as f64 + self.carry;
        let count = exact.floor() as usize;
        self.carry = exact - count as f64;

        self.buffer.clear();
        self.buffer.resize(count, [0.0; 2]);
        if let Some(playback) = playback {
            playback.render_frames(&mut self.buffer);
        }
        for sample in bytemuck::cast_slice::<[f32; 2], f32>(&self.buffer) {
            writer.write_sample(*sample)?;
        }
        self.written += count as u64;
        Ok(())
    }

    /// Frames written so far
    pub fn frames_written(&self) -> u64 {
        self.written
    }

    fn finish(&mut self) -> Result<(), AudioError> {
        if let Some(writer) = self.writer.take() {
            writer.finalize()?;
            info!(
                "Audio saved to {} ({} frames)",
                self.path.display(),
                self.written
            );
        }
        Ok(())
    }
}

/// Where rendered audio goes
pub enum AudioOutput {
    /// Live output device
    Device(AudioContext),
    /// WAV file, rendered from the frame loop
    Offline(OfflineOutput),
    /// No output; the clock advances with the frame loop
    Silent,
}

impl AudioOutput {
    fn sample_rate(&self) -> u32 {
        match self {
            AudioOutput::Device(ctx) => ctx.sample_rate(),
            AudioOutput::Offline(out) => out.sample_rate,
            AudioOutput::Silent => audio_constants::DEFAULT_SAMPLE_RATE,
        }
    }

    fn name(&self) -> &'static str {
        match self {
            AudioOutput::Device(_) => "device",
            AudioOutput::Offline(_) => "offline",
            AudioOutput::Silent => "silent",
        }
    }
}

/// Clock of a session with no track loaded
struct IdleClock;

impl PlaybackClock for IdleClock {
    fn current_time(&self) -> f64 {
        0.0
    }
    fn is_playing(&self) -> bool {
        false
    }
    fn has_ended(&self) -> bool {
        false
    }
}

/// Read a beat list (`[0.5, 1.0, ...]` seconds) from JSON. Ordering and
/// invalid entries are handled by the beat clock.
pub fn read_beat_list(path: &Path) -> Result<Vec<f64>, SessionError> {
    let beat_err = |message: String| SessionError::BeatList {
        path: path.to_path_buf(),
        message,
    };
    let text = std::fs::read_to_string(path).map_err(|e| beat_err(e.to_string()))?;
    serde_json::from_str(&text).map_err(|e| beat_err(e.to_string()))
}

pub struct Session {
    output: AudioOutput,
    slot: PlaybackSlot,
    clock: Option<ClockHandle>,
    track_path: Option<PathBuf>,
    duration: f64,
    graph_config: GraphConfig,
    tap_len: usize,
    effects: EffectParameters,
    presets: PresetStore,
    engine: RenderEngine,
}

impl Session {
    /// Session on the default output device; a device failure degrades to
    /// silent passthrough playback
    pub fn with_device(config: SessionConfig, presets: PresetStore, assets: ModeAssets) -> Self {
        let slot = playback_slot();
        let output = match AudioContext::open(Arc::clone(&slot)) {
            Ok(ctx) => AudioOutput::Device(ctx),
            Err(e) => {
                warn!("{}; continuing without sound", e);
                AudioOutput::Silent
            }
        };
        Self::build(config, presets, assets, output, slot)
    }

    /// Session recording its processed audio to `wav_path`
    pub fn offline(
        config: SessionConfig,
        presets: PresetStore,
        assets: ModeAssets,
        wav_path: &Path,
    ) -> Result<Self, SessionError> {
        let output = OfflineOutput::create(wav_path, audio_constants::DEFAULT_SAMPLE_RATE)?;
        Ok(Self::build(
            config,
            presets,
            assets,
            AudioOutput::Offline(output),
            playback_slot(),
        ))
    }

    /// Session without any audio output
    pub fn silent(config: SessionConfig, presets: PresetStore, assets: ModeAssets) -> Self {
        Self::build(config, presets, assets, AudioOutput::Silent, playback_slot())
    }

    fn build(
        config: SessionConfig,
        presets: PresetStore,
        assets: ModeAssets,
        output: AudioOutput,
        slot: PlaybackSlot,
    ) -> Self {
        let analyzer = match config.analyzer.validate() {
            Ok(()) => config.analyzer,
            Err(e) => {
                warn!("{}; using default analyzer settings", e);
                AnalyzerConfig::default()
            }
        };
        let tap_len = analyzer.fft_size;
        let engine = RenderEngine::new(
            &config.render,
            analyzer,
            config.detection,
            config.visual,
            assets,
        );
        debug!("Session output: {}", output.name());
        Self {
            output,
            slot,
            clock: None,
            track_path: None,
            duration: 0.0,
            graph_config: config.graph,
            tap_len,
            effects: EffectParameters::default(),
            presets,
            engine,
        }
    }

    /// Decode `path` and make it the active track.
    ///
    /// Decoding happens before anything is torn down, so a failed load
    /// leaves the current track playing.
    pub fn load_track(&mut self, path: &Path, beats: Vec<f64>) -> Result<(), SessionError> {
        let track = Arc::new(TrackBuffer::open_wav(path)?);
        let sample_rate = self.output.sample_rate();

        let graph = match &self.output {
            AudioOutput::Silent => AudioGraph::passthrough(sample_rate),
            _ => match AudioGraph::new(sample_rate, self.graph_config.clone(), self.tap_len) {
                Ok(mut graph) => {
                    graph.connect();
                    graph
                }
                Err(e) => {
                    warn!("{}; playing without effects", e);
                    AudioGraph::passthrough(sample_rate)
                }
            },
        };

        let element = MediaElement::new(Arc::clone(&track));
        let clock = element.clock();
        let mut playback = Playback::new(element, graph);
        playback.configure(&self.effects);
        let tap = playback.graph.analyzer_tap();

        // The previous graph is dropped while the slot is held, before the
        // new source renders anything
        {
            let mut slot = self.slot.lock();
            *slot = Some(playback);
        }

        info!(
            "Loaded {} ({:.1}s, {} beats{})",
            path.display(),
            track.duration_s(),
            beats.len(),
            if beats.is_empty() { ", live detection" } else { "" }
        );
        self.duration = track.duration_s();
        self.engine.load_track(beats, tap, self.duration);
        self.clock = Some(clock);
        self.track_path = Some(path.to_path_buf());
        Ok(())
    }

    pub fn track_path(&self) -> Option<&Path> {
        self.track_path.as_deref()
    }

    pub fn duration(&self) -> f64 {
        self.duration
    }

    pub fn output(&self) -> &AudioOutput {
        &self.output
    }

    fn with_playback<R>(&self, f: impl FnOnce(&mut Playback) -> R) -> Result<R, SessionError> {
        let mut slot = self.slot.lock();
        slot.as_mut().map(f).ok_or(SessionError::NoTrack)
    }

    /// Start or resume playback, resuming the output context first
    pub fn play(&mut self) -> Result<(), SessionError> {
        if let AudioOutput::Device(ctx) = &mut self.output {
            ctx.resume();
        }
        self.with_playback(|p| p.element.play())
    }

    pub fn pause(&mut self) -> Result<(), SessionError> {
        self.with_playback(|p| p.element.pause())
    }

    pub fn toggle_play(&mut self) -> Result<(), SessionError> {
        if self.is_playing() {
            self.pause()
        } else {
            self.play()
        }
    }

    /// Pause and rewind
    pub fn stop(&mut self) -> Result<(), SessionError> {
        self.with_playback(|p| p.element.stop())
    }

    pub fn seek(&mut self, seconds: f64) -> Result<(), SessionError> {
        self.with_playback(|p| p.element.seek(seconds))
    }

    /// Seek to a fraction (0..1) of the track
    pub fn seek_fraction(&mut self, fraction: f32) -> Result<(), SessionError> {
        let fraction = if fraction.is_finite() { fraction.clamp(0.0, 1.0) } else { 0.0 };
        self.seek(self.duration * fraction as f64)
    }

    pub fn is_playing(&self) -> bool {
        self.clock.as_ref().is_some_and(|c| c.is_playing())
    }

    pub fn current_time(&self) -> f64 {
        self.clock.as_ref().map_or(0.0, |c| c.current_time())
    }

    pub fn effects(&self) -> &EffectParameters {
        &self.effects
    }

    /// Apply effect parameters (clamped) to the live graph
    pub fn set_effects(&mut self, params: &EffectParameters) {
        self.effects = params.clamped();
        let effects = self.effects;
        self.engine.set_effects(&effects);
        // Nothing to re-target before a track is loaded
        let _ = self.with_playback(|p| p.configure(&effects));
    }

    pub fn set_effect(&mut self, control: EffectControl, value: f32) {
        let mut params = self.effects;
        params.set(control, value);
        self.set_effects(&params);
    }

    pub fn presets(&self) -> &PresetStore {
        &self.presets
    }

    /// Load a preset into the effects rack
    pub fn apply_preset(&mut self, name: &str) -> Result<(), SessionError> {
        let params = self.presets.load(name)?;
        self.set_effects(&params);
        info!("Applied preset '{}'", name.trim());
        Ok(())
    }

    /// Save the current effects as a preset
    pub fn save_preset(&mut self, name: &str) -> Result<(), SessionError> {
        self.presets.save(name, &self.effects)?;
        Ok(())
    }

    pub fn delete_preset(&mut self, name: &str) -> Result<(), SessionError> {
        self.presets.delete(name)?;
        Ok(())
    }

    pub fn engine(&self) -> &RenderEngine {
        &self.engine
    }

    pub fn engine_mut(&mut self) -> &mut RenderEngine {
        &mut self.engine
    }

    /// Advance one frame: move the clock when there is no device, render
    /// the engine, then act on what the active mode asked for.
    ///
    /// Returns the engine events of this frame.
    pub fn tick(&mut self, dt: f64) -> Result<Vec<EngineEvent>, SessionError> {
        match &mut self.output {
            AudioOutput::Device(_) => {}
            AudioOutput::Silent => {
                let mut slot = self.slot.lock();
                if let Some(playback) = slot.as_mut() {
                    playback.element.advance(dt);
                }
            }
            AudioOutput::Offline(out) => {
                let mut slot = self.slot.lock();
                out.render(slot.as_mut(), dt)?;
            }
        }

        let idle = IdleClock;
        let clock: &dyn PlaybackClock = match &self.clock {
            Some(clock) => clock,
            None => &idle,
        };
        self.engine.tick(clock, dt);

        let events = self.engine.drain_events();
        for event in &events {
            match event {
                EngineEvent::Mode(ModeEvent::SeekFraction(fraction)) => {
                    if let Err(e) = self.seek_fraction(*fraction) {
                        debug!("Seek ignored: {}", e);
                    }
                }
                EngineEvent::Mode(ModeEvent::RequestPlay) => {
                    if let Err(e) = self.play() {
                        warn!("Play request ignored: {}", e);
                    }
                }
                EngineEvent::Mode(ModeEvent::SessionEnded { hits, misses }) => {
                    info!("Game over: {} hits, {} misses", hits, misses);
                }
                EngineEvent::Fault(_) => {}
            }
        }
        Ok(events)
    }

    /// Flush a recording to disk. Does nothing for live outputs.
    pub fn finish(&mut self) -> Result<(), SessionError> {
        if let AudioOutput::Offline(out) = &mut self.output {
            out.finish()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PresetError;
    use crate::modes::ModeKind;
    use crate::presets::MemoryStore;
    use approx::assert_relative_eq;

    fn write_wav(path: &Path, seconds: f32, rate: u32) {
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(path, spec).unwrap();
        let n = (seconds * rate as f32) as usize;
        for i in 0..n {
            let t = i as f32 / rate as f32;
            let s = (t * 220.0 * std::f32::consts::TAU).sin() * 0.5;
            writer.write_sample((s * i16::MAX as f32) as i16).unwrap();
        }
        writer.finalize().unwrap();
    }

    fn presets() -> PresetStore {
        PresetStore::open(Box::new(MemoryStore::new()))
    }

    fn silent() -> Session {
        Session::silent(SessionConfig::default(), presets(), ModeAssets::default())
    }

    #[test]
    fn test_transport_without_track() {
        let mut session = silent();
        assert!(matches!(session.play(), Err(SessionError::NoTrack)));
        assert!(!session.is_playing());
        assert!(session.tick(0.016).unwrap().is_empty());
    }

    #[test]
    fn test_silent_clock_follows_frames() {
        let dir = tempfile::tempdir().unwrap();
        let wav = dir.path().join("tone.wav");
        write_wav(&wav, 2.0, 8000);

        let mut session = silent();
        session.load_track(&wav, vec![0.5, 1.0]).unwrap();
        assert_relative_eq!(session.duration(), 2.0);
        session.engine_mut().start();
        session.play().unwrap();
        for _ in 0..30 {
            session.tick(0.02).unwrap();
        }
        assert_relative_eq!(session.current_time(), 0.6, epsilon = 1e-6);
        assert_eq!(session.engine().beat_count(), 1);

        session.seek_fraction(0.25).unwrap();
        assert_relative_eq!(session.current_time(), 0.5, epsilon = 1e-6);
        session.stop().unwrap();
        assert!(!session.is_playing());
        assert_eq!(session.current_time(), 0.0);
    }

    #[test]
    fn test_beat_at_track_end_is_emitted() {
        let dir = tempfile::tempdir().unwrap();
        let wav = dir.path().join("short.wav");
        write_wav(&wav, 1.0, 8000);

        let mut session = silent();
        session.load_track(&wav, vec![0.5, 0.99]).unwrap();
        session.engine_mut().start();
        session.play().unwrap();
        for _ in 0..70 {
            session.tick(1.0 / 60.0).unwrap();
        }
        assert!(!session.is_playing());
        assert_eq!(session.engine().beat_count(), 2);
    }

    #[test]
    fn test_failed_load_keeps_current_track() {
        let dir = tempfile::tempdir().unwrap();
        let good = dir.path().join("good.wav");
        write_wav(&good, 1.0, 8000);
        let bad = dir.path().join("bad.wav");
        std::fs::write(&bad, b"definitely not audio").unwrap();

        let mut session = silent();
        session.load_track(&good, Vec::new()).unwrap();
        session.play().unwrap();

        let err = session.load_track(&bad, Vec::new()).unwrap_err();
        assert!(matches!(err, SessionError::Audio(AudioError::Decode { .. })));
        assert_eq!(session.track_path(), Some(good.as_path()));
        assert!(session.is_playing());
    }

    #[test]
    fn test_presets_drive_effects() {
        let mut session = silent();
        session.apply_preset("Chillout").unwrap();
        assert_eq!(session.effects().reverb_wet, 0.45);

        session.set_effect(EffectControl::DelayFeedback, 4.0);
        assert_eq!(session.effects().delay_feedback, 0.95);
        session.save_preset("Echo").unwrap();
        assert_eq!(session.presets().load("Echo").unwrap().delay_feedback, 0.95);

        assert!(matches!(
            session.apply_preset("Missing"),
            Err(SessionError::Preset(PresetError::NotFound(_)))
        ));
        session.delete_preset("Echo").unwrap();
        assert_eq!(session.presets().len(), 3);
    }

    #[test]
    fn test_offline_recording_matches_frame_time() {
        let dir = tempfile::tempdir().unwrap();
        let track = dir.path().join("in.wav");
        write_wav(&track, 1.0, 44100);
        let out = dir.path().join("out.wav");

        let mut session = Session::offline(
            SessionConfig::default(),
            presets(),
            ModeAssets::default(),
            &out,
        )
        .unwrap();
        session.load_track(&track, Vec::new()).unwrap();
        session.engine_mut().select_mode(ModeKind::CircularWaveform);
        session.engine_mut().start();
        session.play().unwrap();
        for _ in 0..30 {
            session.tick(1.0 / 60.0).unwrap();
        }
        session.finish().unwrap();

        let reader = hound::WavReader::open(&out).unwrap();
        assert_eq!(reader.spec().channels, 2);
        let frames = reader.len() / 2;
        assert!((22049..=22050).contains(&frames), "frames {frames}");
        assert_relative_eq!(session.current_time(), 0.5, epsilon = 1e-3);
    }

    #[test]
    fn test_beat_list_parsing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("beats.json");
        std::fs::write(&path, "[2.0, 0.5, -1.0, 1.0]").unwrap();
        assert_eq!(read_beat_list(&path).unwrap(), vec![2.0, 0.5, -1.0, 1.0]);

        std::fs::write(&path, "{\"beats\": 3}").unwrap();
        assert!(matches!(
            read_beat_list(&path),
            Err(SessionError::BeatList { .. })
        ));
    }
}
