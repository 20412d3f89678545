//! Parameter definitions with physical units and documented semantics.
//!
//! All tunable numbers are extracted here with:
//! - Physical units (seconds, Hz, dB, pixels)
//! - Documented ranges and meanings
//! - Clamping helpers where user input flows in

mod audio;
mod effects;
mod render;
mod visual;

// Re-export all types
pub use audio::{audio_constants, AnalyzerConfig, BeatDetection, GraphConfig};
pub use effects::{
    EffectControl, EffectParameters, BASS_DB_RANGE, DELAY_FEEDBACK_RANGE, DELAY_TIME_MS_RANGE,
    PAN_RANGE, PLAYBACK_RATE_RANGE, REVERB_WET_RANGE, SWEEP_HZ_RANGE, TREBLE_DB_RANGE,
    VOLUME_RANGE,
};
pub use render::{RecordingConfig, RenderConfig};
pub use visual::{
    ColorTheme, Palette, RetroGridOptions, VisualParams, ELEMENT_COUNT_RANGE, SENSITIVITY_RANGE,
};
