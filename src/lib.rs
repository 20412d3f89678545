//! SonicPlay library - beat-driven visuals and an effects rack for a
//! playing track

pub mod audio;
pub mod beat;
pub mod canvas;
pub mod cli;
pub mod engine;
pub mod error;
pub mod frame;
pub mod modes;
pub mod params;
pub mod presets;
pub mod rendering;
pub mod session;
pub mod spectrum;
