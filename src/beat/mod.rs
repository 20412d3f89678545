//! Beat timing: scheduled beat lists and the energy fallback.

mod clock;
mod detector;

pub use clock::{BeatClock, BeatEvent, BeatSource};
pub use detector::EnergyDetector;
