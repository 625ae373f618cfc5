// Gameplay tuning, kept apart from runtime configuration (URLs, timeouts, channel sizes).

pub mod level;
pub mod physics;
pub mod round;

pub use level::LevelTuning;
pub use physics::PhysicsTuning;
pub use round::RoundTuning;
