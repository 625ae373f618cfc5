pub mod collision;
pub mod physics;

pub use physics::{ControlInput, PhysicsEngine, PhysicsEvent, WorldView};
