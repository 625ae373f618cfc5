// Domain layer: room data, obstacle rules and the local player simulation.

pub mod catalog;
pub mod claims;
pub mod state;
pub mod systems;
pub mod tuning;

pub use catalog::{CollisionBehavior, ObstacleType};
pub use state::{
    Facing, LocalBody, Obstacle, Phase, Player, PlayerId, Projectile, ProjectileKind, RoomState,
    Scenario, Viewport,
};
