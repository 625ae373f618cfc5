use crate::domain::catalog::CollisionBehavior;
use crate::domain::state::{LocalBody, Obstacle};
use crate::domain::tuning::{LevelTuning, PhysicsTuning};

/// Axis-aligned box anchored at its top-left corner (+y down).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Aabb {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl Aabb {
    pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Strict overlap; touching edges do not count.
    pub fn overlaps(&self, other: &Aabb) -> bool {
        self.x < other.x + other.width
            && self.x + self.width > other.x
            && self.y < other.y + other.height
            && self.y + self.height > other.y
    }

    pub fn center(&self) -> (f32, f32) {
        (self.x + self.width / 2.0, self.y + self.height / 2.0)
    }
}

/// What an obstacle contact did to the body this frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Contact {
    None,
    Launched,
    Killed,
    PushedSideways,
    PushedDown,
    Landed,
}

pub fn player_bounds(body: &LocalBody, level: &LevelTuning) -> Aabb {
    Aabb::new(body.x, body.y, level.player_size, level.player_size)
}

/// Applies one obstacle's contact rule. Returns `Contact::None` when the boxes do not overlap.
pub fn resolve_obstacle(
    body: &mut LocalBody,
    obstacle: &Obstacle,
    tuning: &PhysicsTuning,
    level: &LevelTuning,
) -> Contact {
    let player = player_bounds(body, level);
    let bounds = obstacle.bounds();
    if !player.overlaps(&bounds) {
        return Contact::None;
    }

    match obstacle.kind.behavior() {
        CollisionBehavior::Bounce => {
            // Springs fire even for dead players.
            body.vy = tuning.jump_force * tuning.spring_multiplier;
            body.jump_count = 0;
            Contact::Launched
        }
        CollisionBehavior::Lethal { knockback } => {
            if knockback {
                body.vx = if body.x < bounds.x {
                    -tuning.spike_knockback
                } else {
                    tuning.spike_knockback
                };
            }
            Contact::Killed
        }
        CollisionBehavior::Solid => resolve_solid(body, &player, &bounds, tuning, level),
        CollisionBehavior::Decorative => Contact::None,
    }
}

fn resolve_solid(
    body: &mut LocalBody,
    player: &Aabb,
    bounds: &Aabb,
    tuning: &PhysicsTuning,
    level: &LevelTuning,
) -> Contact {
    let (px, py) = player.center();
    let (ox, oy) = bounds.center();
    let dx = px - ox;
    let dy = py - oy;

    // Dominant axis decides the push direction; ties land vertically.
    if dx.abs() > dy.abs() {
        if dx > 0.0 {
            body.x = bounds.x + bounds.width;
            body.vx = tuning.wall_jump_force;
        } else {
            body.x = bounds.x - level.player_size;
            body.vx = -tuning.wall_jump_force;
        }
        Contact::PushedSideways
    } else if dy > 0.0 {
        body.y = bounds.y + bounds.height;
        body.vy = 0.0;
        Contact::PushedDown
    } else {
        body.y = bounds.y - level.player_size;
        body.vy = 0.0;
        body.grounded = true;
        body.jump_count = 0;
        Contact::Landed
    }
}
