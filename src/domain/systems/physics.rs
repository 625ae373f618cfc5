use super::collision::{Aabb, Contact, player_bounds, resolve_obstacle};
use crate::domain::state::{LocalBody, Obstacle, Projectile, Viewport};
use crate::domain::tuning::{LevelTuning, PhysicsTuning};
use tracing::debug;

/// Normalized control state for one frame.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ControlInput {
    /// Horizontal stick deflection in [-1, 1].
    pub stick_x: f32,
}

/// Shared obstacles and projectiles as of the latest applied broadcast.
#[derive(Debug, Clone, Copy)]
pub struct WorldView<'a> {
    pub obstacles: &'a [Obstacle],
    pub projectiles: &'a [Projectile],
    pub ground_y: f32,
}

/// One-shot notifications produced by a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhysicsEvent {
    Died,
    ReachedFlag,
}

/// Maps a raw drag offset to a stick value, clamping the drag to `radius`.
pub fn normalize_stick(dx: f32, dy: f32, radius: f32) -> f32 {
    if radius <= 0.0 || !dx.is_finite() || !dy.is_finite() {
        return 0.0;
    }
    let distance = (dx * dx + dy * dy).sqrt();
    let x = if distance > radius {
        dx * radius / distance
    } else {
        dx
    };
    (x / radius).clamp(-1.0, 1.0)
}

/// Simulates the local player. The only writer of the local body.
#[derive(Debug, Clone)]
pub struct PhysicsEngine {
    body: LocalBody,
    tuning: PhysicsTuning,
    level: LevelTuning,
    viewport: Viewport,
    camera_x: f32,
}

impl PhysicsEngine {
    pub fn new(
        tuning: PhysicsTuning,
        level: LevelTuning,
        viewport: Viewport,
        ground_y: f32,
    ) -> Self {
        let mut engine = Self {
            body: LocalBody::at(0.0, 0.0),
            tuning,
            level,
            viewport,
            camera_x: 0.0,
        };
        engine.respawn(ground_y);
        engine
    }

    pub fn body(&self) -> &LocalBody {
        &self.body
    }

    pub fn camera_x(&self) -> f32 {
        self.camera_x
    }

    pub fn level(&self) -> &LevelTuning {
        &self.level
    }

    /// Floor line in screen coordinates for the given ground offset.
    pub fn floor_y(&self, ground_y: f32) -> f32 {
        self.viewport.height - ground_y
    }

    pub fn flag_bounds(&self, ground_y: f32) -> Aabb {
        Aabb::new(
            self.level.level_width - self.level.flag_inset,
            self.floor_y(ground_y) - self.level.flag_height,
            self.level.flag_width,
            self.level.flag_height,
        )
    }

    /// Starts a new life at the viewport center above the floor.
    pub fn respawn(&mut self, ground_y: f32) {
        let x = (self.viewport.width / 2.0).clamp(0.0, self.level.max_player_x());
        let y = self.floor_y(ground_y) - self.level.spawn_offset;
        let jump_count = self.body.jump_count;
        self.body = LocalBody::at(x, y);
        // Jumps reset only on ground or spring contact.
        self.body.jump_count = jump_count;
        self.update_camera();
    }

    /// Double jump. Returns false when the jump was not taken.
    pub fn jump(&mut self) -> bool {
        if self.body.is_retired() {
            return false;
        }
        if self.body.grounded || self.body.jump_count < self.tuning.max_jumps {
            self.body.vy = self.tuning.jump_force;
            self.body.jump_count = (self.body.jump_count + 1).min(self.tuning.max_jumps);
            self.body.grounded = false;
            return true;
        }
        false
    }

    /// Advances one rendered frame.
    pub fn step(&mut self, input: ControlInput, world: &WorldView<'_>) -> Vec<PhysicsEvent> {
        let mut events = Vec::new();
        let tuning = self.tuning;
        let level = self.level;

        self.apply_horizontal_control(input);

        self.body.vy = (self.body.vy + tuning.gravity).min(tuning.max_fall_speed);

        self.body.x += self.body.vx;
        self.body.y += self.body.vy;

        let floor = self.floor_y(world.ground_y) - level.player_size;
        if self.body.y >= floor {
            self.body.y = floor;
            self.body.vy = 0.0;
            self.body.grounded = true;
            self.body.jump_count = 0;
        } else {
            self.body.grounded = false;
        }

        let max_x = level.max_player_x();
        if self.body.x <= 0.0 {
            self.body.x = 0.0;
            self.body.vx = self.body.vx.abs() * tuning.edge_bounce;
        } else if self.body.x >= max_x {
            self.body.x = max_x;
            self.body.vx = -self.body.vx.abs() * tuning.edge_bounce;
        }

        for obstacle in world.obstacles {
            if resolve_obstacle(&mut self.body, obstacle, &tuning, &level) == Contact::Killed {
                self.kill(&mut events);
            }
        }

        let player = player_bounds(&self.body, &level);
        if world
            .projectiles
            .iter()
            .any(|projectile| player.overlaps(&projectile.bounds()))
        {
            self.kill(&mut events);
        }

        if !self.body.finished && player.overlaps(&self.flag_bounds(world.ground_y)) {
            self.body.finished = true;
            debug!(x = self.body.x, y = self.body.y, "flag reached");
            events.push(PhysicsEvent::ReachedFlag);
        }

        // Solid pushes may land outside the course; the position bound always holds.
        self.body.x = self.body.x.clamp(0.0, max_x);

        self.update_camera();
        events
    }

    fn apply_horizontal_control(&mut self, input: ControlInput) {
        let stick = if input.stick_x.is_finite() {
            input.stick_x.clamp(-1.0, 1.0)
        } else {
            0.0
        };

        if self.body.is_retired() {
            self.body.vx = 0.0;
        } else if stick.abs() > self.tuning.stick_deadzone {
            self.body.vx = stick * self.tuning.move_speed;
        } else {
            self.body.vx *= self.tuning.friction;
        }
    }

    fn kill(&mut self, events: &mut Vec<PhysicsEvent>) {
        if !self.body.dead {
            self.body.dead = true;
            debug!(x = self.body.x, y = self.body.y, "player died");
            events.push(PhysicsEvent::Died);
        }
    }

    fn update_camera(&mut self) {
        let max_offset = self.level.level_width - self.viewport.width;
        self.camera_x = (self.body.x - self.viewport.width / 2.0)
            .min(max_offset)
            .max(0.0);
    }
}
