/// Per-frame movement constants for the local player.
///
/// Values are per rendered frame, tuned for roughly 60 frames per second.
/// Screen coordinates: +y points down, so jump forces are negative.

#[derive(Debug, Clone, Copy)]
pub struct PhysicsTuning {
    /// Added to vertical velocity every frame.
    pub gravity: f32,

    /// Vertical velocity applied by a jump.
    pub jump_force: f32,

    /// Horizontal speed at full stick deflection.
    pub move_speed: f32,

    /// Downward speed cap.
    pub max_fall_speed: f32,

    /// Horizontal velocity multiplier per frame with the stick at rest.
    pub friction: f32,

    /// Horizontal impulse away from a wall after a side contact.
    pub wall_jump_force: f32,

    /// Spring launch as a multiple of `jump_force`.
    pub spring_multiplier: f32,

    /// Horizontal knockback speed from a spike.
    pub spike_knockback: f32,

    /// Share of outward velocity reflected at the level edges.
    pub edge_bounce: f32,

    /// Stick magnitudes at or below this are treated as released.
    pub stick_deadzone: f32,

    /// Jumps available before touching ground or a spring again.
    pub max_jumps: u8,
}

impl Default for PhysicsTuning {
    fn default() -> Self {
        Self {
            gravity: 0.8,
            jump_force: -15.0,
            move_speed: 5.0,
            max_fall_speed: 12.0,
            friction: 0.8,
            wall_jump_force: 12.0,
            spring_multiplier: 1.5,
            spike_knockback: 8.0,
            edge_bounce: 0.7,
            stick_deadzone: 0.1,
            max_jumps: 2,
        }
    }
}
