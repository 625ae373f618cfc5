/// Level geometry shared by physics, camera and spawn logic.

#[derive(Debug, Clone, Copy)]
pub struct LevelTuning {
    /// Total scrollable width of the course.
    pub level_width: f32,

    /// Player hitbox edge (players are square).
    pub player_size: f32,

    pub flag_width: f32,
    pub flag_height: f32,

    /// Distance from the level's right edge to the flag's left edge.
    pub flag_inset: f32,

    /// Floor offset used when no scenario is active.
    pub default_ground_y: f32,

    /// Drag distance that maps to full stick deflection.
    pub stick_radius: f32,

    /// Height above the floor line where players respawn.
    pub spawn_offset: f32,
}

impl Default for LevelTuning {
    fn default() -> Self {
        Self {
            level_width: 2000.0,
            player_size: 30.0,
            flag_width: 30.0,
            flag_height: 50.0,
            flag_inset: 60.0,
            default_ground_y: 150.0,
            stick_radius: 40.0,
            spawn_offset: 30.0,
        }
    }
}

impl LevelTuning {
    /// Rightmost x the player's left edge may reach.
    pub fn max_player_x(&self) -> f32 {
        (self.level_width - self.player_size).max(0.0)
    }
}
