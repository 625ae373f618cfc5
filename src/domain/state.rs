// Domain-level room state and the local player's simulation body.

use super::catalog::{ObstacleType, Size};
use super::systems::collision::Aabb;
use std::collections::HashMap;
use std::fmt;

/// Opaque, peer-assigned player identifier.
pub type PlayerId = String;

#[derive(Debug, Clone, PartialEq)]
pub struct Player {
    pub id: PlayerId,
    pub name: String,
    pub character: String,
    pub x: f32,
    pub y: f32,
    // Only grows between rounds; reset with the room.
    pub points: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Obstacle {
    pub id: String,
    pub x: f32,
    pub y: f32,
    pub owner_id: PlayerId,
    pub kind: ObstacleType,
}

impl Obstacle {
    pub fn size(&self) -> Size {
        self.kind.size()
    }

    pub fn bounds(&self) -> Aabb {
        let size = self.size();
        Aabb::new(self.x, self.y, size.width, size.height)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Facing {
    Left,
    Right,
}

impl Facing {
    pub fn from_sign(sign: i64) -> Option<Self> {
        match sign {
            -1 => Some(Facing::Left),
            1 => Some(Facing::Right),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProjectileKind {
    Arrow,
}

/// Server-owned moving hazard. The local simulation only reacts to these.
#[derive(Debug, Clone, PartialEq)]
pub struct Projectile {
    pub id: String,
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub dir: Facing,
    pub kind: ProjectileKind,
}

impl Projectile {
    pub fn bounds(&self) -> Aabb {
        Aabb::new(self.x, self.y, self.width, self.height)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Scenario {
    pub id: String,
    pub name: String,
    pub background: String,
    /// Floor offset from the bottom of the viewport.
    pub ground_y: f32,
}

/// Room life-cycle stage. Round end is an event, not a phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    Waiting,
    ScenarioSelecting,
    Building,
    ItemSelection,
    Placing,
    WaitingForOthers,
    Playing,
    GameOver,
}

impl Phase {
    /// Sub-phases of a running round, tracked locally per player.
    pub fn is_round_phase(self) -> bool {
        matches!(
            self,
            Phase::ItemSelection | Phase::Placing | Phase::WaitingForOthers | Phase::Playing
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Phase::Waiting => "waiting",
            Phase::ScenarioSelecting => "selecting",
            Phase::Building => "building",
            Phase::ItemSelection => "itemSelection",
            Phase::Placing => "placing",
            Phase::WaitingForOthers => "waitingForOthers",
            Phase::Playing => "playing",
            Phase::GameOver => "gameOver",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Shared room state as last reported by the peer.
#[derive(Debug, Clone, PartialEq)]
pub struct RoomState {
    pub players: HashMap<PlayerId, Player>,
    pub obstacles: Vec<Obstacle>,
    pub phase: Phase,
    pub scenario: Option<Scenario>,
    pub host_id: PlayerId,
}

impl Default for RoomState {
    fn default() -> Self {
        Self {
            players: HashMap::new(),
            obstacles: Vec::new(),
            phase: Phase::Waiting,
            scenario: None,
            host_id: PlayerId::new(),
        }
    }
}

impl RoomState {
    pub fn is_host(&self, player_id: &str) -> bool {
        !player_id.is_empty() && self.host_id == player_id
    }

    /// Floor offset of the active scenario, or `fallback` when none is set.
    pub fn ground_y_or(&self, fallback: f32) -> f32 {
        self.scenario
            .as_ref()
            .map(|scenario| scenario.ground_y)
            .unwrap_or(fallback)
    }

    pub fn player_name(&self, player_id: &str) -> Option<&str> {
        self.players.get(player_id).map(|p| p.name.as_str())
    }
}

/// Output-only viewport size of the presentation layer.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Viewport {
    pub width: f32,
    pub height: f32,
}

/// Local player's motion state. Never broadcast; owned by the physics engine.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LocalBody {
    pub x: f32,
    pub y: f32,
    pub vx: f32,
    pub vy: f32,
    pub grounded: bool,
    pub jump_count: u8,
    pub dead: bool,
    pub finished: bool,
}

impl LocalBody {
    pub fn at(x: f32, y: f32) -> Self {
        Self {
            x,
            y,
            vx: 0.0,
            vy: 0.0,
            grounded: false,
            jump_count: 0,
            dead: false,
            finished: false,
        }
    }

    /// Dead or finished players stop steering and jumping.
    pub fn is_retired(&self) -> bool {
        self.dead || self.finished
    }
}
