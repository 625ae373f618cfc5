// Static lookup tables: obstacle geometry/behavior and the scenario catalog.

use super::state::Scenario;
use std::fmt;
use std::str::FromStr;

/// Closed set of obstacle kinds a player can claim and place.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ObstacleType {
    Platform,
    Spike,
    Spring,
    Hammer,
    Saw,
    Cannon,
    Wall,
    Crossbow,
}

/// Bounding box size in world units.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Size {
    pub width: f32,
    pub height: f32,
}

/// How the physics step reacts to overlapping an obstacle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollisionBehavior {
    /// Launches the player upward and restores both jumps.
    Bounce,
    /// Kills on contact; `knockback` also pushes the player sideways.
    Lethal { knockback: bool },
    /// Blocks movement; resolved along the dominant axis.
    Solid,
    /// Rendered only. Hammer, cannon and crossbow have no contact rule of their own.
    Decorative,
}

impl ObstacleType {
    pub const ALL: [ObstacleType; 8] = [
        ObstacleType::Spike,
        ObstacleType::Platform,
        ObstacleType::Spring,
        ObstacleType::Hammer,
        ObstacleType::Saw,
        ObstacleType::Cannon,
        ObstacleType::Wall,
        ObstacleType::Crossbow,
    ];

    /// Hitbox size. The only source of obstacle dimensions; sizes are never sent on the wire.
    pub fn size(self) -> Size {
        let (width, height) = match self {
            ObstacleType::Platform => (60.0, 15.0),
            ObstacleType::Spike => (30.0, 40.0),
            ObstacleType::Spring => (25.0, 20.0),
            ObstacleType::Hammer => (35.0, 35.0),
            ObstacleType::Saw => (40.0, 40.0),
            ObstacleType::Cannon => (45.0, 30.0),
            ObstacleType::Wall => (20.0, 100.0),
            ObstacleType::Crossbow => (40.0, 30.0),
        };
        Size { width, height }
    }

    pub fn behavior(self) -> CollisionBehavior {
        match self {
            ObstacleType::Spring => CollisionBehavior::Bounce,
            ObstacleType::Spike => CollisionBehavior::Lethal { knockback: true },
            ObstacleType::Saw => CollisionBehavior::Lethal { knockback: false },
            ObstacleType::Platform | ObstacleType::Wall => CollisionBehavior::Solid,
            ObstacleType::Hammer | ObstacleType::Cannon | ObstacleType::Crossbow => {
                CollisionBehavior::Decorative
            }
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ObstacleType::Platform => "platform",
            ObstacleType::Spike => "spike",
            ObstacleType::Spring => "spring",
            ObstacleType::Hammer => "hammer",
            ObstacleType::Saw => "saw",
            ObstacleType::Cannon => "cannon",
            ObstacleType::Wall => "wall",
            ObstacleType::Crossbow => "crossbow",
        }
    }
}

impl fmt::Display for ObstacleType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownObstacleType(pub String);

impl FromStr for ObstacleType {
    type Err = UnknownObstacleType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ObstacleType::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| UnknownObstacleType(s.to_string()))
    }
}

struct ScenarioEntry {
    id: &'static str,
    name: &'static str,
    background: &'static str,
    ground_y: f32,
}

const SCENARIOS: [ScenarioEntry; 5] = [
    ScenarioEntry {
        id: "volcano",
        name: "Blazing Volcano",
        background: "#ff4444",
        ground_y: 150.0,
    },
    ScenarioEntry {
        id: "farm",
        name: "Crazy Farm",
        background: "#44aa44",
        ground_y: 180.0,
    },
    ScenarioEntry {
        id: "city",
        name: "Chaotic City",
        background: "#4444aa",
        ground_y: 200.0,
    },
    ScenarioEntry {
        id: "space",
        name: "Space Station",
        background: "#220033",
        ground_y: 120.0,
    },
    ScenarioEntry {
        id: "jungle",
        name: "Wild Jungle",
        background: "#228844",
        ground_y: 160.0,
    },
];

impl From<&ScenarioEntry> for Scenario {
    fn from(entry: &ScenarioEntry) -> Self {
        Self {
            id: entry.id.to_string(),
            name: entry.name.to_string(),
            background: entry.background.to_string(),
            ground_y: entry.ground_y,
        }
    }
}

/// All selectable scenarios, in menu order.
pub fn scenarios() -> Vec<Scenario> {
    SCENARIOS.iter().map(Scenario::from).collect()
}

pub fn find_scenario(id: &str) -> Option<Scenario> {
    SCENARIOS
        .iter()
        .find(|entry| entry.id == id)
        .map(Scenario::from)
}
