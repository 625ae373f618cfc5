// Use-case level inputs/outputs: peer events and commands, presentation intents and notices.

use crate::domain::systems::physics::ControlInput;
use crate::domain::{
    LocalBody, Obstacle, ObstacleType, Phase, Player, PlayerId, Projectile, RoomState, Scenario,
};
use std::collections::HashMap;
use std::fmt;
use tokio::sync::oneshot;

/// Room-wide notifications pushed by the session host.
#[derive(Debug, Clone)]
pub enum Broadcast {
    RoomUpdate(RoomState),
    PlayerMoved(Player),
    RoundStarted {
        obstacles: Vec<Obstacle>,
        scenario: Option<Scenario>,
        players: HashMap<PlayerId, Player>,
    },
    ScenarioSelection,
    BuildingPhase {
        scenario: Scenario,
    },
    ObstacleAdded(Obstacle),
    /// Whole obstacle list replacement.
    ObstaclesUpdate(Vec<Obstacle>),
    ItemTaken(ObstacleType),
    StartPlaying,
    ProjectilesUpdate(Vec<Projectile>),
    RoundEnd {
        new_points: HashMap<PlayerId, u32>,
    },
    GameWinner {
        winner_id: PlayerId,
    },
    RoomReset,
    NewHost {
        host_id: PlayerId,
    },
}

/// Everything the peer link reports to the session.
#[derive(Debug, Clone)]
pub enum PeerEvent {
    /// A connection is up and the host assigned this client an id.
    Connected { self_id: PlayerId },
    Disconnected,
    /// Reconnect attempts are exhausted.
    Unreachable,
    Broadcast(Broadcast),
}

/// Calls that expect an acknowledgment.
#[derive(Debug, Clone, PartialEq)]
pub enum Request {
    JoinRoom {
        room_id: String,
        name: String,
        character: String,
    },
    CreateRoom {
        room_id: String,
        name: String,
        character: String,
    },
    RoomSnapshot,
    ClaimItem(ObstacleType),
}

#[derive(Debug, Clone)]
pub enum Reply {
    Accepted,
    Room(RoomState),
}

/// Fire-and-forget messages. All are idempotent on the host except `PlaceObstacle`.
#[derive(Debug, Clone, PartialEq)]
pub enum Notify {
    StartScenarioSelection,
    SelectScenario(Scenario),
    StartRound,
    ResetRoom,
    PlaceObstacle(Obstacle),
    ItemPlaced,
    SkipItemSelection,
    PlayerUpdate { x: f32, y: f32 },
    PlayerDied,
    ReachedFlag,
    ChangeCharacter(String),
    LeaveRoom,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkError {
    Disconnected,
    Timeout,
    Rejected(String),
    Closed,
}

impl fmt::Display for LinkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LinkError::Disconnected => f.write_str("connection lost"),
            LinkError::Timeout => f.write_str("acknowledgment timed out"),
            LinkError::Rejected(reason) => write!(f, "rejected: {reason}"),
            LinkError::Closed => f.write_str("peer link closed"),
        }
    }
}

pub type ReplySender = oneshot::Sender<Result<Reply, LinkError>>;

/// Session-to-peer traffic.
#[derive(Debug)]
pub enum PeerCommand {
    Notify(Notify),
    Request {
        request: Request,
        reply: ReplySender,
    },
}

/// User actions forwarded by the presentation layer.
#[derive(Debug, Clone, PartialEq)]
pub enum Intent {
    StartScenarioSelection,
    SelectScenario(String),
    StartRound,
    ResetRoom,
    ClaimItem(ObstacleType),
    DragProvisional { x: f32, y: f32 },
    CommitPlacement,
    SkipItem,
    /// Raw drag offset of the on-screen stick.
    Stick { dx: f32, dy: f32 },
    Jump,
    ChangeCharacter(String),
    Leave,
}

/// User-visible, non-fatal conditions.
#[derive(Debug, Clone, PartialEq)]
pub enum Notice {
    PhaseChanged { from: Phase, to: Phase },
    HostOnly { action: &'static str },
    WrongPhase { action: &'static str, phase: Phase },
    ItemUnavailable(ObstacleType),
    ClaimLost(ObstacleType),
    ClaimUnconfirmed(ObstacleType),
    UnknownScenario(String),
    AutoSkipped,
    PlacementExpired,
    BecameHost,
    Disconnected,
    Reconnected,
    JoinFailed(String),
    Winner { name: String },
    PeerUnreachable,
}

impl fmt::Display for Notice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Notice::PhaseChanged { from, to } => write!(f, "phase {from} -> {to}"),
            Notice::HostOnly { action } => write!(f, "only the host can {action}"),
            Notice::WrongPhase { action, phase } => {
                write!(f, "cannot {action} during phase {phase}")
            }
            Notice::ItemUnavailable(kind) => {
                write!(f, "{kind} was already taken by another player")
            }
            Notice::ClaimLost(kind) => write!(f, "another player claimed {kind} first"),
            Notice::ClaimUnconfirmed(kind) => {
                write!(f, "claim for {kind} was not confirmed; pick again")
            }
            Notice::UnknownScenario(id) => write!(f, "unknown scenario {id}"),
            Notice::AutoSkipped => f.write_str("item selection timed out; skipped"),
            Notice::PlacementExpired => f.write_str("placement timed out; item discarded"),
            Notice::BecameHost => f.write_str("you are now the host"),
            Notice::Disconnected => f.write_str("disconnected; reconnecting"),
            Notice::Reconnected => f.write_str("reconnected"),
            Notice::JoinFailed(reason) => write!(f, "could not join room: {reason}"),
            Notice::Winner { name } => write!(f, "{name} wins the game"),
            Notice::PeerUnreachable => f.write_str("server unreachable"),
        }
    }
}

/// Obstacle held between a granted claim and its placement.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProvisionalObstacle {
    pub kind: ObstacleType,
    pub x: f32,
    pub y: f32,
}

/// Render snapshot published after every processed input.
#[derive(Debug, Clone)]
pub struct SessionView {
    pub self_id: Option<PlayerId>,
    pub connected: bool,
    pub phase: Phase,
    pub is_host: bool,
    pub room: RoomState,
    pub projectiles: Vec<Projectile>,
    pub body: LocalBody,
    pub control: ControlInput,
    pub camera_x: f32,
    pub disabled_items: Vec<ObstacleType>,
    /// Claim sent but not yet acknowledged.
    pub pending_claim: Option<ObstacleType>,
    pub provisional: Option<ProvisionalObstacle>,
    pub item_seconds_left: Option<u32>,
    pub placement_seconds_left: Option<u32>,
    pub round_seconds_left: Option<u32>,
    pub round_number: u32,
    pub winner: Option<String>,
}
