// Wire protocol DTOs and conversions for the room host connection.
// Every message is JSON shaped as {"type": ..., "data": ...}.

use crate::domain::{
    Facing, Obstacle, ObstacleType, Phase, Player, Projectile, ProjectileKind, RoomState, Scenario,
};
use crate::domain::tuning::LevelTuning;
use crate::use_cases::{Broadcast, LinkError, Notify, Reply, Request};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::warn;

/// Messages the room host sends to this client.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "camelCase")]
pub enum ServerMessage {
    // Id the host assigned to this connection.
    Identity(IdentityDto),
    // Answer to a message that carried a request id.
    Ack(AckDto),
    RoomUpdate(RoomDto),
    PlayerMoved(PlayerDto),
    RoundStarted(RoundStartedDto),
    ScenarioSelection,
    BuildingPhase(BuildingPhaseDto),
    ObstacleAdded(ObstacleDto),
    ObstaclesUpdate(Vec<ObstacleDto>),
    ItemTaken(ItemTakenDto),
    StartPlaying,
    ProjectilesUpdate(Vec<ProjectileDto>),
    RoundEnd(RoundEndDto),
    GameWinner(GameWinnerDto),
    RoomReset,
    NewHost(NewHostDto),
}

/// Messages this client sends to the room host.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "camelCase")]
pub enum ClientMessage {
    JoinRoom(JoinRoomDto),
    CreateRoom(JoinRoomDto),
    RequestRoomUpdate(RoomRequestDto),
    SelectItem(SelectItemDto),
    StartScenarioSelection(RoomRefDto),
    SelectScenario(SelectScenarioDto),
    StartRound(RoomRefDto),
    ResetRoom(RoomRefDto),
    PlaceObstacle(PlaceObstacleDto),
    ItemPlaced(RoomRefDto),
    SkipItemSelection(RoomRefDto),
    PlayerUpdate(PlayerUpdateDto),
    PlayerDied(RoomRefDto),
    ReachedFlag(RoomRefDto),
    ChangeCharacter(ChangeCharacterDto),
    LeaveRoom(RoomRefDto),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdentityDto {
    pub player_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AckDto {
    pub request_id: u64,
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub room: Option<RoomDto>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomRefDto {
    pub room_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomRequestDto {
    pub request_id: u64,
    pub room_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinRoomDto {
    pub request_id: u64,
    pub room_id: String,
    pub name: String,
    pub character: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SelectItemDto {
    pub request_id: u64,
    pub room_id: String,
    pub item_type: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SelectScenarioDto {
    pub room_id: String,
    pub scenario: ScenarioDto,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaceObstacleDto {
    pub room_id: String,
    pub obstacle: ObstacleDto,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerUpdateDto {
    pub room_id: String,
    pub x: f32,
    pub y: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeCharacterDto {
    pub room_id: String,
    pub character: String,
}

/// Phase names as the host spells them. Anything else decodes as `Unknown`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PhaseDto {
    Waiting,
    Selecting,
    Building,
    ItemSelection,
    Placing,
    WaitingForOthers,
    Playing,
    GameOver,
    #[serde(other)]
    Unknown,
}

impl From<PhaseDto> for Phase {
    fn from(phase: PhaseDto) -> Self {
        match phase {
            PhaseDto::Waiting => Phase::Waiting,
            PhaseDto::Selecting => Phase::ScenarioSelecting,
            PhaseDto::Building => Phase::Building,
            PhaseDto::ItemSelection => Phase::ItemSelection,
            PhaseDto::Placing => Phase::Placing,
            PhaseDto::WaitingForOthers => Phase::WaitingForOthers,
            PhaseDto::Playing => Phase::Playing,
            PhaseDto::GameOver => Phase::GameOver,
            PhaseDto::Unknown => {
                warn!("unknown phase from host; falling back to waiting");
                Phase::Waiting
            }
        }
    }
}

impl From<Phase> for PhaseDto {
    fn from(phase: Phase) -> Self {
        match phase {
            Phase::Waiting => PhaseDto::Waiting,
            Phase::ScenarioSelecting => PhaseDto::Selecting,
            Phase::Building => PhaseDto::Building,
            Phase::ItemSelection => PhaseDto::ItemSelection,
            Phase::Placing => PhaseDto::Placing,
            Phase::WaitingForOthers => PhaseDto::WaitingForOthers,
            Phase::Playing => PhaseDto::Playing,
            Phase::GameOver => PhaseDto::GameOver,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerDto {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub character: String,
    #[serde(default)]
    pub x: f32,
    #[serde(default)]
    pub y: f32,
    #[serde(default)]
    pub points: i64,
}

impl From<PlayerDto> for Player {
    fn from(player: PlayerDto) -> Self {
        Self {
            id: player.id,
            name: player.name,
            character: player.character,
            x: player.x,
            y: player.y,
            points: clamp_points(player.points),
        }
    }
}

impl From<&Player> for PlayerDto {
    fn from(player: &Player) -> Self {
        Self {
            id: player.id.clone(),
            name: player.name.clone(),
            character: player.character.clone(),
            x: player.x,
            y: player.y,
            points: i64::from(player.points),
        }
    }
}

/// Obstacle on the wire. Size is never sent; it follows from the type.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObstacleDto {
    pub id: String,
    pub x: f32,
    pub y: f32,
    pub owner_id: String,
    #[serde(rename = "type")]
    pub kind: String,
}

impl ObstacleDto {
    /// Drops obstacles of unknown type instead of failing the whole message.
    pub fn into_domain(self) -> Option<Obstacle> {
        match self.kind.parse::<ObstacleType>() {
            Ok(kind) => Some(Obstacle {
                id: self.id,
                x: self.x,
                y: self.y,
                owner_id: self.owner_id,
                kind,
            }),
            Err(e) => {
                warn!(id = %self.id, kind = %e.0, "dropping obstacle of unknown type");
                None
            }
        }
    }
}

impl From<&Obstacle> for ObstacleDto {
    fn from(obstacle: &Obstacle) -> Self {
        Self {
            id: obstacle.id.clone(),
            x: obstacle.x,
            y: obstacle.y,
            owner_id: obstacle.owner_id.clone(),
            kind: obstacle.kind.as_str().to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectileDto {
    pub id: String,
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub dir: i64,
    #[serde(rename = "type")]
    pub kind: String,
}

impl ProjectileDto {
    pub fn into_domain(self) -> Option<Projectile> {
        let kind = match self.kind.as_str() {
            "arrow" => ProjectileKind::Arrow,
            other => {
                warn!(id = %self.id, kind = other, "dropping projectile of unknown type");
                return None;
            }
        };
        let Some(dir) = Facing::from_sign(self.dir) else {
            warn!(id = %self.id, dir = self.dir, "dropping projectile with bad direction");
            return None;
        };
        Some(Projectile {
            id: self.id,
            x: self.x,
            y: self.y,
            width: self.width,
            height: self.height,
            dir,
            kind,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScenarioDto {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub background: String,
    /// Missing or zero means the default floor.
    #[serde(default)]
    pub ground_y: Option<f32>,
}

impl From<ScenarioDto> for Scenario {
    fn from(scenario: ScenarioDto) -> Self {
        let ground_y = match scenario.ground_y {
            Some(ground_y) if ground_y.is_finite() && ground_y != 0.0 => ground_y,
            _ => LevelTuning::default().default_ground_y,
        };
        Self {
            id: scenario.id,
            name: scenario.name,
            background: scenario.background,
            ground_y,
        }
    }
}

impl From<&Scenario> for ScenarioDto {
    fn from(scenario: &Scenario) -> Self {
        Self {
            id: scenario.id.clone(),
            name: scenario.name.clone(),
            background: scenario.background.clone(),
            ground_y: Some(scenario.ground_y),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomDto {
    #[serde(default)]
    pub players: HashMap<String, PlayerDto>,
    #[serde(default)]
    pub obstacles: Vec<ObstacleDto>,
    pub phase: PhaseDto,
    #[serde(default)]
    pub scenario: Option<ScenarioDto>,
    #[serde(default)]
    pub host: String,
}

impl From<RoomDto> for RoomState {
    fn from(room: RoomDto) -> Self {
        Self {
            players: convert_players(room.players),
            obstacles: convert_obstacles(room.obstacles),
            phase: room.phase.into(),
            scenario: room.scenario.map(Scenario::from),
            host_id: room.host,
        }
    }
}

impl From<&RoomState> for RoomDto {
    fn from(room: &RoomState) -> Self {
        Self {
            players: room
                .players
                .iter()
                .map(|(id, player)| (id.clone(), PlayerDto::from(player)))
                .collect(),
            obstacles: room.obstacles.iter().map(ObstacleDto::from).collect(),
            phase: room.phase.into(),
            scenario: room.scenario.as_ref().map(ScenarioDto::from),
            host: room.host_id.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoundStartedDto {
    #[serde(default)]
    pub obstacles: Vec<ObstacleDto>,
    #[serde(default)]
    pub scenario: Option<ScenarioDto>,
    #[serde(default)]
    pub players: HashMap<String, PlayerDto>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildingPhaseDto {
    pub scenario: ScenarioDto,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemTakenDto {
    pub item_type: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoundEndDto {
    #[serde(default)]
    pub new_points: HashMap<String, i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameWinnerDto {
    pub winner_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewHostDto {
    pub host_id: String,
}

/// Decoded inbound traffic, split the way the peer link routes it.
#[derive(Debug)]
pub enum Inbound {
    Identity(String),
    Ack {
        request_id: u64,
        result: Result<Reply, LinkError>,
    },
    Broadcast(Broadcast),
    /// Well-formed but unusable; already logged.
    Ignored,
}

impl From<ServerMessage> for Inbound {
    fn from(message: ServerMessage) -> Self {
        let broadcast = match message {
            ServerMessage::Identity(identity) => return Inbound::Identity(identity.player_id),
            ServerMessage::Ack(ack) => {
                let result = if ack.ok {
                    Ok(match ack.room {
                        Some(room) => Reply::Room(room.into()),
                        None => Reply::Accepted,
                    })
                } else {
                    Err(LinkError::Rejected(
                        ack.error.unwrap_or_else(|| "rejected".to_string()),
                    ))
                };
                return Inbound::Ack {
                    request_id: ack.request_id,
                    result,
                };
            }
            ServerMessage::RoomUpdate(room) => Broadcast::RoomUpdate(room.into()),
            ServerMessage::PlayerMoved(player) => Broadcast::PlayerMoved(player.into()),
            ServerMessage::RoundStarted(round) => Broadcast::RoundStarted {
                obstacles: convert_obstacles(round.obstacles),
                scenario: round.scenario.map(Scenario::from),
                players: convert_players(round.players),
            },
            ServerMessage::ScenarioSelection => Broadcast::ScenarioSelection,
            ServerMessage::BuildingPhase(building) => Broadcast::BuildingPhase {
                scenario: building.scenario.into(),
            },
            ServerMessage::ObstacleAdded(obstacle) => match obstacle.into_domain() {
                Some(obstacle) => Broadcast::ObstacleAdded(obstacle),
                None => return Inbound::Ignored,
            },
            ServerMessage::ObstaclesUpdate(obstacles) => {
                Broadcast::ObstaclesUpdate(convert_obstacles(obstacles))
            }
            ServerMessage::ItemTaken(taken) => match taken.item_type.parse::<ObstacleType>() {
                Ok(kind) => Broadcast::ItemTaken(kind),
                Err(e) => {
                    warn!(kind = %e.0, "item taken with unknown type");
                    return Inbound::Ignored;
                }
            },
            ServerMessage::StartPlaying => Broadcast::StartPlaying,
            ServerMessage::ProjectilesUpdate(projectiles) => Broadcast::ProjectilesUpdate(
                projectiles
                    .into_iter()
                    .filter_map(ProjectileDto::into_domain)
                    .collect(),
            ),
            ServerMessage::RoundEnd(round_end) => Broadcast::RoundEnd {
                new_points: round_end
                    .new_points
                    .into_iter()
                    .map(|(id, delta)| (id, clamp_points(delta)))
                    .collect(),
            },
            ServerMessage::GameWinner(winner) => Broadcast::GameWinner {
                winner_id: winner.winner_id,
            },
            ServerMessage::RoomReset => Broadcast::RoomReset,
            ServerMessage::NewHost(host) => Broadcast::NewHost {
                host_id: host.host_id,
            },
        };
        Inbound::Broadcast(broadcast)
    }
}

impl ClientMessage {
    pub fn request(request: Request, request_id: u64, room_id: &str) -> Self {
        let room_id = room_id.to_string();
        match request {
            Request::JoinRoom {
                room_id,
                name,
                character,
            } => ClientMessage::JoinRoom(JoinRoomDto {
                request_id,
                room_id,
                name,
                character,
            }),
            Request::CreateRoom {
                room_id,
                name,
                character,
            } => ClientMessage::CreateRoom(JoinRoomDto {
                request_id,
                room_id,
                name,
                character,
            }),
            Request::RoomSnapshot => {
                ClientMessage::RequestRoomUpdate(RoomRequestDto {
                    request_id,
                    room_id,
                })
            }
            Request::ClaimItem(kind) => ClientMessage::SelectItem(SelectItemDto {
                request_id,
                room_id,
                item_type: kind.as_str().to_string(),
            }),
        }
    }

    pub fn notify(notify: Notify, room_id: &str) -> Self {
        let room_id = room_id.to_string();
        match notify {
            Notify::StartScenarioSelection => {
                ClientMessage::StartScenarioSelection(RoomRefDto { room_id })
            }
            Notify::SelectScenario(scenario) => ClientMessage::SelectScenario(SelectScenarioDto {
                room_id,
                scenario: ScenarioDto::from(&scenario),
            }),
            Notify::StartRound => ClientMessage::StartRound(RoomRefDto { room_id }),
            Notify::ResetRoom => ClientMessage::ResetRoom(RoomRefDto { room_id }),
            Notify::PlaceObstacle(obstacle) => ClientMessage::PlaceObstacle(PlaceObstacleDto {
                room_id,
                obstacle: ObstacleDto::from(&obstacle),
            }),
            Notify::ItemPlaced => ClientMessage::ItemPlaced(RoomRefDto { room_id }),
            Notify::SkipItemSelection => ClientMessage::SkipItemSelection(RoomRefDto { room_id }),
            Notify::PlayerUpdate { x, y } => {
                ClientMessage::PlayerUpdate(PlayerUpdateDto { room_id, x, y })
            }
            Notify::PlayerDied => ClientMessage::PlayerDied(RoomRefDto { room_id }),
            Notify::ReachedFlag => ClientMessage::ReachedFlag(RoomRefDto { room_id }),
            Notify::ChangeCharacter(character) => {
                ClientMessage::ChangeCharacter(ChangeCharacterDto { room_id, character })
            }
            Notify::LeaveRoom => ClientMessage::LeaveRoom(RoomRefDto { room_id }),
        }
    }

    /// Correlation id for messages that expect an `ack`.
    pub fn request_id(&self) -> Option<u64> {
        match self {
            ClientMessage::JoinRoom(dto) | ClientMessage::CreateRoom(dto) => Some(dto.request_id),
            ClientMessage::RequestRoomUpdate(dto) => Some(dto.request_id),
            ClientMessage::SelectItem(dto) => Some(dto.request_id),
            _ => None,
        }
    }
}

fn clamp_points(points: i64) -> u32 {
    u32::try_from(points.max(0)).unwrap_or(u32::MAX)
}

fn convert_players(players: HashMap<String, PlayerDto>) -> HashMap<String, Player> {
    players
        .into_iter()
        .map(|(id, player)| (id, player.into()))
        .collect()
}

fn convert_obstacles(obstacles: Vec<ObstacleDto>) -> Vec<Obstacle> {
    obstacles
        .into_iter()
        .filter_map(ObstacleDto::into_domain)
        .collect()
}
