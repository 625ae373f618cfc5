use crate::domain::Viewport;
use crate::interface_adapters::utils::rng::fresh_room_code;
use crate::use_cases::{JoinRequest, LobbyError};
use std::{env, fmt, time::Duration};

// Runtime/client constants (not gameplay tuning).

pub const PEER_CHANNEL_CAPACITY: usize = 256;
pub const MAX_RECONNECT_DELAY: Duration = Duration::from_secs(8);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    MissingPlayerName,
    InvalidJoin(LobbyError),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::MissingPlayerName => f.write_str("PARTY_PLAYER_NAME is not set"),
            ConfigError::InvalidJoin(e) => write!(f, "invalid join settings: {e}"),
        }
    }
}

impl std::error::Error for ConfigError {}

pub fn server_url() -> String {
    env::var("PARTY_SERVER_URL").unwrap_or_else(|_| "ws://127.0.0.1:3000/ws".to_string())
}

/// Room to join. Unset or blank picks a fresh code, which the host will not know yet.
pub fn room_id() -> String {
    env::var("PARTY_ROOM_ID")
        .ok()
        .filter(|value| !value.trim().is_empty())
        .unwrap_or_else(fresh_room_code)
}

pub fn player_name() -> Result<String, ConfigError> {
    env::var("PARTY_PLAYER_NAME").map_err(|_| ConfigError::MissingPlayerName)
}

pub fn character() -> String {
    env::var("PARTY_CHARACTER").unwrap_or_default()
}

pub fn viewport() -> Viewport {
    Viewport {
        width: parsed("PARTY_VIEWPORT_WIDTH", 390.0),
        height: parsed("PARTY_VIEWPORT_HEIGHT", 844.0),
    }
}

pub fn ack_timeout() -> Duration {
    Duration::from_millis(parsed("PARTY_ACK_TIMEOUT_MS", 3000))
}

pub fn reconnect_delay() -> Duration {
    Duration::from_millis(parsed("PARTY_RECONNECT_DELAY_MS", 500))
}

pub fn reconnect_attempts() -> u32 {
    parsed("PARTY_RECONNECT_ATTEMPTS", 10)
}

/// Validated identity for the join handshake.
pub fn join_request() -> Result<JoinRequest, ConfigError> {
    let name = player_name()?;
    JoinRequest::new(&room_id(), &name, &character()).map_err(ConfigError::InvalidJoin)
}

fn parsed<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|value| value.trim().parse().ok())
        .unwrap_or(default)
}
