// Room entry rules: who may join which room, and generated room codes.

use super::types::Request;
use std::fmt;

/// Longest display name accepted, in characters.
pub const MAX_NAME_LEN: usize = 15;

/// Rejection reason the host uses when `joinRoom` names a room that does not exist.
pub const NO_ROOM: &str = "no_room";

/// Character glyphs offered to players.
pub const CHARACTERS: [&str; 8] = ["🐱", "🐶", "🐸", "🐵", "🐰", "🦊", "🐼", "🐯"];

const ROOM_CODE_LEN: usize = 6;
const ROOM_CODE_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

/// Errors returned while validating a join.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LobbyError {
    EmptyRoomId,
    EmptyName,
    /// Name is longer than `MAX_NAME_LEN` characters.
    NameTooLong,
}

impl fmt::Display for LobbyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LobbyError::EmptyRoomId => f.write_str("room id is empty"),
            LobbyError::EmptyName => f.write_str("name is empty"),
            LobbyError::NameTooLong => write!(f, "name is longer than {MAX_NAME_LEN} characters"),
        }
    }
}

/// Validated identity used for every (re)join handshake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinRequest {
    pub room_id: String,
    pub name: String,
    pub character: String,
}

impl JoinRequest {
    /// Trims the inputs and checks them. An empty character falls back to the first glyph.
    pub fn new(room_id: &str, name: &str, character: &str) -> Result<Self, LobbyError> {
        let room_id = room_id.trim();
        let name = name.trim();
        if room_id.is_empty() {
            return Err(LobbyError::EmptyRoomId);
        }
        if name.is_empty() {
            return Err(LobbyError::EmptyName);
        }
        if name.chars().count() > MAX_NAME_LEN {
            return Err(LobbyError::NameTooLong);
        }
        let character = match character.trim() {
            "" => CHARACTERS[0],
            glyph => glyph,
        };

        Ok(Self {
            room_id: room_id.to_string(),
            name: name.to_string(),
            character: character.to_string(),
        })
    }

    pub fn join(&self) -> Request {
        Request::JoinRoom {
            room_id: self.room_id.clone(),
            name: self.name.clone(),
            character: self.character.clone(),
        }
    }

    pub fn create(&self) -> Request {
        Request::CreateRoom {
            room_id: self.room_id.clone(),
            name: self.name.clone(),
            character: self.character.clone(),
        }
    }
}

/// Six uppercase alphanumerics derived from `seed`.
pub fn room_code(seed: u64) -> String {
    // splitmix64 so consecutive seeds give unrelated codes.
    let mut state = seed.wrapping_add(0x9E37_79B9_7F4A_7C15);
    state = (state ^ (state >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    state = (state ^ (state >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    state ^= state >> 31;

    let base = ROOM_CODE_ALPHABET.len() as u64;
    (0..ROOM_CODE_LEN)
        .map(|_| {
            let index = (state % base) as usize;
            state /= base;
            ROOM_CODE_ALPHABET[index] as char
        })
        .collect()
}
