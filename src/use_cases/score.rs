// Round-end bookkeeping: point deltas, round counter and the next life.

use crate::domain::systems::PhysicsEngine;
use crate::domain::{PlayerId, RoomState};
use std::collections::HashMap;
use tracing::{info, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoundSummary {
    /// Number of the round that starts now.
    pub round_number: u32,
    /// Deltas naming players that are not in the room.
    pub unknown_players: Vec<PlayerId>,
}

#[derive(Debug, Clone)]
pub struct ScoreAggregator {
    round_number: u32,
}

impl Default for ScoreAggregator {
    fn default() -> Self {
        Self { round_number: 1 }
    }
}

impl ScoreAggregator {
    pub fn round_number(&self) -> u32 {
        self.round_number
    }

    /// Adds the deltas, advances the round and respawns the local player.
    ///
    /// Players missing from `deltas` keep their points.
    pub fn apply_round_end(
        &mut self,
        room: &mut RoomState,
        engine: &mut PhysicsEngine,
        deltas: &HashMap<PlayerId, u32>,
        fallback_ground_y: f32,
    ) -> RoundSummary {
        let mut unknown_players = Vec::new();
        for (player_id, delta) in deltas {
            match room.players.get_mut(player_id) {
                Some(player) => player.points = player.points.saturating_add(*delta),
                None => unknown_players.push(player_id.clone()),
            }
        }
        if !unknown_players.is_empty() {
            unknown_players.sort();
            warn!(?unknown_players, "round-end deltas for players not in room");
        }

        self.round_number = self.round_number.saturating_add(1);
        engine.respawn(room.ground_y_or(fallback_ground_y));
        info!(round = self.round_number, "round started");

        RoundSummary {
            round_number: self.round_number,
            unknown_players,
        }
    }

    /// Full game reset: points go back to zero, the round counter keeps counting.
    pub fn reset_points(&self, room: &mut RoomState) {
        for player in room.players.values_mut() {
            player.points = 0;
        }
    }
}
