// Local half of item arbitration: mirrors the room-wide disabled set and the player's own claim.

use super::types::ProvisionalObstacle;
use crate::domain::{Obstacle, ObstacleType, PlayerId};
use std::collections::BTreeSet;
use std::time::{SystemTime, UNIX_EPOCH};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlacementError {
    ItemDisabled(ObstacleType),
    ClaimInFlight(ObstacleType),
    NotSelecting,
    NothingHeld,
    AlreadySpent,
    NoClaimPending,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Holding {
    /// Outside item selection.
    Closed,
    Idle,
    Pending(ObstacleType),
    Provisional(ProvisionalObstacle),
    /// Placed or skipped; nothing more this round.
    Spent,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ClaimOutcome {
    Granted(ProvisionalObstacle),
    Lost(ObstacleType),
}

#[derive(Debug, Clone)]
pub struct PlacementArbiter {
    disabled: BTreeSet<ObstacleType>,
    holding: Holding,
}

impl Default for PlacementArbiter {
    fn default() -> Self {
        Self {
            disabled: BTreeSet::new(),
            holding: Holding::Closed,
        }
    }
}

impl PlacementArbiter {
    /// Clears the disabled set and opens item selection for a new round.
    pub fn open_round(&mut self) {
        self.disabled.clear();
        self.holding = Holding::Idle;
    }

    /// Room reset: nothing is claimable until the next round opens.
    pub fn close(&mut self) {
        self.disabled.clear();
        self.holding = Holding::Closed;
    }

    /// Marks a claim as in flight. Nothing is assumed granted until the ack resolves it.
    pub fn begin_claim(&mut self, kind: ObstacleType) -> Result<(), PlacementError> {
        match self.holding {
            Holding::Closed => Err(PlacementError::NotSelecting),
            Holding::Pending(pending) => Err(PlacementError::ClaimInFlight(pending)),
            Holding::Provisional(_) | Holding::Spent => Err(PlacementError::AlreadySpent),
            Holding::Idle if self.disabled.contains(&kind) => {
                Err(PlacementError::ItemDisabled(kind))
            }
            Holding::Idle => {
                self.holding = Holding::Pending(kind);
                Ok(())
            }
        }
    }

    /// Applies the claim acknowledgment. A grant places the provisional obstacle at `at`.
    pub fn resolve_claim(
        &mut self,
        kind: ObstacleType,
        granted: bool,
        at: (f32, f32),
    ) -> Result<ClaimOutcome, PlacementError> {
        if self.holding != Holding::Pending(kind) {
            return Err(PlacementError::NoClaimPending);
        }
        // Either we hold it or someone else does.
        self.disabled.insert(kind);
        if granted {
            let provisional = ProvisionalObstacle {
                kind,
                x: at.0,
                y: at.1,
            };
            self.holding = Holding::Provisional(provisional);
            Ok(ClaimOutcome::Granted(provisional))
        } else {
            self.holding = Holding::Idle;
            Ok(ClaimOutcome::Lost(kind))
        }
    }

    /// The ack never arrived; the player may pick again.
    pub fn abandon_claim(&mut self, kind: ObstacleType) -> bool {
        if self.holding == Holding::Pending(kind) {
            self.holding = Holding::Idle;
            true
        } else {
            false
        }
    }

    /// Another player's claim, as broadcast by the host.
    pub fn mark_taken(&mut self, kind: ObstacleType) {
        self.disabled.insert(kind);
    }

    pub fn move_provisional(&mut self, x: f32, y: f32) -> Result<(), PlacementError> {
        match &mut self.holding {
            Holding::Provisional(provisional) => {
                provisional.x = x;
                provisional.y = y;
                Ok(())
            }
            _ => Err(PlacementError::NothingHeld),
        }
    }

    /// Turns the provisional obstacle into a placed one. Allowed once per claim.
    pub fn commit(&mut self, owner: &PlayerId, stamp_millis: u128) -> Result<Obstacle, PlacementError> {
        match self.holding {
            Holding::Provisional(provisional) => {
                self.holding = Holding::Spent;
                Ok(Obstacle {
                    id: format!("{owner}-{stamp_millis}"),
                    x: provisional.x,
                    y: provisional.y,
                    owner_id: owner.clone(),
                    kind: provisional.kind,
                })
            }
            Holding::Spent => Err(PlacementError::AlreadySpent),
            _ => Err(PlacementError::NothingHeld),
        }
    }

    /// Gives up the round's pick. A held type stays disabled.
    pub fn skip(&mut self) -> Result<Option<ObstacleType>, PlacementError> {
        let dropped = match self.holding {
            Holding::Closed => return Err(PlacementError::NotSelecting),
            Holding::Spent => return Err(PlacementError::AlreadySpent),
            Holding::Idle => None,
            Holding::Pending(kind) => Some(kind),
            Holding::Provisional(provisional) => Some(provisional.kind),
        };
        self.holding = Holding::Spent;
        Ok(dropped)
    }

    pub fn provisional(&self) -> Option<ProvisionalObstacle> {
        match self.holding {
            Holding::Provisional(provisional) => Some(provisional),
            _ => None,
        }
    }

    pub fn pending(&self) -> Option<ObstacleType> {
        match self.holding {
            Holding::Pending(kind) => Some(kind),
            _ => None,
        }
    }

    #[cfg(test)]
    pub fn is_disabled(&self, kind: ObstacleType) -> bool {
        self.disabled.contains(&kind)
    }

    pub fn disabled(&self) -> Vec<ObstacleType> {
        self.disabled.iter().copied().collect()
    }
}

/// Millisecond wall-clock stamp used in obstacle ids.
pub fn stamp_millis() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    const CENTER: (f32, f32) = (195.0, 422.0);

    fn selecting() -> PlacementArbiter {
        let mut arbiter = PlacementArbiter::default();
        arbiter.open_round();
        arbiter
    }

    #[test]
    fn when_claim_is_granted_then_provisional_sits_at_default_position() {
        let mut arbiter = selecting();
        arbiter.begin_claim(ObstacleType::Saw).expect("claim");

        let outcome = arbiter
            .resolve_claim(ObstacleType::Saw, true, CENTER)
            .expect("pending");

        let expected = ProvisionalObstacle {
            kind: ObstacleType::Saw,
            x: CENTER.0,
            y: CENTER.1,
        };
        assert_eq!(outcome, ClaimOutcome::Granted(expected));
        assert_eq!(arbiter.provisional(), Some(expected));
        assert!(arbiter.is_disabled(ObstacleType::Saw));
    }

    #[test]
    fn when_claim_is_lost_then_type_is_disabled_and_player_may_pick_again() {
        let mut arbiter = selecting();
        arbiter.begin_claim(ObstacleType::Spike).expect("claim");

        let outcome = arbiter
            .resolve_claim(ObstacleType::Spike, false, CENTER)
            .expect("pending");

        assert_eq!(outcome, ClaimOutcome::Lost(ObstacleType::Spike));
        assert_eq!(
            arbiter.begin_claim(ObstacleType::Spike),
            Err(PlacementError::ItemDisabled(ObstacleType::Spike))
        );
        assert!(arbiter.begin_claim(ObstacleType::Wall).is_ok());
    }

    #[test]
    fn when_claim_is_in_flight_then_second_claim_is_refused() {
        let mut arbiter = selecting();
        arbiter.begin_claim(ObstacleType::Spring).expect("claim");

        assert_eq!(
            arbiter.begin_claim(ObstacleType::Wall),
            Err(PlacementError::ClaimInFlight(ObstacleType::Spring))
        );
    }

    #[test]
    fn when_committed_twice_then_second_commit_is_refused() {
        let mut arbiter = selecting();
        arbiter.begin_claim(ObstacleType::Platform).expect("claim");
        arbiter
            .resolve_claim(ObstacleType::Platform, true, CENTER)
            .expect("pending");
        arbiter.move_provisional(500.0, 300.0).expect("held");

        let obstacle = arbiter.commit(&"p1".to_string(), 1700).expect("commit");

        assert_eq!(obstacle.id, "p1-1700");
        assert_eq!((obstacle.x, obstacle.y), (500.0, 300.0));
        assert_eq!(obstacle.kind, ObstacleType::Platform);
        assert_eq!(
            arbiter.commit(&"p1".to_string(), 1701),
            Err(PlacementError::AlreadySpent)
        );
        assert_eq!(arbiter.provisional(), None);
    }

    #[test]
    fn when_skipping_held_item_then_type_stays_disabled() {
        let mut arbiter = selecting();
        arbiter.begin_claim(ObstacleType::Cannon).expect("claim");
        arbiter
            .resolve_claim(ObstacleType::Cannon, true, CENTER)
            .expect("pending");

        assert_eq!(arbiter.skip(), Ok(Some(ObstacleType::Cannon)));
        assert!(arbiter.is_disabled(ObstacleType::Cannon));
        assert_eq!(arbiter.skip(), Err(PlacementError::AlreadySpent));
    }

    #[test]
    fn when_outside_selection_then_claims_are_refused() {
        let mut arbiter = PlacementArbiter::default();

        assert_eq!(
            arbiter.begin_claim(ObstacleType::Hammer),
            Err(PlacementError::NotSelecting)
        );
    }

    #[test]
    fn when_new_round_opens_then_disabled_set_is_cleared() {
        let mut arbiter = selecting();
        for kind in ObstacleType::ALL {
            arbiter.mark_taken(kind);
        }
        assert_eq!(arbiter.disabled().len(), ObstacleType::ALL.len());

        arbiter.open_round();

        assert!(arbiter.disabled().is_empty());
        assert!(arbiter.begin_claim(ObstacleType::Crossbow).is_ok());
    }

    #[test]
    fn when_ack_is_lost_then_pending_claim_is_abandoned() {
        let mut arbiter = selecting();
        arbiter.begin_claim(ObstacleType::Saw).expect("claim");

        assert!(arbiter.abandon_claim(ObstacleType::Saw));

        assert!(!arbiter.is_disabled(ObstacleType::Saw));
        assert_eq!(
            arbiter.resolve_claim(ObstacleType::Saw, true, CENTER),
            Err(PlacementError::NoClaimPending)
        );
    }
}
