// Authoritative per-round claim bookkeeping, as kept by the session host.

use super::catalog::ObstacleType;
use super::state::PlayerId;
use std::collections::HashMap;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ClaimStatus {
    Held { since: Instant },
    Placed,
    Skipped,
}

#[derive(Debug, Clone)]
struct Claim {
    owner: PlayerId,
    status: ClaimStatus,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClaimRejection {
    /// Another player holds or already spent this type.
    Taken { by: PlayerId },
    /// The player already claimed something this round.
    AlreadyClaimed(ObstacleType),
}

/// At most one claimant per obstacle type and one claim per player, per round.
#[derive(Debug)]
pub struct ClaimLedger {
    claims: HashMap<ObstacleType, Claim>,
    placement_budget: Duration,
}

impl ClaimLedger {
    pub fn new(placement_budget: Duration) -> Self {
        Self {
            claims: HashMap::new(),
            placement_budget,
        }
    }

    pub fn try_claim(
        &mut self,
        owner: &str,
        kind: ObstacleType,
        now: Instant,
    ) -> Result<(), ClaimRejection> {
        if let Some(existing) = self.claims.get(&kind) {
            return Err(ClaimRejection::Taken {
                by: existing.owner.clone(),
            });
        }
        if let Some(held) = self.claim_of(owner) {
            return Err(ClaimRejection::AlreadyClaimed(held));
        }

        self.claims.insert(
            kind,
            Claim {
                owner: owner.to_string(),
                status: ClaimStatus::Held { since: now },
            },
        );
        Ok(())
    }

    /// Marks the owner's held claim as placed. Returns `None` when nothing is held,
    /// which is how a second placement for the same claim is refused.
    pub fn record_placement(&mut self, owner: &str) -> Option<ObstacleType> {
        self.settle(owner, ClaimStatus::Placed)
    }

    /// Spends the owner's held claim without placing; the type stays disabled.
    pub fn record_skip(&mut self, owner: &str) -> Option<ObstacleType> {
        self.settle(owner, ClaimStatus::Skipped)
    }

    /// Releases held claims whose owner neither placed nor skipped in time.
    pub fn expire(&mut self, now: Instant) -> Vec<ObstacleType> {
        let budget = self.placement_budget;
        let mut released: Vec<ObstacleType> = self
            .claims
            .iter()
            .filter_map(|(kind, claim)| match claim.status {
                ClaimStatus::Held { since } if now.saturating_duration_since(since) >= budget => {
                    Some(*kind)
                }
                _ => None,
            })
            .collect();
        released.sort();
        for kind in &released {
            self.claims.remove(kind);
        }
        released
    }

    /// Drops every claim held by a player who left the room.
    pub fn release_owner(&mut self, owner: &str) -> Vec<ObstacleType> {
        let mut released: Vec<ObstacleType> = self
            .claims
            .iter()
            .filter(|(_, claim)| {
                claim.owner == owner && matches!(claim.status, ClaimStatus::Held { .. })
            })
            .map(|(kind, _)| *kind)
            .collect();
        released.sort();
        for kind in &released {
            self.claims.remove(kind);
        }
        released
    }

    pub fn is_disabled(&self, kind: ObstacleType) -> bool {
        self.claims.contains_key(&kind)
    }

    pub fn disabled(&self) -> Vec<ObstacleType> {
        let mut kinds: Vec<ObstacleType> = self.claims.keys().copied().collect();
        kinds.sort();
        kinds
    }

    /// True once every claimed type has been placed or skipped.
    pub fn all_settled(&self) -> bool {
        self.claims
            .values()
            .all(|claim| !matches!(claim.status, ClaimStatus::Held { .. }))
    }

    pub fn reset_round(&mut self) {
        self.claims.clear();
    }

    fn claim_of(&self, owner: &str) -> Option<ObstacleType> {
        self.claims
            .iter()
            .find(|(_, claim)| claim.owner == owner)
            .map(|(kind, _)| *kind)
    }

    fn settle(&mut self, owner: &str, status: ClaimStatus) -> Option<ObstacleType> {
        let (kind, claim) = self.claims.iter_mut().find(|(_, claim)| {
            claim.owner == owner && matches!(claim.status, ClaimStatus::Held { .. })
        })?;
        claim.status = status;
        Some(*kind)
    }
}
