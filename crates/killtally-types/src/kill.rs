//! Kill tally types

use crate::ActorId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Key of a pending tally and of a persisted kill record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PairKey {
    pub actor: ActorId,
    pub target: ActorId,
}

impl PairKey {
    pub fn new(actor: ActorId, target: ActorId) -> Self {
        Self { actor, target }
    }

    /// True if the actor appears on either side of the pair
    pub fn involves(&self, id: &ActorId) -> bool {
        self.actor == *id || self.target == *id
    }
}

/// Pending increment for one pair, as handed out by a drain
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PairTally {
    pub actor: ActorId,
    pub target: ActorId,
    pub count: u64,
}

impl PairTally {
    pub fn new(actor: ActorId, target: ActorId, count: u64) -> Self {
        Self {
            actor,
            target,
            count,
        }
    }

    pub fn key(&self) -> PairKey {
        PairKey::new(self.actor, self.target)
    }
}

/// Persisted kill count for one (actor, target) pair
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KillRecord {
    pub actor: ActorId,
    pub target: ActorId,
    pub count: u64,
    pub updated_at: DateTime<Utc>,
}

/// Answer to "how many kills does this actor have"
///
/// `PendingOnly` is the degraded figure returned when persistence could not
/// be reached: it only covers kills still waiting in the write-back cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum KillCount {
    Complete { pending: u64, persisted: u64 },
    PendingOnly { pending: u64 },
}

impl KillCount {
    pub fn total(&self) -> u64 {
        match self {
            KillCount::Complete { pending, persisted } => pending + persisted,
            KillCount::PendingOnly { pending } => *pending,
        }
    }

    pub fn pending(&self) -> u64 {
        match self {
            KillCount::Complete { pending, .. } | KillCount::PendingOnly { pending } => *pending,
        }
    }

    pub fn persisted(&self) -> Option<u64> {
        match self {
            KillCount::Complete { persisted, .. } => Some(*persisted),
            KillCount::PendingOnly { .. } => None,
        }
    }

    pub fn is_degraded(&self) -> bool {
        matches!(self, KillCount::PendingOnly { .. })
    }
}
