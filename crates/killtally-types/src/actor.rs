//! Actor types

use crate::ActorId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Persisted actor registry row
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActorRecord {
    pub id: ActorId,
    /// Display name, unique across the registry
    pub name: String,
    pub created_at: DateTime<Utc>,
}

impl ActorRecord {
    /// Whether the name is still the placeholder written when the actor
    /// was first seen in a kill, before it registered a display name
    pub fn has_placeholder_name(&self) -> bool {
        self.name == placeholder_name(&self.id)
    }
}

/// Name given to actors that show up in a kill before being registered.
/// The id text is unique, so it can never clash with another placeholder.
pub fn placeholder_name(id: &ActorId) -> String {
    id.to_string()
}

/// Names that read as an actor id are held back for placeholders; letting
/// one through would collide with that actor's placeholder row.
pub fn is_reserved_name(name: &str) -> bool {
    name.trim().parse::<ActorId>().is_ok()
}
