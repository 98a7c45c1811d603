use serde::{Deserialize, Serialize};

/// A multi-user chat room as known to the host's room registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Room {
    pub id: i64,
    /// Local part of the room JID.
    pub name: String,
    /// Human readable name shown to members.
    pub natural_name: String,
}

impl Room {
    pub fn new(id: i64, name: &str, natural_name: &str) -> Self {
        Self {
            id,
            name: name.to_lowercase(),
            natural_name: natural_name.to_string(),
        }
    }
}
