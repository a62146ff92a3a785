use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Opaque reference to one live transport connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ConnHandle(pub u64);

impl fmt::Display for ConnHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Position {
    pub lat: f64,
    pub lng: f64,
    /// Always the owning record's identity.
    pub id: String,
}

/// The authoritative state for one identity.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EntityRecord {
    pub identity: String,
    pub position: Position,
    #[serde(default)]
    pub payload: Value,
}

impl EntityRecord {
    pub fn new(identity: impl Into<String>, lat: f64, lng: f64, payload: Value) -> Self {
        let identity = identity.into();
        Self {
            position: Position {
                lat,
                lng,
                id: identity.clone(),
            },
            identity,
            payload,
        }
    }

    /// Moves the record, keeping `position.id` pinned to the identity.
    pub fn relocate(&mut self, lat: f64, lng: f64) {
        self.position.lat = lat;
        self.position.lng = lng;
        self.position.id = self.identity.clone();
    }
}
