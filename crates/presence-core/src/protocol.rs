use crate::error::ProtocolError;
use crate::model::EntityRecord;
use serde::{Deserialize, Serialize};

/// Notifications pushed from the hub to clients.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ServerMessage {
    AddEntity { entity: EntityRecord },
    /// Only emitted when re-joins are announced to peers.
    UpdateEntity { entity: EntityRecord },
    RemoveEntity { id: String },
    Error { message: String },
}

impl ServerMessage {
    pub fn kind(&self) -> &'static str {
        match self {
            ServerMessage::AddEntity { .. } => "add-entity",
            ServerMessage::UpdateEntity { .. } => "update-entity",
            ServerMessage::RemoveEntity { .. } => "remove-entity",
            ServerMessage::Error { .. } => "error",
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        serde_json::to_vec(self).map_err(|err| ProtocolError::Encode(err.to_string()))
    }

    pub fn decode(raw: &[u8]) -> Result<Self, ProtocolError> {
        serde_json::from_slice(raw).map_err(|err| ProtocolError::Decode(err.to_string()))
    }
}
