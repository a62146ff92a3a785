use crate::model::ConnHandle;
use thiserror::Error;

/// Why a connect request could not produce a usable position.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum PositionError {
    #[error("missing coordinate `{0}`")]
    Missing(&'static str),
    #[error("invalid coordinate `{field}`: {value:?}")]
    Invalid { field: &'static str, value: String },
    #[error("coordinate `{field}` out of range: {value}")]
    OutOfRange { field: &'static str, value: f64 },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SendError {
    #[error("no transport for {0}")]
    UnknownConnection(ConnHandle),
    #[error("connection {0} is closed")]
    Closed(ConnHandle),
    #[error("connection {0} outbound queue is full")]
    Backpressure(ConnHandle),
}

impl SendError {
    pub fn handle(&self) -> ConnHandle {
        match self {
            SendError::UnknownConnection(handle)
            | SendError::Closed(handle)
            | SendError::Backpressure(handle) => *handle,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("connection {0} is already registered")]
    DuplicateHandle(ConnHandle),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    #[error("message encode failed: {0}")]
    Encode(String),
    #[error("message decode failed: {0}")]
    Decode(String),
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConnectError {
    #[error(transparent)]
    Position(#[from] PositionError),
    #[error(transparent)]
    Registry(#[from] RegistryError),
}
