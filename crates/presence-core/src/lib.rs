pub mod engine;
pub mod error;
pub mod identity;
pub mod model;
pub mod protocol;
pub mod registry;
pub mod store;

pub use engine::{
    BroadcastEngine, CloseReason, EngineOptions, EngineStats, IdentityStats, Transport,
};
pub use error::{ConnectError, PositionError, ProtocolError, RegistryError, SendError};
pub use identity::{resolve_identity, ConnectParams};
pub use model::{ConnHandle, EntityRecord, Position};
pub use protocol::ServerMessage;
pub use registry::ConnectionRegistry;
pub use store::{EntityStore, PayloadFactory, StampedPayloadFactory};
