use crate::error::{ConnectError, PositionError, SendError};
use crate::identity::{resolve_identity, ConnectParams};
use crate::model::{ConnHandle, Position};
use crate::protocol::ServerMessage;
use crate::registry::ConnectionRegistry;
use crate::store::{EntityStore, PayloadFactory};
use serde::Serialize;
use std::collections::BTreeSet;
use tracing::{debug, error, info, warn};

/// Why the engine asks the transport to close a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CloseReason {
    /// The connect request carried no usable position.
    MissingPosition,
    /// A send to the connection failed.
    SendFailed,
}

impl CloseReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            CloseReason::MissingPosition => "missing_position",
            CloseReason::SendFailed => "send_error",
        }
    }
}

/// Delivery side of a transport. `send` must not block.
pub trait Transport {
    fn send(&mut self, handle: ConnHandle, message: &[u8]) -> Result<(), SendError>;
    fn close(&mut self, handle: ConnHandle, reason: CloseReason);
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EngineOptions {
    /// Broadcast `update-entity` to peers when an identity re-joins.
    pub announce_rejoins: bool,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct IdentityStats {
    pub identity: String,
    pub connections: usize,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct EngineStats {
    pub identities: usize,
    pub connections: usize,
    pub per_identity: Vec<IdentityStats>,
}

/// Owns the registry and the store. Every `on_*` call runs to completion,
/// including cleanup of connections whose sends failed, before returning.
pub struct BroadcastEngine<T, P> {
    registry: ConnectionRegistry,
    store: EntityStore,
    transport: T,
    payloads: P,
    options: EngineOptions,
    doomed: BTreeSet<ConnHandle>,
}

impl<T, P> BroadcastEngine<T, P>
where
    T: Transport,
    P: PayloadFactory,
{
    pub fn new(transport: T, payloads: P, options: EngineOptions) -> Self {
        Self {
            registry: ConnectionRegistry::new(),
            store: EntityStore::new(),
            transport,
            payloads,
            options,
            doomed: BTreeSet::new(),
        }
    }

    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    pub fn store(&self) -> &EntityStore {
        &self.store
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    pub fn options(&self) -> EngineOptions {
        self.options
    }

    /// Connecting → Live. On a position failure the connection is told why,
    /// closed, and nothing is registered.
    pub fn on_connect(
        &mut self,
        handle: ConnHandle,
        params: &ConnectParams,
    ) -> Result<String, ConnectError> {
        let identity = resolve_identity(params, handle);
        let position = match params.position(&identity) {
            Ok(value) => value,
            Err(err) => {
                self.reject(handle, &identity, &err);
                return Err(err.into());
            }
        };

        if let Err(err) = self.registry.add_connection(handle, &identity) {
            error!(event = "caller_misuse", conn_id = %handle, identity = %identity, error = %err);
            return Err(err.into());
        }
        info!(
            event = "client_connected",
            conn_id = %handle,
            identity = %identity,
            connections = self.registry.connection_count_for(&identity)
        );

        if self.store.contains(&identity) {
            self.rejoin(handle, &identity, &position);
        } else {
            self.create(handle, &identity, position);
        }
        self.settle();
        Ok(identity)
    }

    pub fn on_close(&mut self, handle: ConnHandle) {
        self.disconnect(handle, "closed");
        self.settle();
    }

    /// Transport errors are terminal and share the close transition.
    pub fn on_error(&mut self, handle: ConnHandle) {
        self.disconnect(handle, "error");
        self.settle();
    }

    pub fn stats(&self) -> EngineStats {
        let per_identity = self
            .registry
            .identities()
            .into_iter()
            .map(|identity| IdentityStats {
                connections: self.registry.connection_count_for(&identity),
                identity,
            })
            .collect::<Vec<_>>();
        EngineStats {
            identities: self.store.len(),
            connections: self.registry.len(),
            per_identity,
        }
    }

    /// Identities with a record are exactly the identities with a live connection.
    pub fn is_consistent(&self) -> bool {
        self.registry.identities() == self.store.identities()
            && self
                .store
                .records()
                .iter()
                .all(|record| record.position.id == record.identity)
    }

    fn reject(&mut self, handle: ConnHandle, identity: &str, err: &PositionError) {
        warn!(event = "connect_rejected", conn_id = %handle, identity = %identity, error = %err);
        let message = ServerMessage::Error {
            message: err.to_string(),
        };
        match message.encode() {
            Ok(raw) => {
                if let Err(send_err) = self.transport.send(handle, &raw) {
                    warn!(event = "send_error", conn_id = %handle, error = %send_err);
                }
            }
            Err(encode_err) => {
                warn!(event = "encode_error", conn_id = %handle, error = %encode_err);
            }
        }
        self.transport.close(handle, CloseReason::MissingPosition);
    }

    fn create(&mut self, handle: ConnHandle, identity: &str, position: Position) {
        let record = self
            .store
            .upsert_new(identity, position, &mut self.payloads)
            .clone();
        info!(
            event = "entity_created",
            conn_id = %handle,
            identity = %identity,
            lat = record.position.lat,
            lng = record.position.lng
        );
        let everyone = self.registry.all_handles();
        self.fan_out(&ServerMessage::AddEntity { entity: record }, &everyone);
        self.send_snapshot(handle, identity);
    }

    fn rejoin(&mut self, handle: ConnHandle, identity: &str, position: &Position) {
        self.store.update_position(identity, position);
        let Some(record) = self.store.get(identity).cloned() else {
            return;
        };
        info!(
            event = "entity_rejoined",
            conn_id = %handle,
            identity = %identity,
            lat = record.position.lat,
            lng = record.position.lng
        );
        self.send_to(
            handle,
            &ServerMessage::AddEntity {
                entity: record.clone(),
            },
        );
        self.send_snapshot(handle, identity);
        if self.options.announce_rejoins {
            let peers = self.registry.all_handles_except(handle);
            self.fan_out(&ServerMessage::UpdateEntity { entity: record }, &peers);
        }
    }

    fn disconnect(&mut self, handle: ConnHandle, reason: &str) {
        let Some(identity) = self.registry.identity_of(handle).map(str::to_string) else {
            debug!(event = "disconnect_unknown", conn_id = %handle, reason = reason);
            return;
        };
        match self.registry.remove_connection(handle) {
            Some(last) => {
                self.store.remove(&last);
                info!(
                    event = "entity_removed",
                    conn_id = %handle,
                    identity = %last,
                    reason = reason
                );
                let remaining = self.registry.all_handles();
                self.fan_out(&ServerMessage::RemoveEntity { id: last }, &remaining);
            }
            None => {
                info!(
                    event = "client_disconnected",
                    conn_id = %handle,
                    identity = %identity,
                    reason = reason,
                    remaining = self.registry.connection_count_for(&identity)
                );
            }
        }
    }

    /// Every record except the newcomer's own, one `add-entity` each.
    fn send_snapshot(&mut self, handle: ConnHandle, identity: &str) {
        let others = self
            .store
            .records()
            .into_iter()
            .filter(|record| record.identity != identity)
            .map(|record| ServerMessage::AddEntity {
                entity: record.clone(),
            })
            .collect::<Vec<_>>();
        let count = others.len();
        for message in &others {
            self.send_to(handle, message);
        }
        debug!(event = "snapshot_sent", conn_id = %handle, count = count);
    }

    fn send_to(&mut self, handle: ConnHandle, message: &ServerMessage) {
        match message.encode() {
            Ok(raw) => self.deliver(handle, &raw),
            Err(err) => warn!(event = "encode_error", kind = message.kind(), error = %err),
        }
    }

    fn fan_out(&mut self, message: &ServerMessage, targets: &[ConnHandle]) {
        let raw = match message.encode() {
            Ok(value) => value,
            Err(err) => {
                warn!(event = "encode_error", kind = message.kind(), error = %err);
                return;
            }
        };
        for target in targets {
            self.deliver(*target, &raw);
        }
        debug!(event = "broadcast", kind = message.kind(), targets = targets.len());
    }

    fn deliver(&mut self, handle: ConnHandle, raw: &[u8]) {
        if self.doomed.contains(&handle) {
            return;
        }
        if let Err(err) = self.transport.send(handle, raw) {
            warn!(event = "send_error", conn_id = %handle, error = %err);
            self.doomed.insert(handle);
        }
    }

    /// Runs the close transition for every connection whose send failed,
    /// until no new failures appear.
    fn settle(&mut self) {
        while let Some(handle) = self.doomed.pop_first() {
            self.transport.close(handle, CloseReason::SendFailed);
            self.disconnect(handle, CloseReason::SendFailed.as_str());
        }
    }
}
