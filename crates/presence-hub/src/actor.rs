use axum::extract::ws::{CloseFrame, Message};
use presence_core::{
    BroadcastEngine, CloseReason, ConnHandle, ConnectError, ConnectParams, EngineOptions,
    EngineStats, PayloadFactory, SendError, Transport,
};
use std::collections::HashMap;
use tokio::sync::{
    mpsc::{self, error::TrySendError},
    oneshot,
};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

const POLICY_VIOLATION: u16 = 1008;
const INTERNAL_ERROR: u16 = 1011;

fn close_code(reason: CloseReason) -> u16 {
    match reason {
        CloseReason::MissingPosition => POLICY_VIOLATION,
        CloseReason::SendFailed => INTERNAL_ERROR,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectCause {
    Closed,
    Errored,
}

pub enum EngineEvent {
    Connect {
        handle: ConnHandle,
        params: ConnectParams,
        outbox: mpsc::Sender<Message>,
    },
    Disconnect {
        handle: ConnHandle,
        cause: DisconnectCause,
    },
    Stats {
        reply: oneshot::Sender<EngineStats>,
    },
}

/// Outbound queues of every socket the engine knows about. Sends never wait:
/// a full queue counts as a failed delivery.
#[derive(Default)]
pub struct ChannelTransport {
    outboxes: HashMap<ConnHandle, mpsc::Sender<Message>>,
}

impl ChannelTransport {
    pub fn attach(&mut self, handle: ConnHandle, outbox: mpsc::Sender<Message>) -> bool {
        if self.outboxes.contains_key(&handle) {
            return false;
        }
        self.outboxes.insert(handle, outbox);
        true
    }

    pub fn detach(&mut self, handle: ConnHandle) {
        self.outboxes.remove(&handle);
    }

    pub fn len(&self) -> usize {
        self.outboxes.len()
    }
}

impl Transport for ChannelTransport {
    fn send(&mut self, handle: ConnHandle, message: &[u8]) -> Result<(), SendError> {
        let Some(outbox) = self.outboxes.get(&handle) else {
            return Err(SendError::UnknownConnection(handle));
        };
        let text = String::from_utf8_lossy(message).into_owned();
        match outbox.try_send(Message::Text(text)) {
            Ok(()) => Ok(()),
            Err(TrySendError::Closed(_)) => Err(SendError::Closed(handle)),
            Err(TrySendError::Full(_)) => {
                warn!(event = "slow_consumer", conn_id = %handle);
                Err(SendError::Backpressure(handle))
            }
        }
    }

    fn close(&mut self, handle: ConnHandle, reason: CloseReason) {
        // Dropping the sender ends the writer even when the close frame
        // cannot be queued.
        if let Some(outbox) = self.outboxes.remove(&handle) {
            let _ = outbox.try_send(Message::Close(Some(CloseFrame {
                code: close_code(reason),
                reason: reason.as_str().into(),
            })));
        }
    }
}

/// Cloneable front door to the engine task.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineEvent>,
}

impl EngineHandle {
    pub async fn connect(
        &self,
        handle: ConnHandle,
        params: ConnectParams,
        outbox: mpsc::Sender<Message>,
    ) -> bool {
        self.tx
            .send(EngineEvent::Connect {
                handle,
                params,
                outbox,
            })
            .await
            .is_ok()
    }

    pub async fn disconnect(&self, handle: ConnHandle, cause: DisconnectCause) -> bool {
        self.tx
            .send(EngineEvent::Disconnect { handle, cause })
            .await
            .is_ok()
    }

    pub async fn stats(&self) -> Option<EngineStats> {
        let (reply, rx) = oneshot::channel();
        self.tx.send(EngineEvent::Stats { reply }).await.ok()?;
        rx.await.ok()
    }
}

/// Starts the task that exclusively owns the registry, the store and every
/// outbound queue. It stops once all handles are dropped.
pub fn spawn<P>(
    payloads: P,
    options: EngineOptions,
    capacity: usize,
) -> (EngineHandle, JoinHandle<()>)
where
    P: PayloadFactory + Send + 'static,
{
    let (tx, mut rx) = mpsc::channel::<EngineEvent>(capacity.max(1));
    let mut engine = BroadcastEngine::new(ChannelTransport::default(), payloads, options);
    let task = tokio::spawn(async move {
        info!(
            event = "engine_start",
            announce_rejoins = options.announce_rejoins
        );
        while let Some(event) = rx.recv().await {
            apply(&mut engine, event);
        }
        info!(event = "engine_stop");
    });
    (EngineHandle { tx }, task)
}

fn apply<P>(engine: &mut BroadcastEngine<ChannelTransport, P>, event: EngineEvent)
where
    P: PayloadFactory,
{
    match event {
        EngineEvent::Connect {
            handle,
            params,
            outbox,
        } => {
            if !engine.transport_mut().attach(handle, outbox) {
                error!(event = "duplicate_handle", conn_id = %handle);
                return;
            }
            match engine.on_connect(handle, &params) {
                Ok(identity) => {
                    debug!(event = "connect_applied", conn_id = %handle, identity = %identity);
                }
                Err(ConnectError::Position(err)) => {
                    debug!(event = "connect_refused", conn_id = %handle, error = %err);
                }
                Err(err) => {
                    error!(event = "connect_failed", conn_id = %handle, error = %err);
                }
            }
        }
        EngineEvent::Disconnect { handle, cause } => {
            match cause {
                DisconnectCause::Closed => engine.on_close(handle),
                DisconnectCause::Errored => engine.on_error(handle),
            }
            engine.transport_mut().detach(handle);
            debug!(
                event = "outbox_detached",
                conn_id = %handle,
                open = engine.transport().len()
            );
        }
        EngineEvent::Stats { reply } => {
            let _ = reply.send(engine.stats());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use presence_core::StampedPayloadFactory;
    use serde_json::Value;
    use std::time::Duration;

    fn params(identity: &str, lat: &str, lng: &str) -> ConnectParams {
        ConnectParams::new(Some(lat), Some(lng), Some(identity))
    }

    async fn recv_json(rx: &mut mpsc::Receiver<Message>) -> Value {
        let msg = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("recv timeout")
            .expect("outbox closed");
        match msg {
            Message::Text(text) => serde_json::from_str(&text).expect("json"),
            other => panic!("expected text frame, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn connect_and_disconnect_flow_through_actor() {
        let (engine, _task) = spawn(StampedPayloadFactory, EngineOptions::default(), 16);
        let (a_tx, mut a_rx) = mpsc::channel(16);
        let (b_tx, mut b_rx) = mpsc::channel(16);

        assert!(engine.connect(ConnHandle(1), params("u1", "1", "1"), a_tx).await);
        let first = recv_json(&mut a_rx).await;
        assert_eq!(first["type"], "add-entity");
        assert_eq!(first["entity"]["identity"], "u1");

        assert!(engine.connect(ConnHandle(2), params("u2", "2", "2"), b_tx).await);
        assert_eq!(recv_json(&mut a_rx).await["entity"]["identity"], "u2");
        assert_eq!(recv_json(&mut b_rx).await["entity"]["identity"], "u2");
        assert_eq!(recv_json(&mut b_rx).await["entity"]["identity"], "u1");

        assert!(engine.disconnect(ConnHandle(1), DisconnectCause::Closed).await);
        let removed = recv_json(&mut b_rx).await;
        assert_eq!(removed["type"], "remove-entity");
        assert_eq!(removed["id"], "u1");

        // detached on disconnect, so its queue is closed
        assert!(a_rx.recv().await.is_none());

        let stats = engine.stats().await.expect("stats");
        assert_eq!(stats.identities, 1);
        assert_eq!(stats.connections, 1);
    }

    #[tokio::test]
    async fn rejected_connect_gets_error_then_close() {
        let (engine, _task) = spawn(StampedPayloadFactory, EngineOptions::default(), 16);
        let (tx, mut rx) = mpsc::channel(16);

        let missing = ConnectParams::new(None, None, Some("u1"));
        assert!(engine.connect(ConnHandle(1), missing, tx).await);

        let error = recv_json(&mut rx).await;
        assert_eq!(error["type"], "error");
        match rx.recv().await.expect("close frame") {
            Message::Close(Some(frame)) => {
                assert_eq!(frame.code, POLICY_VIOLATION);
                assert_eq!(frame.reason, "missing_position");
            }
            other => panic!("expected close frame, got {other:?}"),
        }
        assert!(rx.recv().await.is_none());

        let stats = engine.stats().await.expect("stats");
        assert_eq!(stats.connections, 0);
        assert_eq!(stats.identities, 0);
    }

    #[tokio::test]
    async fn slow_consumer_is_evicted() {
        let (engine, _task) = spawn(StampedPayloadFactory, EngineOptions::default(), 16);
        let (slow_tx, _slow_rx) = mpsc::channel(1);
        let (fast_tx, mut fast_rx) = mpsc::channel(16);

        assert!(engine.connect(ConnHandle(1), params("slow", "1", "1"), slow_tx).await);
        assert!(engine.connect(ConnHandle(2), params("fast", "2", "2"), fast_tx).await);

        assert_eq!(recv_json(&mut fast_rx).await["entity"]["identity"], "fast");
        assert_eq!(recv_json(&mut fast_rx).await["entity"]["identity"], "slow");
        let removed = recv_json(&mut fast_rx).await;
        assert_eq!(removed["type"], "remove-entity");
        assert_eq!(removed["id"], "slow");

        let stats = engine.stats().await.expect("stats");
        assert_eq!(stats.identities, 1);
        assert_eq!(stats.per_identity[0].identity, "fast");
    }

    #[test]
    fn transport_reports_unknown_and_closed_queues() {
        let mut transport = ChannelTransport::default();
        assert_eq!(
            transport.send(ConnHandle(1), b"{}"),
            Err(SendError::UnknownConnection(ConnHandle(1)))
        );

        let (tx, rx) = mpsc::channel(4);
        assert!(transport.attach(ConnHandle(1), tx.clone()));
        assert!(!transport.attach(ConnHandle(1), tx));
        drop(rx);
        assert_eq!(
            transport.send(ConnHandle(1), b"{}"),
            Err(SendError::Closed(ConnHandle(1)))
        );

        transport.close(ConnHandle(1), CloseReason::SendFailed);
        assert_eq!(transport.len(), 0);
    }

    #[test]
    fn failed_delivery_closes_with_internal_error_code() {
        let mut transport = ChannelTransport::default();
        let (tx, mut rx) = mpsc::channel(4);
        assert!(transport.attach(ConnHandle(7), tx));

        transport.close(ConnHandle(7), CloseReason::SendFailed);
        match rx.try_recv().expect("close frame") {
            Message::Close(Some(frame)) => {
                assert_eq!(frame.code, INTERNAL_ERROR);
                assert_eq!(frame.reason, "send_error");
            }
            other => panic!("expected close frame, got {other:?}"),
        }
        // the sender is gone with the outbox
        assert!(rx.try_recv().is_err());
        assert_eq!(transport.len(), 0);
    }
}
