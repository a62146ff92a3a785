use crate::actor::{self, DisconnectCause, EngineHandle};
use crate::config::Config;
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        ConnectInfo, Query, State,
    },
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use futures_util::{stream::SplitSink, SinkExt, StreamExt};
use presence_core::{ConnHandle, ConnectParams, EngineOptions, StampedPayloadFactory};
use std::{
    io,
    net::SocketAddr,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};
use tokio::{
    net::TcpListener,
    sync::{mpsc, watch},
};
use tracing::{debug, info, warn};

pub struct HubState {
    config: Config,
    conn_counter: AtomicU64,
    engine: EngineHandle,
}

impl HubState {
    fn new(config: Config, engine: EngineHandle) -> Self {
        Self {
            config,
            conn_counter: AtomicU64::new(0),
            engine,
        }
    }

    fn next_handle(&self) -> ConnHandle {
        ConnHandle(self.conn_counter.fetch_add(1, Ordering::SeqCst) + 1)
    }

    async fn handle_socket(
        self: Arc<Self>,
        socket: WebSocket,
        remote: SocketAddr,
        params: ConnectParams,
    ) {
        let handle = self.next_handle();
        let (ws_sender, mut ws_receiver) = socket.split();
        let (tx, rx) = mpsc::channel::<Message>(self.config.queue_capacity);
        let mut write_task = tokio::spawn(writer_loop(
            handle,
            ws_sender,
            rx,
            self.config.write_timeout,
            self.config.ping_interval,
        ));

        info!(event = "socket_open", conn_id = %handle, remote = %remote);
        if !self.engine.connect(handle, params, tx).await {
            warn!(event = "engine_unavailable", conn_id = %handle);
        }

        let mut writer_done = false;
        let mut cause = DisconnectCause::Closed;
        loop {
            tokio::select! {
                _ = &mut write_task => {
                    writer_done = true;
                    break;
                }
                next = ws_receiver.next() => {
                    let msg = match next {
                        Some(Ok(value)) => value,
                        Some(Err(err)) => {
                            warn!(event = "read_error", conn_id = %handle, error = %err);
                            cause = DisconnectCause::Errored;
                            break;
                        }
                        None => break,
                    };
                    // Oversized frames never get here: the upgrade caps them
                    // and the socket fails with a read error instead.
                    let size = match msg {
                        Message::Text(text) => text.len(),
                        Message::Binary(bytes) => bytes.len(),
                        Message::Close(_) => {
                            info!(event = "client_close", conn_id = %handle);
                            break;
                        }
                        Message::Ping(_) | Message::Pong(_) => continue,
                    };
                    debug!(event = "message_ignored", conn_id = %handle, size = size);
                }
            }
        }

        self.engine.disconnect(handle, cause).await;
        if !writer_done {
            let _ = write_task.await;
        }
        info!(event = "socket_closed", conn_id = %handle, cause = ?cause);
    }
}

pub fn router(hub: Arc<HubState>) -> Router {
    Router::new()
        .route("/ws", get(ws_handler))
        .route("/stats", get(stats_handler))
        .route("/health", get(|| async { "ok" }))
        .with_state(hub)
}

/// Serves until `shutdown` flips to `true`.
pub async fn serve(
    listener: TcpListener,
    config: Config,
    mut shutdown: watch::Receiver<bool>,
) -> io::Result<()> {
    let options = EngineOptions {
        announce_rejoins: config.announce_rejoins,
    };
    let (engine, _engine_task) = actor::spawn(StampedPayloadFactory, options, config.queue_capacity);
    let addr = listener.local_addr()?;
    let hub = Arc::new(HubState::new(config, engine));
    let app = router(hub);

    info!(event = "hub_start", addr = %addr);
    let signal = async move {
        while shutdown.changed().await.is_ok() {
            if *shutdown.borrow() {
                break;
            }
        }
    };
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(signal)
    .await?;
    info!(event = "hub_stop", addr = %addr);
    Ok(())
}

/// Query problems never refuse the upgrade. Whatever survives parsing goes
/// to the engine, which answers a bad position with an `error` message.
async fn ws_handler(
    ws: WebSocketUpgrade,
    ConnectInfo(remote): ConnectInfo<SocketAddr>,
    query: Option<Query<Vec<(String, String)>>>,
    State(hub): State<Arc<HubState>>,
) -> impl IntoResponse {
    let params = match query {
        Some(Query(pairs)) => ConnectParams::from_pairs(pairs),
        None => {
            warn!(event = "query_invalid", remote = %remote);
            ConnectParams::default()
        }
    };
    let limit = hub.config.max_message_bytes;
    ws.max_message_size(limit)
        .max_frame_size(limit)
        .on_upgrade(move |socket| async move {
            hub.handle_socket(socket, remote, params).await;
        })
}

async fn stats_handler(State(hub): State<Arc<HubState>>) -> impl IntoResponse {
    match hub.engine.stats().await {
        Some(stats) => Json(stats).into_response(),
        None => StatusCode::SERVICE_UNAVAILABLE.into_response(),
    }
}

async fn writer_loop(
    handle: ConnHandle,
    mut ws_sender: SplitSink<WebSocket, Message>,
    mut rx: mpsc::Receiver<Message>,
    write_timeout: Duration,
    ping_interval: Duration,
) {
    let mut ping = tokio::time::interval(ping_interval);
    ping.tick().await;
    loop {
        let msg = tokio::select! {
            next = rx.recv() => match next {
                Some(value) => value,
                None => break,
            },
            _ = ping.tick() => Message::Ping(Vec::new()),
        };
        let closing = matches!(msg, Message::Close(_));
        match tokio::time::timeout(write_timeout, ws_sender.send(msg)).await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => {
                warn!(event = "write_error", conn_id = %handle, error = %err);
                break;
            }
            Err(_) => {
                warn!(event = "write_timeout", conn_id = %handle);
                break;
            }
        }
        if closing {
            break;
        }
    }
}
