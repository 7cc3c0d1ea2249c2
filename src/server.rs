//! HTTP + WebSocket transport (single port)
//!
//! `GET /` upgrades to a relay session when the request asks for a
//! WebSocket and answers with a plain text banner otherwise. `GET /ws`
//! always expects an upgrade and `GET /health` is a bare liveness probe.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use axum::{
    Router,
    body::Bytes,
    extract::{
        State,
        ws::{Message, WebSocket, WebSocketUpgrade, rejection::WebSocketUpgradeRejection},
    },
    response::{IntoResponse, Response},
    routing::get,
};
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::envelope::{self, ServerMessage};
use crate::registry::Registry;
use crate::router::MessageRouter;
use crate::session::Session;

/// Body of `GET /` for plain HTTP requests
pub const BANNER: &str = "talkrelay WebSocket relay is up";

/// Shared state handed to every connection
#[derive(Clone)]
pub struct AppState {
    router: Arc<MessageRouter>,
    outbound_capacity: usize,
    ping_period: Option<Duration>,
}

impl AppState {
    pub fn new(router: Arc<MessageRouter>, config: &Config) -> Self {
        Self {
            router,
            outbound_capacity: config.outbound_capacity,
            ping_period: config.ping_period(),
        }
    }

    pub fn registry(&self) -> &Arc<Registry> {
        self.router.registry()
    }
}

/// Build the HTTP application
pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/", get(root_handler))
        .route("/ws", get(ws_handler))
        .route("/health", get(health_handler))
        .with_state(state)
}

/// Serve until SIGINT/SIGTERM
pub async fn serve(listener: TcpListener, state: AppState) -> anyhow::Result<()> {
    serve_with_shutdown(listener, state, shutdown_signal()).await
}

/// Serve until `shutdown` completes
pub async fn serve_with_shutdown<F>(
    listener: TcpListener,
    state: AppState,
    shutdown: F,
) -> anyhow::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    axum::serve(listener, app(state))
        .with_graceful_shutdown(shutdown)
        .await
        .context("relay server exited")
}

async fn root_handler(
    State(state): State<AppState>,
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    match ws {
        Ok(ws) => upgrade(ws, state),
        Err(_) => BANNER.into_response(),
    }
}

async fn ws_handler(State(state): State<AppState>, ws: WebSocketUpgrade) -> Response {
    upgrade(ws, state)
}

async fn health_handler() -> &'static str {
    "ok"
}

fn upgrade(ws: WebSocketUpgrade, state: AppState) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// Run one client connection to completion
async fn handle_socket(socket: WebSocket, state: AppState) {
    let (handle, outbound_rx) = state.registry().open_channel(state.outbound_capacity);
    let conn_id = handle.conn_id();
    info!(conn_id, "new connection");

    let (sink, mut stream) = socket.split();
    let writer = tokio::spawn(write_loop(sink, outbound_rx, state.ping_period, conn_id));
    let mut session = Session::new(handle.clone(), state.router.clone());

    while let Some(frame) = stream.next().await {
        let reply = match frame {
            Ok(Message::Text(text)) => session.handle_frame(text.as_str().as_bytes()).await,
            Ok(Message::Binary(data)) => session.handle_frame(&data).await,
            Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => continue,
            Ok(Message::Close(_)) => {
                debug!(conn_id, "close frame received");
                break;
            }
            Err(e) => {
                warn!(conn_id, error = %e, "WebSocket read error");
                break;
            }
        };

        if handle.send(reply).await.is_err() {
            debug!(conn_id, "writer gone, ending session");
            break;
        }
    }

    writer.abort();
    session.close();
}

/// Drain the outbound queue into the socket, pinging while idle
async fn write_loop(
    mut sink: SplitSink<WebSocket, Message>,
    mut outbound_rx: mpsc::Receiver<ServerMessage>,
    ping_period: Option<Duration>,
    conn_id: u64,
) {
    let mut ping = ping_period.map(|period| {
        let mut interval = tokio::time::interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        interval
    });

    loop {
        tokio::select! {
            message = outbound_rx.recv() => {
                let Some(message) = message else { break };
                let text = match envelope::encode(&message) {
                    Ok(text) => text,
                    Err(e) => {
                        warn!(conn_id, error = %e, "failed to encode envelope");
                        continue;
                    }
                };
                if let Err(e) = sink.send(Message::Text(text.into())).await {
                    debug!(conn_id, error = %e, "WebSocket write failed");
                    break;
                }
            }
            _ = next_tick(&mut ping) => {
                if sink.send(Message::Ping(Bytes::new())).await.is_err() {
                    debug!(conn_id, "keepalive ping failed");
                    break;
                }
            }
        }
    }
}

async fn next_tick(interval: &mut Option<Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}

/// Spawn the registry sweep task
pub fn spawn_sweep_task(registry: Arc<Registry>, period: Duration) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        loop {
            interval.tick().await;
            let removed = registry.sweep();
            if removed > 0 {
                debug!(
                    removed,
                    identities = registry.len(),
                    online = registry.online_count(),
                    "registry swept"
                );
            }
        }
    });
}

/// Future that completes on SIGINT or SIGTERM
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("shutdown signal received");
}
