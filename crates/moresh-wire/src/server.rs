//! RelayServer — WebSocket listener for the Moresh relay.
//!
//! A [`RelayServer`] binds a TCP listener and upgrades each HTTP request to a
//! WebSocket relay link. Every link gets its own writer task and a
//! [`RelayConnection`] that processes its frames in order; the shared
//! [`Registry`] is the only state links have in common.

use crate::handler::RelayConnection;
use crate::registry::{LinkHandle, Outbound, Registry};
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{ConnectInfo, State};
use axum::response::Response;
use axum::routing::any;
use axum::Router;
use futures::{SinkExt, StreamExt};
use moresh_types::config::RelayConfig;
use std::net::SocketAddr;
use std::sync::Arc;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{debug, error, info};

/// Errors from the relay server.
#[derive(Debug, Error)]
pub enum WireError {
    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Shared state handed to every upgraded link.
#[derive(Clone)]
struct RelayState {
    registry: Registry,
    max_message_size: usize,
}

/// The running relay service.
pub struct RelayServer {
    registry: Registry,
    /// Actual bound address (useful when binding to port 0).
    local_addr: SocketAddr,
    shutdown_tx: watch::Sender<bool>,
}

impl RelayServer {
    /// Bind the configured address and start serving relay links.
    pub async fn start(
        config: RelayConfig,
        registry: Registry,
    ) -> Result<(Arc<Self>, tokio::task::JoinHandle<()>), WireError> {
        let listener = TcpListener::bind(config.listen_addr)
            .await
            .map_err(|source| WireError::Bind {
                addr: config.listen_addr,
                source,
            })?;
        let local_addr = listener.local_addr()?;
        info!("Relay: listening on ws://{}", local_addr);

        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let app = router(registry.clone(), config.max_message_size);

        let serve_handle = tokio::spawn(async move {
            let shutdown = async move {
                while shutdown_rx.changed().await.is_ok() {
                    if *shutdown_rx.borrow() {
                        break;
                    }
                }
            };
            if let Err(e) = axum::serve(
                listener,
                app.into_make_service_with_connect_info::<SocketAddr>(),
            )
            .with_graceful_shutdown(shutdown)
            .await
            {
                error!("Relay: server error: {}", e);
            }
            info!("Relay: stopped");
        });

        let server = Arc::new(Self {
            registry,
            local_addr,
            shutdown_tx,
        });
        Ok((server, serve_handle))
    }

    /// Get the actual bound address.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// WebSocket URL clients connect to.
    pub fn url(&self) -> String {
        format!("ws://{}", self.local_addr)
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Stop accepting new links.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }
}

/// Build the relay router; every path upgrades to a relay link.
fn router(registry: Registry, max_message_size: usize) -> Router {
    let state = RelayState {
        registry,
        max_message_size,
    };
    Router::new()
        .route("/", any(ws_handler))
        .fallback(ws_handler)
        .with_state(state)
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    State(state): State<RelayState>,
) -> Response {
    ws.max_message_size(state.max_message_size)
        .on_upgrade(move |socket| handle_socket(socket, addr, state.registry))
}

/// Serve one relay link until it closes.
async fn handle_socket(socket: WebSocket, addr: SocketAddr, registry: Registry) {
    let (mut sender, mut receiver) = socket.split();
    let (link, mut outbound_rx) = LinkHandle::new(Some(addr));
    debug!(link = %link.id(), "Relay: link opened from {}", addr);

    let mut send_task = tokio::spawn(async move {
        while let Some(out) = outbound_rx.recv().await {
            match out {
                Outbound::Frame(text) => {
                    if sender.send(Message::Text(text.into())).await.is_err() {
                        break;
                    }
                }
                Outbound::Close => {
                    let _ = sender.send(Message::Close(None)).await;
                    break;
                }
            }
        }
    });

    let mut conn = RelayConnection::new(link, registry);
    let mut writer_done = false;
    loop {
        tokio::select! {
            _ = &mut send_task => {
                writer_done = true;
                break;
            }
            next = receiver.next() => match next {
                Some(Ok(Message::Text(text))) => conn.handle_frame(text.as_str()),
                Some(Ok(Message::Binary(bytes))) => match std::str::from_utf8(&bytes) {
                    Ok(text) => conn.handle_frame(text),
                    Err(_) => conn.handle_frame(""),
                },
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => continue,
                Some(Err(e)) => {
                    conn.observe_error(&e);
                    break;
                }
            },
        }
    }

    debug!(link = %conn.link().id(), "Relay: link closed from {}", addr);
    conn.release();
    if !writer_done {
        // Let a queued close frame go out before the socket is dropped.
        let _ = tokio::time::timeout(std::time::Duration::from_secs(1), send_task).await;
    }
}
