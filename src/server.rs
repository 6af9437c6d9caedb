//! WebSocket transport for the control panel.
//!
//! `GET /ws` carries [`ClientCommand`]s in and [`ServerEvent`]s out, one JSON
//! object per text frame. `GET /health` answers `ok`.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use futures::{SinkExt, StreamExt};
use tokio::sync::{mpsc, Notify};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::error::ScrapeError;
use crate::events::{ClientCommand, EventSink, ServerEvent};
use crate::scrape::RunController;

#[derive(Clone)]
pub struct AppState {
    controller: Arc<RunController>,
    shutdown: Arc<Notify>,
}

impl AppState {
    pub fn new(controller: Arc<RunController>) -> Self {
        Self {
            controller,
            shutdown: Arc::new(Notify::new()),
        }
    }
}

/// Whether the connection loop should keep reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Shutdown,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/ws", get(ws_handler))
        .route("/health", get(health))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Bind `addr` and serve until Ctrl-C or a `shutdown` command.
pub async fn serve(addr: SocketAddr, controller: Arc<RunController>) -> Result<()> {
    let state = AppState::new(controller);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    tracing::info!(%addr, "control panel listening on ws://{addr}/ws");

    let signal = shutdown_signal(state.clone());
    axum::serve(listener, router(state))
        .with_graceful_shutdown(signal)
        .await
        .context("Server error")?;

    tracing::info!("server stopped");
    Ok(())
}

async fn shutdown_signal(state: AppState) {
    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            if let Err(err) = result {
                tracing::error!(error = %err, "failed to listen for ctrl-c");
            }
            tracing::info!("received ctrl-c, closing browser");
            state.controller.shutdown().await;
        }
        _ = state.shutdown.notified() => {
            tracing::info!("shutdown requested by client");
        }
    }
}

async fn health() -> &'static str {
    "ok"
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    tracing::info!("control panel connected");
    let (mut outgoing, mut incoming) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<ServerEvent>();

    // Runs keep their own sink handle, so this outlives the read loop until
    // the last event of an in-flight run has been written.
    tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            let text = match serde_json::to_string(&event) {
                Ok(text) => text,
                Err(err) => {
                    tracing::warn!(error = %err, "failed to encode event");
                    continue;
                }
            };
            if outgoing.send(Message::Text(text.into())).await.is_err() {
                break;
            }
        }
    });

    let sink: Arc<dyn EventSink> = Arc::new(tx);
    while let Some(message) = incoming.next().await {
        let message = match message {
            Ok(message) => message,
            Err(err) => {
                tracing::debug!(error = %err, "websocket read failed");
                break;
            }
        };
        let text = match message {
            Message::Text(text) => text,
            Message::Close(_) => break,
            _ => continue,
        };
        if handle_frame(&state, text.as_str(), &sink).await == Flow::Shutdown {
            break;
        }
    }

    tracing::info!("control panel disconnected");
}

/// Decode one text frame and act on it.
pub async fn handle_frame(state: &AppState, text: &str, sink: &Arc<dyn EventSink>) -> Flow {
    match serde_json::from_str::<ClientCommand>(text) {
        Ok(command) => handle_command(state, command, sink).await,
        Err(err) => {
            tracing::debug!(error = %err, "undecodable frame");
            sink.emit(ServerEvent::error(format!("Unrecognized message: {err}")));
            Flow::Continue
        }
    }
}

pub async fn handle_command(
    state: &AppState,
    command: ClientCommand,
    sink: &Arc<dyn EventSink>,
) -> Flow {
    tracing::debug!(command = command.name(), "command received");
    let controller = &state.controller;

    match command {
        ClientCommand::GetConfig => {
            sink.emit(ServerEvent::Config(controller.config_snapshot()));
        }
        ClientCommand::StartCrawling(payload) => {
            let request = match payload.resolve(controller.request_defaults()) {
                Ok(request) => request,
                Err(err) => {
                    tracing::info!(error = %err, "start rejected");
                    sink.emit(ServerEvent::error(err.to_string()));
                    return Flow::Continue;
                }
            };
            match controller.start(request, Arc::clone(sink)) {
                // The run reports through the sink; nothing to wait for here.
                Ok(_handle) => {}
                Err(ScrapeError::Busy) => {}
                Err(err) => sink.emit(ServerEvent::error(err.to_string())),
            }
        }
        ClientCommand::StopCrawling => {
            if !controller.stop(sink.as_ref()) {
                sink.emit(ServerEvent::info("No crawl is running."));
            }
        }
        ClientCommand::Shutdown => {
            sink.emit(ServerEvent::info("Shutting down..."));
            controller.shutdown().await;
            state.shutdown.notify_one();
            return Flow::Shutdown;
        }
    }
    Flow::Continue
}
