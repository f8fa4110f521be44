//! Live Update Channel: renders pushed over a WebSocket.
//!
//! Each connection owns a [`LiveSession`]. Inbound frames are validated
//! here; accepted render commands go through a per-session [`Coalescer`]
//! so a burst of edits produces one render carrying the latest source.

use crate::cadence::{CadencePolicy, Coalescer};
use crate::config::LiveConfig;
use crate::protocol::{ClientMessage, RenderCommand, RenderReply, ServerMessage};
use crate::session::{LiveSession, Outbound, SessionState};
use crate::state::AppState;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::{
    extract::State,
    http::{HeaderMap, header},
    response::Response,
};
use futures::{SinkExt, StreamExt};
use mmdr_render::RenderCoordinator;
use mmdr_trace::{live_session_span, render_span};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{Instrument, Span, debug, info, warn};

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Response {
    let peer = headers
        .get("x-forwarded-for")
        .or_else(|| headers.get(header::USER_AGENT))
        .and_then(|v| v.to_str().ok())
        .unwrap_or("-")
        .to_string();

    if state.config.live.debug_verbose {
        debug!(%peer, "Live channel upgrade requested");
    }

    let queue = state.config.live.outbound_queue.max(1);
    ws.on_upgrade(move |socket| {
        let (tx, rx) = mpsc::channel(queue);
        let session = Arc::new(LiveSession::new(tx));
        let span = live_session_span(&session.id.to_string(), &peer);
        handle_socket(socket, state, session, rx).instrument(span)
    })
}

async fn handle_socket(
    socket: WebSocket,
    state: Arc<AppState>,
    session: Arc<LiveSession>,
    mut outbound: mpsc::Receiver<Outbound>,
) {
    let live = state.config.live.clone();
    let (mut sink, mut stream) = socket.split();
    let mut termination = session.termination();

    state.sessions.register(Arc::clone(&session));
    session.set_state(SessionState::Open);
    info!(session_id = %session.id, open = state.sessions.len(), "Live session opened");

    let verbose = live.debug_verbose;
    let writer = tokio::spawn(
        async move {
            while let Some(frame) = outbound.recv().await {
                let message = match frame {
                    Outbound::Ping => Message::Ping(Default::default()),
                    Outbound::Message(message) => match serde_json::to_string(&message) {
                        Ok(json) => Message::Text(json.into()),
                        Err(e) => {
                            warn!(error = %e, "Failed to encode live message");
                            continue;
                        }
                    },
                };
                if verbose {
                    debug!(?message, "Live frame out");
                }
                if sink.send(message).await.is_err() {
                    break;
                }
            }
        }
        .in_current_span(),
    );

    let (renders, _render_task) = spawn_renderer(&state.coordinator, &session, &live);

    loop {
        tokio::select! {
            frame = stream.next() => match frame {
                Some(Ok(message)) => {
                    if verbose {
                        debug!(?message, "Live frame in");
                    }
                    if !handle_frame(message, &session, &renders, &live) {
                        break;
                    }
                }
                Some(Err(e)) => {
                    debug!(error = %e, "Live socket error");
                    break;
                }
                None => break,
            },
            _ = termination.changed() => break,
        }
    }

    // Renders still running finish in the background; their replies are dropped.
    drop(renders);
    writer.abort();
    session.set_state(SessionState::Closed);
    state.sessions.remove(&session.id);

    let reason = session
        .close_reason()
        .map(|r| r.to_string())
        .unwrap_or_else(|| "peer-closed".to_string());
    info!(
        session_id = %session.id,
        %reason,
        idle_ms = session.idle_for().as_millis() as u64,
        alive = session.is_alive(),
        open = state.sessions.len(),
        "Live session closed"
    );
}

/// Handle one inbound frame. Returns false when the connection should end.
fn handle_frame(
    message: Message,
    session: &LiveSession,
    renders: &Coalescer<RenderCommand>,
    live: &LiveConfig,
) -> bool {
    let text = match message {
        Message::Text(text) => text,
        Message::Pong(_) => {
            session.mark_alive();
            return true;
        }
        Message::Close(_) => return false,
        Message::Ping(_) => return true,
        Message::Binary(_) => {
            session.send(ServerMessage::Error {
                message: "Binary frames are not supported".to_string(),
            });
            return true;
        }
    };

    session.touch();

    if text.as_str().len() > live.max_frame_bytes {
        session.send(ServerMessage::Error {
            message: format!("Message too large (limit {} bytes)", live.max_frame_bytes),
        });
        return true;
    }

    match serde_json::from_str::<ClientMessage>(text.as_str()) {
        Ok(ClientMessage::Ping) => {
            session.send(ServerMessage::Pong);
        }
        Ok(ClientMessage::Render(command)) => match validate(&command, live) {
            Ok(()) => renders.submit(command),
            Err(message) => {
                session.send(ServerMessage::RenderResult(RenderReply::failure(message)));
            }
        },
        Err(e) => {
            session.send(ServerMessage::Error {
                message: format!("Invalid message: {}", e),
            });
        }
    }
    true
}

fn validate(command: &RenderCommand, live: &LiveConfig) -> Result<(), &'static str> {
    match command.mermaid.as_deref() {
        None => Err("mermaid code missing"),
        Some(source) if source.trim().is_empty() => Err("mermaid code missing"),
        Some(source) if source.chars().count() > live.max_diagram_chars => {
            Err("diagram too large")
        }
        Some(_) => Ok(()),
    }
}

fn spawn_renderer(
    coordinator: &Arc<RenderCoordinator>,
    session: &Arc<LiveSession>,
    live: &LiveConfig,
) -> (Coalescer<RenderCommand>, tokio::task::JoinHandle<()>) {
    let coordinator = Arc::clone(coordinator);
    let session = Arc::clone(session);
    let policy = CadencePolicy::new(live.settle, live.min_interval);
    let span = Span::current();

    Coalescer::spawn(policy, move |command: RenderCommand| {
        let coordinator = Arc::clone(&coordinator);
        let session = Arc::clone(&session);
        async move {
            let reply = render_command(&coordinator, &command).await;
            session.send(ServerMessage::RenderResult(reply));
        }
        .instrument(span.clone())
    })
}

async fn render_command(coordinator: &RenderCoordinator, command: &RenderCommand) -> RenderReply {
    let Some(request) = command.to_request() else {
        return RenderReply::failure("mermaid code missing");
    };

    let span = render_span("live", request.format.as_str());
    match coordinator.convert(&request).instrument(span.clone()).await {
        Ok(result) => {
            span.record("mmdr.cache_status", result.cache_status.as_str());
            span.record("mmdr.cache_key", result.cache_key.as_str());
            RenderReply::success(&result)
        }
        Err(e) => {
            warn!(error = %e, "Live render failed");
            RenderReply::failure(e.to_string())
        }
    }
}
