//! Route handler functions.
//!
//! The chat socket is split into a writer task, which drains the user's
//! outbound channel into the socket, and the conversation loop, which reads
//! inbound frames one query at a time.

use std::convert::Infallible;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use axum::extract::rejection::QueryRejection;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{ConnectInfo, FromRequestParts, Query, State};
use axum::http::request::Parts;
use axum::response::{IntoResponse, Response};
use axum::Json;
use futures::{future, SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use axum::extract::ws::rejection::WebSocketUpgradeRejection;
use roam_chat::{ChatService, ConnectionContext, ServerMessage};
use roam_core::types::{SessionId, UserId};

use crate::error::ApiError;
use crate::state::AppState;

/// Outbound messages buffered per connection before senders wait.
const OUTBOUND_BUFFER: usize = 64;

// =============================================================================
// Response types
// =============================================================================

#[derive(Debug, Serialize, Deserialize)]
pub struct Endpoints {
    pub websocket: String,
    pub health: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RootResponse {
    pub message: String,
    pub endpoints: Endpoints,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub active_connections: usize,
    pub uptime_secs: u64,
}

#[derive(Debug, Deserialize)]
pub struct ChatParams {
    pub user_id: Option<String>,
    pub session_id: Option<String>,
}

// =============================================================================
// Handlers
// =============================================================================

/// GET / - service descriptor.
pub async fn root(State(state): State<AppState>) -> Json<RootResponse> {
    Json(RootResponse {
        message: "FAQ ChatBot WebSocket API".to_string(),
        endpoints: Endpoints {
            websocket: format!("{}?user_id={{user_id}}", state.config.server.ws_path),
            health: "/health".to_string(),
        },
    })
}

/// GET /health - liveness and live connection count.
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        active_connections: state.chat.connections().active_count(),
        uptime_secs: state.start_time.elapsed().as_secs(),
    })
}

/// GET /ws/chat?user_id=..&session_id=.. - upgrade to the chat socket.
pub async fn ws_chat(
    State(state): State<AppState>,
    ClientAddr(client_ip): ClientAddr,
    params: Result<Query<ChatParams>, QueryRejection>,
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    let context = match connection_context(params, client_ip) {
        Ok(context) => context,
        Err(e) => return e.into_response(),
    };
    let ws = match ws {
        Ok(ws) => ws,
        Err(rejection) => return rejection.into_response(),
    };

    let chat = Arc::clone(&state.chat);
    ws.on_upgrade(move |socket| handle_socket(chat, context, socket))
}

fn connection_context(
    params: Result<Query<ChatParams>, QueryRejection>,
    client_ip: Option<IpAddr>,
) -> Result<ConnectionContext, ApiError> {
    let Query(params) = params.map_err(|e| ApiError::BadRequest(e.body_text()))?;
    let user = params
        .user_id
        .as_deref()
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .ok_or_else(|| ApiError::BadRequest("user_id is required".to_string()))?;
    let requested_session = params
        .session_id
        .as_deref()
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .map(SessionId::new);

    Ok(ConnectionContext {
        user: UserId::new(user),
        requested_session,
        client_ip,
    })
}

async fn handle_socket(chat: Arc<ChatService>, context: ConnectionContext, socket: WebSocket) {
    let (mut outgoing, incoming) = socket.split();
    let (tx, mut rx) = mpsc::channel::<ServerMessage>(OUTBOUND_BUFFER);
    let user = context.user.clone();
    let id = chat.connections().register(user.clone(), tx);

    let writer = tokio::spawn(async move {
        while let Some(message) = rx.recv().await {
            let text = match serde_json::to_string(&message) {
                Ok(text) => text,
                Err(e) => {
                    tracing::warn!(error = %e, "Failed to encode server message");
                    continue;
                }
            };
            if outgoing.send(Message::Text(text.into())).await.is_err() {
                break;
            }
        }
        let _ = outgoing.close().await;
    });

    let inbound = incoming
        .take_while(|frame| future::ready(!matches!(frame, Ok(Message::Close(_)))))
        .filter_map(|frame| {
            future::ready(match frame {
                Ok(Message::Text(text)) => Some(Ok(text.as_str().to_owned())),
                Ok(_) => None,
                Err(e) => Some(Err(e)),
            })
        });

    chat.serve(context, id, inbound).await;
    chat.connections().release(&user, id);
    if let Err(e) = writer.await {
        tracing::warn!(user = %user, error = %e, "Socket writer task failed");
    }
}

// =============================================================================
// Extractors
// =============================================================================

/// The client's address: the first `X-Forwarded-For` hop when present,
/// otherwise the peer address of the connection.
pub struct ClientAddr(pub Option<IpAddr>);

impl<S> FromRequestParts<S> for ClientAddr
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let forwarded = parts
            .headers
            .get("x-forwarded-for")
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.split(',').next())
            .and_then(|first| first.trim().parse::<IpAddr>().ok());
        let peer = parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| addr.ip());
        Ok(ClientAddr(forwarded.or(peer)))
    }
}
