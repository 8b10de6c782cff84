//! Per-connection conversation flow.
//!
//! A connection is greeted, bound to a session, and then served one query
//! at a time: the next inbound frame is read only after the current turn
//! has ended, so turns on one connection never interleave.

use std::fmt::Display;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::{Stream, StreamExt};

use roam_core::config::{EngineConfig, ResetMode};
use roam_core::types::{Caller, SessionId, UserId};

use crate::connection::{ConnectionId, ConnectionManager};
use crate::engine::{GenerationEngine, TurnRequest};
use crate::error::ChatError;
use crate::protocol::{self, ServerMessage};
use crate::reconciler::{stream_turn, MessageSink, StreamReconciler};
use crate::session::SessionRegistry;

/// Who is on the other end of a connection.
#[derive(Debug, Clone)]
pub struct ConnectionContext {
    pub user: UserId,
    pub requested_session: Option<SessionId>,
    pub client_ip: Option<IpAddr>,
}

/// Shared chat state: sessions, live connections and the engine.
pub struct ChatService {
    sessions: Arc<SessionRegistry>,
    connections: Arc<ConnectionManager>,
    engine: Arc<dyn GenerationEngine>,
    turn_timeout: Duration,
    reset_mode: ResetMode,
}

impl ChatService {
    pub fn new(engine: Arc<dyn GenerationEngine>, config: &EngineConfig) -> Self {
        Self {
            sessions: Arc::new(SessionRegistry::new()),
            connections: Arc::new(ConnectionManager::new()),
            engine,
            turn_timeout: Duration::from_secs(config.turn_timeout_secs),
            reset_mode: config.reset_mode,
        }
    }

    pub fn sessions(&self) -> &Arc<SessionRegistry> {
        &self.sessions
    }

    pub fn connections(&self) -> &Arc<ConnectionManager> {
        &self.connections
    }

    /// Serve registration `connection` until `inbound` ends, the client goes
    /// away, or a newer connection for the same user replaces it. Returns the
    /// number of queries handled.
    pub async fn serve<S, E>(
        &self,
        context: ConnectionContext,
        connection: ConnectionId,
        inbound: S,
    ) -> u64
    where
        S: Stream<Item = Result<String, E>>,
        E: Display,
    {
        let user = &context.user;
        let sink = UserSink {
            connections: &self.connections,
            user,
            connection,
        };

        if !sink.deliver(ServerMessage::welcome(user)).await {
            return 0;
        }

        let requested = context
            .requested_session
            .clone()
            .or_else(|| self.sessions.current(user));
        let session_id = self.sessions.resolve(user, requested.as_ref());
        let created = ServerMessage::SessionCreated {
            session_id: session_id.clone(),
        };
        if !sink.deliver(created).await {
            return 0;
        }

        let caller = Caller::new(user.clone()).with_ip(context.client_ip);
        let mut inbound = std::pin::pin!(inbound);
        let mut handled = 0;

        while let Some(frame) = inbound.next().await {
            let raw = match frame {
                Ok(raw) => raw,
                Err(e) => {
                    tracing::warn!(user = %user, error = %e, "Inbound read failed");
                    break;
                }
            };

            let query = match protocol::parse_query(&raw) {
                Ok(query) => query,
                Err(e) => {
                    tracing::debug!(user = %user, error = %e, "Rejected client frame");
                    if !sink.deliver(protocol::rejection(&e)).await {
                        break;
                    }
                    continue;
                }
            };

            handled += 1;
            let info = ServerMessage::Info {
                conversation_count: handled,
                session_id: session_id.clone(),
            };
            if !sink.deliver(info).await {
                break;
            }

            let request = TurnRequest {
                caller: caller.clone(),
                session_id: session_id.clone(),
                query,
            };
            if let Err(ChatError::TransportClosed) = self.run_turn(request, &sink).await {
                tracing::info!(user = %user, "Client left during a query");
                break;
            }
        }

        tracing::info!(user = %user, session = %session_id, queries = handled, "Connection finished");
        handled
    }

    /// Run one query turn: start, streamed fragments, then end or error.
    /// Only a closed transport is returned as an error; every other
    /// failure is reported to the client.
    async fn run_turn(&self, request: TurnRequest, sink: &UserSink<'_>) -> Result<(), ChatError> {
        if !sink.deliver(ServerMessage::start()).await {
            return Err(ChatError::TransportClosed);
        }

        let user = request.caller.user.clone();
        let session = request.session_id.clone();
        let started = std::time::Instant::now();
        let mut reconciler = StreamReconciler::new(self.reset_mode);

        let turn = async {
            match self.engine.run_turn(request).await {
                Ok(events) => stream_turn(events, &mut reconciler, sink).await,
                Err(e) => Err(e),
            }
        };
        let outcome = match tokio::time::timeout(self.turn_timeout, turn).await {
            Ok(result) => result,
            Err(_) => Err(ChatError::Timeout(self.turn_timeout.as_secs())),
        };

        let closing = match outcome {
            Ok(()) => {
                tracing::info!(
                    user = %user,
                    session = %session,
                    chars = reconciler.accumulated().chars().count(),
                    resets = reconciler.resets(),
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Turn complete"
                );
                ServerMessage::end()
            }
            Err(ChatError::TransportClosed) => return Err(ChatError::TransportClosed),
            Err(e) => {
                tracing::error!(user = %user, session = %session, error = %e, "Turn failed");
                ServerMessage::turn_failed(&e)
            }
        };

        if sink.deliver(closing).await {
            Ok(())
        } else {
            Err(ChatError::TransportClosed)
        }
    }
}

/// Delivers to one registration's transport, and nowhere once it is replaced.
struct UserSink<'a> {
    connections: &'a ConnectionManager,
    user: &'a UserId,
    connection: ConnectionId,
}

#[async_trait]
impl MessageSink for UserSink<'_> {
    async fn deliver(&self, message: ServerMessage) -> bool {
        self.connections.send_to(self.user, self.connection, message).await
    }
}
