//! Client/server wire protocol over the chat socket.
//!
//! Every server message is a JSON object tagged by `type`. The client sends
//! `{"query": "..."}` objects.

use serde::{Deserialize, Serialize};

use roam_core::types::{SessionId, UserId};

use crate::error::ChatError;

pub const WELCOME_TEXT: &str = "歡迎使用 FAQ 智能助手！";
pub const START_TEXT: &str = "開始處理您的問題...";
pub const END_TEXT: &str = "響應完成";
pub const EMPTY_QUERY_TEXT: &str = "請提供有效的問題";
pub const INVALID_JSON_TEXT: &str = "無效的 JSON 格式";

/// Messages pushed from the server to a connected client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    Welcome { message: String, user_id: UserId },
    SessionCreated { session_id: SessionId },
    Info { conversation_count: u64, session_id: SessionId },
    Start { message: String },
    Partial { content: String },
    Complete { content: String },
    End { message: String },
    Error { message: String },
}

impl ServerMessage {
    pub fn welcome(user_id: &UserId) -> Self {
        ServerMessage::Welcome {
            message: WELCOME_TEXT.to_string(),
            user_id: user_id.clone(),
        }
    }

    pub fn start() -> Self {
        ServerMessage::Start {
            message: START_TEXT.to_string(),
        }
    }

    pub fn end() -> Self {
        ServerMessage::End {
            message: END_TEXT.to_string(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        ServerMessage::Error {
            message: message.into(),
        }
    }

    /// The error message sent when a turn fails.
    pub fn turn_failed(err: &ChatError) -> Self {
        Self::error(format!("處理時發生錯誤: {err}"))
    }
}

/// A frame sent by the client.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ClientMessage {
    #[serde(default)]
    pub query: String,
}

/// Parse a raw client frame into a trimmed, non-empty query.
pub fn parse_query(raw: &str) -> Result<String, ChatError> {
    let message: ClientMessage =
        serde_json::from_str(raw).map_err(|e| ChatError::InvalidMessage(e.to_string()))?;
    let query = message.query.trim();
    if query.is_empty() {
        return Err(ChatError::EmptyQuery);
    }
    Ok(query.to_string())
}

/// The protocol reply for a frame that could not be turned into a query.
pub fn rejection(err: &ChatError) -> ServerMessage {
    match err {
        ChatError::EmptyQuery => ServerMessage::error(EMPTY_QUERY_TEXT),
        _ => ServerMessage::error(INVALID_JSON_TEXT),
    }
}
