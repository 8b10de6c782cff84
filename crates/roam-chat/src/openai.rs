//! Engine backed by an OpenAI-compatible chat completions API.
//!
//! Each turn streams the completion over SSE, forwarding the growing answer
//! as partial snapshots. When the model asks for a stamp capability the
//! call is run for the turn's caller, its output is fed back, and the next
//! round starts a fresh answer text.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use roam_core::config::EngineConfig;
use roam_core::error::RoamError;
use roam_core::types::SessionId;

use crate::capabilities::{invoke_by_name, Capability, StampCapabilities};
use crate::engine::{GenerationEngine, SnapshotEvent, SnapshotStream, TurnRequest};
use crate::error::ChatError;

/// Messages kept per session, oldest dropped first. Always even so the
/// history starts with a user message.
const MAX_HISTORY_MESSAGES: usize = 40;

/// Bytes of an error body quoted in engine errors.
const ERROR_BODY_LIMIT: usize = 200;

type SnapshotSender = mpsc::Sender<Result<SnapshotEvent, ChatError>>;

pub struct OpenAiEngine {
    inner: Arc<Inner>,
}

struct Inner {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
    model: String,
    instruction: String,
    max_tool_rounds: u32,
    capabilities: Arc<dyn StampCapabilities>,
    histories: Mutex<HashMap<SessionId, Vec<Value>>>,
}

impl OpenAiEngine {
    pub fn new(
        config: &EngineConfig,
        api_key: String,
        instruction: String,
        capabilities: Arc<dyn StampCapabilities>,
    ) -> Result<Self, RoamError> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(config.turn_timeout_secs))
            .build()
            .map_err(|e| RoamError::Engine(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            inner: Arc::new(Inner {
                client,
                endpoint: format!("{}/chat/completions", config.base_url.trim_end_matches('/')),
                api_key,
                model: config.model.clone(),
                instruction,
                max_tool_rounds: config.max_tool_rounds,
                capabilities,
                histories: Mutex::new(HashMap::new()),
            }),
        })
    }
}

#[async_trait]
impl GenerationEngine for OpenAiEngine {
    async fn run_turn(&self, request: TurnRequest) -> Result<SnapshotStream, ChatError> {
        let (tx, rx) = mpsc::channel(32);
        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            match inner.answer(&request, &tx).await {
                Ok(()) => {}
                Err(ChatError::TransportClosed) => {
                    tracing::debug!(session = %request.session_id, "Turn abandoned by reader");
                }
                Err(e) => {
                    let _ = tx.send(Err(e)).await;
                }
            }
        });
        Ok(ReceiverStream::new(rx).boxed())
    }
}

impl Inner {
    async fn answer(&self, request: &TurnRequest, tx: &SnapshotSender) -> Result<(), ChatError> {
        let history = self.history(&request.session_id);
        let mut messages = Vec::with_capacity(history.len() + 2);
        messages.push(json!({"role": "system", "content": self.instruction}));
        messages.extend(history);
        messages.push(json!({"role": "user", "content": request.query}));

        let mut rounds = 0;
        loop {
            let reply = self.complete(&messages, tx).await?;
            if reply.tool_calls.is_empty() {
                emit(tx, SnapshotEvent::complete(reply.text.clone())).await?;
                self.remember(&request.session_id, &request.query, &reply.text);
                return Ok(());
            }

            rounds += 1;
            if rounds > self.max_tool_rounds {
                return Err(ChatError::Engine(format!(
                    "model requested more than {} tool rounds",
                    self.max_tool_rounds
                )));
            }

            messages.push(reply.assistant_message());
            for call in &reply.tool_calls {
                let output =
                    match invoke_by_name(&call.name, self.capabilities.as_ref(), &request.caller)
                        .await
                    {
                        Ok(value) => value,
                        Err(e) => {
                            tracing::warn!(tool = %call.name, error = %e, "Tool call rejected");
                            json!({"error": e.to_string()})
                        }
                    };
                tracing::info!(
                    user = %request.caller.user,
                    tool = %call.name,
                    round = rounds,
                    "Capability invoked"
                );
                messages.push(json!({
                    "role": "tool",
                    "tool_call_id": call.id,
                    "content": output.to_string(),
                }));
            }
        }
    }

    /// Stream one completion, forwarding text snapshots as they grow.
    async fn complete(&self, messages: &[Value], tx: &SnapshotSender) -> Result<Reply, ChatError> {
        let tools: Vec<Value> = Capability::ALL.iter().map(|c| c.tool_spec()).collect();
        let body = json!({
            "model": self.model,
            "messages": messages,
            "stream": true,
            "tools": tools,
        });

        tracing::debug!(endpoint = %self.endpoint, model = %self.model, "Requesting completion");
        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            tracing::error!(status = status.as_u16(), "Completion request failed");
            return Err(ChatError::Engine(format!(
                "API error {}: {}",
                status.as_u16(),
                truncate_utf8(&text, ERROR_BODY_LIMIT)
            )));
        }

        let mut reply = Reply::default();
        let mut bytes = response.bytes_stream();
        let mut buffer: Vec<u8> = Vec::new();
        'read: while let Some(chunk) = bytes.next().await {
            buffer.extend_from_slice(&chunk?);
            while let Some(newline) = buffer.iter().position(|b| *b == b'\n') {
                let line: Vec<u8> = buffer.drain(..=newline).collect();
                let line = String::from_utf8_lossy(&line);
                let Some(data) = line.trim().strip_prefix("data:") else {
                    continue;
                };
                let data = data.trim();
                if data == "[DONE]" {
                    break 'read;
                }
                if let Some(delta) = parse_sse_chunk(data) {
                    if reply.absorb(delta) {
                        emit(tx, SnapshotEvent::partial(reply.text.clone())).await?;
                    }
                }
            }
        }
        tracing::debug!(
            finish_reason = ?reply.finish_reason,
            chars = reply.text.chars().count(),
            tool_calls = reply.tool_calls.len(),
            "Completion round finished"
        );
        Ok(reply)
    }

    fn history(&self, session: &SessionId) -> Vec<Value> {
        self.histories
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(session)
            .cloned()
            .unwrap_or_default()
    }

    fn remember(&self, session: &SessionId, query: &str, answer: &str) {
        let mut histories = self.histories.lock().unwrap_or_else(PoisonError::into_inner);
        let history = histories.entry(session.clone()).or_default();
        history.push(json!({"role": "user", "content": query}));
        history.push(json!({"role": "assistant", "content": answer}));
        if history.len() > MAX_HISTORY_MESSAGES {
            let excess = history.len() - MAX_HISTORY_MESSAGES;
            history.drain(..excess);
        }
    }
}

async fn emit(tx: &SnapshotSender, event: SnapshotEvent) -> Result<(), ChatError> {
    tx.send(Ok(event))
        .await
        .map_err(|_| ChatError::TransportClosed)
}

/// One parsed SSE chunk.
#[derive(Debug, Default, PartialEq)]
struct ChunkDelta {
    content: Option<String>,
    tool_calls: Vec<ToolCallDelta>,
    finish_reason: Option<String>,
}

#[derive(Debug, PartialEq)]
struct ToolCallDelta {
    index: usize,
    id: Option<String>,
    name: Option<String>,
    arguments: Option<String>,
}

fn parse_sse_chunk(data: &str) -> Option<ChunkDelta> {
    let v: Value = serde_json::from_str(data).ok()?;
    let choice = v["choices"].get(0)?;
    let delta = &choice["delta"];

    let tool_calls = delta["tool_calls"]
        .as_array()
        .map(|calls| {
            calls
                .iter()
                .map(|tc| ToolCallDelta {
                    index: tc["index"].as_u64().unwrap_or(0) as usize,
                    id: tc["id"].as_str().map(str::to_string),
                    name: tc["function"]["name"].as_str().map(str::to_string),
                    arguments: tc["function"]["arguments"].as_str().map(str::to_string),
                })
                .collect()
        })
        .unwrap_or_default();

    Some(ChunkDelta {
        content: delta["content"].as_str().map(str::to_string),
        tool_calls,
        finish_reason: choice["finish_reason"].as_str().map(str::to_string),
    })
}

#[derive(Debug, Default, Clone, PartialEq)]
struct ToolCall {
    id: String,
    name: String,
    arguments: String,
}

/// Accumulated result of one completion round.
#[derive(Debug, Default)]
struct Reply {
    text: String,
    tool_calls: Vec<ToolCall>,
    finish_reason: Option<String>,
}

impl Reply {
    /// Fold a delta in. Returns whether the answer text grew.
    fn absorb(&mut self, delta: ChunkDelta) -> bool {
        for call in delta.tool_calls {
            if self.tool_calls.len() <= call.index {
                self.tool_calls.resize(call.index + 1, ToolCall::default());
            }
            let slot = &mut self.tool_calls[call.index];
            if let Some(id) = call.id {
                slot.id = id;
            }
            if let Some(name) = call.name {
                slot.name.push_str(&name);
            }
            if let Some(arguments) = call.arguments {
                slot.arguments.push_str(&arguments);
            }
        }
        if delta.finish_reason.is_some() {
            self.finish_reason = delta.finish_reason;
        }
        match delta.content {
            Some(content) if !content.is_empty() => {
                self.text.push_str(&content);
                true
            }
            _ => false,
        }
    }

    fn assistant_message(&self) -> Value {
        let calls: Vec<Value> = self
            .tool_calls
            .iter()
            .map(|call| {
                json!({
                    "id": call.id,
                    "type": "function",
                    "function": {"name": call.name, "arguments": call.arguments},
                })
            })
            .collect();
        let content = if self.text.is_empty() {
            Value::Null
        } else {
            Value::String(self.text.clone())
        };
        json!({"role": "assistant", "content": content, "tool_calls": calls})
    }
}

fn truncate_utf8(text: &str, max_bytes: usize) -> &str {
    if text.len() <= max_bytes {
        return text;
    }
    let mut end = max_bytes;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}
