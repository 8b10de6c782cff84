//! Generation engine seam.
//!
//! An engine answers one query turn as a stream of snapshot events. Each
//! snapshot carries the engine's current view of the answer text, which
//! may or may not extend what it reported before.

use std::collections::VecDeque;
use std::pin::Pin;
use std::sync::Mutex;

use async_trait::async_trait;
use futures::{stream, Stream, StreamExt};

use roam_core::types::{Caller, SessionId};

use crate::error::ChatError;

/// One snapshot of the answer text emitted by an engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotEvent {
    pub text: String,
    pub is_partial: bool,
    pub turn_complete: Option<bool>,
}

impl SnapshotEvent {
    pub fn partial(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            is_partial: true,
            turn_complete: None,
        }
    }

    /// A final snapshot that closes the turn.
    pub fn complete(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            is_partial: false,
            turn_complete: Some(true),
        }
    }
}

/// A single query turn handed to an engine.
#[derive(Debug, Clone)]
pub struct TurnRequest {
    pub caller: Caller,
    pub session_id: SessionId,
    pub query: String,
}

pub type SnapshotStream = Pin<Box<dyn Stream<Item = Result<SnapshotEvent, ChatError>> + Send>>;

/// Produces the snapshot stream for a query turn.
#[async_trait]
pub trait GenerationEngine: Send + Sync {
    async fn run_turn(&self, request: TurnRequest) -> Result<SnapshotStream, ChatError>;
}

/// One step of a scripted turn.
#[derive(Debug, Clone)]
pub enum ScriptStep {
    Event(SnapshotEvent),
    Fail(String),
    /// Never yields again. Used to exercise turn timeouts.
    Stall,
}

/// Replays canned snapshot sequences, one per turn, cycling when exhausted.
pub struct ScriptedEngine {
    turns: Mutex<VecDeque<Vec<ScriptStep>>>,
}

impl ScriptedEngine {
    pub fn new(turns: Vec<Vec<ScriptStep>>) -> Self {
        Self {
            turns: Mutex::new(turns.into()),
        }
    }

    /// An engine that answers every turn with the same events.
    pub fn repeating(events: Vec<SnapshotEvent>) -> Self {
        Self::new(vec![events.into_iter().map(ScriptStep::Event).collect()])
    }

    fn next_script(&self) -> Vec<ScriptStep> {
        let mut turns = self
            .turns
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        match turns.pop_front() {
            Some(script) => {
                turns.push_back(script.clone());
                script
            }
            None => Vec::new(),
        }
    }
}

#[async_trait]
impl GenerationEngine for ScriptedEngine {
    async fn run_turn(&self, request: TurnRequest) -> Result<SnapshotStream, ChatError> {
        let script = self.next_script();
        tracing::debug!(
            user = %request.caller.user,
            session = %request.session_id,
            steps = script.len(),
            "Replaying scripted turn"
        );

        let stalls = script.iter().any(|step| matches!(step, ScriptStep::Stall));
        let items: Vec<Result<SnapshotEvent, ChatError>> = script
            .into_iter()
            .take_while(|step| !matches!(step, ScriptStep::Stall))
            .filter_map(|step| match step {
                ScriptStep::Event(event) => Some(Ok(event)),
                ScriptStep::Fail(message) => Some(Err(ChatError::Engine(message))),
                ScriptStep::Stall => None,
            })
            .collect();

        let replay = stream::iter(items);
        if stalls {
            Ok(replay.chain(stream::pending()).boxed())
        } else {
            Ok(replay.boxed())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use roam_core::types::UserId;

    fn request() -> TurnRequest {
        TurnRequest {
            caller: Caller::new(UserId::new("u1")),
            session_id: SessionId::new("s1"),
            query: "hi".into(),
        }
    }

    #[test]
    fn test_snapshot_constructors() {
        let partial = SnapshotEvent::partial("He");
        assert!(partial.is_partial);
        assert_eq!(partial.turn_complete, None);

        let complete = SnapshotEvent::complete("Hello");
        assert!(!complete.is_partial);
        assert_eq!(complete.turn_complete, Some(true));
    }

    #[tokio::test]
    async fn test_scripted_engine_replays_and_cycles() {
        let engine = ScriptedEngine::new(vec![
            vec![ScriptStep::Event(SnapshotEvent::complete("first"))],
            vec![ScriptStep::Event(SnapshotEvent::complete("second"))],
        ]);

        let mut texts = Vec::new();
        for _ in 0..3 {
            let mut events = engine.run_turn(request()).await.unwrap();
            while let Some(event) = events.next().await {
                texts.push(event.unwrap().text);
            }
        }
        assert_eq!(texts, vec!["first", "second", "first"]);
    }

    #[tokio::test]
    async fn test_scripted_engine_fail_step() {
        let engine = ScriptedEngine::new(vec![vec![
            ScriptStep::Event(SnapshotEvent::partial("a")),
            ScriptStep::Fail("upstream".into()),
        ]]);
        let events: Vec<_> = engine.run_turn(request()).await.unwrap().collect().await;
        assert_eq!(events.len(), 2);
        assert!(events[0].is_ok());
        assert!(matches!(&events[1], Err(ChatError::Engine(m)) if m == "upstream"));
    }

    #[tokio::test]
    async fn test_empty_engine_yields_nothing() {
        let engine = ScriptedEngine::new(Vec::new());
        let events: Vec<_> = engine.run_turn(request()).await.unwrap().collect().await;
        assert!(events.is_empty());
    }
}
