//! Snapshot-to-fragment reconciliation.
//!
//! Engines report cumulative snapshots of the answer; clients want only the
//! new text. The reconciler keeps what has been delivered so far and turns
//! each snapshot into at most one append-only fragment. When a partial
//! snapshot does not extend the delivered text, the whole snapshot is sent
//! again as a fresh fragment and counted as a reset. A final snapshot that
//! does not extend it sends nothing.

use async_trait::async_trait;
use futures::StreamExt;

use roam_core::config::ResetMode;

use crate::engine::{SnapshotEvent, SnapshotStream};
use crate::error::ChatError;
use crate::protocol::ServerMessage;

/// Text delivered to the client for one snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fragment {
    /// New text appended to what the client already has.
    Partial(String),
    /// The full answer, sent when nothing was streamed before it.
    Complete(String),
}

impl Fragment {
    pub fn into_message(self) -> ServerMessage {
        match self {
            Fragment::Partial(content) => ServerMessage::Partial { content },
            Fragment::Complete(content) => ServerMessage::Complete { content },
        }
    }
}

/// The outcome of applying one snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Step {
    pub fragment: Option<Fragment>,
    /// The snapshot closed the turn.
    pub finished: bool,
}

/// Per-turn reconciliation state.
#[derive(Debug, Clone, Default)]
pub struct StreamReconciler {
    accumulated: String,
    mode: ResetMode,
    emitted: bool,
    resets: u32,
}

impl StreamReconciler {
    pub fn new(mode: ResetMode) -> Self {
        Self {
            mode,
            ..Self::default()
        }
    }

    pub fn accumulated(&self) -> &str {
        &self.accumulated
    }

    /// Number of snapshots that did not extend the delivered text.
    pub fn resets(&self) -> u32 {
        self.resets
    }

    pub fn apply(&mut self, event: &SnapshotEvent) -> Step {
        let finished = closes_turn(event);
        if event.text.is_empty() {
            return Step {
                fragment: None,
                finished,
            };
        }

        let fragment = if !event.is_partial && !self.emitted {
            self.accumulated = event.text.clone();
            Some(Fragment::Complete(event.text.clone()))
        } else if let Some(suffix) = event.text.strip_prefix(self.accumulated.as_str()) {
            let fragment = (!suffix.is_empty()).then(|| Fragment::Partial(suffix.to_string()));
            self.accumulated = event.text.clone();
            fragment
        } else if !event.is_partial {
            tracing::debug!(
                delivered = self.accumulated.len(),
                snapshot = event.text.len(),
                "Final snapshot does not extend delivered text, dropped"
            );
            None
        } else {
            self.resets += 1;
            tracing::debug!(
                delivered = self.accumulated.len(),
                snapshot = event.text.len(),
                "Snapshot does not extend delivered text, resending"
            );
            match self.mode {
                ResetMode::Concatenate => self.accumulated.push_str(&event.text),
                ResetMode::Replace => self.accumulated = event.text.clone(),
            }
            Some(Fragment::Partial(event.text.clone()))
        };

        if fragment.is_some() {
            self.emitted = true;
        }
        Step { fragment, finished }
    }
}

/// A snapshot closes the turn when it says so, or when it is final and
/// says nothing either way.
fn closes_turn(event: &SnapshotEvent) -> bool {
    match event.turn_complete {
        Some(done) => done,
        None => !event.is_partial,
    }
}

/// Where reconciled fragments are delivered.
#[async_trait]
pub trait MessageSink: Send + Sync {
    /// Deliver one message. Returns false when the receiver is gone.
    async fn deliver(&self, message: ServerMessage) -> bool;
}

/// Drain `events` through `reconciler`, delivering fragments to `sink` in
/// order until the turn closes or the stream ends.
pub async fn stream_turn(
    mut events: SnapshotStream,
    reconciler: &mut StreamReconciler,
    sink: &dyn MessageSink,
) -> Result<(), ChatError> {
    while let Some(event) = events.next().await {
        let step = reconciler.apply(&event?);
        if let Some(fragment) = step.fragment {
            if !sink.deliver(fragment.into_message()).await {
                return Err(ChatError::TransportClosed);
            }
        }
        if step.finished {
            break;
        }
    }
    Ok(())
}
