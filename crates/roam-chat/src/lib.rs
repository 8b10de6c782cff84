//! Conversational core for the roam backend.
//!
//! Turns generation-engine snapshots into append-only fragments, keeps one
//! conversation session per user, routes protocol messages to the user's
//! live transport, and exposes the stamp capabilities to the engines.

pub mod capabilities;
pub mod connection;
pub mod conversation;
pub mod engine;
pub mod error;
pub mod instruction;
pub mod local;
pub mod openai;
pub mod protocol;
pub mod reconciler;
pub mod session;

pub use capabilities::{Capability, StampCapabilities, StampFinder};
pub use connection::{ConnectionId, ConnectionManager, Transport};
pub use conversation::{ChatService, ConnectionContext};
pub use engine::{GenerationEngine, ScriptStep, ScriptedEngine, SnapshotEvent, SnapshotStream, TurnRequest};
pub use error::ChatError;
pub use local::LocalEngine;
pub use openai::OpenAiEngine;
pub use protocol::{ClientMessage, ServerMessage};
pub use reconciler::{Fragment, MessageSink, Step, StreamReconciler};
pub use session::SessionRegistry;
