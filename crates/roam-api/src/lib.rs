//! Roam API crate - axum HTTP server and the chat WebSocket endpoint.
//!
//! Serves a service descriptor, a health check, and the WebSocket over
//! which clients exchange queries and streamed answers.

pub mod error;
pub mod handlers;
pub mod routes;
pub mod state;

pub use error::ApiError;
pub use routes::{create_router, start_server};
pub use state::AppState;
