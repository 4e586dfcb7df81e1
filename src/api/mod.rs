//! OpenAI-compatible HTTP boundary.
//!
//! Adapts chat-completion requests into automation runs and automation
//! results back into chat-completion responses (JSON or SSE). Everything
//! here is marshaling; the pipeline itself lives in the orchestrator.

mod server;
pub mod types;

pub use server::{routes, serve, AppState};

/// The single model identifier this server exposes.
pub const SERVED_MODEL_ID: &str = "jgo";
