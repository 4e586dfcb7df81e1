//! Coding-agent invocation: prompt construction and non-interactive
//! execution through a session transport.

mod exec;
mod prompt;

pub use exec::run_agent_stage;
pub use prompt::{CommitPushPrompt, EditPrompt, RepoTarget, WorkspacePrompt};
