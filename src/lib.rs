//! # jgo
//!
//! A natural-language-to-automation bridge. Instructions arrive over an
//! OpenAI-compatible chat endpoint or the command line; jgo optionally
//! rewrites them through a planner model, resolves the target repository,
//! and drives a remote coding agent through a two-stage edit then
//! commit/push workflow.
//!
//! ## Architecture
//!
//! One run is a strictly sequential pipeline:
//! 1. Optionally generate a [`planner::RequestPlan`] rewriting the instruction
//! 2. Resolve an `owner/name` repository reference from the text
//! 3. Open a session (ssh or local) and verify the agent is authenticated
//! 4. Provision an ephemeral working directory, materializing the repository
//!    from the [`mirror::MirrorCache`] where the transport allows it
//! 5. Run the agent edit stage, then the commit/push stage
//! 6. Tear the working directory down on every exit path
//!
//! The HTTP and CLI surfaces in [`api`] and [`cli`] are thin adapters over
//! [`orchestrator::Orchestrator`].

pub mod agent;
pub mod api;
pub mod cli;
pub mod config;
pub mod error;
pub mod mirror;
pub mod orchestrator;
pub mod planner;
pub mod repo;
pub mod session;
pub mod util;
pub mod workflow;

pub use config::Config;
pub use error::AutomationError;
