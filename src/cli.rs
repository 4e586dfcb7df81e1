//! Command-line boundary.
//!
//! Three subcommands: `serve` (the default) starts the HTTP server, `run`
//! optimizes an instruction and prints the result, `exec` drives one full
//! automation run from the terminal. `run` and `exec` reload configuration
//! after applying their env file, so a project-local `.env` wins over the
//! inherited environment.

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::Instrument;

use crate::api;
use crate::config::{self, Config};
use crate::orchestrator::Orchestrator;

#[derive(Debug, Parser)]
#[command(
    name = "jgo",
    about = "Natural-language bridge to a remote coding agent",
    version
)]
pub struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Start the OpenAI-compatible HTTP server (the default).
    Serve {
        /// Listen address (`host:port`, or `:port` for all interfaces).
        #[arg(long)]
        listen: Option<String>,

        /// Enable prompt optimization before agent execution.
        #[arg(long, num_args = 0..=1, default_missing_value = "true")]
        optimize_prompt: Option<bool>,
    },

    /// Optimize an instruction and print the result without executing it.
    Run {
        /// Env file applied before reloading configuration.
        #[arg(long, default_value = ".env")]
        env_file: String,

        /// The instruction text.
        #[arg(required = true)]
        instruction: Vec<String>,
    },

    /// Execute one full automation run and print the outcome as JSON.
    Exec {
        /// Env file applied before reloading configuration.
        #[arg(long, default_value = ".env")]
        env_file: String,

        /// Enable prompt optimization before agent execution.
        #[arg(long, num_args = 0..=1, default_missing_value = "true")]
        optimize_prompt: Option<bool>,

        /// The instruction text.
        #[arg(required = true)]
        instruction: Vec<String>,
    },
}

/// Parse arguments and dispatch.
pub async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();
    match cli.command.unwrap_or(Command::Serve {
        listen: None,
        optimize_prompt: None,
    }) {
        Command::Serve {
            listen,
            optimize_prompt,
        } => serve_command(listen, optimize_prompt).await,
        Command::Run {
            env_file,
            instruction,
        } => run_command(&env_file, &instruction).await,
        Command::Exec {
            env_file,
            optimize_prompt,
            instruction,
        } => exec_command(&env_file, optimize_prompt, &instruction).await,
    }
}

async fn serve_command(
    listen: Option<String>,
    optimize_prompt: Option<bool>,
) -> anyhow::Result<()> {
    let mut cfg = Config::from_env()?;
    if let Some(listen) = listen.as_deref().map(str::trim).filter(|l| !l.is_empty()) {
        cfg.listen_addr = config::normalize_listen_addr(listen);
    }
    if let Some(enabled) = optimize_prompt {
        cfg.optimize_prompt = enabled;
    }
    cfg.validate_transport()?;

    api::serve(cfg).await
}

async fn run_command(env_file: &str, instruction: &[String]) -> anyhow::Result<()> {
    let instruction = join_instruction(instruction)?;
    load_env_file(env_file)?;
    let cfg = Config::from_env()?;
    cfg.validate_transport()?;

    let orchestrator = Orchestrator::new(cfg);
    let run_id = orchestrator.next_run_id();
    tracing::info!(run_id = %run_id, env_file = %env_file, "cli run start: prompt optimize only");

    let optimized = orchestrator
        .optimize_only(&instruction)
        .instrument(tracing::info_span!("automation", run_id = %run_id))
        .await?;
    println!("{optimized}");
    Ok(())
}

async fn exec_command(
    env_file: &str,
    optimize_prompt: Option<bool>,
    instruction: &[String],
) -> anyhow::Result<()> {
    let instruction = join_instruction(instruction)?;
    load_env_file(env_file)?;
    let mut cfg = Config::from_env()?;
    if let Some(enabled) = optimize_prompt {
        cfg.optimize_prompt = enabled;
    }
    cfg.validate_transport()?;

    let orchestrator = Orchestrator::new(cfg);
    let run_id = orchestrator.next_run_id();
    tracing::info!(
        run_id = %run_id,
        env_file = %env_file,
        optimize_prompt = orchestrator.config().optimize_prompt,
        "cli exec start: full automation"
    );

    let result = orchestrator.run(&run_id, &instruction).await?;
    let out = serde_json::json!({
        "status": "ok",
        "branch": result.branch,
    });
    println!("{out}");
    Ok(())
}

fn load_env_file(path: &str) -> anyhow::Result<()> {
    let path = path.trim();
    if path.is_empty() {
        return Ok(());
    }
    dotenvy::from_path(path).with_context(|| format!("load env file ({path})"))?;
    Ok(())
}

fn join_instruction(parts: &[String]) -> anyhow::Result<String> {
    let joined = parts.join(" ").trim().to_string();
    if joined.is_empty() {
        anyhow::bail!("instruction cannot be empty");
    }
    Ok(joined)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn instruction_joins_and_trims_words() {
        let parts = vec!["fix".to_string(), " the".to_string(), "bug ".to_string()];
        assert_eq!(join_instruction(&parts).unwrap(), "fix  the bug");
    }

    #[test]
    fn empty_instruction_is_rejected() {
        assert!(join_instruction(&[]).is_err());
        assert!(join_instruction(&["   ".to_string()]).is_err());
    }

    #[test]
    fn blank_env_file_is_skipped() {
        assert!(load_env_file("  ").is_ok());
    }

    #[test]
    fn missing_env_file_is_an_error() {
        assert!(load_env_file("/definitely/not/here/.env").is_err());
    }
}
