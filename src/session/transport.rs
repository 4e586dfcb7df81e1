//! Command transports to the execution host.
//!
//! Both transports execute `bash -lc`-wrapped commands so the agent sees a
//! login-shell environment; ssh adds connection plumbing on top. A non-zero
//! exit is *not* a transport error — callers interpret the captured output.

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::process::Command;

use crate::config::SshConfig;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("failed to spawn {bin}: {source}")]
    Spawn {
        bin: String,
        #[source]
        source: std::io::Error,
    },

    #[error("command timed out after {0} seconds")]
    Timeout(u64),

    #[error("ssh is required in PATH: {0}")]
    MissingSsh(String),
}

/// Captured output of one transport command.
#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: Option<i32>,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }

    /// Both streams, trimmed and joined, for result text and logs.
    pub fn combined(&self) -> String {
        let out = self.stdout.trim();
        let err = self.stderr.trim();
        match (out.is_empty(), err.is_empty()) {
            (false, false) => format!("{out}\n{err}"),
            (false, true) => out.to_string(),
            (true, false) => err.to_string(),
            (true, true) => String::new(),
        }
    }

    /// Failure detail: stderr first, then stdout, then the exit status.
    ///
    /// The wrapped agent reports fatal detail on either stream depending on
    /// the failure, so neither alone is reliable.
    pub fn error_detail(&self) -> String {
        let err = self.stderr.trim();
        if !err.is_empty() {
            return err.to_string();
        }
        let out = self.stdout.trim();
        if !out.is_empty() {
            return out.to_string();
        }
        match self.exit_code {
            Some(code) => format!("exit status {code}"),
            None => "terminated by signal".to_string(),
        }
    }
}

/// A way of running commands on the execution host.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Human-readable target for logs and error messages.
    fn describe(&self) -> String;

    /// Full command line as it would be executed, for (redacted) logging.
    fn render_command(&self, command: &str) -> String;

    /// Run a shell command on the execution host.
    async fn run(
        &self,
        command: &str,
        timeout: Option<Duration>,
    ) -> Result<CommandOutput, TransportError>;
}

/// Remote execution via the `ssh` binary.
#[derive(Debug, Clone)]
pub struct SshTransport {
    config: SshConfig,
}

impl SshTransport {
    /// Build the transport, verifying the `ssh` binary exists in PATH.
    pub fn new(config: SshConfig) -> Result<Self, TransportError> {
        which::which("ssh").map_err(|e| TransportError::MissingSsh(e.to_string()))?;
        Ok(Self { config })
    }

    /// `user@host[:port]` for logs and error messages.
    pub fn address(&self) -> String {
        let mut target = self.config.host.trim().to_string();
        let user = self.config.user.trim();
        if !user.is_empty() {
            target = format!("{user}@{target}");
        }
        let port = self.config.port.trim();
        if port.is_empty() {
            target
        } else {
            format!("{target}:{port}")
        }
    }

    /// Assemble the ssh argument vector for one remote command.
    fn ssh_args(&self, remote_command: &str) -> Vec<String> {
        let mut args = Vec::with_capacity(8);
        if !self.config.strict_host_key_checking {
            args.push("-o".to_string());
            args.push("StrictHostKeyChecking=no".to_string());
            args.push("-o".to_string());
            args.push("UserKnownHostsFile=/dev/null".to_string());
        }
        if let Some(key_path) = self
            .config
            .key_path
            .as_deref()
            .map(str::trim)
            .filter(|k| !k.is_empty())
        {
            args.push("-i".to_string());
            args.push(key_path.to_string());
            args.push("-o".to_string());
            args.push("IdentitiesOnly=yes".to_string());
        }

        let mut target = self.config.host.trim().to_string();
        let user = self.config.user.trim();
        if !user.is_empty() {
            target = format!("{user}@{target}");
        }

        let port = self.config.port.trim();
        if !port.is_empty() {
            args.push("-p".to_string());
            args.push(port.to_string());
        }
        args.push(target);
        args.push(remote_command.to_string());
        args
    }
}

#[async_trait]
impl Transport for SshTransport {
    fn describe(&self) -> String {
        self.address()
    }

    fn render_command(&self, command: &str) -> String {
        let wrapped = wrap_bash_login(command);
        let ssh_args = self.ssh_args(&wrapped);
        let args: Vec<&str> = ssh_args.iter().map(String::as_str).collect();
        format_command("ssh", &args)
    }

    async fn run(
        &self,
        command: &str,
        timeout: Option<Duration>,
    ) -> Result<CommandOutput, TransportError> {
        let wrapped = wrap_bash_login(command);
        let args = self.ssh_args(&wrapped);
        let mut cmd = Command::new("ssh");
        cmd.args(&args).stdout(Stdio::piped()).stderr(Stdio::piped());
        run_with_timeout("ssh", cmd, timeout).await
    }
}

/// Direct subprocess execution on this machine.
#[derive(Debug, Clone, Default)]
pub struct LocalTransport;

#[async_trait]
impl Transport for LocalTransport {
    fn describe(&self) -> String {
        "local".to_string()
    }

    fn render_command(&self, command: &str) -> String {
        wrap_bash_login(command)
    }

    async fn run(
        &self,
        command: &str,
        timeout: Option<Duration>,
    ) -> Result<CommandOutput, TransportError> {
        let mut cmd = Command::new("bash");
        cmd.arg("-lc")
            .arg(command)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        run_with_timeout("bash", cmd, timeout).await
    }
}

async fn run_with_timeout(
    bin: &str,
    mut cmd: Command,
    timeout: Option<Duration>,
) -> Result<CommandOutput, TransportError> {
    let fut = cmd.output();
    let output = match timeout {
        Some(limit) => tokio::time::timeout(limit, fut)
            .await
            .map_err(|_| TransportError::Timeout(limit.as_secs()))?,
        None => fut.await,
    }
    .map_err(|e| TransportError::Spawn {
        bin: bin.to_string(),
        source: e,
    })?;

    Ok(CommandOutput {
        stdout: String::from_utf8_lossy(&output.stdout).to_string(),
        stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        exit_code: output.status.code(),
    })
}

/// Wrap a command so it runs under a login shell on the execution host.
pub fn wrap_bash_login(command: &str) -> String {
    format!("bash -lc {}", shell_quote(command))
}

/// Render a binary and arguments as a single shell-quoted command string.
pub fn format_command(bin: &str, args: &[&str]) -> String {
    let mut parts = Vec::with_capacity(args.len() + 1);
    parts.push(shell_quote(bin));
    for arg in args {
        parts.push(shell_quote(arg));
    }
    parts.join(" ")
}

/// Single-quote a string for POSIX shells.
pub fn shell_quote(s: &str) -> String {
    if s.is_empty() {
        return "''".to_string();
    }
    format!("'{}'", s.replace('\'', r#"'"'"'"#))
}
