//! Remote session lifecycle.
//!
//! A session is a transport plus an ephemeral working directory on the
//! execution host. The directory exists only for the duration of one run;
//! teardown is attempted on every exit path, but its own failure never
//! fails the run.

mod login;
mod transport;

pub use login::{LoginStatusClassifier, SubstringLoginClassifier};
pub use transport::{
    format_command, shell_quote, wrap_bash_login, CommandOutput, LocalTransport, SshTransport,
    Transport, TransportError,
};

use std::sync::Arc;
use std::time::Duration;

use crate::error::AutomationError;
use crate::util::truncate_for_log;

/// Template passed to `mktemp -d` on the execution host.
const WORKDIR_TEMPLATE: &str = "/tmp/jgo-run-XXXXXX";

/// Drives one execution host for the duration of a run.
pub struct SessionManager {
    transport: Arc<dyn Transport>,
    agent_bin: String,
    classifier: Box<dyn LoginStatusClassifier>,
    command_timeout: Option<Duration>,
}

impl SessionManager {
    pub fn new(
        transport: Arc<dyn Transport>,
        agent_bin: impl Into<String>,
        classifier: Box<dyn LoginStatusClassifier>,
        command_timeout: Option<Duration>,
    ) -> Self {
        Self {
            transport,
            agent_bin: agent_bin.into(),
            classifier,
            command_timeout,
        }
    }

    pub fn agent_bin(&self) -> &str {
        &self.agent_bin
    }

    pub fn target(&self) -> String {
        self.transport.describe()
    }

    /// Run a command on the execution host with the configured timeout.
    pub async fn run(&self, command: &str) -> Result<CommandOutput, TransportError> {
        self.transport.run(command, self.command_timeout).await
    }

    /// Full command line for logging, as the transport would execute it.
    pub fn render_command(&self, command: &str) -> String {
        self.transport.render_command(command)
    }

    /// Verify the coding agent is authenticated on the execution host.
    ///
    /// Runs `<agent> login status` and classifies the output; a "not logged
    /// in" match becomes the distinct [`AutomationError::AuthRequired`] so
    /// boundaries can answer with a remediation message.
    pub async fn ensure_agent_login(&self) -> Result<(), AutomationError> {
        let check = format_command(&self.agent_bin, &["login", "status"]);
        tracing::info!(command = %self.render_command(&check), "agent login check");

        let output = self.run(&check).await?;
        tracing::debug!(
            output = %truncate_for_log(&output.combined(), 1200),
            "agent login status output"
        );

        if output.success() {
            return Ok(());
        }

        let detail = output.error_detail();
        if self.classifier.login_required(&detail) {
            return Err(AutomationError::AuthRequired {
                target: self.target(),
                detail,
            });
        }
        Err(AutomationError::AgentExecution {
            stage: "agent_login_check",
            detail: format!("target={} cmd={}: {}", self.target(), check, detail),
        })
    }

    /// Create the run's ephemeral working directory on the execution host.
    ///
    /// `mktemp -d` gives atomic, collision-free creation under a fixed
    /// prefix; the transport wraps it in a login shell so any shell profile
    /// noise is tolerated by the output parser.
    pub async fn create_workdir(&self) -> Result<String, AutomationError> {
        let command = format!("mktemp -d {WORKDIR_TEMPLATE}");
        tracing::info!(command = %self.render_command(&command), "preparing working directory");

        let output = self.run(&command).await?;
        if !output.success() {
            return Err(AutomationError::AgentExecution {
                stage: "workdir_prepare",
                detail: format!(
                    "target={} dir={}: {}",
                    self.target(),
                    WORKDIR_TEMPLATE,
                    output.error_detail()
                ),
            });
        }

        match parse_workdir_output(&output.stdout) {
            Some(dir) => Ok(dir),
            None => Err(AutomationError::AgentExecution {
                stage: "workdir_prepare",
                detail: format!(
                    "target={}: empty work dir output={:?}",
                    self.target(),
                    output.combined()
                ),
            }),
        }
    }

    /// Remove the run's working directory, best-effort.
    ///
    /// Failures are logged and swallowed; cleanup must never mask the run's
    /// real outcome.
    pub async fn destroy_workdir(&self, workdir: &str) {
        let workdir = workdir.trim();
        if workdir.is_empty() {
            return;
        }

        let command = format!("rm -rf -- {}", shell_quote(workdir));
        match self.run(&command).await {
            Ok(output) if output.success() => {
                tracing::info!(workdir = %workdir, "working directory removed");
            }
            Ok(output) => {
                tracing::warn!(
                    workdir = %workdir,
                    output = %truncate_for_log(&output.combined(), 300),
                    "working directory cleanup failed"
                );
            }
            Err(e) => {
                tracing::warn!(workdir = %workdir, error = %e, "working directory cleanup failed");
            }
        }
    }
}

/// Pick the working directory path out of `mktemp` output.
///
/// Login shells can print warnings before (or after) the path; take the last
/// non-empty line that is not a warning.
fn parse_workdir_output(output: &str) -> Option<String> {
    output
        .lines()
        .rev()
        .map(str::trim)
        .find(|line| !line.is_empty() && !line.to_lowercase().starts_with("warning:"))
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn workdir_output_takes_last_real_line() {
        let parsed = parse_workdir_output("motd banner\n/tmp/jgo-run-Ab12Cd\n");
        assert_eq!(parsed.as_deref(), Some("/tmp/jgo-run-Ab12Cd"));
    }

    #[test]
    fn workdir_output_skips_warnings_and_blanks() {
        let parsed = parse_workdir_output("/tmp/jgo-run-Ab12Cd\nWarning: locale not set\n\n");
        assert_eq!(parsed.as_deref(), Some("/tmp/jgo-run-Ab12Cd"));
    }

    #[test]
    fn workdir_output_empty_is_none() {
        assert_eq!(parse_workdir_output("\nwarning: only noise\n"), None);
    }

    fn stub_agent(dir: &std::path::Path, body: &str) -> String {
        use std::os::unix::fs::PermissionsExt;
        let path = dir.join("agent");
        std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).expect("write stub");
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755))
            .expect("chmod stub");
        path.to_string_lossy().to_string()
    }

    #[tokio::test]
    async fn login_check_detects_auth_required() {
        let dir = tempfile::tempdir().expect("tmpdir");
        let agent = stub_agent(dir.path(), "echo 'not logged in' 1>&2; exit 1");
        let session = SessionManager::new(
            Arc::new(LocalTransport),
            agent,
            Box::new(SubstringLoginClassifier::codex()),
            None,
        );
        let err = session.ensure_agent_login().await.unwrap_err();
        assert!(err.is_auth_required(), "got: {err}");
    }

    #[tokio::test]
    async fn login_check_failure_without_phrase_is_not_auth() {
        let dir = tempfile::tempdir().expect("tmpdir");
        let agent = stub_agent(dir.path(), "echo 'disk full' 1>&2; exit 1");
        let session = SessionManager::new(
            Arc::new(LocalTransport),
            agent,
            Box::new(SubstringLoginClassifier::codex()),
            None,
        );
        let err = session.ensure_agent_login().await.unwrap_err();
        assert!(!err.is_auth_required(), "got: {err}");
    }

    #[tokio::test]
    async fn login_check_passes_when_agent_succeeds() {
        let session = SessionManager::new(
            Arc::new(LocalTransport),
            "true",
            Box::new(SubstringLoginClassifier::codex()),
            None,
        );
        assert!(session.ensure_agent_login().await.is_ok());
    }

    #[tokio::test]
    async fn workdir_create_and_destroy_roundtrip() {
        let session = SessionManager::new(
            Arc::new(LocalTransport),
            "true",
            Box::new(SubstringLoginClassifier::codex()),
            None,
        );
        let workdir = session.create_workdir().await.expect("create workdir");
        assert!(workdir.starts_with("/tmp/jgo-run-"));
        assert!(std::path::Path::new(&workdir).is_dir());
        session.destroy_workdir(&workdir).await;
        assert!(!std::path::Path::new(&workdir).exists());
    }
}
