//! Automation run orchestration.
//!
//! One run is a strictly sequential pipeline: optional plan generation,
//! repository resolution, transport and auth checks, workspace acquisition,
//! the edit stage, and (for repo-scoped runs) the commit/push stage. Any
//! stage failure aborts the run; workspace teardown happens on every exit
//! path. Nothing is retried here — retries are a caller concern.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::Utc;
use tracing::Instrument;

use crate::agent::{self, CommitPushPrompt, EditPrompt, RepoTarget, WorkspacePrompt};
use crate::config::{
    self, Config, PlannerConfig, TransportKind,
};
use crate::error::AutomationError;
use crate::mirror::{MirrorCache, MirrorError};
use crate::planner::Planner;
use crate::repo::{self, RepoRef};
use crate::session::{
    LocalTransport, SessionManager, SshTransport, SubstringLoginClassifier, Transport,
};
use crate::util::sanitize_url;
use crate::workflow;

/// Terminal outcome of a successful run.
#[derive(Debug, Clone)]
pub struct AutomationResult {
    /// Branch the run pushed; empty when no repository was involved.
    pub branch: String,
    /// Concatenated stage outputs, tagged by stage.
    pub output: String,
}

/// Monotonic run-identifier generator.
///
/// Owned by the orchestrator rather than living in a process-wide global, so
/// runs stay independently testable.
#[derive(Debug, Default)]
pub struct RunIdSource {
    counter: AtomicU64,
}

impl RunIdSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// `run-<UTC timestamp>-<counter>`, readable and strictly increasing in
    /// its counter suffix.
    pub fn next_id(&self) -> String {
        let n = self.counter.fetch_add(1, Ordering::Relaxed) + 1;
        format!("run-{}-{:06}", Utc::now().format("%Y%m%dT%H%M%S%.3f"), n)
    }
}

/// Sequences all pipeline stages for automation runs.
pub struct Orchestrator {
    config: Config,
    run_ids: RunIdSource,
}

impl Orchestrator {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            run_ids: RunIdSource::new(),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Allocate the identifier for the next run.
    pub fn next_run_id(&self) -> String {
        self.run_ids.next_id()
    }

    /// Execute one automation run under the given identifier.
    pub async fn run(
        &self,
        run_id: &str,
        instruction: &str,
    ) -> Result<AutomationResult, AutomationError> {
        let span = tracing::info_span!("automation", run_id = %run_id);
        self.run_pipeline(instruction).instrument(span).await
    }

    /// Plan-only mode: return the optimized prompt without executing it.
    pub async fn optimize_only(&self, instruction: &str) -> Result<String, AutomationError> {
        let mut env = config::env_snapshot();
        config::apply_provider_fallbacks(&mut env);
        let available_clis = config::resolve_available_clis(&env, &self.config.agent_bin);

        let planner_cfg = PlannerConfig::from_env_map(&env)?;
        tracing::info!(
            base_url = %sanitize_url(&planner_cfg.base_url),
            model = %planner_cfg.model,
            available_clis = %available_clis.join(", "),
            "prompt optimize only"
        );
        let planner = Planner::new(
            planner_cfg,
            self.config.plan_mode,
            self.config.planner_timeout,
        );
        let plan = planner.plan(instruction, &available_clis).await?;
        Ok(plan.optimized_prompt)
    }

    async fn run_pipeline(&self, instruction: &str) -> Result<AutomationResult, AutomationError> {
        tracing::info!("automation start");
        self.config.validate_transport()?;

        let mut env = config::env_snapshot();
        config::apply_provider_fallbacks(&mut env);
        let available_clis = config::resolve_available_clis(&env, &self.config.agent_bin);
        tracing::info!(
            available_clis = %available_clis.join(", "),
            optimize_prompt = self.config.optimize_prompt,
            "run environment resolved"
        );

        let mut optimized_prompt = instruction.trim().to_string();
        if self.config.optimize_prompt {
            let planner_cfg = PlannerConfig::from_env_map(&env)?;
            tracing::info!(
                base_url = %sanitize_url(&planner_cfg.base_url),
                model = %planner_cfg.model,
                api_key_set = !planner_cfg.api_key.is_empty(),
                "planner configured"
            );
            let planner = Planner::new(
                planner_cfg,
                self.config.plan_mode,
                self.config.planner_timeout,
            );
            let plan = planner.plan(instruction, &available_clis).await?;
            if !plan.optimized_prompt.is_empty() {
                optimized_prompt = plan.optimized_prompt;
            }
            tracing::info!(
                stage = "prompt_optimize",
                optimized_prompt_len = optimized_prompt.len(),
                "prompt optimization done"
            );
        } else {
            tracing::debug!(stage = "prompt_optimize", "skipped: disabled");
        }

        let repo_target = match repo::resolve(instruction) {
            Some(reference) => {
                let url = reference.clone_url()?;
                tracing::info!(
                    reference = %reference,
                    url = %sanitize_url(&url),
                    "repository resolved"
                );
                Some((reference, url))
            }
            None => {
                tracing::info!("no repository reference found; running workspace-only");
                None
            }
        };

        let session = self.build_session()?;
        tracing::info!(target = %session.target(), "transport ready");

        tracing::info!(stage = "agent_login_check", "starting");
        session.ensure_agent_login().await?;
        tracing::info!(stage = "agent_login_check", "done");

        let workdir = session.create_workdir().await?;
        tracing::info!(workdir = %workdir, "working directory ready");

        let result = self
            .run_in_workdir(
                &session,
                &workdir,
                &optimized_prompt,
                &available_clis,
                repo_target,
            )
            .await;
        session.destroy_workdir(&workdir).await;
        result
    }

    async fn run_in_workdir(
        &self,
        session: &SessionManager,
        workdir: &str,
        optimized_prompt: &str,
        available_clis: &[String],
        repo_target: Option<(RepoRef, String)>,
    ) -> Result<AutomationResult, AutomationError> {
        let branch = workflow::branch_name(Utc::now());
        let mut outputs: Vec<String> = Vec::with_capacity(2);

        let edit_prompt = match &repo_target {
            Some((reference, url)) => {
                // The local transport materializes the checkout from the
                // mirror cache; over ssh the agent clones on the remote host.
                if self.config.transport == TransportKind::Local {
                    self.materialize_checkout(url, workdir).await?;
                }
                EditPrompt {
                    target: RepoTarget {
                        reference: reference.to_string(),
                        clone_url: url.clone(),
                        branch: branch.clone(),
                    },
                    instruction: optimized_prompt.to_string(),
                    tools: available_clis.to_vec(),
                }
                .render()
            }
            None => WorkspacePrompt {
                instruction: optimized_prompt.to_string(),
                tools: available_clis.to_vec(),
            }
            .render(),
        };

        tracing::info!(stage = "agent_edit", "starting");
        let edit_output = agent::run_agent_stage(session, workdir, "agent_edit", &edit_prompt).await?;
        if !edit_output.trim().is_empty() {
            outputs.push(format!("[agent_edit]\n{}", edit_output.trim()));
        }
        tracing::info!(stage = "agent_edit", "done");

        let Some((reference, url)) = repo_target else {
            tracing::info!(stage = "agent_commit_push", "skipped: no repository context");
            tracing::info!(branch = "", "automation success");
            return Ok(AutomationResult {
                branch: String::new(),
                output: outputs.join("\n\n"),
            });
        };

        if !workflow::has_pending_changes(session, workdir).await? {
            return Err(AutomationError::NoChanges);
        }

        tracing::info!(stage = "agent_commit_push", "starting");
        let commit_prompt = CommitPushPrompt {
            target: RepoTarget {
                reference: reference.to_string(),
                clone_url: url,
                branch: branch.clone(),
            },
        }
        .render();
        let commit_output =
            agent::run_agent_stage(session, workdir, "agent_commit_push", &commit_prompt).await?;
        if !commit_output.trim().is_empty() {
            outputs.push(format!("[agent_commit_push]\n{}", commit_output.trim()));
        }
        tracing::info!(stage = "agent_commit_push", "done");

        tracing::info!(branch = %branch, "automation success");
        Ok(AutomationResult {
            branch,
            output: outputs.join("\n\n"),
        })
    }

    fn build_session(&self) -> Result<SessionManager, AutomationError> {
        let transport: Arc<dyn Transport> = match self.config.transport {
            TransportKind::Ssh => Arc::new(SshTransport::new(self.config.ssh.clone())?),
            TransportKind::Local => Arc::new(LocalTransport),
        };
        Ok(SessionManager::new(
            transport,
            self.config.agent_bin.clone(),
            Box::new(SubstringLoginClassifier::codex()),
            self.config.agent_timeout,
        ))
    }

    /// Sync the mirror for `repo_url` and clone it into `<workdir>/repo`.
    async fn materialize_checkout(
        &self,
        repo_url: &str,
        workdir: &str,
    ) -> Result<(), AutomationError> {
        let cache = MirrorCache::new(self.config.mirror_root.clone());
        let url = repo_url.to_string();
        let dest = PathBuf::from(workdir).join(workflow::REPO_SUBDIR);

        tracing::info!(url = %sanitize_url(&url), dest = %dest.display(), "materializing checkout from mirror");
        tokio::task::spawn_blocking(move || {
            let mirror = cache.sync(&url)?;
            cache.clone_into(&mirror, &url, &dest)
        })
        .await
        .map_err(|e| MirrorError::Io(std::io::Error::other(e.to_string())))??;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{PlanMode, SshConfig};
    use std::path::Path;
    use std::process::Command;
    use std::time::Duration;

    fn test_config(agent_bin: String, mirror_root: PathBuf) -> Config {
        Config {
            agent_bin,
            listen_addr: "127.0.0.1:0".to_string(),
            transport: TransportKind::Local,
            ssh: SshConfig::default(),
            optimize_prompt: false,
            plan_mode: PlanMode::Rewrite,
            mirror_root,
            planner_timeout: Duration::from_secs(5),
            agent_timeout: None,
        }
    }

    fn stub_agent(dir: &Path, body: &str) -> String {
        use std::os::unix::fs::PermissionsExt;
        let path = dir.join("agent");
        std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).expect("write stub");
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755))
            .expect("chmod stub");
        path.to_string_lossy().to_string()
    }

    fn seed_repo(dir: &Path) {
        let git = |args: &[&str]| {
            let out = Command::new("git")
                .args(args)
                .current_dir(dir)
                .output()
                .expect("run git");
            assert!(
                out.status.success(),
                "git {args:?}: {}",
                String::from_utf8_lossy(&out.stderr)
            );
        };
        git(&["init", "--initial-branch=main", "."]);
        git(&["config", "user.email", "ci@example.com"]);
        git(&["config", "user.name", "ci"]);
        std::fs::write(dir.join("README.md"), "seed\n").expect("write");
        git(&["add", "."]);
        git(&["commit", "-m", "initial"]);
    }

    #[test]
    fn run_ids_are_strictly_increasing() {
        let source = RunIdSource::new();
        let a = source.next_id();
        let b = source.next_id();
        assert!(a.ends_with("-000001"), "a: {a}");
        assert!(b.ends_with("-000002"), "b: {b}");
        assert!(a.starts_with("run-"));
    }

    // Scenario: no repository mention => workspace-only run, empty branch,
    // commit/push never invoked, workdir cleaned up.
    #[tokio::test]
    async fn workspace_only_run_skips_commit_push() {
        let dir = tempfile::tempdir().expect("tmpdir");
        let log = dir.path().join("calls.log");
        let agent = stub_agent(
            dir.path(),
            &format!(
                r#"echo "$1 $2 $3 $4 $5" >> {log}
if [ "$1" = "login" ]; then exit 0; fi
echo "workspace task done""#,
                log = log.display()
            ),
        );
        let orchestrator = Orchestrator::new(test_config(agent, dir.path().join("mirrors")));

        let result = orchestrator
            .run("run-test-000001", "summarize the build logs")
            .await
            .expect("run");

        assert_eq!(result.branch, "");
        assert_eq!(result.output, "[agent_edit]\nworkspace task done");

        let calls = std::fs::read_to_string(&log).expect("read log");
        let lines: Vec<&str> = calls.lines().collect();
        assert_eq!(lines.len(), 2, "calls: {calls}");
        assert!(lines[0].starts_with("login status"));
        assert!(lines[1].starts_with("exec --full-auto"));

        // Unconditional cleanup: the workdir from the exec call is gone.
        let workdir = lines[1]
            .split_whitespace()
            .nth(4)
            .expect("workdir argument");
        assert!(workdir.starts_with("/tmp/jgo-run-"));
        assert!(!Path::new(workdir).exists());
    }

    // Scenario: agent status reports "not logged in" => AuthRequired, and
    // the edit stage is never attempted.
    #[tokio::test]
    async fn auth_required_blocks_before_edit() {
        let dir = tempfile::tempdir().expect("tmpdir");
        let marker = dir.path().join("edit-ran");
        let agent = stub_agent(
            dir.path(),
            &format!(
                r#"if [ "$1" = "login" ]; then echo "not logged in" 1>&2; exit 1; fi
touch {marker}"#,
                marker = marker.display()
            ),
        );
        let orchestrator = Orchestrator::new(test_config(agent, dir.path().join("mirrors")));

        let err = orchestrator
            .run("run-test-000001", "fix the typo in acme/widgets README")
            .await
            .unwrap_err();
        assert!(err.is_auth_required(), "got: {err}");
        assert!(!marker.exists(), "edit stage must not run");
    }

    // Scenario: repo-scoped run where the edit stage changes files =>
    // commit/push stage runs and the result carries the branch.
    #[tokio::test]
    async fn repo_scoped_run_commits_when_changes_exist() {
        let dir = tempfile::tempdir().expect("tmpdir");
        let upstream = dir.path().join("upstream");
        std::fs::create_dir(&upstream).expect("mkdir");
        seed_repo(&upstream);

        let prompts = dir.path().join("prompts.log");
        // The stub edits the checkout on the first exec call and reports a
        // pushed commit on the second.
        let agent = stub_agent(
            dir.path(),
            &format!(
                r#"if [ "$1" = "login" ]; then exit 0; fi
wd="$5"
printf '%s\n---\n' "$6" >> {prompts}
if [ ! -f "$wd/repo/agent_touched.txt" ]; then
  echo touched > "$wd/repo/agent_touched.txt"
  echo "edited files"
else
  echo "abc1234 fix: touch marker"
fi"#,
                prompts = prompts.display()
            ),
        );
        let orchestrator = Orchestrator::new(test_config(agent, dir.path().join("mirrors")));

        let session = orchestrator.build_session().expect("session");
        let workdir = session.create_workdir().await.expect("workdir");
        let reference = repo::resolve("fix the typo in acme/widgets README").expect("ref");
        let url = upstream.to_string_lossy().to_string();

        let result = orchestrator
            .run_in_workdir(
                &session,
                &workdir,
                "fix the typo in acme/widgets README",
                &["codex".to_string(), "git".to_string()],
                Some((reference, url)),
            )
            .await
            .expect("run");
        session.destroy_workdir(&workdir).await;

        let branch_re = regex::Regex::new(r"^jgo/\d{8}-\d{6}$").unwrap();
        assert!(branch_re.is_match(&result.branch), "branch: {}", result.branch);
        assert!(result.output.contains("[agent_edit]\nedited files"));
        assert!(result
            .output
            .contains("[agent_commit_push]\nabc1234 fix: touch marker"));

        // The edit prompt carried the literal instruction.
        let prompts = std::fs::read_to_string(&prompts).expect("read prompts");
        assert!(prompts.contains("fix the typo in acme/widgets README"));
    }

    // Scenario: edit succeeds but produces no working-tree changes =>
    // NoChanges, and the commit/push stage is never invoked.
    #[tokio::test]
    async fn clean_checkout_fails_with_no_changes() {
        let dir = tempfile::tempdir().expect("tmpdir");
        let upstream = dir.path().join("upstream");
        std::fs::create_dir(&upstream).expect("mkdir");
        seed_repo(&upstream);

        let log = dir.path().join("calls.log");
        let agent = stub_agent(
            dir.path(),
            &format!(
                r#"echo "$1" >> {log}
if [ "$1" = "login" ]; then exit 0; fi
echo "nothing to do""#,
                log = log.display()
            ),
        );
        let orchestrator = Orchestrator::new(test_config(agent, dir.path().join("mirrors")));

        let session = orchestrator.build_session().expect("session");
        let workdir = session.create_workdir().await.expect("workdir");
        let reference = repo::resolve("tidy up acme/widgets").expect("ref");
        let url = upstream.to_string_lossy().to_string();

        let err = orchestrator
            .run_in_workdir(
                &session,
                &workdir,
                "tidy up acme/widgets",
                &[],
                Some((reference, url)),
            )
            .await
            .unwrap_err();
        session.destroy_workdir(&workdir).await;

        assert!(matches!(err, AutomationError::NoChanges), "got: {err}");
        let calls = std::fs::read_to_string(&log).expect("read log");
        // One exec call (the edit stage); commit/push never ran.
        assert_eq!(calls.lines().filter(|l| *l == "exec").count(), 1);
    }

    // Repeated repo-scoped runs reuse the mirror instead of re-cloning.
    #[tokio::test]
    async fn second_run_reuses_mirror() {
        let dir = tempfile::tempdir().expect("tmpdir");
        let upstream = dir.path().join("upstream");
        std::fs::create_dir(&upstream).expect("mkdir");
        seed_repo(&upstream);

        let mirror_root = dir.path().join("mirrors");
        let agent = stub_agent(dir.path(), r#"if [ "$1" = "login" ]; then exit 0; fi; echo ok"#);
        let orchestrator = Orchestrator::new(test_config(agent, mirror_root.clone()));
        let url = upstream.to_string_lossy().to_string();

        for _ in 0..2 {
            let workdir = tempfile::tempdir().expect("workdir");
            orchestrator
                .materialize_checkout(&url, &workdir.path().to_string_lossy())
                .await
                .expect("materialize");
            assert!(workdir.path().join("repo").join("README.md").is_file());
        }

        let mirrors: Vec<_> = std::fs::read_dir(&mirror_root)
            .expect("read mirror root")
            .filter_map(|e| e.ok())
            .filter(|e| e.path().is_dir())
            .collect();
        assert_eq!(mirrors.len(), 1, "one mirror directory expected");
    }
}
