//! Configuration management for jgo.
//!
//! Runtime configuration comes from environment variables:
//! - `CODEX_BIN` - Optional. Coding agent binary on the execution host. Defaults to `codex`.
//! - `JGO_LISTEN_ADDR` - Optional. Server listen address. Defaults to `0.0.0.0:8080`.
//! - `JGO_TRANSPORT` - Optional. `ssh` or `local`. Defaults to `ssh`.
//! - `JGO_SSH_USER`, `JGO_SSH_HOST`, `JGO_SSH_PORT` - Required for the ssh transport.
//! - `JGO_SSH_KEY_PATH` - Optional. Private key for the ssh transport.
//! - `JGO_SSH_STRICT_HOST_KEY_CHECKING` - Optional bool. Defaults to `false`.
//! - `JGO_OPTIMIZE_PROMPT` - Optional bool. Defaults to `false`.
//! - `JGO_PLAN_MODE` - Optional. `rewrite` or `gate`. Defaults to `rewrite`.
//! - `JGO_MIRROR_ROOT` - Optional. Repository mirror cache root. Defaults to
//!   `<os cache dir>/jgo/mirrors`.
//! - `JGO_PLANNER_TIMEOUT_SECS` - Optional. Defaults to `120`.
//! - `JGO_AGENT_TIMEOUT_SECS` - Optional. Unset means no internal bound; the
//!   caller's cancellation is the only limit.
//! - `JGO_AVAILABLE_CLIS` - Optional. Comma-separated extra CLI names
//!   advertised to the planner and agent prompts.
//!
//! The planner reads `OPENAI_BASE_URL`, `OPENAI_API_KEY` and `MODEL` from a
//! per-run environment snapshot, with OpenWebUI/LiteLLM fallbacks applied
//! first (see [`apply_provider_fallbacks`]).

use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::time::Duration;

use thiserror::Error;

/// Default planner endpoint when `OPENAI_BASE_URL` is unset.
pub const DEFAULT_OPENAI_BASE: &str = "https://api.openai.com/v1";

const DEFAULT_LISTEN_ADDR: &str = "0.0.0.0:8080";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("missing required settings: {0}")]
    MissingSettings(String),

    #[error("invalid value for {0}: {1}")]
    InvalidValue(String, String),
}

/// How commands reach the execution host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    /// Remote shell via the `ssh` binary.
    Ssh,
    /// Direct subprocess execution on this machine.
    Local,
}

/// Which plan-generator schema is in effect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlanMode {
    /// Rewrite the instruction only; high temperature for varied phrasing.
    Rewrite,
    /// Additionally classify executability; low temperature for determinism.
    Gate,
}

/// Connection parameters for the ssh transport.
#[derive(Debug, Clone, Default)]
pub struct SshConfig {
    pub user: String,
    pub host: String,
    pub port: String,
    pub key_path: Option<String>,
    pub strict_host_key_checking: bool,
}

/// Resolved runtime configuration, immutable for the duration of one run.
#[derive(Debug, Clone)]
pub struct Config {
    /// Coding agent binary name or path on the execution host.
    pub agent_bin: String,

    /// Server listen address.
    pub listen_addr: String,

    /// Transport selection.
    pub transport: TransportKind,

    /// Connection parameters for the ssh transport.
    pub ssh: SshConfig,

    /// Whether the planner rewrites the instruction before execution.
    pub optimize_prompt: bool,

    /// Plan-generator schema variant.
    pub plan_mode: PlanMode,

    /// Root directory of the repository mirror cache.
    pub mirror_root: PathBuf,

    /// Bound on the planner HTTP call.
    pub planner_timeout: Duration,

    /// Optional bound on each transport/agent invocation.
    pub agent_timeout: Option<Duration>,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let agent_bin = non_empty_env("CODEX_BIN").unwrap_or_else(|| "codex".to_string());

        let listen_addr = normalize_listen_addr(
            &non_empty_env("JGO_LISTEN_ADDR").unwrap_or_else(|| DEFAULT_LISTEN_ADDR.to_string()),
        );

        let transport = match non_empty_env("JGO_TRANSPORT").as_deref() {
            None | Some("ssh") => TransportKind::Ssh,
            Some("local") => TransportKind::Local,
            Some(other) => {
                return Err(ConfigError::InvalidValue(
                    "JGO_TRANSPORT".to_string(),
                    format!("expected ssh or local, got: {other}"),
                ))
            }
        };

        let plan_mode = match non_empty_env("JGO_PLAN_MODE").as_deref() {
            None | Some("rewrite") => PlanMode::Rewrite,
            Some("gate") => PlanMode::Gate,
            Some(other) => {
                return Err(ConfigError::InvalidValue(
                    "JGO_PLAN_MODE".to_string(),
                    format!("expected rewrite or gate, got: {other}"),
                ))
            }
        };

        let ssh = SshConfig {
            user: non_empty_env("JGO_SSH_USER").unwrap_or_default(),
            host: non_empty_env("JGO_SSH_HOST").unwrap_or_default(),
            port: non_empty_env("JGO_SSH_PORT").unwrap_or_default(),
            key_path: non_empty_env("JGO_SSH_KEY_PATH"),
            strict_host_key_checking: parse_bool_env("JGO_SSH_STRICT_HOST_KEY_CHECKING", false)?,
        };

        let optimize_prompt = parse_bool_env("JGO_OPTIMIZE_PROMPT", false)?;

        let mirror_root = non_empty_env("JGO_MIRROR_ROOT")
            .map(PathBuf::from)
            .unwrap_or_else(default_mirror_root);

        let planner_timeout = Duration::from_secs(parse_u64_env("JGO_PLANNER_TIMEOUT_SECS", 120)?);

        let agent_timeout = match non_empty_env("JGO_AGENT_TIMEOUT_SECS") {
            None => None,
            Some(raw) => Some(Duration::from_secs(raw.parse().map_err(|e| {
                ConfigError::InvalidValue("JGO_AGENT_TIMEOUT_SECS".to_string(), format!("{e}"))
            })?)),
        };

        Ok(Self {
            agent_bin,
            listen_addr,
            transport,
            ssh,
            optimize_prompt,
            plan_mode,
            mirror_root,
            planner_timeout,
            agent_timeout,
        })
    }

    /// Validate that the selected transport has everything it needs.
    ///
    /// The ssh transport requires user, host and port; the local transport
    /// has no required settings.
    pub fn validate_transport(&self) -> Result<(), ConfigError> {
        if self.transport != TransportKind::Ssh {
            return Ok(());
        }
        let mut missing = Vec::new();
        if self.ssh.user.trim().is_empty() {
            missing.push("JGO_SSH_USER");
        }
        if self.ssh.host.trim().is_empty() {
            missing.push("JGO_SSH_HOST");
        }
        if self.ssh.port.trim().is_empty() {
            missing.push("JGO_SSH_PORT");
        }
        if missing.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::MissingSettings(missing.join(", ")))
        }
    }
}

/// Planner (chat-completion) endpoint configuration.
#[derive(Debug, Clone)]
pub struct PlannerConfig {
    pub base_url: String,
    pub api_key: String,
    pub model: String,
}

impl PlannerConfig {
    /// Load from an environment snapshot. Call [`apply_provider_fallbacks`]
    /// on the snapshot first.
    pub fn from_env_map(env: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let base_url = trimmed(env, "OPENAI_BASE_URL");
        let api_key = trimmed(env, "OPENAI_API_KEY");
        let model = trimmed(env, "MODEL");

        let mut missing = Vec::new();
        if api_key.is_empty() {
            missing.push("OPENAI_API_KEY");
        }
        if model.is_empty() {
            missing.push("MODEL");
        }
        if !missing.is_empty() {
            return Err(ConfigError::MissingSettings(missing.join(", ")));
        }

        Ok(Self {
            base_url: if base_url.is_empty() {
                DEFAULT_OPENAI_BASE.to_string()
            } else {
                base_url
            },
            api_key,
            model,
        })
    }
}

/// Snapshot the process environment as a map.
pub fn env_snapshot() -> HashMap<String, String> {
    std::env::vars().collect()
}

/// Fill `OPENAI_API_KEY` / `MODEL` from OpenWebUI or LiteLLM variables when
/// the primary ones are unset.
pub fn apply_provider_fallbacks(env: &mut HashMap<String, String>) {
    if trimmed(env, "OPENAI_API_KEY").is_empty() {
        for key in ["OPENWEBUI_API_KEY", "LITELLM_API_KEY"] {
            let v = trimmed(env, key);
            if !v.is_empty() {
                env.insert("OPENAI_API_KEY".to_string(), v);
                break;
            }
        }
    }

    if trimmed(env, "MODEL").is_empty() {
        for key in ["OPENWEBUI_MODEL", "LITELLM_MODEL"] {
            let v = trimmed(env, key);
            if !v.is_empty() {
                env.insert("MODEL".to_string(), v);
                break;
            }
        }
    }
}

/// CLI tools advertised to the planner and the agent prompts.
///
/// Always includes `git` and the agent binary's basename; extra names come
/// from `JGO_AVAILABLE_CLIS` and from credential-shaped environment variables
/// (`aws`, `gh`, `kubectl`). Sorted and deduplicated.
pub fn resolve_available_clis(env: &HashMap<String, String>, agent_bin: &str) -> Vec<String> {
    let mut set = BTreeSet::new();

    set.insert("git".to_string());
    let base = Path::new(agent_bin.trim())
        .file_name()
        .map(|n| n.to_string_lossy().trim().to_string())
        .unwrap_or_default();
    set.insert(if base.is_empty() {
        "codex".to_string()
    } else {
        base
    });

    for item in trimmed(env, "JGO_AVAILABLE_CLIS").split(',') {
        let name = item.trim();
        if !name.is_empty() {
            set.insert(name.to_string());
        }
    }

    if has_any_env(
        env,
        &[
            "AWS_ACCESS_KEY_ID",
            "AWS_PROFILE",
            "AWS_DEFAULT_REGION",
            "AWS_REGION",
        ],
    ) {
        set.insert("aws".to_string());
    }
    if has_any_env(env, &["GITHUB_TOKEN", "GH_TOKEN"]) {
        set.insert("gh".to_string());
    }
    if has_any_env(env, &["KUBECONFIG"]) {
        set.insert("kubectl".to_string());
    }

    set.into_iter().collect()
}

fn has_any_env(env: &HashMap<String, String>, keys: &[&str]) -> bool {
    keys.iter().any(|key| !trimmed(env, key).is_empty())
}

fn trimmed(env: &HashMap<String, String>, key: &str) -> String {
    env.get(key).map(|v| v.trim().to_string()).unwrap_or_default()
}

fn non_empty_env(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn parse_bool_env(key: &str, default: bool) -> Result<bool, ConfigError> {
    match non_empty_env(key) {
        None => Ok(default),
        Some(raw) => parse_bool(&raw)
            .map_err(|e| ConfigError::InvalidValue(key.to_string(), e)),
    }
}

fn parse_u64_env(key: &str, default: u64) -> Result<u64, ConfigError> {
    match non_empty_env(key) {
        None => Ok(default),
        Some(raw) => raw
            .parse()
            .map_err(|e| ConfigError::InvalidValue(key.to_string(), format!("{e}"))),
    }
}

fn parse_bool(value: &str) -> Result<bool, String> {
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "t" | "yes" | "y" | "on" => Ok(true),
        "0" | "false" | "f" | "no" | "n" | "off" => Ok(false),
        other => Err(format!("expected boolean-like value, got: {}", other)),
    }
}

/// A bare `:8080` address binds all interfaces.
pub(crate) fn normalize_listen_addr(addr: &str) -> String {
    let addr = addr.trim();
    if let Some(port) = addr.strip_prefix(':') {
        format!("0.0.0.0:{port}")
    } else {
        addr.to_string()
    }
}

fn default_mirror_root() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("jgo")
        .join("mirrors")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env_of(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn parse_bool_accepts_common_forms() {
        assert_eq!(parse_bool("true"), Ok(true));
        assert_eq!(parse_bool("1"), Ok(true));
        assert_eq!(parse_bool("ON"), Ok(true));
        assert_eq!(parse_bool("false"), Ok(false));
        assert_eq!(parse_bool("no"), Ok(false));
        assert!(parse_bool("maybe").is_err());
    }

    #[test]
    fn listen_addr_port_only_binds_all_interfaces() {
        assert_eq!(normalize_listen_addr(":8080"), "0.0.0.0:8080");
        assert_eq!(normalize_listen_addr("127.0.0.1:9000"), "127.0.0.1:9000");
    }

    #[test]
    fn provider_fallbacks_fill_missing_planner_vars() {
        let mut env = env_of(&[("OPENWEBUI_API_KEY", "wk"), ("LITELLM_MODEL", "lm")]);
        apply_provider_fallbacks(&mut env);
        assert_eq!(env.get("OPENAI_API_KEY").map(String::as_str), Some("wk"));
        assert_eq!(env.get("MODEL").map(String::as_str), Some("lm"));
    }

    #[test]
    fn provider_fallbacks_keep_primary_vars() {
        let mut env = env_of(&[
            ("OPENAI_API_KEY", "primary"),
            ("OPENWEBUI_API_KEY", "fallback"),
        ]);
        apply_provider_fallbacks(&mut env);
        assert_eq!(
            env.get("OPENAI_API_KEY").map(String::as_str),
            Some("primary")
        );
    }

    #[test]
    fn planner_config_reports_all_missing_settings() {
        let env = env_of(&[]);
        let err = PlannerConfig::from_env_map(&env).unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("OPENAI_API_KEY"));
        assert!(msg.contains("MODEL"));
    }

    #[test]
    fn planner_config_defaults_base_url() {
        let env = env_of(&[("OPENAI_API_KEY", "k"), ("MODEL", "m")]);
        let cfg = PlannerConfig::from_env_map(&env).unwrap();
        assert_eq!(cfg.base_url, DEFAULT_OPENAI_BASE);
    }

    #[test]
    fn available_clis_always_include_git_and_agent() {
        let clis = resolve_available_clis(&env_of(&[]), "/usr/local/bin/codex");
        assert_eq!(clis, vec!["codex".to_string(), "git".to_string()]);
    }

    #[test]
    fn available_clis_detect_credentialed_tools() {
        let env = env_of(&[
            ("GITHUB_TOKEN", "t"),
            ("KUBECONFIG", "/home/me/.kube/config"),
            ("JGO_AVAILABLE_CLIS", "jq, rg"),
        ]);
        let clis = resolve_available_clis(&env, "codex");
        assert_eq!(clis, vec!["codex", "gh", "git", "jq", "kubectl", "rg"]);
    }
}
