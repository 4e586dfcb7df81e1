//! Plan generation via a chat-completion call.
//!
//! One request against an OpenAI-compatible endpoint turns the raw
//! instruction into a [`RequestPlan`]. The system message pins the output
//! schema, lists the CLI tools known to exist on the execution host, and
//! demands JSON-only output; the parser rejects anything looser than that
//! (unknown fields, trailing prose) so a chatty model cannot smuggle text
//! past the schema.

use serde::Deserialize;
use thiserror::Error;

use crate::config::{PlanMode, PlannerConfig};
use crate::util::{sanitize_url, truncate_for_log};

#[derive(Debug, Error)]
pub enum PlanError {
    /// Transport-level failure talking to the planner endpoint.
    #[error("planner request failed: {0}")]
    Upstream(#[from] reqwest::Error),

    /// Non-2xx response from the planner endpoint.
    #[error("planner request failed (endpoint={endpoint}, status={status}): {body}")]
    UpstreamStatus {
        endpoint: String,
        status: reqwest::StatusCode,
        body: String,
    },

    /// The model's content is not strict JSON matching the plan schema.
    #[error("parse plan json: {0}")]
    Malformed(String),

    /// The required prompt field is empty after trimming.
    #[error("parse plan json: optimized_prompt is required")]
    Empty,

    /// The gating variant classified the request as not executable.
    #[error("request is not executable: {0}")]
    Rejected(String),
}

/// Parsed planner output.
///
/// `executable` and `reason` only appear in the gating variant; `repo` is an
/// optional hint that is never required.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RequestPlan {
    #[serde(default)]
    pub optimized_prompt: String,
    #[serde(default)]
    pub executable: Option<bool>,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub repo: Option<String>,
}

#[derive(Debug, serde::Serialize)]
struct PlannerChatRequest<'a> {
    model: &'a str,
    temperature: f64,
    response_format: ResponseFormat,
    messages: Vec<ChatMessage<'a>>,
}

#[derive(Debug, serde::Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Debug, serde::Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct PlannerChatResponse {
    #[serde(default)]
    choices: Vec<PlannerChoice>,
}

#[derive(Debug, Deserialize)]
struct PlannerChoice {
    message: PlannerMessage,
}

#[derive(Debug, Deserialize)]
struct PlannerMessage {
    #[serde(default)]
    content: String,
}

/// Issues plan requests against one configured endpoint.
pub struct Planner {
    client: reqwest::Client,
    config: PlannerConfig,
    mode: PlanMode,
}

impl Planner {
    pub fn new(config: PlannerConfig, mode: PlanMode, timeout: std::time::Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_default();
        Self {
            client,
            config,
            mode,
        }
    }

    /// Generate a plan for the instruction.
    ///
    /// In `Gate` mode a plan with `executable: false` fails with
    /// [`PlanError::Rejected`] carrying the model's reason.
    pub async fn plan(
        &self,
        instruction: &str,
        available_clis: &[String],
    ) -> Result<RequestPlan, PlanError> {
        let system = system_prompt(self.mode, available_clis);
        let body = PlannerChatRequest {
            model: &self.config.model,
            temperature: match self.mode {
                PlanMode::Rewrite => 1.0,
                PlanMode::Gate => 0.2,
            },
            response_format: ResponseFormat {
                kind: "json_object",
            },
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: &system,
                },
                ChatMessage {
                    role: "user",
                    content: instruction,
                },
            ],
        };

        let endpoint = format!(
            "{}/chat/completions",
            self.config.base_url.trim_end_matches('/')
        );
        tracing::info!(
            stage = "prompt_optimize",
            endpoint = %sanitize_url(&endpoint),
            model = %self.config.model,
            instruction_len = instruction.len(),
            "calling planner endpoint"
        );

        let resp = self
            .client
            .post(&endpoint)
            .bearer_auth(&self.config.api_key)
            .json(&body)
            .send()
            .await?;

        let status = resp.status();
        let body = resp.text().await?;
        tracing::debug!(
            stage = "prompt_optimize",
            status = %status,
            body_preview = %truncate_for_log(&body, 400),
            "planner response"
        );
        if !status.is_success() {
            return Err(PlanError::UpstreamStatus {
                endpoint: sanitize_url(&endpoint),
                status,
                body: body.trim().to_string(),
            });
        }

        let chat: PlannerChatResponse = serde_json::from_str(&body)
            .map_err(|e| PlanError::Malformed(format!("decode chat response: {e}")))?;
        let content = chat
            .choices
            .first()
            .ok_or_else(|| PlanError::Malformed("chat response has no choices".to_string()))?
            .message
            .content
            .trim();
        if content.is_empty() {
            return Err(PlanError::Malformed(
                "chat response content is empty".to_string(),
            ));
        }

        let plan = parse_request_plan(content)?;
        if self.mode == PlanMode::Gate {
            if let Some(false) = plan.executable {
                let reason = plan.reason.unwrap_or_default();
                return Err(PlanError::Rejected(reason));
            }
        }
        Ok(plan)
    }
}

/// Parse the model's content as a strict plan object.
///
/// Rejects unknown fields and any non-whitespace content after the JSON
/// value. Enforces the plan invariants: a non-executable plan must carry a
/// reason; an executable (or ungated) plan must carry a prompt.
pub fn parse_request_plan(raw: &str) -> Result<RequestPlan, PlanError> {
    let mut de = serde_json::Deserializer::from_str(raw);
    let mut plan = RequestPlan::deserialize(&mut de)
        .map_err(|e| PlanError::Malformed(format!("{e}")))?;
    de.end()
        .map_err(|_| PlanError::Malformed("trailing data after plan object".to_string()))?;

    plan.optimized_prompt = plan.optimized_prompt.trim().to_string();
    plan.reason = plan
        .reason
        .map(|r| r.trim().to_string())
        .filter(|r| !r.is_empty());

    if plan.executable == Some(false) {
        if plan.reason.is_none() {
            return Err(PlanError::Malformed(
                "non-executable plan must include a reason".to_string(),
            ));
        }
        return Ok(plan);
    }

    if plan.optimized_prompt.is_empty() {
        return Err(PlanError::Empty);
    }
    Ok(plan)
}

fn system_prompt(mode: PlanMode, available_clis: &[String]) -> String {
    let cli_list = if available_clis.is_empty() {
        "codex, git".to_string()
    } else {
        available_clis.join(", ")
    };

    match mode {
        PlanMode::Rewrite => format!(
            "Return strict JSON only with key: optimized_prompt(string). \
             Do not include any other keys or text. \
             Your job is prompt optimization only, not execution decision. \
             Rewrite the user request into a clear, concrete coding-agent execution prompt. \
             Available CLI tools from environment: {cli_list}. \
             Prefer these CLIs in optimized_prompt. \
             For GitHub tasks, use gh when available. \
             For Kubernetes tasks, use kubectl when available."
        ),
        PlanMode::Gate => format!(
            "Return strict JSON only with keys: executable(boolean), reason(string), \
             optimized_prompt(string). Do not include any other keys or text. \
             Decide whether the user request can be executed non-interactively with the \
             available CLI tools, then rewrite it into a clear, concrete coding-agent \
             execution prompt. If the request is not executable, set executable to false \
             and explain why in reason. \
             Available CLI tools from environment: {cli_list}. \
             Prefer these CLIs in optimized_prompt. \
             For GitHub tasks, use gh when available. \
             For Kubernetes tasks, use kubectl when available."
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_minimal_plan() {
        let plan = parse_request_plan(r#"{"optimized_prompt": "do the thing"}"#).unwrap();
        assert_eq!(plan.optimized_prompt, "do the thing");
        assert_eq!(plan.executable, None);
    }

    #[test]
    fn rejects_unknown_fields() {
        let err = parse_request_plan(r#"{"optimized_prompt": "x", "notes": "extra"}"#)
            .unwrap_err();
        assert!(matches!(err, PlanError::Malformed(_)));
    }

    #[test]
    fn rejects_trailing_content() {
        let err = parse_request_plan("{\"optimized_prompt\": \"x\"}\nHere is why I chose this.")
            .unwrap_err();
        assert!(matches!(err, PlanError::Malformed(_)));
    }

    #[test]
    fn allows_trailing_whitespace() {
        let plan = parse_request_plan("{\"optimized_prompt\": \"x\"}  \n").unwrap();
        assert_eq!(plan.optimized_prompt, "x");
    }

    #[test]
    fn rejects_empty_prompt() {
        let err = parse_request_plan(r#"{"optimized_prompt": "   "}"#).unwrap_err();
        assert!(matches!(err, PlanError::Empty));
    }

    #[test]
    fn gated_plan_keeps_reason() {
        let plan = parse_request_plan(
            r#"{"executable": false, "reason": "needs credentials", "optimized_prompt": ""}"#,
        )
        .unwrap();
        assert_eq!(plan.executable, Some(false));
        assert_eq!(plan.reason.as_deref(), Some("needs credentials"));
    }

    #[test]
    fn non_executable_without_reason_is_malformed() {
        let err = parse_request_plan(r#"{"executable": false, "optimized_prompt": ""}"#)
            .unwrap_err();
        assert!(matches!(err, PlanError::Malformed(_)));
    }

    #[test]
    fn executable_plan_requires_prompt() {
        let err =
            parse_request_plan(r#"{"executable": true, "optimized_prompt": " "}"#).unwrap_err();
        assert!(matches!(err, PlanError::Empty));
    }

    #[test]
    fn system_prompt_lists_tools_with_fallback() {
        let with_tools = system_prompt(PlanMode::Rewrite, &["gh".to_string(), "git".to_string()]);
        assert!(with_tools.contains("gh, git"));
        let fallback = system_prompt(PlanMode::Rewrite, &[]);
        assert!(fallback.contains("codex, git"));
    }
}
