//! Non-interactive agent invocation.

use crate::error::AutomationError;
use crate::session::{format_command, SessionManager};
use crate::util::truncate_for_log;

/// Placeholder used instead of the prompt body in command logs.
const PROMPT_PLACEHOLDER: &str = "<inline-prompt>";

/// Run one agent stage in the session's working directory.
///
/// The prompt travels as a trailing command-line argument; simple, at the
/// cost of command-line length limits for very large prompts. The logged
/// command line replaces the prompt body with a placeholder and reports its
/// length and a short preview instead, so instruction content never lands in
/// operational logs at full length.
pub async fn run_agent_stage(
    session: &SessionManager,
    workdir: &str,
    stage: &'static str,
    prompt: &str,
) -> Result<String, AutomationError> {
    let command = agent_exec_command(session.agent_bin(), workdir, prompt);

    let log_command = agent_exec_command(session.agent_bin(), workdir, PROMPT_PLACEHOLDER);
    tracing::info!(
        stage = stage,
        command = %session.render_command(&log_command),
        prompt_len = prompt.len(),
        prompt_preview = %truncate_for_log(prompt, 240),
        "agent invocation"
    );

    let output = session.run(&command).await?;
    tracing::debug!(
        stage = stage,
        output = %truncate_for_log(&output.combined(), 1200),
        "agent output"
    );

    if !output.success() {
        return Err(AutomationError::AgentExecution {
            stage,
            detail: output.error_detail(),
        });
    }

    Ok(output.combined())
}

/// `<agent> exec --full-auto --skip-git-repo-check --cd <workdir> <prompt>`
fn agent_exec_command(agent_bin: &str, workdir: &str, prompt: &str) -> String {
    format_command(
        agent_bin,
        &[
            "exec",
            "--full-auto",
            "--skip-git-repo-check",
            "--cd",
            workdir,
            prompt,
        ],
    )
}
