//! Prompt templates for the agent stages.
//!
//! Templates are structured builders rather than ad hoc format strings so
//! their correctness is testable without running the pipeline. Rendered text
//! is what the agent actually receives; constraints in it (no commit during
//! the edit step, never force-push) are contractual for the agent, not
//! enforced programmatically here.

/// Repository context shared by the repo-scoped prompts.
#[derive(Debug, Clone)]
pub struct RepoTarget {
    /// `owner/name` reference as resolved from the instruction.
    pub reference: String,
    /// Clone URL for the repository.
    pub clone_url: String,
    /// Branch the run creates and pushes.
    pub branch: String,
}

fn tool_list(tools: &[String]) -> String {
    let joined = tools.join(", ");
    if joined.trim().is_empty() {
        "codex, git".to_string()
    } else {
        joined
    }
}

fn environment_block(tools: &[String]) -> String {
    format!(
        "Available tools/environment:\n\
         - coding agent CLI automation mode\n\
         - CLI tools from environment: {}\n\
         - KUBECONFIG environment variable may be provided\n\
         - OpenAI-compatible endpoints (OpenWebUI/LiteLLM) via environment variables\n\
         \n\
         Execution guidance:\n\
         - Use CLI tools listed above when relevant.\n\
         - For GitHub-related tasks, use gh when available.\n\
         - For Kubernetes-related tasks, use kubectl when available.",
        tool_list(tools)
    )
}

/// Prompt for a run with no repository context.
#[derive(Debug, Clone)]
pub struct WorkspacePrompt {
    pub instruction: String,
    pub tools: Vec<String>,
}

impl WorkspacePrompt {
    pub fn render(&self) -> String {
        format!(
            "You are operating inside a workspace directory.\n\
             \n\
             {}\n\
             \n\
             Execute this optimized request exactly:\n\
             {}\n\
             \n\
             Constraints:\n\
             - Use non-interactive commands only.\n\
             - Keep changes focused and minimal.\n\
             - Do not ask for extra user input.\n",
            environment_block(&self.tools),
            self.instruction
        )
    }
}

/// Prompt for the edit step of a repo-scoped run.
///
/// Explicitly forbids committing or pushing; that belongs to the second
/// stage.
#[derive(Debug, Clone)]
pub struct EditPrompt {
    pub target: RepoTarget,
    pub instruction: String,
    pub tools: Vec<String>,
}

impl EditPrompt {
    pub fn render(&self) -> String {
        format!(
            "You are operating inside an empty workspace directory.\n\
             Target repository reference from user request: {reference}\n\
             Target repository clone URL: {url}\n\
             Target branch: {branch}\n\
             \n\
             {environment}\n\
             \n\
             Task:\n\
             1. Clone the target repository into ./repo (if already cloned, reuse it).\n\
             2. In ./repo, checkout/create branch {branch}.\n\
             3. Execute this optimized request exactly in ./repo:\n\
             {instruction}\n\
             4. Stop after file changes. Do not commit or push in this step.\n\
             \n\
             Constraints:\n\
             - Use non-interactive commands only.\n\
             - Keep changes focused and minimal.\n\
             - Do not ask for extra user input.\n",
            reference = self.target.reference,
            url = self.target.clone_url,
            branch = self.target.branch,
            environment = environment_block(&self.tools),
            instruction = self.instruction,
        )
    }
}

/// Prompt for the commit/push step of a repo-scoped run.
#[derive(Debug, Clone)]
pub struct CommitPushPrompt {
    pub target: RepoTarget,
}

impl CommitPushPrompt {
    pub fn render(&self) -> String {
        format!(
            "You are operating inside a workspace directory.\n\
             Target repository reference from user request: {reference}\n\
             Target repository clone URL: {url}\n\
             Target branch: {branch}\n\
             \n\
             Task:\n\
             1. Ensure target repository exists at ./repo (clone if missing).\n\
             2. In ./repo, checkout branch {branch} (create it if missing).\n\
             3. Inspect all staged/unstaged/untracked changes.\n\
             4. Split the changes into coherent, minimal commits by topic.\n\
             5. Use concise Conventional Commit messages.\n\
             6. Commit all current changes.\n\
             7. Push to origin {branch}.\n\
             \n\
             Constraints:\n\
             - Use non-interactive commands only. Do not open editors or interactive prompts.\n\
             - Do not amend or rewrite existing commits.\n\
             - Never force-push.\n\
             - Keep each commit focused and internally consistent.\n\
             - After each commit, verify that staged content matches the commit message.\n\
             - At the end, print the pushed commit list as \"<short_sha> <subject>\".\n",
            reference = self.target.reference,
            url = self.target.clone_url,
            branch = self.target.branch,
        )
    }
}
