//! Git workflow stage helpers.
//!
//! The actual committing and pushing is delegated to the agent; this module
//! owns the branch naming convention and the fast-fail emptiness check that
//! runs before the commit/push stage.

use chrono::{DateTime, Utc};

use crate::error::AutomationError;
use crate::session::{shell_quote, SessionManager};

/// Relative path of the repository checkout inside the working directory.
pub const REPO_SUBDIR: &str = "repo";

const BRANCH_PREFIX: &str = "jgo";

/// Branch name for a run: `jgo/<UTC timestamp>`.
///
/// Readable and monotonic, but not unique under concurrent sub-second runs;
/// acceptable because branches are namespaced per run on the remote.
pub fn branch_name(now: DateTime<Utc>) -> String {
    format!("{}/{}", BRANCH_PREFIX, now.format("%Y%m%d-%H%M%S"))
}

/// Whether the session checkout has any pending changes.
///
/// Runs `git status --porcelain` in `<workdir>/repo` through the transport.
/// A failing status command (most commonly: the edit stage never created the
/// checkout) counts as an empty change set, so the caller fails with
/// `NoChanges` instead of invoking the agent a second time.
pub async fn has_pending_changes(
    session: &SessionManager,
    workdir: &str,
) -> Result<bool, AutomationError> {
    let repo_dir = format!("{}/{}", workdir.trim_end_matches('/'), REPO_SUBDIR);
    let command = format!("git -C {} status --porcelain", shell_quote(&repo_dir));

    let output = session.run(&command).await?;
    if !output.success() {
        tracing::debug!(
            repo_dir = %repo_dir,
            detail = %output.error_detail(),
            "status check failed; treating change set as empty"
        );
        return Ok(false);
    }
    Ok(!output.stdout.trim().is_empty())
}
