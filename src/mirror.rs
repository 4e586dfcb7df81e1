//! Repository mirror cache.
//!
//! Keeps one bare mirror per repository URL under a fixed cache root so that
//! repeated runs pay only an incremental `remote update` instead of a full
//! network clone. Session checkouts are cloned *from the mirror* and then
//! repointed at the real repository URL so pushes still reach the right
//! destination.
//!
//! All mirror mutations happen under a per-mirror advisory lock file, which
//! serializes concurrent runs targeting the same repository.

use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};
use std::process::Command;

use fs2::FileExt;
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::util::sanitize_url;

/// Directory-name placeholder when a URL yields no usable slug.
const EMPTY_SLUG: &str = "repo";

#[derive(Debug, Error)]
pub enum MirrorError {
    #[error("mirror cache io: {0}")]
    Io(#[from] std::io::Error),

    #[error("git {args} failed: {detail}")]
    Git { args: String, detail: String },
}

/// Exclusive lock over one mirror directory, released on drop.
#[derive(Debug)]
struct MirrorLock {
    file: File,
}

impl MirrorLock {
    fn acquire(lock_path: &Path) -> Result<Self, MirrorError> {
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(lock_path)?;
        file.lock_exclusive()?;
        Ok(Self { file })
    }
}

impl Drop for MirrorLock {
    fn drop(&mut self) {
        let _ = fs2::FileExt::unlock(&self.file);
    }
}

/// The on-disk mirror cache. Cheap to construct; all state lives under
/// `root`.
#[derive(Debug, Clone)]
pub struct MirrorCache {
    root: PathBuf,
}

impl MirrorCache {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Mirror directory for a repository URL.
    ///
    /// Pure function of the URL: a human-readable slug plus a 12-byte URL
    /// digest, so two repositories that share a slug (same `owner/name` on
    /// different hosts) still map to distinct directories.
    pub fn mirror_path(&self, repo_url: &str) -> PathBuf {
        self.root
            .join(format!("{}-{}", repo_slug(repo_url), url_digest(repo_url)))
    }

    /// Create or refresh the mirror for a repository URL.
    ///
    /// An existing mirror gets its origin URL rewritten (credentials or host
    /// may have changed since it was created) and all refs refreshed with
    /// pruning; a missing one is mirror-cloned from the network. Runs under
    /// the per-mirror lock.
    pub fn sync(&self, repo_url: &str) -> Result<PathBuf, MirrorError> {
        fs::create_dir_all(&self.root)?;
        let mirror = self.mirror_path(repo_url);
        let _lock = MirrorLock::acquire(&lock_path(&mirror))?;

        if mirror.is_dir() {
            tracing::debug!(mirror = %mirror.display(), "refreshing existing mirror");
            run_git(&["remote", "set-url", "origin", repo_url], &mirror)?;
            run_git(&["remote", "update", "--prune"], &mirror)?;
        } else {
            tracing::info!(
                mirror = %mirror.display(),
                url = %sanitize_url(repo_url),
                "creating mirror clone"
            );
            let mirror_str = mirror.to_string_lossy().to_string();
            run_git(&["clone", "--mirror", repo_url, &mirror_str], &self.root)?;
        }

        Ok(mirror)
    }

    /// Clone a session checkout from the local mirror into `dest`, then
    /// repoint `origin` at the real repository URL.
    pub fn clone_into(
        &self,
        mirror: &Path,
        repo_url: &str,
        dest: &Path,
    ) -> Result<(), MirrorError> {
        let _lock = MirrorLock::acquire(&lock_path(mirror))?;

        let mirror_str = mirror.to_string_lossy().to_string();
        let dest_str = dest.to_string_lossy().to_string();
        run_git(&["clone", &mirror_str, &dest_str], &self.root)?;
        run_git(&["remote", "set-url", "origin", repo_url], dest)?;
        Ok(())
    }
}

fn lock_path(mirror: &Path) -> PathBuf {
    let mut name = mirror
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| EMPTY_SLUG.to_string());
    name.push_str(".lock");
    mirror.with_file_name(name)
}

/// Filesystem-safe slug of the repository's `owner/name` path.
fn repo_slug(repo_url: &str) -> String {
    let path = url::Url::parse(repo_url)
        .map(|u| u.path().to_string())
        .unwrap_or_else(|_| repo_url.to_string());
    let trimmed = path.trim_matches('/');
    let trimmed = trimmed.strip_suffix(".git").unwrap_or(trimmed);

    let mut slug = String::with_capacity(trimmed.len());
    for ch in trimmed.to_lowercase().chars() {
        if ch.is_ascii_alphanumeric() {
            slug.push(ch);
        } else if !slug.ends_with('-') {
            slug.push('-');
        }
    }
    let slug = slug.trim_matches('-').to_string();
    if slug.is_empty() {
        EMPTY_SLUG.to_string()
    } else {
        slug
    }
}

/// 12-byte hex digest of the full URL.
fn url_digest(repo_url: &str) -> String {
    let digest = Sha256::digest(repo_url.as_bytes());
    hex::encode(&digest[..12])
}

/// Run a git command and return its stdout.
fn run_git(args: &[&str], cwd: &Path) -> Result<String, MirrorError> {
    let output = Command::new("git").args(args).current_dir(cwd).output()?;

    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);

    if !output.status.success() {
        let detail = if stderr.trim().is_empty() {
            stdout.trim().to_string()
        } else {
            stderr.trim().to_string()
        };
        return Err(MirrorError::Git {
            args: args.join(" "),
            detail,
        });
    }

    Ok(stdout.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mirror_path_is_deterministic() {
        let cache = MirrorCache::new("/var/cache/jgo");
        let a = cache.mirror_path("https://github.com/acme/widgets.git");
        let b = cache.mirror_path("https://github.com/acme/widgets.git");
        assert_eq!(a, b);
    }

    #[test]
    fn mirror_path_disambiguates_same_slug_on_different_hosts() {
        let cache = MirrorCache::new("/var/cache/jgo");
        let github = cache.mirror_path("https://github.com/acme/widgets.git");
        let gitlab = cache.mirror_path("https://gitlab.com/acme/widgets.git");
        assert_ne!(github, gitlab);
        for path in [&github, &gitlab] {
            let name = path.file_name().unwrap().to_string_lossy().to_string();
            assert!(name.starts_with("acme-widgets-"), "name: {name}");
        }
    }

    #[test]
    fn slug_collapses_non_alphanumeric_runs() {
        assert_eq!(repo_slug("https://github.com/Acme/My.Widgets.git"), "acme-my-widgets");
        assert_eq!(repo_slug("https://github.com/acme/_widgets_/"), "acme-widgets");
    }

    #[test]
    fn slug_falls_back_on_empty_path() {
        assert_eq!(repo_slug("https://github.com/"), EMPTY_SLUG);
    }

    #[test]
    fn digest_is_twelve_bytes_of_hex() {
        let d = url_digest("https://github.com/acme/widgets.git");
        assert_eq!(d.len(), 24);
        assert!(d.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn lock_path_is_sibling_of_mirror() {
        let cache = MirrorCache::new("/var/cache/jgo");
        let mirror = cache.mirror_path("https://github.com/acme/widgets.git");
        let lock = lock_path(&mirror);
        assert_eq!(lock.parent(), mirror.parent());
        assert!(lock.to_string_lossy().ends_with(".lock"));
    }

    #[test]
    fn sync_then_resync_uses_existing_mirror() {
        let upstream = tempfile::tempdir().expect("tmpdir");
        let cache_root = tempfile::tempdir().expect("tmpdir");
        let work = tempfile::tempdir().expect("tmpdir");

        // Seed an upstream repository with one commit.
        let seed = |args: &[&str], cwd: &Path| {
            let out = Command::new("git")
                .args(args)
                .current_dir(cwd)
                .output()
                .expect("run git");
            assert!(
                out.status.success(),
                "git {args:?}: {}",
                String::from_utf8_lossy(&out.stderr)
            );
        };
        seed(&["init", "--initial-branch=main", "."], upstream.path());
        seed(&["config", "user.email", "ci@example.com"], upstream.path());
        seed(&["config", "user.name", "ci"], upstream.path());
        std::fs::write(upstream.path().join("README.md"), "hello\n").expect("write");
        seed(&["add", "."], upstream.path());
        seed(&["commit", "-m", "initial"], upstream.path());

        let url = upstream.path().to_string_lossy().to_string();
        let cache = MirrorCache::new(cache_root.path());

        let mirror = cache.sync(&url).expect("first sync");
        assert!(mirror.is_dir());

        // Second sync takes the refresh path.
        let again = cache.sync(&url).expect("second sync");
        assert_eq!(mirror, again);

        // A checkout from the mirror has origin pointing at the real URL.
        let dest = work.path().join("repo");
        cache.clone_into(&mirror, &url, &dest).expect("clone");
        let origin = Command::new("git")
            .args(["remote", "get-url", "origin"])
            .current_dir(&dest)
            .output()
            .expect("run git");
        assert_eq!(String::from_utf8_lossy(&origin.stdout).trim(), url);
    }
}
