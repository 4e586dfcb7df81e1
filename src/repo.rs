//! Repository reference resolution.
//!
//! Extracts an `owner/name` reference from free-form instruction text and
//! expands references into clone URLs. A GitHub URL in the text wins over a
//! bare `owner/name` token; when neither is present the run proceeds without
//! a repository (workspace-only mode).

use std::fmt;

use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RepoRefError {
    #[error("invalid repository reference: {0}")]
    InvalidReference(String),
}

/// A normalized `owner/name` repository reference.
///
/// Invariant: exactly one `/`, neither side empty, no surrounding slashes,
/// no `.git` suffix, no trailing punctuation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoRef(String);

impl RepoRef {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Expand this reference into a clone URL.
    pub fn clone_url(&self) -> Result<String, RepoRefError> {
        url_from_ref(&self.0)
    }
}

impl fmt::Display for RepoRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

static GITHUB_URL_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"https?://github\.com/([A-Za-z0-9_.-]+/[A-Za-z0-9_.-]+)(?:\.git)?")
        .expect("github url pattern")
});

static PLAIN_REF_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b([A-Za-z0-9_.-]+/[A-Za-z0-9_.-]+)\b").expect("plain ref pattern")
});

/// Find a repository reference in instruction text.
///
/// Returns `None` when the text contains neither a GitHub URL nor an
/// `owner/name` token pair; callers treat that as a workspace-only run.
pub fn resolve(instruction: &str) -> Option<RepoRef> {
    let text = instruction.trim();
    if text.is_empty() {
        return None;
    }

    if let Some(m) = GITHUB_URL_PATTERN.captures(text) {
        if let Some(reference) = valid_pair(&normalize_ref(&m[1])) {
            return Some(reference);
        }
    }

    for m in PLAIN_REF_PATTERN.captures_iter(text) {
        if let Some(reference) = valid_pair(&normalize_ref(&m[1])) {
            return Some(reference);
        }
    }

    None
}

/// Expand a reference into a clone URL.
///
/// Absolute `http(s)` references pass through with `.git` appended if
/// absent; a bare `owner/name` expands to a GitHub clone URL; anything else
/// is invalid.
pub fn url_from_ref(reference: &str) -> Result<String, RepoRefError> {
    let reference = reference.trim();
    if reference.is_empty() {
        return Err(RepoRefError::InvalidReference(
            "repository reference is empty".to_string(),
        ));
    }

    if reference.starts_with("http://") || reference.starts_with("https://") {
        return Ok(if reference.ends_with(".git") {
            reference.to_string()
        } else {
            format!("{reference}.git")
        });
    }

    if reference.contains('/') && !reference.contains("://") {
        let mut parts = reference.splitn(2, '/');
        let owner = parts.next().unwrap_or_default();
        let name = parts.next().unwrap_or_default();
        if !owner.is_empty() && !name.is_empty() && !name.contains('/') {
            return Ok(format!("https://github.com/{reference}.git"));
        }
    }

    Err(RepoRefError::InvalidReference(reference.to_string()))
}

/// Strip surrounding slashes, a `.git` suffix and trailing punctuation.
///
/// Runs to a fixed point so the result is stable under repeated application
/// (`a/b.git.` reduces through `a/b.git` to `a/b`).
pub fn normalize_ref(reference: &str) -> String {
    let mut out = reference.trim().to_string();
    loop {
        let before = out.clone();
        out = out.trim_matches('/').to_string();
        if let Some(stripped) = out.strip_suffix(".git") {
            out = stripped.to_string();
        }
        out = out
            .trim_end_matches(['.', ',', ':', ';', ')', ']', '}'])
            .to_string();
        if out == before {
            return out;
        }
    }
}

fn valid_pair(candidate: &str) -> Option<RepoRef> {
    let mut parts = candidate.split('/');
    let owner = parts.next()?;
    let name = parts.next()?;
    if parts.next().is_some() || owner.is_empty() || name.is_empty() {
        return None;
    }
    Some(RepoRef(candidate.to_string()))
}
