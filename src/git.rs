use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tracing::debug;

use crate::config;
use crate::util::{EXEC_TIMEOUT, run_with_timeout};

const GIT_CACHE_TTL: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
struct CachedBranch {
    cwd: PathBuf,
    timestamp: DateTime<Utc>,
    branch: String,
}

/// Current branch of the repository at `cwd`, cached briefly on disk.
pub fn git_branch(cwd: Option<&Path>) -> Option<String> {
    git_branch_cached(cwd?, &config::git_cache_path(), Utc::now())
}

fn git_branch_cached(cwd: &Path, cache_path: &Path, now: DateTime<Utc>) -> Option<String> {
    if let Some(branch) = load_cached_branch(cache_path, cwd, now) {
        return Some(branch);
    }
    if !cwd.is_dir() {
        return None;
    }

    let branch = fetch_git_branch(cwd)?;
    let cached = CachedBranch {
        cwd: cwd.to_path_buf(),
        timestamp: now,
        branch: branch.clone(),
    };
    if let Err(err) = save_cached_branch(cache_path, &cached) {
        debug!(error = %err, "git cache write failed");
    }
    Some(branch)
}

fn load_cached_branch(path: &Path, cwd: &Path, now: DateTime<Utc>) -> Option<String> {
    let raw = fs::read_to_string(path).ok()?;
    let cached: CachedBranch = serde_json::from_str(&raw).ok()?;
    if cached.cwd != cwd {
        return None;
    }
    let age = now.signed_duration_since(cached.timestamp).to_std().ok()?;
    (age <= GIT_CACHE_TTL).then_some(cached.branch)
}

fn save_cached_branch(path: &Path, cached: &CachedBranch) -> Result<()> {
    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(parent)
        .with_context(|| format!("failed to create cache directory {}", parent.display()))?;
    let tmp = NamedTempFile::new_in(parent).context("failed to create git cache tmp")?;
    serde_json::to_writer(tmp.as_file(), cached).context("failed to write git cache tmp")?;
    tmp.persist(path)
        .with_context(|| format!("failed to move git cache into {}", path.display()))?;
    Ok(())
}

fn fetch_git_branch(project_path: &Path) -> Option<String> {
    let mut command = Command::new("git");
    command
        .arg("-C")
        .arg(project_path)
        .arg("rev-parse")
        .arg("--abbrev-ref")
        .arg("HEAD");
    let output = match run_with_timeout(&mut command, EXEC_TIMEOUT) {
        Ok(output) => output,
        Err(err) => {
            debug!(error = %err, path = %project_path.display(), "git branch lookup failed");
            return None;
        }
    };

    if !output.status.success() {
        debug!(path = %project_path.display(), "git rev-parse failed");
        return None;
    }

    let branch = String::from_utf8_lossy(&output.stdout).trim().to_string();
    (!branch.is_empty()).then_some(branch)
}
