//! Commit-history timestamps.
//!
//! When commit-history mode is on, a tracked file whose worktree
//! contents match the committed snapshot gets its commit time as the
//! effective timestamp instead of the mtime. This avoids spurious
//! rebuilds after a checkout touches every file. Any git failure
//! degrades to "use the mtime".
//!
//! Commands run with `git -C` in the file's directory, so probing is
//! independent of the supervisor's working directory.

use std::path::{Path, PathBuf};

use chrono::{DateTime, TimeZone, Utc};
use tokio::process::Command;
use tracing::debug;

async fn run_git(dir: &Path, args: &[&str]) -> Result<String, String> {
    let output = Command::new("git")
        .arg("-C")
        .arg(dir)
        .args(args)
        .output()
        .await
        .map_err(|e| format!("git exec failed: {e}"))?;

    if output.status.success() {
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    } else {
        let stderr = String::from_utf8_lossy(&output.stderr);
        Err(format!("git error: {stderr}"))
    }
}

/// Absolute form of `path`; pathspecs must stay valid under `git -C`.
fn absolute(path: &str) -> Option<PathBuf> {
    let p = Path::new(path);
    if p.is_absolute() {
        Some(p.to_path_buf())
    } else {
        std::env::current_dir().ok().map(|cwd| cwd.join(p))
    }
}

pub async fn is_tracked(dir: &Path, path: &str) -> bool {
    run_git(dir, &["ls-files", "--error-unmatch", "--", path])
        .await
        .is_ok()
}

/// True when the worktree copy of `path` matches its committed snapshot.
pub async fn is_worktree_clean(dir: &Path, path: &str) -> bool {
    match run_git(dir, &["status", "--porcelain", "--", path]).await {
        Ok(out) => out.trim().is_empty(),
        Err(_) => false,
    }
}

/// Commit time of the last commit touching `path`.
pub async fn commit_time(dir: &Path, path: &str) -> Option<DateTime<Utc>> {
    let out = run_git(dir, &["log", "-1", "--format=%ct", "--", path])
        .await
        .ok()?;
    let secs: i64 = out.trim().parse().ok()?;
    Utc.timestamp_opt(secs, 0).single()
}

/// Effective commit timestamp for `path`, or `None` when the file is
/// untracked, dirty, or git is unavailable.
pub async fn committed_timestamp(path: &str) -> Option<DateTime<Utc>> {
    let abs = absolute(path)?;
    let dir = abs.parent()?;
    let spec = abs.to_str()?;
    if !is_tracked(dir, spec).await {
        return None;
    }
    if !is_worktree_clean(dir, spec).await {
        debug!(path, "worktree differs from committed snapshot");
        return None;
    }
    commit_time(dir, spec).await
}
