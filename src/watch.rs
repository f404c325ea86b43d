//! Watch mode: poll directories for changes and re-run the build.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::SystemTime;

use tokio_util::sync::CancellationToken;
use tracing::info;
use walkdir::WalkDir;

use mason_engine::BuildSession;

const POLL_INTERVAL: std::time::Duration = std::time::Duration::from_secs(1);

fn snapshot(dirs: &[PathBuf]) -> HashMap<PathBuf, SystemTime> {
    let mut seen = HashMap::new();
    for dir in dirs {
        for entry in WalkDir::new(dir).into_iter().filter_map(|e| e.ok()) {
            if !entry.file_type().is_file() {
                continue;
            }
            // Persisted engine state must not retrigger the build.
            if entry.path().components().any(|c| c.as_os_str() == ".mason") {
                continue;
            }
            if let Some(mtime) = entry.metadata().ok().and_then(|m| m.modified().ok()) {
                seen.insert(entry.path().to_path_buf(), mtime);
            }
        }
    }
    seen
}

async fn run_once(session: &BuildSession, targets: &[String]) -> u8 {
    match session.build(targets).await {
        Ok(report) => {
            if let Some(e) = &report.error {
                eprintln!("mason: {e}");
            }
            report.exit_code()
        }
        Err(e) => {
            eprintln!("mason: {e}");
            e.exit_code()
        }
    }
}

/// Build once, then rebuild whenever a file under `dirs` changes.
/// Configuration errors abort immediately; build failures keep the
/// watch alive. Returns the last run's exit code.
pub async fn watch(
    session: &BuildSession,
    targets: &[String],
    dirs: &[PathBuf],
    interrupt: &CancellationToken,
) -> u8 {
    let mut code = run_once(session, targets).await;
    if code == 2 {
        return code;
    }
    info!(dirs = ?dirs, "watching for changes");

    let mut seen = snapshot(dirs);
    loop {
        tokio::select! {
            _ = tokio::time::sleep(POLL_INTERVAL) => {}
            _ = interrupt.cancelled() => break,
        }
        let current = snapshot(dirs);
        if current != seen {
            info!("change detected, rebuilding");
            code = run_once(session, targets).await;
            if code == 2 {
                return code;
            }
            // Snapshot after the run so freshly built outputs under a
            // watched directory do not retrigger it.
            seen = snapshot(dirs);
        } else {
            seen = current;
        }
    }
    code
}
