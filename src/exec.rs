//! Subprocess helper for handlers.

use mason_core::HandlerError;
use tokio::process::Command;
use tracing::debug;

/// Run a command, inheriting stdio. Nonzero exit is a handler failure.
/// The child is killed if the handler future is torn down.
pub async fn run_cmd<I, S>(argv: I) -> Result<(), HandlerError>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let args: Vec<String> = argv.into_iter().map(|s| s.as_ref().to_string()).collect();
    let Some((program, rest)) = args.split_first() else {
        return Err(HandlerError::from("run_cmd: empty argv"));
    };
    debug!(cmd = %args.join(" "), "run");
    let status = Command::new(program)
        .args(rest)
        .kill_on_drop(true)
        .status()
        .await
        .map_err(|e| HandlerError::from(format!("{program}: {e}")))?;
    if status.success() {
        Ok(())
    } else {
        Err(HandlerError::from(format!(
            "{program} exited with {status}"
        )))
    }
}

/// Run a command and capture stdout. Nonzero exit is a handler failure.
pub async fn run_cmd_captured<I, S>(argv: I) -> Result<String, HandlerError>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let args: Vec<String> = argv.into_iter().map(|s| s.as_ref().to_string()).collect();
    let Some((program, rest)) = args.split_first() else {
        return Err(HandlerError::from("run_cmd: empty argv"));
    };
    debug!(cmd = %args.join(" "), "run (captured)");
    let output = Command::new(program)
        .args(rest)
        .kill_on_drop(true)
        .output()
        .await
        .map_err(|e| HandlerError::from(format!("{program}: {e}")))?;
    if output.status.success() {
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    } else {
        let stderr = String::from_utf8_lossy(&output.stderr);
        Err(HandlerError::from(format!(
            "{program} exited with {}: {stderr}",
            output.status
        )))
    }
}
