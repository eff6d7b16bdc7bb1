//! External helper programs (image annotation, the plotter job).

use serde::Serialize;
use std::ffi::OsStr;
use std::process::Stdio;
use tokio::process::Command;

/// How an external program run ended.
#[derive(Debug, Clone, Serialize)]
pub struct CommandOutcome {
    pub command: String,
    pub success: bool,
    pub exit_code: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Runs `command`, split on whitespace, with `extra` appended to its arguments.
/// Never fails: spawn errors are reported in the outcome.
pub async fn run<I, S>(command: &str, extra: I) -> CommandOutcome
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let mut parts = command.split_whitespace();
    let Some(program) = parts.next() else {
        return CommandOutcome {
            command: command.to_string(),
            success: false,
            exit_code: None,
            error: Some("empty command".to_string()),
        };
    };

    let status = Command::new(program)
        .args(parts)
        .args(extra)
        .stdin(Stdio::null())
        .kill_on_drop(true)
        .status()
        .await;

    match status {
        Ok(status) => {
            if status.success() {
                tracing::info!(command, "Command finished");
            } else {
                tracing::warn!(command, status = %status, "Command failed");
            }
            CommandOutcome {
                command: command.to_string(),
                success: status.success(),
                exit_code: status.code(),
                error: None,
            }
        }
        Err(e) => {
            tracing::error!(command, error = %e, "Cannot run command");
            CommandOutcome {
                command: command.to_string(),
                success: false,
                exit_code: None,
                error: Some(e.to_string()),
            }
        }
    }
}
