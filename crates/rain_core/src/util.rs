//! Small helpers shared across sections: human formatting and bounded
//! subprocess execution.

use std::time::Duration;

use tokio::process::Command;
use tracing::debug;

use crate::error::RainError;

/// Captured output of a finished subprocess.
#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub status_ok: bool,
    pub stdout: String,
    pub stderr: String,
}

/// Run an external command with a hard deadline.
///
/// A missing binary maps to `DependencyMissing`, an expired deadline to
/// `Timeout`. A non-zero exit status is not an error here; callers that only
/// care about stdout should use [`command_stdout`].
pub async fn run_command(
    program: &str,
    args: &[&str],
    timeout: Duration,
) -> Result<CommandOutput, RainError> {
    let future = Command::new(program).args(args).kill_on_drop(true).output();
    let output = match tokio::time::timeout(timeout, future).await {
        Ok(Ok(output)) => output,
        Ok(Err(err)) if err.kind() == std::io::ErrorKind::NotFound => {
            return Err(RainError::DependencyMissing(format!(
                "{program} is not installed"
            )));
        }
        Ok(Err(err)) if err.kind() == std::io::ErrorKind::PermissionDenied => {
            return Err(RainError::PermissionDenied(format!(
                "cannot execute {program}: {err}"
            )));
        }
        Ok(Err(err)) => {
            return Err(RainError::Unavailable(format!(
                "failed to run {program}: {err}"
            )));
        }
        Err(_) => {
            return Err(RainError::Timeout(format!(
                "{program} did not finish within {}s",
                timeout.as_secs()
            )));
        }
    };

    debug!(program, status = %output.status, "command finished");
    Ok(CommandOutput {
        status_ok: output.status.success(),
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
    })
}

/// Run a command and return its stdout, treating a non-zero exit as failure.
pub async fn command_stdout(
    program: &str,
    args: &[&str],
    timeout: Duration,
) -> Result<String, RainError> {
    let output = run_command(program, args, timeout).await?;
    if !output.status_ok {
        let detail = output.stderr.trim();
        return Err(RainError::Unavailable(if detail.is_empty() {
            format!("{program} exited with an error")
        } else {
            format!("{program}: {detail}")
        }));
    }
    Ok(output.stdout)
}

/// Read a whole file, classifying permission problems separately.
pub fn read_file(path: &str) -> Result<String, RainError> {
    std::fs::read_to_string(path).map_err(|err| RainError::from_read(path, &err))
}

/// Render a byte count with binary units, one decimal above bytes.
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 6] = ["B", "KB", "MB", "GB", "TB", "PB"];
    let mut size = bytes as f64;
    let mut unit = 0;
    while size >= 1024.0 && unit < UNITS.len() - 1 {
        size /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes} B")
    } else {
        format!("{size:.1} {}", UNITS[unit])
    }
}

/// Render an uptime in seconds as days/hours/minutes.
pub fn format_uptime(secs: u64) -> String {
    let days = secs / 86_400;
    let hours = (secs % 86_400) / 3_600;
    let minutes = (secs % 3_600) / 60;
    if days > 0 {
        format!("{days}d {hours}h {minutes}m")
    } else if hours > 0 {
        format!("{hours}h {minutes}m")
    } else {
        format!("{minutes}m")
    }
}

/// Round to one decimal place for percentages and temperatures.
pub fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}
