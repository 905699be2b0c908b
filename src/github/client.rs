use std::io::Write;
use std::process::{Command, Stdio};

use crate::review::HostError;

/// Execute a gh CLI command and return stdout.
/// Uses spawn_blocking to avoid blocking the tokio runtime.
pub(crate) async fn gh_command(args: Vec<String>) -> Result<String, HostError> {
    run_gh(args, None).await
}

/// Same as [`gh_command`] but pipes `input` to the process stdin.
/// Used with `gh api --input -` for JSON request bodies.
pub(crate) async fn gh_command_with_stdin(
    args: Vec<String>,
    input: String,
) -> Result<String, HostError> {
    run_gh(args, Some(input)).await
}

async fn run_gh(args: Vec<String>, input: Option<String>) -> Result<String, HostError> {
    tokio::task::spawn_blocking(move || {
        let mut command = Command::new("gh");
        command.args(&args);
        command.stdout(Stdio::piped());
        command.stderr(Stdio::piped());
        if input.is_some() {
            command.stdin(Stdio::piped());
        } else {
            command.stdin(Stdio::null());
        }

        let mut child = command.spawn().map_err(|e| {
            HostError::Unknown(format!("failed to execute gh CLI, is it installed? {}", e))
        })?;

        if let Some(body) = input {
            let mut stdin = child
                .stdin
                .take()
                .ok_or_else(|| HostError::Unknown("gh stdin unavailable".to_string()))?;
            stdin
                .write_all(body.as_bytes())
                .map_err(|e| HostError::Unknown(format!("failed to write gh stdin: {}", e)))?;
        }

        let output = child
            .wait_with_output()
            .map_err(|e| HostError::Unknown(format!("failed to wait for gh: {}", e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(classify_stderr(&stderr));
        }

        String::from_utf8(output.stdout)
            .map_err(|_| HostError::Unknown("gh output contains invalid UTF-8".to_string()))
    })
    .await
    .map_err(|e| HostError::Unknown(format!("gh task panicked: {}", e)))?
}

/// Map gh stderr onto the host error classes. Rate limiting is a 403
/// on this API, so it is checked before the plain-forbidden case.
pub(crate) fn classify_stderr(stderr: &str) -> HostError {
    let lower = stderr.to_lowercase();
    if lower.contains("http 401") || lower.contains("gh auth login") {
        return HostError::Auth;
    }
    if lower.contains("http 403") {
        if lower.contains("rate limit") {
            return HostError::RateLimited;
        }
        return HostError::Forbidden;
    }
    if lower.contains("http 404") {
        return HostError::NotFound;
    }
    HostError::Unknown(stderr.trim().to_string())
}
