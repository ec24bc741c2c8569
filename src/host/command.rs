//! Subprocess execution for external tools.
//!
//! Every host collaborator shells out through [`run_command`], which waits for
//! the child to exit and captures both output streams.

use tokio::process::Command;
use tracing::debug;

use crate::error::{MailstackError, Result};

/// Result of a command execution.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandResult {
    /// Whether the command exited with status 0.
    pub success: bool,
    /// Command output (stdout).
    pub stdout: String,
    /// Command error output (stderr).
    pub stderr: String,
    /// Exit code if available.
    pub exit_code: Option<i32>,
}

impl CommandResult {
    /// Returns stderr if non-empty, otherwise stdout, trimmed.
    #[must_use]
    pub fn message(&self) -> String {
        let stderr = self.stderr.trim();
        let text = if stderr.is_empty() { self.stdout.trim() } else { stderr };
        match self.exit_code {
            Some(code) if text.is_empty() => format!("exit status {code}"),
            Some(code) => format!("exit status {code}: {text}"),
            None => format!("terminated by signal: {text}"),
        }
    }
}

/// Runs a program to completion and captures its output.
///
/// # Errors
///
/// Returns an error only if the program could not be spawned; a non-zero
/// exit is reported through [`CommandResult::success`].
pub async fn run_command(program: &str, args: &[&str]) -> Result<CommandResult> {
    debug!("Running: {} {}", program, args.join(" "));

    let output = Command::new(program)
        .args(args)
        .kill_on_drop(true)
        .output()
        .await
        .map_err(|e| MailstackError::command(program, format!("failed to execute: {e}")))?;

    Ok(CommandResult {
        success: output.status.success(),
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        exit_code: output.status.code(),
    })
}

/// Runs a program and fails if it exits unsuccessfully.
///
/// # Errors
///
/// Returns `MailstackError::Command` with the captured output on failure.
pub async fn run_checked(program: &str, args: &[&str]) -> Result<CommandResult> {
    let result = run_command(program, args).await?;
    if result.success {
        Ok(result)
    } else {
        Err(MailstackError::command(
            format!("{program} {}", args.join(" ")),
            result.message(),
        ))
    }
}

/// Returns true if `program` resolves to a file on `PATH`.
#[must_use]
pub fn program_exists(program: &str) -> bool {
    std::env::var_os("PATH").is_some_and(|paths| {
        std::env::split_paths(&paths).any(|dir| dir.join(program).is_file())
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_program_exists() {
        assert!(program_exists("sh"));
        assert!(!program_exists("mailstack-no-such-tool"));
    }

    #[tokio::test]
    async fn test_run_command_captures_output() {
        let result = run_command("sh", &["-c", "echo out; echo err >&2; exit 3"])
            .await
            .unwrap();
        assert!(!result.success);
        assert_eq!(result.exit_code, Some(3));
        assert_eq!(result.stdout.trim(), "out");
        assert_eq!(result.message(), "exit status 3: err");
    }

    #[tokio::test]
    async fn test_run_checked_fails_on_nonzero() {
        let err = run_checked("sh", &["-c", "exit 1"]).await.unwrap_err();
        assert!(matches!(err, MailstackError::Command { .. }));
    }

    #[tokio::test]
    async fn test_missing_program() {
        assert!(run_command("mailstack-no-such-tool", &[]).await.is_err());
    }
}
