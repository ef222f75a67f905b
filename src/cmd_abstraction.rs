//! Command execution abstraction for testability.
//!
//! Every external tool this crate drives (`wgcf`, `nextdns`, `systemctl`,
//! `ping`, package managers) goes through [`CommandExecutor`], so the
//! managers can be unit tested with a mocked executor.

use anyhow::{Context, Result};
use std::io::Write;
use std::process::{Command, Stdio};

#[cfg(test)]
use mockall::automock;

use crate::error::WarpError;

/// Output from command execution
#[derive(Debug, Clone, Default)]
pub struct CommandOutput {
    /// Standard output from the command
    pub stdout: String,
    /// Standard error from the command
    pub stderr: String,
    /// Whether the command succeeded (exit code 0)
    pub success: bool,
    /// The exit code, if available
    pub code: Option<i32>,
}

impl CommandOutput {
    /// Convert a failed run into a [`WarpError::CommandFailed`].
    pub fn into_result(self, cmd: &str) -> Result<CommandOutput> {
        if self.success {
            Ok(self)
        } else {
            let message = if self.stderr.trim().is_empty() {
                self.stdout.clone()
            } else {
                self.stderr.clone()
            };
            Err(WarpError::command(cmd, message).into())
        }
    }
}

/// Trait for command execution, allowing dependency injection for testing.
#[cfg_attr(test, automock)]
pub trait CommandExecutor: Send + Sync {
    /// Execute a command with the given arguments.
    fn execute(&self, cmd: &str, args: &[String]) -> Result<CommandOutput>;

    /// Execute a command, writing `stdin` to its standard input.
    fn execute_with_stdin(&self, cmd: &str, args: &[String], stdin: &str) -> Result<CommandOutput>;
}

/// Real implementation of CommandExecutor that runs actual system commands.
#[derive(Debug, Clone, Default)]
pub struct RealCommandExecutor;

impl RealCommandExecutor {
    pub fn new() -> Self {
        Self
    }
}

impl CommandExecutor for RealCommandExecutor {
    fn execute(&self, cmd: &str, args: &[String]) -> Result<CommandOutput> {
        let output = Command::new(cmd)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .with_context(|| format!("Failed to run {}", cmd))?;

        Ok(CommandOutput {
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            success: output.status.success(),
            code: output.status.code(),
        })
    }

    fn execute_with_stdin(
        &self,
        cmd: &str,
        args: &[String],
        stdin_data: &str,
    ) -> Result<CommandOutput> {
        let mut child = Command::new(cmd)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .with_context(|| format!("Failed to spawn {}", cmd))?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(stdin_data.as_bytes())?;
        }

        let output = child.wait_with_output()?;

        Ok(CommandOutput {
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            success: output.status.success(),
            code: output.status.code(),
        })
    }
}

/// Convert a slice of `&str` to `Vec<String>`.
///
/// mockall has trouble with lifetimes in `&[&str]`, so the trait takes
/// `&[String]` instead.
pub fn args_to_strings(args: &[&str]) -> Vec<String> {
    args.iter().map(|s| s.to_string()).collect()
}

/// Shorthand for successful mock output in tests across the crate.
#[cfg(test)]
pub fn ok_output(stdout: &str) -> CommandOutput {
    CommandOutput {
        stdout: stdout.to_string(),
        stderr: String::new(),
        success: true,
        code: Some(0),
    }
}

/// Shorthand for failed mock output in tests across the crate.
#[cfg(test)]
pub fn failed_output(stderr: &str, code: i32) -> CommandOutput {
    CommandOutput {
        stdout: String::new(),
        stderr: stderr.to_string(),
        success: false,
        code: Some(code),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_args_to_strings() {
        let args = args_to_strings(&["register", "--accept-tos"]);
        assert_eq!(args, vec!["register", "--accept-tos"]);
        assert!(args_to_strings(&[]).is_empty());
    }

    #[test]
    fn test_command_output_default() {
        let output = CommandOutput::default();
        assert!(output.stdout.is_empty());
        assert!(!output.success);
        assert!(output.code.is_none());
    }

    #[test]
    fn test_into_result_prefers_stderr() {
        let err = failed_output("permission denied", 1)
            .into_result("systemctl")
            .unwrap_err();
        assert!(err.to_string().contains("systemctl"));
        assert!(err.to_string().contains("permission denied"));
    }

    #[test]
    fn test_into_result_falls_back_to_stdout() {
        let out = CommandOutput {
            stdout: "bad profile".to_string(),
            success: false,
            ..Default::default()
        };
        let err = out.into_result("nextdns").unwrap_err();
        assert!(err.to_string().contains("bad profile"));
    }

    #[cfg(unix)]
    #[test]
    fn test_real_command_executor_execute_echo() {
        let executor = RealCommandExecutor::new();
        let output = executor
            .execute("echo", &args_to_strings(&["-n", "hello"]))
            .unwrap();
        assert!(output.success);
        assert_eq!(output.stdout, "hello");
    }

    #[cfg(unix)]
    #[test]
    fn test_real_command_executor_execute_with_stdin() {
        let executor = RealCommandExecutor::new();
        let output = executor
            .execute_with_stdin("cat", &[], "hello world")
            .unwrap();
        assert!(output.success);
        assert_eq!(output.stdout, "hello world");
    }

    #[test]
    fn test_real_command_executor_missing_binary() {
        let executor = RealCommandExecutor::new();
        let result = executor.execute("definitely-not-a-real-binary-xyz", &[]);
        assert!(result.is_err());
    }

    #[test]
    fn test_mock_command_executor() {
        let mut mock = MockCommandExecutor::new();
        mock.expect_execute()
            .withf(|cmd, args| cmd == "wgcf" && args == ["generate".to_string()])
            .times(1)
            .returning(|_, _| Ok(ok_output("ok")));

        let output = mock.execute("wgcf", &args_to_strings(&["generate"])).unwrap();
        assert_eq!(output.stdout, "ok");
    }
}
