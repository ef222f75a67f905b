//! Error types for warp-nextdns.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum WarpError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Permission denied: {0}")]
    Permission(String),

    #[error("Connection failed: {0}")]
    Connection(String),

    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("Command '{command}' failed: {message}")]
    CommandFailed { command: String, message: String },

    #[error("Unsupported platform: {0}")]
    UnsupportedPlatform(String),

    #[error("Backup error: {0}")]
    Backup(String),

    #[error("Security error: {0}")]
    Security(String),

    #[error("Parse error: {0}")]
    Parse(String),
}

impl WarpError {
    /// Build a `CommandFailed` from a command name and its stderr/stdout.
    pub fn command(command: &str, message: impl Into<String>) -> Self {
        let message = message.into();
        let message = if message.trim().is_empty() {
            "no output".to_string()
        } else {
            message.trim().to_string()
        };
        Self::CommandFailed {
            command: command.to_string(),
            message,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_error_trims_output() {
        let err = WarpError::command("wgcf", "  boom\n");
        assert_eq!(err.to_string(), "Command 'wgcf' failed: boom");
    }

    #[test]
    fn test_command_error_empty_output() {
        let err = WarpError::command("nextdns", "");
        assert_eq!(err.to_string(), "Command 'nextdns' failed: no output");
    }
}
