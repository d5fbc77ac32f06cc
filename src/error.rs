//! Error handling module for the installer
//!
//! Provides the error taxonomy shared by every component. The Step Engine's
//! restart policy keys off [`InstallError::is_restartable`]: everything except
//! a missing environment precondition or an operator cancellation goes
//! through a restart.

use std::time::Duration;
use thiserror::Error;

/// Maximum number of characters of command output shown in a failure report.
pub const DETAIL_LIMIT: usize = 400;

/// Main error type for the installer
#[derive(Error, Debug)]
pub enum InstallError {
    /// Bad user-supplied device, partition, credential or answer.
    /// Handled locally by re-prompting when a prompter is available.
    #[error("Validation error: {0}")]
    Validation(String),

    /// Non-zero exit from a blocking command (or a detached one that
    /// reported a non-zero status)
    #[error("{label} failed (exit code {code}): {}", truncate_detail(.stderr))]
    ExternalCommand {
        label: String,
        command: String,
        code: i32,
        stderr: String,
    },

    /// Await exceeded its budget; the session is left alive for inspection
    #[error("{label} still running after {}s (session '{session}' left alive for manual inspection)", .elapsed.as_secs())]
    DetachedTaskTimeout {
        label: String,
        session: String,
        elapsed: Duration,
    },

    /// Session ended but the sentinel file was missing or corrupt
    #[error("{label} finished but its exit status is unknown: {reason}")]
    DetachedTaskStatusUnknown { label: String, reason: String },

    /// A session with the well-known name is still alive from an earlier task
    #[error("Detached session '{session}' is still running; inspect it with `tmux attach -t {session}`")]
    DetachedTaskBusy { session: String },

    /// Required external tool absent, or not running as root. Fatal.
    #[error("Environment precondition failed: {0}")]
    EnvironmentPrecondition(String),

    /// Explicit operator cancellation
    #[error("Installation cancelled by operator")]
    Cancelled,

    /// Configuration errors (loading, parsing, validation)
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO errors (file operations, process spawning, terminal)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type alias for installer operations
pub type Result<T> = std::result::Result<T, InstallError>;

impl InstallError {
    /// Create a validation error
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Create an environment precondition error
    pub fn precondition(msg: impl Into<String>) -> Self {
        Self::EnvironmentPrecondition(msg.into())
    }

    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Whether the Step Engine should route this error through the restart
    /// policy. Restarting cannot fix a missing tool, and a cancellation is a
    /// request to stop.
    pub fn is_restartable(&self) -> bool {
        !matches!(self, Self::EnvironmentPrecondition(_) | Self::Cancelled)
    }

    /// Truncated, single-paragraph detail for failure reports.
    pub fn detail(&self) -> String {
        match self {
            Self::ExternalCommand { command, stderr, .. } => {
                format!("$ {}\n{}", command, truncate_detail(stderr))
            }
            other => truncate_detail(&other.to_string()),
        }
    }
}

/// Keep the tail of `text` (the end of command output is where the error
/// usually is), at most [`DETAIL_LIMIT`] characters.
pub fn truncate_detail(text: &str) -> String {
    let text = text.trim();
    let count = text.chars().count();
    if count <= DETAIL_LIMIT {
        return text.to_string();
    }
    let tail: String = text.chars().skip(count - DETAIL_LIMIT).collect();
    format!("…{}", tail)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = InstallError::validation("hostname too short");
        assert_eq!(err.to_string(), "Validation error: hostname too short");

        let err = InstallError::ExternalCommand {
            label: "Formatting root".to_string(),
            command: "mkfs.ext4 -F /dev/vda1".to_string(),
            code: 1,
            stderr: "device busy\n".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Formatting root failed (exit code 1): device busy"
        );
    }

    #[test]
    fn test_timeout_display_mentions_session() {
        let err = InstallError::DetachedTaskTimeout {
            label: "Installing base system".to_string(),
            session: "mainix-task".to_string(),
            elapsed: Duration::from_secs(90),
        };
        let msg = err.to_string();
        assert!(msg.contains("90s"));
        assert!(msg.contains("mainix-task"));
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: InstallError = io_err.into();
        assert!(matches!(err, InstallError::Io(_)));
    }

    #[test]
    fn test_restartable_classification() {
        assert!(!InstallError::precondition("tmux missing").is_restartable());
        assert!(!InstallError::Cancelled.is_restartable());
        assert!(InstallError::validation("bad disk").is_restartable());
        assert!(
            InstallError::DetachedTaskStatusUnknown {
                label: "x".into(),
                reason: "missing".into()
            }
            .is_restartable()
        );
    }

    #[test]
    fn test_truncate_detail_keeps_tail() {
        let long = format!("{}END", "x".repeat(1000));
        let detail = truncate_detail(&long);
        assert!(detail.starts_with('…'));
        assert!(detail.ends_with("END"));
        assert_eq!(detail.chars().count(), DETAIL_LIMIT + 1);

        assert_eq!(truncate_detail("  short  "), "short");
    }

    #[test]
    fn test_detail_includes_command() {
        let err = InstallError::ExternalCommand {
            label: "Bootstrap".into(),
            command: "pacstrap /mnt base".into(),
            code: 1,
            stderr: "error: failed to synchronize".into(),
        };
        let detail = err.detail();
        assert!(detail.starts_with("$ pacstrap /mnt base"));
        assert!(detail.contains("failed to synchronize"));
    }
}
