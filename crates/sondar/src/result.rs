//! Result and error types for Sondar.

use thiserror::Error;

/// Result type for Sondar operations
pub type SondarResult<T> = Result<T, SondarError>;

/// Errors that can occur while driving a capture session
#[derive(Debug, Error)]
pub enum SondarError {
    /// Target process could not be started. Fatal; the session aborts.
    #[error("Failed to launch target process: {message}")]
    LaunchFailure {
        /// Error message
        message: String,
    },

    /// Debug symbols or named locals missing at a harness control point.
    /// Fatal for the session; there is no degraded mode.
    #[error("Harness metadata unavailable: {message}")]
    MetadataUnavailable {
        /// Error message
        message: String,
    },

    /// The target process died or the debug connection dropped.
    /// Expected terminal condition, handled as a graceful shutdown.
    #[error("Target process disconnected")]
    Disconnected,

    /// Unclassified debug-protocol failure while processing one event.
    /// Logged and skipped; the loop continues with the rest of the batch.
    #[error("Debug protocol error: {message}")]
    Protocol {
        /// Error message
        message: String,
    },

    /// Report sink failure. Logged only; never aborts the session.
    #[error("Report error: {message}")]
    Report {
        /// Error message
        message: String,
    },

    /// Operation called in the wrong state (e.g. reopening the report root)
    #[error("Invalid state: {message}")]
    InvalidState {
        /// Error message
        message: String,
    },

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl SondarError {
    /// Whether this error must abort the whole capture session.
    ///
    /// Everything else degrades to a best-effort partial report.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::LaunchFailure { .. } | Self::MetadataUnavailable { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn launch_failure_is_fatal() {
        let err = SondarError::LaunchFailure {
            message: "bad classpath".to_string(),
        };
        assert!(err.is_fatal());
    }

    #[test]
    fn metadata_unavailable_is_fatal() {
        let err = SondarError::MetadataUnavailable {
            message: "no line table".to_string(),
        };
        assert!(err.is_fatal());
    }

    #[test]
    fn disconnect_and_report_errors_are_not_fatal() {
        assert!(!SondarError::Disconnected.is_fatal());
        assert!(!SondarError::Report {
            message: "disk full".to_string()
        }
        .is_fatal());
        assert!(!SondarError::Protocol {
            message: "stale frame".to_string()
        }
        .is_fatal());
    }

    #[test]
    fn io_error_converts() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err: SondarError = io.into();
        assert!(matches!(err, SondarError::Io(_)));
        assert!(!err.is_fatal());
    }
}
