//! Fatal error taxonomy for the harness.
//!
//! Everything in here aborts the run. Per-test failures, protocol violations
//! and phase timeouts are not errors; they are recorded in the
//! [`RunReport`](crate::report::RunReport).

use std::path::PathBuf;

/// Errors that abort a harness run.
#[derive(Debug, thiserror::Error)]
pub enum HarnessError {
    #[error("cannot create log directory {path}: {source}")]
    LogDirectory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot open log file {path}: {source}")]
    LogOpen {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot write log file {path}: {source}")]
    LogWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot read log file {path}: {source}")]
    LogRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to start kernel {path}: {source}")]
    Launch {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("kernel i/o error: {0}")]
    KernelIo(#[from] std::io::Error),

    #[error("invalid run parameters: {0}")]
    InvalidSpec(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for harness operations.
pub type Result<T> = std::result::Result<T, HarnessError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_directory_error_names_path() {
        let err = HarnessError::LogDirectory {
            path: PathBuf::from("/nope/logs"),
            source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        };
        let msg = err.to_string();
        assert!(msg.contains("/nope/logs"));
        assert!(msg.contains("denied"));
    }

    #[test]
    fn test_launch_error_display() {
        let err = HarnessError::Launch {
            path: PathBuf::from("run_kernel.sh"),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "no such file"),
        };
        assert!(err.to_string().contains("failed to start kernel run_kernel.sh"));
    }

    #[test]
    fn test_io_error_converts() {
        let io = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe closed");
        let err: HarnessError = io.into();
        assert!(matches!(err, HarnessError::KernelIo(_)));
        assert!(err.to_string().contains("pipe closed"));
    }
}
