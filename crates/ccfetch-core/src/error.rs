use thiserror::Error;

/// Canonical error type for planning, fetching and extraction.
///
/// Retry decisions are made from the variant alone, see [`CoreError::is_retryable`].
#[derive(Debug, Error)]
pub enum CoreError {
    /// Network-level failure that may succeed on another attempt
    /// (HTTP 429, 5xx, connection reset, timeout).
    #[error("transient network error on {archive_file} [{range}]: {message}")]
    TransientNetwork {
        /// Archive file being fetched.
        archive_file: String,
        /// Requested range, `full` for whole-object requests.
        range: String,
        /// HTTP status, when the failure came from a response.
        status: Option<u16>,
        /// Seconds the remote asked us to wait (`Retry-After`).
        retry_after_secs: Option<u64>,
        /// Human-readable details.
        message: String,
    },

    /// Fewer bytes arrived than the response promised.
    #[error("truncated transfer of {archive_file} [{range}]: expected {expected} bytes, received {received}")]
    Truncated {
        /// Archive file being fetched.
        archive_file: String,
        /// Requested range, `full` for whole-object requests.
        range: String,
        /// Bytes promised by the response or the plan.
        expected: u64,
        /// Bytes actually received.
        received: u64,
    },

    /// Archive file does not exist in the store (HTTP 404).
    #[error("{archive_file} [{range}] was not found")]
    NotFound {
        /// Archive file being fetched.
        archive_file: String,
        /// Requested range, `full` for whole-object requests.
        range: String,
    },

    /// Store refused the request permanently (403, malformed range, other 4xx).
    #[error("{archive_file} [{range}] was rejected with status {status}")]
    Rejected {
        /// Archive file being fetched.
        archive_file: String,
        /// Requested range, `full` for whole-object requests.
        range: String,
        /// HTTP status returned by the store.
        status: u16,
    },

    /// Transient failures persisted through every allowed attempt.
    #[error("{archive_file} [{range}] failed after {attempts} attempts: {last_error}")]
    RetriesExhausted {
        /// Archive file being fetched.
        archive_file: String,
        /// Requested range, `full` for whole-object requests.
        range: String,
        /// Number of attempts made.
        attempts: u32,
        /// Display form of the last transient error.
        last_error: String,
    },

    /// A container record could not be parsed. Recoverable per record.
    #[error("malformed container record: {0}")]
    MalformedContainer(String),

    /// Caller-initiated cancellation reached this operation.
    #[error("operation cancelled")]
    Cancelled,

    /// Validation error for input data.
    #[error("validation error: {0}")]
    ValidationError(String),

    /// Configuration could not be loaded or is inconsistent.
    #[error("configuration error: {0}")]
    ConfigError(String),

    /// I/O error occurred during file operations.
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

/// Coarse classification used by the pipeline summary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum FailureKind {
    /// Retry budget exhausted on transient failures.
    RetryableExhausted,
    /// Object missing.
    NotFound,
    /// Object access or request refused.
    Rejected,
    /// Run was cancelled while the plan was in flight.
    Cancelled,
    /// Anything else (I/O, validation).
    Other,
}

impl CoreError {
    /// Creates a `NotFound` variant.
    #[must_use]
    pub fn not_found(archive_file: impl Into<String>, range: impl Into<String>) -> Self {
        Self::NotFound {
            archive_file: archive_file.into(),
            range: range.into(),
        }
    }

    /// Creates a `Rejected` variant.
    #[must_use]
    pub fn rejected(archive_file: impl Into<String>, range: impl Into<String>, status: u16) -> Self {
        Self::Rejected {
            archive_file: archive_file.into(),
            range: range.into(),
            status,
        }
    }

    /// Creates a `TransientNetwork` variant without status information.
    #[must_use]
    pub fn transient(
        archive_file: impl Into<String>,
        range: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::TransientNetwork {
            archive_file: archive_file.into(),
            range: range.into(),
            status: None,
            retry_after_secs: None,
            message: message.into(),
        }
    }

    /// Maps an HTTP status to the matching variant.
    ///
    /// 404 is `NotFound`, 429 and 5xx are transient, any other non-success
    /// status is a permanent rejection.
    #[must_use]
    pub fn from_status(
        archive_file: impl Into<String>,
        range: impl Into<String>,
        status: u16,
        retry_after_secs: Option<u64>,
    ) -> Self {
        let archive_file = archive_file.into();
        let range = range.into();
        match status {
            404 => Self::NotFound {
                archive_file,
                range,
            },
            429 | 500..=599 => Self::TransientNetwork {
                archive_file,
                range,
                status: Some(status),
                retry_after_secs,
                message: format!("HTTP {status}"),
            },
            _ => Self::Rejected {
                archive_file,
                range,
                status,
            },
        }
    }

    /// Whether another attempt could succeed.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::TransientNetwork { .. } | Self::Truncated { .. })
    }

    /// HTTP status behind this error, when there was one.
    #[must_use]
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::TransientNetwork { status, .. } => *status,
            Self::Rejected { status, .. } => Some(*status),
            Self::NotFound { .. } => Some(404),
            _ => None,
        }
    }

    /// Whether the remote signalled overload (429 or 503).
    #[must_use]
    pub fn is_throttle(&self) -> bool {
        matches!(self.status(), Some(429) | Some(503))
    }

    /// Summary bucket for reports.
    #[must_use]
    pub fn kind(&self) -> FailureKind {
        match self {
            Self::RetriesExhausted { .. } | Self::TransientNetwork { .. } | Self::Truncated { .. } => {
                FailureKind::RetryableExhausted
            }
            Self::NotFound { .. } => FailureKind::NotFound,
            Self::Rejected { .. } => FailureKind::Rejected,
            Self::Cancelled => FailureKind::Cancelled,
            _ => FailureKind::Other,
        }
    }
}

impl From<config::ConfigError> for CoreError {
    fn from(err: config::ConfigError) -> Self {
        Self::ConfigError(err.to_string())
    }
}

impl From<csv::Error> for CoreError {
    fn from(err: csv::Error) -> Self {
        Self::ValidationError(format!("csv: {err}"))
    }
}

/// Convenient result alias for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_classification() {
        assert!(matches!(
            CoreError::from_status("a.gz", "0-9", 404, None),
            CoreError::NotFound { .. }
        ));
        assert!(matches!(
            CoreError::from_status("a.gz", "0-9", 403, None),
            CoreError::Rejected { status: 403, .. }
        ));
        assert!(matches!(
            CoreError::from_status("a.gz", "0-9", 416, None),
            CoreError::Rejected { status: 416, .. }
        ));
        assert!(CoreError::from_status("a.gz", "0-9", 429, Some(3)).is_retryable());
        assert!(CoreError::from_status("a.gz", "0-9", 503, None).is_retryable());
        assert!(!CoreError::from_status("a.gz", "0-9", 400, None).is_retryable());
    }

    #[test]
    fn test_truncated_is_retryable() {
        let err = CoreError::Truncated {
            archive_file: "a.gz".to_string(),
            range: "0-99".to_string(),
            expected: 100,
            received: 40,
        };
        assert!(err.is_retryable());
        assert_eq!(err.kind(), FailureKind::RetryableExhausted);
    }

    #[test]
    fn test_error_display_carries_tags() {
        let err = CoreError::not_found("crawl-data/x.warc.gz", "10-19");
        let msg = err.to_string();
        assert!(msg.contains("crawl-data/x.warc.gz"));
        assert!(msg.contains("10-19"));
        assert_eq!(err.kind(), FailureKind::NotFound);
    }

    #[test]
    fn test_throttle_detection() {
        assert!(CoreError::from_status("a", "full", 429, None).is_throttle());
        assert!(CoreError::from_status("a", "full", 503, None).is_throttle());
        assert!(!CoreError::from_status("a", "full", 500, None).is_throttle());
    }
}
