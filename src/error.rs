use std::error::Error;
use std::io;
use std::time::Duration;

pub type BoxError = Box<dyn Error + Send + Sync>;

pub type Result<T> = std::result::Result<T, TransferError>;

#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("part task did not complete: {0}")]
    Join(#[from] tokio::task::JoinError),

    #[error("transient failure: {0}")]
    Transient(String),

    /// Retrying the current session as-is is pointless.
    #[error("not retryable: {0}")]
    NotRetryable(#[source] BoxError),

    #[error("not resumable: {0}")]
    NotResumable(#[source] BoxError),

    #[error("no upload in progress for object {object_id}")]
    NoSuchUpload { object_id: String },

    #[error("{failed} of {total} parts failed to download")]
    DownloadFailed {
        failed: usize,
        total: usize,
        #[source]
        source: Box<TransferError>,
    },

    #[error("transfer exceeded maximum duration of {0:?}")]
    TimedOut(Duration),

    #[error("gave up after {attempts} attempts")]
    RetriesExhausted {
        attempts: usize,
        #[source]
        source: Box<TransferError>,
    },

    #[error("{0} is not supported by this transport")]
    Unsupported(&'static str),

    #[error("invalid part plan: {0}")]
    InvalidPartPlan(String),
}

impl TransferError {
    pub fn not_retryable(cause: impl Into<BoxError>) -> Self {
        TransferError::NotRetryable(cause.into())
    }

    pub fn not_resumable(cause: impl Into<BoxError>) -> Self {
        TransferError::NotResumable(cause.into())
    }

    pub fn is_not_retryable(&self) -> bool {
        matches!(
            self,
            TransferError::NotRetryable(_) | TransferError::DownloadFailed { .. }
        )
    }

    pub fn is_not_resumable(&self) -> bool {
        matches!(self, TransferError::NotResumable(_))
    }

    pub fn is_no_such_upload(&self) -> bool {
        matches!(self, TransferError::NoSuchUpload { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::TransferError;
    use std::error::Error;

    #[test]
    fn test_classification() {
        let e = TransferError::not_retryable("corrupted part");
        assert!(e.is_not_retryable());
        assert!(!e.is_not_resumable());
        assert_eq!(e.to_string(), "not retryable: corrupted part");

        let e = TransferError::DownloadFailed {
            failed: 1,
            total: 4,
            source: Box::new(TransferError::Transient("reset".to_owned())),
        };
        assert!(e.is_not_retryable());
        assert_eq!(e.source().unwrap().to_string(), "transient failure: reset");

        assert!(TransferError::not_resumable("bad grant").is_not_resumable());
        assert!(TransferError::NoSuchUpload {
            object_id: "obj1".to_owned()
        }
        .is_no_such_upload());
        assert!(!TransferError::Transient("x".to_owned()).is_not_retryable());
    }
}
