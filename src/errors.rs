//! Error taxonomy shared by every `ObjectStore` backend.
//!
//! Backends translate their native failures (SQLite, disk, SDK error codes)
//! into `StoreError` so callers can branch on [`ErrorKind`] without knowing
//! which backend produced the error.

use crate::models::object::DeleteFailure;
use std::io;
use thiserror::Error;

/// Coarse classification of a [`StoreError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The bucket, object or version does not exist.
    NotFound,
    /// The caller lacks permission on the resource.
    AccessDenied,
    /// The request was malformed, too large, or named something invalid.
    InvalidRequest,
    /// The request conflicts with current state (name taken, bucket not empty).
    Conflict,
    /// Anything else: transport, local I/O, unexpected service errors.
    Other,
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("bucket `{0}` not found")]
    BucketNotFound(String),
    #[error("bucket `{0}` already exists")]
    BucketAlreadyExists(String),
    #[error("bucket `{0}` is not empty")]
    BucketNotEmpty(String),
    #[error("bucket `{name}` invalid: {reason}")]
    InvalidBucketName { name: String, reason: String },
    #[error("region `{0}` is not supported")]
    UnsupportedRegion(String),
    #[error("object `{key}` not found in bucket `{bucket}`")]
    ObjectNotFound { bucket: String, key: String },
    /// The service does not echo the version id back, so only the key is kept.
    #[error("requested version of `{key}` not found in bucket `{bucket}`")]
    VersionNotFound { bucket: String, key: String },
    #[error("invalid object key `{0}`")]
    InvalidObjectKey(String),
    #[error("access denied: {0}")]
    AccessDenied(String),
    #[error("batch delete of {count} keys exceeds the limit of {max}")]
    TooManyKeys { count: usize, max: usize },
    #[error("malformed request: {0}")]
    MalformedRequest(String),
    #[error("batch delete removed {deleted} entries but {} failed", .failures.len())]
    BatchDeleteFailed {
        deleted: usize,
        failures: Vec<DeleteFailure>,
    },
    #[error("service error {code}: {message}")]
    Service { code: String, message: String },
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

impl StoreError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            StoreError::BucketNotFound(_)
            | StoreError::ObjectNotFound { .. }
            | StoreError::VersionNotFound { .. } => ErrorKind::NotFound,
            StoreError::AccessDenied(_) => ErrorKind::AccessDenied,
            StoreError::InvalidBucketName { .. }
            | StoreError::UnsupportedRegion(_)
            | StoreError::InvalidObjectKey(_)
            | StoreError::TooManyKeys { .. }
            | StoreError::MalformedRequest(_) => ErrorKind::InvalidRequest,
            StoreError::BucketAlreadyExists(_) | StoreError::BucketNotEmpty(_) => {
                ErrorKind::Conflict
            }
            StoreError::BatchDeleteFailed { .. }
            | StoreError::Service { .. }
            | StoreError::Sqlx(_)
            | StoreError::Io(_) => ErrorKind::Other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_separate_missing_denied_and_malformed() {
        let missing = StoreError::ObjectNotFound {
            bucket: "b".into(),
            key: "k".into(),
        };
        assert_eq!(missing.kind(), ErrorKind::NotFound);

        assert_eq!(
            StoreError::AccessDenied("nope".into()).kind(),
            ErrorKind::AccessDenied
        );
        assert_eq!(
            StoreError::TooManyKeys {
                count: 1001,
                max: 1000
            }
            .kind(),
            ErrorKind::InvalidRequest
        );
        assert_eq!(
            StoreError::BucketNotEmpty("b".into()).kind(),
            ErrorKind::Conflict
        );
    }

    #[test]
    fn batch_failure_message_counts_failures() {
        let err = StoreError::BatchDeleteFailed {
            deleted: 3,
            failures: vec![DeleteFailure {
                key: "a".into(),
                version_id: None,
                code: "AccessDenied".into(),
                message: "legal hold".into(),
            }],
        };
        assert_eq!(
            err.to_string(),
            "batch delete removed 3 entries but 1 failed"
        );
    }
}
