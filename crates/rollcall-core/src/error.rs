use std::time::Duration;
use thiserror::Error;

use crate::store::StoreError;

#[derive(Error, Debug)]
pub enum AttendanceError {
    #[error("no session found for {0}")]
    NotFound(String),
    #[error("no active session for {0}")]
    InvalidSession(String),
    #[error("external store unavailable: {0}")]
    ExternalStoreUnavailable(String),
    #[error("malformed record for student {student_id}: {reason}")]
    MalformedRecord { student_id: String, reason: String },
    #[error("{operation} timed out after {after:?}")]
    Timeout {
        operation: &'static str,
        after: Duration,
    },
    #[error("invalid frame: {0}")]
    InvalidFrame(String),
    #[error("face analyzer failed: {0}")]
    Analyzer(String),
}

impl From<StoreError> for AttendanceError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Unavailable(msg) => Self::ExternalStoreUnavailable(msg),
            StoreError::Malformed { student_id, reason } => {
                Self::MalformedRecord { student_id, reason }
            }
            StoreError::MissingRecord { student_id, course } => Self::MalformedRecord {
                student_id,
                reason: format!("no enrollment record for course {course}"),
            },
        }
    }
}
