//! Student roster and attendance ledger.
//!
//! The ledger is an external collaborator. [`RosterStore`] is the typed
//! boundary the engine consumes; [`SqliteStore`] and [`MemoryStore`] are the
//! two backends shipped with the crate.

mod memory;
mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use chrono::{DateTime, Duration, NaiveDateTime, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::future::Future;
use thiserror::Error;

use crate::session::SessionKey;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum StoreError {
    #[error("ledger unavailable: {0}")]
    Unavailable(String),
    #[error("malformed record for student {student_id}: {reason}")]
    Malformed { student_id: String, reason: String },
    #[error("student {student_id} has no enrollment record for course {course}")]
    MissingRecord { student_id: String, course: String },
}

impl From<tokio_rusqlite::Error> for StoreError {
    fn from(err: tokio_rusqlite::Error) -> Self {
        StoreError::Unavailable(err.to_string())
    }
}

/// Attendance state for one student in one course.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CourseAttendance {
    pub count: u32,
    pub last_marked: Option<DateTime<Utc>>,
}

/// A student as stored in the roster, with per-course attendance.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EnrollmentRecord {
    pub student_id: String,
    pub name: String,
    pub courses: BTreeMap<String, CourseAttendance>,
}

impl EnrollmentRecord {
    pub fn course(&self, course: &str) -> Option<&CourseAttendance> {
        self.courses.get(course)
    }

    /// Whether attendance for `course` was marked less than `window` before `now`.
    pub fn marked_within(&self, course: &str, now: DateTime<Utc>, window: Duration) -> bool {
        self.course(course)
            .and_then(|c| c.last_marked)
            .is_some_and(|t| now - t < window)
    }
}

/// Result of a conditional attendance increment.
#[derive(Debug, Clone, PartialEq)]
pub enum IncrementOutcome {
    /// Count incremented; holds the new count.
    Committed { count: u32 },
    /// Already marked inside the suppression window; nothing written.
    AlreadyFresh { last_marked: DateTime<Utc> },
}

/// Roster and ledger access for one deployment.
pub trait RosterStore: Send + Sync {
    /// Every student in a (major, section), with all of their courses.
    fn students(
        &self,
        major: &str,
        section: &str,
    ) -> impl Future<Output = Result<Vec<EnrollmentRecord>, StoreError>> + Send;

    /// Increment `count` and set `last_marked = at` for one student's course,
    /// unless `last_marked` already falls within `window` of `at`.
    ///
    /// The check and the write must be atomic with respect to other
    /// increments of the same (student, course).
    fn increment_attendance(
        &self,
        key: &SessionKey,
        student_id: &str,
        at: DateTime<Utc>,
        window: Duration,
    ) -> impl Future<Output = Result<IncrementOutcome, StoreError>> + Send;

    /// Students of the key's (major, section) enrolled in the key's course.
    fn enrolled(
        &self,
        key: &SessionKey,
    ) -> impl Future<Output = Result<HashMap<String, EnrollmentRecord>, StoreError>> + Send {
        async move {
            let students = self.students(&key.major, &key.section).await?;
            Ok(students
                .into_iter()
                .filter(|s| s.courses.contains_key(&key.course))
                .map(|s| (s.student_id.clone(), s))
                .collect())
        }
    }

    /// Every course any student of a (major, section) is enrolled in, sorted.
    fn courses(
        &self,
        major: &str,
        section: &str,
    ) -> impl Future<Output = Result<Vec<String>, StoreError>> + Send {
        async move {
            let students = self.students(major, section).await?;
            let courses: BTreeSet<String> = students
                .into_iter()
                .flat_map(|s| s.courses.into_keys())
                .collect();
            Ok(courses.into_iter().collect())
        }
    }
}

/// Parse a ledger timestamp.
///
/// Accepts RFC 3339 and, for records written by older tooling, a naive
/// ISO 8601 datetime which is taken to be UTC.
pub(crate) fn parse_timestamp(student_id: &str, raw: &str) -> Result<DateTime<Utc>, StoreError> {
    if let Ok(t) = DateTime::parse_from_rfc3339(raw) {
        return Ok(t.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
        .map(|t| t.and_utc())
        .map_err(|e| StoreError::Malformed {
            student_id: student_id.to_string(),
            reason: format!("bad last_marked timestamp {raw:?}: {e}"),
        })
}
