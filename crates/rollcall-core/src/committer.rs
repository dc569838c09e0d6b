//! Writes a stopped session's detected students to the ledger.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use crate::session::Session;
use crate::store::{IncrementOutcome, RosterStore};

/// A student whose attendance could not be written.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CommitFailure {
    pub student_id: String,
    pub error: String,
}

/// Result of committing one session.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CommitSummary {
    pub session_id: String,
    /// Students whose count was incremented by this commit.
    pub students_marked: usize,
    pub duration_minutes: f64,
    /// Students found already marked inside the suppression window at write
    /// time, typically by a concurrently stopped session.
    pub skipped: Vec<String>,
    /// Students whose write failed or timed out. A timed-out write is
    /// abandoned, not cancelled: the ledger may still apply it, so its
    /// outcome is unknown and the next read of the ledger is authoritative.
    pub failures: Vec<CommitFailure>,
}

/// Commit every detected student of a stopped session.
///
/// Students are written independently: a failed write is recorded and the
/// rest still commit. There is no cross-student transaction, so nothing is
/// rolled back.
pub async fn commit<S: RosterStore>(
    store: &S,
    session: &Session,
    now: DateTime<Utc>,
    suppression: Duration,
    timeout: std::time::Duration,
) -> CommitSummary {
    debug_assert!(!session.is_active(), "commit requires a stopped session");

    // Snapshot under the session lock. The session is already inactive, so
    // no frame can add to the set after this point.
    let detected: Vec<String> = session
        .lock_tracker()
        .await
        .detected()
        .iter()
        .cloned()
        .collect();

    let key = session.key();
    let mut summary = CommitSummary {
        session_id: key.id(),
        students_marked: 0,
        duration_minutes: session.duration_minutes(now),
        skipped: Vec::new(),
        failures: Vec::new(),
    };

    for student_id in detected {
        let write = store.increment_attendance(key, &student_id, now, suppression);
        let result = tokio::time::timeout(timeout, write).await;
        let error = match result {
            Ok(Ok(IncrementOutcome::Committed { count })) => {
                tracing::debug!(
                    session = %key.id(),
                    student = %student_id,
                    count,
                    "attendance committed"
                );
                summary.students_marked += 1;
                continue;
            }
            Ok(Ok(IncrementOutcome::AlreadyFresh { last_marked })) => {
                tracing::info!(
                    session = %key.id(),
                    student = %student_id,
                    %last_marked,
                    "already marked inside suppression window; skipped"
                );
                summary.skipped.push(student_id);
                continue;
            }
            Ok(Err(e)) => e.to_string(),
            Err(_) => format!(
                "ledger write timed out after {timeout:?}; outcome unknown, it may still apply"
            ),
        };

        tracing::warn!(
            session = %key.id(),
            student = %student_id,
            %error,
            "attendance commit failed"
        );
        summary.failures.push(CommitFailure { student_id, error });
    }

    tracing::info!(
        session = %key.id(),
        marked = summary.students_marked,
        skipped = summary.skipped.len(),
        failed = summary.failures.len(),
        duration_minutes = summary.duration_minutes,
        "session committed"
    );
    summary
}
