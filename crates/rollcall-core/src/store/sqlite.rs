//! SQLite-backed roster and ledger via `tokio-rusqlite`.

use chrono::{DateTime, Duration, SecondsFormat, Utc};
use rusqlite::{params, OptionalExtension, TransactionBehavior};
use std::collections::BTreeMap;
use std::path::Path;

use super::{
    parse_timestamp, CourseAttendance, EnrollmentRecord, IncrementOutcome, RosterStore, StoreError,
};
use crate::session::SessionKey;

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS students (
        major       TEXT NOT NULL,
        section     TEXT NOT NULL,
        student_id  TEXT NOT NULL,
        name        TEXT NOT NULL,
        PRIMARY KEY (major, section, student_id)
    );
    CREATE TABLE IF NOT EXISTS enrollments (
        major       TEXT NOT NULL,
        section     TEXT NOT NULL,
        student_id  TEXT NOT NULL,
        course      TEXT NOT NULL,
        count       INTEGER NOT NULL DEFAULT 0,
        last_marked TEXT,
        PRIMARY KEY (major, section, student_id, course),
        FOREIGN KEY (major, section, student_id)
            REFERENCES students (major, section, student_id) ON DELETE CASCADE
    );
";

/// One joined row: student id, name, and an optional enrollment.
type StudentRow = (String, String, Option<String>, Option<i64>, Option<String>);

/// Roster and ledger persisted in a single SQLite database.
///
/// All statements run on the connection's dedicated thread, so writes are
/// serialized within the process; `BEGIN IMMEDIATE` extends that to other
/// processes sharing the file.
pub struct SqliteStore {
    conn: tokio_rusqlite::Connection,
}

impl SqliteStore {
    /// Open (creating if needed) the ledger database at `path`.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                StoreError::Unavailable(format!("create {}: {e}", parent.display()))
            })?;
        }
        let conn = tokio_rusqlite::Connection::open(&path).await?;
        tracing::info!(path = %path.display(), "ledger database opened");
        Self::init(conn).await
    }

    /// Open a private in-memory ledger.
    pub async fn open_in_memory() -> Result<Self, StoreError> {
        let conn = tokio_rusqlite::Connection::open_in_memory().await?;
        Self::init(conn).await
    }

    async fn init(conn: tokio_rusqlite::Connection) -> Result<Self, StoreError> {
        conn.call(|conn| {
            conn.execute_batch("PRAGMA foreign_keys = ON;")?;
            conn.execute_batch(SCHEMA)?;
            Ok(())
        })
        .await?;
        Ok(Self { conn })
    }

    /// Run a raw statement against the ledger.
    #[cfg(test)]
    pub(crate) async fn execute_raw(&self, sql: &'static str) {
        self.conn
            .call(move |conn| Ok(conn.execute_batch(sql)?))
            .await
            .unwrap();
    }

    /// Register a student (or rename an existing one) and enroll them in the
    /// key's course. Existing attendance for the course is preserved.
    pub async fn enroll(
        &self,
        key: &SessionKey,
        student_id: &str,
        name: &str,
    ) -> Result<(), StoreError> {
        let key = key.clone();
        let student_id = student_id.to_string();
        let name = name.to_string();
        self.conn
            .call(move |conn| {
                let tx = conn.transaction()?;
                tx.execute(
                    "INSERT INTO students (major, section, student_id, name)
                     VALUES (?1, ?2, ?3, ?4)
                     ON CONFLICT (major, section, student_id) DO UPDATE SET name = excluded.name",
                    params![key.major, key.section, student_id, name],
                )?;
                tx.execute(
                    "INSERT OR IGNORE INTO enrollments (major, section, student_id, course)
                     VALUES (?1, ?2, ?3, ?4)",
                    params![key.major, key.section, student_id, key.course],
                )?;
                tx.commit()?;
                Ok(())
            })
            .await?;
        Ok(())
    }
}

/// Typed attendance for one enrollment row.
fn parse_attendance(
    student_id: &str,
    count: Option<i64>,
    last_marked: Option<&str>,
) -> Result<CourseAttendance, StoreError> {
    let count = count.unwrap_or(0);
    let count = u32::try_from(count).map_err(|_| StoreError::Malformed {
        student_id: student_id.to_string(),
        reason: format!("attendance count {count} out of range"),
    })?;
    let last_marked = last_marked
        .map(|raw| parse_timestamp(student_id, raw))
        .transpose()?;
    Ok(CourseAttendance { count, last_marked })
}

impl RosterStore for SqliteStore {
    async fn students(
        &self,
        major: &str,
        section: &str,
    ) -> Result<Vec<EnrollmentRecord>, StoreError> {
        let (owned_major, owned_section) = (major.to_string(), section.to_string());
        let rows: Vec<StudentRow> = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT s.student_id, s.name, e.course, e.count, e.last_marked
                     FROM students s
                     LEFT JOIN enrollments e
                       ON e.major = s.major AND e.section = s.section AND e.student_id = s.student_id
                     WHERE s.major = ?1 AND s.section = ?2
                     ORDER BY s.student_id, e.course",
                )?;
                let rows = stmt
                    .query_map(params![owned_major, owned_section], |r| {
                        Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?, r.get(4)?))
                    })?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(rows)
            })
            .await?;

        let mut records: BTreeMap<String, EnrollmentRecord> = BTreeMap::new();
        for (student_id, name, course, count, last_marked) in rows {
            let record = records
                .entry(student_id.clone())
                .or_insert_with(|| EnrollmentRecord {
                    student_id: student_id.clone(),
                    name,
                    courses: BTreeMap::new(),
                });
            let Some(course) = course else {
                continue;
            };
            match parse_attendance(&student_id, count, last_marked.as_deref()) {
                Ok(attendance) => {
                    record.courses.insert(course, attendance);
                }
                Err(e) => {
                    // The course is left out so the rest of the section stays readable.
                    tracing::warn!(
                        major,
                        section,
                        student = %student_id,
                        course = %course,
                        error = %e,
                        "skipping malformed enrollment"
                    );
                }
            }
        }

        Ok(records.into_values().collect())
    }

    async fn increment_attendance(
        &self,
        key: &SessionKey,
        student_id: &str,
        at: DateTime<Utc>,
        window: Duration,
    ) -> Result<IncrementOutcome, StoreError> {
        let key = key.clone();
        let student_id = student_id.to_string();
        self.conn
            .call(move |conn| {
                let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
                let row: Option<(i64, Option<String>)> = tx
                    .query_row(
                        "SELECT count, last_marked FROM enrollments
                         WHERE major = ?1 AND section = ?2 AND student_id = ?3 AND course = ?4",
                        params![key.major, key.section, student_id, key.course],
                        |r| Ok((r.get(0)?, r.get(1)?)),
                    )
                    .optional()?;

                let Some((count, last_marked)) = row else {
                    return Ok(Err(StoreError::MissingRecord {
                        student_id,
                        course: key.course,
                    }));
                };

                if let Some(raw) = last_marked.as_deref() {
                    match parse_timestamp(&student_id, raw) {
                        Ok(t) if at - t < window => {
                            return Ok(Ok(IncrementOutcome::AlreadyFresh { last_marked: t }));
                        }
                        Ok(_) => {}
                        Err(e) => return Ok(Err(e)),
                    }
                }

                let Ok(count) = u32::try_from(count + 1) else {
                    return Ok(Err(StoreError::Malformed {
                        student_id,
                        reason: format!("attendance count {count} out of range"),
                    }));
                };
                tx.execute(
                    "UPDATE enrollments SET count = ?1, last_marked = ?2
                     WHERE major = ?3 AND section = ?4 AND student_id = ?5 AND course = ?6",
                    params![
                        count,
                        at.to_rfc3339_opts(SecondsFormat::Micros, true),
                        key.major,
                        key.section,
                        student_id,
                        key.course
                    ],
                )?;
                tx.commit()?;
                Ok(Ok(IncrementOutcome::Committed { count }))
            })
            .await?
    }
}
