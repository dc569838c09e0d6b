//! In-process roster and ledger.

use chrono::{DateTime, Duration, Utc};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use super::{CourseAttendance, EnrollmentRecord, IncrementOutcome, RosterStore, StoreError};
use crate::session::SessionKey;

type SectionKey = (String, String);

/// Ledger held entirely in memory, with the same conditional-increment
/// semantics as [`super::SqliteStore`].
///
/// Outages can be injected: failed or slow writes per student, and failed or
/// slow roster reads, which makes partial commit failures and timeouts
/// reproducible.
#[derive(Default)]
pub struct MemoryStore {
    sections: Mutex<BTreeMap<SectionKey, BTreeMap<String, EnrollmentRecord>>>,
    failing: Mutex<HashSet<String>>,
    slow_writes: Mutex<HashMap<String, std::time::Duration>>,
    reads_failing: AtomicBool,
    read_delay: Mutex<Option<std::time::Duration>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a student to the key's section, enrolled in the key's course with
    /// the given prior attendance.
    pub fn enroll(
        &self,
        key: &SessionKey,
        student_id: &str,
        name: &str,
        attendance: CourseAttendance,
    ) -> Result<(), StoreError> {
        let mut sections = self.sections()?;
        let record = sections
            .entry((key.major.clone(), key.section.clone()))
            .or_default()
            .entry(student_id.to_string())
            .or_insert_with(|| EnrollmentRecord {
                student_id: student_id.to_string(),
                name: name.to_string(),
                courses: BTreeMap::new(),
            });
        record.name = name.to_string();
        record.courses.insert(key.course.clone(), attendance);
        Ok(())
    }

    /// Current attendance for one student's course, if enrolled.
    pub fn attendance(&self, key: &SessionKey, student_id: &str) -> Option<CourseAttendance> {
        let sections = self.sections().ok()?;
        sections
            .get(&(key.major.clone(), key.section.clone()))?
            .get(student_id)?
            .course(&key.course)
            .cloned()
    }

    /// Make every subsequent write for `student_id` fail.
    pub fn fail_writes_for(&self, student_id: &str) {
        if let Ok(mut failing) = self.failing.lock() {
            failing.insert(student_id.to_string());
        }
    }

    /// Delay every subsequent write for `student_id` by `delay`.
    pub fn slow_writes_for(&self, student_id: &str, delay: std::time::Duration) {
        if let Ok(mut slow) = self.slow_writes.lock() {
            slow.insert(student_id.to_string(), delay);
        }
    }

    /// Make every subsequent roster read fail.
    pub fn fail_reads(&self) {
        self.reads_failing.store(true, Ordering::SeqCst);
    }

    /// Delay every subsequent roster read by `delay`.
    pub fn slow_reads(&self, delay: std::time::Duration) {
        if let Ok(mut slot) = self.read_delay.lock() {
            *slot = Some(delay);
        }
    }

    fn sections(
        &self,
    ) -> Result<
        std::sync::MutexGuard<'_, BTreeMap<SectionKey, BTreeMap<String, EnrollmentRecord>>>,
        StoreError,
    > {
        self.sections
            .lock()
            .map_err(|_| StoreError::Unavailable("memory ledger lock poisoned".into()))
    }
}

impl RosterStore for MemoryStore {
    async fn students(
        &self,
        major: &str,
        section: &str,
    ) -> Result<Vec<EnrollmentRecord>, StoreError> {
        let delay = self.read_delay.lock().ok().and_then(|d| *d);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.reads_failing.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("roster read rejected".into()));
        }

        let sections = self.sections()?;
        Ok(sections
            .get(&(major.to_string(), section.to_string()))
            .map(|students| students.values().cloned().collect())
            .unwrap_or_default())
    }

    async fn increment_attendance(
        &self,
        key: &SessionKey,
        student_id: &str,
        at: DateTime<Utc>,
        window: Duration,
    ) -> Result<IncrementOutcome, StoreError> {
        let delay = self
            .slow_writes
            .lock()
            .ok()
            .and_then(|slow| slow.get(student_id).copied());
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let failing = self
            .failing
            .lock()
            .map(|f| f.contains(student_id))
            .unwrap_or(false);
        if failing {
            return Err(StoreError::Unavailable(format!(
                "write rejected for student {student_id}"
            )));
        }

        let mut sections = self.sections()?;
        let course = sections
            .get_mut(&(key.major.clone(), key.section.clone()))
            .and_then(|students| students.get_mut(student_id))
            .and_then(|record| record.courses.get_mut(&key.course))
            .ok_or_else(|| StoreError::MissingRecord {
                student_id: student_id.to_string(),
                course: key.course.clone(),
            })?;

        if let Some(t) = course.last_marked {
            if at - t < window {
                return Ok(IncrementOutcome::AlreadyFresh { last_marked: t });
            }
        }
        course.count += 1;
        course.last_marked = Some(at);
        Ok(IncrementOutcome::Committed {
            count: course.count,
        })
    }
}
