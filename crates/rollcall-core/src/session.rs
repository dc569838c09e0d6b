//! Attendance session identity and per-session state.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::{Mutex, MutexGuard};

use crate::tracker::DetectionTracker;

/// One class meeting: a (major, section, course) triple.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionKey {
    pub major: String,
    pub section: String,
    pub course: String,
}

impl SessionKey {
    pub fn new(
        major: impl Into<String>,
        section: impl Into<String>,
        course: impl Into<String>,
    ) -> Self {
        Self {
            major: major.into(),
            section: section.into(),
            course: course.into(),
        }
    }

    /// Deterministic session identifier, `major_section_course`.
    pub fn id(&self) -> String {
        format!("{}_{}_{}", self.major, self.section, self.course)
    }
}

impl fmt::Display for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.major, self.section, self.course)
    }
}

/// Live state for one attendance session.
///
/// The `active` flag is read without the tracker lock so that frames for a
/// stopped session fail fast. Tracker state is only reachable through
/// [`Session::lock_tracker`], which serializes frames for this session
/// without touching any other session.
pub struct Session {
    key: SessionKey,
    started_at: DateTime<Utc>,
    active: AtomicBool,
    tracker: Mutex<DetectionTracker>,
}

impl Session {
    pub(crate) fn new(key: SessionKey, started_at: DateTime<Utc>, cooldown: Duration) -> Self {
        Self {
            key,
            started_at,
            active: AtomicBool::new(true),
            tracker: Mutex::new(DetectionTracker::new(cooldown)),
        }
    }

    pub fn key(&self) -> &SessionKey {
        &self.key
    }

    pub fn id(&self) -> String {
        self.key.id()
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    pub(crate) fn deactivate(&self) {
        self.active.store(false, Ordering::Release);
    }

    pub async fn lock_tracker(&self) -> MutexGuard<'_, DetectionTracker> {
        self.tracker.lock().await
    }

    /// Minutes elapsed between session start and `now`.
    pub fn duration_minutes(&self, now: DateTime<Utc>) -> f64 {
        (now - self.started_at).num_milliseconds() as f64 / 60_000.0
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("key", &self.key)
            .field("started_at", &self.started_at)
            .field("active", &self.is_active())
            .finish_non_exhaustive()
    }
}
