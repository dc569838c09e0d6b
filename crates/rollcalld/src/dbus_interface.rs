use rollcall_core::{AttendanceError, AttendanceService, SessionKey, SqliteStore};
use rollcall_vision::EngineHandle;
use serde::Serialize;
use std::sync::Arc;
use zbus::interface;

pub type Service = AttendanceService<SqliteStore, EngineHandle>;

/// D-Bus interface for the Rollcall attendance daemon.
///
/// Bus name: org.rollcall.Attendance1
/// Object path: /org/rollcall/Attendance1
pub struct AttendanceBus {
    service: Arc<Service>,
}

impl AttendanceBus {
    pub fn new(service: Arc<Service>) -> Self {
        Self { service }
    }
}

#[interface(name = "org.rollcall.Attendance1")]
impl AttendanceBus {
    /// Start (or restart) the session for a class. Returns its id.
    async fn start_session(
        &self,
        major: &str,
        section: &str,
        course: &str,
    ) -> zbus::fdo::Result<String> {
        let key = SessionKey::new(major, section, course);
        tracing::info!(session = %key, "start requested");
        let session_id = self.service.start_session(key).await;
        to_json(&serde_json::json!({ "session_id": session_id }))
    }

    /// Stop the session and commit its attendance. Returns the commit summary.
    async fn stop_session(
        &self,
        major: &str,
        section: &str,
        course: &str,
    ) -> zbus::fdo::Result<String> {
        let key = SessionKey::new(major, section, course);
        tracing::info!(session = %key, "stop requested");
        let summary = self.service.stop_session(&key).await.map_err(to_fdo)?;
        to_json(&summary)
    }

    /// Run one encoded frame (JPEG, PNG, ...) through the session.
    async fn submit_frame(
        &self,
        major: &str,
        section: &str,
        course: &str,
        frame: Vec<u8>,
    ) -> zbus::fdo::Result<String> {
        let key = SessionKey::new(major, section, course);
        let report = self
            .service
            .submit_frame(&key, &frame)
            .await
            .map_err(to_fdo)?;
        to_json(&report)
    }

    /// Students already marked for this course inside the suppression window.
    async fn recently_marked(
        &self,
        major: &str,
        section: &str,
        course: &str,
    ) -> zbus::fdo::Result<String> {
        let key = SessionKey::new(major, section, course);
        let marks = self.service.recently_marked(&key).await.map_err(to_fdo)?;
        to_json(&marks)
    }

    /// Courses offered to a (major, section).
    async fn list_courses(&self, major: &str, section: &str) -> zbus::fdo::Result<String> {
        let courses = self
            .service
            .list_courses(major, section)
            .await
            .map_err(to_fdo)?;
        to_json(&courses)
    }

    /// Attendance counts for every student enrolled in the course.
    async fn attendance_report(
        &self,
        major: &str,
        section: &str,
        course: &str,
    ) -> zbus::fdo::Result<String> {
        let key = SessionKey::new(major, section, course);
        let rows = self.service.attendance_report(&key).await.map_err(to_fdo)?;
        to_json(&rows)
    }

    /// Register a student in the ledger and enroll them in the course.
    async fn enroll_student(
        &self,
        major: &str,
        section: &str,
        course: &str,
        student_id: &str,
        name: &str,
    ) -> zbus::fdo::Result<bool> {
        if student_id.trim().is_empty() {
            return Err(zbus::fdo::Error::InvalidArgs("student id is empty".into()));
        }
        let key = SessionKey::new(major, section, course);
        tracing::info!(session = %key, student = student_id, "enroll requested");
        self.service
            .store()
            .enroll(&key, student_id, name)
            .await
            .map_err(|e| to_fdo(e.into()))?;
        Ok(true)
    }

    /// Live status of one session.
    async fn session_status(
        &self,
        major: &str,
        section: &str,
        course: &str,
    ) -> zbus::fdo::Result<String> {
        let key = SessionKey::new(major, section, course);
        let status = self.service.session_status(&key).await.map_err(to_fdo)?;
        to_json(&status)
    }

    /// Return daemon status information.
    async fn status(&self) -> zbus::fdo::Result<String> {
        let settings = self.service.settings();
        to_json(&serde_json::json!({
            "version": env!("CARGO_PKG_VERSION"),
            "templates": self.service.template_count(),
            "active_sessions": self.service.active_sessions().await,
            "match_tolerance": settings.tolerance,
            "downsample": settings.downsample,
        }))
    }
}

fn to_json<T: Serialize + ?Sized>(value: &T) -> zbus::fdo::Result<String> {
    serde_json::to_string(value).map_err(|e| zbus::fdo::Error::Failed(e.to_string()))
}

/// Map engine errors onto the closest standard D-Bus error.
fn to_fdo(err: AttendanceError) -> zbus::fdo::Error {
    let msg = err.to_string();
    match err {
        AttendanceError::NotFound(_) | AttendanceError::InvalidSession(_) => {
            zbus::fdo::Error::UnknownObject(msg)
        }
        AttendanceError::Timeout { .. } => zbus::fdo::Error::TimedOut(msg),
        AttendanceError::InvalidFrame(_) => zbus::fdo::Error::InvalidArgs(msg),
        AttendanceError::ExternalStoreUnavailable(_) => zbus::fdo::Error::IOError(msg),
        AttendanceError::MalformedRecord { .. } | AttendanceError::Analyzer(_) => {
            tracing::warn!(error = %msg, "request failed");
            zbus::fdo::Error::Failed(msg)
        }
    }
}
