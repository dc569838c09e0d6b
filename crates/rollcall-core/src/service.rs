//! The attendance engine's public boundary.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::future::Future;

use crate::committer::{self, CommitSummary};
use crate::error::AttendanceError;
use crate::pipeline::{decode_frame, FaceAnalyzer, FrameReport};
use crate::registry::SessionRegistry;
use crate::session::SessionKey;
use crate::store::RosterStore;
use crate::tracker::FrameContext;
use crate::types::{EuclideanMatcher, KnownTemplate};

/// Tunables for matching, tracking and external calls.
#[derive(Debug, Clone)]
pub struct EngineSettings {
    /// Maximum Euclidean distance (exclusive) for a template match.
    pub tolerance: f32,
    /// How long a fingerprinted face is skipped after being processed.
    pub cooldown: Duration,
    /// How long after `last_marked` a student cannot be marked again.
    pub suppression: Duration,
    /// Frame scale factor applied before analysis.
    pub downsample: f32,
    /// Deadline for each analyzer and ledger call.
    pub external_timeout: std::time::Duration,
    /// Cooldown cache size above which expired entries are pruned.
    pub cooldown_cache_limit: usize,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            tolerance: 0.6,
            cooldown: Duration::seconds(300),
            suppression: Duration::hours(8),
            downsample: 0.25,
            external_timeout: std::time::Duration::from_secs(5),
            cooldown_cache_limit: 4096,
        }
    }
}

/// A student marked for a course inside the suppression window.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecentMark {
    pub student_id: String,
    pub name: String,
    pub last_marked: DateTime<Utc>,
}

/// One row of a course attendance report.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReportRow {
    pub student_id: String,
    pub name: String,
    pub count: u32,
    pub last_marked: Option<DateTime<Utc>>,
}

/// Snapshot of a live session.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionStatus {
    pub session_id: String,
    pub active: bool,
    pub started_at: DateTime<Utc>,
    pub total_detected: usize,
}

/// Session registry, known templates and collaborators for one process.
pub struct AttendanceService<S, A> {
    registry: SessionRegistry,
    templates: Vec<KnownTemplate>,
    store: S,
    analyzer: A,
    matcher: EuclideanMatcher,
    settings: EngineSettings,
}

impl<S: RosterStore, A: FaceAnalyzer> AttendanceService<S, A> {
    pub fn new(
        templates: Vec<KnownTemplate>,
        store: S,
        analyzer: A,
        settings: EngineSettings,
    ) -> Self {
        Self {
            registry: SessionRegistry::new(settings.cooldown),
            templates,
            store,
            analyzer,
            matcher: EuclideanMatcher,
            settings,
        }
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    pub fn template_count(&self) -> usize {
        self.templates.len()
    }

    pub async fn active_sessions(&self) -> usize {
        self.registry.len().await
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Bound an external call by the configured deadline.
    async fn bounded<T>(
        &self,
        operation: &'static str,
        call: impl Future<Output = T>,
    ) -> Result<T, AttendanceError> {
        let after = self.settings.external_timeout;
        tokio::time::timeout(after, call)
            .await
            .map_err(|_| AttendanceError::Timeout { operation, after })
    }

    pub async fn start_session(&self, key: SessionKey) -> String {
        self.start_session_at(key, Utc::now()).await
    }

    pub async fn start_session_at(&self, key: SessionKey, now: DateTime<Utc>) -> String {
        self.registry.start(key, now).await.id()
    }

    pub async fn stop_session(&self, key: &SessionKey) -> Result<CommitSummary, AttendanceError> {
        self.stop_session_at(key, Utc::now()).await
    }

    /// Remove the session and commit its detected students.
    pub async fn stop_session_at(
        &self,
        key: &SessionKey,
        now: DateTime<Utc>,
    ) -> Result<CommitSummary, AttendanceError> {
        let session = self.registry.stop(key).await?;
        Ok(committer::commit(
            &self.store,
            &session,
            now,
            self.settings.suppression,
            self.settings.external_timeout,
        )
        .await)
    }

    pub async fn submit_frame(
        &self,
        key: &SessionKey,
        frame: &[u8],
    ) -> Result<FrameReport, AttendanceError> {
        self.submit_frame_at(key, frame, Utc::now()).await
    }

    /// Run one frame through detection, matching and tracking.
    ///
    /// Analyzer and ledger calls happen before the session lock is taken.
    /// The session is re-checked under the lock, so a frame racing a stop
    /// either lands before the commit snapshot or fails without effect.
    pub async fn submit_frame_at(
        &self,
        key: &SessionKey,
        frame: &[u8],
        now: DateTime<Utc>,
    ) -> Result<FrameReport, AttendanceError> {
        let session = self
            .registry
            .get(key)
            .await
            .map_err(|_| AttendanceError::InvalidSession(key.id()))?;
        if !session.is_active() {
            return Err(AttendanceError::InvalidSession(key.id()));
        }

        let decoded = decode_frame(frame, self.settings.downsample)?;
        let faces = self
            .bounded("face analysis", self.analyzer.analyze(decoded.image))
            .await?
            .map_err(|e| AttendanceError::Analyzer(e.to_string()))?;

        let roster = if faces.is_empty() {
            Default::default()
        } else {
            self.bounded("roster lookup", self.store.enrolled(key))
                .await??
        };

        let mut tracker = session.lock_tracker().await;
        if !session.is_active() {
            return Err(AttendanceError::InvalidSession(key.id()));
        }

        let ctx = FrameContext {
            matcher: &self.matcher,
            templates: &self.templates,
            tolerance: self.settings.tolerance,
            roster: &roster,
            course: &key.course,
            suppression: self.settings.suppression,
            now,
        };

        let mut report = FrameReport {
            annotations: Vec::with_capacity(faces.len()),
            newly_detected: Vec::new(),
            total_detected: 0,
        };
        for mut face in faces {
            face.bbox = face.bbox.rescale(decoded.scale_x, decoded.scale_y);
            let outcome = tracker.observe(&face, &ctx);
            if outcome.newly_detected {
                if let Some(id) = &outcome.annotation.student_id {
                    report.newly_detected.push(id.clone());
                }
            }
            report.annotations.push(outcome.annotation);
        }

        if tracker.cached_faces() > self.settings.cooldown_cache_limit {
            let pruned = tracker.prune(now);
            tracing::debug!(session = %key.id(), pruned, "cooldown cache pruned");
        }
        report.total_detected = tracker.total_detected();

        tracing::debug!(
            session = %key.id(),
            faces = report.annotations.len(),
            new = report.newly_detected.len(),
            total = report.total_detected,
            "frame processed"
        );
        Ok(report)
    }

    pub async fn session_status(
        &self,
        key: &SessionKey,
    ) -> Result<SessionStatus, AttendanceError> {
        let session = self.registry.get(key).await?;
        let total_detected = session.lock_tracker().await.total_detected();
        Ok(SessionStatus {
            session_id: session.id(),
            active: session.is_active(),
            started_at: session.started_at(),
            total_detected,
        })
    }

    pub async fn recently_marked(
        &self,
        key: &SessionKey,
    ) -> Result<Vec<RecentMark>, AttendanceError> {
        self.recently_marked_at(key, Utc::now()).await
    }

    /// Students marked for the key's course within the suppression window,
    /// sorted by student id. Reads only the ledger.
    pub async fn recently_marked_at(
        &self,
        key: &SessionKey,
        now: DateTime<Utc>,
    ) -> Result<Vec<RecentMark>, AttendanceError> {
        let roster = self.bounded("roster lookup", self.store.enrolled(key)).await??;
        let mut marks: Vec<RecentMark> = roster
            .into_values()
            .filter_map(|record| {
                let last_marked = record.course(&key.course)?.last_marked?;
                (now - last_marked < self.settings.suppression).then(|| RecentMark {
                    student_id: record.student_id,
                    name: record.name,
                    last_marked,
                })
            })
            .collect();
        marks.sort_by(|a, b| a.student_id.cmp(&b.student_id));
        Ok(marks)
    }

    /// Courses any student of the (major, section) is enrolled in.
    pub async fn list_courses(
        &self,
        major: &str,
        section: &str,
    ) -> Result<Vec<String>, AttendanceError> {
        Ok(self
            .bounded("course listing", self.store.courses(major, section))
            .await??)
    }

    /// Attendance count and last mark for every student enrolled in the
    /// key's course, sorted by student id.
    pub async fn attendance_report(
        &self,
        key: &SessionKey,
    ) -> Result<Vec<ReportRow>, AttendanceError> {
        let roster = self.bounded("roster lookup", self.store.enrolled(key)).await??;
        let mut rows: Vec<ReportRow> = roster
            .into_values()
            .map(|record| {
                let course = record.course(&key.course).cloned().unwrap_or_default();
                ReportRow {
                    student_id: record.student_id,
                    name: record.name,
                    count: course.count,
                    last_marked: course.last_marked,
                }
            })
            .collect();
        rows.sort_by(|a, b| a.student_id.cmp(&b.student_id));
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::DetectedFace;
    use crate::store::{CourseAttendance, MemoryStore, SqliteStore};
    use crate::tracker::Classification;
    use crate::types::{BoundingBox, Embedding};
    use chrono::TimeZone;
    use image::{ImageFormat, Rgb, RgbImage};
    use std::io::Cursor;
    use std::sync::{Arc, Mutex};

    #[derive(Debug, thiserror::Error)]
    #[error("scripted analyzer failure")]
    struct ScriptedError;

    /// Returns the same faces for every frame.
    #[derive(Default)]
    struct ScriptedAnalyzer {
        faces: Mutex<Vec<DetectedFace>>,
        delay: Option<std::time::Duration>,
        fail: bool,
    }

    impl ScriptedAnalyzer {
        fn returning(faces: Vec<DetectedFace>) -> Self {
            Self {
                faces: Mutex::new(faces),
                ..Default::default()
            }
        }

        fn set(&self, faces: Vec<DetectedFace>) {
            *self.faces.lock().unwrap() = faces;
        }
    }

    impl FaceAnalyzer for ScriptedAnalyzer {
        type Error = ScriptedError;

        async fn analyze(&self, _frame: RgbImage) -> Result<Vec<DetectedFace>, ScriptedError> {
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            if self.fail {
                return Err(ScriptedError);
            }
            let faces = self.faces.lock().unwrap().clone();
            Ok(faces)
        }
    }

    type TestService = AttendanceService<MemoryStore, ScriptedAnalyzer>;

    fn key() -> SessionKey {
        SessionKey::new("CS", "A", "BSCS604")
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap()
    }

    fn secs(n: i64) -> Duration {
        Duration::seconds(n)
    }

    fn frame() -> Vec<u8> {
        let img = RgbImage::from_pixel(64, 48, Rgb([128, 128, 128]));
        let mut buf = Cursor::new(Vec::new());
        img.write_to(&mut buf, ImageFormat::Png).unwrap();
        buf.into_inner()
    }

    fn face(values: Vec<f32>) -> DetectedFace {
        DetectedFace {
            bbox: BoundingBox { x: 2.0, y: 3.0, width: 4.0, height: 5.0, confidence: 0.98 },
            embedding: Embedding::new(values),
        }
    }

    fn templates() -> Vec<KnownTemplate> {
        vec![
            KnownTemplate { student_id: "S7".into(), embedding: Embedding::new(vec![0.0, 0.0]) },
            KnownTemplate { student_id: "S8".into(), embedding: Embedding::new(vec![5.0, 5.0]) },
            KnownTemplate { student_id: "X1".into(), embedding: Embedding::new(vec![-5.0, 5.0]) },
        ]
    }

    fn store() -> MemoryStore {
        let store = MemoryStore::new();
        store.enroll(&key(), "S7", "Bilal", CourseAttendance::default()).unwrap();
        store.enroll(&key(), "S8", "Hina", CourseAttendance::default()).unwrap();
        store
    }

    fn service(store: MemoryStore, analyzer: ScriptedAnalyzer) -> TestService {
        AttendanceService::new(templates(), store, analyzer, EngineSettings::default())
    }

    #[tokio::test]
    async fn test_mark_cooldown_commit_scenario() {
        let svc = service(store(), ScriptedAnalyzer::returning(vec![face(vec![0.05, 0.0])]));
        assert_eq!(svc.start_session_at(key(), t0()).await, "CS_A_BSCS604");

        let first = svc.submit_frame_at(&key(), &frame(), t0() + secs(1)).await.unwrap();
        assert_eq!(first.annotations.len(), 1);
        assert_eq!(first.annotations[0].label, Classification::Marked);
        assert_eq!(first.annotations[0].student_id.as_deref(), Some("S7"));
        assert_eq!(first.newly_detected, vec!["S7".to_string()]);
        assert_eq!(first.total_detected, 1);

        let second = svc.submit_frame_at(&key(), &frame(), t0() + secs(2)).await.unwrap();
        assert_eq!(second.annotations[0].label, Classification::Cooldown);
        assert!(second.newly_detected.is_empty());
        assert_eq!(second.total_detected, 1);

        let stop_at = t0() + Duration::minutes(10);
        let summary = svc.stop_session_at(&key(), stop_at).await.unwrap();
        assert_eq!(summary.students_marked, 1);
        assert!(summary.duration_minutes >= 0.0);

        let s7 = svc.store().attendance(&key(), "S7").unwrap();
        assert_eq!(s7.count, 1);
        assert_eq!(s7.last_marked, Some(stop_at));
        assert_eq!(svc.store().attendance(&key(), "S8").unwrap().count, 0);

        assert!(matches!(
            svc.stop_session_at(&key(), stop_at).await,
            Err(AttendanceError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_boxes_are_scaled_to_source_resolution() {
        let svc = service(store(), ScriptedAnalyzer::returning(vec![face(vec![0.05, 0.0])]));
        svc.start_session_at(key(), t0()).await;

        // 64x48 frame downsampled by 0.25 to 16x12
        let report = svc.submit_frame_at(&key(), &frame(), t0()).await.unwrap();
        let bbox = report.annotations[0].bbox;
        assert_eq!((bbox.x, bbox.y, bbox.width, bbox.height), (8.0, 12.0, 16.0, 20.0));
    }

    #[tokio::test]
    async fn test_unknown_face_changes_nothing() {
        let svc = service(store(), ScriptedAnalyzer::returning(vec![face(vec![40.0, 40.0])]));
        svc.start_session_at(key(), t0()).await;

        let report = svc.submit_frame_at(&key(), &frame(), t0()).await.unwrap();
        assert_eq!(report.annotations[0].label, Classification::Unknown);
        assert!(report.newly_detected.is_empty());
        assert_eq!(report.total_detected, 0);
    }

    #[tokio::test]
    async fn test_not_enrolled_face() {
        let svc = service(store(), ScriptedAnalyzer::returning(vec![face(vec![-5.0, 5.0])]));
        svc.start_session_at(key(), t0()).await;

        let report = svc.submit_frame_at(&key(), &frame(), t0()).await.unwrap();
        assert_eq!(report.annotations[0].label, Classification::NotEnrolled);
        assert_eq!(report.total_detected, 0);
    }

    #[tokio::test]
    async fn test_already_marked_student_is_never_committed() {
        let store = store();
        store
            .enroll(
                &key(),
                "S8",
                "Hina",
                CourseAttendance { count: 4, last_marked: Some(t0() - Duration::hours(1)) },
            )
            .unwrap();
        let svc = service(store, ScriptedAnalyzer::returning(vec![face(vec![5.0, 5.05])]));
        svc.start_session_at(key(), t0()).await;

        let report = svc.submit_frame_at(&key(), &frame(), t0()).await.unwrap();
        assert_eq!(report.annotations[0].label, Classification::AlreadyMarked);
        assert_eq!(report.annotations[0].name.as_deref(), Some("Hina"));
        assert_eq!(report.total_detected, 0);

        let summary = svc.stop_session_at(&key(), t0() + secs(60)).await.unwrap();
        assert_eq!(summary.students_marked, 0);
        assert_eq!(svc.store().attendance(&key(), "S8").unwrap().count, 4);
    }

    #[tokio::test]
    async fn test_next_session_sees_fresh_commit() {
        let svc = service(store(), ScriptedAnalyzer::returning(vec![face(vec![0.05, 0.0])]));

        svc.start_session_at(key(), t0()).await;
        svc.submit_frame_at(&key(), &frame(), t0()).await.unwrap();
        svc.stop_session_at(&key(), t0() + Duration::minutes(50)).await.unwrap();

        let later = t0() + Duration::hours(1);
        svc.start_session_at(key(), later).await;
        let report = svc.submit_frame_at(&key(), &frame(), later).await.unwrap();
        assert_eq!(report.annotations[0].label, Classification::AlreadyMarked);
        assert_eq!(report.total_detected, 0);
    }

    #[tokio::test]
    async fn test_total_detected_is_monotone() {
        let svc = service(store(), ScriptedAnalyzer::returning(vec![face(vec![0.05, 0.0])]));
        svc.start_session_at(key(), t0()).await;

        let mut last = 0;
        let script = [
            vec![face(vec![0.05, 0.0])],
            vec![],
            vec![face(vec![40.0, 40.0])],
            vec![face(vec![5.0, 5.05]), face(vec![0.0, 0.05])],
            vec![face(vec![0.05, 0.0])],
        ];
        for (i, faces) in script.into_iter().enumerate() {
            svc.analyzer.set(faces);
            let report = svc
                .submit_frame_at(&key(), &frame(), t0() + secs(i as i64))
                .await
                .unwrap();
            assert!(report.total_detected >= last);
            last = report.total_detected;
        }
        assert_eq!(last, 2);
    }

    #[tokio::test]
    async fn test_zero_faces_is_empty_report() {
        let svc = service(store(), ScriptedAnalyzer::returning(vec![]));
        svc.start_session_at(key(), t0()).await;

        let report = svc.submit_frame_at(&key(), &frame(), t0()).await.unwrap();
        assert!(report.annotations.is_empty());
        assert!(report.newly_detected.is_empty());
        assert_eq!(report.total_detected, 0);
    }

    #[tokio::test]
    async fn test_frame_for_missing_or_stopped_session_is_invalid() {
        let svc = service(store(), ScriptedAnalyzer::returning(vec![face(vec![0.05, 0.0])]));
        assert!(matches!(
            svc.submit_frame_at(&key(), &frame(), t0()).await,
            Err(AttendanceError::InvalidSession(_))
        ));

        svc.start_session_at(key(), t0()).await;
        svc.stop_session_at(&key(), t0()).await.unwrap();
        assert!(matches!(
            svc.submit_frame_at(&key(), &frame(), t0()).await,
            Err(AttendanceError::InvalidSession(_))
        ));
    }

    #[tokio::test]
    async fn test_restart_discards_previous_detections() {
        let svc = service(store(), ScriptedAnalyzer::returning(vec![face(vec![0.05, 0.0])]));
        svc.start_session_at(key(), t0()).await;
        svc.submit_frame_at(&key(), &frame(), t0()).await.unwrap();

        svc.start_session_at(key(), t0() + secs(30)).await;
        let status = svc.session_status(&key()).await.unwrap();
        assert_eq!(status.total_detected, 0);
        assert_eq!(status.started_at, t0() + secs(30));

        let summary = svc.stop_session_at(&key(), t0() + secs(60)).await.unwrap();
        assert_eq!(summary.students_marked, 0);
        assert_eq!(svc.store().attendance(&key(), "S7").unwrap().count, 0);
    }

    #[tokio::test]
    async fn test_analyzer_timeout_leaves_tracker_untouched() {
        let analyzer = ScriptedAnalyzer {
            faces: Mutex::new(vec![face(vec![0.05, 0.0])]),
            delay: Some(std::time::Duration::from_millis(500)),
            fail: false,
        };
        let settings = EngineSettings {
            external_timeout: std::time::Duration::from_millis(20),
            ..Default::default()
        };
        let svc = AttendanceService::new(templates(), store(), analyzer, settings);
        svc.start_session_at(key(), t0()).await;

        let err = svc.submit_frame_at(&key(), &frame(), t0()).await.unwrap_err();
        assert!(matches!(err, AttendanceError::Timeout { operation: "face analysis", .. }));
        assert_eq!(svc.session_status(&key()).await.unwrap().total_detected, 0);
    }

    #[tokio::test]
    async fn test_analyzer_failure_is_reported() {
        let analyzer = ScriptedAnalyzer { fail: true, ..Default::default() };
        let svc = service(store(), analyzer);
        svc.start_session_at(key(), t0()).await;

        let err = svc.submit_frame_at(&key(), &frame(), t0()).await.unwrap_err();
        assert!(matches!(err, AttendanceError::Analyzer(_)));
    }

    #[tokio::test]
    async fn test_invalid_frame_bytes() {
        let svc = service(store(), ScriptedAnalyzer::default());
        svc.start_session_at(key(), t0()).await;
        let err = svc.submit_frame_at(&key(), b"\x00\x01", t0()).await.unwrap_err();
        assert!(matches!(err, AttendanceError::InvalidFrame(_)));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_frames_detect_student_once() {
        let svc = Arc::new(service(store(), ScriptedAnalyzer::default()));
        svc.start_session_at(key(), t0()).await;

        let mut tasks = Vec::new();
        for i in 0..32 {
            let svc = Arc::clone(&svc);
            tasks.push(tokio::spawn(async move {
                // Distinct embeddings, all matching S7, so none hit the cooldown
                svc.analyzer.set(vec![face(vec![0.001 * i as f32, 0.0])]);
                svc.submit_frame_at(&key(), &frame(), t0()).await.unwrap()
            }));
        }

        let mut newly = 0;
        for task in tasks {
            newly += task.await.unwrap().newly_detected.len();
        }
        assert_eq!(newly, 1);
        assert_eq!(svc.session_status(&key()).await.unwrap().total_detected, 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_sessions_are_independent() {
        let other = SessionKey::new("CS", "B", "BSCS604");
        let store = store();
        store.enroll(&other, "S7", "Bilal", CourseAttendance::default()).unwrap();
        let svc = Arc::new(service(
            store,
            ScriptedAnalyzer::returning(vec![face(vec![0.05, 0.0])]),
        ));
        svc.start_session_at(key(), t0()).await;
        svc.start_session_at(other.clone(), t0()).await;

        let a = {
            let svc = Arc::clone(&svc);
            tokio::spawn(async move { svc.submit_frame_at(&key(), &frame(), t0()).await })
        };
        let b = {
            let svc = Arc::clone(&svc);
            let other = other.clone();
            tokio::spawn(async move { svc.submit_frame_at(&other, &frame(), t0()).await })
        };
        assert_eq!(a.await.unwrap().unwrap().total_detected, 1);
        assert_eq!(b.await.unwrap().unwrap().total_detected, 1);

        svc.stop_session_at(&key(), t0() + secs(60)).await.unwrap();
        assert_eq!(svc.session_status(&other).await.unwrap().total_detected, 1);
    }

    #[tokio::test]
    async fn test_recently_marked_filters_window() {
        let store = store();
        store
            .enroll(
                &key(),
                "S8",
                "Hina",
                CourseAttendance { count: 2, last_marked: Some(t0() - Duration::hours(3)) },
            )
            .unwrap();
        store
            .enroll(
                &key(),
                "S9",
                "Omar",
                CourseAttendance { count: 2, last_marked: Some(t0() - Duration::hours(9)) },
            )
            .unwrap();
        let svc = service(store, ScriptedAnalyzer::default());

        let recent = svc.recently_marked_at(&key(), t0()).await.unwrap();
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].student_id, "S8");
        assert_eq!(recent[0].name, "Hina");
        assert_eq!(recent[0].last_marked, t0() - Duration::hours(3));
    }

    #[tokio::test]
    async fn test_attendance_report_and_courses() {
        let store = store();
        store
            .enroll(
                &SessionKey::new("CS", "A", "BSCS601"),
                "S8",
                "Hina",
                CourseAttendance { count: 7, last_marked: None },
            )
            .unwrap();
        let svc = service(store, ScriptedAnalyzer::default());

        let rows = svc.attendance_report(&key()).await.unwrap();
        let ids: Vec<&str> = rows.iter().map(|r| r.student_id.as_str()).collect();
        assert_eq!(ids, ["S7", "S8"]);
        assert!(rows.iter().all(|r| r.count == 0 && r.last_marked.is_none()));

        let courses = svc.list_courses("CS", "A").await.unwrap();
        assert_eq!(courses, ["BSCS601", "BSCS604"]);
        assert!(svc.list_courses("EE", "Z").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_roster_outage_fails_frame_without_mutation() {
        let store = store();
        store.fail_reads();
        let svc = service(store, ScriptedAnalyzer::returning(vec![face(vec![0.05, 0.0])]));
        svc.start_session_at(key(), t0()).await;

        let err = svc.submit_frame_at(&key(), &frame(), t0()).await.unwrap_err();
        assert!(matches!(err, AttendanceError::ExternalStoreUnavailable(_)));
        assert_eq!(svc.session_status(&key()).await.unwrap().total_detected, 0);

        let summary = svc.stop_session_at(&key(), t0() + secs(60)).await.unwrap();
        assert_eq!(summary.students_marked, 0);
        assert_eq!(svc.store().attendance(&key(), "S7").unwrap().count, 0);
    }

    #[tokio::test]
    async fn test_slow_roster_read_times_out_without_mutation() {
        let store = store();
        store.slow_reads(std::time::Duration::from_millis(500));
        let settings = EngineSettings {
            external_timeout: std::time::Duration::from_millis(20),
            ..Default::default()
        };
        let analyzer = ScriptedAnalyzer::returning(vec![face(vec![0.05, 0.0])]);
        let svc = AttendanceService::new(templates(), store, analyzer, settings);
        svc.start_session_at(key(), t0()).await;

        let err = svc.submit_frame_at(&key(), &frame(), t0()).await.unwrap_err();
        assert!(matches!(err, AttendanceError::Timeout { operation: "roster lookup", .. }));
        assert_eq!(svc.session_status(&key()).await.unwrap().total_detected, 0);
    }

    #[tokio::test]
    async fn test_malformed_ledger_row_does_not_block_other_students() {
        let store = SqliteStore::open_in_memory().await.unwrap();
        store.enroll(&key(), "S7", "Bilal").await.unwrap();
        store.enroll(&key(), "S8", "Hina").await.unwrap();
        store
            .enroll(&SessionKey::new("CS", "A", "BSCS601"), "S8", "Hina")
            .await
            .unwrap();
        store
            .execute_raw(
                "UPDATE enrollments SET last_marked = 'garbage'
                 WHERE student_id = 'S8' AND course = 'BSCS601'",
            )
            .await;

        let analyzer = ScriptedAnalyzer::returning(vec![face(vec![0.05, 0.0])]);
        let svc = AttendanceService::new(templates(), store, analyzer, EngineSettings::default());
        svc.start_session_at(key(), t0()).await;

        let report = svc.submit_frame_at(&key(), &frame(), t0()).await.unwrap();
        assert_eq!(report.annotations[0].label, Classification::Marked);
        assert_eq!(report.newly_detected, vec!["S7".to_string()]);

        let rows = svc.attendance_report(&key()).await.unwrap();
        assert_eq!(rows.len(), 2);
    }
}
