//! Per-session detection tracking.
//!
//! Two windows govern a face:
//!
//! - the cooldown window, keyed by embedding fingerprint, stops the same
//!   physical face from being re-matched on consecutive frames;
//! - the suppression window, read from the ledger's `last_marked`, stops a
//!   student already marked for the course from being marked again.
//!
//! Only a face that clears both windows feeds `detected`, the set the
//! committer eventually writes to the ledger.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::collections::{BTreeSet, HashMap};

use crate::pipeline::DetectedFace;
use crate::store::EnrollmentRecord;
use crate::types::{BoundingBox, Fingerprint, KnownTemplate, Matcher};

/// How a face in a frame was classified.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Classification {
    /// Enrolled and counted toward this session's attendance.
    Marked,
    /// Enrolled, but marked for this course inside the suppression window.
    AlreadyMarked,
    /// Matches a known student who is not enrolled in the course.
    NotEnrolled,
    /// Matches no known template.
    Unknown,
    /// Seen within the cooldown window; not reprocessed.
    Cooldown,
}

/// Overlay metadata for one face, for rendering by the caller.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FaceAnnotation {
    pub bbox: BoundingBox,
    pub label: Classification,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub student_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

/// Everything a frame needs besides the tracker's own state.
pub struct FrameContext<'a, M> {
    pub matcher: &'a M,
    pub templates: &'a [KnownTemplate],
    pub tolerance: f32,
    /// Students enrolled in `course`, fetched for this frame.
    pub roster: &'a HashMap<String, EnrollmentRecord>,
    pub course: &'a str,
    pub suppression: Duration,
    pub now: DateTime<Utc>,
}

/// Outcome of observing one face.
#[derive(Debug, Clone, PartialEq)]
pub struct FaceOutcome {
    pub annotation: FaceAnnotation,
    /// Set when this face added its student to the detected set.
    pub newly_detected: bool,
}

/// Cooldown cache plus the running set of students detected this session.
#[derive(Debug)]
pub struct DetectionTracker {
    detected: BTreeSet<String>,
    recent_faces: HashMap<Fingerprint, DateTime<Utc>>,
    cooldown: Duration,
}

impl DetectionTracker {
    pub fn new(cooldown: Duration) -> Self {
        Self {
            detected: BTreeSet::new(),
            recent_faces: HashMap::new(),
            cooldown,
        }
    }

    pub fn detected(&self) -> &BTreeSet<String> {
        &self.detected
    }

    pub fn total_detected(&self) -> usize {
        self.detected.len()
    }

    pub fn cached_faces(&self) -> usize {
        self.recent_faces.len()
    }

    fn in_cooldown(&self, fingerprint: &Fingerprint, now: DateTime<Utc>) -> bool {
        self.recent_faces
            .get(fingerprint)
            .is_some_and(|&seen| now - seen < self.cooldown)
    }

    /// Classify one face and update tracking state.
    pub fn observe<M: Matcher>(
        &mut self,
        face: &DetectedFace,
        ctx: &FrameContext<'_, M>,
    ) -> FaceOutcome {
        let fingerprint = face.embedding.fingerprint();
        let annotate = |label, student_id: Option<&str>, name: Option<&str>| FaceAnnotation {
            bbox: face.bbox,
            label,
            student_id: student_id.map(str::to_string),
            name: name.map(str::to_string),
        };

        if self.in_cooldown(&fingerprint, ctx.now) {
            return FaceOutcome {
                annotation: annotate(Classification::Cooldown, None, None),
                newly_detected: false,
            };
        }

        let result = ctx.matcher.compare(&face.embedding, ctx.templates, ctx.tolerance);
        let Some(student_id) = result.student_id.as_deref() else {
            return FaceOutcome {
                annotation: annotate(Classification::Unknown, None, None),
                newly_detected: false,
            };
        };

        let Some(record) = ctx.roster.get(student_id) else {
            return FaceOutcome {
                annotation: annotate(Classification::NotEnrolled, Some(student_id), None),
                newly_detected: false,
            };
        };

        let is_recent = record.marked_within(ctx.course, ctx.now, ctx.suppression);
        self.recent_faces.insert(fingerprint, ctx.now);

        if is_recent {
            return FaceOutcome {
                annotation: annotate(
                    Classification::AlreadyMarked,
                    Some(student_id),
                    Some(record.name.as_str()),
                ),
                newly_detected: false,
            };
        }

        let newly_detected = self.detected.insert(student_id.to_string());
        FaceOutcome {
            annotation: annotate(
                Classification::Marked,
                Some(student_id),
                Some(record.name.as_str()),
            ),
            newly_detected,
        }
    }

    #[cfg(test)]
    pub(crate) fn insert_detected(&mut self, student_id: &str) {
        self.detected.insert(student_id.to_string());
    }

    /// Drop cooldown entries that have expired as of `now`. Returns how many
    /// were removed.
    pub fn prune(&mut self, now: DateTime<Utc>) -> usize {
        let before = self.recent_faces.len();
        let cooldown = self.cooldown;
        self.recent_faces.retain(|_, &mut seen| now - seen < cooldown);
        before - self.recent_faces.len()
    }
}
