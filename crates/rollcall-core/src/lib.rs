//! rollcall-core — Attendance session engine.
//!
//! Matches face embeddings against enrolled templates, tracks detections per
//! class session with a short cooldown and a long suppression window, and
//! commits each detected student to the ledger once per session.

pub mod committer;
pub mod error;
pub mod pipeline;
pub mod registry;
pub mod service;
pub mod session;
pub mod store;
pub mod templates;
pub mod tracker;
pub mod types;

pub use committer::{CommitFailure, CommitSummary};
pub use error::AttendanceError;
pub use pipeline::{DetectedFace, FaceAnalyzer, FrameReport};
pub use service::{AttendanceService, EngineSettings, RecentMark, ReportRow, SessionStatus};
pub use session::SessionKey;
pub use store::{MemoryStore, RosterStore, SqliteStore, StoreError};
pub use tracker::{Classification, FaceAnnotation};
pub use types::{BoundingBox, Embedding, EuclideanMatcher, KnownTemplate, MatchResult, Matcher};
