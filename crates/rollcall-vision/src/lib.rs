//! rollcall-vision — Face detection and embedding for the attendance engine.
//!
//! Uses SCRFD for face detection and ArcFace for face embeddings, both
//! running via ONNX Runtime for CPU inference on a dedicated engine thread.

pub mod detector;
pub mod engine;
pub mod recognizer;

pub use detector::FaceDetector;
pub use engine::{spawn_engine, EngineError, EngineHandle};
pub use recognizer::{FaceRecognizer, ARCFACE_EMBEDDING_DIM as EMBEDDING_DIM};

/// SCRFD model file name inside the model directory.
pub const SCRFD_MODEL_FILE: &str = "det_10g.onnx";
/// ArcFace model file name inside the model directory.
pub const ARCFACE_MODEL_FILE: &str = "w600k_r50.onnx";
