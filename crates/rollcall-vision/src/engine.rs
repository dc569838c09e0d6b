use image::RgbImage;
use rollcall_core::{DetectedFace, FaceAnalyzer};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

use crate::detector::{DetectorError, FaceDetector};
use crate::recognizer::{FaceRecognizer, RecognizerError};

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("detector error: {0}")]
    Detector(#[from] DetectorError),
    #[error("recognizer error: {0}")]
    Recognizer(#[from] RecognizerError),
    #[error("cannot spawn engine thread: {0}")]
    Spawn(#[from] std::io::Error),
    #[error("engine thread exited")]
    ChannelClosed,
}

/// Messages sent from request handlers to the engine thread.
enum EngineRequest {
    Analyze {
        frame: RgbImage,
        reply: oneshot::Sender<Result<Vec<DetectedFace>, EngineError>>,
    },
}

/// Clone-safe handle to the engine thread.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineRequest>,
}

impl FaceAnalyzer for EngineHandle {
    type Error = EngineError;

    /// Detect every face in `frame` and extract its embedding.
    async fn analyze(&self, frame: RgbImage) -> Result<Vec<DetectedFace>, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(EngineRequest::Analyze {
                frame,
                reply: reply_tx,
            })
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)?
    }
}

/// Spawn the engine on a dedicated OS thread.
///
/// Loads both ONNX models synchronously so startup fails fast on a missing
/// or broken model, then serves requests one at a time.
pub fn spawn_engine(scrfd_path: &str, arcface_path: &str) -> Result<EngineHandle, EngineError> {
    let mut detector = FaceDetector::load(scrfd_path)?;
    tracing::info!(path = scrfd_path, "SCRFD detector loaded");

    let mut recognizer = FaceRecognizer::load(arcface_path)?;
    tracing::info!(path = arcface_path, "ArcFace recognizer loaded");

    let (tx, mut rx) = mpsc::channel::<EngineRequest>(4);

    std::thread::Builder::new()
        .name("rollcall-engine".into())
        .spawn(move || {
            tracing::info!("engine thread started");
            while let Some(req) = rx.blocking_recv() {
                match req {
                    EngineRequest::Analyze { frame, reply } => {
                        let result = run_analyze(&mut detector, &mut recognizer, &frame);
                        let _ = reply.send(result);
                    }
                }
            }
            tracing::info!("engine thread exiting");
        })?;

    Ok(EngineHandle { tx })
}

/// Detect faces, then embed each one. A face whose crop falls outside the
/// frame is dropped rather than failing the whole frame.
fn run_analyze(
    detector: &mut FaceDetector,
    recognizer: &mut FaceRecognizer,
    frame: &RgbImage,
) -> Result<Vec<DetectedFace>, EngineError> {
    let boxes = detector.detect(frame)?;
    tracing::debug!(
        faces = boxes.len(),
        width = frame.width(),
        height = frame.height(),
        "analyze: detection done"
    );

    let mut faces = Vec::with_capacity(boxes.len());
    for bbox in boxes {
        match recognizer.extract(frame, &bbox) {
            Ok(embedding) => faces.push(DetectedFace { bbox, embedding }),
            Err(RecognizerError::EmptyCrop) => {
                tracing::debug!(?bbox, "analyze: face crop empty, skipping");
            }
            Err(e) => return Err(e.into()),
        }
    }
    Ok(faces)
}
