//! Frame decoding and the face-analysis seam.

use image::imageops::FilterType;
use image::RgbImage;
use serde::Serialize;
use std::future::Future;

use crate::error::AttendanceError;
use crate::tracker::FaceAnnotation;
use crate::types::{BoundingBox, Embedding};

/// A face found in a frame, with its embedding.
#[derive(Debug, Clone, PartialEq)]
pub struct DetectedFace {
    pub bbox: BoundingBox,
    pub embedding: Embedding,
}

/// Face detection plus embedding extraction.
///
/// Implementations receive an already decoded (and possibly downsampled)
/// RGB frame and return one entry per face, in frame coordinates.
pub trait FaceAnalyzer: Send + Sync {
    type Error: std::error::Error + Send + Sync + 'static;

    fn analyze(
        &self,
        frame: RgbImage,
    ) -> impl Future<Output = Result<Vec<DetectedFace>, Self::Error>> + Send;
}

/// A decoded frame ready for analysis.
#[derive(Debug)]
pub struct DecodedFrame {
    pub image: RgbImage,
    /// Multiply analysis-space x coordinates by this to get source pixels.
    pub scale_x: f32,
    /// Multiply analysis-space y coordinates by this to get source pixels.
    pub scale_y: f32,
}

/// Decode an encoded image (JPEG, PNG, ...) and shrink it by `downsample`.
///
/// A factor of 1.0 or more keeps full resolution. Dimensions never drop
/// below one pixel.
pub fn decode_frame(bytes: &[u8], downsample: f32) -> Result<DecodedFrame, AttendanceError> {
    let image = image::load_from_memory(bytes)
        .map_err(|e| AttendanceError::InvalidFrame(e.to_string()))?
        .to_rgb8();
    let (width, height) = image.dimensions();
    if width == 0 || height == 0 {
        return Err(AttendanceError::InvalidFrame("empty frame".into()));
    }

    if !(downsample > 0.0 && downsample < 1.0) {
        return Ok(DecodedFrame { image, scale_x: 1.0, scale_y: 1.0 });
    }

    let small_w = ((width as f32 * downsample).round() as u32).max(1);
    let small_h = ((height as f32 * downsample).round() as u32).max(1);
    let small = image::imageops::resize(&image, small_w, small_h, FilterType::Triangle);

    Ok(DecodedFrame {
        image: small,
        scale_x: width as f32 / small_w as f32,
        scale_y: height as f32 / small_h as f32,
    })
}

/// Response to one submitted frame.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FrameReport {
    pub annotations: Vec<FaceAnnotation>,
    /// Students added to the session's detected set by this frame.
    pub newly_detected: Vec<String>,
    /// Size of the session's detected set after this frame.
    pub total_detected: usize,
}
