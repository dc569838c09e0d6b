//! ArcFace face recognizer via ONNX Runtime.
//!
//! Extracts 512-dimensional embeddings from square face crops taken around
//! detector boxes. Embeddings are L2-normalized.

use image::imageops::FilterType;
use image::RgbImage;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use rollcall_core::{BoundingBox, Embedding};
use std::path::Path;
use thiserror::Error;

const ARCFACE_INPUT_SIZE: u32 = 112;
const ARCFACE_MEAN: f32 = 127.5;
const ARCFACE_STD: f32 = 127.5;
/// Length of every embedding the recognizer produces.
pub const ARCFACE_EMBEDDING_DIM: usize = 512;
/// Extra context around the detector box, as a fraction of its longer side.
const CROP_MARGIN: f32 = 0.1;

#[derive(Error, Debug)]
pub enum RecognizerError {
    #[error("model file not found: {0} (download from insightface and place in the model dir)")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("face box lies outside the frame")]
    EmptyCrop,
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// ArcFace-based face recognizer.
pub struct FaceRecognizer {
    session: Session,
}

impl FaceRecognizer {
    /// Load the ArcFace ONNX model from the given path.
    pub fn load(model_path: &str) -> Result<Self, RecognizerError> {
        if !Path::new(model_path).exists() {
            return Err(RecognizerError::ModelNotFound(model_path.to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        tracing::info!(
            path = model_path,
            inputs = ?session.inputs().iter().map(|i| i.name()).collect::<Vec<_>>(),
            outputs = ?session.outputs().iter().map(|o| o.name()).collect::<Vec<_>>(),
            "loaded ArcFace model"
        );

        Ok(Self { session })
    }

    /// Extract an embedding for one detected face in an RGB frame.
    pub fn extract(
        &mut self,
        frame: &RgbImage,
        face: &BoundingBox,
    ) -> Result<Embedding, RecognizerError> {
        let (x, y, w, h) =
            crop_region(face, frame.width(), frame.height()).ok_or(RecognizerError::EmptyCrop)?;
        let crop = image::imageops::crop_imm(frame, x, y, w, h).to_image();
        let input = preprocess(&crop);

        let outputs = self
            .session
            .run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let (_, raw) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| RecognizerError::InferenceFailed(format!("embedding extraction: {e}")))?;

        if raw.len() != ARCFACE_EMBEDDING_DIM {
            return Err(RecognizerError::InferenceFailed(format!(
                "expected {ARCFACE_EMBEDDING_DIM}-dim embedding, got {}",
                raw.len()
            )));
        }

        Ok(Embedding::new(l2_normalize(raw)))
    }
}

/// Square region around `face`, padded by [`CROP_MARGIN`] and clamped to
/// the frame. Returns `None` when nothing of the box is inside the frame.
fn crop_region(face: &BoundingBox, width: u32, height: u32) -> Option<(u32, u32, u32, u32)> {
    let side = face.width.max(face.height) * (1.0 + 2.0 * CROP_MARGIN);
    let cx = face.x + face.width / 2.0;
    let cy = face.y + face.height / 2.0;

    let x0 = (cx - side / 2.0).max(0.0);
    let y0 = (cy - side / 2.0).max(0.0);
    let x1 = (cx + side / 2.0).min(width as f32);
    let y1 = (cy + side / 2.0).min(height as f32);
    if x1 - x0 < 1.0 || y1 - y0 < 1.0 {
        return None;
    }

    let (x, y) = (x0.round() as u32, y0.round() as u32);
    let (x, y) = (x.min(width - 1), y.min(height - 1));
    let w = (x1.round() as u32).saturating_sub(x).clamp(1, width - x);
    let h = (y1.round() as u32).saturating_sub(y).clamp(1, height - y);
    Some((x, y, w, h))
}

/// Resize a face crop to 112x112 and normalize into an NCHW RGB tensor.
fn preprocess(crop: &RgbImage) -> Array4<f32> {
    let size = ARCFACE_INPUT_SIZE as usize;
    let resized =
        image::imageops::resize(crop, ARCFACE_INPUT_SIZE, ARCFACE_INPUT_SIZE, FilterType::Triangle);

    let mut tensor = Array4::<f32>::zeros((1, 3, size, size));
    for (x, y, pixel) in resized.enumerate_pixels() {
        for c in 0..3 {
            tensor[[0, c, y as usize, x as usize]] = (pixel[c] as f32 - ARCFACE_MEAN) / ARCFACE_STD;
        }
    }
    tensor
}

fn l2_normalize(raw: &[f32]) -> Vec<f32> {
    let norm: f32 = raw.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        raw.iter().map(|x| x / norm).collect()
    } else {
        raw.to_vec()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    fn face(x: f32, y: f32, w: f32, h: f32) -> BoundingBox {
        BoundingBox { x, y, width: w, height: h, confidence: 0.9 }
    }

    #[test]
    fn test_preprocess_output_shape() {
        let crop = RgbImage::from_pixel(40, 60, Rgb([128, 128, 128]));
        let tensor = preprocess(&crop);
        assert_eq!(
            tensor.shape(),
            &[1, 3, ARCFACE_INPUT_SIZE as usize, ARCFACE_INPUT_SIZE as usize]
        );
    }

    #[test]
    fn test_preprocess_normalization_per_channel() {
        let crop = RgbImage::from_pixel(112, 112, Rgb([255, 0, 128]));
        let tensor = preprocess(&crop);
        assert!((tensor[[0, 0, 5, 5]] - 1.0).abs() < 1e-6);
        assert!((tensor[[0, 1, 5, 5]] + 1.0).abs() < 1e-6);
        let expected = (128.0 - ARCFACE_MEAN) / ARCFACE_STD;
        assert!((tensor[[0, 2, 5, 5]] - expected).abs() < 1e-6);
    }

    #[test]
    fn test_crop_region_inside_frame() {
        let region = crop_region(&face(100.0, 100.0, 50.0, 50.0), 640, 480).unwrap();
        // 50px box plus 10% margin each side -> 60px square centered on (125, 125)
        assert_eq!(region, (95, 95, 60, 60));
    }

    #[test]
    fn test_crop_region_clamped_at_edges() {
        let (x, y, w, h) = crop_region(&face(-10.0, 450.0, 40.0, 40.0), 640, 480).unwrap();
        assert_eq!((x, y), (0, 446));
        assert!(x + w <= 640 && y + h <= 480);
    }

    #[test]
    fn test_crop_region_outside_frame() {
        assert!(crop_region(&face(700.0, 10.0, 20.0, 20.0), 640, 480).is_none());
    }

    #[test]
    fn test_l2_normalize() {
        let v = l2_normalize(&[3.0, 4.0]);
        assert!((v[0] - 0.6).abs() < 1e-6);
        assert!((v[1] - 0.8).abs() < 1e-6);
        assert_eq!(l2_normalize(&[0.0, 0.0]), vec![0.0, 0.0]);
    }
}
