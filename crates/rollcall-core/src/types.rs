use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Bounding box for a detected face, in frame pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub confidence: f32,
}

impl BoundingBox {
    /// Scale the box by independent horizontal and vertical factors.
    ///
    /// Used to map boxes found on a downsampled frame back onto the
    /// full-resolution frame the client submitted.
    pub fn rescale(&self, sx: f32, sy: f32) -> Self {
        Self {
            x: self.x * sx,
            y: self.y * sy,
            width: self.width * sx,
            height: self.height * sy,
            confidence: self.confidence,
        }
    }
}

/// Face embedding vector (128-dim for dlib-style encoders, 512-dim for ArcFace).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Embedding {
    pub values: Vec<f32>,
}

impl Embedding {
    pub fn new(values: Vec<f32>) -> Self {
        Self { values }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Euclidean distance between two embeddings.
    ///
    /// Vectors of different length are incomparable and sit at infinite
    /// distance, so they can never satisfy a tolerance.
    pub fn euclidean_distance(&self, other: &Embedding) -> f32 {
        if self.values.len() != other.values.len() {
            return f32::INFINITY;
        }
        self.values
            .iter()
            .zip(other.values.iter())
            .map(|(a, b)| (a - b).powi(2))
            .sum::<f32>()
            .sqrt()
    }

    /// Stable identity of the exact numeric content of this embedding.
    ///
    /// Two embeddings share a fingerprint only if every component is
    /// bit-identical. This is a cache key, never a biometric identity.
    pub fn fingerprint(&self) -> Fingerprint {
        let mut hasher = Sha256::new();
        for v in &self.values {
            hasher.update(v.to_le_bytes());
        }
        Fingerprint(hasher.finalize().into())
    }
}

/// SHA-256 digest over an embedding's little-endian `f32` bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Fingerprint([u8; 32]);

/// An enrolled student's stored embedding.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnownTemplate {
    pub student_id: String,
    pub embedding: Embedding,
}

/// Result of matching a candidate embedding against the known templates.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchResult {
    pub matched: bool,
    /// Euclidean distance of the closest template (infinite when none compared).
    pub distance: f32,
    /// Index of the closest template in load order (if matched).
    pub index: Option<usize>,
    /// Student owning the matched template (if matched).
    pub student_id: Option<String>,
}

/// Strategy for comparing a candidate embedding against the known templates.
pub trait Matcher {
    fn compare(&self, candidate: &Embedding, templates: &[KnownTemplate], tolerance: f32)
        -> MatchResult;
}

/// Nearest-template matcher over Euclidean distance.
///
/// Visits every template. Ties resolve to the lowest index because only a
/// strictly smaller distance replaces the current best.
#[derive(Debug, Clone, Copy, Default)]
pub struct EuclideanMatcher;

impl Matcher for EuclideanMatcher {
    fn compare(
        &self,
        candidate: &Embedding,
        templates: &[KnownTemplate],
        tolerance: f32,
    ) -> MatchResult {
        let mut best_dist = f32::INFINITY;
        let mut best_idx: Option<usize> = None;

        for (i, template) in templates.iter().enumerate() {
            let dist = candidate.euclidean_distance(&template.embedding);
            if dist < best_dist {
                best_dist = dist;
                best_idx = Some(i);
            }
        }

        match best_idx {
            Some(idx) if best_dist < tolerance => MatchResult {
                matched: true,
                distance: best_dist,
                index: Some(idx),
                student_id: Some(templates[idx].student_id.clone()),
            },
            _ => MatchResult {
                matched: false,
                distance: best_dist,
                index: None,
                student_id: None,
            },
        }
    }
}
