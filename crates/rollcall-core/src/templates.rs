//! Known-template artifact loading.
//!
//! Templates are produced offline and stored as a JSON array:
//!
//! ```json
//! [{ "student_id": "S7", "embedding": [0.013, -0.092, ...] }]
//! ```
//!
//! They are loaded once at startup and never change for the life of the
//! process. Order is preserved because match ties resolve by index.

use std::collections::HashSet;
use std::path::Path;
use thiserror::Error;

use crate::types::KnownTemplate;

#[derive(Error, Debug)]
pub enum TemplateError {
    #[error("cannot read template file {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
    #[error("cannot parse template file: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("template {index} has an empty student id")]
    EmptyStudentId { index: usize },
    #[error("template {index} ({student_id}) has {actual} dimensions, expected {expected}")]
    DimensionMismatch {
        index: usize,
        student_id: String,
        expected: usize,
        actual: usize,
    },
    #[error("template {index} ({student_id}) contains a non-finite value")]
    NonFinite { index: usize, student_id: String },
}

/// Read and validate templates from a JSON file.
pub fn load_templates(path: impl AsRef<Path>) -> Result<Vec<KnownTemplate>, TemplateError> {
    let path = path.as_ref();
    let raw = std::fs::read(path).map_err(|source| TemplateError::Io {
        path: path.display().to_string(),
        source,
    })?;
    let templates = parse_templates(&raw)?;

    let students: HashSet<&str> = templates.iter().map(|t| t.student_id.as_str()).collect();
    tracing::info!(
        path = %path.display(),
        templates = templates.len(),
        students = students.len(),
        dims = templates.first().map(|t| t.embedding.len()).unwrap_or(0),
        "known templates loaded"
    );
    Ok(templates)
}

/// Parse and validate templates from JSON bytes.
///
/// Every embedding must be finite and share the first template's length.
/// A student may own several templates.
pub fn parse_templates(raw: &[u8]) -> Result<Vec<KnownTemplate>, TemplateError> {
    let templates: Vec<KnownTemplate> = serde_json::from_slice(raw)?;

    let expected = templates.first().map(|t| t.embedding.len()).unwrap_or(0);
    for (index, t) in templates.iter().enumerate() {
        if t.student_id.trim().is_empty() {
            return Err(TemplateError::EmptyStudentId { index });
        }
        if t.embedding.len() != expected || t.embedding.is_empty() {
            return Err(TemplateError::DimensionMismatch {
                index,
                student_id: t.student_id.clone(),
                expected,
                actual: t.embedding.len(),
            });
        }
        if t.embedding.values.iter().any(|v| !v.is_finite()) {
            return Err(TemplateError::NonFinite {
                index,
                student_id: t.student_id.clone(),
            });
        }
    }

    Ok(templates)
}
