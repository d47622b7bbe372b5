//! Face detection and embedding extraction seams.
//!
//! Both are black-box model services. They are driven synchronously, one
//! call per frame (detection) and one call per face (embedding).

use crate::types::{BoundingBox, Frame};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ExtractionError {
    #[error("detection failed: {0}")]
    Detection(String),
    #[error("embedding failed: {0}")]
    Embedding(String),
}

pub trait FaceDetector {
    fn detect(&mut self, frame: &Frame) -> Result<Vec<BoundingBox>, ExtractionError>;
}

pub trait FaceEmbedder {
    /// Raw, unnormalized embedding for one detected face.
    fn embed(&mut self, frame: &Frame, face: &BoundingBox) -> Result<Vec<f32>, ExtractionError>;
}
