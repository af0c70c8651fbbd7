//! presensi-core — face localization, embedding and roster matching.
//!
//! SCRFD finds the face, ArcFace turns it into a 512-dimensional identity
//! vector, and [`CosineMatcher`] resolves a probe vector against stored
//! roster samples. Both networks run on CPU via ONNX Runtime.

pub mod alignment;
pub mod detector;
pub mod embedder;
pub mod localizer;
pub mod types;

pub use localizer::{FacePipeline, PipelineError};
pub use types::{
    BoundingBox, CosineMatcher, Embedding, GalleryEntry, MatchOutcome, Matcher, EMBEDDING_DIM,
};

use std::path::PathBuf;

/// Default directory for bundled ONNX models.
pub fn default_model_dir() -> PathBuf {
    PathBuf::from("/usr/share/presensi/models")
}
