//! Face localization and the combined locate→embed pipeline.
//!
//! Localization biases detection toward a centered subject: an elliptical
//! mask covering 60% of the width and 66.7% of the height is applied before
//! detection, suppressing background false positives. When several regions
//! survive NMS the first returned is taken as-is; there is no best-face
//! ranking (documented limitation, single dominant face assumed).

use crate::detector::{DetectorError, FaceDetector};
use crate::embedder::{EmbedderError, FaceEmbedder};
use crate::types::Embedding;
use image::{imageops, GrayImage, RgbImage};
use thiserror::Error;

/// Elliptical mask semi-axes as fractions of frame width / height.
const MASK_WIDTH_FRACTION: f32 = 0.6;
const MASK_HEIGHT_FRACTION: f32 = 0.6667;

/// Minimum detector confidence for the embedder's own gate. This is a second,
/// independent check on the already-localized crop.
const EMBED_GATE_CONFIDENCE: f32 = 0.95;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("no face detected")]
    NoFaceDetected,
    #[error("face rejected by embedding gate (confidence {confidence:.3})")]
    GateRejected { confidence: f32 },
    #[error(transparent)]
    Detector(#[from] DetectorError),
    #[error(transparent)]
    Embedder(#[from] EmbedderError),
}

/// The face pipeline: detector and embedding network, loaded once at process
/// start and shared for the process lifetime.
pub struct FacePipeline {
    detector: FaceDetector,
    embedder: FaceEmbedder,
}

impl FacePipeline {
    /// Load both ONNX models. Fails fast if either file is missing.
    pub fn load(detector_path: &str, embedder_path: &str) -> Result<Self, PipelineError> {
        let detector = FaceDetector::load(detector_path)?;
        let embedder = FaceEmbedder::load(embedder_path)?;
        Ok(Self { detector, embedder })
    }

    /// Find the dominant face in a decoded color frame.
    ///
    /// Returns the masked luma frame cropped to the first detected region,
    /// or [`PipelineError::NoFaceDetected`] when nothing is found. Pure
    /// function of its input apart from the shared model sessions.
    pub fn locate(&mut self, image: &RgbImage) -> Result<GrayImage, PipelineError> {
        let masked = apply_oval_mask(&imageops::grayscale(image));
        let (width, height) = masked.dimensions();

        let faces = self.detector.detect(masked.as_raw(), width, height)?;
        let face = faces.first().ok_or(PipelineError::NoFaceDetected)?;

        let (x, y, w, h) =
            clamp_region(face.x, face.y, face.width, face.height, width, height)
                .ok_or(PipelineError::NoFaceDetected)?;

        tracing::debug!(
            candidates = faces.len(),
            confidence = face.confidence,
            x, y, w, h,
            "face localized"
        );

        Ok(imageops::crop_imm(&masked, x, y, w, h).to_image())
    }

    /// Extract the identity vector from a localized face crop.
    ///
    /// Runs detection again on the crop and applies a 0.95 confidence gate
    /// before alignment and embedding. The gate is deliberately independent
    /// of the localizer's earlier, looser detection.
    pub fn embed(&mut self, crop: &GrayImage) -> Result<Embedding, PipelineError> {
        let (width, height) = crop.dimensions();

        let faces = self.detector.detect(crop.as_raw(), width, height)?;
        let face = faces.first().ok_or(PipelineError::NoFaceDetected)?;

        if face.confidence < EMBED_GATE_CONFIDENCE {
            return Err(PipelineError::GateRejected {
                confidence: face.confidence,
            });
        }

        let embedding = self.embedder.extract(crop.as_raw(), width, height, face)?;
        Ok(embedding)
    }
}

/// Zero out everything outside the centered ellipse.
pub fn apply_oval_mask(gray: &GrayImage) -> GrayImage {
    let (width, height) = gray.dimensions();
    let cx = width as f32 / 2.0;
    let cy = height as f32 / 2.0;
    let a = width as f32 * MASK_WIDTH_FRACTION / 2.0;
    let b = height as f32 * MASK_HEIGHT_FRACTION / 2.0;

    let mut out = gray.clone();
    for (x, y, pixel) in out.enumerate_pixels_mut() {
        let nx = (x as f32 + 0.5 - cx) / a;
        let ny = (y as f32 + 0.5 - cy) / b;
        if nx * nx + ny * ny > 1.0 {
            pixel.0[0] = 0;
        }
    }
    out
}

/// Clamp a float bounding box to image bounds; `None` when nothing remains.
fn clamp_region(
    x: f32,
    y: f32,
    w: f32,
    h: f32,
    img_w: u32,
    img_h: u32,
) -> Option<(u32, u32, u32, u32)> {
    let x0 = x.max(0.0) as u32;
    let y0 = y.max(0.0) as u32;
    if x0 >= img_w || y0 >= img_h {
        return None;
    }
    let x1 = ((x + w).ceil().max(0.0) as u32).min(img_w);
    let y1 = ((y + h).ceil().max(0.0) as u32).min(img_h);
    if x1 <= x0 || y1 <= y0 {
        return None;
    }
    Some((x0, y0, x1 - x0, y1 - y0))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_oval_mask_keeps_center_zeroes_corners() {
        let gray = GrayImage::from_pixel(100, 90, image::Luma([200u8]));
        let masked = apply_oval_mask(&gray);
        assert_eq!(masked.get_pixel(50, 45).0[0], 200);
        assert_eq!(masked.get_pixel(0, 0).0[0], 0);
        assert_eq!(masked.get_pixel(99, 0).0[0], 0);
        assert_eq!(masked.get_pixel(0, 89).0[0], 0);
        assert_eq!(masked.get_pixel(99, 89).0[0], 0);
    }

    #[test]
    fn test_oval_mask_axes_extents() {
        let gray = GrayImage::from_pixel(200, 200, image::Luma([255u8]));
        let masked = apply_oval_mask(&gray);
        // Horizontal semi-axis is 60 px: inside at x=101+55, outside at x=101+70.
        assert_ne!(masked.get_pixel(155, 100).0[0], 0);
        assert_eq!(masked.get_pixel(171, 100).0[0], 0);
        // Vertical semi-axis is ~66.7 px.
        assert_ne!(masked.get_pixel(100, 160).0[0], 0);
        assert_eq!(masked.get_pixel(100, 178).0[0], 0);
    }

    #[test]
    fn test_clamp_region_inside() {
        assert_eq!(clamp_region(10.0, 20.0, 30.0, 40.0, 100, 100), Some((10, 20, 31, 41)));
    }

    #[test]
    fn test_clamp_region_overhanging_edges() {
        let (x, y, w, h) = clamp_region(-5.0, -5.0, 50.0, 50.0, 100, 100).unwrap();
        assert_eq!((x, y), (0, 0));
        assert_eq!((w, h), (45, 45));

        let (x, y, w, h) = clamp_region(80.0, 90.0, 50.0, 50.0, 100, 100).unwrap();
        assert_eq!((x, y), (80, 90));
        assert_eq!((w, h), (20, 10));
    }

    #[test]
    fn test_clamp_region_fully_outside() {
        assert_eq!(clamp_region(150.0, 0.0, 20.0, 20.0, 100, 100), None);
        assert_eq!(clamp_region(0.0, 0.0, -5.0, 10.0, 100, 100), None);
    }
}
