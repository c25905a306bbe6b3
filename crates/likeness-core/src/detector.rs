//! Seam for the external face detector.
//!
//! Detection, landmarking and descriptor extraction happen in a pretrained
//! model outside this crate. Implementors adapt that model to this trait.

use crate::types::DetectionResult;

/// What the detector should compute besides bounding boxes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DetectOptions {
    pub with_landmarks: bool,
    pub with_descriptors: bool,
}

impl Default for DetectOptions {
    fn default() -> Self {
        Self {
            with_landmarks: true,
            with_descriptors: true,
        }
    }
}

pub trait FaceDetector {
    /// Image or video frame type accepted by the detector.
    type Frame: ?Sized;
    type Error: std::error::Error + Send + Sync + 'static;

    fn detect_faces(
        &mut self,
        frame: &Self::Frame,
        options: DetectOptions,
    ) -> Result<Vec<DetectionResult>, Self::Error>;
}
