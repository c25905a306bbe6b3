use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Label reported when no enrolled identity is within threshold.
pub const UNKNOWN_LABEL: &str = "unknown";

/// Distance reported when no distance was computed (empty gallery, missing descriptor).
pub const MAX_DISTANCE: f32 = 1.0;

/// Default maximum Euclidean distance for two descriptors to be the same identity.
pub const DEFAULT_MATCH_THRESHOLD: f32 = 0.6;

/// Face descriptor (embedding vector, typically 128-dimensional).
///
/// Serialized as a bare JSON array of numbers.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Descriptor(Vec<f32>);

impl Descriptor {
    pub fn new(values: Vec<f32>) -> Self {
        Self(values)
    }

    pub fn values(&self) -> &[f32] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// True when every component is a finite number.
    pub fn is_finite(&self) -> bool {
        self.0.iter().all(|v| v.is_finite())
    }

    /// Compute Euclidean distance between two descriptors.
    ///
    /// Returns `f32::INFINITY` when the dimensions differ.
    pub fn euclidean_distance(&self, other: &Descriptor) -> f32 {
        if self.len() != other.len() {
            return f32::INFINITY;
        }
        self.0
            .iter()
            .zip(other.0.iter())
            .map(|(a, b)| (a - b).powi(2))
            .sum::<f32>()
            .sqrt()
    }

    /// Compute cosine similarity between two descriptors.
    ///
    /// Returns a value in [-1, 1]. Higher = more similar. Zero vectors and
    /// mismatched dimensions yield 0.0.
    pub fn similarity(&self, other: &Descriptor) -> f32 {
        if self.len() != other.len() {
            return 0.0;
        }

        let mut dot = 0.0f32;
        let mut norm_a = 0.0f32;
        let mut norm_b = 0.0f32;

        for (a, b) in self.0.iter().zip(other.0.iter()) {
            dot += a * b;
            norm_a += a * a;
            norm_b += b * b;
        }

        let denom = norm_a.sqrt() * norm_b.sqrt();
        if denom > 0.0 { dot / denom } else { 0.0 }
    }
}

impl From<Vec<f32>> for Descriptor {
    fn from(values: Vec<f32>) -> Self {
        Self(values)
    }
}

/// Face region in source image/frame coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    #[serde(default)]
    pub confidence: f32,
}

/// A single facial landmark point.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f32,
    pub y: f32,
}

/// One face found by the external detector.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DetectionResult {
    pub bounding_box: BoundingBox,
    /// Absent when the detector could not embed the face.
    #[serde(default)]
    pub descriptor: Option<Descriptor>,
    /// Presentation only; never read by recognition.
    #[serde(default)]
    pub landmarks: Option<Vec<Point>>,
}

/// An enrolled identity as persisted in the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnrolledFace {
    pub label: String,
    pub descriptor: Descriptor,
    /// Informational only.
    pub enrolled_at: DateTime<Utc>,
}

/// Outcome of matching one query descriptor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecognitionResult {
    pub label: String,
    pub distance: f32,
    pub is_match: bool,
}

impl RecognitionResult {
    pub fn matched(label: impl Into<String>, distance: f32) -> Self {
        Self {
            label: label.into(),
            distance,
            is_match: true,
        }
    }

    pub fn unknown(distance: f32) -> Self {
        Self {
            label: UNKNOWN_LABEL.to_string(),
            distance,
            is_match: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_euclidean_distance_identical() {
        let a = Descriptor::new(vec![0.3, 0.4, 0.5]);
        assert_eq!(a.euclidean_distance(&a.clone()), 0.0);
    }

    #[test]
    fn test_euclidean_distance_known_value() {
        let a = Descriptor::new(vec![0.0, 0.0]);
        let b = Descriptor::new(vec![3.0, 4.0]);
        assert!((a.euclidean_distance(&b) - 5.0).abs() < 1e-6);
    }

    #[test]
    fn test_euclidean_distance_dimension_mismatch() {
        let a = Descriptor::new(vec![0.0, 0.0]);
        let b = Descriptor::new(vec![0.0, 0.0, 0.0]);
        assert_eq!(a.euclidean_distance(&b), f32::INFINITY);
    }

    #[test]
    fn test_cosine_similarity_orthogonal() {
        let a = Descriptor::new(vec![1.0, 0.0]);
        let b = Descriptor::new(vec![0.0, 1.0]);
        assert!(a.similarity(&b).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_similarity_zero_vector() {
        let a = Descriptor::new(vec![0.0, 0.0]);
        let b = Descriptor::new(vec![1.0, 0.0]);
        assert_eq!(a.similarity(&b), 0.0);
    }

    #[test]
    fn test_is_finite_rejects_nan() {
        assert!(Descriptor::new(vec![0.1, 0.2]).is_finite());
        assert!(!Descriptor::new(vec![0.1, f32::NAN]).is_finite());
    }

    #[test]
    fn test_enrolled_face_serializes_camel_case() {
        let face = EnrolledFace {
            label: "alice".into(),
            descriptor: Descriptor::new(vec![0.5, 0.25]),
            enrolled_at: "2024-03-01T12:00:00Z".parse().unwrap(),
        };
        let json = serde_json::to_value(&face).unwrap();
        assert_eq!(json["label"], "alice");
        assert_eq!(json["descriptor"], serde_json::json!([0.5, 0.25]));
        assert_eq!(json["enrolledAt"], "2024-03-01T12:00:00Z");
    }

    #[test]
    fn test_detection_without_descriptor_deserializes() {
        let json = r#"{"boundingBox":{"x":1,"y":2,"width":30,"height":40}}"#;
        let det: DetectionResult = serde_json::from_str(json).unwrap();
        assert!(det.descriptor.is_none());
        assert!(det.landmarks.is_none());
        assert_eq!(det.bounding_box.width, 30.0);
    }

    #[test]
    fn test_unknown_result_is_not_a_match() {
        let r = RecognitionResult::unknown(MAX_DISTANCE);
        assert_eq!(r.label, UNKNOWN_LABEL);
        assert!(!r.is_match);
        assert_eq!(r.distance, 1.0);
    }
}
