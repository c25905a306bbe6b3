//! likeness-core — Face enrollment and recognition over externally computed descriptors.
//!
//! Detection and descriptor extraction are delegated to an external model
//! through [`FaceDetector`]. This crate keeps the enrolled set, persists it
//! through a [`KeyValueStore`], and matches queries by distance threshold.

pub mod coordinator;
pub mod detector;
pub mod error;
pub mod kv;
pub mod matcher;
pub mod store;
pub mod types;

pub use coordinator::{
    AlwaysOverwrite, Coordinator, DuplicateAction, DuplicateLabelPolicy, LabeledDetection,
    NeverOverwrite,
};
pub use detector::{DetectOptions, FaceDetector};
pub use error::{StoreError, StoreResult};
pub use kv::{BackendError, KeyValueStore, MemoryStore};
pub use matcher::{CosineDistance, DistanceMetric, Euclidean, FaceMatcher, MetricKind};
pub use store::{DescriptorStore, EnrollOutcome, LoadReport, LoadStatus, DEFAULT_NAMESPACE};
pub use types::{
    BoundingBox, Descriptor, DetectionResult, EnrolledFace, Point, RecognitionResult,
    DEFAULT_MATCH_THRESHOLD, MAX_DISTANCE, UNKNOWN_LABEL,
};
