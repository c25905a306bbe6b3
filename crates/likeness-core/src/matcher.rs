//! Nearest-neighbour matching of query descriptors against enrolled faces.
//!
//! The matcher is an immutable snapshot: it is rebuilt from scratch whenever
//! the enrolled set changes and is never updated in place.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::types::{Descriptor, EnrolledFace, RecognitionResult, MAX_DISTANCE};

/// Distance between two descriptors. Smaller = more similar.
pub trait DistanceMetric {
    fn distance(&self, a: &Descriptor, b: &Descriptor) -> f32;
}

/// Euclidean (L2) distance.
#[derive(Debug, Clone, Copy, Default)]
pub struct Euclidean;

impl DistanceMetric for Euclidean {
    fn distance(&self, a: &Descriptor, b: &Descriptor) -> f32 {
        a.euclidean_distance(b)
    }
}

/// Cosine distance, `1 - cosine_similarity`, in [0, 2].
#[derive(Debug, Clone, Copy, Default)]
pub struct CosineDistance;

impl DistanceMetric for CosineDistance {
    fn distance(&self, a: &Descriptor, b: &Descriptor) -> f32 {
        if a.len() != b.len() {
            return f32::INFINITY;
        }
        (1.0 - a.similarity(b)).clamp(0.0, 2.0)
    }
}

/// Metric chosen at runtime (configuration, CLI flags).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricKind {
    #[default]
    Euclidean,
    Cosine,
}

impl DistanceMetric for MetricKind {
    fn distance(&self, a: &Descriptor, b: &Descriptor) -> f32 {
        match self {
            MetricKind::Euclidean => Euclidean.distance(a, b),
            MetricKind::Cosine => CosineDistance.distance(a, b),
        }
    }
}

impl FromStr for MetricKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "euclidean" | "l2" => Ok(MetricKind::Euclidean),
            "cosine" => Ok(MetricKind::Cosine),
            other => Err(format!("unknown metric '{other}' (expected euclidean or cosine)")),
        }
    }
}

impl fmt::Display for MetricKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MetricKind::Euclidean => f.write_str("euclidean"),
            MetricKind::Cosine => f.write_str("cosine"),
        }
    }
}

/// Snapshot of enrolled (label, descriptor) pairs searched by linear scan.
#[derive(Debug, Clone, Default)]
pub struct FaceMatcher<M = Euclidean> {
    metric: M,
    entries: Vec<(String, Descriptor)>,
}

impl FaceMatcher<Euclidean> {
    pub fn build<'a>(faces: impl IntoIterator<Item = &'a EnrolledFace>) -> Self {
        Self::build_with(Euclidean, faces)
    }
}

impl<M: DistanceMetric> FaceMatcher<M> {
    pub fn build_with<'a>(metric: M, faces: impl IntoIterator<Item = &'a EnrolledFace>) -> Self {
        let entries: Vec<_> = faces
            .into_iter()
            .map(|f| (f.label.clone(), f.descriptor.clone()))
            .collect();
        tracing::debug!(entries = entries.len(), "matcher built");
        Self { metric, entries }
    }

    /// Rebuild from a new enrolled set, keeping the metric.
    pub fn rebuild<'a>(&mut self, faces: impl IntoIterator<Item = &'a EnrolledFace>) {
        self.entries = faces
            .into_iter()
            .map(|f| (f.label.clone(), f.descriptor.clone()))
            .collect();
        tracing::debug!(entries = self.entries.len(), "matcher rebuilt");
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Find the closest enrolled label to `query`.
    ///
    /// Returns the match when the minimum distance is `<= threshold`, and
    /// `unknown` carrying that minimum distance otherwise. With nothing to
    /// compare against (empty matcher or empty query) the result is
    /// `unknown` with [`MAX_DISTANCE`] and no distances are computed.
    ///
    /// Equal minimum distances resolve to the entry built first. This is an
    /// implementation detail, not a guarantee.
    pub fn find_best_match(&self, query: &Descriptor, threshold: f32) -> RecognitionResult {
        if self.entries.is_empty() || query.is_empty() {
            return RecognitionResult::unknown(MAX_DISTANCE);
        }

        let mut best_dist = f32::INFINITY;
        let mut best_idx: Option<usize> = None;

        for (i, (_, descriptor)) in self.entries.iter().enumerate() {
            let dist = self.metric.distance(query, descriptor);
            if dist < best_dist {
                best_dist = dist;
                best_idx = Some(i);
            }
        }

        match best_idx {
            Some(idx) if best_dist <= threshold => {
                RecognitionResult::matched(self.entries[idx].0.clone(), best_dist)
            }
            Some(_) => RecognitionResult::unknown(best_dist),
            // Every distance was NaN or infinite (dimension mismatch, non-finite query).
            None => RecognitionResult::unknown(MAX_DISTANCE),
        }
    }
}
