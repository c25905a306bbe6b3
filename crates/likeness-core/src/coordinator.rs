//! Enrollment and recognition over a descriptor store and its matcher.
//!
//! The matcher is rebuilt synchronously after every committed mutation, so a
//! recognition issued after `enroll`/`remove` returns always sees the change.

use serde::Serialize;

use crate::detector::{DetectOptions, FaceDetector};
use crate::error::{StoreError, StoreResult};
use crate::kv::KeyValueStore;
use crate::matcher::{DistanceMetric, Euclidean, FaceMatcher};
use crate::store::{DescriptorStore, EnrollOutcome, LoadReport};
use crate::types::{Descriptor, DetectionResult, RecognitionResult, MAX_DISTANCE};

/// Decision taken when enrolling under a label that already exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DuplicateAction {
    Overwrite,
    Abort,
}

/// Asked before an existing label is overwritten.
pub trait DuplicateLabelPolicy {
    fn on_duplicate_label(&mut self, label: &str) -> DuplicateAction;
}

impl<F> DuplicateLabelPolicy for F
where
    F: FnMut(&str) -> DuplicateAction,
{
    fn on_duplicate_label(&mut self, label: &str) -> DuplicateAction {
        self(label)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct AlwaysOverwrite;

impl DuplicateLabelPolicy for AlwaysOverwrite {
    fn on_duplicate_label(&mut self, _label: &str) -> DuplicateAction {
        DuplicateAction::Overwrite
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NeverOverwrite;

impl DuplicateLabelPolicy for NeverOverwrite {
    fn on_duplicate_label(&mut self, _label: &str) -> DuplicateAction {
        DuplicateAction::Abort
    }
}

/// A detection paired with its recognition outcome.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LabeledDetection {
    pub detection: DetectionResult,
    pub result: RecognitionResult,
}

pub struct Coordinator<S, P = AlwaysOverwrite, M = Euclidean> {
    store: DescriptorStore<S>,
    matcher: FaceMatcher<M>,
    policy: P,
}

impl<S: KeyValueStore> Coordinator<S, AlwaysOverwrite, Euclidean> {
    pub fn new(store: DescriptorStore<S>) -> Self {
        Self::with_parts(store, AlwaysOverwrite, Euclidean)
    }
}

impl<S: KeyValueStore, P: DuplicateLabelPolicy> Coordinator<S, P, Euclidean> {
    pub fn with_policy(store: DescriptorStore<S>, policy: P) -> Self {
        Self::with_parts(store, policy, Euclidean)
    }
}

impl<S, P, M> Coordinator<S, P, M>
where
    S: KeyValueStore,
    P: DuplicateLabelPolicy,
    M: DistanceMetric,
{
    pub fn with_parts(store: DescriptorStore<S>, policy: P, metric: M) -> Self {
        let matcher = FaceMatcher::build_with(metric, store.faces());
        Self {
            store,
            matcher,
            policy,
        }
    }

    pub fn store(&self) -> &DescriptorStore<S> {
        &self.store
    }

    /// Tear down, handing back the store.
    pub fn into_store(self) -> DescriptorStore<S> {
        self.store
    }

    pub fn labels(&self) -> Vec<String> {
        self.store.list()
    }

    /// Enroll `descriptor` under `label`, consulting the duplicate-label
    /// policy when the label already exists. Invalid input is rejected
    /// before the policy is asked.
    pub fn enroll(&mut self, label: &str, descriptor: Descriptor) -> StoreResult<EnrollOutcome> {
        self.store.validate(label, &descriptor)?;
        if self.store.contains(label)
            && self.policy.on_duplicate_label(label) == DuplicateAction::Abort
        {
            tracing::info!(label, "enroll aborted: label already enrolled");
            return Ok(EnrollOutcome::Aborted);
        }

        let outcome = self.store.enroll(label, descriptor)?;
        self.rebuild_matcher();
        Ok(outcome)
    }

    /// Enroll the descriptor carried by `detection`.
    pub fn enroll_from_detection(
        &mut self,
        detection: &DetectionResult,
        label: &str,
    ) -> StoreResult<EnrollOutcome> {
        let descriptor = detection
            .descriptor
            .clone()
            .ok_or(StoreError::MissingDescriptor)?;
        self.enroll(label, descriptor)
    }

    pub fn remove(&mut self, label: &str) -> StoreResult<bool> {
        let removed = self.store.remove(label)?;
        if removed {
            self.rebuild_matcher();
        }
        Ok(removed)
    }

    pub fn clear_all(&mut self) -> StoreResult<()> {
        self.store.clear_all()?;
        self.rebuild_matcher();
        Ok(())
    }

    /// Re-read the persisted set and rebuild the matcher.
    pub fn reload(&mut self) -> StoreResult<LoadReport> {
        let report = self.store.load()?;
        self.rebuild_matcher();
        Ok(report)
    }

    /// Match one descriptor against the enrolled set.
    pub fn recognize(&self, descriptor: &Descriptor, threshold: f32) -> RecognitionResult {
        if self.store.is_empty() {
            return RecognitionResult::unknown(MAX_DISTANCE);
        }
        let result = self.matcher.find_best_match(descriptor, threshold);
        tracing::debug!(
            label = %result.label,
            distance = result.distance,
            threshold,
            "recognized"
        );
        result
    }

    /// One result per detection, in the same order. Detections without a
    /// descriptor yield `unknown` at [`MAX_DISTANCE`] without consulting the
    /// matcher.
    pub fn recognize_all(
        &self,
        detections: &[DetectionResult],
        threshold: f32,
    ) -> Vec<RecognitionResult> {
        detections
            .iter()
            .map(|det| match &det.descriptor {
                Some(descriptor) => self.recognize(descriptor, threshold),
                None => RecognitionResult::unknown(MAX_DISTANCE),
            })
            .collect()
    }

    /// Run the detector over `frame` and label every face it finds.
    pub fn recognize_frame<D: FaceDetector>(
        &self,
        detector: &mut D,
        frame: &D::Frame,
        threshold: f32,
    ) -> Result<Vec<LabeledDetection>, D::Error> {
        let options = DetectOptions {
            with_landmarks: true,
            with_descriptors: !self.store.is_empty(),
        };
        let detections = detector.detect_faces(frame, options)?;
        let results = self.recognize_all(&detections, threshold);
        Ok(detections
            .into_iter()
            .zip(results)
            .map(|(detection, result)| LabeledDetection { detection, result })
            .collect())
    }

    fn rebuild_matcher(&mut self) {
        self.matcher.rebuild(self.store.faces());
    }
}
