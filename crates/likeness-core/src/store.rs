//! Enrolled descriptor set, persisted as one JSON record under a namespace key.
//!
//! Record layout: `{ "<label>": { "label", "descriptor": [..], "enrolledAt" } }`.
//! Every mutation writes the full record before it becomes visible in memory;
//! a failed write leaves the in-memory set untouched.

use std::collections::BTreeMap;

use chrono::Utc;

use crate::error::{StoreError, StoreResult};
use crate::kv::KeyValueStore;
use crate::types::{Descriptor, EnrolledFace};

/// Default key under which the enrolled set is persisted.
pub const DEFAULT_NAMESPACE: &str = "likeness.descriptors";

/// Result of an enroll call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnrollOutcome {
    /// New label.
    Created,
    /// Existing label; the previous descriptor was replaced.
    Overwritten,
    /// Existing label; the duplicate-label policy declined the overwrite.
    Aborted,
}

impl EnrollOutcome {
    pub fn is_committed(self) -> bool {
        !matches!(self, EnrollOutcome::Aborted)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadStatus {
    /// Nothing persisted yet.
    Missing,
    Loaded,
    /// Persisted data was unreadable; the store was reset to empty.
    Recovered,
}

#[derive(Debug)]
pub struct LoadReport {
    pub status: LoadStatus,
    pub loaded: usize,
    /// Individual records dropped because they failed validation.
    pub skipped: usize,
    /// Set when `status` is `Recovered`.
    pub error: Option<StoreError>,
}

/// Owns the enrolled set and its backend.
pub struct DescriptorStore<S> {
    backend: S,
    namespace: String,
    faces: BTreeMap<String, EnrolledFace>,
    revision: u64,
}

impl<S: KeyValueStore> DescriptorStore<S> {
    /// Construct a store over `backend` and restore the persisted set.
    ///
    /// Corrupt data is recovered as an empty set; backend read failures
    /// are returned.
    pub fn open(backend: S, namespace: impl Into<String>) -> StoreResult<Self> {
        let mut store = Self {
            backend,
            namespace: namespace.into(),
            faces: BTreeMap::new(),
            revision: 0,
        };
        let report = store.load()?;
        tracing::info!(
            namespace = %store.namespace,
            status = ?report.status,
            loaded = report.loaded,
            skipped = report.skipped,
            "descriptor store opened"
        );
        Ok(store)
    }

    /// Release the backend.
    pub fn into_backend(self) -> S {
        self.backend
    }

    pub fn backend(&self) -> &S {
        &self.backend
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Incremented on every committed mutation and on every load.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    /// Replace the in-memory set with the persisted one.
    pub fn load(&mut self) -> StoreResult<LoadReport> {
        let raw = match self.backend.get(&self.namespace) {
            Ok(raw) => raw,
            Err(e) if e.is_corrupt() => {
                self.revision += 1;
                return Ok(self.recover(e.to_string()));
            }
            Err(e) => return Err(e.into()),
        };
        self.revision += 1;

        let Some(raw) = raw else {
            self.faces.clear();
            return Ok(LoadReport {
                status: LoadStatus::Missing,
                loaded: 0,
                skipped: 0,
                error: None,
            });
        };

        let records: BTreeMap<String, serde_json::Value> = match serde_json::from_str(&raw) {
            Ok(records) => records,
            Err(e) => return Ok(self.recover(e.to_string())),
        };

        let mut faces = BTreeMap::new();
        let mut skipped = 0;
        for (key, value) in records {
            match decode_record(&key, value) {
                Ok(face) => {
                    faces.insert(key, face);
                }
                Err(reason) => {
                    tracing::warn!(label = %key, reason = %reason, "skipping invalid persisted face");
                    skipped += 1;
                }
            }
        }

        // Keep enroll's single-dimension rule for data written elsewhere.
        let dominant = dominant_dimension(faces.values());
        if let Some(dim) = dominant {
            let before = faces.len();
            faces.retain(|label, face| {
                let keep = face.descriptor.len() == dim;
                if !keep {
                    tracing::warn!(
                        label = %label,
                        dimension = face.descriptor.len(),
                        expected = dim,
                        "skipping persisted face with mismatched dimension"
                    );
                }
                keep
            });
            skipped += before - faces.len();
        }

        let loaded = faces.len();
        self.faces = faces;
        Ok(LoadReport {
            status: LoadStatus::Loaded,
            loaded,
            skipped,
            error: None,
        })
    }

    fn recover(&mut self, message: String) -> LoadReport {
        tracing::warn!(
            namespace = %self.namespace,
            error = %message,
            "persisted faces are corrupt; starting with an empty store"
        );
        self.faces.clear();
        LoadReport {
            status: LoadStatus::Recovered,
            loaded: 0,
            skipped: 0,
            error: Some(StoreError::PersistenceCorrupt {
                namespace: self.namespace.clone(),
                message,
            }),
        }
    }

    /// Write the current set to the backend.
    pub fn save(&mut self) -> StoreResult<()> {
        let payload = serde_json::to_string(&self.faces)?;
        self.backend.set(&self.namespace, &payload)?;
        Ok(())
    }

    /// Insert or overwrite `label`.
    pub fn enroll(&mut self, label: &str, descriptor: Descriptor) -> StoreResult<EnrollOutcome> {
        self.validate(label, &descriptor)?;

        let mut next = self.faces.clone();
        let previous = next.insert(
            label.to_string(),
            EnrolledFace {
                label: label.to_string(),
                descriptor,
                enrolled_at: Utc::now(),
            },
        );
        self.commit(next)?;

        let outcome = if previous.is_some() {
            EnrollOutcome::Overwritten
        } else {
            EnrollOutcome::Created
        };
        tracing::info!(label, outcome = ?outcome, total = self.faces.len(), "face enrolled");
        Ok(outcome)
    }

    /// Remove `label`. Returns `false` without writing when it is absent.
    pub fn remove(&mut self, label: &str) -> StoreResult<bool> {
        if !self.faces.contains_key(label) {
            tracing::debug!(label, "remove: label not enrolled");
            return Ok(false);
        }

        let mut next = self.faces.clone();
        next.remove(label);
        self.commit(next)?;

        tracing::info!(label, total = self.faces.len(), "face removed");
        Ok(true)
    }

    pub fn clear_all(&mut self) -> StoreResult<()> {
        let count = self.faces.len();
        self.commit(BTreeMap::new())?;
        tracing::info!(removed = count, "all faces cleared");
        Ok(())
    }

    /// Enrolled labels in ascending order.
    pub fn list(&self) -> Vec<String> {
        self.faces.keys().cloned().collect()
    }

    pub fn get(&self, label: &str) -> Option<&EnrolledFace> {
        self.faces.get(label)
    }

    pub fn contains(&self, label: &str) -> bool {
        self.faces.contains_key(label)
    }

    /// Enrolled faces in label order.
    pub fn faces(&self) -> impl Iterator<Item = &EnrolledFace> {
        self.faces.values()
    }

    pub fn len(&self) -> usize {
        self.faces.len()
    }

    pub fn is_empty(&self) -> bool {
        self.faces.is_empty()
    }

    /// Check `label` and `descriptor` as `enroll` would, without writing.
    pub(crate) fn validate(&self, label: &str, descriptor: &Descriptor) -> StoreResult<()> {
        if label.trim().is_empty() {
            return Err(StoreError::InvalidInput("label must not be empty".into()));
        }
        if descriptor.is_empty() {
            return Err(StoreError::InvalidInput("descriptor must not be empty".into()));
        }
        if !descriptor.is_finite() {
            return Err(StoreError::InvalidInput(
                "descriptor contains non-finite values".into(),
            ));
        }
        if let Some(other) = self
            .faces
            .values()
            .find(|f| f.label != label && f.descriptor.len() != descriptor.len())
        {
            return Err(StoreError::InvalidInput(format!(
                "descriptor has {} values but '{}' has {}",
                descriptor.len(),
                other.label,
                other.descriptor.len()
            )));
        }
        Ok(())
    }

    fn commit(&mut self, next: BTreeMap<String, EnrolledFace>) -> StoreResult<()> {
        let payload = serde_json::to_string(&next)?;
        self.backend.set(&self.namespace, &payload)?;
        self.faces = next;
        self.revision += 1;
        Ok(())
    }
}

/// Most common descriptor length; ties go to the length seen first.
fn dominant_dimension<'a>(faces: impl Iterator<Item = &'a EnrolledFace>) -> Option<usize> {
    let mut counts: Vec<(usize, usize)> = Vec::new();
    for face in faces {
        let dim = face.descriptor.len();
        match counts.iter_mut().find(|(d, _)| *d == dim) {
            Some((_, count)) => *count += 1,
            None => counts.push((dim, 1)),
        }
    }

    let mut best: Option<(usize, usize)> = None;
    for (dim, count) in counts {
        if best.map_or(true, |(_, c)| count > c) {
            best = Some((dim, count));
        }
    }
    best.map(|(dim, _)| dim)
}

fn decode_record(key: &str, value: serde_json::Value) -> Result<EnrolledFace, String> {
    let face: EnrolledFace = serde_json::from_value(value).map_err(|e| e.to_string())?;
    if face.label != key {
        return Err(format!("record label '{}' does not match its key", face.label));
    }
    if face.descriptor.is_empty() {
        return Err("empty descriptor".into());
    }
    if !face.descriptor.is_finite() {
        return Err("non-finite descriptor values".into());
    }
    Ok(face)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::{BackendError, MemoryStore};

    fn open_empty() -> DescriptorStore<MemoryStore> {
        DescriptorStore::open(MemoryStore::new(), DEFAULT_NAMESPACE).unwrap()
    }

    fn d(values: &[f32]) -> Descriptor {
        Descriptor::new(values.to_vec())
    }

    /// Backend whose writes can be made to fail.
    #[derive(Default)]
    struct FlakyStore {
        inner: MemoryStore,
        fail_writes: bool,
    }

    impl KeyValueStore for FlakyStore {
        fn get(&self, key: &str) -> Result<Option<String>, BackendError> {
            self.inner.get(key)
        }

        fn set(&mut self, key: &str, value: &str) -> Result<(), BackendError> {
            if self.fail_writes {
                return Err(BackendError::new("set", "write refused"));
            }
            self.inner.set(key, value)
        }

        fn remove(&mut self, key: &str) -> Result<(), BackendError> {
            self.inner.remove(key)
        }
    }

    #[test]
    fn test_enroll_then_list() {
        let mut store = open_empty();
        assert_eq!(store.enroll("bob", d(&[0.1, 0.2])).unwrap(), EnrollOutcome::Created);
        assert_eq!(store.enroll("alice", d(&[0.3, 0.4])).unwrap(), EnrollOutcome::Created);
        assert_eq!(store.list(), vec!["alice".to_string(), "bob".to_string()]);
        assert_eq!(store.backend().write_count(), 2);
    }

    #[test]
    fn test_enroll_existing_label_reports_overwrite() {
        let mut store = open_empty();
        store.enroll("alice", d(&[0.1, 0.2])).unwrap();
        let outcome = store.enroll("alice", d(&[0.9, 0.8])).unwrap();
        assert_eq!(outcome, EnrollOutcome::Overwritten);
        assert_eq!(store.len(), 1);
        assert_eq!(store.get("alice").unwrap().descriptor, d(&[0.9, 0.8]));
    }

    #[test]
    fn test_labels_are_case_sensitive() {
        let mut store = open_empty();
        store.enroll("Alice", d(&[0.1])).unwrap();
        store.enroll("alice", d(&[0.2])).unwrap();
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn test_enroll_rejects_empty_label() {
        let mut store = open_empty();
        let err = store.enroll("  ", d(&[0.1])).unwrap_err();
        assert!(matches!(err, StoreError::InvalidInput(_)));
        assert_eq!(store.backend().write_count(), 0);
    }

    #[test]
    fn test_enroll_rejects_empty_descriptor() {
        let mut store = open_empty();
        let err = store.enroll("alice", Descriptor::default()).unwrap_err();
        assert!(matches!(err, StoreError::InvalidInput(_)));
    }

    #[test]
    fn test_enroll_rejects_non_finite_descriptor() {
        let mut store = open_empty();
        let err = store.enroll("alice", d(&[0.1, f32::INFINITY])).unwrap_err();
        assert!(matches!(err, StoreError::InvalidInput(_)));
    }

    #[test]
    fn test_enroll_rejects_dimension_mismatch() {
        let mut store = open_empty();
        store.enroll("alice", d(&[0.1, 0.2])).unwrap();
        let err = store.enroll("bob", d(&[0.1, 0.2, 0.3])).unwrap_err();
        assert!(matches!(err, StoreError::InvalidInput(_)));
        // Overwriting the only entry may change dimension.
        store.enroll("alice", d(&[0.1, 0.2, 0.3])).unwrap();
    }

    #[test]
    fn test_remove_absent_label_does_not_write() {
        let mut store = open_empty();
        store.enroll("alice", d(&[0.1])).unwrap();
        let writes = store.backend().write_count();
        assert!(!store.remove("carol").unwrap());
        assert_eq!(store.backend().write_count(), writes);
        assert_eq!(store.list(), vec!["alice".to_string()]);
    }

    #[test]
    fn test_remove_present_label_persists() {
        let mut store = open_empty();
        store.enroll("alice", d(&[0.1])).unwrap();
        assert!(store.remove("alice").unwrap());
        assert!(store.is_empty());

        let reopened = DescriptorStore::open(store.into_backend(), DEFAULT_NAMESPACE).unwrap();
        assert!(reopened.is_empty());
    }

    #[test]
    fn test_clear_all_persists_empty_set() {
        let mut store = open_empty();
        store.enroll("alice", d(&[0.1])).unwrap();
        store.enroll("bob", d(&[0.2])).unwrap();
        store.clear_all().unwrap();
        assert!(store.is_empty());

        let backend = store.into_backend();
        assert_eq!(backend.get(DEFAULT_NAMESPACE).unwrap().as_deref(), Some("{}"));
    }

    #[test]
    fn test_save_load_round_trip() {
        let mut store = open_empty();
        store.enroll("alice", d(&[0.125, -0.5, 0.333_333_34])).unwrap();
        store.enroll("bob", d(&[1.0e-7, 2.5, -3.75])).unwrap();
        store.save().unwrap();
        let original: Vec<EnrolledFace> = store.faces().cloned().collect();

        let reopened = DescriptorStore::open(store.into_backend(), DEFAULT_NAMESPACE).unwrap();
        let restored: Vec<EnrolledFace> = reopened.faces().cloned().collect();
        assert_eq!(restored.len(), original.len());
        for (a, b) in original.iter().zip(restored.iter()) {
            assert_eq!(a.label, b.label);
            for (x, y) in a.descriptor.values().iter().zip(b.descriptor.values()) {
                assert!((x - y).abs() < 1e-6);
            }
        }
    }

    #[test]
    fn test_load_missing_record() {
        let mut store = open_empty();
        let report = store.load().unwrap();
        assert_eq!(report.status, LoadStatus::Missing);
        assert!(store.is_empty());
    }

    #[test]
    fn test_load_corrupt_record_recovers_empty() {
        let mut kv = MemoryStore::new();
        kv.set(DEFAULT_NAMESPACE, "{not json").unwrap();
        let mut store = DescriptorStore::open(kv, DEFAULT_NAMESPACE).unwrap();
        assert!(store.is_empty());

        let report = store.load().unwrap();
        assert_eq!(report.status, LoadStatus::Recovered);
        assert!(matches!(report.error, Some(StoreError::PersistenceCorrupt { .. })));

        // The store stays usable and overwrites the corrupt record.
        store.enroll("alice", d(&[0.1])).unwrap();
        assert_eq!(store.list(), vec!["alice".to_string()]);
    }

    #[test]
    fn test_load_skips_invalid_records() {
        let mut kv = MemoryStore::new();
        let payload = serde_json::json!({
            "alice": {"label": "alice", "descriptor": [0.1, 0.2], "enrolledAt": "2024-03-01T12:00:00Z"},
            "bob": {"label": "mallory", "descriptor": [0.1, 0.2], "enrolledAt": "2024-03-01T12:00:00Z"},
            "carol": {"label": "carol", "descriptor": [], "enrolledAt": "2024-03-01T12:00:00Z"},
            "dave": {"label": "dave"}
        });
        kv.set(DEFAULT_NAMESPACE, &payload.to_string()).unwrap();

        let mut store = DescriptorStore::open(kv, DEFAULT_NAMESPACE).unwrap();
        let report = store.load().unwrap();
        assert_eq!(report.status, LoadStatus::Loaded);
        assert_eq!(report.loaded, 1);
        assert_eq!(report.skipped, 3);
        assert_eq!(store.list(), vec!["alice".to_string()]);
    }

    #[test]
    fn test_load_keeps_dominant_dimension() {
        let mut kv = MemoryStore::new();
        let payload = serde_json::json!({
            "a": {"label": "a", "descriptor": [0.1, 0.2], "enrolledAt": "2024-03-01T12:00:00Z"},
            "b": {"label": "b", "descriptor": [0.1, 0.2, 0.3], "enrolledAt": "2024-03-01T12:00:00Z"},
            "c": {"label": "c", "descriptor": [0.4, 0.5, 0.6], "enrolledAt": "2024-03-01T12:00:00Z"}
        });
        kv.set(DEFAULT_NAMESPACE, &payload.to_string()).unwrap();

        let mut store = DescriptorStore::open(kv, DEFAULT_NAMESPACE).unwrap();
        let report = store.load().unwrap();
        assert_eq!(report.loaded, 2);
        assert_eq!(report.skipped, 1);
        assert_eq!(store.list(), vec!["b".to_string(), "c".to_string()]);

        store.enroll("d", d(&[0.7, 0.8, 0.9])).unwrap();
        assert!(store.enroll("e", d(&[0.7, 0.8])).is_err());
    }

    #[test]
    fn test_load_dimension_tie_keeps_first_label() {
        let mut kv = MemoryStore::new();
        let payload = serde_json::json!({
            "a": {"label": "a", "descriptor": [0.1, 0.2], "enrolledAt": "2024-03-01T12:00:00Z"},
            "b": {"label": "b", "descriptor": [0.1, 0.2, 0.3], "enrolledAt": "2024-03-01T12:00:00Z"}
        });
        kv.set(DEFAULT_NAMESPACE, &payload.to_string()).unwrap();

        let mut store = DescriptorStore::open(kv, DEFAULT_NAMESPACE).unwrap();
        assert_eq!(store.list(), vec!["a".to_string()]);
        store.enroll("c", d(&[0.3, 0.4])).unwrap();
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn test_load_corrupt_backend_value_recovers_empty() {
        struct DamagedStore;

        impl KeyValueStore for DamagedStore {
            fn get(&self, _key: &str) -> Result<Option<String>, BackendError> {
                Err(BackendError::corrupt("damaged", "invalid bytes"))
            }

            fn set(&mut self, _key: &str, _value: &str) -> Result<(), BackendError> {
                Ok(())
            }

            fn remove(&mut self, _key: &str) -> Result<(), BackendError> {
                Ok(())
            }
        }

        let mut store = DescriptorStore::open(DamagedStore, DEFAULT_NAMESPACE).unwrap();
        assert!(store.is_empty());
        let report = store.load().unwrap();
        assert_eq!(report.status, LoadStatus::Recovered);
        assert!(matches!(report.error, Some(StoreError::PersistenceCorrupt { .. })));
    }

    #[test]
    fn test_load_backend_read_failure_is_returned() {
        struct UnreachableStore;

        impl KeyValueStore for UnreachableStore {
            fn get(&self, _key: &str) -> Result<Option<String>, BackendError> {
                Err(BackendError::new("unreachable", "connection refused"))
            }

            fn set(&mut self, _key: &str, _value: &str) -> Result<(), BackendError> {
                Ok(())
            }

            fn remove(&mut self, _key: &str) -> Result<(), BackendError> {
                Ok(())
            }
        }

        let result = DescriptorStore::open(UnreachableStore, DEFAULT_NAMESPACE);
        assert!(matches!(result, Err(StoreError::Backend(_))));
    }

    #[test]
    fn test_failed_write_leaves_memory_unchanged() {
        let backend = FlakyStore::default();
        let mut store = DescriptorStore::open(backend, DEFAULT_NAMESPACE).unwrap();
        store.enroll("alice", d(&[0.1])).unwrap();
        let revision = store.revision();

        store.backend.fail_writes = true;
        assert!(matches!(
            store.enroll("bob", d(&[0.2])),
            Err(StoreError::Backend(_))
        ));
        assert!(matches!(store.remove("alice"), Err(StoreError::Backend(_))));
        assert!(store.clear_all().is_err());

        assert_eq!(store.list(), vec!["alice".to_string()]);
        assert_eq!(store.revision(), revision);
    }

    #[test]
    fn test_namespaces_are_isolated() {
        let mut a = open_empty();
        a.enroll("alice", d(&[0.1])).unwrap();
        let b = DescriptorStore::open(a.into_backend(), "other").unwrap();
        assert!(b.is_empty());
    }
}
