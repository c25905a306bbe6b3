//! Key-value persistence seam for the descriptor store.
//!
//! Each read or write is one scoped operation: a reader never observes a
//! partially written value.

use std::collections::HashMap;
use std::error::Error as StdError;

use thiserror::Error;

/// Failure reported by a key-value backend.
#[derive(Error, Debug)]
#[error("{context}: {source}")]
pub struct BackendError {
    context: String,
    #[source]
    source: Box<dyn StdError + Send + Sync + 'static>,
    corrupt: bool,
}

impl BackendError {
    pub fn new(
        context: impl Into<String>,
        source: impl Into<Box<dyn StdError + Send + Sync + 'static>>,
    ) -> Self {
        Self {
            context: context.into(),
            source: source.into(),
            corrupt: false,
        }
    }

    /// The backend read the value but its bytes are not usable text.
    pub fn corrupt(
        context: impl Into<String>,
        source: impl Into<Box<dyn StdError + Send + Sync + 'static>>,
    ) -> Self {
        Self {
            corrupt: true,
            ..Self::new(context, source)
        }
    }

    /// Whether the stored value itself is damaged, as opposed to the
    /// backend failing to serve it.
    pub fn is_corrupt(&self) -> bool {
        self.corrupt
    }

    pub fn context(&self) -> &str {
        &self.context
    }
}

/// Text values addressed by string keys.
pub trait KeyValueStore {
    fn get(&self, key: &str) -> Result<Option<String>, BackendError>;
    fn set(&mut self, key: &str, value: &str) -> Result<(), BackendError>;
    fn remove(&mut self, key: &str) -> Result<(), BackendError>;
}

impl<S: KeyValueStore + ?Sized> KeyValueStore for Box<S> {
    fn get(&self, key: &str) -> Result<Option<String>, BackendError> {
        (**self).get(key)
    }

    fn set(&mut self, key: &str, value: &str) -> Result<(), BackendError> {
        (**self).set(key, value)
    }

    fn remove(&mut self, key: &str) -> Result<(), BackendError> {
        (**self).remove(key)
    }
}

/// In-process backend. Contents are lost when dropped.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    entries: HashMap<String, String>,
    writes: usize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of `set`/`remove` calls served so far.
    pub fn write_count(&self) -> usize {
        self.writes
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>, BackendError> {
        Ok(self.entries.get(key).cloned())
    }

    fn set(&mut self, key: &str, value: &str) -> Result<(), BackendError> {
        self.writes += 1;
        self.entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&mut self, key: &str) -> Result<(), BackendError> {
        self.writes += 1;
        self.entries.remove(key);
        Ok(())
    }
}
