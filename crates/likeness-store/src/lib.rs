//! likeness-store — Persistence backends for the descriptor store.
//!
//! Every backend implements [`likeness_core::KeyValueStore`]; the
//! encrypted wrapper composes with any of them.

pub mod encrypted;
pub mod file;
pub mod sqlite;

pub use encrypted::{CryptoError, EncryptedStore};
pub use file::{FileStore, FileStoreError};
pub use sqlite::{SqliteStore, SqliteStoreError};
