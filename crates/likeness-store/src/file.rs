//! One JSON file per key inside a data directory.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::string::FromUtf8Error;

use likeness_core::{BackendError, KeyValueStore};
use tempfile::NamedTempFile;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum FileStoreError {
    #[error("invalid key '{0}': use only ASCII letters, digits, '.', '_' and '-'")]
    InvalidKey(String),
    #[error("failed to read {}: {source}", .path.display())]
    Read { path: PathBuf, source: io::Error },
    #[error("{} is not valid UTF-8: {source}", .path.display())]
    NotUtf8 {
        path: PathBuf,
        source: FromUtf8Error,
    },
    #[error("failed to write {}: {source}", .path.display())]
    Write { path: PathBuf, source: io::Error },
}

impl From<FileStoreError> for BackendError {
    fn from(err: FileStoreError) -> Self {
        match err {
            FileStoreError::NotUtf8 { .. } => BackendError::corrupt("file store", err),
            _ => BackendError::new("file store", err),
        }
    }
}

/// Stores `<key>.json` files under `dir`.
///
/// Writes go through a temporary file in the same directory that is
/// renamed over the target, so readers see either the old or the new value.
#[derive(Debug, Clone)]
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    /// Open (creating if needed) the data directory.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, FileStoreError> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|source| FileStoreError::Write {
            path: dir.clone(),
            source,
        })?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the file backing `key`.
    pub fn path_for(&self, key: &str) -> Result<PathBuf, FileStoreError> {
        let valid = !key.is_empty()
            && !key.starts_with('.')
            && key
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'));
        if !valid {
            return Err(FileStoreError::InvalidKey(key.to_string()));
        }
        Ok(self.dir.join(format!("{key}.json")))
    }

    fn write_atomic(&self, path: &Path, value: &str) -> Result<(), FileStoreError> {
        let write_err = |source: io::Error| FileStoreError::Write {
            path: path.to_path_buf(),
            source,
        };

        let mut tmp = NamedTempFile::new_in(&self.dir).map_err(write_err)?;
        tmp.write_all(value.as_bytes()).map_err(write_err)?;
        tmp.flush().map_err(write_err)?;
        tmp.as_file().sync_all().map_err(write_err)?;

        let file = tmp.persist(path).map_err(|err| write_err(err.error))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mut perms = file.metadata().map_err(write_err)?.permissions();
            perms.set_mode(0o600);
            file.set_permissions(perms).map_err(write_err)?;
        }
        #[cfg(not(unix))]
        drop(file);

        Ok(())
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> Result<Option<String>, BackendError> {
        let path = self.path_for(key)?;
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(source) => return Err(FileStoreError::Read { path, source }.into()),
        };
        match String::from_utf8(bytes) {
            Ok(value) => Ok(Some(value)),
            Err(source) => Err(FileStoreError::NotUtf8 { path, source }.into()),
        }
    }

    fn set(&mut self, key: &str, value: &str) -> Result<(), BackendError> {
        let path = self.path_for(key)?;
        self.write_atomic(&path, value)?;
        tracing::debug!(path = %path.display(), bytes = value.len(), "file store: wrote value");
        Ok(())
    }

    fn remove(&mut self, key: &str) -> Result<(), BackendError> {
        let path = self.path_for(key)?;
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(FileStoreError::Write { path, source }.into()),
        }
    }
}
