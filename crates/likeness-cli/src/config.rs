use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use likeness_core::{KeyValueStore, MetricKind, DEFAULT_MATCH_THRESHOLD, DEFAULT_NAMESPACE};
use likeness_store::{EncryptedStore, FileStore, SqliteStore};
use serde::Deserialize;

/// Persistence backend selected by configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    #[default]
    File,
    Sqlite,
}

impl std::str::FromStr for BackendKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "file" => Ok(BackendKind::File),
            "sqlite" => Ok(BackendKind::Sqlite),
            other => Err(format!("unknown backend '{other}' (expected file or sqlite)")),
        }
    }
}

/// CLI configuration: TOML file, then `LIKENESS_*` environment variables.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Where enrolled faces are persisted.
    pub backend: BackendKind,
    /// Directory for the JSON files or the SQLite database.
    pub data_dir: PathBuf,
    /// Key under which the enrolled set is stored.
    pub namespace: String,
    /// Maximum distance for a positive match.
    pub threshold: f32,
    pub metric: MetricKind,
    /// Enables encryption at rest when set.
    pub passphrase: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            backend: BackendKind::File,
            data_dir: default_data_dir(),
            namespace: DEFAULT_NAMESPACE.to_string(),
            threshold: DEFAULT_MATCH_THRESHOLD,
            metric: MetricKind::Euclidean,
            passphrase: None,
        }
    }
}

impl Config {
    /// Load from `path` (or `LIKENESS_CONFIG`) if given, then apply the environment.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = path
            .map(Path::to_path_buf)
            .or_else(|| std::env::var("LIKENESS_CONFIG").ok().map(PathBuf::from));

        let mut config = match path {
            Some(path) => {
                let text = std::fs::read_to_string(&path)
                    .with_context(|| format!("reading config {}", path.display()))?;
                Self::from_toml_str(&text)
                    .with_context(|| format!("parsing config {}", path.display()))?
            }
            None => Self::default(),
        };
        config.apply_env_with(|key| std::env::var(key).ok());
        Ok(config)
    }

    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: Self = toml::from_str(text)?;
        if let Err(e) = check_threshold(config.threshold) {
            bail!("threshold: {e}");
        }
        Ok(config)
    }

    /// Override fields from `LIKENESS_*` variables. Unparseable values are
    /// ignored with a warning.
    pub fn apply_env_with(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(v) = lookup("LIKENESS_BACKEND") {
            match v.parse() {
                Ok(kind) => self.backend = kind,
                Err(e) => tracing::warn!(error = %e, "ignoring LIKENESS_BACKEND"),
            }
        }
        if let Some(v) = lookup("LIKENESS_DATA_DIR") {
            self.data_dir = PathBuf::from(v);
        }
        if let Some(v) = lookup("LIKENESS_NAMESPACE") {
            self.namespace = v;
        }
        if let Some(v) = lookup("LIKENESS_THRESHOLD") {
            match parse_threshold(&v) {
                Ok(t) => self.threshold = t,
                Err(e) => tracing::warn!(error = %e, "ignoring LIKENESS_THRESHOLD"),
            }
        }
        if let Some(v) = lookup("LIKENESS_METRIC") {
            match v.parse() {
                Ok(metric) => self.metric = metric,
                Err(e) => tracing::warn!(error = %e, "ignoring LIKENESS_METRIC"),
            }
        }
        if let Some(v) = lookup("LIKENESS_PASSPHRASE") {
            self.passphrase = Some(v).filter(|p| !p.is_empty());
        }
    }

    /// Path to the SQLite database file.
    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join("faces.db")
    }

    /// Open the configured backend, wrapped in encryption when a passphrase is set.
    pub fn open_backend(&self) -> Result<Box<dyn KeyValueStore>> {
        let backend: Box<dyn KeyValueStore> = match self.backend {
            BackendKind::File => Box::new(
                FileStore::open(&self.data_dir)
                    .with_context(|| format!("opening {}", self.data_dir.display()))?,
            ),
            BackendKind::Sqlite => {
                let path = self.db_path();
                Box::new(
                    SqliteStore::open(&path)
                        .with_context(|| format!("opening {}", path.display()))?,
                )
            }
        };

        Ok(match &self.passphrase {
            Some(passphrase) => Box::new(EncryptedStore::with_passphrase(backend, passphrase)),
            None => backend,
        })
    }
}

/// Match thresholds are finite, non-negative distances.
pub fn check_threshold(threshold: f32) -> Result<f32, String> {
    if threshold.is_finite() && threshold >= 0.0 {
        Ok(threshold)
    } else {
        Err(format!("{threshold} is not a finite, non-negative distance"))
    }
}

/// Parse a threshold from text (environment, command line).
pub fn parse_threshold(s: &str) -> Result<f32, String> {
    let threshold: f32 = s
        .trim()
        .parse()
        .map_err(|_| format!("'{s}' is not a number"))?;
    check_threshold(threshold)
}

fn default_data_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        })
        .join("likeness")
}
