use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use likeness_core::{
    AlwaysOverwrite, Coordinator, Descriptor, DescriptorStore, DetectionResult, DuplicateAction,
    DuplicateLabelPolicy, EnrollOutcome, KeyValueStore, MetricKind,
};
use serde::Serialize;

mod config;

use config::Config;

#[derive(Parser)]
#[command(name = "likeness", about = "Face enrollment and recognition over detector output")]
struct Cli {
    /// TOML config file (defaults to $LIKENESS_CONFIG)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Override the data directory
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Enroll a face descriptor under a label
    Enroll {
        /// Label for this identity (case-sensitive)
        #[arg(short, long)]
        label: String,
        /// JSON file holding a descriptor array
        #[arg(long, conflicts_with = "detections", required_unless_present = "detections")]
        descriptor: Option<PathBuf>,
        /// JSON file holding detector output
        #[arg(long)]
        detections: Option<PathBuf>,
        /// Which detection to enroll from
        #[arg(long, default_value_t = 0, requires = "detections")]
        index: usize,
        /// Replace an existing label instead of aborting
        #[arg(short, long)]
        force: bool,
    },
    /// Recognize every face in a detector output file
    Recognize {
        /// JSON file holding detector output
        #[arg(long)]
        detections: PathBuf,
        /// Maximum distance for a match (defaults to the configured threshold)
        #[arg(short, long, value_parser = config::parse_threshold)]
        threshold: Option<f32>,
        /// Distance metric (euclidean or cosine)
        #[arg(long)]
        metric: Option<MetricKind>,
        #[arg(long)]
        json: bool,
    },
    /// List enrolled labels
    List {
        #[arg(long)]
        json: bool,
    },
    /// Remove an enrolled label
    Remove { label: String },
    /// Remove every enrolled label
    Clear,
    /// Show configuration and store status
    Status,
}

/// Overwrite only when `--force` was given.
struct ForcePolicy {
    force: bool,
}

impl DuplicateLabelPolicy for ForcePolicy {
    fn on_duplicate_label(&mut self, label: &str) -> DuplicateAction {
        tracing::debug!(label, force = self.force, "label already enrolled");
        if self.force {
            DuplicateAction::Overwrite
        } else {
            DuplicateAction::Abort
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RecognizedFace<'a> {
    index: usize,
    label: &'a str,
    distance: f32,
    is_match: bool,
    bounding_box: &'a likeness_core::BoundingBox,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let mut config = Config::load(cli.config.as_deref())?;
    if let Some(dir) = cli.data_dir {
        config.data_dir = dir;
    }
    tracing::debug!(backend = ?config.backend, data_dir = %config.data_dir.display(), "configuration loaded");

    let backend = config.open_backend()?;
    let store = DescriptorStore::open(backend, config.namespace.clone())
        .context("opening descriptor store")?;

    match cli.command {
        Commands::Enroll {
            label,
            descriptor,
            detections,
            index,
            force,
        } => {
            let mut coordinator =
                Coordinator::with_parts(store, ForcePolicy { force }, config.metric);
            let outcome = match (descriptor, detections) {
                (Some(path), _) => {
                    let descriptor: Descriptor = read_json(&path)?;
                    coordinator.enroll(&label, descriptor)?
                }
                (None, Some(path)) => {
                    let detections: Vec<DetectionResult> = read_json(&path)?;
                    let Some(detection) = detections.get(index) else {
                        bail!(
                            "{} holds {} detection(s); index {index} is out of range",
                            path.display(),
                            detections.len()
                        );
                    };
                    coordinator.enroll_from_detection(detection, &label)?
                }
                (None, None) => bail!("either --descriptor or --detections is required"),
            };
            match outcome {
                EnrollOutcome::Created => println!("Enrolled '{label}'"),
                EnrollOutcome::Overwritten => println!("Replaced descriptor for '{label}'"),
                EnrollOutcome::Aborted => {
                    bail!("'{label}' is already enrolled; pass --force to replace it")
                }
            }
        }
        Commands::Recognize {
            detections,
            threshold,
            metric,
            json,
        } => {
            let threshold = threshold.unwrap_or(config.threshold);
            let metric = metric.unwrap_or(config.metric);
            let coordinator = Coordinator::with_parts(store, AlwaysOverwrite, metric);

            let path = detections;
            let detections: Vec<DetectionResult> = read_json(&path)?;
            let results = coordinator.recognize_all(&detections, threshold);
            let faces: Vec<RecognizedFace<'_>> = detections
                .iter()
                .zip(&results)
                .enumerate()
                .map(|(index, (det, r))| RecognizedFace {
                    index,
                    label: &r.label,
                    distance: r.distance,
                    is_match: r.is_match,
                    bounding_box: &det.bounding_box,
                })
                .collect();

            if json {
                println!("{}", serde_json::to_string_pretty(&faces)?);
            } else if faces.is_empty() {
                println!("No faces in {}", path.display());
            } else {
                for face in &faces {
                    println!(
                        "#{} {} (distance {:.4}){}",
                        face.index,
                        face.label,
                        face.distance,
                        if face.is_match { "" } else { " — no match" }
                    );
                }
            }
        }
        Commands::List { json } => {
            let labels = store.list();
            if json {
                println!("{}", serde_json::to_string_pretty(&labels)?);
            } else if labels.is_empty() {
                println!("No faces enrolled");
            } else {
                for label in labels {
                    println!("{label}");
                }
            }
        }
        Commands::Remove { label } => {
            let mut coordinator = Coordinator::new(store);
            if coordinator.remove(&label)? {
                println!("Removed '{label}'");
            } else {
                println!("'{label}' is not enrolled");
            }
        }
        Commands::Clear => {
            let mut coordinator = Coordinator::new(store);
            let count = coordinator.labels().len();
            coordinator.clear_all()?;
            println!("Removed {count} face(s)");
        }
        Commands::Status => {
            print_status(&config, &store);
        }
    }

    Ok(())
}

fn print_status<S: KeyValueStore>(config: &Config, store: &DescriptorStore<S>) {
    let status = serde_json::json!({
        "version": env!("CARGO_PKG_VERSION"),
        "backend": format!("{:?}", config.backend).to_lowercase(),
        "data_dir": config.data_dir.display().to_string(),
        "namespace": store.namespace(),
        "enrolled": store.len(),
        "threshold": config.threshold,
        "metric": config.metric.to_string(),
        "encrypted": config.passphrase.is_some(),
    });
    println!("{status:#}");
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let text =
        std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("parsing {}", path.display()))
}
