//! Experiments, checkpoints and heartbeats stored in a repository, and the [`Project`] that
//! loads, queries and writes them.

mod checkout;
pub mod checkpoint;
pub mod experiment;
pub mod heartbeat;
pub mod project;
mod serde_util;

use ks_core::{Error, Result};
use ks_repository::Repository;
use serde::de::DeserializeOwned;

pub use checkpoint::{Checkpoint, Goal, PrimaryMetric};
pub use experiment::{Experiment, ExperimentConfig};
pub use heartbeat::{Heartbeat, HeartbeatProcess, HEARTBEAT_REFRESH_INTERVAL};
pub use project::{CheckpointOrExperiment, CreateCheckpointArgs, CreateExperimentArgs, Project};

pub(crate) fn load_from_path<T: DeserializeOwned>(repo: &dyn Repository, path: &str) -> Result<T> {
    let contents = repo.get(path)?;
    serde_json::from_slice(&contents).map_err(|e| Error::other(format!("Parse error: {}", e)))
}
