//! Initial-snapshot finalization.
//!
//! Once the restore job has left a clean data directory behind, this job
//! registers a copy-on-write snapshot with the storage driver, named by the
//! persisted `dataStateAt` timestamp.

use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::config::{self, JobConfig};
use crate::dbmarker::Marker;

/// Job type of the logical initial snapshot.
pub const LOGICAL_SNAPSHOT_JOB_TYPE: &str = "logical-snapshot";

/// Handoff to the thin-clone storage driver.
#[async_trait]
pub trait CloneManager: Send + Sync {
    /// Register a snapshot of the current data directory state and return
    /// its id.
    async fn create_snapshot(&self, data_state_at: &str) -> Result<String>;
}

/// Options of a logical initial snapshot job.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LogicalSnapshotOptions {
    /// Host-side script run before the snapshot is taken.
    pub preprocessing_script: String,
}

/// A job preparing a logical initial snapshot.
pub struct LogicalSnapshotJob {
    name: String,
    clone_manager: Arc<dyn CloneManager>,
    marker: Arc<Marker>,
    options: LogicalSnapshotOptions,
}

impl LogicalSnapshotJob {
    pub fn new(cfg: JobConfig, clone_manager: Arc<dyn CloneManager>) -> Result<Self> {
        let options = config::unmarshal_options(cfg.options)?;

        Ok(Self {
            name: cfg.name,
            clone_manager,
            marker: cfg.marker,
            options,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Run the job.
    pub async fn run(&self) -> Result<()> {
        if !self.options.preprocessing_script.is_empty() {
            run_preprocessing_script(&self.options.preprocessing_script).await?;
        }

        let data_state_at = self.extract_data_state_at().await;

        let snapshot_id = self
            .clone_manager
            .create_snapshot(&data_state_at)
            .await
            .context("failed to create a snapshot")?;

        info!(snapshot = %snapshot_id, "initial snapshot has been created");

        Ok(())
    }

    /// Read the persisted mark. A missing or unreadable mark leaves the
    /// timestamp empty and the storage driver names the snapshot itself.
    async fn extract_data_state_at(&self) -> String {
        match self.marker.load_mark().await {
            Ok(mark) => mark.data_state_at,
            Err(err) => {
                warn!(error = %err, "failed to read the database mark");
                String::new()
            }
        }
    }
}

async fn run_preprocessing_script(script: &str) -> Result<()> {
    info!(script = %script, "running preprocessing script");

    let status = tokio::process::Command::new("bash")
        .arg(script)
        .status()
        .await
        .with_context(|| format!("failed to run preprocessing script {script}"))?;

    if !status.success() {
        anyhow::bail!("preprocessing script {script} exited with {status}");
    }

    Ok(())
}
