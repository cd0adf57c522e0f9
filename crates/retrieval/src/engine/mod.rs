//! Narrow seam to the container engine.
//!
//! Retrieval jobs talk to the engine only through [`ContainerEngine`], so the
//! orchestration logic can be exercised against an in-memory fake.

mod docker;

use std::{path::PathBuf, time::Duration};

use anyhow::Result;
use async_trait::async_trait;
pub use docker::DockerEngine;
use serde_json::Value;

/// Health reported for a managed container.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthStatus {
    /// The container carries no health check, or no probe has run yet.
    None,
    Starting,
    Healthy,
    Unhealthy,
}

/// Snapshot of a container's health state.
#[derive(Debug, Clone)]
pub struct HealthProbe {
    pub status: HealthStatus,
    /// Output of the most recent probe, when the engine retains one.
    pub last_output: Option<String>,
}

/// Health-check declaration attached to a container at creation time.
#[derive(Debug, Clone)]
pub struct HealthcheckConfig {
    /// Probe command in engine convention, e.g. `["CMD-SHELL", "pg_isready"]`.
    pub test: Vec<String>,
    pub interval: Duration,
    pub timeout: Duration,
    pub retries: i64,
}

impl Default for HealthcheckConfig {
    fn default() -> Self {
        Self {
            test: Vec::new(),
            interval: Duration::from_secs(5),
            timeout: Duration::from_secs(5),
            retries: 3,
        }
    }
}

/// A host path exposed inside the container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BindMount {
    pub source: PathBuf,
    pub target: PathBuf,
}

/// Host-side container settings.
#[derive(Debug, Clone, Default)]
pub struct HostSettings {
    /// Engine-specific host options as declared in the job configuration.
    /// The engine implementation decodes them; unknown shapes are an error.
    pub options: Value,
    /// Bind mounts appended on top of the declared options.
    pub mounts: Vec<BindMount>,
}

/// Specification for creating a container.
#[derive(Debug, Clone, Default)]
pub struct ContainerSpec {
    pub name: String,
    pub image: String,
    /// Environment in `KEY=value` form.
    pub env: Vec<String>,
    pub labels: Vec<(String, String)>,
    pub healthcheck: Option<HealthcheckConfig>,
    pub host: HostSettings,
}

/// A command to run inside a container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecSpec {
    pub cmd: Vec<String>,
    /// Attach a pseudo-terminal so tools emitting progress keep writing.
    pub tty: bool,
}

impl ExecSpec {
    pub fn new(cmd: Vec<String>) -> Self {
        Self { cmd, tty: false }
    }

    pub fn with_tty(cmd: Vec<String>) -> Self {
        Self { cmd, tty: true }
    }
}

/// Operations a retrieval job needs from the container engine.
#[async_trait]
pub trait ContainerEngine: Send + Sync {
    /// Make an image available locally, pulling it if necessary.
    async fn pull_image(&self, image: &str) -> Result<()>;

    /// Create a container and return its id.
    async fn create_container(&self, spec: ContainerSpec) -> Result<String>;

    async fn start_container(&self, id: &str) -> Result<()>;

    /// Run a command inside the container; output is logged, a non-zero exit
    /// is an error.
    async fn exec_command(&self, id: &str, exec: ExecSpec) -> Result<()>;

    /// Run a command inside the container and return its combined output.
    async fn exec_with_output(&self, id: &str, exec: ExecSpec) -> Result<String>;

    /// Gracefully stop a container, killing it after `timeout`.
    async fn stop_container(&self, id: &str, timeout: Duration) -> Result<()>;

    /// Force-remove a container. Removing a container that no longer exists
    /// is not an error.
    async fn remove_container(&self, id: &str) -> Result<()>;

    /// Fetch the last `tail` lines of a container's output.
    async fn container_logs(&self, id: &str, tail: u32) -> Result<String>;

    /// Report the container's current health state.
    async fn container_health(&self, id: &str) -> Result<HealthProbe>;
}
