//! Readiness probing for the restore container.

use std::time::Duration;

use anyhow::Result;
use tokio::time::Instant;
use tracing::debug;

use crate::engine::{ContainerEngine, HealthStatus, HealthcheckConfig};

/// Interval between in-container health probes.
const HEALTH_CHECK_INTERVAL: Duration = Duration::from_secs(5);

/// Per-probe timeout.
const HEALTH_CHECK_TIMEOUT: Duration = Duration::from_secs(5);

/// Probe failures tolerated before the engine reports the container
/// unhealthy.
const HEALTH_CHECK_RETRIES: i64 = 5;

/// Overall readiness deadline.
const READINESS_DEADLINE: Duration = Duration::from_secs(300);

/// Interval between readiness polls of the engine.
const READINESS_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Raised when the readiness probe reports an unhealthy container, as
/// opposed to an engine failure. For a first-time restore this means the
/// data directory does not hold an initialized cluster yet.
#[derive(Debug)]
pub struct HealthCheckError {
    /// Output of the failing probe, when available.
    pub output: String,
}

impl std::fmt::Display for HealthCheckError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "health check failed: {}", self.output.trim())
    }
}

impl std::error::Error for HealthCheckError {}

/// Health-check declaration probing the cluster with `pg_isready`.
pub fn health_config(username: &str, dbname: &str) -> HealthcheckConfig {
    HealthcheckConfig {
        test: vec![
            "CMD-SHELL".to_string(),
            format!("pg_isready --username {username} --dbname {dbname}"),
        ],
        interval: HEALTH_CHECK_INTERVAL,
        timeout: HEALTH_CHECK_TIMEOUT,
        retries: HEALTH_CHECK_RETRIES,
    }
}

/// Poll the engine until the container reports healthy.
///
/// An unhealthy report surfaces as [`HealthCheckError`] so the caller can
/// initialize the cluster and retry; hitting the readiness deadline or an
/// engine failure is fatal.
pub async fn wait_container_ready(engine: &dyn ContainerEngine, id: &str) -> Result<()> {
    let deadline = Instant::now() + READINESS_DEADLINE;

    loop {
        let probe = engine.container_health(id).await?;

        match probe.status {
            HealthStatus::Healthy => return Ok(()),
            HealthStatus::Unhealthy => {
                return Err(HealthCheckError {
                    output: probe.last_output.unwrap_or_default(),
                }
                .into());
            }
            HealthStatus::Starting | HealthStatus::None => {
                debug!(container = %id, status = ?probe.status, "waiting for container readiness");
            }
        }

        if Instant::now() >= deadline {
            anyhow::bail!(
                "container {} did not become healthy within {}s",
                id,
                READINESS_DEADLINE.as_secs()
            );
        }

        tokio::time::sleep(READINESS_POLL_INTERVAL).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_health_config_probe_command() {
        let config = health_config("postgres", "postgres");
        assert_eq!(config.test[0], "CMD-SHELL");
        assert_eq!(
            config.test[1],
            "pg_isready --username postgres --dbname postgres"
        );
        assert_eq!(config.retries, 5);
    }

    #[test]
    fn test_health_check_error_classification() {
        let err: anyhow::Error = HealthCheckError {
            output: "no response".to_string(),
        }
        .into();
        assert!(err.downcast_ref::<HealthCheckError>().is_some());
    }
}
