//! Conventions for the ephemeral restore container.

use std::time::Duration;

use tracing::{error, warn};

use crate::engine::ContainerEngine;

/// Prefix of the restore container name; the instance id is appended.
pub const RESTORE_CONTAINER_PREFIX: &str = "dblab_lr_";

/// Label carrying the container's role.
pub const CONTROL_LABEL: &str = "dblab_control";

/// Label carrying the owning instance id.
pub const INSTANCE_ID_LABEL: &str = "dblab_instance_id";

/// Role value for restore containers.
pub const RESTORE_LABEL_VALUE: &str = "restore";

/// Timeout for a graceful PostgreSQL shutdown.
pub const DEFAULT_STOP_TIMEOUT: Duration = Duration::from_secs(600);

/// Timeout before a stopping container is killed.
pub const CONTAINER_STOP_TIMEOUT: Duration = Duration::from_secs(30);

/// Log lines fetched from a failed container for diagnostics.
pub const ERROR_LOG_TAIL: u32 = 50;

pub fn restore_container_name(instance_id: &str) -> String {
    format!("{RESTORE_CONTAINER_PREFIX}{instance_id}")
}

pub fn restore_labels(instance_id: &str) -> Vec<(String, String)> {
    vec![
        (CONTROL_LABEL.to_string(), RESTORE_LABEL_VALUE.to_string()),
        (INSTANCE_ID_LABEL.to_string(), instance_id.to_string()),
    ]
}

/// Dump a failed container's recent output to the error stream. Best effort;
/// the container may already be gone.
pub async fn print_container_logs(engine: &dyn ContainerEngine, container: &str) {
    match engine.container_logs(container, ERROR_LOG_TAIL).await {
        Ok(logs) if !logs.trim().is_empty() => {
            error!(container = %container, logs = %logs, "restore container logs");
        }
        Ok(_) => {}
        Err(err) => {
            warn!(container = %container, error = %err, "failed to fetch container logs");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_restore_container_name() {
        assert_eq!(restore_container_name("test1"), "dblab_lr_test1");
    }

    #[test]
    fn test_restore_labels() {
        let labels = restore_labels("test1");
        assert!(labels.contains(&("dblab_control".to_string(), "restore".to_string())));
        assert!(labels.contains(&("dblab_instance_id".to_string(), "test1".to_string())));
    }
}
