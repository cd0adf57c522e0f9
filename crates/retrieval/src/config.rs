//! Process-wide configuration and per-job wiring.

use std::sync::Arc;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{dbmarker::Marker, engine::ContainerEngine, pool::FsPool};

/// Database user assumed when the global configuration does not name one.
pub const DEFAULT_DB_USER: &str = "postgres";

/// Database name assumed when the global configuration does not name one.
pub const DEFAULT_DB_NAME: &str = "postgres";

/// Cluster identity shared by every retrieval job of this instance.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GlobalConfig {
    /// Unique identifier of this instance, used to derive container names.
    pub instance_id: String,
    pub database: DatabaseConfig,
}

/// Connection defaults for the managed PostgreSQL cluster.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DatabaseConfig {
    username: Option<String>,
    dbname: Option<String>,
}

impl DatabaseConfig {
    pub fn new(username: Option<String>, dbname: Option<String>) -> Self {
        Self { username, dbname }
    }

    pub fn user(&self) -> &str {
        self.username.as_deref().unwrap_or(DEFAULT_DB_USER)
    }

    pub fn name(&self) -> &str {
        self.dbname.as_deref().unwrap_or(DEFAULT_DB_NAME)
    }
}

/// Everything a retrieval job needs from its caller: a name, the free-form
/// options map, and handles to the shared subsystems.
pub struct JobConfig {
    pub name: String,
    /// Free-form options later decoded into the job's own schema.
    pub options: Value,
    pub engine: Arc<dyn ContainerEngine>,
    pub fs_pool: Arc<FsPool>,
    pub marker: Arc<Marker>,
}

/// Decode a free-form options map into a typed record.
///
/// Keys that the target schema does not know are ignored silently; a typo in
/// an option name therefore falls back to the option's default value.
pub fn unmarshal_options<T: serde::de::DeserializeOwned>(options: Value) -> Result<T> {
    serde_json::from_value(options).context("failed to unmarshal configuration options")
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::logical::{DumpFormat, RestoreOptions};

    #[test]
    fn test_database_defaults() {
        let database = DatabaseConfig::default();
        assert_eq!(database.user(), "postgres");
        assert_eq!(database.name(), "postgres");

        let database = DatabaseConfig::new(Some("app".to_string()), Some("inventory".to_string()));
        assert_eq!(database.user(), "app");
        assert_eq!(database.name(), "inventory");
    }

    #[test]
    fn test_unmarshal_restore_options() {
        let options: RestoreOptions = unmarshal_options(json!({
            "dumpLocation": "/var/lib/dblab/dump",
            "dockerImage": "postgres:14",
            "forceInit": true,
            "parallelJobs": 4,
            "configs": {"shared_buffers": "1GB"},
        }))
        .unwrap();

        assert_eq!(options.dump_location, "/var/lib/dblab/dump");
        assert_eq!(options.docker_image, "postgres:14");
        assert!(options.force_init);
        assert_eq!(options.parallel_jobs, 4);
        assert_eq!(options.configs["shared_buffers"], "1GB");
    }

    #[test]
    fn test_unmarshal_ignores_unknown_keys() {
        let options: RestoreOptions = unmarshal_options(json!({
            "dumpLocation": "/dump",
            "noSuchOption": 42,
        }))
        .unwrap();

        assert_eq!(options.dump_location, "/dump");
        assert!(!options.force_init);
    }

    #[test]
    fn test_unmarshal_declared_databases() {
        let options: RestoreOptions = unmarshal_options(json!({
            "dumpLocation": "/dump",
            "databases": {
                "orders": {"format": "custom", "tables": ["orders", "order_items"]},
                "users": {},
            },
        }))
        .unwrap();

        assert_eq!(options.databases.len(), 2);
        assert_eq!(options.databases["orders"].format, DumpFormat::Custom);
        assert_eq!(options.databases["orders"].tables.len(), 2);
        // An entry without an explicit format restores with pg_restore from a
        // per-database subdirectory.
        assert_eq!(options.databases["users"].format, DumpFormat::Directory);
    }
}
