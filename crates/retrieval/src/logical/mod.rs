//! Logical initial operations: dump model and the restore job.

mod restore;

use std::path::Path;
use std::sync::LazyLock;

use regex::Regex;
pub use restore::{RestoreJob, RestoreOptions, RESTORE_JOB_TYPE};
use serde::{Deserialize, Serialize};

/// Replaces every non-word character of a candidate database name.
static FILENAME_FORMATTER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\W").expect("valid filename pattern"));

/// On-disk shape of a logical dump.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DumpFormat {
    /// A single-database archive carrying `toc.dat`, restored with
    /// `pg_restore`.
    Custom,
    /// One subdirectory per database, each restored with `pg_restore`.
    /// Entries declared without a format restore this way as well.
    #[default]
    Directory,
    /// A SQL script restored with `psql`.
    Plain,
}

/// One database to be restored.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DbDefinition {
    /// Restore only these tables; ignored for plain-text dumps.
    pub tables: Vec<String>,
    pub format: DumpFormat,
    /// Database name embedded in a plain-text dump, recovered by the dump
    /// inspection. Never supplied through configuration.
    #[serde(skip)]
    pub db_name: Option<String>,
}

/// Derive a database name from a dump file name: the extension is stripped
/// and every non-word character becomes an underscore.
pub fn format_db_name(file_name: &str) -> String {
    let stem = Path::new(file_name)
        .file_stem()
        .and_then(|stem| stem.to_str())
        .unwrap_or(file_name);
    FILENAME_FORMATTER.replace_all(stem, "_").into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_db_name() {
        assert_eq!(format_db_name("legacy-db.sql"), "legacy_db");
        assert_eq!(format_db_name("orders.dump"), "orders");
        assert_eq!(format_db_name("prod db v2.sql"), "prod_db_v2");
        assert_eq!(format_db_name("users"), "users");
    }

    #[test]
    fn test_format_db_name_is_idempotent() {
        for name in ["legacy-db.sql", "prod db v2.sql", "users", "a.b.c"] {
            let formatted = format_db_name(name);
            assert_eq!(format_db_name(&formatted), formatted);
        }
    }

    #[test]
    fn test_dump_format_names() {
        assert_eq!(
            serde_json::to_string(&DumpFormat::Custom).unwrap(),
            "\"custom\""
        );
        assert_eq!(
            serde_json::from_str::<DumpFormat>("\"plain\"").unwrap(),
            DumpFormat::Plain
        );
        assert_eq!(DumpFormat::default(), DumpFormat::Directory);
    }
}
