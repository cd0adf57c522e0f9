//! Helpers for orchestrating PostgreSQL inside the restore container.

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDateTime, Utc};
use tokio::io::AsyncWriteExt;
use tracing::{info, warn};
use uuid::Uuid;

use crate::cont::CONTAINER_STOP_TIMEOUT;
use crate::engine::{ContainerEngine, ExecSpec};

/// Canonical textual format of `dataStateAt` timestamps.
pub const DATA_STATE_AT_FORMAT: &str = "%Y%m%d%H%M%S";

/// Marker preceding the creation timestamp in `pg_restore --list` output.
const ARCHIVE_CREATED_AT: &str = "Archive created at";

/// Timestamp layout used in the dump's table of contents.
const ARCHIVE_TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Configuration file receiving parameter overrides inside the data
/// directory.
const AUTO_CONF_FILE: &str = "postgresql.auto.conf";

/// Connection identity for composing client-tool invocations.
#[derive(Debug, Clone)]
pub struct Connection {
    pub username: String,
    pub db_name: String,
}

/// Check whether a directory exists and holds no entries.
pub async fn is_empty_directory(path: impl AsRef<Path>) -> Result<bool> {
    let mut entries = tokio::fs::read_dir(path.as_ref())
        .await
        .context("failed to read directory")?;
    Ok(entries
        .next_entry()
        .await
        .context("failed to read directory entry")?
        .is_none())
}

/// Generate a throwaway superuser password for the ephemeral container.
pub fn generate_password() -> String {
    Uuid::new_v4().simple().to_string()
}

/// Quote a string as a SQL literal: single quotes are doubled and an escape
/// prefix is added when the value carries backslashes.
pub fn quote_literal(literal: &str) -> String {
    let escaped = literal.replace('\'', "''");
    if escaped.contains('\\') {
        format!("E'{}'", escaped.replace('\\', "\\\\"))
    } else {
        format!("'{escaped}'")
    }
}

/// Initialize a PostgreSQL cluster in the bound data directory and start the
/// server, for containers whose health check reports no cluster yet.
pub async fn setup_pg_data(
    engine: &dyn ContainerEngine,
    id: &str,
    data_dir: &Path,
) -> Result<()> {
    info!(data_dir = %data_dir.display(), "initializing PostgreSQL data directory");

    let cmd = build_setup_pg_data_command(data_dir);
    engine
        .exec_command(id, ExecSpec::new(cmd))
        .await
        .context("failed to initialize the data directory")
}

fn build_setup_pg_data_command(data_dir: &Path) -> Vec<String> {
    let dir = data_dir.display();
    vec![
        "sh".to_string(),
        "-c".to_string(),
        format!(
            "chown -R postgres:postgres {dir} && \
             su - postgres -c 'initdb --pgdata={dir}' && \
             su - postgres -c 'pg_ctl --pgdata={dir} --wait start'"
        ),
    ]
}

/// Merge PostgreSQL parameter overrides into the data directory before the
/// cluster serves restore traffic.
pub async fn update_configs(data_dir: &Path, configs: &BTreeMap<String, String>) -> Result<()> {
    let path = data_dir.join(AUTO_CONF_FILE);

    let mut contents = String::new();
    for (key, value) in configs {
        contents.push_str(&format!("{key} = '{value}'\n"));
    }

    let mut file = tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .await
        .with_context(|| format!("failed to open {}", path.display()))?;

    file.write_all(contents.as_bytes())
        .await
        .with_context(|| format!("failed to update {}", path.display()))
}

/// Stop PostgreSQL gracefully; if the server does not come down within the
/// timeout, stop the container instead.
pub async fn stop_postgres(
    engine: &dyn ContainerEngine,
    id: &str,
    data_dir: &Path,
    timeout: Duration,
) -> Result<()> {
    let cmd = build_stop_postgres_command(data_dir, timeout);

    if let Err(err) = engine.exec_command(id, ExecSpec::new(cmd)).await {
        warn!(error = %err, "graceful PostgreSQL stop failed, stopping the container");
        return engine
            .stop_container(id, CONTAINER_STOP_TIMEOUT)
            .await
            .context("failed to stop container after shutdown timeout");
    }

    Ok(())
}

fn build_stop_postgres_command(data_dir: &Path, timeout: Duration) -> Vec<String> {
    vec![
        "su".to_string(),
        "-".to_string(),
        "postgres".to_string(),
        "-c".to_string(),
        format!(
            "pg_ctl --pgdata={} --wait --timeout={} stop --mode=fast",
            data_dir.display(),
            timeout.as_secs()
        ),
    ]
}

/// Compose the post-restore statistics recalculation command.
pub fn build_analyze_command(connection: Connection, parallel_jobs: i32) -> Vec<String> {
    vec![
        "vacuumdb".to_string(),
        "--analyze".to_string(),
        "--jobs".to_string(),
        parallel_jobs.to_string(),
        "--username".to_string(),
        connection.username,
        "--dbname".to_string(),
        connection.db_name,
    ]
}

/// Extract the upstream snapshot timestamp from `pg_restore --list` header
/// output and normalize it to the canonical format.
pub fn discover_data_state_at(output: &str) -> Result<String> {
    for line in output.lines() {
        let Some(idx) = line.find(ARCHIVE_CREATED_AT) else {
            continue;
        };

        // The timestamp is followed by a zone name, e.g.
        // "2020-05-14 09:26:02 UTC"; only the date-time part is parsed.
        let raw = line[idx + ARCHIVE_CREATED_AT.len()..].trim();
        let stamp = raw.get(..19).unwrap_or(raw);

        let parsed = NaiveDateTime::parse_from_str(stamp, ARCHIVE_TIMESTAMP_FORMAT)
            .with_context(|| format!("failed to parse the archive timestamp {raw:?}"))?;

        return Ok(parsed.format(DATA_STATE_AT_FORMAT).to_string());
    }

    anyhow::bail!("dump metadata does not contain a creation timestamp")
}

/// Parse a canonical `dataStateAt` value back into a point in time.
pub fn parse_data_state_at(data_state_at: &str) -> Result<DateTime<Utc>> {
    let parsed = NaiveDateTime::parse_from_str(data_state_at, DATA_STATE_AT_FORMAT)
        .with_context(|| format!("invalid dataStateAt value {data_state_at:?}"))?;
    Ok(parsed.and_utc())
}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;

    use super::*;

    #[tokio::test]
    async fn test_is_empty_directory() {
        let dir = tempdir().unwrap();
        assert!(is_empty_directory(dir.path()).await.unwrap());

        tokio::fs::write(dir.path().join("PG_VERSION"), "14")
            .await
            .unwrap();
        assert!(!is_empty_directory(dir.path()).await.unwrap());

        assert!(is_empty_directory(dir.path().join("missing")).await.is_err());
    }

    #[test]
    fn test_quote_literal() {
        assert_eq!(quote_literal("orders"), "'orders'");
        assert_eq!(quote_literal("it's"), "'it''s'");
        assert_eq!(quote_literal(r"a\b"), r"E'a\\b'");
    }

    #[test]
    fn test_build_analyze_command() {
        let cmd = build_analyze_command(
            Connection {
                username: "postgres".to_string(),
                db_name: "postgres".to_string(),
            },
            2,
        );
        assert_eq!(
            cmd,
            vec![
                "vacuumdb",
                "--analyze",
                "--jobs",
                "2",
                "--username",
                "postgres",
                "--dbname",
                "postgres"
            ]
        );
    }

    #[test]
    fn test_discover_data_state_at() {
        let output = "\
;
; Archive created at 2020-05-14 09:26:02 UTC
;     dbname: acme
;     TOC Entries: 15
";
        assert_eq!(discover_data_state_at(output).unwrap(), "20200514092602");
    }

    #[test]
    fn test_discover_data_state_at_without_marker() {
        assert!(discover_data_state_at("; dbname: acme\n").is_err());
        assert!(discover_data_state_at("").is_err());
    }

    #[test]
    fn test_discover_data_state_at_with_garbage_timestamp() {
        assert!(discover_data_state_at("; Archive created at yesterday\n").is_err());
    }

    #[test]
    fn test_parse_data_state_at() {
        let parsed = parse_data_state_at("20200514092602").unwrap();
        assert_eq!(parsed.format(DATA_STATE_AT_FORMAT).to_string(), "20200514092602");

        assert!(parse_data_state_at("").is_err());
        assert!(parse_data_state_at("not-a-timestamp").is_err());
    }

    #[tokio::test]
    async fn test_update_configs_appends() {
        let dir = tempdir().unwrap();
        let mut configs = BTreeMap::new();
        configs.insert("shared_buffers".to_string(), "1GB".to_string());
        configs.insert("work_mem".to_string(), "64MB".to_string());

        update_configs(dir.path(), &configs).await.unwrap();

        let contents = tokio::fs::read_to_string(dir.path().join("postgresql.auto.conf"))
            .await
            .unwrap();
        assert_eq!(contents, "shared_buffers = '1GB'\nwork_mem = '64MB'\n");
    }

    #[test]
    fn test_stop_postgres_command() {
        let cmd = build_stop_postgres_command(Path::new("/data"), Duration::from_secs(600));
        assert_eq!(cmd[0], "su");
        assert!(cmd[4].contains("--timeout=600"));
        assert!(cmd[4].contains("--mode=fast"));
    }
}
