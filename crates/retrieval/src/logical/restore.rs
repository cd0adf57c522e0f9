//! The logical restore job.
//!
//! Materializes one or more databases from a dump on disk into the pool's
//! data directory by driving `pg_restore` / `psql` inside an ephemeral
//! PostgreSQL container. The container is removed on every exit path; a
//! database mark is persisted only after a restore command succeeded.

use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::io::AsyncBufReadExt;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::{format_db_name, DbDefinition, DumpFormat};
use crate::config::{self, GlobalConfig, JobConfig, DEFAULT_DB_NAME};
use crate::dbmarker::{DbMark, Marker};
use crate::engine::{BindMount, ContainerEngine, ContainerSpec, ExecSpec, HostSettings};
use crate::pool::FsPool;
use crate::{cont, health, tools};

/// Job type of the logical restore.
pub const RESTORE_JOB_TYPE: &str = "logicalRestore";

/// Metafile identifying a custom-format dump.
const DUMP_METAFILE: &str = "toc.dat";

/// Prefix of the database name inside a custom dump's table of contents.
const PREFIX_DB_NAME: &str = "dbname:";

/// Prefix of a connection statement inside a plain-text dump.
const PREFIX_CONNECT_DB: &str = "\\connect ";

/// Prefix of a table creation statement inside a plain-text dump.
const PREFIX_CREATE_TABLE: &str = "CREATE TABLE ";

const DEFAULT_PARALLEL_JOBS: i32 = 1;

/// User-declared options of a logical restore job.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RestoreOptions {
    /// Absolute path of the dump on disk. Exposed at the same path inside
    /// the container when it lives under the pool mount directory.
    pub dump_location: String,
    /// Image of the ephemeral restore container.
    pub docker_image: String,
    /// Engine host options merged into the container's host configuration.
    pub container_config: Value,
    /// Explicit databases to restore; discovery is skipped when non-empty.
    pub databases: BTreeMap<String, DbDefinition>,
    /// Allow restoring over a non-empty data directory.
    pub force_init: bool,
    /// `pg_restore --jobs` value.
    pub parallel_jobs: i32,
    /// PostgreSQL parameter overrides applied to the data directory.
    pub configs: BTreeMap<String, String>,
}

/// A logical restore job.
pub struct RestoreJob {
    name: String,
    engine: Arc<dyn ContainerEngine>,
    fs_pool: Arc<FsPool>,
    global: GlobalConfig,
    marker: Arc<Marker>,
    db_mark: Mutex<DbMark>,
    options: RestoreOptions,
}

impl RestoreJob {
    pub fn new(cfg: JobConfig, global: &GlobalConfig) -> Result<Self> {
        let options = config::unmarshal_options(cfg.options)?;

        let mut job = Self {
            name: cfg.name,
            engine: cfg.engine,
            fs_pool: cfg.fs_pool,
            global: global.clone(),
            marker: cfg.marker,
            db_mark: Mutex::new(DbMark::logical()),
            options,
        };
        job.set_defaults();

        Ok(job)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Re-decode job options between runs.
    pub fn reload(&mut self, options: Value) -> Result<()> {
        self.options = config::unmarshal_options(options)?;
        self.set_defaults();
        Ok(())
    }

    fn set_defaults(&mut self) {
        if self.options.parallel_jobs <= 0 {
            self.options.parallel_jobs = DEFAULT_PARALLEL_JOBS;
        }
    }

    fn restore_container_name(&self) -> String {
        cont::restore_container_name(&self.global.instance_id)
    }

    /// Run the job to completion.
    ///
    /// The restore container is removed on every exit path once it has been
    /// created; on failure its recent output is dumped for diagnostics.
    pub async fn run(&self, cancel: CancellationToken) -> Result<()> {
        info!(job = %self.name, "run job");

        let data_dir = self.fs_pool.data_dir();

        let is_empty = tools::is_empty_directory(&data_dir)
            .await
            .with_context(|| {
                format!("failed to explore the data directory {}", data_dir.display())
            })?;

        if !is_empty {
            if !self.options.force_init {
                anyhow::bail!(
                    "the data directory {} is not empty, use forceInit or empty the data directory",
                    data_dir.display()
                );
            }

            warn!(
                data_dir = %data_dir.display(),
                "the data directory is not empty, existing data may be overwritten"
            );
        }

        tokio::select! {
            _ = cancel.cancelled() => anyhow::bail!("restore job cancelled"),
            res = self.engine.pull_image(&self.options.docker_image) => {
                res.context("failed to pull the restore image")?;
            }
        }

        let password = tools::generate_password();
        let container_name = self.restore_container_name();

        let container_id = self
            .engine
            .create_container(self.build_container_spec(&password))
            .await
            .with_context(|| format!("failed to create container {container_name}"))?;

        info!(container = %container_name, id = %container_id, "running restore container");

        let result = tokio::select! {
            _ = cancel.cancelled() => Err(anyhow::anyhow!("restore job cancelled")),
            res = self.run_in_container(&container_id) => res,
        };

        if result.is_err() {
            cont::print_container_logs(self.engine.as_ref(), &container_id).await;
        }

        if let Err(err) = self.engine.remove_container(&container_id).await {
            warn!(container = %container_name, error = %err, "failed to remove restore container");
        }

        result
    }

    async fn run_in_container(&self, container_id: &str) -> Result<()> {
        self.engine
            .start_container(container_id)
            .await
            .with_context(|| {
                format!("failed to start container {}", self.restore_container_name())
            })?;

        let data_dir = self.fs_pool.data_dir();

        info!("waiting for container readiness");

        if let Err(err) = health::wait_container_ready(self.engine.as_ref(), container_id).await {
            if err.downcast_ref::<health::HealthCheckError>().is_none() {
                return Err(err).context("failed the readiness check");
            }

            // The health probe found no serving cluster: a first-time
            // restore over an uninitialized data directory.
            tools::setup_pg_data(self.engine.as_ref(), container_id, &data_dir)
                .await
                .context("failed to set up Postgres data")?;

            health::wait_container_ready(self.engine.as_ref(), container_id)
                .await
                .context("failed the readiness check after initialization")?;
        }

        if !self.options.configs.is_empty() {
            tools::update_configs(&data_dir, &self.options.configs)
                .await
                .context("failed to update configs")?;
        }

        let db_list = self.get_db_list(container_id).await?;

        debug!(databases = ?db_list.keys().collect::<Vec<_>>(), "database list to restore");

        for (db_name, definition) in &db_list {
            self.restore_db(container_id, db_name, definition)
                .await
                .context("failed to restore a database")?;
        }

        let analyze_cmd = tools::build_analyze_command(
            tools::Connection {
                username: self.global.database.user().to_string(),
                db_name: self.global.database.name().to_string(),
            },
            self.options.parallel_jobs,
        );

        info!(command = ?analyze_cmd, "running analyze command");

        self.engine
            .exec_command(container_id, ExecSpec::new(analyze_cmd))
            .await
            .context("failed to recalculate statistics after restore")?;

        tools::stop_postgres(
            self.engine.as_ref(),
            container_id,
            &data_dir,
            cont::DEFAULT_STOP_TIMEOUT,
        )
        .await
        .context("failed to stop Postgres instance")?;

        info!("restore job has been finished");

        Ok(())
    }

    /// Discover the databases to restore.
    async fn get_db_list(&self, container_id: &str) -> Result<BTreeMap<String, DbDefinition>> {
        if !self.options.databases.is_empty() {
            return Ok(self.options.databases.clone());
        }

        let metafile = Path::new(&self.options.dump_location).join(DUMP_METAFILE);

        match tokio::fs::metadata(&metafile).await {
            Ok(_) => self.discover_custom_dump(container_id, &metafile).await,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                debug!("custom-format dump metafile not found, discovering dump location");
                self.discover_dump_location().await
            }
            Err(err) => {
                Err(err).with_context(|| format!("failed to stat {}", metafile.display()))
            }
        }
    }

    /// Extract the database name from a custom dump's table of contents.
    async fn discover_custom_dump(
        &self,
        container_id: &str,
        metafile: &Path,
    ) -> Result<BTreeMap<String, DbDefinition>> {
        let extract_cmd = format!(
            "pg_restore --list {} | grep {} | tr -d '[;]'",
            metafile.display(),
            PREFIX_DB_NAME
        );

        info!(command = %extract_cmd, "extracting the database name");

        let output = self
            .engine
            .exec_with_output(
                container_id,
                ExecSpec::new(vec!["bash".to_string(), "-c".to_string(), extract_cmd]),
            )
            .await
            .context("failed to find a database name to restore")?;

        let line = output.trim();
        if line.is_empty() {
            anyhow::bail!("database name to restore not found");
        }

        let db_name = line
            .strip_prefix(PREFIX_DB_NAME)
            .unwrap_or(line)
            .trim()
            .to_string();

        Ok(BTreeMap::from([(
            db_name,
            DbDefinition {
                format: DumpFormat::Custom,
                ..Default::default()
            },
        )]))
    }

    /// Enumerate the dump location when no custom-dump metafile exists.
    async fn discover_dump_location(&self) -> Result<BTreeMap<String, DbDefinition>> {
        let mut db_list = BTreeMap::new();

        let mut entries = tokio::fs::read_dir(&self.options.dump_location)
            .await
            .context("failed to discover the dump location")?;

        while let Some(entry) = entries
            .next_entry()
            .await
            .context("failed to discover the dump location")?
        {
            let file_type = entry
                .file_type()
                .await
                .context("failed to discover the dump location")?;
            let entry_name = entry.file_name().to_string_lossy().into_owned();

            if file_type.is_dir() {
                db_list.insert(
                    entry_name,
                    DbDefinition {
                        format: DumpFormat::Directory,
                        ..Default::default()
                    },
                );
                continue;
            }

            let db_name = parse_plain_file(&entry.path()).await?;
            db_list.insert(
                entry_name,
                DbDefinition {
                    format: DumpFormat::Plain,
                    db_name,
                    ..Default::default()
                },
            );
        }

        Ok(db_list)
    }

    async fn restore_db(
        &self,
        container_id: &str,
        db_name: &str,
        definition: &DbDefinition,
    ) -> Result<()> {
        // A plain dump without a connection statement carries no database
        // creation request, so create the database first.
        if definition.format == DumpFormat::Plain && definition.db_name.is_none() {
            self.prepare_db(container_id, db_name)
                .await
                .with_context(|| format!("failed to prepare database for dump {db_name}"))?;
        }

        let restore_cmd = self.build_restore_command(db_name, definition);

        info!(command = ?restore_cmd, "running restore command");

        self.engine
            .exec_with_output(container_id, ExecSpec::with_tty(restore_cmd))
            .await
            .context("failed to exec restore command")?;

        if definition.format == DumpFormat::Plain {
            // dataStateAt cannot be recovered from a plain-text dump.
            return Ok(());
        }

        let dump_location = self.dump_location(definition.format, db_name);

        self.mark_database(container_id, &dump_location)
            .await
            .context("failed to mark the database")
    }

    /// Create the target database for a plain dump that does not declare
    /// one. The creation script is written under the dump location, which is
    /// visible at the same path inside the container.
    async fn prepare_db(&self, container_id: &str, dump_name: &str) -> Result<()> {
        let db_name = format_db_name(dump_name);

        debug!(
            database = %db_name,
            "plain-text dump without a database name, creating a database for the dump"
        );

        let creation_sql = build_create_database_sql(&db_name, self.global.database.user());

        let temp_file = tempfile::Builder::new()
            .prefix(&format!("createdb_{dump_name}_"))
            .suffix(".sql")
            .tempfile_in(&self.options.dump_location)
            .context("failed to create a database creation script")?;

        tokio::fs::write(temp_file.path(), creation_sql)
            .await
            .context("failed to write a database creation script")?;

        let cmd = vec![
            "psql".to_string(),
            "--username".to_string(),
            self.global.database.user().to_string(),
            "--dbname".to_string(),
            DEFAULT_DB_NAME.to_string(),
            "--file".to_string(),
            temp_file.path().display().to_string(),
        ];

        info!(command = ?cmd, "run command");

        // temp_file is removed when it goes out of scope, on every exit path.
        self.engine
            .exec_command(container_id, ExecSpec::new(cmd))
            .await
            .context("failed to exec database creation command")
    }

    fn build_restore_command(&self, dump_name: &str, definition: &DbDefinition) -> Vec<String> {
        if definition.format == DumpFormat::Plain {
            self.build_plain_text_command(dump_name, definition)
        } else {
            self.build_pg_restore_command(dump_name, definition)
        }
    }

    fn build_plain_text_command(
        &self,
        dump_name: &str,
        definition: &DbDefinition,
    ) -> Vec<String> {
        let db_name = match &definition.db_name {
            Some(embedded) => embedded.clone(),
            // The database has been created in the preparation step.
            None => format_db_name(dump_name),
        };

        if !definition.tables.is_empty() {
            warn!("partial restore is not available for plain-text dumps");
        }

        if self.options.parallel_jobs > 1 {
            warn!("parallel restore is not available for plain-text dumps, restoring single-threaded");
        }

        vec![
            "psql".to_string(),
            "--username".to_string(),
            self.global.database.user().to_string(),
            "--dbname".to_string(),
            db_name,
            "--file".to_string(),
            self.dump_location(definition.format, dump_name),
        ]
    }

    fn build_pg_restore_command(
        &self,
        dump_name: &str,
        definition: &DbDefinition,
    ) -> Vec<String> {
        let mut cmd = vec![
            "pg_restore".to_string(),
            "--username".to_string(),
            self.global.database.user().to_string(),
            "--dbname".to_string(),
            DEFAULT_DB_NAME.to_string(),
            "--no-privileges".to_string(),
            "--no-owner".to_string(),
        ];

        // Avoid recreating the default database.
        if dump_name != DEFAULT_DB_NAME {
            cmd.push("--create".to_string());
        }

        if self.options.force_init {
            cmd.push("--clean".to_string());
            cmd.push("--if-exists".to_string());
        }

        cmd.push("--jobs".to_string());
        cmd.push(self.options.parallel_jobs.to_string());

        if !definition.tables.is_empty() {
            info!(
                tables = %definition.tables.join(", "),
                "partial restore will be run"
            );

            for table in &definition.tables {
                cmd.push("--table".to_string());
                cmd.push(table.clone());
            }
        }

        cmd.push(self.dump_location(definition.format, dump_name));

        cmd
    }

    fn dump_location(&self, format: DumpFormat, db_name: &str) -> String {
        match format {
            DumpFormat::Custom => self.options.dump_location.clone(),
            _ => Path::new(&self.options.dump_location)
                .join(db_name)
                .display()
                .to_string(),
        }
    }

    /// Capture the upstream snapshot timestamp and persist the mark.
    async fn mark_database(&self, container_id: &str, dump_location: &str) -> Result<()> {
        match self.retrieve_data_state_at(container_id, dump_location).await {
            Ok(data_state_at) => {
                info!(data_state_at = %data_state_at, "data state at");
                self.db_mark.lock().await.data_state_at = data_state_at;
            }
            Err(err) => {
                error!(error = %err, "failed to extract dataStateAt");
            }
        }

        let mark = self.db_mark.lock().await.clone();

        self.marker
            .create_config()
            .await
            .context("failed to create a mark config of the database")?;

        self.marker
            .save_mark(&mark)
            .await
            .context("failed to mark the database")?;

        self.update_data_state_at(&mark.data_state_at);

        Ok(())
    }

    async fn retrieve_data_state_at(
        &self,
        container_id: &str,
        dump_location: &str,
    ) -> Result<String> {
        let meta_cmd = vec![
            "sh".to_string(),
            "-c".to_string(),
            format!("pg_restore --list {dump_location} | head -n 10"),
        ];

        debug!(command = ?meta_cmd, "running a restore metadata command");

        let output = self
            .engine
            .exec_with_output(container_id, ExecSpec::new(meta_cmd))
            .await
            .context("failed to run a restore metadata command")?;

        tools::discover_data_state_at(&output)
    }

    /// Advance the in-memory pool timestamp; an unparsable value leaves the
    /// pool unchanged.
    fn update_data_state_at(&self, data_state_at: &str) {
        match tools::parse_data_state_at(data_state_at) {
            Ok(dsa_time) => self.fs_pool.set_data_state_at(dsa_time),
            Err(_) => error!(value = %data_state_at, "invalid value for dataStateAt"),
        }
    }

    fn build_container_spec(&self, password: &str) -> ContainerSpec {
        let data_dir = self.fs_pool.data_dir();

        let mut env: Vec<String> = std::env::vars()
            .map(|(key, value)| format!("{key}={value}"))
            .collect();
        env.push(format!("PGDATA={}", data_dir.display()));
        env.push(format!("POSTGRES_PASSWORD={password}"));

        ContainerSpec {
            name: self.restore_container_name(),
            image: self.options.docker_image.clone(),
            env,
            labels: cont::restore_labels(&self.global.instance_id),
            healthcheck: Some(health::health_config(
                self.global.database.user(),
                self.global.database.name(),
            )),
            host: self.build_host_settings(&data_dir),
        }
    }

    fn build_host_settings(&self, data_dir: &Path) -> HostSettings {
        let mut mounts = vec![BindMount {
            source: data_dir.to_path_buf(),
            target: data_dir.to_path_buf(),
        }];

        // Expose the dump at the same path inside the container when it
        // lives under the pool mount directory.
        let dump_location = PathBuf::from(&self.options.dump_location);
        if dump_location.starts_with(self.fs_pool.mount_dir()) {
            mounts.push(BindMount {
                source: dump_location.clone(),
                target: dump_location,
            });
        }

        HostSettings {
            options: self.options.container_config.clone(),
            mounts,
        }
    }
}

/// Compose the creation script for a database derived from a dump file name.
fn build_create_database_sql(db_name: &str, owner: &str) -> String {
    format!(
        "create database {db} with template = template0 encoding = 'utf8';\n\
         alter database {db} owner to {owner};\n",
        db = tools::quote_literal(db_name),
        owner = tools::quote_literal(owner),
    )
}

/// Scan a plain-text dump for an embedded database name.
///
/// The first connection statement wins; a table creation statement before
/// any connection statement means the dump does not declare a database.
async fn parse_plain_file(path: &Path) -> Result<Option<String>> {
    let file = tokio::fs::File::open(path)
        .await
        .context("failed to open dump file")?;

    let mut lines = tokio::io::BufReader::new(file).lines();

    while let Some(line) = lines
        .next_line()
        .await
        .context("failed to read dump file")?
    {
        if let Some(candidate) = line.strip_prefix(PREFIX_CONNECT_DB) {
            let candidate = candidate.trim();
            if !candidate.is_empty() {
                return Ok(Some(candidate.to_string()));
            }

            debug!(line = %line, "cannot parse a database name from the connection statement");
            break;
        }

        if line.starts_with(PREFIX_CREATE_TABLE) {
            // The dump does not declare a database name.
            break;
        }
    }

    Ok(None)
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use serde_json::json;
    use tempfile::tempdir;

    use super::*;
    use crate::engine::{HealthProbe, HealthStatus};

    struct NullEngine;

    #[async_trait]
    impl ContainerEngine for NullEngine {
        async fn pull_image(&self, _image: &str) -> Result<()> {
            Ok(())
        }

        async fn create_container(&self, spec: ContainerSpec) -> Result<String> {
            Ok(spec.name)
        }

        async fn start_container(&self, _id: &str) -> Result<()> {
            Ok(())
        }

        async fn exec_command(&self, _id: &str, _exec: ExecSpec) -> Result<()> {
            Ok(())
        }

        async fn exec_with_output(&self, _id: &str, _exec: ExecSpec) -> Result<String> {
            Ok(String::new())
        }

        async fn stop_container(&self, _id: &str, _timeout: std::time::Duration) -> Result<()> {
            Ok(())
        }

        async fn remove_container(&self, _id: &str) -> Result<()> {
            Ok(())
        }

        async fn container_logs(&self, _id: &str, _tail: u32) -> Result<String> {
            Ok(String::new())
        }

        async fn container_health(&self, _id: &str) -> Result<HealthProbe> {
            Ok(HealthProbe {
                status: HealthStatus::Healthy,
                last_output: None,
            })
        }
    }

    fn test_job(options: Value) -> RestoreJob {
        let global = GlobalConfig {
            instance_id: "test1".to_string(),
            ..Default::default()
        };

        RestoreJob::new(
            JobConfig {
                name: "logicalRestore".to_string(),
                options,
                engine: Arc::new(NullEngine),
                fs_pool: Arc::new(FsPool::new("/var/lib/dblab/pool", "data")),
                marker: Arc::new(Marker::new("/var/lib/dblab/pool")),
            },
            &global,
        )
        .unwrap()
    }

    #[test]
    fn test_parallel_jobs_default() {
        let job = test_job(json!({"dumpLocation": "/dump"}));
        assert_eq!(job.options.parallel_jobs, 1);

        let job = test_job(json!({"dumpLocation": "/dump", "parallelJobs": -3}));
        assert_eq!(job.options.parallel_jobs, 1);

        let job = test_job(json!({"dumpLocation": "/dump", "parallelJobs": 4}));
        assert_eq!(job.options.parallel_jobs, 4);
    }

    #[test]
    fn test_reload_reapplies_defaults() {
        let mut job = test_job(json!({"dumpLocation": "/dump", "parallelJobs": 4}));
        job.reload(json!({"dumpLocation": "/dump/next", "parallelJobs": 0}))
            .unwrap();

        assert_eq!(job.options.dump_location, "/dump/next");
        assert_eq!(job.options.parallel_jobs, 1);
    }

    #[test]
    fn test_pg_restore_command_for_custom_dump() {
        let job = test_job(json!({"dumpLocation": "/dump"}));
        let definition = DbDefinition {
            format: DumpFormat::Custom,
            ..Default::default()
        };

        assert_eq!(
            job.build_restore_command("acme", &definition),
            vec![
                "pg_restore",
                "--username",
                "postgres",
                "--dbname",
                "postgres",
                "--no-privileges",
                "--no-owner",
                "--create",
                "--jobs",
                "1",
                "/dump"
            ]
        );
    }

    #[test]
    fn test_pg_restore_command_skips_create_for_default_db() {
        let job = test_job(json!({"dumpLocation": "/dump"}));
        let definition = DbDefinition {
            format: DumpFormat::Directory,
            ..Default::default()
        };

        let cmd = job.build_restore_command("postgres", &definition);
        assert!(!cmd.contains(&"--create".to_string()));
        assert_eq!(cmd.last().unwrap(), "/dump/postgres");
    }

    #[test]
    fn test_pg_restore_command_with_force_init_and_tables() {
        let job = test_job(json!({
            "dumpLocation": "/dump",
            "forceInit": true,
            "parallelJobs": 2,
        }));
        let definition = DbDefinition {
            format: DumpFormat::Directory,
            tables: vec!["orders".to_string(), "order_items".to_string()],
            ..Default::default()
        };

        let cmd = job.build_restore_command("orders", &definition);
        assert_eq!(
            cmd,
            vec![
                "pg_restore",
                "--username",
                "postgres",
                "--dbname",
                "postgres",
                "--no-privileges",
                "--no-owner",
                "--create",
                "--clean",
                "--if-exists",
                "--jobs",
                "2",
                "--table",
                "orders",
                "--table",
                "order_items",
                "/dump/orders"
            ]
        );
    }

    #[test]
    fn test_plain_text_command_with_embedded_name() {
        let job = test_job(json!({"dumpLocation": "/dump"}));
        let definition = DbDefinition {
            format: DumpFormat::Plain,
            db_name: Some("payments".to_string()),
            ..Default::default()
        };

        assert_eq!(
            job.build_restore_command("backup.sql", &definition),
            vec![
                "psql",
                "--username",
                "postgres",
                "--dbname",
                "payments",
                "--file",
                "/dump/backup.sql"
            ]
        );
    }

    #[test]
    fn test_plain_text_command_with_derived_name() {
        let job = test_job(json!({"dumpLocation": "/dump"}));
        let definition = DbDefinition {
            format: DumpFormat::Plain,
            ..Default::default()
        };

        assert_eq!(
            job.build_restore_command("legacy-db.sql", &definition),
            vec![
                "psql",
                "--username",
                "postgres",
                "--dbname",
                "legacy_db",
                "--file",
                "/dump/legacy-db.sql"
            ]
        );
    }

    #[test]
    fn test_dump_location_by_format() {
        let job = test_job(json!({"dumpLocation": "/dump"}));
        assert_eq!(job.dump_location(DumpFormat::Custom, "acme"), "/dump");
        assert_eq!(
            job.dump_location(DumpFormat::Directory, "orders"),
            "/dump/orders"
        );
        assert_eq!(
            job.dump_location(DumpFormat::Plain, "backup.sql"),
            "/dump/backup.sql"
        );
    }

    #[test]
    fn test_create_database_sql() {
        assert_eq!(
            build_create_database_sql("legacy_db", "postgres"),
            "create database 'legacy_db' with template = template0 encoding = 'utf8';\n\
             alter database 'legacy_db' owner to 'postgres';\n"
        );
    }

    #[tokio::test]
    async fn test_parse_plain_file_with_connection_statement() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("backup.sql");
        tokio::fs::write(&path, "-- dump\n\\connect payments\nCREATE TABLE t (id int);\n")
            .await
            .unwrap();

        assert_eq!(
            parse_plain_file(&path).await.unwrap(),
            Some("payments".to_string())
        );
    }

    #[tokio::test]
    async fn test_parse_plain_file_with_blank_connection_statement() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("backup.sql");
        tokio::fs::write(&path, "\\connect    \nCREATE TABLE t (id int);\n")
            .await
            .unwrap();

        assert_eq!(parse_plain_file(&path).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_parse_plain_file_stops_at_table_creation() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("legacy-db.sql");
        tokio::fs::write(&path, "CREATE TABLE t (id int);\n\\connect payments\n")
            .await
            .unwrap();

        assert_eq!(parse_plain_file(&path).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_parse_plain_file_without_markers() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("data.sql");
        tokio::fs::write(&path, "insert into t values (1);\n")
            .await
            .unwrap();

        assert_eq!(parse_plain_file(&path).await.unwrap(), None);
    }

    #[test]
    fn test_host_settings_mounts_dump_under_pool() {
        let job = test_job(json!({"dumpLocation": "/var/lib/dblab/pool/dump"}));
        let settings = job.build_host_settings(&job.fs_pool.data_dir());

        assert_eq!(settings.mounts.len(), 2);
        assert_eq!(
            settings.mounts[1].source,
            PathBuf::from("/var/lib/dblab/pool/dump")
        );

        let job = test_job(json!({"dumpLocation": "/mnt/elsewhere/dump"}));
        let settings = job.build_host_settings(&job.fs_pool.data_dir());
        assert_eq!(settings.mounts.len(), 1);
    }
}
