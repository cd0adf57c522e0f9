use std::collections::HashMap;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use bollard::{
    exec::{CreateExecOptions, StartExecOptions, StartExecResults},
    models::{
        ContainerCreateBody,
        HealthConfig,
        HealthStatusEnum,
        HostConfig,
        Mount,
        MountTypeEnum,
    },
    query_parameters::{
        CreateContainerOptions,
        CreateImageOptions,
        InspectContainerOptions,
        LogsOptions,
        RemoveContainerOptions,
        StartContainerOptions,
        StopContainerOptions,
    },
    Docker,
};
use futures_util::StreamExt;
use tracing::{debug, info};

use super::{
    ContainerEngine,
    ContainerSpec,
    ExecSpec,
    HealthProbe,
    HealthStatus,
    HostSettings,
};

/// Upper bound on log bytes fetched for diagnostics.
const MAX_LOG_BYTES: usize = 4096;

/// Interval between exec exit-code polls.
const EXEC_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Container engine backed by a local Docker daemon.
pub struct DockerEngine {
    docker: Docker,
}

impl DockerEngine {
    /// Connect to the default local Docker socket.
    pub fn new() -> Result<Self> {
        let docker =
            Docker::connect_with_local_defaults().context("failed to connect to Docker daemon")?;
        Ok(Self { docker })
    }

    /// Wrap an existing client connection.
    pub fn with_client(docker: Docker) -> Self {
        Self { docker }
    }

    async fn image_exists(&self, image: &str) -> Result<bool> {
        match self.docker.inspect_image(image).await {
            Ok(_) => Ok(true),
            Err(bollard::errors::Error::DockerResponseServerError {
                status_code: 404, ..
            }) => Ok(false),
            Err(e) => Err(e).context("failed to inspect image"),
        }
    }

    fn build_host_config(host: &HostSettings) -> Result<HostConfig> {
        let mut host_config: HostConfig = if host.options.is_null() {
            HostConfig::default()
        } else {
            serde_json::from_value(host.options.clone())
                .context("failed to decode container host options")?
        };

        let mounts = host_config.mounts.get_or_insert_with(Vec::new);
        for bind in &host.mounts {
            mounts.push(Mount {
                typ: Some(MountTypeEnum::BIND),
                source: Some(bind.source.display().to_string()),
                target: Some(bind.target.display().to_string()),
                ..Default::default()
            });
        }

        Ok(host_config)
    }

    /// Create an exec instance, drain its output, and check the exit code.
    async fn run_exec(&self, id: &str, exec: &ExecSpec) -> Result<String> {
        let created = self
            .docker
            .create_exec(
                id,
                CreateExecOptions {
                    attach_stdout: Some(true),
                    attach_stderr: Some(true),
                    tty: Some(exec.tty),
                    cmd: Some(exec.cmd.clone()),
                    ..Default::default()
                },
            )
            .await
            .context("failed to create an exec command")?;

        let mut collected = String::new();

        match self
            .docker
            .start_exec(&created.id, None::<StartExecOptions>)
            .await
            .context("failed to start an exec command")?
        {
            StartExecResults::Attached { mut output, .. } => {
                while let Some(chunk) = output.next().await {
                    let chunk = chunk.context("failed to read exec output")?;
                    let text = chunk.to_string();
                    if collected.len() + text.len() > MAX_LOG_BYTES {
                        collected
                            .push_str(&text[..MAX_LOG_BYTES.saturating_sub(collected.len())]);
                        collected.push_str("\n... (truncated)");
                        // Keep draining so the command runs to completion.
                        while output.next().await.is_some() {}
                        break;
                    }
                    collected.push_str(&text);
                }
            }
            StartExecResults::Detached => {}
        }

        // The output stream ends when the command exits, but the daemon may
        // report the exit code a beat later.
        let exit_code = loop {
            let inspect = self
                .docker
                .inspect_exec(&created.id)
                .await
                .context("failed to inspect an exec command")?;
            if inspect.running != Some(true) {
                break inspect.exit_code.unwrap_or_default();
            }
            tokio::time::sleep(EXEC_POLL_INTERVAL).await;
        };

        if exit_code != 0 {
            anyhow::bail!(
                "command {:?} exited with code {}: {}",
                exec.cmd,
                exit_code,
                collected.trim()
            );
        }

        Ok(collected)
    }
}

#[async_trait]
impl ContainerEngine for DockerEngine {
    async fn pull_image(&self, image: &str) -> Result<()> {
        if self.image_exists(image).await? {
            info!(image = %image, "image already exists locally");
            return Ok(());
        }

        info!(image = %image, "pulling image");

        let options = CreateImageOptions {
            from_image: Some(image.to_string()),
            ..Default::default()
        };

        let mut stream = self.docker.create_image(Some(options), None, None);

        while let Some(result) = stream.next().await {
            let progress = result.with_context(|| format!("failed to pull image {image}"))?;
            if let Some(status) = progress.status {
                debug!(image = %image, status = %status, "pull progress");
            }
        }

        info!(image = %image, "image pull completed");

        Ok(())
    }

    async fn create_container(&self, spec: ContainerSpec) -> Result<String> {
        let host_config = Self::build_host_config(&spec.host)?;

        let healthcheck = spec.healthcheck.map(|hc| HealthConfig {
            test: Some(hc.test),
            interval: Some(hc.interval.as_nanos() as i64),
            timeout: Some(hc.timeout.as_nanos() as i64),
            retries: Some(hc.retries),
            start_period: None,
            start_interval: None,
        });

        let labels: HashMap<String, String> = spec.labels.into_iter().collect();

        let body = ContainerCreateBody {
            image: Some(spec.image),
            env: Some(spec.env),
            labels: Some(labels),
            healthcheck,
            host_config: Some(host_config),
            ..Default::default()
        };

        let created = self
            .docker
            .create_container(
                Some(CreateContainerOptions {
                    name: Some(spec.name.clone()),
                    ..Default::default()
                }),
                body,
            )
            .await
            .with_context(|| format!("failed to create container {}", spec.name))?;

        Ok(created.id)
    }

    async fn start_container(&self, id: &str) -> Result<()> {
        self.docker
            .start_container(id, None::<StartContainerOptions>)
            .await
            .context("failed to start container")
    }

    async fn exec_command(&self, id: &str, exec: ExecSpec) -> Result<()> {
        let output = self.run_exec(id, &exec).await?;
        if !output.trim().is_empty() {
            debug!(command = ?exec.cmd, output = %output.trim(), "command finished");
        }
        Ok(())
    }

    async fn exec_with_output(&self, id: &str, exec: ExecSpec) -> Result<String> {
        self.run_exec(id, &exec).await
    }

    async fn stop_container(&self, id: &str, timeout: Duration) -> Result<()> {
        self.docker
            .stop_container(
                id,
                Some(StopContainerOptions {
                    t: Some(timeout.as_secs() as i32),
                    ..Default::default()
                }),
            )
            .await
            .context("failed to stop container")
    }

    async fn remove_container(&self, id: &str) -> Result<()> {
        match self
            .docker
            .remove_container(
                id,
                Some(RemoveContainerOptions {
                    force: true,
                    ..Default::default()
                }),
            )
            .await
        {
            Ok(()) => Ok(()),
            Err(bollard::errors::Error::DockerResponseServerError {
                status_code: 404, ..
            }) => Ok(()),
            Err(e) => Err(e).context("failed to remove container"),
        }
    }

    async fn container_logs(&self, id: &str, tail: u32) -> Result<String> {
        let options = LogsOptions {
            stdout: true,
            stderr: true,
            tail: tail.to_string(),
            ..Default::default()
        };

        let mut stream = self.docker.logs(id, Some(options));
        let mut output = String::new();

        while let Some(result) = stream.next().await {
            match result {
                Ok(log_output) => {
                    let line = log_output.to_string();
                    if output.len() + line.len() > MAX_LOG_BYTES {
                        output.push_str(&line[..MAX_LOG_BYTES.saturating_sub(output.len())]);
                        output.push_str("\n... (truncated)");
                        break;
                    }
                    output.push_str(&line);
                }
                Err(bollard::errors::Error::DockerResponseServerError {
                    status_code: 404, ..
                }) => break,
                Err(e) => return Err(e).context("failed to fetch container logs"),
            }
        }

        Ok(output)
    }

    async fn container_health(&self, id: &str) -> Result<HealthProbe> {
        let inspect = self
            .docker
            .inspect_container(id, None::<InspectContainerOptions>)
            .await
            .context("failed to inspect container")?;

        let Some(health) = inspect.state.and_then(|state| state.health) else {
            return Ok(HealthProbe {
                status: HealthStatus::None,
                last_output: None,
            });
        };

        let status = match health.status {
            Some(HealthStatusEnum::HEALTHY) => HealthStatus::Healthy,
            Some(HealthStatusEnum::UNHEALTHY) => HealthStatus::Unhealthy,
            Some(HealthStatusEnum::STARTING) => HealthStatus::Starting,
            _ => HealthStatus::None,
        };

        let last_output = health
            .log
            .and_then(|log| log.last().and_then(|probe| probe.output.clone()));

        Ok(HealthProbe {
            status,
            last_output,
        })
    }
}
