// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! In-process service wiring
//!
//! Builds the run service from configuration and executes commands directly
//! against the local container engine.

use anyhow::{bail, Context, Result};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use toolrun_core::{
    application::{run_service::ToolRunService, tool_cache::ToolSpecCache, workspace::RunWorkspace},
    domain::{
        config::RunnerConfig,
        run::{Run, RunId, UserId},
    },
    infrastructure::{
        event_bus::EventBus, repositories::build_run_repository, runtime::DockerConnector,
    },
};

const WAIT_POLL_INTERVAL: Duration = Duration::from_secs(5);

pub struct EmbeddedRunner {
    config: RunnerConfig,
    service: ToolRunService,
    user: UserId,
}

impl EmbeddedRunner {
    pub async fn new(config_path: Option<PathBuf>, user_override: Option<String>) -> Result<Self> {
        let mut config =
            RunnerConfig::load_or_default(config_path).context("Failed to load configuration")?;
        if let Some(user) = user_override {
            config.identity.user_id = user;
        }
        config
            .validate()
            .context("Configuration validation failed")?;

        let mount_path = config.mount_path();
        tokio::fs::create_dir_all(&mount_path)
            .await
            .with_context(|| format!("Failed to create mount path {:?}", mount_path))?;

        let repository = build_run_repository(&config.storage.backend(), config.admins())
            .await
            .context("Failed to initialize run repository")?;
        let connector = Arc::new(DockerConnector::new(config.runtime.docker_socket_path.clone()));

        let service = ToolRunService::new(
            connector,
            repository,
            Arc::new(ToolSpecCache::new()),
            RunWorkspace::new(mount_path),
            EventBus::with_default_capacity(),
            config.start_grace(),
        );

        let runner = Self {
            user: config.user_id(),
            config,
            service,
        };

        if runner.config.discovery.on_startup {
            runner.discover(runner.config.discovery.verbose).await?;
        }
        Ok(runner)
    }

    pub fn service(&self) -> &ToolRunService {
        &self.service
    }

    pub fn user(&self) -> &UserId {
        &self.user
    }

    pub fn config(&self) -> &RunnerConfig {
        &self.config
    }

    /// Full discovery pass; Ctrl-C abandons outstanding probes.
    pub async fn discover(&self, verbose: bool) -> Result<Vec<String>> {
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        let watcher = tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                trigger.cancel();
            }
        });

        let result = self.service.discover_tools(verbose, &cancel).await;
        watcher.abort();
        let slugs = result.context("Tool discovery failed")?;
        info!("Discovery found {} tools", slugs.len());
        Ok(slugs)
    }

    /// Discovers once per process unless a pass already completed.
    pub async fn ensure_discovered(&self) -> Result<()> {
        if !self.service.tools_discovered() {
            self.discover(self.config.discovery.verbose).await?;
        }
        Ok(())
    }

    /// Waits for every execution this process started; call before exiting.
    pub async fn shutdown(&self) {
        let in_flight = self.service.executor().in_flight();
        if in_flight > 0 {
            info!("Waiting for {} in-flight runs before exiting", in_flight);
        }
        self.service.executor().drain().await;
    }

    /// Blocks until the run is terminal. A terminal event whose state never
    /// reached storage ends the wait with an error instead of hanging.
    pub async fn wait_for_run(&self, id: RunId) -> Result<Run> {
        let mut events = self.service.event_bus().subscribe_run(id);
        loop {
            let run = self.service.get_run_detail(&self.user, id).await?.run;
            if run.status.is_terminal() {
                return Ok(run);
            }
            match tokio::time::timeout(WAIT_POLL_INTERVAL, events.recv()).await {
                Ok(Ok(event)) => {
                    debug!("Run {} event: {:?}", id, event);
                    if let Some(status) = event.resulting_status().filter(|s| s.is_terminal()) {
                        let run = self.service.get_run_detail(&self.user, id).await?.run;
                        if !run.status.is_terminal() {
                            bail!("Run {} ended as {} but is still stored as {}", id, status, run.status);
                        }
                        return Ok(run);
                    }
                }
                // lagged, closed or quiet: fall through to a fresh read
                Ok(Err(e)) => debug!("Run {} event stream: {}", id, e),
                Err(_) => debug!("No event for run {} within {:?}", id, WAIT_POLL_INTERVAL),
            }
        }
    }
}
