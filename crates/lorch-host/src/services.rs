//! Lifecycle of the ledger node and its query/service daemon.
//!
//! Both are exclusively owned: at most one of each is tracked at a time and
//! their pids live in the shared [`ProvisionedConfig`](crate::config::ProvisionedConfig).

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::{Mutex, watch};
use tracing::{info, warn};

use crate::cli::SharedProvisioned;
use crate::config::{OrchestratorConfig, ServiceConfig};
use crate::error::{OrchestratorError, OrchestratorResult};
use crate::extract::env_assignment;
use crate::process::{LogTail, MarkerOutcome, ProcessSupervisor};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceStatus {
    pub is_running: bool,
    pub pid: Option<u32>,
}

/// Control over the query/service daemon. The gate and the submission
/// coordinator only need this much.
#[async_trait]
pub trait ServiceControl: Send + Sync {
    /// Start the daemon unless it already runs; returns its pid.
    async fn start_service(&self) -> OrchestratorResult<u32>;
    /// Stop the daemon if one is tracked.
    async fn stop_service(&self);
    async fn service_status(&self) -> ServiceStatus;

    /// Stop the daemon and keep it down until [`resume`](Self::resume).
    async fn suspend(&self) {
        self.stop_service().await;
    }

    /// Lift a [`suspend`](Self::suspend) and start the daemon again.
    async fn resume(&self) -> OrchestratorResult<u32> {
        self.start_service().await
    }

    async fn ensure_service(&self) -> OrchestratorResult<()> {
        if !self.service_status().await.is_running {
            info!("ledger service not running; starting");
            self.start_service().await?;
        }
        Ok(())
    }
}

pub struct NodeServices {
    supervisor: ProcessSupervisor,
    cli_path: std::path::PathBuf,
    node_log: std::path::PathBuf,
    env_poll_interval: Duration,
    env_poll_attempts: u32,
    service: ServiceConfig,
    provisioned: SharedProvisioned,
    /// Serializes daemon start/stop so two callers never launch two daemons.
    service_lock: Mutex<()>,
    /// True while an allocation holds the daemon stopped; starts wait for it.
    held: watch::Sender<bool>,
}

impl NodeServices {
    pub fn new(
        supervisor: ProcessSupervisor,
        config: &OrchestratorConfig,
        provisioned: SharedProvisioned,
    ) -> Self {
        Self {
            supervisor,
            cli_path: config.cli_path.clone(),
            node_log: config.node_log.clone(),
            env_poll_interval: config.timing.env_poll_interval,
            env_poll_attempts: config.timing.env_poll_attempts,
            service: config.service.clone(),
            provisioned,
            service_lock: Mutex::new(()),
            held: watch::Sender::new(false),
        }
    }

    /// Stop the tracked node, if any.
    pub async fn stop_node(&self) {
        let pid = self.provisioned.write().await.node_pid.take();
        if let Some(pid) = pid {
            info!(pid, "stopping ledger node");
            self.supervisor.stop(pid);
        }
    }

    /// Launch `<cli> net up` and wait until it has exported its wallet and
    /// storage locations. Both are written into the shared config.
    pub async fn start_node(&self) -> OrchestratorResult<(String, String)> {
        remove_stale_log(&self.node_log).await;
        let pid = self.supervisor.launch_detached(
            &self.cli_path,
            ["net", "up"],
            &[],
            &self.node_log,
        )?;
        {
            let mut provisioned = self.provisioned.write().await;
            provisioned.node_pid = Some(pid);
            provisioned.wallet = None;
            provisioned.storage = None;
            provisioned.keystore = None;
        }
        info!(pid, "ledger node launched; waiting for environment");

        let mut wallet = None;
        let mut storage = None;
        for _ in 0..self.env_poll_attempts {
            if let Ok(text) = tokio::fs::read_to_string(&self.node_log).await {
                wallet = wallet.or_else(|| env_assignment(&text, "LINERA_WALLET"));
                storage = storage.or_else(|| env_assignment(&text, "LINERA_STORAGE"));
            }
            if wallet.is_some() && storage.is_some() {
                break;
            }
            tokio::time::sleep(self.env_poll_interval).await;
        }

        let (Some(wallet), Some(storage)) = (wallet, storage) else {
            return Err(OrchestratorError::bootstrap("environment variables not set"));
        };
        {
            let mut provisioned = self.provisioned.write().await;
            provisioned.wallet = Some(wallet.clone());
            provisioned.storage = Some(storage.clone());
        }
        info!(%wallet, %storage, "ledger node environment exported");
        Ok((wallet, storage))
    }

    async fn launch_service(&self) -> OrchestratorResult<u32> {
        let env = {
            let provisioned = self.provisioned.read().await;
            if provisioned.wallet.is_none() || provisioned.storage.is_none() {
                return Err(OrchestratorError::Launch(
                    "LINERA_WALLET or LINERA_STORAGE not set; start the node first".into(),
                ));
            }
            provisioned.cli_env()
        };

        remove_stale_log(&self.service.log).await;
        let tail = LogTail::at_end(&self.service.log).await;
        let port = self.service.port.to_string();
        let pid = self.supervisor.launch_detached(
            &self.cli_path,
            ["service", "--port", port.as_str()],
            &env,
            &self.service.log,
        )?;
        self.provisioned.write().await.service_pid = Some(pid);
        info!(pid, port = self.service.port, log = %self.service.log.display(), "ledger service launched");

        match tail
            .wait_for(
                &self.service.ready_marker,
                &self.service.failure_markers,
                self.service.poll_interval,
                self.service.ready_timeout,
            )
            .await
        {
            MarkerOutcome::Ready => {
                info!(pid, port = self.service.port, "ledger service ready");
                Ok(pid)
            }
            MarkerOutcome::Failed(line) => {
                warn!(pid, %line, "ledger service failed to start");
                self.supervisor.stop(pid);
                self.provisioned.write().await.service_pid = None;
                Err(OrchestratorError::Launch(format!("ledger service failed: {line}")))
            }
            MarkerOutcome::TimedOut => {
                warn!(
                    pid,
                    timeout_ms = self.service.ready_timeout.as_millis() as u64,
                    "ledger service readiness not observed; continuing"
                );
                Ok(pid)
            }
        }
    }

    async fn start_locked(&self) -> OrchestratorResult<u32> {
        let current = self.provisioned.read().await.service_pid;
        if let Some(pid) = current {
            if self.supervisor.is_running(pid) {
                info!(pid, "ledger service already running");
                return Ok(pid);
            }
            self.provisioned.write().await.service_pid = None;
        }
        self.launch_service().await
    }

    async fn stop_locked(&self) {
        let Some(pid) = self.provisioned.write().await.service_pid.take() else {
            info!("ledger service not running (no pid)");
            return;
        };
        info!(pid, "stopping ledger service");
        self.supervisor.stop(pid);
        // let the daemon release its storage lock
        tokio::time::sleep(self.service.stop_grace).await;
        info!(pid, "ledger service stopped");
    }

    async fn wait_until_released(&self) {
        let mut held = self.held.subscribe();
        let is_held = *held.borrow();
        if is_held {
            info!("ledger service held for allocation; deferring start");
        }
        // the sender lives in self, so the channel cannot close here
        let _ = held.wait_for(|held| !*held).await;
    }

    fn tracked_running(&self, pid: Option<u32>) -> bool {
        pid.is_some_and(|pid| self.supervisor.is_running(pid))
    }
}

#[async_trait]
impl ServiceControl for NodeServices {
    async fn start_service(&self) -> OrchestratorResult<u32> {
        loop {
            self.wait_until_released().await;
            let _guard = self.service_lock.lock().await;
            let is_held = *self.held.borrow();
            if is_held {
                continue;
            }
            return self.start_locked().await;
        }
    }

    async fn stop_service(&self) {
        let _guard = self.service_lock.lock().await;
        self.stop_locked().await;
    }

    async fn suspend(&self) {
        let _guard = self.service_lock.lock().await;
        self.held.send_replace(true);
        self.stop_locked().await;
    }

    async fn resume(&self) -> OrchestratorResult<u32> {
        self.held.send_replace(false);
        self.start_service().await
    }

    async fn service_status(&self) -> ServiceStatus {
        let pid = self.provisioned.read().await.service_pid;
        if self.tracked_running(pid) {
            return ServiceStatus {
                is_running: true,
                pid,
            };
        }
        if pid.is_some() {
            let mut provisioned = self.provisioned.write().await;
            if provisioned.service_pid == pid {
                provisioned.service_pid = None;
            }
        }
        ServiceStatus {
            is_running: false,
            pid: None,
        }
    }
}

async fn remove_stale_log(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => {}
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
        Err(err) => warn!(path = %path.display(), "failed to remove old log: {err}"),
    }
}
