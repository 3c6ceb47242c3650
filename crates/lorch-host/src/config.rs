use std::path::PathBuf;
use std::time::Duration;

use serde::Serialize;

use crate::error::OrchestratorError;

/// Publisher chain that owns the leaderboard and the published modules.
pub const DEFAULT_PUBLISHER_CHAIN: &str =
    "aee928d4bf3880353b4a3cd9b6f88e6cc6e5ed050860abae439e7782e9b2dfe8";

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Path to the ledger CLI binary.
    pub cli_path: PathBuf,
    /// Directory holding `xfighter_contract.wasm` / `xfighter_service.wasm`.
    pub session_artifacts: PathBuf,
    /// Directory holding `leaderboard_contract.wasm` / `leaderboard_service.wasm`.
    pub leaderboard_artifacts: PathBuf,
    pub publisher_chain: String,
    pub service: ServiceConfig,
    /// Log file receiving the node's stdout/stderr.
    pub node_log: PathBuf,
    /// Mapping persistence file.
    pub mapping_path: PathBuf,
    /// Append-only record of published ids, for postmortems.
    pub deployment_log: PathBuf,
    pub timing: TimingConfig,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        let artifacts = PathBuf::from("target/wasm32-unknown-unknown/release");
        Self {
            cli_path: PathBuf::from("linera"),
            session_artifacts: artifacts.clone(),
            leaderboard_artifacts: artifacts,
            publisher_chain: DEFAULT_PUBLISHER_CHAIN.into(),
            service: ServiceConfig::default(),
            node_log: PathBuf::from("/tmp/linera_output.log"),
            mapping_path: lorch_store::default_mapping_path(),
            deployment_log: PathBuf::from("deployment_ids.json"),
            timing: TimingConfig::default(),
        }
    }
}

impl OrchestratorConfig {
    /// Defaults overridden by environment variables; fails only on malformed values.
    pub fn from_env() -> Result<Self, OrchestratorError> {
        let mut cfg = Self::default();
        if let Some(v) = env_var("LINERA_CLI_PATH") {
            cfg.cli_path = v.into();
        }
        if let Some(v) = env_var("XFIGHTER_PATH") {
            cfg.session_artifacts = v.into();
        }
        if let Some(v) = env_var("LEADERBOARD_PATH") {
            cfg.leaderboard_artifacts = v.into();
        }
        if let Some(v) = env_var("LINERA_PUBLISHER_CHAIN") {
            cfg.publisher_chain = v;
        }
        if let Some(v) = env_var("LINERA_SERVICE_HOST") {
            cfg.service.host = v;
        }
        if let Some(v) = env_var("LINERA_SERVICE_PORT") {
            cfg.service.port = v
                .parse()
                .map_err(|e| OrchestratorError::Config(format!("LINERA_SERVICE_PORT '{v}': {e}")))?;
        }
        if let Some(v) = env_var("LORCH_NODE_LOG") {
            cfg.node_log = v.into();
        }
        if let Some(v) = env_var("LORCH_SERVICE_LOG") {
            cfg.service.log = v.into();
        }
        if let Some(v) = env_var("LORCH_DEPLOYMENT_LOG") {
            cfg.deployment_log = v.into();
        }
        if let Some(ms) = env_millis("LORCH_SERVICE_READY_TIMEOUT_MS")? {
            cfg.service.ready_timeout = ms;
        }
        if let Some(ms) = env_millis("LORCH_SUBMIT_TIMEOUT_MS")? {
            cfg.timing.submit_timeout = ms;
        }
        if let Some(ms) = env_millis("LORCH_QUERY_TIMEOUT_MS")? {
            cfg.timing.query_timeout = ms;
        }
        if let Some(ms) = env_millis("LORCH_GATE_TIMEOUT_MS")? {
            cfg.timing.gate_acquire_timeout = ms;
        }
        Ok(cfg)
    }

    pub fn session_contract(&self) -> PathBuf {
        self.session_artifacts.join("xfighter_contract.wasm")
    }

    pub fn session_service(&self) -> PathBuf {
        self.session_artifacts.join("xfighter_service.wasm")
    }

    pub fn leaderboard_contract(&self) -> PathBuf {
        self.leaderboard_artifacts.join("leaderboard_contract.wasm")
    }

    pub fn leaderboard_service(&self) -> PathBuf {
        self.leaderboard_artifacts.join("leaderboard_service.wasm")
    }
}

/// The query/service daemon that fronts the node over GraphQL.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub host: String,
    pub port: u16,
    pub log: PathBuf,
    /// Log line that signals the daemon is serving.
    pub ready_marker: String,
    /// Log substrings that signal startup failed.
    pub failure_markers: Vec<String>,
    pub ready_timeout: Duration,
    pub poll_interval: Duration,
    /// Pause after signalling the daemon so its storage lock is released.
    pub stop_grace: Duration,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            host: "localhost".into(),
            port: 8080,
            log: PathBuf::from("/tmp/linera_service.log"),
            ready_marker: "GraphiQL IDE".into(),
            failure_markers: vec!["error".into(), "panic".into()],
            ready_timeout: Duration::from_secs(30),
            poll_interval: Duration::from_millis(500),
            stop_grace: Duration::from_millis(500),
        }
    }
}

impl ServiceConfig {
    pub fn base_url(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }
}

/// Delays, retry bounds and timeouts.
#[derive(Debug, Clone)]
pub struct TimingConfig {
    pub env_poll_interval: Duration,
    pub env_poll_attempts: u32,
    /// Pause after the node exported its environment.
    pub node_settle: Duration,
    /// Pause between publish steps.
    pub publish_settle: Duration,
    /// Pause before each ledger CLI call that allocates a chain or app.
    pub allocation_pause: Duration,
    pub create_app_retries: u32,
    pub create_app_retry_delay: Duration,
    pub gate_acquire_timeout: Duration,
    /// Pause after stopping the daemon inside the gate.
    pub gate_stop_settle: Duration,
    /// Pause after restarting the daemon inside the gate.
    pub gate_restart_settle: Duration,
    pub submit_timeout: Duration,
    pub query_timeout: Duration,
    pub leaderboard_timeout: Duration,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            env_poll_interval: Duration::from_millis(500),
            env_poll_attempts: 60,
            node_settle: Duration::from_secs(1),
            publish_settle: Duration::from_millis(200),
            allocation_pause: Duration::from_millis(500),
            create_app_retries: 5,
            create_app_retry_delay: Duration::from_millis(2000),
            gate_acquire_timeout: Duration::from_millis(1000),
            gate_stop_settle: Duration::from_secs(1),
            gate_restart_settle: Duration::from_millis(500),
            submit_timeout: Duration::from_secs(10),
            query_timeout: Duration::from_secs(8),
            leaderboard_timeout: Duration::from_secs(8),
        }
    }
}

impl TimingConfig {
    /// All pauses zeroed and retries kept; for tests and local tooling.
    pub fn immediate() -> Self {
        Self {
            env_poll_interval: Duration::from_millis(10),
            node_settle: Duration::ZERO,
            publish_settle: Duration::ZERO,
            allocation_pause: Duration::ZERO,
            create_app_retry_delay: Duration::ZERO,
            gate_stop_settle: Duration::ZERO,
            gate_restart_settle: Duration::ZERO,
            ..Self::default()
        }
    }
}

/// Environment accumulated by a bootstrap run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ProvisionedConfig {
    pub wallet: Option<String>,
    pub storage: Option<String>,
    pub keystore: Option<String>,
    pub module_id: Option<String>,
    pub leaderboard_app_id: Option<String>,
    pub session_app_id: Option<String>,
    pub node_pid: Option<u32>,
    pub service_pid: Option<u32>,
}

impl ProvisionedConfig {
    pub fn is_ready(&self) -> bool {
        [
            &self.wallet,
            &self.storage,
            &self.module_id,
            &self.leaderboard_app_id,
            &self.session_app_id,
        ]
        .iter()
        .all(|v| v.as_deref().is_some_and(|s| !s.is_empty()))
    }

    /// Variables handed to every ledger CLI child; unset values are omitted.
    pub fn cli_env(&self) -> Vec<(String, String)> {
        [
            ("LINERA_WALLET", &self.wallet),
            ("LINERA_STORAGE", &self.storage),
            ("LINERA_KEYSTORE", &self.keystore),
        ]
        .into_iter()
        .filter_map(|(key, value)| {
            value
                .as_deref()
                .filter(|v| !v.is_empty())
                .map(|v| (key.to_string(), v.to_string()))
        })
        .collect()
    }
}

fn env_var(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn env_millis(key: &str) -> Result<Option<Duration>, OrchestratorError> {
    env_var(key)
        .map(|v| {
            v.parse::<u64>()
                .map(Duration::from_millis)
                .map_err(|e| OrchestratorError::Config(format!("{key} '{v}': {e}")))
        })
        .transpose()
}
