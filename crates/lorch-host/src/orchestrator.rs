use std::sync::Arc;

use lorch_store::{MappingTable, MatchMapping, MatchMappingStore};
use serde::Serialize;
use serde_json::json;
use tracing::{info, warn};

use crate::cli::{CliRunner, LedgerCli, SharedProvisioned};
use crate::config::{OrchestratorConfig, ProvisionedConfig};
use crate::coordinator::SubmissionCoordinator;
use crate::error::{OrchestratorError, OrchestratorResult};
use crate::factory::{ChainAppFactory, RetryPolicy};
use crate::gate::SingleFlightGate;
use crate::graphql::GraphqlClient;
use crate::model::Submission;
use crate::pipeline::ProvisioningPipeline;
use crate::process::ProcessSupervisor;
use crate::services::{NodeServices, ServiceControl, ServiceStatus};

/// A freshly allocated match: its chain, the session application on it, and
/// the id the caller should use for the match.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AllocatedMatch {
    pub chain_id: String,
    pub app_id: String,
    pub match_id: String,
}

/// Everything the HTTP surface and the CLI talk to.
pub struct Orchestrator {
    config: OrchestratorConfig,
    provisioned: SharedProvisioned,
    store: Arc<MatchMappingStore>,
    services: Arc<NodeServices>,
    pipeline: ProvisioningPipeline,
    factory: ChainAppFactory,
    gate: SingleFlightGate,
    coordinator: SubmissionCoordinator,
}

impl Orchestrator {
    /// Wire all components against the real ledger CLI and load the mapping
    /// table from disk.
    pub fn new(config: OrchestratorConfig) -> Self {
        let supervisor = ProcessSupervisor::new();
        let provisioned = SharedProvisioned::default();
        let cli: Arc<dyn CliRunner> = Arc::new(LedgerCli::new(
            supervisor.clone(),
            &config.cli_path,
            provisioned.clone(),
        ));
        Self::with_cli(config, supervisor, provisioned, cli)
    }

    fn with_cli(
        config: OrchestratorConfig,
        supervisor: ProcessSupervisor,
        provisioned: SharedProvisioned,
        cli: Arc<dyn CliRunner>,
    ) -> Self {
        let store = Arc::new(MatchMappingStore::open(&config.mapping_path));
        info!(path = %store.path().display(), entries = store.len(), "match mappings loaded");

        let services = Arc::new(NodeServices::new(supervisor, &config, provisioned.clone()));
        let pipeline =
            ProvisioningPipeline::new(cli.clone(), services.clone(), provisioned.clone(), &config);
        let factory = ChainAppFactory::new(cli, config.timing.allocation_pause);
        let gate = SingleFlightGate::new(
            config.timing.gate_stop_settle,
            config.timing.gate_restart_settle,
        );
        let coordinator = SubmissionCoordinator::new(
            store.clone(),
            services.clone(),
            GraphqlClient::new(config.service.base_url()),
            provisioned.clone(),
            config.publisher_chain.clone(),
            config.timing.leaderboard_timeout,
        );
        Self {
            config,
            provisioned,
            store,
            services,
            pipeline,
            factory,
            gate,
            coordinator,
        }
    }

    pub fn settings(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Retry policy for app creation from the configured defaults.
    pub fn default_retry(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.config.timing.create_app_retries,
            retry_delay: self.config.timing.create_app_retry_delay,
        }
    }

    /// Full cold-start provisioning.
    pub async fn start_node(&self) -> OrchestratorResult<ProvisionedConfig> {
        self.pipeline.run().await
    }

    /// Open a chain and create a session application on it, single-flight.
    /// The mapping is keyed by the new chain id.
    pub async fn open_and_create(
        &self,
        module_id: &str,
        leaderboard_app_id: &str,
        match_id: Option<&str>,
        retry: &RetryPolicy,
    ) -> OrchestratorResult<AllocatedMatch> {
        require("moduleId", module_id)?;
        require("leaderboardAppId", leaderboard_app_id)?;

        let factory = self.factory.clone();
        let store = self.store.clone();
        let module_id = module_id.to_string();
        let constructor = json!({ "leaderboard": leaderboard_app_id });
        let retry = retry.clone();
        let (chain_id, app_id) = self
            .gate
            .run_exclusive(
                self.services.clone(),
                self.config.timing.gate_acquire_timeout,
                move || async move {
                    let chain_id = factory.open_chain().await?;
                    let app_id = factory
                        .create_app(&module_id, &chain_id, &constructor, &retry)
                        .await?;
                    // match id == chain id
                    if !store.upsert_created(&chain_id, &chain_id, &app_id) {
                        warn!(%chain_id, "mapping recorded in memory only");
                    }
                    Ok((chain_id, app_id))
                },
            )
            .await?;

        let match_id = match_id
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .map_or_else(|| chain_id.clone(), str::to_string);
        info!(%chain_id, %app_id, %match_id, "match allocated");
        Ok(AllocatedMatch {
            chain_id,
            app_id,
            match_id,
        })
    }

    pub async fn open_chain(&self) -> OrchestratorResult<String> {
        self.factory.open_chain().await
    }

    pub async fn create_app(
        &self,
        module_id: &str,
        chain_candidate: &str,
        leaderboard_app_id: &str,
        retry: &RetryPolicy,
    ) -> OrchestratorResult<String> {
        require("leaderboardAppId", leaderboard_app_id)?;
        self.factory
            .create_app(
                module_id,
                chain_candidate,
                &json!({ "leaderboard": leaderboard_app_id }),
                retry,
            )
            .await
    }

    pub async fn start_service(&self) -> OrchestratorResult<u32> {
        self.services.start_service().await
    }

    pub async fn stop_service(&self) {
        self.services.stop_service().await
    }

    pub async fn service_status(&self) -> ServiceStatus {
        self.services.service_status().await
    }

    /// Stop the daemon and the node.
    pub async fn shutdown(&self) {
        self.services.stop_service().await;
        self.services.stop_node().await;
    }

    pub async fn submit_match_result(&self, submission: &Submission) -> OrchestratorResult<String> {
        self.coordinator
            .submit(
                submission.chain_id.as_deref(),
                submission.app_id.as_deref(),
                &submission.match_result,
                self.config.timing.submit_timeout,
            )
            .await
    }

    pub async fn leaderboard(&self, chain_id: &str, app_id: &str) -> OrchestratorResult<String> {
        self.coordinator
            .fetch(chain_id, app_id, self.config.timing.query_timeout)
            .await
    }

    pub fn mapping(&self, match_id: &str) -> Option<MatchMapping> {
        self.store.get(match_id)
    }

    pub fn mappings(&self) -> MappingTable {
        self.store.get_all()
    }

    /// Snapshot of the provisioned environment.
    pub async fn config(&self) -> ProvisionedConfig {
        self.provisioned.read().await.clone()
    }
}

fn require(field: &str, value: &str) -> OrchestratorResult<()> {
    if value.trim().is_empty() {
        return Err(OrchestratorError::InvalidInput(format!("{field} is required")));
    }
    Ok(())
}
