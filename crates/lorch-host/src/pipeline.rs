//! Cold start: node up, modules and applications published, service running.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tracing::info;

use crate::cli::{CliRunner, SharedProvisioned, argv};
use crate::config::{OrchestratorConfig, ProvisionedConfig};
use crate::deployments::DeploymentLog;
use crate::error::{OrchestratorError, OrchestratorResult};
use crate::extract::{PUBLISH_STRATEGIES, extract};
use crate::services::{NodeServices, ServiceControl};

pub struct ProvisioningPipeline {
    cli: Arc<dyn CliRunner>,
    services: Arc<NodeServices>,
    provisioned: SharedProvisioned,
    deployments: DeploymentLog,
    publisher_chain: String,
    session_contract: PathBuf,
    session_service: PathBuf,
    leaderboard_contract: PathBuf,
    leaderboard_service: PathBuf,
    node_settle: Duration,
    publish_settle: Duration,
}

impl ProvisioningPipeline {
    pub fn new(
        cli: Arc<dyn CliRunner>,
        services: Arc<NodeServices>,
        provisioned: SharedProvisioned,
        config: &OrchestratorConfig,
    ) -> Self {
        Self {
            cli,
            services,
            provisioned,
            deployments: DeploymentLog::new(&config.deployment_log),
            publisher_chain: config.publisher_chain.clone(),
            session_contract: config.session_contract(),
            session_service: config.session_service(),
            leaderboard_contract: config.leaderboard_contract(),
            leaderboard_service: config.leaderboard_service(),
            node_settle: config.timing.node_settle,
            publish_settle: config.timing.publish_settle,
        }
    }

    /// Run every step in order; the first failure aborts the run. The shared
    /// config keeps whatever was filled in so far.
    pub async fn run(&self) -> OrchestratorResult<ProvisionedConfig> {
        info!("cleaning up previous ledger node and service");
        self.services.stop_service().await;
        self.services.stop_node().await;
        {
            let mut provisioned = self.provisioned.write().await;
            provisioned.module_id = None;
            provisioned.leaderboard_app_id = None;
            provisioned.session_app_id = None;
        }

        self.services.start_node().await.map_err(|err| match err {
            OrchestratorError::Bootstrap { .. } => err,
            other => OrchestratorError::bootstrap_step("start node", other),
        })?;
        tokio::time::sleep(self.node_settle).await;

        self.publish_applications().await?;

        self.services
            .start_service()
            .await
            .map_err(|err| OrchestratorError::bootstrap_step("start service", err))?;

        let snapshot = self.provisioned.read().await.clone();
        info!(ready = snapshot.is_ready(), "ledger ready for matchmaking");
        Ok(snapshot)
    }

    /// Publish the session module, the leaderboard application and the
    /// session application, in that order.
    pub(crate) async fn publish_applications(&self) -> OrchestratorResult<()> {
        let module_id = self
            .publish(
                "publish session module",
                argv([
                    "publish-module".to_string(),
                    path_arg(&self.session_contract),
                    path_arg(&self.session_service),
                    self.publisher_chain.clone(),
                ]),
            )
            .await?;
        self.provisioned.write().await.module_id = Some(module_id.clone());
        self.deployments.append("XFighterModuleId", &module_id).await;
        info!(%module_id, "session module published");
        tokio::time::sleep(self.publish_settle).await;

        let leaderboard_id = self
            .publish(
                "create leaderboard",
                argv([
                    "publish-and-create".to_string(),
                    path_arg(&self.leaderboard_contract),
                    path_arg(&self.leaderboard_service),
                    self.publisher_chain.clone(),
                    "--json-argument".into(),
                    "null".into(),
                ]),
            )
            .await?;
        self.provisioned.write().await.leaderboard_app_id = Some(leaderboard_id.clone());
        self.deployments.append("LeaderboardAppId", &leaderboard_id).await;
        info!(%leaderboard_id, "leaderboard application created");
        tokio::time::sleep(self.publish_settle).await;

        let session_app_id = self
            .publish(
                "create session application",
                argv([
                    "publish-and-create".to_string(),
                    path_arg(&self.session_contract),
                    path_arg(&self.session_service),
                    "--json-argument".into(),
                    json!({ "leaderboard": leaderboard_id }).to_string(),
                    "--json-parameters".into(),
                    json!({ "publisher": self.publisher_chain }).to_string(),
                ]),
            )
            .await?;
        self.provisioned.write().await.session_app_id = Some(session_app_id.clone());
        self.deployments.append("XFighterAppId", &session_app_id).await;
        info!(%session_app_id, "session application created");
        tokio::time::sleep(self.publish_settle).await;
        Ok(())
    }

    async fn publish(&self, step: &str, args: Vec<String>) -> OrchestratorResult<String> {
        let output = self
            .cli
            .run(&args)
            .await
            .map_err(|err| OrchestratorError::bootstrap_step(step, err))?;
        extract(&output, PUBLISH_STRATEGIES).ok_or_else(|| {
            OrchestratorError::bootstrap_step(
                step,
                OrchestratorError::Parse(format!("no identifier in output of {}", args[0])),
            )
        })
    }
}

fn path_arg(path: &std::path::Path) -> String {
    path.to_string_lossy().into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::factory::tests::{ScriptedCli, exit_err};
    use crate::process::ProcessSupervisor;
    use tempfile::TempDir;

    fn pipeline(dir: &TempDir, cli: Arc<ScriptedCli>) -> (SharedProvisioned, ProvisioningPipeline) {
        let config = OrchestratorConfig {
            session_artifacts: PathBuf::from("/wasm/session"),
            leaderboard_artifacts: PathBuf::from("/wasm/lb"),
            publisher_chain: "publisher".into(),
            deployment_log: dir.path().join("deployment_ids.json"),
            node_log: dir.path().join("node.log"),
            timing: crate::config::TimingConfig::immediate(),
            ..OrchestratorConfig::default()
        };
        let provisioned = SharedProvisioned::default();
        let services = Arc::new(NodeServices::new(
            ProcessSupervisor::new(),
            &config,
            provisioned.clone(),
        ));
        let pipeline = ProvisioningPipeline::new(cli, services, provisioned.clone(), &config);
        (provisioned, pipeline)
    }

    #[tokio::test]
    async fn publishes_in_order_and_records_ids() {
        let dir = TempDir::new().unwrap();
        let module = "0123".repeat(40);
        let cli = Arc::new(
            ScriptedCli::default()
                .on("publish-module", Ok(format!("INFO publishing\n{module}\n")))
                .on("publish-and-create", Ok("lb-app-id\n".into()))
                .on("publish-and-create", Ok("session-app-id\n".into())),
        );
        let (provisioned, pipeline) = pipeline(&dir, cli.clone());
        pipeline.publish_applications().await.expect("publish");

        let snapshot = provisioned.read().await.clone();
        assert_eq!(snapshot.module_id.as_deref(), Some(module.as_str()));
        assert_eq!(snapshot.leaderboard_app_id.as_deref(), Some("lb-app-id"));
        assert_eq!(snapshot.session_app_id.as_deref(), Some("session-app-id"));

        let creates = cli.calls_to("publish-and-create");
        assert_eq!(
            creates[0],
            argv([
                "publish-and-create",
                "/wasm/lb/leaderboard_contract.wasm",
                "/wasm/lb/leaderboard_service.wasm",
                "publisher",
                "--json-argument",
                "null",
            ])
        );
        assert_eq!(
            creates[1],
            argv([
                "publish-and-create",
                "/wasm/session/xfighter_contract.wasm",
                "/wasm/session/xfighter_service.wasm",
                "--json-argument",
                r#"{"leaderboard":"lb-app-id"}"#,
                "--json-parameters",
                r#"{"publisher":"publisher"}"#,
            ])
        );

        let record = std::fs::read_to_string(dir.path().join("deployment_ids.json")).unwrap();
        let keys: Vec<_> = record
            .lines()
            .map(|l| l.split_whitespace().nth(1).unwrap().to_string())
            .collect();
        assert_eq!(keys, ["XFighterModuleId:", "LeaderboardAppId:", "XFighterAppId:"]);
    }

    #[tokio::test]
    async fn failed_publish_aborts_and_leaves_config_not_ready() {
        let dir = TempDir::new().unwrap();
        let cli = Arc::new(
            ScriptedCli::default()
                .on("publish-module", Ok("module-id\n".into()))
                .on("publish-and-create", Err(exit_err(1, "leaderboard bytecode missing"))),
        );
        let (provisioned, pipeline) = pipeline(&dir, cli.clone());
        let err = pipeline.publish_applications().await.expect_err("aborts");
        match &err {
            OrchestratorError::Bootstrap { message, source } => {
                assert!(message.starts_with("create leaderboard"));
                assert!(matches!(
                    source.as_deref(),
                    Some(OrchestratorError::ProcessExecution { exit_code: 1, .. })
                ));
            }
            other => panic!("unexpected error: {other:?}"),
        }
        let snapshot = provisioned.read().await.clone();
        assert_eq!(snapshot.module_id.as_deref(), Some("module-id"));
        assert!(snapshot.leaderboard_app_id.is_none());
        assert!(!snapshot.is_ready());
        assert_eq!(cli.calls_to("publish-and-create").len(), 1);
    }

    #[tokio::test]
    async fn blank_publish_output_is_parse_failure() {
        let dir = TempDir::new().unwrap();
        let cli = Arc::new(ScriptedCli::default().on("publish-module", Ok("\n  \n".into())));
        let (_, pipeline) = pipeline(&dir, cli);
        let err = pipeline.publish_applications().await.expect_err("no id");
        assert!(matches!(
            err,
            OrchestratorError::Bootstrap { source: Some(ref cause), .. }
                if matches!(**cause, OrchestratorError::Parse(_))
        ));
    }
}
