use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::debug;

use crate::config::ProvisionedConfig;
use crate::error::OrchestratorResult;
use crate::process::ProcessSupervisor;

pub type SharedProvisioned = Arc<RwLock<ProvisionedConfig>>;

/// Runs one ledger CLI subcommand to completion and returns its stdout.
#[async_trait]
pub trait CliRunner: Send + Sync {
    async fn run(&self, args: &[String]) -> OrchestratorResult<String>;
}

/// The real ledger CLI, invoked with the wallet/storage/keystore of the
/// current bootstrap in its environment.
pub struct LedgerCli {
    supervisor: ProcessSupervisor,
    cli_path: PathBuf,
    provisioned: SharedProvisioned,
}

impl LedgerCli {
    pub fn new(
        supervisor: ProcessSupervisor,
        cli_path: impl Into<PathBuf>,
        provisioned: SharedProvisioned,
    ) -> Self {
        Self {
            supervisor,
            cli_path: cli_path.into(),
            provisioned,
        }
    }
}

#[async_trait]
impl CliRunner for LedgerCli {
    async fn run(&self, args: &[String]) -> OrchestratorResult<String> {
        let env = self.provisioned.read().await.cli_env();
        debug!(cli = %self.cli_path.display(), ?args, "running ledger cli");
        let out = self
            .supervisor
            .run_and_capture(&self.cli_path, args, &env)
            .await?;
        debug!(subcommand = args.first().map(String::as_str), output = %out.trim(), "ledger cli output");
        Ok(out)
    }
}

/// Build an owned argv from string-ish parts.
pub fn argv<I, S>(parts: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    parts.into_iter().map(Into::into).collect()
}
