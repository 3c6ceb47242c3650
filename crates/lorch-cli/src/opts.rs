use std::path::PathBuf;

use anyhow::Result;
use clap::Args;
use lorch_host::OrchestratorConfig;

#[derive(Args, Debug, Clone)]
pub struct GlobalOpts {
    /// Match mapping file (defaults to <data dir>/linera_orchestrator/match_mapping.json)
    #[arg(long, global = true, env = "MATCH_MAPPING_PATH")]
    pub mapping_path: Option<PathBuf>,

    /// Pretty-print JSON output
    #[arg(long, global = true)]
    pub pretty: bool,
}

impl GlobalOpts {
    /// Orchestrator settings from the environment, with CLI overrides applied.
    pub fn orchestrator_config(&self) -> Result<OrchestratorConfig> {
        let mut config = OrchestratorConfig::from_env()?;
        if let Some(path) = &self.mapping_path {
            config.mapping_path = path.clone();
        }
        Ok(config)
    }

    pub fn resolved_mapping_path(&self) -> PathBuf {
        self.mapping_path
            .clone()
            .unwrap_or_else(lorch_store::default_mapping_path)
    }
}
