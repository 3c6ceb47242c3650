//! `lorch provision` command.

use anyhow::Result;
use lorch_host::Orchestrator;
use serde_json::json;

use crate::opts::GlobalOpts;
use crate::output::print_json;

/// Runs the cold-start pipeline once. The node and service outlive this
/// process.
pub async fn cmd_provision(opts: &GlobalOpts) -> Result<()> {
    let orchestrator = Orchestrator::new(opts.orchestrator_config()?);
    let config = orchestrator.start_node().await?;
    print_json(
        opts,
        &json!({
            "isReady": config.is_ready(),
            "config": config,
        }),
    )
}
