//! `lorch serve` command.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Args;
use lorch_host::Orchestrator;
use lorch_host::http::spawn_http_server;
use tokio::sync::broadcast;
use tracing::info;

use crate::opts::GlobalOpts;

#[derive(Args, Debug)]
pub struct ServeArgs {
    /// Address the HTTP API listens on
    #[arg(long, env = "LORCH_BIND", default_value = "0.0.0.0:5290")]
    pub bind: SocketAddr,

    /// Leave the node and service running on exit
    #[arg(long)]
    pub keep_running: bool,
}

pub async fn cmd_serve(opts: &GlobalOpts, args: &ServeArgs) -> Result<()> {
    let config = opts.orchestrator_config()?;
    let orchestrator = Arc::new(Orchestrator::new(config));

    let (shutdown_tx, _) = broadcast::channel(1);
    let mut server = spawn_http_server(args.bind, orchestrator.clone(), shutdown_tx.clone());

    let served = tokio::select! {
        // only returns early on a bind or serve failure
        joined = &mut server => joined.context("http server task")?,
        signal = tokio::signal::ctrl_c() => {
            signal.context("listen for ctrl-c")?;
            info!("shutdown requested");
            let _ = shutdown_tx.send(());
            server.await.context("http server task")?
        }
    };

    if args.keep_running {
        info!("leaving ledger node and service running");
    } else {
        orchestrator.shutdown().await;
    }

    served.map_err(anyhow::Error::msg)
}
