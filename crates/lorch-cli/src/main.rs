mod commands;
mod opts;
mod output;

use anyhow::Result;
use clap::{Parser, Subcommand};

use commands::mapping::MappingGetArgs;
use commands::serve::ServeArgs;
use opts::GlobalOpts;

#[derive(Parser, Debug)]
#[command(name = "lorch", version, about = "Ledger orchestrator for match sessions")]
struct Cli {
    #[command(flatten)]
    opts: GlobalOpts,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Serve the HTTP API until interrupted
    Serve(ServeArgs),

    /// Bootstrap the node, publish applications and start the service once
    Provision,

    /// Inspect the persisted match mappings
    #[command(subcommand)]
    Mapping(MappingCommand),
}

#[derive(Subcommand, Debug)]
enum MappingCommand {
    /// Show one mapping by match id
    Get(MappingGetArgs),

    /// List every mapping
    List,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let opts = &cli.opts;
    commands::setup_logging();

    match cli.command {
        Command::Serve(args) => commands::serve::cmd_serve(opts, &args).await,
        Command::Provision => commands::provision::cmd_provision(opts).await,
        Command::Mapping(cmd) => match cmd {
            MappingCommand::Get(args) => commands::mapping::cmd_mapping_get(opts, &args),
            MappingCommand::List => commands::mapping::cmd_mapping_list(opts),
        },
    }
}
