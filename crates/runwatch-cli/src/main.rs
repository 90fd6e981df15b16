mod commands;
mod opts;
mod output;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use commands::cancel::CancelArgs;
use commands::status::StatusArgs;
use commands::watch::WatchArgs;
use opts::GlobalOpts;

#[derive(Parser, Debug)]
#[command(name = "runwatch", version, about = "Follow optimisation runs live")]
struct Cli {
    #[command(flatten)]
    opts: GlobalOpts,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Follow a run's live progress until it finishes
    Watch(WatchArgs),

    /// Fetch and print a run record
    Status(StatusArgs),

    /// Request cancellation of a run
    Cancel(CancelArgs),
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    setup_logging();
    let opts = &cli.opts;

    match cli.command {
        Command::Watch(args) => commands::watch::cmd_watch(opts, &args).await,
        Command::Status(args) => commands::status::cmd_status(opts, &args).await,
        Command::Cancel(args) => commands::cancel::cmd_cancel(opts, &args).await,
    }
}

fn setup_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_level(true)
        .init();
}
