//! Todoflow binary: load configuration, assemble the pipeline, run it
//! to termination.
//!
//! Ships with the in-memory transport for local runs; deployments
//! against a real broker implement [`todoflow::transport::LogTransport`]
//! and swap it in here.

use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use todoflow::runner::Runner;
use todoflow::transport::MemoryTransport;
use tracing::info;

#[derive(Debug, Parser)]
#[command(name = "todoflow", about = "Keyed event-processing pipeline for todo actions")]
struct Args {
    /// Path to the configuration document; falls back to the CONFIG
    /// environment variable, then the bundled default.
    #[arg(long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    todoflow::observability::init();
    let args = Args::parse();

    let config = todoflow::config::load(args.config.as_deref())?;
    let transport = Arc::new(MemoryTransport::new());

    let mut runner = Runner::new(transport);
    runner.configure(config)?;
    runner.assemble()?;

    let cancellation = runner.cancellation();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            cancellation.cancel("ctrl-c");
        }
    });

    let outcome = runner.run().await?;
    info!(?outcome, "pipeline terminated");
    Ok(())
}
