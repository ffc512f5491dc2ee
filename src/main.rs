//! Operator binary: runs the repeating coin-flip round loop.

use clap::{Parser, Subcommand};
use std::sync::Arc;
use tokio::time::{interval, Duration};
use tossbook::config::{generate_sample_config, ConfigLoader};
use tossbook::draw::WeightedDraw;
use tossbook::engine::WagerEngine;
use tossbook::errors::EngineError;
use tossbook::notifier::FanoutNotifier;
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "tossbook", about = "Wagering round lifecycle and settlement engine")]
struct Cli {
    /// Path to a TOML configuration file.
    #[arg(short, long)]
    config: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the round ticker: keep a round open, settle elapsed ones.
    Serve,
    /// Write a sample configuration file and exit.
    InitConfig {
        #[arg(default_value = "tossbook.toml")]
        path: String,
    },
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let cli = Cli::parse();
    if let Err(e) = run(cli).await {
        error!("fatal: {}", e);
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<(), EngineError> {
    match cli.command {
        Command::InitConfig { path } => {
            generate_sample_config(&path)?;
            info!(path = %path, "sample configuration written");
            Ok(())
        }
        Command::Serve => {
            let mut loader = ConfigLoader::new();
            if let Some(path) = &cli.config {
                loader = loader.with_path(path);
            }
            let cfg = loader.load()?;

            let draw = Arc::new(WeightedDraw::new(cfg.round.heads_bps));
            let notifier = Arc::new(FanoutNotifier::new());
            let engine = WagerEngine::open_with(cfg, draw, notifier)?;
            serve(engine).await
        }
    }
}

/// Keeps exactly one round open and settles each one shortly after its
/// window passes. Clients run their own timers and may call settlement
/// concurrently; the engine converges on one result either way.
async fn serve(engine: WagerEngine) -> Result<(), EngineError> {
    info!(
        duration_secs = engine.config().round.duration_secs,
        payout_bps = engine.config().round.payout_bps,
        "round ticker started"
    );

    let mut tick = interval(Duration::from_secs(1));
    loop {
        tick.tick().await;

        match engine.advance_rounds().await {
            Ok((Some(settled), _open)) => {
                if let Some(outcome) = settled.outcome {
                    info!(round = %settled.id, number = settled.number, %outcome, "settled");
                }
            }
            Ok((None, _open)) => {}
            Err(e) => error!("round tick failed: {}", e),
        }
    }
}
