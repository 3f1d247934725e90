use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use perpbot::api::{HyperliquidClient, MarketDataSource};
use perpbot::execution::{PositionManager, RandomOutcomeSimulator};
use perpbot::inference::{InferenceService, OpenAiAnalyst};
use perpbot::market::MarketObserver;
use perpbot::persistence::{JsonlTradeStore, TradeStore};
use perpbot::report::FinalReport;
use perpbot::strategy::SignalGenerator;
use perpbot::{BotConfig, Orchestrator};
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "perpbot", about = "Perpetual futures signal and position orchestrator")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Observe markets, generate signals and manage positions until stopped.
    Run {
        /// Path to a TOML config file.
        #[arg(long)]
        config: Option<PathBuf>,

        /// Stop after this many minutes instead of waiting for Ctrl+C.
        #[arg(long)]
        duration_minutes: Option<u64>,

        /// Disable dry-run simulation.
        #[arg(long, default_value_t = false)]
        live: bool,
    },
    /// Print aggregate statistics for persisted trades.
    Report {
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// Write persisted trades to a CSV file.
    Export {
        #[arg(long)]
        config: Option<PathBuf>,

        /// Destination CSV path.
        #[arg(long)]
        out: PathBuf,
    },
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    setup_logging();

    let cli = Cli::parse();
    match cli.command {
        Commands::Run {
            config,
            duration_minutes,
            live,
        } => {
            let mut cfg = load_config(config.as_deref())?;
            if live {
                cfg.dry_run = false;
                cfg.validate().context("Live mode needs an account")?;
            }
            run(cfg, duration_minutes).await
        }
        Commands::Report { config } => {
            let cfg = load_config(config.as_deref())?;
            let trades = trade_store(&cfg)
                .load_trades()
                .map_err(|e| anyhow::anyhow!("{}", e))
                .with_context(|| format!("Failed to read {}", cfg.trades_path))?;
            FinalReport::from_trades(&trades, cfg.capital).print_report();
            Ok(())
        }
        Commands::Export { config, out } => {
            let cfg = load_config(config.as_deref())?;
            let rows = trade_store(&cfg)
                .export_csv(&out)
                .map_err(|e| anyhow::anyhow!("{}", e))
                .with_context(|| format!("Failed to export to {}", out.display()))?;
            tracing::info!("💾 Exported {} trades to {}", rows, out.display());
            Ok(())
        }
    }
}

fn setup_logging() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("perpbot=info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn load_config(path: Option<&std::path::Path>) -> Result<BotConfig> {
    match BotConfig::load(path) {
        Ok(cfg) => Ok(cfg),
        Err(e) => {
            tracing::error!("Configuration error: {}", e);
            Err(e.into())
        }
    }
}

fn trade_store(cfg: &BotConfig) -> JsonlTradeStore {
    JsonlTradeStore::new(&cfg.trades_path)
}

async fn run(cfg: BotConfig, duration_minutes: Option<u64>) -> Result<()> {
    let config = Arc::new(cfg);

    let source: Arc<dyn MarketDataSource> =
        Arc::new(HyperliquidClient::with_base_url(&config.market_api_url));

    let inference: Option<Arc<dyn InferenceService>> = match &config.inference_api_key {
        Some(key) if config.inference_enabled => {
            tracing::info!("🤖 Inference enabled ({})", config.inference_model);
            let analyst: Arc<dyn InferenceService> = Arc::new(OpenAiAnalyst::new(
                key.clone(),
                &config.inference_api_url,
                &config.inference_model,
                config.inference_timeout(),
            ));
            Some(analyst)
        }
        _ => {
            tracing::info!("Inference disabled, using momentum fallback only");
            None
        }
    };

    let store: Arc<dyn TradeStore> = Arc::new(trade_store(&config));
    let observer = Arc::new(MarketObserver::new(config.clone(), source));
    let generator = Arc::new(SignalGenerator::new(config.clone(), inference));
    let positions = Arc::new(PositionManager::new(config.clone(), store));
    let simulator = Arc::new(RandomOutcomeSimulator::new(config.simulation_seed));

    let orchestrator = Arc::new(Orchestrator::new(
        config.clone(),
        observer,
        generator,
        positions,
        simulator,
    ));

    let duration = duration_minutes.map(|m| std::time::Duration::from_secs(m * 60));
    let report = orchestrator.run(duration).await;

    tracing::info!(
        "Session finished: {} trades, {:.1}% win rate, P&L ${:+.2}",
        report.total_trades,
        report.win_rate,
        report.total_pnl
    );
    Ok(())
}
