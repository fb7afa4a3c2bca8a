use anyhow::{Context, Result};
use chrono::Utc;
use clap::Parser;
use std::{net::SocketAddr, path::PathBuf, sync::Arc, time::Duration};
use tracing::{error, info};

use sniper_engine::{
    api::{self, AppState},
    config::EngineConfig,
    dhan::{client::BASE_URL, DhanClient},
    store::{CsvTradeLog, JsonFileStore},
    CycleOutcome, Engine,
};

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Dhan client id
    #[arg(long, env = "DHAN_CLIENT_ID")]
    client_id: String,

    /// Dhan API access token
    #[arg(long, env = "DHAN_ACCESS_TOKEN")]
    access_token: String,

    /// JSON file with threshold overrides
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Working store (published labels, expiry, manual leg)
    #[arg(long, default_value = "sniper_state.json")]
    state_file: PathBuf,

    /// Trade log archive
    #[arg(long, default_value = "trades.csv")]
    trade_log: PathBuf,

    /// Port for the status API (disabled when absent)
    #[arg(short, long)]
    port: Option<u16>,

    /// Run a single cycle and exit
    #[arg(long)]
    once: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    let args = Args::parse();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("sniper_engine=info")),
        )
        .init();

    let config = match &args.config {
        Some(path) => EngineConfig::from_json_file(path)?,
        None => EngineConfig::default(),
    };
    let poll = Duration::from_secs(config.poll_interval_secs);

    info!("Starting NIFTY sniper engine");
    info!("Underlying: {} ({})", config.underlying.security_id, config.underlying.segment.code());
    info!("Working store: {}", args.state_file.display());
    info!("Trade log: {}", args.trade_log.display());
    info!("Poll interval: {}s", config.poll_interval_secs);

    let client = DhanClient::new(args.client_id.clone(), args.access_token.clone(), BASE_URL.to_string())?;
    let store = JsonFileStore::open(args.state_file.clone())?;
    let trade_log = CsvTradeLog::new(args.trade_log.clone());
    let mut engine = Engine::new(Box::new(client), config, Box::new(store), Box::new(trade_log))
        .context("Failed to start engine")?;

    if let Some(trade) = engine.active_trade() {
        info!("Resumed active trade {} @ {:.2}", trade.label(), trade.entry_price);
    }

    let app_state = AppState::new();
    if let Some(port) = args.port {
        let app = api::router(app_state.clone());
        let addr = SocketAddr::from(([127, 0, 0, 1], port));
        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .with_context(|| format!("Failed to bind {}", addr))?;
        info!("Status API running at http://{}", addr);

        tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app).await {
                error!("Status API error: {}", e);
            }
        });
    }

    loop {
        match engine.run_cycle(Utc::now()).await {
            Ok(CycleOutcome::Completed { .. }) => publish(&engine, &app_state).await,
            Ok(CycleOutcome::Skipped(_)) => {}
            // the next cycle retries from scratch
            Err(e) => error!("Cycle failed: {:#}", e),
        }

        if args.once {
            break;
        }

        tokio::select! {
            _ = tokio::time::sleep(poll) => {}
            _ = tokio::signal::ctrl_c() => {
                info!("Shutting down");
                break;
            }
        }
    }

    Ok(())
}

async fn publish(engine: &Engine, app_state: &Arc<AppState>) {
    let trades = match engine.trade_records() {
        Ok(trades) => trades,
        Err(e) => {
            error!("Failed to read trade log: {:#}", e);
            Vec::new()
        }
    };
    app_state.publish(engine.snapshot(), trades).await;
}
