use std::{
    net::{IpAddr, SocketAddr},
    path::PathBuf,
    sync::Arc,
    time::Duration,
};

use clap::Parser;
use tracing::{info, warn};

use journal_core::{
    estimator::{self, GainEstimator, GeminiBackend, RetryPolicy},
    journal::Journal,
    server::{self, AppState},
    store::SqliteStore,
};

const DEFAULT_PORT: u16 = 17700;

#[derive(Parser, Debug)]
#[command(name = "journal_core", version)]
struct Args {
    /// Listen address.
    ///
    /// Accepts:
    /// - ip:port (recommended), e.g. 127.0.0.1:17700
    /// - ip (implies port 17700), e.g. 127.0.0.1
    /// - localhost or localhost:port
    #[arg(long, default_value = "127.0.0.1:17700")]
    listen: String,

    /// SQLite database path.
    #[arg(long, default_value = "./data/journal-core.db")]
    db: PathBuf,

    /// Directory export files are written to.
    #[arg(long, default_value = "./data/exports")]
    export_dir: PathBuf,

    /// Base URL of the generative-AI endpoint.
    #[arg(long, default_value = estimator::DEFAULT_BASE_URL)]
    ai_base_url: String,

    /// Model used for gain estimation.
    #[arg(long, default_value = estimator::DEFAULT_MODEL)]
    ai_model: String,

    /// API key for the AI endpoint. Without one every entry gets zero gains.
    #[arg(long, env = "GEMINI_API_KEY", hide_env_values = true)]
    ai_api_key: Option<String>,

    /// Retries after a rate-limited (429) answer.
    #[arg(long, default_value_t = estimator::DEFAULT_MAX_RETRIES)]
    ai_max_retries: u32,

    /// First backoff delay in milliseconds; doubles on every retry.
    #[arg(long, default_value_t = estimator::DEFAULT_INITIAL_DELAY_MS)]
    ai_initial_delay_ms: u64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "journal_core=info,tower_http=info".into()),
        )
        .init();

    let args = Args::parse();

    let store = SqliteStore::open(&args.db)?;
    let journal = Journal::open(Box::new(store));

    let policy = RetryPolicy {
        max_retries: args.ai_max_retries,
        initial_delay: Duration::from_millis(args.ai_initial_delay_ms),
    };
    let estimator = match args.ai_api_key.as_deref().map(str::trim) {
        Some(key) if !key.is_empty() => {
            let backend = GeminiBackend::new(&args.ai_base_url, &args.ai_model, key);
            info!("AI endpoint: {}", backend.endpoint());
            GainEstimator::new(Arc::new(backend), policy)
        }
        _ => {
            warn!("no AI API key configured; entries will be saved with zero gains");
            GainEstimator::offline()
        }
    };

    let state = AppState::new(journal, estimator, args.export_dir.clone());
    let app = server::router(state);

    let addr = parse_listen(&args.listen)?;
    info!("Core listening on http://{addr}");
    info!("DB: {}", args.db.display());
    info!("Exports: {}", args.export_dir.display());

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

fn parse_listen(input: &str) -> anyhow::Result<SocketAddr> {
    if let Ok(addr) = input.parse::<SocketAddr>() {
        return Ok(addr);
    }

    if let Ok(ip) = input.parse::<IpAddr>() {
        return Ok(SocketAddr::new(ip, DEFAULT_PORT));
    }

    if input == "localhost" {
        return Ok(SocketAddr::new(IpAddr::from([127, 0, 0, 1]), DEFAULT_PORT));
    }

    if let Some(port_str) = input.strip_prefix("localhost:") {
        let port: u16 = port_str.parse().map_err(|_| {
            anyhow::anyhow!(
                "invalid --listen '{}': bad port. Example: 127.0.0.1:{}",
                input,
                DEFAULT_PORT
            )
        })?;
        return Ok(SocketAddr::new(IpAddr::from([127, 0, 0, 1]), port));
    }

    Err(anyhow::anyhow!(
        "invalid --listen '{}'. Use ip:port (e.g. 127.0.0.1:{}) or ip (e.g. 127.0.0.1).",
        input,
        DEFAULT_PORT
    ))
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    info!("shutdown requested");
}
