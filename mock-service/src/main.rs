use mock_service::{AppState, Latency, Limits, UserStore};
use std::net::SocketAddr;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

const DEFAULT_ADDR: &str = "127.0.0.1:3000";

/// Environment:
/// - `MOCK_ADDR`: listen address, `127.0.0.1:3000` by default.
/// - `MOCK_USERS`: users to seed the store with.
/// - `MOCK_LATENCY_MS`: mean latency added to user reads, with a 20% standard deviation.
/// - `MOCK_CONCURRENCY`: requests handled at once, 100 by default.
/// - `MOCK_TIMEOUT_MS`: per-request timeout once admitted, 30s by default.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    FmtSubscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| "mock_service=info".into()),
        )
        .init();

    let addr: SocketAddr = std::env::var("MOCK_ADDR")
        .unwrap_or_else(|_| DEFAULT_ADDR.to_string())
        .parse()?;
    let seed = match std::env::var("MOCK_USERS") {
        Ok(count) => count.parse()?,
        Err(_) => 0,
    };

    let mut state = AppState::new(UserStore::seeded(seed));
    if let Ok(ms) = std::env::var("MOCK_LATENCY_MS") {
        let mean = Duration::from_millis(ms.parse()?);
        state = state.with_latency(Latency {
            mean,
            std_dev: mean / 5,
        });
    }

    let mut limits = Limits::default();
    if let Ok(concurrency) = std::env::var("MOCK_CONCURRENCY") {
        limits.concurrency = concurrency.parse()?;
    }
    if let Ok(ms) = std::env::var("MOCK_TIMEOUT_MS") {
        limits.timeout = Duration::from_millis(ms.parse()?);
    }
    anyhow::ensure!(limits.concurrency > 0, "MOCK_CONCURRENCY must be at least 1");
    state = state.with_limits(limits);

    mock_service::run(addr, state, shutdown_signal()).await?;
    info!("Mock service shut down");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!("Unable to listen for Ctrl-C: {err}");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
