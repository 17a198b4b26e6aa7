use callwire::config::Config;
use callwire::interface::api::{serve, RelayState};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::EnvFilter;

const DEFAULT_CONFIG_PATH: &str = "callwire.toml";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!("Starting Callwire signaling relay");

    // Load configuration
    let path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string());
    let config = Config::load(&path)?;
    info!("Configuration loaded: {:?}", config);

    let listener = TcpListener::bind(config.bind_address()).await?;
    let state = Arc::new(RelayState::new(config.relay.member_queue));

    serve(listener, state, async {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Shutting down...");
        }
    })
    .await?;

    info!("Callwire relay stopped");
    Ok(())
}
