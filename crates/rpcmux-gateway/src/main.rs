//! rpcmux gateway binary.
//!
//! Loads `rpcmux.yaml` (or the path in `RPCMUX_CONFIG`), registers the
//! built-in actions and serves until ctrl-c.

use tracing_subscriber::{fmt, EnvFilter};

use rpcmux_gateway::{config, services, AppState, Gateway};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    fmt().with_env_filter(EnvFilter::from_default_env()).init();

    let path = std::env::var("RPCMUX_CONFIG").unwrap_or_else(|_| "rpcmux.yaml".into());
    let cfg = config::load_from_file(&path)?;
    let listen = cfg.gateway.listen.clone();

    let state = AppState::with_table(cfg, services::builtin_table())?;
    let gateway = Gateway::start(state, &listen).await?;

    tokio::signal::ctrl_c().await?;
    tracing::info!("shutdown requested");
    gateway.shutdown().await?;
    Ok(())
}
