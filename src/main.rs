//! Serves the discovery operations over HTTP.
//!
//! Usage: `discoverx [settings file]`. Without an argument `discoverx.toml`
//! is read if present. `DISCOVERX_*` environment variables override the file,
//! and `RUST_LOG` controls the log level.

use std::sync::Arc;

use tokio::net::TcpListener;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use discoverx::discovery::Discovery;
use discoverx::server;
use discoverx::settings::Settings;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let path = std::env::args().nth(1);
    let settings = match Settings::load(path.as_deref()) {
        Ok(settings) => settings,
        Err(e) => {
            error!(error = %e, "could not load settings");
            std::process::exit(1);
        }
    };
    let bind_address = settings.bind_address.clone();
    let discovery = match Discovery::sqlite(settings) {
        Ok(discovery) => Arc::new(discovery),
        Err(e) => {
            error!(error = %e, "could not open the lake or the tag store");
            std::process::exit(1);
        }
    };
    let rules = discovery.list_rules(&Default::default()).map(|r| r.len()).unwrap_or_default();
    info!(rules, store = discovery.store().location(), "discovery ready");

    let listener = match TcpListener::bind(&bind_address).await {
        Ok(listener) => listener,
        Err(e) => {
            error!(error = %e, %bind_address, "could not bind");
            std::process::exit(1);
        }
    };
    info!(%bind_address, "listening");
    if let Err(e) = axum::serve(listener, server::router(discovery)).await {
        error!(error = %e, "server stopped");
    }
}
