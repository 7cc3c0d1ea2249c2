//! talkrelay - Real-time message relay server
//!
//! Serves HTTP and WebSocket on a single port. Configuration comes from
//! the environment, see `Config`.

use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio::net::TcpListener;
use tracing::{error, info, warn};

use talkrelay::{
    AppState, Config, DisabledGateway, MessageRouter, NotificationGateway, Registry, server,
};

#[derive(Parser, Debug)]
#[command(name = "talkrelay")]
#[command(about = "Presence-aware WebSocket message relay with push fallback")]
#[command(version)]
struct Args {
    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,
}

fn init_gateway(config: &Config) -> Arc<dyn NotificationGateway> {
    #[cfg(feature = "fcm")]
    {
        use talkrelay::notify::{FCM_ENDPOINT, FcmGateway};

        if let Some(ref key) = config.fcm_server_key {
            let endpoint = config
                .fcm_endpoint
                .clone()
                .unwrap_or_else(|| FCM_ENDPOINT.to_string());

            match FcmGateway::new(endpoint.clone(), key.clone(), config.push_timeout()) {
                Ok(gateway) => {
                    info!(endpoint = %endpoint, "FCM push notifications enabled");
                    return Arc::new(gateway);
                }
                Err(e) => {
                    error!(error = %e, "Failed to build FCM client - push disabled");
                    return Arc::new(DisabledGateway);
                }
            }
        }
    }

    if config.fcm_server_key.is_some() {
        warn!("FCM_SERVER_KEY set but built without the fcm feature - push disabled");
    } else {
        warn!("No FCM_SERVER_KEY - push notifications disabled");
    }
    Arc::new(DisabledGateway)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .json()
        .with_env_filter(&args.log_level)
        .init();

    info!("talkrelay v{}", env!("CARGO_PKG_VERSION"));

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load config: {}", e);
            std::process::exit(1);
        }
    };

    let registry = Arc::new(Registry::new());
    let gateway = init_gateway(&config);
    let router = Arc::new(MessageRouter::new(registry.clone(), gateway));

    if let Some(period) = config.sweep_period() {
        server::spawn_sweep_task(registry.clone(), period);
    }

    let addr = config.listen_addr();
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding to {}", addr))?;
    info!(addr = %addr, "talkrelay listening");

    server::serve(listener, AppState::new(router, &config)).await?;

    info!(identities = registry.len(), "talkrelay shutdown");
    Ok(())
}
