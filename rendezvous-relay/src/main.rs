//! Rendezvous relay server.
//!
//! An axum WebSocket server that lets peers discover each other and trade
//! connection-negotiation messages (offers, answers, candidates) until they
//! can talk directly. Payloads are routed by `targetId` and never inspected.
//!
//! # Usage
//!
//! ```bash
//! # Run on default address 0.0.0.0:8000
//! cargo run --bin rendezvous-relay
//!
//! # Run on custom address
//! cargo run --bin rendezvous-relay -- --bind 127.0.0.1:9100
//!
//! # Or via environment variable
//! RENDEZVOUS_ADDR=127.0.0.1:9100 cargo run --bin rendezvous-relay
//! ```

use std::sync::Arc;

use clap::Parser;
use rendezvous_relay::config::{RelayCliArgs, RelayConfig};
use rendezvous_relay::relay;

#[tokio::main]
async fn main() {
    let cli = RelayCliArgs::parse();

    // Load config from CLI args + config file + env vars + defaults.
    let config = match RelayConfig::load(&cli) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error loading configuration: {e}");
            std::process::exit(1);
        }
    };

    // Initialize tracing with the resolved log level.
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.log_level));
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    tracing::info!(addr = %config.bind_addr, "starting rendezvous relay");

    let state = Arc::new(config.relay_state());

    let (bound_addr, mut handle) =
        match relay::start_server_with_state(&config.bind_addr, Arc::clone(&state)).await {
            Ok(started) => started,
            Err(e) => {
                tracing::error!(error = %e, "failed to start relay server");
                std::process::exit(1);
            }
        };
    tracing::info!(addr = %bound_addr, "relay server listening");

    tokio::select! {
        res = &mut handle => {
            if let Err(e) = res {
                tracing::error!(error = %e, "relay server task failed");
            }
        }
        res = tokio::signal::ctrl_c() => {
            if let Err(e) = res {
                tracing::error!(error = %e, "failed to listen for shutdown signal");
                if let Err(e) = handle.await {
                    tracing::error!(error = %e, "relay server task failed");
                }
                return;
            }
            tracing::info!(peers = state.registry.len(), "shutting down, closing peer connections");
            state.close_all_connections();
            // Give writer tasks a moment to flush the close frames.
            tokio::time::sleep(std::time::Duration::from_millis(250)).await;
            handle.abort();
        }
    }
}
