//! Burn Monitor - live token burn tracking
//!
//! Usage:
//!   cargo run --release --bin burn_monitor -- [--refresh-interval <secs>]
//!
//! Environment variables:
//!   LEDGER_RPC_URL - JSON-RPC endpoint (required)
//!   TOKEN_TYPE - token to monitor (required)
//!   TREASURY_OBJECT_ID - treasury object (required)
//!   BURN_EVENT_TOPICS - comma-separated event topics
//!   REFRESH_INTERVAL_SECS - supply refresh cadence (default: 15, min: 5)

use burnwatch::config::MonitorConfig;
use burnwatch::error::MonitorError;
use dotenv::dotenv;
use std::process;

#[tokio::main]
async fn main() {
    dotenv().ok();

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .target(env_logger::Target::Stderr)
        .init();

    // NOTE: Workaround for rustls issue with multiple crypto backends linked
    if rustls::crypto::aws_lc_rs::default_provider()
        .install_default()
        .is_err()
    {
        log::debug!("rustls crypto provider already installed");
    }

    if let Err(e) = run().await {
        log::error!("❌ {}", e);
        process::exit(e.exit_code());
    }
}

async fn run() -> Result<(), MonitorError> {
    let mut config = MonitorConfig::from_env()?;
    if let Some(secs) = MonitorConfig::refresh_override_from_args() {
        config.set_refresh_interval(secs);
    }

    burnwatch::monitor_core::run(config).await
}
