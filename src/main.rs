//! switchyard gateway binary.
//!
//! # Architecture Overview
//!
//! ```text
//!     Client Request
//!     ──────────────▶ net listener ──▶ http server ──▶ Router::dispatch
//!                     (tcp/tls/unix)   (axum)          │
//!                                                      ▼
//!                                      ┌──────────────────────────────┐
//!                                      │ Context (pooled)             │
//!                                      │  logger → recovery →         │
//!                                      │  request_id → route chain    │
//!                                      └──────────────┬───────────────┘
//!                                                     ▼
//!                                      proxy ──▶ load_balancer ──▶ Backend
//!                                      (http forward / ws tunnel)
//! ```

use std::path::PathBuf;

use clap::Parser;

use switchyard::config::{load_config, GatewayConfig};
use switchyard::lifecycle;
use switchyard::observability::logging;

#[derive(Parser, Debug)]
#[command(name = "switchyard")]
#[command(about = "Config-driven HTTP router and load-balancing reverse proxy", long_about = None)]
struct Args {
    /// Path of the TOML config file; defaults apply when omitted
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Validate the config, print the route table and exit
    #[arg(long)]
    check: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => load_config(path)?,
        None => GatewayConfig::default(),
    };
    logging::init(&config.logging);

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        config = ?args.config,
        proxies = config.proxies.len(),
        "switchyard starting"
    );

    if args.check {
        let router = lifecycle::build_router(&config)?;
        for route in router.routes() {
            println!("{:<8} {:<40} {}", route.method, route.path, route.handler_name);
        }
        return Ok(());
    }

    lifecycle::run(config).await?;

    tracing::info!("Shutdown complete");
    Ok(())
}
