mod address;
mod capture;
mod color;
mod command;
mod config;
mod context;
mod error;
mod frame;
mod models;
mod network;
mod pairing;
mod plotter;
mod poller;
mod prober;
mod scanner;
mod server;
mod stream;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    let config = config::Config::parse();
    config.validate()?;

    let default_filter = if config.verbose {
        "nail_printer_rig=debug,tower_http=debug"
    } else {
        "nail_printer_rig=info,tower_http=info"
    };
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| default_filter.into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        bind = %config.bind,
        "Starting nail printer rig"
    );

    let ctx = context::AppContext::build(&config).await?;
    server::serve(ctx, config.bind).await
}
