//! Minstrel application binary: logging, configuration, serve.

use anyhow::Context;
use mstserver::Config;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,mstserver=debug")),
        )
        .init();

    let config = Config::load().context("loading configuration")?;
    tracing::info!(
        "minstrel {} starting on {}",
        env!("CARGO_PKG_VERSION"),
        config.bind_addr,
    );

    mstserver::serve(config).await.context("running server")?;
    Ok(())
}
