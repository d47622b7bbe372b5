use anyhow::Result;
use tracing_subscriber::EnvFilter;

mod dbus_interface;
mod engine;

use dbus_interface::{AccessService, BUS_NAME, OBJECT_PATH};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    tracing::info!("turnstiled starting");

    let mut config = turnstile_store::Config::load()?;
    if std::env::args().skip(1).any(|a| a == "--system") {
        config.system_bus = true;
    }
    let engine = engine::spawn_engine(&config)?;

    let service = AccessService::new(
        engine,
        config.db_path.display().to_string(),
        config.closing_time.clone(),
    );

    let builder = if config.system_bus {
        zbus::connection::Builder::system()?
    } else {
        zbus::connection::Builder::session()?
    };
    let _connection = builder
        .name(BUS_NAME)?
        .serve_at(OBJECT_PATH, service)?
        .build()
        .await?;

    tracing::info!(bus = BUS_NAME, system = config.system_bus, "turnstiled ready");

    // Keep running until signaled
    tokio::signal::ctrl_c().await?;
    tracing::info!("turnstiled shutting down");

    Ok(())
}
