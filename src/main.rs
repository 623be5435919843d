pub mod config;
pub mod device;
pub mod mixer;
pub mod mqtt;
pub mod supervisor;

#[cfg(test)]
mod testing;

use crate::config::BridgeConfig;
use crate::mixer::AlsaProvider;
use crate::mqtt::mqtt_handler::BrokerGateway;
use crate::supervisor::{Supervisor, DEFAULT_TICK};
use clap::Parser;
use color_eyre::{eyre::eyre, Result};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

/// Exposes ALSA mixer controls to Home Assistant over MQTT.
#[derive(Debug, Parser)]
#[command(version, about)]
struct Args {
    /// Path to the TOML configuration file
    #[arg(short, long, env = "ALSA_MQTT_CONFIG")]
    config: Option<PathBuf>,

    /// trace, debug, info, warn or error
    #[arg(long, env = "ALSA_MQTT_LOG", default_value = "info")]
    log_level: Level,

    /// Supervisor tick in milliseconds (change detection latency)
    #[arg(long, default_value_t = DEFAULT_TICK.as_millis() as u64,
          value_parser = clap::value_parser!(u64).range(10..1000))]
    tick_ms: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    setup(args.log_level)?;

    let path = args.config.unwrap_or_else(BridgeConfig::default_path);
    let config = Arc::new(BridgeConfig::load(&path).await?);

    let shutdown = CancellationToken::new();
    spawn_signal_listener(shutdown.clone())?;

    let gateway = BrokerGateway::new(&config.mqtt, config.devices.len());
    let publisher = Arc::new(gateway.publisher());

    let supervisor = Supervisor::create(
        config,
        Arc::new(AlsaProvider),
        publisher,
        shutdown,
        Duration::from_millis(args.tick_ms),
    );
    let running = supervisor.start(Some(gateway)).map_err(|e| {
        error!("Startup failed: {}", e);
        eyre!(e)
    })?;

    let stopping = running.run_until_shutdown().await;
    let _stopped = stopping.shutdown().await;
    Ok(())
}

fn setup(level: Level) -> Result<()> {
    if std::env::var("RUST_LIB_BACKTRACE").is_err() {
        std::env::set_var("RUST_LIB_BACKTRACE", "0")
    }
    color_eyre::install()?;
    FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .init();
    Ok(())
}

/// SIGINT and SIGTERM both request a cooperative shutdown.
fn spawn_signal_listener(shutdown: CancellationToken) -> Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = signal(SignalKind::terminate())?;
    tokio::spawn(async move {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => info!("SIGINT received"),
            _ = sigterm.recv() => info!("SIGTERM received"),
        }
        shutdown.cancel();
    });
    Ok(())
}
