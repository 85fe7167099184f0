use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use cast_switch::network::chromecast::RustCastConnector;
use cast_switch::network::discovery::DeviceDiscovery;
use cast_switch::server::HttpServer;
use cast_switch::{Config, Supervisor};
use clap::Parser;
use tokio::sync::oneshot;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Config file (defaults to the platform config dir)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Friendly name of the cast device to supervise
    #[arg(short, long)]
    name: Option<String>,

    /// Milliseconds to wait before reporting streaming stopped
    #[arg(long)]
    switch_off_delay: Option<u64>,

    /// HTTP port
    #[arg(short, long)]
    port: Option<u16>,

    /// Run without the HTTP server
    #[arg(long)]
    no_http: bool,
}

fn load_config(args: &Args) -> anyhow::Result<Config> {
    let mut config = match &args.config {
        Some(path) => Config::load(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => match Config::default_path().filter(|path| path.exists()) {
            Some(path) => Config::load(&path)
                .with_context(|| format!("Failed to load config from {}", path.display()))?,
            None => Config::default(),
        },
    };

    if let Some(name) = &args.name {
        config.name = name.clone();
    }
    if let Some(delay) = args.switch_off_delay {
        config.switch_off_delay_ms = delay;
    }
    if let Some(port) = args.port {
        config.http.port = port;
    }
    if args.no_http {
        config.http.enabled = false;
    }

    config.validate()?;
    Ok(config)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = load_config(&args)?;
    tracing::info!(
        "Starting cast-switch v{} for \"{}\"",
        env!("CARGO_PKG_VERSION"),
        config.name
    );

    let browser = DeviceDiscovery::new(config.name.clone(), config.service_type.clone());
    let connector = Arc::new(RustCastConnector::new(&config));
    let (supervisor, switch) = Supervisor::new(&config, connector, Box::new(browser));
    let supervisor = tokio::spawn(supervisor.run());

    let signal_switch = switch.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Shutting down");
            signal_switch.shutdown();
        }
    });

    if !config.http.enabled {
        supervisor.await??;
        return Ok(());
    }

    let (stopped_tx, stopped_rx) = oneshot::channel::<()>();
    let server = HttpServer::new(switch.clone());
    let bind = config.http.bind.clone();
    let port = config.http.port;
    let http = tokio::spawn(async move {
        let shutdown = async {
            let _ = stopped_rx.await;
        };
        if let Err(e) = server.run(&bind, port, shutdown).await {
            tracing::error!("HTTP server failed: {}", e);
            switch.shutdown();
        }
    });

    supervisor.await??;
    let _ = stopped_tx.send(());
    http.await?;

    Ok(())
}
