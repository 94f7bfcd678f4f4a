use anyhow::Result;

use kestrel::command::CommandExecutor;
use kestrel::config::CONFIG;
use kestrel::sim::VehicleStore;
use kestrel::telemetry::TelemetryLogger;
use kestrel::web_server::WebServer;
use tokio::signal;
use tokio::sync::broadcast;
use tracing::{error, info};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    setup_logging(&CONFIG.general.log_level);
    info!("Application starting...");
    info!("Vehicle: {}", &CONFIG.general.vehicle_id);

    // Create a shutdown signal channel
    let (shutdown_tx, _) = broadcast::channel(1);

    let store = VehicleStore::new(CONFIG.simulator.clone());
    let executor = CommandExecutor::new(store.clone(), CONFIG.command.clone());
    let telemetry = CONFIG
        .telemetry
        .enabled
        .then(|| TelemetryLogger::attach(&store, &CONFIG.general.vehicle_id));

    store.start();

    let web_handle = if CONFIG.web.enabled {
        info!("Starting web server...");
        spawn_web_server(
            WebServer::new(executor, CONFIG.web.clone()),
            shutdown_tx.subscribe(),
        )
    } else {
        info!("Web server disabled in config, skipping...");
        tokio::spawn(async {})
    };

    match signal::ctrl_c().await {
        Ok(()) => info!("Shutdown signal received, stopping services..."),
        Err(err) => error!("Failed to listen for shutdown signal: {}", err),
    }
    let _ = shutdown_tx.send(());

    if let Err(e) = web_handle.await {
        error!("Web server join error: {}", e);
    }
    store.stop().await;
    if let Some(telemetry) = telemetry {
        telemetry.detach();
    }

    info!("All services stopped, shutting down");
    Ok(())
}

fn spawn_web_server(
    server: WebServer,
    shutdown: broadcast::Receiver<()>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        if let Err(e) = server.start(shutdown).await {
            error!("Web server error: {:#}", e);
        }
    })
}

fn setup_logging(default_level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let result = tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_thread_ids(true) // Show thread IDs
                .with_thread_names(true) // Show thread names
                .with_target(true) // Show module path
                .with_file(true) // Show file name
                .with_line_number(true), // Show line numbers
        )
        .with(filter)
        .try_init();
    if let Err(e) = result {
        eprintln!("Failed to initialize logging: {}", e);
    }
}
