//! Gateway service entry point.
//!
//! WebSocket gateway for the crash game: clients in, game and chat events out.

use anyhow::Result;
use gateway::{
    create_router, AppState, BackendClient, ClientRegistry, ConnectionAdmission, EventFanout,
    GatewayConfig, Handlers, Services,
};
use metrics_exporter_prometheus::PrometheusBuilder;
use nats_client::NatsClient;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::signal;
use tokio::sync::mpsc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env file
    dotenvy::dotenv().ok();

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("Starting Gateway service");

    let config = GatewayConfig::from_env()?;
    config.log();

    // Start Prometheus metrics server
    PrometheusBuilder::new()
        .with_http_listener(([0, 0, 0, 0], config.metrics_port))
        .install()?;
    info!("Prometheus metrics server started on port {}", config.metrics_port);

    // Connect to NATS and subscribe before accepting clients
    let nats_client = NatsClient::connect(&config.nats_url).await?;
    let events = nats_client.subscribe_all(&config.event_subjects()).await?;
    info!("Connected to NATS");

    let backend = Arc::new(BackendClient::new(config.backend_url.clone()));
    let services = Services {
        engine: backend.clone(),
        chat: backend.clone(),
        identity: backend,
    };

    let registry = Arc::new(ClientRegistry::new());

    // Spawn fan-out task
    let fanout = Arc::new(EventFanout::new(registry.clone()));
    let (fanout_shutdown_tx, fanout_shutdown_rx) = mpsc::channel(1);
    let fanout_handle = tokio::spawn(fanout.run(events, fanout_shutdown_rx));

    let state = Arc::new(AppState {
        registry: registry.clone(),
        admission: Arc::new(ConnectionAdmission::new(config.max_connections_per_ip)),
        handlers: Arc::new(Handlers::new(services, registry, config.join_timeout)),
        client_buffer_size: config.client_buffer_size,
        ping_interval: config.ping_interval,
    });
    let app = create_router(state);

    // Start HTTP server
    let addr = SocketAddr::from(([0, 0, 0, 0], config.http_port));
    let listener = TcpListener::bind(addr).await?;
    info!("Gateway listening on {}", addr);

    // Run server with graceful shutdown
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Shutting down fan-out...");
    let _ = fanout_shutdown_tx.send(()).await;
    let _ = fanout_handle.await;

    info!("Gateway stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to install signal handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C"),
        _ = terminate => info!("Received terminate signal"),
    }
}
