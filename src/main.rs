use std::sync::Arc;

use library_outbox::clients::{apply_schema, setup_db_pool, setup_transports};
use library_outbox::config::Config;
use library_outbox::messaging::build_dispatcher;
use library_outbox::metrics::PrometheusOutboxMetrics;
use library_outbox::outbox::OutboxRepository;
use library_outbox::sweeper::{OutboxSweeper, ShutdownMode, SweeperHandle};
use library_outbox::transactor::Transactor;
use library_outbox::{http, telemetry};
use tracing::{error, info};

// Graceful shutdown signal future
async fn shutdown_signal() {
    use tokio::signal;

    let ctrl_c = signal::ctrl_c();
    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut term_signal) => {
                term_signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler.");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("Shutdown signal received.");
}

async fn start_sweeper(
    config: &Config,
    transactor: Transactor,
    outbox: OutboxRepository,
    metrics: Arc<PrometheusOutboxMetrics>,
) -> Result<SweeperHandle, Box<dyn std::error::Error>> {
    info!("Setting up delivery transports...");
    let transports = Arc::new(setup_transports(config).await?);
    let dispatcher = build_dispatcher(config.book_endpoint()?, config.author_endpoint()?, transports);

    let sweeper = OutboxSweeper::new(
        transactor,
        outbox,
        dispatcher,
        metrics,
        config.outbox_settings(),
    );
    Ok(Arc::new(sweeper).start())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::load()?;
    let _sentry = telemetry::init(config.sentry_dsn.as_deref());
    info!("Configuration loaded.");

    info!("Connecting to database...");
    let db_pool = setup_db_pool(&config).await?;
    apply_schema(&db_pool).await?;
    info!("Database connection established.");

    let metrics = Arc::new(PrometheusOutboxMetrics::new()?);
    let transactor = Transactor::new(db_pool.clone());
    let outbox = OutboxRepository::new(metrics.clone());

    let sweeper = if config.outbox_enabled {
        Some(start_sweeper(&config, transactor, outbox, metrics.clone()).await?)
    } else {
        info!("Outbox sweeper disabled.");
        None
    };

    let server = http::serve(config.http_port, metrics)?;
    let server_handle = server.handle();
    let server_task = tokio::spawn(server);
    info!(port = config.http_port, "HTTP server running.");

    shutdown_signal().await;

    server_handle.stop(true).await;
    match server_task.await {
        Ok(Err(e)) => error!(error = %e, "HTTP server stopped with an error."),
        Err(e) => error!(error = %e, "HTTP server task failed."),
        Ok(Ok(())) => {}
    }

    if let Some(sweeper) = sweeper {
        let mode = if config.outbox_abort_in_flight {
            ShutdownMode::Abort
        } else {
            ShutdownMode::Drain
        };
        sweeper.shutdown(mode).await;
    }

    db_pool.close().await;
    info!("Shutdown complete.");
    Ok(())
}
