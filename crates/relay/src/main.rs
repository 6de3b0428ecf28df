//! Outbox relay entry point.

use std::sync::Arc;

use circuit_breaker::CircuitBreakerRegistry;
use outbox::{OutboxDispatcher, PgNotifyBus, PostgresOutboxStore};
use outbox_relay::{BUS_BREAKER, Config, RelayState};
use sqlx::postgres::PgPoolOptions;
use tokio::signal;
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Waits for a shutdown signal (SIGINT or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for SIGINT");
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
                tracing::error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("received SIGINT, starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("received SIGTERM, starting graceful shutdown");
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), BoxError> {
    // 1. Load configuration
    let config = Config::from_env()?;

    // 2. Initialize tracing
    tracing_subscriber::registry()
        .with(EnvFilter::try_new(&config.log_level).unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();

    // 3. Install Prometheus metrics recorder
    let metrics_handle = metrics_exporter_prometheus::PrometheusBuilder::new().install_recorder()?;

    // 4. Connect and migrate
    let pool = PgPoolOptions::new()
        .max_connections(config.database_max_connections)
        .connect(&config.database_url)
        .await?;
    let store = Arc::new(PostgresOutboxStore::new(pool.clone()));
    store.run_migrations().await?;

    // 5. Start the dispatcher behind the bus breaker
    let breakers = CircuitBreakerRegistry::new(config.breaker_config());
    let breaker = breakers.get_or_create(BUS_BREAKER);
    let dispatcher_config = config.dispatcher_config();
    let max_attempts = dispatcher_config.max_attempts;
    let dispatcher = OutboxDispatcher::new(
        Arc::clone(&store),
        Arc::new(PgNotifyBus::new(pool.clone())),
        Arc::clone(&breaker),
        dispatcher_config,
    );
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let dispatcher_task = tokio::spawn(async move { dispatcher.run(shutdown_rx).await });

    // 6. Build the application
    let state = Arc::new(RelayState {
        store,
        breaker,
        max_attempts,
    });
    let app = outbox_relay::create_app(state, metrics_handle);

    // 7. Start server
    let addr = config.addr();
    tracing::info!(%addr, "starting outbox relay");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // 8. Stop the dispatcher after the in-flight round
    let _ = shutdown_tx.send(true);
    if let Err(e) = dispatcher_task.await {
        tracing::error!(error = %e, "dispatcher task failed");
    }
    pool.close().await;

    tracing::info!("relay shut down gracefully");
    Ok(())
}
