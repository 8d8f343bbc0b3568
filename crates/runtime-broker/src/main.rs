//! Runtime Broker Server
//!
//! Serves the service instance API and runs the provisioning and
//! deprovisioning queues in the same process.

use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use process_engine::events::{Publishers, TracingPublisher};
use process_engine::{MemoryStorage, Operations, ProcessConfig, Queue};
use runtime_broker::{
    build_router,
    config::{AppConfig, DatabaseConfig, StorageBackend},
    db::{create_pool, run_migrations, DbPool, PostgresOperations},
    provisioner::HttpProvisionerClient,
    state::AppState,
    ResultExt,
};

/// Initialize tracing/logging.
fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "info,runtime_broker=debug,process_engine=debug,tower_http=debug".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Open the configured operation storage.
async fn open_storage(
    config: &AppConfig,
) -> anyhow::Result<(Arc<dyn Operations>, Option<PostgresOperations>, Option<DbPool>)> {
    match config.storage {
        StorageBackend::Memory => {
            tracing::warn!("Using in-memory storage, operations are lost on restart");
            Ok((Arc::new(MemoryStorage::new()), None, None))
        }
        StorageBackend::Postgres => {
            let db_config = DatabaseConfig::from_env().unwrap_or_else(|e| {
                tracing::warn!(error = %e, "Failed to load database config, using defaults");
                DatabaseConfig::default()
            });
            let pool = create_pool(&db_config).await?;
            run_migrations(&pool).await.log("running migrations")?;
            let postgres = PostgresOperations::new(pool.clone());
            Ok((Arc::new(postgres.clone()), Some(postgres), Some(pool)))
        }
    }
}

/// Queue every operation a previous run left unfinished.
async fn resume_operations(state: &AppState, postgres: &PostgresOperations) {
    match postgres.unfinished_operations().await {
        Ok(operations) => {
            for op in &operations {
                state.enqueue(&op.id, op.operation_type);
            }
            tracing::info!(count = operations.len(), "Resumed unfinished operations");
        }
        Err(e) => {
            tracing::error!(error = %e, "Failed to load unfinished operations");
        }
    }
}

fn spawn_queue(queue: Queue, mut stop: watch::Receiver<bool>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        queue
            .run(async move {
                let _ = stop.wait_for(|stopped| *stopped).await;
            })
            .await;
    })
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    init_tracing();

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        "Starting Runtime Broker"
    );

    let app_config = AppConfig::from_env().unwrap_or_else(|e| {
        tracing::warn!(error = %e, "Failed to load app config, using defaults");
        AppConfig::default()
    });

    let process_config = ProcessConfig::from_env().unwrap_or_else(|e| {
        tracing::warn!(error = %e, "Failed to load process config, using defaults");
        ProcessConfig::default()
    });

    tracing::info!(
        host = %app_config.host,
        port = app_config.port,
        storage = ?app_config.storage,
        workers = app_config.workers,
        provisioner_url = %app_config.provisioner_url,
        "Configuration loaded"
    );

    let (operations, postgres, db_pool) = open_storage(&app_config).await?;

    let provisioner = HttpProvisionerClient::new(
        &app_config.provisioner_url,
        app_config.request_timeout(),
    );
    let publisher = Publishers::new().with(Arc::new(TracingPublisher));

    let addr: SocketAddr = app_config.bind_address().parse()?;

    let state = AppState::new(
        operations,
        Arc::new(provisioner),
        Arc::new(publisher),
        db_pool,
        app_config,
        process_config,
    )?;

    let (stop_tx, stop_rx) = watch::channel(false);
    let queues = vec![
        spawn_queue(state.provisioning.clone(), stop_rx.clone()),
        spawn_queue(state.deprovisioning.clone(), stop_rx),
    ];

    if let Some(postgres) = &postgres {
        resume_operations(&state, postgres).await;
    }

    let app = build_router(state);
    let listener = TcpListener::bind(addr).await?;

    tracing::info!(address = %addr, "Server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Stopping queues");
    let _ = stop_tx.send(true);
    for handle in queues {
        handle.await.log("joining queue task").ok();
    }

    tracing::info!("Server shutdown complete");

    Ok(())
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, starting graceful shutdown");
        }
        _ = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        }
    }
}
