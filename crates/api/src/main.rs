use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use planbridge_core::admission::{AdmissionController, EnvBudgetSource};
use planbridge_db::{JobStore, PgJobStore};
use planbridge_erp::{BatchExecutor, ExecutorConfig, HttpBatchTransport, StaticBearerToken};
use planbridge_events::ProgressBus;
use planbridge_worker::{JobService, WorkerConfig};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use planbridge_api::config::ServerConfig;
use planbridge_api::router::build_app_router;
use planbridge_api::state::AppState;
use planbridge_api::stream::StreamGateway;

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    // --- Tracing ---
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "planbridge_api=debug,planbridge_worker=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // --- Configuration ---
    let config = ServerConfig::from_env();
    tracing::info!(
        host = %config.host,
        port = %config.port,
        erp_environments = config.erp.endpoints.len(),
        "Loaded server configuration",
    );

    // --- Database ---
    let database_url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set");

    let pool = planbridge_db::create_pool(&database_url)
        .await
        .expect("Failed to connect to database");
    tracing::info!("Database connection pool created");

    planbridge_db::health_check(&pool)
        .await
        .expect("Database health check failed");
    tracing::info!("Database health check passed");

    planbridge_db::run_migrations(&pool)
        .await
        .expect("Failed to run database migrations");
    tracing::info!("Database migrations applied");

    let store: Arc<dyn JobStore> = Arc::new(PgJobStore::new(pool));

    // --- ERP client ---
    let admission = Arc::new(AdmissionController::new(Arc::new(EnvBudgetSource)));
    let transport = HttpBatchTransport::new(
        config.erp.endpoints.clone(),
        Arc::new(StaticBearerToken::new(config.erp.bearer_token.clone())),
        config.erp.request_timeout(),
    )
    .expect("Failed to build ERP HTTP client");
    let executor = Arc::new(BatchExecutor::new(
        Arc::new(transport),
        Arc::clone(&admission),
        ExecutorConfig {
            max_transactions_per_call: config.erp.max_transactions_per_call,
        },
    ));

    // --- Progress bus and workers ---
    let bus = ProgressBus::default();
    let jobs = Arc::new(JobService::new(
        Arc::clone(&store),
        bus.clone(),
        executor,
        WorkerConfig {
            chunk_size: config.job_chunk_size,
        },
    ));
    let gateway = Arc::new(StreamGateway::new(
        Arc::clone(&store),
        bus,
        config.stream,
    ));

    // --- App state ---
    let state = AppState {
        store,
        jobs: Arc::clone(&jobs),
        admission,
        gateway,
    };

    let app = build_app_router(state, &config);

    // --- Start server ---
    let addr = SocketAddr::new(
        config.host.parse().expect("Invalid HOST address"),
        config.port,
    );
    tracing::info!(%addr, "Starting server");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("Failed to bind to address");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("Server error");

    // --- Post-shutdown cleanup ---
    tracing::info!("Server stopped accepting connections, cleaning up");

    if tokio::time::timeout(Duration::from_secs(30), jobs.shutdown())
        .await
        .is_err()
    {
        tracing::warn!("Timed out waiting for job workers to stop");
    }

    tracing::info!("Graceful shutdown complete");
}

/// Wait for a termination signal to initiate graceful shutdown.
///
/// Handles both SIGINT (Ctrl-C) and SIGTERM (on Unix).
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl-C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received SIGINT (Ctrl-C), starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        }
    }
}
