//! Service entry point: `api <product|cart|order|payment>`.

use std::process::ExitCode;

use api::config::{Config, LogFormat, Service};
use sqlx::postgres::PgPoolOptions;
use store::PostgresStore;
use tokio::signal;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Waits for a shutdown signal (SIGINT or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install SIGINT handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
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

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);
    match format {
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json())
            .init(),
        LogFormat::Text => registry.with(tracing_subscriber::fmt::layer()).init(),
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();

    // 1. Resolve which service to run and load its configuration
    let service = match std::env::args()
        .nth(1)
        .or_else(|| std::env::var("SERVICE").ok())
        .ok_or_else(|| "missing service name".to_string())
        .and_then(|name| name.parse::<Service>().map_err(|e| e.to_string()))
    {
        Ok(service) => service,
        Err(e) => {
            eprintln!("usage: api <product|cart|order|payment>: {e}");
            return ExitCode::FAILURE;
        }
    };
    let config = match Config::from_env(service) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("configuration error: {e}");
            return ExitCode::FAILURE;
        }
    };

    // 2. Initialize tracing
    init_tracing(config.log_format);

    // 3. Install Prometheus metrics recorder
    let metrics_handle = metrics_exporter_prometheus::PrometheusBuilder::new()
        .install_recorder()
        .expect("failed to install Prometheus recorder");
    api::routes::metrics::describe();

    // 4. Connect to Postgres and apply migrations
    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(&config.database_url)
        .await
        .expect("failed to connect to database");
    let store = PostgresStore::new(pool);
    store.run_migrations().await.expect("migrations failed");

    // 5. Build the service
    let app = api::build_app(&config, store, metrics_handle).expect("failed to build service");

    // 6. Start server
    let addr = config.addr();
    tracing::info!(%addr, %service, prefix = %config.api_prefix, "starting service");

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("failed to bind address");
    axum::serve(listener, app.router)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("server error");

    if let Some(sweep) = app.sweep {
        sweep.abort();
    }
    tracing::info!("server shut down gracefully");
    ExitCode::SUCCESS
}
