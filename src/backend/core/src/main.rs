//! Herald Server - Main entry point
//!
//! Runs the HTTP API, the job dispatcher, or both.

use clap::{Parser, ValueEnum};

use herald_core::{
    api,
    config::Config,
    db::Database,
    jobs::DispatcherConfig,
    services::{Backends, Services},
    telemetry,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Mode {
    /// API server and dispatcher
    All,
    /// HTTP API only
    Api,
    /// Dispatcher only
    Worker,
}

#[derive(Debug, Parser)]
#[command(name = "herald-server", version, about = "Herald API server and job dispatcher")]
struct Args {
    /// Configuration file (TOML); environment variables override it
    #[arg(short, long, env = "HERALD_CONFIG")]
    config: Option<String>,

    #[arg(long, value_enum, default_value_t = Mode::All)]
    mode: Mode,

    /// Keep jobs and posts in memory instead of PostgreSQL
    #[arg(long)]
    ephemeral: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => Config::from_file(path)?,
        None => Config::load()?,
    };

    telemetry::init_telemetry(&config.logging, &config.metrics)?;

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        mode = ?args.mode,
        ephemeral = args.ephemeral,
        "Starting Herald"
    );

    let backends = if args.ephemeral {
        tracing::warn!("Ephemeral mode: jobs and posts are lost on exit");
        Backends::in_memory()
    } else {
        let db = Database::new(&config.database).await?;
        if config.database.run_migrations {
            db.migrate().await?;
        }
        Backends::postgres(&db)
    };

    let services = Services::from_config(&config, backends)?;

    let run_worker = match args.mode {
        Mode::Worker => true,
        Mode::All => config.worker.enabled,
        Mode::Api => false,
    };
    let dispatcher = run_worker.then(|| {
        services
            .dispatcher(DispatcherConfig::from(&config.worker))
            .start()
    });

    if args.mode == Mode::Worker {
        shutdown_signal().await;
    } else {
        let app = api::build_router(services.app_state());
        let addr = config.server.bind_address();
        let listener = tokio::net::TcpListener::bind(&addr).await?;
        tracing::info!(address = %addr, "HTTP server listening");

        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal())
            .await?;
    }

    if let Some(handle) = dispatcher {
        let clean = handle.shutdown().await;
        tracing::info!(clean, "Dispatcher shut down");
    }

    tracing::info!("Herald shutdown complete");
    Ok(())
}

/// Wait for Ctrl-C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received");
}
