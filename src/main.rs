use std::process;
use std::sync::Arc;

use spurgo::{
    application::error::AppError,
    application::ports::{CacheDispatcher, EventStore},
    config,
    engine::{Relay, RelayConfig},
    infra::{
        db::PostgresEventStore,
        dispatch::RedisDispatcher,
        error::InfraError,
        http::{ControlState, build_control_router},
        telemetry,
    },
};
use tokio::net::TcpListener;
use tracing::{Dispatch, Level, dispatcher, error, info};
use tracing_subscriber::fmt as tracing_fmt;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        report_application_error(&error);
        process::exit(1);
    }
}

fn report_application_error(error: &AppError) {
    if dispatcher::has_been_set() {
        error!(error = %error, "application error");
        return;
    }

    let subscriber = tracing_fmt().with_max_level(Level::ERROR).finish();
    let dispatch = Dispatch::new(subscriber);
    dispatcher::with_default(&dispatch, || {
        error!(error = %error, "application error");
    });
}

async fn run() -> Result<(), AppError> {
    let (cli_args, settings) = config::load_with_cli()?;

    let command = cli_args
        .command
        .unwrap_or(config::Command::Serve(config::ServeArgs::default()));

    telemetry::init(&settings.logging).map_err(AppError::from)?;

    match command {
        config::Command::Serve(_) => run_serve(settings).await,
        config::Command::Migrate(_) => run_migrate(settings).await,
    }
}

async fn run_serve(settings: config::Settings) -> Result<(), AppError> {
    let metrics = telemetry::init_metrics().map_err(AppError::from)?;

    let store = Arc::new(init_store(&settings).await?);

    let dispatcher = RedisDispatcher::connect(&settings.redis_servers)
        .await
        .map_err(AppError::from)?;

    let relay = Relay::start(
        Arc::clone(&store) as Arc<dyn EventStore>,
        Arc::new(dispatcher) as Arc<dyn CacheDispatcher>,
        RelayConfig::from(&settings),
    );

    let state = ControlState {
        db: Arc::clone(&store),
        notifier: relay.notifier(),
        notify_access_token: settings.server.notify_access_token.clone(),
        metrics,
    };
    let router = build_control_router(state);

    let addr = format!("{}:{}", settings.server.host, settings.server.port);
    let listener = TcpListener::bind(&addr).await.map_err(InfraError::from)?;
    info!(addr = %addr, "Control surface listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(InfraError::from)?;

    relay.shutdown();
    relay.join().await;
    info!("Graceful shutdown completed");
    Ok(())
}

async fn run_migrate(settings: config::Settings) -> Result<(), AppError> {
    init_store(&settings).await?;
    info!("Migrations applied");
    Ok(())
}

async fn init_store(settings: &config::Settings) -> Result<PostgresEventStore, InfraError> {
    let pool = PostgresEventStore::connect(&settings.database.url, settings.database.max_connections)
        .await
        .map_err(|err| InfraError::database(format!("failed to connect to Postgres: {err}")))?;
    PostgresEventStore::run_migrations(&pool)
        .await
        .map_err(|err| InfraError::database(format!("failed to run migrations: {err}")))?;
    Ok(PostgresEventStore::new(pool))
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(_) => std::future::pending::<()>().await,
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
    info!("Shutdown signal received");
}
