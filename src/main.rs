use std::sync::Arc;

use anyhow::{anyhow, Result};
use axum::Router;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use kith::app::notifications::{NotificationDispatcher, NullDispatcher, QueueDispatcher};
use kith::config::AppConfig;
use kith::infra::db::Db;
use kith::infra::queue::QueueClient;
use kith::infra::store::{MemoryStore, PgStore};
use kith::{http, AppState};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = AppConfig::from_env()?;

    let events: Arc<dyn NotificationDispatcher> = if config.queue_enabled {
        let queue = QueueClient::new(&config).await?;
        Arc::new(QueueDispatcher::new(queue))
    } else {
        tracing::info!("no event queue configured, dropping relationship events");
        Arc::new(NullDispatcher)
    };

    let state = match config.store_driver.as_str() {
        "postgres" => {
            let db = Db::connect(&config).await?;
            let store = Arc::new(PgStore::new(db));
            AppState::new(
                store.clone(),
                store.clone(),
                store.clone(),
                store,
                events,
                &config,
            )
        }
        "memory" => {
            tracing::warn!("using the in-memory store driver, state will not survive a restart");
            let store = Arc::new(MemoryStore::new());
            AppState::new(
                store.clone(),
                store.clone(),
                store.clone(),
                store,
                events,
                &config,
            )
        }
        other => return Err(anyhow!("unknown STORE_DRIVER: {}", other)),
    };

    let app: Router = http::router(state).layer(TraceLayer::new_for_http());
    let listener = tokio::net::TcpListener::bind(&config.http_addr).await?;
    tracing::info!("listening on {}", config.http_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %err, "failed to install Ctrl+C handler");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(err) => {
                tracing::error!(error = %err, "failed to install SIGTERM handler");
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("shutdown signal received");
}
