//! Dean's office bot for the MAX messenger
//!
//! Students file requests and callback wishes; dean's-office staff moderate
//! them and send broadcasts; administrators assign roles.

mod api;
mod config;
mod db;
mod max;
mod replies;
mod runtime;
mod state_machine;

use api::{create_router, AppState};
use config::{BotConfig, IngressMode};
use db::Database;
use max::{run_polling, LoggingTransport, MaxClient};
use runtime::{DatabaseDirectory, Directory, Dispatcher, RuntimeManager, SharedRuntime, Transport};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "dean_office_bot=info,tower_http=info".into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_current_span(false)
                .with_span_list(false),
        )
        .init();

    let config = BotConfig::from_env()?;

    if let Some(parent) = config.db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    tracing::info!(path = %config.db_path.display(), "Opening database");
    let db = Database::open(&config.db_path)?;

    let client = Arc::new(MaxClient::new(&config.api_url, config.token.clone())?);
    let directory: Arc<dyn Directory> = Arc::new(DatabaseDirectory::new(db));
    let transport: Arc<dyn Transport> = Arc::new(LoggingTransport::new(client.clone()));

    let dispatcher = Dispatcher::new(directory, transport, config.dispatch_settings());
    let runtime: Arc<SharedRuntime> =
        Arc::new(RuntimeManager::new(dispatcher, config.worker_idle));

    if config.owner_id.is_none() {
        tracing::warn!("ADMIN_ID is not set; roles can only be granted by existing admins");
    }
    tracing::info!(
        mode = ?config.mode,
        request_types = ?config.request_types,
        broadcast_concurrency = config.broadcast_concurrency,
        "Bot configured"
    );

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for shutdown signal");
            return;
        }
        tracing::info!("Shutdown requested");
        on_signal.cancel();
    });

    match config.mode {
        IngressMode::Polling => {
            run_polling(client.as_ref(), runtime.as_ref(), &cancel).await;
        }
        IngressMode::Webhook => {
            let app = create_router(AppState::new(runtime.clone()));
            let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
            tracing::info!(%addr, "Webhook server listening");

            let listener = tokio::net::TcpListener::bind(addr).await?;
            axum::serve(listener, app)
                .with_graceful_shutdown(async move { cancel.cancelled().await })
                .await?;
        }
    }

    runtime.shutdown().await;
    Ok(())
}
