pub(crate) mod api;
pub(crate) mod core;
pub(crate) mod db;
pub(crate) mod schemas;
pub(crate) mod services;
pub(crate) mod store;
pub(crate) mod tasks;

#[cfg(test)]
mod test_support;

use std::sync::Arc;

use tokio::sync::watch;

use crate::core::{config::Settings, config::StoreBackend, state::AppState, telemetry};
use crate::services::audit::AuditHandle;
use crate::store::{memory::MemoryStore, postgres::PgStore, ExamStore};

pub async fn run() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let settings = Settings::load()?;
    telemetry::init_tracing(&settings)?;
    core::metrics::init(&settings)?;

    let store: Arc<dyn ExamStore> = match settings.store().backend {
        StoreBackend::Postgres => {
            let pool = db::init_pool(&settings).await?;
            db::run_migrations(&pool).await?;
            Arc::new(PgStore::new(pool))
        }
        StoreBackend::Memory => {
            tracing::warn!("Using the in-memory store; all state is lost on restart");
            Arc::new(MemoryStore::new())
        }
    };

    let audit = AuditHandle::spawn(settings.audit().queue_capacity);
    let state = AppState::new(settings, store, audit);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let watcher = tokio::spawn(tasks::scheduler::run(state.clone(), shutdown_rx));

    let app = api::router::router(state.clone());
    let listener = tokio::net::TcpListener::bind(state.settings().server_addr()).await?;

    tracing::info!(
        host = %state.settings().server_host(),
        port = state.settings().server_port(),
        environment = %state.settings().runtime().environment.as_str(),
        "examrounds API listening"
    );

    let result =
        axum::serve(listener, app).with_graceful_shutdown(core::shutdown::shutdown_signal()).await;

    if shutdown_tx.send(true).is_err() {
        tracing::warn!("Failed to signal the deadline watcher to shut down");
    }
    if let Err(err) = watcher.await {
        tracing::error!(error = %err, "Deadline watcher join failed");
    }

    result?;

    Ok(())
}
