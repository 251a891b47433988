//! Door access server: REST API over a JSON file store.

use std::sync::Arc;

use door_access::config::Settings;
use door_access::{EngineBuilder, HttpDoorController, HttpIdentityVerifier, JsonFileStore};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[tokio::main]
async fn main() -> Result<(), BoxError> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let settings = Settings::from_env()?;
    let store = JsonFileStore::open(&settings.data_dir)?;
    let controller = HttpDoorController::new(settings.door_timeout, &settings.door_unlock_path)?;

    let mut builder = EngineBuilder::new(store)
        .log_capacity(settings.log_capacity)
        .controller(controller);
    if settings.identity_enabled() {
        builder = builder.identity_verifier(HttpIdentityVerifier::new(
            &settings.identity_url,
            &settings.identity_user,
            &settings.identity_key,
            settings.identity_timeout,
        )?);
    } else {
        warn!("no identity directory configured, new user ids are accepted offline");
    }
    let engine = Arc::new(builder.build());

    let listener = tokio::net::TcpListener::bind(&settings.bind_addr).await?;
    info!(
        addr = %settings.bind_addr,
        data_dir = %settings.data_dir.display(),
        "door access server listening"
    );
    axum::serve(listener, door_access::axum::router(engine))
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    info!("door access server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!(error = %err, "failed to listen for shutdown signal");
    }
}
