use tracing::info;

use verser_gateway::heartbeat::spawn_heartbeat;
use verser_server::config::Config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "verser=debug,tower_http=debug".into()),
        )
        .init();

    let config = Config::from_env()?;

    let storage = verser_server::open_storage(&config.storage)?;
    info!("Using {:?} storage", config.storage);

    let state = verser_server::app_state(storage, config.jwt_secret.clone());
    let heartbeat = spawn_heartbeat(state.relay.clone(), config.heartbeat);

    let app = verser_server::router(state);

    info!("Verser server listening on {}", config.addr);
    let listener = tokio::net::TcpListener::bind(config.addr).await?;
    axum::serve(listener, app).await?;

    heartbeat.abort();
    Ok(())
}
