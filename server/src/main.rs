use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;

use parley_server::config::{generate_config_template, Config};
use parley_server::db::{self, SqliteStore};
use parley_server::presence::sweeper;
use parley_server::routes;
use parley_server::state::AppState;

const DEFAULT_LOG_FILTER: &str = "parley_server=info";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load config with layered precedence: defaults < TOML < env < CLI
    let config = Config::load()?;

    // Handle --generate-config: print template and exit
    if config.generate_config {
        print!("{}", generate_config_template());
        return Ok(());
    }

    // Initialize tracing/logging
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new(DEFAULT_LOG_FILTER))?;
    if config.json_logs {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(env_filter)
            .init();
    } else {
        tracing_subscriber::fmt()
            .pretty()
            .with_env_filter(env_filter)
            .init();
    }

    tracing::info!("Parley server v{} starting", env!("CARGO_PKG_VERSION"));

    // Initialize SQLite database
    let db = db::init_db(&config.data_dir)?;
    let store = Arc::new(SqliteStore::new(db));

    // Build application state
    let app_state = AppState::new(store, config.presence.clone());
    tracing::info!(
        heartbeat_timeout_secs = config.presence.heartbeat_timeout_secs,
        sweep_interval_secs = config.presence.sweep_interval_secs,
        "Presence settings loaded"
    );

    // Reclaim connections whose heartbeats stopped
    let _sweeper = sweeper::spawn_liveness_sweeper(app_state.clone());

    // Build router
    let app = routes::build_router(app_state);

    // Bind and serve
    let addr = format!("{}:{}", config.bind_address, config.port);
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!("Listening on {}", addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}
