use relay_server::lobby::{AppState, CONFIG_FILE, read_config};
use relay_server::{build_router, run_watchdog};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
/// Activates tracing, loads the configuration, spawns the watch dog and serves the web socket
/// plus the pages enlist and reload.
async fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| {
                    format!("{}=trace,tower_http=debug", env!("CARGO_CRATE_NAME")).into()
                }),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_file(true)
                .with_line_number(true)
                .with_target(true)
                .with_thread_ids(true)
                .with_thread_names(true),
        )
        .init();

    let config = match read_config(CONFIG_FILE).await {
        Ok(config) => config,
        Err(message) => {
            tracing::error!(message, "Initial load error.");
            return;
        }
    };
    let bind_address = config.bind_address.clone();
    let app_state = Arc::new(AppState::new(config));
    tokio::spawn(run_watchdog(app_state.clone()));

    let listener = match tokio::net::TcpListener::bind(&bind_address).await {
        Ok(listener) => listener,
        Err(error) => {
            tracing::error!(%error, %bind_address, "Could not bind.");
            return;
        }
    };
    tracing::info!(%bind_address, "Relay listening");

    if let Err(error) = axum::serve(listener, build_router(app_state)).await {
        tracing::error!(%error, "Relay stopped.");
    }
}
