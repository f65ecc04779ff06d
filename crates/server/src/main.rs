use std::{net::SocketAddr, sync::Arc};

use axum::{
    extract::State,
    http::StatusCode,
    routing::{delete, get, post},
    Router,
};
use control_api::{Coordinator, CoordinatorConfig};
use fanout::LocalBroadcaster;
use storage::Storage;
use tower_http::limit::RequestBodyLimitLayer;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

mod api;
mod app_state;
mod config;

use app_state::AppState;
use config::{load_settings, normalize_database_url};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let settings = load_settings();
    let database_url = normalize_database_url(&settings.database_url);
    // SQLite waits on a held write lock no longer than callers wait for the
    // session lock.
    let storage = Storage::with_busy_timeout(&database_url, settings.lock_timeout())
        .await
        .map_err(|error| {
            error!(
                %database_url,
                %error,
                "failed to open SQLite database; verify parent directory exists and permissions are correct"
            );
            error
        })?;

    let broadcaster = Arc::new(LocalBroadcaster::new(settings.broadcast_capacity));
    let coordinator = Coordinator::new(
        storage.clone(),
        Arc::new(storage),
        broadcaster,
        CoordinatorConfig {
            lock_timeout: settings.lock_timeout(),
        },
    );
    let state = AppState {
        coordinator,
        max_body_bytes: settings.max_body_bytes,
    };
    let app = build_router(Arc::new(state));

    let addr: SocketAddr = settings.server_bind.parse()?;
    info!(%addr, lock_timeout_ms = settings.lock_timeout_ms, "server listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

fn build_router(state: Arc<AppState>) -> Router {
    let max_body_bytes = state.max_body_bytes;
    Router::new()
        .route("/healthz", get(healthz))
        .route("/sessions", post(api::create_session).get(api::list_sessions))
        .route("/sessions/:session_id", delete(api::delete_session))
        .route(
            "/sessions/:session_id/items",
            get(api::list_items).post(api::add_item),
        )
        .route("/items/swap", post(api::swap_items))
        .route("/items/:item_id", delete(api::remove_item))
        .route("/sessions/:session_id/cursor", get(api::get_cursor))
        .route(
            "/sessions/:session_id/cursor/initialize",
            post(api::initialize_cursor),
        )
        .route("/sessions/:session_id/cursor/jump", post(api::jump_to_product))
        .route("/sessions/:session_id/cursor/next", post(api::advance_to_next))
        .route(
            "/sessions/:session_id/cursor/previous",
            post(api::go_to_previous),
        )
        .route("/sessions/:session_id/cursor/image", post(api::cycle_image))
        .route(
            "/sessions/:session_id/overlay",
            post(api::set_overlay).delete(api::clear_overlay),
        )
        .route("/sessions/:session_id/commands", post(api::apply_command))
        .route("/sessions/:session_id/ws", get(api::ws::ws_handler))
        .layer(RequestBodyLimitLayer::new(max_body_bytes))
        .with_state(state)
}

async fn healthz(State(state): State<Arc<AppState>>) -> (StatusCode, &'static str) {
    match state.coordinator.storage().health_check().await {
        Ok(()) => (StatusCode::OK, "ok"),
        Err(error) => {
            error!(%error, "health check failed");
            (StatusCode::SERVICE_UNAVAILABLE, "unavailable")
        }
    }
}

#[cfg(test)]
#[path = "tests/main_tests.rs"]
mod tests;
