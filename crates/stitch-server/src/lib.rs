pub mod auth;
pub mod error;
pub mod routes;
pub mod state;

use axum::middleware;
use axum::routing::{get, post};
use axum::Router;
use state::{AppState, ServerConfig};
use stitch_core::catalog::Catalog;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Build the axum Router with all API routes and middleware.
/// Used by `serve()` and available for integration testing.
pub fn build_router(catalog: Catalog, config: ServerConfig) -> Router {
    let app_state = AppState::new(catalog, config);

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(routes::health::get_health))
        .route("/discover", get(routes::discover::get_discover))
        .route("/discover", post(routes::discover::post_discover))
        .route("/compose", post(routes::compose::post_compose))
        .route("/chat", post(routes::chat::post_chat))
        .layer(middleware::from_fn_with_state(
            app_state.clone(),
            auth::auth_middleware,
        ))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(app_state)
}

/// Start the control plane on `port`.
pub async fn serve(catalog: Catalog, config: ServerConfig, port: u16) -> anyhow::Result<()> {
    let app = build_router(catalog, config);

    let addr = format!("0.0.0.0:{port}");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    let actual_port = listener.local_addr()?.port();

    tracing::info!("stitch control plane listening on http://localhost:{actual_port}");

    axum::serve(listener, app).await?;
    Ok(())
}
