//! `shipgate-server`: the HTTP face of open story sessions.
//!
//! Sessions live in [`state::AppState`]; the routes only translate between
//! HTTP and the session's controller and registry. All state changes are
//! also pushed to `/api/events` as server-sent events.

pub mod error;
pub mod routes;
pub mod state;

use axum::routing::{get, post};
use axum::Router;
use shipgate_core::config::Config;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

pub use state::AppState;

/// Build the axum Router with all API routes and middleware.
/// Used by `serve()` and available for integration testing.
pub fn build_router(app_state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/health", get(routes::health::health))
        // Events (SSE)
        .route("/api/events", get(routes::events::sse_events))
        // Stories (read-through to the upstream)
        .route(
            "/api/stories",
            get(routes::stories::list_stories).post(routes::stories::add_story),
        )
        .route(
            "/api/stories/{story}/impact",
            get(routes::stories::get_impact),
        )
        .route(
            "/api/stories/{story}/results",
            get(routes::stories::get_results),
        )
        // Sessions
        .route(
            "/api/stories/{story}/session",
            get(routes::sessions::get_session)
                .post(routes::sessions::open_session)
                .delete(routes::sessions::close_session),
        )
        // Deployment
        .route(
            "/api/stories/{story}/deployment",
            get(routes::deployment::get_deployment),
        )
        .route(
            "/api/stories/{story}/deployment/start",
            post(routes::deployment::start_deployment),
        )
        .route(
            "/api/stories/{story}/deployment/rearm",
            post(routes::deployment::rearm_deployment),
        )
        .route(
            "/api/stories/{story}/checklist/{item}",
            axum::routing::put(routes::deployment::set_item),
        )
        .route(
            "/api/stories/{story}/checklist/{item}/toggle",
            post(routes::deployment::toggle_item),
        )
        // Tests
        .route("/api/stories/{story}/tests", get(routes::items::list_items))
        .route(
            "/api/stories/{story}/tests/{kind}/{item}/run",
            post(routes::items::run_item),
        )
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(app_state)
}

/// Start the server on `config.server.port`.
pub async fn serve(config: &Config) -> anyhow::Result<()> {
    let addr = format!("0.0.0.0:{}", config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    serve_on(AppState::from_config(config)?, listener).await
}

/// Start the server on a pre-bound listener.
///
/// Unlike `serve`, this accepts a `TcpListener` that was already bound so the
/// caller can read the actual port before starting (useful when `port = 0` and
/// the OS picks a free port). Open sessions are torn down on Ctrl-C.
pub async fn serve_on(app_state: AppState, listener: tokio::net::TcpListener) -> anyhow::Result<()> {
    let actual_port = listener.local_addr()?.port();
    let app = build_router(app_state.clone());

    tracing::info!(
        api_base = %app_state.service.base_url(),
        "shipgate server listening on http://localhost:{actual_port}"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("shutting down");
        })
        .await?;
    app_state.close_all().await;
    Ok(())
}
