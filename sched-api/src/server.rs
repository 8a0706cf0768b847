//! HTTP server implementation using Axum.

use axum::routing::get;
use axum::Router;
use libschedcast::SchedcastService;
use std::future::Future;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::{routes, ws};

/// Shared state for the API server.
#[derive(Clone)]
pub struct AppState {
    pub service: SchedcastService,
}

impl AppState {
    pub fn new(service: SchedcastService) -> Self {
        Self { service }
    }
}

/// Build the Axum router with all routes.
pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(routes::health))
        .route(
            "/scheduled-posts",
            get(routes::list_posts).post(routes::create_post),
        )
        .route(
            "/scheduled-posts/{id}",
            get(routes::get_post)
                .patch(routes::reschedule_post)
                .delete(routes::cancel_post),
        )
        .route("/scheduled-posts/{id}/logs", get(routes::post_logs))
        .route("/ws", get(ws::ws_handler))
        .fallback(routes::not_found)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Bind `addr` and serve until `shutdown` resolves.
pub async fn serve<F>(state: AppState, addr: &str, shutdown: F) -> anyhow::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(addr = %listener.local_addr()?, "sched-api listening");

    axum::serve(listener, build_router(state))
        .with_graceful_shutdown(shutdown)
        .await?;
    Ok(())
}
