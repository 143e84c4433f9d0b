//! HTTP surface: intake, replay, and listing for operators.
//!
//! `axum::Router` layered with `tower_http::cors::CorsLayer` and
//! `TraceLayer` over a typed router.

pub mod routes;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::http::Method;
use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::AppContext;

/// CORS policy: allow all origins, `GET, POST, OPTIONS`, headers
/// `Accept, Authorization, Content-Type`.
fn cors_layer() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(tower_http::cors::Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([
            axum::http::header::ACCEPT,
            axum::http::header::AUTHORIZATION,
            axum::http::header::CONTENT_TYPE,
        ])
        .max_age(std::time::Duration::from_secs(3600))
}

pub fn build_router(ctx: Arc<AppContext>) -> Router {
    Router::new()
        .route("/healthz", get(routes::healthz))
        .route("/notifications", get(routes::list_notifications))
        .route("/events", post(routes::create_event))
        .route("/tasks/{task_id}/replay", post(routes::replay_task))
        .layer(cors_layer())
        .layer(TraceLayer::new_for_http())
        .with_state(ctx)
}

pub async fn serve(ctx: Arc<AppContext>, port: u16) -> anyhow::Result<()> {
    let addr: SocketAddr = format!("0.0.0.0:{port}").parse()?;
    let router = build_router(ctx);

    info!(%addr, "HTTP surface listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DaemonConfig;
    use crate::deliver::logging::LoggingDeliverer;
    use crate::queue::memory::InMemoryQueue;
    use crate::store::sqlite::SqliteStore;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    async fn test_ctx() -> Arc<AppContext> {
        let config = Arc::new(DaemonConfig::new(
            None, None, None, None, None, None, None, None, None, None, None, None, None, false,
            false, None, None, None,
        ));
        let store = Arc::new(SqliteStore::in_memory().await.unwrap());
        let queue = Arc::new(InMemoryQueue::default());
        let deliver = Arc::new(LoggingDeliverer::new("notices@example.com"));
        Arc::new(AppContext::new(config, store, queue, deliver))
    }

    #[tokio::test]
    async fn healthz_returns_ok() {
        let ctx = test_ctx().await;
        let router = build_router(ctx);

        let response = router
            .oneshot(Request::builder().uri("/healthz").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), axum::http::StatusCode::OK);
    }

    #[tokio::test]
    async fn create_event_with_empty_body_uses_defaults() {
        let ctx = test_ctx().await;
        let router = build_router(ctx);

        let response = router
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/events")
                    .header("content-type", "application/json")
                    .body(Body::from("{}"))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), axum::http::StatusCode::OK);
    }

    #[tokio::test]
    async fn create_event_with_bad_json_is_400() {
        let ctx = test_ctx().await;
        let router = build_router(ctx);

        let response = router
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/events")
                    .header("content-type", "application/json")
                    .body(Body::from("not json"))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), axum::http::StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn replay_missing_task_id_is_400_via_404_route() {
        let ctx = test_ctx().await;
        let router = build_router(ctx);

        // No trailing segment means the route itself doesn't match.
        let response = router
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/tasks//replay")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert!(response.status().is_client_error());
    }
}
