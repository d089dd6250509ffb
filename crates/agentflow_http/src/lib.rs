//! HTTP control plane (spec.md §4.8, §6): a thin, mostly-stateless read/mutate
//! layer over the scheduler's `TaskStore`, the `GroupQueue`, the
//! `ResourceMonitor` and the `Heartbeat` loop.
//!
//! Grounded on `tvanderb-AutOSINT/crates/fetch/src/routes.rs`'s router-builder
//! shape (`Router::new().route(...).with_state(state)` plus a
//! `tower_http::cors::CorsLayer`) and `rustpress-net-rustpress-core-base`'s
//! pin on `tower-http`'s CORS layer version.

pub mod routes;
pub mod state;

use std::sync::Arc;

use axum::extract::Request;
use axum::http::{header, Method, StatusCode};
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::routing::get;
use axum::Router;
use tower_http::cors::CorsLayer;

pub use state::AppState;

/// `tower_http`'s `CorsLayer` answers every preflight `OPTIONS` request with
/// `200 OK` directly, short-circuiting the router beneath it; spec.md §6
/// requires "OPTIONS returns 204". Rewriting the status after the fact is the
/// only hook `CorsLayer` exposes for this.
async fn preflight_no_content(req: Request, next: Next) -> Response {
    let is_options = req.method() == Method::OPTIONS;
    let mut response = next.run(req).await;
    if is_options {
        *response.status_mut() = StatusCode::NO_CONTENT;
    }
    response
}

/// Builds the full route table with a permissive CORS layer applied (spec.md
/// §6 "callable from a browser dashboard with no auth").
pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(tower_http::cors::Any)
        .allow_methods([Method::GET, Method::POST, Method::PATCH, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE]);

    Router::new()
        .route("/health", get(routes::health))
        .route("/status", get(routes::status))
        .route("/scheduler/tasks", get(routes::list_tasks))
        .route("/scheduler/tasks/:id", get(routes::get_task))
        .route("/scheduler/tasks/:id/pause", axum::routing::post(routes::pause_task))
        .route("/scheduler/tasks/:id/resume", axum::routing::post(routes::resume_task))
        .route("/scheduler/tasks/:id/cancel", axum::routing::post(routes::cancel_task))
        .route("/scheduler/tasks/:id/run", axum::routing::post(routes::run_task))
        .route("/scheduler/stats", get(routes::scheduler_stats))
        .route(
            "/heartbeat/config",
            get(routes::get_heartbeat_config)
                .post(routes::patch_heartbeat_config)
                .patch(routes::patch_heartbeat_config),
        )
        .route("/heartbeat/ping", axum::routing::post(routes::ping_heartbeat))
        .layer(cors)
        .layer(middleware::from_fn(preflight_no_content))
        .with_state(Arc::new(state))
}

#[cfg(test)]
mod tests {
    use super::*;
    use agentflow_logging::ErrorRing;
    use agentflow_queue::{GroupQueue, ResourceMonitorCapacity};
    use agentflow_resource::{ResourceMonitor, ResourceStats};
    use agentflow_scheduler::{SqliteTaskStore, TaskStore};
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use sqlx::sqlite::SqlitePoolOptions;
    use tower::ServiceExt;

    struct FixedResources;
    impl state::ResourceStatsSource for FixedResources {
        fn stats(&self) -> ResourceStats {
            ResourceStats {
                current_max: 4,
                base_max: 4,
                cpu_usage_percent: 10.0,
                memory_free_percent: 90.0,
            }
        }
    }

    struct FixedGroups;
    impl state::GroupRegistry for FixedGroups {
        fn group_folders(&self) -> Vec<String> {
            vec!["main".to_string()]
        }
    }

    async fn test_state() -> AppState {
        let pool = SqlitePoolOptions::new().connect(":memory:").await.unwrap();
        let store = SqliteTaskStore::new(pool);
        store.ensure_schema().await.unwrap();

        AppState::new(
            "test",
            Arc::new(store),
            GroupQueue::new(Arc::new(ResourceMonitorCapacity::new(ResourceMonitor::new(4))), 100),
            Arc::new(FixedResources),
            Arc::new(FixedGroups),
            ErrorRing::new(),
            None,
        )
    }

    #[tokio::test]
    async fn health_route_reports_ok() {
        let app = router(test_state().await);
        let response = app
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn unregistered_heartbeat_ping_returns_503() {
        let app = router(test_state().await);
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/heartbeat/ping")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn cors_preflight_returns_204() {
        let app = router(test_state().await);
        let response = app
            .oneshot(
                Request::builder()
                    .method("OPTIONS")
                    .uri("/status")
                    .header("Origin", "http://localhost")
                    .header("Access-Control-Request-Method", "GET")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
    }

    #[tokio::test]
    async fn unknown_task_id_returns_404() {
        let app = router(test_state().await);
        let response = app
            .oneshot(
                Request::builder()
                    .uri(format!("/scheduler/tasks/{}", agentflow_protocol::TaskId::new()))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
