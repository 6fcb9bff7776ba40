//! Routes module for the notifier
//!
//! - Health and metrics endpoints
//! - Manual sweep and per-user preview under `/api/v1`

use crate::handlers::{health_handler, metrics_handler, sweeps_handler, users_handler};
use crate::manager::NotifierManager;

use axum::{
    http::{header::HeaderName, HeaderValue, Request},
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::{
    cors::CorsLayer,
    request_id::{MakeRequestId, PropagateRequestIdLayer, RequestId, SetRequestIdLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};
use uuid::Uuid;

const REQUEST_ID_HEADER: &str = "x-request-id";

/// Request ids for admin calls, echoed back in the response
#[derive(Clone, Default)]
struct MakeSweepRequestId;

impl MakeRequestId for MakeSweepRequestId {
    fn make_request_id<B>(&mut self, _request: &Request<B>) -> Option<RequestId> {
        HeaderValue::from_str(&format!("req-{}", Uuid::new_v4()))
            .ok()
            .map(RequestId::new)
    }
}

/// Build the main router for the notifier
pub fn create_router(manager: Arc<NotifierManager>) -> Router {
    let timeout = manager.config().get_timeout("server");

    Router::new()
        .merge(create_api_router(Arc::clone(&manager)))
        .merge(create_health_router(manager))
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestIdLayer::new(
                    HeaderName::from_static(REQUEST_ID_HEADER),
                    MakeSweepRequestId,
                ))
                .layer(TraceLayer::new_for_http())
                .layer(PropagateRequestIdLayer::new(HeaderName::from_static(
                    REQUEST_ID_HEADER,
                )))
                .layer(CorsLayer::permissive())
                .layer(TimeoutLayer::new(timeout))
                .into_inner(),
        )
}

/// Create API routes for REST endpoints
fn create_api_router(manager: Arc<NotifierManager>) -> Router {
    Router::new()
        .route("/api/v1/sweeps", post(sweeps_handler::run_sweep))
        .route("/api/v1/sweeps/last", get(sweeps_handler::last_sweep))
        .route(
            "/api/v1/users/:uid/pending",
            get(users_handler::pending_reminders),
        )
        .with_state(manager)
}

/// Create health check and monitoring routes
fn create_health_router(manager: Arc<NotifierManager>) -> Router {
    Router::new()
        .route("/health", get(health_handler::health_check))
        .route("/metrics", get(metrics_handler::get_metrics))
        .with_state(manager)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::NotifierConfig;
    use crate::store::InMemoryStore;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use scadenze_shared::RawDeadline;
    use tower::ServiceExt;

    async fn router() -> Router {
        let store = Arc::new(InMemoryStore::new());
        store
            .insert_deadline(
                "u1",
                "d1",
                RawDeadline {
                    kind: Some("Il Bollo".to_string()),
                    due_date: Some("2025-03-06".to_string()),
                    emails: Some(vec!["a@example.com".to_string()]),
                    ..RawDeadline::default()
                },
            )
            .await;
        let manager =
            NotifierManager::with_components(NotifierConfig::default(), store, None, None).unwrap();
        create_router(Arc::new(manager))
    }

    async fn body_json(response: axum::response::Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_health_endpoint() {
        let response = router()
            .await
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let request_id = response.headers()[REQUEST_ID_HEADER].to_str().unwrap();
        assert!(request_id.starts_with("req-"));
        assert_eq!(body_json(response).await["status"], "healthy");
    }

    #[tokio::test]
    async fn test_dry_run_sweep_endpoint() {
        let response = router()
            .await
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/v1/sweeps")
                    .header("content-type", "application/json")
                    .body(Body::from(r#"{"date": "2025-03-01", "dry_run": true}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let report = body_json(response).await;
        assert_eq!(report["date"], "2025-03-01");
        assert_eq!(report["dry_run"], true);
        assert_eq!(report["notified"], 1);
    }

    #[tokio::test]
    async fn test_pending_endpoint() {
        let response = router()
            .await
            .oneshot(
                Request::builder()
                    .uri("/api/v1/users/u1/pending?date=2025-03-01")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = body_json(response).await;
        assert_eq!(body["uid"], "u1");
        assert_eq!(body["reminders"][0]["days_left"], 5);
        assert_eq!(body["reminders"][0]["subject"], "Il Bollo");
    }

    #[tokio::test]
    async fn test_last_sweep_not_found_before_first_run() {
        let response = router()
            .await
            .oneshot(
                Request::builder()
                    .uri("/api/v1/sweeps/last")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(body_json(response).await["error"]["code"], "NOT_FOUND");
    }

    #[tokio::test]
    async fn test_metrics_endpoint() {
        let response = router()
            .await
            .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
