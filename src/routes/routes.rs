//! Defines the HTTP surface of the replicator.
//!
//! - `POST /v1/replicate` : replicate one object into the target bucket
//! - `GET  /health`       : cached store reachability and slot usage
//! - `GET  /healthz`      : liveness
//!
//! Anything else answers 404 with a JSON `endpoint_not_found` body.

use crate::{
    errors::AppError,
    handlers::{
        AppState,
        health_handlers::{health, healthz},
        replicate_handlers::replicate,
    },
};
use axum::{
    Router,
    http::{Method, Uri},
    routing::{get, post},
};
use tower_http::trace::TraceLayer;

/// Build the router. The caller supplies the [`AppState`] with `with_state`.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/health", get(health))
        .route("/v1/replicate", post(replicate))
        .fallback(fallback)
        .layer(TraceLayer::new_for_http())
}

async fn fallback(method: Method, uri: Uri) -> AppError {
    AppError::not_found(format!("no route for {method} {}", uri.path()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        models::identity::{ObjectIdentity, StoreKind},
        services::{
            health::HealthMonitor,
            replicator::{AdmissionPolicy, Replicator, ReplicatorSettings},
            retry::RetryPolicy,
            stores::memory::MemoryStore,
        },
    };
    use axum::{
        body::Body,
        http::{Request, StatusCode, header},
        response::Response,
    };
    use http_body_util::BodyExt;
    use serde_json::{Value, json};
    use std::{sync::Arc, time::Duration};
    use tower::ServiceExt;

    const TARGET: &str = "target";

    struct Harness {
        app: Router,
        source: MemoryStore,
        destination: MemoryStore,
        replicator: Replicator,
    }

    fn harness_with(settings: ReplicatorSettings, health_ttl: Duration) -> Harness {
        let source = MemoryStore::new();
        let destination = MemoryStore::new();
        let replicator = Replicator::new(
            Arc::new(source.clone()),
            Arc::new(destination.clone()),
            settings,
        );
        let state = AppState {
            health: HealthMonitor::new(replicator.clone(), health_ttl),
            replicator: replicator.clone(),
            source_kind: StoreKind::Memory,
            destination_kind: StoreKind::Memory,
            target_bucket: TARGET.to_string(),
        };
        Harness {
            app: routes().with_state(state),
            source,
            destination,
            replicator,
        }
    }

    fn harness() -> Harness {
        harness_with(
            ReplicatorSettings {
                chunk_size: 8,
                retry: RetryPolicy::new(3, Duration::from_millis(1), 2.0),
                ..ReplicatorSettings::default()
            },
            Duration::from_secs(10),
        )
    }

    fn source_id(key: &str) -> ObjectIdentity {
        ObjectIdentity::new(StoreKind::Memory, "source", key)
    }

    fn target_id(key: &str) -> ObjectIdentity {
        ObjectIdentity::new(StoreKind::Memory, TARGET, key)
    }

    fn post_json(body: Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/v1/replicate")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    async fn json_body(response: Response) -> Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn replicates_then_skips() {
        let h = harness();
        h.source.put(&source_id("test.txt"), b"Hello, World!");

        let response = h
            .app
            .clone()
            .oneshot(post_json(json!({"s3_bucket": "source", "s3_key": "test.txt"})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["status"], "succeeded");
        assert_eq!(body["bytes_transferred"], 13);
        assert_eq!(body["chunks"], 2);
        assert_eq!(body["source"], "mem://source/test.txt");
        assert_eq!(body["destination"], "mem://target/test.txt");
        assert!(body.get("error").is_none());
        assert_eq!(
            h.destination.get(&target_id("test.txt")).unwrap().as_ref(),
            b"Hello, World!"
        );

        let response = h
            .app
            .oneshot(post_json(json!({"s3_bucket": "source", "s3_key": "test.txt"})))
            .await
            .unwrap();
        let body = json_body(response).await;
        assert_eq!(body["status"], "skipped");
        assert_eq!(body["reason"], "already_replicated");
        assert_eq!(body["bytes_transferred"], 0);
    }

    #[tokio::test]
    async fn leading_slash_is_stripped_from_destination_key() {
        let h = harness();
        h.source.put(&source_id("/docs/a.txt"), b"abc");

        let response = h
            .app
            .oneshot(post_json(json!({"s3_bucket": "source", "s3_key": "/docs/a.txt"})))
            .await
            .unwrap();
        let body = json_body(response).await;
        assert_eq!(body["status"], "succeeded");
        assert_eq!(body["destination"], "mem://target/docs/a.txt");
        assert!(h.destination.get(&target_id("docs/a.txt")).is_some());
    }

    #[tokio::test]
    async fn failed_job_reports_error_kind() {
        let h = harness();

        let response = h
            .app
            .oneshot(post_json(json!({"s3_bucket": "source", "s3_key": "missing.txt"})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["status"], "failed");
        assert_eq!(body["error"]["kind"], "not_found");
        assert_eq!(body["attempts"]["open"], 1);
    }

    #[tokio::test]
    async fn missing_or_blank_fields_are_rejected() {
        let h = harness();
        for payload in [
            json!({"s3_key": "a.txt"}),
            json!({"s3_bucket": "source", "s3_key": "   "}),
            json!({"s3_bucket": "source", "s3_key": "/"}),
            json!({"s3_bucket": 5, "s3_key": "a.txt"}),
        ] {
            let response = h.app.clone().oneshot(post_json(payload)).await.unwrap();
            assert_eq!(response.status(), StatusCode::BAD_REQUEST);
            let body = json_body(response).await;
            assert_eq!(body["error"], "validation_error");
            assert_eq!(body["status"], 400);
        }
    }

    #[tokio::test]
    async fn malformed_json_is_rejected() {
        let h = harness();
        let request = Request::builder()
            .method("POST")
            .uri("/v1/replicate")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from("{not json"))
            .unwrap();
        let response = h.app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(json_body(response).await["error"], "validation_error");
    }

    #[tokio::test]
    async fn non_json_content_type_is_rejected() {
        let h = harness();
        let request = Request::builder()
            .method("POST")
            .uri("/v1/replicate")
            .header(header::CONTENT_TYPE, "text/plain")
            .body(Body::from("s3_bucket=source"))
            .unwrap();
        let response = h.app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(json_body(response).await["error"], "invalid_content_type");
    }

    #[tokio::test]
    async fn unknown_route_is_json_404() {
        let h = harness();
        let response = h.app.oneshot(get("/v2/nothing")).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let body = json_body(response).await;
        assert_eq!(body["error"], "endpoint_not_found");
        assert_eq!(body["status"], 404);
    }

    #[tokio::test]
    async fn health_reflects_store_reachability() {
        let h = harness_with(ReplicatorSettings::default(), Duration::ZERO);

        let response = h.app.clone().oneshot(get("/health")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["checks"]["source"]["ok"], true);
        assert_eq!(body["available_slots"], 4);

        h.destination.set_reachable(false);
        let response = h.app.clone().oneshot(get("/health")).await.unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        let body = json_body(response).await;
        assert_eq!(body["checks"]["destination"]["ok"], false);

        let response = h.app.oneshot(get("/healthz")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json_body(response).await["status"], "ok");
    }

    #[tokio::test]
    async fn busy_reject_policy_answers_429() {
        let h = harness_with(
            ReplicatorSettings {
                chunk_size: 8,
                concurrency_ceiling: 1,
                admission: AdmissionPolicy::Reject,
                ..ReplicatorSettings::default()
            },
            Duration::from_secs(10),
        );
        h.source.put(&source_id("a.txt"), b"Hello, World!");
        h.source.put(&source_id("b.txt"), b"other");
        h.source.pause_reads();

        let first = tokio::spawn(
            h.app
                .clone()
                .oneshot(post_json(json!({"s3_bucket": "source", "s3_key": "a.txt"}))),
        );
        h.source.wait_for_reads(1).await;

        let response = h
            .app
            .clone()
            .oneshot(post_json(json!({"s3_bucket": "source", "s3_key": "b.txt"})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(json_body(response).await["error"], "retry_later");

        h.source.resume_reads();
        let response = first.await.unwrap().unwrap();
        assert_eq!(json_body(response).await["status"], "succeeded");
    }

    #[tokio::test]
    async fn shutdown_answers_503() {
        let h = harness();
        h.source.put(&source_id("a.txt"), b"abc");
        h.replicator.shutdown();

        let response = h
            .app
            .oneshot(post_json(json!({"s3_bucket": "source", "s3_key": "a.txt"})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(json_body(response).await["error"], "shutting_down");
        assert!(h.destination.get(&target_id("a.txt")).is_none());
    }
}
