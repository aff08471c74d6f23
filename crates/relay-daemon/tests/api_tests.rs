// SPDX-License-Identifier: MIT OR Apache-2.0
//! Edge-level tests: health, validation, the feature gate, and restart
//! durability of the underlying store.

use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use relay_adapters::AdapterManager;
use relay_bus::SubscriptionBus;
use relay_config::RelayConfig;
use relay_daemon::{AppState, build_app, build_disabled_app};
use relay_engine::RelayEngine;
use relay_store::Store;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tower::ServiceExt;

fn state_with_store(store: Store) -> Arc<AppState> {
    let bus = SubscriptionBus::new(Duration::from_millis(250));
    let engine = RelayEngine::new(&store, bus);
    let manager = AdapterManager::new(engine.clone(), &store);
    Arc::new(AppState {
        config: RelayConfig::default(),
        store,
        engine,
        manager,
        started_at: Instant::now(),
    })
}

fn test_state() -> Arc<AppState> {
    state_with_store(Store::open_in_memory().unwrap())
}

async fn get_json(app: &axum::Router, uri: &str) -> (StatusCode, serde_json::Value) {
    let resp = app
        .clone()
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = resp.status();
    let bytes = resp.into_body().collect().await.unwrap().to_bytes();
    let json = serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null);
    (status, json)
}

#[tokio::test]
async fn health_returns_ok() {
    let app = build_app(test_state());
    let (status, json) = get_json(&app, "/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "ok");
    assert_eq!(json["version"], relay_core::CONTRACT_VERSION);
}

#[tokio::test]
async fn request_id_header_is_set() {
    let app = build_app(test_state());
    let resp = app
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert!(resp.headers().contains_key("x-request-id"));
}

#[tokio::test]
async fn malformed_publish_bodies_are_structured_400s() {
    let app = build_app(test_state());

    for body in [
        serde_json::json!({"payload": {}, "from": "relay.a.b"}),
        serde_json::json!({"subject": "relay.a.b", "payload": {}}),
        serde_json::json!({"subject": "relay.a.b", "payload": {}, "from": "relay.a.c", "nope": 1}),
    ] {
        let resp = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/messages")
                    .header("content-type", "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let bytes = resp.into_body().collect().await.unwrap().to_bytes();
        let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert!(json["code"].is_string());
        assert!(json["error"].is_string());
    }
}

#[tokio::test]
async fn bad_status_filter_is_400() {
    let app = build_app(test_state());
    let (status, json) = get_json(&app, "/messages?status=exploded").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["code"], "INVALID_REQUEST");
}

#[tokio::test]
async fn inbox_of_unknown_endpoint_is_404() {
    let app = build_app(test_state());
    let (status, json) = get_json(&app, "/endpoints/relay.ghost.x/inbox").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(json["code"], "NOT_FOUND");
}

#[tokio::test]
async fn disabled_router_answers_503() {
    let app = build_disabled_app();
    let (status, json) = get_json(&app, "/messages").await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(json["code"], "FEATURE_DISABLED");
}

#[tokio::test]
async fn endpoints_and_messages_survive_restart() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("relay.db");

    {
        let app = build_app(state_with_store(Store::open(Path::new(&path)).unwrap()));
        let resp = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/endpoints")
                    .header("content-type", "application/json")
                    .body(Body::from(r#"{"subject":"relay.agent.a"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::CREATED);

        let resp = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/messages")
                    .header("content-type", "application/json")
                    .body(Body::from(
                        r#"{"subject":"relay.agent.a","payload":{"x":1},"from":"relay.human.console"}"#,
                    ))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    // A fresh process over the same file sees both.
    let app = build_app(state_with_store(Store::open(Path::new(&path)).unwrap()));
    let (status, endpoints) = get_json(&app, "/endpoints").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(endpoints.as_array().unwrap().len(), 1);

    let (_, page) = get_json(&app, "/messages").await;
    assert_eq!(page["messages"].as_array().unwrap().len(), 1);
    assert_eq!(page["messages"][0]["status"], "delivered");
}
