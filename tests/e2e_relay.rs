// SPDX-License-Identifier: MIT OR Apache-2.0
//! End-to-end happy paths over the in-process HTTP router.

use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use relay_adapters::AdapterManager;
use relay_bus::SubscriptionBus;
use relay_config::RelayConfig;
use relay_daemon::{AppState, build_app};
use relay_engine::RelayEngine;
use relay_store::Store;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tower::ServiceExt;

fn test_state() -> Arc<AppState> {
    let store = Store::open_in_memory().unwrap();
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

async fn request_json(
    app: &axum::Router,
    method: &str,
    uri: &str,
    body: Option<serde_json::Value>,
) -> (StatusCode, serde_json::Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    let body = match body {
        Some(json) => {
            builder = builder.header("content-type", "application/json");
            Body::from(json.to_string())
        }
        None => Body::empty(),
    };
    let resp = app
        .clone()
        .oneshot(builder.body(body).unwrap())
        .await
        .unwrap();
    let status = resp.status();
    let bytes = resp.into_body().collect().await.unwrap().to_bytes();
    let json = if bytes.is_empty() {
        serde_json::Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, json)
}

#[tokio::test]
async fn register_publish_trace_happy_path() {
    let app = build_app(test_state());

    let (status, endpoint) = request_json(
        &app,
        "POST",
        "/endpoints",
        Some(serde_json::json!({"subject": "relay.agent.a"})),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(endpoint["subject"], "relay.agent.a");

    let (status, receipt) = request_json(
        &app,
        "POST",
        "/messages",
        Some(serde_json::json!({
            "subject": "relay.agent.a",
            "payload": {"x": 1},
            "from": "relay.human.console",
        })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(receipt["delivered_to"], 1);
    assert_eq!(receipt["trace_id"], receipt["message_id"]);

    let message_id = receipt["message_id"].as_str().unwrap();
    let (status, trace) =
        request_json(&app, "GET", &format!("/messages/{message_id}/trace"), None).await;
    assert_eq!(status, StatusCode::OK);
    let events: Vec<&str> = trace["spans"]
        .as_array()
        .unwrap()
        .iter()
        .map(|s| s["event"].as_str().unwrap())
        .collect();
    assert_eq!(events, vec!["accept", "deliver"]);

    let (status, envelope) =
        request_json(&app, "GET", &format!("/messages/{message_id}"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(envelope["status"], "delivered");
    assert_eq!(envelope["payload"]["x"], 1);
}

#[tokio::test]
async fn wildcard_fanout_delivers_to_both() {
    let app = build_app(test_state());

    for subject in ["relay.agent.>", "relay.agent.*"] {
        let (status, _) = request_json(
            &app,
            "POST",
            "/endpoints",
            Some(serde_json::json!({"subject": subject})),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
    }

    let (_, receipt) = request_json(
        &app,
        "POST",
        "/messages",
        Some(serde_json::json!({
            "subject": "relay.agent.x",
            "payload": {},
            "from": "relay.human.console",
        })),
    )
    .await;
    assert_eq!(receipt["delivered_to"], 2);
}

#[tokio::test]
async fn inbox_reads_messages_for_endpoint() {
    let app = build_app(test_state());

    request_json(
        &app,
        "POST",
        "/endpoints",
        Some(serde_json::json!({"subject": "relay.agent.>"})),
    )
    .await;

    for i in 0..3 {
        request_json(
            &app,
            "POST",
            "/messages",
            Some(serde_json::json!({
                "subject": format!("relay.agent.w{i}"),
                "payload": {"i": i},
                "from": "relay.human.console",
            })),
        )
        .await;
    }
    // Noise on another subject tree.
    request_json(
        &app,
        "POST",
        "/messages",
        Some(serde_json::json!({
            "subject": "relay.other.x",
            "payload": {},
            "from": "relay.human.console",
        })),
    )
    .await;

    let (status, inbox) = request_json(
        &app,
        "GET",
        "/endpoints/relay.agent.%3E/inbox",
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(inbox["messages"].as_array().unwrap().len(), 3);
}

#[tokio::test]
async fn message_list_cursor_pages_do_not_overlap() {
    let app = build_app(test_state());

    for i in 0..6 {
        request_json(
            &app,
            "POST",
            "/messages",
            Some(serde_json::json!({
                "subject": "relay.page.t",
                "payload": {"i": i},
                "from": "relay.human.console",
            })),
        )
        .await;
    }

    let (_, first) = request_json(&app, "GET", "/messages?limit=3", None).await;
    let first_ids: Vec<String> = first["messages"]
        .as_array()
        .unwrap()
        .iter()
        .map(|m| m["id"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(first_ids.len(), 3);
    let cursor = first["next_cursor"].as_str().unwrap().to_string();

    let (_, second) =
        request_json(&app, "GET", &format!("/messages?limit=3&cursor={cursor}"), None).await;
    for m in second["messages"].as_array().unwrap() {
        assert!(!first_ids.contains(&m["id"].as_str().unwrap().to_string()));
    }
}

#[tokio::test]
async fn unknown_message_is_404() {
    let app = build_app(test_state());
    let (status, body) = request_json(
        &app,
        "GET",
        "/messages/00000000-0000-7000-8000-000000000000",
        None,
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "NOT_FOUND");
}

#[tokio::test]
async fn unknown_body_fields_are_rejected() {
    let app = build_app(test_state());
    let (status, body) = request_json(
        &app,
        "POST",
        "/messages",
        Some(serde_json::json!({
            "subject": "relay.agent.a",
            "payload": {},
            "from": "relay.human.console",
            "surprise": true,
        })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "INVALID_REQUEST");
}

#[tokio::test]
async fn health_reports_version_and_uptime() {
    let app = build_app(test_state());
    let (status, body) = request_json(&app, "GET", "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["version"], relay_core::CONTRACT_VERSION);
    assert!(body["uptime_seconds"].is_number());
}

#[tokio::test]
async fn metrics_count_published_envelopes() {
    let app = build_app(test_state());
    request_json(
        &app,
        "POST",
        "/messages",
        Some(serde_json::json!({
            "subject": "relay.counted.x",
            "payload": {},
            "from": "relay.human.console",
        })),
    )
    .await;

    let (status, metrics) = request_json(&app, "GET", "/metrics", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(metrics["published"], 1);
    assert_eq!(metrics["delivered"], 1);

    let (status, trace_metrics) = request_json(&app, "GET", "/trace/metrics", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(trace_metrics["total_messages"], 1);
}

#[tokio::test]
async fn register_unregister_register_is_idempotent() {
    let app = build_app(test_state());
    let body = serde_json::json!({"subject": "relay.agent.a"});

    let (status, _) = request_json(&app, "POST", "/endpoints", Some(body.clone())).await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, deleted) =
        request_json(&app, "DELETE", "/endpoints/relay.agent.a", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(deleted["success"], true);

    let (status, again) = request_json(&app, "POST", "/endpoints", Some(body)).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(again["subject"], "relay.agent.a");
}

#[tokio::test]
async fn conversations_projection_joins_exchanges() {
    let app = build_app(test_state());

    let (_, receipt) = request_json(
        &app,
        "POST",
        "/messages",
        Some(serde_json::json!({
            "subject": "relay.agent.planner",
            "payload": {"ask": "plan"},
            "from": "relay.human.console",
        })),
    )
    .await;
    let trace_id = receipt["trace_id"].as_str().unwrap();

    let (status, body) = request_json(&app, "GET", "/conversations", None).await;
    assert_eq!(status, StatusCode::OK);
    let conversations = body["conversations"].as_array().unwrap();
    assert_eq!(conversations.len(), 1);
    assert_eq!(conversations[0]["trace_id"], trace_id);
    assert_eq!(conversations[0]["label"], "planner");
}
