// SPDX-License-Identifier: MIT OR Apache-2.0
//! Budget enforcement over the HTTP surface: cycles, hop limits, grammar.

use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use relay_adapters::AdapterManager;
use relay_bus::SubscriptionBus;
use relay_config::RelayConfig;
use relay_daemon::{AppState, build_app};
use relay_engine::{PublishRequest, RelayEngine};
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
async fn self_publish_dead_letters_not_an_http_error() {
    let app = build_app(test_state());

    request_json(
        &app,
        "POST",
        "/endpoints",
        Some(serde_json::json!({"subject": "relay.loop.a"})),
    )
    .await;

    // A budget rejection is a 200 with delivered_to 0, not an error.
    let (status, receipt) = request_json(
        &app,
        "POST",
        "/messages",
        Some(serde_json::json!({
            "subject": "relay.loop.a",
            "payload": {},
            "from": "relay.loop.a",
        })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(receipt["delivered_to"], 0);

    let message_id = receipt["message_id"].as_str().unwrap();
    let (_, trace) =
        request_json(&app, "GET", &format!("/messages/{message_id}/trace"), None).await;
    let events: Vec<&str> = trace["spans"]
        .as_array()
        .unwrap()
        .iter()
        .map(|s| s["event"].as_str().unwrap())
        .collect();
    assert_eq!(events, vec!["reject"]);

    let (status, dead) = request_json(&app, "GET", "/dead-letters", None).await;
    assert_eq!(status, StatusCode::OK);
    let dead = dead.as_array().unwrap();
    assert_eq!(dead.len(), 1);
    assert_eq!(dead[0]["reason"], "cycle_detected");
    assert_eq!(dead[0]["message_id"], message_id);
}

#[tokio::test]
async fn hop_chain_dead_letters_on_third_publish() {
    let state = test_state();
    let app = build_app(state.clone());

    for subject in ["relay.chain.1", "relay.chain.2", "relay.chain.3"] {
        request_json(
            &app,
            "POST",
            "/endpoints",
            Some(serde_json::json!({"subject": subject})),
        )
        .await;
    }

    // Subscribers that re-publish each link to the next.
    let mut guards = Vec::new();
    for (pattern, next) in [
        ("relay.chain.1", "relay.chain.2"),
        ("relay.chain.2", "relay.chain.3"),
        ("relay.chain.3", "relay.chain.4"),
    ] {
        let engine = state.engine.clone();
        guards.push(
            state
                .engine
                .bus()
                .subscribe(
                    pattern,
                    pattern,
                    Arc::new(move |env| {
                        let engine = engine.clone();
                        let next = next.to_string();
                        let from = env.subject.clone();
                        Box::pin(async move {
                            engine
                                .publish(PublishRequest::derived(
                                    &env,
                                    next,
                                    from,
                                    serde_json::json!({}),
                                ))
                                .await?;
                            Ok(())
                        })
                    }),
                )
                .unwrap(),
        );
    }

    let (status, receipt) = request_json(
        &app,
        "POST",
        "/messages",
        Some(serde_json::json!({
            "subject": "relay.chain.1",
            "payload": {},
            "from": "relay.origin.o",
            "budget": {"max_hops": 2},
        })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(receipt["delivered_to"], 1);

    let (_, dead) = request_json(&app, "GET", "/dead-letters", None).await;
    let dead = dead.as_array().unwrap();
    assert_eq!(dead.len(), 1);
    assert_eq!(dead[0]["reason"], "hop_limit");
    assert_eq!(dead[0]["envelope"]["subject"], "relay.chain.3");
}

#[tokio::test]
async fn dead_letter_filter_by_endpoint_hash() {
    let app = build_app(test_state());

    request_json(
        &app,
        "POST",
        "/messages",
        Some(serde_json::json!({
            "subject": "relay.loop.a",
            "payload": {},
            "from": "relay.loop.a",
        })),
    )
    .await;

    let hash = relay_subject::subject_hash("relay.loop.a");
    let (_, hits) =
        request_json(&app, "GET", &format!("/dead-letters?endpoint_hash={hash}"), None).await;
    assert_eq!(hits.as_array().unwrap().len(), 1);

    let (_, misses) =
        request_json(&app, "GET", "/dead-letters?endpoint_hash=1", None).await;
    assert!(misses.as_array().unwrap().is_empty());
}

#[tokio::test]
async fn nine_token_subject_rejected() {
    let app = build_app(test_state());
    let (status, body) = request_json(
        &app,
        "POST",
        "/messages",
        Some(serde_json::json!({
            "subject": "a.b.c.d.e.f.g.h.i",
            "payload": {},
            "from": "relay.human.console",
        })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "INVALID_SUBJECT");
}

#[tokio::test]
async fn non_tail_wildcard_pattern_rejected() {
    let app = build_app(test_state());
    let (status, body) = request_json(
        &app,
        "POST",
        "/endpoints",
        Some(serde_json::json!({"subject": "a.>.b"})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "INVALID_SUBJECT");
}

#[tokio::test]
async fn duplicate_owner_conflict_is_409() {
    let state = test_state();
    let app = build_app(state.clone());

    // An adapter holds the subject; the edge may not take it over.
    state
        .store
        .endpoints()
        .register("relay.agent.claimed", Some("adapter:tg"))
        .unwrap();

    let (status, body) = request_json(
        &app,
        "POST",
        "/endpoints",
        Some(serde_json::json!({"subject": "relay.agent.claimed"})),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["code"], "DUPLICATE_ENDPOINT");
}
