//! End-to-end exercises of the full request pipeline (middleware chain +
//! handler) against real `Request`/`Response` values via
//! `tower::ServiceExt::oneshot`.

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use chrono::Utc;
use tower::ServiceExt;

use mockforge_core::{
    HttpMatcher, HttpResponse, HttpSpec, Mock, MockSpec, MockStore, RequestLogger, StatefulStore,
};
use mockforge_http::{
    build_app, HttpHandler, MockManager, NoopChaosInjector, ProtocolFactories, ProtocolManager,
};

fn http_mock(id: &str, priority: i32, matcher: HttpMatcher, body: &str) -> Mock {
    let now = Utc::now();
    Mock {
        id: id.to_string(),
        name: Some(id.to_string()),
        enabled: Some(true),
        created_at: now,
        updated_at: now,
        workspace_id: None,
        spec: MockSpec::Http(HttpSpec {
            priority,
            matcher,
            response: HttpResponse {
                status_code: 200,
                headers: Default::default(),
                body: Some(body.to_string()),
                body_file: None,
                delay_ms: None,
                seed: None,
                sse: None,
                chunked: None,
                validation: None,
                stateful_operation: None,
            },
        }),
    }
}

async fn harness() -> (Arc<MockManager>, axum::Router) {
    let store = mockforge_http::StoreHandle::from(MockStore::new());
    let logger = RequestLogger::new(100);
    let stateful = StatefulStore::new();
    let handler = Arc::new(HttpHandler::new(store.clone(), logger.clone(), stateful, "."));
    let protocols = Arc::new(ProtocolManager::new(ProtocolFactories::default()));
    let manager = Arc::new(MockManager::new(store, handler.clone(), protocols));
    let metrics = Arc::new(mockforge_http::Metrics::new());
    let chaos: Arc<dyn mockforge_http::ChaosInjector> = Arc::new(NoopChaosInjector::default());
    let app = build_app(handler, metrics, chaos);
    (manager, app)
}

#[tokio::test]
async fn exact_path_wins_over_regex_and_named_segments() {
    let (manager, app) = harness().await;

    manager
        .add(http_mock(
            "named",
            0,
            HttpMatcher { path: Some("/api/users/{id}".into()), ..Default::default() },
            "named",
        ))
        .await
        .unwrap();
    manager
        .add(http_mock(
            "regex",
            0,
            HttpMatcher { path_pattern: Some(r"^/api/users/\d+$".into()), ..Default::default() },
            "regex",
        ))
        .await
        .unwrap();
    manager
        .add(http_mock(
            "exact",
            0,
            HttpMatcher { path: Some("/api/users/123".into()), ..Default::default() },
            "exact",
        ))
        .await
        .unwrap();

    let req = Request::builder().method("GET").uri("/api/users/123").body(Body::empty()).unwrap();
    let resp = app.oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let body = axum::body::to_bytes(resp.into_body(), 1024).await.unwrap();
    assert_eq!(&body[..], b"exact");
}

#[tokio::test]
async fn head_request_falls_back_to_a_get_only_mock() {
    let (manager, app) = harness().await;
    manager
        .add(http_mock(
            "ping",
            0,
            HttpMatcher { method: Some("GET".into()), path: Some("/ping".into()), ..Default::default() },
            "pong",
        ))
        .await
        .unwrap();

    let req = Request::builder().method("HEAD").uri("/ping").body(Body::empty()).unwrap();
    let resp = app.oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
}

#[tokio::test]
async fn no_match_returns_404_with_near_miss_header() {
    let (manager, app) = harness().await;
    manager
        .add(http_mock(
            "close",
            0,
            HttpMatcher {
                method: Some("POST".into()),
                path: Some("/widgets".into()),
                ..Default::default()
            },
            "created",
        ))
        .await
        .unwrap();

    let req = Request::builder().method("GET").uri("/widgets").body(Body::empty()).unwrap();
    let resp = app.oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    assert!(resp.headers().contains_key("X-Mockd-Near-Misses"));
}

#[tokio::test]
async fn earlier_created_at_wins_a_priority_and_matcher_tie() {
    let (manager, app) = harness().await;
    let matcher = HttpMatcher { path: Some("/tied".into()), ..Default::default() };

    manager.add(http_mock("earlier", 0, matcher.clone(), "earlier")).await.unwrap();
    manager.add(http_mock("later", 0, matcher, "later")).await.unwrap();

    let req = Request::builder().method("GET").uri("/tied").body(Body::empty()).unwrap();
    let resp = app.oneshot(req).await.unwrap();
    let body = axum::body::to_bytes(resp.into_body(), 1024).await.unwrap();
    assert_eq!(&body[..], b"earlier");
}
