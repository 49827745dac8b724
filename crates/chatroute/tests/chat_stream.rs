//! End-to-end streaming through a fake OpenAI-compatible upstream.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::body::Body;
use axum::http::{HeaderMap, Request, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use http_body_util::BodyExt;
use tokio::net::TcpListener;
use tower::ServiceExt;

use chatroute::llm::{Provider, ProviderRegistry};
use chatroute::model::AppContext;
use chatroute::server::{AppState, build_app};
use chatroute::stream::InMemoryStreamManager;

const UPSTREAM_BODY: &str = concat!(
    "data: {\"choices\":[{\"delta\":{\"content\":\"Hello\"}}]}\n\n",
    "data: {\"choices\":[{\"delta\":{\"content\":\", world\"}}]}\n\n",
    "data: {\"choices\":[],\"usage\":{\"prompt_tokens\":4,\"completion_tokens\":3,\"total_tokens\":7}}\n\n",
    "data: [DONE]\n\n",
);

async fn completions(headers: HeaderMap, body: String) -> Response {
    if headers.get(header::AUTHORIZATION).and_then(|v| v.to_str().ok()) != Some("Bearer sk-test") {
        return (StatusCode::UNAUTHORIZED, "bad key").into_response();
    }
    let request: serde_json::Value = serde_json::from_str(&body).unwrap();
    if request["model"] != "gpt-5-2025-08-07" || request["stream"] != true {
        return (StatusCode::BAD_REQUEST, "unexpected request").into_response();
    }
    ([(header::CONTENT_TYPE, "text/event-stream")], UPSTREAM_BODY).into_response()
}

async fn spawn_upstream() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = Router::new().route("/v1/chat/completions", post(completions));
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}/v1")
}

fn app(base_url: &str, api_key: &str) -> Router {
    let vars: HashMap<String, String> = [
        ("PROVIDER", "openai"),
        ("OPENAI_API_KEY", api_key),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect();

    let registry = ProviderRegistry::with_env(Arc::new(move |key: &str| vars.get(key).cloned()))
        .with_base_url(Provider::OpenAI, base_url);
    let streams = Arc::new(InMemoryStreamManager::new(
        Duration::from_secs(5),
        Duration::from_secs(15),
        Duration::from_secs(60),
    ));
    let state = AppState {
        context: AppContext::from_registry(registry),
        streams,
    };
    build_app(state, 30)
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, String) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    (status, String::from_utf8(bytes.to_vec()).unwrap())
}

fn start_request(id: &str) -> Request<Body> {
    Request::post(format!("/api/chat/{id}/stream"))
        .header("content-type", "application/json")
        .body(Body::from(
            r#"{"messages":[{"role":"user","content":"Say hello"}]}"#,
        ))
        .unwrap()
}

fn get_request(id: &str) -> Request<Body> {
    Request::get(format!("/api/chat/{id}/stream"))
        .body(Body::empty())
        .unwrap()
}

#[tokio::test]
async fn streams_upstream_tokens_and_replays_them() {
    let base_url = spawn_upstream().await;
    let app = app(&base_url, "sk-test");

    let (status, body) = send(&app, start_request("app-1")).await;
    assert_eq!(status, StatusCode::OK);

    let start = body.find("event: start").unwrap();
    let hello = body.find("{\"content\":\"Hello\"}").unwrap();
    let world = body.find("{\"content\":\", world\"}").unwrap();
    let done = body.find("event: done").unwrap();
    assert!(start < hello && hello < world && world < done);
    assert!(body.contains("\"total_tokens\":7"));

    // A reconnecting client sees the same events.
    let (status, replay) = send(&app, get_request("app-1")).await;
    assert_eq!(status, StatusCode::OK);
    assert!(replay.contains("{\"content\":\"Hello\"}"));
    assert!(replay.contains("event: done"));

    let delete = Request::delete("/api/chat/app-1/stream")
        .body(Body::empty())
        .unwrap();
    let (status, _) = send(&app, delete).await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, body) = send(&app, get_request("app-1")).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.is_empty());
}

#[tokio::test]
async fn upstream_rejection_is_bad_gateway() {
    let base_url = spawn_upstream().await;
    let app = app(&base_url, "sk-wrong");

    let (status, body) = send(&app, start_request("app-2")).await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert!(body.contains("401"));

    let (status, body) = send(&app, get_request("app-2")).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.is_empty());
}
