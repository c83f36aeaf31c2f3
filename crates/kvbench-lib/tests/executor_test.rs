#[path = "common/mod.rs"]
mod common;

use anyhow::Result;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::sse::{Event, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use common::{FakeClient, Plan};
use futures::stream;
use kvbench_lib::executor::{
    ExecutorSettings, OpenAiStreamClient, RequestExecutor, RoundContext,
};
use kvbench_types::PromptDescriptor;
use serde_json::Value;
use std::convert::Infallible;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// What the local endpoint replies and what it has received
#[derive(Default)]
struct ServerState {
    status: Option<StatusCode>,
    events: Vec<String>,
    bodies: Mutex<Vec<Value>>,
    auth_headers: Mutex<Vec<Option<String>>>,
}

async fn chat_completions(
    State(state): State<Arc<ServerState>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    state.bodies.lock().unwrap().push(body);
    state.auth_headers.lock().unwrap().push(
        headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string),
    );

    if let Some(status) = state.status {
        return (status, "overloaded").into_response();
    }

    let events: Vec<Result<Event, Infallible>> = state
        .events
        .iter()
        .map(|data| Ok(Event::default().data(data.clone())))
        .collect();
    Sse::new(stream::iter(events)).into_response()
}

/// Serves `/v1/chat/completions` on an ephemeral port and returns the base URL.
async fn spawn_server(state: Arc<ServerState>) -> std::io::Result<String> {
    let app = Router::new()
        .route("/v1/chat/completions", post(chat_completions))
        .with_state(state);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    Ok(format!("http://{addr}/v1"))
}

fn content_event(text: &str) -> String {
    serde_json::json!({
        "id": "chatcmpl-1",
        "object": "chat.completion.chunk",
        "choices": [{ "index": 0, "delta": { "content": text } }]
    })
    .to_string()
}

fn sse_script(tokens: &[&str]) -> Vec<String> {
    let mut events =
        vec![r#"{"choices":[{"index":0,"delta":{"role":"assistant"}}]}"#.to_string()];
    events.extend(tokens.iter().map(|t| content_event(t)));
    events.push(content_event(""));
    events.push("[DONE]".to_string());
    events
}

fn prompt() -> PromptDescriptor {
    PromptDescriptor {
        index: 4,
        text: "Explain pipeline parallelism.".to_string(),
        token_estimate: 512,
    }
}

fn ctx(endpoint: &str) -> RoundContext {
    RoundContext {
        scenario: "executor".to_string(),
        round_number: 2,
        endpoint: endpoint.to_string(),
    }
}

fn http_executor(api_key: Option<&str>) -> RequestExecutor<OpenAiStreamClient> {
    let client = OpenAiStreamClient::new(api_key.map(str::to_string)).unwrap();
    RequestExecutor::new(
        Arc::new(client),
        ExecutorSettings::new("qwen2.5-7b")
            .with_max_tokens(64)
            .with_temperature(0.0)
            .with_request_timeout(Duration::from_secs(10)),
    )
}

#[tokio::test]
async fn test_streams_tokens_from_sse_endpoint() -> Result<()> {
    let _ = tracing_subscriber::fmt::try_init();
    let state = Arc::new(ServerState {
        events: sse_script(&["Pipeline", " parallelism", " splits", " layers"]),
        ..Default::default()
    });
    let base_url = spawn_server(Arc::clone(&state)).await?;

    let metric = http_executor(Some("sk-test"))
        .execute(&ctx(&base_url), &prompt())
        .await;

    assert!(metric.succeeded, "{:?}", metric.error_detail);
    assert_eq!(metric.error_detail, None);
    assert_eq!(metric.scenario, "executor");
    assert_eq!(metric.request_id, 4);
    assert_eq!(metric.round_number, 2);
    assert_eq!(metric.prompt_token_estimate, 512);
    // Role and empty deltas are not output tokens
    assert_eq!(metric.output_token_count, 4);
    let ttft = metric.time_to_first_token.unwrap();
    assert!(ttft <= metric.end_to_end_latency);
    assert!(metric.time_per_output_token.is_some());

    let body = state.bodies.lock().unwrap()[0].clone();
    assert_eq!(body["model"], "qwen2.5-7b");
    assert_eq!(body["stream"], true);
    assert_eq!(body["max_tokens"], 64);
    assert_eq!(body["messages"][0]["role"], "user");
    assert_eq!(body["messages"][0]["content"], "Explain pipeline parallelism.");
    assert_eq!(
        state.auth_headers.lock().unwrap()[0].as_deref(),
        Some("Bearer sk-test")
    );
    Ok(())
}

#[tokio::test]
async fn test_single_token_tpot_spans_to_stream_end() -> Result<()> {
    let state = Arc::new(ServerState {
        events: sse_script(&["Yes"]),
        ..Default::default()
    });
    let base_url = spawn_server(state).await?;

    let metric = http_executor(None).execute(&ctx(&base_url), &prompt()).await;

    assert!(metric.succeeded);
    assert_eq!(metric.output_token_count, 1);
    let ttft = metric.time_to_first_token.unwrap();
    let tpot = metric.time_per_output_token.unwrap();
    assert!(tpot >= 0.0 && ttft + tpot <= metric.end_to_end_latency + 1e-9);
    Ok(())
}

#[tokio::test]
async fn test_http_error_status_becomes_failed_metric() -> Result<()> {
    let state = Arc::new(ServerState {
        status: Some(StatusCode::SERVICE_UNAVAILABLE),
        ..Default::default()
    });
    let base_url = spawn_server(state).await?;

    let metric = http_executor(None).execute(&ctx(&base_url), &prompt()).await;

    assert!(!metric.succeeded);
    assert_eq!(metric.output_token_count, 0);
    assert_eq!(metric.time_to_first_token, None);
    assert_eq!(metric.time_per_output_token, None);
    assert!(metric.error_detail.unwrap().contains("503"));
    assert!(metric.end_to_end_latency >= 0.0);
    Ok(())
}

#[tokio::test]
async fn test_malformed_chunk_becomes_failed_metric() -> Result<()> {
    let state = Arc::new(ServerState {
        events: vec![content_event("ok"), "{not json".to_string()],
        ..Default::default()
    });
    let base_url = spawn_server(state).await?;

    let metric = http_executor(None).execute(&ctx(&base_url), &prompt()).await;

    assert!(!metric.succeeded);
    assert_eq!(metric.output_token_count, 0);
    assert!(metric
        .error_detail
        .unwrap()
        .starts_with("Malformed stream chunk"));
    Ok(())
}

#[tokio::test]
async fn test_unreachable_endpoint_becomes_failed_metric() -> Result<()> {
    // Bind and release a port so nothing is listening on it
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    drop(listener);

    let metric = http_executor(None)
        .execute(&ctx(&format!("http://{addr}/v1")), &prompt())
        .await;

    assert!(!metric.succeeded);
    assert!(metric.error_detail.is_some());
    assert_eq!(metric.time_to_first_token, None);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_timeout_records_elapsed_time() {
    let client = Arc::new(FakeClient::new(|_| Plan::Hang));
    let executor = RequestExecutor::new(
        client,
        ExecutorSettings::new("test-model").with_request_timeout(Duration::from_secs(30)),
    );

    let metric = executor.execute(&ctx("http://fake/v1"), &prompt()).await;

    assert!(!metric.succeeded);
    assert_eq!(
        metric.error_detail.as_deref(),
        Some("Request timed out after 30s")
    );
    assert!(metric.end_to_end_latency >= 30.0 && metric.end_to_end_latency < 30.1);
}

#[tokio::test(start_paused = true)]
async fn test_ttft_and_tpot_from_stream_timing() {
    let client = Arc::new(FakeClient::new(|_| Plan::stream(800, 5, 25)));
    let executor = common::executor(client);

    let metric = executor.execute(&ctx("http://fake/v1"), &prompt()).await;

    assert!(metric.succeeded);
    assert_eq!(metric.output_token_count, 5);
    let ttft = metric.time_to_first_token.unwrap();
    assert!((ttft - 0.8).abs() < 0.005, "ttft {ttft}");
    // Four inter-token gaps of 25ms spread over five tokens
    let tpot = metric.time_per_output_token.unwrap();
    assert!((tpot - 0.02).abs() < 0.002, "tpot {tpot}");
    assert!((metric.end_to_end_latency - 0.9).abs() < 0.005);
}

#[tokio::test(start_paused = true)]
async fn test_mid_stream_failure_discards_partial_output() {
    let client = Arc::new(FakeClient::new(|_| Plan::FailMidStream {
        ttft: Duration::from_millis(200),
        after_tokens: 3,
        message: "connection reset by peer".to_string(),
    }));
    let executor = common::executor(client);

    let metric = executor.execute(&ctx("http://fake/v1"), &prompt()).await;

    assert!(!metric.succeeded);
    assert_eq!(metric.output_token_count, 0);
    assert_eq!(metric.time_to_first_token, None);
    assert_eq!(
        metric.error_detail.as_deref(),
        Some("Stream error: connection reset by peer")
    );
    assert!(metric.end_to_end_latency >= 0.2);
}
