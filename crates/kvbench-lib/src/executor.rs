//! Streaming request execution
//!
//! [`RequestExecutor::execute`] issues one streaming chat-completion call and
//! turns whatever happens into exactly one [`RequestMetric`]. Transport and
//! protocol failures become data on the metric and are never returned to the
//! caller.

use crate::error::ExecutorError;
use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use kvbench_types::{PromptDescriptor, RequestMetric};
use reqwest_eventsource::{Event, EventSource};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, instrument, warn};

/// One incremental delta of a streamed completion
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StreamChunk {
    /// Text carried by the delta; `None` or empty for role/keep-alive deltas
    pub content: Option<String>,
}

impl StreamChunk {
    pub fn text<S: Into<String>>(content: S) -> Self {
        Self {
            content: Some(content.into()),
        }
    }

    pub fn has_content(&self) -> bool {
        self.content.as_deref().is_some_and(|c| !c.is_empty())
    }
}

pub type ChunkStream = BoxStream<'static, Result<StreamChunk, ExecutorError>>;

/// Generation parameters sent with every request
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionRequest {
    pub model: String,
    pub prompt: String,
    pub max_tokens: u32,
    pub temperature: f32,
}

/// Opens streaming completions against an endpoint.
///
/// The stream ends when the server signals completion.
#[async_trait]
pub trait StreamingClient: Send + Sync {
    async fn open_stream(
        &self,
        endpoint: &str,
        request: &CompletionRequest,
    ) -> Result<ChunkStream, ExecutorError>;
}

/// Identifies the round a request belongs to and where it is sent
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoundContext {
    pub scenario: String,
    pub round_number: u32,
    pub endpoint: String,
}

#[derive(Debug, Clone)]
pub struct ExecutorSettings {
    pub model: String,
    pub max_tokens: u32,
    pub temperature: f32,
    pub request_timeout: Duration,
}

impl ExecutorSettings {
    pub fn new<S: Into<String>>(model: S) -> Self {
        Self {
            model: model.into(),
            max_tokens: 100,
            temperature: 0.7,
            request_timeout: Duration::from_secs(300),
        }
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }
}

/// Instants observed while draining one stream
#[derive(Debug, Clone, Copy)]
struct StreamTiming {
    first_content: Option<Instant>,
    first_chunk: Option<Instant>,
    output_tokens: u64,
    end: Instant,
}

pub struct RequestExecutor<C> {
    client: Arc<C>,
    settings: ExecutorSettings,
}

impl<C> Clone for RequestExecutor<C> {
    fn clone(&self) -> Self {
        Self {
            client: Arc::clone(&self.client),
            settings: self.settings.clone(),
        }
    }
}

impl<C: StreamingClient> RequestExecutor<C> {
    pub fn new(client: Arc<C>, settings: ExecutorSettings) -> Self {
        Self { client, settings }
    }

    pub fn settings(&self) -> &ExecutorSettings {
        &self.settings
    }

    /// Executes one prompt and records its timing.
    #[instrument(skip_all, fields(scenario = %ctx.scenario, round = ctx.round_number, request_id = prompt.index))]
    pub async fn execute(&self, ctx: &RoundContext, prompt: &PromptDescriptor) -> RequestMetric {
        let observed_at = chrono::Utc::now();
        let start = Instant::now();

        let outcome =
            match tokio::time::timeout(self.settings.request_timeout, self.observe(ctx, prompt))
                .await
            {
                Ok(outcome) => outcome,
                Err(_) => Err(ExecutorError::Timeout {
                    seconds: self.settings.request_timeout.as_secs(),
                }),
            };

        let mut metric = RequestMetric {
            scenario: ctx.scenario.clone(),
            request_id: prompt.index,
            round_number: ctx.round_number,
            prompt_token_estimate: prompt.token_estimate,
            output_token_count: 0,
            time_to_first_token: None,
            time_per_output_token: None,
            end_to_end_latency: 0.0,
            succeeded: false,
            error_detail: None,
            observed_at,
        };

        match outcome {
            Ok(timing) => {
                // A stream with no content delta still has a first-token boundary
                let first = timing
                    .first_content
                    .or(timing.first_chunk)
                    .unwrap_or(timing.end);
                metric.output_token_count = timing.output_tokens;
                metric.time_to_first_token = Some(secs_between(start, first));
                metric.time_per_output_token = (timing.output_tokens > 0)
                    .then(|| secs_between(first, timing.end) / timing.output_tokens as f64);
                metric.end_to_end_latency = secs_between(start, timing.end);
                metric.succeeded = true;
                debug!(
                    ttft = metric.time_to_first_token,
                    output_tokens = metric.output_token_count,
                    latency = metric.end_to_end_latency,
                    "Request completed"
                );
            }
            Err(err) => {
                metric.end_to_end_latency = start.elapsed().as_secs_f64();
                metric.error_detail = Some(err.to_string());
                warn!(error = %err, latency = metric.end_to_end_latency, "Request failed");
            }
        }

        metric
    }

    async fn observe(
        &self,
        ctx: &RoundContext,
        prompt: &PromptDescriptor,
    ) -> Result<StreamTiming, ExecutorError> {
        let request = CompletionRequest {
            model: self.settings.model.clone(),
            prompt: prompt.text.clone(),
            max_tokens: self.settings.max_tokens,
            temperature: self.settings.temperature,
        };

        let mut stream = self.client.open_stream(&ctx.endpoint, &request).await?;
        let mut timing = StreamTiming {
            first_content: None,
            first_chunk: None,
            output_tokens: 0,
            end: Instant::now(),
        };

        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            let now = Instant::now();
            timing.first_chunk.get_or_insert(now);
            if chunk.has_content() {
                timing.first_content.get_or_insert(now);
                timing.output_tokens += 1;
            }
        }

        timing.end = Instant::now();
        Ok(timing)
    }
}

fn secs_between(earlier: Instant, later: Instant) -> f64 {
    later.saturating_duration_since(earlier).as_secs_f64()
}

/// OpenAI-compatible chat-completion client reading server-sent events
#[derive(Debug, Clone)]
pub struct OpenAiStreamClient {
    http: reqwest::Client,
    api_key: Option<String>,
}

impl OpenAiStreamClient {
    pub fn new(api_key: Option<String>) -> Result<Self, ExecutorError> {
        let http = reqwest::Client::builder()
            .pool_max_idle_per_host(64)
            .tcp_nodelay(true)
            .build()
            .map_err(|e| ExecutorError::Client(e.to_string()))?;
        Ok(Self { http, api_key })
    }
}

#[derive(Debug, Deserialize)]
struct ChatChunk {
    #[serde(default)]
    choices: Vec<ChunkChoice>,
}

#[derive(Debug, Deserialize)]
struct ChunkChoice {
    #[serde(default)]
    delta: ChunkDelta,
}

#[derive(Debug, Default, Deserialize)]
struct ChunkDelta {
    #[serde(default)]
    content: Option<String>,
}

/// Parses one `data:` payload of a chat-completion stream.
pub fn parse_chunk(data: &str) -> Result<StreamChunk, ExecutorError> {
    let chunk: ChatChunk =
        serde_json::from_str(data).map_err(|e| ExecutorError::Protocol(e.to_string()))?;
    Ok(StreamChunk {
        content: chunk
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.delta.content),
    })
}

fn map_event_error(err: reqwest_eventsource::Error) -> ExecutorError {
    match err {
        reqwest_eventsource::Error::InvalidStatusCode(status, _) => ExecutorError::Status {
            status: status.as_u16(),
        },
        reqwest_eventsource::Error::Transport(e) => ExecutorError::Request(e.to_string()),
        other => ExecutorError::Stream(other.to_string()),
    }
}

#[async_trait]
impl StreamingClient for OpenAiStreamClient {
    async fn open_stream(
        &self,
        endpoint: &str,
        request: &CompletionRequest,
    ) -> Result<ChunkStream, ExecutorError> {
        let url = format!("{}/chat/completions", endpoint.trim_end_matches('/'));
        let body = serde_json::json!({
            "model": request.model,
            "messages": [{ "role": "user", "content": request.prompt }],
            "max_tokens": request.max_tokens,
            "temperature": request.temperature,
            "stream": true,
        });

        let mut builder = self.http.post(url).json(&body);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }
        let source = EventSource::new(builder).map_err(|e| ExecutorError::Request(e.to_string()))?;

        let chunks = stream::unfold(Some(source), |state| async move {
            let mut source = state?;
            loop {
                match source.next().await {
                    Some(Ok(Event::Open)) => continue,
                    Some(Ok(Event::Message(message))) => {
                        if message.data.trim() == "[DONE]" {
                            source.close();
                            return None;
                        }
                        return Some((parse_chunk(&message.data), Some(source)));
                    }
                    Some(Err(reqwest_eventsource::Error::StreamEnded)) | None => {
                        source.close();
                        return None;
                    }
                    Some(Err(err)) => {
                        source.close();
                        return Some((Err(map_event_error(err)), None));
                    }
                }
            }
        });

        Ok(chunks.boxed())
    }
}
