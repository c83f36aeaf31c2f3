#![allow(dead_code)]

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use kvbench_lib::error::ExecutorError;
use kvbench_lib::executor::{
    ChunkStream, CompletionRequest, ExecutorSettings, RequestExecutor, StreamChunk,
    StreamingClient,
};
use kvbench_types::PromptDescriptor;
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// How the fake endpoint answers one call
#[derive(Debug, Clone)]
pub enum Plan {
    /// Stream `tokens` content deltas, the first after `ttft`
    Stream {
        ttft: Duration,
        tokens: usize,
        inter_token: Duration,
    },
    /// Fail before any chunk arrives
    FailOnOpen(String),
    /// Emit `after_tokens` deltas, then fail
    FailMidStream {
        ttft: Duration,
        after_tokens: usize,
        message: String,
    },
    /// Never produce anything
    Hang,
}

impl Plan {
    pub fn stream(ttft_ms: u64, tokens: usize, inter_token_ms: u64) -> Self {
        Plan::Stream {
            ttft: Duration::from_millis(ttft_ms),
            tokens,
            inter_token: Duration::from_millis(inter_token_ms),
        }
    }
}

/// What the fake endpoint knows about a call
pub struct CallInfo<'a> {
    pub prompt: &'a str,
    pub endpoint: &'a str,
    /// The same prompt was already served once, i.e. a cache hit
    pub seen_before: bool,
}

type Planner = Box<dyn Fn(&CallInfo<'_>) -> Plan + Send + Sync>;

/// Scripted streaming client that tracks concurrency and remembers prompts
pub struct FakeClient {
    planner: Planner,
    in_flight: Arc<AtomicUsize>,
    max_in_flight: Arc<AtomicUsize>,
    calls: AtomicUsize,
    seen: Mutex<HashSet<String>>,
    endpoints: Mutex<Vec<String>>,
}

impl FakeClient {
    pub fn new<F>(planner: F) -> Self
    where
        F: Fn(&CallInfo<'_>) -> Plan + Send + Sync + 'static,
    {
        Self {
            planner: Box::new(planner),
            in_flight: Arc::new(AtomicUsize::new(0)),
            max_in_flight: Arc::new(AtomicUsize::new(0)),
            calls: AtomicUsize::new(0),
            seen: Mutex::new(HashSet::new()),
            endpoints: Mutex::new(Vec::new()),
        }
    }

    /// Cold prompts answer after `cold_ms`, repeated prompts after `warm_ms`.
    pub fn caching(cold_ms: u64, warm_ms: u64, tokens: usize, inter_token_ms: u64) -> Self {
        Self::new(move |call| {
            let ttft = if call.seen_before { warm_ms } else { cold_ms };
            Plan::stream(ttft, tokens, inter_token_ms)
        })
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn endpoints(&self) -> Vec<String> {
        self.endpoints.lock().unwrap().clone()
    }
}

/// Decrements the in-flight counter when the stream is dropped
struct InFlightGuard(Arc<AtomicUsize>);

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

struct FakeStream {
    plan: Plan,
    emitted: usize,
    _guard: InFlightGuard,
}

#[async_trait]
impl StreamingClient for FakeClient {
    async fn open_stream(
        &self,
        endpoint: &str,
        request: &CompletionRequest,
    ) -> Result<ChunkStream, ExecutorError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.endpoints.lock().unwrap().push(endpoint.to_string());
        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(current, Ordering::SeqCst);
        let guard = InFlightGuard(Arc::clone(&self.in_flight));

        let seen_before = !self.seen.lock().unwrap().insert(request.prompt.clone());
        let plan = (self.planner)(&CallInfo {
            prompt: &request.prompt,
            endpoint,
            seen_before,
        });

        if let Plan::FailOnOpen(message) = &plan {
            return Err(ExecutorError::Request(message.clone()));
        }

        let state = FakeStream {
            plan,
            emitted: 0,
            _guard: guard,
        };
        let chunks = stream::unfold(state, |mut state| async move {
            match state.plan.clone() {
                Plan::Stream {
                    ttft,
                    tokens,
                    inter_token,
                } => {
                    if state.emitted >= tokens {
                        return None;
                    }
                    let delay = if state.emitted == 0 { ttft } else { inter_token };
                    tokio::time::sleep(delay).await;
                    state.emitted += 1;
                    Some((Ok(StreamChunk::text("tok ")), state))
                }
                Plan::FailMidStream {
                    ttft,
                    after_tokens,
                    message,
                } => {
                    if state.emitted == usize::MAX {
                        return None;
                    }
                    if state.emitted >= after_tokens {
                        state.emitted = usize::MAX;
                        return Some((Err(ExecutorError::Stream(message)), state));
                    }
                    if state.emitted == 0 {
                        tokio::time::sleep(ttft).await;
                    }
                    state.emitted += 1;
                    Some((Ok(StreamChunk::text("tok ")), state))
                }
                Plan::Hang => {
                    tokio::time::sleep(Duration::from_secs(24 * 60 * 60)).await;
                    None
                }
                Plan::FailOnOpen(_) => None,
            }
        });

        Ok(chunks.boxed())
    }
}

pub fn executor(client: Arc<FakeClient>) -> RequestExecutor<FakeClient> {
    RequestExecutor::new(client, ExecutorSettings::new("test-model"))
}

/// Prompts whose text is `p{index}`
pub fn prompts(count: usize) -> Vec<PromptDescriptor> {
    (0..count)
        .map(|index| PromptDescriptor {
            index,
            text: format!("p{index}"),
            token_estimate: 100,
        })
        .collect()
}
