#![allow(dead_code)]

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use kvbench_lib::error::ExecutorError;
use kvbench_lib::executor::{ChunkStream, CompletionRequest, StreamChunk, StreamingClient};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// Streams a fixed number of tokens, or refuses every connection
pub struct ScriptedClient {
    ttft: Duration,
    tokens: usize,
    refuse: bool,
    calls: AtomicUsize,
}

impl ScriptedClient {
    pub fn streaming(ttft_ms: u64, tokens: usize) -> Self {
        Self {
            ttft: Duration::from_millis(ttft_ms),
            tokens,
            refuse: false,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn refusing() -> Self {
        Self {
            refuse: true,
            ..Self::streaming(0, 0)
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl StreamingClient for ScriptedClient {
    async fn open_stream(
        &self,
        _endpoint: &str,
        _request: &CompletionRequest,
    ) -> Result<ChunkStream, ExecutorError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.refuse {
            return Err(ExecutorError::Request("connection refused".to_string()));
        }

        let (ttft, tokens) = (self.ttft, self.tokens);
        let chunks = stream::unfold(0usize, move |emitted| async move {
            if emitted >= tokens {
                return None;
            }
            let delay = if emitted == 0 {
                ttft
            } else {
                Duration::from_millis(10)
            };
            tokio::time::sleep(delay).await;
            Some((Ok(StreamChunk::text("tok ")), emitted + 1))
        });
        Ok(chunks.boxed())
    }
}
