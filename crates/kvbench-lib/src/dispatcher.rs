//! Bounded-concurrency round dispatch
//!
//! All in-flight calls are multiplexed on the current task. With a limit `c`
//! the prompts are split into contiguous batches of `c`, and each batch fully
//! drains before the next one is issued.

use crate::executor::{RequestExecutor, RoundContext, StreamingClient};
use futures::stream::{FuturesUnordered, StreamExt};
use kvbench_types::{PromptDescriptor, RequestMetric};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::{debug, info, instrument};

/// Shared flag raised by a user interrupt
#[derive(Debug, Clone, Default)]
pub struct InterruptFlag {
    raised: Arc<AtomicBool>,
    notify: Arc<Notify>,
}

impl InterruptFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn trigger(&self) {
        self.raised.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    pub fn is_triggered(&self) -> bool {
        self.raised.load(Ordering::SeqCst)
    }

    /// Resolves once the flag is raised.
    pub async fn triggered(&self) {
        // Registered before the check so a concurrent trigger is not missed
        let notified = self.notify.notified();
        if self.is_triggered() {
            return;
        }
        notified.await;
    }

    /// Sleeps for `duration` unless interrupted first. Returns `true` when the
    /// sleep was cut short.
    pub async fn sleep(&self, duration: Duration) -> bool {
        if self.is_triggered() {
            return true;
        }
        tokio::select! {
            _ = tokio::time::sleep(duration) => false,
            _ = self.triggered() => true,
        }
    }
}

/// Result of dispatching one round
#[derive(Debug, Clone)]
pub struct DispatchOutcome {
    /// One metric per issued prompt, in completion order within each batch
    pub metrics: Vec<RequestMetric>,
    /// Wall time from the first issue to the last completion
    pub elapsed: Duration,
    /// An interrupt stopped the round before every prompt was issued
    pub interrupted: bool,
}

#[derive(Debug, Clone)]
pub struct RoundDispatcher {
    concurrency: Option<usize>,
    interrupt: InterruptFlag,
}

impl RoundDispatcher {
    pub fn new(concurrency: Option<usize>, interrupt: InterruptFlag) -> Self {
        Self {
            concurrency,
            interrupt,
        }
    }

    pub fn concurrency(&self) -> Option<usize> {
        self.concurrency
    }

    pub fn interrupt(&self) -> &InterruptFlag {
        &self.interrupt
    }

    /// Issues every prompt once and collects one metric per prompt.
    ///
    /// Failed requests are not retried. If the interrupt flag is raised, no
    /// further batch is issued; requests already in flight run to completion.
    #[instrument(skip_all, fields(scenario = %ctx.scenario, round = ctx.round_number, prompts = prompts.len()))]
    pub async fn dispatch<C: StreamingClient>(
        &self,
        executor: &RequestExecutor<C>,
        ctx: &RoundContext,
        prompts: &[PromptDescriptor],
    ) -> DispatchOutcome {
        let batch_size = self
            .concurrency
            .unwrap_or(prompts.len())
            .clamp(1, prompts.len().max(1));

        let started = Instant::now();
        let mut metrics = Vec::with_capacity(prompts.len());
        let mut interrupted = false;

        for batch in prompts.chunks(batch_size) {
            if self.interrupt.is_triggered() {
                interrupted = true;
                info!(
                    issued = metrics.len(),
                    remaining = prompts.len() - metrics.len(),
                    "Interrupt received, not issuing further requests"
                );
                break;
            }

            let mut in_flight: FuturesUnordered<_> = batch
                .iter()
                .map(|prompt| executor.execute(ctx, prompt))
                .collect();
            while let Some(metric) = in_flight.next().await {
                metrics.push(metric);
            }

            if self.concurrency.is_some() {
                debug!(
                    completed = metrics.len(),
                    total = prompts.len(),
                    "Batch completed"
                );
            }
        }

        DispatchOutcome {
            metrics,
            elapsed: started.elapsed(),
            interrupted,
        }
    }
}
