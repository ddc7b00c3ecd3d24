//! Dispatcher loop — background delivery for fire-and-forget submissions.
//!
//! One cooperative task sweeps the result registry: batch the pending ids,
//! fetch them in sub-batches across the channel pool, and hand each
//! delivered payload or typed error to its registered handler. An idle
//! registry is polled on a short interval; a registry with nothing ready
//! backs off geometrically so an idle server is not stormed.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;

use gridlink_core::error::GridError;
use gridlink_core::rpc::{DeliveryOutcome, ResultId, SessionId};

use crate::channel::ChannelPool;
use crate::registry::ResultRegistry;

pub(crate) const IDLE_POLL: Duration = Duration::from_millis(100);
pub(crate) const MAX_BATCH: usize = 10_000;
pub(crate) const SUB_BATCH: usize = 100;
pub(crate) const BACKOFF_STEPS: [Duration; 5] = [
    Duration::from_secs(1),
    Duration::from_secs(5),
    Duration::from_secs(10),
    Duration::from_secs(20),
    Duration::from_secs(30),
];

/// Geometric back-off over the fixed schedule, capped at the last step.
pub(crate) struct Backoff {
    step: usize,
}

impl Backoff {
    pub(crate) fn new() -> Self {
        Self { step: 0 }
    }

    /// Delay to apply after a pass that delivered nothing; advances the
    /// schedule.
    pub(crate) fn next_delay(&mut self) -> Duration {
        let delay = BACKOFF_STEPS[self.step];
        self.step = (self.step + 1).min(BACKOFF_STEPS.len() - 1);
        delay
    }

    pub(crate) fn reset(&mut self) {
        self.step = 0;
    }
}

/// Handle to the background dispatcher task.
pub struct DispatcherLoop {
    cancel: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

impl DispatcherLoop {
    pub fn spawn(
        pool: Arc<ChannelPool>,
        session_id: SessionId,
        registry: Arc<ResultRegistry>,
        cancel: CancellationToken,
    ) -> Self {
        let handle = tokio::spawn(run(pool, session_id, registry, cancel.clone()));
        Self {
            cancel,
            handle: Some(handle),
        }
    }

    /// Stop after the current pass and join the task. Outstanding handlers
    /// are not invoked; the caller controls their lifetime.
    pub async fn shutdown(mut self) {
        self.cancel.cancel();
        if let Some(handle) = self.handle.take() {
            if let Err(error) = handle.await {
                tracing::warn!(error = %error, "dispatcher task join failed");
            }
        }
    }
}

impl Drop for DispatcherLoop {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn run(
    pool: Arc<ChannelPool>,
    session_id: SessionId,
    registry: Arc<ResultRegistry>,
    cancel: CancellationToken,
) {
    tracing::debug!(session_id, "dispatcher started");
    let mut backoff = Backoff::new();
    loop {
        if cancel.is_cancelled() {
            break;
        }
        if registry.is_empty() {
            if !sleep_unless_cancelled(IDLE_POLL, &cancel).await {
                break;
            }
            continue;
        }

        let delivered = sweep(&pool, &session_id, &registry, &cancel).await;
        if cancel.is_cancelled() {
            break;
        }
        if delivered == 0 {
            let delay = backoff.next_delay();
            tracing::debug!(
                delay_ms = delay.as_millis() as u64,
                pending = registry.len(),
                "no results ready, backing off"
            );
            if !sleep_unless_cancelled(delay, &cancel).await {
                break;
            }
        } else {
            backoff.reset();
        }
    }
    tracing::debug!(session_id, "dispatcher stopped");
}

/// Sleep, returning false if cancellation fired first.
async fn sleep_unless_cancelled(delay: Duration, cancel: &CancellationToken) -> bool {
    tokio::select! {
        _ = tokio::time::sleep(delay) => true,
        _ = cancel.cancelled() => false,
    }
}

/// One pass: batch the registry, fetch in parallel sub-batches, deliver.
/// Returns the number of handler invocations made.
async fn sweep(
    pool: &Arc<ChannelPool>,
    session_id: &SessionId,
    registry: &Arc<ResultRegistry>,
    cancel: &CancellationToken,
) -> usize {
    let ids = registry.snapshot(MAX_BATCH);
    let mut fetches: JoinSet<usize> = JoinSet::new();
    for sub_batch in ids.chunks(SUB_BATCH) {
        fetches.spawn(fetch_sub_batch(
            pool.clone(),
            session_id.clone(),
            registry.clone(),
            sub_batch.to_vec(),
            cancel.clone(),
        ));
    }

    let mut delivered = 0;
    while let Some(joined) = fetches.join_next().await {
        delivered += joined.unwrap_or_else(|error| {
            tracing::warn!(error = %error, "dispatcher sub-batch task failed");
            0
        });
    }
    delivered
}

/// Fetch one sub-batch and deliver its outcomes. A transport fault routes
/// to the first id's error handler and abandons the sub-batch for this
/// pass. Handlers are called inline and never awaited.
async fn fetch_sub_batch(
    pool: Arc<ChannelPool>,
    session_id: SessionId,
    registry: Arc<ResultRegistry>,
    ids: Vec<ResultId>,
    cancel: CancellationToken,
) -> usize {
    let reply = pool
        .with_channel(&cancel, |transport| {
            let session_id = session_id.clone();
            let ids = ids.clone();
            async move {
                transport
                    .try_get_results(&session_id, &ids)
                    .await
                    .map_err(GridError::from)
            }
        })
        .await;

    match reply {
        Ok(deliveries) => {
            let mut delivered = 0;
            for delivery in deliveries {
                let result_id = delivery.result_id;
                match delivery.outcome {
                    DeliveryOutcome::Ready(bytes) => {
                        if let Some(registration) = registry.take(&result_id) {
                            registration.handler.respond(bytes, registration.task_id);
                            delivered += 1;
                        }
                    }
                    DeliveryOutcome::Pending => {}
                    DeliveryOutcome::TaskError { details } => {
                        if let Some(registration) = registry.take(&result_id) {
                            registration.handler.fail(
                                GridError::ResultInError {
                                    result_id: result_id.clone(),
                                    details,
                                },
                                registration.task_id,
                            );
                            delivered += 1;
                        }
                    }
                    DeliveryOutcome::Aborted => {
                        if let Some(registration) = registry.take(&result_id) {
                            registration.handler.fail(
                                GridError::ResultAborted {
                                    result_id: result_id.clone(),
                                },
                                registration.task_id,
                            );
                            delivered += 1;
                        }
                    }
                }
            }
            delivered
        }
        Err(error) => {
            match ids.first().and_then(|first| registry.take(first)) {
                Some(registration) => {
                    registration.handler.fail(error, registration.task_id);
                }
                None => {
                    tracing::warn!(error = %error, "sub-batch fetch failed with no registered handler");
                }
            }
            0
        }
    }
}
