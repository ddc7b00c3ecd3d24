//! Retry harness — a bounded attempt/back-off loop over a whitelist of
//! transient fault classes.
//!
//! The operation receives the 1-indexed attempt number. Non-final attempts
//! that fail with a whitelisted class sleep `base_delay` and run again; the
//! final attempt runs without a catch, so its error propagates unchanged.
//! Worst-case added latency is `(attempts - 1) × base_delay`.

use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use gridlink_core::error::{FaultClass, GridError, is_retriable};

/// Retry budget applied when the caller does not supply one.
pub const DEFAULT_MAX_RETRIES: u32 = 5;
/// Inter-attempt delay applied unless a specialized waiter overrides it.
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(2);

/// The classes retried around submission and wait RPCs.
pub const TRANSIENT_FAULTS: &[FaultClass] = &[FaultClass::Io, FaultClass::Transport];

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts, including the final uncaught one. 0 is treated as 1.
    pub attempts: u32,
    pub base_delay: Duration,
    /// Empty = every error is retriable.
    pub whitelist: Vec<FaultClass>,
    /// Whether a subclass of a whitelisted class also matches.
    pub derived_ok: bool,
}

impl RetryPolicy {
    /// The standard pipeline policy: transient transport faults and their
    /// subkinds, 2 s apart.
    pub fn transient(attempts: u32) -> Self {
        Self {
            attempts,
            base_delay: DEFAULT_RETRY_DELAY,
            whitelist: TRANSIENT_FAULTS.to_vec(),
            derived_ok: true,
        }
    }

    pub fn with_delay(mut self, base_delay: Duration) -> Self {
        self.base_delay = base_delay;
        self
    }

    /// Whether `error` would have been retried under this policy. Used by
    /// the submitter to distinguish an exhausted budget from a hard fault.
    pub fn covers(&self, error: &GridError) -> bool {
        is_retriable(error, &self.whitelist, self.derived_ok)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::transient(DEFAULT_MAX_RETRIES)
    }
}

/// Run `op` under `policy`. Cancellation interrupts the inter-attempt
/// sleeps and surfaces as `GridError::Cancelled`.
pub async fn retry<T, F, Fut>(
    policy: &RetryPolicy,
    cancel: &CancellationToken,
    mut op: F,
) -> Result<T, GridError>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, GridError>>,
{
    let attempts = policy.attempts.max(1);
    for attempt in 1..attempts {
        match op(attempt).await {
            Ok(value) => return Ok(value),
            Err(error) if policy.covers(&error) => {
                tracing::debug!(attempt, error = %error, "transient fault, retrying");
                tokio::select! {
                    _ = tokio::time::sleep(policy.base_delay) => {}
                    _ = cancel.cancelled() => return Err(GridError::Cancelled),
                }
            }
            Err(error) => return Err(error),
        }
    }
    op(attempts).await
}

/// Blocking variant for synchronous call sites.
pub fn retry_blocking<T, F>(policy: &RetryPolicy, mut op: F) -> Result<T, GridError>
where
    F: FnMut(u32) -> Result<T, GridError>,
{
    let attempts = policy.attempts.max(1);
    for attempt in 1..attempts {
        match op(attempt) {
            Ok(value) => return Ok(value),
            Err(error) if policy.covers(&error) => {
                tracing::debug!(attempt, error = %error, "transient fault, retrying");
                std::thread::sleep(policy.base_delay);
            }
            Err(error) => return Err(error),
        }
    }
    op(attempts)
}

/// Fire-and-forget variant: the operation runs on its own task and an
/// exhausted budget is logged, never raised.
pub fn retry_detached<F, Fut>(
    policy: RetryPolicy,
    cancel: CancellationToken,
    label: &'static str,
    mut op: F,
) where
    F: FnMut(u32) -> Fut + Send + 'static,
    Fut: Future<Output = Result<(), GridError>> + Send,
{
    tokio::spawn(async move {
        if let Err(error) = retry(&policy, &cancel, &mut op).await {
            tracing::warn!(operation = label, error = %error, "detached operation failed");
        }
    });
}
