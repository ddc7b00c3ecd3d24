//! Result registry — maps pending result ids to their invocation handlers.
//!
//! Fire-and-forget submissions register a handler per expected result; the
//! dispatcher loop sweeps this map and delivers. Removal and delivery are
//! fused through `take`, which is what makes delivery at-most-once.

use std::sync::Arc;

use bytes::Bytes;
use dashmap::DashMap;

use gridlink_core::error::GridError;
use gridlink_core::rpc::{ResultId, TaskId};

/// Caller-supplied response/error callback pair. Both must be non-blocking;
/// the dispatcher never awaits them.
#[derive(Clone)]
pub struct InvocationHandler {
    on_response: Arc<dyn Fn(Bytes, TaskId) + Send + Sync>,
    on_error: Arc<dyn Fn(GridError, TaskId) + Send + Sync>,
}

impl InvocationHandler {
    pub fn new(
        on_response: impl Fn(Bytes, TaskId) + Send + Sync + 'static,
        on_error: impl Fn(GridError, TaskId) + Send + Sync + 'static,
    ) -> Self {
        Self {
            on_response: Arc::new(on_response),
            on_error: Arc::new(on_error),
        }
    }

    pub fn respond(&self, payload: Bytes, task_id: TaskId) {
        (self.on_response)(payload, task_id);
    }

    pub fn fail(&self, error: GridError, task_id: TaskId) {
        (self.on_error)(error, task_id);
    }
}

/// One registered expectation: the producing task and the handler to call.
#[derive(Clone)]
pub struct Registration {
    pub task_id: TaskId,
    pub handler: InvocationHandler,
}

/// Concurrent `result_id → registration` map. Insertion is single-writer
/// per id by uniqueness of result ids; `take` removes, so each entry can
/// be delivered at most once.
#[derive(Default)]
pub struct ResultRegistry {
    entries: DashMap<ResultId, Registration>,
}

impl ResultRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, result_id: ResultId, task_id: TaskId, handler: InvocationHandler) {
        self.entries
            .insert(result_id, Registration { task_id, handler });
    }

    /// Remove and return the registration for `result_id`.
    pub fn take(&self, result_id: &str) -> Option<Registration> {
        self.entries.remove(result_id).map(|(_, reg)| reg)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Up to `max` pending ids, for one dispatcher pass.
    pub fn snapshot(&self, max: usize) -> Vec<ResultId> {
        self.entries
            .iter()
            .take(max)
            .map(|entry| entry.key().clone())
            .collect()
    }

    /// Drop every entry without invoking anything. Returns how many were
    /// orphaned. Called on client shutdown.
    pub fn clear(&self) -> usize {
        let orphaned = self.entries.len();
        self.entries.clear();
        orphaned
    }
}
