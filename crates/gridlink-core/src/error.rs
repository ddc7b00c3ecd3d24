//! Error taxonomy for the SDK core.
//!
//! `TransportError` is what the transport binding raises; `GridError` is
//! what the SDK surfaces. The retry harness classifies errors through
//! `FaultClass`, a small hierarchy: concrete transport faults derive from
//! the `Transport` class so a whitelist entry of `Transport` with the
//! derived flag set covers every transport subkind.

use crate::rpc::{ResultId, SessionId, SessionStatus, TaskId};

// ── Transport faults ──────────────────────────────────────────────────────────

/// Concrete fault reported by the transport binding, mapped from the
/// underlying RPC status code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    /// Server or network momentarily unreachable.
    Unavailable,
    /// Deadline exceeded on the wire.
    Timeout,
    /// Connection dropped mid-call.
    ConnectionReset,
    /// Socket-level I/O failure.
    Io,
    /// The named resource does not exist on the server.
    NotFound,
    /// The call was cancelled.
    Cancelled,
    /// The call was aborted server-side.
    Aborted,
    /// Credentials rejected.
    Unauthenticated,
    /// Request rejected as malformed — client/server schema mismatch.
    InvalidArgument,
    /// Server-internal failure.
    Internal,
}

/// A fault raised at the transport seam.
#[derive(Debug, Clone, thiserror::Error)]
#[error("transport fault ({kind:?}): {message}")]
pub struct TransportError {
    pub kind: TransportKind,
    pub message: String,
}

impl TransportError {
    pub fn new(kind: TransportKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Faults a retry is allowed to paper over. Everything else is a hard
    /// failure: authentication, not-found on a resource the caller just
    /// created, schema mismatch.
    pub fn is_transient(&self) -> bool {
        matches!(
            self.kind,
            TransportKind::Unavailable
                | TransportKind::Timeout
                | TransportKind::ConnectionReset
                | TransportKind::Io
        )
    }

    pub fn class(&self) -> FaultClass {
        match self.kind {
            TransportKind::Io => FaultClass::Io,
            TransportKind::Unavailable => FaultClass::TransportUnavailable,
            TransportKind::Timeout => FaultClass::TransportTimeout,
            TransportKind::NotFound => FaultClass::TransportNotFound,
            TransportKind::Cancelled => FaultClass::TransportCancelled,
            TransportKind::Aborted => FaultClass::TransportAborted,
            TransportKind::ConnectionReset
            | TransportKind::Unauthenticated
            | TransportKind::InvalidArgument
            | TransportKind::Internal => FaultClass::Transport,
        }
    }
}

// ── Fault classes ─────────────────────────────────────────────────────────────

/// Coarse classification used by retry whitelists. Concrete transport
/// faults are subclasses of `Transport`; `parent` walks one level up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultClass {
    Io,
    Transport,
    TransportUnavailable,
    TransportTimeout,
    TransportNotFound,
    TransportCancelled,
    TransportAborted,
    Result,
    Session,
    Submission,
    Worker,
    Cancelled,
}

impl FaultClass {
    pub fn parent(self) -> Option<FaultClass> {
        match self {
            FaultClass::TransportUnavailable
            | FaultClass::TransportTimeout
            | FaultClass::TransportNotFound
            | FaultClass::TransportCancelled
            | FaultClass::TransportAborted => Some(FaultClass::Transport),
            _ => None,
        }
    }

    /// Whether `self` equals `ancestor` or derives from it.
    pub fn is_derived_from(self, ancestor: FaultClass) -> bool {
        let mut current = Some(self);
        while let Some(class) = current {
            if class == ancestor {
                return true;
            }
            current = class.parent();
        }
        false
    }
}

// ── SDK errors ────────────────────────────────────────────────────────────────

/// Why a worker-side method dispatch failed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MethodDispatchReason {
    #[error("no method registered under this name")]
    UnknownMethod,
    #[error("method declared {declared} arguments, {supplied} supplied")]
    ArityMismatch { declared: usize, supplied: usize },
}

/// Aggregated failure of a batch operation. Lists every failing id and
/// names the first error encountered as the primary cause.
#[derive(Debug, thiserror::Error)]
#[error(
    "batch failed: {} result(s), {} task(s) in error; primary: {primary}",
    .failed_result_ids.len(),
    .failed_task_ids.len()
)]
pub struct BatchError {
    pub failed_result_ids: Vec<ResultId>,
    pub failed_task_ids: Vec<TaskId>,
    #[source]
    pub primary: Box<GridError>,
}

/// The SDK error surface.
#[derive(Debug, thiserror::Error)]
pub enum GridError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("no result id recorded for dependency task {task_id}")]
    DependencyUnknown { task_id: TaskId },

    #[error("result {result_id} is in error: {}", .details.join("; "))]
    ResultInError {
        result_id: ResultId,
        details: Vec<String>,
    },

    #[error("result {result_id} was aborted")]
    ResultAborted { result_id: ResultId },

    #[error("result stream for {result_id} closed without a completion marker")]
    ResultIncomplete { result_id: ResultId },

    #[error("result {result_id} is not ready")]
    ResultNotReady { result_id: ResultId },

    #[error("session {session_id} is {status:?}, not running")]
    SessionNotOpenable {
        session_id: SessionId,
        status: SessionStatus,
    },

    #[error("submission stage `{stage}` exhausted {attempts} attempt(s)")]
    SubmissionExhausted {
        stage: &'static str,
        attempts: u32,
        #[source]
        source: Box<GridError>,
    },

    #[error("method dispatch failed for `{method}`: {reason}")]
    MethodDispatch {
        method: String,
        #[source]
        reason: MethodDispatchReason,
    },

    #[error(transparent)]
    Batch(#[from] BatchError),

    #[error("operation cancelled")]
    Cancelled,
}

impl GridError {
    /// Concrete fault class of this error.
    pub fn class(&self) -> FaultClass {
        match self {
            GridError::Transport(t) => t.class(),
            GridError::ResultInError { .. }
            | GridError::ResultAborted { .. }
            | GridError::ResultIncomplete { .. }
            | GridError::ResultNotReady { .. } => FaultClass::Result,
            GridError::SessionNotOpenable { .. } => FaultClass::Session,
            GridError::DependencyUnknown { .. } | GridError::SubmissionExhausted { .. } => {
                FaultClass::Submission
            }
            GridError::MethodDispatch { .. } => FaultClass::Worker,
            // An aggregate is classified by its primary cause.
            GridError::Batch(batch) => batch.primary.class(),
            GridError::Cancelled => FaultClass::Cancelled,
        }
    }
}

/// Retry-harness classification.
///
/// An error is retriable iff the whitelist is empty (everything retried),
/// its concrete class is whitelisted, the derived flag is set and an
/// ancestor class is whitelisted, or it is an aggregate whose primary
/// inner error matches under the same rules.
pub fn is_retriable(error: &GridError, whitelist: &[FaultClass], derived_ok: bool) -> bool {
    if whitelist.is_empty() {
        return true;
    }
    let class = error.class();
    if whitelist.contains(&class) {
        return true;
    }
    if derived_ok {
        let mut current = class.parent();
        while let Some(ancestor) = current {
            if whitelist.contains(&ancestor) {
                return true;
            }
            current = ancestor.parent();
        }
    }
    false
}
