//! Control-plane wire types — requests, replies, and statuses for every
//! operation the SDK issues.
//!
//! These types ARE the contract between the SDK core and the transport
//! binding. The generated protobuf layer converts to and from them at the
//! `RpcTransport` seam; nothing above that seam sees a generated type.
//! Identifiers are server-assigned opaque strings and must be treated as
//! such — no structure may be assumed beyond equality.

use bytes::Bytes;

use crate::options::TaskOptions;

/// Opaque server-assigned identifier for a session.
pub type SessionId = String;
/// Opaque server-assigned identifier for a task.
pub type TaskId = String;
/// Opaque server-assigned identifier for a result slot.
pub type ResultId = String;

// ── Sessions ──────────────────────────────────────────────────────────────────

/// Lifecycle state of a session. The client operates only on `Running`
/// sessions; `Cancelled` and `Purged` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    Running,
    Cancelled,
    Purged,
}

/// Session record as reported by `get_session`.
#[derive(Debug, Clone)]
pub struct SessionInfo {
    pub session_id: SessionId,
    pub status: SessionStatus,
    pub default_options: TaskOptions,
    pub partitions: Vec<String>,
}

/// Request body for `create_session`.
#[derive(Debug, Clone)]
pub struct CreateSessionRequest {
    pub default_options: TaskOptions,
    /// Partitions the session's tasks may schedule into. Empty = the
    /// server-default partition.
    pub partitions: Vec<String>,
}

/// Server-advertised limits, fetched once per client.
#[derive(Debug, Clone, Copy)]
pub struct ServiceConfiguration {
    /// Maximum payload size carried inline in a single message. Payloads
    /// above this are uploaded to a separately-addressed result slot.
    pub data_chunk_max_size: usize,
}

// ── Task submission ───────────────────────────────────────────────────────────

/// One task to create. Every entry in `data_dependencies` must be a result
/// id already known to the server; every entry in `expected_output_keys`
/// must be freshly created and not yet bound to a producer.
#[derive(Debug, Clone)]
pub struct TaskCreation {
    pub payload_id: ResultId,
    pub data_dependencies: Vec<ResultId>,
    pub expected_output_keys: Vec<ResultId>,
    pub options: Option<TaskOptions>,
}

/// One entry of a `submit_tasks` reply, in request order.
#[derive(Debug, Clone)]
pub struct SubmittedTask {
    pub task_id: TaskId,
    pub expected_output_id: ResultId,
}

/// One entry of a `get_result_ids` reply.
#[derive(Debug, Clone)]
pub struct TaskResultIds {
    pub task_id: TaskId,
    pub result_ids: Vec<ResultId>,
}

// ── Task status ───────────────────────────────────────────────────────────────

/// Server-side lifecycle state of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskStatus {
    Creating,
    Submitted,
    Processing,
    Completed,
    Error,
    Cancelled,
    Unspecified,
}

/// Reply of `try_get_task_output`: whether the producing task wrote its
/// output successfully.
#[derive(Debug, Clone)]
pub enum TaskOutputInfo {
    Ok,
    Error { details: Vec<String> },
}

/// Task record as reported by `get_task` / `list_tasks`.
#[derive(Debug, Clone)]
pub struct TaskSummary {
    pub task_id: TaskId,
    pub session_id: SessionId,
    pub status: TaskStatus,
    pub data_dependencies: Vec<ResultId>,
    pub expected_output_keys: Vec<ResultId>,
}

/// Server-side filter for `list_tasks`.
#[derive(Debug, Clone, Default)]
pub struct TaskFilter {
    pub session_id: Option<SessionId>,
    pub status: Option<TaskStatus>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskSortField {
    CreatedAt,
    Status,
    TaskId,
}

/// Sort order for `list_tasks`.
#[derive(Debug, Clone, Copy)]
pub struct TaskSort {
    pub field: TaskSortField,
    pub ascending: bool,
}

impl Default for TaskSort {
    fn default() -> Self {
        Self {
            field: TaskSortField::CreatedAt,
            ascending: true,
        }
    }
}

// ── Results ───────────────────────────────────────────────────────────────────

/// Server-reported state of a result slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RawResultStatus {
    /// Slot exists, producer has not completed.
    Created,
    /// Bytes are bound and downloadable.
    Completed,
    /// The result was aborted.
    Aborted,
    /// The producing task is in error.
    TaskError,
    Unspecified,
}

/// One entry of a `list_results` reply.
#[derive(Debug, Clone)]
pub struct ResultSummary {
    pub result_id: ResultId,
    pub status: RawResultStatus,
}

/// Server-side filter for `list_results`.
#[derive(Debug, Clone, Default)]
pub struct ResultFilter {
    pub session_id: Option<SessionId>,
    /// Restrict to these ids. Empty = all results of the session.
    pub result_ids: Vec<ResultId>,
}

/// Filter for the server-side completion wait.
#[derive(Debug, Clone)]
pub struct CompletionFilter {
    pub session_id: SessionId,
    pub result_ids: Vec<ResultId>,
    pub stop_on_first_error: bool,
    pub stop_on_first_cancellation: bool,
}

/// Reply of `wait_for_availability` for a single result.
#[derive(Debug, Clone)]
pub enum Availability {
    /// The result is bound and may be downloaded.
    Ready,
    /// The producing task errored. Detail strings are server-supplied.
    Error { details: Vec<String> },
    /// The producing task has not completed.
    NotCompleted,
    /// The server has nothing to say about this result.
    Absent,
}

/// One frame of the chunked result download stream.
///
/// A well-formed stream is `Data*` followed by `DataComplete` and close.
/// Receivers must treat a `Data` frame after `DataComplete` as stream
/// corruption: the completion flag is cleared again and close without a
/// trailing `DataComplete` is an incomplete result.
#[derive(Debug, Clone)]
pub enum ResultStreamItem {
    Data(Bytes),
    DataComplete,
    Error { details: Vec<String> },
    NotCompleted,
    Absent,
}

/// Outcome for one id of a `try_get_results` batch fetch.
#[derive(Debug, Clone)]
pub enum DeliveryOutcome {
    Ready(Bytes),
    Pending,
    TaskError { details: Vec<String> },
    Aborted,
}

/// One entry of a `try_get_results` reply.
#[derive(Debug, Clone)]
pub struct ResultDelivery {
    pub result_id: ResultId,
    pub outcome: DeliveryOutcome,
}

// ── Legacy streaming submission ───────────────────────────────────────────────

/// Per-task header of the legacy bidirectional submission stream.
#[derive(Debug, Clone)]
pub struct LargeTaskHeader {
    pub data_dependencies: Vec<ResultId>,
    pub expected_output_keys: Vec<ResultId>,
    pub payload_len: u64,
    pub options: Option<TaskOptions>,
}

/// One frame of the legacy `create_large_tasks` stream.
///
/// The frame order is fixed: one `InitRequest`, then per task an `InitTask`
/// followed by its `DataChunk` frames and one `DataComplete`, then a single
/// `LastTask` before close. Writers must not interleave tasks.
#[derive(Debug, Clone)]
pub enum LargeTaskFrame {
    InitRequest {
        session_id: SessionId,
        options: TaskOptions,
    },
    InitTask(LargeTaskHeader),
    DataChunk(Bytes),
    DataComplete,
    LastTask,
}
