//! Transport seam — the named interface in front of the generated RPC
//! binding.
//!
//! Intentionally minimal. The SDK core is written entirely against these
//! traits; the protobuf/gRPC layer implements them out-of-crate, and tests
//! implement them with an in-memory control plane.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;

use gridlink_core::TaskOptions;
use gridlink_core::error::TransportError;
use gridlink_core::rpc::{
    Availability, CompletionFilter, CreateSessionRequest, LargeTaskFrame, ResultDelivery,
    ResultFilter, ResultId, ResultStreamItem, ResultSummary, ServiceConfiguration, SessionId,
    SessionInfo, SubmittedTask, TaskCreation, TaskFilter, TaskId, TaskOutputInfo, TaskResultIds,
    TaskSort, TaskStatus, TaskSummary,
};

pub type TransportResult<T> = Result<T, TransportError>;

/// The chunked result download stream.
pub type ResultStream = BoxStream<'static, TransportResult<ResultStreamItem>>;

/// One control-plane connection. All calls are suspension points; a call
/// that fails may leave half-closed streams behind, which is why the
/// channel pool destroys faulted channels instead of re-pooling them.
#[async_trait]
pub trait RpcTransport: Send + Sync {
    async fn create_session(&self, request: CreateSessionRequest) -> TransportResult<SessionId>;

    async fn get_session(&self, session_id: &SessionId) -> TransportResult<SessionInfo>;

    async fn cancel_session(&self, session_id: &SessionId) -> TransportResult<()>;

    async fn get_service_configuration(&self) -> TransportResult<ServiceConfiguration>;

    /// Allocate empty result slots. Ids are bound to `names` by position.
    /// Not idempotent: every call consumes fresh ids.
    async fn create_results_metadata(
        &self,
        session_id: &SessionId,
        names: &[String],
    ) -> TransportResult<Vec<ResultId>>;

    /// Create results with inline data, one id per payload, in order.
    async fn create_results(
        &self,
        session_id: &SessionId,
        payloads: &[Bytes],
    ) -> TransportResult<Vec<ResultId>>;

    /// Upload data to a pre-allocated result slot. The binding streams the
    /// bytes in chunks of `data_chunk_max_size`.
    async fn upload_result_data(
        &self,
        session_id: &SessionId,
        result_id: &ResultId,
        data: Bytes,
    ) -> TransportResult<()>;

    /// Create tasks. The reply pairs each request entry with its server-
    /// assigned task id and first expected output id, in request order.
    async fn submit_tasks(
        &self,
        session_id: &SessionId,
        options: &TaskOptions,
        tasks: &[TaskCreation],
    ) -> TransportResult<Vec<SubmittedTask>>;

    async fn get_result_ids(&self, task_ids: &[TaskId]) -> TransportResult<Vec<TaskResultIds>>;

    async fn list_results(&self, filter: ResultFilter) -> TransportResult<Vec<ResultSummary>>;

    /// Server-side wait until every filtered result is terminal, or the
    /// first error / first cancellation when the stop flags are set.
    /// Idempotent: repeated calls after terminal state return immediately.
    async fn wait_for_completion(&self, filter: CompletionFilter) -> TransportResult<()>;

    async fn wait_for_availability(
        &self,
        session_id: &SessionId,
        result_id: &ResultId,
    ) -> TransportResult<Availability>;

    async fn try_get_result_stream(
        &self,
        session_id: &SessionId,
        result_id: &ResultId,
    ) -> TransportResult<ResultStream>;

    /// Batch fetch for the dispatcher: one outcome per queried id.
    async fn try_get_results(
        &self,
        session_id: &SessionId,
        result_ids: &[ResultId],
    ) -> TransportResult<Vec<ResultDelivery>>;

    async fn get_task_status(
        &self,
        task_ids: &[TaskId],
    ) -> TransportResult<Vec<(TaskId, TaskStatus)>>;

    async fn try_get_task_output(
        &self,
        session_id: &SessionId,
        task_id: &TaskId,
    ) -> TransportResult<TaskOutputInfo>;

    async fn list_tasks(
        &self,
        filter: TaskFilter,
        sort: TaskSort,
    ) -> TransportResult<Vec<TaskSummary>>;

    async fn get_task(&self, task_id: &TaskId) -> TransportResult<TaskSummary>;

    /// Open a legacy bidirectional submission stream. Writes to the
    /// returned handle are not concurrency-safe; the submitter serializes
    /// them behind a client-wide lock.
    async fn create_large_task_stream(&self) -> TransportResult<Box<dyn LargeTaskStream>>;
}

/// Writer half of the legacy submission stream.
#[async_trait]
pub trait LargeTaskStream: Send {
    async fn send(&mut self, frame: LargeTaskFrame) -> TransportResult<()>;

    /// Close the stream and collect the server's reply.
    async fn finish(self: Box<Self>) -> TransportResult<Vec<SubmittedTask>>;
}

/// Creates channels for the pool. The production connector dials the
/// configured endpoint; tests hand out in-memory transports.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self) -> TransportResult<Arc<dyn RpcTransport>>;
}
