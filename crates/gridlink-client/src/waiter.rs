//! Result waiting and retrieval — availability waits, chunked download
//! with reassembly, and status classification.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use futures::StreamExt;
use tokio_util::sync::CancellationToken;

use gridlink_core::error::{BatchError, GridError, TransportError, TransportKind};
use gridlink_core::rpc::{
    Availability, CompletionFilter, RawResultStatus, ResultFilter, ResultId, ResultStreamItem,
    SessionId, TaskId,
};

use crate::channel::ChannelPool;
use crate::retry::{RetryPolicy, retry};
use crate::submit::TaskOutputMap;
use crate::transport::ResultStream;

/// Partition of a queried result-id set. Every queried id appears in
/// exactly one bucket, in query order.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ResultStatusCollection {
    pub ready: Vec<ResultId>,
    pub not_ready: Vec<ResultId>,
    pub result_error: Vec<ResultId>,
    /// The producing task is in error.
    pub task_error: Vec<ResultId>,
    /// The server does not know the id.
    pub missing: Vec<ResultId>,
}

/// Classify a query against server-reported statuses.
pub(crate) fn classify_statuses(
    query: &[ResultId],
    statuses: &HashMap<ResultId, RawResultStatus>,
) -> ResultStatusCollection {
    let mut collection = ResultStatusCollection::default();
    for id in query {
        match statuses.get(id) {
            Some(RawResultStatus::Created) => collection.not_ready.push(id.clone()),
            Some(RawResultStatus::Completed) => collection.ready.push(id.clone()),
            Some(RawResultStatus::Aborted) | Some(RawResultStatus::Unspecified) => {
                collection.result_error.push(id.clone())
            }
            Some(RawResultStatus::TaskError) => collection.task_error.push(id.clone()),
            None => collection.missing.push(id.clone()),
        }
    }
    collection
}

/// Reassemble a chunked download stream.
///
/// Bytes accumulate in order; `DataComplete` sets the completion flag; a
/// `Data` frame after `DataComplete` clears it again (the stream is
/// corrupt), and close without the flag set raises `ResultIncomplete`.
/// The returned buffer is exactly the concatenation of received chunks.
pub(crate) async fn assemble_result_stream(
    result_id: &str,
    mut stream: ResultStream,
) -> Result<Bytes, GridError> {
    let mut buffer = BytesMut::new();
    let mut complete = false;
    while let Some(item) = stream.next().await {
        match item? {
            ResultStreamItem::Data(data) => {
                if complete {
                    complete = false;
                }
                buffer.extend_from_slice(&data);
            }
            ResultStreamItem::DataComplete => complete = true,
            ResultStreamItem::Error { details } => {
                return Err(GridError::ResultInError {
                    result_id: result_id.to_string(),
                    details,
                });
            }
            ResultStreamItem::NotCompleted | ResultStreamItem::Absent => {
                return Err(GridError::ResultNotReady {
                    result_id: result_id.to_string(),
                });
            }
        }
    }
    if !complete {
        return Err(GridError::ResultIncomplete {
            result_id: result_id.to_string(),
        });
    }
    Ok(buffer.freeze())
}

/// Transport codes the try-path reads as "not ready yet".
fn is_not_ready_transport(error: &GridError) -> bool {
    matches!(
        error,
        GridError::Transport(t) if matches!(
            t.kind,
            TransportKind::NotFound | TransportKind::Cancelled | TransportKind::Aborted
        )
    )
}

pub struct ResultWaiter {
    pool: Arc<ChannelPool>,
    session_id: SessionId,
    output_map: Arc<TaskOutputMap>,
}

impl ResultWaiter {
    pub fn new(
        pool: Arc<ChannelPool>,
        session_id: SessionId,
        output_map: Arc<TaskOutputMap>,
    ) -> Self {
        Self {
            pool,
            session_id,
            output_map,
        }
    }

    /// Server-side wait until every listed result is terminal, stopping at
    /// the first task error or cancellation.
    pub async fn wait_for_ready(
        &self,
        result_ids: &[ResultId],
        max_retries: u32,
        delay: Duration,
        cancel: &CancellationToken,
    ) -> Result<(), GridError> {
        let policy = RetryPolicy::transient(max_retries).with_delay(delay);
        retry(&policy, cancel, |_| {
            let pool = self.pool.clone();
            let filter = CompletionFilter {
                session_id: self.session_id.clone(),
                result_ids: result_ids.to_vec(),
                stop_on_first_error: true,
                stop_on_first_cancellation: true,
            };
            async move {
                pool.with_channel(cancel, |transport| async move {
                    tokio::select! {
                        reply = transport.wait_for_completion(filter) => reply.map_err(Into::into),
                        _ = cancel.cancelled() => Err(GridError::Cancelled),
                    }
                })
                .await
            }
        })
        .await
    }

    /// Resolve a task id to its first result id: local map first, then one
    /// `get_result_ids` call.
    pub async fn resolve_result_id(
        &self,
        task_id: &TaskId,
        policy: &RetryPolicy,
        cancel: &CancellationToken,
    ) -> Result<ResultId, GridError> {
        if let Some(result_id) = self.output_map.get(task_id) {
            return Ok(result_id);
        }
        let replies = retry(policy, cancel, |_| {
            let pool = self.pool.clone();
            let task_id = task_id.clone();
            async move {
                pool.with_channel(cancel, |transport| async move {
                    transport.get_result_ids(&[task_id]).await.map_err(Into::into)
                })
                .await
            }
        })
        .await?;

        let result_id = replies
            .into_iter()
            .find(|entry| &entry.task_id == task_id)
            .and_then(|entry| entry.result_ids.into_iter().next())
            .ok_or_else(|| {
                GridError::from(TransportError::new(
                    TransportKind::NotFound,
                    format!("no result id for task {task_id}"),
                ))
            })?;
        self.output_map.record(task_id.clone(), result_id.clone());
        Ok(result_id)
    }

    /// Wait for a task's result and download it. Availability errors raise
    /// before any download is attempted.
    pub async fn get_result(
        &self,
        task_id: &TaskId,
        max_retries: u32,
        cancel: &CancellationToken,
    ) -> Result<Bytes, GridError> {
        let policy = RetryPolicy::transient(max_retries);
        let result_id = self.resolve_result_id(task_id, &policy, cancel).await?;
        match self.await_availability(&result_id, &policy, cancel).await? {
            Availability::Ready => {}
            Availability::Error { details } => {
                return Err(GridError::ResultInError { result_id, details });
            }
            Availability::NotCompleted | Availability::Absent => {
                return Err(GridError::ResultNotReady { result_id });
            }
        }
        self.download(&result_id, cancel).await
    }

    /// Non-blocking fetch: not-yet-ready surfaces as `None`, hard result
    /// errors still raise.
    pub async fn try_get_result(
        &self,
        task_id: &TaskId,
        max_retries: u32,
        cancel: &CancellationToken,
    ) -> Result<Option<Bytes>, GridError> {
        let policy = RetryPolicy::transient(max_retries);
        let result_id = match self.resolve_result_id(task_id, &policy, cancel).await {
            Ok(result_id) => result_id,
            Err(error) if is_not_ready_transport(&error) => return Ok(None),
            Err(error) => return Err(error),
        };
        match self.await_availability(&result_id, &policy, cancel).await {
            Ok(Availability::Ready) => {}
            Ok(Availability::Error { details }) => {
                return Err(GridError::ResultInError { result_id, details });
            }
            Ok(Availability::NotCompleted) | Ok(Availability::Absent) => return Ok(None),
            Err(error) if is_not_ready_transport(&error) => return Ok(None),
            Err(error) => return Err(error),
        }
        match self.download(&result_id, cancel).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(GridError::ResultNotReady { .. }) => Ok(None),
            Err(error) if is_not_ready_transport(&error) => Ok(None),
            Err(error) => Err(error),
        }
    }

    /// Download every listed task's result. Partial failures aggregate
    /// into one batch error naming the first failure as primary cause.
    pub async fn get_results(
        &self,
        task_ids: &[TaskId],
        max_retries: u32,
        cancel: &CancellationToken,
    ) -> Result<Vec<(TaskId, Bytes)>, GridError> {
        let mut delivered = Vec::with_capacity(task_ids.len());
        let mut failed_task_ids = Vec::new();
        let mut failed_result_ids = Vec::new();
        let mut primary: Option<GridError> = None;

        for task_id in task_ids {
            match self.get_result(task_id, max_retries, cancel).await {
                Ok(bytes) => delivered.push((task_id.clone(), bytes)),
                Err(error) => {
                    if let Some(result_id) = self.output_map.get(task_id) {
                        failed_result_ids.push(result_id);
                    }
                    failed_task_ids.push(task_id.clone());
                    if primary.is_none() {
                        primary = Some(error);
                    }
                }
            }
        }

        match primary {
            None => Ok(delivered),
            Some(primary) => Err(GridError::Batch(BatchError {
                failed_result_ids,
                failed_task_ids,
                primary: Box::new(primary),
            })),
        }
    }

    /// Partition the given result ids by server status.
    pub async fn get_result_status(
        &self,
        result_ids: &[ResultId],
        max_retries: u32,
        cancel: &CancellationToken,
    ) -> Result<ResultStatusCollection, GridError> {
        let policy = RetryPolicy::transient(max_retries);
        let summaries = retry(&policy, cancel, |_| {
            let pool = self.pool.clone();
            let filter = ResultFilter {
                session_id: Some(self.session_id.clone()),
                result_ids: result_ids.to_vec(),
            };
            async move {
                pool.with_channel(cancel, |transport| async move {
                    transport.list_results(filter).await.map_err(Into::into)
                })
                .await
            }
        })
        .await?;

        let statuses: HashMap<ResultId, RawResultStatus> = summaries
            .into_iter()
            .map(|summary| (summary.result_id, summary.status))
            .collect();
        Ok(classify_statuses(result_ids, &statuses))
    }

    /// Status partition for task ids: resolves each task to its result id
    /// first, then classifies.
    pub async fn get_task_result_status(
        &self,
        task_ids: &[TaskId],
        max_retries: u32,
        cancel: &CancellationToken,
    ) -> Result<ResultStatusCollection, GridError> {
        let policy = RetryPolicy::transient(max_retries);
        let mut result_ids = Vec::with_capacity(task_ids.len());
        for task_id in task_ids {
            result_ids.push(self.resolve_result_id(task_id, &policy, cancel).await?);
        }
        self.get_result_status(&result_ids, max_retries, cancel).await
    }

    async fn await_availability(
        &self,
        result_id: &ResultId,
        policy: &RetryPolicy,
        cancel: &CancellationToken,
    ) -> Result<Availability, GridError> {
        retry(policy, cancel, |_| {
            let pool = self.pool.clone();
            let session_id = self.session_id.clone();
            let result_id = result_id.clone();
            async move {
                pool.with_channel(cancel, |transport| async move {
                    tokio::select! {
                        reply = transport.wait_for_availability(&session_id, &result_id) => {
                            reply.map_err(Into::into)
                        }
                        _ = cancel.cancelled() => Err(GridError::Cancelled),
                    }
                })
                .await
            }
        })
        .await
    }

    async fn download(
        &self,
        result_id: &ResultId,
        cancel: &CancellationToken,
    ) -> Result<Bytes, GridError> {
        self.pool
            .with_channel(cancel, |transport| {
                let session_id = self.session_id.clone();
                let result_id = result_id.clone();
                async move {
                    let stream = transport
                        .try_get_result_stream(&session_id, &result_id)
                        .await?;
                    assemble_result_stream(&result_id, stream).await
                }
            })
            .await
    }
}
