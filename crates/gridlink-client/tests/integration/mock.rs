//! In-memory control plane implementing the transport seam.
//!
//! Echo profile: completing a task binds its outputs to the bytes of its
//! payload. Completion is either automatic (tasks complete as soon as all
//! their dependencies have) or driven explicitly by the test. Every RPC is
//! logged by name, and per-operation failure plans inject transport faults
//! for the retry scenarios.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use futures::stream;

use gridlink_client::transport::{
    Connector, LargeTaskStream, ResultStream, RpcTransport, TransportResult,
};
use gridlink_core::TaskOptions;
use gridlink_core::error::{TransportError, TransportKind};
use gridlink_core::rpc::{
    Availability, CompletionFilter, CreateSessionRequest, DeliveryOutcome, LargeTaskFrame,
    LargeTaskHeader, RawResultStatus, ResultDelivery, ResultFilter, ResultId, ResultStreamItem,
    ResultSummary, ServiceConfiguration, SessionId, SessionInfo, SessionStatus, SubmittedTask,
    TaskCreation, TaskFilter, TaskId, TaskOutputInfo, TaskResultIds, TaskSort, TaskStatus,
    TaskSummary,
};

struct SessionRecord {
    status: SessionStatus,
    options: TaskOptions,
    partitions: Vec<String>,
}

#[derive(Clone)]
struct ResultRecord {
    status: RawResultStatus,
    data: Option<Bytes>,
    details: Vec<String>,
}

impl ResultRecord {
    fn created() -> Self {
        Self {
            status: RawResultStatus::Created,
            data: None,
            details: Vec::new(),
        }
    }

    fn completed(data: Bytes) -> Self {
        Self {
            status: RawResultStatus::Completed,
            data: Some(data),
            details: Vec::new(),
        }
    }
}

#[derive(Clone)]
struct TaskRecord {
    session_id: SessionId,
    status: TaskStatus,
    payload_id: ResultId,
    dependencies: Vec<ResultId>,
    outputs: Vec<ResultId>,
}

struct FailurePlan {
    remaining: u32,
    kind: TransportKind,
}

#[derive(Default)]
struct State {
    sessions: HashMap<SessionId, SessionRecord>,
    results: HashMap<ResultId, ResultRecord>,
    tasks: HashMap<TaskId, TaskRecord>,
    calls: Vec<String>,
    failures: HashMap<&'static str, FailurePlan>,
    corrupt_streams: HashSet<ResultId>,
}

pub struct MockGrid {
    chunk_max: usize,
    auto_complete: bool,
    seq: AtomicU64,
    inner: Mutex<State>,
}

impl MockGrid {
    pub fn new(chunk_max: usize, auto_complete: bool) -> Arc<Self> {
        Arc::new(Self {
            chunk_max,
            auto_complete,
            seq: AtomicU64::new(0),
            inner: Mutex::new(State::default()),
        })
    }

    pub fn connector(self: &Arc<Self>) -> Arc<dyn Connector> {
        Arc::new(MockConnector { grid: self.clone() })
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.inner.lock().expect("mock state lock")
    }

    fn next_id(&self, prefix: &str) -> String {
        format!("{prefix}-{}", self.seq.fetch_add(1, Ordering::Relaxed))
    }

    fn gate(&self, op: &'static str) -> TransportResult<()> {
        let mut state = self.state();
        state.calls.push(op.to_string());
        if let Some(plan) = state.failures.get_mut(op) {
            if plan.remaining > 0 {
                plan.remaining -= 1;
                return Err(TransportError::new(
                    plan.kind,
                    format!("{op}: scripted failure"),
                ));
            }
        }
        Ok(())
    }

    // ── Test controls ─────────────────────────────────────────────────────────

    /// Fail the next `times` calls of `op` with the given fault kind.
    pub fn fail(&self, op: &'static str, times: u32, kind: TransportKind) {
        self.state()
            .failures
            .insert(op, FailurePlan { remaining: times, kind });
    }

    pub fn calls(&self) -> Vec<String> {
        self.state().calls.clone()
    }

    pub fn count_calls(&self, op: &str) -> usize {
        self.state().calls.iter().filter(|c| *c == op).count()
    }

    /// Echo-complete one task: each output becomes the payload bytes.
    pub fn complete_task(&self, task_id: &str) {
        let mut state = self.state();
        complete_in_state(&mut state, task_id);
    }

    pub fn set_result_error(&self, result_id: &str, details: Vec<String>) {
        let mut state = self.state();
        if let Some(record) = state.results.get_mut(result_id) {
            record.status = RawResultStatus::TaskError;
            record.details = details;
        }
    }

    pub fn abort_result(&self, result_id: &str) {
        let mut state = self.state();
        if let Some(record) = state.results.get_mut(result_id) {
            record.status = RawResultStatus::Aborted;
        }
    }

    /// Make the download stream for `result_id` omit its completion marker.
    pub fn corrupt_stream(&self, result_id: &str) {
        self.state().corrupt_streams.insert(result_id.to_string());
    }

    pub fn task_dependencies(&self, task_id: &str) -> Vec<ResultId> {
        self.state()
            .tasks
            .get(task_id)
            .map(|t| t.dependencies.clone())
            .unwrap_or_default()
    }

    pub fn task_outputs(&self, task_id: &str) -> Vec<ResultId> {
        self.state()
            .tasks
            .get(task_id)
            .map(|t| t.outputs.clone())
            .unwrap_or_default()
    }

    pub fn result_status(&self, result_id: &str) -> Option<RawResultStatus> {
        self.state().results.get(result_id).map(|r| r.status)
    }

    pub fn session_partitions(&self, session_id: &str) -> Vec<String> {
        self.state()
            .sessions
            .get(session_id)
            .map(|s| s.partitions.clone())
            .unwrap_or_default()
    }

    fn record_tasks(
        &self,
        session_id: &SessionId,
        entries: Vec<(ResultId, Vec<ResultId>, Vec<ResultId>)>,
    ) -> Vec<SubmittedTask> {
        let mut state = self.state();
        let mut replies = Vec::with_capacity(entries.len());
        for (payload_id, dependencies, outputs) in entries {
            let task_id = format!("task-{}", self.seq.fetch_add(1, Ordering::Relaxed));
            let expected_output_id = outputs.first().cloned().unwrap_or_default();
            state.tasks.insert(
                task_id.clone(),
                TaskRecord {
                    session_id: session_id.clone(),
                    status: TaskStatus::Submitted,
                    payload_id,
                    dependencies,
                    outputs,
                },
            );
            replies.push(SubmittedTask {
                task_id,
                expected_output_id,
            });
        }
        if self.auto_complete {
            sweep_completions(&mut state);
        }
        replies
    }
}

/// Complete every task whose dependencies are all completed, to fixpoint.
fn sweep_completions(state: &mut State) {
    loop {
        let ready: Vec<TaskId> = state
            .tasks
            .iter()
            .filter(|(_, task)| task.status != TaskStatus::Completed)
            .filter(|(_, task)| {
                task.dependencies.iter().all(|dep| {
                    state
                        .results
                        .get(dep)
                        .is_some_and(|r| r.status == RawResultStatus::Completed)
                })
            })
            .map(|(id, _)| id.clone())
            .collect();
        if ready.is_empty() {
            break;
        }
        for task_id in ready {
            complete_in_state(state, &task_id);
        }
    }
}

fn complete_in_state(state: &mut State, task_id: &str) {
    let Some(task) = state.tasks.get_mut(task_id) else {
        return;
    };
    task.status = TaskStatus::Completed;
    let payload_id = task.payload_id.clone();
    let outputs = task.outputs.clone();
    let payload = state
        .results
        .get(&payload_id)
        .and_then(|r| r.data.clone())
        .unwrap_or_default();
    for output in outputs {
        state
            .results
            .insert(output, ResultRecord::completed(payload.clone()));
    }
}

pub struct MockConnector {
    grid: Arc<MockGrid>,
}

#[async_trait]
impl Connector for MockConnector {
    async fn connect(&self) -> TransportResult<Arc<dyn RpcTransport>> {
        Ok(Arc::new(MockHandle(self.grid.clone())))
    }
}

/// Local newtype so `RpcTransport` (foreign trait) can be implemented for a
/// shared grid handle (`Arc<MockGrid>` is foreign too) without an orphan-rule
/// violation.
#[derive(Clone)]
struct MockHandle(Arc<MockGrid>);

impl std::ops::Deref for MockHandle {
    type Target = MockGrid;

    fn deref(&self) -> &MockGrid {
        &self.0
    }
}

#[async_trait]
impl RpcTransport for MockHandle {
    async fn create_session(&self, request: CreateSessionRequest) -> TransportResult<SessionId> {
        self.gate("CreateSession")?;
        let session_id = self.next_id("session");
        self.state().sessions.insert(
            session_id.clone(),
            SessionRecord {
                status: SessionStatus::Running,
                options: request.default_options,
                partitions: request.partitions,
            },
        );
        Ok(session_id)
    }

    async fn get_session(&self, session_id: &SessionId) -> TransportResult<SessionInfo> {
        self.gate("GetSession")?;
        let state = self.state();
        let record = state
            .sessions
            .get(session_id)
            .ok_or_else(|| TransportError::new(TransportKind::NotFound, "unknown session"))?;
        Ok(SessionInfo {
            session_id: session_id.clone(),
            status: record.status,
            default_options: record.options.clone(),
            partitions: record.partitions.clone(),
        })
    }

    async fn cancel_session(&self, session_id: &SessionId) -> TransportResult<()> {
        self.gate("CancelSession")?;
        let mut state = self.state();
        let record = state
            .sessions
            .get_mut(session_id)
            .ok_or_else(|| TransportError::new(TransportKind::NotFound, "unknown session"))?;
        record.status = SessionStatus::Cancelled;
        Ok(())
    }

    async fn get_service_configuration(&self) -> TransportResult<ServiceConfiguration> {
        self.gate("GetServiceConfiguration")?;
        Ok(ServiceConfiguration {
            data_chunk_max_size: self.chunk_max,
        })
    }

    async fn create_results_metadata(
        &self,
        _session_id: &SessionId,
        names: &[String],
    ) -> TransportResult<Vec<ResultId>> {
        self.gate("CreateResultsMetadata")?;
        let mut state = self.state();
        let mut ids = Vec::with_capacity(names.len());
        for _ in names {
            let id = self.next_id("res");
            state.results.insert(id.clone(), ResultRecord::created());
            ids.push(id);
        }
        Ok(ids)
    }

    async fn create_results(
        &self,
        _session_id: &SessionId,
        payloads: &[Bytes],
    ) -> TransportResult<Vec<ResultId>> {
        self.gate("CreateResults")?;
        let mut state = self.state();
        let mut ids = Vec::with_capacity(payloads.len());
        for payload in payloads {
            let id = self.next_id("res");
            state
                .results
                .insert(id.clone(), ResultRecord::completed(payload.clone()));
            ids.push(id);
        }
        Ok(ids)
    }

    async fn upload_result_data(
        &self,
        _session_id: &SessionId,
        result_id: &ResultId,
        data: Bytes,
    ) -> TransportResult<()> {
        self.gate("UploadResultData")?;
        let mut state = self.state();
        let record = state
            .results
            .get_mut(result_id)
            .ok_or_else(|| TransportError::new(TransportKind::NotFound, "unknown result slot"))?;
        *record = ResultRecord::completed(data);
        Ok(())
    }

    async fn submit_tasks(
        &self,
        session_id: &SessionId,
        _options: &TaskOptions,
        tasks: &[TaskCreation],
    ) -> TransportResult<Vec<SubmittedTask>> {
        self.gate("SubmitTasks")?;
        let entries = tasks
            .iter()
            .map(|t| {
                (
                    t.payload_id.clone(),
                    t.data_dependencies.clone(),
                    t.expected_output_keys.clone(),
                )
            })
            .collect();
        Ok(self.record_tasks(session_id, entries))
    }

    async fn get_result_ids(&self, task_ids: &[TaskId]) -> TransportResult<Vec<TaskResultIds>> {
        self.gate("GetResultIds")?;
        let state = self.state();
        Ok(task_ids
            .iter()
            .filter_map(|task_id| {
                state.tasks.get(task_id).map(|task| TaskResultIds {
                    task_id: task_id.clone(),
                    result_ids: task.outputs.clone(),
                })
            })
            .collect())
    }

    async fn list_results(&self, filter: ResultFilter) -> TransportResult<Vec<ResultSummary>> {
        self.gate("ListResults")?;
        let state = self.state();
        Ok(filter
            .result_ids
            .iter()
            .filter_map(|id| {
                state.results.get(id).map(|record| ResultSummary {
                    result_id: id.clone(),
                    status: record.status,
                })
            })
            .collect())
    }

    async fn wait_for_completion(&self, filter: CompletionFilter) -> TransportResult<()> {
        self.gate("WaitForCompletion")?;
        loop {
            {
                let state = self.state();
                let mut all_done = true;
                let mut stop = false;
                for id in &filter.result_ids {
                    match state.results.get(id).map(|r| r.status) {
                        Some(RawResultStatus::Completed) => {}
                        Some(RawResultStatus::TaskError) | Some(RawResultStatus::Aborted) => {
                            if filter.stop_on_first_error || filter.stop_on_first_cancellation {
                                stop = true;
                            }
                        }
                        _ => all_done = false,
                    }
                }
                if all_done || stop {
                    return Ok(());
                }
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    async fn wait_for_availability(
        &self,
        _session_id: &SessionId,
        result_id: &ResultId,
    ) -> TransportResult<Availability> {
        self.gate("WaitForAvailability")?;
        let state = self.state();
        Ok(match state.results.get(result_id) {
            None => Availability::Absent,
            Some(record) => match record.status {
                RawResultStatus::Completed => Availability::Ready,
                RawResultStatus::Created => Availability::NotCompleted,
                RawResultStatus::TaskError | RawResultStatus::Aborted
                | RawResultStatus::Unspecified => Availability::Error {
                    details: record.details.clone(),
                },
            },
        })
    }

    async fn try_get_result_stream(
        &self,
        _session_id: &SessionId,
        result_id: &ResultId,
    ) -> TransportResult<ResultStream> {
        self.gate("TryGetResultStream")?;
        let state = self.state();
        let frames: Vec<ResultStreamItem> = match state.results.get(result_id) {
            None => vec![ResultStreamItem::Absent],
            Some(record) => match record.status {
                RawResultStatus::Created => vec![ResultStreamItem::NotCompleted],
                RawResultStatus::TaskError | RawResultStatus::Aborted
                | RawResultStatus::Unspecified => vec![ResultStreamItem::Error {
                    details: record.details.clone(),
                }],
                RawResultStatus::Completed => {
                    let data = record.data.clone().unwrap_or_default();
                    let mut frames = Vec::new();
                    let mut offset = 0;
                    while offset < data.len() {
                        let end = (offset + self.chunk_max).min(data.len());
                        frames.push(ResultStreamItem::Data(data.slice(offset..end)));
                        offset = end;
                    }
                    if !state.corrupt_streams.contains(result_id) {
                        frames.push(ResultStreamItem::DataComplete);
                    }
                    frames
                }
            },
        };
        Ok(stream::iter(frames.into_iter().map(Ok)).boxed())
    }

    async fn try_get_results(
        &self,
        _session_id: &SessionId,
        result_ids: &[ResultId],
    ) -> TransportResult<Vec<ResultDelivery>> {
        self.gate("TryGetResults")?;
        let state = self.state();
        Ok(result_ids
            .iter()
            .map(|id| {
                let outcome = match state.results.get(id) {
                    Some(record) => match record.status {
                        RawResultStatus::Completed => {
                            DeliveryOutcome::Ready(record.data.clone().unwrap_or_default())
                        }
                        RawResultStatus::Created => DeliveryOutcome::Pending,
                        RawResultStatus::TaskError | RawResultStatus::Unspecified => {
                            DeliveryOutcome::TaskError {
                                details: record.details.clone(),
                            }
                        }
                        RawResultStatus::Aborted => DeliveryOutcome::Aborted,
                    },
                    None => DeliveryOutcome::Pending,
                };
                ResultDelivery {
                    result_id: id.clone(),
                    outcome,
                }
            })
            .collect())
    }

    async fn get_task_status(
        &self,
        task_ids: &[TaskId],
    ) -> TransportResult<Vec<(TaskId, TaskStatus)>> {
        self.gate("GetTaskStatus")?;
        let state = self.state();
        Ok(task_ids
            .iter()
            .filter_map(|id| state.tasks.get(id).map(|t| (id.clone(), t.status)))
            .collect())
    }

    async fn try_get_task_output(
        &self,
        _session_id: &SessionId,
        task_id: &TaskId,
    ) -> TransportResult<TaskOutputInfo> {
        self.gate("TryGetTaskOutput")?;
        let state = self.state();
        let task = state
            .tasks
            .get(task_id)
            .ok_or_else(|| TransportError::new(TransportKind::NotFound, "unknown task"))?;
        let errored = task.outputs.iter().any(|output| {
            state
                .results
                .get(output)
                .is_some_and(|r| r.status == RawResultStatus::TaskError)
        });
        if errored {
            let details = task
                .outputs
                .iter()
                .filter_map(|output| state.results.get(output))
                .flat_map(|r| r.details.clone())
                .collect();
            Ok(TaskOutputInfo::Error { details })
        } else {
            Ok(TaskOutputInfo::Ok)
        }
    }

    async fn list_tasks(
        &self,
        filter: TaskFilter,
        _sort: TaskSort,
    ) -> TransportResult<Vec<TaskSummary>> {
        self.gate("ListTasks")?;
        let state = self.state();
        let mut summaries: Vec<TaskSummary> = state
            .tasks
            .iter()
            .filter(|(_, task)| {
                filter
                    .session_id
                    .as_ref()
                    .is_none_or(|session| &task.session_id == session)
            })
            .filter(|(_, task)| filter.status.is_none_or(|status| task.status == status))
            .map(|(id, task)| TaskSummary {
                task_id: id.clone(),
                session_id: task.session_id.clone(),
                status: task.status,
                data_dependencies: task.dependencies.clone(),
                expected_output_keys: task.outputs.clone(),
            })
            .collect();
        summaries.sort_by(|a, b| a.task_id.cmp(&b.task_id));
        Ok(summaries)
    }

    async fn get_task(&self, task_id: &TaskId) -> TransportResult<TaskSummary> {
        self.gate("GetTask")?;
        let state = self.state();
        let task = state
            .tasks
            .get(task_id)
            .ok_or_else(|| TransportError::new(TransportKind::NotFound, "unknown task"))?;
        Ok(TaskSummary {
            task_id: task_id.clone(),
            session_id: task.session_id.clone(),
            status: task.status,
            data_dependencies: task.dependencies.clone(),
            expected_output_keys: task.outputs.clone(),
        })
    }

    async fn create_large_task_stream(&self) -> TransportResult<Box<dyn LargeTaskStream>> {
        self.gate("CreateLargeTasks")?;
        Ok(Box::new(MockLargeTaskStream {
            grid: self.clone(),
            session_id: None,
            current: None,
            finished_tasks: Vec::new(),
        }))
    }
}

pub struct MockLargeTaskStream {
    grid: MockHandle,
    session_id: Option<SessionId>,
    current: Option<(LargeTaskHeader, Vec<u8>)>,
    finished_tasks: Vec<(LargeTaskHeader, Bytes)>,
}

#[async_trait]
impl LargeTaskStream for MockLargeTaskStream {
    async fn send(&mut self, frame: LargeTaskFrame) -> TransportResult<()> {
        match frame {
            LargeTaskFrame::InitRequest { session_id, .. } => {
                self.session_id = Some(session_id);
            }
            LargeTaskFrame::InitTask(header) => {
                self.current = Some((header, Vec::new()));
            }
            LargeTaskFrame::DataChunk(data) => {
                if let Some((_, buffer)) = self.current.as_mut() {
                    buffer.extend_from_slice(&data);
                }
            }
            LargeTaskFrame::DataComplete => {
                if let Some((header, buffer)) = self.current.take() {
                    self.finished_tasks.push((header, Bytes::from(buffer)));
                }
            }
            LargeTaskFrame::LastTask => {}
        }
        Ok(())
    }

    async fn finish(self: Box<Self>) -> TransportResult<Vec<SubmittedTask>> {
        let session_id = self
            .session_id
            .ok_or_else(|| TransportError::new(TransportKind::InvalidArgument, "no init frame"))?;
        let grid = self.grid;
        let mut entries = Vec::with_capacity(self.finished_tasks.len());
        {
            let mut state = grid.state();
            for (header, payload) in &self.finished_tasks {
                let payload_id = grid.next_id("res");
                state
                    .results
                    .insert(payload_id.clone(), ResultRecord::completed(payload.clone()));
                entries.push((
                    payload_id,
                    header.data_dependencies.clone(),
                    header.expected_output_keys.clone(),
                ));
            }
        }
        Ok(grid.record_tasks(&session_id, entries))
    }
}
