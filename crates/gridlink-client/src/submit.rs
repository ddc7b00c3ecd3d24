//! Batched submission pipeline.
//!
//! Input tuples are partitioned into chunks (default 500); each chunk is
//! one logical transaction: classify payloads by size, pre-allocate the
//! result ids the chunk needs in a single metadata call, upload payloads
//! concurrently (small inline, large to their pre-allocated containers),
//! then create tasks in sub-chunks of 100. Chunks run in input order, so
//! the returned task ids line up with the caller's inputs.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use gridlink_core::TaskOptions;
use gridlink_core::error::{GridError, TransportError, TransportKind};
use gridlink_core::rpc::{ResultId, SessionId, SubmittedTask, TaskCreation, TaskId};

use crate::channel::ChannelPool;
use crate::retry::{RetryPolicy, retry};

/// Tasks per `submit_tasks` call.
pub(crate) const SUBMIT_SUBCHUNK: usize = 100;

// ── Task → output mapping ─────────────────────────────────────────────────────

/// Client-side `task_id → result_id` map, populated from submission
/// replies. Append-only within a session: the first recorded binding wins.
/// Dependency translation is a compound check-and-read and runs under one
/// guard.
#[derive(Default)]
pub struct TaskOutputMap {
    inner: Mutex<HashMap<TaskId, ResultId>>,
}

impl TaskOutputMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, task_id: TaskId, result_id: ResultId) {
        let mut map = self
            .inner
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        map.entry(task_id).or_insert(result_id);
    }

    pub fn get(&self, task_id: &str) -> Option<ResultId> {
        let map = self
            .inner
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        map.get(task_id).cloned()
    }

    /// Translate task-id dependencies into result-id dependencies. The
    /// first unknown task id aborts the whole translation, so a failed
    /// submission leaves no partial state behind.
    pub fn translate(&self, dependencies: &[TaskId]) -> Result<Vec<ResultId>, GridError> {
        let map = self
            .inner
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        dependencies
            .iter()
            .map(|task_id| {
                map.get(task_id).cloned().ok_or_else(|| {
                    GridError::DependencyUnknown {
                        task_id: task_id.clone(),
                    }
                })
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.inner
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// ── Submission input ──────────────────────────────────────────────────────────

/// One task to submit. Dependencies are result ids; task-id dependencies
/// are translated by the caller surface before they reach the pipeline.
#[derive(Debug, Clone)]
pub struct TaskSpec {
    pub payload: Bytes,
    pub dependencies: Vec<ResultId>,
    /// Expected output slots. `None` = allocate one fresh id.
    pub outputs: Option<Vec<ResultId>>,
    pub options: Option<TaskOptions>,
}

impl TaskSpec {
    pub fn new(payload: Bytes) -> Self {
        Self {
            payload,
            dependencies: Vec::new(),
            outputs: None,
            options: None,
        }
    }

    pub fn with_dependencies(mut self, dependencies: Vec<ResultId>) -> Self {
        self.dependencies = dependencies;
        self
    }

    pub fn with_outputs(mut self, outputs: Vec<ResultId>) -> Self {
        self.outputs = Some(outputs);
        self
    }

    pub fn with_options(mut self, options: TaskOptions) -> Self {
        self.options = Some(options);
        self
    }
}

// ── Chunk classification ──────────────────────────────────────────────────────

/// Where a descriptor's expected outputs come from.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum OutputSlots {
    Supplied(Vec<ResultId>),
    /// Index into the chunk's allocation batch.
    Allocated(usize),
}

/// Where a descriptor's payload id comes from.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum PayloadSlot {
    /// Small payload: the id is assigned by the inline create call.
    Inline,
    /// Large payload: the pre-allocated container at this allocation slot.
    Container(usize),
}

#[derive(Debug)]
pub(crate) struct Descriptor {
    pub index: usize,
    pub outputs: OutputSlots,
    pub payload: PayloadSlot,
}

#[derive(Debug)]
pub(crate) struct ChunkPlan {
    pub descriptors: Vec<Descriptor>,
    /// Fresh result ids this chunk needs: one per task without supplied
    /// outputs, plus one container per large payload.
    pub slots_needed: usize,
}

/// Single classification pass over a chunk.
pub(crate) fn classify(specs: &[TaskSpec], chunk_max: usize) -> ChunkPlan {
    let mut slots_needed = 0;
    let descriptors = specs
        .iter()
        .enumerate()
        .map(|(index, spec)| {
            let outputs = match &spec.outputs {
                Some(ids) => OutputSlots::Supplied(ids.clone()),
                None => {
                    let slot = slots_needed;
                    slots_needed += 1;
                    OutputSlots::Allocated(slot)
                }
            };
            let payload = if spec.payload.len() <= chunk_max {
                PayloadSlot::Inline
            } else {
                let slot = slots_needed;
                slots_needed += 1;
                PayloadSlot::Container(slot)
            };
            Descriptor {
                index,
                outputs,
                payload,
            }
        })
        .collect();
    ChunkPlan {
        descriptors,
        slots_needed,
    }
}

/// Wrap an error in `SubmissionExhausted` when the retry budget ran out on
/// a fault the policy would have kept retrying; hard faults pass through
/// unchanged.
pub(crate) fn exhausted(stage: &'static str, policy: &RetryPolicy, error: GridError) -> GridError {
    if policy.covers(&error) {
        GridError::SubmissionExhausted {
            stage,
            attempts: policy.attempts.max(1),
            source: Box::new(error),
        }
    } else {
        error
    }
}

// ── Submitter ─────────────────────────────────────────────────────────────────

enum UploadOutcome {
    SmallDone { index: usize, id: ResultId },
    SmallDropped { index: usize },
    LargeDone,
}

pub struct Submitter {
    pool: Arc<ChannelPool>,
    session_id: SessionId,
    default_options: TaskOptions,
    chunk_submit_size: usize,
    output_map: Arc<TaskOutputMap>,
    chunk_max: tokio::sync::OnceCell<usize>,
    /// Serializes writes to the legacy bidirectional stream.
    pub(crate) stream_lock: tokio::sync::Mutex<()>,
    alloc_seq: AtomicU64,
}

impl Submitter {
    pub fn new(
        pool: Arc<ChannelPool>,
        session_id: SessionId,
        default_options: TaskOptions,
        chunk_submit_size: usize,
        output_map: Arc<TaskOutputMap>,
    ) -> Self {
        Self {
            pool,
            session_id,
            default_options,
            chunk_submit_size: chunk_submit_size.max(1),
            output_map,
            chunk_max: tokio::sync::OnceCell::new(),
            stream_lock: tokio::sync::Mutex::new(()),
            alloc_seq: AtomicU64::new(0),
        }
    }

    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    pub fn default_options(&self) -> &TaskOptions {
        &self.default_options
    }

    pub fn output_map(&self) -> &Arc<TaskOutputMap> {
        &self.output_map
    }

    pub(crate) fn pool(&self) -> &Arc<ChannelPool> {
        &self.pool
    }

    /// Submit a stream of task specs. Returned pairs line up with the
    /// input order, minus small payloads dropped after exhausted retries.
    pub async fn submit(
        &self,
        specs: Vec<TaskSpec>,
        max_retries: u32,
        cancel: &CancellationToken,
    ) -> Result<Vec<SubmittedTask>, GridError> {
        if specs.is_empty() {
            return Ok(Vec::new());
        }
        let policy = RetryPolicy::transient(max_retries);
        let chunk_max = self.chunk_max_size(&policy, cancel).await?;
        let streaming = self.default_options.engine_type.uses_streaming_upload();

        let mut submitted = Vec::with_capacity(specs.len());
        let mut remaining = specs;
        while !remaining.is_empty() {
            let rest = remaining.split_off(self.chunk_submit_size.min(remaining.len()));
            let chunk = std::mem::replace(&mut remaining, rest);
            let replies = if streaming {
                crate::legacy::submit_chunk_streaming(self, chunk, chunk_max, &policy, cancel)
                    .await?
            } else {
                self.submit_chunk(chunk, chunk_max, &policy, cancel).await?
            };
            submitted.extend(replies);
        }

        tracing::debug!(
            session_id = self.session_id,
            tasks = submitted.len(),
            "submission complete"
        );
        Ok(submitted)
    }

    /// Server-advertised chunk limit, fetched once and cached.
    pub(crate) async fn chunk_max_size(
        &self,
        policy: &RetryPolicy,
        cancel: &CancellationToken,
    ) -> Result<usize, GridError> {
        self.chunk_max
            .get_or_try_init(|| async {
                let configuration = retry(policy, cancel, |_| {
                    let pool = self.pool.clone();
                    async move {
                        pool.with_channel(cancel, |transport| async move {
                            transport
                                .get_service_configuration()
                                .await
                                .map_err(Into::into)
                        })
                        .await
                    }
                })
                .await?;
                Ok(configuration.data_chunk_max_size)
            })
            .await
            .copied()
    }

    /// Allocate `count` fresh result ids in one metadata call.
    pub(crate) async fn allocate_slots(
        &self,
        count: usize,
        policy: &RetryPolicy,
        cancel: &CancellationToken,
    ) -> Result<Vec<ResultId>, GridError> {
        if count == 0 {
            return Ok(Vec::new());
        }
        let seq = self.alloc_seq.fetch_add(1, Ordering::Relaxed);
        let names: Vec<String> = (0..count).map(|i| format!("slot-{seq}-{i}")).collect();
        let ids = retry(policy, cancel, |_| {
            let pool = self.pool.clone();
            let session_id = self.session_id.clone();
            let names = names.clone();
            async move {
                pool.with_channel(cancel, |transport| async move {
                    transport
                        .create_results_metadata(&session_id, &names)
                        .await
                        .map_err(Into::into)
                })
                .await
            }
        })
        .await
        .map_err(|e| exhausted("allocate-result-ids", policy, e))?;

        if ids.len() != count {
            return Err(TransportError::new(
                TransportKind::Internal,
                format!("allocated {} result ids, requested {count}", ids.len()),
            )
            .into());
        }
        Ok(ids)
    }

    async fn submit_chunk(
        &self,
        chunk: Vec<TaskSpec>,
        chunk_max: usize,
        policy: &RetryPolicy,
        cancel: &CancellationToken,
    ) -> Result<Vec<SubmittedTask>, GridError> {
        // 1. Classification pass.
        let plan = classify(&chunk, chunk_max);

        // 2. One metadata call covers every fresh id the chunk needs.
        let allocated = self.allocate_slots(plan.slots_needed, policy, cancel).await?;

        // 3. Upload pass. Concurrency is bounded by the channel pool cap.
        let (payload_ids, dropped) = self
            .upload_payloads(&chunk, &plan, &allocated, policy, cancel)
            .await?;

        // 4. Task creation pass, in sub-chunks.
        let mut creations = Vec::with_capacity(plan.descriptors.len());
        for descriptor in &plan.descriptors {
            if dropped.contains(&descriptor.index) {
                continue;
            }
            let payload_id = match descriptor.payload {
                PayloadSlot::Inline => payload_ids[&descriptor.index].clone(),
                PayloadSlot::Container(slot) => allocated[slot].clone(),
            };
            let expected_output_keys = match &descriptor.outputs {
                OutputSlots::Supplied(ids) => ids.clone(),
                OutputSlots::Allocated(slot) => vec![allocated[*slot].clone()],
            };
            let spec = &chunk[descriptor.index];
            creations.push(TaskCreation {
                payload_id,
                data_dependencies: spec.dependencies.clone(),
                expected_output_keys,
                options: spec.options.clone(),
            });
        }

        let mut submitted = Vec::with_capacity(creations.len());
        for batch in creations.chunks(SUBMIT_SUBCHUNK) {
            let replies = retry(policy, cancel, |_| {
                let pool = self.pool.clone();
                let session_id = self.session_id.clone();
                let options = self.default_options.clone();
                let batch = batch.to_vec();
                async move {
                    pool.with_channel(cancel, |transport| async move {
                        transport
                            .submit_tasks(&session_id, &options, &batch)
                            .await
                            .map_err(Into::into)
                    })
                    .await
                }
            })
            .await
            .map_err(|e| exhausted("submit-tasks", policy, e))?;

            self.record_replies(&replies);
            submitted.extend(replies);
        }
        Ok(submitted)
    }

    pub(crate) fn record_replies(&self, replies: &[SubmittedTask]) {
        for reply in replies {
            self.output_map
                .record(reply.task_id.clone(), reply.expected_output_id.clone());
        }
    }

    async fn upload_payloads(
        &self,
        chunk: &[TaskSpec],
        plan: &ChunkPlan,
        allocated: &[ResultId],
        policy: &RetryPolicy,
        cancel: &CancellationToken,
    ) -> Result<(HashMap<usize, ResultId>, HashSet<usize>), GridError> {
        let mut uploads: JoinSet<Result<UploadOutcome, GridError>> = JoinSet::new();

        for descriptor in &plan.descriptors {
            let payload = chunk[descriptor.index].payload.clone();
            let pool = self.pool.clone();
            let session_id = self.session_id.clone();
            let policy = policy.clone();
            let cancel = cancel.clone();
            match descriptor.payload {
                PayloadSlot::Inline => {
                    let index = descriptor.index;
                    uploads.spawn(async move {
                        upload_small(pool, session_id, index, payload, policy, cancel).await
                    });
                }
                PayloadSlot::Container(slot) => {
                    let container = allocated[slot].clone();
                    uploads.spawn(async move {
                        upload_large(pool, session_id, container, payload, policy, cancel).await
                    });
                }
            }
        }

        let mut payload_ids = HashMap::new();
        let mut dropped = HashSet::new();
        while let Some(joined) = uploads.join_next().await {
            let outcome = joined.map_err(|e| {
                GridError::from(TransportError::new(
                    TransportKind::Internal,
                    format!("upload task failed: {e}"),
                ))
            })??;
            match outcome {
                UploadOutcome::SmallDone { index, id } => {
                    payload_ids.insert(index, id);
                }
                UploadOutcome::SmallDropped { index } => {
                    dropped.insert(index);
                }
                UploadOutcome::LargeDone => {}
            }
        }
        Ok((payload_ids, dropped))
    }
}

/// Inline create for one small payload. A definitive failure drops the
/// task from its chunk; the caller then observes a shorter result stream.
async fn upload_small(
    pool: Arc<ChannelPool>,
    session_id: SessionId,
    index: usize,
    payload: Bytes,
    policy: RetryPolicy,
    cancel: CancellationToken,
) -> Result<UploadOutcome, GridError> {
    let result = retry(&policy, &cancel, |_| {
        let pool = pool.clone();
        let session_id = session_id.clone();
        let payload = payload.clone();
        let cancel = cancel.clone();
        async move {
            pool.with_channel(&cancel, |transport| async move {
                let ids = transport.create_results(&session_id, &[payload]).await?;
                ids.into_iter().next().ok_or_else(|| {
                    TransportError::new(TransportKind::Internal, "empty create_results reply")
                        .into()
                })
            })
            .await
        }
    })
    .await;

    match result {
        Ok(id) => Ok(UploadOutcome::SmallDone { index, id }),
        Err(error) if policy.covers(&error) => {
            tracing::warn!(error = %error, index, "small payload upload exhausted retries, dropping task");
            Ok(UploadOutcome::SmallDropped { index })
        }
        Err(error) => Err(error),
    }
}

/// Stream one large payload into its pre-allocated container.
async fn upload_large(
    pool: Arc<ChannelPool>,
    session_id: SessionId,
    container: ResultId,
    payload: Bytes,
    policy: RetryPolicy,
    cancel: CancellationToken,
) -> Result<UploadOutcome, GridError> {
    retry(&policy, &cancel, |_| {
        let pool = pool.clone();
        let session_id = session_id.clone();
        let container = container.clone();
        let payload = payload.clone();
        let cancel = cancel.clone();
        async move {
            pool.with_channel(&cancel, |transport| async move {
                transport
                    .upload_result_data(&session_id, &container, payload)
                    .await
                    .map_err(Into::into)
            })
            .await
        }
    })
    .await
    .map_err(|e| exhausted("upload-payload", &policy, e))?;
    Ok(UploadOutcome::LargeDone)
}
