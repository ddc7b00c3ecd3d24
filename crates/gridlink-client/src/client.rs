//! The session-scoped client surface.
//!
//! `GridClient` wires the channel pool, submitter, waiter, registry, and
//! dispatcher together behind the caller-facing operations. Dependencies
//! given as task ids are translated to result ids here, through the local
//! task→output map with a single `get_result_ids` fallback; the strict
//! no-RPC translation used inside a running task lives in the worker crate.

use std::collections::HashMap;
use std::sync::Arc;

use bytes::Bytes;
use tokio_util::sync::CancellationToken;

use gridlink_core::TaskOptions;
use gridlink_core::config::GridConfig;
use gridlink_core::error::{GridError, TransportError, TransportKind};
use gridlink_core::rpc::{
    ResultId, SessionId, SubmittedTask, TaskFilter, TaskId, TaskOutputInfo, TaskSort, TaskStatus,
    TaskSummary,
};

use crate::channel::ChannelPool;
use crate::dispatch::DispatcherLoop;
use crate::registry::{InvocationHandler, ResultRegistry};
use crate::retry::{DEFAULT_MAX_RETRIES, DEFAULT_RETRY_DELAY, RetryPolicy, retry};
use crate::session::SessionContext;
use crate::submit::{Submitter, TaskOutputMap, TaskSpec};
use crate::transport::Connector;
use crate::waiter::{ResultStatusCollection, ResultWaiter};

pub struct GridClient {
    pool: Arc<ChannelPool>,
    session: SessionContext,
    submitter: Arc<Submitter>,
    waiter: ResultWaiter,
    registry: Arc<ResultRegistry>,
    dispatcher: Option<DispatcherLoop>,
    output_map: Arc<TaskOutputMap>,
    cancel: CancellationToken,
    max_retries: u32,
}

impl GridClient {
    /// Create a fresh session and a client scoped to it.
    pub async fn connect(
        connector: Arc<dyn Connector>,
        config: &GridConfig,
        options: TaskOptions,
    ) -> Result<Self, GridError> {
        let cancel = CancellationToken::new();
        let pool = ChannelPool::new(connector, config.max_parallel_channels as usize);
        let policy = RetryPolicy::transient(DEFAULT_MAX_RETRIES);
        let session =
            SessionContext::create(pool.clone(), &cancel, options, None, &policy).await?;
        Ok(Self::assemble(pool, session, config, cancel))
    }

    /// Open an existing session. Refuses sessions that are not running.
    pub async fn open(
        connector: Arc<dyn Connector>,
        config: &GridConfig,
        session_id: SessionId,
    ) -> Result<Self, GridError> {
        let cancel = CancellationToken::new();
        let pool = ChannelPool::new(connector, config.max_parallel_channels as usize);
        let policy = RetryPolicy::transient(DEFAULT_MAX_RETRIES);
        let session = SessionContext::open(pool.clone(), &cancel, session_id, &policy).await?;
        Ok(Self::assemble(pool, session, config, cancel))
    }

    fn assemble(
        pool: Arc<ChannelPool>,
        session: SessionContext,
        config: &GridConfig,
        cancel: CancellationToken,
    ) -> Self {
        let output_map = Arc::new(TaskOutputMap::new());
        let submitter = Arc::new(Submitter::new(
            pool.clone(),
            session.session_id().clone(),
            session.default_options().clone(),
            config.chunk_submit_size,
            output_map.clone(),
        ));
        let waiter = ResultWaiter::new(
            pool.clone(),
            session.session_id().clone(),
            output_map.clone(),
        );
        let registry = Arc::new(ResultRegistry::new());
        let dispatcher = DispatcherLoop::spawn(
            pool.clone(),
            session.session_id().clone(),
            registry.clone(),
            cancel.child_token(),
        );
        Self {
            pool,
            session,
            submitter,
            waiter,
            registry,
            dispatcher: Some(dispatcher),
            output_map,
            cancel,
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }

    pub fn session_id(&self) -> &SessionId {
        self.session.session_id()
    }

    /// The submission pipeline, for worker-side contexts built on top of
    /// this client.
    pub fn submitter(&self) -> Arc<Submitter> {
        self.submitter.clone()
    }

    pub fn output_map(&self) -> Arc<TaskOutputMap> {
        self.output_map.clone()
    }

    /// Handler registrations not yet delivered by the dispatcher.
    pub fn pending_handlers(&self) -> usize {
        self.registry.len()
    }

    // ── Submission ────────────────────────────────────────────────────────────

    /// Low-level entry point: submit fully-resolved specs.
    pub async fn submit_specs(
        &self,
        specs: Vec<TaskSpec>,
        max_retries: Option<u32>,
    ) -> Result<Vec<SubmittedTask>, GridError> {
        let retries = max_retries.unwrap_or(self.max_retries);
        self.submitter.submit(specs, retries, &self.cancel).await
    }

    pub async fn submit_task(&self, payload: Bytes) -> Result<TaskId, GridError> {
        let replies = self.submit_specs(vec![TaskSpec::new(payload)], None).await?;
        first_task(replies)
    }

    pub async fn submit_task_with_dependencies(
        &self,
        payload: Bytes,
        dependencies: Vec<TaskId>,
    ) -> Result<TaskId, GridError> {
        let replies = self
            .submit_tasks_with_dependencies(vec![(payload, dependencies)], None)
            .await?;
        replies.into_iter().next().ok_or_else(dropped_task)
    }

    pub async fn submit_tasks(&self, payloads: Vec<Bytes>) -> Result<Vec<TaskId>, GridError> {
        let specs = payloads.into_iter().map(TaskSpec::new).collect();
        let replies = self.submit_specs(specs, None).await?;
        Ok(replies.into_iter().map(|reply| reply.task_id).collect())
    }

    /// Submit tasks whose dependencies are given as task ids of previously
    /// submitted tasks.
    pub async fn submit_tasks_with_dependencies(
        &self,
        items: Vec<(Bytes, Vec<TaskId>)>,
        max_retries: Option<u32>,
    ) -> Result<Vec<TaskId>, GridError> {
        let mut specs = Vec::with_capacity(items.len());
        for (payload, dependencies) in items {
            let dependencies = self.resolve_dependencies(&dependencies).await?;
            specs.push(TaskSpec::new(payload).with_dependencies(dependencies));
        }
        let replies = self.submit_specs(specs, max_retries).await?;
        Ok(replies.into_iter().map(|reply| reply.task_id).collect())
    }

    /// Fire-and-forget: submit and register `handler` for every expected
    /// result. The dispatcher loop delivers each exactly once.
    pub async fn submit_tasks_with_handler(
        &self,
        payloads: Vec<Bytes>,
        handler: InvocationHandler,
    ) -> Result<Vec<TaskId>, GridError> {
        let specs = payloads.into_iter().map(TaskSpec::new).collect();
        let replies = self.submit_specs(specs, None).await?;
        Ok(self.register_replies(replies, handler))
    }

    pub async fn submit_tasks_with_dependencies_and_handler(
        &self,
        items: Vec<(Bytes, Vec<TaskId>)>,
        handler: InvocationHandler,
        max_retries: Option<u32>,
    ) -> Result<Vec<TaskId>, GridError> {
        let mut specs = Vec::with_capacity(items.len());
        for (payload, dependencies) in items {
            let dependencies = self.resolve_dependencies(&dependencies).await?;
            specs.push(TaskSpec::new(payload).with_dependencies(dependencies));
        }
        let replies = self.submit_specs(specs, max_retries).await?;
        Ok(self.register_replies(replies, handler))
    }

    fn register_replies(
        &self,
        replies: Vec<SubmittedTask>,
        handler: InvocationHandler,
    ) -> Vec<TaskId> {
        replies
            .into_iter()
            .map(|reply| {
                self.registry.insert(
                    reply.expected_output_id,
                    reply.task_id.clone(),
                    handler.clone(),
                );
                reply.task_id
            })
            .collect()
    }

    /// Translate task-id dependencies to result ids: local map first, one
    /// `get_result_ids` call for the rest, unknown ids are fatal.
    async fn resolve_dependencies(
        &self,
        dependencies: &[TaskId],
    ) -> Result<Vec<ResultId>, GridError> {
        let mut unknown: Vec<TaskId> = dependencies
            .iter()
            .filter(|task_id| self.output_map.get(task_id).is_none())
            .cloned()
            .collect();
        unknown.dedup();

        if !unknown.is_empty() {
            let policy = RetryPolicy::transient(self.max_retries);
            let cancel = &self.cancel;
            let replies = retry(&policy, cancel, |_| {
                let pool = self.pool.clone();
                let unknown = unknown.clone();
                async move {
                    pool.with_channel(cancel, |transport| async move {
                        transport.get_result_ids(&unknown).await.map_err(Into::into)
                    })
                    .await
                }
            })
            .await?;
            for entry in replies {
                if let Some(result_id) = entry.result_ids.into_iter().next() {
                    self.output_map.record(entry.task_id, result_id);
                }
            }
        }

        self.output_map.translate(dependencies)
    }

    // ── Results ───────────────────────────────────────────────────────────────

    pub async fn wait_for_tasks_completion(&self, task_ids: &[TaskId]) -> Result<(), GridError> {
        let policy = RetryPolicy::transient(self.max_retries);
        let mut result_ids = Vec::with_capacity(task_ids.len());
        for task_id in task_ids {
            result_ids.push(
                self.waiter
                    .resolve_result_id(task_id, &policy, &self.cancel)
                    .await?,
            );
        }
        self.waiter
            .wait_for_ready(&result_ids, self.max_retries, DEFAULT_RETRY_DELAY, &self.cancel)
            .await
    }

    pub async fn get_result(&self, task_id: &TaskId) -> Result<Bytes, GridError> {
        self.waiter
            .get_result(task_id, self.max_retries, &self.cancel)
            .await
    }

    pub async fn get_results(
        &self,
        task_ids: &[TaskId],
    ) -> Result<Vec<(TaskId, Bytes)>, GridError> {
        self.waiter
            .get_results(task_ids, self.max_retries, &self.cancel)
            .await
    }

    pub async fn try_get_result(&self, task_id: &TaskId) -> Result<Option<Bytes>, GridError> {
        self.waiter
            .try_get_result(task_id, self.max_retries, &self.cancel)
            .await
    }

    pub async fn get_result_status(
        &self,
        result_ids: &[ResultId],
    ) -> Result<ResultStatusCollection, GridError> {
        self.waiter
            .get_result_status(result_ids, self.max_retries, &self.cancel)
            .await
    }

    pub async fn get_task_result_status(
        &self,
        task_ids: &[TaskId],
    ) -> Result<ResultStatusCollection, GridError> {
        self.waiter
            .get_task_result_status(task_ids, self.max_retries, &self.cancel)
            .await
    }

    // ── Task inspection ───────────────────────────────────────────────────────

    pub async fn get_task_status(&self, task_id: &TaskId) -> Result<TaskStatus, GridError> {
        let statuses = self
            .pool
            .with_channel(&self.cancel, |transport| {
                let task_id = task_id.clone();
                async move { transport.get_task_status(&[task_id]).await.map_err(Into::into) }
            })
            .await?;
        statuses
            .into_iter()
            .find(|(id, _)| id == task_id)
            .map(|(_, status)| status)
            .ok_or_else(|| {
                GridError::from(TransportError::new(
                    TransportKind::NotFound,
                    format!("unknown task {task_id}"),
                ))
            })
    }

    pub async fn get_task_output_info(
        &self,
        task_id: &TaskId,
    ) -> Result<TaskOutputInfo, GridError> {
        self.pool
            .with_channel(&self.cancel, |transport| {
                let session_id = self.session_id().clone();
                let task_id = task_id.clone();
                async move {
                    transport
                        .try_get_task_output(&session_id, &task_id)
                        .await
                        .map_err(Into::into)
                }
            })
            .await
    }

    pub async fn list_tasks(
        &self,
        filter: TaskFilter,
        sort: TaskSort,
    ) -> Result<Vec<TaskSummary>, GridError> {
        self.pool
            .with_channel(&self.cancel, |transport| async move {
                transport.list_tasks(filter, sort).await.map_err(Into::into)
            })
            .await
    }

    pub async fn get_task(&self, task_id: &TaskId) -> Result<TaskSummary, GridError> {
        self.pool
            .with_channel(&self.cancel, |transport| {
                let task_id = task_id.clone();
                async move { transport.get_task(&task_id).await.map_err(Into::into) }
            })
            .await
    }

    // ── Result slots ──────────────────────────────────────────────────────────

    /// Allocate named result slots; the reply maps each name to its id.
    /// Not idempotent: every call consumes fresh ids server-side.
    pub async fn create_results_metadata(
        &self,
        names: &[String],
    ) -> Result<HashMap<String, ResultId>, GridError> {
        let policy = RetryPolicy::transient(self.max_retries);
        let cancel = &self.cancel;
        let ids = retry(&policy, cancel, |_| {
            let pool = self.pool.clone();
            let session_id = self.session_id().clone();
            let names = names.to_vec();
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
        .await?;
        Ok(names.iter().cloned().zip(ids).collect())
    }

    // ── Lifecycle ─────────────────────────────────────────────────────────────

    pub async fn cancel_session(&self) -> Result<(), GridError> {
        self.session.cancel(&self.cancel).await
    }

    /// Stop the dispatcher after its current pass and drop orphaned
    /// handler registrations without invoking them.
    pub async fn shutdown(mut self) {
        self.cancel.cancel();
        if let Some(dispatcher) = self.dispatcher.take() {
            dispatcher.shutdown().await;
        }
        let orphaned = self.registry.clear();
        if orphaned > 0 {
            tracing::warn!(orphaned, "handler registrations dropped at shutdown");
        }
    }
}

fn dropped_task() -> GridError {
    GridError::from(TransportError::new(
        TransportKind::Unavailable,
        "task dropped after exhausted payload upload retries",
    ))
}

fn first_task(replies: Vec<SubmittedTask>) -> Result<TaskId, GridError> {
    replies
        .into_iter()
        .next()
        .map(|reply| reply.task_id)
        .ok_or_else(dropped_task)
}
