//! Per-task submission context for worker code.
//!
//! A context is scoped to one executing task. Child submissions translate
//! dependency task ids strictly through the session's task→output map:
//! an unknown id is fatal for the submission and nothing reaches the wire.

use std::sync::Arc;

use bytes::Bytes;
use tokio_util::sync::CancellationToken;

use gridlink_client::retry::DEFAULT_MAX_RETRIES;
use gridlink_client::submit::{Submitter, TaskOutputMap, TaskSpec};
use gridlink_core::error::{GridError, TransportError, TransportKind};
use gridlink_core::rpc::{ResultId, TaskId};

pub struct TaskContext {
    submitter: Arc<Submitter>,
    parent_task_id: TaskId,
    /// The results the parent task is expected to produce. A child
    /// submitted with `result_for_parent` takes these as its own outputs.
    parent_expected_outputs: Vec<ResultId>,
    cancel: CancellationToken,
    max_retries: u32,
}

/// Translate and assemble child specs. Runs entirely against the local
/// map — the first unknown dependency aborts before any RPC is issued.
fn build_specs(
    output_map: &TaskOutputMap,
    parent_outputs: &[ResultId],
    items: Vec<(Bytes, Vec<TaskId>)>,
    result_for_parent: bool,
) -> Result<Vec<TaskSpec>, GridError> {
    let mut specs = Vec::with_capacity(items.len());
    for (payload, dependencies) in items {
        let dependencies = output_map.translate(&dependencies)?;
        let mut spec = TaskSpec::new(payload).with_dependencies(dependencies);
        if result_for_parent {
            spec = spec.with_outputs(parent_outputs.to_vec());
        }
        specs.push(spec);
    }
    Ok(specs)
}

impl TaskContext {
    pub fn new(
        submitter: Arc<Submitter>,
        parent_task_id: TaskId,
        parent_expected_outputs: Vec<ResultId>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            submitter,
            parent_task_id,
            parent_expected_outputs,
            cancel,
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn parent_task_id(&self) -> &TaskId {
        &self.parent_task_id
    }

    pub fn parent_expected_outputs(&self) -> &[ResultId] {
        &self.parent_expected_outputs
    }

    /// Submit one child task with no dependencies.
    pub async fn submit_task(&self, payload: Bytes) -> Result<TaskId, GridError> {
        self.submit_tasks_with_dependencies(vec![(payload, Vec::new())], false)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| {
                GridError::from(TransportError::new(
                    TransportKind::Unavailable,
                    "child task dropped after exhausted payload upload retries",
                ))
            })
    }

    /// Submit child tasks whose dependencies are task ids of work this
    /// session already submitted. With `result_for_parent` set, each child
    /// is bound to produce the parent's expected output instead of a fresh
    /// result slot.
    pub async fn submit_tasks_with_dependencies(
        &self,
        items: Vec<(Bytes, Vec<TaskId>)>,
        result_for_parent: bool,
    ) -> Result<Vec<TaskId>, GridError> {
        let specs = build_specs(
            self.submitter.output_map(),
            &self.parent_expected_outputs,
            items,
            result_for_parent,
        )?;

        let replies = self
            .submitter
            .submit(specs, self.max_retries, &self.cancel)
            .await?;
        tracing::debug!(
            parent = self.parent_task_id,
            children = replies.len(),
            "child tasks submitted"
        );
        Ok(replies.into_iter().map(|reply| reply.task_id).collect())
    }
}
