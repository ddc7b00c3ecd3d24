//! Legacy streaming submission — one bidirectional stream per chunk.
//!
//! Deployments on the Symphony and DataSynapse engines take their tasks
//! through a single `create_large_tasks` stream: an init frame carrying
//! the session and options, then per task a header frame, the payload in
//! chunks of `data_chunk_max_size`, and a completion marker, closed by a
//! last-task frame. Observable semantics match the small-id pathway; only
//! the wire chatter differs.

use tokio_util::sync::CancellationToken;

use gridlink_core::error::{GridError, TransportError, TransportKind};
use gridlink_core::rpc::{LargeTaskFrame, LargeTaskHeader, ResultId, SubmittedTask};

use crate::retry::{RetryPolicy, retry};
use crate::submit::{Submitter, TaskSpec, exhausted};

pub(crate) async fn submit_chunk_streaming(
    submitter: &Submitter,
    chunk: Vec<TaskSpec>,
    chunk_max: usize,
    policy: &RetryPolicy,
    cancel: &CancellationToken,
) -> Result<Vec<SubmittedTask>, GridError> {
    // Payloads travel inline on the stream, so the only fresh ids needed
    // are output slots for tasks without caller-supplied ones.
    let needed = chunk.iter().filter(|spec| spec.outputs.is_none()).count();
    let allocated = submitter.allocate_slots(needed, policy, cancel).await?;

    let mut expected_outputs: Vec<Vec<ResultId>> = Vec::with_capacity(chunk.len());
    let mut next_slot = 0;
    for spec in &chunk {
        match &spec.outputs {
            Some(ids) => expected_outputs.push(ids.clone()),
            None => {
                expected_outputs.push(vec![allocated[next_slot].clone()]);
                next_slot += 1;
            }
        }
    }

    let chunk_max = chunk_max.max(1);
    let replies = retry(policy, cancel, |_| {
        let session_id = submitter.session_id().clone();
        let options = submitter.default_options().clone();
        let chunk = &chunk;
        let expected = &expected_outputs;
        async move {
            // Writes to the bidirectional stream are not concurrency-safe:
            // one writer per client at a time.
            let _write_guard = submitter.stream_lock.lock().await;
            submitter
                .pool()
                .with_channel(cancel, |transport| async move {
                    let mut stream = transport.create_large_task_stream().await?;
                    stream
                        .send(LargeTaskFrame::InitRequest {
                            session_id,
                            options,
                        })
                        .await?;

                    for (spec, outputs) in chunk.iter().zip(expected.iter()) {
                        stream
                            .send(LargeTaskFrame::InitTask(LargeTaskHeader {
                                data_dependencies: spec.dependencies.clone(),
                                expected_output_keys: outputs.clone(),
                                payload_len: spec.payload.len() as u64,
                                options: spec.options.clone(),
                            }))
                            .await?;

                        let len = spec.payload.len();
                        let mut offset = 0;
                        while offset < len {
                            let end = (offset + chunk_max).min(len);
                            stream
                                .send(LargeTaskFrame::DataChunk(spec.payload.slice(offset..end)))
                                .await?;
                            offset = end;
                        }
                        stream.send(LargeTaskFrame::DataComplete).await?;
                    }

                    stream.send(LargeTaskFrame::LastTask).await?;
                    stream.finish().await.map_err(Into::into)
                })
                .await
        }
    })
    .await
    .map_err(|e| exhausted("stream-submit", policy, e))?;

    if replies.len() != chunk.len() {
        return Err(TransportError::new(
            TransportKind::Internal,
            format!(
                "stream submission answered {} task(s) for {} sent",
                replies.len(),
                chunk.len()
            ),
        )
        .into());
    }

    submitter.record_replies(&replies);
    Ok(replies)
}
