use crate::*;

use bytes::Bytes;
use gridlink_core::error::GridError;
use gridlink_core::rpc::{TaskOutputInfo, TaskStatus};

/// Submit → wait → download returns the submitted bytes (echo profile).
#[tokio::test(start_paused = true)]
async fn wait_then_download_round_trips() {
    let grid = MockGrid::new(CHUNK_MAX, true);
    let client = echo_client(&grid).await;

    let inputs = vec![
        Bytes::from_static(b"\x01"),
        Bytes::from_static(b"\x02"),
        Bytes::from_static(b"\x03"),
    ];
    let task_ids = client.submit_tasks(inputs.clone()).await.unwrap();

    client.wait_for_tasks_completion(&task_ids).await.unwrap();
    let results = client.get_results(&task_ids).await.unwrap();
    assert_eq!(results.len(), 3);
    for ((task_id, bytes), (expected_id, payload)) in
        results.iter().zip(task_ids.iter().zip(&inputs))
    {
        assert_eq!(task_id, expected_id);
        assert_eq!(bytes, payload);
    }
}

/// Repeating the wait after terminal state returns immediately.
#[tokio::test(start_paused = true)]
async fn completion_wait_is_idempotent() {
    let grid = MockGrid::new(CHUNK_MAX, true);
    let client = echo_client(&grid).await;
    let task_ids = client
        .submit_tasks(vec![Bytes::from_static(b"once")])
        .await
        .unwrap();

    client.wait_for_tasks_completion(&task_ids).await.unwrap();
    client.wait_for_tasks_completion(&task_ids).await.unwrap();
}

/// A result whose producing task errored raises with the server's detail
/// strings, without entering the download path.
#[tokio::test]
async fn result_in_error_raises_before_download() {
    let grid = MockGrid::new(CHUNK_MAX, false);
    let client = manual_client(&grid).await;

    let task_id = client.submit_task(Bytes::from_static(b"will-fail")).await.unwrap();
    let result_id = client.output_map().get(&task_id).unwrap();
    grid.set_result_error(&result_id, vec!["boom".into()]);

    let result = client.get_result(&task_id).await;
    match result {
        Err(GridError::ResultInError {
            result_id: errored,
            details,
        }) => {
            assert_eq!(errored, result_id);
            assert_eq!(details, vec!["boom".to_string()]);
        }
        other => panic!("expected ResultInError, got {other:?}"),
    }
    assert_eq!(grid.count_calls("TryGetResultStream"), 0);
}

/// A download stream that closes without its completion marker is an
/// incomplete result.
#[tokio::test]
async fn stream_without_completion_marker_is_incomplete() {
    let grid = MockGrid::new(CHUNK_MAX, true);
    let client = echo_client(&grid).await;

    let task_id = client.submit_task(Bytes::from(vec![9u8; CHUNK_MAX * 2])).await.unwrap();
    let result_id = client.output_map().get(&task_id).unwrap();
    grid.corrupt_stream(&result_id);

    let result = client.get_result(&task_id).await;
    assert!(matches!(result, Err(GridError::ResultIncomplete { .. })));
}

/// `try_get_result` is absent before completion and present after.
#[tokio::test]
async fn try_get_result_reflects_readiness() {
    let grid = MockGrid::new(CHUNK_MAX, false);
    let client = manual_client(&grid).await;

    let task_id = client.submit_task(Bytes::from_static(b"poll")).await.unwrap();
    assert!(client.try_get_result(&task_id).await.unwrap().is_none());

    grid.complete_task(&task_id);
    assert_eq!(
        client.try_get_result(&task_id).await.unwrap(),
        Some(Bytes::from_static(b"poll"))
    );
}

/// Every queried id lands in exactly one status bucket.
#[tokio::test]
async fn status_query_partitions_every_id() {
    let grid = MockGrid::new(CHUNK_MAX, false);
    let client = manual_client(&grid).await;

    let t_done = client.submit_task(Bytes::from_static(b"a")).await.unwrap();
    let t_pending = client.submit_task(Bytes::from_static(b"b")).await.unwrap();
    let t_error = client.submit_task(Bytes::from_static(b"c")).await.unwrap();
    let t_aborted = client.submit_task(Bytes::from_static(b"d")).await.unwrap();

    let r_done = client.output_map().get(&t_done).unwrap();
    let r_pending = client.output_map().get(&t_pending).unwrap();
    let r_error = client.output_map().get(&t_error).unwrap();
    let r_aborted = client.output_map().get(&t_aborted).unwrap();

    grid.complete_task(&t_done);
    grid.set_result_error(&r_error, vec!["task died".into()]);
    grid.abort_result(&r_aborted);

    let query = vec![
        r_done.clone(),
        r_pending.clone(),
        r_error.clone(),
        r_aborted.clone(),
        "res-unknown".to_string(),
    ];
    let collection = client.get_result_status(&query).await.unwrap();

    assert_eq!(collection.ready, vec![r_done]);
    assert_eq!(collection.not_ready, vec![r_pending]);
    assert_eq!(collection.task_error, vec![r_error]);
    assert_eq!(collection.result_error, vec![r_aborted]);
    assert_eq!(collection.missing, vec!["res-unknown".to_string()]);

    let total = collection.ready.len()
        + collection.not_ready.len()
        + collection.result_error.len()
        + collection.task_error.len()
        + collection.missing.len();
    assert_eq!(total, query.len());
}

/// Partial batch failures aggregate into one error naming every failing
/// id and the first failure as primary cause.
#[tokio::test]
async fn partial_batch_failure_aggregates() {
    let grid = MockGrid::new(CHUNK_MAX, false);
    let client = manual_client(&grid).await;

    let t_ok = client.submit_task(Bytes::from_static(b"good")).await.unwrap();
    let t_bad = client.submit_task(Bytes::from_static(b"bad")).await.unwrap();
    grid.complete_task(&t_ok);
    let r_bad = client.output_map().get(&t_bad).unwrap();
    grid.set_result_error(&r_bad, vec!["kaput".into()]);

    let result = client.get_results(&[t_ok.clone(), t_bad.clone()]).await;
    match result {
        Err(GridError::Batch(batch)) => {
            assert_eq!(batch.failed_task_ids, vec![t_bad]);
            assert_eq!(batch.failed_result_ids, vec![r_bad]);
            assert!(matches!(
                *batch.primary,
                GridError::ResultInError { .. }
            ));
        }
        other => panic!("expected batch error, got {other:?}"),
    }
}

/// Task inspection surfaces server-side status and output health.
#[tokio::test]
async fn task_status_and_output_info() {
    let grid = MockGrid::new(CHUNK_MAX, true);
    let client = echo_client(&grid).await;

    let task_id = client.submit_task(Bytes::from_static(b"inspect")).await.unwrap();
    assert_eq!(
        client.get_task_status(&task_id).await.unwrap(),
        TaskStatus::Completed
    );
    assert!(matches!(
        client.get_task_output_info(&task_id).await.unwrap(),
        TaskOutputInfo::Ok
    ));

    let summary = client.get_task(&task_id).await.unwrap();
    assert_eq!(summary.task_id, task_id);
    assert_eq!(&summary.session_id, client.session_id());
}
