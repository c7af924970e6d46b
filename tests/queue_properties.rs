//! Processing queue properties: one job at a time, first in first out.
//!
//! Run with: `cargo test --test queue_properties`

mod common;

use common::{orchestrator, pages, ProbeService, ScriptedExtractor, PROFILE};
use folio::service::MockService;
use folio::{
    JobBoard, JobOrchestrator, JobId, JobStatus, NewJob, ProcessingQueue, QueueDriver, ShutdownToken, SourceRef,
};
use proptest::prelude::*;
use std::sync::Arc;
use std::time::Duration;

struct Harness {
    board: Arc<JobBoard>,
    queue: Arc<ProcessingQueue>,
    driver: QueueDriver,
    orchestrator: Arc<JobOrchestrator>,
    probe: Arc<ProbeService>,
}

fn harness(latency: Duration) -> Harness {
    let extractor = ScriptedExtractor::new()
        .with_text("long.txt", pages(80))
        .with_text("short.txt", pages(3));
    let probe = Arc::new(ProbeService::new(MockService::new()).with_latency(latency));
    let orchestrator = Arc::new(orchestrator(Arc::new(extractor), probe.clone()));
    let board = Arc::clone(orchestrator.board());
    probe.watch(Arc::clone(&board));

    let queue = Arc::new(ProcessingQueue::new(Arc::clone(&board)));
    Harness {
        driver: QueueDriver::new(Arc::clone(&queue), Arc::clone(&orchestrator)),
        orchestrator,
        board,
        queue,
        probe,
    }
}

fn add(h: &Harness, name: &str) -> JobId {
    let id = h
        .board
        .create(NewJob::new(SourceRef::from_path(name), PROFILE))
        .unwrap()
        .id;
    h.queue.enqueue(&id).unwrap();
    id
}

fn paused_runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .start_paused(true)
        .build()
        .unwrap()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    /// Jobs finish in submission order, skipping cancelled ones, and the
    /// board never reports more than one job processing.
    #[test]
    fn drains_in_fifo_order_one_at_a_time(
        long in proptest::collection::vec(any::<bool>(), 1..8),
        cancel in proptest::collection::vec(any::<bool>(), 8),
        latency_ms in 0u64..50,
    ) {
        let rt = paused_runtime();
        rt.block_on(async {
            let h = harness(Duration::from_millis(latency_ms));
            let ids: Vec<JobId> = long
                .iter()
                .map(|l| add(&h, if *l { "long.txt" } else { "short.txt" }))
                .collect();

            let mut expected = Vec::new();
            for (i, id) in ids.iter().enumerate() {
                if cancel[i] {
                    prop_assert!(h.queue.cancel_if_queued(id));
                } else {
                    expected.push(id.clone());
                }
            }

            let finished = h.driver.run_until_idle().await;
            let order: Vec<JobId> = finished.iter().map(|(id, _)| id.clone()).collect();
            prop_assert_eq!(order, expected);
            prop_assert!(finished.iter().all(|(_, s)| *s == JobStatus::Completed));

            prop_assert!(h.probe.max_processing() <= 1);
            prop_assert!(h.probe.max_in_call() <= 1);
            prop_assert_eq!(h.board.processing_count(), 0);

            for (i, id) in ids.iter().enumerate() {
                if cancel[i] {
                    prop_assert_eq!(h.board.status(id), Some(JobStatus::Queued));
                }
            }
            Ok::<(), TestCaseError>(())
        })?;
    }
}

#[tokio::test(start_paused = true)]
async fn jobs_added_while_processing_wait_their_turn() {
    let h = harness(Duration::from_millis(100));
    let shutdown = ShutdownToken::new();
    let handle = h.driver.clone().spawn(shutdown.clone());

    let first = add(&h, "long.txt");
    // Let the driver pick up the first job and get into its stages
    tokio::time::sleep(Duration::from_millis(250)).await;
    assert_eq!(h.queue.in_flight(), Some(first.clone()));

    let second = add(&h, "short.txt");
    let third = add(&h, "short.txt");
    assert_eq!(h.queue.pending(), vec![second.clone(), third.clone()]);
    assert_eq!(h.board.status(&first), Some(JobStatus::Processing));

    // Wait for everything to finish
    let mut events = h.board.subscribe();
    while h.board.status(&third) != Some(JobStatus::Completed) {
        let _ = events.recv().await;
    }

    shutdown.shutdown();
    tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("driver should stop")
        .unwrap();

    let finish = |id: &JobId| h.board.get(id).unwrap().updated_at;
    assert!(finish(&first) <= finish(&second));
    assert!(finish(&second) <= finish(&third));
    assert!(h.probe.max_processing() <= 1);
    assert!(h.probe.max_in_call() <= 1);
}

#[tokio::test(start_paused = true)]
async fn shutdown_lets_the_current_job_finish() {
    let h = harness(Duration::from_millis(100));
    let shutdown = ShutdownToken::new();
    let handle = h.driver.clone().spawn(shutdown.clone());

    let first = add(&h, "long.txt");
    let second = add(&h, "short.txt");
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(h.queue.in_flight(), Some(first.clone()));

    shutdown.shutdown();
    handle.await.unwrap();

    assert_eq!(h.board.status(&first), Some(JobStatus::Completed));
    assert_eq!(h.board.status(&second), Some(JobStatus::Queued));
    assert_eq!(h.queue.pending(), vec![second]);
}

#[tokio::test(start_paused = true)]
async fn idle_driver_wakes_on_enqueue() {
    let h = harness(Duration::ZERO);
    let shutdown = ShutdownToken::new();
    let handle = h.driver.clone().spawn(shutdown.clone());

    tokio::time::sleep(Duration::from_secs(10)).await;
    let id = add(&h, "short.txt");

    let mut events = h.board.subscribe();
    while h.board.status(&id) != Some(JobStatus::Completed) {
        let _ = events.recv().await;
    }

    shutdown.shutdown();
    handle.await.unwrap();
    assert!(h.queue.is_empty());
}

async fn wait_for(board: &JobBoard, id: &JobId, status: JobStatus) {
    let mut events = board.subscribe();
    while board.status(id) != Some(status) {
        let _ = events.recv().await;
    }
}

#[tokio::test(start_paused = true)]
async fn two_drivers_never_lose_a_job() {
    let h = harness(Duration::from_millis(100));
    let shutdown = ShutdownToken::new();
    let handle = h.driver.clone().spawn(shutdown.clone());

    let first = add(&h, "long.txt");
    tokio::time::sleep(Duration::from_millis(250)).await;
    assert_eq!(h.queue.in_flight(), Some(first.clone()));

    let second = add(&h, "short.txt");
    let finished = h.driver.clone().run_until_idle().await;
    assert!(finished.is_empty() || finished == vec![(second.clone(), JobStatus::Completed)]);

    tokio::time::timeout(
        Duration::from_secs(600),
        wait_for(&h.board, &second, JobStatus::Completed),
    )
    .await
    .expect("second job should run");

    shutdown.shutdown();
    handle.await.unwrap();

    assert_eq!(h.board.status(&first), Some(JobStatus::Completed));
    assert!(h.queue.is_empty());
    assert!(h.probe.max_processing() <= 1);
}

#[tokio::test(start_paused = true)]
async fn driver_waits_for_a_slot_taken_outside_the_queue() {
    let h = harness(Duration::from_millis(100));
    let outside = h
        .board
        .create(NewJob::new(SourceRef::from_path("long.txt"), PROFILE))
        .unwrap()
        .id;
    let orchestrator = Arc::clone(&h.orchestrator);
    let outside_id = outside.clone();
    let direct = tokio::spawn(async move { orchestrator.process(&outside_id).await });
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(h.board.processing(), Some(outside.clone()));

    let queued = add(&h, "short.txt");
    let driver = h.driver.clone();
    let drained = tokio::spawn(async move { driver.run_until_idle().await });
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(h.board.status(&queued), Some(JobStatus::Queued));
    assert_eq!(h.queue.pending(), vec![queued.clone()]);

    assert_eq!(direct.await.unwrap().unwrap(), JobStatus::Completed);
    let finished = drained.await.unwrap();
    assert_eq!(finished, vec![(queued, JobStatus::Completed)]);
    assert!(h.probe.max_processing() <= 1);
}
