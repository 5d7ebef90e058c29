// Best-effort behaviour of the in-flight canceller against a misbehaving fleet.

mod common;

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use cadence_scheduler::{
    FleetError, FleetState, InFlightCanceller, SettingsUpdate, Subject, WorkerFleet, WorkerReport,
};
use common::{memory_db, orchestrator_on, FakeFleet};

const CHAT_42: &str = r#"{"chat_id":"42","message_text":"hi"}"#;

#[tokio::test]
async fn failing_state_does_not_block_the_others() {
    let fleet = Arc::new(FakeFleet::default());
    fleet.add_task("w1", FleetState::Scheduled, "s-1", CHAT_42);
    fleet.add_task("w1", FleetState::Active, "a-1", CHAT_42);
    fleet.add_task("w2", FleetState::Reserved, "r-1", CHAT_42);
    fleet.fail_state(FleetState::Scheduled);

    let canceller = InFlightCanceller::new(fleet.clone(), Duration::from_millis(500));
    let cancelled = canceller
        .cancel_subject(
            &Subject::chat("42"),
            &[FleetState::Scheduled, FleetState::Active, FleetState::Reserved],
        )
        .await;

    assert_eq!(cancelled, 2);
    assert_eq!(fleet.cancelled_ids(), vec!["a-1", "r-1"]);
}

#[tokio::test]
async fn failing_worker_does_not_hide_its_peers() {
    let fleet = Arc::new(FakeFleet::default());
    fleet.add_task("healthy", FleetState::Queued, "q-1", CHAT_42);
    fleet.add_task("broken", FleetState::Queued, "q-2", CHAT_42);
    fleet.fail_worker("broken");

    let canceller = InFlightCanceller::new(fleet.clone(), Duration::from_millis(500));
    let cancelled = canceller
        .cancel_subject(&Subject::chat("42"), &[FleetState::Queued])
        .await;

    assert_eq!(cancelled, 1);
    assert_eq!(fleet.cancelled_ids(), vec!["q-1"]);
}

#[tokio::test]
async fn unparsable_payloads_are_skipped() {
    let fleet = Arc::new(FakeFleet::default());
    fleet.add_task("w1", FleetState::Active, "bad", "not json");
    fleet.add_task("w1", FleetState::Active, "good", CHAT_42);

    let canceller = InFlightCanceller::new(fleet.clone(), Duration::from_millis(500));
    let cancelled = canceller
        .cancel_matching(|p| p["chat_id"] == "42", &[FleetState::Active])
        .await;

    assert_eq!(cancelled, 1);
    assert_eq!(fleet.cancelled_ids(), vec!["good"]);
}

/// A fleet that never answers.
struct Hanging;

#[async_trait]
impl WorkerFleet for Hanging {
    async fn list_inflight(&self, _state: FleetState) -> Result<Vec<WorkerReport>, FleetError> {
        std::future::pending().await
    }

    async fn cancel(&self, _task_id: &str) -> Result<(), FleetError> {
        std::future::pending().await
    }

    async fn broadcast_restart(&self) -> Result<(), FleetError> {
        std::future::pending().await
    }
}

#[tokio::test]
async fn unresponsive_fleet_times_out_per_call() {
    let canceller = InFlightCanceller::new(Arc::new(Hanging), Duration::from_millis(50));
    let started = std::time::Instant::now();
    let cancelled = canceller
        .cancel_subject(&Subject::chat("42"), &FleetState::ALL)
        .await;
    assert_eq!(cancelled, 0);
    assert!(!canceller.restart_pool().await);
    assert!(started.elapsed() < Duration::from_secs(2));
}

#[tokio::test]
async fn orchestrated_update_succeeds_when_the_fleet_is_down() {
    let fleet = Arc::new(FakeFleet::default());
    for state in FleetState::ALL {
        fleet.fail_state(state);
    }
    let (orch, _conn) = orchestrator_on(memory_db(), fleet);
    orch.register("42", None).await.unwrap();

    let res = orch
        .update_settings(
            "42",
            SettingsUpdate {
                interval_secs: Some(30),
                ..SettingsUpdate::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(res.cancelled, 0);
    assert!(res.job.enabled);
}

fn preload_every_state(fleet: &FakeFleet) {
    fleet.add_task("w1", FleetState::Queued, "q-42", CHAT_42);
    fleet.add_task("w1", FleetState::Active, "a-42", CHAT_42);
    fleet.add_task("w1", FleetState::Scheduled, "s-42", CHAT_42);
    fleet.add_task("w1", FleetState::Reserved, "r-42", CHAT_42);
    fleet.add_task("w1", FleetState::Scheduled, "s-7", r#"{"chat_id":"7","message_text":"hi"}"#);
}

#[tokio::test]
async fn register_cancels_only_scheduled_and_reserved() {
    let fleet = Arc::new(FakeFleet::default());
    preload_every_state(&fleet);
    let (orch, _conn) = orchestrator_on(memory_db(), Arc::clone(&fleet));

    let reg = orch.register("42", None).await.unwrap();

    assert_eq!(reg.cancelled, 2);
    assert_eq!(fleet.cancelled_ids(), vec!["r-42", "s-42"]);
    assert_eq!(fleet.restarts.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn stop_leaves_queued_work_alone() {
    let fleet = Arc::new(FakeFleet::default());
    let (orch, _conn) = orchestrator_on(memory_db(), Arc::clone(&fleet));
    orch.register("42", None).await.unwrap();
    preload_every_state(&fleet);

    let outcome = orch.stop("42").await.unwrap();

    assert_eq!(outcome.cancelled, 3);
    assert_eq!(fleet.cancelled_ids(), vec!["a-42", "r-42", "s-42"]);
    assert_eq!(fleet.restarts.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn reschedule_cancels_every_state_and_restarts_the_pool() {
    let fleet = Arc::new(FakeFleet::default());
    let (orch, _conn) = orchestrator_on(memory_db(), Arc::clone(&fleet));
    orch.register("42", None).await.unwrap();
    preload_every_state(&fleet);

    let res = orch
        .update_settings(
            "42",
            SettingsUpdate {
                interval_secs: Some(60),
                ..SettingsUpdate::default()
            },
        )
        .await
        .unwrap();

    assert_eq!(res.cancelled, 4);
    assert_eq!(fleet.cancelled_ids(), vec!["a-42", "q-42", "r-42", "s-42"]);
    assert_eq!(fleet.restarts.load(Ordering::SeqCst), 1);
}
