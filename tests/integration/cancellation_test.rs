// Cancellation, poll exhaustion and shutdown tests
//
// Every path must end in exactly one terminal write, and a terminal record
// must never be overwritten.

use std::time::Duration;

use shirushi::model::{FailureKind, TaskStatus};
use shirushi::worker::PollSchedule;

use super::test_harness::{Behavior, PipelineHarness};

fn slow_poll() -> PollSchedule {
    PollSchedule::new(20, 20, 10_000)
}

#[tokio::test]
async fn test_cancel_running_task() {
    let harness = PipelineHarness::with_poll(Behavior::Stall, slow_poll());
    let url = harness.input_file("plan.docx", b"plan");

    let task_id = harness.pipeline.embed(&url, "X", None).await.unwrap();
    tokio::time::sleep(Duration::from_millis(150)).await;

    assert!(harness.pipeline.cancel(&task_id).await.unwrap());
    let view = harness.pipeline.wait_for_terminal(&task_id).await.unwrap();

    assert_eq!(view.status, TaskStatus::Failed);
    assert_eq!(view.failure, Some(FailureKind::Cancelled));
    assert_eq!(view.error_message.as_deref(), Some("task was cancelled"));
    // Progress reported before the cancellation is kept
    assert_eq!(view.progress, 50);
}

#[tokio::test]
async fn test_cancel_after_completion_is_rejected() {
    let harness = PipelineHarness::new(Behavior::FinishAfter(0));
    let url = harness.input_file("plan.docx", b"plan");

    let task_id = harness.pipeline.embed(&url, "X", None).await.unwrap();
    let done = harness.pipeline.wait_for_terminal(&task_id).await.unwrap();
    assert_eq!(done.status, TaskStatus::Completed);

    assert!(!harness.pipeline.cancel(&task_id).await.unwrap());
    let after = harness.pipeline.get_status(&task_id).await.unwrap();
    assert_eq!(after, done);
}

#[tokio::test]
async fn test_poll_exhaustion_times_out() {
    let harness = PipelineHarness::with_poll(Behavior::Stall, PollSchedule::new(1, 2, 4));
    let url = harness.input_file("plan.docx", b"plan");

    let task_id = harness.pipeline.extract(&url).await.unwrap();
    let view = harness.pipeline.wait_for_terminal(&task_id).await.unwrap();

    assert_eq!(view.status, TaskStatus::Failed);
    assert_eq!(view.failure, Some(FailureKind::TimedOut));
    assert!(view
        .error_message
        .unwrap()
        .contains("did not settle after 4 status polls"));
    assert_eq!(harness.pipeline.metrics().get_tasks_failed("extract", "timed_out"), 1);
}

#[tokio::test]
async fn test_shutdown_cancels_in_flight_tasks() {
    let harness = PipelineHarness::with_poll(Behavior::Stall, slow_poll());
    let mut task_ids = Vec::new();
    for i in 0..3 {
        let url = harness.input_file(&format!("f{}.docx", i), b"body");
        task_ids.push(harness.pipeline.embed(&url, "X", None).await.unwrap());
    }

    assert!(harness.pipeline.shutdown().await);

    for task_id in &task_ids {
        let view = harness.pipeline.get_status(task_id).await.unwrap();
        assert_eq!(view.failure, Some(FailureKind::Cancelled));
    }
    assert_eq!(harness.pipeline.metrics().get_active_tasks(), 0);

    // No new work after shutdown; the accepted-then-orphaned task is failed
    let url = harness.input_file("late.docx", b"late");
    assert!(harness.pipeline.embed(&url, "X", None).await.is_err());
    let late = harness
        .pipeline
        .list_tasks()
        .await
        .unwrap()
        .into_iter()
        .find(|r| r.file_name == "late.docx")
        .expect("late record");
    assert_eq!(late.failure, Some(FailureKind::Cancelled));
}

#[tokio::test]
async fn test_cancellation_is_recorded_once() {
    let harness = PipelineHarness::with_poll(Behavior::Stall, slow_poll());
    let url = harness.input_file("plan.docx", b"plan");
    let task_id = harness.pipeline.embed(&url, "X", None).await.unwrap();

    // The second cancel finds the task already terminal
    assert!(harness.pipeline.cancel(&task_id).await.unwrap());
    harness.pipeline.wait_for_terminal(&task_id).await.unwrap();
    assert!(!harness.pipeline.cancel(&task_id).await.unwrap());

    let metrics = harness.pipeline.metrics();
    assert_eq!(metrics.get_tasks_failed("embed", "cancelled"), 1);
    assert_eq!(metrics.get_tasks_completed("embed"), 0);
}

#[tokio::test]
async fn test_cancel_returns_after_outcome_is_recorded() {
    let harness = PipelineHarness::with_poll(Behavior::Stall, slow_poll());
    let url = harness.input_file("plan.docx", b"plan");
    let task_id = harness.pipeline.extract(&url).await.unwrap();

    assert!(harness.pipeline.cancel(&task_id).await.unwrap());

    // No wait needed: a true answer means the cancellation is on record
    let view = harness.pipeline.get_status(&task_id).await.unwrap();
    assert_eq!(view.status, TaskStatus::Failed);
    assert_eq!(view.failure, Some(FailureKind::Cancelled));
    assert_eq!(harness.pipeline.metrics().get_active_tasks(), 0);
}
