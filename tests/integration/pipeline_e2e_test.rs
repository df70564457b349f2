// End-to-end pipeline tests against the in-process fake service
//
// Embed a watermark, extract it from the published copy, and trace the
// copy back to its watermark record.

use bytes::Bytes;
use std::sync::atomic::Ordering;

use shirushi::model::{FailureKind, Operation, TaskStatus};
use shirushi::provenance::MatchStrategy;
use shirushi::storage::{content_hash, FetchedFile, FileStorage};

use super::test_harness::{Behavior, PipelineHarness, PUBLIC_BASE_URL};

#[tokio::test]
async fn test_embed_then_extract_round_trip() {
    let harness = PipelineHarness::new(Behavior::FinishAfter(1));
    let input_url = harness.input_file("plan.docx", b"board meeting minutes");
    let pipeline = &harness.pipeline;

    let embed_id = pipeline
        .embed(&input_url, "CONFIDENTIAL", None)
        .await
        .expect("embed should be accepted");
    let embedded = pipeline.wait_for_terminal(&embed_id).await.unwrap();

    assert_eq!(embedded.status, TaskStatus::Completed);
    assert_eq!(embedded.progress, 100);
    assert_eq!(embedded.operation, Operation::Embed);
    let published_url = embedded.result.clone().expect("embed result url");
    assert_ne!(published_url, input_url);
    assert!(published_url.starts_with(PUBLIC_BASE_URL));
    assert!(published_url.contains("plan_WM"));
    assert!(published_url.ends_with(".docx"));

    let extract_id = pipeline.extract(&published_url).await.unwrap();
    let extracted = pipeline.wait_for_terminal(&extract_id).await.unwrap();

    assert_eq!(extracted.status, TaskStatus::Completed);
    assert_eq!(extracted.result.as_deref(), Some("CONFIDENTIAL"));
    let provenance = extracted.provenance.expect("extract carries provenance");
    assert_eq!(provenance.content.as_deref(), Some("CONFIDENTIAL"));
    assert_eq!(provenance.strategy, Some(MatchStrategy::FilenameFragment));
    assert!(provenance.confidence >= 0.85);

    let record = pipeline.get_record(&embed_id).await.unwrap();
    assert_eq!(provenance.watermark_id, record.watermark_id);
}

#[tokio::test]
async fn test_embed_records_both_file_hashes() {
    let harness = PipelineHarness::new(Behavior::FinishAfter(0));
    let original = b"quarterly forecast";
    let input_url = harness.input_file("forecast.xlsx", original);

    let task_id = harness
        .pipeline
        .embed(&input_url, "INTERNAL ONLY", None)
        .await
        .unwrap();
    let view = harness.pipeline.wait_for_terminal(&task_id).await.unwrap();
    let published = harness
        .storage
        .fetch(view.result.as_deref().unwrap())
        .await
        .unwrap();

    let contents = harness.pipeline.list_contents().await.unwrap();
    assert_eq!(contents.len(), 1);
    let content = &contents[0];
    assert_eq!(content.content, "INTERNAL ONLY");
    assert_eq!(content.original_file_hash, content_hash(original));
    assert_eq!(
        content.watermark_file_hash.as_deref(),
        Some(published.content_hash().as_str())
    );
    assert_eq!(content.biz_id, content.watermark_id);
    assert_eq!(content.policy_id.as_deref(), Some("standard-office"));
}

#[tokio::test]
async fn test_renamed_copy_resolves_by_content_hash() {
    let harness = PipelineHarness::new(Behavior::FinishAfter(0));
    let input_url = harness.input_file("design.pptx", b"roadmap slides");

    let task_id = harness
        .pipeline
        .embed(&input_url, "DO NOT FORWARD", None)
        .await
        .unwrap();
    let view = harness.pipeline.wait_for_terminal(&task_id).await.unwrap();
    let published = harness
        .storage
        .fetch(view.result.as_deref().unwrap())
        .await
        .unwrap();

    // Same bytes, name stripped of the tag
    let renamed = FetchedFile::new("final-v2.pptx", published.bytes.clone());
    let found = harness.pipeline.resolve_provenance(&renamed).await.unwrap();

    assert!(found.is_match());
    assert_eq!(found.strategy, Some(MatchStrategy::ContentHash));
    assert_eq!(found.content.as_deref(), Some("DO NOT FORWARD"));

    // The untouched original is traceable as well
    let original = FetchedFile::new("design.pptx", Bytes::from_static(b"roadmap slides"));
    let found = harness.pipeline.resolve_provenance(&original).await.unwrap();
    assert_eq!(found.content.as_deref(), Some("DO NOT FORWARD"));
}

#[tokio::test]
async fn test_unrelated_file_has_no_provenance() {
    let harness = PipelineHarness::new(Behavior::FinishAfter(0));
    let url = harness.input_file("holiday.txt", b"nothing to see");

    let found = harness.pipeline.resolve_provenance_url(&url).await.unwrap();
    assert!(!found.is_match());
    assert_eq!(found.confidence, 0.0);
    assert_eq!(found.strategy, None);
}

#[tokio::test]
async fn test_remote_failure_keeps_last_progress() {
    let harness = PipelineHarness::new(Behavior::FailAfter(2, "corrupt archive".into()));
    let url = harness.input_file("broken.docx", b"??");

    let task_id = harness.pipeline.embed(&url, "X", None).await.unwrap();
    let view = harness.pipeline.wait_for_terminal(&task_id).await.unwrap();

    assert_eq!(view.status, TaskStatus::Failed);
    assert_eq!(view.failure, Some(FailureKind::Remote));
    assert_eq!(view.progress, 50);
    assert!(view.error_message.unwrap().contains("corrupt archive"));
    assert!(view.result.is_none());
}

#[tokio::test]
async fn test_transient_poll_errors_are_retried() {
    let harness = PipelineHarness::new(Behavior::FlakyThenFinish(3));
    let url = harness.input_file("memo.docx", b"memo");

    let task_id = harness.pipeline.embed(&url, "X", None).await.unwrap();
    let view = harness.pipeline.wait_for_terminal(&task_id).await.unwrap();

    assert_eq!(view.status, TaskStatus::Completed);
    assert_eq!(harness.service.queries.load(Ordering::SeqCst), 4);
    assert_eq!(harness.pipeline.metrics().get_remote_calls("status"), 3);
}

#[tokio::test]
async fn test_non_transient_poll_error_fails_task() {
    let harness = PipelineHarness::new(Behavior::Reject);
    let url = harness.input_file("memo.docx", b"memo");

    let task_id = harness.pipeline.embed(&url, "X", None).await.unwrap();
    let view = harness.pipeline.wait_for_terminal(&task_id).await.unwrap();

    assert_eq!(view.failure, Some(FailureKind::Processing));
    assert_eq!(harness.service.queries.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_concurrent_embeds_all_complete() {
    let harness = PipelineHarness::new(Behavior::FinishAfter(2));
    let mut task_ids = Vec::new();
    for i in 0..12 {
        let url = harness.input_file(&format!("doc-{}.docx", i), format!("body {}", i).as_bytes());
        let id = harness
            .pipeline
            .embed(&url, &format!("owner-{}", i), None)
            .await
            .unwrap();
        task_ids.push(id);
    }

    let waits = task_ids
        .iter()
        .map(|id| harness.pipeline.wait_for_terminal(id));
    let views = futures::future::join_all(waits).await;

    for view in views {
        assert_eq!(view.unwrap().status, TaskStatus::Completed);
    }
    assert_eq!(harness.pipeline.metrics().get_tasks_completed("embed"), 12);
    assert_eq!(harness.pipeline.metrics().get_tasks_submitted("embed"), 12);
    assert_eq!(harness.pipeline.list_contents().await.unwrap().len(), 12);
}

#[tokio::test]
async fn test_missing_extension_is_rejected_before_remote_call() {
    let harness = PipelineHarness::new(Behavior::FinishAfter(0));
    let url = harness.input_file("README", b"plain");

    let err = harness.pipeline.embed(&url, "X", None).await.unwrap_err();
    assert!(err.to_string().contains("no extension"));
    assert_eq!(harness.service.created_tasks(), 0);
}

#[tokio::test]
async fn test_missing_input_file_creates_nothing() {
    let harness = PipelineHarness::new(Behavior::FinishAfter(0));
    let missing = format!("file://{}/nope.docx", harness.dir.path().display());

    assert!(harness.pipeline.extract(&missing).await.is_err());
    assert_eq!(harness.service.created_tasks(), 0);
    assert!(harness.pipeline.list_tasks().await.unwrap().is_empty());
}
