//! Background continuation of an accepted task
//!
//! Polls the remote task on the configured schedule, then finishes the
//! local record. Every path ends in exactly one terminal write attempt:
//! success, remote failure, cancellation, poll exhaustion, or a local
//! error (including a panic inside the continuation).

use futures::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use crate::client::{RemoteTaskState, RemoteTaskStatus};
use crate::error::BackgroundProcessingError;
use crate::provenance::ProvenanceMatch;
use crate::storage::FetchedFile;
use crate::worker::CancellationToken;

use super::PipelineInner;

/// What a continuation needs besides shared pipeline state
pub(crate) struct Job {
    pub task_id: String,
    pub remote_task_id: String,
    pub kind: JobKind,
}

pub(crate) enum JobKind {
    Embed {
        watermark_id: String,
        file_name: String,
    },
    Extract {
        /// Submitted file, resolved locally once the remote side finishes
        file: FetchedFile,
    },
}

struct Completion {
    result: String,
    provenance: Option<ProvenanceMatch>,
}

pub(crate) async fn run(inner: Arc<PipelineInner>, job: Job, token: CancellationToken) {
    let work = AssertUnwindSafe(drive(&inner, &job, &token)).catch_unwind();
    let outcome = match work.await {
        Ok(outcome) => outcome,
        Err(panic) => Err(BackgroundProcessingError::Panicked(panic_message(&*panic))),
    };

    let written = match outcome {
        Ok(done) => {
            inner
                .tracker
                .complete(&job.task_id, done.result, done.provenance)
                .await
        }
        Err(err) => {
            inner
                .tracker
                .fail(&job.task_id, err.failure_kind(), err.to_string())
                .await
        }
    };

    if let Err(e) = written {
        tracing::error!(task_id = %job.task_id, error = %e, "Failed to record task outcome");
    }
}

async fn drive(
    inner: &PipelineInner,
    job: &Job,
    token: &CancellationToken,
) -> Result<Completion, BackgroundProcessingError> {
    tokio::select! {
        biased;
        _ = token.cancelled() => Err(BackgroundProcessingError::Cancelled),
        done = work(inner, job) => done,
    }
}

async fn work(inner: &PipelineInner, job: &Job) -> Result<Completion, BackgroundProcessingError> {
    let state = poll_until_settled(inner, job).await?;

    if state.status == RemoteTaskStatus::Failed {
        return Err(BackgroundProcessingError::RemoteFailed(
            state.failure_message(),
        ));
    }

    match &job.kind {
        JobKind::Embed {
            watermark_id,
            file_name,
        } => finish_embed(inner, &state, watermark_id, file_name).await,
        JobKind::Extract { file } => finish_extract(inner, &state, file).await,
    }
}

async fn poll_until_settled(
    inner: &PipelineInner,
    job: &Job,
) -> Result<RemoteTaskState, BackgroundProcessingError> {
    let schedule = &inner.settings.poll;
    let mut attempt = 0;

    while schedule.allows(attempt) {
        tokio::time::sleep(schedule.delay_before(attempt)).await;
        attempt += 1;
        inner.metrics.increment_status_polls();

        let queried = inner.service.query_task(&job.remote_task_id).await;
        inner.record_remote_call(&queried);

        match queried {
            Ok(state) => {
                inner.tracker.observe(&job.task_id, &state.status).await?;
                if state.status.is_settled() {
                    return Ok(state);
                }
                if let RemoteTaskStatus::Unknown(raw) = &state.status {
                    tracing::debug!(
                        task_id = %job.task_id,
                        remote_status = %raw,
                        body = %state.body,
                        "Unrecognized remote status, polling again"
                    );
                }
            }
            Err(err) if err.is_transient() => {
                tracing::warn!(
                    task_id = %job.task_id,
                    attempt,
                    error = %err,
                    "Status poll failed, will retry"
                );
            }
            Err(err) => return Err(err.into()),
        }
    }

    Err(BackgroundProcessingError::PollExhausted { attempts: attempt })
}

async fn finish_embed(
    inner: &PipelineInner,
    state: &RemoteTaskState,
    watermark_id: &str,
    file_name: &str,
) -> Result<Completion, BackgroundProcessingError> {
    let remote_url = state
        .embed_result_url()
        .ok_or(BackgroundProcessingError::MissingResult)?;

    let processed = inner.storage.fetch(&remote_url).await?;
    let hash = processed.content_hash();
    let tagged_name = inner.tag.tag(file_name, watermark_id);
    let local_url = inner.storage.store(&tagged_name, processed.bytes).await?;

    if !inner
        .contents
        .set_watermark_file_hash(watermark_id, &hash)
        .await?
    {
        tracing::warn!(
            watermark_id = watermark_id,
            "Watermarked file hash was already recorded, keeping the first"
        );
    }

    tracing::debug!(
        watermark_id = watermark_id,
        url = %local_url,
        "Watermarked file stored"
    );
    Ok(Completion {
        result: local_url,
        provenance: None,
    })
}

async fn finish_extract(
    inner: &PipelineInner,
    state: &RemoteTaskState,
    file: &FetchedFile,
) -> Result<Completion, BackgroundProcessingError> {
    // No extracted text means no watermark was found; the local evidence still counts
    let text = state.extracted_text().unwrap_or_default();
    let provenance = inner.resolve(file).await?;

    if text.is_empty() {
        tracing::debug!(
            file = %file.name,
            matched = provenance.is_match(),
            "Remote extraction found no watermark"
        );
    }

    Ok(Completion {
        result: text,
        provenance: Some(provenance),
    })
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
