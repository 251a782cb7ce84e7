use crate::error::{PipelineError, PipelineResult};
use crate::pipeline::executor::BatchExecutor;
use crate::pipeline::orchestrator::{
    get_processing_state, list_processing_states, register_job, run_job,
};
use crate::pipeline::session::TransformKind;
use crate::pipeline::types::{ProcessingState, ProgressSnapshot};
use crate::run_artifacts::JobReport;
use crate::run_context::{Job, JobConfig};
use crate::video::MediaCodec;
use crate::web::server::AppState;
use axum::{
    body::{Body, Bytes},
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    Json,
};
use futures::Stream;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

pub const UPLOADS_DIR: &str = "uploads";
pub const RESULTS_DIR: &str = "results";
pub const SCRATCH_DIR: &str = "scratch";
const INPUT_FILE_NAME: &str = "input.mp4";
const OUTPUT_FILE_NAME: &str = "output.mp4";
const EVENT_INTERVAL: Duration = Duration::from_secs(1);
const ABANDONED_MESSAGE: &str = "request ended before the job finished";

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Internal(String),
}

impl ApiError {
    fn status_code(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<PipelineError> for ApiError {
    fn from(err: PipelineError) -> Self {
        match err {
            PipelineError::UnknownTransform(_) => ApiError::NotFound(err.to_string()),
            PipelineError::Config(_) => ApiError::BadRequest(err.to_string()),
            _ => ApiError::Internal(err.to_string()),
        }
    }
}

impl From<std::io::Error> for ApiError {
    fn from(err: std::io::Error) -> Self {
        ApiError::Internal(err.to_string())
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    detail: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = ErrorResponse {
            detail: self.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

#[derive(Serialize)]
pub struct ProcessorInfo {
    pub name: &'static str,
    pub kind: TransformKind,
}

#[derive(Debug, Default, Deserialize)]
pub struct ProcessQuery {
    pub fps: Option<f64>,
    pub workers: Option<usize>,
    pub batch_size: Option<usize>,
}

pub async fn root_handler() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

pub async fn list_processors_handler() -> Json<Vec<ProcessorInfo>> {
    Json(
        TransformKind::ALL
            .iter()
            .map(|kind| ProcessorInfo {
                name: kind.processor_name(),
                kind: *kind,
            })
            .collect(),
    )
}

pub async fn list_jobs_handler() -> Json<Vec<ProgressSnapshot>> {
    Json(list_processing_states())
}

/// Removes the upload and settles the job's progress however the request ends,
/// including the client disconnecting while the job is still queued.
struct UploadGuard {
    upload_dir: PathBuf,
    progress: Arc<ProcessingState>,
}

impl Drop for UploadGuard {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_dir_all(&self.upload_dir) {
            if e.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!(
                    "Failed to remove upload dir {}: {}",
                    self.upload_dir.display(),
                    e
                );
            }
        }
        if !self.progress.stage().is_terminal() {
            tracing::warn!("Job {}: abandoned before completion", self.progress.job_id);
            self.progress.fail(ABANDONED_MESSAGE.to_string());
        }
    }
}

/// Upload a video as the raw request body, run it through `processor` and
/// answer with the processed mp4.
pub async fn process_handler(
    State(state): State<Arc<AppState>>,
    Path(processor): Path<String>,
    Query(query): Query<ProcessQuery>,
    body: Bytes,
) -> Result<Response, ApiError> {
    let config = JobConfig::from_request(
        &processor,
        query.fps.or(state.pipeline.fps),
        Some(query.workers.unwrap_or(state.pipeline.workers)),
        Some(query.batch_size.unwrap_or(state.pipeline.batch_size)),
    )?;
    if body.is_empty() {
        return Err(ApiError::BadRequest("request body must contain a video".to_string()));
    }

    let mut job = Job::new(
        INPUT_FILE_NAME,
        OUTPUT_FILE_NAME,
        &state.work_root.join(SCRATCH_DIR),
        config,
    );
    let upload_dir = state.work_root.join(UPLOADS_DIR).join(&job.id);
    let result_dir = state.work_root.join(RESULTS_DIR).join(&job.id);
    job.input = upload_dir.join(INPUT_FILE_NAME);
    job.output = result_dir.join(OUTPUT_FILE_NAME);

    let progress = Arc::new(ProcessingState::new(job.id.clone(), job.config.kind));
    register_job(progress.clone());
    let guard = UploadGuard {
        upload_dir: upload_dir.clone(),
        progress: progress.clone(),
    };

    tokio::fs::create_dir_all(&upload_dir).await?;
    tokio::fs::write(&job.input, &body).await?;
    tracing::info!(
        "Job {}: received {} bytes for {}",
        job.id,
        body.len(),
        job.config.kind.processor_name()
    );

    let permit = state
        .job_slots
        .clone()
        .acquire_owned()
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?;

    // From here on the job runs to completion even if the client goes away;
    // the slot is released only when it has finished.
    let file_name = format!("{}_{}.mp4", job.config.kind.processor_name(), job.id);
    let codec = state.codec.clone();
    let executor = state.executor.clone();
    let worker_progress = progress.clone();
    let outcome = tokio::task::spawn_blocking(move || {
        let _permit = permit;
        let _guard = guard;
        finish_job(
            &job,
            codec.as_ref(),
            executor.as_ref(),
            &worker_progress,
            &result_dir,
        )
    })
    .await;

    let video = match outcome {
        Ok(result) => result?,
        Err(join_err) => {
            let err = PipelineError::Worker(format!("pipeline task aborted: {}", join_err));
            progress.fail(err.to_string());
            return Err(err.into());
        }
    };

    Response::builder()
        .header(header::CONTENT_TYPE, "video/mp4")
        .header(
            header::CONTENT_DISPOSITION,
            format!("attachment; filename=\"{}\"", file_name),
        )
        .body(Body::from(video))
        .map_err(|e| ApiError::Internal(e.to_string()))
}

/// Run `job` and collect what it leaves behind: `report.json` stays in
/// `result_dir`, the encoded video is read back and removed from disk.
fn finish_job(
    job: &Job,
    codec: &dyn MediaCodec,
    executor: &dyn BatchExecutor,
    progress: &ProcessingState,
    result_dir: &std::path::Path,
) -> PipelineResult<Vec<u8>> {
    std::fs::create_dir_all(result_dir)?;
    let result = run_job(job, codec, executor, progress);

    let mut report = match &result {
        Ok(report) => report.clone(),
        Err(e) => JobReport::failed(job, progress, e),
    };
    // The video goes out in the response body and is not kept
    report.output = None;
    if let Err(e) = report.write_to(result_dir) {
        tracing::warn!("Job {}: failed to write report: {}", job.id, e);
    }

    let video = result.and_then(|_| std::fs::read(&job.output).map_err(PipelineError::from));
    if job.output.exists() {
        if let Err(e) = std::fs::remove_file(&job.output) {
            tracing::warn!("Job {}: failed to remove {}: {}", job.id, job.output.display(), e);
        }
    }
    video
}

/// Server-sent progress for one job, one event per second until it finishes.
pub async fn job_events_handler(
    Path(job_id): Path<String>,
) -> Result<Sse<impl Stream<Item = Result<Event, axum::Error>>>, ApiError> {
    let progress = get_processing_state(&job_id)
        .ok_or_else(|| ApiError::NotFound(format!("Job {} not found", job_id)))?;

    let stream = async_stream::stream! {
        let mut interval = tokio::time::interval(EVENT_INTERVAL);
        loop {
            interval.tick().await;
            let snapshot = progress.snapshot();
            let finished = snapshot.stage.is_terminal();
            yield Event::default().event("progress").json_data(&snapshot);
            if finished {
                break;
            }
        }
    };

    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::PipelineArgs;
    use crate::pipeline::executor::{ThreadExecutor, WorkerBackend};
    use crate::pipeline::testing::{job_in, FakeCodec};
    use crate::pipeline::types::JobStage;
    use crate::video::ffmpeg_codec::FfmpegCodec;
    use tokio::sync::Semaphore;

    fn app_state(work_root: &std::path::Path, job_slots: usize) -> Arc<AppState> {
        Arc::new(AppState {
            work_root: work_root.to_path_buf(),
            pipeline: PipelineArgs {
                workers: 2,
                batch_size: 4,
                fps: None,
                backend: WorkerBackend::Thread,
                ffmpeg: "ffmpeg".to_string(),
                ffprobe: "ffprobe".to_string(),
            },
            codec: Arc::new(FfmpegCodec::default()),
            executor: Arc::new(ThreadExecutor),
            job_slots: Arc::new(Semaphore::new(job_slots)),
        })
    }

    #[tokio::test]
    async fn test_request_dropped_while_queued_cleans_up() {
        let work = tempfile::tempdir().unwrap();
        // No free slots, so the request parks waiting for one
        let state = app_state(work.path(), 0);

        let request = process_handler(
            State(state.clone()),
            Path("color_grading".to_string()),
            Query(ProcessQuery::default()),
            Bytes::from_static(b"fake video"),
        );
        let timed_out = tokio::time::timeout(Duration::from_millis(200), request).await;
        assert!(timed_out.is_err());

        let uploads = work.path().join(UPLOADS_DIR);
        assert_eq!(std::fs::read_dir(&uploads).unwrap().count(), 0);
        assert!(!work.path().join(RESULTS_DIR).exists());
        assert_eq!(state.job_slots.available_permits(), 0);
        assert!(list_processing_states().iter().any(|s| {
            s.stage == JobStage::Failed && s.error.as_deref() == Some(ABANDONED_MESSAGE)
        }));
    }

    #[test]
    fn test_finish_job_keeps_only_report() {
        let work = tempfile::tempdir().unwrap();
        let result_dir = work.path().join(RESULTS_DIR).join("job");
        let mut job = job_in(work.path(), JobConfig::new(TransformKind::ColorGrade));
        job.output = result_dir.join(OUTPUT_FILE_NAME);
        let progress = ProcessingState::new(job.id.clone(), job.config.kind);

        let video =
            finish_job(&job, &FakeCodec::new(3), &ThreadExecutor, &progress, &result_dir).unwrap();

        assert_eq!(video, b"mp4");
        assert!(!job.output.exists());
        let report = JobReport::read_from(&result_dir).unwrap();
        assert!(report.is_success());
        assert_eq!(report.frames_encoded, 3);
        assert_eq!(report.output, None);
    }

    #[test]
    fn test_finish_job_failure_still_writes_report() {
        let work = tempfile::tempdir().unwrap();
        let result_dir = work.path().join(RESULTS_DIR).join("job");
        let mut job = job_in(work.path(), JobConfig::new(TransformKind::Denoise));
        job.output = result_dir.join(OUTPUT_FILE_NAME);
        let progress = ProcessingState::new(job.id.clone(), job.config.kind);
        let mut codec = FakeCodec::new(3);
        codec.fail_encode = true;

        let err = finish_job(&job, &codec, &ThreadExecutor, &progress, &result_dir).unwrap_err();

        assert!(matches!(err, PipelineError::ToolFailed { .. }));
        assert!(!job.output.exists());
        let report = JobReport::read_from(&result_dir).unwrap();
        assert!(!report.is_success());
        assert_eq!(report.stage, JobStage::Failed);
        assert!(report.error.unwrap().contains("encoder exploded"));
    }

    #[test]
    fn test_pipeline_errors_map_to_status() {
        let not_found: ApiError = PipelineError::UnknownTransform("captions".to_string()).into();
        assert_eq!(not_found.status_code(), StatusCode::NOT_FOUND);

        let bad: ApiError = PipelineError::config("batch size must be at least 1").into();
        assert_eq!(bad.status_code(), StatusCode::BAD_REQUEST);

        let internal: ApiError = PipelineError::NoSurvivingUnits { total: 3 }.into();
        assert_eq!(internal.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(internal.to_string().contains("0/3"));
    }

    #[tokio::test]
    async fn test_processors_listed_by_name() {
        let Json(processors) = list_processors_handler().await;
        let names: Vec<&str> = processors.iter().map(|p| p.name).collect();
        assert_eq!(names, vec!["bg_remover", "noise_reduction", "color_grading"]);
    }

    #[tokio::test]
    async fn test_events_for_unknown_job() {
        let result = job_events_handler(Path("missing-job".to_string())).await;
        assert!(matches!(result, Err(ApiError::NotFound(_))));
    }
}
