// Pipeline orchestrator: runs one job through extract -> transform -> reassemble
//
// Owns the scratch directory lifetime for the job and tracks progress in the
// job registry so observers (CLI progress bar, SSE stream) can follow along.

pub use crate::pipeline::types::ProcessingState;
use crate::error::{PipelineError, PipelineResult};
use crate::pipeline::audio::process_audio;
use crate::pipeline::executor::BatchExecutor;
use crate::pipeline::extract::extract_units;
use crate::pipeline::reassemble::{reassemble, surviving_units};
use crate::pipeline::scheduler::{plan_batches, run_batches};
use crate::pipeline::types::{JobStage, ProgressSnapshot};
use crate::run_artifacts::JobReport;
use crate::run_context::{Job, ScratchDirs};
use crate::video::MediaCodec;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::atomic::Ordering;
use std::sync::{Arc, RwLock};

/// Finished jobs kept around for `/jobs` before the oldest are dropped.
const MAX_RETAINED_JOBS: usize = 64;

// Global registry of known jobs
lazy_static::lazy_static! {
    static ref JOB_REGISTRY: RwLock<HashMap<String, Arc<ProcessingState>>> =
        RwLock::new(HashMap::new());
}

pub fn register_job(state: Arc<ProcessingState>) {
    tracing::info!("Registering job {}", state.job_id);
    if let Ok(mut registry) = JOB_REGISTRY.write() {
        prune_finished(&mut registry);
        registry.insert(state.job_id.clone(), state);
    }
}

pub fn unregister_job(job_id: &str) {
    if let Ok(mut registry) = JOB_REGISTRY.write() {
        registry.remove(job_id);
    }
}

pub fn get_processing_state(job_id: &str) -> Option<Arc<ProcessingState>> {
    JOB_REGISTRY.read().ok()?.get(job_id).cloned()
}

/// Snapshots of every registered job, oldest first.
pub fn list_processing_states() -> Vec<ProgressSnapshot> {
    let Ok(registry) = JOB_REGISTRY.read() else {
        return Vec::new();
    };
    let mut states: Vec<&Arc<ProcessingState>> = registry.values().collect();
    states.sort_by_key(|s| s.start_time);
    states.iter().map(|s| s.snapshot()).collect()
}

fn prune_finished(registry: &mut HashMap<String, Arc<ProcessingState>>) {
    if registry.len() < MAX_RETAINED_JOBS {
        return;
    }
    let mut finished: Vec<(std::time::Instant, String)> = registry
        .values()
        .filter(|s| !s.is_active.load(Ordering::Relaxed))
        .map(|s| (s.start_time, s.job_id.clone()))
        .collect();
    finished.sort();
    let excess = registry.len() + 1 - MAX_RETAINED_JOBS;
    for (_, id) in finished.into_iter().take(excess) {
        registry.remove(&id);
    }
}

/// Run `job` to completion on the calling thread.
///
/// The scratch directories exist only for the duration of this call: they are
/// removed whether the job succeeds, fails, or panics out of a stage. `state`
/// ends in `Done` or `Failed`.
pub fn run_job(
    job: &Job,
    codec: &dyn MediaCodec,
    executor: &dyn BatchExecutor,
    state: &ProcessingState,
) -> PipelineResult<JobReport> {
    match execute_stages(job, codec, executor, state) {
        Ok(report) => {
            state.set_stage(JobStage::Done);
            tracing::info!("Job {}: {}", job.id, report.summary());
            Ok(report)
        }
        Err(e) => {
            tracing::error!("Job {} failed: {}", job.id, e);
            state.fail(e.to_string());
            Err(e)
        }
    }
}

fn execute_stages(
    job: &Job,
    codec: &dyn MediaCodec,
    executor: &dyn BatchExecutor,
    state: &ProcessingState,
) -> PipelineResult<JobReport> {
    // Nothing touches the filesystem until the settings are known good.
    job.config.validate()?;

    state.set_stage(JobStage::Extracting);
    let dirs = ScratchDirs::create(job)?;
    let extraction = extract_units(codec, job, &dirs)?;
    let total = extraction.units.len();
    state.total_units.store(total, Ordering::Relaxed);

    state.set_stage(JobStage::Transforming);
    let batches = plan_batches(
        &extraction.units,
        job.config.batch_size,
        job.config.kind,
        &dirs.frames,
        &dirs.processed,
    );
    tracing::info!(
        "Job {}: {} frames ({}x{}) in {} batches of up to {} on {} workers ({})",
        job.id,
        total,
        extraction.info.width,
        extraction.info.height,
        batches.len(),
        job.config.batch_size,
        job.config.workers,
        job.config.kind
    );
    let reports = run_batches(batches, job.config.workers, executor, state)?;

    let failed_units: Vec<String> = reports
        .iter()
        .flat_map(|r| r.failed().map(|f| f.unit().to_string()))
        .collect();
    let processed = total - failed_units.len();
    tracing::info!("Job {}: processed {}/{} frames", job.id, processed, total);
    if !failed_units.is_empty() {
        tracing::warn!("Job {}: failed frames: {}", job.id, failed_units.join(", "));
    }

    let audio = process_audio(
        codec,
        job.config.audio_policy(),
        extraction.audio.as_deref(),
        &dirs.processed,
    );

    state.set_stage(JobStage::Verifying);
    let survivors = surviving_units(&dirs.processed)?.len();
    if survivors == 0 {
        return Err(PipelineError::NoSurvivingUnits { total });
    }
    if survivors != processed {
        tracing::warn!(
            "Job {}: {} frames reported processed but {} found on disk",
            job.id,
            processed,
            survivors
        );
    }

    state.set_stage(JobStage::Reassembling);
    let frames_encoded = reassemble(
        codec,
        &dirs.processed,
        extraction.fps,
        audio.as_deref(),
        &job.output,
        total,
    )?;

    drop(dirs);

    Ok(JobReport {
        job_id: job.id.clone(),
        processor: job.config.kind.processor_name().to_string(),
        stage: JobStage::Done,
        total_units: total,
        processed_units: processed,
        failed_units,
        fps: Some(extraction.fps),
        frames_encoded,
        output: Some(job.output.clone()),
        audio: audio.is_some(),
        elapsed_ms: state.start_time.elapsed().as_millis(),
        error: None,
        created_at: job.created_at,
        finished_at: Utc::now(),
    })
}
