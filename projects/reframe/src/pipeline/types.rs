use crate::pipeline::session::TransformKind;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::RwLock;

/// Hard cap on pool size, independent of host CPU count. Each worker holds its
/// own session in memory.
pub const MAX_WORKERS: usize = 8;
pub const DEFAULT_WORKERS: usize = 4;
pub const DEFAULT_BATCH_SIZE: usize = 10;

pub const FRAME_PREFIX: &str = "frame_";
pub const FRAME_EXTENSION: &str = "png";
/// printf-style pattern handed to the codec tool; must agree with `frame_file_name`.
pub const FRAME_PATTERN: &str = "frame_%06d.png";
pub const AUDIO_FILE_NAME: &str = "audio.wav";

/// File name of the frame unit with the given 1-based ordinal.
pub fn frame_file_name(index: usize) -> String {
    format!("{}{:06}.{}", FRAME_PREFIX, index, FRAME_EXTENSION)
}

/// Ordinal encoded in a frame unit file name, if it is one.
pub fn frame_index(name: &str) -> Option<usize> {
    name.strip_prefix(FRAME_PREFIX)?
        .strip_suffix(FRAME_EXTENSION)?
        .strip_suffix('.')?
        .parse()
        .ok()
}

/// A contiguous slice of frame units handed to one worker in one call.
/// Serialized as-is to worker processes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchRequest {
    pub batch_index: usize,
    pub kind: TransformKind,
    pub input_dir: PathBuf,
    pub output_dir: PathBuf,
    pub units: Vec<String>,
}

impl BatchRequest {
    pub fn input_path(&self, unit: &str) -> PathBuf {
        self.input_dir.join(unit)
    }

    pub fn output_path(&self, unit: &str) -> PathBuf {
        self.output_dir.join(unit)
    }
}

/// Outcome of transforming one unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TransformResult {
    Transformed { unit: String, output: PathBuf },
    Failed { unit: String, error: String },
}

impl TransformResult {
    pub fn unit(&self) -> &str {
        match self {
            TransformResult::Transformed { unit, .. } | TransformResult::Failed { unit, .. } => {
                unit
            }
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, TransformResult::Transformed { .. })
    }

    pub fn output(&self) -> Option<&Path> {
        match self {
            TransformResult::Transformed { output, .. } => Some(output),
            TransformResult::Failed { .. } => None,
        }
    }
}

/// Per-unit results for one batch, in the batch's unit order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchReport {
    pub batch_index: usize,
    pub results: Vec<TransformResult>,
}

impl BatchReport {
    /// Report for a batch where nothing could run, e.g. a worker that died.
    pub fn all_failed(request: &BatchRequest, error: &str) -> Self {
        Self {
            batch_index: request.batch_index,
            results: request
                .units
                .iter()
                .map(|unit| TransformResult::Failed {
                    unit: unit.clone(),
                    error: error.to_string(),
                })
                .collect(),
        }
    }

    pub fn succeeded(&self) -> usize {
        self.results.iter().filter(|r| r.is_success()).count()
    }

    pub fn failed(&self) -> impl Iterator<Item = &TransformResult> {
        self.results.iter().filter(|r| !r.is_success())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStage {
    Pending,
    Extracting,
    Transforming,
    Verifying,
    Reassembling,
    Done,
    Failed,
}

impl JobStage {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStage::Done | JobStage::Failed)
    }
}

/// Progress snapshot served to the API.
#[derive(Debug, Clone, Serialize)]
pub struct ProgressSnapshot {
    pub job_id: String,
    pub processor: String,
    pub stage: JobStage,
    pub total_units: usize,
    pub processed_units: usize,
    pub failed_units: usize,
    pub elapsed_ms: u128,
    pub error: Option<String>,
}

/// Processing state shared between the orchestrator, the pool and observers.
#[derive(Debug)]
pub struct ProcessingState {
    pub job_id: String,
    pub kind: TransformKind,
    pub stage: RwLock<JobStage>,
    pub total_units: AtomicUsize,
    pub processed_units: AtomicUsize,
    pub failed_units: AtomicUsize,
    pub is_active: AtomicBool,
    pub error: RwLock<Option<String>>,
    pub start_time: std::time::Instant,
}

impl ProcessingState {
    pub fn new(job_id: String, kind: TransformKind) -> Self {
        Self {
            job_id,
            kind,
            stage: RwLock::new(JobStage::Pending),
            total_units: AtomicUsize::new(0),
            processed_units: AtomicUsize::new(0),
            failed_units: AtomicUsize::new(0),
            is_active: AtomicBool::new(true),
            error: RwLock::new(None),
            start_time: std::time::Instant::now(),
        }
    }

    pub fn stage(&self) -> JobStage {
        self.stage.read().map(|s| *s).unwrap_or(JobStage::Failed)
    }

    pub fn set_stage(&self, stage: JobStage) {
        if let Ok(mut current) = self.stage.write() {
            tracing::debug!("Job {}: {:?} -> {:?}", self.job_id, *current, stage);
            *current = stage;
        }
        if stage.is_terminal() {
            self.is_active.store(false, Ordering::Relaxed);
        }
    }

    pub fn fail(&self, message: String) {
        if let Ok(mut error) = self.error.write() {
            *error = Some(message);
        }
        self.set_stage(JobStage::Failed);
    }

    /// Count the outcome of one finished batch.
    pub fn record_batch(&self, report: &BatchReport) {
        let succeeded = report.succeeded();
        let failed = report.results.len() - succeeded;
        self.processed_units.fetch_add(succeeded, Ordering::Relaxed);
        self.failed_units.fetch_add(failed, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        ProgressSnapshot {
            job_id: self.job_id.clone(),
            processor: self.kind.processor_name().to_string(),
            stage: self.stage(),
            total_units: self.total_units.load(Ordering::Relaxed),
            processed_units: self.processed_units.load(Ordering::Relaxed),
            failed_units: self.failed_units.load(Ordering::Relaxed),
            elapsed_ms: self.start_time.elapsed().as_millis(),
            error: self.error.read().ok().and_then(|e| e.clone()),
        }
    }
}
