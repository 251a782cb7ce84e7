use crate::error::{PipelineError, PipelineResult};
use crate::pipeline::session::{AudioPolicy, TransformKind};
use crate::pipeline::types::{DEFAULT_BATCH_SIZE, DEFAULT_WORKERS, MAX_WORKERS};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};

pub const FRAMES_DIR: &str = "frames";
pub const PROCESSED_FRAMES_DIR: &str = "processed_frames";

/// Per-job pipeline settings. Validated before any extraction work starts.
#[derive(Debug, Clone, Serialize)]
pub struct JobConfig {
    pub kind: TransformKind,
    /// Target frame rate; `None` means use the rate detected from the input.
    pub fps: Option<f64>,
    pub workers: usize,
    pub batch_size: usize,
}

impl JobConfig {
    pub fn new(kind: TransformKind) -> Self {
        Self {
            kind,
            fps: None,
            workers: DEFAULT_WORKERS,
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }

    /// Build a config from a processor name and optional overrides.
    pub fn from_request(
        processor: &str,
        fps: Option<f64>,
        workers: Option<usize>,
        batch_size: Option<usize>,
    ) -> PipelineResult<Self> {
        let kind: TransformKind = processor.parse()?;
        let mut config = Self::new(kind);
        config.fps = fps;
        if let Some(workers) = workers {
            config.workers = workers;
        }
        if let Some(batch_size) = batch_size {
            config.batch_size = batch_size;
        }
        config.validate()?;
        Ok(config)
    }

    pub fn with_fps(mut self, fps: f64) -> Self {
        self.fps = Some(fps);
        self
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn audio_policy(&self) -> AudioPolicy {
        self.kind.audio_policy()
    }

    pub fn validate(&self) -> PipelineResult<()> {
        if self.workers == 0 || self.workers > MAX_WORKERS {
            return Err(PipelineError::config(format!(
                "worker count must be between 1 and {}, got {}",
                MAX_WORKERS, self.workers
            )));
        }
        if self.batch_size == 0 {
            return Err(PipelineError::config("batch size must be at least 1"));
        }
        if let Some(fps) = self.fps {
            if !fps.is_finite() || fps <= 0.0 {
                return Err(PipelineError::config(format!(
                    "frame rate must be a positive number, got {}",
                    fps
                )));
            }
        }
        Ok(())
    }
}

/// One pipeline invocation. Everything a stage needs is carried here; there is
/// no process-wide "current job".
#[derive(Debug, Clone, Serialize)]
pub struct Job {
    pub id: String,
    pub input: PathBuf,
    pub output: PathBuf,
    /// Unique per job so concurrent jobs never share scratch files.
    pub scratch_root: PathBuf,
    pub config: JobConfig,
    pub created_at: DateTime<Utc>,
}

impl Job {
    /// Create a job with a generated id whose scratch root lives under `work_root`.
    pub fn new(
        input: impl Into<PathBuf>,
        output: impl Into<PathBuf>,
        work_root: &Path,
        config: JobConfig,
    ) -> Self {
        let id = uuid::Uuid::new_v4().to_string();
        let scratch_root = work_root.join(&id);
        Self::with_id(id, input, output, scratch_root, config)
    }

    pub fn with_id(
        id: String,
        input: impl Into<PathBuf>,
        output: impl Into<PathBuf>,
        scratch_root: PathBuf,
        config: JobConfig,
    ) -> Self {
        Self {
            id,
            input: input.into(),
            output: output.into(),
            scratch_root,
            config,
            created_at: Utc::now(),
        }
    }

    pub fn frames_dir(&self) -> PathBuf {
        self.scratch_root.join(FRAMES_DIR)
    }

    pub fn processed_frames_dir(&self) -> PathBuf {
        self.scratch_root.join(PROCESSED_FRAMES_DIR)
    }
}

/// Scoped ownership of a job's two scratch directories. Both are created empty
/// on acquisition and removed when the guard drops, on every exit path.
#[derive(Debug)]
pub struct ScratchDirs {
    root: PathBuf,
    pub frames: PathBuf,
    pub processed: PathBuf,
}

impl ScratchDirs {
    pub fn create(job: &Job) -> PipelineResult<Self> {
        let dirs = Self {
            root: job.scratch_root.clone(),
            frames: job.frames_dir(),
            processed: job.processed_frames_dir(),
        };
        // From here on Drop owns cleanup, even if the second mkdir fails.
        fresh_dir(&dirs.frames)?;
        fresh_dir(&dirs.processed)?;
        Ok(dirs)
    }
}

impl Drop for ScratchDirs {
    fn drop(&mut self) {
        for dir in [&self.frames, &self.processed] {
            if dir.exists() {
                if let Err(e) = fs::remove_dir_all(dir) {
                    tracing::warn!("Failed to remove scratch dir {}: {}", dir.display(), e);
                }
            }
        }
        // Only removes the root if nothing else (e.g. an upload) lives there.
        let _ = fs::remove_dir(&self.root);
    }
}

fn fresh_dir(dir: &Path) -> PipelineResult<()> {
    if dir.exists() {
        tracing::warn!("Clearing stale scratch dir {}", dir.display());
        fs::remove_dir_all(dir)?;
    }
    fs::create_dir_all(dir)?;
    Ok(())
}
