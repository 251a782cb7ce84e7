// Job artifact definitions
//
// The report persisted next to a job's output once the pipeline finishes,
// successfully or not.

use crate::error::{PipelineError, PipelineResult};
use crate::pipeline::types::{JobStage, ProcessingState};
use crate::run_context::Job;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::Ordering;

pub const REPORT_FILE_NAME: &str = "report.json";

/// Final outcome of one job.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct JobReport {
    pub job_id: String,
    pub processor: String,
    pub stage: JobStage,
    pub total_units: usize,
    pub processed_units: usize,
    /// Names of the units that failed, in frame order.
    pub failed_units: Vec<String>,
    pub fps: Option<f64>,
    pub frames_encoded: usize,
    pub output: Option<PathBuf>,
    pub audio: bool,
    pub elapsed_ms: u128,
    #[serde(default)]
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl JobReport {
    /// Report for a job that stopped with `err`, filled from whatever progress
    /// `state` had recorded.
    pub fn failed(job: &Job, state: &ProcessingState, err: &PipelineError) -> Self {
        Self {
            job_id: job.id.clone(),
            processor: job.config.kind.processor_name().to_string(),
            stage: JobStage::Failed,
            total_units: state.total_units.load(Ordering::Relaxed),
            processed_units: state.processed_units.load(Ordering::Relaxed),
            failed_units: Vec::new(),
            fps: None,
            frames_encoded: 0,
            output: None,
            audio: false,
            elapsed_ms: state.start_time.elapsed().as_millis(),
            error: Some(err.to_string()),
            created_at: job.created_at,
            finished_at: Utc::now(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.stage == JobStage::Done
    }

    /// One-line human summary, e.g. for the CLI.
    pub fn summary(&self) -> String {
        match &self.error {
            Some(error) => format!("{} failed: {}", self.processor, error),
            None => format!(
                "{}: processed {}/{} frames ({} failed) in {:.1}s",
                self.processor,
                self.processed_units,
                self.total_units,
                self.failed_units.len(),
                self.elapsed_ms as f64 / 1000.0
            ),
        }
    }

    /// Write the report as pretty JSON into `dir`.
    pub fn write_to(&self, dir: &Path) -> PipelineResult<PathBuf> {
        fs::create_dir_all(dir)?;
        let path = dir.join(REPORT_FILE_NAME);
        fs::write(&path, serde_json::to_string_pretty(self)?)?;
        Ok(path)
    }

    pub fn read_from(dir: &Path) -> PipelineResult<Self> {
        let content = fs::read_to_string(dir.join(REPORT_FILE_NAME))?;
        Ok(serde_json::from_str(&content)?)
    }
}
