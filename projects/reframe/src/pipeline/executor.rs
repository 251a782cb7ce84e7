// Batch executors: where a batch actually runs (worker thread or worker process)

use crate::error::{PipelineError, PipelineResult};
use crate::pipeline::transformer::transform_batch;
use crate::pipeline::types::{BatchReport, BatchRequest, TransformResult};
use std::io::{Read, Write};
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::sync::Arc;

/// CLI subcommand a worker process is started with.
pub const WORKER_SUBCOMMAND: &str = "transform-batch";

/// Runs one batch to completion. Never fails as a whole: anything that goes
/// wrong is folded into per-unit failures of the returned report.
pub trait BatchExecutor: Send + Sync {
    fn execute(&self, request: &BatchRequest) -> BatchReport;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum WorkerBackend {
    /// Every batch runs in a child process (crash isolation).
    Process,
    /// Every batch runs on a pool thread inside this process.
    Thread,
}

impl WorkerBackend {
    pub fn build(self) -> PipelineResult<Arc<dyn BatchExecutor>> {
        Ok(match self {
            WorkerBackend::Process => Arc::new(ProcessExecutor::current()?),
            WorkerBackend::Thread => Arc::new(ThreadExecutor),
        })
    }
}

/// In-process execution on the calling pool thread.
#[derive(Debug, Default, Clone, Copy)]
pub struct ThreadExecutor;

impl BatchExecutor for ThreadExecutor {
    fn execute(&self, request: &BatchRequest) -> BatchReport {
        transform_batch(request)
    }
}

/// Re-invokes an executable with `WORKER_SUBCOMMAND`; the batch goes in on
/// stdin and the report comes back on stdout, both as JSON.
#[derive(Debug, Clone)]
pub struct ProcessExecutor {
    exe: PathBuf,
}

impl ProcessExecutor {
    pub fn new(exe: impl Into<PathBuf>) -> Self {
        Self { exe: exe.into() }
    }

    /// Executor that spawns the currently running binary.
    pub fn current() -> PipelineResult<Self> {
        Ok(Self::new(std::env::current_exe()?))
    }

    fn run_child(&self, request: &BatchRequest) -> PipelineResult<BatchReport> {
        let mut child = Command::new(&self.exe)
            .arg(WORKER_SUBCOMMAND)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()?;

        {
            let mut stdin = child
                .stdin
                .take()
                .ok_or_else(|| PipelineError::Worker("worker stdin not captured".to_string()))?;
            serde_json::to_writer(&mut stdin, request)?;
            stdin.flush()?;
            // stdin drops here so the worker sees EOF
        }

        let output = child.wait_with_output()?;
        if !output.status.success() {
            return Err(PipelineError::Worker(format!(
                "worker process exited with {}",
                output.status
            )));
        }

        let report: BatchReport = serde_json::from_slice(&output.stdout)?;
        Ok(reconcile(request, report))
    }
}

impl BatchExecutor for ProcessExecutor {
    fn execute(&self, request: &BatchRequest) -> BatchReport {
        match self.run_child(request) {
            Ok(report) => report,
            Err(e) => {
                tracing::error!("Batch {}: worker process failed: {}", request.batch_index, e);
                BatchReport::all_failed(request, &e.to_string())
            }
        }
    }
}

/// Align a worker's report with what was asked: one result per requested unit,
/// in request order. Units the worker did not report on count as failed.
pub fn reconcile(request: &BatchRequest, mut report: BatchReport) -> BatchReport {
    let results = request
        .units
        .iter()
        .map(|unit| {
            match report.results.iter().position(|r| r.unit() == unit) {
                Some(pos) => report.results.swap_remove(pos),
                None => TransformResult::Failed {
                    unit: unit.clone(),
                    error: "no result reported by worker".to_string(),
                },
            }
        })
        .collect();

    BatchReport {
        batch_index: request.batch_index,
        results,
    }
}

/// Worker-process entry point: one batch request in, one report out.
pub fn run_worker<R: Read, W: Write>(reader: R, mut writer: W) -> PipelineResult<()> {
    let request: BatchRequest = serde_json::from_reader(reader)?;
    tracing::debug!(
        "Worker {}: batch {} with {} units",
        std::process::id(),
        request.batch_index,
        request.units.len()
    );
    let report = transform_batch(&request);
    serde_json::to_writer(&mut writer, &report)?;
    writer.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::session::TransformKind;
    use crate::pipeline::types::frame_file_name;
    use image::{Rgb, RgbImage};
    use std::io::Cursor;

    fn request_for(dir: &std::path::Path, units: Vec<String>) -> BatchRequest {
        BatchRequest {
            batch_index: 7,
            kind: TransformKind::ColorGrade,
            input_dir: dir.to_path_buf(),
            output_dir: dir.join("out"),
            units,
        }
    }

    #[test]
    fn test_reconcile_fills_missing_and_reorders() {
        let dir = tempfile::tempdir().unwrap();
        let units: Vec<String> = (1..=3).map(frame_file_name).collect();
        let request = request_for(dir.path(), units.clone());

        let report = BatchReport {
            batch_index: 99,
            results: vec![
                TransformResult::Transformed {
                    unit: units[2].clone(),
                    output: dir.path().join(&units[2]),
                },
                TransformResult::Transformed {
                    unit: units[0].clone(),
                    output: dir.path().join(&units[0]),
                },
                TransformResult::Transformed {
                    unit: "frame_000042.png".to_string(),
                    output: dir.path().join("frame_000042.png"),
                },
            ],
        };

        let reconciled = reconcile(&request, report);
        assert_eq!(reconciled.batch_index, 7);
        let order: Vec<&str> = reconciled.results.iter().map(|r| r.unit()).collect();
        assert_eq!(order, vec![units[0].as_str(), units[1].as_str(), units[2].as_str()]);
        assert!(!reconciled.results[1].is_success());
        assert_eq!(reconciled.succeeded(), 2);
    }

    #[test]
    fn test_run_worker_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("out")).unwrap();
        let units: Vec<String> = (1..=2).map(frame_file_name).collect();
        for unit in &units {
            RgbImage::from_pixel(4, 4, Rgb([10, 20, 30]))
                .save(dir.path().join(unit))
                .unwrap();
        }

        let request = request_for(dir.path(), units);
        let input = serde_json::to_vec(&request).unwrap();
        let mut output = Vec::new();
        run_worker(Cursor::new(input), &mut output).unwrap();

        let report: BatchReport = serde_json::from_slice(&output).unwrap();
        assert_eq!(report.batch_index, 7);
        assert_eq!(report.succeeded(), 2);
        assert!(dir.path().join("out").join(frame_file_name(1)).is_file());
    }

    #[test]
    fn test_run_worker_rejects_garbage() {
        let mut output = Vec::new();
        assert!(run_worker(Cursor::new(b"{not json".to_vec()), &mut output).is_err());
        assert!(output.is_empty());
    }

    #[test]
    fn test_process_executor_spawn_failure_fails_batch() {
        let dir = tempfile::tempdir().unwrap();
        let units: Vec<String> = (1..=3).map(frame_file_name).collect();
        let request = request_for(dir.path(), units);

        let executor = ProcessExecutor::new(dir.path().join("no-such-worker"));
        let report = executor.execute(&request);

        assert_eq!(report.batch_index, 7);
        assert_eq!(report.results.len(), 3);
        assert_eq!(report.succeeded(), 0);
    }

    /// Executable shell script standing in for the worker binary.
    #[cfg(unix)]
    fn worker_script(dir: &std::path::Path, body: &str) -> PathBuf {
        use std::os::unix::fs::PermissionsExt;

        let path = dir.join("worker.sh");
        std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    #[cfg(unix)]
    #[test]
    fn test_process_executor_nonzero_exit_fails_batch() {
        let dir = tempfile::tempdir().unwrap();
        let request = request_for(dir.path(), (1..=3).map(frame_file_name).collect());

        let report = ProcessExecutor::new("/bin/false").execute(&request);

        assert_eq!(report.batch_index, 7);
        assert_eq!(report.results.len(), 3);
        assert_eq!(report.succeeded(), 0);
    }

    #[cfg(unix)]
    #[test]
    fn test_process_executor_garbage_output_fails_batch() {
        let dir = tempfile::tempdir().unwrap();
        let request = request_for(dir.path(), (1..=3).map(frame_file_name).collect());
        let script = worker_script(dir.path(), "cat >/dev/null\necho 'segfault imminent'");

        let report = ProcessExecutor::new(script).execute(&request);

        assert_eq!(report.results.len(), 3);
        assert_eq!(report.succeeded(), 0);
    }

    #[cfg(unix)]
    #[test]
    fn test_process_executor_reads_child_report() {
        let dir = tempfile::tempdir().unwrap();
        let request = request_for(dir.path(), (1..=3).map(frame_file_name).collect());
        // Only answers for the first unit and only when started as a worker
        let script = worker_script(
            dir.path(),
            r#"[ "$1" = transform-batch ] || exit 3
grep -q frame_000003.png || exit 4
echo '{"batch_index":7,"results":[{"status":"transformed","unit":"frame_000001.png","output":"/x"}]}'"#,
        );

        let report = ProcessExecutor::new(script).execute(&request);

        assert_eq!(report.batch_index, 7);
        let order: Vec<&str> = report.results.iter().map(|r| r.unit()).collect();
        assert_eq!(order, vec!["frame_000001.png", "frame_000002.png", "frame_000003.png"]);
        assert_eq!(report.succeeded(), 1);
        assert_eq!(report.results[0].output(), Some(std::path::Path::new("/x")));
    }
}
