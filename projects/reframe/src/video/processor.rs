// Local (CLI) processing of one video with a terminal progress bar

use crate::cli::RunArgs;
use crate::pipeline::orchestrator::{register_job, run_job};
use crate::pipeline::types::{JobStage, ProcessingState};
use crate::run_artifacts::JobReport;
use crate::run_context::{Job, JobConfig};
use crate::video::ffmpeg_codec::FfmpegCodec;
use anyhow::{Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

const POLL_INTERVAL: Duration = Duration::from_millis(100);

fn stage_message(stage: JobStage) -> &'static str {
    match stage {
        JobStage::Pending => "pending",
        JobStage::Extracting => "extracting frames",
        JobStage::Transforming => "transforming",
        JobStage::Verifying => "verifying",
        JobStage::Reassembling => "encoding",
        JobStage::Done => "done",
        JobStage::Failed => "failed",
    }
}

/// Run one job for the `run` subcommand and return its report. The pipeline
/// runs on its own thread; this thread only drives the progress bar.
pub fn process_video(args: RunArgs) -> Result<JobReport> {
    let pipeline = &args.pipeline;
    let config = JobConfig::from_request(
        &args.processor,
        pipeline.fps,
        Some(pipeline.workers),
        Some(pipeline.batch_size),
    )?;

    let codec = FfmpegCodec::new(&pipeline.ffmpeg, &pipeline.ffprobe);
    codec.check_available()?;
    let executor = pipeline.backend.build()?;

    let work_root = args
        .work_root
        .clone()
        .unwrap_or_else(|| std::env::temp_dir().join("reframe"));
    std::fs::create_dir_all(&work_root)
        .with_context(|| format!("Failed to create work root {}", work_root.display()))?;

    let job = Job::new(&args.input, &args.output, &work_root, config);
    let state = Arc::new(ProcessingState::new(job.id.clone(), job.config.kind));
    register_job(state.clone());

    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")?
            .progress_chars("#>-"),
    );

    let worker_state = state.clone();
    let handle = thread::spawn(move || {
        let result = run_job(&job, &codec, executor.as_ref(), &worker_state);
        (job, result)
    });

    while !handle.is_finished() {
        pb.set_length(state.total_units.load(Ordering::Relaxed) as u64);
        pb.set_position(
            (state.processed_units.load(Ordering::Relaxed)
                + state.failed_units.load(Ordering::Relaxed)) as u64,
        );
        pb.set_message(stage_message(state.stage()));
        thread::sleep(POLL_INTERVAL);
    }

    let (job, result) = handle
        .join()
        .map_err(|_| anyhow::anyhow!("Pipeline thread panicked"))?;

    match result {
        Ok(report) => {
            pb.finish_with_message(format!("done, {} failed", report.failed_units.len()));
            Ok(report)
        }
        Err(e) => {
            pb.abandon_with_message("failed");
            let report = JobReport::failed(&job, &state, &e);
            tracing::error!("{}", report.summary());
            Err(anyhow::Error::new(e).context(format!("Job {} failed", job.id)))
        }
    }
}
