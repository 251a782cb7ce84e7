use crate::pipeline::executor::WorkerBackend;
use crate::pipeline::types::{DEFAULT_BATCH_SIZE, DEFAULT_WORKERS};
use clap::{Parser, Subcommand};
use std::net::IpAddr;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the HTTP server
    Serve(ServeArgs),
    /// Process one video file locally
    Run(RunArgs),
    /// Internal: transform one batch read from stdin, report on stdout
    #[command(name = "transform-batch", hide = true)]
    TransformBatch,
}

/// Pipeline settings shared by `serve` and `run`.
#[derive(clap::Args, Debug, Clone)]
pub struct PipelineArgs {
    /// Parallel workers per job (1-8)
    #[arg(long, env = "REFRAME_WORKERS", default_value_t = DEFAULT_WORKERS)]
    pub workers: usize,

    /// Frames per batch
    #[arg(long, env = "REFRAME_BATCH_SIZE", default_value_t = DEFAULT_BATCH_SIZE)]
    pub batch_size: usize,

    /// Target frame rate; detected from the input when omitted
    #[arg(long, env = "REFRAME_FPS")]
    pub fps: Option<f64>,

    /// Where batches run
    #[arg(long, value_enum, env = "REFRAME_BACKEND", default_value = "process")]
    pub backend: WorkerBackend,

    /// ffmpeg binary
    #[arg(long, env = "REFRAME_FFMPEG", default_value = "ffmpeg")]
    pub ffmpeg: String,

    /// ffprobe binary
    #[arg(long, env = "REFRAME_FFPROBE", default_value = "ffprobe")]
    pub ffprobe: String,
}

#[derive(clap::Args, Debug, Clone)]
pub struct ServeArgs {
    /// Host to bind to
    #[arg(long, default_value = "127.0.0.1")]
    pub host: IpAddr,

    /// Port to bind to
    #[arg(long, default_value_t = 12206)]
    pub port: u16,

    /// Root directory for uploads, scratch space and results
    #[arg(long, env = "REFRAME_WORK_ROOT")]
    pub work_root: PathBuf,

    /// Jobs allowed to run at the same time
    #[arg(long, env = "REFRAME_MAX_CONCURRENT_JOBS", default_value_t = 2)]
    pub max_concurrent_jobs: usize,

    /// Largest accepted upload in MiB
    #[arg(long, env = "REFRAME_MAX_UPLOAD_MB", default_value_t = 2048)]
    pub max_upload_mb: usize,

    #[command(flatten)]
    pub pipeline: PipelineArgs,
}

#[derive(clap::Args, Debug, Clone)]
pub struct RunArgs {
    /// Input video
    #[arg(long, short)]
    pub input: PathBuf,

    /// Output video (mp4)
    #[arg(long, short)]
    pub output: PathBuf,

    /// Processor name, e.g. bg_remover, noise_reduction, color_grading
    #[arg(long, short)]
    pub processor: String,

    /// Scratch root; defaults to a directory next to the output
    #[arg(long, env = "REFRAME_WORK_ROOT")]
    pub work_root: Option<PathBuf>,

    #[command(flatten)]
    pub pipeline: PipelineArgs,
}

impl Args {
    pub fn parse_args() -> Self {
        Self::parse()
    }
}
