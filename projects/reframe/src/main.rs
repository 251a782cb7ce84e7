mod cli;
mod error;
mod pipeline;
mod run_artifacts;
mod run_context;
mod video;
mod web;

use anyhow::Result;
use cli::{Args, Command};
use pipeline::executor::run_worker;
use tracing_subscriber::EnvFilter;
use video::processor::process_video;
use web::server::run_server;

fn main() -> Result<()> {
    // Load environment variables from .env if present
    dotenvy::dotenv().ok();

    // Logs go to stderr; stdout carries the worker protocol and the CLI report
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse_args();

    match args.command {
        Command::Serve(serve) => {
            let runtime = tokio::runtime::Runtime::new()?;
            runtime.block_on(run_server(serve))?;
        }
        Command::Run(run) => {
            let report = process_video(run)?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Command::TransformBatch => {
            run_worker(std::io::stdin().lock(), std::io::stdout().lock())?;
        }
    }

    Ok(())
}
