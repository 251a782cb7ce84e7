use crate::cli::{PipelineArgs, ServeArgs};
use crate::pipeline::executor::BatchExecutor;
use crate::video::ffmpeg_codec::FfmpegCodec;
use crate::web::api::{
    job_events_handler, list_jobs_handler, list_processors_handler, process_handler, root_handler,
};
use anyhow::{Context, Result};
use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};
use std::net::{SocketAddr, TcpListener};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

/// Shared by every request handler.
pub struct AppState {
    pub work_root: PathBuf,
    pub pipeline: PipelineArgs,
    pub codec: Arc<FfmpegCodec>,
    pub executor: Arc<dyn BatchExecutor>,
    /// Bounds how many jobs run at once; each job already runs its own pool.
    pub job_slots: Arc<Semaphore>,
}

pub fn build_router(state: Arc<AppState>, max_upload_bytes: usize) -> Router {
    Router::new()
        .route("/", get(root_handler))
        .route("/processors", get(list_processors_handler))
        .route("/process/:processor", post(process_handler))
        .route("/jobs", get(list_jobs_handler))
        .route("/jobs/:job_id/events", get(job_events_handler))
        .layer(DefaultBodyLimit::max(max_upload_bytes))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub async fn run_server(args: ServeArgs) -> Result<()> {
    let codec = FfmpegCodec::new(&args.pipeline.ffmpeg, &args.pipeline.ffprobe);
    codec.check_available()?;
    let executor = args.pipeline.backend.build()?;

    tokio::fs::create_dir_all(&args.work_root)
        .await
        .with_context(|| format!("Failed to create work root {}", args.work_root.display()))?;

    let state = Arc::new(AppState {
        work_root: args.work_root.clone(),
        pipeline: args.pipeline.clone(),
        codec: Arc::new(codec),
        executor,
        job_slots: Arc::new(Semaphore::new(args.max_concurrent_jobs.max(1))),
    });

    let mut current_port = args.port;
    let listener = loop {
        let addr = SocketAddr::new(args.host, current_port);
        match TcpListener::bind(addr) {
            Ok(listener) => {
                // Set non-blocking before registering with Tokio
                listener.set_nonblocking(true)?;
                info!("Successfully bound to {}", addr);
                break listener;
            }
            Err(e) => {
                warn!("Failed to bind to {}: {}. Trying next port...", addr, e);
                current_port = current_port.wrapping_add(1);
                if current_port == 0 {
                    return Err(anyhow::anyhow!("No available ports found"));
                }
            }
        }
    };

    let app = build_router(state, args.max_upload_mb * 1024 * 1024);

    let tokio_listener = tokio::net::TcpListener::from_std(listener)?;
    info!(
        "Reframe server started on http://{:?} (backend: {:?}, max concurrent jobs: {})",
        tokio_listener.local_addr()?,
        args.pipeline.backend,
        args.max_concurrent_jobs
    );

    axum::serve(tokio_listener, app).await?;

    Ok(())
}
