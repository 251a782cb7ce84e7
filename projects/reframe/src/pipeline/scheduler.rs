// Batch scheduler: partitions units into batches and drains them through a fixed pool

use crate::error::{PipelineError, PipelineResult};
use crate::pipeline::executor::BatchExecutor;
use crate::pipeline::session::TransformKind;
use crate::pipeline::types::{BatchReport, BatchRequest, ProcessingState, MAX_WORKERS};
use crossbeam::channel;
use std::panic::{self, AssertUnwindSafe};
use std::path::Path;

/// Split the ordered units into contiguous batches of at most `batch_size`.
pub fn plan_batches(
    units: &[String],
    batch_size: usize,
    kind: TransformKind,
    input_dir: &Path,
    output_dir: &Path,
) -> Vec<BatchRequest> {
    units
        .chunks(batch_size.max(1))
        .enumerate()
        .map(|(batch_index, chunk)| BatchRequest {
            batch_index,
            kind,
            input_dir: input_dir.to_path_buf(),
            output_dir: output_dir.to_path_buf(),
            units: chunk.to_vec(),
        })
        .collect()
}

/// Run every batch on a pool of `workers` threads and block until all have
/// reported. Batches are queued in forward order; reports come back sorted by
/// batch index. A failing batch never stops the others.
pub fn run_batches(
    batches: Vec<BatchRequest>,
    workers: usize,
    executor: &dyn BatchExecutor,
    state: &ProcessingState,
) -> PipelineResult<Vec<BatchReport>> {
    let total_batches = batches.len();
    let workers = workers.clamp(1, MAX_WORKERS).min(total_batches.max(1));

    let (tx_b, rx_b) = channel::unbounded::<BatchRequest>();
    for batch in batches {
        // Receiver is alive, send cannot fail.
        let _ = tx_b.send(batch);
    }
    drop(tx_b);

    let (tx_r, rx_r) = channel::unbounded::<BatchReport>();

    let reports = crossbeam::scope(|scope| {
        for worker_id in 0..workers {
            let rx_b = rx_b.clone();
            let tx_r = tx_r.clone();
            scope.spawn(move |_| {
                tracing::debug!("Pool worker {} started", worker_id);
                for request in rx_b.iter() {
                    let report = panic::catch_unwind(AssertUnwindSafe(|| executor.execute(&request)))
                        .unwrap_or_else(|_| {
                            tracing::error!(
                                "Pool worker {} panicked on batch {}",
                                worker_id,
                                request.batch_index
                            );
                            BatchReport::all_failed(&request, "worker panicked")
                        });
                    if tx_r.send(report).is_err() {
                        break;
                    }
                }
                tracing::debug!("Pool worker {} finished", worker_id);
            });
        }
        drop(tx_r);

        let mut reports = Vec::with_capacity(total_batches);
        for report in rx_r.iter() {
            state.record_batch(&report);
            let failed = report.results.len() - report.succeeded();
            if failed > 0 {
                tracing::warn!(
                    "Batch {}: {} of {} units failed",
                    report.batch_index,
                    failed,
                    report.results.len()
                );
            }
            reports.push(report);
        }
        reports
    })
    .map_err(|_| PipelineError::Worker("batch pool panicked".to_string()))?;

    let mut reports = reports;
    reports.sort_by_key(|r| r.batch_index);
    Ok(reports)
}
