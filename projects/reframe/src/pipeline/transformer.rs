use crate::error::{PipelineError, PipelineResult};
use crate::pipeline::session::TransformSession;
use crate::pipeline::types::{BatchReport, BatchRequest, TransformResult};
use image::ImageFormat;
use std::fs;
use std::panic::{self, AssertUnwindSafe};
use std::path::PathBuf;
use std::time::Instant;

/// Transform every unit of one batch with a single freshly opened session.
///
/// Units are processed in order. A failing unit is logged, recorded and
/// skipped; the rest of the batch still runs. If the session cannot be opened
/// at all, every unit of the batch is reported as failed.
pub fn transform_batch(request: &BatchRequest) -> BatchReport {
    let start_inst = Instant::now();

    let mut session = match request.kind.open_session() {
        Ok(session) => session,
        Err(e) => {
            tracing::error!(
                "Batch {}: failed to open {} session: {}",
                request.batch_index,
                request.kind,
                e
            );
            return BatchReport::all_failed(request, &format!("session construction failed: {}", e));
        }
    };

    let results: Vec<TransformResult> = request
        .units
        .iter()
        .map(|unit| transform_unit(session.as_mut(), request, unit))
        .collect();

    let report = BatchReport {
        batch_index: request.batch_index,
        results,
    };

    let duration_ms = start_inst.elapsed().as_secs_f64() * 1000.0;
    tracing::debug!(
        "Batch {}: {}/{} units in {:.1} ms",
        request.batch_index,
        report.succeeded(),
        request.units.len(),
        duration_ms
    );

    report
}

fn transform_unit(
    session: &mut dyn TransformSession,
    request: &BatchRequest,
    unit: &str,
) -> TransformResult {
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| apply_unit(session, request, unit)))
        .unwrap_or_else(|_| Err(PipelineError::Worker("transform panicked".to_string())));

    match outcome {
        Ok(output) => TransformResult::Transformed {
            unit: unit.to_string(),
            output,
        },
        Err(e) => {
            tracing::warn!("Batch {}: failed to transform {}: {}", request.batch_index, unit, e);
            // A half-written output must not be picked up by reassembly.
            let partial = request.output_path(unit);
            if partial.exists() {
                let _ = fs::remove_file(&partial);
            }
            TransformResult::Failed {
                unit: unit.to_string(),
                error: e.to_string(),
            }
        }
    }
}

fn apply_unit(
    session: &mut dyn TransformSession,
    request: &BatchRequest,
    unit: &str,
) -> PipelineResult<PathBuf> {
    let frame = image::open(request.input_path(unit))?;
    let transformed = session.apply(frame)?;
    let output = request.output_path(unit);
    transformed.save_with_format(&output, ImageFormat::Png)?;
    Ok(output)
}
