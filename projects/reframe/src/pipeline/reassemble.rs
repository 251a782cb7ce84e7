// Reassembler: one encode over every surviving processed unit

use crate::error::{PipelineError, PipelineResult};
use crate::pipeline::extract::list_units;
use crate::video::{EncodeRequest, MediaCodec};
use std::path::{Path, PathBuf};

/// Processed units present in `output_dir`, in frame order. Failed units leave
/// gaps; the survivors keep their relative order.
pub fn surviving_units(output_dir: &Path) -> PipelineResult<Vec<PathBuf>> {
    Ok(list_units(output_dir)?
        .into_iter()
        .map(|unit| output_dir.join(unit))
        .collect())
}

/// Encode the surviving units (plus optional audio) into `output` with a
/// single codec invocation. Returns the number of frames encoded.
pub fn reassemble(
    codec: &dyn MediaCodec,
    output_dir: &Path,
    fps: f64,
    audio: Option<&Path>,
    output: &Path,
    total_units: usize,
) -> PipelineResult<usize> {
    let frames = surviving_units(output_dir)?;
    if frames.is_empty() {
        return Err(PipelineError::NoSurvivingUnits { total: total_units });
    }

    let encoded = frames.len();
    if encoded < total_units {
        tracing::warn!(
            "Reassembling with {} of {} frames; {} missing",
            encoded,
            total_units,
            total_units - encoded
        );
    }

    codec.encode(&EncodeRequest {
        frames,
        fps,
        audio: audio.map(Path::to_path_buf),
        output: output.to_path_buf(),
    })?;

    if !output.is_file() {
        return Err(PipelineError::tool_failed(
            "encoder",
            format!("no output written to {}", output.display()),
            None,
            None,
        ));
    }

    tracing::info!("Wrote {} ({} frames at {:.3} fps)", output.display(), encoded, fps);
    Ok(encoded)
}
