// Unit extractor: splits the input video into frame units (and the audio track)

use crate::error::{PipelineError, PipelineResult};
use crate::pipeline::session::AudioPolicy;
use crate::pipeline::types::{frame_index, AUDIO_FILE_NAME};
use crate::run_context::{Job, ScratchDirs};
use crate::video::{ExtractRequest, MediaCodec, MediaInfo};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Result of extraction: ordered frame unit names plus the optional audio unit.
#[derive(Debug, Clone)]
pub struct Extraction {
    pub units: Vec<String>,
    pub audio: Option<PathBuf>,
    pub fps: f64,
    pub info: MediaInfo,
}

/// Extract all units for `job` into the (already fresh) frames directory.
/// Fails if the input is missing or no frames come out.
pub fn extract_units(
    codec: &dyn MediaCodec,
    job: &Job,
    dirs: &ScratchDirs,
) -> PipelineResult<Extraction> {
    if !job.input.is_file() {
        return Err(PipelineError::InputNotFound(job.input.clone()));
    }

    let info = codec.probe(&job.input)?;
    let fps = job.config.fps.unwrap_or(info.fps);

    let wants_audio = info.has_audio && job.config.audio_policy() != AudioPolicy::Drop;
    let audio_output = wants_audio.then(|| dirs.frames.join(AUDIO_FILE_NAME));

    tracing::info!(
        "Job {}: extracting {} at {:.3} fps (source {:.3} fps, audio: {})",
        job.id,
        job.input.display(),
        fps,
        info.fps,
        audio_output.is_some()
    );

    codec.extract(&ExtractRequest {
        input: job.input.clone(),
        frames_dir: dirs.frames.clone(),
        fps,
        audio_output: audio_output.clone(),
    })?;

    let units = list_units(&dirs.frames)?;
    if units.is_empty() {
        return Err(PipelineError::NoFramesExtracted(job.input.clone()));
    }

    let audio = audio_output.filter(|path| path.is_file());
    if wants_audio && audio.is_none() {
        tracing::warn!("Job {}: audio track expected but not extracted", job.id);
    }

    tracing::info!("Job {}: extracted {} frames", job.id, units.len());

    Ok(Extraction {
        units,
        audio,
        fps,
        info,
    })
}

/// Frame unit file names in `dir`, sorted by ordinal. Other files are ignored.
pub fn list_units(dir: &Path) -> PipelineResult<Vec<String>> {
    let mut units = Vec::new();
    for entry in WalkDir::new(dir).min_depth(1).max_depth(1) {
        let entry = entry.map_err(std::io::Error::from)?;
        if !entry.file_type().is_file() {
            continue;
        }
        if let Some(name) = entry.file_name().to_str() {
            if frame_index(name).is_some() {
                units.push(name.to_string());
            }
        }
    }
    units.sort_by_key(|name| frame_index(name));
    Ok(units)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::types::frame_file_name;
    use std::fs;

    #[test]
    fn test_list_units_sorted_and_filtered() {
        let dir = tempfile::tempdir().unwrap();
        for i in [12, 3, 1, 1_000_000] {
            fs::write(dir.path().join(frame_file_name(i)), b"x").unwrap();
        }
        fs::write(dir.path().join(AUDIO_FILE_NAME), b"x").unwrap();
        fs::write(dir.path().join("frames.ffconcat"), b"x").unwrap();
        fs::create_dir(dir.path().join("frame_000099.png")).unwrap();

        let units = list_units(dir.path()).unwrap();
        assert_eq!(
            units,
            vec![
                "frame_000001.png",
                "frame_000003.png",
                "frame_000012.png",
                "frame_1000000.png"
            ]
        );
    }

    #[test]
    fn test_list_units_missing_dir_is_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(list_units(&dir.path().join("nope")).is_err());
    }
}
