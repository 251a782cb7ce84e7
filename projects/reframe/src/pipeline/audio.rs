use crate::pipeline::session::AudioPolicy;
use crate::pipeline::types::AUDIO_FILE_NAME;
use crate::video::MediaCodec;
use std::path::{Path, PathBuf};

/// Decide which audio track (if any) goes into the output. A denoised track
/// is written to `output_dir` under the same name as the extracted one.
///
/// Audio problems never fail a job: if denoising fails the original track is
/// kept and a warning is logged.
pub fn process_audio(
    codec: &dyn MediaCodec,
    policy: AudioPolicy,
    extracted: Option<&Path>,
    output_dir: &Path,
) -> Option<PathBuf> {
    let source = extracted?;
    match policy {
        AudioPolicy::Drop => None,
        AudioPolicy::Passthrough => Some(source.to_path_buf()),
        AudioPolicy::Denoise => {
            let denoised = output_dir.join(AUDIO_FILE_NAME);
            match codec.denoise_audio(source, &denoised) {
                Ok(()) if denoised.is_file() => Some(denoised),
                Ok(()) => {
                    tracing::warn!("Audio denoise produced no output, keeping original track");
                    Some(source.to_path_buf())
                }
                Err(e) => {
                    tracing::warn!("Audio denoise failed, keeping original track: {}", e);
                    Some(source.to_path_buf())
                }
            }
        }
    }
}
