pub mod ffmpeg;
pub mod ffmpeg_codec;
pub mod probe;
pub mod processor;

use crate::error::PipelineResult;
use serde::Serialize;
use std::path::{Path, PathBuf};

/// Stream facts needed before extraction.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct MediaInfo {
    pub fps: f64,
    pub has_audio: bool,
    pub width: u32,
    pub height: u32,
}

/// One extraction call: frames at `fps` into `frames_dir`, plus the audio
/// track when `audio_output` is set.
#[derive(Debug, Clone)]
pub struct ExtractRequest {
    pub input: PathBuf,
    pub frames_dir: PathBuf,
    pub fps: f64,
    pub audio_output: Option<PathBuf>,
}

/// One reassembly call. `frames` is already in presentation order.
#[derive(Debug, Clone)]
pub struct EncodeRequest {
    pub frames: Vec<PathBuf>,
    pub fps: f64,
    pub audio: Option<PathBuf>,
    pub output: PathBuf,
}

/// The external codec tool, seen as a black box. Every method is one process
/// invocation; a non-zero exit is an error.
pub trait MediaCodec: Send + Sync {
    fn probe(&self, input: &Path) -> PipelineResult<MediaInfo>;
    fn extract(&self, request: &ExtractRequest) -> PipelineResult<()>;
    fn denoise_audio(&self, input: &Path, output: &Path) -> PipelineResult<()>;
    fn encode(&self, request: &EncodeRequest) -> PipelineResult<()>;
}
