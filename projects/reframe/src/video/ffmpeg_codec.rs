use super::ffmpeg::{format_rate, run_tool, FfmpegCommand};
use super::probe::{parse_probe_output, probe_args};
use super::{EncodeRequest, ExtractRequest, MediaCodec, MediaInfo};
use crate::error::{PipelineError, PipelineResult};
use crate::pipeline::types::FRAME_PATTERN;
use std::fs;
use std::path::{Path, PathBuf};

pub const CONCAT_LIST_NAME: &str = "frames.ffconcat";

/// Fixed output quality: H.264 `medium` preset at CRF 18, AAC audio.
pub const VIDEO_CODEC: &str = "libx264";
pub const VIDEO_PRESET: &str = "medium";
pub const VIDEO_CRF: u8 = 18;
pub const AUDIO_CODEC: &str = "aac";
/// FFT denoiser; the noise floor matches a typical speech recording.
pub const AUDIO_DENOISE_FILTER: &str = "afftdn=nf=-25";

/// `MediaCodec` backed by the `ffmpeg`/`ffprobe` binaries.
#[derive(Debug, Clone)]
pub struct FfmpegCodec {
    ffmpeg: String,
    ffprobe: String,
}

impl Default for FfmpegCodec {
    fn default() -> Self {
        Self::new("ffmpeg", "ffprobe")
    }
}

impl FfmpegCodec {
    pub fn new(ffmpeg: impl Into<String>, ffprobe: impl Into<String>) -> Self {
        Self {
            ffmpeg: ffmpeg.into(),
            ffprobe: ffprobe.into(),
        }
    }

    /// Fail early if either binary is missing from PATH.
    pub fn check_available(&self) -> PipelineResult<()> {
        for tool in [&self.ffmpeg, &self.ffprobe] {
            which::which(tool).map_err(|_| PipelineError::ToolNotFound(tool.clone()))?;
        }
        Ok(())
    }

    fn write_concat_list(&self, request: &EncodeRequest) -> PipelineResult<PathBuf> {
        let dir = request
            .frames
            .first()
            .and_then(|f| f.parent())
            .ok_or_else(|| PipelineError::Worker("no frames to encode".to_string()))?;
        let list_path = dir.join(CONCAT_LIST_NAME);
        fs::write(&list_path, concat_list(&request.frames, request.fps))?;
        Ok(list_path)
    }
}

impl MediaCodec for FfmpegCodec {
    fn probe(&self, input: &Path) -> PipelineResult<MediaInfo> {
        let output = run_tool(&self.ffprobe, &probe_args(&input.to_string_lossy()))?;
        parse_probe_output(&output.stdout)
    }

    fn extract(&self, request: &ExtractRequest) -> PipelineResult<()> {
        let mut cmd = FfmpegCommand::new(&self.ffmpeg)
            .input(&request.input)
            .map("0:v:0")
            .video_filter(format!("fps={}", format_rate(request.fps)))
            .args(["-start_number", "1"])
            .output(request.frames_dir.join(FRAME_PATTERN));

        if let Some(audio) = &request.audio_output {
            cmd = cmd.map("0:a:0").audio_codec("pcm_s16le").output(audio);
        }

        cmd.run()?;
        Ok(())
    }

    fn denoise_audio(&self, input: &Path, output: &Path) -> PipelineResult<()> {
        FfmpegCommand::new(&self.ffmpeg)
            .input(input)
            .audio_filter(AUDIO_DENOISE_FILTER)
            .audio_codec("pcm_s16le")
            .output(output)
            .run()?;
        Ok(())
    }

    fn encode(&self, request: &EncodeRequest) -> PipelineResult<()> {
        let list_path = self.write_concat_list(request)?;
        if let Some(parent) = request.output.parent() {
            fs::create_dir_all(parent)?;
        }
        self.encode_command(request, &list_path).run()?;
        Ok(())
    }
}

impl FfmpegCodec {
    /// Encode arguments for `request` reading frames from the ffconcat list.
    /// The output is capped at one frame per listed unit, so the repeated
    /// final list entry never becomes an extra frame.
    fn encode_command(&self, request: &EncodeRequest, list_path: &Path) -> FfmpegCommand {
        let mut cmd = FfmpegCommand::new(&self.ffmpeg)
            .args(["-f", "concat", "-safe", "0"])
            .input(list_path);
        if let Some(audio) = &request.audio {
            cmd = cmd.input(audio);
        }

        cmd = cmd
            .map("0:v:0")
            // libx264 with yuv420p needs even dimensions
            .video_filter("pad=ceil(iw/2)*2:ceil(ih/2)*2")
            .frame_rate(request.fps)
            .frame_limit(request.frames.len())
            .video_codec(VIDEO_CODEC)
            .preset(VIDEO_PRESET)
            .crf(VIDEO_CRF)
            .pixel_format("yuv420p");

        if request.audio.is_some() {
            cmd = cmd.map("1:a:0").audio_codec(AUDIO_CODEC).arg("-shortest");
        }

        cmd.args(["-movflags", "+faststart"]).output(&request.output)
    }
}

/// ffconcat script listing `frames` in order, each shown for one frame period.
/// The last entry is repeated because the concat demuxer ignores the final
/// duration.
pub fn concat_list(frames: &[PathBuf], fps: f64) -> String {
    let duration = 1.0 / fps;
    let mut list = String::from("ffconcat version 1.0\n");
    for frame in frames {
        list.push_str(&format!("file '{}'\n", escape_path(frame)));
        list.push_str(&format!("duration {:.6}\n", duration));
    }
    if let Some(last) = frames.last() {
        list.push_str(&format!("file '{}'\n", escape_path(last)));
    }
    list
}

fn escape_path(path: &Path) -> String {
    path.to_string_lossy().replace('\'', r"'\''")
}
