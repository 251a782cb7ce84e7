//! FFmpeg command builder and blocking runner.

use crate::error::{PipelineError, PipelineResult};
use std::path::Path;
use std::process::{Command, Output, Stdio};
use tracing::debug;

/// Lines of stderr kept in a failure for diagnostics.
const STDERR_TAIL_LINES: usize = 20;

/// Builder for FFmpeg argument lists. Arguments are emitted in call order, so
/// per-input options go before `input()` and per-output options before `output()`.
#[derive(Debug, Clone)]
pub struct FfmpegCommand {
    program: String,
    args: Vec<String>,
    overwrite: bool,
    log_level: String,
}

impl FfmpegCommand {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            overwrite: true,
            log_level: "error".to_string(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Add an input file.
    pub fn input(self, path: impl AsRef<Path>) -> Self {
        self.arg("-i")
            .arg(path.as_ref().to_string_lossy().to_string())
    }

    /// Add an output file. Options for it must already have been added.
    pub fn output(self, path: impl AsRef<Path>) -> Self {
        self.arg(path.as_ref().to_string_lossy().to_string())
    }

    pub fn map(self, spec: impl Into<String>) -> Self {
        self.arg("-map").arg(spec)
    }

    pub fn video_filter(self, filter: impl Into<String>) -> Self {
        self.arg("-vf").arg(filter)
    }

    pub fn audio_filter(self, filter: impl Into<String>) -> Self {
        self.arg("-af").arg(filter)
    }

    pub fn video_codec(self, codec: impl Into<String>) -> Self {
        self.arg("-c:v").arg(codec)
    }

    pub fn audio_codec(self, codec: impl Into<String>) -> Self {
        self.arg("-c:a").arg(codec)
    }

    pub fn crf(self, crf: u8) -> Self {
        self.arg("-crf").arg(crf.to_string())
    }

    pub fn preset(self, preset: impl Into<String>) -> Self {
        self.arg("-preset").arg(preset)
    }

    pub fn pixel_format(self, format: impl Into<String>) -> Self {
        self.arg("-pix_fmt").arg(format)
    }

    pub fn frame_rate(self, fps: f64) -> Self {
        self.arg("-r").arg(format_rate(fps))
    }

    /// Stop writing video after `frames` frames.
    pub fn frame_limit(self, frames: usize) -> Self {
        self.arg("-frames:v").arg(frames.to_string())
    }

    pub fn build_args(&self) -> Vec<String> {
        let mut args = Vec::with_capacity(self.args.len() + 4);
        if self.overwrite {
            args.push("-y".to_string());
        }
        args.push("-v".to_string());
        args.push(self.log_level.clone());
        args.extend(self.args.iter().cloned());
        args
    }

    /// Run to completion, capturing stdout/stderr.
    pub fn run(&self) -> PipelineResult<Output> {
        run_tool(&self.program, &self.build_args())
    }
}

/// Run an external tool once. Non-zero exit becomes `ToolFailed` carrying the
/// tail of stderr.
pub fn run_tool(program: &str, args: &[String]) -> PipelineResult<Output> {
    which::which(program).map_err(|_| PipelineError::ToolNotFound(program.to_string()))?;
    debug!("Running: {} {}", program, args.join(" "));

    let output = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()?;

    if output.status.success() {
        Ok(output)
    } else {
        let stderr = stderr_tail(&output.stderr);
        Err(PipelineError::tool_failed(
            program,
            format!("exited with {}: {}", output.status, last_line(&stderr)),
            Some(stderr),
            output.status.code(),
        ))
    }
}

/// Frame rate as FFmpeg expects it, without float noise (e.g. "30", "29.97").
pub fn format_rate(fps: f64) -> String {
    let formatted = format!("{:.3}", fps);
    formatted
        .trim_end_matches('0')
        .trim_end_matches('.')
        .to_string()
}

fn stderr_tail(stderr: &[u8]) -> String {
    let text = String::from_utf8_lossy(stderr);
    let lines: Vec<&str> = text.lines().collect();
    let start = lines.len().saturating_sub(STDERR_TAIL_LINES);
    lines[start..].join("\n")
}

fn last_line(text: &str) -> &str {
    text.lines()
        .rev()
        .find(|l| !l.trim().is_empty())
        .unwrap_or("no output")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_builder_keeps_order() {
        let cmd = FfmpegCommand::new("ffmpeg")
            .input("in.mp4")
            .map("0:v:0")
            .video_filter("fps=30")
            .output("frames/frame_%06d.png")
            .map("0:a:0")
            .audio_codec("pcm_s16le")
            .output("frames/audio.wav");

        let args = cmd.build_args();
        assert_eq!(&args[..3], &["-y", "-v", "error"]);
        let vf = args.iter().position(|a| a == "-vf").unwrap();
        let frames = args.iter().position(|a| a == "frames/frame_%06d.png").unwrap();
        let audio = args.iter().position(|a| a == "frames/audio.wav").unwrap();
        assert!(vf < frames);
        assert!(frames < audio);
        assert_eq!(args.last().unwrap(), "frames/audio.wav");
    }

    #[test]
    fn test_format_rate() {
        assert_eq!(format_rate(30.0), "30");
        assert_eq!(format_rate(29.97), "29.97");
        assert_eq!(format_rate(23.976023), "23.976");
        assert_eq!(format_rate(12.5), "12.5");
    }

    #[test]
    fn test_stderr_tail_limits_lines() {
        let text: String = (0..50).map(|i| format!("line {}\n", i)).collect();
        let tail = stderr_tail(text.as_bytes());
        assert_eq!(tail.lines().count(), STDERR_TAIL_LINES);
        assert_eq!(last_line(&tail), "line 49");
    }

    #[test]
    fn test_missing_tool_is_reported() {
        let err = run_tool("reframe-no-such-tool", &[]).unwrap_err();
        assert!(matches!(err, PipelineError::ToolNotFound(name) if name == "reframe-no-such-tool"));
    }
}
