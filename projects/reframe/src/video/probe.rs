//! FFprobe stream information.

use super::MediaInfo;
use crate::error::{PipelineError, PipelineResult};
use serde::Deserialize;

pub const DEFAULT_FPS: f64 = 30.0;

#[derive(Debug, Deserialize)]
struct FfprobeOutput {
    #[serde(default)]
    streams: Vec<FfprobeStream>,
}

#[derive(Debug, Deserialize)]
struct FfprobeStream {
    // Data and attachment streams may omit it
    #[serde(default)]
    codec_type: String,
    width: Option<u32>,
    height: Option<u32>,
    r_frame_rate: Option<String>,
    avg_frame_rate: Option<String>,
}

/// Arguments for `ffprobe` producing the JSON that `parse_probe_output` reads.
pub fn probe_args(input: &str) -> Vec<String> {
    vec![
        "-v".to_string(),
        "quiet".to_string(),
        "-print_format".to_string(),
        "json".to_string(),
        "-show_streams".to_string(),
        input.to_string(),
    ]
}

pub fn parse_probe_output(json: &[u8]) -> PipelineResult<MediaInfo> {
    let probe: FfprobeOutput = serde_json::from_slice(json)?;

    let video = probe
        .streams
        .iter()
        .find(|s| s.codec_type == "video")
        .ok_or_else(|| {
            PipelineError::tool_failed("ffprobe", "no video stream found", None, None)
        })?;

    let fps = video
        .avg_frame_rate
        .as_deref()
        .and_then(parse_frame_rate)
        .or_else(|| video.r_frame_rate.as_deref().and_then(parse_frame_rate))
        .unwrap_or_else(|| {
            tracing::warn!("Could not determine frame rate, defaulting to {}", DEFAULT_FPS);
            DEFAULT_FPS
        });

    Ok(MediaInfo {
        fps,
        has_audio: probe.streams.iter().any(|s| s.codec_type == "audio"),
        width: video.width.unwrap_or(0),
        height: video.height.unwrap_or(0),
    })
}

/// Parse "30000/1001" or "29.97". Zero and "0/0" count as unknown.
pub fn parse_frame_rate(s: &str) -> Option<f64> {
    let fps = if let Some((num, den)) = s.split_once('/') {
        let num: f64 = num.trim().parse().ok()?;
        let den: f64 = den.trim().parse().ok()?;
        if den <= 0.0 {
            return None;
        }
        num / den
    } else {
        s.trim().parse().ok()?
    };

    if fps.is_finite() && fps > 0.0 {
        Some(fps)
    } else {
        None
    }
}
