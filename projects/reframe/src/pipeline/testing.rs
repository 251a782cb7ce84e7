// Test doubles shared by the pipeline and HTTP tests

use crate::error::{PipelineError, PipelineResult};
use crate::pipeline::types::frame_file_name;
use crate::run_context::{Job, JobConfig};
use crate::video::{EncodeRequest, ExtractRequest, MediaCodec, MediaInfo};
use image::{Rgb, RgbImage};
use std::collections::HashSet;
use std::fs;
use std::path::Path;
use std::sync::Mutex;

/// Encoded frames captured at encode time, as (file name, bytes).
pub type Encoded = Vec<(String, Vec<u8>)>;

/// Stands in for ffmpeg: "extracts" synthetic frames and records encodes.
pub struct FakeCodec {
    pub frames: usize,
    pub corrupt: HashSet<usize>,
    pub has_audio: bool,
    pub fail_encode: bool,
    pub extract_calls: Mutex<usize>,
    pub encodes: Mutex<Vec<(EncodeRequest, Encoded)>>,
}

impl FakeCodec {
    pub fn new(frames: usize) -> Self {
        Self {
            frames,
            corrupt: HashSet::new(),
            has_audio: false,
            fail_encode: false,
            extract_calls: Mutex::new(0),
            encodes: Mutex::new(Vec::new()),
        }
    }

    pub fn corrupt(mut self, indices: impl IntoIterator<Item = usize>) -> Self {
        self.corrupt.extend(indices);
        self
    }

    pub fn encoded_names(&self) -> Vec<String> {
        let encodes = self.encodes.lock().unwrap();
        encodes[0].1.iter().map(|(name, _)| name.clone()).collect()
    }
}

impl MediaCodec for FakeCodec {
    fn probe(&self, _input: &Path) -> PipelineResult<MediaInfo> {
        Ok(MediaInfo {
            fps: 30.0,
            has_audio: self.has_audio,
            width: 6,
            height: 4,
        })
    }

    fn extract(&self, request: &ExtractRequest) -> PipelineResult<()> {
        *self.extract_calls.lock().unwrap() += 1;
        for i in 1..=self.frames {
            let path = request.frames_dir.join(frame_file_name(i));
            if self.corrupt.contains(&i) {
                fs::write(&path, b"\x00garbage")?;
            } else {
                let v = (i % 256) as u8;
                RgbImage::from_fn(6, 4, |x, y| Rgb([v, (x * 40) as u8, (y * 60) as u8]))
                    .save(&path)?;
            }
        }
        if let Some(audio) = &request.audio_output {
            fs::write(audio, b"RIFF")?;
        }
        Ok(())
    }

    fn denoise_audio(&self, input: &Path, output: &Path) -> PipelineResult<()> {
        fs::copy(input, output)?;
        Ok(())
    }

    fn encode(&self, request: &EncodeRequest) -> PipelineResult<()> {
        if self.fail_encode {
            return Err(PipelineError::tool_failed("ffmpeg", "encoder exploded", None, Some(1)));
        }
        let captured = request
            .frames
            .iter()
            .map(|f| {
                let name = f.file_name().unwrap().to_string_lossy().into_owned();
                (name, fs::read(f).unwrap())
            })
            .collect();
        fs::write(&request.output, b"mp4")?;
        self.encodes.lock().unwrap().push((request.clone(), captured));
        Ok(())
    }
}

/// Job whose (fake) input lives in `work` and whose output is `work/output.mp4`.
pub fn job_in(work: &Path, config: JobConfig) -> Job {
    let input = work.join("input.mp4");
    fs::write(&input, b"not really a video").unwrap();
    Job::new(input, work.join("output.mp4"), work, config)
}
