use crate::error::{PipelineError, PipelineResult};
use image::{DynamicImage, Rgb, RgbImage, RgbaImage};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The closed set of per-frame transforms a job can be configured with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransformKind {
    Segmentation,
    Denoise,
    ColorGrade,
}

/// What happens to the source audio track for a given transform.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioPolicy {
    /// Output is video only.
    Drop,
    /// Extracted track is muxed back unchanged.
    Passthrough,
    /// Extracted track goes through the audio noise filter before muxing.
    Denoise,
}

impl TransformKind {
    pub const ALL: [TransformKind; 3] = [
        TransformKind::Segmentation,
        TransformKind::Denoise,
        TransformKind::ColorGrade,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TransformKind::Segmentation => "segmentation",
            TransformKind::Denoise => "denoise",
            TransformKind::ColorGrade => "color_grade",
        }
    }

    /// Processor name the HTTP layer exposes for this transform.
    pub fn processor_name(&self) -> &'static str {
        match self {
            TransformKind::Segmentation => "bg_remover",
            TransformKind::Denoise => "noise_reduction",
            TransformKind::ColorGrade => "color_grading",
        }
    }

    pub fn audio_policy(&self) -> AudioPolicy {
        match self {
            TransformKind::Segmentation => AudioPolicy::Drop,
            TransformKind::Denoise => AudioPolicy::Denoise,
            TransformKind::ColorGrade => AudioPolicy::Passthrough,
        }
    }

    /// Build a fresh session for this transform. Called once per batch, inside
    /// the worker that owns the batch.
    pub fn open_session(&self) -> PipelineResult<Box<dyn TransformSession>> {
        let session: Box<dyn TransformSession> = match self {
            TransformKind::Segmentation => Box::new(SegmentationSession::new(0.12, 0.08)),
            TransformKind::Denoise => Box::new(DenoiseSession::new()),
            TransformKind::ColorGrade => Box::new(ColorGradeSession::new(0.01)),
        };
        tracing::debug!("Opened {} session", self.as_str());
        Ok(session)
    }
}

impl fmt::Display for TransformKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransformKind {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "segmentation" | "bg_remover" | "u2net" => Ok(TransformKind::Segmentation),
            "denoise" | "noise_reduction" => Ok(TransformKind::Denoise),
            "color_grade" | "color_grading" => Ok(TransformKind::ColorGrade),
            _ => Err(PipelineError::UnknownTransform(s.to_string())),
        }
    }
}

/// A loaded transform bound to one worker for the duration of one batch.
pub trait TransformSession {
    fn apply(&mut self, frame: DynamicImage) -> PipelineResult<DynamicImage>;
}

/// Keys out the background by comparing every pixel against the dominant
/// border colour. Output frames are RGBA with a soft alpha edge, colour
/// premultiplied by alpha so the background is black once alpha is dropped.
pub struct SegmentationSession {
    tolerance: f32,
    feather: f32,
    border: [Vec<u8>; 3],
}

impl SegmentationSession {
    pub fn new(tolerance: f32, feather: f32) -> Self {
        Self {
            tolerance,
            feather,
            border: [Vec::new(), Vec::new(), Vec::new()],
        }
    }

    fn estimate_background(&mut self, image: &RgbaImage) -> [u8; 3] {
        let (width, height) = image.dimensions();
        for channel in self.border.iter_mut() {
            channel.clear();
        }

        let mut push = |x: u32, y: u32| {
            let p = image.get_pixel(x, y);
            for c in 0..3 {
                self.border[c].push(p[c]);
            }
        };
        for x in 0..width {
            push(x, 0);
            push(x, height - 1);
        }
        for y in 1..height.saturating_sub(1) {
            push(0, y);
            push(width - 1, y);
        }

        let mut background = [0u8; 3];
        for (c, values) in self.border.iter_mut().enumerate() {
            values.sort_unstable();
            background[c] = values[values.len() / 2];
        }
        background
    }
}

impl TransformSession for SegmentationSession {
    fn apply(&mut self, frame: DynamicImage) -> PipelineResult<DynamicImage> {
        let mut image = frame.to_rgba8();
        let (width, height) = image.dimensions();
        if width == 0 || height == 0 {
            return Err(PipelineError::Worker("empty frame".to_string()));
        }

        let background = self.estimate_background(&image);
        // Max euclidean distance in RGB space.
        let max_distance = (3.0f32 * 255.0 * 255.0).sqrt();

        for pixel in image.pixels_mut() {
            let distance = (0..3)
                .map(|c| {
                    let d = pixel[c] as f32 - background[c] as f32;
                    d * d
                })
                .sum::<f32>()
                .sqrt()
                / max_distance;

            let alpha = if distance <= self.tolerance {
                0.0
            } else if distance >= self.tolerance + self.feather {
                1.0
            } else {
                (distance - self.tolerance) / self.feather
            };
            let alpha = ((alpha * 255.0).round() as u8).min(pixel[3]);
            // Cut out onto black so the keying survives an alpha-less encode.
            for c in 0..3 {
                pixel[c] = ((pixel[c] as u16 * alpha as u16 + 127) / 255) as u8;
            }
            pixel[3] = alpha;
        }

        Ok(DynamicImage::ImageRgba8(image))
    }
}

/// 3x3 per-channel median filter.
pub struct DenoiseSession {
    window: [u8; 9],
}

impl DenoiseSession {
    pub fn new() -> Self {
        Self { window: [0; 9] }
    }
}

impl Default for DenoiseSession {
    fn default() -> Self {
        Self::new()
    }
}

impl TransformSession for DenoiseSession {
    fn apply(&mut self, frame: DynamicImage) -> PipelineResult<DynamicImage> {
        let src = frame.to_rgb8();
        let (width, height) = src.dimensions();
        let mut out = RgbImage::new(width, height);
        let max_x = width as i64 - 1;
        let max_y = height as i64 - 1;

        for y in 0..height {
            for x in 0..width {
                let mut filtered = Rgb([0u8; 3]);
                for c in 0..3 {
                    let mut n = 0;
                    for dy in -1i64..=1 {
                        for dx in -1i64..=1 {
                            let sx = (x as i64 + dx).clamp(0, max_x) as u32;
                            let sy = (y as i64 + dy).clamp(0, max_y) as u32;
                            self.window[n] = src.get_pixel(sx, sy)[c];
                            n += 1;
                        }
                    }
                    self.window.sort_unstable();
                    filtered[c] = self.window[4];
                }
                out.put_pixel(x, y, filtered);
            }
        }

        Ok(DynamicImage::ImageRgb8(out))
    }
}

/// Auto-levels: stretches each channel so that the `clip` fraction of darkest
/// and brightest samples saturate.
pub struct ColorGradeSession {
    clip: f32,
    histograms: [[u32; 256]; 3],
}

impl ColorGradeSession {
    pub fn new(clip: f32) -> Self {
        Self {
            clip,
            histograms: [[0; 256]; 3],
        }
    }

    fn channel_bounds(histogram: &[u32; 256], total: u32, clip: f32) -> (u8, u8) {
        let cutoff = (total as f32 * clip).floor() as u32;

        let mut low = 0u8;
        let mut seen = 0u32;
        for (value, count) in histogram.iter().enumerate() {
            seen += count;
            if seen > cutoff {
                low = value as u8;
                break;
            }
        }

        let mut high = 255u8;
        seen = 0;
        for (value, count) in histogram.iter().enumerate().rev() {
            seen += count;
            if seen > cutoff {
                high = value as u8;
                break;
            }
        }

        (low, high)
    }
}

impl TransformSession for ColorGradeSession {
    fn apply(&mut self, frame: DynamicImage) -> PipelineResult<DynamicImage> {
        let mut image = frame.to_rgba8();
        let total = image.width() * image.height();

        for histogram in self.histograms.iter_mut() {
            histogram.fill(0);
        }
        for pixel in image.pixels() {
            for c in 0..3 {
                self.histograms[c][pixel[c] as usize] += 1;
            }
        }

        let mut lut = [[0u8; 256]; 3];
        for c in 0..3 {
            let (low, high) = Self::channel_bounds(&self.histograms[c], total, self.clip);
            for (value, slot) in lut[c].iter_mut().enumerate() {
                *slot = if high <= low {
                    value as u8
                } else {
                    let scaled =
                        (value as f32 - low as f32) * 255.0 / (high as f32 - low as f32);
                    scaled.round().clamp(0.0, 255.0) as u8
                };
            }
        }

        for pixel in image.pixels_mut() {
            for c in 0..3 {
                pixel[c] = lut[c][pixel[c] as usize];
            }
        }

        Ok(DynamicImage::ImageRgba8(image))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;

    #[test]
    fn test_parse_transform_kind_aliases() {
        assert_eq!(
            "bg_remover".parse::<TransformKind>().unwrap(),
            TransformKind::Segmentation
        );
        assert_eq!(
            "NOISE_REDUCTION".parse::<TransformKind>().unwrap(),
            TransformKind::Denoise
        );
        assert_eq!(
            "color_grade".parse::<TransformKind>().unwrap(),
            TransformKind::ColorGrade
        );

        let err = "sharpen".parse::<TransformKind>().unwrap_err();
        assert!(matches!(err, PipelineError::UnknownTransform(name) if name == "sharpen"));
    }

    #[test]
    fn test_processor_names_round_trip() {
        for kind in TransformKind::ALL {
            assert_eq!(kind.processor_name().parse::<TransformKind>().unwrap(), kind);
        }
    }

    #[test]
    fn test_segmentation_keys_out_border_colour() {
        // Green backdrop with a red square in the middle
        let image = RgbaImage::from_fn(20, 20, |x, y| {
            if (6..14).contains(&x) && (6..14).contains(&y) {
                Rgba([220, 20, 20, 255])
            } else {
                Rgba([10, 200, 10, 255])
            }
        });

        let mut session = TransformKind::Segmentation.open_session().unwrap();
        let out = session
            .apply(DynamicImage::ImageRgba8(image))
            .unwrap()
            .to_rgba8();

        assert_eq!(out.get_pixel(0, 0)[3], 0);
        assert_eq!(out.get_pixel(19, 10)[3], 0);
        assert_eq!(out.get_pixel(10, 10)[3], 255);
        // Colour of the foreground is untouched
        assert_eq!(out.get_pixel(10, 10)[0], 220);
    }

    #[test]
    fn test_segmentation_background_is_black_without_alpha() {
        let image = RgbImage::from_fn(20, 20, |x, y| {
            if (6..14).contains(&x) && (6..14).contains(&y) {
                Rgb([220, 20, 20])
            } else {
                Rgb([10, 200, 10])
            }
        });

        let mut session = TransformKind::Segmentation.open_session().unwrap();
        let rgb = session
            .apply(DynamicImage::ImageRgb8(image.clone()))
            .unwrap()
            .to_rgb8();

        assert_ne!(rgb, image);
        assert_eq!(rgb.get_pixel(0, 0), &Rgb([0, 0, 0]));
        assert_eq!(rgb.get_pixel(19, 10), &Rgb([0, 0, 0]));
        assert_eq!(rgb.get_pixel(10, 10), &Rgb([220, 20, 20]));
    }

    #[test]
    fn test_denoise_removes_salt_pixel() {
        let mut image = RgbImage::from_pixel(9, 9, Rgb([100, 100, 100]));
        image.put_pixel(4, 4, Rgb([255, 255, 255]));

        let mut session = TransformKind::Denoise.open_session().unwrap();
        let out = session
            .apply(DynamicImage::ImageRgb8(image))
            .unwrap()
            .to_rgb8();

        assert_eq!(out.get_pixel(4, 4), &Rgb([100, 100, 100]));
        assert_eq!(out.dimensions(), (9, 9));
    }

    #[test]
    fn test_color_grade_stretches_low_contrast() {
        // Values confined to [100, 150]
        let image = RgbImage::from_fn(51, 4, |x, _| {
            let v = 100 + x as u8;
            Rgb([v, v, v])
        });

        let mut session = TransformKind::ColorGrade.open_session().unwrap();
        let out = session
            .apply(DynamicImage::ImageRgb8(image))
            .unwrap()
            .to_rgba8();

        assert_eq!(out.get_pixel(0, 0)[0], 0);
        assert_eq!(out.get_pixel(50, 0)[0], 255);
        assert_eq!(out.get_pixel(0, 0)[3], 255);
    }

    #[test]
    fn test_color_grade_leaves_flat_image_alone() {
        let image = RgbImage::from_pixel(4, 4, Rgb([80, 80, 80]));
        let mut session = TransformKind::ColorGrade.open_session().unwrap();
        let out = session
            .apply(DynamicImage::ImageRgb8(image))
            .unwrap()
            .to_rgba8();
        assert_eq!(out.get_pixel(2, 2)[0], 80);
    }
}
