//! Image statistics used by the quality and exposure probes.
//!
//! All functions are pure and operate on a [`GrayFrame`], the luma plane of a
//! captured frame. Border pixels are handled by reflection (`dcb|abcd|cba`)
//! for filters that need a neighborhood, except the Laplacian which is only
//! evaluated on interior pixels.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::config::QualityThresholds;
use crate::traits::{CameraError, Frame, Result};

/// 5-tap binomial approximation of a Gaussian (sigma ~1.1).
const GAUSSIAN_5: [f64; 5] = [1.0 / 16.0, 4.0 / 16.0, 6.0 / 16.0, 4.0 / 16.0, 1.0 / 16.0];

/// An 8-bit luma plane.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GrayFrame {
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
    /// Row-major luma samples, `width * height` long.
    pub data: Vec<u8>,
}

impl GrayFrame {
    /// Build a luma plane, checking the buffer length.
    pub fn new(width: u32, height: u32, data: Vec<u8>) -> Result<Self> {
        let expected = width as usize * height as usize;
        if data.len() != expected {
            return Err(CameraError::Decode(format!(
                "luma plane holds {} samples, expected {expected}",
                data.len()
            )));
        }
        Ok(Self {
            width,
            height,
            data,
        })
    }

    /// A frame where every sample is `value`.
    #[must_use]
    pub fn filled(width: u32, height: u32, value: u8) -> Self {
        Self {
            width,
            height,
            data: vec![value; width as usize * height as usize],
        }
    }

    /// Extract the luma plane from a captured frame.
    pub fn from_frame(frame: &Frame) -> Result<Self> {
        let pixels = frame.width as usize * frame.height as usize;

        let data = match &frame.fourcc.0 {
            b"YUYV" => frame.data.iter().step_by(2).take(pixels).copied().collect(),
            b"GREY" => frame.data.iter().take(pixels).copied().collect(),
            b"RGB3" => frame
                .data
                .chunks_exact(3)
                .take(pixels)
                .map(|rgb| match rgb {
                    [r, g, b] => luma(*r, *g, *b),
                    _ => 0,
                })
                .collect(),
            b"MJPG" => {
                let decoded = image::load_from_memory(&frame.data)
                    .map_err(|err| CameraError::Decode(err.to_string()))?
                    .to_luma8();
                return Self::new(decoded.width(), decoded.height(), decoded.into_raw());
            }
            _ => {
                return Err(CameraError::Decode(format!(
                    "unsupported pixel format {}",
                    frame.fourcc
                )))
            }
        };

        Self::new(frame.width, frame.height, data)
    }

    fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Sample at (x, y) with reflected borders.
    fn reflected(&self, x: isize, y: isize) -> f64 {
        let x = reflect(x, self.width as usize);
        let y = reflect(y, self.height as usize);
        self.data
            .get(y * self.width as usize + x)
            .map_or(0.0, |v| f64::from(*v))
    }
}

/// Rec. 601 luma of an RGB triple.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn luma(r: u8, g: u8, b: u8) -> u8 {
    let y = 0.114f32.mul_add(
        f32::from(b),
        0.587f32.mul_add(f32::from(g), 0.299 * f32::from(r)),
    );
    y.round().clamp(0.0, 255.0) as u8
}

#[allow(clippy::cast_possible_wrap, clippy::cast_sign_loss)]
const fn reflect(i: isize, len: usize) -> usize {
    if len <= 1 {
        return 0;
    }
    let n = len as isize;
    let mut i = if i < 0 { -i } else { i };
    if i >= n {
        i = 2 * n - 2 - i;
    }
    if i < 0 {
        0
    } else if i >= n {
        len - 1
    } else {
        i as usize
    }
}

/// Streaming mean/variance accumulator (Welford).
#[derive(Debug, Default, Clone, Copy)]
struct Stats {
    count: u64,
    mean: f64,
    m2: f64,
}

impl Stats {
    #[allow(clippy::cast_precision_loss)]
    fn push(&mut self, value: f64) {
        self.count += 1;
        let delta = value - self.mean;
        self.mean += delta / self.count as f64;
        self.m2 += delta * (value - self.mean);
    }

    /// Population variance.
    #[allow(clippy::cast_precision_loss)]
    fn variance(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            (self.m2 / self.count as f64).max(0.0)
        }
    }

    fn std_dev(&self) -> f64 {
        self.variance().sqrt()
    }
}

fn stats_of(values: impl Iterator<Item = f64>) -> Stats {
    values.fold(Stats::default(), |mut stats, value| {
        stats.push(value);
        stats
    })
}

/// Mean luma, 0.0 for an empty frame.
pub fn brightness(gray: &GrayFrame) -> f64 {
    stats_of(gray.data.iter().map(|v| f64::from(*v))).mean
}

/// Luma standard deviation.
pub fn contrast(gray: &GrayFrame) -> f64 {
    stats_of(gray.data.iter().map(|v| f64::from(*v))).std_dev()
}

/// Variance of the 4-neighbour Laplacian over interior pixels. Higher means
/// sharper.
#[allow(clippy::cast_possible_wrap)]
pub fn sharpness(gray: &GrayFrame) -> f64 {
    let (w, h) = (gray.width as isize, gray.height as isize);
    if w < 3 || h < 3 {
        return 0.0;
    }

    let mut stats = Stats::default();
    for y in 1..h - 1 {
        for x in 1..w - 1 {
            let laplacian = gray.reflected(x, y - 1)
                + gray.reflected(x, y + 1)
                + gray.reflected(x - 1, y)
                + gray.reflected(x + 1, y)
                - 4.0 * gray.reflected(x, y);
            stats.push(laplacian);
        }
    }
    stats.variance()
}

/// 5x5 separable Gaussian blur, returned as floating point samples.
#[allow(clippy::cast_possible_wrap)]
fn gaussian_blur(gray: &GrayFrame) -> Vec<f64> {
    let (w, h) = (gray.width as isize, gray.height as isize);
    let offsets = (-2isize..=2).zip(GAUSSIAN_5);

    let mut horizontal = Vec::with_capacity(gray.data.len());
    for y in 0..h {
        for x in 0..w {
            horizontal.push(
                offsets
                    .clone()
                    .map(|(dx, k)| k * gray.reflected(x + dx, y))
                    .sum::<f64>(),
            );
        }
    }

    let width = gray.width as usize;
    let at = |x: isize, y: isize| {
        let x = reflect(x, gray.width as usize);
        let y = reflect(y, gray.height as usize);
        horizontal.get(y * width + x).copied().unwrap_or(0.0)
    };

    let mut blurred = Vec::with_capacity(gray.data.len());
    for y in 0..h {
        for x in 0..w {
            blurred.push(offsets.clone().map(|(dy, k)| k * at(x, y + dy)).sum::<f64>());
        }
    }
    blurred
}

/// Standard deviation of the residual between the frame and its Gaussian
/// blur: the high-frequency energy.
pub fn noise(gray: &GrayFrame) -> f64 {
    if gray.is_empty() {
        return 0.0;
    }
    let blurred = gaussian_blur(gray);
    stats_of(
        blurred
            .iter()
            .zip(&gray.data)
            .map(|(smooth, raw)| smooth - f64::from(*raw)),
    )
    .std_dev()
}

/// Mean absolute frame-to-frame difference across a burst. Pairs with
/// mismatched dimensions are ignored; fewer than two frames yield 0.0.
pub fn temporal_noise(frames: &[GrayFrame]) -> f64 {
    let diffs = frames
        .windows(2)
        .filter_map(|pair| match pair {
            [prev, next] if prev.width == next.width && prev.height == next.height => Some(
                stats_of(
                    prev.data
                        .iter()
                        .zip(&next.data)
                        .map(|(a, b)| f64::from(a.abs_diff(*b))),
                )
                .mean,
            ),
            _ => None,
        });
    stats_of(diffs).mean
}

/// Signal-to-noise estimate in dB: `10 log10(brightness² / contrast²)`.
/// Infinite when the contrast is zero.
pub fn snr_db(brightness: f64, contrast: f64) -> f64 {
    if contrast == 0.0 {
        return f64::INFINITY;
    }
    10.0 * (brightness.powi(2) / contrast.powi(2)).log10()
}

/// Spread between the darkest and brightest sample.
pub fn dynamic_range(gray: &GrayFrame) -> u8 {
    let min = gray.data.iter().min().copied().unwrap_or(0);
    let max = gray.data.iter().max().copied().unwrap_or(0);
    max - min
}

/// A quality gate that a frame failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QualityFlag {
    /// Laplacian variance under the sharpness gate.
    LowSharpness,
    /// Mean luma outside the brightness window.
    PoorBrightness,
    /// Luma spread under the contrast gate.
    LowContrast,
    /// Blur residual over the noise gate.
    HighNoise,
}

impl fmt::Display for QualityFlag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::LowSharpness => "Low sharpness",
            Self::PoorBrightness => "Poor brightness",
            Self::LowContrast => "Low contrast",
            Self::HighNoise => "High noise",
        })
    }
}

/// Single-frame quality metrics and the gates they tripped.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QualityReport {
    /// Laplacian variance.
    pub sharpness: f64,
    /// Mean luma.
    pub brightness: f64,
    /// Luma standard deviation.
    pub contrast: f64,
    /// Blur residual standard deviation.
    pub noise: f64,
    /// Gates tripped, in check order.
    pub flags: Vec<QualityFlag>,
}

impl QualityReport {
    /// Compute all metrics for `gray` and apply `thresholds`.
    pub fn assess(gray: &GrayFrame, thresholds: &QualityThresholds) -> Self {
        let sharpness = sharpness(gray);
        let brightness = brightness(gray);
        let contrast = contrast(gray);
        let noise = noise(gray);

        let mut flags = Vec::new();
        if sharpness < thresholds.min_sharpness {
            flags.push(QualityFlag::LowSharpness);
        }
        if brightness < thresholds.min_brightness || brightness > thresholds.max_brightness {
            flags.push(QualityFlag::PoorBrightness);
        }
        if contrast < thresholds.min_contrast {
            flags.push(QualityFlag::LowContrast);
        }
        if noise > thresholds.max_noise {
            flags.push(QualityFlag::HighNoise);
        }

        Self {
            sharpness,
            brightness,
            contrast,
            noise,
            flags,
        }
    }

    /// Whether no gate was tripped.
    pub fn is_acceptable(&self) -> bool {
        self.flags.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::{FourCC, FrameMetadata};

    fn checkerboard(width: u32, height: u32, cell: u32, low: u8, high: u8) -> GrayFrame {
        let data = (0..height)
            .flat_map(|y| {
                (0..width).map(move |x| if ((x / cell) + (y / cell)) % 2 == 0 { low } else { high })
            })
            .collect();
        GrayFrame::new(width, height, data).expect("valid plane")
    }

    fn frame(fourcc: FourCC, width: u32, height: u32, data: Vec<u8>) -> Frame {
        Frame {
            width,
            height,
            fourcc,
            data,
            metadata: FrameMetadata { sequence: 0 },
        }
    }

    #[test]
    fn test_constant_frame_has_no_edges() {
        let gray = GrayFrame::filled(64, 48, 128);
        assert!(sharpness(&gray).abs() < 1e-9);
        assert!(noise(&gray).abs() < 1e-9);
        assert!(contrast(&gray).abs() < 1e-9);
    }

    #[test]
    fn test_white_frame_brightness() {
        let gray = GrayFrame::filled(32, 32, 255);
        assert!((brightness(&gray) - 255.0).abs() < 1e-9);
        assert_eq!(dynamic_range(&gray), 0);
    }

    #[test]
    fn test_checkerboard_is_sharp_and_contrasty() {
        let gray = checkerboard(64, 64, 4, 0, 255);
        assert!(sharpness(&gray) > 1000.0);
        assert!((contrast(&gray) - 127.5).abs() < 1e-6);
        assert!((brightness(&gray) - 127.5).abs() < 1e-6);
        assert_eq!(dynamic_range(&gray), 255);
    }

    #[test]
    fn test_blurry_gradient_is_flagged() {
        let data = (0..48u32)
            .flat_map(|_| (0..64u32).map(|x| u8::try_from(x * 4).unwrap_or(u8::MAX)))
            .collect();
        let gray = GrayFrame::new(64, 48, data).expect("valid plane");
        assert!(sharpness(&gray) < 1.0);
    }

    #[test]
    fn test_temporal_noise() {
        let frames = vec![
            GrayFrame::filled(8, 8, 10),
            GrayFrame::filled(8, 8, 20),
            GrayFrame::filled(8, 8, 20),
        ];
        assert!((temporal_noise(&frames) - 5.0).abs() < 1e-9);
        assert!(temporal_noise(&frames[..1]).abs() < 1e-9);
    }

    #[test]
    fn test_snr() {
        assert!(snr_db(100.0, 0.0).is_infinite());
        assert!((snr_db(100.0, 10.0) - 20.0).abs() < 1e-9);
    }

    #[test]
    fn test_from_yuyv_frame_takes_luma() {
        let data = vec![10, 128, 20, 128, 30, 128, 40, 128];
        let gray = GrayFrame::from_frame(&frame(FourCC::YUYV, 4, 1, data)).expect("luma");
        assert_eq!(gray.data, vec![10, 20, 30, 40]);
    }

    #[test]
    fn test_from_rgb_frame() {
        let data = vec![255, 255, 255, 0, 0, 0];
        let gray = GrayFrame::from_frame(&frame(FourCC::RGB3, 2, 1, data)).expect("luma");
        assert_eq!(gray.data, vec![255, 0]);
    }

    #[test]
    fn test_truncated_frame_is_rejected() {
        let result = GrayFrame::from_frame(&frame(FourCC::GREY, 4, 4, vec![0; 3]));
        assert!(result.is_err());
    }

    #[test]
    fn test_quality_flags() {
        let thresholds = QualityThresholds::default();

        let flat = QualityReport::assess(&GrayFrame::filled(64, 48, 128), &thresholds);
        assert_eq!(
            flat.flags,
            vec![QualityFlag::LowSharpness, QualityFlag::LowContrast]
        );

        let dark = QualityReport::assess(&GrayFrame::filled(64, 48, 10), &thresholds);
        assert!(dark.flags.contains(&QualityFlag::PoorBrightness));

        let fine = checkerboard(4, 4, 1, 0, 255);
        let busy = QualityReport::assess(&fine, &thresholds);
        assert!(busy.flags.contains(&QualityFlag::HighNoise));
        assert!(!busy.is_acceptable());
    }

    #[test]
    fn test_large_blocks_pass_quality_gates() {
        let gray = checkerboard(640, 480, 160, 60, 190);
        let report = QualityReport::assess(&gray, &QualityThresholds::default());
        assert!(report.is_acceptable(), "unexpected flags: {report:?}");
    }

    #[test]
    fn test_reflect() {
        assert_eq!(reflect(-1, 5), 1);
        assert_eq!(reflect(5, 5), 3);
        assert_eq!(reflect(2, 5), 2);
        assert_eq!(reflect(-3, 1), 0);
    }
}
