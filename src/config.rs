//! Engine configuration using Figment.
//!
//! Configuration is layered from:
//! 1. Built-in defaults (the values the probes were calibrated with)
//! 2. An optional TOML file
//! 3. Environment variables prefixed with `CAMDIAG_`, using `__` to reach
//!    nested keys (e.g. `CAMDIAG_PROBES__TIMINGS__INTER_PROBE_MS=0`)
//!
//! Every heuristic threshold lives here so a camera family can be
//! recalibrated without touching code.

use std::fmt;
use std::path::Path;
use std::time::Duration;

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// A frame size in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Resolution {
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
}

impl Resolution {
    /// Create a resolution.
    #[must_use]
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Top-level engine configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Camera classifier heuristics.
    pub classifier: ClassifierConfig,
    /// Probe ladders, tolerances and timings.
    pub probes: ProbeConfig,
    /// Image quality gates.
    pub quality: QualityThresholds,
}

impl EngineConfig {
    /// Environment variable prefix.
    pub const ENV_PREFIX: &'static str = "CAMDIAG_";

    /// Load defaults, then `path` if given, then the environment.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut figment = Figment::from(Serialized::defaults(Self::default()));

        if let Some(path) = path {
            if !path.exists() {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    format!("config file {} not found", path.display()),
                )
                .into());
            }
            figment = figment.merge(Toml::file(path));
        }

        let config = figment
            .merge(Env::prefixed(Self::ENV_PREFIX).split("__"))
            .extract()?;
        Ok(config)
    }
}

/// Heuristics for telling USB cameras from built-in ones.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifierConfig {
    /// Indices `0..max_index` are probed during enumeration.
    pub max_index: u32,
    /// Buffer size requested before the probe frame read.
    pub buffer_size: u32,
    /// Resolutions typical of built-in laptop cameras at index 0.
    pub builtin_resolutions: Vec<Resolution>,
    /// Aspect ratios considered standard.
    pub standard_aspect_ratios: Vec<f64>,
    /// Allowed distance from a standard aspect ratio.
    pub aspect_tolerance: f64,
    /// Width at or above which a camera is assumed external.
    pub uhd_width: u32,
    /// Height at or above which a camera is assumed external.
    pub uhd_height: u32,
    /// Case-insensitive keywords marking a video device in process-info text.
    pub usb_keywords: Vec<String>,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            max_index: 15,
            buffer_size: 1,
            builtin_resolutions: vec![
                Resolution::new(1280, 720),
                Resolution::new(1920, 1080),
                Resolution::new(640, 480),
            ],
            standard_aspect_ratios: vec![16.0 / 9.0, 4.0 / 3.0, 3.0 / 2.0],
            aspect_tolerance: 0.1,
            uhd_width: 3840,
            uhd_height: 2160,
            usb_keywords: ["camera", "video", "webcam", "usb video class"]
                .into_iter()
                .map(str::to_owned)
                .collect(),
        }
    }
}

/// An auto-exposure mode code and its display name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExposureMode {
    /// Value written to the auto-exposure property.
    pub code: f64,
    /// Label used in result details.
    pub name: String,
}

impl ExposureMode {
    fn new(code: f64, name: &str) -> Self {
        Self {
            code,
            name: name.to_owned(),
        }
    }
}

/// Ladders, tolerances and thresholds used by the probes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProbeConfig {
    /// Resolutions requested by the resolution probe.
    pub resolution_ladder: Vec<Resolution>,
    /// Values swept by exposure tier (a).
    pub exposure_ladder: Vec<f64>,
    /// Relative readback tolerance for exposure values.
    pub exposure_tolerance: f64,
    /// Frame brightness change that proves an exposure write had effect.
    pub exposure_brightness_delta: f64,
    /// Auto-exposure codes tried, in order, to enter manual mode.
    pub manual_exposure_modes: Vec<f64>,
    /// Values swept for the brightness property in tier (b).
    pub brightness_ladder: Vec<f64>,
    /// Absolute readback tolerance for brightness.
    pub brightness_tolerance: f64,
    /// Values swept for the gain property in tier (b).
    pub gain_ladder: Vec<f64>,
    /// Relative readback tolerance for gain.
    pub gain_tolerance_ratio: f64,
    /// Minimum absolute readback tolerance for gain.
    pub gain_tolerance_min: f64,
    /// Frame brightness change that proves a brightness/gain write had effect.
    pub alternative_brightness_delta: f64,
    /// Auto-exposure modes toggled by tier (c).
    pub auto_exposure_modes: Vec<ExposureMode>,
    /// Manual focus positions.
    pub focus_ladder: Vec<f64>,
    /// Relative readback tolerance for focus positions.
    pub focus_tolerance_ratio: f64,
    /// Minimum absolute readback tolerance for focus positions.
    pub focus_tolerance_min: f64,
    /// Readback travel required for the min-to-max focus sweep.
    pub focus_sweep_min_travel: f64,
    /// Lowest acceptable measured frame rate.
    pub min_frame_rate: f64,
    /// Frames read back-to-back by the USB interface probe.
    pub usb_frames: u32,
    /// Lowest acceptable USB throughput in frames per second.
    pub min_usb_rate: f64,
    /// Frames in the image quality burst.
    pub quality_burst_frames: u32,
    /// Settle delays, windows and budgets.
    pub timings: ProbeTimings,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            resolution_ladder: vec![
                Resolution::new(640, 480),
                Resolution::new(1280, 720),
                Resolution::new(1920, 1080),
            ],
            exposure_ladder: vec![
                -10.0, -7.0, -4.0, -1.0, 1.0, 10.0, 50.0, 100.0, 200.0, 500.0, 1000.0,
            ],
            exposure_tolerance: 0.15,
            exposure_brightness_delta: 5.0,
            manual_exposure_modes: vec![0.25, 0.0, 1.0, 3.0],
            brightness_ladder: vec![0.0, 32.0, 64.0, 128.0, 192.0, 255.0],
            brightness_tolerance: 5.0,
            gain_ladder: vec![0.0, 25.0, 50.0, 100.0, 200.0],
            gain_tolerance_ratio: 0.1,
            gain_tolerance_min: 5.0,
            alternative_brightness_delta: 3.0,
            auto_exposure_modes: vec![
                ExposureMode::new(0.25, "Manual"),
                ExposureMode::new(0.75, "Auto"),
                ExposureMode::new(0.0, "Off"),
                ExposureMode::new(1.0, "On"),
                ExposureMode::new(3.0, "Aperture Priority"),
            ],
            focus_ladder: vec![0.0, 10.0, 25.0, 50.0, 75.0, 100.0, 150.0, 200.0, 255.0],
            focus_tolerance_ratio: 0.1,
            focus_tolerance_min: 5.0,
            focus_sweep_min_travel: 10.0,
            min_frame_rate: 1.0,
            usb_frames: 10,
            min_usb_rate: 5.0,
            quality_burst_frames: 5,
            timings: ProbeTimings::default(),
        }
    }
}

/// Settle delays, measurement windows and the per-probe budget, in
/// milliseconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProbeTimings {
    /// Pause between consecutive probes.
    pub inter_probe_ms: u64,
    /// Wait after a resolution, brightness or gain write.
    pub property_settle_ms: u64,
    /// Wait after an exposure write.
    pub exposure_settle_ms: u64,
    /// Wait after an auto-exposure mode write.
    pub mode_settle_ms: u64,
    /// Wait after toggling autofocus.
    pub autofocus_settle_ms: u64,
    /// Wait for the focus motor after a position write.
    pub focus_settle_ms: u64,
    /// Wait after toggling auto white balance.
    pub white_balance_settle_ms: u64,
    /// Gap between frames of the quality burst.
    pub burst_interval_ms: u64,
    /// Frame rate measurement window.
    pub frame_rate_window_ms: u64,
    /// Liveness (power) measurement window.
    pub power_window_ms: u64,
    /// Time budget for a single probe's ladders.
    pub probe_budget_ms: u64,
    /// Limit on a host listing command such as `lsusb`.
    pub process_info_timeout_ms: u64,
}

impl Default for ProbeTimings {
    fn default() -> Self {
        Self {
            inter_probe_ms: 500,
            property_settle_ms: 500,
            exposure_settle_ms: 1000,
            mode_settle_ms: 800,
            autofocus_settle_ms: 1000,
            focus_settle_ms: 800,
            white_balance_settle_ms: 200,
            burst_interval_ms: 100,
            frame_rate_window_ms: 3000,
            power_window_ms: 5000,
            probe_budget_ms: 30_000,
            process_info_timeout_ms: 10_000,
        }
    }
}

impl ProbeTimings {
    /// No settle delays and short windows, for simulated devices.
    #[must_use]
    pub const fn immediate() -> Self {
        Self {
            inter_probe_ms: 0,
            property_settle_ms: 0,
            exposure_settle_ms: 0,
            mode_settle_ms: 0,
            autofocus_settle_ms: 0,
            focus_settle_ms: 0,
            white_balance_settle_ms: 0,
            burst_interval_ms: 0,
            frame_rate_window_ms: 50,
            power_window_ms: 50,
            probe_budget_ms: 30_000,
            process_info_timeout_ms: 10_000,
        }
    }

    /// Pause between probes.
    #[must_use]
    pub const fn inter_probe(&self) -> Duration {
        Duration::from_millis(self.inter_probe_ms)
    }

    /// Per-probe budget.
    #[must_use]
    pub const fn probe_budget(&self) -> Duration {
        Duration::from_millis(self.probe_budget_ms)
    }

    /// Host listing command limit.
    #[must_use]
    pub const fn process_info_timeout(&self) -> Duration {
        Duration::from_millis(self.process_info_timeout_ms)
    }
}

/// Fixed QA gates for the image quality probe. Heuristic, not physically
/// derived.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QualityThresholds {
    /// Laplacian variance below this is flagged as low sharpness.
    pub min_sharpness: f64,
    /// Mean luma below this is flagged as poor brightness.
    pub min_brightness: f64,
    /// Mean luma above this is flagged as poor brightness.
    pub max_brightness: f64,
    /// Luma standard deviation below this is flagged as low contrast.
    pub min_contrast: f64,
    /// High-frequency residual above this is flagged as high noise.
    pub max_noise: f64,
}

impl Default for QualityThresholds {
    fn default() -> Self {
        Self {
            min_sharpness: 50.0,
            min_brightness: 50.0,
            max_brightness: 200.0,
            min_contrast: 20.0,
            max_noise: 10.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_match_calibration() {
        let config = EngineConfig::default();
        assert_eq!(config.classifier.max_index, 15);
        assert_eq!(config.probes.resolution_ladder.len(), 3);
        assert_eq!(config.probes.timings.inter_probe(), Duration::from_millis(500));
        assert!((config.quality.max_noise - 10.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_load_without_file_uses_defaults() {
        let config = EngineConfig::load(None).expect("load should succeed");
        assert_eq!(config.probes.usb_frames, EngineConfig::default().probes.usb_frames);
    }

    #[test]
    fn test_load_merges_toml_over_defaults() {
        let mut file = tempfile::NamedTempFile::new().expect("tempfile");
        writeln!(
            file,
            "[classifier]\nmax_index = 4\naspect_tolerance = 0.05\n\n[probes.timings]\ninter_probe_ms = 0\n"
        )
        .expect("write config");

        let config = EngineConfig::load(Some(file.path())).expect("load should succeed");
        assert_eq!(config.classifier.max_index, 4);
        assert!((config.classifier.aspect_tolerance - 0.05).abs() < f64::EPSILON);
        assert_eq!(config.probes.timings.inter_probe_ms, 0);
        // Untouched keys keep their defaults.
        assert_eq!(config.probes.timings.focus_settle_ms, 800);
        assert_eq!(config.classifier.builtin_resolutions.len(), 3);
    }

    #[test]
    fn test_load_missing_file_is_an_error() {
        let result = EngineConfig::load(Some(Path::new("/nonexistent/cam-diag.toml")));
        assert!(result.is_err());
    }

    #[test]
    fn test_resolution_display() {
        assert_eq!(Resolution::new(640, 480).to_string(), "640x480");
    }
}
