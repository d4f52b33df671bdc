//! The fixed probe set.
//!
//! Each probe is a function of the device and a [`ProbeContext`] that
//! returns one [`ProbeResult`]. Probes never trust a write's return value:
//! capability is inferred from readbacks and measured frame changes. Every
//! probe that writes properties does so through a
//! [`PropertyGuard`](crate::guard::PropertyGuard), so the device leaves the
//! probe in the state it entered it.

mod controls;
mod exposure;
mod quality;
mod stream;

use std::fmt;
use std::str::FromStr;
use std::thread;
use std::time::{Duration, Instant};

use serde::Serialize;

use crate::config::EngineConfig;
use crate::error::{Error, Result};
use crate::ports::{ImageSink, ProcessInfo};
use crate::result::ProbeResult;
use crate::runner::CancelToken;
use crate::traits::CameraDevice;

/// Message used when a probe starts without an open device.
pub const NOT_CONNECTED: &str = "Camera not connected";

/// One of the defined probes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum ProbeKind {
    /// Read one frame.
    Detection,
    /// Request standard resolutions and read them back.
    Resolution,
    /// Count frames over a fixed window.
    FrameRate,
    /// Three-tier exposure capability search.
    ExposureControl,
    /// Autofocus toggle and manual focus sweep.
    Focus,
    /// Auto white balance toggle and color temperature.
    WhiteBalance,
    /// Sharpness, brightness, contrast and noise gates.
    ImageQuality,
    /// Back-to-back read throughput.
    UsbInterface,
    /// Liveness over a fixed window.
    PowerConsumption,
    /// Save one frame to the image sink.
    CaptureTestImage,
}

impl ProbeKind {
    /// Every probe, in the default run order.
    pub const ALL: [Self; 10] = [
        Self::Detection,
        Self::Resolution,
        Self::FrameRate,
        Self::ExposureControl,
        Self::Focus,
        Self::WhiteBalance,
        Self::ImageQuality,
        Self::UsbInterface,
        Self::PowerConsumption,
        Self::CaptureTestImage,
    ];

    /// Display name, also accepted by [`FromStr`].
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Detection => "Camera Detection",
            Self::Resolution => "Resolution Test",
            Self::FrameRate => "Frame Rate Test",
            Self::ExposureControl => "Exposure Control",
            Self::Focus => "Focus Test",
            Self::WhiteBalance => "White Balance",
            Self::ImageQuality => "Image Quality",
            Self::UsbInterface => "USB Interface",
            Self::PowerConsumption => "Power Consumption",
            Self::CaptureTestImage => "Capture Test Image",
        }
    }

    /// Short command-line name, also accepted by [`FromStr`].
    #[must_use]
    pub const fn slug(self) -> &'static str {
        match self {
            Self::Detection => "detection",
            Self::Resolution => "resolution",
            Self::FrameRate => "frame-rate",
            Self::ExposureControl => "exposure",
            Self::Focus => "focus",
            Self::WhiteBalance => "white-balance",
            Self::ImageQuality => "image-quality",
            Self::UsbInterface => "usb",
            Self::PowerConsumption => "power",
            Self::CaptureTestImage => "capture-image",
        }
    }
}

impl fmt::Display for ProbeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ProbeKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let wanted = s.trim();
        Self::ALL
            .into_iter()
            .find(|kind| kind.name().eq_ignore_ascii_case(wanted) || kind.slug() == wanted)
            .ok_or_else(|| Error::UnknownProbe(wanted.to_owned()))
    }
}

/// Everything a probe may use besides the device.
pub struct ProbeContext<'a> {
    config: &'a EngineConfig,
    cancel: &'a CancelToken,
    deadline: Instant,
    image_sink: Option<&'a dyn ImageSink>,
    process_info: Option<&'a dyn ProcessInfo>,
}

impl<'a> ProbeContext<'a> {
    /// A context whose budget starts now.
    pub fn new(config: &'a EngineConfig, cancel: &'a CancelToken) -> Self {
        Self {
            config,
            cancel,
            deadline: Instant::now() + config.probes.timings.probe_budget(),
            image_sink: None,
            process_info: None,
        }
    }

    /// Attach the image sink used by "Capture Test Image".
    #[must_use]
    pub fn with_image_sink(mut self, sink: Option<&'a dyn ImageSink>) -> Self {
        self.image_sink = sink;
        self
    }

    /// Attach the process-info port used by "USB Interface".
    #[must_use]
    pub fn with_process_info(mut self, info: Option<&'a dyn ProcessInfo>) -> Self {
        self.process_info = info;
        self
    }

    /// Engine configuration.
    pub const fn config(&self) -> &EngineConfig {
        self.config
    }

    /// Fail with [`Error::Cancelled`] if the caller cancelled the run.
    pub fn checkpoint(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            Err(Error::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Whether this probe has used up its time budget.
    pub fn budget_exhausted(&self) -> bool {
        Instant::now() >= self.deadline
    }

    /// Wait for an actuator to settle.
    pub fn settle(&self, millis: u64) {
        if millis > 0 {
            thread::sleep(Duration::from_millis(millis));
        }
    }

    pub(crate) const fn image_sink(&self) -> Option<&'a dyn ImageSink> {
        self.image_sink
    }

    pub(crate) const fn process_info(&self) -> Option<&'a dyn ProcessInfo> {
        self.process_info
    }
}

/// Run one probe against `device`.
///
/// Device errors that escape a probe are returned as `Err`; the runner turns
/// them into `FAIL` results. [`Error::Cancelled`] means the probe was
/// interrupted and produced no result.
pub fn run_probe<D: CameraDevice>(
    kind: ProbeKind,
    device: &mut D,
    ctx: &ProbeContext<'_>,
) -> Result<ProbeResult> {
    if !device.is_open() {
        return Ok(ProbeResult::fail(kind, NOT_CONNECTED));
    }

    match kind {
        ProbeKind::Detection => stream::detection(device),
        ProbeKind::Resolution => stream::resolution(device, ctx),
        ProbeKind::FrameRate => stream::frame_rate(device, ctx),
        ProbeKind::ExposureControl => exposure::exposure_control(device, ctx),
        ProbeKind::Focus => controls::focus(device, ctx),
        ProbeKind::WhiteBalance => controls::white_balance(device, ctx),
        ProbeKind::ImageQuality => quality::image_quality(device, ctx),
        ProbeKind::UsbInterface => stream::usb_interface(device, ctx),
        ProbeKind::PowerConsumption => stream::power(device, ctx),
        ProbeKind::CaptureTestImage => stream::capture_test_image(device, ctx),
    }
}

/// Round to two decimals for reporting.
pub(crate) fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Whether a readback shows a write took effect: `after` lands within
/// `tolerance` of `requested` and `before` did not already.
pub(crate) fn took_effect(before: Option<f64>, requested: f64, after: f64, tolerance: f64) -> bool {
    let reached = (after - requested).abs() < tolerance;
    let already = before.is_some_and(|value| (value - requested).abs() < tolerance);
    reached && !already
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::SimulatedCamera;
    use crate::result::ProbeStatus;

    #[test]
    fn test_probe_names_round_trip() {
        for kind in ProbeKind::ALL {
            assert_eq!(kind.name().parse::<ProbeKind>().expect("name"), kind);
            assert_eq!(kind.slug().parse::<ProbeKind>().expect("slug"), kind);
        }
        assert_eq!("exposure control".parse::<ProbeKind>().expect("case"), ProbeKind::ExposureControl);
        assert!(matches!("Zoom Test".parse::<ProbeKind>(), Err(Error::UnknownProbe(name)) if name == "Zoom Test"));
    }

    #[test]
    fn test_took_effect() {
        assert!(took_effect(Some(100.0), 50.0, 50.0, 5.0));
        // Already at the requested value: no evidence either way.
        assert!(!took_effect(Some(50.0), 50.0, 50.0, 5.0));
        assert!(!took_effect(Some(100.0), 50.0, 100.0, 5.0));
        assert!(took_effect(None, 50.0, 52.0, 5.0));
    }

    #[test]
    fn test_closed_device_fails_every_probe() {
        let config = EngineConfig::default();
        let cancel = CancelToken::new();
        let ctx = ProbeContext::new(&config, &cancel);
        let mut camera = SimulatedCamera::new();
        camera.close();

        for kind in ProbeKind::ALL {
            let result = run_probe(kind, &mut camera, &ctx).expect("result");
            assert_eq!(result.status(), ProbeStatus::Fail);
            assert_eq!(result.message(), NOT_CONNECTED);
        }
    }

    #[test]
    fn test_checkpoint_and_budget() {
        let mut config = EngineConfig::default();
        config.probes.timings.probe_budget_ms = 0;
        let cancel = CancelToken::new();
        let ctx = ProbeContext::new(&config, &cancel);
        assert!(ctx.budget_exhausted());
        assert!(ctx.checkpoint().is_ok());

        cancel.cancel();
        assert!(matches!(ctx.checkpoint(), Err(Error::Cancelled)));
    }
}
