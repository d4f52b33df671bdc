//! Image quality probe.

use tracing::{debug, info};

use super::{round2, ProbeContext, ProbeKind};
use crate::error::{Error, Result};
use crate::metrics::{dynamic_range, snr_db, temporal_noise, GrayFrame, QualityReport};
use crate::result::{DetailValue, Details, ProbeResult};
use crate::traits::CameraDevice;

pub(super) fn image_quality<D: CameraDevice>(device: &mut D, ctx: &ProbeContext<'_>) -> Result<ProbeResult> {
    let kind = ProbeKind::ImageQuality;
    let config = ctx.config();

    let frame = match device.read_frame() {
        Ok(frame) => frame,
        Err(err) => {
            debug!(error = %err, "quality read failed");
            return Ok(ProbeResult::fail(kind, "Cannot capture frame"));
        }
    };
    let gray = GrayFrame::from_frame(&frame)?;
    let report = QualityReport::assess(&gray, &config.quality);

    // The burst only feeds informational statistics; the verdict rests on
    // the first frame.
    let mut burst = vec![gray];
    for _ in 1..config.probes.quality_burst_frames {
        ctx.checkpoint()?;
        ctx.settle(config.probes.timings.burst_interval_ms);
        match device.read_frame().and_then(|f| GrayFrame::from_frame(&f)) {
            Ok(next) if next.width == frame.width && next.height == frame.height => burst.push(next),
            Ok(_) => debug!("frame size changed during burst"),
            Err(err) => {
                debug!(error = %err, "burst read failed");
                break;
            }
        }
    }

    let snr = snr_db(report.brightness, report.contrast);
    let mut details = Details::new()
        .with("sharpness", round2(report.sharpness))
        .with("brightness", round2(report.brightness))
        .with("contrast", round2(report.contrast))
        .with("noise_level", round2(report.noise))
        .with("resolution", format!("{}x{}", frame.width, frame.height))
        .with("temporal_noise", round2(temporal_noise(&burst)))
        .with(
            "snr_db",
            if snr.is_finite() {
                DetailValue::Number(round2(snr))
            } else {
                DetailValue::Text("inf".to_owned())
            },
        )
        .with("dynamic_range", u32::from(burst.first().map_or(0, dynamic_range)))
        .with("burst_frames", u32::try_from(burst.len()).unwrap_or(u32::MAX));

    let issues: Vec<String> = report.flags.iter().map(ToString::to_string).collect();
    if !issues.is_empty() {
        details.insert("quality_issues", issues.clone());
    }
    info!(
        sharpness = report.sharpness,
        brightness = report.brightness,
        contrast = report.contrast,
        noise = report.noise,
        "image quality measured"
    );

    if report.contrast <= f64::EPSILON {
        let inconclusive = Error::MeasurementInconclusive("zero-variance frame".to_owned());
        details.insert("inconclusive", true);
        return Ok(ProbeResult::fail(kind, inconclusive.to_string()).with_details(details));
    }
    if !report.is_acceptable() {
        return Ok(ProbeResult::fail(kind, format!("Quality issues: {}", issues.join(", "))).with_details(details));
    }
    Ok(ProbeResult::pass(kind, "Image quality metrics within acceptable range").with_details(details))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{EngineConfig, ProbeTimings};
    use crate::mock::{SimulatedCamera, TestPattern};
    use crate::result::ProbeStatus;
    use crate::runner::CancelToken;

    fn quick_config() -> EngineConfig {
        let mut config = EngineConfig::default();
        config.probes.timings = ProbeTimings::immediate();
        config
    }

    #[test]
    fn test_checkerboard_passes_quality_gates() {
        let config = quick_config();
        let cancel = CancelToken::new();
        let ctx = ProbeContext::new(&config, &cancel);
        let mut camera = SimulatedCamera::new();

        let result = image_quality(&mut camera, &ctx).expect("probe");
        assert_eq!(result.status(), ProbeStatus::Pass, "{}", result.message());
        assert_eq!(result.details().get("resolution").and_then(DetailValue::as_str), Some("640x480"));
        assert_eq!(result.details().get("burst_frames").and_then(DetailValue::as_f64), Some(5.0));
        // Simulated frames are identical, so nothing changes between them.
        assert_eq!(result.details().get("temporal_noise").and_then(DetailValue::as_f64), Some(0.0));
    }

    #[test]
    fn test_flat_frame_is_inconclusive() {
        let config = quick_config();
        let cancel = CancelToken::new();
        let ctx = ProbeContext::new(&config, &cancel);
        let mut camera = SimulatedCamera::new()
            .with_resolution(64, 48)
            .with_pattern(TestPattern::Solid(128, 128, 128));

        let result = image_quality(&mut camera, &ctx).expect("probe");
        assert_eq!(result.status(), ProbeStatus::Fail);
        assert_eq!(result.message(), "Measurement inconclusive: zero-variance frame");
        assert_eq!(result.details().get("inconclusive"), Some(&DetailValue::Bool(true)));
        assert_eq!(result.details().get("snr_db").and_then(DetailValue::as_str), Some("inf"));
    }

    #[test]
    fn test_dark_frame_is_flagged() {
        let config = quick_config();
        let cancel = CancelToken::new();
        let ctx = ProbeContext::new(&config, &cancel);
        let mut camera = SimulatedCamera::new()
            .without_luma_response()
            .with_pattern(TestPattern::Checkerboard {
                cell: 160,
                low: 5,
                high: 60,
            });

        let result = image_quality(&mut camera, &ctx).expect("probe");
        assert_eq!(result.status(), ProbeStatus::Fail);
        assert!(result.message().starts_with("Quality issues:"));
        assert!(result.message().contains("Poor brightness"));
    }

    #[test]
    fn test_read_failure_fails() {
        let config = quick_config();
        let cancel = CancelToken::new();
        let ctx = ProbeContext::new(&config, &cancel);
        let mut camera = SimulatedCamera::new().with_read_failures();

        let result = image_quality(&mut camera, &ctx).expect("probe");
        assert_eq!(result.message(), "Cannot capture frame");
    }
}
