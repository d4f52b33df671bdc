//! Probes driven by frame reads: detection, resolution, frame rate, USB
//! throughput, liveness and the test image capture.

use std::fs;
use std::time::{Duration, Instant};

use chrono::Local;
use tracing::{debug, info};

use super::{round2, ProbeContext, ProbeKind};
use crate::classifier::video_device_lines;
use crate::error::Result;
use crate::guard::PropertyGuard;
use crate::result::{Details, ProbeResult};
use crate::traits::{CameraDevice, Property};

/// Back-off after a failed read inside a timed window.
const READ_RETRY_DELAY: Duration = Duration::from_millis(10);

pub(super) fn detection<D: CameraDevice>(device: &mut D) -> Result<ProbeResult> {
    let kind = ProbeKind::Detection;
    let frame = match device.read_frame() {
        Ok(frame) => frame,
        Err(err) => {
            debug!(error = %err, "detection read failed");
            return Ok(ProbeResult::fail(kind, "Cannot read frames from camera"));
        }
    };

    if !frame.has_dimensions() {
        return Ok(ProbeResult::fail(kind, "Invalid frame dimensions"));
    }

    let details = Details::new()
        .with("width", frame.width)
        .with("height", frame.height)
        .with("channels", frame.channels())
        .with("format", frame.fourcc.to_string());
    Ok(ProbeResult::pass(kind, "Camera detected and responding").with_details(details))
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub(super) fn resolution<D: CameraDevice>(device: &mut D, ctx: &ProbeContext<'_>) -> Result<ProbeResult> {
    let kind = ProbeKind::Resolution;
    let config = &ctx.config().probes;
    let mut guard = PropertyGuard::capture(device, &[Property::Width, Property::Height]);

    let mut supported = Vec::new();
    let mut readbacks = Details::new();
    let mut budget_exhausted = false;

    for requested in &config.resolution_ladder {
        ctx.checkpoint()?;
        if ctx.budget_exhausted() {
            budget_exhausted = true;
            break;
        }

        for (property, value) in [
            (Property::Width, requested.width),
            (Property::Height, requested.height),
        ] {
            if let Err(err) = guard.set_property(property, f64::from(value)) {
                debug!(%property, value, error = %err, "resolution write failed");
            }
        }
        ctx.settle(config.timings.property_settle_ms);

        let actual = guard
            .get_property(Property::Width)
            .and_then(|w| Ok((w, guard.get_property(Property::Height)?)));
        let (width, height) = match actual {
            Ok((w, h)) => (w.round() as u32, h.round() as u32),
            Err(err) => {
                debug!(%requested, error = %err, "resolution readback failed");
                readbacks.insert(requested.to_string(), "unreadable");
                continue;
            }
        };

        readbacks.insert(requested.to_string(), format!("{width}x{height}"));
        if width == requested.width && height == requested.height {
            supported.push(requested.to_string());
        }
    }
    drop(guard);

    let mut details = Details::new()
        .with("supported_resolutions", supported.clone())
        .with("readbacks", readbacks);
    if budget_exhausted {
        details.insert("budget_exhausted", true);
    }

    if supported.is_empty() {
        return Ok(ProbeResult::fail(kind, "No standard resolutions supported").with_details(details));
    }
    Ok(ProbeResult::pass(kind, format!("Supported resolutions: {}", supported.join(", ")))
        .with_details(details))
}

/// Frames missing between two sequence numbers.
pub(super) const fn sequence_gap(previous: u32, next: u32) -> u32 {
    next.wrapping_sub(previous).saturating_sub(1)
}

#[derive(Debug, Default)]
struct WindowStats {
    frames: u32,
    failed_reads: u32,
    dropped: u32,
    elapsed: Duration,
    last_error: Option<String>,
}

impl WindowStats {
    #[allow(clippy::cast_precision_loss)]
    fn rate(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs > 0.0 {
            f64::from(self.frames) / secs
        } else {
            0.0
        }
    }
}

/// Read frames until `window` elapses. With `stop_on_error` the first failed
/// read ends the window early.
fn read_for<D: CameraDevice>(
    device: &mut D,
    ctx: &ProbeContext<'_>,
    window: Duration,
    stop_on_error: bool,
) -> Result<WindowStats> {
    let mut stats = WindowStats::default();
    let mut last_sequence = None;
    let start = Instant::now();

    while start.elapsed() < window {
        ctx.checkpoint()?;
        match device.read_frame() {
            Ok(frame) => {
                stats.frames += 1;
                let sequence = frame.metadata.sequence;
                if let Some(previous) = last_sequence {
                    stats.dropped += sequence_gap(previous, sequence);
                }
                last_sequence = Some(sequence);
            }
            Err(err) => {
                stats.failed_reads += 1;
                stats.last_error = Some(err.to_string());
                if stop_on_error {
                    break;
                }
                std::thread::sleep(READ_RETRY_DELAY);
            }
        }
    }

    stats.elapsed = start.elapsed();
    Ok(stats)
}

pub(super) fn frame_rate<D: CameraDevice>(device: &mut D, ctx: &ProbeContext<'_>) -> Result<ProbeResult> {
    let kind = ProbeKind::FrameRate;
    let config = &ctx.config().probes;
    let window = Duration::from_millis(config.timings.frame_rate_window_ms);

    let stats = read_for(device, ctx, window, true)?;
    let fps = stats.rate();
    let reported = device.get_property(Property::Fps).unwrap_or(0.0);
    info!(fps, reported, frames = stats.frames, dropped = stats.dropped, "frame rate measured");

    let mut details = Details::new()
        .with("measured_fps", round2(fps))
        .with("reported_fps", reported)
        .with("frame_count", stats.frames)
        .with("test_duration", round2(stats.elapsed.as_secs_f64()))
        .with("dropped_frames", stats.dropped);
    if let Some(error) = stats.last_error {
        details.insert("read_error", error);
    }

    if fps < config.min_frame_rate {
        return Ok(ProbeResult::fail(kind, format!("Very low frame rate: {fps:.2} FPS")).with_details(details));
    }
    Ok(ProbeResult::pass(kind, format!("Frame rate: {fps:.2} FPS (reported: {reported})"))
        .with_details(details))
}

pub(super) fn usb_interface<D: CameraDevice>(device: &mut D, ctx: &ProbeContext<'_>) -> Result<ProbeResult> {
    let kind = ProbeKind::UsbInterface;
    let config = ctx.config();

    // Host listings are supplementary; a missing tool never fails the probe.
    let evidence = ctx
        .process_info()
        .and_then(|info| match info.query() {
            Ok(text) => Some(video_device_lines(&text, &config.classifier.usb_keywords)),
            Err(err) => {
                debug!(error = %err, "process info unavailable");
                None
            }
        })
        .unwrap_or_default();
    let usb_info = if evidence.is_empty() {
        "USB interface detected"
    } else {
        "USB camera device found in system"
    };

    let start = Instant::now();
    let mut frames_read = 0u32;
    for _ in 0..config.probes.usb_frames {
        ctx.checkpoint()?;
        match device.read_frame() {
            Ok(_) => frames_read += 1,
            Err(err) => {
                debug!(error = %err, "USB throughput read failed");
                break;
            }
        }
    }
    let elapsed = start.elapsed().as_secs_f64();
    let rate = if elapsed > 0.0 {
        f64::from(frames_read) / elapsed
    } else {
        0.0
    };

    let mut details = Details::new()
        .with("transfer_rate_fps", round2(rate))
        .with("usb_info", usb_info)
        .with("frames_tested", config.probes.usb_frames)
        .with("frames_read", frames_read);
    if !evidence.is_empty() {
        details.insert("usb_devices", evidence);
    }

    if frames_read > 0 && rate >= config.probes.min_usb_rate {
        return Ok(ProbeResult::pass(kind, format!("USB interface working, transfer rate: {rate:.1} FPS"))
            .with_details(details));
    }
    Ok(ProbeResult::fail(kind, format!("Poor USB transfer rate: {rate:.1} FPS")).with_details(details))
}

pub(super) fn power<D: CameraDevice>(device: &mut D, ctx: &ProbeContext<'_>) -> Result<ProbeResult> {
    let kind = ProbeKind::PowerConsumption;
    let window = Duration::from_millis(ctx.config().probes.timings.power_window_ms);

    let stats = read_for(device, ctx, window, false)?;
    let secs = round2(stats.elapsed.as_secs_f64());
    let details = Details::new()
        .with("test_duration", secs)
        .with("frames_captured", stats.frames)
        .with("failed_reads", stats.failed_reads);

    if stats.frames > 0 {
        return Ok(ProbeResult::pass(
            kind,
            format!("Camera operational, captured {} frames in {secs}s", stats.frames),
        )
        .with_details(details));
    }
    Ok(ProbeResult::fail(kind, "Camera not responding during power test").with_details(details))
}

pub(super) fn capture_test_image<D: CameraDevice>(
    device: &mut D,
    ctx: &ProbeContext<'_>,
) -> Result<ProbeResult> {
    let kind = ProbeKind::CaptureTestImage;
    let Some(sink) = ctx.image_sink() else {
        return Ok(ProbeResult::fail(kind, "No image sink configured"));
    };

    let frame = match device.read_frame() {
        Ok(frame) => frame,
        Err(err) => {
            debug!(error = %err, "test image read failed");
            return Ok(ProbeResult::fail(kind, "Cannot capture frame"));
        }
    };

    let name = format!("test_image_{}", Local::now().format("%Y%m%d_%H%M%S"));
    let path = match sink.save(&frame, &name) {
        Ok(path) => path,
        Err(err) => return Ok(ProbeResult::fail(kind, format!("Failed to save test image: {err}"))),
    };

    let mut details = Details::new()
        .with("image_path", path.display().to_string())
        .with("image_size", format!("{}x{}", frame.width, frame.height));
    if let Ok(metadata) = fs::metadata(&path) {
        details.insert("file_size", metadata.len());
    }
    Ok(ProbeResult::pass(kind, format!("Test image saved: {}", path.display())).with_details(details))
}
