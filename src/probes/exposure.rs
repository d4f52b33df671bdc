//! Exposure capability search.
//!
//! Three tiers run in order and a later tier only runs if the earlier ones
//! found nothing:
//!
//! 1. `method1_direct_exposure`: switch to manual exposure and sweep the
//!    absolute exposure ladder.
//! 2. `method2_alternatives`: sweep brightness and gain, which many UVC
//!    cameras expose when absolute exposure is locked.
//! 3. `method3_auto_exposure`: toggle the auto-exposure modes and check the
//!    readback follows.
//!
//! A ladder value counts as working when its readback moved to the request
//! or the mean frame luma moved past a threshold.

use tracing::{debug, info};

use super::{took_effect, ProbeContext, ProbeKind};
use crate::error::Result;
use crate::guard::PropertyGuard;
use crate::metrics::{brightness, GrayFrame};
use crate::result::{Details, ProbeResult};
use crate::traits::{CameraDevice, CameraError, Property};

const EXPOSURE_PROPERTIES: [Property; 4] = [
    Property::Exposure,
    Property::AutoExposure,
    Property::Brightness,
    Property::Gain,
];

/// A mode readback within this distance of the written code counts as set.
const MODE_TOLERANCE: f64 = 0.1;

/// Mean luma of the next frame, or `None` if no frame could be measured.
fn frame_brightness<D: CameraDevice>(device: &mut D) -> Option<f64> {
    let frame = device
        .read_frame()
        .map_err(|err| debug!(error = %err, "brightness sample read failed"))
        .ok()?;
    GrayFrame::from_frame(&frame)
        .map(|gray| brightness(&gray))
        .map_err(|err| debug!(error = %err, "brightness sample decode failed"))
        .ok()
}

#[derive(Debug, Default)]
struct SweepOutcome {
    working: Vec<f64>,
    responses: Details,
    budget_exhausted: bool,
}

struct Sweep<'a, F> {
    property: Property,
    ladder: &'a [f64],
    tolerance: F,
    settle_ms: u64,
    min_luma_change: f64,
}

impl<F: Fn(f64) -> f64> Sweep<'_, F> {
    fn run<D: CameraDevice>(&self, device: &mut D, ctx: &ProbeContext<'_>) -> Result<SweepOutcome> {
        let mut outcome = SweepOutcome::default();
        let property = self.property;

        for &value in self.ladder {
            ctx.checkpoint()?;
            if ctx.budget_exhausted() {
                outcome.budget_exhausted = true;
                break;
            }

            let before = device.get_property(property).ok();
            let baseline = frame_brightness(device);
            let accepted = match device.set_property(property, value) {
                Ok(accepted) => accepted,
                Err(CameraError::PropertyUnsupported(_)) => {
                    debug!(%property, "property unsupported, abandoning sweep");
                    break;
                }
                Err(err) => {
                    debug!(%property, value, error = %err, "sweep write failed");
                    continue;
                }
            };
            ctx.settle(self.settle_ms);

            let reported = match device.get_property(property) {
                Ok(reported) => reported,
                Err(err) => {
                    debug!(%property, value, error = %err, "sweep readback failed");
                    continue;
                }
            };
            let luma_change = baseline
                .zip(frame_brightness(device))
                .map(|(start, end)| (end - start).abs());

            let echoed = took_effect(before, value, reported, (self.tolerance)(value));
            let visible = luma_change.is_some_and(|change| change > self.min_luma_change);
            debug!(%property, value, reported, accepted, ?luma_change, echoed, visible, "sweep step");

            let mut response = Details::new()
                .with("reported", reported)
                .with("accepted", accepted)
                .with("readback_match", echoed);
            if let Some(change) = luma_change {
                response.insert("brightness_change", super::round2(change));
            }
            outcome.responses.insert(value.to_string(), response);

            if echoed || visible {
                outcome.working.push(value);
            }
        }

        Ok(outcome)
    }
}

/// Try the manual-mode codes in order; return the first one the device
/// reports back.
fn enter_manual_mode<D: CameraDevice>(device: &mut D, ctx: &ProbeContext<'_>) -> Result<Option<f64>> {
    let config = &ctx.config().probes;
    for &code in &config.manual_exposure_modes {
        ctx.checkpoint()?;
        if let Err(err) = device.set_property(Property::AutoExposure, code) {
            debug!(code, error = %err, "manual mode write failed");
            continue;
        }
        ctx.settle(config.timings.mode_settle_ms);
        if let Ok(readback) = device.get_property(Property::AutoExposure) {
            if (readback - code).abs() < MODE_TOLERANCE {
                return Ok(Some(code));
            }
        }
    }
    Ok(None)
}

fn direct_exposure<D: CameraDevice>(
    device: &mut D,
    ctx: &ProbeContext<'_>,
    details: &mut Details,
) -> Result<usize> {
    let config = &ctx.config().probes;
    let manual_mode = enter_manual_mode(device, ctx)?;

    let outcome = Sweep {
        property: Property::Exposure,
        ladder: &config.exposure_ladder,
        tolerance: |value: f64| (value.abs() * config.exposure_tolerance).max(1.0),
        settle_ms: config.timings.exposure_settle_ms,
        min_luma_change: config.exposure_brightness_delta,
    }
    .run(device, ctx)?;

    let working = !outcome.working.is_empty();
    let mut tier = Details::new()
        .with("working", working)
        .with("working_values", outcome.working.clone())
        .with("responses", outcome.responses);
    if let Some(code) = manual_mode {
        tier.insert("manual_mode", code);
    }
    details.insert("method1_direct_exposure", tier);
    if outcome.budget_exhausted {
        details.insert("budget_exhausted", true);
    }

    info!(working_values = outcome.working.len(), "direct exposure sweep finished");
    Ok(outcome.working.len())
}

fn alternatives<D: CameraDevice>(
    device: &mut D,
    ctx: &ProbeContext<'_>,
    details: &mut Details,
) -> Result<Vec<&'static str>> {
    let config = &ctx.config().probes;

    let brightness = Sweep {
        property: Property::Brightness,
        ladder: &config.brightness_ladder,
        tolerance: |_: f64| config.brightness_tolerance,
        settle_ms: config.timings.property_settle_ms,
        min_luma_change: config.alternative_brightness_delta,
    }
    .run(device, ctx)?;

    let gain = Sweep {
        property: Property::Gain,
        ladder: &config.gain_ladder,
        tolerance: |value: f64| (value * config.gain_tolerance_ratio).max(config.gain_tolerance_min),
        settle_ms: config.timings.property_settle_ms,
        min_luma_change: config.alternative_brightness_delta,
    }
    .run(device, ctx)?;

    let mut controls = Vec::new();
    if !brightness.working.is_empty() {
        controls.push("brightness");
    }
    if !gain.working.is_empty() {
        controls.push("gain");
    }

    details.insert(
        "method2_alternatives",
        Details::new()
            .with("working", !controls.is_empty())
            .with("brightness_working", brightness.working.clone())
            .with("gain_working", gain.working.clone())
            .with("brightness_responses", brightness.responses)
            .with("gain_responses", gain.responses),
    );
    if brightness.budget_exhausted || gain.budget_exhausted {
        details.insert("budget_exhausted", true);
    }

    info!(?controls, "alternative exposure controls checked");
    Ok(controls)
}

fn auto_exposure_modes<D: CameraDevice>(
    device: &mut D,
    ctx: &ProbeContext<'_>,
    details: &mut Details,
) -> Result<bool> {
    let config = &ctx.config().probes;
    let mut responses = Details::new();
    let mut readbacks: Vec<f64> = Vec::new();

    for mode in &config.auto_exposure_modes {
        ctx.checkpoint()?;
        if ctx.budget_exhausted() {
            details.insert("budget_exhausted", true);
            break;
        }
        if let Err(err) = device.set_property(Property::AutoExposure, mode.code) {
            debug!(mode = %mode.name, error = %err, "auto-exposure mode write failed");
            continue;
        }
        ctx.settle(config.timings.mode_settle_ms);
        match device.get_property(Property::AutoExposure) {
            Ok(readback) => {
                responses.insert(mode.name.clone(), readback);
                if !readbacks.iter().any(|seen| (seen - readback).abs() < f64::EPSILON) {
                    readbacks.push(readback);
                }
            }
            Err(err) => debug!(mode = %mode.name, error = %err, "auto-exposure readback failed"),
        }
    }

    let working = readbacks.len() > 1;
    details.insert(
        "method3_auto_exposure",
        Details::new()
            .with("working", working)
            .with("mode_responses", responses),
    );
    Ok(working)
}

pub(super) fn exposure_control<D: CameraDevice>(
    device: &mut D,
    ctx: &ProbeContext<'_>,
) -> Result<ProbeResult> {
    let kind = ProbeKind::ExposureControl;
    let mut guard = PropertyGuard::capture(device, &EXPOSURE_PROPERTIES);
    if guard.originals().is_empty() {
        return Ok(ProbeResult::skip(kind, "No exposure controls exposed by device"));
    }

    let mut initial = Details::new();
    for &(property, value) in guard.originals() {
        initial.insert(property.key(), value);
    }
    let mut details = Details::new();

    let direct = direct_exposure(&mut *guard, ctx, &mut details)?;
    let verdict = if direct > 0 {
        Some((
            "method1_direct_exposure",
            format!("Direct exposure control working ({direct} values)"),
        ))
    } else {
        let controls = alternatives(&mut *guard, ctx, &mut details)?;
        if !controls.is_empty() {
            Some((
                "method2_alternatives",
                format!("Alternative controls working: {}", controls.join(", ")),
            ))
        } else if auto_exposure_modes(&mut *guard, ctx, &mut details)? {
            Some(("method3_auto_exposure", "Auto-exposure modes functional".to_owned()))
        } else {
            None
        }
    };
    drop(guard);

    details.insert("initial_state", initial);
    match verdict {
        Some((method, message)) => {
            details.insert("method", method);
            Ok(ProbeResult::pass(kind, message).with_details(details))
        }
        None => Ok(ProbeResult::fail(kind, "No exposure control methods responsive").with_details(details)),
    }
}
