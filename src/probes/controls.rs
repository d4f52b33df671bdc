//! Focus and white balance probes.

use tracing::{debug, info};

use super::{took_effect, ProbeContext, ProbeKind};
use crate::error::Result;
use crate::guard::PropertyGuard;
use crate::result::{Details, ProbeResult};
use crate::traits::{CameraDevice, Property};

/// Readbacks further apart than this count as a toggle.
const TOGGLE_THRESHOLD: f64 = 0.1;

/// Write `on` then `off`, settling after each, and return both readbacks.
fn toggle<D: CameraDevice>(
    device: &mut D,
    ctx: &ProbeContext<'_>,
    property: Property,
    settle_ms: u64,
) -> Result<Option<(f64, f64)>> {
    let mut readback = |value: f64| -> Result<Option<f64>> {
        ctx.checkpoint()?;
        if let Err(err) = device.set_property(property, value) {
            debug!(%property, value, error = %err, "toggle write failed");
        }
        ctx.settle(settle_ms);
        Ok(device.get_property(property).ok())
    };

    let on = readback(1.0)?;
    let off = readback(0.0)?;
    Ok(on.zip(off))
}

#[derive(Debug, Default)]
struct ManualFocus {
    working: Vec<f64>,
    responses: Details,
    budget_exhausted: bool,
}

fn manual_focus<D: CameraDevice>(device: &mut D, ctx: &ProbeContext<'_>) -> Result<ManualFocus> {
    let config = &ctx.config().probes;
    let mut outcome = ManualFocus::default();

    if let Err(err) = device.set_property(Property::Autofocus, 0.0) {
        debug!(error = %err, "could not disable autofocus");
    }
    ctx.settle(config.timings.property_settle_ms);

    let mut previous = device.get_property(Property::Focus).ok();
    for &position in &config.focus_ladder {
        ctx.checkpoint()?;
        if ctx.budget_exhausted() {
            outcome.budget_exhausted = true;
            break;
        }

        if let Err(err) = device.set_property(Property::Focus, position) {
            debug!(position, error = %err, "focus write failed");
            continue;
        }
        ctx.settle(config.timings.focus_settle_ms);

        let Ok(actual) = device.get_property(Property::Focus) else {
            continue;
        };
        outcome.responses.insert(position.to_string(), actual);

        let tolerance = (position * config.focus_tolerance_ratio).max(config.focus_tolerance_min);
        if took_effect(previous, position, actual, tolerance) {
            outcome.working.push(position);
        }
        debug!(position, actual, "focus position checked");
        previous = Some(actual);
    }

    Ok(outcome)
}

/// Drive focus from the lowest to the highest working position and check
/// the readback travels.
fn focus_sweep<D: CameraDevice>(device: &mut D, ctx: &ProbeContext<'_>, working: &[f64]) -> Result<bool> {
    let config = &ctx.config().probes;
    let min = working.iter().copied().fold(f64::INFINITY, f64::min);
    let max = working.iter().copied().fold(f64::NEG_INFINITY, f64::max);

    let mut position = |value: f64| -> Result<Option<f64>> {
        ctx.checkpoint()?;
        if let Err(err) = device.set_property(Property::Focus, value) {
            debug!(value, error = %err, "focus sweep write failed");
        }
        ctx.settle(config.timings.focus_settle_ms);
        Ok(device.get_property(Property::Focus).ok())
    };

    let start = position(min)?;
    let end = position(max)?;
    Ok(start
        .zip(end)
        .is_some_and(|(start, end)| (end - start).abs() > config.focus_sweep_min_travel))
}

pub(super) fn focus<D: CameraDevice>(device: &mut D, ctx: &ProbeContext<'_>) -> Result<ProbeResult> {
    let kind = ProbeKind::Focus;
    let config = &ctx.config().probes;
    let mut guard = PropertyGuard::capture(device, &[Property::Focus, Property::Autofocus]);
    let initial_position = guard.original(Property::Focus);
    let initial_autofocus = guard.original(Property::Autofocus);

    if initial_position.is_none() && initial_autofocus.is_none() {
        return Ok(ProbeResult::skip(kind, "No focus control capability detected"));
    }

    let autofocus_working = if initial_autofocus.is_some() {
        toggle(&mut *guard, ctx, Property::Autofocus, config.timings.autofocus_settle_ms)?
            .is_some_and(|(on, off)| (on - off).abs() > TOGGLE_THRESHOLD)
    } else {
        false
    };

    let manual = if initial_position.is_some() {
        manual_focus(&mut *guard, ctx)?
    } else {
        ManualFocus::default()
    };
    let sweep_working = manual.working.len() >= 2 && focus_sweep(&mut *guard, ctx, &manual.working)?;
    drop(guard);

    info!(autofocus_working, manual_positions = manual.working.len(), sweep_working, "focus checked");

    let manual_working = !manual.working.is_empty();
    let mut details = Details::new()
        .with("autofocus_working", autofocus_working)
        .with("manual_focus_working", manual_working)
        .with("working_focus_values", manual.working.clone())
        .with("focus_responses", manual.responses)
        .with("focus_sweep_working", sweep_working)
        .with("focus_range_tested", config.focus_ladder.clone());
    if let Some(value) = initial_autofocus {
        details.insert("initial_autofocus", value);
    }
    if let Some(value) = initial_position {
        details.insert("initial_focus_position", value);
    }
    if manual.budget_exhausted {
        details.insert("budget_exhausted", true);
    }

    if autofocus_working || manual_working {
        let mut capabilities = Vec::new();
        if autofocus_working {
            capabilities.push("Autofocus".to_owned());
        }
        if manual_working {
            capabilities.push(format!("Manual focus ({} positions)", manual.working.len()));
        }
        if sweep_working {
            capabilities.push("Focus sweep".to_owned());
        }
        return Ok(ProbeResult::pass(
            kind,
            format!("Focus control functional: {}", capabilities.join(", ")),
        )
        .with_details(details));
    }

    let reports_hardware = initial_position.is_some_and(|v| v > 0.0) || initial_autofocus.is_some_and(|v| v > 0.0);
    if reports_hardware {
        return Ok(
            ProbeResult::fail(kind, "Focus hardware detected but controls not responding").with_details(details),
        );
    }
    Ok(ProbeResult::skip(kind, "No focus control capability detected").with_details(details))
}

pub(super) fn white_balance<D: CameraDevice>(device: &mut D, ctx: &ProbeContext<'_>) -> Result<ProbeResult> {
    let kind = ProbeKind::WhiteBalance;
    let settle = ctx.config().probes.timings.white_balance_settle_ms;
    let mut guard = PropertyGuard::capture(
        device,
        &[Property::WhiteBalanceTemperature, Property::AutoWhiteBalance],
    );
    let temperature = guard.original(Property::WhiteBalanceTemperature);
    let initial_auto = guard.original(Property::AutoWhiteBalance);

    let auto_control = if initial_auto.is_some() {
        toggle(&mut *guard, ctx, Property::AutoWhiteBalance, settle)?
            .is_some_and(|(on, off)| (on - off).abs() > f64::EPSILON)
    } else {
        false
    };
    drop(guard);

    let mut details = Details::new().with("auto_wb_control", auto_control);
    if let Some(value) = temperature {
        details.insert("wb_temperature", value);
    }
    if let Some(value) = initial_auto {
        details.insert("initial_auto_wb", value);
    }

    if auto_control || temperature.is_some_and(|kelvin| kelvin > 0.0) {
        return Ok(ProbeResult::pass(kind, "White balance controls available").with_details(details));
    }
    Ok(ProbeResult::skip(kind, "White balance controls not available").with_details(details))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{EngineConfig, ProbeTimings};
    use crate::mock::{Behavior, SimulatedCamera};
    use crate::result::{DetailValue, ProbeStatus};
    use crate::runner::CancelToken;

    fn quick_config() -> EngineConfig {
        let mut config = EngineConfig::default();
        config.probes.timings = ProbeTimings::immediate();
        config
    }

    #[test]
    fn test_focus_full_capability() {
        let config = quick_config();
        let cancel = CancelToken::new();
        let ctx = ProbeContext::new(&config, &cancel);
        let mut camera = SimulatedCamera::new();

        let result = focus(&mut camera, &ctx).expect("probe");
        assert_eq!(result.status(), ProbeStatus::Pass);
        // Position 0 is where the lens already sits, so it proves nothing.
        assert_eq!(
            result.message(),
            "Focus control functional: Autofocus, Manual focus (8 positions), Focus sweep"
        );
        assert!((camera.get_property(Property::Autofocus).expect("af") - 1.0).abs() < f64::EPSILON);
        assert!(camera.get_property(Property::Focus).expect("focus").abs() < f64::EPSILON);
    }

    #[test]
    fn test_focus_stuck_hardware_fails() {
        let config = quick_config();
        let cancel = CancelToken::new();
        let ctx = ProbeContext::new(&config, &cancel);
        let mut camera = SimulatedCamera::new()
            .with_property(Property::Focus, 30.0, Behavior::Ignore)
            .with_property(Property::Autofocus, 1.0, Behavior::Ignore);

        let result = focus(&mut camera, &ctx).expect("probe");
        assert_eq!(result.status(), ProbeStatus::Fail);
        assert_eq!(result.message(), "Focus hardware detected but controls not responding");
    }

    #[test]
    fn test_focus_fixed_lens_skips() {
        let config = quick_config();
        let cancel = CancelToken::new();
        let ctx = ProbeContext::new(&config, &cancel);
        let mut camera = SimulatedCamera::new()
            .with_behavior(Property::Focus, Behavior::Unsupported)
            .with_behavior(Property::Autofocus, Behavior::Unsupported);

        let result = focus(&mut camera, &ctx).expect("probe");
        assert_eq!(result.status(), ProbeStatus::Skip);

        let mut camera = SimulatedCamera::new()
            .with_property(Property::Focus, 0.0, Behavior::Ignore)
            .with_property(Property::Autofocus, 0.0, Behavior::Ignore);
        let result = focus(&mut camera, &ctx).expect("probe");
        assert_eq!(result.status(), ProbeStatus::Skip);
    }

    #[test]
    fn test_focus_clamped_range_counts_reachable_positions() {
        let config = quick_config();
        let cancel = CancelToken::new();
        let ctx = ProbeContext::new(&config, &cancel);
        let mut camera = SimulatedCamera::new()
            .with_property(Property::Focus, 0.0, Behavior::Honor(Some((0.0, 60.0))))
            .with_behavior(Property::Autofocus, Behavior::Unsupported);

        let result = focus(&mut camera, &ctx).expect("probe");
        assert_eq!(result.status(), ProbeStatus::Pass);
        let working = result.details().get("working_focus_values");
        assert_eq!(
            working,
            Some(&DetailValue::List(vec![
                DetailValue::Number(10.0),
                DetailValue::Number(25.0),
                DetailValue::Number(50.0),
            ]))
        );
    }

    #[test]
    fn test_white_balance_toggle_passes() {
        let config = quick_config();
        let cancel = CancelToken::new();
        let ctx = ProbeContext::new(&config, &cancel);
        let mut camera = SimulatedCamera::new();

        let result = white_balance(&mut camera, &ctx).expect("probe");
        assert_eq!(result.status(), ProbeStatus::Pass);
        assert_eq!(result.details().get("auto_wb_control"), Some(&DetailValue::Bool(true)));
        assert!((camera.get_property(Property::AutoWhiteBalance).expect("awb") - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_white_balance_temperature_alone_passes() {
        let config = quick_config();
        let cancel = CancelToken::new();
        let ctx = ProbeContext::new(&config, &cancel);
        let mut camera = SimulatedCamera::new().with_behavior(Property::AutoWhiteBalance, Behavior::Unsupported);

        let result = white_balance(&mut camera, &ctx).expect("probe");
        assert_eq!(result.status(), ProbeStatus::Pass);
        assert_eq!(result.details().get("auto_wb_control"), Some(&DetailValue::Bool(false)));
    }

    #[test]
    fn test_white_balance_absent_skips() {
        let config = quick_config();
        let cancel = CancelToken::new();
        let ctx = ProbeContext::new(&config, &cancel);
        let mut camera = SimulatedCamera::new()
            .with_property(Property::WhiteBalanceTemperature, 0.0, Behavior::Ignore)
            .with_property(Property::AutoWhiteBalance, 1.0, Behavior::Ignore);

        let result = white_balance(&mut camera, &ctx).expect("probe");
        assert_eq!(result.status(), ProbeStatus::Skip);
    }
}
