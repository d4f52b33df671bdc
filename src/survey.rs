//! Property writability survey.
//!
//! Reads every control property, nudges it by one unit, reads it back and
//! puts the original value back. This is a quick inventory of what a driver
//! actually lets through, not a capability verdict.

use std::thread;
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, info};

use crate::guard::PropertyGuard;
use crate::traits::{CameraDevice, Property};

/// Properties covered by the survey. Frame geometry and buffering are left
/// to the resolution probe and the classifier.
pub const SURVEYED: [Property; 9] = [
    Property::Fps,
    Property::Exposure,
    Property::AutoExposure,
    Property::Brightness,
    Property::Gain,
    Property::Focus,
    Property::Autofocus,
    Property::WhiteBalanceTemperature,
    Property::AutoWhiteBalance,
];

/// Outcome of surveying one property.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PropertyReport {
    /// Surveyed property.
    pub property: Property,
    /// Value before the survey touched it, if readable.
    pub value: Option<f64>,
    /// Value written.
    pub written: Option<f64>,
    /// Value read back after the write.
    pub readback: Option<f64>,
    /// The readback moved to the written value.
    pub writable: bool,
    /// Device error, if any step failed.
    pub error: Option<String>,
}

impl PropertyReport {
    fn unreadable(property: Property, error: String) -> Self {
        Self {
            property,
            value: None,
            written: None,
            readback: None,
            writable: false,
            error: Some(error),
        }
    }
}

/// Survey [`SURVEYED`] on `device`, waiting `settle` after each write.
///
/// A property counts as writable when its readback lands within
/// `max(1, 10%)` of the written value and differs from the original.
pub fn survey_properties<D: CameraDevice>(device: &mut D, settle: Duration) -> Vec<PropertyReport> {
    SURVEYED
        .iter()
        .map(|&property| survey_one(device, property, settle))
        .collect()
}

fn survey_one<D: CameraDevice>(device: &mut D, property: Property, settle: Duration) -> PropertyReport {
    let mut guard = PropertyGuard::capture(device, &[property]);
    let Some(value) = guard.original(property) else {
        let error = guard
            .get_property(property)
            .err()
            .map_or_else(|| "not readable".to_owned(), |err| err.to_string());
        return PropertyReport::unreadable(property, error);
    };

    let written = if value >= 1.0 { value - 1.0 } else { value + 1.0 };
    let mut report = PropertyReport {
        property,
        value: Some(value),
        written: Some(written),
        readback: None,
        writable: false,
        error: None,
    };

    match guard.set_property(property, written) {
        Ok(true) => {}
        Ok(false) => {
            report.error = Some("driver refused write".to_owned());
            return report;
        }
        Err(err) => {
            report.error = Some(err.to_string());
            return report;
        }
    }
    if !settle.is_zero() {
        thread::sleep(settle);
    }

    match guard.get_property(property) {
        Ok(readback) => {
            let tolerance = (written.abs() * 0.1).max(1.0);
            report.readback = Some(readback);
            report.writable = (readback - written).abs() <= tolerance && (readback - value).abs() > f64::EPSILON;
        }
        Err(err) => report.error = Some(err.to_string()),
    }

    debug!(%property, value, written, readback = ?report.readback, writable = report.writable, "property surveyed");
    report
}

/// Log one line per report and a total.
pub fn log_survey(reports: &[PropertyReport]) {
    for report in reports {
        info!(
            property = %report.property,
            value = ?report.value,
            writable = report.writable,
            error = report.error.as_deref().unwrap_or(""),
            "property"
        );
    }
    let writable = reports.iter().filter(|r| r.writable).count();
    info!(writable, surveyed = reports.len(), "property survey complete");
}
