//! Structured probe results.

use std::fmt;

use chrono::{DateTime, Local};
use indexmap::IndexMap;
use serde::{Serialize, Serializer};

use crate::probes::ProbeKind;

/// Outcome of a single probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ProbeStatus {
    /// A measured effect crossed its threshold.
    Pass,
    /// The capability is present but did not respond, or the probe errored.
    Fail,
    /// The capability is not present on this device.
    Skip,
}

impl fmt::Display for ProbeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Pass => "PASS",
            Self::Fail => "FAIL",
            Self::Skip => "SKIP",
        })
    }
}

/// A machine-readable diagnostic value.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum DetailValue {
    /// Boolean flag.
    Bool(bool),
    /// Integral count or size.
    Integer(i64),
    /// Measurement. Non-finite values serialize as `null`.
    Number(f64),
    /// Free text.
    Text(String),
    /// Ordered list.
    List(Vec<DetailValue>),
    /// Nested mapping.
    Map(Details),
}

impl DetailValue {
    /// The numeric value, if this is a number or integer.
    #[allow(clippy::cast_precision_loss)]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Number(value) => Some(*value),
            Self::Integer(value) => Some(*value as f64),
            _ => None,
        }
    }

    /// The text, if this is a string.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(text) => Some(text),
            _ => None,
        }
    }

    /// The boolean, if this is a flag.
    pub const fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(value) => Some(*value),
            _ => None,
        }
    }
}

impl From<bool> for DetailValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i64> for DetailValue {
    fn from(value: i64) -> Self {
        Self::Integer(value)
    }
}

impl From<u32> for DetailValue {
    fn from(value: u32) -> Self {
        Self::Integer(i64::from(value))
    }
}

impl From<u64> for DetailValue {
    fn from(value: u64) -> Self {
        Self::Integer(i64::try_from(value).unwrap_or(i64::MAX))
    }
}

impl From<f64> for DetailValue {
    fn from(value: f64) -> Self {
        Self::Number(value)
    }
}

impl From<&str> for DetailValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_owned())
    }
}

impl From<String> for DetailValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<Details> for DetailValue {
    fn from(value: Details) -> Self {
        Self::Map(value)
    }
}

impl<T: Into<Self>> From<Vec<T>> for DetailValue {
    fn from(values: Vec<T>) -> Self {
        Self::List(values.into_iter().map(Into::into).collect())
    }
}

/// Insertion-ordered string-keyed details. Re-inserting a key replaces its
/// value in place.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct Details(IndexMap<String, DetailValue>);

impl Details {
    /// Empty details.
    #[must_use]
    pub fn new() -> Self {
        Self(IndexMap::new())
    }

    /// Insert or replace `key`.
    pub fn insert<K: Into<String>, V: Into<DetailValue>>(&mut self, key: K, value: V) {
        self.0.insert(key.into(), value.into());
    }

    /// Builder form of [`Details::insert`].
    #[must_use]
    pub fn with<K: Into<String>, V: Into<DetailValue>>(mut self, key: K, value: V) -> Self {
        self.insert(key, value);
        self
    }

    /// Look up `key`.
    pub fn get(&self, key: &str) -> Option<&DetailValue> {
        self.0.get(key)
    }

    /// Entries in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &DetailValue)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether there are no entries.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// The immutable outcome of one probe execution.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProbeResult {
    #[serde(rename = "test_name", serialize_with = "serialize_probe_name")]
    probe: ProbeKind,
    status: ProbeStatus,
    message: String,
    timestamp: DateTime<Local>,
    details: Details,
}

fn serialize_probe_name<S: Serializer>(probe: &ProbeKind, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(probe.name())
}

impl ProbeResult {
    fn new(probe: ProbeKind, status: ProbeStatus, message: String) -> Self {
        Self {
            probe,
            status,
            message,
            timestamp: Local::now(),
            details: Details::new(),
        }
    }

    /// A passing result.
    pub fn pass<M: Into<String>>(probe: ProbeKind, message: M) -> Self {
        Self::new(probe, ProbeStatus::Pass, message.into())
    }

    /// A failing result.
    pub fn fail<M: Into<String>>(probe: ProbeKind, message: M) -> Self {
        Self::new(probe, ProbeStatus::Fail, message.into())
    }

    /// A skipped result.
    pub fn skip<M: Into<String>>(probe: ProbeKind, message: M) -> Self {
        Self::new(probe, ProbeStatus::Skip, message.into())
    }

    /// Attach diagnostic details.
    #[must_use]
    pub fn with_details(mut self, details: Details) -> Self {
        self.details = details;
        self
    }

    /// Which probe produced this result.
    pub const fn probe(&self) -> ProbeKind {
        self.probe
    }

    /// Outcome.
    pub const fn status(&self) -> ProbeStatus {
        self.status
    }

    /// Human-readable summary.
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Creation time.
    pub const fn timestamp(&self) -> DateTime<Local> {
        self.timestamp
    }

    /// Machine-readable diagnostics.
    pub const fn details(&self) -> &Details {
        &self.details
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_details_preserve_insertion_order() {
        let details = Details::new()
            .with("zeta", 1u32)
            .with("alpha", "two")
            .with("zeta", 3.5);

        let keys: Vec<_> = details.iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec!["zeta", "alpha"]);
        assert_eq!(details.get("zeta").and_then(DetailValue::as_f64), Some(3.5));
        assert_eq!(details.len(), 2);
    }

    #[test]
    fn test_result_serializes_with_ordered_details() {
        let result = ProbeResult::pass(ProbeKind::Resolution, "ok").with_details(
            Details::new()
                .with("supported_resolutions", vec!["640x480"])
                .with("budget_exhausted", false),
        );
        let json = serde_json::to_value(&result).expect("serialize");

        assert_eq!(json["test_name"], "Resolution Test");
        assert_eq!(json["status"], "PASS");
        assert_eq!(json["details"]["supported_resolutions"][0], "640x480");

        let text = serde_json::to_string(&result).expect("serialize");
        let first = text.find("supported_resolutions").unwrap_or(usize::MAX);
        let second = text.find("budget_exhausted").unwrap_or(0);
        assert!(first < second);
    }

    #[test]
    fn test_non_finite_numbers_serialize_as_null() {
        let details = Details::new().with("snr_db", f64::INFINITY);
        let json = serde_json::to_value(&details).expect("serialize");
        assert!(json["snr_db"].is_null());
    }

    #[test]
    fn test_nested_details_keep_order_in_json_text() {
        let keys = ["z_last", "m_middle", "a_first", "q_extra"];
        let inner = keys.iter().fold(Details::new(), |d, k| d.with(*k, 1u32));
        let outer = Details::new().with("window", inner).with("after", true);

        let text = serde_json::to_string(&outer).expect("serialize");
        assert_eq!(
            text,
            r#"{"window":{"z_last":1,"m_middle":1,"a_first":1,"q_extra":1},"after":true}"#
        );
    }
}
