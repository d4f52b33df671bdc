//! Camera enumeration and USB/built-in classification.
//!
//! The classification is a best-effort guess from the index and frame
//! geometry. It is not a hardware identification: a USB camera plugged into
//! a machine without a built-in camera will usually show up at index 0 with
//! a common resolution and be labelled built-in.

use std::fmt;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::{ClassifierConfig, Resolution};
use crate::ports::ProcessInfo;
use crate::traits::{CameraBackend, CameraDevice, CameraError, Property};

/// Guessed attachment of a camera.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CameraClass {
    /// External camera.
    Usb,
    /// Camera built into the host.
    BuiltIn,
}

impl fmt::Display for CameraClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Usb => "USB",
            Self::BuiltIn => "Built-in",
        })
    }
}

/// A camera that opened and produced a frame during enumeration.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CameraDescriptor {
    index: u32,
    width: u32,
    height: u32,
    reported_fps: f64,
    classification: CameraClass,
}

impl CameraDescriptor {
    /// Device index.
    pub const fn index(&self) -> u32 {
        self.index
    }

    /// Frame width reported at enumeration time.
    pub const fn width(&self) -> u32 {
        self.width
    }

    /// Frame height reported at enumeration time.
    pub const fn height(&self) -> u32 {
        self.height
    }

    /// Nominal frame rate reported by the device, 0 if unknown.
    pub const fn reported_fps(&self) -> f64 {
        self.reported_fps
    }

    /// Guessed attachment.
    pub const fn classification(&self) -> CameraClass {
        self.classification
    }

    /// Whether the camera was classified as USB.
    pub fn is_usb(&self) -> bool {
        self.classification == CameraClass::Usb
    }
}

impl fmt::Display for CameraDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Index {}: {}x{} ({})",
            self.index, self.width, self.height, self.classification
        )
    }
}

/// Enumerates device indices and labels what it finds.
#[derive(Debug, Clone, Default)]
pub struct Classifier {
    config: ClassifierConfig,
}

impl Classifier {
    /// Classifier using `config` heuristics.
    #[must_use]
    pub const fn new(config: ClassifierConfig) -> Self {
        Self { config }
    }

    /// Heuristics in use.
    pub const fn config(&self) -> &ClassifierConfig {
        &self.config
    }

    /// Label a camera from its index and geometry. Rules apply in order and
    /// the first match wins.
    #[must_use]
    pub fn classify(&self, index: u32, width: u32, height: u32) -> CameraClass {
        let config = &self.config;

        if index == 0
            && config
                .builtin_resolutions
                .contains(&Resolution::new(width, height))
        {
            return CameraClass::BuiltIn;
        }
        if index > 0 {
            return CameraClass::Usb;
        }
        if width >= config.uhd_width || height >= config.uhd_height {
            return CameraClass::Usb;
        }

        let aspect = if height > 0 {
            f64::from(width) / f64::from(height)
        } else {
            0.0
        };
        let standard = config
            .standard_aspect_ratios
            .iter()
            .any(|ratio| (aspect - ratio).abs() < config.aspect_tolerance);
        if !standard {
            return CameraClass::Usb;
        }

        CameraClass::BuiltIn
    }

    /// Open every index in `0..max_index` in turn and describe the ones that
    /// deliver a frame. Indices that fail to open or read are skipped. At
    /// most one device is open at any time.
    pub fn enumerate<B: CameraBackend>(&self, backend: &B, max_index: u32) -> Vec<CameraDescriptor> {
        let mut cameras = Vec::new();

        for index in 0..max_index {
            let mut device = match backend.open(index) {
                Ok(device) => device,
                Err(err) => {
                    info!(index, error = %err, "no camera at index");
                    continue;
                }
            };

            match self.describe(index, &mut device) {
                Ok(descriptor) => {
                    info!(
                        index,
                        width = descriptor.width,
                        height = descriptor.height,
                        fps = descriptor.reported_fps,
                        class = %descriptor.classification,
                        "camera found"
                    );
                    cameras.push(descriptor);
                }
                Err(err) => warn!(index, error = %err, "camera opened but produced no frame"),
            }
            device.close();
        }

        let usb = cameras.iter().filter(|c| c.is_usb()).count();
        info!(found = cameras.len(), usb, built_in = cameras.len() - usb, "enumeration complete");
        cameras
    }

    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    fn describe<D: CameraDevice>(&self, index: u32, device: &mut D) -> Result<CameraDescriptor, CameraError> {
        if let Err(err) = device.set_property(Property::BufferSize, f64::from(self.config.buffer_size)) {
            debug!(index, error = %err, "buffer size not adjustable");
        }

        let frame = device.read_frame()?;
        if !frame.has_dimensions() {
            return Err(CameraError::FrameReadFailed("empty frame".to_owned()));
        }

        let dimension = |property, fallback: u32| {
            device
                .get_property(property)
                .ok()
                .filter(|value| *value > 0.0)
                .map_or(fallback, |value| value.round() as u32)
        };
        let width = dimension(Property::Width, frame.width);
        let height = dimension(Property::Height, frame.height);
        let reported_fps = device.get_property(Property::Fps).unwrap_or(0.0);

        Ok(CameraDescriptor {
            index,
            width,
            height,
            reported_fps,
            classification: self.classify(index, width, height),
        })
    }

    /// Lines of `process_info` output that mention a video device. A failed
    /// query yields no evidence rather than an error.
    pub fn usb_evidence(&self, process_info: &dyn ProcessInfo) -> Vec<String> {
        match process_info.query() {
            Ok(text) => video_device_lines(&text, &self.config.usb_keywords),
            Err(err) => {
                debug!(error = %err, "process info unavailable");
                Vec::new()
            }
        }
    }
}

/// Lines of `text` containing any of `keywords`, case-insensitively.
pub fn video_device_lines(text: &str, keywords: &[String]) -> Vec<String> {
    let keywords: Vec<String> = keywords.iter().map(|k| k.to_lowercase()).collect();
    text.lines()
        .filter(|line| {
            let line = line.to_lowercase();
            keywords.iter().any(|k| line.contains(k.as_str()))
        })
        .map(|line| line.trim().to_owned())
        .collect()
}

/// The first USB camera, or the first camera of any kind.
pub fn preferred_camera(cameras: &[CameraDescriptor]) -> Option<&CameraDescriptor> {
    cameras
        .iter()
        .find(|camera| camera.is_usb())
        .or_else(|| cameras.first())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fmt;
    use std::sync::{Arc, Mutex};

    use tracing::field::{Field, Visit};
    use tracing::{Event, Level, Subscriber};
    use tracing_subscriber::layer::{Context, Layer, SubscriberExt};

    use crate::error::{Error, Result};
    use crate::mock::{SimulatedBackend, SimulatedCamera};

    /// Collects `(level, message)` for every event.
    #[derive(Clone, Default)]
    struct EventLog(Arc<Mutex<Vec<(Level, String)>>>);

    struct MessageField(String);

    impl Visit for MessageField {
        fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
            if field.name() == "message" {
                self.0 = format!("{value:?}");
            }
        }
    }

    impl<S: Subscriber> Layer<S> for EventLog {
        fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
            let mut message = MessageField(String::new());
            event.record(&mut message);
            self.0.lock().expect("event log").push((*event.metadata().level(), message.0));
        }
    }

    struct FixedListing(&'static str);

    impl ProcessInfo for FixedListing {
        fn query(&self) -> Result<String> {
            Ok(self.0.to_owned())
        }
    }

    struct BrokenListing;

    impl ProcessInfo for BrokenListing {
        fn query(&self) -> Result<String> {
            Err(Error::ProcessInfo("not installed".to_owned()))
        }
    }

    #[test]
    fn test_classify_rules() {
        let classifier = Classifier::default();
        assert_eq!(classifier.classify(0, 1280, 720), CameraClass::BuiltIn);
        assert_eq!(classifier.classify(0, 640, 480), CameraClass::BuiltIn);
        assert_eq!(classifier.classify(1, 1280, 720), CameraClass::Usb);
        assert_eq!(classifier.classify(0, 3840, 2160), CameraClass::Usb);
        assert_eq!(classifier.classify(0, 1000, 2160), CameraClass::Usb);
        // 2:1 is not a standard ratio
        assert_eq!(classifier.classify(0, 1600, 800), CameraClass::Usb);
        // 4:3 but not in the built-in list
        assert_eq!(classifier.classify(0, 800, 600), CameraClass::BuiltIn);
        assert_eq!(classifier.classify(0, 0, 0), CameraClass::Usb);
    }

    #[test]
    fn test_classify_is_deterministic() {
        let classifier = Classifier::default();
        let first: Vec<_> = (0..4).map(|i| classifier.classify(i, 1024, 768)).collect();
        let second: Vec<_> = (0..4).map(|i| classifier.classify(i, 1024, 768)).collect();
        assert_eq!(first, second);
    }

    #[test]
    fn test_classify_uses_configured_thresholds() {
        let config = ClassifierConfig {
            uhd_width: 2000,
            ..ClassifierConfig::default()
        };
        let classifier = Classifier::new(config);
        assert_eq!(classifier.classify(0, 2048, 1536), CameraClass::Usb);
    }

    #[test]
    fn test_enumerate_skips_missing_and_unreadable_indices() {
        let backend = SimulatedBackend::new()
            .with_camera(0, SimulatedCamera::new().with_resolution(1280, 720))
            .with_camera(2, SimulatedCamera::new().with_read_failures())
            .with_camera(3, SimulatedCamera::new());

        let cameras = Classifier::default().enumerate(&backend, 5);
        let indices: Vec<_> = cameras.iter().map(CameraDescriptor::index).collect();
        assert_eq!(indices, vec![0, 3]);
        assert!((cameras[0].reported_fps() - 30.0).abs() < f64::EPSILON);
        assert_eq!(cameras[0].to_string(), "Index 0: 1280x720 (Built-in)");
    }

    #[test]
    fn test_enumerate_respects_max_index() {
        let backend = SimulatedBackend::new().with_camera(4, SimulatedCamera::new());
        assert!(Classifier::default().enumerate(&backend, 4).is_empty());
    }

    #[test]
    fn test_preferred_camera() {
        let backend = SimulatedBackend::new()
            .with_camera(0, SimulatedCamera::new().with_resolution(1280, 720))
            .with_camera(1, SimulatedCamera::new());
        let cameras = Classifier::default().enumerate(&backend, 2);
        assert_eq!(preferred_camera(&cameras).map(CameraDescriptor::index), Some(1));

        let only_builtin = &cameras[..1];
        assert_eq!(preferred_camera(only_builtin).map(CameraDescriptor::index), Some(0));
        assert!(preferred_camera(&[]).is_none());
    }

    #[test]
    fn test_usb_evidence() {
        let classifier = Classifier::default();
        let listing = FixedListing(
            "Bus 001 Device 002: ID 046d:085e Logitech, Inc. BRIO Ultra HD Webcam\n\
             Bus 001 Device 003: ID 8087:0026 Intel Corp. AX201 Bluetooth\n",
        );
        let lines = classifier.usb_evidence(&listing);
        assert_eq!(lines.len(), 1);
        assert!(lines[0].contains("BRIO"));

        assert!(classifier.usb_evidence(&BrokenListing).is_empty());
    }

    #[test]
    fn test_enumerate_logs_every_index_at_info() {
        let backend = SimulatedBackend::new()
            .with_camera(0, SimulatedCamera::new())
            .with_camera(2, SimulatedCamera::new().with_read_failures());
        let log = EventLog::default();
        let subscriber = tracing_subscriber::registry().with(log.clone());

        tracing::subscriber::with_default(subscriber, || Classifier::default().enumerate(&backend, 3));

        let events = log.0.lock().expect("event log").clone();
        let level_of = |message: &str| {
            events
                .iter()
                .find(|(_, m)| m == message)
                .map(|(level, _)| *level)
                .expect(message)
        };
        assert_eq!(level_of("camera found"), Level::INFO);
        assert_eq!(level_of("no camera at index"), Level::INFO);
        assert_eq!(level_of("camera opened but produced no frame"), Level::WARN);
    }
}
