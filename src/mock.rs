//! Simulated camera for running the engine without hardware.
//!
//! A [`SimulatedCamera`] models the failure modes that make real property
//! APIs untrustworthy: writes that are accepted but ignored, writes that are
//! clamped, properties that are missing altogether, and resolutions the
//! sensor silently refuses. Frame luma can be tied to property values so
//! brightness-delta measurements behave like a real exposure ramp.

use std::collections::BTreeMap;
use std::time::Duration;

use crate::config::Resolution;
use crate::traits::{
    CameraBackend, CameraDevice, CameraError, FourCC, Frame, FrameMetadata, Property, Result,
};

/// How a simulated property reacts to reads and writes.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Behavior {
    /// Writes take effect, clamped to the optional range.
    Honor(Option<(f64, f64)>),
    /// Writes report success but the value never changes.
    Ignore,
    /// Writes report failure and the value never changes.
    Reject,
    /// The property does not exist: reads and writes error.
    Unsupported,
}

#[derive(Debug, Clone, Copy)]
struct SimProperty {
    value: f64,
    behavior: Behavior,
}

/// Luma shift applied per unit of property deviation from `baseline`.
#[derive(Debug, Clone, Copy)]
struct LumaResponse {
    property: Property,
    per_unit: f64,
    baseline: f64,
}

/// Test pattern types for simulated frame generation.
#[derive(Debug, Clone, Copy)]
pub enum TestPattern {
    /// Solid color with specified Y, U, V values.
    Solid(u8, u8, u8),
    /// Gray checkerboard with square cells.
    Checkerboard {
        /// Cell edge in pixels.
        cell: u32,
        /// Luma of even cells.
        low: u8,
        /// Luma of odd cells.
        high: u8,
    },
}

impl TestPattern {
    /// YUV sample at (x, y).
    fn sample(self, x: u32, y: u32) -> (u8, u8, u8) {
        match self {
            Self::Solid(y_val, u, v) => (y_val, u, v),
            Self::Checkerboard { cell, low, high } => {
                let cell = cell.max(1);
                let luma = if ((x / cell) + (y / cell)) % 2 == 0 {
                    low
                } else {
                    high
                };
                (luma, 128, 128)
            }
        }
    }
}

/// A scriptable camera implementing [`CameraDevice`].
#[derive(Debug, Clone)]
pub struct SimulatedCamera {
    open: bool,
    properties: BTreeMap<Property, SimProperty>,
    resolutions: Vec<Resolution>,
    current: Resolution,
    requested: Resolution,
    pattern: TestPattern,
    luma_responses: Vec<LumaResponse>,
    frame_interval: Duration,
    fail_reads: bool,
    frame_count: u32,
    writes: Vec<(Property, f64)>,
}

impl Default for SimulatedCamera {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedCamera {
    /// A fully working 640x480 camera: every property honored, exposure,
    /// brightness and gain all visibly change the picture.
    #[must_use]
    pub fn new() -> Self {
        let honor = |value| SimProperty {
            value,
            behavior: Behavior::Honor(None),
        };

        let mut properties = BTreeMap::new();
        properties.insert(Property::Fps, honor(30.0));
        properties.insert(Property::Exposure, honor(100.0));
        properties.insert(Property::AutoExposure, honor(0.75));
        properties.insert(Property::Brightness, honor(128.0));
        properties.insert(Property::Gain, honor(0.0));
        properties.insert(Property::Focus, honor(0.0));
        properties.insert(Property::Autofocus, honor(1.0));
        properties.insert(Property::WhiteBalanceTemperature, honor(4600.0));
        properties.insert(Property::AutoWhiteBalance, honor(1.0));
        properties.insert(Property::BufferSize, honor(4.0));

        let vga = Resolution::new(640, 480);
        Self {
            open: true,
            properties,
            resolutions: vec![vga, Resolution::new(1280, 720), Resolution::new(1920, 1080)],
            current: vga,
            requested: vga,
            pattern: TestPattern::Checkerboard {
                cell: 160,
                low: 60,
                high: 190,
            },
            luma_responses: Vec::new(),
            frame_interval: Duration::ZERO,
            fail_reads: false,
            frame_count: 0,
            writes: Vec::new(),
        }
        .with_luma_response(Property::Exposure, 0.05)
        .with_luma_response(Property::Brightness, 0.5)
        .with_luma_response(Property::Gain, 0.2)
    }

    /// Set the active resolution.
    #[must_use]
    pub fn with_resolution(mut self, width: u32, height: u32) -> Self {
        self.current = Resolution::new(width, height);
        self.requested = self.current;
        if !self.resolutions.contains(&self.current) {
            self.resolutions.push(self.current);
        }
        self
    }

    /// Replace the set of resolutions the sensor accepts.
    #[must_use]
    pub fn with_supported_resolutions(mut self, resolutions: Vec<Resolution>) -> Self {
        self.resolutions = resolutions;
        self
    }

    /// Set a property's starting value and behavior.
    #[must_use]
    pub fn with_property(mut self, property: Property, value: f64, behavior: Behavior) -> Self {
        self.properties
            .insert(property, SimProperty { value, behavior });
        self
    }

    /// Change only the behavior of a property, keeping its value.
    #[must_use]
    pub fn with_behavior(mut self, property: Property, behavior: Behavior) -> Self {
        let value = self.properties.get(&property).map_or(0.0, |p| p.value);
        self.properties
            .insert(property, SimProperty { value, behavior });
        self
    }

    /// Tie frame luma to a property: each unit away from the property's
    /// current value shifts every pixel by `per_unit`.
    #[must_use]
    pub fn with_luma_response(mut self, property: Property, per_unit: f64) -> Self {
        let baseline = self.properties.get(&property).map_or(0.0, |p| p.value);
        self.luma_responses.retain(|r| r.property != property);
        self.luma_responses.push(LumaResponse {
            property,
            per_unit,
            baseline,
        });
        self
    }

    /// Remove every luma response so property writes never show in frames.
    #[must_use]
    pub fn without_luma_response(mut self) -> Self {
        self.luma_responses.clear();
        self
    }

    /// Set the generated pattern.
    #[must_use]
    pub const fn with_pattern(mut self, pattern: TestPattern) -> Self {
        self.pattern = pattern;
        self
    }

    /// Block this long in every `read_frame`.
    #[must_use]
    pub const fn with_frame_interval(mut self, interval: Duration) -> Self {
        self.frame_interval = interval;
        self
    }

    /// Make every frame read fail.
    #[must_use]
    pub const fn with_read_failures(mut self) -> Self {
        self.fail_reads = true;
        self
    }

    /// Every accepted or attempted write, in call order.
    pub fn writes(&self) -> &[(Property, f64)] {
        &self.writes
    }

    /// Frames produced so far.
    pub const fn frames_read(&self) -> u32 {
        self.frame_count
    }

    fn ensure_open(&self) -> Result<()> {
        if self.open {
            Ok(())
        } else {
            Err(CameraError::DeviceUnavailable("simulated camera closed".to_owned()))
        }
    }

    fn luma_offset(&self) -> f64 {
        self.luma_responses
            .iter()
            .map(|response| {
                let value = self
                    .properties
                    .get(&response.property)
                    .map_or(response.baseline, |p| p.value);
                (value - response.baseline) * response.per_unit
            })
            .sum()
    }

    fn apply_resolution_request(&mut self) {
        if self.resolutions.contains(&self.requested) {
            self.current = self.requested;
        }
    }

    fn generate_frame(&self) -> Vec<u8> {
        let Resolution { width, height } = self.current;
        let offset = self.luma_offset();
        let adjust = |luma: u8| -> u8 {
            #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
            {
                (f64::from(luma) + offset).round().clamp(0.0, 255.0) as u8
            }
        };

        // YUYV = 2 bytes/pixel, one [Y0 U Y1 V] group per pixel pair
        let mut data = vec![0u8; width as usize * height as usize * 2];
        for (pair, chunk) in data.chunks_exact_mut(4).enumerate() {
            let first = u32::try_from(pair * 2).unwrap_or(u32::MAX);
            let (x, y) = (first % width.max(1), first / width.max(1));
            let (y0, u, v) = self.pattern.sample(x, y);
            let (y1, _, _) = self.pattern.sample(x + 1, y);
            chunk.copy_from_slice(&[adjust(y0), u, adjust(y1), v]);
        }
        data
    }
}

impl CameraDevice for SimulatedCamera {
    fn is_open(&self) -> bool {
        self.open
    }

    fn get_property(&self, property: Property) -> Result<f64> {
        self.ensure_open()?;
        match property {
            Property::Width => Ok(f64::from(self.current.width)),
            Property::Height => Ok(f64::from(self.current.height)),
            _ => match self.properties.get(&property) {
                Some(SimProperty {
                    behavior: Behavior::Unsupported,
                    ..
                })
                | None => Err(CameraError::PropertyUnsupported(property)),
                Some(p) => Ok(p.value),
            },
        }
    }

    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    fn set_property(&mut self, property: Property, value: f64) -> Result<bool> {
        self.ensure_open()?;
        self.writes.push((property, value));

        match property {
            Property::Width => {
                self.requested.width = value.max(0.0) as u32;
                self.apply_resolution_request();
                return Ok(true);
            }
            Property::Height => {
                self.requested.height = value.max(0.0) as u32;
                self.apply_resolution_request();
                return Ok(true);
            }
            _ => {}
        }

        let entry = self
            .properties
            .get_mut(&property)
            .ok_or(CameraError::PropertyUnsupported(property))?;
        match entry.behavior {
            Behavior::Honor(range) => {
                entry.value = range.map_or(value, |(min, max)| value.clamp(min, max));
                Ok(true)
            }
            Behavior::Ignore => Ok(true),
            Behavior::Reject => Ok(false),
            Behavior::Unsupported => Err(CameraError::PropertyUnsupported(property)),
        }
    }

    fn read_frame(&mut self) -> Result<Frame> {
        self.ensure_open()?;
        if !self.frame_interval.is_zero() {
            std::thread::sleep(self.frame_interval);
        }
        if self.fail_reads {
            return Err(CameraError::FrameReadFailed(
                "simulated sensor returned no data".to_owned(),
            ));
        }

        let data = self.generate_frame();
        let sequence = self.frame_count;
        self.frame_count = self.frame_count.wrapping_add(1);

        Ok(Frame {
            width: self.current.width,
            height: self.current.height,
            fourcc: FourCC::YUYV,
            metadata: FrameMetadata {
                sequence,
            },
            data,
        })
    }

    fn close(&mut self) {
        self.open = false;
    }
}

/// Backend serving clones of preconfigured simulated cameras by index.
#[derive(Debug, Clone, Default)]
pub struct SimulatedBackend {
    cameras: BTreeMap<u32, SimulatedCamera>,
}

impl SimulatedBackend {
    /// An empty backend: every open fails.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach `camera` at `index`.
    #[must_use]
    pub fn with_camera(mut self, index: u32, camera: SimulatedCamera) -> Self {
        self.cameras.insert(index, camera);
        self
    }
}

impl CameraBackend for SimulatedBackend {
    type Device = SimulatedCamera;

    fn open(&self, index: u32) -> Result<SimulatedCamera> {
        self.cameras
            .get(&index)
            .cloned()
            .ok_or(CameraError::DeviceNotFound(index))
    }
}
