//! V4L2 camera control port implementation using the v4l crate.

use std::collections::BTreeSet;

use tracing::{debug, info};
use v4l::buffer::Type;
use v4l::control::{Control, Value};
use v4l::io::mmap::Stream;
use v4l::io::traits::CaptureStream as V4lCaptureStream;
use v4l::video::capture::Parameters;
use v4l::video::Capture;
use v4l::Device;

use crate::traits::{
    CameraBackend, CameraDevice, CameraError, FourCC, Frame, FrameMetadata, Property, Result,
};

// V4L2 control IDs (videodev2.h / v4l2-controls.h)
const CID_BASE: u32 = 0x0098_0900;
const CID_BRIGHTNESS: u32 = CID_BASE;
const CID_AUTO_WHITE_BALANCE: u32 = CID_BASE + 12;
const CID_GAIN: u32 = CID_BASE + 19;
const CID_WHITE_BALANCE_TEMPERATURE: u32 = CID_BASE + 26;
const CID_CAMERA_CLASS_BASE: u32 = 0x009a_0900;
const CID_EXPOSURE_AUTO: u32 = CID_CAMERA_CLASS_BASE + 1;
const CID_EXPOSURE_ABSOLUTE: u32 = CID_CAMERA_CLASS_BASE + 2;
const CID_FOCUS_ABSOLUTE: u32 = CID_CAMERA_CLASS_BASE + 10;
const CID_FOCUS_AUTO: u32 = CID_CAMERA_CLASS_BASE + 12;

// V4L2_CID_EXPOSURE_AUTO menu entries
const EXPOSURE_MANUAL: i64 = 1;
const EXPOSURE_APERTURE_PRIORITY: i64 = 3;

const DEFAULT_BUFFER_COUNT: u32 = 4;

/// Opens `/dev/video{index}` devices.
#[derive(Debug, Clone, Copy, Default)]
pub struct V4L2Backend;

impl CameraBackend for V4L2Backend {
    type Device = V4L2Camera;

    fn open(&self, index: u32) -> Result<V4L2Camera> {
        V4L2Camera::open(index)
    }
}

/// V4L2 device wrapper with a lazily started mmap stream.
pub struct V4L2Camera {
    device: Option<Device>,
    stream: Option<Stream<'static>>,
    controls: BTreeSet<u32>,
    buffer_count: u32,
    card: String,
}

impl V4L2Camera {
    /// Open a V4L2 device by index (e.g., 0 for /dev/video0).
    pub fn open(index: u32) -> Result<Self> {
        let device = Device::new(index as usize)
            .map_err(|err| CameraError::DeviceOpenFailed(err.to_string()))?;

        let caps = device
            .query_caps()
            .map_err(|err| CameraError::DeviceOpenFailed(err.to_string()))?;
        if !caps
            .capabilities
            .contains(v4l::capability::Flags::VIDEO_CAPTURE)
        {
            return Err(CameraError::DeviceOpenFailed(format!(
                "{} is not a capture device",
                caps.card
            )));
        }

        // Devices without a control list are still usable for capture.
        let controls = device
            .query_controls()
            .map(|descriptions| descriptions.into_iter().map(|d| d.id).collect())
            .unwrap_or_default();

        info!(index, card = %caps.card, driver = %caps.driver, bus = %caps.bus, "opened V4L2 device");

        Ok(Self {
            device: Some(device),
            stream: None,
            controls,
            buffer_count: DEFAULT_BUFFER_COUNT,
            card: caps.card,
        })
    }

    /// Card name reported by the driver.
    pub fn card(&self) -> &str {
        &self.card
    }

    fn device(&self) -> Result<&Device> {
        self.device
            .as_ref()
            .ok_or_else(|| CameraError::DeviceUnavailable("device closed".to_owned()))
    }

    const fn control_id(property: Property) -> Option<u32> {
        match property {
            Property::Exposure => Some(CID_EXPOSURE_ABSOLUTE),
            Property::AutoExposure => Some(CID_EXPOSURE_AUTO),
            Property::Brightness => Some(CID_BRIGHTNESS),
            Property::Gain => Some(CID_GAIN),
            Property::Focus => Some(CID_FOCUS_ABSOLUTE),
            Property::Autofocus => Some(CID_FOCUS_AUTO),
            Property::WhiteBalanceTemperature => Some(CID_WHITE_BALANCE_TEMPERATURE),
            Property::AutoWhiteBalance => Some(CID_AUTO_WHITE_BALANCE),
            Property::Width | Property::Height | Property::Fps | Property::BufferSize => None,
        }
    }

    /// Translate the 0.25 (manual) / 0.75 (auto) auto-exposure convention to
    /// the V4L2 menu; other codes are passed through rounded.
    #[allow(clippy::cast_possible_truncation)]
    fn control_value(property: Property, value: f64) -> i64 {
        if property == Property::AutoExposure {
            if (value - 0.25).abs() < f64::EPSILON {
                return EXPOSURE_MANUAL;
            }
            if (value - 0.75).abs() < f64::EPSILON {
                return EXPOSURE_APERTURE_PRIORITY;
            }
        }
        value.round() as i64
    }

    /// Inverse of [`Self::control_value`]: V4L2 auto-exposure menu entries
    /// read back in the 0.25 / 0.75 convention.
    #[allow(clippy::cast_precision_loss)]
    fn property_value(property: Property, raw: i64) -> f64 {
        if property == Property::AutoExposure {
            match raw {
                EXPOSURE_MANUAL => return 0.25,
                EXPOSURE_APERTURE_PRIORITY => return 0.75,
                _ => {}
            }
        }
        raw as f64
    }

    fn read_control(&self, property: Property, id: u32) -> Result<f64> {
        if !self.controls.contains(&id) {
            return Err(CameraError::PropertyUnsupported(property));
        }
        let control = self
            .device()?
            .control(id)
            .map_err(|err| CameraError::PropertyFailed {
                property,
                reason: err.to_string(),
            })?;

        match control.value {
            Value::Integer(value) => Ok(Self::property_value(property, value)),
            Value::Boolean(value) => Ok(if value { 1.0 } else { 0.0 }),
            other => Err(CameraError::PropertyFailed {
                property,
                reason: format!("unexpected control value {other:?}"),
            }),
        }
    }

    fn write_control(&self, property: Property, id: u32, value: f64) -> Result<bool> {
        if !self.controls.contains(&id) {
            return Err(CameraError::PropertyUnsupported(property));
        }
        let control = Control {
            id,
            value: Value::Integer(Self::control_value(property, value)),
        };
        match self.device()?.set_control(control) {
            Ok(()) => Ok(true),
            Err(err) => {
                debug!(%property, value, error = %err, "driver rejected control write");
                Ok(false)
            }
        }
    }

    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    fn write_dimension(&mut self, property: Property, value: f64) -> Result<bool> {
        // Formats cannot change while buffers are mapped.
        self.stream = None;

        let device = self.device()?;
        let mut fmt = device
            .format()
            .map_err(|err| CameraError::StreamError(err.to_string()))?;
        let requested = value.max(0.0) as u32;
        if property == Property::Width {
            fmt.width = requested;
        } else {
            fmt.height = requested;
        }

        match device.set_format(&fmt) {
            Ok(actual) => {
                debug!(%property, requested, width = actual.width, height = actual.height, "format negotiated");
                Ok(true)
            }
            Err(err) => {
                debug!(%property, requested, error = %err, "driver rejected format");
                Ok(false)
            }
        }
    }
}

impl CameraDevice for V4L2Camera {
    fn is_open(&self) -> bool {
        self.device.is_some()
    }

    fn get_property(&self, property: Property) -> Result<f64> {
        let device = self.device()?;
        match property {
            Property::Width | Property::Height => {
                let fmt = device
                    .format()
                    .map_err(|err| CameraError::StreamError(err.to_string()))?;
                let value = if property == Property::Width {
                    fmt.width
                } else {
                    fmt.height
                };
                Ok(f64::from(value))
            }
            Property::Fps => {
                let params = device
                    .params()
                    .map_err(|err| CameraError::StreamError(err.to_string()))?;
                let interval = params.interval;
                if interval.numerator == 0 {
                    return Ok(0.0);
                }
                Ok(f64::from(interval.denominator) / f64::from(interval.numerator))
            }
            Property::BufferSize => Ok(f64::from(self.buffer_count)),
            _ => {
                let id = Self::control_id(property)
                    .ok_or(CameraError::PropertyUnsupported(property))?;
                self.read_control(property, id)
            }
        }
    }

    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    fn set_property(&mut self, property: Property, value: f64) -> Result<bool> {
        self.device()?;
        match property {
            Property::Width | Property::Height => self.write_dimension(property, value),
            Property::Fps => {
                let fps = value.round().max(1.0) as u32;
                match self.device()?.set_params(&Parameters::with_fps(fps)) {
                    Ok(_) => Ok(true),
                    Err(err) => {
                        debug!(fps, error = %err, "driver rejected frame interval");
                        Ok(false)
                    }
                }
            }
            Property::BufferSize => {
                self.stream = None;
                self.buffer_count = value.round().max(1.0) as u32;
                Ok(true)
            }
            _ => {
                let id = Self::control_id(property)
                    .ok_or(CameraError::PropertyUnsupported(property))?;
                self.write_control(property, id, value)
            }
        }
    }

    fn read_frame(&mut self) -> Result<Frame> {
        let device = self.device()?;
        let fmt = device
            .format()
            .map_err(|err| CameraError::StreamError(err.to_string()))?;

        if self.stream.is_none() {
            let stream = Stream::with_buffers(device, Type::VideoCapture, self.buffer_count)
                .map_err(|err| CameraError::StreamError(err.to_string()))?;
            self.stream = Some(stream);
        }
        let stream = self
            .stream
            .as_mut()
            .ok_or_else(|| CameraError::StreamError("stream not started".to_owned()))?;

        let (buf, meta) = stream
            .next()
            .map_err(|err| CameraError::FrameReadFailed(err.to_string()))?;

        let used = meta.bytesused as usize;
        let data = buf.get(..used).unwrap_or(buf).to_vec();

        Ok(Frame {
            width: fmt.width,
            height: fmt.height,
            fourcc: FourCC::from(fmt.fourcc),
            data,
            metadata: FrameMetadata {
                sequence: meta.sequence,
            },
        })
    }

    fn close(&mut self) {
        // Buffers must be released before the handle.
        self.stream = None;
        self.device = None;
    }
}
