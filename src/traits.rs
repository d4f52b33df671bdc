//! Core traits and types for the camera control port.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Pixel format representation (e.g., YUYV, MJPG, RGB3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FourCC(pub [u8; 4]);

impl FourCC {
    /// Create a new `FourCC` from a 4-byte array.
    #[must_use]
    pub const fn new(code: &[u8; 4]) -> Self {
        Self(*code)
    }

    /// YUYV pixel format (4:2:2 packed).
    pub const YUYV: Self = Self::new(b"YUYV");
    /// MJPEG pixel format (Motion JPEG).
    pub const MJPG: Self = Self::new(b"MJPG");
    /// RGB3 pixel format (24-bit RGB).
    pub const RGB3: Self = Self::new(b"RGB3");
    /// GREY pixel format (8-bit luma only).
    pub const GREY: Self = Self::new(b"GREY");

    /// Bytes per pixel for packed formats, `None` for compressed ones.
    #[must_use]
    pub const fn bytes_per_pixel(self) -> Option<usize> {
        match &self.0 {
            b"YUYV" => Some(2),
            b"RGB3" => Some(3),
            b"GREY" => Some(1),
            _ => None,
        }
    }
}

impl fmt::Display for FourCC {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", String::from_utf8_lossy(&self.0))
    }
}

impl From<v4l::FourCC> for FourCC {
    fn from(fourcc: v4l::FourCC) -> Self {
        Self(fourcc.repr)
    }
}

impl From<FourCC> for v4l::FourCC {
    fn from(fourcc: FourCC) -> Self {
        Self::new(&fourcc.0)
    }
}

/// Numeric device properties reachable through the control port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Property {
    /// Frame width in pixels.
    Width,
    /// Frame height in pixels.
    Height,
    /// Nominal frame rate.
    Fps,
    /// Absolute exposure.
    Exposure,
    /// Auto-exposure mode code.
    AutoExposure,
    /// Brightness offset.
    Brightness,
    /// Analog/digital gain.
    Gain,
    /// Manual focus position.
    Focus,
    /// Autofocus enable.
    Autofocus,
    /// White balance color temperature in kelvin.
    WhiteBalanceTemperature,
    /// Auto white balance enable.
    AutoWhiteBalance,
    /// Driver-side frame buffer count.
    BufferSize,
}

impl Property {
    /// Every property key, in declaration order.
    pub const ALL: [Self; 12] = [
        Self::Width,
        Self::Height,
        Self::Fps,
        Self::Exposure,
        Self::AutoExposure,
        Self::Brightness,
        Self::Gain,
        Self::Focus,
        Self::Autofocus,
        Self::WhiteBalanceTemperature,
        Self::AutoWhiteBalance,
        Self::BufferSize,
    ];

    /// Human readable label.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Width => "Width",
            Self::Height => "Height",
            Self::Fps => "FPS",
            Self::Exposure => "Exposure",
            Self::AutoExposure => "Auto Exposure",
            Self::Brightness => "Brightness",
            Self::Gain => "Gain",
            Self::Focus => "Focus",
            Self::Autofocus => "Auto Focus",
            Self::WhiteBalanceTemperature => "Color Temperature",
            Self::AutoWhiteBalance => "Auto White Balance",
            Self::BufferSize => "Buffer Size",
        }
    }

    /// Snake-case key used in result details and serialized output.
    #[must_use]
    pub const fn key(self) -> &'static str {
        match self {
            Self::Width => "width",
            Self::Height => "height",
            Self::Fps => "fps",
            Self::Exposure => "exposure",
            Self::AutoExposure => "auto_exposure",
            Self::Brightness => "brightness",
            Self::Gain => "gain",
            Self::Focus => "focus",
            Self::Autofocus => "autofocus",
            Self::WhiteBalanceTemperature => "white_balance_temperature",
            Self::AutoWhiteBalance => "auto_white_balance",
            Self::BufferSize => "buffer_size",
        }
    }
}

impl fmt::Display for Property {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Metadata for a captured frame.
#[derive(Debug, Clone)]
pub struct FrameMetadata {
    /// Frame sequence number.
    pub sequence: u32,
}

/// A captured video frame.
#[derive(Debug, Clone)]
pub struct Frame {
    /// Frame width in pixels.
    pub width: u32,
    /// Frame height in pixels.
    pub height: u32,
    /// Pixel format of `data`.
    pub fourcc: FourCC,
    /// Raw frame data.
    pub data: Vec<u8>,
    /// Frame metadata.
    pub metadata: FrameMetadata,
}

impl Frame {
    /// Whether the frame carries a usable picture.
    #[must_use]
    pub fn has_dimensions(&self) -> bool {
        self.width > 0 && self.height > 0 && !self.data.is_empty()
    }

    /// Number of color channels a decoder would produce for this frame.
    #[must_use]
    pub fn channels(&self) -> u32 {
        if self.fourcc == FourCC::GREY {
            1
        } else {
            3
        }
    }

    /// Get RGB values for a pixel at the specified coordinates.
    ///
    /// Returns `None` for out-of-range coordinates or compressed formats.
    /// For YUYV, odd x coordinates use the Y value of the second pixel in
    /// the pair with the shared U/V values.
    #[must_use]
    pub fn pixel_at(&self, x: u32, y: u32) -> Option<(u8, u8, u8)> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let index = (y as usize) * (self.width as usize) + x as usize;

        match &self.fourcc.0 {
            b"YUYV" => {
                // YUYV format: [Y0 U Y1 V] repeats
                let pair = (index & !1) * 2;
                let y_val = if x % 2 == 0 {
                    *self.data.get(pair)?
                } else {
                    *self.data.get(pair + 2)?
                };
                let u = *self.data.get(pair + 1)?;
                let v = *self.data.get(pair + 3)?;
                Some(yuv_to_rgb(y_val, u, v))
            }
            b"RGB3" => {
                let offset = index * 3;
                let rgb = self.data.get(offset..offset + 3)?;
                Some((*rgb.first()?, *rgb.get(1)?, *rgb.get(2)?))
            }
            b"GREY" => {
                let luma = *self.data.get(index)?;
                Some((luma, luma, luma))
            }
            _ => None,
        }
    }

    /// Decode the frame into packed 8-bit RGB.
    pub fn to_rgb(&self) -> Result<Vec<u8>> {
        if self.fourcc == FourCC::MJPG {
            let decoded = image::load_from_memory(&self.data)
                .map_err(|err| CameraError::Decode(err.to_string()))?;
            return Ok(decoded.to_rgb8().into_raw());
        }
        if self.fourcc.bytes_per_pixel().is_none() {
            return Err(CameraError::Decode(format!(
                "unsupported pixel format {}",
                self.fourcc
            )));
        }

        let mut rgb = Vec::with_capacity(self.width as usize * self.height as usize * 3);
        for y in 0..self.height {
            for x in 0..self.width {
                let (r, g, b) = self.pixel_at(x, y).ok_or_else(|| {
                    CameraError::Decode(format!("frame buffer truncated at ({x}, {y})"))
                })?;
                rgb.extend_from_slice(&[r, g, b]);
            }
        }
        Ok(rgb)
    }
}

/// Convert YUV values to RGB.
///
/// Uses the ITU-R BT.601 conversion formula. Values are clamped to 0-255.
#[must_use]
#[allow(clippy::many_single_char_names)]
pub(crate) fn yuv_to_rgb(y: u8, u: u8, v: u8) -> (u8, u8, u8) {
    let y_f = f32::from(y);
    let u_f = f32::from(u) - 128.0;
    let v_f = f32::from(v) - 128.0;

    let r = 1.402f32.mul_add(v_f, y_f);
    let g = 0.714_14f32.mul_add(-v_f, 0.344_14f32.mul_add(-u_f, y_f));
    let b = 1.772f32.mul_add(u_f, y_f);

    let clamp = |val: f32| -> u8 {
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        {
            val.clamp(0.0, 255.0) as u8
        }
    };

    (clamp(r), clamp(g), clamp(b))
}

/// Error type for camera control operations.
#[derive(Debug, Error)]
pub enum CameraError {
    /// Device with given index was not found.
    #[error("Device {0} not found")]
    DeviceNotFound(u32),
    /// Failed to open device.
    #[error("Failed to open device: {0}")]
    DeviceOpenFailed(String),
    /// Device is closed or owned by an active run.
    #[error("Device unavailable: {0}")]
    DeviceUnavailable(String),
    /// The device does not expose the property.
    #[error("Property not supported: {0}")]
    PropertyUnsupported(Property),
    /// The driver rejected a property access.
    #[error("Property {property} access failed: {reason}")]
    PropertyFailed {
        /// Property being accessed.
        property: Property,
        /// Driver message.
        reason: String,
    },
    /// Frame could not be read.
    #[error("Frame read failed: {0}")]
    FrameReadFailed(String),
    /// Frame payload could not be decoded.
    #[error("Frame decode failed: {0}")]
    Decode(String),
    /// Error during streaming operation.
    #[error("Stream error: {0}")]
    StreamError(String),
    /// Operation timed out.
    #[error("Operation timed out")]
    Timeout,
    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for camera operations.
pub type Result<T> = std::result::Result<T, CameraError>;

/// Opens capture devices by index.
pub trait CameraBackend {
    /// The device handle produced by `open`.
    type Device: CameraDevice;

    /// Open the device at `index` (e.g., 0 for /dev/video0).
    fn open(&self, index: u32) -> Result<Self::Device>;
}

/// Abstraction over an open capture device.
///
/// `set_property` returning `Ok(true)` only means the driver accepted the
/// call; callers must read the value back to learn whether it took effect.
pub trait CameraDevice {
    /// Whether the handle is still usable.
    fn is_open(&self) -> bool;

    /// Read the current value of a property.
    fn get_property(&self, property: Property) -> Result<f64>;

    /// Write a property. Returns whether the driver accepted the call.
    fn set_property(&mut self, property: Property, value: f64) -> Result<bool>;

    /// Capture the next frame, blocking until one is available.
    fn read_frame(&mut self) -> Result<Frame>;

    /// Release the device. Further calls report `DeviceUnavailable`.
    fn close(&mut self);
}
