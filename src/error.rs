//! Engine-level error type.
//!
//! Device failures surface as [`CameraError`] and are wrapped here. Inside a
//! run every probe error is converted into a `FAIL` result at the probe
//! boundary; only setup errors such as an unknown probe name or a run that is
//! already active reach the caller of the runner.

use thiserror::Error;

use crate::traits::CameraError;

/// Convenience alias for results using the engine error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised by the diagnostic engine.
#[derive(Debug, Error)]
pub enum Error {
    /// Camera control port failure.
    #[error(transparent)]
    Camera(#[from] CameraError),

    /// A probe name outside the fixed probe set.
    #[error("Unknown probe: {0}")]
    UnknownProbe(String),

    /// Enumeration found no usable camera.
    #[error("No cameras found")]
    NoCameraFound,

    /// A run was requested with no probes selected.
    #[error("No probes selected")]
    NoProbesSelected,

    /// A run is already active; new runs are rejected, not queued.
    #[error("A test run is already in progress")]
    RunInProgress,

    /// Frames were captured but their statistics cannot support a verdict.
    #[error("Measurement inconclusive: {0}")]
    MeasurementInconclusive(String),

    /// The caller cancelled the run while this probe was sweeping.
    #[error("Cancelled by caller")]
    Cancelled,

    /// The image sink rejected a frame.
    #[error("Image sink error: {0}")]
    ImageSink(String),

    /// The process-info query failed.
    #[error("Process info query failed: {0}")]
    ProcessInfo(String),

    /// Configuration could not be loaded.
    #[error("Configuration error: {0}")]
    Config(#[from] Box<figment::Error>),

    /// The run worker terminated abnormally.
    #[error("Run worker failed: {0}")]
    Worker(String),

    /// The tracing subscriber could not be installed.
    #[error("Logging setup failed: {0}")]
    Logging(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<figment::Error> for Error {
    fn from(err: figment::Error) -> Self {
        Self::Config(Box::new(err))
    }
}
