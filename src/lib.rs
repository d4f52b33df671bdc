//! cam-diag: empirical capability diagnostics for USB camera modules.
//!
//! The engine drives a camera through a fixed set of probes and scores each
//! capability by what it can measure (frame brightness deltas, property
//! readbacks, frame statistics) rather than by what the driver claims. The
//! camera itself sits behind the [`CameraDevice`] port, with a V4L2
//! implementation for real hardware and a simulated one for tests.

pub mod aggregator;
pub mod classifier;
pub mod config;
pub mod device;
pub mod error;
pub mod guard;
pub mod logging;
pub mod metrics;
pub mod mock;
pub mod ports;
pub mod probes;
pub mod report;
pub mod result;
pub mod runner;
pub mod session;
pub mod survey;
pub mod traits;

pub use aggregator::{ResultAggregator, RunSummary};
pub use classifier::{preferred_camera, CameraClass, CameraDescriptor, Classifier};
pub use config::EngineConfig;
pub use device::{V4L2Backend, V4L2Camera};
pub use error::{Error, Result};
pub use guard::PropertyGuard;
pub use ports::{CommandProcessInfo, DirectoryImageSink, ImageSink, ProcessInfo, ReportSink};
pub use probes::{run_probe, ProbeContext, ProbeKind};
pub use result::{DetailValue, Details, ProbeResult, ProbeStatus};
pub use runner::{parse_probes, CancelToken, ProbeRunner};
pub use session::{ProbeSession, RunHandle, RunState};
pub use survey::{survey_properties, PropertyReport};
pub use traits::{CameraBackend, CameraDevice, CameraError, Frame, Property};
