//! Sequential probe execution with cooperative cancellation.

use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use tracing::{error, info, info_span, warn};

use crate::config::EngineConfig;
use crate::error::{Error, Result};
use crate::ports::{ImageSink, ProcessInfo};
use crate::probes::{run_probe, ProbeContext, ProbeKind};
use crate::result::ProbeResult;
use crate::traits::CameraDevice;

/// Shared cancellation flag. Clones observe the same flag.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    /// A token that has not been cancelled.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation. Idempotent.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Whether cancellation was requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Parse probe names into an ordered, duplicate-free selection.
///
/// Accepts display names (`"Exposure Control"`) and slugs (`"exposure"`).
pub fn parse_probes<S: AsRef<str>>(names: &[S]) -> Result<Vec<ProbeKind>> {
    let mut probes = Vec::with_capacity(names.len());
    for name in names {
        let kind: ProbeKind = name.as_ref().parse()?;
        if !probes.contains(&kind) {
            probes.push(kind);
        }
    }
    if probes.is_empty() {
        return Err(Error::NoProbesSelected);
    }
    Ok(probes)
}

/// Text of a panic payload, for turning a caught panic into a message.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_owned())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "panic with non-text payload".to_owned())
}

/// Runs a probe selection against one device, in order.
pub struct ProbeRunner<'a> {
    config: &'a EngineConfig,
    image_sink: Option<&'a dyn ImageSink>,
    process_info: Option<&'a dyn ProcessInfo>,
}

impl<'a> ProbeRunner<'a> {
    /// Runner using `config`.
    #[must_use]
    pub const fn new(config: &'a EngineConfig) -> Self {
        Self {
            config,
            image_sink: None,
            process_info: None,
        }
    }

    /// Where "Capture Test Image" writes.
    #[must_use]
    pub const fn with_image_sink(mut self, sink: Option<&'a dyn ImageSink>) -> Self {
        self.image_sink = sink;
        self
    }

    /// Host listing consulted by "USB Interface".
    #[must_use]
    pub const fn with_process_info(mut self, info: Option<&'a dyn ProcessInfo>) -> Self {
        self.process_info = info;
        self
    }

    /// Execute `probes` in order, calling `on_result` after each one.
    ///
    /// The token is checked before every probe. Once it is set the run stops
    /// and the results gathered so far are returned; a probe interrupted
    /// mid-sweep restores its properties and contributes no result. Any
    /// other probe error, including a panic, becomes a `FAIL` result and the
    /// run continues.
    pub fn run<D, F>(
        &self,
        device: &mut D,
        probes: &[ProbeKind],
        cancel: &CancelToken,
        mut on_result: F,
    ) -> Vec<ProbeResult>
    where
        D: CameraDevice,
        F: FnMut(&ProbeResult),
    {
        let mut results = Vec::with_capacity(probes.len());
        let pause = self.config.probes.timings.inter_probe();

        for (position, &kind) in probes.iter().enumerate() {
            if cancel.is_cancelled() {
                break;
            }
            if position > 0 && !pause.is_zero() {
                thread::sleep(pause);
                if cancel.is_cancelled() {
                    break;
                }
            }

            let span = info_span!("probe", probe = kind.slug());
            let _enter = span.enter();

            let ctx = ProbeContext::new(self.config, cancel)
                .with_image_sink(self.image_sink)
                .with_process_info(self.process_info);
            let outcome = catch_unwind(AssertUnwindSafe(|| run_probe(kind, &mut *device, &ctx)));
            let result = match outcome {
                Ok(Ok(result)) => result,
                Ok(Err(Error::Cancelled)) => {
                    info!("probe interrupted by cancellation");
                    break;
                }
                Ok(Err(err)) => {
                    warn!(error = %err, "probe aborted");
                    ProbeResult::fail(kind, format!("{kind} error: {err}"))
                }
                Err(payload) => {
                    let message = panic_message(payload.as_ref());
                    error!(panic = %message, "probe panicked");
                    ProbeResult::fail(kind, format!("{kind} error: {message}"))
                }
            };

            info!(status = %result.status(), message = result.message(), "probe finished");
            on_result(&result);
            results.push(result);
        }

        if cancel.is_cancelled() {
            info!(completed = results.len(), requested = probes.len(), "run cancelled");
        }
        results
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProbeTimings;
    use crate::mock::{Behavior, SimulatedCamera};
    use crate::result::ProbeStatus;
    use crate::traits::{Frame, Property};

    fn quick_config() -> EngineConfig {
        let mut config = EngineConfig::default();
        config.probes.timings = ProbeTimings::immediate();
        config
    }

    /// Delivers truncated frames that no probe can decode.
    struct GarbledCamera(SimulatedCamera);

    impl CameraDevice for GarbledCamera {
        fn is_open(&self) -> bool {
            self.0.is_open()
        }

        fn get_property(&self, property: Property) -> crate::traits::Result<f64> {
            self.0.get_property(property)
        }

        fn set_property(&mut self, property: Property, value: f64) -> crate::traits::Result<bool> {
            self.0.set_property(property, value)
        }

        fn read_frame(&mut self) -> crate::traits::Result<Frame> {
            let mut frame = self.0.read_frame()?;
            frame.data.truncate(3);
            Ok(frame)
        }

        fn close(&mut self) {
            self.0.close();
        }
    }

    #[test]
    fn test_parse_probes() {
        let probes = parse_probes(&["focus", "Camera Detection", "focus"]).expect("parse");
        assert_eq!(probes, vec![ProbeKind::Focus, ProbeKind::Detection]);

        assert!(matches!(parse_probes(&["zoom"]), Err(Error::UnknownProbe(_))));
        assert!(matches!(parse_probes::<&str>(&[]), Err(Error::NoProbesSelected)));
    }

    #[test]
    fn test_runs_in_requested_order() {
        let config = quick_config();
        let runner = ProbeRunner::new(&config);
        let mut camera = SimulatedCamera::new().with_resolution(64, 48);
        let order = [ProbeKind::WhiteBalance, ProbeKind::Detection, ProbeKind::Focus];

        let mut seen = Vec::new();
        let results = runner.run(&mut camera, &order, &CancelToken::new(), |r| seen.push(r.probe()));

        assert_eq!(seen, order);
        let probes: Vec<_> = results.iter().map(ProbeResult::probe).collect();
        assert_eq!(probes, order);
    }

    #[test]
    fn test_cancel_after_k_probes_returns_k_results() {
        let config = quick_config();
        let runner = ProbeRunner::new(&config);

        for k in 1..=3 {
            let cancel = CancelToken::new();
            let mut camera = SimulatedCamera::new().with_resolution(64, 48);
            let mut completed = 0;
            let results = runner.run(&mut camera, &ProbeKind::ALL, &cancel, |_| {
                completed += 1;
                if completed == k {
                    cancel.cancel();
                }
            });
            assert_eq!(results.len(), k);
        }

        let cancelled = CancelToken::new();
        cancelled.cancel();
        let mut camera = SimulatedCamera::new();
        assert!(runner.run(&mut camera, &ProbeKind::ALL, &cancelled, |_| {}).is_empty());
    }

    #[test]
    fn test_probe_errors_become_failures() {
        let config = quick_config();
        let runner = ProbeRunner::new(&config);
        let mut camera = GarbledCamera(SimulatedCamera::new().with_resolution(64, 48));

        let results = runner.run(
            &mut camera,
            &[ProbeKind::ImageQuality, ProbeKind::Focus],
            &CancelToken::new(),
            |_| {},
        );
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].status(), ProbeStatus::Fail);
        assert!(results[0].message().starts_with("Image Quality error:"));
        assert_eq!(results[1].status(), ProbeStatus::Pass);
    }

    #[test]
    fn test_failure_does_not_stop_the_run() {
        let config = quick_config();
        let runner = ProbeRunner::new(&config);
        let mut camera = SimulatedCamera::new()
            .with_resolution(64, 48)
            .with_property(Property::Focus, 40.0, Behavior::Ignore)
            .with_property(Property::Autofocus, 1.0, Behavior::Ignore);

        let results = runner.run(
            &mut camera,
            &[ProbeKind::Focus, ProbeKind::Detection],
            &CancelToken::new(),
            |_| {},
        );
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].status(), ProbeStatus::Fail);
        assert_eq!(results[1].status(), ProbeStatus::Pass);
    }

    /// Controls behave, but the driver panics as soon as a frame is read.
    struct CrashingSensor(SimulatedCamera);

    impl CameraDevice for CrashingSensor {
        fn is_open(&self) -> bool {
            self.0.is_open()
        }

        fn get_property(&self, property: Property) -> crate::traits::Result<f64> {
            self.0.get_property(property)
        }

        fn set_property(&mut self, property: Property, value: f64) -> crate::traits::Result<bool> {
            self.0.set_property(property, value)
        }

        #[allow(clippy::panic)]
        fn read_frame(&mut self) -> crate::traits::Result<Frame> {
            panic!("sensor driver crashed");
        }

        fn close(&mut self) {
            self.0.close();
        }
    }

    #[test]
    fn test_panicking_device_becomes_failure() {
        let config = quick_config();
        let runner = ProbeRunner::new(&config);
        let mut camera = CrashingSensor(SimulatedCamera::new().with_resolution(64, 48));
        let before = camera.get_property(Property::WhiteBalanceTemperature).expect("temperature");

        let mut reported = 0;
        let results = runner.run(
            &mut camera,
            &[ProbeKind::Detection, ProbeKind::WhiteBalance, ProbeKind::Focus],
            &CancelToken::new(),
            |_| reported += 1,
        );

        assert_eq!(results.len(), 3);
        assert_eq!(reported, 3);
        assert_eq!(results[0].status(), ProbeStatus::Fail);
        assert_eq!(results[0].message(), "Camera Detection error: sensor driver crashed");
        assert_eq!(results[1].probe(), ProbeKind::WhiteBalance);
        assert_eq!(results[2].probe(), ProbeKind::Focus);

        let after = camera.get_property(Property::WhiteBalanceTemperature).expect("temperature");
        assert!((after - before).abs() < f64::EPSILON);
    }

    #[test]
    fn test_panic_message_extraction() {
        let text: Box<dyn Any + Send> = Box::new("static text");
        assert_eq!(panic_message(text.as_ref()), "static text");
        let owned: Box<dyn Any + Send> = Box::new(String::from("formatted 7"));
        assert_eq!(panic_message(owned.as_ref()), "formatted 7");
        let other: Box<dyn Any + Send> = Box::new(7_u32);
        assert_eq!(panic_message(other.as_ref()), "panic with non-text payload");
    }
}
