//! End-to-end runs against simulated cameras.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use cam_diag::config::{EngineConfig, ProbeTimings, Resolution};
use cam_diag::mock::{Behavior, SimulatedBackend, SimulatedCamera};
use cam_diag::ports::{DirectoryImageSink, ImageSink};
use cam_diag::{
    preferred_camera, run_probe, CameraClass, CameraDevice, CancelToken, Classifier, Error, ProbeContext,
    ProbeKind, ProbeSession, ProbeStatus, Property,
};

fn quick_config() -> EngineConfig {
    let mut config = EngineConfig::default();
    config.probes.timings = ProbeTimings::immediate();
    config
}

fn snapshot<D: CameraDevice>(camera: &D) -> Vec<(Property, f64)> {
    Property::ALL
        .iter()
        .filter_map(|&p| camera.get_property(p).ok().map(|v| (p, v)))
        .collect()
}

#[test]
fn test_bench_classification() {
    let backend = SimulatedBackend::new()
        .with_camera(0, SimulatedCamera::new().with_resolution(1280, 720))
        .with_camera(1, SimulatedCamera::new().with_resolution(1920, 1080))
        .with_camera(2, SimulatedCamera::new().with_resolution(7680, 4320));
    let classifier = Classifier::default();

    let cameras = classifier.enumerate(&backend, 3);
    let classes: Vec<_> = cameras.iter().map(|c| (c.index(), c.classification())).collect();
    assert_eq!(
        classes,
        vec![(0, CameraClass::BuiltIn), (1, CameraClass::Usb), (2, CameraClass::Usb)]
    );
    assert_eq!(preferred_camera(&cameras).map(|c| c.index()), Some(1));

    // Same inputs, same labels.
    let again = classifier.enumerate(&backend, 3);
    assert_eq!(cameras, again);
}

#[test]
fn test_full_run_restores_every_property() {
    let dir = tempfile::tempdir().expect("tempdir");
    let camera = SimulatedCamera::new().with_resolution(320, 240);
    let before = snapshot(&camera);

    let sink: Arc<dyn ImageSink> = Arc::new(DirectoryImageSink::new(dir.path()));
    let session = ProbeSession::new(camera, quick_config()).with_image_sink(sink);
    let summary = session
        .start_probes(ProbeKind::ALL.to_vec())
        .expect("start")
        .wait()
        .expect("run");

    assert_eq!(summary.total, ProbeKind::ALL.len());
    assert_eq!(summary.total, summary.pass_count + summary.fail_count + summary.skip_count);
    let order: Vec<_> = summary.results.iter().map(|r| r.probe()).collect();
    assert_eq!(order, ProbeKind::ALL.to_vec());
    let capture = summary
        .results
        .iter()
        .find(|r| r.probe() == ProbeKind::CaptureTestImage)
        .expect("capture result");
    assert_eq!(capture.status(), ProbeStatus::Pass, "{}", capture.message());
    let image_path = capture
        .details()
        .get("image_path")
        .and_then(|v| v.as_str())
        .expect("image path");
    assert!(std::path::Path::new(image_path).starts_with(dir.path()));
    assert!(std::path::Path::new(image_path).exists());

    let after = session.with_device(|camera| snapshot(&*camera)).expect("idle");
    assert_eq!(before.len(), after.len());
    for ((property, old), (_, new)) in before.iter().zip(&after) {
        assert!((old - new).abs() < f64::EPSILON, "{property}: {old} -> {new}");
    }
}

#[test]
fn test_restricted_sensor_reports_single_resolution() {
    let config = quick_config();
    let cancel = CancelToken::new();
    let ctx = ProbeContext::new(&config, &cancel);
    let mut camera = SimulatedCamera::new().with_supported_resolutions(vec![Resolution::new(640, 480)]);

    let result = run_probe(ProbeKind::Resolution, &mut camera, &ctx).expect("probe");
    assert_eq!(result.status(), ProbeStatus::Pass);
    assert_eq!(result.message(), "Supported resolutions: 640x480");
}

#[test]
fn test_exposure_falls_through_to_mode_toggling() {
    let config = quick_config();
    let cancel = CancelToken::new();
    let ctx = ProbeContext::new(&config, &cancel);
    let mut camera = SimulatedCamera::new()
        .with_resolution(64, 48)
        .without_luma_response()
        .with_behavior(Property::Exposure, Behavior::Ignore)
        .with_behavior(Property::Brightness, Behavior::Ignore)
        .with_behavior(Property::Gain, Behavior::Ignore);

    let result = run_probe(ProbeKind::ExposureControl, &mut camera, &ctx).expect("probe");
    assert_eq!(result.status(), ProbeStatus::Pass);
    assert_eq!(
        result.details().get("method").and_then(|v| v.as_str()),
        Some("method3_auto_exposure")
    );
}

#[test]
fn test_cancel_after_k_probes() {
    for k in 1..=3 {
        let camera = SimulatedCamera::new().with_resolution(64, 48);
        let session = Arc::new(ProbeSession::new(camera, quick_config()));
        let seen = Arc::new(Mutex::new(Vec::new()));
        let completed = Arc::new(AtomicUsize::new(0));

        let weak = Arc::downgrade(&session);
        let record = Arc::clone(&seen);
        session.on_probe_completed(move |result| {
            record.lock().expect("lock").push(result.probe());
            if completed.fetch_add(1, Ordering::SeqCst) + 1 == k {
                if let Some(session) = weak.upgrade() {
                    session.cancel_run();
                }
            }
        });

        let summary = session
            .start_probes(ProbeKind::ALL.to_vec())
            .expect("start")
            .wait()
            .expect("run");

        assert_eq!(summary.total, k);
        let expected: Vec<_> = ProbeKind::ALL.iter().copied().take(k).collect();
        let order: Vec<_> = summary.results.iter().map(|r| r.probe()).collect();
        assert_eq!(order, expected);
        assert_eq!(*seen.lock().expect("lock"), expected);
    }
}

#[test]
fn test_concurrent_start_is_rejected() {
    let camera = SimulatedCamera::new()
        .with_resolution(64, 48)
        .with_frame_interval(Duration::from_millis(10));
    let mut config = quick_config();
    config.probes.timings.power_window_ms = 300;
    let session = ProbeSession::new(camera, config);

    let handle = session.start_run(&["power"]).expect("start");
    assert!(session.is_running());
    assert!(matches!(session.start_run(&["detection"]), Err(Error::RunInProgress)));

    let summary = handle.wait().expect("run");
    assert_eq!(summary.total, 1);
    assert_eq!(summary.results[0].status(), ProbeStatus::Pass);
    assert!(!session.is_running());
}
