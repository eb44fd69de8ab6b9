//! End-to-end lifecycle coverage against the synthetic stub source: no
//! hardware or network required.

use camlink::{BackendKind, Camera, CameraError, CameraOptions, ConnectionState, FrameEncoding};

#[test]
fn full_lifecycle_with_requested_resolution() {
    let camera = Camera::new(
        "stub://lifecycle",
        CameraOptions::new().resolution(320, 240).fps(0),
    )
    .unwrap();

    assert_eq!(camera.state(), ConnectionState::Stopped);
    camera.start().unwrap();
    assert!(camera.is_started());

    let frame = camera.capture().unwrap();
    assert_eq!((frame.width(), frame.height()), (320, 240));
    assert_eq!(frame.encoding(), FrameEncoding::Rgb8);
    assert_eq!(frame.data().len(), 320 * 240 * 3);

    camera.stop();
    assert_eq!(camera.state(), ConnectionState::Stopped);
}

#[test]
fn default_resolution_applies_when_unset() {
    let camera = Camera::new("stub://defaults", CameraOptions::new().fps(0)).unwrap();
    camera.start().unwrap();
    let frame = camera.capture().unwrap();
    assert_eq!((frame.width(), frame.height()), (640, 480));
}

#[test]
fn repeated_start_and_stop_are_harmless() {
    let camera = Camera::new("stub://idempotent", CameraOptions::new().fps(0)).unwrap();
    camera.start().unwrap();
    camera.start().unwrap();
    camera.capture().unwrap();
    camera.stop();
    camera.stop();
    camera.start().unwrap();
    camera.capture().unwrap();
    camera.stop();
}

#[test]
fn capture_after_stop_is_rejected() {
    let camera = Camera::new("stub://stopped", CameraOptions::new().fps(0)).unwrap();
    camera.start().unwrap();
    camera.capture().unwrap();
    camera.stop();
    assert!(matches!(
        camera.capture().unwrap_err(),
        CameraError::NotStarted
    ));
    assert!(matches!(
        camera.capture_bytes().unwrap_err(),
        CameraError::NotStarted
    ));
}

#[test]
fn consecutive_frames_differ() {
    let camera = Camera::new("stub://moving", CameraOptions::new().fps(0)).unwrap();
    camera.start().unwrap();
    let first = camera.capture().unwrap();
    let second = camera.capture().unwrap();
    assert_ne!(first.data(), second.data());
}

#[test]
fn capture_bytes_with_compression_yields_png() {
    let camera = Camera::new(
        "stub://png",
        CameraOptions::new().resolution(64, 48).fps(0).compression(true),
    )
    .unwrap();
    camera.start().unwrap();

    let bytes = camera.capture_bytes().unwrap();
    assert_eq!(&bytes[..8], b"\x89PNG\r\n\x1a\n");
    let decoded = image::load_from_memory(&bytes).unwrap();
    assert_eq!((decoded.width(), decoded.height()), (64, 48));
}

#[test]
fn capture_bytes_without_compression_is_raw() {
    let camera = Camera::new(
        "stub://raw",
        CameraOptions::new().resolution(16, 16).fps(0),
    )
    .unwrap();
    camera.start().unwrap();
    let bytes = camera.capture_bytes().unwrap();
    assert_eq!(bytes.len(), 16 * 16 * 3);
}

#[test]
fn letterboxed_capture_matches_active_resolution() {
    // The stub declares its own size via query parameters; letterboxed
    // output always lands on the active resolution.
    let camera = Camera::new(
        "stub://square?w=100&h=100",
        CameraOptions::new().letterbox(true).fps(0),
    )
    .unwrap();
    camera.start().unwrap();
    let frame = camera.capture().unwrap();
    assert_eq!((frame.width(), frame.height()), (100, 100));
    assert_eq!(camera.info().resolution, (100, 100));
}

#[test]
fn zero_dimension_source_fails_capture_cleanly() {
    let camera = Camera::new(
        "stub://degenerate?w=0&h=0",
        CameraOptions::new().letterbox(true).fps(0),
    )
    .unwrap();
    camera.start().unwrap();
    assert!(matches!(
        camera.capture().unwrap_err(),
        CameraError::Frame(_)
    ));
}

#[test]
fn dropping_a_running_camera_stops_it() {
    // Nothing observable without hardware, but Drop must not panic while
    // the backend is open.
    let camera = Camera::new("stub://dropme", CameraOptions::new().fps(0)).unwrap();
    camera.start().unwrap();
    camera.capture().unwrap();
    drop(camera);
}

#[test]
fn info_describes_the_source() {
    let camera = Camera::new("stub://describe", CameraOptions::new().fps(3)).unwrap();
    let info = camera.info();
    assert_eq!(info.kind, BackendKind::LocalDevice);
    assert_eq!(info.fps, 3);
    assert!(info.source.contains("stub://describe"));
    assert!(info.local_addr.is_none());
}
