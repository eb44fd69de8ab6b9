//! The camera facade: one handle over any backend.
//!
//! All state lives behind a single mutex, so lifecycle transitions and
//! captures are serialized and never observe a half-open backend. `capture`
//! holds the lock for the duration of the read, so two threads sharing a
//! handle take frames in turn rather than interleaving device I/O.

use std::net::SocketAddr;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use serde::Serialize;

use crate::backend::{Backend, BackendKind};
use crate::errors::{CameraError, Result};
use crate::frame::Frame;
use crate::options::CameraOptions;
use crate::source::{CameraSource, SourceSpec};

/// Lifecycle of a camera handle.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Stopped,
    Starting,
    Running,
    Stopping,
    /// The last start or capture failed unrecoverably. Only `stop()` clears
    /// this state.
    Faulted,
}

/// Snapshot of a camera's identity and status.
#[derive(Clone, Debug, Serialize)]
pub struct CameraInfo {
    pub kind: BackendKind,
    /// Human-readable source description with credentials redacted.
    pub source: String,
    pub state: ConnectionState,
    pub resolution: (u32, u32),
    pub fps: u32,
    /// Bound address when the backend hosts a WebSocket server.
    pub local_addr: Option<SocketAddr>,
}

struct CameraInner {
    state: ConnectionState,
    backend: Backend,
    last_capture: Option<Instant>,
}

pub struct Camera {
    inner: Mutex<CameraInner>,
    options: CameraOptions,
    frame_interval: Duration,
    read_timeout: Duration,
}

impl Camera {
    /// Resolve the source descriptor and configure the matching backend.
    /// No device, network, or socket I/O happens until [`Camera::start`].
    pub fn new(spec: impl Into<SourceSpec>, options: CameraOptions) -> Result<Camera> {
        let source = CameraSource::resolve(&spec.into())?;
        let backend = Backend::create(&source, &options)?;
        let fps = options.fps_or_default();
        let frame_interval = if fps == 0 {
            Duration::ZERO
        } else {
            Duration::from_secs_f64(1.0 / f64::from(fps))
        };
        Ok(Camera {
            inner: Mutex::new(CameraInner {
                state: ConnectionState::Stopped,
                backend,
                last_capture: None,
            }),
            read_timeout: options.timeout_or_default(),
            frame_interval,
            options,
        })
    }

    /// Acquire the backend resource. Idempotent: starting a running camera
    /// is a no-op. A failed start leaves the camera `Faulted`.
    pub fn start(&self) -> Result<()> {
        let mut inner = self.lock();
        match inner.state {
            ConnectionState::Running => return Ok(()),
            ConnectionState::Faulted => {
                return Err(CameraError::Connection(
                    "camera is faulted; stop() it before restarting".into(),
                ))
            }
            _ => {}
        }
        inner.state = ConnectionState::Starting;
        match inner.backend.open() {
            Ok(()) => {
                inner.state = ConnectionState::Running;
                log::info!("camera started: {}", inner.backend.describe());
                Ok(())
            }
            Err(err) => {
                inner.state = ConnectionState::Faulted;
                Err(err)
            }
        }
    }

    /// Capture one frame. Paced to the configured frame rate: a caller
    /// capturing faster than the interval sleeps for the remainder.
    pub fn capture(&self) -> Result<Frame> {
        self.pace();
        let mut inner = self.lock();
        self.capture_locked(&mut inner)
    }

    /// Capture one frame as encoded bytes: PNG when the `compression`
    /// option is set, raw pixel data otherwise.
    pub fn capture_bytes(&self) -> Result<Vec<u8>> {
        self.pace();
        let mut inner = self.lock();
        let frame = self.capture_locked(&mut inner)?;
        if self.options.compression.unwrap_or(false) {
            frame.to_png()
        } else {
            Ok(frame.into_data())
        }
    }

    /// Sleep out the remainder of the frame interval. Runs before the
    /// facade lock is taken so a concurrent `stop()` never waits behind
    /// the pacing sleep; the state check happens after reacquiring.
    fn pace(&self) {
        let wait = {
            let inner = self.lock();
            inner
                .last_capture
                .and_then(|last| self.frame_interval.checked_sub(last.elapsed()))
        };
        if let Some(wait) = wait {
            if !wait.is_zero() {
                std::thread::sleep(wait);
            }
        }
    }

    fn capture_locked(&self, inner: &mut CameraInner) -> Result<Frame> {
        if inner.state != ConnectionState::Running {
            return Err(CameraError::NotStarted);
        }
        let frame = match inner.backend.read(self.read_timeout) {
            Ok(Some(frame)) => frame,
            Ok(None) => {
                return Err(CameraError::Frame(format!(
                    "no frame available within {:?}",
                    self.read_timeout
                )))
            }
            Err(err) => {
                if !err.is_transient() {
                    inner.state = ConnectionState::Faulted;
                }
                return Err(err);
            }
        };
        inner.last_capture = Some(Instant::now());
        if self.options.letterbox.unwrap_or(false) {
            let target = inner
                .backend
                .active_resolution()
                .unwrap_or_else(|| self.options.resolution_or_default());
            return frame.letterboxed(target);
        }
        Ok(frame)
    }

    /// Release the backend resource. Idempotent and infallible; also the
    /// only way out of the `Faulted` state.
    pub fn stop(&self) {
        let mut inner = self.lock();
        if inner.state == ConnectionState::Stopped {
            return;
        }
        inner.state = ConnectionState::Stopping;
        inner.backend.close();
        inner.state = ConnectionState::Stopped;
        inner.last_capture = None;
        log::info!("camera stopped");
    }

    pub fn is_started(&self) -> bool {
        self.lock().state == ConnectionState::Running
    }

    pub fn state(&self) -> ConnectionState {
        self.lock().state
    }

    /// Push an application message to the connected WebSocket client.
    /// Errors on non-hosting backends and on stopped cameras.
    pub fn send_message(&self, text: &str) -> Result<()> {
        let inner = self.lock();
        if inner.state != ConnectionState::Running {
            return Err(CameraError::NotStarted);
        }
        inner.backend.send_message(text)
    }

    pub fn info(&self) -> CameraInfo {
        let inner = self.lock();
        CameraInfo {
            kind: inner.backend.kind(),
            source: inner.backend.describe(),
            state: inner.state,
            resolution: inner
                .backend
                .active_resolution()
                .unwrap_or_else(|| self.options.resolution_or_default()),
            fps: self.options.fps_or_default(),
            local_addr: inner.backend.local_addr(),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, CameraInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Drop for Camera {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stub_camera(options: CameraOptions) -> Camera {
        Camera::new("stub://facade", options).unwrap()
    }

    #[test]
    fn capture_before_start_is_rejected() {
        let camera = stub_camera(CameraOptions::new());
        assert!(matches!(
            camera.capture().unwrap_err(),
            CameraError::NotStarted
        ));
        assert!(!camera.is_started());
    }

    #[test]
    fn start_capture_stop_cycle() {
        let camera = stub_camera(CameraOptions::new().fps(0));
        camera.start().unwrap();
        assert!(camera.is_started());
        let frame = camera.capture().unwrap();
        assert_eq!((frame.width(), frame.height()), (640, 480));
        camera.stop();
        assert_eq!(camera.state(), ConnectionState::Stopped);
        assert!(matches!(
            camera.capture().unwrap_err(),
            CameraError::NotStarted
        ));
    }

    #[test]
    fn start_and_stop_are_idempotent() {
        let camera = stub_camera(CameraOptions::new().fps(0));
        camera.start().unwrap();
        camera.start().unwrap();
        assert!(camera.is_started());
        camera.stop();
        camera.stop();
        assert_eq!(camera.state(), ConnectionState::Stopped);
    }

    #[test]
    fn stop_does_not_wait_behind_pacing_sleep() {
        use std::sync::Arc;

        let camera = Arc::new(stub_camera(CameraOptions::new().fps(1)));
        camera.start().unwrap();
        camera.capture().unwrap();

        // Second capture enters a ~1 s pacing sleep; stop() from another
        // thread must not stall behind it.
        let worker = {
            let camera = Arc::clone(&camera);
            std::thread::spawn(move || {
                let _ = camera.capture();
            })
        };
        std::thread::sleep(Duration::from_millis(100));

        let begin = Instant::now();
        camera.stop();
        assert!(
            begin.elapsed() < Duration::from_millis(300),
            "stop() stalled {:?} behind a pacing capture",
            begin.elapsed()
        );
        worker.join().unwrap();
    }

    #[test]
    fn capture_paces_to_frame_rate() {
        let camera = stub_camera(CameraOptions::new().fps(20));
        camera.start().unwrap();
        camera.capture().unwrap();
        let begin = Instant::now();
        camera.capture().unwrap();
        // Second capture must wait out the 50 ms interval.
        assert!(begin.elapsed() >= Duration::from_millis(40));
    }

    #[test]
    fn fatal_capture_faults_until_stopped() {
        let camera = Camera::new("stub://bench?fatal=1", CameraOptions::new()).unwrap();
        camera.start().unwrap();
        // The stub raises its injected fatal error on first read.
        let err = camera.capture().unwrap_err();
        assert!(matches!(err, CameraError::AuthRejected(_)));
        assert_eq!(camera.state(), ConnectionState::Faulted);
        assert!(matches!(
            camera.start().unwrap_err(),
            CameraError::Connection(_)
        ));
        camera.stop();
        camera.start().unwrap();
        camera.capture().unwrap();
    }

    #[test]
    fn info_reports_backend_and_state() {
        let camera = stub_camera(CameraOptions::new().resolution(320, 240).fps(5));
        let info = camera.info();
        assert_eq!(info.kind, BackendKind::LocalDevice);
        assert_eq!(info.state, ConnectionState::Stopped);
        assert_eq!(info.resolution, (320, 240));
        assert_eq!(info.fps, 5);
        assert!(info.local_addr.is_none());

        camera.start().unwrap();
        assert_eq!(camera.info().state, ConnectionState::Running);
    }
}
