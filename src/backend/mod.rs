//! Capture backends and the factory that selects between them.
//!
//! Backend choice is a closed set, decided entirely by the resolved
//! [`CameraSource`]: device indices and paths go to the local device backend,
//! `rtsp`/`http(s)` URLs to the IP stream backend, and `ws` descriptors to
//! the self-hosted WebSocket server. Construction is pure: no I/O happens
//! until `open()`.

use std::net::SocketAddr;
use std::time::Duration;

use crate::errors::Result;
use crate::frame::Frame;
use crate::options::CameraOptions;
use crate::source::CameraSource;

pub mod ip;
pub mod local;
mod stub;
pub mod websocket;

pub use ip::IpStreamConfig;
pub use local::LocalDeviceConfig;
pub use websocket::WsServerConfig;

/// Which capture strategy a camera is using.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    LocalDevice,
    IpStream,
    WebSocketServer,
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            BackendKind::LocalDevice => "local device",
            BackendKind::IpStream => "ip stream",
            BackendKind::WebSocketServer => "websocket server",
        };
        f.write_str(name)
    }
}

pub(crate) enum Backend {
    Local(local::LocalBackend),
    Ip(ip::IpStreamBackend),
    Ws(websocket::WsServerBackend),
}

impl std::fmt::Debug for Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Backend::Local(_) => "Backend::Local",
            Backend::Ip(_) => "Backend::Ip",
            Backend::Ws(_) => "Backend::Ws",
        };
        f.write_str(name)
    }
}

impl Backend {
    /// Select and configure a backend for the resolved source. Validates the
    /// supplied options against what the backend accepts; performs no I/O.
    pub(crate) fn create(source: &CameraSource, options: &CameraOptions) -> Result<Backend> {
        options.validate_for(source)?;
        match source {
            CameraSource::LocalIndex(_) | CameraSource::LocalPath(_) | CameraSource::Stub(_) => {
                Ok(Backend::Local(local::LocalBackend::create(source, options)?))
            }
            CameraSource::IpStream { .. } => {
                Ok(Backend::Ip(ip::IpStreamBackend::create(source, options)?))
            }
            CameraSource::WebSocketListen { .. } => Ok(Backend::Ws(
                websocket::WsServerBackend::create(source, options)?,
            )),
        }
    }

    pub(crate) fn kind(&self) -> BackendKind {
        match self {
            Backend::Local(_) => BackendKind::LocalDevice,
            Backend::Ip(_) => BackendKind::IpStream,
            Backend::Ws(_) => BackendKind::WebSocketServer,
        }
    }

    /// Acquire the underlying resource (open device, probe stream, or bind
    /// the listening socket).
    pub(crate) fn open(&mut self) -> Result<()> {
        match self {
            Backend::Local(b) => b.open(),
            Backend::Ip(b) => b.open(),
            Backend::Ws(b) => b.open(),
        }
    }

    /// Produce the next frame. `Ok(None)` means no frame is currently
    /// available (reconnect budget exhausted, or no WebSocket client has
    /// pushed within `timeout`).
    pub(crate) fn read(&mut self, timeout: Duration) -> Result<Option<Frame>> {
        match self {
            Backend::Local(b) => b.read(),
            Backend::Ip(b) => b.read(),
            Backend::Ws(b) => Ok(b.read(timeout)),
        }
    }

    /// Release the resource. Idempotent; never fails.
    pub(crate) fn close(&mut self) {
        match self {
            Backend::Local(b) => b.close(),
            Backend::Ip(b) => b.close(),
            Backend::Ws(b) => b.close(),
        }
    }

    /// Resolution the backend actually negotiated, where known up front.
    pub(crate) fn active_resolution(&self) -> Option<(u32, u32)> {
        match self {
            Backend::Local(b) => Some(b.active_resolution()),
            Backend::Ip(_) | Backend::Ws(_) => None,
        }
    }

    /// Bound address of the WebSocket server backend.
    pub(crate) fn local_addr(&self) -> Option<SocketAddr> {
        match self {
            Backend::Ws(b) => b.local_addr(),
            _ => None,
        }
    }

    /// Push an application message to the connected WebSocket client.
    pub(crate) fn send_message(&self, text: &str) -> Result<()> {
        match self {
            Backend::Ws(b) => b.send_message(text),
            _ => Err(crate::errors::CameraError::Unsupported(format!(
                "send_message is not supported by the {} backend",
                self.kind()
            ))),
        }
    }

    pub(crate) fn describe(&self) -> String {
        match self {
            Backend::Local(b) => b.describe(),
            Backend::Ip(b) => b.describe(),
            Backend::Ws(b) => b.describe(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::SourceSpec;

    fn resolve(descriptor: &str) -> CameraSource {
        CameraSource::resolve(&SourceSpec::from(descriptor)).unwrap()
    }

    #[test]
    fn factory_selects_backend_by_source_shape() {
        let options = CameraOptions::new();
        let cases = [
            ("0", BackendKind::LocalDevice),
            ("/dev/video2", BackendKind::LocalDevice),
            ("stub://bench", BackendKind::LocalDevice),
            ("http://cam.local/video.mjpg", BackendKind::IpStream),
            ("ws://127.0.0.1:9090", BackendKind::WebSocketServer),
        ];
        for (descriptor, expected) in cases {
            let backend = Backend::create(&resolve(descriptor), &options).unwrap();
            assert_eq!(backend.kind(), expected, "descriptor {descriptor}");
        }
    }

    #[test]
    fn factory_is_deterministic_and_pure() {
        // Nothing is bound or opened at create time, so repeated creation
        // for the same listen address must succeed.
        let source = resolve("ws://127.0.0.1:18443");
        let options = CameraOptions::new();
        let a = Backend::create(&source, &options).unwrap();
        let b = Backend::create(&source, &options).unwrap();
        assert_eq!(a.kind(), b.kind());
    }

    #[test]
    fn factory_rejects_mismatched_options() {
        let err = Backend::create(
            &resolve("/dev/video0"),
            &CameraOptions::new().max_queue_size(4),
        )
        .unwrap_err();
        assert!(matches!(
            err,
            crate::errors::CameraError::UnsupportedOption { .. }
        ));
    }

    #[test]
    fn send_message_requires_websocket_backend() {
        let backend = Backend::create(&resolve("stub://bench"), &CameraOptions::new()).unwrap();
        let err = backend.send_message("hello").unwrap_err();
        assert!(matches!(err, crate::errors::CameraError::Unsupported(_)));
    }
}
