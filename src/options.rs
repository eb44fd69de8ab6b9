//! Camera configuration options.
//!
//! Options are an explicit struct rather than a free-form keyword map: every
//! field the crate understands is named here, and each backend validates the
//! set it supports. An option the selected backend does not accept is
//! rejected with `CameraError::UnsupportedOption` instead of being silently
//! ignored, so misconfiguration surfaces at construction time.

use std::str::FromStr;
use std::time::Duration;

use crate::errors::{CameraError, Result};
use crate::source::CameraSource;

pub const DEFAULT_RESOLUTION: (u32, u32) = (640, 480);
pub const DEFAULT_FPS: u32 = 10;
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_QUEUE_SIZE: usize = 1;

/// Wire format a WebSocket client uses to push frames.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum FrameFormat {
    /// Text messages carrying a base64-encoded image.
    #[default]
    Base64,
    /// Binary messages carrying raw encoded image bytes.
    Binary,
    /// JSON objects wrapping a base64 `image` (or `frame`) field.
    Json,
}

impl FrameFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            FrameFormat::Base64 => "base64",
            FrameFormat::Binary => "binary",
            FrameFormat::Json => "json",
        }
    }
}

impl FromStr for FrameFormat {
    type Err = CameraError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "base64" => Ok(FrameFormat::Base64),
            "binary" => Ok(FrameFormat::Binary),
            "json" => Ok(FrameFormat::Json),
            _ => Err(CameraError::InvalidSource(format!(
                "unknown frame format '{s}'"
            ))),
        }
    }
}

/// Options accepted by [`crate::Camera`]. Unset fields take backend defaults.
#[derive(Clone, Debug, Default)]
pub struct CameraOptions {
    pub resolution: Option<(u32, u32)>,
    pub fps: Option<u32>,
    /// Encode captured frames to PNG in `capture_bytes`.
    pub compression: Option<bool>,
    /// Aspect-preserving fit with padding to the target resolution.
    pub letterbox: Option<bool>,
    /// Connection establishment timeout for network backends.
    pub timeout: Option<Duration>,
    pub username: Option<String>,
    pub password: Option<String>,
    /// WebSocket frame queue capacity (oldest frame dropped when full).
    pub max_queue_size: Option<usize>,
    /// Expected WebSocket frame format.
    pub frame_format: Option<FrameFormat>,
}

impl CameraOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn resolution(mut self, width: u32, height: u32) -> Self {
        self.resolution = Some((width, height));
        self
    }

    pub fn fps(mut self, fps: u32) -> Self {
        self.fps = Some(fps);
        self
    }

    pub fn compression(mut self, on: bool) -> Self {
        self.compression = Some(on);
        self
    }

    pub fn letterbox(mut self, on: bool) -> Self {
        self.letterbox = Some(on);
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn credentials(mut self, username: &str, password: &str) -> Self {
        self.username = Some(username.to_string());
        self.password = Some(password.to_string());
        self
    }

    pub fn max_queue_size(mut self, size: usize) -> Self {
        self.max_queue_size = Some(size);
        self
    }

    pub fn frame_format(mut self, format: FrameFormat) -> Self {
        self.frame_format = Some(format);
        self
    }

    /// Reject any option the backend selected for `source` does not accept.
    pub fn validate_for(&self, source: &CameraSource) -> Result<()> {
        let backend = backend_name(source);
        for (option, allowed) in self.supplied(source) {
            if !allowed {
                return Err(CameraError::UnsupportedOption { option, backend });
            }
        }
        Ok(())
    }

    /// Which supplied options the backend for `source` accepts.
    fn supplied(&self, source: &CameraSource) -> Vec<(&'static str, bool)> {
        let (local, ip, ws) = match source {
            CameraSource::LocalIndex(_) | CameraSource::LocalPath(_) | CameraSource::Stub(_) => {
                (true, false, false)
            }
            CameraSource::IpStream { .. } => (false, true, false),
            CameraSource::WebSocketListen { .. } => (false, false, true),
        };
        let mut checks = Vec::new();
        if self.resolution.is_some() {
            checks.push(("resolution", true));
        }
        if self.fps.is_some() {
            checks.push(("fps", true));
        }
        if self.compression.is_some() {
            checks.push(("compression", true));
        }
        if self.letterbox.is_some() {
            checks.push(("letterbox", local));
        }
        if self.timeout.is_some() {
            checks.push(("timeout", ip || ws));
        }
        if self.username.is_some() {
            checks.push(("username", ip));
        }
        if self.password.is_some() {
            checks.push(("password", ip));
        }
        if self.max_queue_size.is_some() {
            checks.push(("max_queue_size", ws));
        }
        if self.frame_format.is_some() {
            checks.push(("frame_format", ws));
        }
        checks
    }

    pub fn resolution_or_default(&self) -> (u32, u32) {
        self.resolution.unwrap_or(DEFAULT_RESOLUTION)
    }

    pub fn fps_or_default(&self) -> u32 {
        self.fps.unwrap_or(DEFAULT_FPS)
    }

    pub fn timeout_or_default(&self) -> Duration {
        self.timeout.unwrap_or(DEFAULT_TIMEOUT)
    }
}

fn backend_name(source: &CameraSource) -> &'static str {
    match source {
        CameraSource::LocalIndex(_) | CameraSource::LocalPath(_) | CameraSource::Stub(_) => {
            "local device"
        }
        CameraSource::IpStream { .. } => "ip stream",
        CameraSource::WebSocketListen { .. } => "websocket server",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::SourceSpec;

    fn source(descriptor: &str) -> CameraSource {
        CameraSource::resolve(&SourceSpec::from(descriptor)).unwrap()
    }

    #[test]
    fn local_device_rejects_network_options() {
        let local = source("/dev/video0");
        let err = CameraOptions::new()
            .credentials("admin", "secret")
            .validate_for(&local)
            .unwrap_err();
        assert!(matches!(
            err,
            CameraError::UnsupportedOption {
                option: "username",
                ..
            }
        ));

        let err = CameraOptions::new()
            .frame_format(FrameFormat::Json)
            .validate_for(&local)
            .unwrap_err();
        assert!(matches!(
            err,
            CameraError::UnsupportedOption {
                option: "frame_format",
                ..
            }
        ));
    }

    #[test]
    fn ip_stream_rejects_websocket_options() {
        let ip = source("rtsp://cam.local/stream");
        let err = CameraOptions::new()
            .max_queue_size(4)
            .validate_for(&ip)
            .unwrap_err();
        assert!(matches!(
            err,
            CameraError::UnsupportedOption {
                option: "max_queue_size",
                ..
            }
        ));
    }

    #[test]
    fn websocket_rejects_credentials() {
        let ws = source("ws://0.0.0.0:9090");
        let err = CameraOptions::new()
            .credentials("admin", "secret")
            .validate_for(&ws)
            .unwrap_err();
        assert!(matches!(err, CameraError::UnsupportedOption { .. }));
    }

    #[test]
    fn accepted_options_pass_validation() {
        let local = source("0");
        CameraOptions::new()
            .resolution(640, 480)
            .fps(15)
            .letterbox(true)
            .compression(true)
            .validate_for(&local)
            .unwrap();

        let ip = source("http://cam.local/video.mjpg");
        CameraOptions::new()
            .credentials("admin", "secret")
            .timeout(Duration::from_secs(5))
            .validate_for(&ip)
            .unwrap();

        let ws = source("ws://0.0.0.0:9090");
        CameraOptions::new()
            .frame_format(FrameFormat::Binary)
            .max_queue_size(8)
            .timeout(Duration::from_secs(5))
            .validate_for(&ws)
            .unwrap();
    }

    #[test]
    fn frame_format_parses_known_names() {
        assert_eq!("base64".parse::<FrameFormat>().unwrap(), FrameFormat::Base64);
        assert_eq!("BINARY".parse::<FrameFormat>().unwrap(), FrameFormat::Binary);
        assert_eq!("json".parse::<FrameFormat>().unwrap(), FrameFormat::Json);
        assert!("yaml".parse::<FrameFormat>().is_err());
    }
}
