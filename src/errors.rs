//! Error taxonomy for the camera capture layer.
//!
//! Errors split into two retry classes:
//! - *Transient* failures (network hiccups, stream stalls) are retried by the
//!   backends through [`crate::reconnect::ReconnectPolicy`].
//! - *Fatal* failures (bad descriptor, rejected credentials, misuse) surface
//!   immediately and are never retried.

use std::io;

/// Result alias used across the crate.
pub type Result<T> = std::result::Result<T, CameraError>;

/// All failures the camera layer can report.
#[derive(Debug, thiserror::Error)]
pub enum CameraError {
    /// The source descriptor did not match any known backend kind.
    #[error("unrecognized camera source '{0}'")]
    InvalidSource(String),

    /// An option was supplied that the selected backend does not accept.
    #[error("option '{option}' is not supported by the {backend} backend")]
    UnsupportedOption {
        option: &'static str,
        backend: &'static str,
    },

    /// A local device could not be opened or configured.
    #[error("device unavailable: {0}")]
    DeviceUnavailable(String),

    /// The WebSocket server could not bind its listening socket.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: io::Error,
    },

    /// A network backend failed to connect or lost its session (transient).
    #[error("connection failed: {0}")]
    Connection(String),

    /// Reconnection attempts were exhausted without recovering the stream.
    #[error("stream lost after {attempts} reconnect attempts: {reason}")]
    StreamLost { attempts: u32, reason: String },

    /// The remote endpoint rejected the supplied credentials (fatal).
    #[error("authentication rejected by {0}")]
    AuthRejected(String),

    /// A capture operation was issued before `start()` (or after `stop()`).
    #[error("camera is not started")]
    NotStarted,

    /// Frame decode, encode, or post-processing failed.
    #[error("frame processing failed: {0}")]
    Frame(String),

    /// The requested operation does not apply to the active backend.
    #[error("unsupported operation: {0}")]
    Unsupported(String),
}

impl CameraError {
    /// Whether a failure is worth retrying under the reconnect policy.
    pub fn is_transient(&self) -> bool {
        matches!(self, CameraError::Connection(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connection_errors_are_transient() {
        assert!(CameraError::Connection("reset by peer".into()).is_transient());
    }

    #[test]
    fn auth_and_config_errors_are_fatal() {
        assert!(!CameraError::AuthRejected("rtsp://cam".into()).is_transient());
        assert!(!CameraError::InvalidSource("ftp://x".into()).is_transient());
        assert!(!CameraError::NotStarted.is_transient());
    }
}
