//! camlink - one capture API over local devices, IP streams, and pushed
//! WebSocket frames.
//!
//! A camera is identified by a source descriptor string:
//!
//! - `"0"` or `"/dev/video0"`: a local V4L capture device (requires the
//!   `local-v4l` feature for real hardware)
//! - `"rtsp://..."` / `"http(s)://..."`: a network stream; RTSP requires
//!   the `rtsp-gstreamer` feature, HTTP serves MJPEG streams and JPEG
//!   snapshots
//! - `"ws://host:port"`: not an outbound connection, the camera hosts a
//!   WebSocket server and accepts frames pushed by a single remote client
//! - `"stub://name"`: a synthetic pattern source for tests and benches
//!
//! Descriptor resolution is total and deterministic, so the backend a
//! descriptor maps to can be decided (and rejected) before any I/O happens:
//!
//! ```
//! use camlink::{Camera, CameraOptions};
//!
//! let camera = Camera::new("stub://demo", CameraOptions::new().fps(0))?;
//! camera.start()?;
//! let frame = camera.capture()?;
//! assert_eq!((frame.width(), frame.height()), (640, 480));
//! camera.stop();
//! # Ok::<(), camlink::CameraError>(())
//! ```

pub mod backend;
pub mod camera;
pub mod errors;
pub mod frame;
pub mod options;
pub mod reconnect;
pub mod source;

pub use backend::{BackendKind, IpStreamConfig, LocalDeviceConfig, WsServerConfig};
pub use camera::{Camera, CameraInfo, ConnectionState};
pub use errors::{CameraError, Result};
pub use frame::{Frame, FrameEncoding};
pub use options::{CameraOptions, FrameFormat};
pub use reconnect::ReconnectPolicy;
pub use source::{CameraSource, Credentials, SourceSpec};
