//! IP stream backend (RTSP / HTTP / HTTPS).
//!
//! Pull-style capture from a network video stream. HTTP(S) sources are
//! probed with a HEAD request before the long-lived stream session opens, so
//! unreachable cameras fail fast instead of hanging silently on the first
//! capture. Stream drops are retried through the reconnect policy with
//! exponential backoff; once attempts are exhausted the read surfaces
//! `StreamLost`. RTSP decode sits behind the `rtsp-gstreamer` feature.

use std::io::Read;
use std::time::Duration;

use base64::Engine;
use url::Url;

use crate::errors::{CameraError, Result};
use crate::frame::{decode_image, Frame, FrameEncoding};
use crate::options::CameraOptions;
use crate::reconnect::ReconnectPolicy;
use crate::source::{redact_url, CameraSource, Credentials};

use super::stub::{StubConfig, StubSource};

const MAX_JPEG_BYTES: usize = 5 * 1024 * 1024;

/// Configuration for an IP stream backend.
#[derive(Clone, Debug)]
pub struct IpStreamConfig {
    pub url: String,
    pub credentials: Option<Credentials>,
    pub timeout: Duration,
    pub reconnect: ReconnectPolicy,
}

pub(crate) struct IpStreamBackend {
    config: IpStreamConfig,
    variant: IpVariant,
    display_url: String,
}

enum IpVariant {
    Stub(StubSource),
    Http(HttpStreamSource),
    #[cfg(feature = "rtsp-gstreamer")]
    Rtsp(rtsp::RtspSource),
}

impl IpStreamBackend {
    pub(crate) fn create(source: &CameraSource, options: &CameraOptions) -> Result<Self> {
        let CameraSource::IpStream { url, credentials } = source else {
            return Err(CameraError::InvalidSource(source.display()));
        };

        // Explicit option credentials override any embedded in the URL.
        let credentials = match (&options.username, &options.password) {
            (Some(username), password) => Some(Credentials {
                username: username.clone(),
                password: password.clone().unwrap_or_default(),
            }),
            _ => credentials.clone(),
        };

        let config = IpStreamConfig {
            url: url.to_string(),
            credentials,
            timeout: options.timeout_or_default(),
            reconnect: ReconnectPolicy::default(),
        };
        Self::from_config(config, options)
    }

    /// Construct from an explicit config (tests drive stub URLs this way).
    pub(crate) fn from_config(config: IpStreamConfig, options: &CameraOptions) -> Result<Self> {
        let url =
            Url::parse(&config.url).map_err(|_| CameraError::InvalidSource(config.url.clone()))?;
        let display_url = redact_url(&url);

        let variant = match url.scheme() {
            "stub" => {
                let stub = StubConfig::parse(&config.url)?;
                let stub = match options.resolution {
                    Some(resolution) => stub.with_resolution(resolution),
                    None => stub,
                };
                IpVariant::Stub(StubSource::new(stub))
            }
            "http" | "https" => IpVariant::Http(HttpStreamSource::new(&config, &url)),
            "rtsp" => {
                #[cfg(feature = "rtsp-gstreamer")]
                {
                    IpVariant::Rtsp(rtsp::RtspSource::new(&config)?)
                }
                #[cfg(not(feature = "rtsp-gstreamer"))]
                {
                    return Err(CameraError::Unsupported(
                        "rtsp capture requires the rtsp-gstreamer feature".into(),
                    ));
                }
            }
            other => {
                return Err(CameraError::InvalidSource(format!(
                    "unsupported stream scheme '{other}'"
                )))
            }
        };

        Ok(Self {
            config,
            variant,
            display_url,
        })
    }

    /// Probe connectivity, then open the stream session.
    pub(crate) fn open(&mut self) -> Result<()> {
        match &mut self.variant {
            IpVariant::Stub(stub) => stub.connect(),
            IpVariant::Http(http) => http.connect(),
            #[cfg(feature = "rtsp-gstreamer")]
            IpVariant::Rtsp(rtsp) => rtsp.connect(),
        }
    }

    /// Blocking read with reconnect-on-transient-failure.
    pub(crate) fn read(&mut self) -> Result<Option<Frame>> {
        let mut backoff = self.config.reconnect.begin();
        loop {
            let result = match &mut self.variant {
                IpVariant::Stub(stub) => stub.read_frame(),
                IpVariant::Http(http) => http.read_frame(),
                #[cfg(feature = "rtsp-gstreamer")]
                IpVariant::Rtsp(rtsp) => rtsp.read_frame(),
            };
            let err = match result {
                Ok(frame) => return Ok(Some(frame)),
                Err(err) => err,
            };
            if !self.config.reconnect.should_retry(&err) {
                return Err(err);
            }
            let Some(delay) = backoff.next_delay() else {
                return Err(CameraError::StreamLost {
                    attempts: backoff.attempts(),
                    reason: err.to_string(),
                });
            };
            log::warn!(
                "stream {} dropped ({err}); reconnecting in {:?}",
                self.display_url,
                delay
            );
            std::thread::sleep(delay);
            if let Err(reopen) = self.reopen() {
                if !self.config.reconnect.should_retry(&reopen) {
                    return Err(reopen);
                }
                log::warn!("reconnect to {} failed: {reopen}", self.display_url);
            }
        }
    }

    fn reopen(&mut self) -> Result<()> {
        match &mut self.variant {
            IpVariant::Stub(stub) => stub.connect(),
            IpVariant::Http(http) => {
                http.disconnect();
                http.connect()
            }
            #[cfg(feature = "rtsp-gstreamer")]
            IpVariant::Rtsp(rtsp) => {
                rtsp.disconnect();
                rtsp.connect()
            }
        }
    }

    pub(crate) fn close(&mut self) {
        match &mut self.variant {
            IpVariant::Stub(_) => {}
            IpVariant::Http(http) => http.disconnect(),
            #[cfg(feature = "rtsp-gstreamer")]
            IpVariant::Rtsp(rtsp) => rtsp.disconnect(),
        }
        log::info!("closed stream {}", self.display_url);
    }

    pub(crate) fn describe(&self) -> String {
        self.display_url.clone()
    }
}

// ----------------------------------------------------------------------------
// HTTP(S) MJPEG / snapshot source
// ----------------------------------------------------------------------------

struct HttpStreamSource {
    url: String,
    display_url: String,
    authorization: Option<String>,
    agent: ureq::Agent,
    session: Option<HttpSession>,
}

enum HttpSession {
    Mjpeg(MjpegReader),
    /// Endpoint serves one JPEG per request; each read re-fetches.
    Snapshot,
}

impl HttpStreamSource {
    fn new(config: &IpStreamConfig, url: &Url) -> Self {
        // Credentials go in the Authorization header, never in the URL we
        // request with or log.
        let mut clean = url.clone();
        let _ = clean.set_username("");
        let _ = clean.set_password(None);

        let authorization = config.credentials.as_ref().map(|creds| {
            let token = base64::engine::general_purpose::STANDARD
                .encode(format!("{}:{}", creds.username, creds.password));
            format!("Basic {token}")
        });

        let agent = ureq::AgentBuilder::new()
            .timeout_connect(config.timeout)
            .build();

        Self {
            url: clean.to_string(),
            display_url: redact_url(url),
            authorization,
            agent,
            session: None,
        }
    }

    fn request(&self, method: &str) -> ureq::Request {
        let mut request = self.agent.request(method, &self.url);
        if let Some(authorization) = &self.authorization {
            request = request.set("Authorization", authorization);
        }
        request
    }

    /// HEAD probe first so an unreachable camera fails fast, then open the
    /// long-lived stream session.
    fn connect(&mut self) -> Result<()> {
        match self.request("HEAD").call() {
            Ok(response) if matches!(response.status(), 200 | 206) => {}
            Ok(response) => {
                return Err(CameraError::Connection(format!(
                    "{} returned status {}",
                    self.display_url,
                    response.status()
                )))
            }
            Err(ureq::Error::Status(401 | 403, _)) => {
                return Err(CameraError::AuthRejected(self.display_url.clone()))
            }
            Err(ureq::Error::Status(status, _)) => {
                return Err(CameraError::Connection(format!(
                    "{} returned status {status}",
                    self.display_url
                )))
            }
            Err(err) => {
                return Err(CameraError::Connection(format!(
                    "probe of {} failed: {err}",
                    self.display_url
                )))
            }
        }

        let response = self.request("GET").call().map_err(|err| match err {
            ureq::Error::Status(401 | 403, _) => CameraError::AuthRejected(self.display_url.clone()),
            other => CameraError::Connection(format!("open {}: {other}", self.display_url)),
        })?;

        let content_type = response.header("Content-Type").unwrap_or("").to_lowercase();
        if content_type.contains("multipart") {
            self.session = Some(HttpSession::Mjpeg(MjpegReader::new(response.into_reader())));
        } else {
            self.session = Some(HttpSession::Snapshot);
        }
        log::info!("opened stream {}", self.display_url);
        Ok(())
    }

    fn read_frame(&mut self) -> Result<Frame> {
        if self.session.is_none() {
            return Err(CameraError::Connection("stream session not open".into()));
        }
        let jpeg = if let Some(HttpSession::Mjpeg(reader)) = self.session.as_mut() {
            reader.next_jpeg()?
        } else {
            self.fetch_snapshot()?
        };
        let (pixels, width, height) = decode_image(&jpeg)?;
        Ok(Frame::new(pixels, width, height, FrameEncoding::Rgb8))
    }

    fn fetch_snapshot(&self) -> Result<Vec<u8>> {
        let response = self.request("GET").call().map_err(|err| {
            CameraError::Connection(format!("snapshot from {}: {err}", self.display_url))
        })?;
        let mut bytes = Vec::new();
        response
            .into_reader()
            .take(MAX_JPEG_BYTES as u64)
            .read_to_end(&mut bytes)
            .map_err(|err| CameraError::Connection(format!("read snapshot: {err}")))?;
        if bytes.is_empty() {
            return Err(CameraError::Connection("empty snapshot".into()));
        }
        Ok(bytes)
    }

    fn disconnect(&mut self) {
        self.session = None;
    }
}

/// Incremental scanner over a multipart MJPEG body: accumulates bytes and
/// slices out complete JPEG frames between SOI (FFD8) and EOI (FFD9) markers.
struct MjpegReader {
    reader: Box<dyn Read + Send + Sync + 'static>,
    buffer: Vec<u8>,
}

impl MjpegReader {
    fn new(reader: Box<dyn Read + Send + Sync + 'static>) -> Self {
        Self {
            reader,
            buffer: Vec::with_capacity(64 * 1024),
        }
    }

    fn next_jpeg(&mut self) -> Result<Vec<u8>> {
        let mut chunk = vec![0u8; 8192];
        loop {
            if let Some((start, end)) = jpeg_bounds(&self.buffer) {
                let frame = self.buffer[start..end].to_vec();
                self.buffer.drain(..end);
                return Ok(frame);
            }

            let read = self
                .reader
                .read(&mut chunk)
                .map_err(|err| CameraError::Connection(format!("read mjpeg chunk: {err}")))?;
            if read == 0 {
                return Err(CameraError::Connection("mjpeg stream ended".into()));
            }
            self.buffer.extend_from_slice(&chunk[..read]);

            // Bound memory if the stream never yields a complete frame.
            if self.buffer.len() > MAX_JPEG_BYTES * 2 {
                let drain_len = self.buffer.len() - 2;
                self.buffer.drain(..drain_len);
            }
        }
    }
}

fn jpeg_bounds(buffer: &[u8]) -> Option<(usize, usize)> {
    let start = buffer.windows(2).position(|w| w == [0xFF, 0xD8])?;
    let end = buffer[start + 2..]
        .windows(2)
        .position(|w| w == [0xFF, 0xD9])?;
    Some((start, start + 2 + end + 2))
}

// ----------------------------------------------------------------------------
// RTSP source (feature: rtsp-gstreamer)
// ----------------------------------------------------------------------------

#[cfg(feature = "rtsp-gstreamer")]
mod rtsp {
    use std::time::Duration;

    use gstreamer::prelude::*;

    use crate::errors::{CameraError, Result};
    use crate::frame::{Frame, FrameEncoding};

    use super::IpStreamConfig;

    pub(super) struct RtspSource {
        pipeline: gstreamer::Pipeline,
        appsink: gstreamer_app::AppSink,
        timeout: Duration,
    }

    impl RtspSource {
        pub(super) fn new(config: &IpStreamConfig) -> Result<Self> {
            gstreamer::init()
                .map_err(|err| CameraError::Connection(format!("initialize gstreamer: {err}")))?;

            let description = format!(
                "rtspsrc location={} latency=0 ! decodebin ! videoconvert ! \
                 video/x-raw,format=RGB ! appsink name=appsink sync=false \
                 max-buffers=1 drop=true",
                config.url
            );
            let pipeline = gstreamer::parse_launch(&description)
                .map_err(|err| CameraError::Connection(format!("build rtsp pipeline: {err}")))?
                .downcast::<gstreamer::Pipeline>()
                .map_err(|_| CameraError::Connection("rtsp pipeline has wrong type".into()))?;

            let appsink = pipeline
                .by_name("appsink")
                .ok_or_else(|| CameraError::Connection("appsink missing from pipeline".into()))?
                .downcast::<gstreamer_app::AppSink>()
                .map_err(|_| CameraError::Connection("appsink has unexpected type".into()))?;

            let caps = gstreamer::Caps::builder("video/x-raw")
                .field("format", "RGB")
                .build();
            appsink.set_caps(Some(&caps));
            appsink.set_max_buffers(1);
            appsink.set_drop(true);
            appsink.set_sync(false);

            Ok(Self {
                pipeline,
                appsink,
                timeout: config.timeout,
            })
        }

        pub(super) fn connect(&mut self) -> Result<()> {
            self.pipeline
                .set_state(gstreamer::State::Playing)
                .map_err(|err| CameraError::Connection(format!("start rtsp pipeline: {err}")))?;
            Ok(())
        }

        pub(super) fn read_frame(&mut self) -> Result<Frame> {
            let sample = self
                .appsink
                .try_pull_sample(gstreamer::ClockTime::from_mseconds(
                    self.timeout.as_millis() as u64
                ))
                .ok_or_else(|| CameraError::Connection("rtsp stream stalled".into()))?;

            let buffer = sample
                .buffer()
                .ok_or_else(|| CameraError::Connection("rtsp sample missing buffer".into()))?;
            let caps = sample
                .caps()
                .ok_or_else(|| CameraError::Connection("rtsp sample missing caps".into()))?;
            let info = gstreamer_video::VideoInfo::from_caps(caps)
                .map_err(|err| CameraError::Connection(format!("parse rtsp caps: {err}")))?;

            let width = info.width();
            let height = info.height();
            let row_bytes = width as usize * 3;
            let stride = info.stride()[0] as usize;

            let map = buffer
                .map_readable()
                .map_err(|err| CameraError::Connection(format!("map rtsp buffer: {err}")))?;
            let data = map.as_slice();

            let pixels = if stride == row_bytes {
                data.to_vec()
            } else {
                let mut pixels = Vec::with_capacity(row_bytes * height as usize);
                for row in 0..height as usize {
                    let start = row * stride;
                    let end = start + row_bytes;
                    let slice = data.get(start..end).ok_or_else(|| {
                        CameraError::Connection("rtsp buffer row out of bounds".into())
                    })?;
                    pixels.extend_from_slice(slice);
                }
                pixels
            };

            Ok(Frame::new(pixels, width, height, FrameEncoding::Rgb8))
        }

        pub(super) fn disconnect(&mut self) {
            let _ = self.pipeline.set_state(gstreamer::State::Null);
        }
    }
}
