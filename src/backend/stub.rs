//! Synthetic frame source backing `stub://` descriptors.
//!
//! Stub sources generate deterministic pattern frames so every lifecycle and
//! reconnect test runs without hardware or network. Failure injection is
//! driven by query parameters on the stub URL:
//!
//! - `stub://name?w=320&h=240`: frame dimensions
//! - `stub://name?fail_reads=3`: the first N reads fail transiently
//! - `stub://name?fatal=1`: the first read fails fatally (auth rejected)

use url::Url;

use crate::errors::{CameraError, Result};
use crate::frame::{Frame, FrameEncoding};

#[derive(Clone, Debug)]
pub(crate) struct StubConfig {
    pub name: String,
    pub width: u32,
    pub height: u32,
    pub fail_reads: u32,
    pub fatal: bool,
}

impl StubConfig {
    /// Parse a `stub://` URL. Unknown query keys are ignored; the stub layer
    /// is test plumbing, not part of the public option surface.
    pub(crate) fn parse(descriptor: &str) -> Result<Self> {
        let url = Url::parse(descriptor)
            .map_err(|_| CameraError::InvalidSource(descriptor.to_string()))?;
        let mut config = Self {
            name: descriptor.to_string(),
            width: 640,
            height: 480,
            fail_reads: 0,
            fatal: false,
        };
        for (key, value) in url.query_pairs() {
            match key.as_ref() {
                "w" => config.width = value.parse().unwrap_or(config.width),
                "h" => config.height = value.parse().unwrap_or(config.height),
                "fail_reads" => config.fail_reads = value.parse().unwrap_or(0),
                "fatal" => config.fatal = value == "1" || value == "true",
                _ => {}
            }
        }
        Ok(config)
    }

    pub(crate) fn with_resolution(mut self, resolution: (u32, u32)) -> Self {
        self.width = resolution.0;
        self.height = resolution.1;
        self
    }
}

/// Deterministic pattern source with optional scripted failures.
pub(crate) struct StubSource {
    config: StubConfig,
    frame_count: u64,
    fails_remaining: u32,
    fatal_pending: bool,
    /// Simulated scene state so consecutive frames differ occasionally.
    scene_state: u8,
}

impl StubSource {
    pub(crate) fn new(config: StubConfig) -> Self {
        Self {
            fails_remaining: config.fail_reads,
            fatal_pending: config.fatal,
            config,
            frame_count: 0,
            scene_state: 0,
        }
    }

    /// Stub sources are always "connected".
    pub(crate) fn connect(&mut self) -> Result<()> {
        log::info!("stub source connected: {}", self.config.name);
        Ok(())
    }

    pub(crate) fn read_frame(&mut self) -> Result<Frame> {
        if self.fatal_pending {
            self.fatal_pending = false;
            return Err(CameraError::AuthRejected(self.config.name.clone()));
        }
        if self.fails_remaining > 0 {
            self.fails_remaining -= 1;
            return Err(CameraError::Connection(format!(
                "scripted failure from {}",
                self.config.name
            )));
        }

        self.frame_count += 1;
        if self.frame_count % 50 == 0 {
            self.scene_state = self.scene_state.wrapping_add(1);
        }

        let pixel_count = (self.config.width * self.config.height * 3) as usize;
        let mut pixels = vec![0u8; pixel_count];
        for (i, pixel) in pixels.iter_mut().enumerate() {
            *pixel = ((i as u64 + self.frame_count + self.scene_state as u64) % 256) as u8;
        }

        Ok(Frame::new(
            pixels,
            self.config.width,
            self.config.height,
            FrameEncoding::Rgb8,
        ))
    }

    pub(crate) fn frames_produced(&self) -> u64 {
        self.frame_count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_applies_query_parameters() {
        let config = StubConfig::parse("stub://cam?w=320&h=240&fail_reads=2&fatal=1").unwrap();
        assert_eq!((config.width, config.height), (320, 240));
        assert_eq!(config.fail_reads, 2);
        assert!(config.fatal);
    }

    #[test]
    fn frames_match_configured_dimensions() {
        let config = StubConfig::parse("stub://cam?w=16&h=8").unwrap();
        let mut source = StubSource::new(config);
        source.connect().unwrap();
        let frame = source.read_frame().unwrap();
        assert_eq!(frame.width(), 16);
        assert_eq!(frame.height(), 8);
        assert_eq!(frame.data().len(), 16 * 8 * 3);
    }

    #[test]
    fn scripted_failures_then_recovery() {
        let config = StubConfig::parse("stub://cam?fail_reads=2").unwrap();
        let mut source = StubSource::new(config);
        assert!(matches!(
            source.read_frame(),
            Err(CameraError::Connection(_))
        ));
        assert!(matches!(
            source.read_frame(),
            Err(CameraError::Connection(_))
        ));
        assert!(source.read_frame().is_ok());
        assert_eq!(source.frames_produced(), 1);
    }

    #[test]
    fn fatal_failure_is_auth_rejected() {
        let config = StubConfig::parse("stub://cam?fatal=1").unwrap();
        let mut source = StubSource::new(config);
        assert!(matches!(
            source.read_frame(),
            Err(CameraError::AuthRejected(_))
        ));
    }
}
