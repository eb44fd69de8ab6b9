//! Captured frames and the bounded frame queue.
//!
//! A [`Frame`] is an immutable value: once a backend hands one to the caller
//! it is never touched again by the capture machinery, so frames can cross
//! threads without shared mutable state. Push-style backends stage frames in
//! a [`FrameQueue`], a small bounded queue that drops the oldest frame when
//! full so the consumer always sees the freshest capture.

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex};
use std::time::{Duration, SystemTime};

use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::PngEncoder;
use image::{ExtendedColorType, ImageEncoder};

use crate::errors::{CameraError, Result};

/// Encoding of the pixel payload carried by a [`Frame`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameEncoding {
    /// Packed 8-bit RGB, row-major, no padding.
    Rgb8,
    Jpeg,
    Png,
}

/// One captured image plus minimal metadata. Immutable after construction.
#[derive(Clone, Debug)]
pub struct Frame {
    data: Vec<u8>,
    width: u32,
    height: u32,
    encoding: FrameEncoding,
    timestamp: SystemTime,
}

impl Frame {
    pub(crate) fn new(data: Vec<u8>, width: u32, height: u32, encoding: FrameEncoding) -> Self {
        Self {
            data,
            width,
            height,
            encoding,
            timestamp: SystemTime::now(),
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn encoding(&self) -> FrameEncoding {
        self.encoding
    }

    pub fn timestamp(&self) -> SystemTime {
        self.timestamp
    }

    /// Borrow the pixel payload.
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Take ownership of the pixel payload.
    pub fn into_data(self) -> Vec<u8> {
        self.data
    }

    /// Encode the frame as PNG. Already-encoded frames are re-encoded via
    /// decode so the output is always a valid PNG.
    pub fn to_png(&self) -> Result<Vec<u8>> {
        let (pixels, width, height) = self.rgb8()?;
        let mut out = Vec::new();
        PngEncoder::new(&mut out)
            .write_image(&pixels, width, height, ExtendedColorType::Rgb8)
            .map_err(|err| CameraError::Frame(format!("png encode: {err}")))?;
        Ok(out)
    }

    /// Encode the frame as JPEG.
    pub fn to_jpeg(&self) -> Result<Vec<u8>> {
        if self.encoding == FrameEncoding::Jpeg {
            return Ok(self.data.clone());
        }
        let (pixels, width, height) = self.rgb8()?;
        let mut out = Vec::new();
        JpegEncoder::new(&mut out)
            .write_image(&pixels, width, height, ExtendedColorType::Rgb8)
            .map_err(|err| CameraError::Frame(format!("jpeg encode: {err}")))?;
        Ok(out)
    }

    /// Packed RGB8 pixels, decoding if the frame is JPEG/PNG.
    fn rgb8(&self) -> Result<(Vec<u8>, u32, u32)> {
        match self.encoding {
            FrameEncoding::Rgb8 => Ok((self.data.clone(), self.width, self.height)),
            FrameEncoding::Jpeg | FrameEncoding::Png => decode_image(&self.data),
        }
    }

    /// Letterbox the frame into `target` dimensions: aspect-preserving
    /// resize padded with black. Produces an RGB8 frame.
    pub(crate) fn letterboxed(&self, target: (u32, u32)) -> Result<Frame> {
        let (tw, th) = target;
        if tw == 0 || th == 0 {
            return Err(CameraError::Frame(format!(
                "letterbox target {tw}x{th} has a zero dimension"
            )));
        }
        let (pixels, width, height) = self.rgb8()?;
        if width == 0 || height == 0 {
            return Err(CameraError::Frame(format!(
                "source frame {width}x{height} has a zero dimension"
            )));
        }
        let buffer = image::RgbImage::from_raw(width, height, pixels)
            .ok_or_else(|| CameraError::Frame("pixel buffer does not match dimensions".into()))?;

        let scale = f64::min(tw as f64 / width as f64, th as f64 / height as f64);
        let fit_w = ((width as f64 * scale) as u32).max(1);
        let fit_h = ((height as f64 * scale) as u32).max(1);
        let resized = image::imageops::resize(
            &buffer,
            fit_w,
            fit_h,
            image::imageops::FilterType::Triangle,
        );

        let mut canvas = image::RgbImage::new(tw, th);
        let x = (tw - fit_w) / 2;
        let y = (th - fit_h) / 2;
        image::imageops::overlay(&mut canvas, &resized, x as i64, y as i64);
        Ok(Frame::new(canvas.into_raw(), tw, th, FrameEncoding::Rgb8))
    }
}

/// Decode an encoded image payload to packed RGB8, validating it is a
/// well-formed 8-bit raster image in the process.
pub(crate) fn decode_image(bytes: &[u8]) -> Result<(Vec<u8>, u32, u32)> {
    let decoded = image::load_from_memory(bytes)
        .map_err(|err| CameraError::Frame(format!("image decode: {err}")))?;
    let rgb = decoded.into_rgb8();
    let (width, height) = rgb.dimensions();
    Ok((rgb.into_raw(), width, height))
}

/// Bounded frame queue shared between a producer thread and the facade.
///
/// Capacity is small (default 1): when full, the oldest frame is dropped so
/// the consumer never reads stale captures. `recv_timeout` is the facade's
/// "peek with timeout" primitive.
pub(crate) struct FrameQueue {
    inner: Mutex<VecDeque<Frame>>,
    available: Condvar,
    capacity: usize,
}

impl FrameQueue {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(VecDeque::with_capacity(capacity.max(1))),
            available: Condvar::new(),
            capacity: capacity.max(1),
        }
    }

    pub(crate) fn push(&self, frame: Frame) {
        let mut queue = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        while queue.len() >= self.capacity {
            queue.pop_front();
        }
        queue.push_back(frame);
        self.available.notify_one();
    }

    /// Pop the oldest queued frame, waiting up to `timeout` for one to
    /// arrive. Returns `None` on timeout (e.g. no client connected yet).
    pub(crate) fn recv_timeout(&self, timeout: Duration) -> Option<Frame> {
        let mut queue = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(frame) = queue.pop_front() {
            return Some(frame);
        }
        let (mut queue, _) = self
            .available
            .wait_timeout(queue, timeout)
            .unwrap_or_else(|e| e.into_inner());
        queue.pop_front()
    }

    pub(crate) fn clear(&self) {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(tag: u8) -> Frame {
        Frame::new(vec![tag; 12], 2, 2, FrameEncoding::Rgb8)
    }

    #[test]
    fn queue_drops_oldest_when_full() {
        let queue = FrameQueue::new(2);
        queue.push(frame(1));
        queue.push(frame(2));
        queue.push(frame(3));

        let first = queue.recv_timeout(Duration::from_millis(10)).unwrap();
        assert_eq!(first.data()[0], 2);
        let second = queue.recv_timeout(Duration::from_millis(10)).unwrap();
        assert_eq!(second.data()[0], 3);
    }

    #[test]
    fn recv_times_out_when_empty() {
        let queue = FrameQueue::new(1);
        assert!(queue.recv_timeout(Duration::from_millis(20)).is_none());
    }

    #[test]
    fn clear_discards_pending_frames() {
        let queue = FrameQueue::new(4);
        queue.push(frame(1));
        queue.clear();
        assert!(queue.recv_timeout(Duration::from_millis(10)).is_none());
    }

    #[test]
    fn png_round_trip_preserves_dimensions() {
        let source = Frame::new(vec![128; 4 * 3 * 3], 4, 3, FrameEncoding::Rgb8);
        let png = source.to_png().unwrap();
        let (_, width, height) = decode_image(&png).unwrap();
        assert_eq!((width, height), (4, 3));
    }

    #[test]
    fn letterbox_pads_to_target() {
        let source = Frame::new(vec![255; 8 * 4 * 3], 8, 4, FrameEncoding::Rgb8);
        let boxed = source.letterboxed((8, 8)).unwrap();
        assert_eq!(boxed.width(), 8);
        assert_eq!(boxed.height(), 8);
        // Top rows are padding.
        assert_eq!(&boxed.data()[..8 * 3], &[0u8; 24]);
    }

    #[test]
    fn letterbox_rejects_zero_dimension_target() {
        let source = Frame::new(vec![1, 2, 3], 1, 1, FrameEncoding::Rgb8);
        assert!(matches!(
            source.letterboxed((0, 4)),
            Err(CameraError::Frame(_))
        ));
        assert!(matches!(
            source.letterboxed((4, 0)),
            Err(CameraError::Frame(_))
        ));

        let empty = Frame::new(Vec::new(), 0, 0, FrameEncoding::Rgb8);
        assert!(matches!(
            empty.letterboxed((4, 4)),
            Err(CameraError::Frame(_))
        ));
    }

    #[test]
    fn malformed_payload_fails_decode() {
        assert!(matches!(
            decode_image(b"definitely not an image"),
            Err(CameraError::Frame(_))
        ));
    }
}
