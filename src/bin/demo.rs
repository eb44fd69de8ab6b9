//! demo - open a camera source, capture a handful of frames, report timing.
//!
//! Works out of the box against the synthetic stub source; point it at a
//! device index, an HTTP/RTSP URL, or a `ws://` listen address to exercise
//! the real backends.

use std::time::Instant;

use anyhow::{Context, Result};
use clap::Parser;

use camlink::{Camera, CameraOptions, FrameFormat};

#[derive(Parser, Debug)]
#[command(author, version, about = "Capture frames from any camlink source")]
struct Args {
    /// Source descriptor: device index, /dev/videoN, rtsp://, http(s)://,
    /// ws://host:port, or stub://name.
    #[arg(default_value = "stub://demo")]
    source: String,

    /// Number of frames to capture before exiting.
    #[arg(long, env = "CAMLINK_FRAMES", default_value = "10")]
    frames: u32,

    /// Capture rate cap (0 = unpaced).
    #[arg(long, env = "CAMLINK_FPS", default_value = "10")]
    fps: u32,

    /// Requested resolution as WIDTHxHEIGHT.
    #[arg(long, env = "CAMLINK_RESOLUTION")]
    resolution: Option<String>,

    /// Frame format for pushed WebSocket frames.
    #[arg(long, env = "CAMLINK_FRAME_FORMAT", default_value = "base64")]
    frame_format: String,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let mut options = CameraOptions::new().fps(args.fps);
    if let Some(spec) = &args.resolution {
        let (w, h) = parse_resolution(spec)?;
        options = options.resolution(w, h);
    }
    if args.source.starts_with("ws://") {
        let format: FrameFormat = args
            .frame_format
            .parse()
            .with_context(|| format!("invalid frame format '{}'", args.frame_format))?;
        options = options.frame_format(format);
    }

    let camera = Camera::new(args.source.as_str(), options)
        .with_context(|| format!("could not configure source '{}'", args.source))?;
    camera.start().context("camera failed to start")?;

    let info = camera.info();
    log::info!(
        "capturing {} frames from {} ({} backend, {}x{} @ {} fps)",
        args.frames,
        info.source,
        info.kind,
        info.resolution.0,
        info.resolution.1,
        info.fps
    );
    if let Some(addr) = info.local_addr {
        log::info!("push frames to ws://{addr}");
    }

    let begin = Instant::now();
    for n in 1..=args.frames {
        let frame = camera.capture().context("capture failed")?;
        log::info!(
            "frame {n}: {}x{} {:?} ({} bytes)",
            frame.width(),
            frame.height(),
            frame.encoding(),
            frame.data().len()
        );
    }
    let elapsed = begin.elapsed();
    log::info!(
        "captured {} frames in {:.2}s ({:.1} fps)",
        args.frames,
        elapsed.as_secs_f64(),
        f64::from(args.frames) / elapsed.as_secs_f64().max(0.001)
    );

    camera.stop();
    Ok(())
}

fn parse_resolution(spec: &str) -> Result<(u32, u32)> {
    let (w, h) = spec
        .split_once('x')
        .with_context(|| format!("resolution '{spec}' is not WIDTHxHEIGHT"))?;
    Ok((
        w.parse().with_context(|| format!("bad width '{w}'"))?,
        h.parse().with_context(|| format!("bad height '{h}'"))?,
    ))
}
