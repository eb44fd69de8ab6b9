//! Self-hosted WebSocket frame server.
//!
//! This backend does not connect out: it binds a listening socket and waits
//! for a single client to push frames to it. Admission policy: at most one
//! connected client at any time. A second connection attempt completes its
//! handshake, receives a structured rejection message, and is closed without
//! ever entering the frame-exchange path. The occupancy check-and-set and
//! the slot release are each one critical section on a single mutex, so two
//! accept decisions can never interleave into a double admission.
//!
//! Threading: one accept loop thread for the life of the connection
//! (nonblocking listener polled against a shutdown flag), plus one receive
//! thread per admitted client. The receive thread reads with a 100 ms socket
//! timeout so `close()` cancels it promptly instead of waiting on a blocked
//! read.

use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use base64::Engine;
use serde_json::json;
use tungstenite::handshake::HandshakeError;
use tungstenite::{Message, WebSocket};

use crate::errors::{CameraError, Result};
use crate::frame::{decode_image, Frame, FrameEncoding, FrameQueue};
use crate::options::{CameraOptions, FrameFormat, DEFAULT_QUEUE_SIZE};
use crate::source::CameraSource;

const ACCEPT_POLL: Duration = Duration::from_millis(50);
const RECEIVE_POLL: Duration = Duration::from_millis(100);

/// Configuration for the WebSocket server backend.
#[derive(Clone, Debug)]
pub struct WsServerConfig {
    pub bind_host: String,
    pub bind_port: u16,
    pub timeout: Duration,
    pub frame_format: FrameFormat,
    pub max_queue_size: usize,
    pub resolution: (u32, u32),
    pub fps: u32,
}

/// The single permitted connected client.
struct ClientSlot {
    peer: SocketAddr,
    socket: Arc<Mutex<WebSocket<TcpStream>>>,
    frame_format: FrameFormat,
    last_activity: Instant,
    join: Option<JoinHandle<()>>,
}

pub(crate) struct WsServerBackend {
    config: WsServerConfig,
    queue: Arc<FrameQueue>,
    slot: Arc<Mutex<Option<ClientSlot>>>,
    shutdown: Arc<AtomicBool>,
    accept_join: Option<JoinHandle<()>>,
    local_addr: Option<SocketAddr>,
}

impl WsServerBackend {
    pub(crate) fn create(source: &CameraSource, options: &CameraOptions) -> Result<Self> {
        let CameraSource::WebSocketListen { host, port } = source else {
            return Err(CameraError::InvalidSource(source.display()));
        };
        let config = WsServerConfig {
            bind_host: host.clone(),
            bind_port: *port,
            timeout: options.timeout_or_default(),
            frame_format: options.frame_format.unwrap_or_default(),
            max_queue_size: options.max_queue_size.unwrap_or(DEFAULT_QUEUE_SIZE),
            resolution: options.resolution_or_default(),
            fps: options.fps_or_default(),
        };
        let queue = Arc::new(FrameQueue::new(config.max_queue_size));
        Ok(Self {
            config,
            queue,
            slot: Arc::new(Mutex::new(None)),
            shutdown: Arc::new(AtomicBool::new(false)),
            accept_join: None,
            local_addr: None,
        })
    }

    /// Bind, listen, and spawn the accept loop.
    pub(crate) fn open(&mut self) -> Result<()> {
        let addr = format!("{}:{}", self.config.bind_host, self.config.bind_port);
        let listener = TcpListener::bind(&addr).map_err(|source| CameraError::Bind {
            addr: addr.clone(),
            source,
        })?;
        let local_addr = listener.local_addr().map_err(|source| CameraError::Bind {
            addr: addr.clone(),
            source,
        })?;
        listener
            .set_nonblocking(true)
            .map_err(|source| CameraError::Bind { addr, source })?;

        self.shutdown.store(false, Ordering::SeqCst);
        self.local_addr = Some(local_addr);
        self.queue.clear();

        let worker = AcceptWorker {
            slot: self.slot.clone(),
            queue: self.queue.clone(),
            shutdown: self.shutdown.clone(),
            config: self.config.clone(),
        };
        self.accept_join = Some(std::thread::spawn(move || worker.run(listener)));

        log::info!("websocket frame server listening on {local_addr}");
        Ok(())
    }

    /// Non-blocking peek at the most recent frame, bounded by `timeout`.
    /// Empty when no client has pushed anything yet.
    pub(crate) fn read(&mut self, timeout: Duration) -> Option<Frame> {
        self.queue.recv_timeout(timeout)
    }

    /// Send an application message to the connected client.
    pub(crate) fn send_message(&self, text: &str) -> Result<()> {
        let socket = {
            let slot = self.slot.lock().unwrap_or_else(|e| e.into_inner());
            match slot.as_ref() {
                Some(client) => client.socket.clone(),
                None => {
                    return Err(CameraError::Connection(
                        "no client connected to send message to".into(),
                    ))
                }
            }
        };
        let mut ws = socket.lock().unwrap_or_else(|e| e.into_inner());
        ws.send(Message::Text(text.to_string()))
            .map_err(|err| CameraError::Connection(format!("send to client: {err}")))
    }

    /// Stop the accept loop, disconnect any client, unbind. Idempotent.
    pub(crate) fn close(&mut self) {
        self.shutdown.store(true, Ordering::SeqCst);

        let client = {
            let mut slot = self.slot.lock().unwrap_or_else(|e| e.into_inner());
            slot.take()
        };
        if let Some(mut client) = client {
            {
                let mut ws = client.socket.lock().unwrap_or_else(|e| e.into_inner());
                let goodbye = json!({
                    "status": "disconnecting",
                    "message": "server is shutting down",
                })
                .to_string();
                let _ = ws.send(Message::Text(goodbye));
                let _ = ws.close(None);
                let _ = ws.flush();
            }
            if let Some(join) = client.join.take() {
                let _ = join.join();
            }
            log::info!("client {} disconnected by server stop", client.peer);
        }

        if let Some(join) = self.accept_join.take() {
            let _ = join.join();
        }
        self.queue.clear();
        self.local_addr = None;
    }

    /// Address actually bound (useful when port 0 was requested).
    pub(crate) fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    pub(crate) fn describe(&self) -> String {
        let endpoint = match self.local_addr {
            Some(addr) => format!("ws://{addr}"),
            None => format!("ws://{}:{}", self.config.bind_host, self.config.bind_port),
        };
        let slot = self.slot.lock().unwrap_or_else(|e| e.into_inner());
        match slot.as_ref() {
            Some(client) => format!(
                "{endpoint} (client {} pushing {}, last frame {:.1}s ago)",
                client.peer,
                client.frame_format.as_str(),
                client.last_activity.elapsed().as_secs_f64()
            ),
            None => format!("{endpoint} (no client connected)"),
        }
    }
}

// ----------------------------------------------------------------------------
// Accept loop
// ----------------------------------------------------------------------------

struct AcceptWorker {
    slot: Arc<Mutex<Option<ClientSlot>>>,
    queue: Arc<FrameQueue>,
    shutdown: Arc<AtomicBool>,
    config: WsServerConfig,
}

impl AcceptWorker {
    fn run(self, listener: TcpListener) {
        loop {
            if self.shutdown.load(Ordering::SeqCst) {
                break;
            }
            match listener.accept() {
                Ok((stream, peer)) => {
                    if let Err(err) = self.handle_inbound(stream, peer) {
                        log::warn!("inbound connection from {peer} failed: {err}");
                    }
                }
                Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => {
                    std::thread::sleep(ACCEPT_POLL);
                }
                Err(err) => {
                    log::error!("accept loop terminated: {err}");
                    break;
                }
            }
        }
    }

    fn handle_inbound(&self, stream: TcpStream, peer: SocketAddr) -> Result<()> {
        stream
            .set_nonblocking(false)
            .map_err(|err| CameraError::Connection(err.to_string()))?;
        stream
            .set_read_timeout(Some(RECEIVE_POLL))
            .map_err(|err| CameraError::Connection(err.to_string()))?;

        let ws = self.complete_handshake(stream)?;
        let socket = Arc::new(Mutex::new(ws));

        // Single-client admission: one critical section decides occupancy.
        let admitted = {
            let mut slot = self.slot.lock().unwrap_or_else(|e| e.into_inner());
            if slot.is_some() {
                false
            } else {
                *slot = Some(ClientSlot {
                    peer,
                    socket: socket.clone(),
                    frame_format: self.config.frame_format,
                    last_activity: Instant::now(),
                    join: None,
                });
                true
            }
        };

        if !admitted {
            log::warn!("rejecting client {peer}: server at capacity");
            let rejection = json!({
                "error": true,
                "message": "server at capacity",
            })
            .to_string();
            let mut ws = socket.lock().unwrap_or_else(|e| e.into_inner());
            let _ = ws.send(Message::Text(rejection));
            let _ = ws.close(None);
            let _ = ws.flush();
            return Ok(());
        }

        let welcome = json!({
            "status": "connected",
            "message": "you are now connected to the camera server",
            "frame_format": self.config.frame_format.as_str(),
            "resolution": [self.config.resolution.0, self.config.resolution.1],
            "fps": self.config.fps,
        })
        .to_string();
        {
            let mut ws = socket.lock().unwrap_or_else(|e| e.into_inner());
            if let Err(err) = ws.send(Message::Text(welcome)) {
                log::warn!("could not send welcome to {peer}: {err}");
            }
        }
        log::info!("client connected: {peer}");

        // Spawn and record the receive thread in one critical section: a
        // concurrent close() either sees the handle and joins it, or takes
        // the slot first, in which case no thread is spawned at all.
        let mut slot = self.slot.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(client) = slot.as_mut() {
            if client.peer == peer {
                let receiver = ReceiveWorker {
                    peer,
                    socket,
                    slot: self.slot.clone(),
                    queue: self.queue.clone(),
                    shutdown: self.shutdown.clone(),
                    frame_format: self.config.frame_format,
                };
                client.join = Some(std::thread::spawn(move || receiver.run()));
            }
        }
        Ok(())
    }

    /// Drive the server handshake to completion. The stream carries a read
    /// timeout, so the handshake surfaces `Interrupted` instead of blocking;
    /// retry until done, shutdown, or the connection deadline passes.
    fn complete_handshake(&self, stream: TcpStream) -> Result<WebSocket<TcpStream>> {
        let deadline = Instant::now() + self.config.timeout;
        let mut pending = tungstenite::accept(stream);
        loop {
            match pending {
                Ok(ws) => return Ok(ws),
                Err(HandshakeError::Interrupted(mid)) => {
                    if self.shutdown.load(Ordering::SeqCst) {
                        return Err(CameraError::Connection("server shutting down".into()));
                    }
                    if Instant::now() > deadline {
                        return Err(CameraError::Connection("handshake timed out".into()));
                    }
                    pending = mid.handshake();
                }
                Err(HandshakeError::Failure(err)) => {
                    return Err(CameraError::Connection(format!("handshake failed: {err}")));
                }
            }
        }
    }
}

// ----------------------------------------------------------------------------
// Receive loop
// ----------------------------------------------------------------------------

struct ReceiveWorker {
    peer: SocketAddr,
    socket: Arc<Mutex<WebSocket<TcpStream>>>,
    slot: Arc<Mutex<Option<ClientSlot>>>,
    queue: Arc<FrameQueue>,
    shutdown: Arc<AtomicBool>,
    frame_format: FrameFormat,
}

impl ReceiveWorker {
    fn run(self) {
        loop {
            if self.shutdown.load(Ordering::SeqCst) {
                break;
            }
            let message = {
                let mut ws = self.socket.lock().unwrap_or_else(|e| e.into_inner());
                ws.read()
            };
            match message {
                Ok(Message::Close(_)) => {
                    // Flush the queued close reply so the peer's closing
                    // handshake completes.
                    let mut ws = self.socket.lock().unwrap_or_else(|e| e.into_inner());
                    let _ = ws.flush();
                    log::info!("client disconnected: {}", self.peer);
                    break;
                }
                Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => {}
                Ok(message) => {
                    match decode_frame_payload(self.frame_format, message) {
                        Ok(frame) => {
                            self.queue.push(frame);
                            self.touch_activity();
                        }
                        // Malformed payloads are dropped, never fatal.
                        Err(err) => log::warn!("dropping frame from {}: {err}", self.peer),
                    }
                }
                Err(tungstenite::Error::Io(err))
                    if matches!(
                        err.kind(),
                        std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut
                    ) =>
                {
                    // Read timeout: poll the shutdown flag and retry.
                }
                Err(tungstenite::Error::ConnectionClosed)
                | Err(tungstenite::Error::AlreadyClosed) => {
                    log::info!("client disconnected: {}", self.peer);
                    break;
                }
                Err(err) => {
                    log::warn!("client {} receive error: {err}", self.peer);
                    break;
                }
            }
        }
        self.release_slot();
    }

    fn touch_activity(&self) {
        let mut slot = self.slot.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(client) = slot.as_mut() {
            if client.peer == self.peer {
                client.last_activity = Instant::now();
            }
        }
    }

    /// Free the slot atomically so a new accept can admit the next client
    /// with no window where two clients are both considered connected.
    fn release_slot(&self) {
        let mut slot = self.slot.lock().unwrap_or_else(|e| e.into_inner());
        if slot.as_ref().is_some_and(|client| client.peer == self.peer) {
            *slot = None;
            log::info!("client slot released: {}", self.peer);
        }
    }
}

/// Decode one inbound message into a validated frame per the negotiated
/// format. The payload must decode to a well-formed 8-bit raster image.
fn decode_frame_payload(format: FrameFormat, message: Message) -> Result<Frame> {
    let encoded = match format {
        FrameFormat::Base64 => {
            let text = message_text(message)?;
            base64::engine::general_purpose::STANDARD
                .decode(text.trim())
                .map_err(|err| CameraError::Frame(format!("base64 decode: {err}")))?
        }
        FrameFormat::Binary => match message {
            Message::Binary(bytes) => bytes,
            Message::Text(text) => text.into_bytes(),
            other => {
                return Err(CameraError::Frame(format!(
                    "unexpected message type: {other:?}"
                )))
            }
        },
        FrameFormat::Json => {
            let text = message_text(message)?;
            let value: serde_json::Value = serde_json::from_str(&text)
                .map_err(|err| CameraError::Frame(format!("json parse: {err}")))?;
            let field = value
                .get("image")
                .or_else(|| value.get("frame"))
                .and_then(|v| v.as_str())
                .ok_or_else(|| {
                    CameraError::Frame("json payload missing 'image'/'frame' field".into())
                })?;
            base64::engine::general_purpose::STANDARD
                .decode(field)
                .map_err(|err| CameraError::Frame(format!("base64 decode: {err}")))?
        }
    };

    let (pixels, width, height) = decode_image(&encoded)?;
    Ok(Frame::new(pixels, width, height, FrameEncoding::Rgb8))
}

fn message_text(message: Message) -> Result<String> {
    match message {
        Message::Text(text) => Ok(text),
        Message::Binary(bytes) => String::from_utf8(bytes)
            .map_err(|err| CameraError::Frame(format!("payload is not utf-8: {err}"))),
        other => Err(CameraError::Frame(format!(
            "unexpected message type: {other:?}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tiny_png() -> Vec<u8> {
        let frame = Frame::new(vec![64; 2 * 2 * 3], 2, 2, FrameEncoding::Rgb8);
        frame.to_png().unwrap()
    }

    #[test]
    fn base64_payload_decodes_to_frame() {
        let encoded = base64::engine::general_purpose::STANDARD.encode(tiny_png());
        let frame =
            decode_frame_payload(FrameFormat::Base64, Message::Text(encoded)).unwrap();
        assert_eq!((frame.width(), frame.height()), (2, 2));
    }

    #[test]
    fn binary_payload_decodes_to_frame() {
        let frame =
            decode_frame_payload(FrameFormat::Binary, Message::Binary(tiny_png())).unwrap();
        assert_eq!((frame.width(), frame.height()), (2, 2));
    }

    #[test]
    fn json_payload_decodes_image_and_frame_fields() {
        let encoded = base64::engine::general_purpose::STANDARD.encode(tiny_png());
        for field in ["image", "frame"] {
            let payload = json!({ field: encoded }).to_string();
            let frame =
                decode_frame_payload(FrameFormat::Json, Message::Text(payload)).unwrap();
            assert_eq!((frame.width(), frame.height()), (2, 2));
        }
    }

    #[test]
    fn malformed_payloads_are_rejected_not_fatal() {
        let err = decode_frame_payload(
            FrameFormat::Base64,
            Message::Text("!!! not base64 !!!".into()),
        )
        .unwrap_err();
        assert!(matches!(err, CameraError::Frame(_)));

        let err = decode_frame_payload(
            FrameFormat::Binary,
            Message::Binary(b"not an image".to_vec()),
        )
        .unwrap_err();
        assert!(matches!(err, CameraError::Frame(_)));

        let err = decode_frame_payload(
            FrameFormat::Json,
            Message::Text(json!({"other": 1}).to_string()),
        )
        .unwrap_err();
        assert!(matches!(err, CameraError::Frame(_)));
    }
}
