use std::time::{Duration, Instant};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::io::{AsyncReadExt, AsyncWriteExt, ReadHalf, WriteHalf};
use uuid::Uuid;

use crate::codec;
use crate::error::Error;
use crate::frame::Frame;
use crate::handshake;
use crate::opcode::Opcode;
use crate::request::{self, Request};
use crate::stream::SocketFlowStream;

/// Bound on the reassembly buffer (spec §3 `MAX_BUFFER`).
pub const MAX_BUFFER: usize = 8;
/// Spec §4.D defaults.
pub const TIMEOUT_HANDSHAKE: Duration = Duration::from_millis(4000);
pub const TIMEOUT_PING_RESPONSE: Duration = Duration::from_millis(4000);
/// How often an idle, handshaken session gets a liveness PING.
pub const INTERVAL_PING: Duration = Duration::from_millis(20_000);

/// Coarse lifecycle state backing the diagram in spec §4.D. The finer
/// invariants (`handshake_performed ⇒ request_received ∧ request_accepted`,
/// etc) are carried by the booleans on `ClientSession` directly so they
/// stay independently checkable — a session can be `Handshaken` and still
/// have `connected == false` for the one event-loop tick between a
/// timeout firing and the registry sweep removing it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    RequestPending,
    Handshaken,
    Closed,
}

/// All per-connection state the server keeps for the life of one socket
/// (spec §3 `ClientSession`). The session owns its stream halves for its
/// entire lifetime; dropping a `ClientSession` drops the socket.
pub struct ClientSession {
    pub id: Uuid,
    read: ReadHalf<SocketFlowStream>,
    write: WriteHalf<SocketFlowStream>,
    pub peer_addr: String,
    pub connected_at: Instant,
    pub pinged_at: Instant,
    pub connected: bool,
    pub handshake_performed: bool,
    pub request_received: bool,
    pub request_accepted: bool,
    pending_ping: Option<[u8; 16]>,
    reassembly: Vec<Frame>,
    request_buf: Vec<u8>,
    state: SessionState,
}

impl ClientSession {
    pub fn new(id: Uuid, stream: SocketFlowStream, peer_addr: String) -> Self {
        let (read, write) = tokio::io::split(stream);
        let now = Instant::now();
        Self {
            id,
            read,
            write,
            peer_addr,
            connected_at: now,
            pinged_at: now,
            connected: true,
            handshake_performed: false,
            request_received: false,
            request_accepted: false,
            pending_ping: None,
            reassembly: Vec::new(),
            request_buf: Vec::new(),
            state: SessionState::RequestPending,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Consume one readiness-sized chunk off the socket and try to parse a
    /// full HTTP upgrade request out of what has accumulated so far.
    /// Idempotent: returns `Ok(None)` until the blank-line terminator has
    /// arrived, at which point it parses (and the caller stops invoking
    /// it — spec §4.D `receiveRequest`).
    pub async fn receive_request(&mut self) -> Result<Option<Request>, Error> {
        debug_assert_eq!(self.state, SessionState::RequestPending);

        let mut chunk = [0u8; 512];
        let n = self.read.read(&mut chunk).await?;
        if n == 0 {
            return Err(Error::Io {
                source: std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    "peer closed before completing the handshake request",
                ),
            });
        }

        self.request_buf.extend_from_slice(&chunk[..n]);
        self.request_received = true;

        if self.request_buf.len() > request::MAX_LENGTH {
            return Err(Error::RequestTooLarge(request::MAX_LENGTH));
        }

        if !has_header_terminator(&self.request_buf) {
            return Ok(None);
        }

        request::parse(&self.request_buf).map(Some)
    }

    /// Marks the request accepted — enables `online` accounting on
    /// disconnect (spec §4.D `acceptRequest`).
    pub fn accept_request(&mut self) {
        self.request_accepted = true;
    }

    /// Computes the accept key and writes the 101 response, exactly once
    /// per session (spec §4.D `performHandshake`).
    pub async fn perform_handshake(&mut self, sec_websocket_key: &str) -> Result<(), Error> {
        let accept = handshake::accept_key(sec_websocket_key);
        let response = handshake::switching_protocols_response(&accept);
        self.write.write_all(response.as_bytes()).await?;
        self.write.flush().await?;
        self.handshake_performed = true;
        self.state = SessionState::Handshaken;
        Ok(())
    }

    /// Only valid pre-handshake; does not mutate handshake state.
    pub async fn redirect(&mut self, code: u16, reason: &str, location: &str) -> Result<(), Error> {
        let response = handshake::redirect_response(code, reason, location);
        self.write.write_all(response.as_bytes()).await?;
        self.write.flush().await?;
        Ok(())
    }

    /// Only valid pre-handshake; does not mutate handshake state.
    pub async fn error(&mut self, code: u16, reason: &str) -> Result<(), Error> {
        let response = handshake::error_response(code, reason);
        self.write.write_all(response.as_bytes()).await?;
        self.write.flush().await?;
        Ok(())
    }

    /// Reads one frame and applies the control/data handling from spec
    /// §4.D. Returns `Some(payload)` once a full message has been
    /// reassembled, `None` otherwise (including when this call silently
    /// answered a PING, matched a PONG, or tore the session down).
    pub async fn receive_data(&mut self) -> Option<Vec<u8>> {
        let frame = codec::receive(&mut self.read).await;
        let fin = frame.fin;

        match frame.opcode {
            Opcode::Close => {
                log::debug!("{} sent CLOSE", self.id);
                self.disconnect().await;
                None
            }
            Opcode::Ping => {
                if codec::send(&mut self.write, &Frame::pong(frame.payload)).await.is_err() {
                    self.disconnect().await;
                }
                None
            }
            Opcode::Pong => {
                if self.pending_ping.as_ref().map(|n| n.as_slice()) == Some(frame.payload.as_slice()) {
                    self.pending_ping = None;
                }
                None
            }
            Opcode::Continuation | Opcode::Text | Opcode::Binary if !frame.masked => {
                // RFC 6455 §5.1 mandates client-to-server masking; spec
                // §4.B step 5 has the caller close rather than process an
                // unmasked data frame.
                log::debug!("{}: received unmasked data frame", self.id);
                self.disconnect().await;
                None
            }
            Opcode::Continuation => {
                if self.reassembly.is_empty() {
                    log::debug!("{}: continuation frame with nothing to continue", self.id);
                    self.disconnect().await;
                    return None;
                }
                if self.reassembly.len() >= MAX_BUFFER {
                    log::debug!("{}: reassembly buffer exceeded its {MAX_BUFFER}-frame bound", self.id);
                    self.disconnect().await;
                    return None;
                }
                self.reassembly.push(frame);
                self.take_message_if_complete(fin)
            }
            Opcode::Text | Opcode::Binary => {
                if !self.reassembly.is_empty() {
                    // A sender must not interleave messages (RFC 6455
                    // §5.4); close rather than silently discard the
                    // partial message already buffered.
                    log::debug!("{}: new message started mid-reassembly", self.id);
                    self.disconnect().await;
                    return None;
                }
                self.reassembly.push(frame);
                self.take_message_if_complete(fin)
            }
        }
    }

    fn take_message_if_complete(&mut self, fin: bool) -> Option<Vec<u8>> {
        if !fin {
            return None;
        }
        let frames = std::mem::take(&mut self.reassembly);
        Some(frames.into_iter().flat_map(|f| f.payload).collect())
    }

    pub async fn send_textual_data(&mut self, data: Vec<u8>) -> Result<(), Error> {
        if codec::send(&mut self.write, &Frame::text(data)).await.is_err() {
            self.disconnect().await;
        }
        Ok(())
    }

    pub async fn send_binary_data(&mut self, data: Vec<u8>) -> Result<(), Error> {
        if codec::send(&mut self.write, &Frame::binary(data)).await.is_err() {
            self.disconnect().await;
        }
        Ok(())
    }

    /// Sends a fresh PING carrying a 16-byte nonce and remembers it for
    /// correlation with the matching PONG (spec §4.D `ping`).
    pub async fn ping(&mut self) -> Result<(), Error> {
        let mut rng = StdRng::from_rng(rand::thread_rng());
        let nonce: [u8; 16] = rng.random();

        if codec::send(&mut self.write, &Frame::ping(nonce)).await.is_err() {
            self.disconnect().await;
            return Ok(());
        }
        self.pending_ping = Some(nonce);
        self.pinged_at = Instant::now();
        Ok(())
    }

    /// Sweeps the two liveness deadlines spec §4.D names. No I/O; the
    /// caller drives `disconnect()` separately when this reports a
    /// timeout, matching the rest of the session API.
    pub fn timed_out(&self, now: Instant) -> bool {
        if self.pending_ping.is_some() && now.duration_since(self.pinged_at) > TIMEOUT_PING_RESPONSE {
            return true;
        }
        if !self.handshake_performed && now.duration_since(self.connected_at) > TIMEOUT_HANDSHAKE {
            return true;
        }
        false
    }

    /// Whether this session is due for a fresh liveness PING: handshaken,
    /// nothing outstanding already, and `INTERVAL_PING` has elapsed since
    /// the last one (or since the handshake, if none has been sent yet).
    pub fn ping_due(&self, now: Instant) -> bool {
        self.handshake_performed
            && self.pending_ping.is_none()
            && now.duration_since(self.pinged_at) >= INTERVAL_PING
    }

    /// Idempotent. Shuts the socket down in both directions and marks the
    /// session as no longer connected; no further operation has effect.
    pub async fn disconnect(&mut self) {
        if !self.connected {
            return;
        }
        self.connected = false;
        self.state = SessionState::Closed;
        let _ = self.write.shutdown().await;
    }
}

fn has_header_terminator(buf: &[u8]) -> bool {
    buf.windows(4).any(|w| w == b"\r\n\r\n")
}
