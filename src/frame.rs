use crate::opcode::Opcode;

/// One WebSocket wire frame, after the mask has been applied/removed.
///
/// Mirrors the `Frame` type `socket-flow` uses for its own read/write path,
/// minus the `compressed` flag — permessage-deflate is a Non-goal here.
/// `masked` records whether the frame as it came off the wire carried a
/// mask bit — spec §4.B step 5 requires the caller to close the session
/// when it didn't, since RFC 6455 §5.1 mandates client-to-server masking.
/// Frames this crate constructs itself (close/ping/pong/outbound data) are
/// never read off the wire, so `masked` is simply `true` for them — the
/// send path ignores the field entirely and always clears the mask bit.
#[derive(Debug, Clone)]
pub struct Frame {
    pub fin: bool,
    pub opcode: Opcode,
    pub payload: Vec<u8>,
    pub masked: bool,
}

impl Frame {
    pub fn new(fin: bool, opcode: Opcode, payload: Vec<u8>) -> Self {
        Self { fin, opcode, payload, masked: true }
    }

    pub fn close() -> Self {
        Self::new(true, Opcode::Close, Vec::new())
    }

    pub fn ping(nonce: [u8; 16]) -> Self {
        Self::new(true, Opcode::Ping, nonce.to_vec())
    }

    pub fn pong(payload: Vec<u8>) -> Self {
        Self::new(true, Opcode::Pong, payload)
    }

    pub fn text(payload: Vec<u8>) -> Self {
        Self::new(true, Opcode::Text, payload)
    }

    pub fn binary(payload: Vec<u8>) -> Self {
        Self::new(true, Opcode::Binary, payload)
    }
}
