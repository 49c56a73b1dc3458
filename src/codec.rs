use crate::frame::Frame;
use crate::opcode::Opcode;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

/// Largest chunk a single payload read is split into while accumulating a
/// frame's body (spec §4.B step 6).
pub const MAX_CHUNK_LENGTH: usize = 1024;
/// Number of chunks a single frame payload may span.
pub const MAX_CHUNKS: usize = 8;
/// `MAX_CHUNK_LENGTH * MAX_CHUNKS` — the largest inbound frame payload this
/// codec accepts (spec §6).
pub const MAX_TOTAL_LENGTH: usize = MAX_CHUNK_LENGTH * MAX_CHUNKS;

/// Read exactly one frame off `reader`.
///
/// This function never returns an error: any protocol violation or short
/// read is logged and folded into a synthetic `CLOSE` frame, per spec
/// §4.B — the caller (`ClientSession::receive_data`) always gets something
/// it can act on, and a synthetic close simply drives the session towards
/// disconnection the same way a real one would.
pub async fn receive<R: AsyncReadExt + Unpin>(reader: &mut R) -> Frame {
    match try_receive(reader).await {
        Ok(frame) => frame,
        Err(reason) => {
            log::debug!("dropping connection: {reason}");
            Frame::close()
        }
    }
}

async fn try_receive<R: AsyncReadExt + Unpin>(reader: &mut R) -> Result<Frame, &'static str> {
    let mut header = [0u8; 2];
    read_exact_or(reader, &mut header, "short read on frame header").await?;

    let fin = header[0] & 0x80 != 0;
    let opcode = Opcode::from_u8(header[0] & 0x0F).map_err(|_| "unknown opcode")?;

    if opcode.is_control() && !fin {
        return Err("control frame may not be fragmented");
    }

    let masked = header[1] & 0x80 != 0;
    let len7 = header[1] & 0x7F;

    let length: usize = match len7 {
        0..=125 => len7 as usize,
        126 => {
            let mut buf = [0u8; 2];
            read_exact_or(reader, &mut buf, "short read on 16-bit length").await?;
            u16::from_be_bytes(buf) as usize
        }
        127 => {
            if opcode.is_control() {
                return Err("extended length forbidden on control frame");
            }
            let mut buf = [0u8; 8];
            read_exact_or(reader, &mut buf, "short read on 64-bit length").await?;
            u64::from_be_bytes(buf) as usize
        }
        _ => unreachable!("7-bit field"),
    };

    if opcode.is_control() && length > 125 {
        return Err("control frame payload exceeds 125 bytes");
    }

    if length > MAX_TOTAL_LENGTH {
        return Err("frame payload exceeds MAX_TOTAL_LENGTH");
    }

    let mask = if masked {
        let mut mask = [0u8; 4];
        read_exact_or(reader, &mut mask, "short read on mask").await?;
        Some(mask)
    } else {
        None
    };

    let mut payload = Vec::with_capacity(length);
    let mut remaining = length;
    let mut i = 0;
    while i < MAX_CHUNKS && remaining > 0 {
        let this_chunk = remaining.min(MAX_CHUNK_LENGTH);
        let mut chunk = vec![0u8; this_chunk];
        read_exact_or(reader, &mut chunk, "short read on payload chunk").await?;
        payload.extend_from_slice(&chunk);
        remaining -= this_chunk;
        i += 1;
    }

    if let Some(mask) = mask {
        for (i, byte) in payload.iter_mut().enumerate() {
            *byte ^= mask[i % 4];
        }
    }

    Ok(Frame { fin, opcode, payload, masked })
}

async fn read_exact_or<R: AsyncReadExt + Unpin>(
    reader: &mut R,
    buf: &mut [u8],
    reason: &'static str,
) -> Result<(), &'static str> {
    reader.read_exact(buf).await.map_err(|_| reason)
}

/// Serialize and write one frame. Server-originated frames are never
/// masked (RFC 6455 §5.1); the mask bit is always 0.
pub async fn send<W: AsyncWriteExt + Unpin>(
    writer: &mut W,
    frame: &Frame,
) -> std::io::Result<()> {
    let first_byte = (frame.fin as u8) << 7 | frame.opcode.as_u8();
    writer.write_all(&[first_byte]).await?;

    let len = frame.payload.len();
    if len <= 125 {
        writer.write_all(&[len as u8]).await?;
    } else if len <= 65535 {
        let mut header = [126u8, 0, 0];
        header[1..].copy_from_slice(&(len as u16).to_be_bytes());
        writer.write_all(&header).await?;
    } else {
        let mut header = [127u8, 0, 0, 0, 0, 0, 0, 0, 0];
        header[1..].copy_from_slice(&(len as u64).to_be_bytes());
        writer.write_all(&header).await?;
    }

    writer.write_all(&frame.payload).await?;
    writer.flush().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn mask_payload(payload: &[u8], mask: [u8; 4]) -> Vec<u8> {
        payload
            .iter()
            .enumerate()
            .map(|(i, b)| b ^ mask[i % 4])
            .collect()
    }

    fn masked_client_frame(fin: bool, opcode: Opcode, payload: &[u8], mask: [u8; 4]) -> Vec<u8> {
        let mut out = vec![(fin as u8) << 7 | opcode.as_u8()];
        let len = payload.len();
        if len <= 125 {
            out.push(0x80 | len as u8);
        } else if len <= 65535 {
            out.push(0x80 | 126);
            out.extend_from_slice(&(len as u16).to_be_bytes());
        } else {
            out.push(0x80 | 127);
            out.extend_from_slice(&(len as u64).to_be_bytes());
        }
        out.extend_from_slice(&mask);
        out.extend_from_slice(&mask_payload(payload, mask));
        out
    }

    #[tokio::test]
    async fn p2_length_encoding_boundaries() {
        for len in [0usize, 125, 126, 65535, 65536] {
            let payload = vec![7u8; len];
            let frame = Frame::new(true, Opcode::Binary, payload.clone());
            let mut buf = Vec::new();
            send(&mut buf, &frame).await.unwrap();

            let expected_header: Vec<u8> = match len {
                0 => vec![0],
                125 => vec![125],
                126 => vec![126, 0x00, 0x7E],
                65535 => vec![126, 0xFF, 0xFF],
                65536 => {
                    let mut h = vec![127];
                    h.extend_from_slice(&(65536u64).to_be_bytes());
                    h
                }
                _ => unreachable!(),
            };
            assert_eq!(&buf[1..1 + expected_header.len()], &expected_header[..]);
        }
    }

    #[tokio::test]
    async fn p1_frame_round_trip_through_masked_wire_bytes() {
        for (fin, opcode, payload) in [
            (true, Opcode::Text, b"hello".to_vec()),
            (false, Opcode::Binary, vec![1, 2, 3]),
            (true, Opcode::Binary, Vec::new()),
        ] {
            let mask = [0x11, 0x22, 0x33, 0x44];
            let wire = masked_client_frame(fin, opcode, &payload, mask);
            let mut cursor = Cursor::new(wire);
            let parsed = receive(&mut cursor).await;
            assert_eq!(parsed.fin, fin);
            assert_eq!(parsed.opcode, opcode);
            assert_eq!(parsed.payload, payload);
        }
    }

    #[tokio::test]
    async fn p3_masking_is_involutive() {
        let mask = [9, 8, 7, 6];
        let payload: Vec<u8> = (0..300u16).map(|i| (i % 256) as u8).collect();
        let once = mask_payload(&payload, mask);
        let twice = mask_payload(&once, mask);
        assert_eq!(twice, payload);
    }

    #[tokio::test]
    async fn p6_fragmented_control_frame_fails_to_parse() {
        let wire = masked_client_frame(false, Opcode::Ping, b"x", [1, 2, 3, 4]);
        let mut cursor = Cursor::new(wire);
        let frame = receive(&mut cursor).await;
        assert_eq!(frame.opcode, Opcode::Close, "should degrade to synthetic close");
    }

    #[tokio::test]
    async fn p6_oversize_control_frame_fails_to_parse() {
        let payload = vec![0u8; 126];
        let mut wire = vec![0x80 | Opcode::Ping.as_u8(), 0x80 | 126];
        wire.extend_from_slice(&(126u16).to_be_bytes());
        wire.extend_from_slice(&[0, 0, 0, 0]);
        wire.extend_from_slice(&payload);
        let mut cursor = Cursor::new(wire);
        let frame = receive(&mut cursor).await;
        assert_eq!(frame.opcode, Opcode::Close);
    }

    #[tokio::test]
    async fn scenario6_oversize_frame_closes_before_reading_payload() {
        let mut wire = vec![0x80 | Opcode::Binary.as_u8(), 0x80 | 127];
        wire.extend_from_slice(&(9000u64).to_be_bytes());
        wire.extend_from_slice(&[0, 0, 0, 0]);
        // Deliberately omit the 9000-byte payload: a real server would
        // close before even attempting to read it.
        let mut cursor = Cursor::new(wire);
        let frame = receive(&mut cursor).await;
        assert_eq!(frame.opcode, Opcode::Close);
    }

    #[tokio::test]
    async fn unknown_opcode_degrades_to_synthetic_close() {
        let wire = masked_client_frame(true, Opcode::Text, b"x", [1, 1, 1, 1]);
        let mut wire = wire;
        wire[0] = (wire[0] & 0xF0) | 0x3; // opcode 0x3 is reserved
        let mut cursor = Cursor::new(wire);
        let frame = receive(&mut cursor).await;
        assert_eq!(frame.opcode, Opcode::Close);
    }
}
