use serde::Serialize;
use std::fmt;
use thiserror::Error;

pub const FRAME_HEADER_BYTES: usize = 8;
pub const DEFAULT_MAX_FRAME_BYTES: usize = 64 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum Opcode {
    Handshake = 0,
    Frame = 1,
    Close = 2,
    Ping = 3,
    Pong = 4,
}

impl Opcode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Opcode::Handshake => "handshake",
            Opcode::Frame => "frame",
            Opcode::Close => "close",
            Opcode::Ping => "ping",
            Opcode::Pong => "pong",
        }
    }
}

impl TryFrom<u32> for Opcode {
    type Error = FrameError;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Opcode::Handshake),
            1 => Ok(Opcode::Frame),
            2 => Ok(Opcode::Close),
            3 => Ok(Opcode::Ping),
            4 => Ok(Opcode::Pong),
            other => Err(FrameError::UnknownOpcode(other)),
        }
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FrameError {
    #[error("frame exceeds max size: {size} > {max}")]
    OversizedFrame { size: usize, max: usize },
    #[error("unknown opcode {0}")]
    UnknownOpcode(u32),
    #[error("frame header truncated: {available} of 8 bytes")]
    TruncatedHeader { available: usize },
    #[error("declared length {declared} exceeds remaining {remaining} bytes")]
    TruncatedPayload { declared: usize, remaining: usize },
    #[error("frame payload is not utf-8: {0}")]
    InvalidUtf8(String),
    #[error("frame encode failed: {0}")]
    Encode(String),
}

/// One decoded IPC frame. The payload is kept as raw bytes; callers that need
/// the JSON text go through [`IpcFrame::payload_str`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IpcFrame {
    pub opcode: Opcode,
    pub payload: Vec<u8>,
}

impl IpcFrame {
    pub fn new(opcode: Opcode, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            opcode,
            payload: payload.into(),
        }
    }

    /// Header plus payload, i.e. the number of bytes this frame occupies on the wire.
    pub fn wire_len(&self) -> usize {
        FRAME_HEADER_BYTES + self.payload.len()
    }

    pub fn payload_str(&self) -> Result<&str, FrameError> {
        std::str::from_utf8(&self.payload).map_err(|err| FrameError::InvalidUtf8(err.to_string()))
    }
}

pub fn encode_frame(
    opcode: Opcode,
    payload: &[u8],
    max_frame_bytes: usize,
) -> Result<Vec<u8>, FrameError> {
    if payload.len() > max_frame_bytes {
        return Err(FrameError::OversizedFrame {
            size: payload.len(),
            max: max_frame_bytes,
        });
    }
    let length = u32::try_from(payload.len()).map_err(|_| FrameError::OversizedFrame {
        size: payload.len(),
        max: u32::MAX as usize,
    })?;

    let mut encoded = Vec::with_capacity(FRAME_HEADER_BYTES + payload.len());
    encoded.extend_from_slice(&(opcode as u32).to_le_bytes());
    encoded.extend_from_slice(&length.to_le_bytes());
    encoded.extend_from_slice(payload);
    Ok(encoded)
}

pub fn encode_json_frame<T: Serialize>(
    opcode: Opcode,
    value: &T,
    max_frame_bytes: usize,
) -> Result<Vec<u8>, FrameError> {
    let payload = serde_json::to_vec(value).map_err(|err| FrameError::Encode(err.to_string()))?;
    encode_frame(opcode, &payload, max_frame_bytes)
}

pub fn decode_header(bytes: &[u8]) -> Result<(Opcode, usize), FrameError> {
    if bytes.len() < FRAME_HEADER_BYTES {
        return Err(FrameError::TruncatedHeader {
            available: bytes.len(),
        });
    }
    let opcode = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
    let length = u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]);
    Ok((Opcode::try_from(opcode)?, length as usize))
}

/// Decodes exactly one frame from the front of `bytes`, returning it together
/// with the number of bytes consumed. The declared length is checked against
/// both the size limit and the bytes actually present before any copy.
pub fn decode_frame(bytes: &[u8], max_frame_bytes: usize) -> Result<(IpcFrame, usize), FrameError> {
    let (opcode, declared) = decode_header(bytes)?;
    if declared > max_frame_bytes {
        return Err(FrameError::OversizedFrame {
            size: declared,
            max: max_frame_bytes,
        });
    }
    let remaining = bytes.len() - FRAME_HEADER_BYTES;
    if declared > remaining {
        return Err(FrameError::TruncatedPayload {
            declared,
            remaining,
        });
    }
    let end = FRAME_HEADER_BYTES + declared;
    let frame = IpcFrame::new(opcode, &bytes[FRAME_HEADER_BYTES..end]);
    Ok((frame, end))
}

/// Incremental decoder over an owned growable buffer, fed with whatever chunks
/// the stream hands back.
pub struct FrameDecoder {
    max_frame_bytes: usize,
    pending: Vec<u8>,
}

impl FrameDecoder {
    pub fn new(max_frame_bytes: usize) -> Self {
        Self {
            max_frame_bytes,
            pending: Vec::new(),
        }
    }

    pub fn push_chunk(&mut self, chunk: &[u8]) {
        self.pending.extend_from_slice(chunk);
    }

    pub fn buffered(&self) -> usize {
        self.pending.len()
    }

    pub fn clear(&mut self) {
        self.pending.clear();
    }

    /// Pops the next complete frame. `Ok(None)` means more bytes are needed.
    /// An oversized or malformed header poisons the buffer, so it is dropped.
    pub fn next_frame(&mut self) -> Result<Option<IpcFrame>, FrameError> {
        if self.pending.len() < FRAME_HEADER_BYTES {
            return Ok(None);
        }
        let (_, declared) = match decode_header(&self.pending) {
            Ok(header) => header,
            Err(err) => {
                self.pending.clear();
                return Err(err);
            }
        };
        if declared > self.max_frame_bytes {
            self.pending.clear();
            return Err(FrameError::OversizedFrame {
                size: declared,
                max: self.max_frame_bytes,
            });
        }
        if self.pending.len() < FRAME_HEADER_BYTES + declared {
            return Ok(None);
        }
        let (frame, consumed) = decode_frame(&self.pending, self.max_frame_bytes)?;
        self.pending.drain(..consumed);
        Ok(Some(frame))
    }
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_FRAME_BYTES)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_is_little_endian_opcode_then_length() {
        let frame = encode_frame(Opcode::Frame, b"{}", DEFAULT_MAX_FRAME_BYTES).expect("encode");
        assert_eq!(&frame[..8], &[1, 0, 0, 0, 2, 0, 0, 0]);
        assert_eq!(&frame[8..], b"{}");
    }

    #[test]
    fn decode_rejects_length_beyond_remaining_bytes() {
        let mut frame =
            encode_frame(Opcode::Handshake, b"{\"v\":1}", DEFAULT_MAX_FRAME_BYTES).expect("encode");
        frame.truncate(frame.len() - 2);
        let err = decode_frame(&frame, DEFAULT_MAX_FRAME_BYTES).expect_err("truncated");
        assert_eq!(
            err,
            FrameError::TruncatedPayload {
                declared: 7,
                remaining: 5
            }
        );
    }

    #[test]
    fn decode_rejects_unknown_opcode_and_short_header() {
        let bytes = [9u8, 0, 0, 0, 0, 0, 0, 0];
        assert_eq!(
            decode_frame(&bytes, DEFAULT_MAX_FRAME_BYTES),
            Err(FrameError::UnknownOpcode(9))
        );
        assert_eq!(
            decode_frame(&bytes[..3], DEFAULT_MAX_FRAME_BYTES),
            Err(FrameError::TruncatedHeader { available: 3 })
        );
    }

    #[test]
    fn encoder_rejects_oversized_payload() {
        let payload = vec![b'x'; 128];
        let result = encode_frame(Opcode::Frame, &payload, 64);
        assert!(matches!(result, Err(FrameError::OversizedFrame { .. })));
    }

    #[test]
    fn decoder_waits_for_split_frames_and_keeps_trailing_bytes() {
        let first = encode_frame(Opcode::Frame, b"{\"a\":1}", DEFAULT_MAX_FRAME_BYTES).expect("a");
        let second = encode_frame(Opcode::Pong, b"{}", DEFAULT_MAX_FRAME_BYTES).expect("b");
        let mut stream = first.clone();
        stream.extend_from_slice(&second);

        let mut decoder = FrameDecoder::default();
        decoder.push_chunk(&stream[..5]);
        assert_eq!(decoder.next_frame(), Ok(None));
        decoder.push_chunk(&stream[5..first.len() + 3]);

        let frame = decoder.next_frame().expect("decode").expect("first frame");
        assert_eq!(frame.opcode, Opcode::Frame);
        assert_eq!(frame.payload_str().expect("utf8"), "{\"a\":1}");
        assert_eq!(frame.wire_len(), first.len());
        assert_eq!(decoder.next_frame(), Ok(None));

        decoder.push_chunk(&stream[first.len() + 3..]);
        let frame = decoder.next_frame().expect("decode").expect("second frame");
        assert_eq!(frame.opcode, Opcode::Pong);
        assert_eq!(decoder.buffered(), 0);
    }

    #[test]
    fn decoder_drops_buffer_on_oversized_declared_length() {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&1u32.to_le_bytes());
        bytes.extend_from_slice(&10_000u32.to_le_bytes());
        let mut decoder = FrameDecoder::new(1_024);
        decoder.push_chunk(&bytes);
        assert!(matches!(
            decoder.next_frame(),
            Err(FrameError::OversizedFrame { size: 10_000, .. })
        ));
        assert_eq!(decoder.buffered(), 0);
    }
}
