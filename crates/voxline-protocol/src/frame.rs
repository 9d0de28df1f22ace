//! Frame types, classification errors, and pure encoding.

use bytes::{BufMut, Bytes, BytesMut};
use std::time::Duration;
use uuid::Uuid;

use voxline_core::CallId;

/// Upper bound on any frame payload.
pub const MAX_PAYLOAD_BYTES: usize = 64 * 1024;

/// Bytes of PCM in one 20 ms audio frame (16 kHz × 16 bit × mono × 20 ms).
pub const AUDIO_FRAME_BYTES: usize = 640;

/// Wall-clock duration one audio frame represents.
pub const AUDIO_FRAME_DURATION: Duration = Duration::from_millis(20);

/// PCM sample rate on the wire.
pub const SAMPLE_RATE_HZ: u32 = 16_000;

/// Frame kind discriminants as they appear on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FrameKind {
    Hangup = 0x00,
    Identify = 0x01,
    Audio = 0x10,
    Error = 0xFF,
}

impl FrameKind {
    /// Map a wire byte to a known kind, `None` for unknown kinds.
    #[must_use]
    pub const fn from_wire(byte: u8) -> Option<Self> {
        match byte {
            0x00 => Some(Self::Hangup),
            0x01 => Some(Self::Identify),
            0x10 => Some(Self::Audio),
            0xFF => Some(Self::Error),
            _ => None,
        }
    }

    #[must_use]
    pub const fn as_wire(self) -> u8 {
        self as u8
    }
}

/// One decoded frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// Caller hung up; the connection is done.
    Hangup,

    /// First frame of every call, carrying its UUID.
    Identify(CallId),

    /// 20 ms of caller PCM.
    Audio(Bytes),

    /// Peer-reported error with an optional message.
    Error(Option<String>),
}

impl Frame {
    #[must_use]
    pub const fn kind(&self) -> FrameKind {
        match self {
            Self::Hangup => FrameKind::Hangup,
            Self::Identify(_) => FrameKind::Identify,
            Self::Audio(_) => FrameKind::Audio,
            Self::Error(_) => FrameKind::Error,
        }
    }
}

/// Classified decoding failures.
///
/// All variants except [`ProtocolError::Io`] are protocol violations by the
/// peer; every one of them is fatal for the connection.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// The connection closed in the middle of a frame.
    #[error("Connection closed mid-frame")]
    Truncated,

    /// Declared payload length exceeds [`MAX_PAYLOAD_BYTES`].
    #[error("Frame payload of {len} bytes exceeds the {MAX_PAYLOAD_BYTES} byte limit")]
    Oversized { len: usize },

    /// Declared length is outside the kind's allowed set.
    #[error("Frame kind {kind:#04x} does not allow a {len} byte payload")]
    LengthMismatch { kind: u8, len: usize },

    /// Identify payload with a valid length that does not parse as a UUID.
    #[error("Identify payload is not a valid call UUID")]
    BadIdentify,

    /// Transport-level failure.
    #[error("Socket error: {0}")]
    Io(#[from] std::io::Error),
}

/// Parse an Identify payload (16 raw bytes or 36 ASCII characters).
///
/// The caller has already checked the length against the allowed set.
pub(crate) fn parse_identify(payload: &[u8]) -> Result<CallId, ProtocolError> {
    let uuid = match payload.len() {
        16 => Uuid::from_slice(payload).map_err(|_| ProtocolError::BadIdentify)?,
        36 => {
            let text = std::str::from_utf8(payload).map_err(|_| ProtocolError::BadIdentify)?;
            Uuid::parse_str(text).map_err(|_| ProtocolError::BadIdentify)?
        }
        len => {
            return Err(ProtocolError::LengthMismatch {
                kind: FrameKind::Identify.as_wire(),
                len,
            });
        }
    };
    Ok(CallId::new(uuid))
}

/// Encode one frame into wire bytes.
///
/// Pure function; [`crate::FrameWriter`] reuses an internal buffer instead
/// where throughput matters.
#[must_use]
pub fn encode_frame(frame: &Frame) -> Bytes {
    let mut buf = BytesMut::new();
    put_frame(&mut buf, frame);
    buf.freeze()
}

pub(crate) fn put_frame(buf: &mut BytesMut, frame: &Frame) {
    let payload: &[u8] = match frame {
        Frame::Hangup => &[],
        Frame::Identify(call_id) => {
            // Always emit the 36-byte ASCII form; both forms are accepted
            // on ingress.
            let text = call_id.to_string();
            buf.reserve(3 + text.len());
            buf.put_u8(FrameKind::Identify.as_wire());
            buf.put_u16(u16::try_from(text.len()).unwrap_or(36));
            buf.put_slice(text.as_bytes());
            return;
        }
        Frame::Audio(pcm) => pcm,
        Frame::Error(message) => message.as_deref().map_or(&[], str::as_bytes),
    };

    debug_assert!(payload.len() <= MAX_PAYLOAD_BYTES);
    buf.reserve(3 + payload.len());
    buf.put_u8(frame.kind().as_wire());
    #[allow(clippy::cast_possible_truncation)]
    buf.put_u16(payload.len() as u16);
    buf.put_slice(payload);
}
