//! Wire protocol between the PBX and the call handler.
//!
//! Every frame is `[kind: 1 byte] [length: 2 bytes big-endian] [payload]`:
//!
//! | kind   | meaning  | allowed payload length          |
//! |--------|----------|---------------------------------|
//! | `0x00` | Hangup   | 0                               |
//! | `0x01` | Identify | 16 (raw UUID) or 36 (ASCII UUID)|
//! | `0x10` | Audio    | PCM samples, 640 expected       |
//! | `0xFF` | Error    | optional UTF-8 message          |
//!
//! Audio payloads are 20 ms of 16 kHz / 16-bit / little-endian mono PCM.
//! Unknown kinds are skipped after consuming their declared payload; a
//! length outside a known kind's allowed set is a fatal protocol error.

mod codec;
mod frame;

pub use codec::{FrameReader, FrameWriter};
pub use frame::{
    AUDIO_FRAME_BYTES, AUDIO_FRAME_DURATION, Frame, FrameKind, MAX_PAYLOAD_BYTES, ProtocolError,
    SAMPLE_RATE_HZ, encode_frame,
};
