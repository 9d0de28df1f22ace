//! Async framed reader and writer.
//!
//! Frames are fully buffered before they are surfaced: a caller never sees
//! a partially read frame. The reader reuses one payload buffer across
//! frames; audio payloads are copied out into [`Bytes`] because they
//! outlive the next read.

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::frame::{
    Frame, FrameKind, MAX_PAYLOAD_BYTES, ProtocolError, parse_identify, put_frame,
};

/// Reads frames off an `AsyncRead`.
pub struct FrameReader<R> {
    reader: R,
    /// Reused payload scratch buffer.
    payload: Vec<u8>,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            payload: Vec::with_capacity(1024),
        }
    }

    /// Read the next frame.
    ///
    /// Returns `Ok(None)` on a clean close at a frame boundary. Unknown
    /// kinds are consumed, logged, and skipped — the loop continues with
    /// the next frame on the wire.
    pub async fn read_frame(&mut self) -> Result<Option<Frame>, ProtocolError> {
        loop {
            let mut kind_byte = [0u8; 1];
            match self.reader.read_exact(&mut kind_byte).await {
                Ok(_) => {}
                Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
                Err(e) => return Err(e.into()),
            }

            let mut len_bytes = [0u8; 2];
            self.read_fully(&mut len_bytes).await?;
            let len = usize::from(u16::from_be_bytes(len_bytes));

            if len > MAX_PAYLOAD_BYTES {
                return Err(ProtocolError::Oversized { len });
            }

            self.payload.resize(len, 0);
            if len > 0 {
                let mut scratch = std::mem::take(&mut self.payload);
                let result = self.read_fully(&mut scratch).await;
                self.payload = scratch;
                result?;
            }

            let Some(kind) = FrameKind::from_wire(kind_byte[0]) else {
                tracing::warn!(kind = format!("{:#04x}", kind_byte[0]), len, "Skipping unknown frame kind");
                continue;
            };

            let frame = match kind {
                FrameKind::Hangup => {
                    if len != 0 {
                        return Err(ProtocolError::LengthMismatch {
                            kind: kind.as_wire(),
                            len,
                        });
                    }
                    Frame::Hangup
                }
                FrameKind::Identify => Frame::Identify(parse_identify(&self.payload)?),
                FrameKind::Audio => Frame::Audio(Bytes::copy_from_slice(&self.payload)),
                FrameKind::Error => {
                    let message = if self.payload.is_empty() {
                        None
                    } else {
                        Some(String::from_utf8_lossy(&self.payload).into_owned())
                    };
                    Frame::Error(message)
                }
            };

            return Ok(Some(frame));
        }
    }

    /// `read_exact` with mid-frame EOF classified as [`ProtocolError::Truncated`].
    async fn read_fully(&mut self, buf: &mut [u8]) -> Result<(), ProtocolError> {
        match self.reader.read_exact(buf).await {
            Ok(_) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                Err(ProtocolError::Truncated)
            }
            Err(e) => Err(e.into()),
        }
    }
}

/// Writes frames onto an `AsyncWrite`, reusing one encode buffer.
pub struct FrameWriter<W> {
    writer: W,
    buf: BytesMut,
}

impl<W: AsyncWrite + Unpin> FrameWriter<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer,
            buf: BytesMut::with_capacity(1024),
        }
    }

    /// Encode and send one frame, flushing so pacing stays accurate.
    pub async fn write_frame(&mut self, frame: &Frame) -> Result<(), ProtocolError> {
        self.buf.clear();
        put_frame(&mut self.buf, frame);
        self.writer.write_all(&self.buf).await?;
        self.writer.flush().await?;
        Ok(())
    }

    /// Shut the write half down (best effort — the peer may already be gone).
    pub async fn shutdown(&mut self) {
        let _ = self.writer.shutdown().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{AUDIO_FRAME_BYTES, encode_frame};
    use uuid::Uuid;
    use voxline_core::CallId;

    async fn read_all(wire: &[u8]) -> Vec<Result<Option<Frame>, ProtocolError>> {
        let mut reader = FrameReader::new(wire);
        let mut out = Vec::new();
        loop {
            let next = reader.read_frame().await;
            let done = matches!(next, Ok(None) | Err(_));
            out.push(next);
            if done {
                return out;
            }
        }
    }

    #[tokio::test]
    async fn audio_round_trip_preserves_payload_and_kind() {
        let pcm: Vec<u8> = (0..AUDIO_FRAME_BYTES).map(|i| (i % 251) as u8).collect();
        let frame = Frame::Audio(Bytes::from(pcm.clone()));
        let wire = encode_frame(&frame);

        let mut reader = FrameReader::new(wire.as_ref());
        let decoded = reader.read_frame().await.unwrap().unwrap();
        assert_eq!(decoded, frame);
        assert_eq!(decoded.kind(), FrameKind::Audio);
        match decoded {
            Frame::Audio(payload) => assert_eq!(payload.as_ref(), pcm.as_slice()),
            other => panic!("expected audio frame, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn identify_round_trip_through_writer() {
        let call_id = CallId::new(Uuid::new_v4());
        let mut wire = Vec::new();
        {
            let mut writer = FrameWriter::new(&mut wire);
            writer.write_frame(&Frame::Identify(call_id)).await.unwrap();
        }

        let mut reader = FrameReader::new(wire.as_slice());
        assert_eq!(
            reader.read_frame().await.unwrap(),
            Some(Frame::Identify(call_id))
        );
    }

    #[tokio::test]
    async fn raw_uuid_identify_is_accepted() {
        let uuid = Uuid::new_v4();
        let mut wire = vec![0x01, 0x00, 0x10];
        wire.extend_from_slice(uuid.as_bytes());

        let mut reader = FrameReader::new(wire.as_slice());
        assert_eq!(
            reader.read_frame().await.unwrap(),
            Some(Frame::Identify(CallId::new(uuid)))
        );
    }

    #[tokio::test]
    async fn clean_eof_between_frames_is_none() {
        let results = read_all(&[]).await;
        assert!(matches!(results.as_slice(), [Ok(None)]));
    }

    #[tokio::test]
    async fn eof_mid_frame_is_truncated() {
        // Audio frame declaring 640 bytes but delivering 10.
        let mut wire = vec![0x10, 0x02, 0x80];
        wire.extend_from_slice(&[0u8; 10]);

        let mut reader = FrameReader::new(wire.as_slice());
        let err = reader.read_frame().await.unwrap_err();
        assert!(matches!(err, ProtocolError::Truncated));
    }

    #[tokio::test]
    async fn eof_mid_header_is_truncated() {
        let mut reader = FrameReader::new([0x10u8].as_slice());
        let err = reader.read_frame().await.unwrap_err();
        assert!(matches!(err, ProtocolError::Truncated));
    }

    #[tokio::test]
    async fn unknown_kind_is_skipped_and_next_frame_surfaces() {
        let mut wire = vec![0x42, 0x00, 0x03, 1, 2, 3]; // unknown kind, 3-byte payload
        wire.extend_from_slice(&encode_frame(&Frame::Hangup));

        let mut reader = FrameReader::new(wire.as_slice());
        assert_eq!(reader.read_frame().await.unwrap(), Some(Frame::Hangup));
    }

    #[tokio::test]
    async fn hangup_with_payload_is_length_mismatch() {
        let wire = vec![0x00, 0x00, 0x02, 9, 9];
        let mut reader = FrameReader::new(wire.as_slice());
        let err = reader.read_frame().await.unwrap_err();
        assert!(matches!(
            err,
            ProtocolError::LengthMismatch { kind: 0x00, len: 2 }
        ));
    }

    #[tokio::test]
    async fn error_frame_message_is_decoded() {
        let mut wire = Vec::new();
        {
            let mut writer = FrameWriter::new(&mut wire);
            writer
                .write_frame(&Frame::Error(Some("duplicate call".into())))
                .await
                .unwrap();
        }
        let mut reader = FrameReader::new(wire.as_slice());
        assert_eq!(
            reader.read_frame().await.unwrap(),
            Some(Frame::Error(Some("duplicate call".into())))
        );
    }

    #[tokio::test]
    async fn empty_error_frame_has_no_message() {
        let wire = vec![0xFF, 0x00, 0x00];
        let mut reader = FrameReader::new(wire.as_slice());
        assert_eq!(reader.read_frame().await.unwrap(), Some(Frame::Error(None)));
    }

    #[tokio::test]
    async fn every_decode_is_known_kind_or_classified_error() {
        // Sweep all 256 kind bytes with an empty payload; the outcome must
        // be a known frame, a skip (surfacing the trailing hangup), or a
        // classified protocol error — never a panic or a mystery frame.
        for kind in 0u8..=255 {
            let mut wire = vec![kind, 0x00, 0x00];
            wire.extend_from_slice(&encode_frame(&Frame::Hangup));
            let mut reader = FrameReader::new(wire.as_slice());
            match reader.read_frame().await {
                Ok(Some(frame)) => {
                    assert!(FrameKind::from_wire(kind).is_some() || frame == Frame::Hangup);
                }
                Ok(None) => panic!("unexpected EOF for kind {kind:#04x}"),
                Err(
                    ProtocolError::LengthMismatch { .. }
                    | ProtocolError::BadIdentify
                    | ProtocolError::Truncated,
                ) => {}
                Err(other) => panic!("unclassified error for kind {kind:#04x}: {other}"),
            }
        }
    }
}
