//! Binary frame format.
//!
//! Frame layout (4-byte length prefix + payload):
//!
//! ```text
//! +------------------+------------------------+
//! | length           | payload                |
//! | 4 bytes (BE u32) | length bytes           |
//! +------------------+------------------------+
//! ```
//!
//! The payload is the gzip-compressed JSON form of one [`Request`] or
//! [`Response`]; the format is symmetric for both directions since the
//! connection is full-duplex.
//!
//! [`Request`]: crate::message::Request
//! [`Response`]: crate::message::Response

use crate::error::ProtocolError;
use bytes::{Buf, BufMut, Bytes, BytesMut};

/// Size of the length prefix in bytes.
pub const LENGTH_PREFIX_SIZE: usize = 4;

/// A single length-prefixed unit on the wire.
#[derive(Debug, Clone)]
pub struct Frame {
    /// Compressed payload bytes.
    pub payload: Bytes,
}

impl Frame {
    /// Creates a new frame with the given payload.
    pub fn new(payload: Bytes) -> Self {
        Self { payload }
    }

    /// Encodes the frame into bytes.
    ///
    /// Fails with [`ProtocolError::OversizedPayload`] if the payload exceeds
    /// `max_payload_bytes`; nothing is partially written in that case.
    pub fn encode(&self, max_payload_bytes: u32) -> Result<BytesMut, ProtocolError> {
        let len = self.payload.len();
        if len > max_payload_bytes as usize {
            return Err(ProtocolError::OversizedPayload {
                size: len as u64,
                max: max_payload_bytes,
            });
        }

        let mut buf = BytesMut::with_capacity(LENGTH_PREFIX_SIZE + len);
        buf.put_u32(len as u32);
        buf.put_slice(&self.payload);
        Ok(buf)
    }

    /// Decodes a frame from the buffer.
    ///
    /// Returns `Ok(Some(frame))` if a complete frame was consumed,
    /// `Ok(None)` if more data is needed (nothing consumed), or
    /// `Err(ProtocolError::MalformedLength)` on a length outside
    /// `(0, max_payload_bytes]` - a fatal framing violation.
    pub fn decode(
        buf: &mut BytesMut,
        max_payload_bytes: u32,
    ) -> Result<Option<Self>, ProtocolError> {
        if buf.len() < LENGTH_PREFIX_SIZE {
            return Ok(None);
        }

        // Peek at the length without consuming; the cursor only moves once
        // the whole frame is buffered.
        let length = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]) as usize;
        if length == 0 || length > max_payload_bytes as usize {
            return Err(ProtocolError::MalformedLength {
                length: length as u64,
                max: max_payload_bytes,
            });
        }

        if buf.len() < LENGTH_PREFIX_SIZE + length {
            return Ok(None);
        }

        buf.advance(LENGTH_PREFIX_SIZE);
        let payload = buf.split_to(length).freeze();
        Ok(Some(Self { payload }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MAX: u32 = 1024;

    #[test]
    fn test_frame_roundtrip() {
        let payload = Bytes::from_static(b"compressed-bytes");
        let frame = Frame::new(payload.clone());

        let mut buf = frame.encode(MAX).unwrap();
        let decoded = Frame::decode(&mut buf, MAX).unwrap().unwrap();

        assert_eq!(decoded.payload, payload);
        assert!(buf.is_empty());
    }

    #[test]
    fn test_incomplete_prefix_consumes_nothing() {
        let mut buf = BytesMut::from(&b"\x00\x00"[..]);
        let result = Frame::decode(&mut buf, MAX).unwrap();
        assert!(result.is_none());
        assert_eq!(buf.len(), 2);
    }

    #[test]
    fn test_incomplete_payload_consumes_nothing() {
        let frame = Frame::new(Bytes::from_static(b"0123456789"));
        let encoded = frame.encode(MAX).unwrap();

        let mut buf = BytesMut::from(&encoded[..encoded.len() - 1]);
        let before = buf.len();
        let result = Frame::decode(&mut buf, MAX).unwrap();
        assert!(result.is_none());
        assert_eq!(buf.len(), before);

        // Feeding the missing byte completes the frame.
        buf.extend_from_slice(&encoded[encoded.len() - 1..]);
        let decoded = Frame::decode(&mut buf, MAX).unwrap().unwrap();
        assert_eq!(decoded.payload.as_ref(), b"0123456789");
    }

    #[test]
    fn test_zero_length_is_malformed() {
        let mut buf = BytesMut::from(&b"\x00\x00\x00\x00"[..]);
        let result = Frame::decode(&mut buf, MAX);
        assert!(matches!(
            result,
            Err(ProtocolError::MalformedLength { length: 0, .. })
        ));
    }

    #[test]
    fn test_over_limit_length_is_malformed() {
        // Length prefix claims MAX + 1 bytes.
        let mut buf = BytesMut::new();
        buf.put_u32(MAX + 1);
        let result = Frame::decode(&mut buf, MAX);
        assert!(matches!(result, Err(ProtocolError::MalformedLength { .. })));
    }

    #[test]
    fn test_encode_oversized_payload() {
        let frame = Frame::new(Bytes::from(vec![0u8; MAX as usize + 1]));
        let result = frame.encode(MAX);
        assert!(matches!(result, Err(ProtocolError::OversizedPayload { .. })));
    }

    #[test]
    fn test_multiple_frames_in_buffer() {
        let frame1 = Frame::new(Bytes::from_static(b"one"));
        let frame2 = Frame::new(Bytes::from_static(b"two"));

        let mut buf = BytesMut::new();
        buf.extend_from_slice(&frame1.encode(MAX).unwrap());
        buf.extend_from_slice(&frame2.encode(MAX).unwrap());

        let decoded1 = Frame::decode(&mut buf, MAX).unwrap().unwrap();
        assert_eq!(decoded1.payload.as_ref(), b"one");
        let decoded2 = Frame::decode(&mut buf, MAX).unwrap().unwrap();
        assert_eq!(decoded2.payload.as_ref(), b"two");
        assert!(buf.is_empty());
    }
}
