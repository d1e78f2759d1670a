//! Encoder and decoder for framed, compressed messages.

use crate::error::ProtocolError;
use crate::frame::Frame;
use crate::message::{Request, Response};
use bytes::{Bytes, BytesMut};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::io::{Read, Write};

fn compress(data: &[u8]) -> Result<Vec<u8>, ProtocolError> {
    let mut encoder = GzEncoder::new(Vec::with_capacity(data.len() / 2), Compression::default());
    encoder.write_all(data).map_err(ProtocolError::Compression)?;
    encoder.finish().map_err(ProtocolError::Compression)
}

/// Decompresses a payload, bounding the decompressed size so a hostile peer
/// cannot expand a small frame into unbounded memory.
fn decompress(data: &[u8], max_payload_bytes: u32) -> Result<Vec<u8>, ProtocolError> {
    let mut out = Vec::new();
    let mut decoder = GzDecoder::new(data).take(u64::from(max_payload_bytes) + 1);
    decoder
        .read_to_end(&mut out)
        .map_err(ProtocolError::Compression)?;
    if out.len() > max_payload_bytes as usize {
        return Err(ProtocolError::OversizedPayload {
            size: out.len() as u64,
            max: max_payload_bytes,
        });
    }
    Ok(out)
}

/// Encodes requests and responses into frames.
#[derive(Debug, Clone)]
pub struct Encoder {
    max_payload_bytes: u32,
}

impl Encoder {
    pub fn new(max_payload_bytes: u32) -> Self {
        Self { max_payload_bytes }
    }

    /// Encodes a request into a frame.
    pub fn encode_request(&self, request: &Request) -> Result<BytesMut, ProtocolError> {
        self.encode_json(request)
    }

    /// Encodes a response into a frame.
    pub fn encode_response(&self, response: &Response) -> Result<BytesMut, ProtocolError> {
        self.encode_json(response)
    }

    fn encode_json<T: serde::Serialize>(&self, value: &T) -> Result<BytesMut, ProtocolError> {
        let json = serde_json::to_vec(value)?;
        let payload = compress(&json)?;
        Frame::new(Bytes::from(payload)).encode(self.max_payload_bytes)
    }
}

impl Default for Encoder {
    fn default() -> Self {
        Self::new(crate::DEFAULT_MAX_PAYLOAD_BYTES)
    }
}

/// Incremental decoder for framed requests and responses.
///
/// Bytes read from the socket are appended with [`Decoder::extend`]; complete
/// messages are drained with [`Decoder::decode_request`] /
/// [`Decoder::decode_response`]. Partial frames consume nothing, so feeding
/// the stream one byte at a time decodes the same messages as feeding it
/// whole.
pub struct Decoder {
    buffer: BytesMut,
    max_payload_bytes: u32,
}

impl Decoder {
    pub fn new(max_payload_bytes: u32) -> Self {
        Self {
            buffer: BytesMut::with_capacity(8192),
            max_payload_bytes,
        }
    }

    /// Appends data to the internal buffer.
    pub fn extend(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Attempts to decode the next frame from the buffer.
    pub fn decode_frame(&mut self) -> Result<Option<Frame>, ProtocolError> {
        Frame::decode(&mut self.buffer, self.max_payload_bytes)
    }

    /// Attempts to decode the next request from the buffer.
    pub fn decode_request(&mut self) -> Result<Option<Request>, ProtocolError> {
        self.decode_json()
    }

    /// Attempts to decode the next response from the buffer.
    pub fn decode_response(&mut self) -> Result<Option<Response>, ProtocolError> {
        self.decode_json()
    }

    fn decode_json<T: serde::de::DeserializeOwned>(&mut self) -> Result<Option<T>, ProtocolError> {
        match self.decode_frame()? {
            Some(frame) => {
                let json = decompress(&frame.payload, self.max_payload_bytes)?;
                let value: T = serde_json::from_slice(&json)?;
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    /// Returns the number of bytes currently buffered.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Clears the internal buffer.
    pub fn clear(&mut self) {
        self.buffer.clear();
    }
}

impl Default for Decoder {
    fn default() -> Self {
        Self::new(crate::DEFAULT_MAX_PAYLOAD_BYTES)
    }
}
