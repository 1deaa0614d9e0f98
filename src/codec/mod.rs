//! Streaming message codec.
//!
//! Serializes and deserializes one [`StructuredMessage`] at a time against a
//! byte stream. Each transmitted unit is a self-delimiting frame: a `u32`
//! big-endian payload length followed by the message body in the crate's
//! wire configuration (big-endian, fixed-width integers). Field order is
//! preserved exactly.
//!
//! Reading supports two modes: [`MessageReader::read`] materializes the
//! field tree eagerly, while [`MessageReader::read_lazy`] captures the raw
//! payload and defers decoding until first access. Both yield identical
//! field content when fully read.
//!
//! A clean end-of-stream at a frame boundary is reported as
//! [`CodecError::Closed`] so callers can tell a graceful peer close from a
//! truncated or corrupt frame.
use std::{
    io::{self, Read, Write},
    sync::OnceLock,
};

use bincode::{
    config::{BigEndian, Configuration, Fixint},
    decode_from_slice, encode_to_vec,
};
use thiserror::Error;

use crate::message::StructuredMessage;

/// Upper bound on a single frame's payload, guarding against a corrupt
/// length prefix triggering an unbounded allocation.
pub const DEFAULT_MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

const FRAME_HEADER_LEN: usize = 4;

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("failed to encode message: {0}")]
    Encode(#[from] bincode::error::EncodeError),
    #[error("failed to decode message: {0}")]
    Decode(#[from] bincode::error::DecodeError),
    #[error("codec IO error: {0}")]
    Io(#[from] io::Error),
    #[error("stream closed at a frame boundary")]
    Closed,
    #[error("stream ended inside a frame ({read} of {expected} bytes)")]
    Truncated { read: usize, expected: usize },
    #[error("frame of {len} bytes exceeds the {limit} byte limit")]
    FrameTooLarge { len: usize, limit: usize },
    #[error("frame payload has {0} undecoded trailing bytes")]
    TrailingBytes(usize),
}

fn wire_config() -> Configuration<BigEndian, Fixint> {
    bincode::config::standard()
        .with_big_endian()
        .with_fixed_int_encoding()
}

fn decode_payload(payload: &[u8]) -> Result<StructuredMessage, CodecError> {
    let (message, read) = decode_from_slice(payload, wire_config())?;
    if read != payload.len() {
        return Err(CodecError::TrailingBytes(payload.len() - read));
    }
    Ok(message)
}

/// A frame payload whose decoding is deferred until first access.
#[derive(Debug)]
pub struct LazyMessage {
    raw: Vec<u8>,
    decoded: OnceLock<StructuredMessage>,
}

impl LazyMessage {
    pub fn raw_len(&self) -> usize {
        self.raw.len()
    }

    /// Decode on first call; subsequent calls return the cached tree.
    pub fn get(&self) -> Result<&StructuredMessage, CodecError> {
        if let Some(message) = self.decoded.get() {
            return Ok(message);
        }
        let message = decode_payload(&self.raw)?;
        Ok(self.decoded.get_or_init(|| message))
    }

    pub fn into_message(self) -> Result<StructuredMessage, CodecError> {
        match self.decoded.into_inner() {
            Some(message) => Ok(message),
            None => decode_payload(&self.raw),
        }
    }
}

pub struct MessageWriter<W: Write> {
    stream: W,
    config: Configuration<BigEndian, Fixint>,
    max_frame_len: usize,
}

impl<W: Write> MessageWriter<W> {
    pub fn new(stream: W) -> Self {
        Self::with_limit(stream, DEFAULT_MAX_FRAME_LEN)
    }

    pub fn with_limit(stream: W, max_frame_len: usize) -> Self {
        Self {
            stream,
            config: wire_config(),
            max_frame_len,
        }
    }

    /// Write one framed message and flush.
    pub fn write(&mut self, message: &StructuredMessage) -> Result<(), CodecError> {
        let frame = self.frame(message)?;
        self.stream.write_all(&frame)?;
        self.stream.flush()?;
        Ok(())
    }

    /// Write a batch of framed messages, in order, with a single flush.
    pub fn write_batch(&mut self, messages: &[StructuredMessage]) -> Result<(), CodecError> {
        let mut buf = Vec::new();
        for message in messages {
            buf.extend_from_slice(&self.frame(message)?);
        }
        self.stream.write_all(&buf)?;
        self.stream.flush()?;
        Ok(())
    }

    fn frame(&self, message: &StructuredMessage) -> Result<Vec<u8>, CodecError> {
        let payload = encode_to_vec(message, self.config)?;
        if payload.len() > self.max_frame_len {
            return Err(CodecError::FrameTooLarge {
                len: payload.len(),
                limit: self.max_frame_len,
            });
        }
        let mut frame = Vec::with_capacity(FRAME_HEADER_LEN + payload.len());
        frame.extend_from_slice(&(payload.len() as u32).to_be_bytes());
        frame.extend_from_slice(&payload);
        Ok(frame)
    }
}

pub struct MessageReader<R: Read> {
    stream: R,
    max_frame_len: usize,
}

impl<R: Read> MessageReader<R> {
    pub fn new(stream: R) -> Self {
        Self::with_limit(stream, DEFAULT_MAX_FRAME_LEN)
    }

    pub fn with_limit(stream: R, max_frame_len: usize) -> Self {
        Self {
            stream,
            max_frame_len,
        }
    }

    /// Read the next message, materializing its field tree eagerly.
    pub fn read(&mut self) -> Result<StructuredMessage, CodecError> {
        let payload = self.read_frame()?;
        decode_payload(&payload)
    }

    /// Read the next message, deferring decode until first access.
    pub fn read_lazy(&mut self) -> Result<LazyMessage, CodecError> {
        let payload = self.read_frame()?;
        Ok(LazyMessage {
            raw: payload,
            decoded: OnceLock::new(),
        })
    }

    fn read_frame(&mut self) -> Result<Vec<u8>, CodecError> {
        let mut header = [0u8; FRAME_HEADER_LEN];
        let filled = self.fill(&mut header)?;
        if filled == 0 {
            return Err(CodecError::Closed);
        }
        if filled < FRAME_HEADER_LEN {
            return Err(CodecError::Truncated {
                read: filled,
                expected: FRAME_HEADER_LEN,
            });
        }

        let len = u32::from_be_bytes(header) as usize;
        if len > self.max_frame_len {
            return Err(CodecError::FrameTooLarge {
                len,
                limit: self.max_frame_len,
            });
        }

        let mut payload = vec![0u8; len];
        let filled = self.fill(&mut payload)?;
        if filled < len {
            return Err(CodecError::Truncated {
                read: filled,
                expected: len,
            });
        }
        Ok(payload)
    }

    /// Fill `buf` from the stream, stopping early only at end-of-stream.
    fn fill(&mut self, buf: &mut [u8]) -> Result<usize, io::Error> {
        let mut filled = 0;
        while filled < buf.len() {
            match self.stream.read(&mut buf[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(filled)
    }
}

#[cfg(test)]
mod tests {
    use std::io::{Cursor, Seek};

    use super::*;

    fn sample() -> StructuredMessage {
        let inner = StructuredMessage::builder()
            .push_named("leaf", 42i64)
            .build();
        StructuredMessage::builder()
            .push_named("ping", 1i32)
            .push_ordinal(7, "seven")
            .push(vec![0u8, 1, 2])
            .push_named("inner", inner)
            .build()
    }

    #[test]
    fn read_write_round_trip() {
        let stream = Cursor::new(Vec::new());
        let mut writer = MessageWriter::new(stream);

        writer.write(&sample()).unwrap();
        writer.stream.seek(std::io::SeekFrom::Start(0)).unwrap();

        let mut reader = MessageReader::new(writer.stream);
        let decoded = reader.read().unwrap();
        assert_eq!(decoded, sample());
    }

    #[test]
    fn lazy_and_eager_decode_match() {
        let stream = Cursor::new(Vec::new());
        let mut writer = MessageWriter::new(stream);

        writer.write(&sample()).unwrap();
        writer.write(&sample()).unwrap();
        writer.stream.seek(std::io::SeekFrom::Start(0)).unwrap();

        let mut reader = MessageReader::new(writer.stream);
        let eager = reader.read().unwrap();
        let lazy = reader.read_lazy().unwrap();
        assert_eq!(lazy.get().unwrap(), &eager);
        assert_eq!(lazy.into_message().unwrap(), eager);
    }

    #[test]
    fn batch_preserves_order() {
        let first = StructuredMessage::builder().push_named("n", 1i32).build();
        let second = StructuredMessage::builder().push_named("n", 2i32).build();

        let stream = Cursor::new(Vec::new());
        let mut writer = MessageWriter::new(stream);
        writer
            .write_batch(&[first.clone(), second.clone()])
            .unwrap();
        writer.stream.seek(std::io::SeekFrom::Start(0)).unwrap();

        let mut reader = MessageReader::new(writer.stream);
        assert_eq!(reader.read().unwrap(), first);
        assert_eq!(reader.read().unwrap(), second);
        assert!(matches!(reader.read(), Err(CodecError::Closed)));
    }

    #[test]
    fn eof_at_frame_boundary_is_closed() {
        let mut reader = MessageReader::new(Cursor::new(Vec::new()));
        assert!(matches!(reader.read(), Err(CodecError::Closed)));
    }

    #[test]
    fn eof_inside_frame_is_truncated() {
        let stream = Cursor::new(Vec::new());
        let mut writer = MessageWriter::new(stream);
        writer.write(&sample()).unwrap();

        let bytes = writer.stream.into_inner();
        let cut = bytes.len() - 3;
        let mut reader = MessageReader::new(Cursor::new(bytes[..cut].to_vec()));
        assert!(matches!(reader.read(), Err(CodecError::Truncated { .. })));
    }

    #[test]
    fn oversized_length_prefix_is_rejected() {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&u32::MAX.to_be_bytes());
        bytes.extend_from_slice(&[0u8; 8]);

        let mut reader = MessageReader::new(Cursor::new(bytes));
        assert!(matches!(reader.read(), Err(CodecError::FrameTooLarge { .. })));
    }
}
