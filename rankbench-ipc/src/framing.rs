//! Length-Prefixed Frame Encoding
//!
//! Provides reliable message boundaries over the stream-based pipe pair
//! shared with a worker process.

use rkyv::ser::serializers::AllocSerializer;
use rkyv::validation::validators::DefaultValidator;
use rkyv::{Archive, CheckBytes, Deserialize, Infallible, Serialize};
use std::io::{BufReader, BufWriter, Read, Write};
use thiserror::Error;

/// Maximum frame size (1 MB). Protocol messages are tiny; anything bigger
/// means a corrupted length prefix.
pub const MAX_FRAME_SIZE: usize = 1024 * 1024;

/// Errors that can occur during frame encoding/decoding.
#[derive(Debug, Error)]
pub enum FrameError {
    /// Underlying pipe read/write failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Message could not be serialized.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Frame bytes did not validate as the expected message type.
    #[error("deserialization error: {0}")]
    Deserialization(String),

    /// Length prefix exceeded [`MAX_FRAME_SIZE`].
    #[error("frame too large: {size} bytes (max {max} bytes)")]
    FrameTooLarge {
        /// Claimed payload size.
        size: usize,
        /// The enforced ceiling.
        max: usize,
    },

    /// Structurally invalid frame (e.g. zero-length payload).
    #[error("invalid frame: {0}")]
    InvalidFrame(String),

    /// The peer closed the stream between frames.
    #[error("end of stream")]
    EndOfStream,
}

/// Write one message with a 4-byte little-endian length prefix.
///
/// ```text
/// +----------------+------------------+
/// | length (4 LE)  | rkyv payload     |
/// +----------------+------------------+
/// ```
pub fn write_frame<W, T>(writer: &mut BufWriter<W>, message: &T) -> Result<(), FrameError>
where
    W: Write,
    T: Serialize<AllocSerializer<256>>,
{
    let bytes =
        rkyv::to_bytes::<_, 256>(message).map_err(|e| FrameError::Serialization(e.to_string()))?;

    let len = bytes.len();
    if len > MAX_FRAME_SIZE {
        return Err(FrameError::FrameTooLarge {
            size: len,
            max: MAX_FRAME_SIZE,
        });
    }

    writer.write_all(&(len as u32).to_le_bytes())?;
    writer.write_all(&bytes)?;

    // Flush so the peer's poll sees the message immediately.
    writer.flush()?;

    Ok(())
}

/// Read one length-prefixed message.
pub fn read_frame<R, T>(reader: &mut BufReader<R>) -> Result<T, FrameError>
where
    R: Read,
    T: Archive,
    T::Archived: for<'a> CheckBytes<DefaultValidator<'a>> + Deserialize<T, Infallible>,
{
    let mut len_buf = [0u8; 4];
    match reader.read_exact(&mut len_buf) {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
            return Err(FrameError::EndOfStream);
        }
        Err(e) => return Err(FrameError::Io(e)),
    }

    let len = u32::from_le_bytes(len_buf) as usize;

    if len > MAX_FRAME_SIZE {
        return Err(FrameError::FrameTooLarge {
            size: len,
            max: MAX_FRAME_SIZE,
        });
    }

    if len == 0 {
        return Err(FrameError::InvalidFrame("zero-length frame".to_string()));
    }

    // rkyv wants an aligned buffer for validation.
    let mut buf = rkyv::AlignedVec::with_capacity(len);
    buf.resize(len, 0);
    reader.read_exact(&mut buf)?;

    let archived = rkyv::check_archived_root::<T>(&buf)
        .map_err(|e| FrameError::Deserialization(e.to_string()))?;

    let value: T = archived
        .deserialize(&mut Infallible)
        .expect("infallible deserialization");

    Ok(value)
}

/// Frame writer wrapper for convenient message sending.
pub struct FrameWriter<W: Write> {
    writer: BufWriter<W>,
}

impl<W: Write> FrameWriter<W> {
    /// Create a new frame writer.
    pub fn new(writer: W) -> Self {
        Self {
            writer: BufWriter::with_capacity(8 * 1024, writer),
        }
    }

    /// Write a message.
    pub fn write<T>(&mut self, message: &T) -> Result<(), FrameError>
    where
        T: Serialize<AllocSerializer<256>>,
    {
        write_frame(&mut self.writer, message)
    }

    /// Flush the underlying writer.
    pub fn flush(&mut self) -> Result<(), FrameError> {
        self.writer.flush()?;
        Ok(())
    }
}

/// Frame reader wrapper for convenient message receiving.
pub struct FrameReader<R: Read> {
    reader: BufReader<R>,
}

impl<R: Read> FrameReader<R> {
    /// Create a new frame reader.
    pub fn new(reader: R) -> Self {
        Self {
            reader: BufReader::with_capacity(8 * 1024, reader),
        }
    }

    /// Read a message.
    pub fn read<T>(&mut self) -> Result<T, FrameError>
    where
        T: Archive,
        T::Archived: for<'a> CheckBytes<DefaultValidator<'a>> + Deserialize<T, Infallible>,
    {
        read_frame(&mut self.reader)
    }

    /// Whether bytes are already buffered. A non-empty buffer may still hold
    /// an incomplete frame that a dead peer will never finish.
    pub fn has_buffered_data(&self) -> bool {
        !self.reader.buffer().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rkyv::{Archive, Deserialize as RkyvDeserialize, Serialize as RkyvSerialize};
    use std::io::Cursor;

    #[derive(Debug, Clone, PartialEq, Archive, RkyvSerialize, RkyvDeserialize)]
    #[archive(check_bytes)]
    struct TestMessage {
        value: u64,
        text: String,
    }

    #[test]
    fn roundtrip() {
        let original = TestMessage {
            value: 42,
            text: "hello world".to_string(),
        };

        let mut buffer = Vec::new();
        {
            let mut writer = FrameWriter::new(&mut buffer);
            writer.write(&original).unwrap();
        }

        let mut reader = FrameReader::new(Cursor::new(buffer));
        let decoded: TestMessage = reader.read().unwrap();

        assert_eq!(original, decoded);
    }

    #[test]
    fn multiple_messages_in_order() {
        let messages = vec![
            TestMessage {
                value: 1,
                text: "first".to_string(),
            },
            TestMessage {
                value: 2,
                text: "second".to_string(),
            },
            TestMessage {
                value: 3,
                text: "third".to_string(),
            },
        ];

        let mut buffer = Vec::new();
        {
            let mut writer = FrameWriter::new(&mut buffer);
            for msg in &messages {
                writer.write(msg).unwrap();
            }
        }

        let mut reader = FrameReader::new(Cursor::new(buffer));
        for expected in &messages {
            let decoded: TestMessage = reader.read().unwrap();
            assert_eq!(expected, &decoded);
        }
    }

    #[test]
    fn end_of_stream() {
        let buffer: Vec<u8> = Vec::new();
        let mut reader = FrameReader::new(Cursor::new(buffer));
        let result: Result<TestMessage, _> = reader.read();
        assert!(matches!(result, Err(FrameError::EndOfStream)));
    }

    #[test]
    fn oversized_length_prefix_rejected() {
        let mut buffer = Vec::new();
        buffer.extend_from_slice(&(u32::MAX).to_le_bytes());
        let mut reader = FrameReader::new(Cursor::new(buffer));
        let result: Result<TestMessage, _> = reader.read();
        assert!(matches!(result, Err(FrameError::FrameTooLarge { .. })));
    }
}
