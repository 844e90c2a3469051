//! Length-Prefixed Frame Encoding
//!
//! Gives the byte streams between orchestrator and worker reliable
//! message boundaries: a 4-byte little-endian length followed by an
//! rkyv payload validated before access.

use rkyv::ser::serializers::AllocSerializer;
use rkyv::validation::validators::DefaultValidator;
use rkyv::{Archive, CheckBytes, Deserialize, Infallible, Serialize};
use std::io::{BufReader, BufWriter, Read, Write};
use thiserror::Error;

/// Maximum frame size (16 MB) to prevent memory exhaustion
pub const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// Errors that can occur while encoding or decoding a frame
#[derive(Debug, Error)]
pub enum FrameError {
    /// Underlying read or write failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Message could not be serialized into a frame
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Payload bytes could not be deserialized back into a message
    #[error("deserialization error: {0}")]
    Deserialization(String),

    /// Length prefix exceeds [`MAX_FRAME_SIZE`]
    #[error("frame too large: {size} bytes (max {max} bytes)")]
    FrameTooLarge {
        /// Length the prefix claimed
        size: usize,
        /// Largest length accepted
        max: usize,
    },

    /// Payload failed validation against the expected archive layout
    #[error("invalid frame: {0}")]
    InvalidFrame(String),

    /// Peer closed the stream cleanly between frames
    #[error("end of stream")]
    EndOfStream,
}

/// Writes length-prefixed messages to a byte stream.
///
/// Frame format:
/// ```text
/// +----------------+------------------+
/// | length (4 LE)  | rkyv payload     |
/// +----------------+------------------+
/// ```
pub struct FrameWriter<W: Write> {
    writer: BufWriter<W>,
}

impl<W: Write> FrameWriter<W> {
    /// Create a frame writer with a 64KB buffer.
    pub fn new(writer: W) -> Self {
        Self {
            writer: BufWriter::with_capacity(64 * 1024, writer),
        }
    }

    /// Serialize a message, write it as one frame, and flush.
    pub fn write<T>(&mut self, message: &T) -> Result<(), FrameError>
    where
        T: Serialize<AllocSerializer<256>>,
    {
        let bytes = rkyv::to_bytes::<_, 256>(message)
            .map_err(|e| FrameError::Serialization(e.to_string()))?;

        let len = bytes.len();
        if len > MAX_FRAME_SIZE {
            return Err(FrameError::FrameTooLarge {
                size: len,
                max: MAX_FRAME_SIZE,
            });
        }

        self.writer.write_all(&(len as u32).to_le_bytes())?;
        self.writer.write_all(&bytes)?;
        // Flush per frame so the peer never blocks on a half-sent message.
        self.writer.flush()?;
        Ok(())
    }

    /// Consume and return the inner writer.
    pub fn into_inner(self) -> BufWriter<W> {
        self.writer
    }
}

/// Reads length-prefixed messages from a byte stream.
pub struct FrameReader<R: Read> {
    reader: BufReader<R>,
}

impl<R: Read> FrameReader<R> {
    /// Create a frame reader with a 64KB buffer.
    pub fn new(reader: R) -> Self {
        Self {
            reader: BufReader::with_capacity(64 * 1024, reader),
        }
    }

    /// Read and validate one frame, deserializing the payload.
    pub fn read<T>(&mut self) -> Result<T, FrameError>
    where
        T: Archive,
        T::Archived: for<'a> CheckBytes<DefaultValidator<'a>> + Deserialize<T, Infallible>,
    {
        let mut len_buf = [0u8; 4];
        match self.reader.read_exact(&mut len_buf) {
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

        // rkyv requires an aligned buffer for validation.
        let mut buf = rkyv::AlignedVec::with_capacity(len);
        buf.resize(len, 0);
        self.reader.read_exact(&mut buf)?;

        let archived = rkyv::check_archived_root::<T>(&buf)
            .map_err(|e| FrameError::Deserialization(e.to_string()))?;
        let value: T = archived
            .deserialize(&mut Infallible)
            .map_err(|_| FrameError::Deserialization("archive access failed".to_string()))?;
        Ok(value)
    }

    /// Whether unread bytes remain in the internal buffer.
    pub fn has_buffered_data(&self) -> bool {
        !self.reader.buffer().is_empty()
    }

    /// Consume and return the inner reader.
    pub fn into_inner(self) -> BufReader<R> {
        self.reader
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::{BenchSpec, RunnerCommand, WorkerReply};
    use std::io::Cursor;

    fn sample_spec(name: &str) -> BenchSpec {
        BenchSpec {
            checksum: format!("{name}-checksum"),
            name: name.to_string(),
            setup: "from pkg import build".to_string(),
            code: "build()".to_string(),
            cleanup: String::new(),
            prereq: None,
            ncalls: None,
            repeat: None,
        }
    }

    #[test]
    fn roundtrip_single_frame() {
        let original = RunnerCommand::RunBatch {
            specs: vec![sample_spec("frame")],
            options: Default::default(),
        };

        let mut buffer = Vec::new();
        {
            let mut writer = FrameWriter::new(&mut buffer);
            writer.write(&original).unwrap();
        }

        let mut reader = FrameReader::new(Cursor::new(buffer));
        let decoded: RunnerCommand = reader.read().unwrap();
        match decoded {
            RunnerCommand::RunBatch { specs, .. } => {
                assert_eq!(specs.len(), 1);
                assert_eq!(specs[0].name, "frame");
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn roundtrip_message_sequence() {
        let replies = vec![
            WorkerReply::Hello {
                protocol_version: crate::PROTOCOL_VERSION,
            },
            WorkerReply::BatchComplete { errors: 2 },
        ];

        let mut buffer = Vec::new();
        {
            let mut writer = FrameWriter::new(&mut buffer);
            for reply in &replies {
                writer.write(reply).unwrap();
            }
        }

        let mut reader = FrameReader::new(Cursor::new(buffer));
        let first: WorkerReply = reader.read().unwrap();
        assert!(matches!(first, WorkerReply::Hello { protocol_version } if protocol_version == 1));
        let second: WorkerReply = reader.read().unwrap();
        assert!(matches!(second, WorkerReply::BatchComplete { errors: 2 }));
    }

    #[test]
    fn end_of_stream_is_distinguished() {
        let mut reader = FrameReader::new(Cursor::new(Vec::new()));
        let result: Result<WorkerReply, _> = reader.read();
        assert!(matches!(result, Err(FrameError::EndOfStream)));
    }

    #[test]
    fn oversized_length_prefix_is_rejected() {
        let mut buffer = Vec::new();
        buffer.extend_from_slice(&((MAX_FRAME_SIZE as u32) + 1).to_le_bytes());
        let mut reader = FrameReader::new(Cursor::new(buffer));
        let result: Result<WorkerReply, _> = reader.read();
        assert!(matches!(result, Err(FrameError::FrameTooLarge { .. })));
    }
}
