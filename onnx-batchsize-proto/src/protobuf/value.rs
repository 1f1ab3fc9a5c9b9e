//! Traits and types for reading primitive values in Protocol Buffers messages.

use std::fs::File;
use std::io::{BufRead, BufReader, Cursor, Read, Seek, SeekFrom};

use crate::protobuf::errors::{ErrorKind, ProtobufError};
use crate::protobuf::varint::read_varint;

/// Trait for reading primitive values from a Protocol Buffers message.
///
/// Messages are built from four kinds of primitive: varints, 32-bit values,
/// 64-bit values and length-delimited byte sequences. Strings and embedded
/// messages are both length-delimited.
///
/// The [`position`](ReadValue::position) method lets callers determine when
/// the end of an embedded message has been reached.
pub trait ReadValue {
    /// Read a 4-byte little-endian value as an i32.
    fn read_i32(&mut self) -> Result<i32, ProtobufError>;

    /// Read an 8-byte little-endian value as an i64.
    fn read_i64(&mut self) -> Result<i64, ProtobufError>;

    /// Read an LEB128-encoded varint.
    fn read_varint(&mut self) -> Result<u64, ProtobufError>;

    /// Read `len` bytes.
    fn read_bytes(&mut self, len: usize) -> Result<Vec<u8>, ProtobufError>;

    /// Read a string encoded as `len` bytes of UTF-8.
    fn read_string(&mut self, len: usize) -> Result<String, ProtobufError> {
        let bytes = self.read_bytes(len)?;
        String::from_utf8(bytes).map_err(|_| ProtobufError::new(ErrorKind::InvalidUtf8))
    }

    /// Skip over `len` bytes.
    fn skip(&mut self, len: usize) -> Result<(), ProtobufError>;

    /// Return the current position of the reader.
    fn position(&self) -> u64;
}

/// A Protocol Buffers primitive reader over a buffered, seekable stream.
pub struct ValueReader<R> {
    inner: R,
}

impl<R: BufRead + Seek + Position> ValueReader<R> {
    /// Create a value reader from an underlying file or buffer.
    ///
    /// See [`from_buf`](Self::from_buf) and [`from_file`](Self::from_file)
    /// for convenient wrappers.
    pub fn new(inner: R) -> Self {
        Self { inner }
    }
}

impl<T: AsRef<[u8]>> ValueReader<Cursor<T>> {
    /// Create a reader from a byte buffer.
    pub fn from_buf(buf: T) -> Self {
        Self::new(Cursor::new(buf))
    }
}

impl ValueReader<ReadPos<BufReader<File>>> {
    /// Create a reader from a file.
    pub fn from_file(file: File) -> Self {
        Self::new(ReadPos::new(BufReader::new(file)))
    }
}

impl<R: BufRead + Seek + Position> ReadValue for ValueReader<R> {
    fn read_i32(&mut self) -> Result<i32, ProtobufError> {
        let mut buf = [0; 4];
        self.inner.read_exact(&mut buf).map_err(eof_error)?;
        Ok(i32::from_le_bytes(buf))
    }

    fn read_i64(&mut self) -> Result<i64, ProtobufError> {
        let mut buf = [0; 8];
        self.inner.read_exact(&mut buf).map_err(eof_error)?;
        Ok(i64::from_le_bytes(buf))
    }

    fn read_varint(&mut self) -> Result<u64, ProtobufError> {
        let value = read_varint(&mut self.inner)?;
        Ok(value)
    }

    fn read_bytes(&mut self, len: usize) -> Result<Vec<u8>, ProtobufError> {
        // Read incrementally rather than allocating `len` bytes up front, as
        // the length comes from the input and may be corrupt.
        let mut buf = Vec::new();
        let n_read = (&mut self.inner).take(len as u64).read_to_end(&mut buf)?;
        if n_read < len {
            return Err(ProtobufError::new(ErrorKind::Eof));
        }
        Ok(buf)
    }

    fn skip(&mut self, len: usize) -> Result<(), ProtobufError> {
        self.inner.seek_relative(len as i64)?;
        Ok(())
    }

    fn position(&self) -> u64 {
        self.inner.position()
    }
}

/// Map an unexpected end-of-file from `read_exact` to [`ErrorKind::Eof`].
fn eof_error(err: std::io::Error) -> ProtobufError {
    if err.kind() == std::io::ErrorKind::UnexpectedEof {
        ProtobufError::new(ErrorKind::Eof)
    } else {
        err.into()
    }
}

/// Trait for readers that can report their current position cheaply.
///
/// This can be implemented for any reader using [`ReadPos`].
pub trait Position {
    fn position(&self) -> u64;
}

impl<T> Position for Cursor<T> {
    fn position(&self) -> u64 {
        Cursor::position(self)
    }
}

/// Reader adapter that tracks the current read position.
pub struct ReadPos<R: Read> {
    inner: R,
    pos: u64,
}

impl<R: Read + Seek> ReadPos<R> {
    pub fn new(inner: R) -> Self {
        Self { inner, pos: 0 }
    }

    pub fn into_inner(self) -> R {
        self.inner
    }
}

impl<R: Read> Read for ReadPos<R> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let n_read = self.inner.read(buf)?;
        self.pos += n_read as u64;
        Ok(n_read)
    }
}

impl<R: Read + Seek> Seek for ReadPos<R> {
    fn seek(&mut self, seek: SeekFrom) -> std::io::Result<u64> {
        match seek {
            SeekFrom::Current(offset) => {
                self.seek_relative(offset)?;
                Ok(self.pos)
            }
            SeekFrom::Start(_) | SeekFrom::End(_) => {
                self.inner.seek(seek)?;
                self.pos = self.inner.stream_position()?;
                Ok(self.pos)
            }
        }
    }

    // Delegating to `seek_relative` keeps `BufReader`'s buffer when the
    // target is already buffered.
    fn seek_relative(&mut self, offset: i64) -> std::io::Result<()> {
        self.inner.seek_relative(offset)?;
        self.pos = (self.pos as i64 + offset) as u64;
        Ok(())
    }
}

impl<R: BufRead> BufRead for ReadPos<R> {
    fn fill_buf(&mut self) -> std::io::Result<&[u8]> {
        self.inner.fill_buf()
    }

    fn consume(&mut self, amount: usize) {
        self.inner.consume(amount);
        self.pos += amount as u64;
    }
}

impl<R: BufRead> Position for ReadPos<R> {
    fn position(&self) -> u64 {
        self.pos
    }
}

/// Wraps a [`ReadValue`] to limit the maximum offset in the stream that can
/// be read up to.
///
/// This is used for reading embedded messages.
pub(crate) struct LimitReader<'a, R: ReadValue> {
    inner: &'a mut R,
    end: u64,
}

impl<'a, R: ReadValue> LimitReader<'a, R> {
    /// Create a reader which reads up to `len` bytes of `inner`.
    pub fn new(inner: &'a mut R, len: u64) -> Self {
        Self {
            end: inner.position().saturating_add(len),
            inner,
        }
    }

    /// Create a sub-reader which reads up to `len` bytes of this reader.
    ///
    /// The sub-reader never extends past the end of this reader.
    pub fn sub_limit(&mut self, len: u64) -> LimitReader<'_, R> {
        LimitReader {
            end: self.inner.position().saturating_add(len).min(self.end),
            inner: self.inner,
        }
    }

    /// Return true if the reader has reached its limit.
    pub fn at_end(&self) -> bool {
        self.inner.position() >= self.end
    }

    /// Return true if this reader is limited only by the end of the stream.
    pub fn is_unbounded(&self) -> bool {
        self.end == u64::MAX
    }

    fn check_has_bytes(&self, len: usize) -> Result<(), ProtobufError> {
        if self.position().saturating_add(len as u64) <= self.end {
            Ok(())
        } else {
            Err(ProtobufError::new(ErrorKind::Eof))
        }
    }
}

impl<R: ReadValue> ReadValue for LimitReader<'_, R> {
    fn read_i32(&mut self) -> Result<i32, ProtobufError> {
        self.check_has_bytes(4)?;
        self.inner.read_i32()
    }

    fn read_i64(&mut self) -> Result<i64, ProtobufError> {
        self.check_has_bytes(8)?;
        self.inner.read_i64()
    }

    fn read_varint(&mut self) -> Result<u64, ProtobufError> {
        // Varints are at least 1 byte long, and can be up to 10.
        self.check_has_bytes(1)?;
        let value = self.inner.read_varint()?;
        if self.position() > self.end {
            return Err(ProtobufError::new(ErrorKind::InvalidVarint));
        }
        Ok(value)
    }

    fn read_bytes(&mut self, len: usize) -> Result<Vec<u8>, ProtobufError> {
        self.check_has_bytes(len)?;
        self.inner.read_bytes(len)
    }

    fn read_string(&mut self, len: usize) -> Result<String, ProtobufError> {
        self.check_has_bytes(len)?;
        self.inner.read_string(len)
    }

    fn skip(&mut self, len: usize) -> Result<(), ProtobufError> {
        self.check_has_bytes(len)?;
        self.inner.skip(len)
    }

    fn position(&self) -> u64 {
        self.inner.position()
    }
}
