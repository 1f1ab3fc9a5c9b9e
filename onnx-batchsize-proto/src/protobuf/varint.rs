//! Read and write varints.
//!
//! Variable length integers (_varints_) are the default encoding of integers
//! in Protocol Buffers messages, including field tags and numbers.
//!
//! See <https://protobuf.dev/programming-guides/encoding/#varints>.

use std::io::{BufRead, Write};

/// Maximum number of bytes for an encoded varint.
///
/// A decoded varint is a u64 value. Each byte contains 7 value bits and one
/// continuation bit. Hence we need 9 "full" bytes plus one bit from the 10th byte.
pub const MAX_VARINT_LEN: usize = 10;

#[derive(Debug)]
pub enum VarintError {
    /// The input reader is already at the end of stream.
    Eof,
    /// The varint length exceeds 64-bits, or the end of the stream was reached
    /// before a full varint was read.
    InvalidVarint,
    /// An IO error was encountered while reading from the input reader.
    IoError(std::io::Error),
}

impl From<std::io::Error> for VarintError {
    fn from(val: std::io::Error) -> Self {
        Self::IoError(val)
    }
}

/// Read a varint value of up to 64-bits.
///
/// This will read between one and ten bytes from `src`.
pub fn read_varint<R: BufRead>(mut src: R) -> Result<u64, VarintError> {
    let mut index = 0;
    let mut value = 0;

    'outer: loop {
        let buf = src.fill_buf()?;
        if buf.is_empty() {
            return Err(if index == 0 {
                VarintError::Eof
            } else {
                VarintError::InvalidVarint
            });
        }

        let buf_len = buf.len().min(MAX_VARINT_LEN - index);
        let buf = &buf[..buf_len];

        for (i, byte) in buf.iter().copied().enumerate() {
            // High bit is continuation bit. Low 7 bits are the payload.
            value |= ((byte & 0x7f) as u64) << (index * 7);
            if byte <= 0x7f {
                // Only one value bit from the last byte may be used.
                if index + 1 == MAX_VARINT_LEN && byte > 0x01 {
                    break 'outer;
                }
                src.consume(i + 1);
                return Ok(value);
            }
            index += 1;
        }

        src.consume(buf_len);
        if index >= MAX_VARINT_LEN {
            break;
        }
    }

    Err(VarintError::InvalidVarint)
}

/// Encode `val` as a varint into a fixed-size buffer.
///
/// Returns the buffer and the number of bytes used.
pub fn encode_varint(mut val: u64) -> ([u8; MAX_VARINT_LEN], usize) {
    let mut bytes = [0u8; MAX_VARINT_LEN];
    let mut len = 0;

    loop {
        let byte = (val & 0x7f) as u8;
        val >>= 7;
        if val == 0 {
            bytes[len] = byte;
            len += 1;
            break;
        }
        bytes[len] = byte | 0x80;
        len += 1;
    }

    (bytes, len)
}

/// Write `val` as a varint to `dst`.
pub fn write_varint<W: Write>(mut dst: W, val: u64) -> std::io::Result<()> {
    let (bytes, len) = encode_varint(val);
    dst.write_all(&bytes[..len])
}

/// Return the number of bytes needed to encode `val` as a varint.
pub fn varint_len(val: u64) -> usize {
    // Each byte holds 7 bits. Zero still needs one byte.
    let bits = 64 - val.leading_zeros() as usize;
    bits.max(1).div_ceil(7)
}

#[cfg(test)]
mod tests {
    use std::io::{BufRead, Cursor, Read};

    use onnx_batchsize_testing::TestCases;

    use super::{VarintError, encode_varint, read_varint, varint_len, write_varint};

    fn to_vec(val: u64) -> Vec<u8> {
        let mut buf = Vec::new();
        write_varint(&mut buf, val).unwrap();
        buf
    }

    /// Like `Cursor`, but behaves as if the internal buffer only has a capacity
    /// of one.
    struct OneByteCursor<'a> {
        buf: &'a [u8],
    }

    impl Read for OneByteCursor<'_> {
        fn read(&mut self, _buf: &mut [u8]) -> std::io::Result<usize> {
            unimplemented!("unexpected call")
        }
    }

    impl BufRead for OneByteCursor<'_> {
        fn fill_buf(&mut self) -> std::io::Result<&[u8]> {
            let len = self.buf.len().min(1);
            Ok(&self.buf[..len])
        }

        fn consume(&mut self, len: usize) {
            assert!(len <= 1);
            (_, self.buf) = self.buf.split_at(len);
        }
    }

    #[test]
    fn test_read_write_varint() {
        let mut values: Vec<u64> = (0..1024).collect();
        values.extend([u32::MAX as u64, (-1i64) as u64, u64::MAX]);
        for val in values {
            let buf = to_vec(val);
            assert_eq!(buf.len(), varint_len(val));
            let decoded_val = read_varint(&mut Cursor::new(buf)).unwrap();
            assert_eq!(decoded_val, val);
        }
    }

    #[test]
    fn test_varint_len() {
        #[derive(Debug)]
        struct Case {
            val: u64,
            len: usize,
        }

        let cases = [
            Case { val: 0, len: 1 },
            Case { val: 127, len: 1 },
            Case { val: 128, len: 2 },
            Case { val: 16_383, len: 2 },
            Case { val: 16_384, len: 3 },
            Case {
                val: u64::MAX,
                len: 10,
            },
        ];

        cases.test_each(|&Case { val, len }| {
            assert_eq!(varint_len(val), len);
            assert_eq!(encode_varint(val).1, len);
        })
    }

    #[test]
    fn test_read_varint_sequence() {
        // Example from https://protobuf.dev/programming-guides/encoding/#simple.
        let mut cur = Cursor::new(vec![0x08, 0x96, 0x01]);
        assert_eq!(read_varint(&mut cur).unwrap(), 8);
        assert_eq!(read_varint(&mut cur).unwrap(), 150);
        assert!(matches!(read_varint(&mut cur), Err(VarintError::Eof)));
    }

    #[test]
    fn test_read_varint_refill() {
        let val = 65535;
        let buf = to_vec(val);
        let mut cur = OneByteCursor { buf: &buf };
        assert_eq!(read_varint(&mut cur).unwrap(), val);
    }

    #[test]
    fn test_truncated_varint() {
        // Continuation bit set on the final byte of the stream.
        let decoded = read_varint(&mut Cursor::new(vec![0x96]));
        assert!(matches!(decoded, Err(VarintError::InvalidVarint)));
    }

    #[test]
    fn test_invalid_varint() {
        let mut buf = to_vec(u64::MAX);
        assert_eq!(buf.len(), 10);
        buf[9] += 1;
        let decoded = read_varint(&mut Cursor::new(buf));
        assert!(matches!(decoded, Err(VarintError::InvalidVarint)));
    }
}
