//! Serialize Protocol Buffers fields to a stream.

use std::io::Write;

use crate::protobuf::errors::ProtobufError;
use crate::protobuf::field::WireType;
use crate::protobuf::message::EncodeMessage;
use crate::protobuf::varint::{varint_len, write_varint};

/// Writes fields of a message to an underlying stream.
///
/// Embedded messages are written with a length prefix computed by
/// [`EncodeMessage::encoded_len`], so the whole message never needs to be
/// buffered in memory before being written.
pub struct FieldWriter<W: Write> {
    inner: W,
}

impl<W: Write> FieldWriter<W> {
    pub fn new(inner: W) -> Self {
        Self { inner }
    }

    /// Return the wrapped stream.
    pub fn into_inner(self) -> W {
        self.inner
    }

    /// Flush the underlying stream.
    pub fn flush(&mut self) -> Result<(), ProtobufError> {
        self.inner.flush()?;
        Ok(())
    }

    fn write_tag(&mut self, number: u64, wire_type: WireType) -> Result<(), ProtobufError> {
        write_varint(&mut self.inner, (number << 3) | wire_type as u64)?;
        Ok(())
    }

    fn write_raw_varint(&mut self, value: u64) -> Result<(), ProtobufError> {
        write_varint(&mut self.inner, value)?;
        Ok(())
    }

    /// Write a varint field with a raw unsigned value.
    pub fn write_uint64(&mut self, number: u64, value: u64) -> Result<(), ProtobufError> {
        self.write_tag(number, WireType::Varint)?;
        self.write_raw_varint(value)
    }

    /// Write a field with schema type `int64`.
    pub fn write_int64(&mut self, number: u64, value: i64) -> Result<(), ProtobufError> {
        self.write_uint64(number, value as u64)
    }

    /// Write a field with schema type `int32` or an enum.
    ///
    /// Negative values are sign-extended to 64 bits, as the encoding requires.
    pub fn write_int32(&mut self, number: u64, value: i32) -> Result<(), ProtobufError> {
        self.write_uint64(number, value as i64 as u64)
    }

    /// Write a 32-bit fixed-width field.
    pub fn write_fixed32(&mut self, number: u64, value: i32) -> Result<(), ProtobufError> {
        self.write_tag(number, WireType::I32)?;
        self.inner.write_all(&value.to_le_bytes())?;
        Ok(())
    }

    /// Write a 64-bit fixed-width field.
    pub fn write_fixed64(&mut self, number: u64, value: i64) -> Result<(), ProtobufError> {
        self.write_tag(number, WireType::I64)?;
        self.inner.write_all(&value.to_le_bytes())?;
        Ok(())
    }

    /// Write a field with schema type `float`.
    pub fn write_float(&mut self, number: u64, value: f32) -> Result<(), ProtobufError> {
        self.write_fixed32(number, i32::from_le_bytes(value.to_le_bytes()))
    }

    /// Write a length-delimited field.
    pub fn write_bytes(&mut self, number: u64, bytes: &[u8]) -> Result<(), ProtobufError> {
        self.write_tag(number, WireType::Len)?;
        self.write_raw_varint(bytes.len() as u64)?;
        self.inner.write_all(bytes)?;
        Ok(())
    }

    pub fn write_string(&mut self, number: u64, value: &str) -> Result<(), ProtobufError> {
        self.write_bytes(number, value.as_bytes())
    }

    /// Write a `repeated int64` field using the packed representation.
    ///
    /// Nothing is written if `values` is empty.
    pub fn write_packed_int64(&mut self, number: u64, values: &[i64]) -> Result<(), ProtobufError> {
        if values.is_empty() {
            return Ok(());
        }
        self.write_tag(number, WireType::Len)?;
        self.write_raw_varint(packed_int64_data_len(values) as u64)?;
        for &value in values {
            self.write_raw_varint(value as u64)?;
        }
        Ok(())
    }

    /// Write a `repeated float` field using the packed representation.
    ///
    /// Nothing is written if `values` is empty.
    pub fn write_packed_float(&mut self, number: u64, values: &[f32]) -> Result<(), ProtobufError> {
        if values.is_empty() {
            return Ok(());
        }
        self.write_tag(number, WireType::Len)?;
        self.write_raw_varint((values.len() * 4) as u64)?;
        for value in values {
            self.inner.write_all(&value.to_le_bytes())?;
        }
        Ok(())
    }

    /// Write an embedded message.
    pub fn write_message<M: EncodeMessage>(
        &mut self,
        number: u64,
        msg: &M,
    ) -> Result<(), ProtobufError> {
        self.write_tag(number, WireType::Len)?;
        self.write_raw_varint(msg.encoded_len() as u64)?;
        msg.encode_fields(self)
    }
}

/// Encoded sizes of fields, including the tag.
pub mod len {
    use super::{EncodeMessage, packed_int64_data_len, varint_len};

    fn tag(number: u64) -> usize {
        varint_len(number << 3)
    }

    pub fn uint64(number: u64, value: u64) -> usize {
        tag(number) + varint_len(value)
    }

    pub fn int64(number: u64, value: i64) -> usize {
        uint64(number, value as u64)
    }

    pub fn int32(number: u64, value: i32) -> usize {
        uint64(number, value as i64 as u64)
    }

    pub fn fixed32(number: u64) -> usize {
        tag(number) + 4
    }

    pub fn fixed64(number: u64) -> usize {
        tag(number) + 8
    }

    pub fn bytes(number: u64, len: usize) -> usize {
        tag(number) + varint_len(len as u64) + len
    }

    pub fn packed_int64(number: u64, values: &[i64]) -> usize {
        if values.is_empty() {
            0
        } else {
            bytes(number, packed_int64_data_len(values))
        }
    }

    pub fn packed_float(number: u64, values: &[f32]) -> usize {
        if values.is_empty() {
            0
        } else {
            bytes(number, values.len() * 4)
        }
    }

    pub fn message<M: EncodeMessage>(number: u64, msg: &M) -> usize {
        bytes(number, msg.encoded_len())
    }
}

fn packed_int64_data_len(values: &[i64]) -> usize {
    values.iter().map(|&v| varint_len(v as u64)).sum()
}
