//! Storage for fields that a decoder does not interpret.

use std::io::Write;

use crate::protobuf::errors::{ErrorKind, ProtobufError};
use crate::protobuf::field::{Field, FieldValue};
use crate::protobuf::value::ReadValue;
use crate::protobuf::write::{FieldWriter, len};

/// Raw value of a field kept by [`UnknownFields`].
#[derive(Clone, Debug, PartialEq)]
pub enum UnknownValue {
    Varint(u64),
    I64(i64),
    I32(i32),
    Len(Vec<u8>),
}

/// A field kept verbatim so that it can be re-encoded.
#[derive(Clone, Debug, PartialEq)]
pub struct UnknownField {
    pub number: u64,
    pub value: UnknownValue,
}

/// Fields of a message which a decoder did not interpret.
///
/// Decoders that need to write a message back out after modifying it store
/// every field they don't recognize here instead of skipping it. When the
/// message is encoded the fields are written after the known fields, in the
/// order they were read.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct UnknownFields {
    fields: Vec<UnknownField>,
}

impl UnknownFields {
    pub fn new() -> Self {
        Self::default()
    }

    /// Consume `field` and store its value.
    pub fn read<R: ReadValue>(&mut self, field: &mut Field<R>) -> Result<(), ProtobufError> {
        let value = match field.value() {
            FieldValue::Varint(val) => UnknownValue::Varint(val),
            FieldValue::I64(val) => UnknownValue::I64(val),
            FieldValue::I32(val) => UnknownValue::I32(val),
            FieldValue::Len(_) => UnknownValue::Len(field.read_bytes()?),
            FieldValue::Sgroup | FieldValue::Egroup => {
                return Err(ProtobufError::new(ErrorKind::UnsupportedGroup)
                    .with_context(None, Some(field.number())));
            }
        };
        self.fields.push(UnknownField {
            number: field.number(),
            value,
        });
        Ok(())
    }

    pub fn push(&mut self, field: UnknownField) {
        self.fields.push(field);
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &UnknownField> {
        self.fields.iter()
    }

    /// Return the unknown fields with a given number.
    pub fn get(&self, number: u64) -> impl Iterator<Item = &UnknownValue> {
        self.fields
            .iter()
            .filter(move |f| f.number == number)
            .map(|f| &f.value)
    }

    pub fn encoded_len(&self) -> usize {
        self.fields
            .iter()
            .map(|field| match &field.value {
                UnknownValue::Varint(val) => len::uint64(field.number, *val),
                UnknownValue::I64(_) => len::fixed64(field.number),
                UnknownValue::I32(_) => len::fixed32(field.number),
                UnknownValue::Len(bytes) => len::bytes(field.number, bytes.len()),
            })
            .sum()
    }

    pub fn encode<W: Write>(&self, writer: &mut FieldWriter<W>) -> Result<(), ProtobufError> {
        for field in &self.fields {
            match &field.value {
                UnknownValue::Varint(val) => writer.write_uint64(field.number, *val)?,
                UnknownValue::I64(val) => writer.write_fixed64(field.number, *val)?,
                UnknownValue::I32(val) => writer.write_fixed32(field.number, *val)?,
                UnknownValue::Len(bytes) => writer.write_bytes(field.number, bytes)?,
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::{UnknownFields, UnknownValue};
    use crate::protobuf::{ErrorKind, FieldWriter, Fields, ValueReader};

    fn read_unknown(buf: &[u8]) -> Result<UnknownFields, crate::protobuf::ProtobufError> {
        let mut reader = ValueReader::from_buf(buf);
        let mut fields = Fields::new(&mut reader, Some("TestMessage"));
        let mut unknown = UnknownFields::new();
        while let Some(mut field) = fields.next()? {
            unknown.read(&mut field)?;
        }
        Ok(unknown)
    }

    #[test]
    fn test_unknown_fields_round_trip() {
        let mut writer = FieldWriter::new(Vec::new());
        writer.write_int64(1, -5).unwrap();
        writer.write_string(6, "doc").unwrap();
        writer.write_fixed32(2, 7).unwrap();
        writer.write_fixed64(3, 9).unwrap();
        writer.write_string(6, "more doc").unwrap();
        let buf = writer.into_inner();

        let unknown = read_unknown(&buf).unwrap();
        assert_eq!(unknown.len(), 5);
        assert_eq!(unknown.encoded_len(), buf.len());

        let docs: Vec<_> = unknown.get(6).collect();
        assert_eq!(
            docs,
            [
                &UnknownValue::Len(b"doc".to_vec()),
                &UnknownValue::Len(b"more doc".to_vec())
            ]
        );

        let mut writer = FieldWriter::new(Vec::new());
        unknown.encode(&mut writer).unwrap();
        assert_eq!(writer.into_inner(), buf);
    }

    #[test]
    fn test_group_is_rejected() {
        // Field 5 with the start-group wire type.
        let buf = [(5u8 << 3) | 3];
        let err = read_unknown(&buf).err().unwrap();
        assert!(matches!(err.kind(), ErrorKind::UnsupportedGroup));
        assert_eq!(err.field(), Some(5));
    }
}
