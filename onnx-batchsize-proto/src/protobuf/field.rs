use crate::protobuf::errors::{ErrorKind, ProtobufError};
use crate::protobuf::value::{LimitReader, ReadValue};

/// Wire-type and associated value of a field.
///
/// See <https://protobuf.dev/programming-guides/encoding/#structure>.
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum FieldValue {
    /// Integer value encoded as a varint.
    Varint(u64),

    /// 64-bit fixed-width value.
    I64(i64),

    /// A variable-length value with a size specified in bytes.
    Len(u64),

    /// Deprecated start-of-group type.
    Sgroup,

    /// Deprecated end-of-group type.
    Egroup,

    /// 32-bit fixed-width value.
    I32(i32),
}

impl FieldValue {
    /// Return the numeric wire type of this value.
    pub fn wire_type(&self) -> WireType {
        match self {
            Self::Varint(_) => WireType::Varint,
            Self::I64(_) => WireType::I64,
            Self::Len(_) => WireType::Len,
            Self::Sgroup => WireType::Sgroup,
            Self::Egroup => WireType::Egroup,
            Self::I32(_) => WireType::I32,
        }
    }
}

/// Wire types defined by the Protocol Buffers encoding.
#[derive(Copy, Clone, Debug, PartialEq)]
#[repr(u8)]
pub enum WireType {
    Varint = 0,
    I64 = 1,
    Len = 2,
    Sgroup = 3,
    Egroup = 4,
    I32 = 5,
}

/// A single field of a message.
///
/// `Field`s are produced by iterating over fields of a message using
/// [`Fields::next`].
///
/// Fields have a number and a value. If the value has a variable length
/// (bytes, string, embedded message, packed repeated field) it must be read
/// with one of the `read_*` methods or skipped using [`skip`](Self::skip)
/// before the next field is requested.
///
/// # Repeated fields
///
/// Repeated fields with a primitive type may use either a packed or un-packed
/// representation. The `read_repeated_*` methods handle both, yielding a
/// single value for an unpacked field or every value in a packed block.
pub struct Field<'r, R: ReadValue> {
    reader: LimitReader<'r, R>,
    number: u64,
    value: FieldValue,

    /// Whether a variable length field has been read or skipped.
    consumed: bool,

    /// Debug name of the message type this field belongs to.
    message: Option<&'static str>,

    /// Unconsumed field ID slot in the parent [`Fields`].
    unconsumed_field: &'r mut Option<u64>,
}

impl<'r, R: ReadValue> Field<'r, R> {
    /// Return the field number.
    pub fn number(&self) -> u64 {
        self.number
    }

    /// Return the field value.
    ///
    /// For variable length fields, this value only includes the length.
    pub fn value(&self) -> FieldValue {
        self.value
    }

    /// Read the bytes in this field.
    pub fn read_bytes(&mut self) -> Result<Vec<u8>, ProtobufError> {
        match self.value {
            FieldValue::Len(len) => {
                self.consume_field()?;
                let len = self.checked_len(len)?;
                self.reader.read_bytes(len).map_err(|err| self.with_context(err))
            }
            _ => Err(self.error(ErrorKind::FieldTypeMismatch)),
        }
    }

    /// Read the UTF-8 encoded string in this field.
    pub fn read_string(&mut self) -> Result<String, ProtobufError> {
        match self.value {
            FieldValue::Len(len) => {
                self.consume_field()?;
                let len = self.checked_len(len)?;
                self.reader.read_string(len).map_err(|err| self.with_context(err))
            }
            _ => Err(self.error(ErrorKind::FieldTypeMismatch)),
        }
    }

    /// Begin reading the embedded message in this field.
    ///
    /// The returned [`Fields`] instance must be fully iterated over before
    /// continuing to read fields from the parent. `message` is the name of the
    /// embedded message type, used to add context to errors.
    pub fn read_message(
        &mut self,
        message: Option<&'static str>,
    ) -> Result<Fields<'_, impl ReadValue>, ProtobufError> {
        match self.value {
            FieldValue::Len(len) => {
                self.consume_field()?;
                Ok(Fields {
                    reader: self.reader.sub_limit(len),
                    message,
                    unconsumed_field: None,
                })
            }
            _ => Err(self.error(ErrorKind::FieldTypeMismatch)),
        }
    }

    /// Skip over the contents of this field.
    ///
    /// Does nothing if the field has a fixed length.
    pub fn skip(&mut self) -> Result<(), ProtobufError> {
        if let FieldValue::Len(len) = self.value {
            self.consume_field()?;
            let len = self.checked_len(len)?;
            self.reader.skip(len).map_err(|err| self.with_context(err))?;
        }
        Ok(())
    }

    fn get_varint(&self) -> Result<u64, ProtobufError> {
        match self.value {
            FieldValue::Varint(val) => Ok(val),
            _ => Err(self.error(ErrorKind::FieldTypeMismatch)),
        }
    }

    /// Get the value of a field with schema type `int32`.
    pub fn get_int32(&self) -> Result<i32, ProtobufError> {
        self.get_varint().map(|v| v as i32)
    }

    /// Get the value of a field where the schema type is an enum.
    pub fn get_enum(&self) -> Result<i32, ProtobufError> {
        self.get_int32()
    }

    /// Get the value of a field with schema type `int64`.
    pub fn get_int64(&self) -> Result<i64, ProtobufError> {
        self.get_varint().map(|v| v as i64)
    }

    /// Get the value of a field with schema type `float`.
    pub fn get_float(&self) -> Result<f32, ProtobufError> {
        match self.value {
            FieldValue::I32(val) => Ok(f32::from_le_bytes(val.to_le_bytes())),
            _ => Err(self.error(ErrorKind::FieldTypeMismatch)),
        }
    }

    /// Get one or multiple values from a `repeated int64` field.
    pub fn read_repeated_int64(
        &mut self,
    ) -> Result<impl Iterator<Item = Result<i64, ProtobufError>>, ProtobufError> {
        let repeated = match self.value {
            FieldValue::Varint(val) => Repeated::Unpacked(Some(val as i64)),
            FieldValue::Len(len) => {
                let consumed = &mut self.consumed;
                let mut reader = self.reader.sub_limit(len);
                let iter = std::iter::from_fn(move || {
                    if reader.at_end() {
                        *consumed = true;
                        return None;
                    }
                    Some(reader.read_varint().map(|val| val as i64))
                });
                Repeated::Packed(iter)
            }
            _ => {
                return Err(self.error(ErrorKind::FieldTypeMismatch));
            }
        };
        Ok(repeated)
    }

    /// Get one or multiple values from a `repeated float` field.
    pub fn read_repeated_float(
        &mut self,
    ) -> Result<impl Iterator<Item = Result<f32, ProtobufError>>, ProtobufError> {
        let repeated = match self.value {
            FieldValue::I32(val) => {
                Repeated::Unpacked(Some(f32::from_le_bytes(val.to_le_bytes())))
            }
            FieldValue::Len(len) => {
                let consumed = &mut self.consumed;
                let mut reader = self.reader.sub_limit(len);
                let iter = std::iter::from_fn(move || {
                    if reader.at_end() {
                        *consumed = true;
                        return None;
                    }
                    Some(
                        reader
                            .read_i32()
                            .map(|val| f32::from_le_bytes(val.to_le_bytes())),
                    )
                });
                Repeated::Packed(iter)
            }
            _ => {
                return Err(self.error(ErrorKind::FieldTypeMismatch));
            }
        };
        Ok(repeated)
    }

    /// Mark a field as having been read.
    fn consume_field(&mut self) -> Result<(), ProtobufError> {
        if !self.consumed {
            self.consumed = true;
            Ok(())
        } else {
            Err(self.error(ErrorKind::FieldAlreadyConsumed))
        }
    }

    fn checked_len(&self, len: u64) -> Result<usize, ProtobufError> {
        len.try_into().map_err(|_| self.error(ErrorKind::Eof))
    }

    fn error(&self, kind: ErrorKind) -> ProtobufError {
        self.with_context(ProtobufError::new(kind))
    }

    fn with_context(&self, err: ProtobufError) -> ProtobufError {
        err.with_context(self.message, Some(self.number))
    }
}

impl<R: ReadValue> Drop for Field<'_, R> {
    fn drop(&mut self) {
        if !self.consumed {
            // Record field number in parent `Fields` so it can report this on
            // the next call to `Fields::next`.
            *self.unconsumed_field = Some(self.number);
        }
    }
}

/// Iterator over a repeated scalar field.
///
/// See <https://protobuf.dev/programming-guides/encoding/#repeated>.
enum Repeated<T: Copy, I: Iterator<Item = Result<T, ProtobufError>>> {
    Unpacked(Option<T>),
    Packed(I),
}

impl<T: Copy, I: Iterator<Item = Result<T, ProtobufError>>> Iterator for Repeated<T, I> {
    type Item = Result<T, ProtobufError>;

    fn next(&mut self) -> Option<Self::Item> {
        match self {
            Self::Unpacked(val) => val.take().map(Ok),
            Self::Packed(packed) => packed.next(),
        }
    }
}

/// Iterator over fields of a message.
///
/// This is a _lending iterator_: each [`Field`] borrows from the `Fields`,
/// so it does not implement [`Iterator`]. Use it with a `while` loop:
///
/// ```
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// use onnx_batchsize_proto::protobuf::{Fields, ValueReader};
///
/// let message = vec![0x08, 0x96, 0x01];
///
/// let mut value_reader = ValueReader::from_buf(message);
/// let mut fields = Fields::new(&mut value_reader, None);
/// while let Some(mut field) = fields.next()? {
///     assert_eq!(field.number(), 1);
///     field.skip()?;
/// }
/// # Ok(()) }
/// ```
pub struct Fields<'r, R: ReadValue> {
    reader: LimitReader<'r, R>,

    /// Debug name of the message type.
    message: Option<&'static str>,

    /// The number of the last variable length field which was dropped without
    /// being consumed. Reported on the next call to `next`.
    unconsumed_field: Option<u64>,
}

impl<'r, R: ReadValue> Fields<'r, R> {
    /// Read a top-level message from `reader`.
    ///
    /// `message` is the name of the message type being read, for debugging
    /// purposes.
    pub fn new(reader: &'r mut R, message: Option<&'static str>) -> Self {
        Self {
            reader: LimitReader::new(reader, u64::MAX),
            message,
            unconsumed_field: None,
        }
    }

    /// Read the next field of the message.
    ///
    /// Returns `Ok(None)` once the end of the message is reached.
    #[allow(clippy::should_implement_trait)] // Not an Iterator because this borrows from self.
    pub fn next(&mut self) -> Result<Option<Field<'_, R>>, ProtobufError> {
        if let Some(number) = self.unconsumed_field {
            return Err(ProtobufError::new(ErrorKind::FieldNotConsumed)
                .with_context(self.message, Some(number)));
        }

        if self.reader.at_end() {
            return Ok(None);
        }

        // Running out of input is only a valid end for a top-level message.
        // Embedded messages must end exactly at their length prefix.
        let tag = match self.reader.read_varint() {
            Ok(tag) => tag,
            Err(err) if matches!(err.kind(), ErrorKind::Eof) && self.reader.is_unbounded() => {
                return Ok(None);
            }
            Err(err) => return Err(err.with_context(self.message, None)),
        };
        let number = tag >> 3;
        let wire_type = tag & 0x7;

        let mut len = 0;
        let value = match wire_type {
            0 => self.reader.read_varint().map(FieldValue::Varint),
            1 => self.reader.read_i64().map(FieldValue::I64),
            2 => self.reader.read_varint().map(|val| {
                len = val;
                FieldValue::Len(val)
            }),
            3 => Ok(FieldValue::Sgroup),
            4 => Ok(FieldValue::Egroup),
            5 => self.reader.read_i32().map(FieldValue::I32),
            _ => Err(ProtobufError::new(ErrorKind::InvalidWireType)),
        }
        .map_err(|err| err.with_context(self.message, Some(number)))?;

        Ok(Some(Field {
            reader: self.reader.sub_limit(len),
            number,
            consumed: !matches!(value, FieldValue::Len(_)),
            value,
            message: self.message,
            unconsumed_field: &mut self.unconsumed_field,
        }))
    }
}
