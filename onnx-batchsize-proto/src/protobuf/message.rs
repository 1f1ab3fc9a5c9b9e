use std::io::Write;

use crate::protobuf::{Field, FieldWriter, Fields, ProtobufError, ReadValue};

/// Defines how to deserialize a type from an encoded message.
///
/// # Usage
///
/// Given the Protocol Buffers schema:
///
/// ```proto
/// message Message {
///     int64 int_field = 1;
///     string string_field = 2;
/// }
/// ```
///
/// A decoder could be written as follows:
///
/// ```
/// use onnx_batchsize_proto::protobuf::{
///     DecodeMessage, Fields, ProtobufError, ReadValue, UnknownFields, ValueReader,
/// };
///
/// #[derive(Default)]
/// struct Message {
///     int_field: Option<i64>,
///     string_field: Option<String>,
///     unknown: UnknownFields,
/// }
///
/// impl Message {
///     const INT_FIELD: u64 = 1;
///     const STRING_FIELD: u64 = 2;
/// }
///
/// impl DecodeMessage for Message {
///     fn decode_fields<R: ReadValue>(mut fields: Fields<R>) -> Result<Self, ProtobufError> {
///         let mut msg = Message::default();
///         while let Some(mut field) = fields.next()? {
///             match field.number() {
///                 Self::INT_FIELD => msg.int_field = Some(field.get_int64()?),
///                 Self::STRING_FIELD => msg.string_field = Some(field.read_string()?),
///                 // Keep everything else so it can be written back out.
///                 _ => msg.unknown.read(&mut field)?,
///             }
///         }
///         Ok(msg)
///     }
/// }
///
/// fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let message: &[u8] = &[
///         0x08, 0x96, 0x01, // int_field = 150
///         0x12, 0x02, 0x68, 0x69, // string_field = "hi"
///         0x18, 0x01, // field 3, not part of the schema above
///     ];
///     let msg = Message::decode(ValueReader::from_buf(message))?;
///
///     assert_eq!(msg.int_field, Some(150));
///     assert_eq!(msg.string_field.as_deref(), Some("hi"));
///     assert_eq!(msg.unknown.len(), 1);
///
///     Ok(())
/// }
/// ```
pub trait DecodeMessage: Sized {
    /// Decode a message from a reader.
    fn decode<R: ReadValue>(mut reader: R) -> Result<Self, ProtobufError> {
        let ctx = Some(std::any::type_name::<Self>());
        Self::decode_fields(Fields::new(&mut reader, ctx))
    }

    /// Decode a message from an iterator over message fields.
    fn decode_fields<R: ReadValue>(fields: Fields<R>) -> Result<Self, ProtobufError>;

    /// Decode a message stored in a field in a parent message.
    fn decode_field<R: ReadValue>(field: &mut Field<R>) -> Result<Self, ProtobufError> {
        let ctx = Some(std::any::type_name::<Self>());
        Self::decode_fields(field.read_message(ctx)?)
    }
}

/// Defines how to serialize a type as a message.
///
/// Implementations must keep [`encoded_len`](EncodeMessage::encoded_len) in
/// agreement with the bytes produced by
/// [`encode_fields`](EncodeMessage::encode_fields), since the length is used
/// as the prefix of embedded messages.
pub trait EncodeMessage {
    /// Return the size of the encoded fields in bytes.
    fn encoded_len(&self) -> usize;

    /// Write all fields of the message.
    fn encode_fields<W: Write>(&self, writer: &mut FieldWriter<W>) -> Result<(), ProtobufError>;

    /// Encode the message to a stream.
    fn encode<W: Write>(&self, out: W) -> Result<(), ProtobufError> {
        let mut writer = FieldWriter::new(out);
        self.encode_fields(&mut writer)?;
        writer.flush()
    }

    /// Encode the message into a new buffer.
    fn encode_to_vec(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.encoded_len());
        // Writes to a `Vec` are infallible.
        let _ = self.encode(&mut buf);
        buf
    }
}
