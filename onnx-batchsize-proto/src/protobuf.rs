//! Low-level incremental Protocol Buffers message codec.
//!
//! This module provides a low-level API for decoding [Protocol
//! Buffers](https://protobuf.dev/) messages from a buffered reader and
//! encoding them to a writer. Decoders have control over which types are used
//! for message fields and which fields are interpreted. Fields that are not
//! interpreted can be kept in [`UnknownFields`] so that a modified message can
//! be written back out without losing data.
//!
//! See <https://protobuf.dev/programming-guides/encoding/> for a guide to the
//! wire format.
//!
//! # Decoding
//!
//! Implement [`DecodeMessage`] for the type to deserialize into. The
//! implementation uses [`Fields`] to visit each field of the message. To
//! decode a message:
//!
//! 1. Create a buffered reader (eg. `BufReader<File>` for a file or `Cursor`
//!    for an in-memory buffer)
//! 2. Wrap it in a [`ReadPos`] to add position tracking, unless the reader
//!    already provides this (eg. `Cursor`)
//! 3. Create a [`ValueReader`] that wraps the buffered reader
//! 4. Call [`DecodeMessage::decode`]
//!
//! # Encoding
//!
//! Implement [`EncodeMessage`] and call [`EncodeMessage::encode`] with any
//! [`Write`](std::io::Write) implementation. Embedded messages are prefixed
//! with their length, computed ahead of time, so output can be streamed.

mod errors;
mod field;
mod message;
mod unknown;
mod value;
pub mod varint;
mod write;

pub use errors::{ErrorKind, ProtobufError};
pub use field::{Field, FieldValue, Fields, WireType};
pub use message::{DecodeMessage, EncodeMessage};
pub use unknown::{UnknownField, UnknownFields, UnknownValue};
pub use value::{Position, ReadPos, ReadValue, ValueReader};
pub use write::{FieldWriter, len};
