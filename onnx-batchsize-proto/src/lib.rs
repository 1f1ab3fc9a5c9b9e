//! This crate provides a reader and writer for [ONNX][onnx] model files.
//!
//! # About ONNX models
//!
//! ONNX models are [Protocol Buffers][protobuf] messages using the `ModelProto`
//! schema from
//! [onnx.proto](https://github.com/onnx/onnx/blob/main/onnx/onnx.proto3). The
//! `ModelProto` message describes the model structure as a graph of operators,
//! the declared types and shapes of the graph's values, and the weights
//! (`initializer` tensors).
//!
//! # Usage
//!
//! To read a model from a file, edit it and write it back:
//!
//! ```no_run
//! use std::error::Error;
//! use std::fs::File;
//! use std::io::BufWriter;
//!
//! use onnx_batchsize_proto::onnx::ModelProto;
//! use onnx_batchsize_proto::protobuf::{DecodeMessage, EncodeMessage, ValueReader};
//!
//! fn main() -> Result<(), Box<dyn Error>> {
//!     let file = File::open("model.onnx")?;
//!     let mut model = ModelProto::decode(ValueReader::from_file(file))?;
//!
//!     if let Some(graph) = model.graph.as_mut() {
//!         graph.name = Some("renamed".to_string());
//!     }
//!
//!     let out = BufWriter::new(File::create("renamed.onnx")?);
//!     model.encode(out)?;
//!     Ok(())
//! }
//! ```
//!
//! # Design
//!
//! Editing tools must not lose information from the models they process. The
//! message types in [`onnx`] interpret only the fields that are needed to
//! inspect and modify graph structure and tensor shapes. Every other field,
//! including those added by newer versions of the schema, is kept as a raw
//! value in an [`UnknownFields`](protobuf::UnknownFields) store and written
//! back when the message is encoded.
//!
//! Decoding is incremental: values are read from a buffered stream as fields
//! are visited, so a model file does not need to be read into memory before
//! it is parsed. Encoding precomputes the size of every embedded message, so
//! output can be streamed to a file in a single pass.
//!
//! The deprecated group wire types are not supported. ONNX does not use them.
//!
//! [onnx]: https://onnx.ai/onnx/
//! [protobuf]: https://protobuf.dev/

// This is a crate for parsing potentially untrusted files, so it is preferable
// to avoid unsafe code.
#![forbid(unsafe_code)]

pub mod onnx;
pub mod protobuf;
