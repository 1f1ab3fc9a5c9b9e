//! onnx-batchsize makes the batch dimension of [ONNX](https://onnx.ai) models
//! dynamic.
//!
//! Models exported with a fixed batch size, such as `[4, 3, 224, 224]`, can
//! only be run with that batch size. This crate rewrites the first dimension
//! of the model's inputs, outputs and intermediate values to a symbolic name
//! (eg. `["N", 3, 224, 224]`) and updates the target shapes of `Reshape`
//! operators so that they no longer hard-code the batch size.
//!
//! # Usage
//!
//! ```no_run
//! use onnx_batchsize::{InitializeOptions, initialize};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let model = initialize(InitializeOptions {
//!     output_path: Some("model_dynamic.onnx".into()),
//!     token: "N".to_string(),
//!     ..InitializeOptions::from_path("model.onnx")
//! })?;
//! # Ok(())
//! # }
//! ```
//!
//! The individual passes used by [`initialize`] are also available for use
//! with models that are already loaded. See the [`batch_dim`], [`reshape`],
//! [`simplify`], [`cleanup`] and [`infer_shapes`] modules.
//!
//! # Limitations
//!
//! The first dimension of every value is assumed to be the batch dimension.
//! Only `Reshape` target shapes that are stored as initializers are updated.
//! Shapes computed at runtime by other operators are left unchanged.

mod error;
mod model_io;
mod pipeline;

pub mod batch_dim;
pub mod cleanup;
pub mod color;
pub mod infer_shapes;
pub mod reshape;
pub mod simplify;

pub use batch_dim::BatchToken;
pub use error::{ErrorKind, InitializeError};
pub use model_io::{load_model, save_model};
pub use pipeline::{InitializeOptions, initialize};

/// Re-export of the ONNX message types used in this crate's APIs.
pub use onnx_batchsize_proto::onnx;

#[cfg(test)]
mod test_util;
