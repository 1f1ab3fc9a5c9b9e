use std::fs::File;
use std::io::BufWriter;
use std::path::Path;

use log::debug;
use onnx_batchsize_proto::onnx::ModelProto;
use onnx_batchsize_proto::protobuf::{DecodeMessage, EncodeMessage, ValueReader};

use crate::error::{InitializeError, InitializeErrorImpl};

/// Load an ONNX model from a file.
///
/// The file is parsed incrementally rather than being read into memory first.
pub fn load_model<P: AsRef<Path>>(path: P) -> Result<ModelProto, InitializeError> {
    let path = path.as_ref();
    let file = File::open(path)
        .map_err(|err| InitializeError::for_path(path, InitializeErrorImpl::IoFailed(err)))?;
    let model = ModelProto::decode(ValueReader::from_file(file))
        .map_err(|err| InitializeError::for_path(path, InitializeErrorImpl::ParseFailed(err)))?;
    debug!("loaded model from {}", path.display());
    Ok(model)
}

/// Save an ONNX model to a file, replacing it if it exists.
pub fn save_model<P: AsRef<Path>>(model: &ModelProto, path: P) -> Result<(), InitializeError> {
    let path = path.as_ref();
    let file = File::create(path)
        .map_err(|err| InitializeError::for_path(path, InitializeErrorImpl::IoFailed(err)))?;
    model
        .encode(BufWriter::new(file))
        .map_err(|err| InitializeError::for_path(path, InitializeErrorImpl::WriteFailed(err)))?;
    debug!("saved model to {}", path.display());
    Ok(())
}
