use std::error::Error;
use std::fmt::{Display, Formatter};
use std::path::{Path, PathBuf};

use onnx_batchsize_proto::protobuf::ProtobufError;

use crate::cleanup::GraphError;
use crate::infer_shapes::InferShapesError;

/// Errors that occur when initializing the batch size of a model.
#[derive(Debug)]
pub struct InitializeError {
    inner: InitializeErrorImpl,
    path: Option<PathBuf>,
}

impl InitializeError {
    pub(crate) fn new(kind: InitializeErrorImpl) -> Self {
        Self {
            inner: kind,
            path: None,
        }
    }

    pub(crate) fn for_path(path: &Path, kind: InitializeErrorImpl) -> Self {
        Self {
            inner: kind,
            path: Some(path.to_path_buf()),
        }
    }

    /// The model file that this error relates to, if any.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Return the category of error.
    pub fn kind(&self) -> ErrorKind {
        self.inner.kind()
    }
}

impl Display for InitializeError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        if let Some(path) = self.path.as_deref() {
            write!(f, "{}: {}", path.display(), self.inner)
        } else {
            self.inner.fmt(f)
        }
    }
}

impl Error for InitializeError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        self.inner.source()
    }
}

impl From<InitializeErrorImpl> for InitializeError {
    fn from(val: InitializeErrorImpl) -> Self {
        Self::new(val)
    }
}

impl From<GraphError> for InitializeError {
    fn from(val: GraphError) -> Self {
        Self::new(InitializeErrorImpl::GraphError(val))
    }
}

impl From<InferShapesError> for InitializeError {
    fn from(val: InferShapesError) -> Self {
        Self::new(InitializeErrorImpl::ShapeInferenceFailed(val))
    }
}

/// Categories of error when initializing a model.
///
/// See [`InitializeError::kind`].
#[derive(Clone, Copy, Debug, PartialEq)]
#[non_exhaustive]
pub enum ErrorKind {
    /// Required options were missing or invalid. No model was modified.
    Usage,

    /// An I/O error occurred reading or writing a model file.
    Io,

    /// The model file could not be parsed.
    Parse,

    /// The model graph is invalid, eg. it is missing or contains a cycle.
    Graph,

    /// Shape inference failed.
    ShapeInference,
}

/// The internal implementation of [`InitializeError`].
#[derive(Debug)]
pub(crate) enum InitializeErrorImpl {
    /// Neither a model nor a path to load one from was given.
    MissingModel,

    /// The token that replaces the batch size is empty.
    EmptyToken,

    /// The model file could not be opened or created.
    IoFailed(std::io::Error),

    /// The model file could not be decoded.
    ParseFailed(ProtobufError),

    /// The model could not be encoded to the output file.
    WriteFailed(ProtobufError),

    GraphError(GraphError),

    ShapeInferenceFailed(InferShapesError),
}

impl InitializeErrorImpl {
    fn kind(&self) -> ErrorKind {
        type Kind = ErrorKind;

        match self {
            Self::MissingModel | Self::EmptyToken => Kind::Usage,
            Self::IoFailed(_) | Self::WriteFailed(_) => Kind::Io,
            Self::ParseFailed(_) => Kind::Parse,
            Self::GraphError(_) => Kind::Graph,
            Self::ShapeInferenceFailed(_) => Kind::ShapeInference,
        }
    }

    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::MissingModel | Self::EmptyToken => None,
            Self::IoFailed(err) => Some(err),
            Self::ParseFailed(err) | Self::WriteFailed(err) => Some(err),
            Self::GraphError(err) => Some(err),
            Self::ShapeInferenceFailed(err) => Some(err),
        }
    }
}

impl Display for InitializeErrorImpl {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MissingModel => {
                write!(f, "one of an input model path or a model must be specified")
            }
            Self::EmptyToken => write!(f, "the batch size initialization string cannot be empty"),
            Self::IoFailed(e) => write!(f, "io error: {e}"),
            Self::ParseFailed(e) => write!(f, "parse error: {e}"),
            Self::WriteFailed(e) => write!(f, "write error: {e}"),
            Self::GraphError(e) => write!(f, "graph error: {e}"),
            Self::ShapeInferenceFailed(e) => write!(f, "shape inference error: {e}"),
        }
    }
}
