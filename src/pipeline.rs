use std::path::PathBuf;

use log::debug;
use onnx_batchsize_proto::onnx::ModelProto;

use crate::batch_dim::{BatchToken, rewrite_batch_dims};
use crate::cleanup::{GraphError, cleanup, toposort};
use crate::color::info_message;
use crate::error::{InitializeError, InitializeErrorImpl};
use crate::infer_shapes::{InferShapesOptions, infer_shapes};
use crate::model_io::{load_model, save_model};
use crate::reshape::patch_reshape_shapes;
use crate::simplify::simplify;

/// Options for [`initialize`].
#[derive(Clone, Debug)]
pub struct InitializeOptions {
    /// Path of the model to load. Ignored if [`model`](Self::model) is set.
    pub input_path: Option<PathBuf>,

    /// Model to process.
    ///
    /// The model is consumed by [`initialize`], including when it fails. Use
    /// [`BatchToken::new`] to check a token before handing over a model that
    /// is needed afterwards.
    pub model: Option<ModelProto>,

    /// Path to save the updated model to. If not set, the model is only
    /// returned.
    pub output_path: Option<PathBuf>,

    /// Symbolic name for the batch dimension, eg. "-1", "N" or "batch".
    pub token: String,

    /// Suppress the message printed when processing completes.
    pub non_verbose: bool,
}

impl Default for InitializeOptions {
    fn default() -> Self {
        Self {
            input_path: None,
            model: None,
            output_path: None,
            token: BatchToken::DEFAULT.to_string(),
            non_verbose: false,
        }
    }
}

impl InitializeOptions {
    /// Create options which load the model from `path`.
    pub fn from_path(path: impl Into<PathBuf>) -> Self {
        Self {
            input_path: Some(path.into()),
            ..Default::default()
        }
    }

    /// Create options which process an in-memory model.
    pub fn from_model(model: ModelProto) -> Self {
        Self {
            model: Some(model),
            ..Default::default()
        }
    }
}

/// Make the batch dimension of a model dynamic.
///
/// The model is processed in these steps:
///
/// 1. Load the model, unless one was passed in the options.
/// 2. [Simplify](crate::simplify) the model. If simplification fails, the
///    unsimplified model is used.
/// 3. Remove unused nodes and values, and sort nodes topologically.
/// 4. Replace the first dimension of every graph input, output and value info
///    with the batch token.
/// 5. Set the first element of every `Reshape` target shape initializer to
///    -1.
/// 6. If the graph has value infos, re-run shape inference to update them.
/// 7. Save the model, if an output path was given.
///
/// Returns the updated model. Usage errors, such as an empty token, are
/// reported before any model is loaded.
pub fn initialize(options: InitializeOptions) -> Result<ModelProto, InitializeError> {
    let InitializeOptions {
        input_path,
        model,
        output_path,
        token,
        non_verbose,
    } = options;

    let input_path = input_path.filter(|path| !path.as_os_str().is_empty());
    if model.is_none() && input_path.is_none() {
        return Err(InitializeErrorImpl::MissingModel.into());
    }
    let token = BatchToken::new(token).ok_or(InitializeErrorImpl::EmptyToken)?;

    let model = match (model, input_path) {
        (Some(model), _) => model,
        (None, Some(path)) => load_model(path)?,
        (None, None) => return Err(InitializeErrorImpl::MissingModel.into()),
    };

    let mut model = match simplify(&model) {
        Ok(simplified) => simplified,
        Err(err) => {
            debug!("using unsimplified model: {}", err);
            model
        }
    };

    let graph = model.graph.as_mut().ok_or(GraphError::MissingGraph)?;
    cleanup(graph);
    toposort(graph)?;

    let n_values = rewrite_batch_dims(graph, &token);
    let n_shapes = patch_reshape_shapes(graph);
    debug!(
        "set batch dim of {} values to \"{}\" and patched {} reshape shapes",
        n_values, token, n_shapes
    );

    if !graph.value_info.is_empty() {
        infer_shapes(graph, InferShapesOptions::default())?;
    }

    if let Some(path) = output_path.filter(|path| !path.as_os_str().is_empty()) {
        save_model(&model, path)?;
    }

    if !non_verbose {
        println!("{}", info_message("Finish!"));
    }

    Ok(model)
}
