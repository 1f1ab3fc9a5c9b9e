use std::fmt::{Display, Formatter};

use log::trace;
use onnx_batchsize_proto::onnx::{DimValue, GraphProto, ValueInfoProto};

/// Symbolic name that replaces the batch dimension of tensor shapes.
///
/// The token is guaranteed to be non-empty.
#[derive(Clone, Debug, PartialEq)]
pub struct BatchToken(String);

impl BatchToken {
    /// The token used when none is specified.
    pub const DEFAULT: &'static str = "-1";

    /// Create a token, or return `None` if `token` is empty.
    pub fn new(token: impl Into<String>) -> Option<Self> {
        let token = token.into();
        if token.is_empty() {
            None
        } else {
            Some(Self(token))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for BatchToken {
    fn default() -> Self {
        Self(Self::DEFAULT.to_string())
    }
}

impl Display for BatchToken {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// Replace the first dimension of every graph input, output and value info
/// shape with `token`.
///
/// The dimension becomes symbolic (`dim_param`) regardless of whether it was
/// previously fixed or symbolic. Values without a tensor type, or whose shape
/// has no dimensions, are left unchanged.
///
/// Returns the number of values whose shape was changed.
pub fn rewrite_batch_dims(graph: &mut GraphProto, token: &BatchToken) -> usize {
    let values = graph
        .input
        .iter_mut()
        .chain(graph.value_info.iter_mut())
        .chain(graph.output.iter_mut());

    let mut count = 0;
    for value in values {
        if rewrite_value(value, token) {
            count += 1;
        }
    }
    count
}

fn rewrite_value(value: &mut ValueInfoProto, token: &BatchToken) -> bool {
    let Some(batch_dim) = value.shape_mut().and_then(|shape| shape.dim.first_mut()) else {
        trace!("skipping value \"{}\" with unknown rank", value.name());
        return false;
    };
    batch_dim.value = Some(DimValue::Param(token.as_str().to_string()));
    true
}
