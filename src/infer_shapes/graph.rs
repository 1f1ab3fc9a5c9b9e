use std::error::Error;
use std::fmt::{Display, Formatter};

use log::{debug, trace};
use onnx_batchsize_proto::onnx::{
    DataType, Dimension, GraphProto, TensorProto, TensorShapeProto, TypeProto, TypeProtoTensor,
    ValueInfoProto,
};
use rustc_hash::FxHashMap;

use super::ops::op_for_node;
use super::{OpShapeError, SymDim, SymTensor};
use crate::cleanup::node_label;
use crate::reshape::raw_to_i64s;

/// Maximum number of elements in an INT64 initializer whose value is used
/// during inference.
const MAX_VALUE_LEN: i64 = 64;

/// Options for [`infer_shapes`].
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct InferShapesOptions {
    /// Fail if an operator's inputs are invalid, or if an inferred shape
    /// conflicts with an existing annotation.
    ///
    /// Otherwise such failures are logged and the affected values keep their
    /// existing annotations.
    pub strict: bool,
}

/// Errors returned by [`infer_shapes`] in strict mode.
#[derive(Clone, Debug, PartialEq)]
pub enum InferShapesError {
    /// Shape inference for a node failed.
    Op {
        node: String,
        op_type: String,
        error: OpShapeError,
    },

    /// An inferred dimension size differs from the annotated size.
    DimMismatch {
        value: String,
        axis: usize,
        annotated: i64,
        inferred: i64,
    },

    /// An inferred rank differs from the annotated rank.
    RankMismatch {
        value: String,
        annotated: usize,
        inferred: usize,
    },
}

impl Display for InferShapesError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Op {
                node,
                op_type,
                error,
            } => write!(f, "{} node \"{}\": {}", op_type, node, error),
            Self::DimMismatch {
                value,
                axis,
                annotated,
                inferred,
            } => write!(
                f,
                "value \"{}\" has size {} in dim {} but size {} was inferred",
                value, annotated, axis, inferred
            ),
            Self::RankMismatch {
                value,
                annotated,
                inferred,
            } => write!(
                f,
                "value \"{}\" has rank {} but rank {} was inferred",
                value, annotated, inferred
            ),
        }
    }
}

impl Error for InferShapesError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Op { error, .. } => Some(error),
            Self::DimMismatch { .. } | Self::RankMismatch { .. } => None,
        }
    }
}

/// Return the type, shape and (for small INT64 tensors) value of an
/// initializer.
fn initializer_info(init: &TensorProto) -> SymTensor {
    let numel: i64 = init.dims.iter().product();
    let value = if init.data_type == Some(DataType::INT64)
        && !init.is_external()
        && numel <= MAX_VALUE_LEN
    {
        let data = if !init.int64_data.is_empty() {
            init.int64_data.clone()
        } else {
            raw_to_i64s(init.raw_data.as_deref().unwrap_or_default())
        };
        (data.len() as i64 == numel).then_some(data)
    } else {
        None
    };

    SymTensor {
        elem_type: init.data_type,
        shape: Some(init.dims.iter().map(|&size| SymDim::Fixed(size)).collect()),
        value,
    }
}

/// Return the type and shape of a value from its annotation.
fn annotated_info(value: &ValueInfoProto) -> SymTensor {
    SymTensor {
        elem_type: value.elem_type().filter(|t| *t != DataType::UNDEFINED),
        shape: value
            .shape()
            .map(|shape| shape.dim.iter().map(SymDim::from).collect()),
        value: None,
    }
}

/// Combine an inferred dimension with an annotated one.
///
/// Fixed sizes take precedence over names, and names over unknown sizes.
/// Returns the conflicting sizes if the dimensions have different fixed sizes.
fn merge_dim(annotated: &SymDim, inferred: SymDim) -> Result<SymDim, (i64, i64)> {
    let dim = match (annotated, inferred) {
        (SymDim::Fixed(a), SymDim::Fixed(b)) if *a != b => return Err((*a, b)),
        (_, SymDim::Fixed(size)) => SymDim::Fixed(size),
        (SymDim::Unknown, SymDim::Named(name)) => SymDim::Named(name),
        (annotated, _) => annotated.clone(),
    };
    Ok(dim)
}

/// Combine the inferred type and shape of a value with its annotation.
fn merge(
    name: &str,
    annotated: &SymTensor,
    inferred: SymTensor,
) -> Result<SymTensor, InferShapesError> {
    let shape = match (&annotated.shape, inferred.shape) {
        (None, shape) => shape,
        (Some(annotated), None) => Some(annotated.clone()),
        (Some(annotated), Some(inferred)) => {
            if annotated.len() != inferred.len() {
                return Err(InferShapesError::RankMismatch {
                    value: name.to_string(),
                    annotated: annotated.len(),
                    inferred: inferred.len(),
                });
            }
            let mut shape = Vec::with_capacity(annotated.len());
            for (axis, (annotated_dim, inferred_dim)) in annotated.iter().zip(inferred).enumerate()
            {
                let dim = merge_dim(annotated_dim, inferred_dim).map_err(|(annotated, inferred)| {
                    InferShapesError::DimMismatch {
                        value: name.to_string(),
                        axis,
                        annotated,
                        inferred,
                    }
                })?;
                shape.push(dim);
            }
            Some(shape)
        }
    };

    Ok(SymTensor {
        elem_type: annotated.elem_type.or(inferred.elem_type),
        shape,
        value: inferred.value,
    })
}

/// Set the type and shape of a graph output or value info to `info`, or add a
/// value info if there is none.
///
/// Returns true if the graph was changed.
fn update_value_info(graph: &mut GraphProto, name: &str, info: &SymTensor) -> bool {
    let dims = |shape: &[SymDim]| shape.iter().map(Dimension::from).collect::<Vec<_>>();

    let existing = graph
        .output
        .iter_mut()
        .chain(graph.value_info.iter_mut())
        .find(|value| value.name() == name);

    let Some(value) = existing else {
        let shape = info.shape.as_deref().map(|shape| TensorShapeProto {
            dim: dims(shape),
            ..Default::default()
        });
        graph.value_info.push(ValueInfoProto {
            name: Some(name.to_string()),
            r#type: Some(TypeProto {
                tensor_type: Some(TypeProtoTensor {
                    elem_type: info.elem_type,
                    shape,
                    ..Default::default()
                }),
                ..Default::default()
            }),
            ..Default::default()
        });
        return true;
    };

    let before = value.clone();
    let tensor_type = value
        .r#type
        .get_or_insert_with(TypeProto::default)
        .tensor_type
        .get_or_insert_with(TypeProtoTensor::default);
    if info.elem_type.is_some() {
        tensor_type.elem_type = info.elem_type;
    }
    if let Some(shape) = &info.shape {
        let existing = tensor_type.shape.get_or_insert_with(TensorShapeProto::default);
        if existing.dim.len() == shape.len() {
            // Update dims in place to preserve any other fields they have.
            for (dim, sym_dim) in existing.dim.iter_mut().zip(shape) {
                dim.value = Dimension::from(sym_dim).value;
            }
        } else {
            existing.dim = dims(shape);
        }
    }
    *value != before
}

/// Infer the element types and shapes of values produced by nodes in `graph`.
///
/// Nodes must be topologically sorted. The types and shapes of graph inputs
/// and initializers are taken as given and never modified. Results are
/// recorded by updating the graph's outputs and `value_info`, adding new
/// `value_info` entries for intermediate values that have none.
///
/// Operators which are not supported, including those in custom domains,
/// produce outputs whose existing annotations are kept.
///
/// Returns the number of graph outputs and value infos that were added or
/// updated.
pub fn infer_shapes(
    graph: &mut GraphProto,
    opts: InferShapesOptions,
) -> Result<usize, InferShapesError> {
    let mut known: FxHashMap<String, SymTensor> = FxHashMap::default();
    for init in &graph.initializer {
        if let Some(name) = &init.name {
            known.insert(name.clone(), initializer_info(init));
        }
    }
    for input in &graph.input {
        known
            .entry(input.name().to_string())
            .or_insert_with(|| annotated_info(input));
    }

    let annotations: FxHashMap<String, SymTensor> = graph
        .value_info
        .iter()
        .chain(&graph.output)
        .map(|value| (value.name().to_string(), annotated_info(value)))
        .collect();

    let mut produced = Vec::new();
    for node in &graph.node {
        // Trailing omitted inputs are dropped. Other omitted inputs are
        // passed as unknown values.
        let n_inputs = node
            .input
            .iter()
            .rposition(|name| !name.is_empty())
            .map_or(0, |pos| pos + 1);
        let inputs: Vec<SymTensor> = node.input[..n_inputs]
            .iter()
            .map(|name| known.get(name).cloned().unwrap_or_default())
            .collect();

        let outputs = match op_for_node(node) {
            Some(op) => match op.infer_shapes(&inputs) {
                Ok(outputs) => outputs,
                Err(error) if opts.strict => {
                    return Err(InferShapesError::Op {
                        node: node_label(node),
                        op_type: node.op_type().to_string(),
                        error,
                    });
                }
                Err(error) => {
                    debug!(
                        "shape inference failed for {} node \"{}\": {}",
                        node.op_type(),
                        node_label(node),
                        error
                    );
                    Vec::new()
                }
            },
            None => {
                trace!("no shape inference for operator {}", node.op_type());
                Vec::new()
            }
        };

        for (i, name) in node.output.iter().enumerate() {
            if name.is_empty() {
                continue;
            }
            let inferred = outputs.get(i).cloned().unwrap_or_default();
            let info = match annotations.get(name) {
                Some(annotated) => match merge(name, annotated, inferred) {
                    Ok(info) => info,
                    Err(err) if opts.strict => return Err(err),
                    Err(err) => {
                        debug!("keeping annotated shape: {}", err);
                        annotated.clone()
                    }
                },
                None => inferred,
            };
            known.insert(name.clone(), info);
            produced.push(name.clone());
        }
    }

    let mut updated = 0;
    for name in produced {
        let Some(info) = known.get(&name) else {
            continue;
        };
        if info.elem_type.is_none() && info.shape.is_none() {
            continue;
        }
        if update_value_info(graph, &name, info) {
            updated += 1;
        }
    }
    debug!("shape inference updated {} values", updated);

    Ok(updated)
}

#[cfg(test)]
mod tests {
    use onnx_batchsize_proto::onnx::{
        AttributeProto, DataType, GraphProto, NodeProto, TensorProto, ValueInfoProto,
    };
    use onnx_batchsize_testing::TestCases;

    use super::{InferShapesError, InferShapesOptions, infer_shapes};
    use crate::infer_shapes::OpShapeError;
    use crate::test_util::{find_value, shape_str, value_info};

    const STRICT: InferShapesOptions = InferShapesOptions { strict: true };

    fn shape_of(graph: &GraphProto, name: &str) -> Vec<String> {
        find_value(graph, name).map(shape_str).unwrap_or_default()
    }

    #[test]
    fn test_infer_intermediate_values() {
        let mut graph = GraphProto {
            node: vec![
                NodeProto::new("Relu", &["x"], &["r"]),
                NodeProto::new("Flatten", &["r"], &["y"]),
            ],
            input: vec![value_info("x", &["N", "3", "8", "8"])],
            output: vec![value_info("y", &["N", "?"])],
            ..Default::default()
        };

        let updated = infer_shapes(&mut graph, STRICT).unwrap();

        assert_eq!(updated, 2);
        assert_eq!(shape_of(&graph, "r"), ["N", "3", "8", "8"]);
        assert_eq!(
            graph.value_info[0].elem_type(),
            Some(DataType::FLOAT)
        );
        assert_eq!(shape_of(&graph, "y"), ["N", "192"]);
        assert_eq!(shape_of(&graph, "x"), ["N", "3", "8", "8"]);
    }

    #[test]
    fn test_invalid_op_inputs() {
        // Reshape whose target has two inferred dims.
        let make_graph = || GraphProto {
            node: vec![NodeProto::new("Reshape", &["x", "shape"], &["y"]).with_name("reshape")],
            initializer: vec![TensorProto::from_int64_data("shape", &[2], &[-1, -1])],
            input: vec![value_info("x", &["N", "3", "224", "224"])],
            output: vec![value_info("y", &["N", "150528"])],
            ..Default::default()
        };

        let mut graph = make_graph();
        let result = infer_shapes(&mut graph, STRICT);
        assert_eq!(
            result,
            Err(InferShapesError::Op {
                node: "reshape".to_string(),
                op_type: "Reshape".to_string(),
                error: OpShapeError::InvalidValue,
            })
        );

        let mut graph = make_graph();
        let result = infer_shapes(&mut graph, InferShapesOptions::default());
        assert_eq!(result, Ok(0));
        assert_eq!(graph, make_graph());
    }

    #[test]
    fn test_annotation_conflicts() {
        #[derive(Debug)]
        struct Case {
            output: ValueInfoProto,
            expected: InferShapesError,
        }

        let cases = [
            Case {
                output: value_info("y", &["4", "10"]),
                expected: InferShapesError::DimMismatch {
                    value: "y".to_string(),
                    axis: 1,
                    annotated: 10,
                    inferred: 12,
                },
            },
            Case {
                output: value_info("y", &["4", "12", "1"]),
                expected: InferShapesError::RankMismatch {
                    value: "y".to_string(),
                    annotated: 3,
                    inferred: 2,
                },
            },
        ];

        cases.test_each(|case| {
            let make_graph = || GraphProto {
                node: vec![NodeProto::new("Flatten", &["x"], &["y"])],
                input: vec![value_info("x", &["4", "3", "4"])],
                output: vec![case.output.clone()],
                ..Default::default()
            };

            let mut graph = make_graph();
            assert_eq!(infer_shapes(&mut graph, STRICT), Err(case.expected.clone()));

            // In non-strict mode the annotation is kept.
            let mut graph = make_graph();
            assert_eq!(infer_shapes(&mut graph, InferShapesOptions::default()), Ok(0));
            assert_eq!(graph, make_graph());
        })
    }

    #[test]
    fn test_merge_with_annotations() {
        let mut graph = GraphProto {
            node: vec![
                NodeProto::new("Relu", &["x"], &["a"]),
                NodeProto::new("Relu", &["y"], &["b"]),
            ],
            input: vec![value_info("x", &["4", "3"]), value_info("y", &["N", "?"])],
            value_info: vec![value_info("a", &["batch", "3"]), value_info("b", &["?", "M"])],
            ..Default::default()
        };

        infer_shapes(&mut graph, STRICT).unwrap();

        // Fixed sizes replace names. Names fill unknown sizes.
        assert_eq!(shape_of(&graph, "a"), ["4", "3"]);
        assert_eq!(shape_of(&graph, "b"), ["N", "M"]);
    }

    #[test]
    fn test_shape_computation_values() {
        let mut graph = GraphProto {
            node: vec![
                NodeProto::new("Shape", &["x"], &["x_shape"]),
                NodeProto::new("Gather", &["x_shape", "zero"], &["batch"]),
                NodeProto::new("Unsqueeze", &["batch", "axes"], &["batch_vec"]),
                NodeProto::new("Concat", &["batch_vec", "minus_one"], &["target"])
                    .with_attr(AttributeProto::int("axis", 0)),
                NodeProto::new("Reshape", &["x", "target"], &["y"]),
            ],
            initializer: vec![
                TensorProto::from_int64_raw("zero", &[], &[0]),
                TensorProto::from_int64_data("axes", &[1], &[0]),
                TensorProto::from_int64_data("minus_one", &[1], &[-1]),
            ],
            input: vec![value_info("x", &["2", "3", "4"])],
            output: vec![ValueInfoProto {
                name: Some("y".to_string()),
                ..Default::default()
            }],
            ..Default::default()
        };

        infer_shapes(&mut graph, STRICT).unwrap();

        assert_eq!(shape_of(&graph, "target"), ["2"]);
        assert_eq!(shape_of(&graph, "y"), ["2", "12"]);
        assert_eq!(find_value(&graph, "y").unwrap().elem_type(), Some(DataType::FLOAT));
    }

    #[test]
    fn test_unsupported_ops() {
        let make_graph = || GraphProto {
            node: vec![
                NodeProto::new("Conv", &["x", "w"], &["c"]),
                NodeProto {
                    domain: Some("com.example".to_string()),
                    ..NodeProto::new("Relu", &["c"], &["y"])
                },
            ],
            input: vec![value_info("x", &["N", "3", "8", "8"])],
            initializer: vec![TensorProto::from_f32_raw("w", &[1, 3, 1, 1], &[1.0; 3])],
            value_info: vec![value_info("c", &["N", "1", "8", "8"])],
            output: vec![value_info("y", &["N", "1", "8", "8"])],
            ..Default::default()
        };

        let mut graph = make_graph();
        assert_eq!(infer_shapes(&mut graph, STRICT), Ok(0));
        assert_eq!(graph, make_graph());
    }
}
