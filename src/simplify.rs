//! Best-effort graph simplification.
//!
//! Simplification makes constant values visible to later passes. For example
//! a `Reshape` whose target shape is produced by a `Constant` node, or by a
//! `Shape -> Gather -> Concat` chain over statically shaped inputs, reads its
//! shape from an initializer after simplification.

use std::error::Error;
use std::fmt::{Display, Formatter};

use log::debug;
use onnx_batchsize_proto::onnx::{DataType, GraphProto, ModelProto, NodeProto, TensorProto};
use rustc_hash::{FxHashMap, FxHashSet};
use smallvec::SmallVec;

use crate::cleanup::{node_label, node_uses};
use crate::infer_shapes::resolve_axis;
use crate::reshape::raw_to_i64s;

/// Minimum IR version for which initializers do not also need to be listed
/// as graph inputs.
const MIN_IR_VERSION: i64 = 4;

/// Errors that prevent a model from being simplified.
#[derive(Clone, Debug, PartialEq)]
pub enum SimplifyError {
    /// The model has no graph.
    MissingGraph,

    /// The model's IR version is too old.
    UnsupportedIrVersion(Option<i64>),

    /// A `Constant` node could not be converted to an initializer.
    InvalidConstant { node: String, reason: String },

    /// A folded value has the same name as an existing initializer.
    NameCollision(String),
}

impl Display for SimplifyError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MissingGraph => write!(f, "model has no graph"),
            Self::UnsupportedIrVersion(Some(version)) => {
                write!(f, "unsupported IR version {}", version)
            }
            Self::UnsupportedIrVersion(None) => write!(f, "model has no IR version"),
            Self::InvalidConstant { node, reason } => {
                write!(f, "invalid Constant node \"{}\": {}", node, reason)
            }
            Self::NameCollision(name) => {
                write!(f, "value \"{}\" is already an initializer", name)
            }
        }
    }
}

impl Error for SimplifyError {}

/// Simplify a model's graph.
///
/// This applies the following passes to a copy of the model:
///
/// - `Constant` nodes are replaced by initializers
/// - Nodes that compute INT64 values from constants and static tensor shapes
///   (`Shape`, `Gather`, `Unsqueeze`, `Squeeze`, `Concat`, `Identity`, `Cast`)
///   are evaluated and replaced by initializers
/// - `Identity` nodes are removed by connecting their consumers to their input
///
/// Nodes which become unused are not removed. Use
/// [`cleanup`](crate::cleanup::cleanup) for that.
pub fn simplify(model: &ModelProto) -> Result<ModelProto, SimplifyError> {
    match model.ir_version {
        Some(version) if version >= MIN_IR_VERSION => {}
        version => return Err(SimplifyError::UnsupportedIrVersion(version)),
    }

    let mut model = model.clone();
    let graph = model.graph.as_mut().ok_or(SimplifyError::MissingGraph)?;

    let n_constants = fold_constant_nodes(graph)?;
    let n_folded = fold_int_computations(graph);
    let n_identities = eliminate_identities(graph);

    debug!(
        "simplify folded {} constants and {} shape computations, removed {} identities",
        n_constants, n_folded, n_identities
    );

    Ok(model)
}

/// Convert the value of a `Constant` node to a tensor named after the node's
/// output.
fn constant_to_tensor(node: &NodeProto) -> Result<TensorProto, SimplifyError> {
    let invalid = |reason: &str| SimplifyError::InvalidConstant {
        node: node_label(node),
        reason: reason.to_string(),
    };

    let [output] = &node.output[..] else {
        return Err(invalid("expected one output"));
    };

    // Exactly one value attribute must be set.
    let mut tensor = None;
    for attr in &node.attribute {
        let attr_name = attr.name.as_deref().unwrap_or_default();
        let attr_tensor = match attr_name {
            "value" => {
                let Some(value) = &attr.t else {
                    return Err(invalid("invalid \"value\" attribute"));
                };
                TensorProto {
                    name: Some(output.clone()),
                    ..value.clone()
                }
            }
            "value_int" => TensorProto::from_int64_raw(output, &[], &[attr.i.unwrap_or_default()]),
            "value_ints" => {
                TensorProto::from_int64_raw(output, &[attr.ints.len() as i64], &attr.ints)
            }
            "value_float" => TensorProto::from_f32_raw(output, &[], &[attr.f.unwrap_or_default()]),
            "value_floats" => {
                TensorProto::from_f32_raw(output, &[attr.floats.len() as i64], &attr.floats)
            }
            _ => {
                // Known unsupported attributes: sparse_value, value_string,
                // value_strings.
                return Err(invalid(&format!("unsupported attribute \"{}\"", attr_name)));
            }
        };

        if tensor.is_some() {
            return Err(invalid("multiple value attributes set"));
        }
        tensor = Some(attr_tensor);
    }

    tensor.ok_or_else(|| invalid("value attribute not found"))
}

/// Replace top-level `Constant` nodes with initializers.
fn fold_constant_nodes(graph: &mut GraphProto) -> Result<usize, SimplifyError> {
    let mut init_names: FxHashSet<String> = graph
        .initializer
        .iter()
        .filter_map(|init| init.name.clone())
        .collect();

    let mut new_inits = Vec::new();
    let mut nodes = Vec::with_capacity(graph.node.len());
    for node in std::mem::take(&mut graph.node) {
        if node.op_type() != "Constant" || node.domain.as_deref().is_some_and(|d| !d.is_empty()) {
            nodes.push(node);
            continue;
        }
        let tensor = constant_to_tensor(&node)?;
        let name = tensor.name.clone().unwrap_or_default();
        if !init_names.insert(name.clone()) {
            return Err(SimplifyError::NameCollision(name));
        }
        new_inits.push(tensor);
    }

    let count = new_inits.len();
    graph.node = nodes;
    graph.initializer.extend(new_inits);
    Ok(count)
}

/// An INT64 tensor with known contents.
#[derive(Clone, Debug, PartialEq)]
struct IntTensor {
    dims: Vec<i64>,
    data: Vec<i64>,
}

impl IntTensor {
    fn vector(data: Vec<i64>) -> Self {
        Self {
            dims: vec![data.len() as i64],
            data,
        }
    }

    /// Read the contents of an INT64 initializer with inline data.
    fn from_initializer(init: &TensorProto) -> Option<Self> {
        if init.data_type != Some(DataType::INT64) || init.is_external() {
            return None;
        }
        let data = if !init.int64_data.is_empty() {
            init.int64_data.clone()
        } else {
            raw_to_i64s(init.raw_data.as_deref().unwrap_or_default())
        };
        let len: i64 = init.dims.iter().product();
        if len != data.len() as i64 {
            return None;
        }
        Some(Self {
            dims: init.dims.clone(),
            data,
        })
    }

    fn ndim(&self) -> usize {
        self.dims.len()
    }
}

/// Known values and static shapes used to evaluate nodes.
struct FoldContext {
    values: FxHashMap<String, IntTensor>,
    shapes: FxHashMap<String, Vec<i64>>,
}

impl FoldContext {
    fn new(graph: &GraphProto) -> Self {
        let mut values = FxHashMap::default();
        let mut shapes = FxHashMap::default();

        for init in &graph.initializer {
            let Some(name) = init.name.clone() else {
                continue;
            };
            shapes.insert(name.clone(), init.dims.clone());
            if let Some(value) = IntTensor::from_initializer(init) {
                values.insert(name, value);
            }
        }

        for value in graph.input.iter().chain(&graph.value_info) {
            let Some(shape) = value.shape() else {
                continue;
            };
            let dims: Option<Vec<i64>> = shape.dim.iter().map(|d| d.dim_value()).collect();
            if let Some(dims) = dims {
                shapes.entry(value.name().to_string()).or_insert(dims);
            }
        }

        Self { values, shapes }
    }

    fn value(&self, node: &NodeProto, index: usize) -> Option<&IntTensor> {
        let name = node.input.get(index)?;
        self.values.get(name)
    }

    /// Get axes from an `axes` attribute or from a constant input.
    fn axes(&self, node: &NodeProto, input_index: usize) -> Option<Vec<i64>> {
        if let Some(attr) = node.attr("axes") {
            return Some(attr.ints.clone());
        }
        self.value(node, input_index).map(|axes| axes.data.clone())
    }

    /// Evaluate a node whose inputs are all known, or return `None` if the
    /// node can't be evaluated.
    fn eval(&self, node: &NodeProto) -> Option<IntTensor> {
        let int_attr = |name: &str| node.attr(name).and_then(|a| a.i);

        match node.op_type() {
            "Shape" => {
                let shape = self.shapes.get(node.input.first()?)?;
                let ndim = shape.len() as i64;
                let clamp = |index: i64| {
                    let index = if index < 0 { index + ndim } else { index };
                    index.clamp(0, ndim) as usize
                };
                let start = clamp(int_attr("start").unwrap_or(0));
                let end = clamp(int_attr("end").unwrap_or(ndim));
                let data = shape.get(start..end).unwrap_or_default().to_vec();
                Some(IntTensor::vector(data))
            }
            "Gather" => {
                let data = self.value(node, 0)?;
                let indices = self.value(node, 1)?;
                if data.ndim() != 1 || indices.ndim() > 1 || int_attr("axis").unwrap_or(0) != 0 {
                    return None;
                }
                let len = data.data.len() as i64;
                let gathered = indices
                    .data
                    .iter()
                    .map(|&idx| {
                        let idx = if idx < 0 { idx + len } else { idx };
                        data.data.get(usize::try_from(idx).ok()?).copied()
                    })
                    .collect::<Option<Vec<_>>>()?;
                Some(IntTensor {
                    dims: indices.dims.clone(),
                    data: gathered,
                })
            }
            "Unsqueeze" => {
                let data = self.value(node, 0)?;
                let axes = self.axes(node, 1)?;
                let out_ndim = data.ndim() + axes.len();
                let mut axes: SmallVec<[usize; 4]> = axes
                    .iter()
                    .map(|&axis| resolve_axis(out_ndim, axis))
                    .collect::<Option<_>>()?;
                axes.sort();
                let mut dims = data.dims.clone();
                for axis in axes {
                    if axis > dims.len() {
                        return None;
                    }
                    dims.insert(axis, 1);
                }
                Some(IntTensor {
                    dims,
                    data: data.data.clone(),
                })
            }
            "Squeeze" => {
                let data = self.value(node, 0)?;
                let axes = match self.axes(node, 1) {
                    Some(axes) => Some(axes),
                    // Axes are computed at runtime.
                    None if node.input.get(1).is_some_and(|name| !name.is_empty()) => {
                        return None;
                    }
                    None => None,
                };
                let dims = match axes {
                    Some(axes) => {
                        let axes: SmallVec<[usize; 4]> = axes
                            .iter()
                            .map(|&axis| resolve_axis(data.ndim(), axis))
                            .collect::<Option<_>>()?;
                        if axes.iter().any(|&axis| data.dims[axis] != 1) {
                            return None;
                        }
                        data.dims
                            .iter()
                            .enumerate()
                            .filter(|(i, _)| !axes.contains(i))
                            .map(|(_, &d)| d)
                            .collect()
                    }
                    None => data.dims.iter().copied().filter(|&d| d != 1).collect(),
                };
                Some(IntTensor {
                    dims,
                    data: data.data.clone(),
                })
            }
            "Concat" => {
                let axis = int_attr("axis")?;
                if axis != 0 && axis != -1 {
                    return None;
                }
                let mut data = Vec::new();
                for index in 0..node.input.len() {
                    let input = self.value(node, index)?;
                    if input.ndim() != 1 {
                        return None;
                    }
                    data.extend_from_slice(&input.data);
                }
                Some(IntTensor::vector(data))
            }
            "Identity" => self.value(node, 0).cloned(),
            "Cast" if int_attr("to") == Some(DataType::INT64.0 as i64) => {
                self.value(node, 0).cloned()
            }
            _ => None,
        }
    }
}

/// Evaluate nodes that compute INT64 values from constants and static shapes,
/// and replace them with initializers.
fn fold_int_computations(graph: &mut GraphProto) -> usize {
    let mut ctx = FoldContext::new(graph);
    let graph_outputs: FxHashSet<String> =
        graph.output.iter().map(|v| v.name().to_string()).collect();
    let init_names: FxHashSet<String> = graph
        .initializer
        .iter()
        .filter_map(|init| init.name.clone())
        .collect();

    let mut count = 0;
    loop {
        let mut changed = false;
        let mut i = 0;
        while i < graph.node.len() {
            let node = &graph.node[i];
            if node.domain.as_deref().is_some_and(|d| !d.is_empty()) {
                i += 1;
                continue;
            }
            let [output] = &node.output[..] else {
                i += 1;
                continue;
            };
            if graph_outputs.contains(output) || init_names.contains(output) {
                i += 1;
                continue;
            }
            let Some(value) = ctx.eval(node) else {
                i += 1;
                continue;
            };

            let output = output.clone();
            graph.initializer.push(TensorProto::from_int64_raw(
                &output,
                &value.dims,
                &value.data,
            ));
            ctx.shapes.insert(output.clone(), value.dims.clone());
            ctx.values.insert(output, value);
            graph.node.remove(i);
            changed = true;
            count += 1;
        }
        if !changed {
            break;
        }
    }
    count
}

/// Remove `Identity` nodes by replacing uses of their output with their input.
///
/// Identities whose output is a graph output, or is referenced from a
/// subgraph, are kept.
fn eliminate_identities(graph: &mut GraphProto) -> usize {
    let mut keep: FxHashSet<String> = graph.output.iter().map(|v| v.name().to_string()).collect();
    for node in &graph.node {
        if node.attribute.iter().any(|a| a.subgraphs().next().is_some()) {
            keep.extend(node_uses(node));
        }
    }

    let mut count = 0;
    let mut i = 0;
    while i < graph.node.len() {
        let node = &graph.node[i];
        let removable = match (&node.input[..], &node.output[..]) {
            ([input], [output])
                if node.op_type() == "Identity"
                    && !input.is_empty()
                    && !keep.contains(output) =>
            {
                Some((input.clone(), output.clone()))
            }
            _ => None,
        };
        let Some((input, output)) = removable else {
            i += 1;
            continue;
        };

        graph.node.remove(i);
        for name in graph.node.iter_mut().flat_map(|n| n.input.iter_mut()) {
            if *name == output {
                *name = input.clone();
            }
        }
        count += 1;
    }
    count
}
