use onnx_batchsize_proto::onnx::{DataType, NodeProto};

use super::{
    BinaryOp, InferShapes, OpShapeError, ReductionOp, SymDim, SymTensor, UnaryOp,
    broadcast_shapes, resolve_axes, resolve_axis,
};

/// Return the shape inference implementation for a node, or `None` if the
/// operator is not supported.
pub fn op_for_node(node: &NodeProto) -> Option<Box<dyn InferShapes>> {
    match node.domain.as_deref() {
        None | Some("") | Some("ai.onnx") => {}
        Some(_) => return None,
    }

    let int_attr = |name: &str, default: i64| node.attr(name).and_then(|a| a.i).unwrap_or(default);
    let ints_attr = |name: &str| node.attr(name).map(|a| a.ints.clone());

    let op: Box<dyn InferShapes> = match node.op_type() {
        "Abs" | "Acos" | "Asin" | "Atan" | "BatchNormalization" | "Ceil" | "Clip" | "Cos"
        | "Dropout" | "Elu" | "Erf" | "Exp" | "Floor" | "Gelu" | "HardSigmoid" | "HardSwish"
        | "InstanceNormalization" | "LayerNormalization" | "LeakyRelu" | "Log"
        | "LogSoftmax" | "LRN" | "Mish" | "Neg" | "Not" | "Reciprocal" | "Relu" | "Round"
        | "Selu" | "Sigmoid" | "Sign" | "Sin" | "Softmax" | "Softplus" | "Softsign" | "Sqrt"
        | "Tan" | "Tanh" => Box::new(UnaryOp),
        "Identity" => Box::new(Identity),
        "Cast" => Box::new(Cast {
            to: DataType(int_attr("to", 0) as i32),
        }),
        "Add" | "BitShift" | "Div" | "Max" | "Mean" | "Min" | "Mod" | "Mul" | "Pow" | "PRelu"
        | "Sub" | "Sum" => Box::new(BinaryOp { out_type: None }),
        "And" | "Equal" | "Greater" | "GreaterOrEqual" | "Less" | "LessOrEqual" | "Or"
        | "Xor" => Box::new(BinaryOp {
            out_type: Some(DataType::BOOL),
        }),
        "Where" => Box::new(Where),
        "Reshape" => Box::new(Reshape {
            allow_zero: int_attr("allowzero", 0) != 0,
        }),
        "Flatten" => Box::new(Flatten {
            axis: int_attr("axis", 1),
        }),
        "Transpose" => Box::new(Transpose {
            perm: ints_attr("perm"),
        }),
        "MatMul" => Box::new(MatMul),
        "Gemm" => Box::new(Gemm {
            trans_a: int_attr("transA", 0) != 0,
            trans_b: int_attr("transB", 0) != 0,
        }),
        "Concat" => Box::new(Concat {
            axis: int_attr("axis", 0),
        }),
        "Shape" => Box::new(Shape {
            start: int_attr("start", 0),
            end: node.attr("end").and_then(|a| a.i),
        }),
        "Unsqueeze" => Box::new(Unsqueeze {
            axes: ints_attr("axes"),
        }),
        "Squeeze" => Box::new(Squeeze {
            axes: ints_attr("axes"),
        }),
        "Gather" => Box::new(Gather {
            axis: int_attr("axis", 0),
        }),
        "GlobalAveragePool" | "GlobalMaxPool" => Box::new(GlobalPool),
        "ReduceL1" | "ReduceL2" | "ReduceLogSumExp" | "ReduceMax" | "ReduceMean"
        | "ReduceMin" | "ReduceProd" | "ReduceSum" | "ReduceSumSquare" => Box::new(ReductionOp {
            axes: ints_attr("axes"),
            keep_dims: int_attr("keepdims", 1) != 0,
        }),
        _ => return None,
    };
    Some(op)
}

/// Return the product of `dims`, or `Unknown` if it cannot be expressed as a
/// single dimension.
fn dim_product(dims: &[SymDim]) -> SymDim {
    if let [dim] = dims {
        return dim.clone();
    }
    dims.iter()
        .try_fold(1i64, |prod, dim| prod.checked_mul(dim.fixed()?))
        .map(SymDim::Fixed)
        .unwrap_or(SymDim::Unknown)
}

/// Identity operator.
///
/// See <https://onnx.ai/onnx/operators/onnx__Identity.html>.
pub struct Identity;

impl InferShapes for Identity {
    fn infer_shapes(&self, inputs: &[SymTensor]) -> Result<Vec<SymTensor>, OpShapeError> {
        let [input] = inputs else {
            return Err(OpShapeError::IncorrectInputCount);
        };
        Ok([input.clone()].into())
    }
}

/// Cast operator.
///
/// See <https://onnx.ai/onnx/operators/onnx__Cast.html>.
pub struct Cast {
    pub to: DataType,
}

impl InferShapes for Cast {
    fn infer_shapes(&self, inputs: &[SymTensor]) -> Result<Vec<SymTensor>, OpShapeError> {
        let [input] = inputs else {
            return Err(OpShapeError::IncorrectInputCount);
        };
        let value = if self.to == DataType::INT64 {
            input.value.clone()
        } else {
            None
        };
        Ok([SymTensor {
            elem_type: Some(self.to),
            shape: input.shape.clone(),
            value,
        }]
        .into())
    }
}

/// Where operator.
///
/// See <https://onnx.ai/onnx/operators/onnx__Where.html>.
pub struct Where;

impl InferShapes for Where {
    fn infer_shapes(&self, inputs: &[SymTensor]) -> Result<Vec<SymTensor>, OpShapeError> {
        let [cond, x, y] = inputs else {
            return Err(OpShapeError::IncorrectInputCount);
        };
        let mut outputs = BinaryOp { out_type: None }.infer_shapes(&[
            x.clone(),
            y.clone(),
            cond.clone(),
        ])?;
        for output in &mut outputs {
            output.elem_type = x.elem_type.or(y.elem_type);
        }
        Ok(outputs)
    }
}

/// Reshape operator.
///
/// See <https://onnx.ai/onnx/operators/onnx__Reshape.html>.
pub struct Reshape {
    /// If true, a 0 in the target shape is a zero-sized dimension instead of a
    /// copy of the input dimension.
    pub allow_zero: bool,
}

impl InferShapes for Reshape {
    fn infer_shapes(&self, inputs: &[SymTensor]) -> Result<Vec<SymTensor>, OpShapeError> {
        let [data, shape] = inputs else {
            return Err(OpShapeError::IncorrectInputCount);
        };
        let elem_type = data.elem_type;

        let Some(target) = shape.values() else {
            // If only the length of the target shape is known, the output
            // rank is known.
            if let Some([SymDim::Fixed(len)]) = shape.shape.as_deref()
                && let Ok(len) = usize::try_from(*len)
            {
                return Ok([SymTensor::from_shape(elem_type, vec![SymDim::Unknown; len])].into());
            }
            return Ok([SymTensor::unknown(elem_type)].into());
        };

        if target.iter().filter(|&&size| size == -1).count() > 1 {
            return Err(OpShapeError::InvalidValue);
        }

        let data_dims = data.shape.as_deref();
        let mut out_dims = Vec::with_capacity(target.len());
        let mut remainder_index = None;
        for (i, &size) in target.iter().enumerate() {
            let dim = match size {
                -1 => {
                    remainder_index = Some(i);
                    SymDim::Unknown
                }
                0 if !self.allow_zero => match data_dims {
                    Some(dims) => dims.get(i).cloned().ok_or(OpShapeError::IncorrectRank)?,
                    None => SymDim::Unknown,
                },
                size if size >= 0 => SymDim::Fixed(size),
                _ => return Err(OpShapeError::InvalidValue),
            };
            out_dims.push(dim);
        }

        if let Some(index) = remainder_index
            && let Some(data_dims) = data_dims
        {
            out_dims[index] = infer_remainder(data_dims, &out_dims, index)?;
        }

        Ok([SymTensor::from_shape(elem_type, out_dims)].into())
    }
}

/// Infer the size of the `-1` entry at `index` in a `Reshape` output, given
/// the input dims and the other output dims.
fn infer_remainder(
    data_dims: &[SymDim],
    out_dims: &[SymDim],
    index: usize,
) -> Result<SymDim, OpShapeError> {
    // Named dims which appear in both the input and output cancel out.
    let mut in_rest: Vec<&SymDim> = data_dims.iter().collect();
    let mut out_product = 1i64;
    for (i, dim) in out_dims.iter().enumerate() {
        if i == index {
            continue;
        }
        match dim {
            SymDim::Fixed(size) => {
                let Some(prod) = out_product.checked_mul(*size) else {
                    return Ok(SymDim::Unknown);
                };
                out_product = prod;
            }
            SymDim::Named(_) => {
                let Some(pos) = in_rest.iter().position(|d| *d == dim) else {
                    return Ok(SymDim::Unknown);
                };
                in_rest.remove(pos);
            }
            SymDim::Unknown => return Ok(SymDim::Unknown),
        }
    }

    let mut in_product = 1i64;
    let mut in_unknown = Vec::new();
    for dim in in_rest {
        match dim.fixed() {
            Some(size) => {
                let Some(prod) = in_product.checked_mul(size) else {
                    return Ok(SymDim::Unknown);
                };
                in_product = prod;
            }
            None => in_unknown.push(dim),
        }
    }

    let dim = match in_unknown[..] {
        _ if out_product == 0 => SymDim::Unknown,
        [] if in_product % out_product != 0 => return Err(OpShapeError::IncompatibleShapes),
        [] => SymDim::Fixed(in_product / out_product),
        [dim] if in_product == out_product => dim.clone(),
        _ => SymDim::Unknown,
    };
    Ok(dim)
}

/// Flatten operator.
///
/// See <https://onnx.ai/onnx/operators/onnx__Flatten.html>.
pub struct Flatten {
    pub axis: i64,
}

impl InferShapes for Flatten {
    fn infer_shapes(&self, inputs: &[SymTensor]) -> Result<Vec<SymTensor>, OpShapeError> {
        let [input] = inputs else {
            return Err(OpShapeError::IncorrectInputCount);
        };
        let Some(dims) = &input.shape else {
            return Ok([SymTensor::unknown(input.elem_type)].into());
        };

        // nb. `axis` is an exclusive count of outer dims rather than an
        // inclusive index.
        let ndim = dims.len();
        let n_outer_dims = if self.axis == ndim as i64 {
            ndim
        } else {
            resolve_axis(ndim, self.axis).ok_or(OpShapeError::IncorrectRank)?
        };

        let (outer, inner) = dims.split_at(n_outer_dims);
        let out_shape = vec![dim_product(outer), dim_product(inner)];
        Ok([SymTensor::from_shape(input.elem_type, out_shape)].into())
    }
}

/// Transpose operator.
///
/// See <https://onnx.ai/onnx/operators/onnx__Transpose.html>.
pub struct Transpose {
    pub perm: Option<Vec<i64>>,
}

impl InferShapes for Transpose {
    fn infer_shapes(&self, inputs: &[SymTensor]) -> Result<Vec<SymTensor>, OpShapeError> {
        let [input] = inputs else {
            return Err(OpShapeError::IncorrectInputCount);
        };
        let Some(dims) = &input.shape else {
            return Ok([SymTensor::unknown(input.elem_type)].into());
        };

        let out_shape = match &self.perm {
            Some(perm) => {
                if perm.len() != dims.len() {
                    return Err(OpShapeError::IncorrectRank);
                }
                let mut used = vec![false; dims.len()];
                let mut out_shape = Vec::with_capacity(dims.len());
                for &axis in perm {
                    let axis = usize::try_from(axis)
                        .ok()
                        .filter(|&axis| axis < dims.len() && !used[axis])
                        .ok_or(OpShapeError::InvalidValue)?;
                    used[axis] = true;
                    out_shape.push(dims[axis].clone());
                }
                out_shape
            }
            None => dims.iter().rev().cloned().collect(),
        };

        Ok([SymTensor::from_shape(input.elem_type, out_shape)].into())
    }
}

/// MatMul operator.
///
/// See <https://onnx.ai/onnx/operators/onnx__MatMul.html>.
pub struct MatMul;

impl InferShapes for MatMul {
    fn infer_shapes(&self, inputs: &[SymTensor]) -> Result<Vec<SymTensor>, OpShapeError> {
        let [lhs, rhs] = inputs else {
            return Err(OpShapeError::IncorrectInputCount);
        };
        let elem_type = lhs.elem_type;
        let (Some(lhs_dims), Some(rhs_dims)) = (&lhs.shape, &rhs.shape) else {
            return Ok([SymTensor::unknown(elem_type)].into());
        };
        if lhs_dims.is_empty() || rhs_dims.is_empty() {
            return Err(OpShapeError::IncorrectRank);
        }

        // Vector operands are promoted to matrices, and the inserted dims
        // removed from the output.
        let mut lhs_dims = lhs_dims.clone();
        let lhs_vector = lhs_dims.len() == 1;
        if lhs_vector {
            lhs_dims.insert(0, SymDim::Fixed(1));
        }
        let mut rhs_dims = rhs_dims.clone();
        let rhs_vector = rhs_dims.len() == 1;
        if rhs_vector {
            rhs_dims.push(SymDim::Fixed(1));
        }

        // Output shape is (broadcast(lhs_batch_dims, rhs_batch_dims), M, N)
        let (lhs_batch, lhs_mat) = lhs_dims.split_at(lhs_dims.len() - 2);
        let (rhs_batch, rhs_mat) = rhs_dims.split_at(rhs_dims.len() - 2);

        if let (Some(lhs_k), Some(rhs_k)) = (lhs_mat[1].fixed(), rhs_mat[0].fixed())
            && lhs_k != rhs_k
        {
            return Err(OpShapeError::IncompatibleShapes);
        }

        let mut out_shape = broadcast_shapes(lhs_batch, rhs_batch)?;
        if !lhs_vector {
            out_shape.push(lhs_mat[0].clone());
        }
        if !rhs_vector {
            out_shape.push(rhs_mat[1].clone());
        }

        Ok([SymTensor::from_shape(elem_type, out_shape)].into())
    }
}

/// Gemm operator.
///
/// See <https://onnx.ai/onnx/operators/onnx__Gemm.html>.
pub struct Gemm {
    pub trans_a: bool,
    pub trans_b: bool,
}

impl InferShapes for Gemm {
    fn infer_shapes(&self, inputs: &[SymTensor]) -> Result<Vec<SymTensor>, OpShapeError> {
        let (a, b) = match inputs {
            [a, b] | [a, b, _] => (a, b),
            _ => return Err(OpShapeError::IncorrectInputCount),
        };
        let elem_type = a.elem_type;
        let (Some(a_dims), Some(b_dims)) = (&a.shape, &b.shape) else {
            return Ok([SymTensor::unknown(elem_type)].into());
        };
        let ([a_rows, a_cols], [b_rows, b_cols]) = (&a_dims[..], &b_dims[..]) else {
            return Err(OpShapeError::IncorrectRank);
        };

        let (m, a_k) = if self.trans_a {
            (a_cols, a_rows)
        } else {
            (a_rows, a_cols)
        };
        let (b_k, n) = if self.trans_b {
            (b_cols, b_rows)
        } else {
            (b_rows, b_cols)
        };
        if let (Some(a_k), Some(b_k)) = (a_k.fixed(), b_k.fixed())
            && a_k != b_k
        {
            return Err(OpShapeError::IncompatibleShapes);
        }

        Ok([SymTensor::from_shape(elem_type, vec![m.clone(), n.clone()])].into())
    }
}

/// Concat operator.
///
/// See <https://onnx.ai/onnx/operators/onnx__Concat.html>.
pub struct Concat {
    pub axis: i64,
}

impl InferShapes for Concat {
    fn infer_shapes(&self, inputs: &[SymTensor]) -> Result<Vec<SymTensor>, OpShapeError> {
        let Some(first) = inputs.first() else {
            return Err(OpShapeError::IncorrectInputCount);
        };
        let elem_type = first.elem_type;

        let Some(shapes) = inputs
            .iter()
            .map(|input| input.shape.as_ref())
            .collect::<Option<Vec<_>>>()
        else {
            return Ok([SymTensor::unknown(elem_type)].into());
        };

        let ndim = shapes[0].len();
        if shapes.iter().any(|shape| shape.len() != ndim) {
            return Err(OpShapeError::IncorrectRank);
        }
        let axis = resolve_axis(ndim, self.axis).ok_or(OpShapeError::IncorrectRank)?;

        let mut out_shape = shapes[0].clone();
        for shape in &shapes[1..] {
            for (i, dim) in shape.iter().enumerate() {
                if i == axis {
                    continue;
                }
                out_shape[i] = match (&out_shape[i], dim) {
                    (SymDim::Fixed(a), SymDim::Fixed(b)) if a != b => {
                        return Err(OpShapeError::IncompatibleShapes);
                    }
                    (SymDim::Fixed(_) | SymDim::Named(_), _) => continue,
                    (SymDim::Unknown, dim) => dim.clone(),
                };
            }
        }
        let axis_dims: Vec<SymDim> = shapes.iter().map(|shape| shape[axis].clone()).collect();
        out_shape[axis] = axis_dims
            .iter()
            .try_fold(0i64, |sum, dim| sum.checked_add(dim.fixed()?))
            .map(SymDim::Fixed)
            .unwrap_or(SymDim::Unknown);

        let value = if ndim == 1 {
            inputs
                .iter()
                .map(|input| input.values())
                .collect::<Option<Vec<_>>>()
                .map(|values| values.concat())
        } else {
            None
        };

        Ok([SymTensor {
            elem_type,
            shape: Some(out_shape),
            value,
        }]
        .into())
    }
}

/// Shape operator.
///
/// See <https://onnx.ai/onnx/operators/onnx__Shape.html>.
pub struct Shape {
    pub start: i64,
    pub end: Option<i64>,
}

impl InferShapes for Shape {
    fn infer_shapes(&self, inputs: &[SymTensor]) -> Result<Vec<SymTensor>, OpShapeError> {
        let [input] = inputs else {
            return Err(OpShapeError::IncorrectInputCount);
        };
        let Some(dims) = &input.shape else {
            return Ok([SymTensor::from_shape(
                Some(DataType::INT64),
                vec![SymDim::Unknown],
            )]
            .into());
        };

        let ndim = dims.len() as i64;
        let clamp = |index: i64| {
            let index = if index < 0 { index + ndim } else { index };
            index.clamp(0, ndim) as usize
        };
        let start = clamp(self.start);
        let end = clamp(self.end.unwrap_or(ndim)).max(start);
        let dims = &dims[start..end];

        Ok([SymTensor {
            elem_type: Some(DataType::INT64),
            shape: Some(vec![SymDim::Fixed(dims.len() as i64)]),
            value: dims.iter().map(|dim| dim.fixed()).collect(),
        }]
        .into())
    }
}

/// Return the axes for `Squeeze` or `Unsqueeze`, from either the second input
/// (opset 13+) or the `axes` attribute.
///
/// The outer `None` means the axes are given by an input with an unknown
/// value.
fn squeeze_axes<'a>(
    attr: Option<&'a [i64]>,
    inputs: &'a [SymTensor],
) -> Result<(&'a SymTensor, Option<Option<&'a [i64]>>), OpShapeError> {
    match inputs {
        [data] => Ok((data, Some(attr))),
        [data, axes] => Ok((data, axes.values().map(Some))),
        _ => Err(OpShapeError::IncorrectInputCount),
    }
}

/// Unsqueeze operator.
///
/// See <https://onnx.ai/onnx/operators/onnx__Unsqueeze.html>.
pub struct Unsqueeze {
    pub axes: Option<Vec<i64>>,
}

impl InferShapes for Unsqueeze {
    fn infer_shapes(&self, inputs: &[SymTensor]) -> Result<Vec<SymTensor>, OpShapeError> {
        let (data, axes) = squeeze_axes(self.axes.as_deref(), inputs)?;
        let unknown = SymTensor::unknown(data.elem_type);
        let (Some(Some(axes)), Some(dims)) = (axes, &data.shape) else {
            return Ok([unknown].into());
        };

        let out_ndim = dims.len() + axes.len();
        let resolved = resolve_axes(out_ndim, axes.iter())?;
        if resolved.len() != axes.len() {
            return Err(OpShapeError::InvalidValue);
        }

        // Axes are sorted, so each insertion position is within bounds.
        let mut out_shape = dims.clone();
        for axis in resolved {
            out_shape.insert(axis, SymDim::Fixed(1));
        }

        Ok([SymTensor {
            elem_type: data.elem_type,
            shape: Some(out_shape),
            value: data.value.clone(),
        }]
        .into())
    }
}

/// Squeeze operator.
///
/// See <https://onnx.ai/onnx/operators/onnx__Squeeze.html>.
pub struct Squeeze {
    pub axes: Option<Vec<i64>>,
}

impl InferShapes for Squeeze {
    fn infer_shapes(&self, inputs: &[SymTensor]) -> Result<Vec<SymTensor>, OpShapeError> {
        let (data, axes) = squeeze_axes(self.axes.as_deref(), inputs)?;
        let unknown = SymTensor::unknown(data.elem_type);
        let (Some(axes), Some(dims)) = (axes, &data.shape) else {
            return Ok([unknown].into());
        };

        let out_shape = match axes {
            Some(axes) => {
                let axes = resolve_axes(dims.len(), axes.iter())?;
                if axes
                    .iter()
                    .any(|&axis| matches!(dims[axis], SymDim::Fixed(size) if size != 1))
                {
                    return Err(OpShapeError::InvalidValue);
                }
                dims.iter()
                    .enumerate()
                    .filter(|(i, _)| !axes.contains(i))
                    .map(|(_, dim)| dim.clone())
                    .collect()
            }
            // Without axes, all 1-sized dims are removed. Whether a
            // non-fixed dim is removed is unknown.
            None => {
                if dims.iter().any(|dim| dim.fixed().is_none()) {
                    return Ok([unknown].into());
                }
                dims.iter()
                    .filter(|dim| **dim != SymDim::Fixed(1))
                    .cloned()
                    .collect()
            }
        };

        Ok([SymTensor {
            elem_type: data.elem_type,
            shape: Some(out_shape),
            value: data.value.clone(),
        }]
        .into())
    }
}

/// Gather operator.
///
/// See <https://onnx.ai/onnx/operators/onnx__Gather.html>.
pub struct Gather {
    pub axis: i64,
}

impl InferShapes for Gather {
    fn infer_shapes(&self, inputs: &[SymTensor]) -> Result<Vec<SymTensor>, OpShapeError> {
        let [data, indices] = inputs else {
            return Err(OpShapeError::IncorrectInputCount);
        };
        let (Some(data_dims), Some(index_dims)) = (&data.shape, &indices.shape) else {
            return Ok([SymTensor::unknown(data.elem_type)].into());
        };
        let axis = resolve_axis(data_dims.len(), self.axis).ok_or(OpShapeError::IncorrectRank)?;

        let out_shape: Vec<SymDim> = data_dims[..axis]
            .iter()
            .chain(index_dims)
            .chain(&data_dims[axis + 1..])
            .cloned()
            .collect();

        let value = match (data.values(), indices.values()) {
            (Some(values), Some(index_values)) if data_dims.len() == 1 => Some(
                index_values
                    .iter()
                    .map(|&index| {
                        resolve_axis(values.len(), index)
                            .map(|index| values[index])
                            .ok_or(OpShapeError::InvalidValue)
                    })
                    .collect::<Result<Vec<_>, _>>()?,
            ),
            _ => None,
        };

        Ok([SymTensor {
            elem_type: data.elem_type,
            shape: Some(out_shape),
            value,
        }]
        .into())
    }
}

/// Shape inference for `GlobalAveragePool` and `GlobalMaxPool`.
///
/// The spatial dimensions of the input are reduced to size 1.
pub struct GlobalPool;

impl InferShapes for GlobalPool {
    fn infer_shapes(&self, inputs: &[SymTensor]) -> Result<Vec<SymTensor>, OpShapeError> {
        let [input] = inputs else {
            return Err(OpShapeError::IncorrectInputCount);
        };
        let Some(dims) = &input.shape else {
            return Ok([SymTensor::unknown(input.elem_type)].into());
        };
        let [batch, chans, spatial @ ..] = &dims[..] else {
            return Err(OpShapeError::IncorrectRank);
        };

        let mut out_shape = vec![batch.clone(), chans.clone()];
        out_shape.extend(spatial.iter().map(|_| SymDim::Fixed(1)));
        Ok([SymTensor::from_shape(input.elem_type, out_shape)].into())
    }
}
