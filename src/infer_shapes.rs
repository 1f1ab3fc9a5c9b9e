//! Shape and type inference for ONNX graphs.
//!
//! Inference propagates the element types and shapes of graph inputs and
//! initializers through the graph's nodes, and records the results in the
//! graph's `value_info` and `output` lists. Dimensions can be fixed sizes,
//! named symbols (eg. a batch size of "N") or unknown.
//!
//! Shape inference for individual operators is implemented via the
//! [`InferShapes`] trait. This module provides implementations which are
//! shared by many operators, such as unary and broadcasting binary ops.

use smallvec::SmallVec;

use onnx_batchsize_proto::onnx::{DataType, DimValue, Dimension};

mod graph;
mod ops;

pub use graph::{InferShapesError, InferShapesOptions, infer_shapes};

/// Size of a single dimension.
#[derive(Clone, Debug, PartialEq)]
pub enum SymDim {
    Fixed(i64),

    /// A dimension whose size is identified by a name.
    ///
    /// Dimensions with the same name in the same graph have the same size.
    Named(String),

    Unknown,
}

impl SymDim {
    pub fn fixed(&self) -> Option<i64> {
        match self {
            Self::Fixed(size) => Some(*size),
            Self::Named(_) | Self::Unknown => None,
        }
    }
}

impl From<i64> for SymDim {
    fn from(size: i64) -> Self {
        Self::Fixed(size)
    }
}

impl From<&str> for SymDim {
    fn from(name: &str) -> Self {
        Self::Named(name.to_string())
    }
}

impl From<&Dimension> for SymDim {
    fn from(dim: &Dimension) -> Self {
        match &dim.value {
            Some(DimValue::Value(size)) => Self::Fixed(*size),
            Some(DimValue::Param(name)) if !name.is_empty() => Self::Named(name.clone()),
            Some(DimValue::Param(_)) | None => Self::Unknown,
        }
    }
}

impl From<&SymDim> for Dimension {
    fn from(dim: &SymDim) -> Self {
        match dim {
            SymDim::Fixed(size) => Dimension::fixed(*size),
            SymDim::Named(name) => Dimension::symbolic(name),
            SymDim::Unknown => Dimension::default(),
        }
    }
}

/// Element type, shape and, for small INT64 tensors, the value of a tensor.
///
/// Each part may be unknown. Values are tracked so that shapes computed at
/// runtime, such as the target shape of a `Reshape` produced by a `Concat`,
/// can be resolved.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SymTensor {
    pub elem_type: Option<DataType>,
    pub shape: Option<Vec<SymDim>>,

    /// Elements of an INT64 tensor, in row-major order.
    pub value: Option<Vec<i64>>,
}

impl SymTensor {
    /// Create a tensor with a known shape and unknown value.
    pub fn from_shape(elem_type: Option<DataType>, shape: Vec<SymDim>) -> Self {
        Self {
            elem_type,
            shape: Some(shape),
            value: None,
        }
    }

    /// Create a tensor with an unknown shape.
    pub fn unknown(elem_type: Option<DataType>) -> Self {
        Self {
            elem_type,
            shape: None,
            value: None,
        }
    }

    /// Create an INT64 vector with a known value.
    pub fn from_vec(value: Vec<i64>) -> Self {
        Self {
            elem_type: Some(DataType::INT64),
            shape: Some(vec![SymDim::Fixed(value.len() as i64)]),
            value: Some(value),
        }
    }

    pub fn ndim(&self) -> Option<usize> {
        self.shape.as_ref().map(|s| s.len())
    }

    /// Return the value of a tensor, if it is a known INT64 tensor.
    pub fn values(&self) -> Option<&[i64]> {
        self.value.as_deref()
    }

    /// Return the shape if every dimension has a fixed size.
    pub fn fixed_shape(&self) -> Option<Vec<i64>> {
        self.shape.as_ref()?.iter().map(|d| d.fixed()).collect()
    }
}

/// Errors when inferring the outputs of an individual operator.
#[derive(Clone, Debug, PartialEq)]
pub enum OpShapeError {
    /// Too many or too few inputs were provided for this operator.
    IncorrectInputCount,

    /// The input shapes are incompatible.
    ///
    /// Operator execution will fail if given inputs with these shapes.
    IncompatibleShapes,

    /// An input's rank does not match that expected by the operator.
    IncorrectRank,

    /// An operator input or attribute has an invalid value.
    InvalidValue,
}

impl std::fmt::Display for OpShapeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::IncorrectInputCount => write!(f, "incorrect input count"),
            Self::IncompatibleShapes => write!(f, "incompatible input shapes"),
            Self::IncorrectRank => write!(f, "input has incorrect rank"),
            Self::InvalidValue => write!(f, "invalid input or attribute value"),
        }
    }
}

impl std::error::Error for OpShapeError {}

/// Infer the types, shapes and optionally values of an operator's outputs
/// given its inputs.
///
/// Optional inputs which are omitted are passed as unknown tensors.
pub trait InferShapes {
    fn infer_shapes(&self, inputs: &[SymTensor]) -> Result<Vec<SymTensor>, OpShapeError>;
}

/// Shape inference for unary operators.
///
/// These operators take at least one input and return a single output with
/// the same type and shape as the first input. Additional inputs (eg. the
/// min/max of `Clip` or the scale of `LayerNormalization`) don't affect the
/// output shape.
pub struct UnaryOp;

impl InferShapes for UnaryOp {
    fn infer_shapes(&self, inputs: &[SymTensor]) -> Result<Vec<SymTensor>, OpShapeError> {
        let Some(data) = inputs.first() else {
            return Err(OpShapeError::IncorrectInputCount);
        };
        Ok([SymTensor {
            value: None,
            ..data.clone()
        }]
        .into())
    }
}

/// Broadcast two shapes together following ONNX's
/// [broadcasting rules](https://onnx.ai/onnx/repo-docs/Broadcasting.html).
pub fn broadcast_shapes(a: &[SymDim], b: &[SymDim]) -> Result<Vec<SymDim>, OpShapeError> {
    let a_pad = b.len().saturating_sub(a.len());
    let b_pad = a.len().saturating_sub(b.len());

    let one = SymDim::Fixed(1);
    let a_iter = std::iter::repeat_n(&one, a_pad).chain(a);
    let b_iter = std::iter::repeat_n(&one, b_pad).chain(b);

    let mut out_shape = Vec::with_capacity(a_pad + a.len());
    for (a, b) in a_iter.zip(b_iter) {
        let dim = match (a, b) {
            (SymDim::Unknown, _) | (_, SymDim::Unknown) if a != b => {
                // If one side is a fixed value other than 1, execution can
                // only succeed if the unknown dim has the same size.
                match (a, b) {
                    (SymDim::Fixed(1), _) | (_, SymDim::Fixed(1)) => SymDim::Unknown,
                    (SymDim::Fixed(size), _) | (_, SymDim::Fixed(size)) => SymDim::Fixed(*size),
                    _ => SymDim::Unknown,
                }
            }
            (a, b) if a == b => a.clone(),

            // If either size is 1, it will be broadcast against the other
            // size.
            (SymDim::Fixed(1), b) => b.clone(),
            (a, SymDim::Fixed(1)) => a.clone(),

            // If both sizes are fixed and different, we know execution
            // will fail.
            (SymDim::Fixed(_), SymDim::Fixed(_)) => {
                return Err(OpShapeError::IncompatibleShapes);
            }

            (SymDim::Named(_), SymDim::Fixed(size)) | (SymDim::Fixed(size), SymDim::Named(_)) => {
                SymDim::Fixed(*size)
            }

            // Two different names. The result is whichever is not 1, which is
            // not known here.
            _ => SymDim::Unknown,
        };
        out_shape.push(dim);
    }

    Ok(out_shape)
}

/// Shape inference for operators which broadcast their inputs together.
///
/// This covers binary arithmetic and comparison ops as well as variadic ops
/// such as `Sum` and `Max`.
pub struct BinaryOp {
    /// Element type of the output. If `None`, the output has the same type as
    /// the first input.
    pub out_type: Option<DataType>,
}

impl InferShapes for BinaryOp {
    fn infer_shapes(&self, inputs: &[SymTensor]) -> Result<Vec<SymTensor>, OpShapeError> {
        let Some(first) = inputs.first() else {
            return Err(OpShapeError::IncorrectInputCount);
        };
        let elem_type = self.out_type.or(first.elem_type);

        let mut out_shape: Vec<SymDim> = Vec::new();
        for input in inputs {
            let Some(shape) = &input.shape else {
                return Ok([SymTensor::unknown(elem_type)].into());
            };
            out_shape = broadcast_shapes(&out_shape, shape)?;
        }

        Ok([SymTensor::from_shape(elem_type, out_shape)].into())
    }
}

/// Shape inference for `Reduce*` operators.
#[derive(Clone, Debug, PartialEq)]
pub struct ReductionOp {
    /// Axes over which the reduction is applied.
    ///
    /// Reduction ops take the axes as an attribute in ONNX opset <= 13 and an
    /// input in opset 18+.
    pub axes: Option<Vec<i64>>,

    /// True if the reduced dimension is retained as a 1-sized dimension in the
    /// output.
    pub keep_dims: bool,
}

impl InferShapes for ReductionOp {
    fn infer_shapes(&self, inputs: &[SymTensor]) -> Result<Vec<SymTensor>, OpShapeError> {
        let (data, axes_input) = match inputs {
            [data] => (data, None),
            [data, axes] => (data, Some(axes)),
            _ => return Err(OpShapeError::IncorrectInputCount),
        };

        let Some(data_dims) = &data.shape else {
            return Ok([SymTensor::unknown(data.elem_type)].into());
        };
        let ndim = data_dims.len();

        let axes = match (axes_input, &self.axes) {
            (Some(axes), _) => {
                let Some(axes) = axes.values() else {
                    return Ok([SymTensor::unknown(data.elem_type)].into());
                };
                resolve_axes(ndim, axes.iter())?
            }
            (_, Some(axes)) => resolve_axes(ndim, axes.iter())?,
            _ => (0..ndim).collect(),
        };
        let axes = if axes.is_empty() {
            (0..ndim).collect()
        } else {
            axes
        };

        let mut out_shape = Vec::with_capacity(ndim);
        for (i, dim) in data_dims.iter().enumerate() {
            if !axes.contains(&i) {
                out_shape.push(dim.clone());
            } else if self.keep_dims {
                out_shape.push(SymDim::Fixed(1));
            }
        }

        Ok([SymTensor::from_shape(data.elem_type, out_shape)].into())
    }
}

/// Resolve an index given as a value in `[-len, len-1]` to a positive index in
/// `[0, len)`, or return None if the index is out of bounds.
fn resolve_index(len: usize, index: i64) -> Option<usize> {
    let len = len.min(i64::MAX as usize) as i64;
    if index < -len || index >= len {
        return None;
    }

    if index >= 0 {
        Some(index as usize)
    } else {
        Some((len + index) as usize)
    }
}

/// Resolve an axis given as a value in `[-ndim, ndim-1]` to the zero-based
/// dimension of a tensor with `ndim` dimensions.
pub(crate) fn resolve_axis(ndim: usize, axis: i64) -> Option<usize> {
    resolve_index(ndim, axis)
}

/// Resolve a sequence of axes values in `[-ndim, ndim-1]` to sorted,
/// de-duplicated dimension indexes in a tensor with `ndim` dimensions.
fn resolve_axes<'a, I: ExactSizeIterator<Item = &'a i64>>(
    ndim: usize,
    axes: I,
) -> Result<SmallVec<[usize; 4]>, OpShapeError> {
    let mut resolved_axes = SmallVec::with_capacity(axes.len());
    for axis in axes {
        let resolved = resolve_axis(ndim, *axis).ok_or(OpShapeError::IncorrectRank)?;
        resolved_axes.push(resolved);
    }
    resolved_axes.sort();
    resolved_axes.dedup();
    Ok(resolved_axes)
}

#[cfg(test)]
macro_rules! sym_shape {
    ($($x:expr),* $(,)?) => {
        crate::infer_shapes::SymTensor::from_shape(
            Some(onnx_batchsize_proto::onnx::DataType::FLOAT),
            vec![$(crate::infer_shapes::SymDim::from($x)),*],
        )
    };
}

#[cfg(test)]
pub(crate) use sym_shape;

#[cfg(test)]
mod tests {
    use onnx_batchsize_proto::onnx::{DataType, Dimension};
    use onnx_batchsize_testing::TestCases;

    use super::{
        BinaryOp, InferShapes, OpShapeError, ReductionOp, SymDim, SymTensor, UnaryOp,
        resolve_axis,
    };

    #[test]
    fn test_sym_dim_conversion() {
        let dims = [
            Dimension::fixed(3),
            Dimension::symbolic("N"),
            Dimension::symbolic(""),
            Dimension::default(),
        ];
        let sym: Vec<SymDim> = dims.iter().map(SymDim::from).collect();
        assert_eq!(
            sym,
            [
                SymDim::Fixed(3),
                SymDim::Named("N".to_string()),
                SymDim::Unknown,
                SymDim::Unknown
            ]
        );

        let back: Vec<Dimension> = sym.iter().map(Dimension::from).collect();
        assert_eq!(back[0].dim_value(), Some(3));
        assert_eq!(back[1].dim_param(), Some("N"));
        assert_eq!(back[3].value, None);
    }

    #[test]
    fn test_unary_op_infer() {
        let input = SymTensor {
            value: Some(vec![1, 2]),
            ..sym_shape!("batch", 16, "seq", 24)
        };
        let result = UnaryOp.infer_shapes(&[input]).unwrap();
        assert_eq!(result, [sym_shape!("batch", 16, "seq", 24)]);

        let err = UnaryOp.infer_shapes(&[]).err().unwrap();
        assert_eq!(err, OpShapeError::IncorrectInputCount);
    }

    #[test]
    fn test_binary_op_infer() {
        #[derive(Debug)]
        struct Case {
            lhs: SymTensor,
            rhs: SymTensor,
            expected: Result<SymTensor, OpShapeError>,
        }

        let cases = [
            Case {
                lhs: sym_shape!("batch"),
                rhs: sym_shape!("batch"),
                expected: Ok(sym_shape!("batch")),
            },
            Case {
                lhs: sym_shape!(2, 3),
                rhs: sym_shape!(2, 3),
                expected: Ok(sym_shape!(2, 3)),
            },
            Case {
                lhs: sym_shape!(1, 5),
                rhs: sym_shape!(4, 1),
                expected: Ok(sym_shape!(4, 5)),
            },
            Case {
                lhs: sym_shape!("N", 3, 8),
                rhs: sym_shape!(8),
                expected: Ok(sym_shape!("N", 3, 8)),
            },
            Case {
                lhs: sym_shape!("N", 1),
                rhs: sym_shape!(4, "M"),
                expected: Ok(sym_shape!(4, "M")),
            },
            Case {
                lhs: sym_shape!("a"),
                rhs: sym_shape!("b"),
                expected: Ok(SymTensor::from_shape(
                    Some(DataType::FLOAT),
                    vec![SymDim::Unknown],
                )),
            },
            Case {
                lhs: SymTensor::from_shape(Some(DataType::FLOAT), vec![SymDim::Unknown]),
                rhs: sym_shape!(5),
                expected: Ok(sym_shape!(5)),
            },
            Case {
                lhs: sym_shape!(2, 3),
                rhs: sym_shape!(3, 3),
                expected: Err(OpShapeError::IncompatibleShapes),
            },
            Case {
                lhs: SymTensor::unknown(Some(DataType::FLOAT)),
                rhs: sym_shape!(3, 3),
                expected: Ok(SymTensor::unknown(Some(DataType::FLOAT))),
            },
        ];

        cases.test_each(|case| {
            let op = BinaryOp { out_type: None };
            let result = op
                .infer_shapes(&[case.lhs.clone(), case.rhs.clone()])
                .map(|mut outputs| outputs.remove(0));
            assert_eq!(result, case.expected);
        })
    }

    #[test]
    fn test_comparison_output_type() {
        let op = BinaryOp {
            out_type: Some(DataType::BOOL),
        };
        let result = op
            .infer_shapes(&[sym_shape!("N", 4), sym_shape!(1)])
            .unwrap();
        assert_eq!(result[0].elem_type, Some(DataType::BOOL));
        assert_eq!(result[0].shape, sym_shape!("N", 4).shape);
    }

    #[test]
    fn test_reduction_op_infer() {
        #[derive(Debug)]
        struct Case {
            op: ReductionOp,
            inputs: Vec<SymTensor>,
            expected: Result<SymTensor, OpShapeError>,
        }

        let cases = [
            Case {
                op: ReductionOp {
                    axes: Some(vec![-1]),
                    keep_dims: true,
                },
                inputs: vec![sym_shape!("N", 16, 8)],
                expected: Ok(sym_shape!("N", 16, 1)),
            },
            Case {
                op: ReductionOp {
                    axes: None,
                    keep_dims: false,
                },
                inputs: vec![sym_shape!("N", 16, 8), SymTensor::from_vec(vec![1, 2])],
                expected: Ok(sym_shape!("N")),
            },
            Case {
                op: ReductionOp {
                    axes: None,
                    keep_dims: false,
                },
                inputs: vec![sym_shape!("N", 16)],
                expected: Ok(sym_shape!()),
            },
            Case {
                op: ReductionOp {
                    axes: Some(vec![3]),
                    keep_dims: false,
                },
                inputs: vec![sym_shape!("N", 16)],
                expected: Err(OpShapeError::IncorrectRank),
            },
        ];

        cases.test_each(|case| {
            let result = case
                .op
                .infer_shapes(&case.inputs)
                .map(|mut outputs| outputs.remove(0));
            assert_eq!(result, case.expected);
        })
    }

    #[test]
    fn test_resolve_axis() {
        assert_eq!(resolve_axis(3, 0), Some(0));
        assert_eq!(resolve_axis(3, -1), Some(2));
        assert_eq!(resolve_axis(3, 3), None);
        assert_eq!(resolve_axis(3, -4), None);
    }
}
