//! ONNX model Protocol Buffers types.
//!
//! The types in this module correspond to Protocol Buffers messages defined
//! in [onnx.proto](https://github.com/onnx/onnx/blob/main/onnx/onnx.proto3).
//! See the `.proto` file for detailed information on each type and field.
//!
//! Each type interprets only the fields needed to edit tensor shapes and
//! graph structure. All other fields are kept in an [`UnknownFields`] member
//! and written back unchanged when the message is encoded.

use std::io::Write;

use crate::protobuf::{
    DecodeMessage, EncodeMessage, FieldWriter, Fields, ProtobufError, ReadValue, UnknownFields,
    len,
};

#[derive(Copy, Clone, PartialEq, Debug)]
pub struct AttributeType(pub i32);

impl AttributeType {
    pub const UNDEFINED: Self = Self(0);
    pub const FLOAT: Self = Self(1);
    pub const INT: Self = Self(2);
    pub const STRING: Self = Self(3);
    pub const TENSOR: Self = Self(4);
    pub const GRAPH: Self = Self(5);
    pub const FLOATS: Self = Self(6);
    pub const INTS: Self = Self(7);
    pub const STRINGS: Self = Self(8);
    pub const TENSORS: Self = Self(9);
    pub const GRAPHS: Self = Self(10);
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct AttributeProto {
    pub name: Option<String>,
    pub f: Option<f32>,
    pub i: Option<i64>,
    pub s: Option<Vec<u8>>,
    pub t: Option<TensorProto>,
    pub g: Option<GraphProto>,
    pub floats: Vec<f32>,
    pub ints: Vec<i64>,
    pub graphs: Vec<GraphProto>,
    pub r#type: Option<AttributeType>,
    pub unknown: UnknownFields,
}

impl AttributeProto {
    const NAME: u64 = 1;
    const F: u64 = 2;
    const I: u64 = 3;
    const S: u64 = 4;
    const T: u64 = 5;
    const G: u64 = 6;
    const FLOATS: u64 = 7;
    const INTS: u64 = 8;
    const GRAPHS: u64 = 11;
    const TYPE: u64 = 20;

    /// Create an `INT` attribute.
    pub fn int(name: &str, value: i64) -> Self {
        Self {
            name: Some(name.to_string()),
            i: Some(value),
            r#type: Some(AttributeType::INT),
            ..Default::default()
        }
    }

    /// Create an `INTS` attribute.
    pub fn ints(name: &str, values: &[i64]) -> Self {
        Self {
            name: Some(name.to_string()),
            ints: values.to_vec(),
            r#type: Some(AttributeType::INTS),
            ..Default::default()
        }
    }

    /// Create a `TENSOR` attribute.
    pub fn tensor(name: &str, value: TensorProto) -> Self {
        Self {
            name: Some(name.to_string()),
            t: Some(value),
            r#type: Some(AttributeType::TENSOR),
            ..Default::default()
        }
    }

    /// Iterate over the subgraphs held by this attribute.
    pub fn subgraphs(&self) -> impl Iterator<Item = &GraphProto> {
        self.g.iter().chain(&self.graphs)
    }
}

impl DecodeMessage for AttributeProto {
    fn decode_fields<R: ReadValue>(mut fields: Fields<R>) -> Result<Self, ProtobufError> {
        let mut msg = Self::default();
        while let Some(mut field) = fields.next()? {
            match field.number() {
                Self::NAME => {
                    msg.name = Some(field.read_string()?);
                }
                Self::F => {
                    msg.f = Some(field.get_float()?);
                }
                Self::I => {
                    msg.i = Some(field.get_int64()?);
                }
                Self::S => {
                    msg.s = Some(field.read_bytes()?);
                }
                Self::T => {
                    msg.t = Some(TensorProto::decode_field(&mut field)?);
                }
                Self::G => {
                    msg.g = Some(GraphProto::decode_field(&mut field)?);
                }
                Self::FLOATS => {
                    for float in field.read_repeated_float()? {
                        msg.floats.push(float?);
                    }
                }
                Self::INTS => {
                    for int in field.read_repeated_int64()? {
                        msg.ints.push(int?);
                    }
                }
                Self::GRAPHS => {
                    msg.graphs.push(GraphProto::decode_field(&mut field)?);
                }
                Self::TYPE => {
                    msg.r#type = Some(AttributeType(field.get_enum()?));
                }
                _ => msg.unknown.read(&mut field)?,
            }
        }
        Ok(msg)
    }
}

impl EncodeMessage for AttributeProto {
    fn encoded_len(&self) -> usize {
        self.name.as_ref().map_or(0, |s| len::bytes(Self::NAME, s.len()))
            + self.f.map_or(0, |_| len::fixed32(Self::F))
            + self.i.map_or(0, |i| len::int64(Self::I, i))
            + self.s.as_ref().map_or(0, |s| len::bytes(Self::S, s.len()))
            + self.t.as_ref().map_or(0, |t| len::message(Self::T, t))
            + self.g.as_ref().map_or(0, |g| len::message(Self::G, g))
            + len::packed_float(Self::FLOATS, &self.floats)
            + len::packed_int64(Self::INTS, &self.ints)
            + self
                .graphs
                .iter()
                .map(|g| len::message(Self::GRAPHS, g))
                .sum::<usize>()
            + self.r#type.map_or(0, |t| len::int32(Self::TYPE, t.0))
            + self.unknown.encoded_len()
    }

    fn encode_fields<W: Write>(&self, writer: &mut FieldWriter<W>) -> Result<(), ProtobufError> {
        if let Some(name) = &self.name {
            writer.write_string(Self::NAME, name)?;
        }
        if let Some(f) = self.f {
            writer.write_float(Self::F, f)?;
        }
        if let Some(i) = self.i {
            writer.write_int64(Self::I, i)?;
        }
        if let Some(s) = &self.s {
            writer.write_bytes(Self::S, s)?;
        }
        if let Some(t) = &self.t {
            writer.write_message(Self::T, t)?;
        }
        if let Some(g) = &self.g {
            writer.write_message(Self::G, g)?;
        }
        writer.write_packed_float(Self::FLOATS, &self.floats)?;
        writer.write_packed_int64(Self::INTS, &self.ints)?;
        for g in &self.graphs {
            writer.write_message(Self::GRAPHS, g)?;
        }
        if let Some(t) = self.r#type {
            writer.write_int32(Self::TYPE, t.0)?;
        }
        self.unknown.encode(writer)
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct NodeProto {
    pub input: Vec<String>,
    pub output: Vec<String>,
    pub name: Option<String>,
    pub op_type: Option<String>,
    pub domain: Option<String>,
    pub attribute: Vec<AttributeProto>,
    pub unknown: UnknownFields,
}

impl NodeProto {
    const INPUT: u64 = 1;
    const OUTPUT: u64 = 2;
    const NAME: u64 = 3;
    const OP_TYPE: u64 = 4;
    const ATTRIBUTE: u64 = 5;
    const DOMAIN: u64 = 7;

    /// Create a node with the given operator type, inputs and outputs.
    pub fn new(op_type: &str, input: &[&str], output: &[&str]) -> Self {
        Self {
            input: input.iter().map(|s| s.to_string()).collect(),
            output: output.iter().map(|s| s.to_string()).collect(),
            op_type: Some(op_type.to_string()),
            ..Default::default()
        }
    }

    /// Set the node name.
    pub fn with_name(mut self, name: &str) -> Self {
        self.name = Some(name.to_string());
        self
    }

    /// Add an attribute to the node.
    pub fn with_attr(mut self, attr: AttributeProto) -> Self {
        self.attribute.push(attr);
        self
    }

    /// Return the operator type, or an empty string if unset.
    pub fn op_type(&self) -> &str {
        self.op_type.as_deref().unwrap_or_default()
    }

    /// Return the first attribute with a given name.
    pub fn attr(&self, name: &str) -> Option<&AttributeProto> {
        self.attribute
            .iter()
            .find(|attr| attr.name.as_deref() == Some(name))
    }
}

impl DecodeMessage for NodeProto {
    fn decode_fields<R: ReadValue>(mut fields: Fields<R>) -> Result<Self, ProtobufError> {
        let mut msg = Self::default();
        while let Some(mut field) = fields.next()? {
            match field.number() {
                Self::INPUT => {
                    msg.input.push(field.read_string()?);
                }
                Self::OUTPUT => {
                    msg.output.push(field.read_string()?);
                }
                Self::NAME => {
                    msg.name = Some(field.read_string()?);
                }
                Self::OP_TYPE => {
                    msg.op_type = Some(field.read_string()?);
                }
                Self::ATTRIBUTE => {
                    msg.attribute
                        .push(AttributeProto::decode_field(&mut field)?);
                }
                Self::DOMAIN => {
                    msg.domain = Some(field.read_string()?);
                }
                _ => msg.unknown.read(&mut field)?,
            }
        }
        Ok(msg)
    }
}

impl EncodeMessage for NodeProto {
    fn encoded_len(&self) -> usize {
        self.input
            .iter()
            .map(|s| len::bytes(Self::INPUT, s.len()))
            .sum::<usize>()
            + self
                .output
                .iter()
                .map(|s| len::bytes(Self::OUTPUT, s.len()))
                .sum::<usize>()
            + self.name.as_ref().map_or(0, |s| len::bytes(Self::NAME, s.len()))
            + self
                .op_type
                .as_ref()
                .map_or(0, |s| len::bytes(Self::OP_TYPE, s.len()))
            + self
                .attribute
                .iter()
                .map(|a| len::message(Self::ATTRIBUTE, a))
                .sum::<usize>()
            + self
                .domain
                .as_ref()
                .map_or(0, |s| len::bytes(Self::DOMAIN, s.len()))
            + self.unknown.encoded_len()
    }

    fn encode_fields<W: Write>(&self, writer: &mut FieldWriter<W>) -> Result<(), ProtobufError> {
        for input in &self.input {
            writer.write_string(Self::INPUT, input)?;
        }
        for output in &self.output {
            writer.write_string(Self::OUTPUT, output)?;
        }
        if let Some(name) = &self.name {
            writer.write_string(Self::NAME, name)?;
        }
        if let Some(op_type) = &self.op_type {
            writer.write_string(Self::OP_TYPE, op_type)?;
        }
        for attr in &self.attribute {
            writer.write_message(Self::ATTRIBUTE, attr)?;
        }
        if let Some(domain) = &self.domain {
            writer.write_string(Self::DOMAIN, domain)?;
        }
        self.unknown.encode(writer)
    }
}

#[derive(Clone, Default, PartialEq)]
pub struct TensorProto {
    pub dims: Vec<i64>,
    pub data_type: Option<DataType>,
    pub int64_data: Vec<i64>,
    pub name: Option<String>,

    /// Tensor data as bytes in packed little-endian order.
    pub raw_data: Option<Vec<u8>>,

    pub data_location: Option<DataLocation>,
    pub unknown: UnknownFields,
}

impl TensorProto {
    const DIMS: u64 = 1;
    const DATA_TYPE: u64 = 2;
    const INT64_DATA: u64 = 7;
    const NAME: u64 = 8;
    const RAW_DATA: u64 = 9;
    const DATA_LOCATION: u64 = 14;

    /// Create an INT64 tensor which stores its elements in `int64_data`.
    pub fn from_int64_data(name: &str, dims: &[i64], data: &[i64]) -> Self {
        Self {
            dims: dims.to_vec(),
            data_type: Some(DataType::INT64),
            int64_data: data.to_vec(),
            name: Some(name.to_string()),
            ..Default::default()
        }
    }

    /// Create an INT64 tensor which stores its elements in `raw_data`.
    pub fn from_int64_raw(name: &str, dims: &[i64], data: &[i64]) -> Self {
        Self {
            dims: dims.to_vec(),
            data_type: Some(DataType::INT64),
            raw_data: Some(data.iter().flat_map(|x| x.to_le_bytes()).collect()),
            name: Some(name.to_string()),
            ..Default::default()
        }
    }

    /// Create a FLOAT tensor which stores its elements in `raw_data`.
    pub fn from_f32_raw(name: &str, dims: &[i64], data: &[f32]) -> Self {
        Self {
            dims: dims.to_vec(),
            data_type: Some(DataType::FLOAT),
            raw_data: Some(data.iter().flat_map(|x| x.to_le_bytes()).collect()),
            name: Some(name.to_string()),
            ..Default::default()
        }
    }

    /// Return true if the tensor data is stored in an external file.
    pub fn is_external(&self) -> bool {
        self.data_location == Some(DataLocation::EXTERNAL)
    }
}

impl std::fmt::Debug for TensorProto {
    fn fmt(&self, fmt: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        fmt.debug_struct("TensorProto")
            .field("dims", &self.dims)
            .field("data_type", &self.data_type)
            .field("name", &self.name)
            .field("int64_data", &self.int64_data)
            .field("raw_data_len", &self.raw_data.as_ref().map(|d| d.len()))
            .field("data_location", &self.data_location)
            .field("unknown", &self.unknown)
            .finish()
    }
}

impl DecodeMessage for TensorProto {
    fn decode_fields<R: ReadValue>(mut fields: Fields<R>) -> Result<Self, ProtobufError> {
        let mut msg = TensorProto::default();
        while let Some(mut field) = fields.next()? {
            match field.number() {
                Self::DIMS => {
                    for dim in field.read_repeated_int64()? {
                        msg.dims.push(dim?);
                    }
                }
                Self::DATA_TYPE => {
                    msg.data_type = Some(DataType(field.get_enum()?));
                }
                Self::INT64_DATA => {
                    for int64 in field.read_repeated_int64()? {
                        msg.int64_data.push(int64?);
                    }
                }
                Self::NAME => {
                    msg.name = Some(field.read_string()?);
                }
                Self::RAW_DATA => {
                    msg.raw_data = Some(field.read_bytes()?);
                }
                Self::DATA_LOCATION => {
                    msg.data_location = Some(DataLocation(field.get_enum()?));
                }
                _ => msg.unknown.read(&mut field)?,
            }
        }
        Ok(msg)
    }
}

impl EncodeMessage for TensorProto {
    fn encoded_len(&self) -> usize {
        len::packed_int64(Self::DIMS, &self.dims)
            + self.data_type.map_or(0, |t| len::int32(Self::DATA_TYPE, t.0))
            + len::packed_int64(Self::INT64_DATA, &self.int64_data)
            + self.name.as_ref().map_or(0, |s| len::bytes(Self::NAME, s.len()))
            + self
                .raw_data
                .as_ref()
                .map_or(0, |d| len::bytes(Self::RAW_DATA, d.len()))
            + self
                .data_location
                .map_or(0, |l| len::int32(Self::DATA_LOCATION, l.0))
            + self.unknown.encoded_len()
    }

    fn encode_fields<W: Write>(&self, writer: &mut FieldWriter<W>) -> Result<(), ProtobufError> {
        writer.write_packed_int64(Self::DIMS, &self.dims)?;
        if let Some(data_type) = self.data_type {
            writer.write_int32(Self::DATA_TYPE, data_type.0)?;
        }
        writer.write_packed_int64(Self::INT64_DATA, &self.int64_data)?;
        if let Some(name) = &self.name {
            writer.write_string(Self::NAME, name)?;
        }
        if let Some(raw_data) = &self.raw_data {
            writer.write_bytes(Self::RAW_DATA, raw_data)?;
        }
        if let Some(location) = self.data_location {
            writer.write_int32(Self::DATA_LOCATION, location.0)?;
        }
        self.unknown.encode(writer)
    }
}

#[derive(Copy, Clone, PartialEq, Debug)]
pub struct DataLocation(pub i32);

impl DataLocation {
    pub const DEFAULT: Self = Self(0);
    pub const EXTERNAL: Self = Self(1);
}

#[derive(Copy, Clone, PartialEq, Debug)]
pub struct DataType(pub i32);

impl DataType {
    pub const UNDEFINED: Self = Self(0);
    pub const FLOAT: Self = Self(1);
    pub const UINT8: Self = Self(2);
    pub const INT8: Self = Self(3);
    pub const UINT16: Self = Self(4);
    pub const INT16: Self = Self(5);
    pub const INT32: Self = Self(6);
    pub const INT64: Self = Self(7);
    pub const STRING: Self = Self(8);
    pub const BOOL: Self = Self(9);
    pub const FLOAT16: Self = Self(10);
    pub const DOUBLE: Self = Self(11);
    pub const UINT32: Self = Self(12);
    pub const UINT64: Self = Self(13);
    pub const BFLOAT16: Self = Self(16);
}

/// Value of a [`Dimension`].
///
/// In the schema `dim_value` and `dim_param` are members of a `oneof`, so
/// setting one clears the other.
#[derive(Clone, Debug, PartialEq)]
pub enum DimValue {
    /// Fixed size (`dim_value`).
    Value(i64),
    /// Symbolic name (`dim_param`).
    Param(String),
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Dimension {
    pub value: Option<DimValue>,
    pub unknown: UnknownFields,
}

impl Dimension {
    const DIM_VALUE: u64 = 1;
    const DIM_PARAM: u64 = 2;

    pub fn fixed(size: i64) -> Self {
        Self {
            value: Some(DimValue::Value(size)),
            ..Default::default()
        }
    }

    pub fn symbolic(name: &str) -> Self {
        Self {
            value: Some(DimValue::Param(name.to_string())),
            ..Default::default()
        }
    }

    pub fn dim_value(&self) -> Option<i64> {
        match &self.value {
            Some(DimValue::Value(size)) => Some(*size),
            _ => None,
        }
    }

    pub fn dim_param(&self) -> Option<&str> {
        match &self.value {
            Some(DimValue::Param(name)) => Some(name),
            _ => None,
        }
    }
}

impl DecodeMessage for Dimension {
    fn decode_fields<R: ReadValue>(mut fields: Fields<R>) -> Result<Self, ProtobufError> {
        let mut msg = Self::default();
        while let Some(mut field) = fields.next()? {
            match field.number() {
                Self::DIM_VALUE => {
                    msg.value = Some(DimValue::Value(field.get_int64()?));
                }
                Self::DIM_PARAM => {
                    msg.value = Some(DimValue::Param(field.read_string()?));
                }
                _ => msg.unknown.read(&mut field)?,
            }
        }
        Ok(msg)
    }
}

impl EncodeMessage for Dimension {
    fn encoded_len(&self) -> usize {
        let value_len = match &self.value {
            Some(DimValue::Value(size)) => len::int64(Self::DIM_VALUE, *size),
            Some(DimValue::Param(name)) => len::bytes(Self::DIM_PARAM, name.len()),
            None => 0,
        };
        value_len + self.unknown.encoded_len()
    }

    fn encode_fields<W: Write>(&self, writer: &mut FieldWriter<W>) -> Result<(), ProtobufError> {
        match &self.value {
            Some(DimValue::Value(size)) => writer.write_int64(Self::DIM_VALUE, *size)?,
            Some(DimValue::Param(name)) => writer.write_string(Self::DIM_PARAM, name)?,
            None => {}
        }
        self.unknown.encode(writer)
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct TensorShapeProto {
    pub dim: Vec<Dimension>,
    pub unknown: UnknownFields,
}

impl TensorShapeProto {
    const DIM: u64 = 1;
}

impl DecodeMessage for TensorShapeProto {
    fn decode_fields<R: ReadValue>(mut fields: Fields<R>) -> Result<Self, ProtobufError> {
        let mut msg = Self::default();
        while let Some(mut field) = fields.next()? {
            match field.number() {
                Self::DIM => {
                    msg.dim.push(Dimension::decode_field(&mut field)?);
                }
                _ => msg.unknown.read(&mut field)?,
            }
        }
        Ok(msg)
    }
}

impl EncodeMessage for TensorShapeProto {
    fn encoded_len(&self) -> usize {
        self.dim
            .iter()
            .map(|d| len::message(Self::DIM, d))
            .sum::<usize>()
            + self.unknown.encoded_len()
    }

    fn encode_fields<W: Write>(&self, writer: &mut FieldWriter<W>) -> Result<(), ProtobufError> {
        for dim in &self.dim {
            writer.write_message(Self::DIM, dim)?;
        }
        self.unknown.encode(writer)
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct TypeProtoTensor {
    pub elem_type: Option<DataType>,
    pub shape: Option<TensorShapeProto>,
    pub unknown: UnknownFields,
}

impl TypeProtoTensor {
    const ELEM_TYPE: u64 = 1;
    const SHAPE: u64 = 2;
}

impl DecodeMessage for TypeProtoTensor {
    fn decode_fields<R: ReadValue>(mut fields: Fields<R>) -> Result<Self, ProtobufError> {
        let mut msg = Self::default();
        while let Some(mut field) = fields.next()? {
            match field.number() {
                Self::ELEM_TYPE => {
                    msg.elem_type = Some(DataType(field.get_enum()?));
                }
                Self::SHAPE => {
                    msg.shape = Some(TensorShapeProto::decode_field(&mut field)?);
                }
                _ => msg.unknown.read(&mut field)?,
            }
        }
        Ok(msg)
    }
}

impl EncodeMessage for TypeProtoTensor {
    fn encoded_len(&self) -> usize {
        self.elem_type.map_or(0, |t| len::int32(Self::ELEM_TYPE, t.0))
            + self.shape.as_ref().map_or(0, |s| len::message(Self::SHAPE, s))
            + self.unknown.encoded_len()
    }

    fn encode_fields<W: Write>(&self, writer: &mut FieldWriter<W>) -> Result<(), ProtobufError> {
        if let Some(elem_type) = self.elem_type {
            writer.write_int32(Self::ELEM_TYPE, elem_type.0)?;
        }
        if let Some(shape) = &self.shape {
            writer.write_message(Self::SHAPE, shape)?;
        }
        self.unknown.encode(writer)
    }
}

/// Type of a value.
///
/// Only the tensor variant of the `value` oneof is interpreted. Sequence, map,
/// optional and sparse tensor types are kept as unknown fields.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct TypeProto {
    pub tensor_type: Option<TypeProtoTensor>,
    pub unknown: UnknownFields,
}

impl TypeProto {
    const TENSOR_TYPE: u64 = 1;
}

impl DecodeMessage for TypeProto {
    fn decode_fields<R: ReadValue>(mut fields: Fields<R>) -> Result<Self, ProtobufError> {
        let mut msg = Self::default();
        while let Some(mut field) = fields.next()? {
            match field.number() {
                Self::TENSOR_TYPE => {
                    msg.tensor_type = Some(TypeProtoTensor::decode_field(&mut field)?);
                }
                _ => msg.unknown.read(&mut field)?,
            }
        }
        Ok(msg)
    }
}

impl EncodeMessage for TypeProto {
    fn encoded_len(&self) -> usize {
        self.tensor_type
            .as_ref()
            .map_or(0, |t| len::message(Self::TENSOR_TYPE, t))
            + self.unknown.encoded_len()
    }

    fn encode_fields<W: Write>(&self, writer: &mut FieldWriter<W>) -> Result<(), ProtobufError> {
        if let Some(tensor_type) = &self.tensor_type {
            writer.write_message(Self::TENSOR_TYPE, tensor_type)?;
        }
        self.unknown.encode(writer)
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct ValueInfoProto {
    pub name: Option<String>,
    pub r#type: Option<TypeProto>,
    pub unknown: UnknownFields,
}

impl ValueInfoProto {
    const NAME: u64 = 1;
    const TYPE: u64 = 2;

    /// Create a description of a tensor value with a known shape.
    pub fn tensor(name: &str, elem_type: Option<DataType>, dims: Vec<Dimension>) -> Self {
        Self {
            name: Some(name.to_string()),
            r#type: Some(TypeProto {
                tensor_type: Some(TypeProtoTensor {
                    elem_type,
                    shape: Some(TensorShapeProto {
                        dim: dims,
                        ..Default::default()
                    }),
                    ..Default::default()
                }),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    pub fn name(&self) -> &str {
        self.name.as_deref().unwrap_or_default()
    }

    /// Return the element type if this value is a tensor.
    pub fn elem_type(&self) -> Option<DataType> {
        self.r#type.as_ref()?.tensor_type.as_ref()?.elem_type
    }

    /// Return the shape if this value is a tensor with a shape.
    pub fn shape(&self) -> Option<&TensorShapeProto> {
        self.r#type.as_ref()?.tensor_type.as_ref()?.shape.as_ref()
    }

    pub fn shape_mut(&mut self) -> Option<&mut TensorShapeProto> {
        self.r#type.as_mut()?.tensor_type.as_mut()?.shape.as_mut()
    }
}

impl DecodeMessage for ValueInfoProto {
    fn decode_fields<R: ReadValue>(mut fields: Fields<R>) -> Result<Self, ProtobufError> {
        let mut msg = Self::default();
        while let Some(mut field) = fields.next()? {
            match field.number() {
                Self::NAME => {
                    msg.name = Some(field.read_string()?);
                }
                Self::TYPE => {
                    msg.r#type = Some(TypeProto::decode_field(&mut field)?);
                }
                _ => msg.unknown.read(&mut field)?,
            }
        }
        Ok(msg)
    }
}

impl EncodeMessage for ValueInfoProto {
    fn encoded_len(&self) -> usize {
        self.name.as_ref().map_or(0, |s| len::bytes(Self::NAME, s.len()))
            + self.r#type.as_ref().map_or(0, |t| len::message(Self::TYPE, t))
            + self.unknown.encoded_len()
    }

    fn encode_fields<W: Write>(&self, writer: &mut FieldWriter<W>) -> Result<(), ProtobufError> {
        if let Some(name) = &self.name {
            writer.write_string(Self::NAME, name)?;
        }
        if let Some(r#type) = &self.r#type {
            writer.write_message(Self::TYPE, r#type)?;
        }
        self.unknown.encode(writer)
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct GraphProto {
    pub node: Vec<NodeProto>,
    pub name: Option<String>,
    pub initializer: Vec<TensorProto>,
    pub input: Vec<ValueInfoProto>,
    pub output: Vec<ValueInfoProto>,
    pub value_info: Vec<ValueInfoProto>,
    pub unknown: UnknownFields,
}

impl GraphProto {
    const NODE: u64 = 1;
    const NAME: u64 = 2;
    const INITIALIZER: u64 = 5;
    const INPUT: u64 = 11;
    const OUTPUT: u64 = 12;
    const VALUE_INFO: u64 = 13;

    /// Return the first initializer with a given name.
    pub fn get_initializer(&self, name: &str) -> Option<&TensorProto> {
        self.initializer
            .iter()
            .find(|init| init.name.as_deref() == Some(name))
    }
}

impl DecodeMessage for GraphProto {
    fn decode_fields<R: ReadValue>(mut fields: Fields<R>) -> Result<Self, ProtobufError> {
        let mut msg = Self::default();
        while let Some(mut field) = fields.next()? {
            match field.number() {
                Self::NODE => {
                    msg.node.push(NodeProto::decode_field(&mut field)?);
                }
                Self::NAME => {
                    msg.name = Some(field.read_string()?);
                }
                Self::INITIALIZER => {
                    msg.initializer.push(TensorProto::decode_field(&mut field)?);
                }
                Self::INPUT => {
                    msg.input.push(ValueInfoProto::decode_field(&mut field)?);
                }
                Self::OUTPUT => {
                    msg.output.push(ValueInfoProto::decode_field(&mut field)?);
                }
                Self::VALUE_INFO => {
                    msg.value_info
                        .push(ValueInfoProto::decode_field(&mut field)?);
                }
                _ => msg.unknown.read(&mut field)?,
            }
        }
        Ok(msg)
    }
}

impl EncodeMessage for GraphProto {
    fn encoded_len(&self) -> usize {
        let values_len = |number, values: &[ValueInfoProto]| {
            values
                .iter()
                .map(|v| len::message(number, v))
                .sum::<usize>()
        };

        self.node
            .iter()
            .map(|n| len::message(Self::NODE, n))
            .sum::<usize>()
            + self.name.as_ref().map_or(0, |s| len::bytes(Self::NAME, s.len()))
            + self
                .initializer
                .iter()
                .map(|t| len::message(Self::INITIALIZER, t))
                .sum::<usize>()
            + values_len(Self::INPUT, &self.input)
            + values_len(Self::OUTPUT, &self.output)
            + values_len(Self::VALUE_INFO, &self.value_info)
            + self.unknown.encoded_len()
    }

    fn encode_fields<W: Write>(&self, writer: &mut FieldWriter<W>) -> Result<(), ProtobufError> {
        for node in &self.node {
            writer.write_message(Self::NODE, node)?;
        }
        if let Some(name) = &self.name {
            writer.write_string(Self::NAME, name)?;
        }
        for init in &self.initializer {
            writer.write_message(Self::INITIALIZER, init)?;
        }
        for input in &self.input {
            writer.write_message(Self::INPUT, input)?;
        }
        for output in &self.output {
            writer.write_message(Self::OUTPUT, output)?;
        }
        for value in &self.value_info {
            writer.write_message(Self::VALUE_INFO, value)?;
        }
        self.unknown.encode(writer)
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct OperatorSetIdProto {
    pub domain: Option<String>,
    pub version: Option<i64>,
    pub unknown: UnknownFields,
}

impl OperatorSetIdProto {
    const DOMAIN: u64 = 1;
    const VERSION: u64 = 2;
}

impl DecodeMessage for OperatorSetIdProto {
    fn decode_fields<R: ReadValue>(mut fields: Fields<R>) -> Result<Self, ProtobufError> {
        let mut msg = Self::default();
        while let Some(mut field) = fields.next()? {
            match field.number() {
                Self::DOMAIN => {
                    msg.domain = Some(field.read_string()?);
                }
                Self::VERSION => {
                    msg.version = Some(field.get_int64()?);
                }
                _ => msg.unknown.read(&mut field)?,
            }
        }
        Ok(msg)
    }
}

impl EncodeMessage for OperatorSetIdProto {
    fn encoded_len(&self) -> usize {
        self.domain
            .as_ref()
            .map_or(0, |s| len::bytes(Self::DOMAIN, s.len()))
            + self.version.map_or(0, |v| len::int64(Self::VERSION, v))
            + self.unknown.encoded_len()
    }

    fn encode_fields<W: Write>(&self, writer: &mut FieldWriter<W>) -> Result<(), ProtobufError> {
        if let Some(domain) = &self.domain {
            writer.write_string(Self::DOMAIN, domain)?;
        }
        if let Some(version) = self.version {
            writer.write_int64(Self::VERSION, version)?;
        }
        self.unknown.encode(writer)
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct ModelProto {
    pub ir_version: Option<i64>,
    pub opset_import: Vec<OperatorSetIdProto>,
    pub graph: Option<GraphProto>,
    pub unknown: UnknownFields,
}

impl ModelProto {
    const IR_VERSION: u64 = 1;
    const GRAPH: u64 = 7;
    const OPSET_IMPORT: u64 = 8;

    /// Return the imported version of the default (`ai.onnx`) operator set.
    pub fn default_opset_version(&self) -> Option<i64> {
        self.opset_import
            .iter()
            .find(|opset| matches!(opset.domain.as_deref(), None | Some("") | Some("ai.onnx")))
            .and_then(|opset| opset.version)
    }
}

impl DecodeMessage for ModelProto {
    fn decode_fields<R: ReadValue>(mut fields: Fields<R>) -> Result<Self, ProtobufError> {
        let mut msg = Self::default();
        while let Some(mut field) = fields.next()? {
            match field.number() {
                Self::IR_VERSION => {
                    msg.ir_version = Some(field.get_int64()?);
                }
                Self::GRAPH => {
                    msg.graph = Some(GraphProto::decode_field(&mut field)?);
                }
                Self::OPSET_IMPORT => {
                    msg.opset_import
                        .push(OperatorSetIdProto::decode_field(&mut field)?);
                }
                _ => msg.unknown.read(&mut field)?,
            }
        }
        Ok(msg)
    }
}

impl EncodeMessage for ModelProto {
    fn encoded_len(&self) -> usize {
        self.ir_version
            .map_or(0, |v| len::int64(Self::IR_VERSION, v))
            + self.graph.as_ref().map_or(0, |g| len::message(Self::GRAPH, g))
            + self
                .opset_import
                .iter()
                .map(|o| len::message(Self::OPSET_IMPORT, o))
                .sum::<usize>()
            + self.unknown.encoded_len()
    }

    fn encode_fields<W: Write>(&self, writer: &mut FieldWriter<W>) -> Result<(), ProtobufError> {
        if let Some(ir_version) = self.ir_version {
            writer.write_int64(Self::IR_VERSION, ir_version)?;
        }
        if let Some(graph) = &self.graph {
            writer.write_message(Self::GRAPH, graph)?;
        }
        for opset in &self.opset_import {
            writer.write_message(Self::OPSET_IMPORT, opset)?;
        }
        self.unknown.encode(writer)
    }
}

#[cfg(test)]
mod tests {
    use super::{
        AttributeProto, DataType, DimValue, Dimension, GraphProto, ModelProto, NodeProto,
        OperatorSetIdProto, TensorProto, ValueInfoProto,
    };
    use crate::protobuf::{
        DecodeMessage, EncodeMessage, ErrorKind, FieldWriter, UnknownValue, ValueReader,
    };

    fn round_trip<M: DecodeMessage + EncodeMessage>(msg: &M) -> M {
        let buf = msg.encode_to_vec();
        assert_eq!(buf.len(), msg.encoded_len());
        M::decode(ValueReader::from_buf(buf)).unwrap()
    }

    fn test_model() -> ModelProto {
        let mut reshape_attrs = AttributeProto::int("allowzero", 0);
        reshape_attrs.unknown.push(crate::protobuf::UnknownField {
            number: 13,
            value: UnknownValue::Len(b"attribute doc".to_vec()),
        });

        let graph = GraphProto {
            name: Some("main".to_string()),
            node: vec![
                NodeProto::new("Relu", &["x"], &["y"]).with_name("relu"),
                NodeProto::new("Reshape", &["y", "shape"], &["z"])
                    .with_name("reshape")
                    .with_attr(reshape_attrs),
            ],
            initializer: vec![
                TensorProto::from_int64_data("shape", &[2], &[4, -1]),
                TensorProto::from_f32_raw("bias", &[3], &[0.5, 1.0, 2.0]),
            ],
            input: vec![ValueInfoProto::tensor(
                "x",
                Some(DataType::FLOAT),
                vec![Dimension::fixed(4), Dimension::symbolic("height")],
            )],
            output: vec![ValueInfoProto::tensor("z", Some(DataType::FLOAT), vec![])],
            ..Default::default()
        };

        ModelProto {
            ir_version: Some(8),
            opset_import: vec![OperatorSetIdProto {
                domain: Some(String::new()),
                version: Some(17),
                ..Default::default()
            }],
            graph: Some(graph),
            ..Default::default()
        }
    }

    // Decoding an empty buffer succeeds and returns a default model.
    #[test]
    fn test_decode_empty_model() {
        let model = ModelProto::decode(ValueReader::from_buf(Vec::new())).unwrap();
        assert!(model.graph.is_none());
    }

    #[test]
    fn test_model_round_trip() {
        let model = test_model();
        let decoded = round_trip(&model);
        assert_eq!(decoded, model);
        assert_eq!(decoded.default_opset_version(), Some(17));

        let graph = decoded.graph.unwrap();
        let ops: Vec<_> = graph.node.iter().map(|n| n.op_type()).collect();
        assert_eq!(ops, ["Relu", "Reshape"]);
        assert_eq!(
            graph.get_initializer("shape").unwrap().int64_data,
            [4, -1]
        );
    }

    #[test]
    fn test_unknown_fields_are_preserved() {
        // Encode a model with fields the decoder does not interpret:
        // `producer_name` (2) in ModelProto and `doc_string` (10) in GraphProto.
        let mut graph_writer = FieldWriter::new(Vec::new());
        graph_writer.write_string(2, "g").unwrap();
        graph_writer.write_string(10, "graph docs").unwrap();
        let graph_buf = graph_writer.into_inner();

        let mut writer = FieldWriter::new(Vec::new());
        writer.write_int64(1, 7).unwrap();
        writer.write_string(2, "exporter").unwrap();
        writer.write_bytes(7, &graph_buf).unwrap();
        let buf = writer.into_inner();

        let model = ModelProto::decode(ValueReader::from_buf(buf.clone())).unwrap();
        assert_eq!(model.unknown.len(), 1);
        let graph = model.graph.as_ref().unwrap();
        assert_eq!(graph.name.as_deref(), Some("g"));
        assert_eq!(
            graph.unknown.get(10).collect::<Vec<_>>(),
            [&UnknownValue::Len(b"graph docs".to_vec())]
        );

        // Re-encoding writes the known fields first, so compare after a second
        // decode rather than byte-for-byte.
        let reencoded = model.encode_to_vec();
        assert_eq!(reencoded.len(), buf.len());
        assert_eq!(
            ModelProto::decode(ValueReader::from_buf(reencoded)).unwrap(),
            model
        );
    }

    #[test]
    fn test_tensor_debug() {
        let mut tensor = TensorProto::from_int64_data("shape", &[2], &[4, -1]);
        tensor.unknown.push(crate::protobuf::UnknownField {
            number: 12,
            value: UnknownValue::Len(b"doc".to_vec()),
        });

        let debug = format!("{:?}", tensor);
        assert!(debug.contains("int64_data: [4, -1]"), "{}", debug);
        assert!(debug.contains("number: 12"), "{}", debug);
    }

    #[test]
    fn test_dimension_oneof() {
        let mut writer = FieldWriter::new(Vec::new());
        writer.write_int64(1, 4).unwrap();
        writer.write_string(2, "N").unwrap();
        let dim = Dimension::decode(ValueReader::from_buf(writer.into_inner())).unwrap();

        // The last member of the oneof that was set wins.
        assert_eq!(dim.value, Some(DimValue::Param("N".to_string())));
        assert_eq!(dim.dim_value(), None);
        assert_eq!(dim.dim_param(), Some("N"));
    }

    #[test]
    fn test_negative_dim_value_round_trip() {
        let dim = Dimension::fixed(-1);
        assert_eq!(round_trip(&dim).dim_value(), Some(-1));
    }

    #[test]
    fn test_decode_truncated_model() {
        let mut buf = test_model().encode_to_vec();
        buf.truncate(buf.len() - 3);
        let err = ModelProto::decode(ValueReader::from_buf(buf)).err().unwrap();
        assert!(matches!(
            err.kind(),
            ErrorKind::Eof | ErrorKind::InvalidVarint
        ));
    }

    #[test]
    fn test_unpacked_dims() {
        // Older exporters write repeated scalars without packing.
        let mut writer = FieldWriter::new(Vec::new());
        writer.write_int64(1, 2).unwrap();
        writer.write_int64(1, 3).unwrap();
        writer.write_int32(2, DataType::INT64.0).unwrap();
        writer.write_int64(7, 4).unwrap();
        writer.write_int64(7, -1).unwrap();
        let tensor = TensorProto::decode(ValueReader::from_buf(writer.into_inner())).unwrap();
        assert_eq!(tensor.dims, [2, 3]);
        assert_eq!(tensor.int64_data, [4, -1]);
    }

    #[test]
    fn test_subgraph_attributes() {
        let body = GraphProto {
            node: vec![NodeProto::new("Identity", &["outer"], &["inner"])],
            ..Default::default()
        };
        let attr = AttributeProto {
            name: Some("then_branch".to_string()),
            g: Some(body.clone()),
            graphs: vec![body],
            ..Default::default()
        };
        let decoded = round_trip(&attr);
        assert_eq!(decoded.subgraphs().count(), 2);
        assert_eq!(decoded, attr);
    }
}
