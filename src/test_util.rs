use onnx_batchsize_proto::onnx::{
    DataType, Dimension, DimValue, GraphProto, ModelProto, NodeProto, OperatorSetIdProto,
    TensorProto, ValueInfoProto,
};

/// Parse a dimension from a test shape description.
///
/// Numbers are fixed sizes, "?" is an unset dimension and anything else is a
/// symbolic name.
fn parse_dim(dim: &str) -> Dimension {
    if dim == "?" {
        Dimension::default()
    } else if let Ok(size) = dim.parse() {
        Dimension::fixed(size)
    } else {
        Dimension::symbolic(dim)
    }
}

/// Create a float tensor value description from a shape such as
/// `["batch", "3", "?"]`.
pub fn value_info(name: &str, dims: &[&str]) -> ValueInfoProto {
    ValueInfoProto::tensor(
        name,
        Some(DataType::FLOAT),
        dims.iter().map(|d| parse_dim(d)).collect(),
    )
}

/// Format the shape of a value in the form accepted by [`value_info`].
///
/// Returns an empty list if the value has no shape.
pub fn shape_str(value: &ValueInfoProto) -> Vec<String> {
    let Some(shape) = value.shape() else {
        return Vec::new();
    };
    shape
        .dim
        .iter()
        .map(|dim| match &dim.value {
            Some(DimValue::Value(size)) => size.to_string(),
            Some(DimValue::Param(name)) => name.clone(),
            None => "?".to_string(),
        })
        .collect()
}

/// Find a graph input, output or value info by name.
pub fn find_value<'a>(graph: &'a GraphProto, name: &str) -> Option<&'a ValueInfoProto> {
    graph
        .input
        .iter()
        .chain(&graph.value_info)
        .chain(&graph.output)
        .find(|v| v.name() == name)
}

/// Wrap a graph in a model using IR version 8 and opset 17.
pub fn model(graph: GraphProto) -> ModelProto {
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

/// Create a model that flattens an image batch with a `Reshape`:
///
/// ```text
/// x: [4, 3, 224, 224] -> Reshape(x, shape=[4, -1]) -> y: [4, 150528]
/// ```
///
/// `raw` selects whether the shape constant is stored in `raw_data` or
/// `int64_data`.
pub fn reshape_model(raw: bool) -> ModelProto {
    let shape = if raw {
        TensorProto::from_int64_raw("shape", &[2], &[4, -1])
    } else {
        TensorProto::from_int64_data("shape", &[2], &[4, -1])
    };
    model(GraphProto {
        name: Some("reshape".to_string()),
        node: vec![NodeProto::new("Reshape", &["x", "shape"], &["y"]).with_name("reshape")],
        initializer: vec![shape],
        input: vec![value_info("x", &["4", "3", "224", "224"])],
        output: vec![value_info("y", &["4", "150528"])],
        ..Default::default()
    })
}
