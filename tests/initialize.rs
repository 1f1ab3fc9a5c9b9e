use std::error::Error;
use std::path::Path;

use onnx_batchsize::onnx::{
    AttributeProto, DataType, DimValue, Dimension, GraphProto, ModelProto, NodeProto,
    OperatorSetIdProto, TensorProto, ValueInfoProto,
};
use onnx_batchsize::{ErrorKind, InitializeOptions, initialize, load_model, save_model};

fn fixed(dims: &[i64]) -> Vec<Dimension> {
    dims.iter().copied().map(Dimension::fixed).collect()
}

fn float_value(name: &str, dims: &[Dimension]) -> ValueInfoProto {
    ValueInfoProto::tensor(name, Some(DataType::FLOAT), dims.to_vec())
}

/// Create a model of the form:
///
/// ```text
/// x: [4, 3, 8, 8] -> Relu -> r: [4, 3, 8, 8] -> Reshape(r, Constant([4, -1])) -> y: [4, 192]
/// ```
fn image_model() -> ModelProto {
    let graph = GraphProto {
        name: Some("flatten_images".to_string()),
        node: vec![
            NodeProto::new("Relu", &["x"], &["r"]),
            NodeProto::new("Constant", &[], &["target_shape"]).with_attr(AttributeProto::tensor(
                "value",
                TensorProto::from_int64_data("", &[2], &[4, -1]),
            )),
            NodeProto::new("Reshape", &["r", "target_shape"], &["y"]),
        ],
        input: vec![float_value("x", &fixed(&[4, 3, 8, 8]))],
        output: vec![float_value("y", &fixed(&[4, 192]))],
        value_info: vec![float_value("r", &fixed(&[4, 3, 8, 8]))],
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

fn dims(model: &ModelProto, name: &str) -> Vec<String> {
    let graph = model.graph.as_ref().unwrap();
    let value = graph
        .input
        .iter()
        .chain(&graph.value_info)
        .chain(&graph.output)
        .find(|v| v.name() == name)
        .unwrap();
    value
        .shape()
        .unwrap()
        .dim
        .iter()
        .map(|dim| match &dim.value {
            Some(DimValue::Value(size)) => size.to_string(),
            Some(DimValue::Param(param)) => param.clone(),
            None => "?".to_string(),
        })
        .collect()
}

fn run(input: &Path, output: &Path, token: &str) -> Result<ModelProto, Box<dyn Error>> {
    let model = initialize(InitializeOptions {
        output_path: Some(output.to_path_buf()),
        token: token.to_string(),
        non_verbose: true,
        ..InitializeOptions::from_path(input)
    })?;
    Ok(model)
}

#[test]
fn test_initialize_file() -> Result<(), Box<dyn Error>> {
    let dir = tempfile::tempdir()?;
    let input = dir.path().join("images.onnx");
    let output = dir.path().join("images_dynamic.onnx");
    save_model(&image_model(), &input)?;

    run(&input, &output, "batch")?;
    let model = load_model(&output)?;

    assert_eq!(dims(&model, "x"), ["batch", "3", "8", "8"]);
    assert_eq!(dims(&model, "r"), ["batch", "3", "8", "8"]);
    assert_eq!(dims(&model, "y"), ["batch", "192"]);

    let graph = model.graph.as_ref().unwrap();
    let ops: Vec<_> = graph.node.iter().map(|n| n.op_type()).collect();
    assert_eq!(ops, ["Relu", "Reshape"]);
    let target_shape = graph.get_initializer("target_shape").unwrap();
    assert_eq!(target_shape.int64_data, [-1, -1]);

    // The input file is not modified.
    let original = load_model(&input)?;
    assert_eq!(original, image_model());

    Ok(())
}

#[test]
fn test_initialize_is_idempotent() -> Result<(), Box<dyn Error>> {
    let dir = tempfile::tempdir()?;
    let input = dir.path().join("images.onnx");
    let first = dir.path().join("first.onnx");
    let second = dir.path().join("second.onnx");
    save_model(&image_model(), &input)?;

    run(&input, &first, "N")?;
    run(&first, &second, "N")?;

    assert_eq!(load_model(&first)?, load_model(&second)?);
    Ok(())
}

#[test]
fn test_initialize_invalid_file() -> Result<(), Box<dyn Error>> {
    let dir = tempfile::tempdir()?;
    let input = dir.path().join("not_a_model.onnx");
    let output = dir.path().join("output.onnx");
    std::fs::write(&input, [0x3a, 0x10, 0x0a])?;

    let err = initialize(InitializeOptions {
        output_path: Some(output.clone()),
        non_verbose: true,
        ..InitializeOptions::from_path(&input)
    })
    .err()
    .unwrap();

    assert_eq!(err.kind(), ErrorKind::Parse);
    assert_eq!(err.path(), Some(input.as_path()));
    assert!(!output.exists());

    Ok(())
}
