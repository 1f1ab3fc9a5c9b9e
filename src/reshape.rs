use log::{debug, trace};
use onnx_batchsize_proto::onnx::{GraphProto, TensorProto};

/// Mutable view of the elements of an INT64 tensor, in whichever encoding
/// the tensor uses.
///
/// ONNX tensors store their elements either in a typed field (`int64_data`)
/// or as packed little-endian bytes (`raw_data`). Reads are normalized to
/// `i64` values and writes keep the original encoding.
#[derive(Debug)]
pub enum ShapePayload<'a> {
    /// Elements stored in `int64_data`.
    Decoded(&'a mut Vec<i64>),

    /// Elements stored as 8-byte little-endian values in `raw_data`.
    Raw(&'a mut Vec<u8>),
}

impl<'a> ShapePayload<'a> {
    /// Return a view of the elements of `tensor`, or `None` if the tensor has
    /// no inline data.
    ///
    /// If both encodings are populated, `int64_data` is used.
    pub fn new(tensor: &'a mut TensorProto) -> Option<Self> {
        if !tensor.int64_data.is_empty() {
            return Some(Self::Decoded(&mut tensor.int64_data));
        }
        match tensor.raw_data.as_mut() {
            Some(raw) if !raw.is_empty() => Some(Self::Raw(raw)),
            _ => None,
        }
    }

    /// Return the number of complete elements.
    pub fn len(&self) -> usize {
        match self {
            Self::Decoded(data) => data.len(),
            Self::Raw(raw) => raw.len() / size_of::<i64>(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Return the elements as a vector.
    ///
    /// Trailing raw bytes that do not form a complete element are ignored.
    pub fn to_vec(&self) -> Vec<i64> {
        match self {
            Self::Decoded(data) => data.to_vec(),
            Self::Raw(raw) => raw_to_i64s(raw),
        }
    }

    /// Set the element at `index`.
    ///
    /// Returns false if `index` is out of bounds.
    pub fn set(&mut self, index: usize, value: i64) -> bool {
        match self {
            Self::Decoded(data) => {
                let Some(elem) = data.get_mut(index) else {
                    return false;
                };
                *elem = value;
            }
            Self::Raw(raw) => {
                let start = index * size_of::<i64>();
                let Some(elem) = raw.get_mut(start..start + size_of::<i64>()) else {
                    return false;
                };
                elem.copy_from_slice(&value.to_le_bytes());
            }
        }
        true
    }
}

/// Decode packed little-endian `i64` values.
pub(crate) fn raw_to_i64s(raw: &[u8]) -> Vec<i64> {
    raw.chunks_exact(size_of::<i64>())
        .map(|chunk| {
            let mut bytes = [0u8; 8];
            bytes.copy_from_slice(chunk);
            i64::from_le_bytes(bytes)
        })
        .collect()
}

/// Set the first element of the target shape of every `Reshape` node to -1.
///
/// The target shape is the initializer named by the node's second input. If
/// several initializers have that name, all of them are updated. Nodes whose
/// target shape is computed at runtime, or is an initializer without inline
/// data, are skipped.
///
/// The first element is assumed to be the batch dimension.
///
/// Returns the number of initializers that were updated.
pub fn patch_reshape_shapes(graph: &mut GraphProto) -> usize {
    let mut count = 0;

    for node in graph.node.iter().filter(|n| n.op_type() == "Reshape") {
        let node_name = node.name.as_deref().unwrap_or_default();
        let Some(shape_name) = node.input.get(1) else {
            trace!("skipping Reshape \"{}\" without shape input", node_name);
            continue;
        };

        let mut found = false;
        for init in graph
            .initializer
            .iter_mut()
            .filter(|init| init.name.as_ref() == Some(shape_name))
        {
            found = true;
            let Some(mut payload) = ShapePayload::new(init) else {
                trace!("skipping shape \"{}\" with no data", shape_name);
                continue;
            };
            if payload.set(0, -1) {
                debug!(
                    "set batch size of shape \"{}\" used by Reshape \"{}\" to -1",
                    shape_name, node_name
                );
                count += 1;
            } else {
                trace!("skipping shape \"{}\" with truncated data", shape_name);
            }
        }

        if !found {
            trace!(
                "skipping Reshape \"{}\" with non-constant shape \"{}\"",
                node_name, shape_name
            );
        }
    }

    count
}

#[cfg(test)]
mod tests {
    use onnx_batchsize_proto::onnx::{GraphProto, NodeProto, TensorProto};
    use onnx_batchsize_testing::TestCases;

    use super::{ShapePayload, patch_reshape_shapes, raw_to_i64s};
    use crate::test_util::reshape_model;

    fn reshape_graph(shape: TensorProto) -> GraphProto {
        let input = shape.name.clone().unwrap_or_default();
        GraphProto {
            node: vec![NodeProto::new("Reshape", &["x", input.as_str()], &["y"])],
            initializer: vec![shape],
            ..Default::default()
        }
    }

    #[test]
    fn test_shape_payload() {
        #[derive(Debug)]
        struct Case {
            tensor: TensorProto,
            expected: Option<Vec<i64>>,
        }

        let cases = [
            Case {
                tensor: TensorProto::from_int64_data("s", &[3], &[4, -1, 128]),
                expected: Some(vec![4, -1, 128]),
            },
            Case {
                tensor: TensorProto::from_int64_raw("s", &[3], &[4, -1, 128]),
                expected: Some(vec![4, -1, 128]),
            },
            Case {
                tensor: TensorProto::from_int64_data("s", &[0], &[]),
                expected: None,
            },
            // Decoded elements take precedence over raw data.
            Case {
                tensor: TensorProto {
                    raw_data: Some(5i64.to_le_bytes().to_vec()),
                    ..TensorProto::from_int64_data("s", &[1], &[7])
                },
                expected: Some(vec![7]),
            },
            // Trailing bytes are not a complete element.
            Case {
                tensor: TensorProto {
                    raw_data: Some(vec![1, 0, 0, 0, 0, 0, 0, 0, 9]),
                    ..Default::default()
                },
                expected: Some(vec![1]),
            },
        ];

        cases.test_each_value(|mut case| {
            let payload = ShapePayload::new(&mut case.tensor);
            assert_eq!(payload.map(|p| p.to_vec()), case.expected);
        })
    }

    #[test]
    fn test_patch_decoded_shape() {
        let mut graph = reshape_graph(TensorProto::from_int64_data("shape", &[3], &[4, -1, 128]));
        assert_eq!(patch_reshape_shapes(&mut graph), 1);
        assert_eq!(graph.initializer[0].int64_data, [-1, -1, 128]);
        assert!(graph.initializer[0].raw_data.is_none());
    }

    #[test]
    fn test_patch_raw_shape() {
        let mut graph = reshape_graph(TensorProto::from_int64_raw("shape", &[3], &[4, -1, 128]));
        let original = graph.initializer[0].raw_data.clone().unwrap();

        assert_eq!(patch_reshape_shapes(&mut graph), 1);

        let raw = graph.initializer[0].raw_data.as_ref().unwrap();
        assert_eq!(raw_to_i64s(raw), [-1, -1, 128]);
        assert_eq!(raw[8..], original[8..]);
        assert!(graph.initializer[0].int64_data.is_empty());
    }

    #[test]
    fn test_patch_skips() {
        #[derive(Debug)]
        struct Case {
            graph: GraphProto,
        }

        let cases = [
            // Shape computed at runtime.
            Case {
                graph: GraphProto {
                    node: vec![
                        NodeProto::new("Shape", &["z"], &["dynamic_shape"]),
                        NodeProto::new("Reshape", &["x", "dynamic_shape"], &["y"]),
                    ],
                    initializer: vec![TensorProto::from_int64_data("other", &[1], &[4])],
                    ..Default::default()
                },
            },
            // Missing shape input.
            Case {
                graph: GraphProto {
                    node: vec![NodeProto::new("Reshape", &["x"], &["y"])],
                    initializer: vec![TensorProto::from_int64_data("x", &[1], &[4])],
                    ..Default::default()
                },
            },
            // Shape without data.
            Case {
                graph: reshape_graph(TensorProto::from_int64_data("shape", &[0], &[])),
            },
            // Raw data shorter than one element.
            Case {
                graph: reshape_graph(TensorProto {
                    name: Some("shape".to_string()),
                    raw_data: Some(vec![4, 0, 0]),
                    ..Default::default()
                }),
            },
            // Not a Reshape.
            Case {
                graph: GraphProto {
                    node: vec![NodeProto::new("Expand", &["x", "shape"], &["y"])],
                    initializer: vec![TensorProto::from_int64_data("shape", &[1], &[4])],
                    ..Default::default()
                },
            },
        ];

        cases.test_each_value(|case| {
            let mut graph = case.graph.clone();
            assert_eq!(patch_reshape_shapes(&mut graph), 0);
            assert_eq!(graph, case.graph);
        })
    }

    #[test]
    fn test_patch_duplicate_initializers() {
        let mut graph = reshape_graph(TensorProto::from_int64_data("shape", &[2], &[4, -1]));
        graph
            .initializer
            .push(TensorProto::from_int64_raw("shape", &[2], &[4, 8]));

        assert_eq!(patch_reshape_shapes(&mut graph), 2);
        assert_eq!(graph.initializer[0].int64_data, [-1, -1]);
        assert_eq!(
            raw_to_i64s(graph.initializer[1].raw_data.as_ref().unwrap()),
            [-1, 8]
        );
    }

    #[test]
    fn test_patch_shared_shape() {
        let mut model = reshape_model(false);
        let graph = model.graph.as_mut().unwrap();
        graph
            .node
            .push(NodeProto::new("Reshape", &["y", "shape"], &["z"]));

        // The same initializer is patched once for each Reshape that uses it.
        assert_eq!(patch_reshape_shapes(graph), 2);
        assert_eq!(graph.initializer[0].int64_data, [-1, -1]);
    }
}
