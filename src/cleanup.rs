//! Graph cleanup and topological sorting.

use std::error::Error;
use std::fmt::{Display, Formatter};

use log::debug;
use onnx_batchsize_proto::onnx::{GraphProto, NodeProto};
use rustc_hash::{FxHashMap, FxHashSet};

/// Errors in the structure of a model's graph.
#[derive(Clone, Debug, PartialEq)]
pub enum GraphError {
    /// The model does not have a graph.
    MissingGraph,

    /// The graph contains a cycle. The node is one of the nodes on the cycle.
    Cycle { node: String },
}

impl Display for GraphError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MissingGraph => write!(f, "model has no graph"),
            Self::Cycle { node } => write!(f, "graph contains a cycle involving node \"{}\"", node),
        }
    }
}

impl Error for GraphError {}

/// Return a node's name for use in log and error messages.
pub(crate) fn node_label(node: &NodeProto) -> String {
    match node.name.as_deref() {
        Some(name) if !name.is_empty() => name.to_string(),
        _ => format!("{} -> {:?}", node.op_type(), node.output),
    }
}

/// Collect the names of outer-scope values that are referenced by nodes in
/// `graph`, or in graphs nested inside it.
fn collect_captures(graph: &GraphProto, captures: &mut FxHashSet<String>) {
    let mut local: FxHashSet<&str> = FxHashSet::default();
    local.extend(graph.input.iter().map(|v| v.name()));
    local.extend(graph.initializer.iter().filter_map(|t| t.name.as_deref()));
    local.extend(
        graph
            .node
            .iter()
            .flat_map(|n| n.output.iter().map(|s| s.as_str())),
    );

    let mut used = FxHashSet::default();
    for node in &graph.node {
        used.extend(node.input.iter().filter(|s| !s.is_empty()).cloned());
        for subgraph in node.attribute.iter().flat_map(|a| a.subgraphs()) {
            collect_captures(subgraph, &mut used);
        }
    }
    used.extend(graph.output.iter().map(|v| v.name().to_string()));

    captures.extend(used.into_iter().filter(|name| !local.contains(name.as_str())));
}

/// Return the names of all values a node reads.
///
/// This includes the node's inputs and values from the enclosing graph that
/// are referenced by the node's subgraphs (eg. the branches of an `If`).
/// Empty names, which mark omitted optional inputs, are excluded.
pub(crate) fn node_uses(node: &NodeProto) -> Vec<String> {
    let mut uses: Vec<String> = node
        .input
        .iter()
        .filter(|name| !name.is_empty())
        .cloned()
        .collect();

    let mut captures = FxHashSet::default();
    for subgraph in node.attribute.iter().flat_map(|a| a.subgraphs()) {
        collect_captures(subgraph, &mut captures);
    }
    let mut captures: Vec<_> = captures
        .into_iter()
        .filter(|name| !uses.contains(name))
        .collect();
    captures.sort();
    uses.extend(captures);

    uses
}

/// Remove nodes, initializers and value infos that do not contribute to the
/// graph's outputs.
///
/// Graph inputs are never removed, even if unused.
pub fn cleanup(graph: &mut GraphProto) {
    let mut producers: FxHashMap<&str, Vec<usize>> = FxHashMap::default();
    for (i, node) in graph.node.iter().enumerate() {
        for output in node.output.iter().filter(|o| !o.is_empty()) {
            producers.entry(output.as_str()).or_default().push(i);
        }
    }

    let mut live_nodes = vec![false; graph.node.len()];
    let mut live_values: FxHashSet<String> = FxHashSet::default();
    let mut pending: Vec<String> = graph.output.iter().map(|v| v.name().to_string()).collect();

    while let Some(name) = pending.pop() {
        if !live_values.insert(name.clone()) {
            continue;
        }
        let Some(node_ids) = producers.get(name.as_str()) else {
            continue;
        };
        for &node_id in node_ids {
            if live_nodes[node_id] {
                continue;
            }
            live_nodes[node_id] = true;
            let node = &graph.node[node_id];
            pending.extend(node_uses(node));
            pending.extend(node.output.iter().filter(|o| !o.is_empty()).cloned());
        }
    }

    let n_nodes = graph.node.len();
    let mut live_iter = live_nodes.iter();
    graph.node.retain(|_| live_iter.next().copied().unwrap_or(false));

    let n_inits = graph.initializer.len();
    graph.initializer.retain(|init| {
        init.name
            .as_deref()
            .is_some_and(|name| live_values.contains(name))
    });

    let n_values = graph.value_info.len();
    graph
        .value_info
        .retain(|value| live_values.contains(value.name()));

    debug!(
        "cleanup removed {} nodes, {} initializers and {} value infos",
        n_nodes - graph.node.len(),
        n_inits - graph.initializer.len(),
        n_values - graph.value_info.len()
    );
}

/// Reorder nodes so that every node comes after the nodes that produce its
/// inputs.
///
/// The sort is stable: nodes keep their original relative order where
/// dependencies allow it.
pub fn toposort(graph: &mut GraphProto) -> Result<(), GraphError> {
    #[derive(Clone, Copy, PartialEq)]
    enum Mark {
        Unvisited,
        Visiting,
        Done,
    }

    let mut producers: FxHashMap<&str, usize> = FxHashMap::default();
    for (i, node) in graph.node.iter().enumerate() {
        for output in node.output.iter().filter(|o| !o.is_empty()) {
            producers.entry(output.as_str()).or_insert(i);
        }
    }

    let deps: Vec<Vec<usize>> = graph
        .node
        .iter()
        .map(|node| {
            node_uses(node)
                .iter()
                .filter_map(|name| producers.get(name.as_str()).copied())
                .collect()
        })
        .collect();

    let mut marks = vec![Mark::Unvisited; graph.node.len()];
    let mut order = Vec::with_capacity(graph.node.len());

    for root in 0..graph.node.len() {
        if marks[root] != Mark::Unvisited {
            continue;
        }

        // Depth-first traversal with an explicit stack of (node, next dep).
        let mut stack = vec![(root, 0)];
        marks[root] = Mark::Visiting;

        while let Some((node_id, dep_idx)) = stack.last_mut() {
            let node_id = *node_id;
            if let Some(&dep) = deps[node_id].get(*dep_idx) {
                *dep_idx += 1;
                match marks[dep] {
                    Mark::Unvisited => {
                        marks[dep] = Mark::Visiting;
                        stack.push((dep, 0));
                    }
                    Mark::Visiting => {
                        return Err(GraphError::Cycle {
                            node: node_label(&graph.node[dep]),
                        });
                    }
                    Mark::Done => {}
                }
            } else {
                marks[node_id] = Mark::Done;
                order.push(node_id);
                stack.pop();
            }
        }
    }

    let mut nodes: Vec<Option<NodeProto>> = std::mem::take(&mut graph.node)
        .into_iter()
        .map(Some)
        .collect();
    graph.node = order
        .into_iter()
        .filter_map(|node_id| nodes[node_id].take())
        .collect();

    Ok(())
}

#[cfg(test)]
mod tests {
    use onnx_batchsize_proto::onnx::{AttributeProto, GraphProto, NodeProto, TensorProto};
    use onnx_batchsize_testing::TestCases;

    use super::{GraphError, cleanup, node_uses, toposort};
    use crate::test_util::value_info;

    fn node_names(graph: &GraphProto) -> Vec<&str> {
        graph
            .node
            .iter()
            .map(|n| n.name.as_deref().unwrap_or_default())
            .collect()
    }

    #[test]
    fn test_cleanup_removes_dead_nodes() {
        let mut graph = GraphProto {
            node: vec![
                NodeProto::new("Relu", &["x"], &["a"]).with_name("relu"),
                NodeProto::new("Sigmoid", &["x"], &["unused"]).with_name("dead"),
                NodeProto::new("Add", &["a", "bias"], &["y"]).with_name("add"),
                NodeProto::new("Mul", &["unused", "scale"], &["unused2"]).with_name("dead2"),
            ],
            initializer: vec![
                TensorProto::from_f32_raw("bias", &[1], &[1.0]),
                TensorProto::from_f32_raw("scale", &[1], &[2.0]),
            ],
            input: vec![value_info("x", &["1"]), value_info("ignored", &["1"])],
            value_info: vec![value_info("a", &["1"]), value_info("unused", &["1"])],
            output: vec![value_info("y", &["1"])],
            ..Default::default()
        };

        cleanup(&mut graph);

        assert_eq!(node_names(&graph), ["relu", "add"]);
        assert_eq!(graph.initializer.len(), 1);
        assert_eq!(graph.initializer[0].name.as_deref(), Some("bias"));
        assert_eq!(graph.value_info.len(), 1);
        assert_eq!(graph.value_info[0].name(), "a");
        // Unused inputs are kept.
        assert_eq!(graph.input.len(), 2);
    }

    #[test]
    fn test_cleanup_keeps_subgraph_captures() {
        let then_branch = GraphProto {
            node: vec![NodeProto::new("Add", &["outer", "local_c"], &["then_out"])],
            initializer: vec![TensorProto::from_f32_raw("local_c", &[1], &[1.0])],
            output: vec![value_info("then_out", &["1"])],
            ..Default::default()
        };
        let if_attr = AttributeProto {
            name: Some("then_branch".to_string()),
            g: Some(then_branch),
            ..Default::default()
        };

        let mut graph = GraphProto {
            node: vec![
                NodeProto::new("Relu", &["x"], &["outer"]).with_name("producer"),
                NodeProto::new("If", &["cond"], &["y"])
                    .with_name("if")
                    .with_attr(if_attr),
            ],
            input: vec![value_info("x", &["1"]), value_info("cond", &[])],
            output: vec![value_info("y", &["1"])],
            ..Default::default()
        };

        assert_eq!(node_uses(&graph.node[1]), ["cond", "outer"]);

        cleanup(&mut graph);
        assert_eq!(node_names(&graph), ["producer", "if"]);
    }

    #[test]
    fn test_toposort() {
        #[derive(Debug)]
        struct Case {
            nodes: Vec<NodeProto>,
            expected: Result<Vec<&'static str>, GraphError>,
        }

        let cases = [
            // Already sorted.
            Case {
                nodes: vec![
                    NodeProto::new("Relu", &["x"], &["a"]).with_name("a"),
                    NodeProto::new("Relu", &["a"], &["b"]).with_name("b"),
                ],
                expected: Ok(vec!["a", "b"]),
            },
            // Reversed chain.
            Case {
                nodes: vec![
                    NodeProto::new("Relu", &["b"], &["c"]).with_name("c"),
                    NodeProto::new("Relu", &["a"], &["b"]).with_name("b"),
                    NodeProto::new("Relu", &["x"], &["a"]).with_name("a"),
                ],
                expected: Ok(vec!["a", "b", "c"]),
            },
            // Independent nodes keep their relative order.
            Case {
                nodes: vec![
                    NodeProto::new("Add", &["p", "q"], &["r"]).with_name("add"),
                    NodeProto::new("Relu", &["x"], &["s"]).with_name("independent"),
                    NodeProto::new("Relu", &["x"], &["p"]).with_name("p"),
                    NodeProto::new("Relu", &["x"], &["q"]).with_name("q"),
                ],
                expected: Ok(vec!["p", "q", "add", "independent"]),
            },
            // Optional inputs are ignored.
            Case {
                nodes: vec![
                    NodeProto::new("Clip", &["a", "", "max"], &["y"]).with_name("clip"),
                    NodeProto::new("Relu", &["x"], &["a"]).with_name("a"),
                ],
                expected: Ok(vec!["a", "clip"]),
            },
            Case {
                nodes: vec![
                    NodeProto::new("Relu", &["b"], &["a"]).with_name("a"),
                    NodeProto::new("Relu", &["a"], &["b"]).with_name("b"),
                ],
                expected: Err(GraphError::Cycle {
                    node: "a".to_string(),
                }),
            },
        ];

        cases.test_each_value(|case| {
            let mut graph = GraphProto {
                node: case.nodes,
                ..Default::default()
            };
            let result = toposort(&mut graph).map(|_| node_names(&graph));
            assert_eq!(result, case.expected);
        })
    }

    #[test]
    fn test_toposort_subgraph_dependency() {
        let body = GraphProto {
            node: vec![NodeProto::new("Identity", &["outer"], &["inner"])],
            output: vec![value_info("inner", &["1"])],
            ..Default::default()
        };
        let mut graph = GraphProto {
            node: vec![
                NodeProto::new("If", &["cond"], &["y"])
                    .with_name("if")
                    .with_attr(AttributeProto {
                        name: Some("else_branch".to_string()),
                        g: Some(body),
                        ..Default::default()
                    }),
                NodeProto::new("Relu", &["x"], &["outer"]).with_name("producer"),
            ],
            ..Default::default()
        };
        toposort(&mut graph).unwrap();
        assert_eq!(node_names(&graph), ["producer", "if"]);
    }
}
