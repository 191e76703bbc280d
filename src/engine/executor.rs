use std::collections::HashMap;

use log::{debug, trace};

use crate::backend::Backend;
use crate::engine::{
    node::{NodeId, NodeType},
    shape::UNKNOWN_DIM,
    tensor::Tensor,
    Graph,
};
use crate::error::{Error, Result};

/// A compiled execution plan over a [`Graph`].
///
/// `run` evaluates in two phases. First every value the plan needs is
/// computed in topological order from the variables as they stand when the
/// run starts. Then the update targets are applied one after another, in
/// the order they were given, each reading the current variable state.
/// Fetched values therefore reflect the state before the run, except when
/// the fetch is an update node itself, which yields the updated value.
#[derive(Debug)]
pub struct Executor<B: Backend> {
    graph: Graph<B>,
    execution_order: Vec<NodeId>,
    fetches: Vec<NodeId>,
    targets: Vec<NodeId>,
}

impl<B: Backend> Executor<B> {
    pub fn new(
        graph: Graph<B>,
        execution_order: Vec<NodeId>,
        fetches: Vec<NodeId>,
        targets: Vec<NodeId>,
    ) -> Self {
        debug!(
            "execution plan: {} nodes, {} fetches, {} targets",
            execution_order.len(),
            fetches.len(),
            targets.len()
        );
        Self {
            graph,
            execution_order,
            fetches,
            targets,
        }
    }

    pub fn graph(&self) -> &Graph<B> {
        &self.graph
    }

    /// `feeds` は、どの入力ノードにどのデータを与えるかを示す
    pub fn run(&mut self, feeds: &[(&Tensor<B>, B::Tensor)]) -> Result<Vec<B::Tensor>> {
        let mut fed: HashMap<NodeId, &B::Tensor> = HashMap::new();
        for (tensor, data) in feeds {
            self.check_feed(tensor, data)?;
            fed.insert(tensor.id, data);
        }

        // Phase 1: values
        let mut values: HashMap<NodeId, B::Tensor> = HashMap::with_capacity(self.execution_order.len());
        for &node_id in &self.execution_order {
            let (node_type, inputs, data) = self.graph.with(|g| {
                let node = g.node(node_id);
                (node.node_type.clone(), node.inputs.clone(), node.data.clone())
            });

            let value = match node_type {
                NodeType::Input => match fed.get(&node_id) {
                    Some(&data) => data.clone(),
                    None => {
                        return Err(Error::Engine(format!(
                            "no value fed for input node {node_id}"
                        )))
                    }
                },
                NodeType::Variable { .. } | NodeType::Const => data.ok_or_else(|| {
                    Error::Engine(format!("node {node_id} holds no value"))
                })?,
                NodeType::Operation(op) => {
                    let args = inputs
                        .iter()
                        .map(|id| {
                            values.get(id).ok_or_else(|| {
                                Error::Engine(format!("input {id} of node {node_id} not computed"))
                            })
                        })
                        .collect::<Result<Vec<&B::Tensor>>>()?;
                    trace!("forward {} (node {node_id})", op.name());
                    op.forward(&args)?
                }
                NodeType::Assign { .. } => match values.get(&inputs[0]) {
                    Some(v) => v.clone(),
                    None => {
                        return Err(Error::Engine(format!(
                            "value of assign node {node_id} not computed"
                        )))
                    }
                },
                // Applied in phase 2.
                NodeType::Apply { .. } => continue,
            };
            values.insert(node_id, value);
        }

        // Phase 2: updates
        for &target_id in &self.targets {
            let (node_type, inputs) = self.graph.with(|g| {
                let node = g.node(target_id);
                (node.node_type.clone(), node.inputs.clone())
            });
            match node_type {
                NodeType::Assign { target } => {
                    let value = values
                        .get(&target_id)
                        .cloned()
                        .ok_or_else(|| Error::Engine(format!("assign node {target_id} not computed")))?;
                    self.graph.with_mut(|g| g.nodes[target].data = Some(value.clone()));
                    trace!("assign node {target}");
                }
                NodeType::Apply {
                    kernel,
                    target,
                    slots,
                } => {
                    let grad = values.get(&inputs[0]).ok_or_else(|| {
                        Error::Engine(format!("gradient of apply node {target_id} not computed"))
                    })?;
                    let extras = inputs[1..]
                        .iter()
                        .map(|id| {
                            values.get(id).ok_or_else(|| {
                                Error::Engine(format!("input {id} of node {target_id} not computed"))
                            })
                        })
                        .collect::<Result<Vec<&B::Tensor>>>()?;

                    let (mut var, mut slot_values) = self.graph.with(|g| {
                        (
                            g.node(target).data.clone(),
                            slots
                                .iter()
                                .map(|&s| g.node(s).data.clone())
                                .collect::<Option<Vec<B::Tensor>>>(),
                        )
                    });
                    let (Some(var_value), Some(slot_list)) = (var.as_mut(), slot_values.as_mut())
                    else {
                        return Err(Error::Engine(format!(
                            "apply node {target_id} reads an uninitialized variable"
                        )));
                    };

                    trace!("{} (node {target_id})", kernel.name());
                    kernel.apply(var_value, slot_list, grad, &extras)?;

                    self.graph.with_mut(|g| {
                        g.nodes[target].data = var.clone();
                        if let Some(slot_list) = slot_values {
                            for (&s, value) in slots.iter().zip(slot_list) {
                                g.nodes[s].data = Some(value);
                            }
                        }
                    });
                    if let Some(v) = var {
                        values.insert(target_id, v);
                    }
                }
                _ => {}
            }
        }

        self.fetches
            .iter()
            .map(|id| {
                values
                    .get(id)
                    .cloned()
                    .ok_or_else(|| Error::Engine(format!("fetched node {id} not computed")))
            })
            .collect()
    }

    fn check_feed(&self, tensor: &Tensor<B>, data: &B::Tensor) -> Result<()> {
        let (is_input, expected) = self.graph.with(|g| {
            let node = g.node(tensor.id);
            (matches!(node.node_type, NodeType::Input), node.shape.clone())
        });
        if !is_input {
            return Err(Error::Engine(format!(
                "node {} is not an input and cannot be fed",
                tensor.id
            )));
        }
        let actual = B::shape(data);
        let compatible = actual.len() == expected.len()
            && expected
                .iter()
                .zip(&actual)
                .all(|(&e, &a)| e == UNKNOWN_DIM || e == a);
        if !compatible {
            return Err(Error::ShapeMismatch {
                context: format!("feed for input node {}", tensor.id),
                expected,
                actual,
            });
        }
        Ok(())
    }
}
