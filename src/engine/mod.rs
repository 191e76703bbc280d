use std::{
    cell::RefCell,
    collections::{BTreeMap, HashMap, HashSet, VecDeque},
    fmt,
    rc::Rc,
};

use log::trace;

use crate::backend::{Backend, Elm};
use crate::error::{Error, Result};

use self::{
    executor::Executor,
    node::{Node, NodeId, NodeType},
    operation::UpdateKernel,
    shape::UNKNOWN_DIM,
    tensor::Tensor,
};

pub mod activation;
pub mod autodiff;
pub mod executor;
pub mod initializer;
pub mod layer;
pub mod loss;
pub mod metric;
pub mod model;
pub mod nn_ops;
pub mod node;
pub mod operation;
pub mod optimizer;
pub mod regularizer;
pub mod shape;
pub mod tensor;
pub mod variable;
pub mod weights;

#[derive(Debug)]
pub struct GraphBuilder<B: Backend> {
    pub(crate) nodes: Vec<Node<B>>,
    variables: BTreeMap<String, NodeId>,
}

/// A computation graph shared by every tensor handle built on it.
///
/// Nodes are only ever appended, so an input always has a smaller id than
/// the nodes that consume it. Dropping the last handle releases every
/// variable the graph owns.
pub struct Graph<B: Backend> {
    inner: Rc<RefCell<GraphBuilder<B>>>,
}

impl<B: Backend> Clone for Graph<B> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<B: Backend> fmt::Debug for Graph<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.borrow();
        f.debug_struct("Graph")
            .field("nodes", &inner.nodes.len())
            .field("variables", &inner.variables.len())
            .finish()
    }
}

impl<B: Backend> Default for Graph<B> {
    fn default() -> Self {
        Self::new()
    }
}

impl<B: Backend> Graph<B> {
    pub fn new() -> Self {
        Self {
            inner: Rc::new(RefCell::new(GraphBuilder {
                nodes: Vec::new(),
                variables: BTreeMap::new(),
            })),
        }
    }

    pub fn ptr_eq(&self, other: &Graph<B>) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    pub(crate) fn with<R>(&self, f: impl FnOnce(&GraphBuilder<B>) -> R) -> R {
        f(&self.inner.borrow())
    }

    pub(crate) fn with_mut<R>(&self, f: impl FnOnce(&mut GraphBuilder<B>) -> R) -> R {
        f(&mut self.inner.borrow_mut())
    }

    pub(crate) fn push(
        &self,
        node_type: NodeType<B>,
        inputs: Vec<NodeId>,
        data: Option<B::Tensor>,
        shape: Vec<usize>,
    ) -> Tensor<B> {
        let id = self.with_mut(|graph| {
            let id = graph.nodes.len();
            graph.nodes.push(Node {
                id,
                node_type,
                inputs,
                data,
                shape,
            });
            id
        });
        Tensor::from_id(self, id)
    }

    pub fn len(&self) -> usize {
        self.with(|g| g.nodes.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Placeholder fed on every run; use `UNKNOWN_DIM` for the batch axis.
    pub fn placeholder(&self, shape: &[usize]) -> Tensor<B> {
        self.push(NodeType::Input, Vec::new(), None, shape.to_vec())
    }

    /// Registers a named variable holding `data`.
    pub fn variable(&self, name: &str, data: B::Tensor, trainable: bool) -> Result<Tensor<B>> {
        if self.with(|g| g.variables.contains_key(name)) {
            return Err(Error::DuplicateVariable(name.to_string()));
        }
        let shape = B::shape(&data);
        let tensor = self.push(
            NodeType::Variable {
                name: name.to_string(),
                trainable,
            },
            Vec::new(),
            Some(data),
            shape,
        );
        self.with_mut(|g| g.variables.insert(name.to_string(), tensor.id));
        trace!("created variable {name} (node {})", tensor.id);
        Ok(tensor)
    }

    pub fn constant(&self, data: B::Tensor) -> Tensor<B> {
        let shape = B::shape(&data);
        self.push(NodeType::Const, Vec::new(), Some(data), shape)
    }

    /// Rank-0 constant.
    pub fn scalar(&self, value: Elm) -> Tensor<B> {
        self.constant(B::full(&[], value))
    }

    pub fn variable_by_name(&self, name: &str) -> Option<Tensor<B>> {
        self.with(|g| g.variables.get(name).copied())
            .map(|id| Tensor::from_id(self, id))
    }

    pub fn variable_names(&self) -> Vec<String> {
        self.with(|g| g.variables.keys().cloned().collect())
    }

    /// Current value of a variable or constant.
    pub fn value(&self, tensor: &Tensor<B>) -> Result<B::Tensor> {
        self.with(|g| {
            g.nodes[tensor.id].data.clone().ok_or_else(|| {
                Error::Engine(format!(
                    "node {} ({}) holds no value",
                    tensor.id,
                    g.nodes[tensor.id].node_type.label()
                ))
            })
        })
    }

    /// Overwrites a variable's value; the shape must not change.
    pub fn set_value(&self, tensor: &Tensor<B>, data: B::Tensor) -> Result<()> {
        self.with_mut(|g| {
            let node = &mut g.nodes[tensor.id];
            let NodeType::Variable { name, .. } = &node.node_type else {
                return Err(Error::Engine(format!(
                    "node {} ({}) is not a variable",
                    node.id,
                    node.node_type.label()
                )));
            };
            let actual = B::shape(&data);
            if actual != node.shape {
                return Err(Error::ShapeMismatch {
                    context: format!("assignment to variable {name}"),
                    expected: node.shape.clone(),
                    actual,
                });
            }
            node.data = Some(data);
            Ok(())
        })
    }

    /// Emits an op that overwrites `target` with `value` when run.
    pub fn assign(&self, target: &Tensor<B>, value: &Tensor<B>) -> Tensor<B> {
        let target_shape = target.shape();
        let value_shape = value.shape();
        if target_shape != value_shape {
            panic!(
                "Shape mismatch in assign: target={:?}, value={:?}",
                target_shape, value_shape
            );
        }
        self.push(
            NodeType::Assign { target: target.id },
            vec![value.id],
            None,
            target_shape,
        )
    }

    /// Emits a fused update of `target` and `slots` from `grad`.
    pub fn apply(
        &self,
        kernel: Rc<dyn UpdateKernel<B>>,
        target: &Tensor<B>,
        slots: &[&Tensor<B>],
        grad: &Tensor<B>,
        extras: &[&Tensor<B>],
    ) -> Tensor<B> {
        let shape = target.shape();
        let mut inputs = vec![grad.id];
        inputs.extend(extras.iter().map(|t| t.id));
        self.push(
            NodeType::Apply {
                kernel,
                target: target.id,
                slots: slots.iter().map(|t| t.id).collect(),
            },
            inputs,
            None,
            shape,
        )
    }

    /// d`y`/d`x` for each of `xs`; see [`autodiff::gradients`].
    pub fn gradients(&self, y: &Tensor<B>, xs: &[Tensor<B>]) -> Vec<Tensor<B>> {
        autodiff::gradients(y, xs)
    }

    /// Compiles a plan that computes `fetches` and then runs the update
    /// `targets` in the given order.
    pub fn build(&self, fetches: &[&Tensor<B>], targets: &[&Tensor<B>]) -> Executor<B> {
        let fetch_ids: Vec<NodeId> = fetches.iter().map(|t| t.id).collect();
        let target_ids: Vec<NodeId> = targets.iter().map(|t| t.id).collect();
        let roots: Vec<NodeId> = fetch_ids.iter().chain(target_ids.iter()).copied().collect();
        let order = self.with(|g| g.topological_sort(&roots));
        Executor::new(self.clone(), order, fetch_ids, target_ids)
    }
}

impl<B: Backend> GraphBuilder<B> {
    pub fn node(&self, id: NodeId) -> &Node<B> {
        &self.nodes[id]
    }

    /// Orders every node `roots` depend on so that inputs come first.
    pub(crate) fn topological_sort(&self, roots: &[NodeId]) -> Vec<NodeId> {
        // Walk backwards from the roots to collect the relevant subgraph.
        let mut queue = VecDeque::new();
        let mut visited = HashSet::new();
        let mut adj = HashMap::<NodeId, Vec<NodeId>>::new();
        let mut in_degree = HashMap::<NodeId, usize>::new();
        for &root in roots {
            if visited.insert(root) {
                queue.push_back(root);
            }
        }
        while let Some(node_id) = queue.pop_front() {
            in_degree.entry(node_id).or_insert(0);
            for &input in &self.nodes[node_id].inputs {
                if visited.insert(input) {
                    queue.push_back(input);
                }
                adj.entry(input).or_default().push(node_id);
                *in_degree.entry(node_id).or_insert(0) += 1;
            }
        }

        // Kahn's algorithm; ties resolved by id for a deterministic order.
        let mut ready: Vec<NodeId> = in_degree
            .iter()
            .filter(|&(_, &d)| d == 0)
            .map(|(&id, _)| id)
            .collect();
        ready.sort_unstable();
        let mut queue: VecDeque<NodeId> = ready.into();
        let mut order = Vec::with_capacity(in_degree.len());
        while let Some(u) = queue.pop_front() {
            order.push(u);
            if let Some(consumers) = adj.get(&u) {
                for &v in consumers {
                    if let Some(d) = in_degree.get_mut(&v) {
                        *d -= 1;
                        if *d == 0 {
                            queue.push_back(v);
                        }
                    }
                }
            }
        }
        order
    }

    /// True when every dimension is known, i.e. the shape can back a variable.
    pub fn is_fully_defined(&self, id: NodeId) -> bool {
        self.nodes[id].shape.iter().all(|&d| d != UNKNOWN_DIM)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::ndarray::NdArray;

    #[test]
    fn duplicate_variable_names_are_rejected() {
        let graph = Graph::<NdArray>::new();
        graph.variable("w", NdArray::zeros(&[2]), true).unwrap();
        let err = graph.variable("w", NdArray::zeros(&[2]), true).unwrap_err();
        assert!(matches!(err, Error::DuplicateVariable(name) if name == "w"));
    }

    #[test]
    fn set_value_checks_shape() {
        let graph = Graph::<NdArray>::new();
        let w = graph.variable("w", NdArray::zeros(&[2]), true).unwrap();
        assert!(graph.set_value(&w, NdArray::ones(&[3])).is_err());
        graph.set_value(&w, NdArray::ones(&[2])).unwrap();
        assert_eq!(NdArray::to_vec(&graph.value(&w).unwrap()), vec![1.0, 1.0]);
    }

    #[test]
    fn topological_sort_puts_inputs_first() {
        let graph = Graph::<NdArray>::new();
        let a = graph.placeholder(&[2]);
        let b = graph.scalar(1.0);
        let c = a.clone() + b.clone();
        let d = c.clone() * a.clone();
        let order = graph.with(|g| g.topological_sort(&[d.id()]));
        let pos = |id: NodeId| order.iter().position(|&x| x == id).unwrap();
        assert!(pos(a.id()) < pos(c.id()));
        assert!(pos(b.id()) < pos(c.id()));
        assert!(pos(c.id()) < pos(d.id()));
    }
}
