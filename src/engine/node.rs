use std::rc::Rc;

use crate::backend::Backend;
use crate::engine::operation::{Operation, UpdateKernel};

pub type NodeId = usize;

#[derive(Clone, Debug)]
pub enum NodeType<B: Backend> {
    /// Placeholder fed from outside on every run.
    Input,
    /// Mutable, named tensor that persists across runs.
    Variable { name: String, trainable: bool },
    /// Immutable value baked into the graph.
    Const,
    Operation(Rc<dyn Operation<B>>),
    /// Overwrites `target` with the value of the single input.
    Assign { target: NodeId },
    /// Fused optimizer step: mutates `target` and its `slots` in place.
    /// Inputs are the gradient followed by read-only extras.
    Apply {
        kernel: Rc<dyn UpdateKernel<B>>,
        target: NodeId,
        slots: Vec<NodeId>,
    },
}

impl<B: Backend> NodeType<B> {
    pub fn label(&self) -> String {
        match self {
            NodeType::Input => "Input".to_string(),
            NodeType::Variable { name, .. } => format!("Variable({name})"),
            NodeType::Const => "Const".to_string(),
            NodeType::Operation(op) => op.name(),
            NodeType::Assign { target } => format!("Assign(target={target})"),
            NodeType::Apply { kernel, target, .. } => format!("{}(target={target})", kernel.name()),
        }
    }

    pub fn is_update(&self) -> bool {
        matches!(self, NodeType::Assign { .. } | NodeType::Apply { .. })
    }
}

#[derive(Clone, Debug)]
pub struct Node<B: Backend> {
    pub id: NodeId,
    pub node_type: NodeType<B>,
    pub inputs: Vec<NodeId>,
    /// Persistent value of variables and constants; `None` for everything else.
    pub data: Option<B::Tensor>,
    /// Static shape; the batch axis may be `UNKNOWN_DIM`.
    pub shape: Vec<usize>,
}
