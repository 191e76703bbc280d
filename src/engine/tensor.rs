use std::fmt;
use std::rc::Rc;

use crate::backend::{Backend, Elm};
use crate::engine::nn_ops::{AvgPool2dOp, Conv2dOp, DepthwiseConv2dOp, MaxPool2dOp};
use crate::engine::operation::*;
use crate::engine::shape::Conv2dGeometry;
use crate::engine::{Graph, node::NodeId};

/// Handle to a node of a computation graph.
///
/// A `Tensor` holds no data itself; combining tensors appends operation
/// nodes to the graph they belong to, and values only appear when an
/// [`Executor`](crate::engine::executor::Executor) runs the graph.
pub struct Tensor<B: Backend> {
    pub(crate) id: NodeId,
    pub(crate) graph: Graph<B>,
}

impl<B: Backend> Clone for Tensor<B> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            graph: self.graph.clone(),
        }
    }
}

impl<B: Backend> fmt::Debug for Tensor<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (label, shape) = self.graph.with(|g| {
            let node = g.node(self.id);
            (node.node_type.label(), node.shape.clone())
        });
        f.debug_struct("Tensor")
            .field("id", &self.id)
            .field("node", &label)
            .field("shape", &shape)
            .finish()
    }
}

impl<B: Backend> Tensor<B> {
    pub(crate) fn from_id(graph: &Graph<B>, id: NodeId) -> Self {
        Tensor {
            id,
            graph: graph.clone(),
        }
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn graph(&self) -> &Graph<B> {
        &self.graph
    }

    /// Static shape recorded at construction time.
    pub fn shape(&self) -> Vec<usize> {
        self.graph.with(|g| g.node(self.id).shape.clone())
    }

    pub fn rank(&self) -> usize {
        self.shape().len()
    }

    /// Appends an operation node consuming `inputs`.
    ///
    /// Panics when the inputs live in different graphs or their shapes are
    /// incompatible with the operation; both are programming errors.
    pub fn op(op: Rc<dyn Operation<B>>, inputs: Vec<&Tensor<B>>) -> Tensor<B> {
        let graph = inputs
            .first()
            .map(|t| t.graph.clone())
            .unwrap_or_else(|| panic!("operation {} needs at least one input", op.name()));
        if inputs.iter().any(|t| !t.graph.ptr_eq(&graph)) {
            panic!("operation {} mixes tensors from different graphs", op.name());
        }

        let input_shapes: Vec<Vec<usize>> = inputs.iter().map(|t| t.shape()).collect();
        let output_shape = op.output_shape(&input_shapes).unwrap_or_else(|e| {
            panic!("Shape mismatch in operation {}: {}", op.name(), e)
        });

        graph.push(
            crate::engine::node::NodeType::Operation(op),
            inputs.iter().map(|t| t.id).collect(),
            None,
            output_shape,
        )
    }

    fn scalar(&self, value: Elm) -> Tensor<B> {
        self.graph.scalar(value)
    }

    pub fn add_scalar(self, value: Elm) -> Self {
        let s = self.scalar(value);
        self + s
    }

    pub fn mul_scalar(self, value: Elm) -> Self {
        let s = self.scalar(value);
        self * s
    }

    /// Matrix product of two rank-2 tensors.
    pub fn matmul(self, rhs: Self) -> Self {
        Tensor::op(Rc::new(MatmulOp), vec![&self, &rhs])
    }

    /// Swaps the last two axes.
    pub fn transpose(self) -> Self {
        Tensor::op(Rc::new(TransposeOp), vec![&self])
    }

    pub fn abs(self) -> Self {
        Tensor::op(Rc::new(AbsOp), vec![&self])
    }

    pub fn sign(self) -> Self {
        Tensor::op(Rc::new(SignOp), vec![&self])
    }

    pub fn sqrt(self) -> Self {
        Tensor::op(Rc::new(SqrtOp), vec![&self])
    }

    pub fn exp(self) -> Self {
        Tensor::op(Rc::new(ExpOp), vec![&self])
    }

    pub fn log(self) -> Self {
        Tensor::op(Rc::new(LogOp), vec![&self])
    }

    pub fn powi(self, n: i32) -> Self {
        Tensor::op(Rc::new(PowiOp { n }), vec![&self])
    }

    pub fn square(self) -> Self {
        self.powi(2)
    }

    pub fn relu(self) -> Self {
        Tensor::op(Rc::new(ReLUOp), vec![&self])
    }

    pub fn sigmoid(self) -> Self {
        Tensor::op(Rc::new(SigmoidOp), vec![&self])
    }

    pub fn tanh(self) -> Self {
        Tensor::op(Rc::new(TanhOp), vec![&self])
    }

    pub fn elu(self, alpha: Elm) -> Self {
        Tensor::op(Rc::new(EluOp { alpha }), vec![&self])
    }

    /// Softmax along `axis`; `None` means the last axis.
    pub fn softmax(self, axis: Option<usize>) -> Self {
        let axis = axis.unwrap_or_else(|| self.rank().saturating_sub(1));
        Tensor::op(Rc::new(SoftmaxOp { axis }), vec![&self])
    }

    pub fn log_softmax(self, axis: Option<usize>) -> Self {
        let axis = axis.unwrap_or_else(|| self.rank().saturating_sub(1));
        Tensor::op(Rc::new(LogSoftmaxOp { axis }), vec![&self])
    }

    pub fn swish(self) -> Self {
        let s = self.clone().sigmoid();
        self * s
    }

    /// Clamps every element into `[min, max]`.
    pub fn clip(self, min: Elm, max: Elm) -> Self {
        Tensor::op(Rc::new(ClipOp { min, max }), vec![&self])
    }

    /// Rescales so that the L2 norm does not exceed `clip_norm`.
    pub fn clip_by_norm(self, clip_norm: Elm) -> Self {
        Tensor::op(Rc::new(ClipByNormOp { clip_norm }), vec![&self])
    }

    /// Sums along `axis`, or over everything when `None`.
    pub fn sum(self, axis: Option<usize>) -> Self {
        Tensor::op(
            Rc::new(SumOp {
                axis,
                keep_dims: false,
            }),
            vec![&self],
        )
    }

    pub fn sum_keepdims(self, axis: Option<usize>) -> Self {
        Tensor::op(
            Rc::new(SumOp {
                axis,
                keep_dims: true,
            }),
            vec![&self],
        )
    }

    /// Mean of all elements, counted at run time.
    pub fn mean(self) -> Self {
        Tensor::op(Rc::new(MeanOp), vec![&self])
    }

    /// Reshapes to `shape`; one `UNKNOWN_DIM` entry is inferred at run time.
    pub fn reshape(self, shape: Vec<usize>) -> Self {
        Tensor::op(Rc::new(ReshapeOp { shape }), vec![&self])
    }

    pub fn ones_like(tensor: &Self) -> Self {
        Tensor::op(Rc::new(OnesLikeOp), vec![tensor])
    }

    /// Sums `self` over broadcast axes so it takes the run-time shape of `like`.
    pub fn reduce_like(self, like: &Self) -> Self {
        if self.shape() == like.shape() {
            return self;
        }
        Tensor::op(Rc::new(ReduceLikeOp), vec![&self, like])
    }

    pub fn gt(self, rhs: Self) -> Self {
        Tensor::op(Rc::new(GtOp), vec![&self, &rhs])
    }

    pub fn equal(self, rhs: Self) -> Self {
        Tensor::op(Rc::new(EqOp), vec![&self, &rhs])
    }

    pub fn argmax(self, axis: usize) -> Self {
        Tensor::op(Rc::new(ArgMaxOp { axis }), vec![&self])
    }

    pub fn add_n(tensors: Vec<Self>) -> Self {
        let refs: Vec<&Tensor<B>> = tensors.iter().collect();
        Tensor::op(Rc::new(AddNOp), refs)
    }

    pub fn conv2d(self, kernel: Self, geo: Conv2dGeometry) -> Self {
        Tensor::op(Rc::new(Conv2dOp { geo }), vec![&self, &kernel])
    }

    pub fn depthwise_conv2d(self, kernel: Self, geo: Conv2dGeometry) -> Self {
        Tensor::op(Rc::new(DepthwiseConv2dOp { geo }), vec![&self, &kernel])
    }

    pub fn max_pool2d(self, geo: Conv2dGeometry) -> Self {
        Tensor::op(Rc::new(MaxPool2dOp { geo }), vec![&self])
    }

    pub fn avg_pool2d(self, geo: Conv2dGeometry) -> Self {
        Tensor::op(Rc::new(AvgPool2dOp { geo }), vec![&self])
    }
}

impl<B: Backend> std::ops::Add for Tensor<B> {
    type Output = Tensor<B>;

    fn add(self, rhs: Self) -> Self::Output {
        Tensor::op(Rc::new(AddOp), vec![&self, &rhs])
    }
}

impl<B: Backend> std::ops::Sub for Tensor<B> {
    type Output = Tensor<B>;

    fn sub(self, rhs: Self) -> Self::Output {
        Tensor::op(Rc::new(SubOp), vec![&self, &rhs])
    }
}

impl<B: Backend> std::ops::Mul for Tensor<B> {
    type Output = Tensor<B>;

    fn mul(self, rhs: Self) -> Self::Output {
        Tensor::op(Rc::new(MulOp), vec![&self, &rhs])
    }
}

impl<B: Backend> std::ops::Div for Tensor<B> {
    type Output = Tensor<B>;

    fn div(self, rhs: Self) -> Self::Output {
        Tensor::op(Rc::new(DivOp), vec![&self, &rhs])
    }
}

impl<B: Backend> std::ops::Neg for Tensor<B> {
    type Output = Tensor<B>;

    fn neg(self) -> Self::Output {
        Tensor::op(Rc::new(NegOp), vec![&self])
    }
}
