use std::fmt::Debug;
use std::rc::Rc;

use crate::backend::{Backend, Elm};
use crate::engine::shape::{
    broadcast_shape, matmul_shape, reduce_shape, resolve_reshape, transpose_shape, UNKNOWN_DIM,
};
use crate::engine::tensor::Tensor;
use crate::error::{Error, Result};

/// An atomic operation in the computation graph.
pub trait Operation<B: Backend>: Debug {
    /// Name of the operation, used for logging and error messages.
    fn name(&self) -> String;

    /// Static output shape for the given static input shapes.
    fn output_shape(&self, inputs: &[Vec<usize>]) -> std::result::Result<Vec<usize>, String>;

    /// Evaluates the operation on the provided backend data.
    fn forward(&self, inputs: &[&B::Tensor]) -> Result<B::Tensor>;

    /// Builds graph nodes computing the gradient of every input from `gy`,
    /// the gradient flowing into `output`. `None` means no gradient flows.
    fn backward(
        &self,
        gy: &Tensor<B>,
        inputs: &[Tensor<B>],
        output: &Tensor<B>,
    ) -> Vec<Option<Tensor<B>>>;
}

/// In-place optimizer step executed by an `Apply` node.
///
/// `slots` are the optimizer-owned accumulators of the variable, in the
/// order they were handed to [`Graph::apply`](crate::engine::Graph::apply);
/// `extras` are read-only values such as the running beta powers.
pub trait UpdateKernel<B: Backend>: Debug {
    fn name(&self) -> String;

    fn apply(
        &self,
        var: &mut B::Tensor,
        slots: &mut [B::Tensor],
        grad: &B::Tensor,
        extras: &[&B::Tensor],
    ) -> Result<()>;
}

fn same_shape(inputs: &[Vec<usize>]) -> std::result::Result<Vec<usize>, String> {
    Ok(inputs[0].clone())
}

fn broadcast(inputs: &[Vec<usize>]) -> std::result::Result<Vec<usize>, String> {
    broadcast_shape(&inputs[0], &inputs[1])
}

fn scalar_like<B: Backend>(like: &Tensor<B>, value: Elm) -> Tensor<B> {
    like.graph().scalar(value)
}

#[derive(Debug, Clone)]
pub struct AddOp;
impl<B: Backend> Operation<B> for AddOp {
    fn name(&self) -> String {
        "Add".to_string()
    }
    fn output_shape(&self, inputs: &[Vec<usize>]) -> std::result::Result<Vec<usize>, String> {
        broadcast(inputs)
    }
    fn forward(&self, inputs: &[&B::Tensor]) -> Result<B::Tensor> {
        Ok(B::add(inputs[0], inputs[1]))
    }
    fn backward(&self, gy: &Tensor<B>, inputs: &[Tensor<B>], _: &Tensor<B>) -> Vec<Option<Tensor<B>>> {
        vec![
            Some(gy.clone().reduce_like(&inputs[0])),
            Some(gy.clone().reduce_like(&inputs[1])),
        ]
    }
}

#[derive(Debug, Clone)]
pub struct SubOp;
impl<B: Backend> Operation<B> for SubOp {
    fn name(&self) -> String {
        "Sub".to_string()
    }
    fn output_shape(&self, inputs: &[Vec<usize>]) -> std::result::Result<Vec<usize>, String> {
        broadcast(inputs)
    }
    fn forward(&self, inputs: &[&B::Tensor]) -> Result<B::Tensor> {
        Ok(B::sub(inputs[0], inputs[1]))
    }
    fn backward(&self, gy: &Tensor<B>, inputs: &[Tensor<B>], _: &Tensor<B>) -> Vec<Option<Tensor<B>>> {
        vec![
            Some(gy.clone().reduce_like(&inputs[0])),
            Some((-gy.clone()).reduce_like(&inputs[1])),
        ]
    }
}

#[derive(Debug, Clone)]
pub struct MulOp;
impl<B: Backend> Operation<B> for MulOp {
    fn name(&self) -> String {
        "Mul".to_string()
    }
    fn output_shape(&self, inputs: &[Vec<usize>]) -> std::result::Result<Vec<usize>, String> {
        broadcast(inputs)
    }
    fn forward(&self, inputs: &[&B::Tensor]) -> Result<B::Tensor> {
        Ok(B::mul(inputs[0], inputs[1]))
    }
    fn backward(&self, gy: &Tensor<B>, inputs: &[Tensor<B>], _: &Tensor<B>) -> Vec<Option<Tensor<B>>> {
        let a = &inputs[0];
        let b = &inputs[1];
        let ga = (gy.clone() * b.clone()).reduce_like(a);
        let gb = (gy.clone() * a.clone()).reduce_like(b);
        vec![Some(ga), Some(gb)]
    }
}

#[derive(Debug, Clone)]
pub struct DivOp;
impl<B: Backend> Operation<B> for DivOp {
    fn name(&self) -> String {
        "Div".to_string()
    }
    fn output_shape(&self, inputs: &[Vec<usize>]) -> std::result::Result<Vec<usize>, String> {
        broadcast(inputs)
    }
    fn forward(&self, inputs: &[&B::Tensor]) -> Result<B::Tensor> {
        Ok(B::div(inputs[0], inputs[1]))
    }
    fn backward(&self, gy: &Tensor<B>, inputs: &[Tensor<B>], _: &Tensor<B>) -> Vec<Option<Tensor<B>>> {
        let a = &inputs[0];
        let b = &inputs[1];
        let ga = (gy.clone() / b.clone()).reduce_like(a);
        // d(a/b)/db = -a / b^2
        let gb = (-(gy.clone() * a.clone()) / b.clone().square()).reduce_like(b);
        vec![Some(ga), Some(gb)]
    }
}

#[derive(Debug, Clone)]
pub struct MatmulOp;
impl<B: Backend> Operation<B> for MatmulOp {
    fn name(&self) -> String {
        "Matmul".to_string()
    }
    fn output_shape(&self, inputs: &[Vec<usize>]) -> std::result::Result<Vec<usize>, String> {
        matmul_shape(&inputs[0], &inputs[1])
    }
    fn forward(&self, inputs: &[&B::Tensor]) -> Result<B::Tensor> {
        Ok(B::matmul(inputs[0], inputs[1]))
    }
    fn backward(&self, gy: &Tensor<B>, inputs: &[Tensor<B>], _: &Tensor<B>) -> Vec<Option<Tensor<B>>> {
        let a = &inputs[0];
        let b = &inputs[1];
        let ga = gy.clone().matmul(b.clone().transpose());
        let gb = a.clone().transpose().matmul(gy.clone());
        vec![Some(ga), Some(gb)]
    }
}

#[derive(Debug, Clone)]
pub struct NegOp;
impl<B: Backend> Operation<B> for NegOp {
    fn name(&self) -> String {
        "Neg".to_string()
    }
    fn output_shape(&self, inputs: &[Vec<usize>]) -> std::result::Result<Vec<usize>, String> {
        same_shape(inputs)
    }
    fn forward(&self, inputs: &[&B::Tensor]) -> Result<B::Tensor> {
        Ok(B::neg(inputs[0]))
    }
    fn backward(&self, gy: &Tensor<B>, _: &[Tensor<B>], _: &Tensor<B>) -> Vec<Option<Tensor<B>>> {
        vec![Some(-gy.clone())]
    }
}

#[derive(Debug, Clone)]
pub struct TransposeOp;
impl<B: Backend> Operation<B> for TransposeOp {
    fn name(&self) -> String {
        "Transpose".to_string()
    }
    fn output_shape(&self, inputs: &[Vec<usize>]) -> std::result::Result<Vec<usize>, String> {
        Ok(transpose_shape(&inputs[0]))
    }
    fn forward(&self, inputs: &[&B::Tensor]) -> Result<B::Tensor> {
        Ok(B::transpose(inputs[0]))
    }
    fn backward(&self, gy: &Tensor<B>, _: &[Tensor<B>], _: &Tensor<B>) -> Vec<Option<Tensor<B>>> {
        vec![Some(gy.clone().transpose())]
    }
}

#[derive(Debug, Clone)]
pub struct ReLUOp;
impl<B: Backend> Operation<B> for ReLUOp {
    fn name(&self) -> String {
        "ReLU".to_string()
    }
    fn output_shape(&self, inputs: &[Vec<usize>]) -> std::result::Result<Vec<usize>, String> {
        same_shape(inputs)
    }
    fn forward(&self, inputs: &[&B::Tensor]) -> Result<B::Tensor> {
        Ok(B::relu(inputs[0]))
    }
    fn backward(&self, gy: &Tensor<B>, inputs: &[Tensor<B>], _: &Tensor<B>) -> Vec<Option<Tensor<B>>> {
        let x = &inputs[0];
        let mask = x.clone().gt(scalar_like(x, 0.0));
        vec![Some(gy.clone() * mask)]
    }
}

#[derive(Debug, Clone)]
pub struct SigmoidOp;
impl<B: Backend> Operation<B> for SigmoidOp {
    fn name(&self) -> String {
        "Sigmoid".to_string()
    }
    fn output_shape(&self, inputs: &[Vec<usize>]) -> std::result::Result<Vec<usize>, String> {
        same_shape(inputs)
    }
    fn forward(&self, inputs: &[&B::Tensor]) -> Result<B::Tensor> {
        Ok(B::sigmoid(inputs[0]))
    }
    fn backward(&self, gy: &Tensor<B>, _: &[Tensor<B>], y: &Tensor<B>) -> Vec<Option<Tensor<B>>> {
        // dy/dx = y * (1 - y)
        let one = scalar_like(y, 1.0);
        vec![Some(gy.clone() * y.clone() * (one - y.clone()))]
    }
}

#[derive(Debug, Clone)]
pub struct TanhOp;
impl<B: Backend> Operation<B> for TanhOp {
    fn name(&self) -> String {
        "Tanh".to_string()
    }
    fn output_shape(&self, inputs: &[Vec<usize>]) -> std::result::Result<Vec<usize>, String> {
        same_shape(inputs)
    }
    fn forward(&self, inputs: &[&B::Tensor]) -> Result<B::Tensor> {
        Ok(B::tanh(inputs[0]))
    }
    fn backward(&self, gy: &Tensor<B>, _: &[Tensor<B>], y: &Tensor<B>) -> Vec<Option<Tensor<B>>> {
        let one = scalar_like(y, 1.0);
        vec![Some(gy.clone() * (one - y.clone().square()))]
    }
}

#[derive(Debug, Clone)]
pub struct ExpOp;
impl<B: Backend> Operation<B> for ExpOp {
    fn name(&self) -> String {
        "Exp".to_string()
    }
    fn output_shape(&self, inputs: &[Vec<usize>]) -> std::result::Result<Vec<usize>, String> {
        same_shape(inputs)
    }
    fn forward(&self, inputs: &[&B::Tensor]) -> Result<B::Tensor> {
        Ok(B::exp(inputs[0]))
    }
    fn backward(&self, gy: &Tensor<B>, _: &[Tensor<B>], y: &Tensor<B>) -> Vec<Option<Tensor<B>>> {
        vec![Some(gy.clone() * y.clone())]
    }
}

#[derive(Debug, Clone)]
pub struct LogOp;
impl<B: Backend> Operation<B> for LogOp {
    fn name(&self) -> String {
        "Log".to_string()
    }
    fn output_shape(&self, inputs: &[Vec<usize>]) -> std::result::Result<Vec<usize>, String> {
        same_shape(inputs)
    }
    fn forward(&self, inputs: &[&B::Tensor]) -> Result<B::Tensor> {
        Ok(B::log(inputs[0]))
    }
    fn backward(&self, gy: &Tensor<B>, inputs: &[Tensor<B>], _: &Tensor<B>) -> Vec<Option<Tensor<B>>> {
        vec![Some(gy.clone() / inputs[0].clone())]
    }
}

#[derive(Debug, Clone)]
pub struct SqrtOp;
impl<B: Backend> Operation<B> for SqrtOp {
    fn name(&self) -> String {
        "Sqrt".to_string()
    }
    fn output_shape(&self, inputs: &[Vec<usize>]) -> std::result::Result<Vec<usize>, String> {
        same_shape(inputs)
    }
    fn forward(&self, inputs: &[&B::Tensor]) -> Result<B::Tensor> {
        Ok(B::sqrt(inputs[0]))
    }
    fn backward(&self, gy: &Tensor<B>, _: &[Tensor<B>], y: &Tensor<B>) -> Vec<Option<Tensor<B>>> {
        vec![Some(gy.clone().mul_scalar(0.5) / y.clone())]
    }
}

#[derive(Debug, Clone)]
pub struct AbsOp;
impl<B: Backend> Operation<B> for AbsOp {
    fn name(&self) -> String {
        "Abs".to_string()
    }
    fn output_shape(&self, inputs: &[Vec<usize>]) -> std::result::Result<Vec<usize>, String> {
        same_shape(inputs)
    }
    fn forward(&self, inputs: &[&B::Tensor]) -> Result<B::Tensor> {
        Ok(B::abs(inputs[0]))
    }
    fn backward(&self, gy: &Tensor<B>, inputs: &[Tensor<B>], _: &Tensor<B>) -> Vec<Option<Tensor<B>>> {
        vec![Some(gy.clone() * inputs[0].clone().sign())]
    }
}

#[derive(Debug, Clone)]
pub struct SignOp;
impl<B: Backend> Operation<B> for SignOp {
    fn name(&self) -> String {
        "Sign".to_string()
    }
    fn output_shape(&self, inputs: &[Vec<usize>]) -> std::result::Result<Vec<usize>, String> {
        same_shape(inputs)
    }
    fn forward(&self, inputs: &[&B::Tensor]) -> Result<B::Tensor> {
        Ok(B::sign(inputs[0]))
    }
    // Piecewise constant.
    fn backward(&self, _: &Tensor<B>, _: &[Tensor<B>], _: &Tensor<B>) -> Vec<Option<Tensor<B>>> {
        vec![None]
    }
}

#[derive(Debug, Clone)]
pub struct PowiOp {
    pub n: i32,
}
impl<B: Backend> Operation<B> for PowiOp {
    fn name(&self) -> String {
        format!("Powi({})", self.n)
    }
    fn output_shape(&self, inputs: &[Vec<usize>]) -> std::result::Result<Vec<usize>, String> {
        same_shape(inputs)
    }
    fn forward(&self, inputs: &[&B::Tensor]) -> Result<B::Tensor> {
        Ok(B::powi(inputs[0], self.n))
    }
    fn backward(&self, gy: &Tensor<B>, inputs: &[Tensor<B>], _: &Tensor<B>) -> Vec<Option<Tensor<B>>> {
        let x = inputs[0].clone();
        let grad = if self.n == 1 {
            gy.clone()
        } else {
            gy.clone() * x.powi(self.n - 1).mul_scalar(self.n as Elm)
        };
        vec![Some(grad)]
    }
}

#[derive(Debug, Clone)]
pub struct EluOp {
    pub alpha: Elm,
}
impl<B: Backend> Operation<B> for EluOp {
    fn name(&self) -> String {
        format!("Elu(alpha={})", self.alpha)
    }
    fn output_shape(&self, inputs: &[Vec<usize>]) -> std::result::Result<Vec<usize>, String> {
        same_shape(inputs)
    }
    fn forward(&self, inputs: &[&B::Tensor]) -> Result<B::Tensor> {
        let alpha = self.alpha;
        Ok(B::map(inputs[0], &|x| if x > 0.0 { x } else { alpha * (x.exp() - 1.0) }))
    }
    fn backward(&self, gy: &Tensor<B>, inputs: &[Tensor<B>], y: &Tensor<B>) -> Vec<Option<Tensor<B>>> {
        // 1 where x > 0, y + alpha elsewhere.
        let x = &inputs[0];
        let pos = x.clone().gt(scalar_like(x, 0.0));
        let neg = scalar_like(x, 1.0) - pos.clone();
        let slope = pos + neg * y.clone().add_scalar(self.alpha);
        vec![Some(gy.clone() * slope)]
    }
}

#[derive(Debug, Clone)]
pub struct SoftmaxOp {
    pub axis: usize,
}
impl<B: Backend> Operation<B> for SoftmaxOp {
    fn name(&self) -> String {
        format!("Softmax(axis={})", self.axis)
    }
    fn output_shape(&self, inputs: &[Vec<usize>]) -> std::result::Result<Vec<usize>, String> {
        reduce_shape(&inputs[0], Some(self.axis), true)?;
        same_shape(inputs)
    }
    fn forward(&self, inputs: &[&B::Tensor]) -> Result<B::Tensor> {
        Ok(B::softmax(inputs[0], self.axis))
    }
    fn backward(&self, gy: &Tensor<B>, _: &[Tensor<B>], y: &Tensor<B>) -> Vec<Option<Tensor<B>>> {
        // dx = y * (gy - sum(y * gy, axis, keepdims))
        let sum_y_gy = (y.clone() * gy.clone()).sum_keepdims(Some(self.axis));
        vec![Some(y.clone() * (gy.clone() - sum_y_gy))]
    }
}

#[derive(Debug, Clone)]
pub struct LogSoftmaxOp {
    pub axis: usize,
}
impl<B: Backend> Operation<B> for LogSoftmaxOp {
    fn name(&self) -> String {
        format!("LogSoftmax(axis={})", self.axis)
    }
    fn output_shape(&self, inputs: &[Vec<usize>]) -> std::result::Result<Vec<usize>, String> {
        reduce_shape(&inputs[0], Some(self.axis), true)?;
        same_shape(inputs)
    }
    fn forward(&self, inputs: &[&B::Tensor]) -> Result<B::Tensor> {
        Ok(B::log_softmax(inputs[0], self.axis))
    }
    fn backward(&self, gy: &Tensor<B>, _: &[Tensor<B>], y: &Tensor<B>) -> Vec<Option<Tensor<B>>> {
        // dx = gy - softmax(x) * sum(gy, axis, keepdims)
        let softmax = y.clone().exp();
        let sum_gy = gy.clone().sum_keepdims(Some(self.axis));
        vec![Some(gy.clone() - softmax * sum_gy)]
    }
}

#[derive(Debug, Clone)]
pub struct ClipOp {
    pub min: Elm,
    pub max: Elm,
}
impl<B: Backend> Operation<B> for ClipOp {
    fn name(&self) -> String {
        format!("Clip({}, {})", self.min, self.max)
    }
    fn output_shape(&self, inputs: &[Vec<usize>]) -> std::result::Result<Vec<usize>, String> {
        same_shape(inputs)
    }
    fn forward(&self, inputs: &[&B::Tensor]) -> Result<B::Tensor> {
        let (min, max) = (self.min, self.max);
        Ok(B::map(inputs[0], &|x| x.clamp(min, max)))
    }
    fn backward(&self, gy: &Tensor<B>, inputs: &[Tensor<B>], _: &Tensor<B>) -> Vec<Option<Tensor<B>>> {
        let mask = Tensor::op(
            Rc::new(ClipMaskOp {
                min: self.min,
                max: self.max,
            }),
            vec![&inputs[0]],
        );
        vec![Some(gy.clone() * mask)]
    }
}

/// 1 where the input lies inside `[min, max]`, 0 elsewhere.
#[derive(Debug, Clone)]
pub struct ClipMaskOp {
    pub min: Elm,
    pub max: Elm,
}
impl<B: Backend> Operation<B> for ClipMaskOp {
    fn name(&self) -> String {
        "ClipMask".to_string()
    }
    fn output_shape(&self, inputs: &[Vec<usize>]) -> std::result::Result<Vec<usize>, String> {
        same_shape(inputs)
    }
    fn forward(&self, inputs: &[&B::Tensor]) -> Result<B::Tensor> {
        let (min, max) = (self.min, self.max);
        Ok(B::map(inputs[0], &|x| if x >= min && x <= max { 1.0 } else { 0.0 }))
    }
    fn backward(&self, _: &Tensor<B>, _: &[Tensor<B>], _: &Tensor<B>) -> Vec<Option<Tensor<B>>> {
        vec![None]
    }
}

/// Rescales the input so that its L2 norm is at most `clip_norm`.
/// Only ever applied to gradients, so it is not differentiated.
#[derive(Debug, Clone)]
pub struct ClipByNormOp {
    pub clip_norm: Elm,
}
impl<B: Backend> Operation<B> for ClipByNormOp {
    fn name(&self) -> String {
        format!("ClipByNorm({})", self.clip_norm)
    }
    fn output_shape(&self, inputs: &[Vec<usize>]) -> std::result::Result<Vec<usize>, String> {
        same_shape(inputs)
    }
    fn forward(&self, inputs: &[&B::Tensor]) -> Result<B::Tensor> {
        let x = inputs[0];
        let norm = B::to_vec(x).iter().map(|v| v * v).sum::<Elm>().sqrt();
        if norm > self.clip_norm {
            Ok(B::mul_scalar(x, self.clip_norm / norm))
        } else {
            Ok(x.clone())
        }
    }
    fn backward(&self, _: &Tensor<B>, _: &[Tensor<B>], _: &Tensor<B>) -> Vec<Option<Tensor<B>>> {
        vec![None]
    }
}

#[derive(Debug, Clone)]
pub struct SumOp {
    pub axis: Option<usize>,
    pub keep_dims: bool,
}
impl<B: Backend> Operation<B> for SumOp {
    fn name(&self) -> String {
        format!("Sum(axis={:?}, keep={})", self.axis, self.keep_dims)
    }
    fn output_shape(&self, inputs: &[Vec<usize>]) -> std::result::Result<Vec<usize>, String> {
        reduce_shape(&inputs[0], self.axis, self.keep_dims)
    }
    fn forward(&self, inputs: &[&B::Tensor]) -> Result<B::Tensor> {
        Ok(B::sum(inputs[0], self.axis, self.keep_dims))
    }
    fn backward(&self, gy: &Tensor<B>, inputs: &[Tensor<B>], _: &Tensor<B>) -> Vec<Option<Tensor<B>>> {
        let grad = Tensor::op(
            Rc::new(SumGradOp {
                axis: self.axis,
                keep_dims: self.keep_dims,
            }),
            vec![&inputs[0], gy],
        );
        vec![Some(grad)]
    }
}

/// Spreads the gradient of a sum back over the summed axes.
/// Inputs are `[x, gy]`.
#[derive(Debug, Clone)]
pub struct SumGradOp {
    pub axis: Option<usize>,
    pub keep_dims: bool,
}
impl<B: Backend> Operation<B> for SumGradOp {
    fn name(&self) -> String {
        "SumGrad".to_string()
    }
    fn output_shape(&self, inputs: &[Vec<usize>]) -> std::result::Result<Vec<usize>, String> {
        same_shape(inputs)
    }
    fn forward(&self, inputs: &[&B::Tensor]) -> Result<B::Tensor> {
        let (x, gy) = (inputs[0], inputs[1]);
        let gy = match (self.axis, self.keep_dims) {
            (Some(axis), false) => {
                let mut shape = B::shape(gy);
                shape.insert(axis, 1);
                B::reshape(gy, &shape)?
            }
            _ => gy.clone(),
        };
        Ok(B::mul(&B::ones_like(x), &gy))
    }
    fn backward(&self, _: &Tensor<B>, _: &[Tensor<B>], _: &Tensor<B>) -> Vec<Option<Tensor<B>>> {
        vec![None, None]
    }
}

#[derive(Debug, Clone)]
pub struct MeanOp;
impl<B: Backend> Operation<B> for MeanOp {
    fn name(&self) -> String {
        "Mean".to_string()
    }
    fn output_shape(&self, _: &[Vec<usize>]) -> std::result::Result<Vec<usize>, String> {
        Ok(vec![])
    }
    fn forward(&self, inputs: &[&B::Tensor]) -> Result<B::Tensor> {
        Ok(B::mean(inputs[0]))
    }
    fn backward(&self, gy: &Tensor<B>, inputs: &[Tensor<B>], _: &Tensor<B>) -> Vec<Option<Tensor<B>>> {
        vec![Some(Tensor::op(Rc::new(MeanGradOp), vec![&inputs[0], gy]))]
    }
}

/// `gy / n` broadcast to the shape of `x`, where `n` is the run-time
/// element count. Inputs are `[x, gy]`.
#[derive(Debug, Clone)]
pub struct MeanGradOp;
impl<B: Backend> Operation<B> for MeanGradOp {
    fn name(&self) -> String {
        "MeanGrad".to_string()
    }
    fn output_shape(&self, inputs: &[Vec<usize>]) -> std::result::Result<Vec<usize>, String> {
        same_shape(inputs)
    }
    fn forward(&self, inputs: &[&B::Tensor]) -> Result<B::Tensor> {
        let shape = B::shape(inputs[0]);
        let n = shape.iter().product::<usize>().max(1) as Elm;
        let gy = B::scalar_value(inputs[1])
            .ok_or_else(|| Error::Engine("MeanGrad expects a scalar gradient".to_string()))?;
        Ok(B::full(&shape, gy / n))
    }
    fn backward(&self, _: &Tensor<B>, _: &[Tensor<B>], _: &Tensor<B>) -> Vec<Option<Tensor<B>>> {
        vec![None, None]
    }
}

/// Sums the first input over broadcast axes down to the run-time shape of
/// the second.
#[derive(Debug, Clone)]
pub struct ReduceLikeOp;
impl<B: Backend> Operation<B> for ReduceLikeOp {
    fn name(&self) -> String {
        "ReduceLike".to_string()
    }
    fn output_shape(&self, inputs: &[Vec<usize>]) -> std::result::Result<Vec<usize>, String> {
        Ok(inputs[1].clone())
    }
    fn forward(&self, inputs: &[&B::Tensor]) -> Result<B::Tensor> {
        Ok(B::sum_to(inputs[0], &B::shape(inputs[1])))
    }
    fn backward(&self, gy: &Tensor<B>, inputs: &[Tensor<B>], _: &Tensor<B>) -> Vec<Option<Tensor<B>>> {
        let grad = Tensor::ones_like(&inputs[0]) * gy.clone();
        vec![Some(grad), None]
    }
}

#[derive(Debug, Clone)]
pub struct ReshapeOp {
    pub shape: Vec<usize>,
}
impl<B: Backend> Operation<B> for ReshapeOp {
    fn name(&self) -> String {
        format!("Reshape{:?}", self.shape)
    }
    fn output_shape(&self, inputs: &[Vec<usize>]) -> std::result::Result<Vec<usize>, String> {
        if inputs[0].contains(&UNKNOWN_DIM) {
            if self.shape.iter().filter(|&&d| d == UNKNOWN_DIM).count() != 1 {
                return Err(format!(
                    "reshape of {:?} needs exactly one unknown target dimension, got {:?}",
                    inputs[0], self.shape
                ));
            }
            Ok(self.shape.clone())
        } else {
            resolve_reshape(&inputs[0], &self.shape)
        }
    }
    fn forward(&self, inputs: &[&B::Tensor]) -> Result<B::Tensor> {
        let actual = B::shape(inputs[0]);
        let shape = resolve_reshape(&actual, &self.shape).map_err(Error::Engine)?;
        B::reshape(inputs[0], &shape)
    }
    fn backward(&self, gy: &Tensor<B>, inputs: &[Tensor<B>], _: &Tensor<B>) -> Vec<Option<Tensor<B>>> {
        vec![Some(Tensor::op(Rc::new(ReshapeLikeOp), vec![gy, &inputs[0]]))]
    }
}

/// Reshapes the first input to the run-time shape of the second.
#[derive(Debug, Clone)]
pub struct ReshapeLikeOp;
impl<B: Backend> Operation<B> for ReshapeLikeOp {
    fn name(&self) -> String {
        "ReshapeLike".to_string()
    }
    fn output_shape(&self, inputs: &[Vec<usize>]) -> std::result::Result<Vec<usize>, String> {
        Ok(inputs[1].clone())
    }
    fn forward(&self, inputs: &[&B::Tensor]) -> Result<B::Tensor> {
        B::reshape(inputs[0], &B::shape(inputs[1]))
    }
    fn backward(&self, gy: &Tensor<B>, inputs: &[Tensor<B>], _: &Tensor<B>) -> Vec<Option<Tensor<B>>> {
        vec![
            Some(Tensor::op(Rc::new(ReshapeLikeOp), vec![gy, &inputs[0]])),
            None,
        ]
    }
}

#[derive(Debug, Clone)]
pub struct OnesLikeOp;
impl<B: Backend> Operation<B> for OnesLikeOp {
    fn name(&self) -> String {
        "OnesLike".to_string()
    }
    fn output_shape(&self, inputs: &[Vec<usize>]) -> std::result::Result<Vec<usize>, String> {
        same_shape(inputs)
    }
    fn forward(&self, inputs: &[&B::Tensor]) -> Result<B::Tensor> {
        Ok(B::ones_like(inputs[0]))
    }
    fn backward(&self, _: &Tensor<B>, _: &[Tensor<B>], _: &Tensor<B>) -> Vec<Option<Tensor<B>>> {
        vec![None]
    }
}

#[derive(Debug, Clone)]
pub struct GtOp;
impl<B: Backend> Operation<B> for GtOp {
    fn name(&self) -> String {
        "Gt".to_string()
    }
    fn output_shape(&self, inputs: &[Vec<usize>]) -> std::result::Result<Vec<usize>, String> {
        broadcast(inputs)
    }
    fn forward(&self, inputs: &[&B::Tensor]) -> Result<B::Tensor> {
        Ok(B::gt(inputs[0], inputs[1]))
    }
    fn backward(&self, _: &Tensor<B>, _: &[Tensor<B>], _: &Tensor<B>) -> Vec<Option<Tensor<B>>> {
        vec![None, None]
    }
}

#[derive(Debug, Clone)]
pub struct EqOp;
impl<B: Backend> Operation<B> for EqOp {
    fn name(&self) -> String {
        "Eq".to_string()
    }
    fn output_shape(&self, inputs: &[Vec<usize>]) -> std::result::Result<Vec<usize>, String> {
        broadcast(inputs)
    }
    fn forward(&self, inputs: &[&B::Tensor]) -> Result<B::Tensor> {
        Ok(B::eq(inputs[0], inputs[1]))
    }
    fn backward(&self, _: &Tensor<B>, _: &[Tensor<B>], _: &Tensor<B>) -> Vec<Option<Tensor<B>>> {
        vec![None, None]
    }
}

#[derive(Debug, Clone)]
pub struct ArgMaxOp {
    pub axis: usize,
}
impl<B: Backend> Operation<B> for ArgMaxOp {
    fn name(&self) -> String {
        format!("ArgMax(axis={})", self.axis)
    }
    fn output_shape(&self, inputs: &[Vec<usize>]) -> std::result::Result<Vec<usize>, String> {
        reduce_shape(&inputs[0], Some(self.axis), false)
    }
    fn forward(&self, inputs: &[&B::Tensor]) -> Result<B::Tensor> {
        Ok(B::argmax(inputs[0], self.axis))
    }
    fn backward(&self, _: &Tensor<B>, _: &[Tensor<B>], _: &Tensor<B>) -> Vec<Option<Tensor<B>>> {
        vec![None]
    }
}

#[derive(Debug, Clone)]
pub struct AddNOp;
impl<B: Backend> Operation<B> for AddNOp {
    fn name(&self) -> String {
        "AddN".to_string()
    }
    fn output_shape(&self, inputs: &[Vec<usize>]) -> std::result::Result<Vec<usize>, String> {
        let mut shape = inputs[0].clone();
        for next in &inputs[1..] {
            shape = broadcast_shape(&shape, next)?;
        }
        Ok(shape)
    }
    fn forward(&self, inputs: &[&B::Tensor]) -> Result<B::Tensor> {
        let mut sum = inputs[0].clone();
        for next in &inputs[1..] {
            sum = B::add(&sum, next);
        }
        Ok(sum)
    }
    fn backward(&self, gy: &Tensor<B>, inputs: &[Tensor<B>], _: &Tensor<B>) -> Vec<Option<Tensor<B>>> {
        inputs
            .iter()
            .map(|x| Some(gy.clone().reduce_like(x)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::ndarray::NdArray;
    use crate::engine::Graph;

    #[test]
    fn broadcast_add_reports_static_shape() {
        let graph = Graph::<NdArray>::new();
        let x = graph.placeholder(&[UNKNOWN_DIM, 3]);
        let b = graph.constant(NdArray::zeros(&[3]));
        assert_eq!((x + b).shape(), vec![UNKNOWN_DIM, 3]);
    }

    #[test]
    #[should_panic(expected = "Shape mismatch in operation Matmul")]
    fn matmul_rejects_mismatched_inner_dims() {
        let graph = Graph::<NdArray>::new();
        let a = graph.placeholder(&[2, 3]);
        let b = graph.placeholder(&[4, 5]);
        let _ = a.matmul(b);
    }

    #[test]
    fn clip_by_norm_rescales_large_vectors() {
        let op = ClipByNormOp { clip_norm: 1.0 };
        let x = NdArray::from_vec(vec![3.0, 4.0], &[2]).unwrap();
        let y = Operation::<NdArray>::forward(&op, &[&x]).unwrap();
        let v = NdArray::to_vec(&y);
        assert!((v[0] - 0.6).abs() < 1e-6);
        assert!((v[1] - 0.8).abs() < 1e-6);
    }
}
