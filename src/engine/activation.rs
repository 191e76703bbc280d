// 活性化関数はTensorのメソッドの組み合わせとして定義する

use serde::{Deserialize, Serialize};

use crate::backend::Backend;
use crate::engine::tensor::Tensor;

const SELU_ALPHA: f32 = 1.673_263_2;
const SELU_SCALE: f32 = 1.050_701;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Activation {
    /// Identity.
    Linear,
    #[default]
    Relu,
    /// `min(max(x, 0), 6)`
    Relu6,
    Elu,
    Selu,
    Sigmoid,
    /// `clip(0.2 * x + 0.5, 0, 1)`
    HardSigmoid,
    Tanh,
    /// Softmax over the last axis.
    Softmax,
    LogSoftmax,
    /// `log(exp(x) + 1)`
    Softplus,
    /// `x / (|x| + 1)`
    Softsign,
    /// `x * sigmoid(x)`
    Swish,
    Exponential,
}

impl Activation {
    pub fn apply<B: Backend>(&self, x: Tensor<B>) -> Tensor<B> {
        match self {
            Activation::Linear => x,
            Activation::Relu => x.relu(),
            Activation::Relu6 => x.clip(0.0, 6.0),
            Activation::Elu => x.elu(1.0),
            Activation::Selu => x.elu(SELU_ALPHA).mul_scalar(SELU_SCALE),
            Activation::Sigmoid => x.sigmoid(),
            Activation::HardSigmoid => x.mul_scalar(0.2).add_scalar(0.5).clip(0.0, 1.0),
            Activation::Tanh => x.tanh(),
            Activation::Softmax => x.softmax(None),
            Activation::LogSoftmax => x.log_softmax(None),
            Activation::Softplus => x.exp().add_scalar(1.0).log(),
            Activation::Softsign => {
                let denom = x.clone().abs().add_scalar(1.0);
                x / denom
            }
            Activation::Swish => x.swish(),
            Activation::Exponential => x.exp(),
        }
    }

    pub fn is_linear(&self) -> bool {
        matches!(self, Activation::Linear)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::ndarray::NdArray;
    use crate::engine::Graph;

    fn eval(activation: Activation, input: Vec<f32>) -> Vec<f32> {
        let graph = Graph::<NdArray>::new();
        let n = input.len();
        let x = graph.constant(NdArray::from_vec(input, &[1, n]).unwrap());
        let y = activation.apply(x);
        let mut exec = graph.build(&[&y], &[]);
        NdArray::to_vec(&exec.run(&[]).unwrap()[0])
    }

    #[test]
    fn relu6_caps_at_six() {
        assert_eq!(eval(Activation::Relu6, vec![-1.0, 3.0, 9.0]), vec![0.0, 3.0, 6.0]);
    }

    #[test]
    fn hard_sigmoid_is_piecewise_linear() {
        let y = eval(Activation::HardSigmoid, vec![-5.0, 0.0, 1.0, 5.0]);
        let expected = [0.0, 0.5, 0.7, 1.0];
        for (a, b) in y.iter().zip(expected) {
            assert!((a - b).abs() < 1e-6);
        }
    }

    #[test]
    fn softsign_and_softplus() {
        let y = eval(Activation::Softsign, vec![1.0, -3.0]);
        assert!((y[0] - 0.5).abs() < 1e-6);
        assert!((y[1] + 0.75).abs() < 1e-6);
        let y = eval(Activation::Softplus, vec![0.0]);
        assert!((y[0] - std::f32::consts::LN_2).abs() < 1e-6);
    }

    #[test]
    fn softmax_rows_sum_to_one() {
        let y = eval(Activation::Softmax, vec![1.0, 2.0, 3.0]);
        assert!((y.iter().sum::<f32>() - 1.0).abs() < 1e-6);
    }
}
