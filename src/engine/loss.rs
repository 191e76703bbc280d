use serde::{Deserialize, Serialize};

use crate::backend::Backend;
use crate::engine::tensor::Tensor;

/// Training objective; every variant reduces to a scalar mean over the batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Loss {
    /// `-sum(labels * log_softmax(logits))` per sample, averaged over the batch.
    #[default]
    SoftmaxCrossEntropyWithLogits,
    MeanSquaredError,
    MeanAbsoluteError,
}

impl Loss {
    /// `logits`: [batch, ..], `labels`: same shape as `logits`.
    pub fn build<B: Backend>(&self, logits: &Tensor<B>, labels: &Tensor<B>) -> Tensor<B> {
        match self {
            Loss::SoftmaxCrossEntropyWithLogits => {
                // log(softmax(x)) を直接計算すると log(0) になりうるので log_softmax を使う
                let axis = logits.rank().saturating_sub(1);
                let log_probs = logits.clone().log_softmax(Some(axis));
                let per_sample = (labels.clone() * log_probs).sum(Some(axis));
                -per_sample.mean()
            }
            Loss::MeanSquaredError => (logits.clone() - labels.clone()).square().mean(),
            Loss::MeanAbsoluteError => (logits.clone() - labels.clone()).abs().mean(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::ndarray::NdArray;
    use crate::engine::shape::UNKNOWN_DIM;
    use crate::engine::Graph;

    fn eval(loss: Loss, logits: Vec<f32>, labels: Vec<f32>, shape: &[usize]) -> f32 {
        let graph = Graph::<NdArray>::new();
        let x = graph.placeholder(&[UNKNOWN_DIM, shape[1]]);
        let y = graph.placeholder(&[UNKNOWN_DIM, shape[1]]);
        let l = loss.build(&x, &y);
        let mut exec = graph.build(&[&l], &[]);
        let out = exec
            .run(&[
                (&x, NdArray::from_vec(logits, shape).unwrap()),
                (&y, NdArray::from_vec(labels, shape).unwrap()),
            ])
            .unwrap();
        NdArray::to_vec(&out[0])[0]
    }

    #[test]
    fn cross_entropy_of_uniform_logits_is_log_classes() {
        let v = eval(
            Loss::SoftmaxCrossEntropyWithLogits,
            vec![0.0; 8],
            vec![1.0, 0.0, 0.0, 0.0, 0.0, 0.0, 1.0, 0.0],
            &[2, 4],
        );
        assert!((v - 4f32.ln()).abs() < 1e-5);
    }

    #[test]
    fn mse_and_mae_average_over_all_elements() {
        let mse = eval(Loss::MeanSquaredError, vec![1.0, 3.0], vec![0.0, 0.0], &[2, 1]);
        assert!((mse - 5.0).abs() < 1e-6);
        let mae = eval(Loss::MeanAbsoluteError, vec![1.0, -3.0], vec![0.0, 0.0], &[2, 1]);
        assert!((mae - 2.0).abs() < 1e-6);
    }

    #[test]
    fn cross_entropy_stays_finite_for_large_logits() {
        let v = eval(
            Loss::SoftmaxCrossEntropyWithLogits,
            vec![1000.0, -1000.0],
            vec![0.0, 1.0],
            &[1, 2],
        );
        assert!(v.is_finite());
        assert!((v - 2000.0).abs() < 1e-1);
    }
}
