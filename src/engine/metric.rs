use serde::{Deserialize, Serialize};

use crate::backend::Backend;
use crate::engine::tensor::Tensor;

/// Reported by `evaluate` and per epoch during `fit`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Metric {
    /// Fraction of samples whose argmax prediction matches the argmax label.
    #[default]
    Accuracy,
    Mae,
    Mse,
}

impl Metric {
    pub fn build<B: Backend>(&self, predictions: &Tensor<B>, labels: &Tensor<B>) -> Tensor<B> {
        match self {
            Metric::Accuracy => {
                let axis = predictions.rank().saturating_sub(1);
                let predicted = predictions.clone().argmax(axis);
                let expected = labels.clone().argmax(axis);
                predicted.equal(expected).mean()
            }
            Metric::Mae => (predictions.clone() - labels.clone()).abs().mean(),
            Metric::Mse => (predictions.clone() - labels.clone()).square().mean(),
        }
    }
}
