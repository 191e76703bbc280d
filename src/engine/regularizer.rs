use serde::{Deserialize, Serialize};

use crate::backend::{Backend, Elm};
use crate::engine::tensor::Tensor;

/// Weight penalty added to the training loss.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Regularizer {
    /// `l1 * sum(|w|)`
    L1(Elm),
    /// `l2 * sum(w^2)`
    L2(Elm),
    L1L2 { l1: Elm, l2: Elm },
}

impl Regularizer {
    /// Builds the scalar penalty node for `weight`.
    pub fn penalty<B: Backend>(&self, weight: &Tensor<B>) -> Tensor<B> {
        let l1 = |f: Elm| weight.clone().abs().sum(None).mul_scalar(f);
        let l2 = |f: Elm| weight.clone().square().sum(None).mul_scalar(f);
        match *self {
            Regularizer::L1(f) => l1(f),
            Regularizer::L2(f) => l2(f),
            Regularizer::L1L2 { l1: a, l2: b } => l1(a) + l2(b),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::ndarray::NdArray;
    use crate::engine::Graph;

    #[test]
    fn l1l2_penalty() {
        let graph = Graph::<NdArray>::new();
        let w = graph
            .variable("w", NdArray::from_vec(vec![1.0, -2.0], &[2]).unwrap(), true)
            .unwrap();
        let p = Regularizer::L1L2 { l1: 0.1, l2: 0.01 }.penalty(&w);
        let mut exec = graph.build(&[&p], &[]);
        let v = NdArray::to_vec(&exec.run(&[]).unwrap()[0]);
        // 0.1 * 3 + 0.01 * 5
        assert!((v[0] - 0.35).abs() < 1e-6);
    }
}
