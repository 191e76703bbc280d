use std::rc::Rc;

use crate::backend::{Backend, Elm};
use crate::engine::operation::UpdateKernel;
use crate::engine::optimizer::{slot_count_error, ClipGradient, Optimizer, SlotStore};
use crate::engine::tensor::Tensor;
use crate::engine::variable::Variable;
use crate::engine::Graph;
use crate::error::Result;

const MOMENTUM: &str = "momentum";

/// Stochastic gradient descent, optionally with (Nesterov) momentum.
///
/// Without momentum no slots are created and each step is
/// `variable <- variable - learning_rate * g`.
#[derive(Debug)]
pub struct SGD<B: Backend> {
    pub learning_rate: Elm,
    pub momentum: Elm,
    pub nesterov: bool,
    pub clip_gradient: ClipGradient,
    slots: SlotStore<B>,
}

impl<B: Backend> Default for SGD<B> {
    fn default() -> Self {
        Self::new(0.01)
    }
}

impl<B: Backend> SGD<B> {
    pub fn new(learning_rate: Elm) -> Self {
        Self {
            learning_rate,
            momentum: 0.0,
            nesterov: false,
            clip_gradient: ClipGradient::NoClip,
            slots: SlotStore::new("SGD"),
        }
    }

    pub fn momentum(mut self, momentum: Elm) -> Self {
        self.momentum = momentum;
        self
    }

    pub fn nesterov(mut self, nesterov: bool) -> Self {
        self.nesterov = nesterov;
        self
    }

    pub fn clip_gradient(mut self, clip_gradient: ClipGradient) -> Self {
        self.clip_gradient = clip_gradient;
        self
    }

    fn uses_momentum(&self) -> bool {
        self.momentum > 0.0
    }
}

impl<B: Backend> Optimizer<B> for SGD<B> {
    fn name(&self) -> &'static str {
        "SGD"
    }

    fn create_slots(&mut self, graph: &Graph<B>, variables: &[Variable<B>]) -> Result<()> {
        self.slots.begin()?;
        if self.uses_momentum() {
            for v in variables {
                self.slots.create(graph, v, MOMENTUM, 0.0)?;
            }
        }
        Ok(())
    }

    fn apply_gradients(
        &mut self,
        graph: &Graph<B>,
        variables: &[Variable<B>],
        gradients: &[Tensor<B>],
    ) -> Result<Vec<Tensor<B>>> {
        let gradients = self
            .slots
            .prepare_gradients(variables, gradients, self.clip_gradient)?;

        let mut targets = Vec::with_capacity(variables.len());
        if self.uses_momentum() {
            let kernel: Rc<dyn UpdateKernel<B>> = Rc::new(ApplyMomentum {
                learning_rate: self.learning_rate,
                momentum: self.momentum,
                nesterov: self.nesterov,
            });
            for (variable, gradient) in variables.iter().zip(&gradients) {
                let accum = &self.slots.get(&variable.name, MOMENTUM)?.tensor;
                targets.push(graph.apply(kernel.clone(), &variable.tensor, &[accum], gradient, &[]));
            }
        } else {
            let kernel: Rc<dyn UpdateKernel<B>> = Rc::new(ApplyGradientDescent {
                learning_rate: self.learning_rate,
            });
            for (variable, gradient) in variables.iter().zip(&gradients) {
                targets.push(graph.apply(kernel.clone(), &variable.tensor, &[], gradient, &[]));
            }
        }
        Ok(targets)
    }

    fn slots(&self) -> &SlotStore<B> {
        &self.slots
    }
}

#[derive(Debug, Clone)]
pub struct ApplyGradientDescent {
    pub learning_rate: Elm,
}

impl<B: Backend> UpdateKernel<B> for ApplyGradientDescent {
    fn name(&self) -> String {
        "ApplyGradientDescent".to_string()
    }

    fn apply(
        &self,
        var: &mut B::Tensor,
        _slots: &mut [B::Tensor],
        grad: &B::Tensor,
        _extras: &[&B::Tensor],
    ) -> Result<()> {
        *var = B::sub(var, &B::mul_scalar(grad, self.learning_rate));
        Ok(())
    }
}

/// `accum <- momentum * accum + g`, then either
/// `var -= lr * accum` or, with Nesterov, `var -= lr * g + lr * momentum * accum`.
#[derive(Debug, Clone)]
pub struct ApplyMomentum {
    pub learning_rate: Elm,
    pub momentum: Elm,
    pub nesterov: bool,
}

impl<B: Backend> UpdateKernel<B> for ApplyMomentum {
    fn name(&self) -> String {
        "ApplyMomentum".to_string()
    }

    fn apply(
        &self,
        var: &mut B::Tensor,
        slots: &mut [B::Tensor],
        grad: &B::Tensor,
        _extras: &[&B::Tensor],
    ) -> Result<()> {
        let count = slots.len();
        let [accum] = slots else {
            return Err(slot_count_error("ApplyMomentum", 1, count));
        };
        *accum = B::add(&B::mul_scalar(accum, self.momentum), grad);
        let step = if self.nesterov {
            B::add(
                &B::mul_scalar(grad, self.learning_rate),
                &B::mul_scalar(accum, self.learning_rate * self.momentum),
            )
        } else {
            B::mul_scalar(accum, self.learning_rate)
        };
        *var = B::sub(var, &step);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::ndarray::NdArray;

    fn step_twice(opt: &mut SGD<NdArray>) -> Vec<f32> {
        let graph = Graph::<NdArray>::new();
        let w = Variable::new(&graph, "w", NdArray::ones(&[1]), true, None).unwrap();
        opt.create_slots(&graph, &[w.clone()]).unwrap();
        let g = graph.constant(NdArray::ones(&[1]));
        let targets = opt.apply_gradients(&graph, &[w.clone()], &[g]).unwrap();
        let refs: Vec<&Tensor<NdArray>> = targets.iter().collect();
        let mut exec = graph.build(&[], &refs);
        exec.run(&[]).unwrap();
        exec.run(&[]).unwrap();
        NdArray::to_vec(&w.value().unwrap())
    }

    #[test]
    fn plain_descent_has_no_slots() {
        let mut opt = SGD::<NdArray>::new(0.1);
        let w = step_twice(&mut opt);
        assert!((w[0] - 0.8).abs() < 1e-6);
        assert!(opt.slots().is_empty());
    }

    #[test]
    fn momentum_accumulates() {
        // accum: 1.0 then 1.5; w: 1 - 0.1 - 0.15
        let mut opt = SGD::<NdArray>::new(0.1).momentum(0.5);
        let w = step_twice(&mut opt);
        assert!((w[0] - 0.75).abs() < 1e-6);
        assert_eq!(opt.slots().len(), 1);
    }

    #[test]
    fn nesterov_looks_ahead() {
        // step1: 0.1 + 0.05; step2: 0.1 + 0.075
        let mut opt = SGD::<NdArray>::new(0.1).momentum(0.5).nesterov(true);
        let w = step_twice(&mut opt);
        assert!((w[0] - 0.675).abs() < 1e-6);
    }
}
