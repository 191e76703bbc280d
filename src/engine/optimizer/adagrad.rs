use std::rc::Rc;

use crate::backend::{Backend, Elm};
use crate::engine::operation::UpdateKernel;
use crate::engine::optimizer::{slot_count_error, ClipGradient, Optimizer, SlotStore};
use crate::engine::tensor::Tensor;
use crate::engine::variable::Variable;
use crate::engine::Graph;
use crate::error::Result;

const ACCUMULATOR: &str = "accumulator";

/// AdaGrad: `accum += g * g; variable -= learning_rate * g / sqrt(accum)`.
#[derive(Debug)]
pub struct AdaGrad<B: Backend> {
    pub learning_rate: Elm,
    pub initial_accumulator_value: Elm,
    pub clip_gradient: ClipGradient,
    slots: SlotStore<B>,
}

impl<B: Backend> Default for AdaGrad<B> {
    fn default() -> Self {
        Self::new(0.1)
    }
}

impl<B: Backend> AdaGrad<B> {
    pub fn new(learning_rate: Elm) -> Self {
        Self {
            learning_rate,
            initial_accumulator_value: 0.1,
            clip_gradient: ClipGradient::NoClip,
            slots: SlotStore::new("AdaGrad"),
        }
    }

    pub fn initial_accumulator_value(mut self, value: Elm) -> Self {
        self.initial_accumulator_value = value;
        self
    }

    pub fn clip_gradient(mut self, clip_gradient: ClipGradient) -> Self {
        self.clip_gradient = clip_gradient;
        self
    }
}

impl<B: Backend> Optimizer<B> for AdaGrad<B> {
    fn name(&self) -> &'static str {
        "AdaGrad"
    }

    fn create_slots(&mut self, graph: &Graph<B>, variables: &[Variable<B>]) -> Result<()> {
        self.slots.begin()?;
        for v in variables {
            self.slots
                .create(graph, v, ACCUMULATOR, self.initial_accumulator_value)?;
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
        let kernel: Rc<dyn UpdateKernel<B>> = Rc::new(ApplyAdagrad {
            learning_rate: self.learning_rate,
        });
        let mut targets = Vec::with_capacity(variables.len());
        for (variable, gradient) in variables.iter().zip(&gradients) {
            let accum = &self.slots.get(&variable.name, ACCUMULATOR)?.tensor;
            targets.push(graph.apply(kernel.clone(), &variable.tensor, &[accum], gradient, &[]));
        }
        Ok(targets)
    }

    fn slots(&self) -> &SlotStore<B> {
        &self.slots
    }
}

#[derive(Debug, Clone)]
pub struct ApplyAdagrad {
    pub learning_rate: Elm,
}

impl<B: Backend> UpdateKernel<B> for ApplyAdagrad {
    fn name(&self) -> String {
        "ApplyAdagrad".to_string()
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
            return Err(slot_count_error("ApplyAdagrad", 1, count));
        };
        *accum = B::add(accum, &B::mul(grad, grad));
        let step = B::div(&B::mul_scalar(grad, self.learning_rate), &B::sqrt(accum));
        *var = B::sub(var, &step);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::ndarray::NdArray;

    #[test]
    fn accumulator_grows_with_squared_gradients() {
        let graph = Graph::<NdArray>::new();
        let w = Variable::new(&graph, "w", NdArray::zeros(&[1]), true, None).unwrap();
        let mut opt = AdaGrad::<NdArray>::new(0.1).initial_accumulator_value(0.0);
        opt.create_slots(&graph, &[w.clone()]).unwrap();

        let g = graph.constant(NdArray::full(&[1], 2.0));
        let targets = opt.apply_gradients(&graph, &[w.clone()], &[g]).unwrap();
        let refs: Vec<&Tensor<NdArray>> = targets.iter().collect();
        graph.build(&[], &refs).run(&[]).unwrap();

        let accum = opt.slots().get("w", "accumulator").unwrap().value().unwrap();
        assert!((NdArray::to_vec(&accum)[0] - 4.0).abs() < 1e-6);
        // 0.1 * 2 / sqrt(4)
        assert!((NdArray::to_vec(&w.value().unwrap())[0] + 0.1).abs() < 1e-6);
    }
}
