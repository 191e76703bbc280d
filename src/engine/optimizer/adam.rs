use std::rc::Rc;

use crate::backend::{Backend, Elm};
use crate::engine::operation::UpdateKernel;
use crate::engine::optimizer::{
    scalar_extra, slot_count_error, ClipGradient, Optimizer, SlotStore,
};
use crate::engine::tensor::Tensor;
use crate::engine::variable::Variable;
use crate::engine::Graph;
use crate::error::Result;

const FIRST_MOMENT: &str = "m";
const SECOND_MOMENT: &str = "v";
const FIRST_BETA_POWER: &str = "beta1_power";
const SECOND_BETA_POWER: &str = "beta2_power";

/// Adam optimizer.
///
/// ```text
/// lr_t <- learning_rate * sqrt(1 - beta2^t) / (1 - beta1^t)
/// m_t <- beta1 * m_{t-1} + (1 - beta1) * g
/// v_t <- beta2 * v_{t-1} + (1 - beta2) * g * g
/// variable <- variable - lr_t * m_t / (sqrt(v_t) + epsilon)
/// ```
#[derive(Debug)]
pub struct Adam<B: Backend> {
    pub learning_rate: Elm,
    pub beta1: Elm,
    pub beta2: Elm,
    pub epsilon: Elm,
    pub clip_gradient: ClipGradient,
    slots: SlotStore<B>,
}

impl<B: Backend> Default for Adam<B> {
    fn default() -> Self {
        Self::new(0.001, 0.9, 0.999, 1e-7)
    }
}

impl<B: Backend> Adam<B> {
    pub fn new(learning_rate: Elm, beta1: Elm, beta2: Elm, epsilon: Elm) -> Self {
        Self {
            learning_rate,
            beta1,
            beta2,
            epsilon,
            clip_gradient: ClipGradient::NoClip,
            slots: SlotStore::new("Adam"),
        }
    }

    pub fn clip_gradient(mut self, clip_gradient: ClipGradient) -> Self {
        self.clip_gradient = clip_gradient;
        self
    }
}

impl<B: Backend> Optimizer<B> for Adam<B> {
    fn name(&self) -> &'static str {
        "Adam"
    }

    fn create_slots(&mut self, graph: &Graph<B>, variables: &[Variable<B>]) -> Result<()> {
        self.slots.begin()?;
        for v in variables {
            self.slots.create(graph, v, FIRST_MOMENT, 0.0)?;
            self.slots.create(graph, v, SECOND_MOMENT, 0.0)?;
        }
        self.slots.create_global(graph, FIRST_BETA_POWER, self.beta1)?;
        self.slots.create_global(graph, SECOND_BETA_POWER, self.beta2)?;
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
        let beta1_power = self.slots.global(FIRST_BETA_POWER)?.tensor.clone();
        let beta2_power = self.slots.global(SECOND_BETA_POWER)?.tensor.clone();
        let kernel: Rc<dyn UpdateKernel<B>> = Rc::new(ApplyAdam {
            learning_rate: self.learning_rate,
            beta1: self.beta1,
            beta2: self.beta2,
            epsilon: self.epsilon,
        });

        let mut targets = Vec::with_capacity(variables.len() + 2);
        for (variable, gradient) in variables.iter().zip(&gradients) {
            let m = &self.slots.get(&variable.name, FIRST_MOMENT)?.tensor;
            let v = &self.slots.get(&variable.name, SECOND_MOMENT)?.tensor;
            targets.push(graph.apply(
                kernel.clone(),
                &variable.tensor,
                &[m, v],
                gradient,
                &[&beta1_power, &beta2_power],
            ));
        }

        let next_beta1 = beta1_power.clone().mul_scalar(self.beta1);
        let next_beta2 = beta2_power.clone().mul_scalar(self.beta2);
        targets.push(graph.assign(&beta1_power, &next_beta1));
        targets.push(graph.assign(&beta2_power, &next_beta2));
        Ok(targets)
    }

    fn slots(&self) -> &SlotStore<B> {
        &self.slots
    }
}

/// Slots are `[m, v]`; extras are `[beta1_power, beta2_power]`.
#[derive(Debug, Clone)]
pub struct ApplyAdam {
    pub learning_rate: Elm,
    pub beta1: Elm,
    pub beta2: Elm,
    pub epsilon: Elm,
}

impl<B: Backend> UpdateKernel<B> for ApplyAdam {
    fn name(&self) -> String {
        "ApplyAdam".to_string()
    }

    fn apply(
        &self,
        var: &mut B::Tensor,
        slots: &mut [B::Tensor],
        grad: &B::Tensor,
        extras: &[&B::Tensor],
    ) -> Result<()> {
        let beta1_power = scalar_extra::<B>("ApplyAdam", extras, 0)?;
        let beta2_power = scalar_extra::<B>("ApplyAdam", extras, 1)?;
        let count = slots.len();
        let [m, v] = slots else {
            return Err(slot_count_error("ApplyAdam", 2, count));
        };

        *m = B::add(
            &B::mul_scalar(m, self.beta1),
            &B::mul_scalar(grad, 1.0 - self.beta1),
        );
        *v = B::add(
            &B::mul_scalar(v, self.beta2),
            &B::mul_scalar(&B::mul(grad, grad), 1.0 - self.beta2),
        );

        let lr_t = self.learning_rate * (1.0 - beta2_power).sqrt() / (1.0 - beta1_power);
        let step = B::div(m, &B::add_scalar(&B::sqrt(v), self.epsilon));
        *var = B::sub(var, &B::mul_scalar(&step, lr_t));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::ndarray::NdArray;

    #[test]
    fn first_step_moves_by_learning_rate() {
        let graph = Graph::<NdArray>::new();
        let w = Variable::new(&graph, "w", NdArray::zeros(&[2]), true, None).unwrap();
        let mut opt = Adam::<NdArray>::new(0.1, 0.9, 0.999, 1e-8);
        opt.create_slots(&graph, &[w.clone()]).unwrap();

        let g = graph.constant(NdArray::from_vec(vec![0.5, -2.0], &[2]).unwrap());
        let targets = opt.apply_gradients(&graph, &[w.clone()], &[g]).unwrap();
        let refs: Vec<&Tensor<NdArray>> = targets.iter().collect();
        graph.build(&[], &refs).run(&[]).unwrap();

        // With bias correction the first step is ~lr * sign(g).
        let w = NdArray::to_vec(&w.value().unwrap());
        assert!((w[0] + 0.1).abs() < 1e-4);
        assert!((w[1] - 0.1).abs() < 1e-4);

        let b2 = opt.slots().global("beta2_power").unwrap().value().unwrap();
        assert!((NdArray::to_vec(&b2)[0] - 0.999 * 0.999).abs() < 1e-6);
    }

    #[test]
    fn kernel_needs_both_beta_powers() {
        let kernel = ApplyAdam {
            learning_rate: 0.1,
            beta1: 0.9,
            beta2: 0.999,
            epsilon: 1e-8,
        };
        let mut var = NdArray::zeros(&[1]);
        let mut slots = vec![NdArray::zeros(&[1]), NdArray::zeros(&[1])];
        let grad = NdArray::ones(&[1]);
        let beta1_power = NdArray::full(&[], 0.9);
        let result =
            UpdateKernel::<NdArray>::apply(&kernel, &mut var, &mut slots, &grad, &[&beta1_power]);
        assert!(matches!(result, Err(crate::error::Error::Engine(msg)) if msg.contains("ApplyAdam")));
    }
}
