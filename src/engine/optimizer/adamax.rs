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

/// Adamax optimizer, the infinity-norm variant of Adam.
///
/// ```text
/// m_t <- beta1 * m_{t-1} + (1 - beta1) * g
/// v_t <- max(beta2 * v_{t-1}, |g|)
/// variable <- variable - learning_rate / (1 - beta1^t) * m_t / (v_t + epsilon)
/// ```
///
/// `beta1^t` is a variable initialised to `beta1` and multiplied by `beta1`
/// after every step. It is part of the optimizer state, so it keeps
/// accumulating across `fit` calls.
#[derive(Debug)]
pub struct Adamax<B: Backend> {
    pub learning_rate: Elm,
    pub beta1: Elm,
    pub beta2: Elm,
    pub epsilon: Elm,
    pub clip_gradient: ClipGradient,
    slots: SlotStore<B>,
}

impl<B: Backend> Default for Adamax<B> {
    fn default() -> Self {
        Self::new(0.001, 0.9, 0.999, 1e-7)
    }
}

impl<B: Backend> Adamax<B> {
    pub fn new(learning_rate: Elm, beta1: Elm, beta2: Elm, epsilon: Elm) -> Self {
        Self {
            learning_rate,
            beta1,
            beta2,
            epsilon,
            clip_gradient: ClipGradient::NoClip,
            slots: SlotStore::new("Adamax"),
        }
    }

    pub fn clip_gradient(mut self, clip_gradient: ClipGradient) -> Self {
        self.clip_gradient = clip_gradient;
        self
    }
}

impl<B: Backend> Optimizer<B> for Adamax<B> {
    fn name(&self) -> &'static str {
        "Adamax"
    }

    fn create_slots(&mut self, graph: &Graph<B>, variables: &[Variable<B>]) -> Result<()> {
        self.slots.begin()?;
        for v in variables {
            self.slots.create(graph, v, FIRST_MOMENT, 0.0)?;
            self.slots.create(graph, v, SECOND_MOMENT, 0.0)?;
        }
        self.slots.create_global(graph, FIRST_BETA_POWER, self.beta1)?;
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
        let kernel: Rc<dyn UpdateKernel<B>> = Rc::new(ApplyAdaMax {
            learning_rate: self.learning_rate,
            beta1: self.beta1,
            beta2: self.beta2,
            epsilon: self.epsilon,
        });

        let mut targets = Vec::with_capacity(variables.len() + 1);
        for (variable, gradient) in variables.iter().zip(&gradients) {
            let m = &self.slots.get(&variable.name, FIRST_MOMENT)?.tensor;
            let v = &self.slots.get(&variable.name, SECOND_MOMENT)?.tensor;
            targets.push(graph.apply(
                kernel.clone(),
                &variable.tensor,
                &[m, v],
                gradient,
                &[&beta1_power],
            ));
        }

        let next_power = beta1_power.clone().mul_scalar(self.beta1);
        targets.push(graph.assign(&beta1_power, &next_power));
        Ok(targets)
    }

    fn slots(&self) -> &SlotStore<B> {
        &self.slots
    }
}

/// Slots are `[m, v]`; extras are `[beta1_power]`.
#[derive(Debug, Clone)]
pub struct ApplyAdaMax {
    pub learning_rate: Elm,
    pub beta1: Elm,
    pub beta2: Elm,
    pub epsilon: Elm,
}

impl<B: Backend> UpdateKernel<B> for ApplyAdaMax {
    fn name(&self) -> String {
        "ApplyAdaMax".to_string()
    }

    fn apply(
        &self,
        var: &mut B::Tensor,
        slots: &mut [B::Tensor],
        grad: &B::Tensor,
        extras: &[&B::Tensor],
    ) -> Result<()> {
        let beta1_power = scalar_extra::<B>("ApplyAdaMax", extras, 0)?;
        let count = slots.len();
        let [m, v] = slots else {
            return Err(slot_count_error("ApplyAdaMax", 2, count));
        };

        *m = B::add(
            &B::mul_scalar(m, self.beta1),
            &B::mul_scalar(grad, 1.0 - self.beta1),
        );
        *v = B::maximum(&B::mul_scalar(v, self.beta2), &B::abs(grad));

        let step = B::div(m, &B::add_scalar(v, self.epsilon));
        let lr_t = self.learning_rate / (1.0 - beta1_power);
        *var = B::sub(var, &B::mul_scalar(&step, lr_t));
        Ok(())
    }
}
