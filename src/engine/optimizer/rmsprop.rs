use std::rc::Rc;

use crate::backend::{Backend, Elm};
use crate::engine::operation::UpdateKernel;
use crate::engine::optimizer::{slot_count_error, ClipGradient, Optimizer, SlotStore};
use crate::engine::tensor::Tensor;
use crate::engine::variable::Variable;
use crate::engine::Graph;
use crate::error::Result;

const RMS: &str = "rms";
const MOMENTUM: &str = "momentum";
const MEAN_GRADIENT: &str = "mg";

/// RMSProp optimizer.
///
/// ```text
/// ms <- decay * ms + (1 - decay) * g * g
/// mom <- momentum * mom + learning_rate * g / sqrt(ms + epsilon)
/// variable <- variable - mom
/// ```
///
/// When `centered` is set, `ms` is replaced by `ms - mg * mg` in the
/// denominator, where `mg` tracks the mean gradient.
#[derive(Debug)]
pub struct RMSProp<B: Backend> {
    pub learning_rate: Elm,
    pub decay: Elm,
    pub momentum: Elm,
    pub epsilon: Elm,
    pub centered: bool,
    pub clip_gradient: ClipGradient,
    slots: SlotStore<B>,
}

impl<B: Backend> Default for RMSProp<B> {
    fn default() -> Self {
        Self::new(0.001)
    }
}

impl<B: Backend> RMSProp<B> {
    pub fn new(learning_rate: Elm) -> Self {
        Self {
            learning_rate,
            decay: 0.9,
            momentum: 0.0,
            epsilon: 1e-10,
            centered: false,
            clip_gradient: ClipGradient::NoClip,
            slots: SlotStore::new("RMSProp"),
        }
    }

    pub fn decay(mut self, decay: Elm) -> Self {
        self.decay = decay;
        self
    }

    pub fn momentum(mut self, momentum: Elm) -> Self {
        self.momentum = momentum;
        self
    }

    pub fn epsilon(mut self, epsilon: Elm) -> Self {
        self.epsilon = epsilon;
        self
    }

    pub fn centered(mut self, centered: bool) -> Self {
        self.centered = centered;
        self
    }

    pub fn clip_gradient(mut self, clip_gradient: ClipGradient) -> Self {
        self.clip_gradient = clip_gradient;
        self
    }
}

impl<B: Backend> Optimizer<B> for RMSProp<B> {
    fn name(&self) -> &'static str {
        "RMSProp"
    }

    fn create_slots(&mut self, graph: &Graph<B>, variables: &[Variable<B>]) -> Result<()> {
        self.slots.begin()?;
        for v in variables {
            self.slots.create(graph, v, RMS, 1.0)?;
            self.slots.create(graph, v, MOMENTUM, 0.0)?;
            if self.centered {
                self.slots.create(graph, v, MEAN_GRADIENT, 0.0)?;
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
        let kernel: Rc<dyn UpdateKernel<B>> = Rc::new(ApplyRMSProp {
            learning_rate: self.learning_rate,
            decay: self.decay,
            momentum: self.momentum,
            epsilon: self.epsilon,
            centered: self.centered,
        });

        let mut targets = Vec::with_capacity(variables.len());
        for (variable, gradient) in variables.iter().zip(&gradients) {
            let mut slots = vec![
                &self.slots.get(&variable.name, RMS)?.tensor,
                &self.slots.get(&variable.name, MOMENTUM)?.tensor,
            ];
            if self.centered {
                slots.push(&self.slots.get(&variable.name, MEAN_GRADIENT)?.tensor);
            }
            targets.push(graph.apply(kernel.clone(), &variable.tensor, &slots, gradient, &[]));
        }
        Ok(targets)
    }

    fn slots(&self) -> &SlotStore<B> {
        &self.slots
    }
}

/// Slots are `[ms, mom]`, plus `mg` when centered.
#[derive(Debug, Clone)]
pub struct ApplyRMSProp {
    pub learning_rate: Elm,
    pub decay: Elm,
    pub momentum: Elm,
    pub epsilon: Elm,
    pub centered: bool,
}

impl<B: Backend> UpdateKernel<B> for ApplyRMSProp {
    fn name(&self) -> String {
        if self.centered {
            "ApplyCenteredRMSProp".to_string()
        } else {
            "ApplyRMSProp".to_string()
        }
    }

    fn apply(
        &self,
        var: &mut B::Tensor,
        slots: &mut [B::Tensor],
        grad: &B::Tensor,
        _extras: &[&B::Tensor],
    ) -> Result<()> {
        let expected = if self.centered { 3 } else { 2 };
        if slots.len() != expected {
            return Err(slot_count_error(
                &UpdateKernel::<B>::name(self),
                expected,
                slots.len(),
            ));
        }
        let (ms, rest) = slots.split_at_mut(1);
        let ms = &mut ms[0];
        let (mom, rest) = rest.split_at_mut(1);
        let mom = &mut mom[0];

        *ms = B::add(
            &B::mul_scalar(ms, self.decay),
            &B::mul_scalar(&B::mul(grad, grad), 1.0 - self.decay),
        );

        let mut denom = ms.clone();
        if let Some(mg) = rest.first_mut() {
            *mg = B::add(
                &B::mul_scalar(mg, self.decay),
                &B::mul_scalar(grad, 1.0 - self.decay),
            );
            denom = B::sub(&denom, &B::mul(mg, mg));
        }
        let denom = B::sqrt(&B::add_scalar(&denom, self.epsilon));

        *mom = B::add(
            &B::mul_scalar(mom, self.momentum),
            &B::div(&B::mul_scalar(grad, self.learning_rate), &denom),
        );
        *var = B::sub(var, mom);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::ndarray::NdArray;

    #[test]
    fn rms_slot_starts_at_one() {
        let graph = Graph::<NdArray>::new();
        let w = Variable::new(&graph, "w", NdArray::zeros(&[1]), true, None).unwrap();
        let mut opt = RMSProp::<NdArray>::new(0.1);
        opt.create_slots(&graph, &[w.clone()]).unwrap();

        let g = graph.constant(NdArray::ones(&[1]));
        let targets = opt.apply_gradients(&graph, &[w.clone()], &[g]).unwrap();
        let refs: Vec<&Tensor<NdArray>> = targets.iter().collect();
        graph.build(&[], &refs).run(&[]).unwrap();

        // ms = 0.9 * 1 + 0.1 * 1 = 1, so the step is exactly lr.
        let ms = opt.slots().get("w", "rms").unwrap().value().unwrap();
        assert!((NdArray::to_vec(&ms)[0] - 1.0).abs() < 1e-6);
        assert!((NdArray::to_vec(&w.value().unwrap())[0] + 0.1).abs() < 1e-5);
    }

    #[test]
    fn centered_adds_mean_gradient_slot() {
        let graph = Graph::<NdArray>::new();
        let w = Variable::new(&graph, "w", NdArray::zeros(&[3]), true, None).unwrap();
        let mut opt = RMSProp::<NdArray>::new(0.1).centered(true);
        opt.create_slots(&graph, &[w]).unwrap();
        assert_eq!(opt.slots().len(), 3);
        assert_eq!(opt.slots().get("w", "mg").unwrap().name, "w-mg");
    }
}
