use std::collections::BTreeMap;
use std::fmt::Debug;

use log::debug;
use serde::{Deserialize, Serialize};

use crate::backend::{Backend, Elm};
use crate::engine::tensor::Tensor;
use crate::engine::variable::{optimizer_var_name, slot_var_name, Variable};
use crate::engine::Graph;
use crate::error::{Error, Result};

pub mod adagrad;
pub mod adam;
pub mod adamax;
pub mod rmsprop;
pub mod sgd;

pub use adagrad::AdaGrad;
pub use adam::Adam;
pub use adamax::Adamax;
pub use rmsprop::RMSProp;
pub use sgd::SGD;

/// How gradients are clipped before they reach the update kernel.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub enum ClipGradient {
    #[default]
    NoClip,
    ClipByValue {
        min: Elm,
        max: Elm,
    },
    /// Rescales each gradient so that its L2 norm is at most `clip_norm`.
    ClipByNorm {
        clip_norm: Elm,
    },
}

impl ClipGradient {
    pub fn apply<B: Backend>(&self, gradient: Tensor<B>) -> Tensor<B> {
        match *self {
            ClipGradient::NoClip => gradient,
            ClipGradient::ClipByValue { min, max } => gradient.clip(min, max),
            ClipGradient::ClipByNorm { clip_norm } => gradient.clip_by_norm(clip_norm),
        }
    }
}

/// Emits the graph ops that update variables from their gradients.
///
/// `create_slots` runs once, before the first `apply_gradients`; after that
/// the slot set is fixed and every `apply_gradients` call reuses it.
pub trait Optimizer<B: Backend>: Debug {
    fn name(&self) -> &'static str;

    /// Allocates per-variable slots and optimizer-wide state.
    fn create_slots(&mut self, graph: &Graph<B>, variables: &[Variable<B>]) -> Result<()>;

    /// Emits one fused update per `(variable, gradient)` pair, in order,
    /// followed by any optimizer-wide state updates. Returns the update ops.
    fn apply_gradients(
        &mut self,
        graph: &Graph<B>,
        variables: &[Variable<B>],
        gradients: &[Tensor<B>],
    ) -> Result<Vec<Tensor<B>>>;

    fn slots(&self) -> &SlotStore<B>;
}

/// Slot variables keyed by `(variable name, slot name)`, plus scalar
/// optimizer-wide variables keyed by name.
#[derive(Debug, Clone)]
pub struct SlotStore<B: Backend> {
    optimizer: &'static str,
    created: bool,
    slots: BTreeMap<(String, String), Variable<B>>,
    globals: BTreeMap<String, Variable<B>>,
}

impl<B: Backend> SlotStore<B> {
    pub fn new(optimizer: &'static str) -> Self {
        Self {
            optimizer,
            created: false,
            slots: BTreeMap::new(),
            globals: BTreeMap::new(),
        }
    }

    /// Marks the store as populated; fails when it already is.
    pub(crate) fn begin(&mut self) -> Result<()> {
        if self.created {
            return Err(Error::SlotsAlreadyCreated(self.optimizer));
        }
        self.created = true;
        Ok(())
    }

    pub fn is_created(&self) -> bool {
        self.created
    }

    /// Creates a slot shaped like `variable`, filled with `init`.
    pub(crate) fn create(
        &mut self,
        graph: &Graph<B>,
        variable: &Variable<B>,
        slot: &str,
        init: Elm,
    ) -> Result<Variable<B>> {
        let name = slot_var_name(&variable.name, slot);
        let data = B::full(&variable.shape, init);
        let slot_var = Variable::new(graph, &name, data, false, None)?;
        debug!("{}: created slot {name}", self.optimizer);
        self.slots
            .insert((variable.name.clone(), slot.to_string()), slot_var.clone());
        Ok(slot_var)
    }

    /// Creates a scalar optimizer variable such as a running beta power.
    pub(crate) fn create_global(
        &mut self,
        graph: &Graph<B>,
        name: &str,
        init: Elm,
    ) -> Result<Variable<B>> {
        let var_name = optimizer_var_name(name);
        let global = Variable::new(graph, &var_name, B::full(&[], init), false, None)?;
        debug!("{}: created {var_name}", self.optimizer);
        self.globals.insert(name.to_string(), global.clone());
        Ok(global)
    }

    pub fn get(&self, variable: &str, slot: &str) -> Result<&Variable<B>> {
        if !self.created {
            return Err(Error::SlotsNotCreated(self.optimizer));
        }
        self.slots
            .get(&(variable.to_string(), slot.to_string()))
            .ok_or_else(|| Error::MissingSlot {
                variable: variable.to_string(),
                slot: slot.to_string(),
            })
    }

    pub fn global(&self, name: &str) -> Result<&Variable<B>> {
        if !self.created {
            return Err(Error::SlotsNotCreated(self.optimizer));
        }
        self.globals.get(name).ok_or_else(|| Error::MissingSlot {
            variable: optimizer_var_name(name),
            slot: name.to_string(),
        })
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Every slot and global variable, slots first.
    pub fn variables(&self) -> Vec<Variable<B>> {
        self.slots
            .values()
            .chain(self.globals.values())
            .cloned()
            .collect()
    }

    /// Checks usage order and counts, then routes every gradient through `clip`.
    pub(crate) fn prepare_gradients(
        &self,
        variables: &[Variable<B>],
        gradients: &[Tensor<B>],
        clip: ClipGradient,
    ) -> Result<Vec<Tensor<B>>> {
        if !self.created {
            return Err(Error::SlotsNotCreated(self.optimizer));
        }
        if variables.len() != gradients.len() {
            return Err(Error::GradientCountMismatch {
                variables: variables.len(),
                gradients: gradients.len(),
            });
        }
        for (variable, gradient) in variables.iter().zip(gradients) {
            let actual = gradient.shape();
            if actual != variable.shape {
                return Err(Error::ShapeMismatch {
                    context: format!("gradient of {}", variable.name),
                    expected: variable.shape.clone(),
                    actual,
                });
            }
        }
        Ok(gradients.iter().map(|g| clip.apply(g.clone())).collect())
    }
}

pub(crate) fn slot_count_error(kernel: &str, expected: usize, actual: usize) -> Error {
    Error::Engine(format!("{kernel} expects {expected} slots, got {actual}"))
}

/// Reads the scalar extra input at `index` of an update kernel.
pub(crate) fn scalar_extra<B: Backend>(
    kernel: &str,
    extras: &[&B::Tensor],
    index: usize,
) -> Result<Elm> {
    let extra = extras.get(index).ok_or_else(|| {
        Error::Engine(format!(
            "{kernel} expects at least {} extra inputs, got {}",
            index + 1,
            extras.len()
        ))
    })?;
    B::scalar_value(extra).ok_or_else(|| {
        Error::Engine(format!(
            "{kernel} extra input {index} must be a scalar, got shape {:?}",
            B::shape(extra)
        ))
    })
}
