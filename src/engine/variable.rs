use crate::backend::Backend;
use crate::engine::regularizer::Regularizer;
use crate::engine::shape::num_elements;
use crate::engine::tensor::Tensor;
use crate::engine::Graph;
use crate::error::Result;

/// A named, persistent tensor living in a [`Graph`].
///
/// Layers own the variables they create in `build`; optimizers own their
/// slots. The value itself is stored in the graph node, so a `Variable` is
/// a cheap handle that can be cloned freely.
#[derive(Debug, Clone)]
pub struct Variable<B: Backend> {
    pub name: String,
    pub tensor: Tensor<B>,
    pub shape: Vec<usize>,
    pub trainable: bool,
    pub regularizer: Option<Regularizer>,
}

impl<B: Backend> Variable<B> {
    /// Registers a variable initialised with `data` in `graph`.
    pub fn new(
        graph: &Graph<B>,
        name: &str,
        data: B::Tensor,
        trainable: bool,
        regularizer: Option<Regularizer>,
    ) -> Result<Self> {
        let shape = B::shape(&data);
        let tensor = graph.variable(name, data, trainable)?;
        Ok(Self {
            name: name.to_string(),
            tensor,
            shape,
            trainable,
            regularizer,
        })
    }

    pub fn num_elements(&self) -> usize {
        num_elements(&self.shape)
    }

    /// Current value.
    pub fn value(&self) -> Result<B::Tensor> {
        self.tensor.graph().value(&self.tensor)
    }

    /// Overwrites the value; the shape must match.
    pub fn assign_value(&self, data: B::Tensor) -> Result<()> {
        self.tensor.graph().set_value(&self.tensor, data)
    }

    /// Penalty term for the loss, if a regularizer is attached.
    pub fn penalty(&self) -> Option<Tensor<B>> {
        self.regularizer.map(|r| r.penalty(&self.tensor))
    }
}

pub fn dense_kernel_var_name(layer: &str) -> String {
    format!("{layer}_dense_kernel")
}

pub fn dense_bias_var_name(layer: &str) -> String {
    format!("{layer}_dense_bias")
}

pub fn conv2d_kernel_var_name(layer: &str) -> String {
    format!("{layer}_conv2d_kernel")
}

pub fn conv2d_bias_var_name(layer: &str) -> String {
    format!("{layer}_conv2d_bias")
}

pub fn depthwise_conv2d_kernel_var_name(layer: &str) -> String {
    format!("{layer}_depthwise_conv2d_kernel")
}

pub fn depthwise_conv2d_bias_var_name(layer: &str) -> String {
    format!("{layer}_depthwise_conv2d_bias")
}

pub fn separable_conv2d_depthwise_kernel_var_name(layer: &str) -> String {
    format!("{layer}_depthwise_kernel")
}

pub fn separable_conv2d_pointwise_kernel_var_name(layer: &str) -> String {
    format!("{layer}_pointwise_kernel")
}

pub fn separable_conv2d_bias_var_name(layer: &str) -> String {
    format!("{layer}_separable_conv2d_bias")
}

/// Name of an optimizer slot holding state for `variable`.
pub fn slot_var_name(variable: &str, slot: &str) -> String {
    format!("{variable}-{slot}")
}

/// Name of an optimizer-wide variable such as a running beta power.
pub fn optimizer_var_name(name: &str) -> String {
    format!("optimizer_{name}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_are_derived_from_layer_names() {
        assert_eq!(dense_kernel_var_name("dense_1"), "dense_1_dense_kernel");
        assert_eq!(
            separable_conv2d_depthwise_kernel_var_name("sepconv"),
            "sepconv_depthwise_kernel"
        );
        assert_eq!(
            slot_var_name("conv_1_conv2d_kernel", "m"),
            "conv_1_conv2d_kernel-m"
        );
        assert_eq!(optimizer_var_name("beta1_power"), "optimizer_beta1_power");
    }
}
