use crate::backend::Backend;
use crate::engine::activation::Activation;
use crate::engine::initializer::Initializer;
use crate::engine::layer::{built, create_variable, require_built_shape, require_rank, Layer};
use crate::engine::regularizer::Regularizer;
use crate::engine::tensor::Tensor;
use crate::engine::variable::{dense_bias_var_name, dense_kernel_var_name, Variable};
use crate::engine::Graph;
use crate::error::{Error, Result};

/// Fully connected layer: `activation(x @ kernel + bias)` on rank-2 input.
#[derive(Debug, Clone)]
pub struct Dense<B: Backend> {
    name: String,
    pub units: usize,
    pub activation: Activation,
    pub kernel_initializer: Initializer,
    pub bias_initializer: Initializer,
    pub kernel_regularizer: Option<Regularizer>,
    pub bias_regularizer: Option<Regularizer>,
    pub use_bias: bool,
    pub trainable: bool,
    input_shape: Option<Vec<usize>>,
    kernel: Option<Variable<B>>,
    bias: Option<Variable<B>>,
}

impl<B: Backend> Dense<B> {
    pub fn new(units: usize) -> Self {
        Self {
            name: String::new(),
            units,
            activation: Activation::Relu,
            kernel_initializer: Initializer::he_normal(None),
            bias_initializer: Initializer::he_uniform(None),
            kernel_regularizer: None,
            bias_regularizer: None,
            use_bias: true,
            trainable: true,
            input_shape: None,
            kernel: None,
            bias: None,
        }
    }

    pub fn with_name(mut self, name: &str) -> Self {
        self.name = name.to_string();
        self
    }

    pub fn activation(mut self, activation: Activation) -> Self {
        self.activation = activation;
        self
    }

    pub fn kernel_initializer(mut self, initializer: Initializer) -> Self {
        self.kernel_initializer = initializer;
        self
    }

    pub fn bias_initializer(mut self, initializer: Initializer) -> Self {
        self.bias_initializer = initializer;
        self
    }

    pub fn kernel_regularizer(mut self, regularizer: Regularizer) -> Self {
        self.kernel_regularizer = Some(regularizer);
        self
    }

    pub fn bias_regularizer(mut self, regularizer: Regularizer) -> Self {
        self.bias_regularizer = Some(regularizer);
        self
    }

    pub fn use_bias(mut self, use_bias: bool) -> Self {
        self.use_bias = use_bias;
        self
    }

    pub fn trainable(mut self, trainable: bool) -> Self {
        self.trainable = trainable;
        self
    }

    pub fn kernel_shape(&self) -> Option<&[usize]> {
        self.kernel.as_ref().map(|k| k.shape.as_slice())
    }
}

impl<B: Backend> Layer<B> for Dense<B> {
    fn name(&self) -> &str {
        &self.name
    }

    fn set_name(&mut self, name: String) {
        self.name = name;
    }

    fn kind(&self) -> &'static str {
        "Dense"
    }

    fn validate(&self) -> Result<()> {
        if self.units == 0 {
            return Err(Error::InvalidConfig(format!(
                "Dense layer {} needs at least one unit",
                self.name
            )));
        }
        Ok(())
    }

    fn build(&mut self, graph: &Graph<B>, input_shape: &[usize]) -> Result<()> {
        if self.input_shape.is_some() {
            return Err(Error::LayerAlreadyBuilt(self.name.clone()));
        }
        require_rank(&self.name, input_shape, 2)?;
        let in_features = input_shape[1];
        let (fan_in, fan_out) = (in_features, self.units);

        self.kernel = Some(create_variable(
            graph,
            &dense_kernel_var_name(&self.name),
            &[in_features, self.units],
            fan_in,
            fan_out,
            &self.kernel_initializer,
            self.kernel_regularizer,
            self.trainable,
        )?);
        if self.use_bias {
            self.bias = Some(create_variable(
                graph,
                &dense_bias_var_name(&self.name),
                &[self.units],
                fan_in,
                fan_out,
                &self.bias_initializer,
                self.bias_regularizer,
                self.trainable,
            )?);
        }
        self.input_shape = Some(input_shape.to_vec());
        Ok(())
    }

    fn is_built(&self) -> bool {
        self.input_shape.is_some()
    }

    fn compute_output_shape(&self, input_shape: &[usize]) -> Result<Vec<usize>> {
        require_rank(&self.name, input_shape, 2)?;
        Ok(vec![input_shape[0], self.units])
    }

    fn forward(&self, input: &Tensor<B>) -> Result<Tensor<B>> {
        let built_shape = self
            .input_shape
            .as_ref()
            .ok_or_else(|| Error::LayerNotBuilt(self.name.clone()))?;
        require_built_shape(&self.name, built_shape, &input.shape())?;

        let kernel = built(&self.kernel, &self.name)?;
        let mut output = input.clone().matmul(kernel.tensor.clone());
        if let Some(bias) = &self.bias {
            output = output + bias.tensor.clone();
        }
        Ok(self.activation.apply(output))
    }

    fn variables(&self) -> Vec<Variable<B>> {
        self.kernel.iter().chain(self.bias.iter()).cloned().collect()
    }

    fn is_trainable(&self) -> bool {
        self.trainable
    }

    fn has_activation(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::ndarray::NdArray;
    use crate::engine::shape::UNKNOWN_DIM;

    #[test]
    fn forward_before_build_fails() {
        let graph = Graph::<NdArray>::new();
        let layer = Dense::<NdArray>::new(4).with_name("d");
        let x = graph.placeholder(&[UNKNOWN_DIM, 3]);
        assert!(matches!(layer.forward(&x), Err(Error::LayerNotBuilt(_))));
    }

    #[test]
    fn build_twice_fails() {
        let graph = Graph::<NdArray>::new();
        let mut layer = Dense::<NdArray>::new(4).with_name("d");
        layer.build(&graph, &[UNKNOWN_DIM, 3]).unwrap();
        assert!(matches!(
            layer.build(&graph, &[UNKNOWN_DIM, 3]),
            Err(Error::LayerAlreadyBuilt(_))
        ));
    }

    #[test]
    fn dense_requires_rank_two() {
        let graph = Graph::<NdArray>::new();
        let mut layer = Dense::<NdArray>::new(4).with_name("d");
        assert!(matches!(
            layer.build(&graph, &[UNKNOWN_DIM, 3, 3]),
            Err(Error::IncompatibleRank { .. })
        ));
    }

    #[test]
    fn param_count_includes_bias() {
        let graph = Graph::<NdArray>::new();
        let mut layer = Dense::<NdArray>::new(4).with_name("d");
        layer.build(&graph, &[UNKNOWN_DIM, 3]).unwrap();
        assert_eq!(layer.param_count(), 3 * 4 + 4);
        assert_eq!(layer.kernel_shape(), Some(&[3, 4][..]));
    }
}
