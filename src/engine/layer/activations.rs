// 活性化関数はすでにTensorのメソッドとして定義されているが、Layerとして定義することでモデルに組み込みやすくなる

use crate::backend::Backend;
use crate::engine::activation::Activation;
use crate::engine::layer::Layer;
use crate::engine::tensor::Tensor;
use crate::engine::Graph;
use crate::error::{Error, Result};

/// Applies an [`Activation`] with no weights of its own.
#[derive(Debug, Clone)]
pub struct ActivationLayer {
    name: String,
    pub activation: Activation,
    built: bool,
}

impl ActivationLayer {
    pub fn new(activation: Activation) -> Self {
        Self {
            name: String::new(),
            activation,
            built: false,
        }
    }

    pub fn with_name(mut self, name: &str) -> Self {
        self.name = name.to_string();
        self
    }
}

impl<B: Backend> Layer<B> for ActivationLayer {
    fn name(&self) -> &str {
        &self.name
    }

    fn set_name(&mut self, name: String) {
        self.name = name;
    }

    fn kind(&self) -> &'static str {
        "Activation"
    }

    fn build(&mut self, _graph: &Graph<B>, _input_shape: &[usize]) -> Result<()> {
        if self.built {
            return Err(Error::LayerAlreadyBuilt(self.name.clone()));
        }
        self.built = true;
        Ok(())
    }

    fn is_built(&self) -> bool {
        self.built
    }

    fn compute_output_shape(&self, input_shape: &[usize]) -> Result<Vec<usize>> {
        Ok(input_shape.to_vec())
    }

    fn forward(&self, input: &Tensor<B>) -> Result<Tensor<B>> {
        if !self.built {
            return Err(Error::LayerNotBuilt(self.name.clone()));
        }
        Ok(self.activation.apply(input.clone()))
    }

    fn is_trainable(&self) -> bool {
        false
    }

    fn has_activation(&self) -> bool {
        !self.activation.is_linear()
    }
}
