use crate::backend::Backend;
use crate::engine::layer::{require_positive, Layer};
use crate::engine::shape::UNKNOWN_DIM;
use crate::engine::tensor::Tensor;
use crate::engine::Graph;
use crate::error::{Error, Result};

/// First layer of every `Sequential` model; declares the per-sample shape.
#[derive(Debug, Clone)]
pub struct Input {
    name: String,
    dims: Vec<usize>,
    built: bool,
}

impl Input {
    /// `dims` excludes the batch axis, e.g. `[28, 28, 1]`.
    pub fn new(dims: &[usize]) -> Self {
        Self {
            name: String::new(),
            dims: dims.to_vec(),
            built: false,
        }
    }

    pub fn with_name(mut self, name: &str) -> Self {
        self.name = name.to_string();
        self
    }

    pub fn dims(&self) -> &[usize] {
        &self.dims
    }
}

impl<B: Backend> Layer<B> for Input {
    fn name(&self) -> &str {
        &self.name
    }

    fn set_name(&mut self, name: String) {
        self.name = name;
    }

    fn kind(&self) -> &'static str {
        "Input"
    }

    fn validate(&self) -> Result<()> {
        if self.dims.is_empty() {
            return Err(Error::InvalidConfig(
                "Input needs at least one dimension".to_string(),
            ));
        }
        require_positive(&self.dims, "input dims")
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

    fn compute_output_shape(&self, _input_shape: &[usize]) -> Result<Vec<usize>> {
        Ok(Layer::<B>::input_shape(self).unwrap_or_default())
    }

    fn forward(&self, input: &Tensor<B>) -> Result<Tensor<B>> {
        if !self.built {
            return Err(Error::LayerNotBuilt(self.name.clone()));
        }
        Ok(input.clone())
    }

    fn input_shape(&self) -> Option<Vec<usize>> {
        let mut shape = vec![UNKNOWN_DIM];
        shape.extend_from_slice(&self.dims);
        Some(shape)
    }
}
