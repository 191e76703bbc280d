use crate::backend::Backend;
use crate::engine::layer::{require_built_shape, Layer};
use crate::engine::shape::UNKNOWN_DIM;
use crate::engine::tensor::Tensor;
use crate::engine::Graph;
use crate::error::{Error, Result};

/// Collapses every axis but the batch axis.
#[derive(Debug, Clone, Default)]
pub struct Flatten {
    name: String,
    input_shape: Option<Vec<usize>>,
}

impl Flatten {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_name(mut self, name: &str) -> Self {
        self.name = name.to_string();
        self
    }

    fn units(input_shape: &[usize]) -> usize {
        input_shape[1..].iter().product()
    }
}

impl<B: Backend> Layer<B> for Flatten {
    fn name(&self) -> &str {
        &self.name
    }

    fn set_name(&mut self, name: String) {
        self.name = name;
    }

    fn kind(&self) -> &'static str {
        "Flatten"
    }

    fn build(&mut self, _graph: &Graph<B>, input_shape: &[usize]) -> Result<()> {
        if self.input_shape.is_some() {
            return Err(Error::LayerAlreadyBuilt(self.name.clone()));
        }
        Layer::<B>::compute_output_shape(self, input_shape)?;
        self.input_shape = Some(input_shape.to_vec());
        Ok(())
    }

    fn is_built(&self) -> bool {
        self.input_shape.is_some()
    }

    fn compute_output_shape(&self, input_shape: &[usize]) -> Result<Vec<usize>> {
        if input_shape.len() < 2 || input_shape[1..].contains(&UNKNOWN_DIM) {
            return Err(Error::InvalidConfig(format!(
                "Flatten layer {} needs a batch axis and known feature dims, got {:?}",
                self.name, input_shape
            )));
        }
        Ok(vec![input_shape[0], Self::units(input_shape)])
    }

    fn forward(&self, input: &Tensor<B>) -> Result<Tensor<B>> {
        let built_shape = self
            .input_shape
            .as_ref()
            .ok_or_else(|| Error::LayerNotBuilt(self.name.clone()))?;
        require_built_shape(&self.name, built_shape, &input.shape())?;
        Ok(input
            .clone()
            .reshape(vec![UNKNOWN_DIM, Self::units(built_shape)]))
    }

    fn is_trainable(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::ndarray::NdArray;

    #[test]
    fn flattens_feature_axes() {
        let graph = Graph::<NdArray>::new();
        let mut layer = Flatten::new().with_name("flat");
        layer.build(&graph, &[UNKNOWN_DIM, 4, 4, 3]).unwrap();
        let x = graph.placeholder(&[UNKNOWN_DIM, 4, 4, 3]);
        let y = layer.forward(&x).unwrap();
        assert_eq!(y.shape(), vec![UNKNOWN_DIM, 48]);

        let mut exec = graph.build(&[&y], &[]);
        let out = exec.run(&[(&x, NdArray::ones(&[2, 4, 4, 3]))]).unwrap();
        assert_eq!(NdArray::shape(&out[0]), vec![2, 48]);
    }
}
