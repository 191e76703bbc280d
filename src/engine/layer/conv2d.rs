use crate::backend::Backend;
use crate::engine::activation::Activation;
use crate::engine::initializer::Initializer;
use crate::engine::layer::{
    built, conv_fan_out, create_variable, require_array_size, require_built_shape,
    require_positive, require_rank, window_geometry, window_output_size, Layer,
};
use crate::engine::regularizer::Regularizer;
use crate::engine::shape::{Conv2dGeometry, Padding};
use crate::engine::tensor::Tensor;
use crate::engine::variable::{conv2d_bias_var_name, conv2d_kernel_var_name, Variable};
use crate::engine::Graph;
use crate::error::{Error, Result};

/// 2-D convolution over NHWC input with an HWIO kernel.
#[derive(Debug, Clone)]
pub struct Conv2D<B: Backend> {
    name: String,
    pub filters: usize,
    pub kernel_size: Vec<usize>,
    pub strides: Vec<usize>,
    pub dilations: Vec<usize>,
    pub activation: Activation,
    pub kernel_initializer: Initializer,
    pub bias_initializer: Initializer,
    pub kernel_regularizer: Option<Regularizer>,
    pub bias_regularizer: Option<Regularizer>,
    pub padding: Padding,
    pub use_bias: bool,
    pub trainable: bool,
    input_shape: Option<Vec<usize>>,
    geometry: Option<Conv2dGeometry>,
    kernel: Option<Variable<B>>,
    bias: Option<Variable<B>>,
}

impl<B: Backend> Conv2D<B> {
    pub fn new(filters: usize) -> Self {
        Self {
            name: String::new(),
            filters,
            kernel_size: vec![3, 3],
            strides: vec![1, 1, 1, 1],
            dilations: vec![1, 1, 1, 1],
            activation: Activation::Relu,
            kernel_initializer: Initializer::he_normal(None),
            bias_initializer: Initializer::he_uniform(None),
            kernel_regularizer: None,
            bias_regularizer: None,
            padding: Padding::Same,
            use_bias: true,
            trainable: true,
            input_shape: None,
            geometry: None,
            kernel: None,
            bias: None,
        }
    }

    pub fn with_name(mut self, name: &str) -> Self {
        self.name = name.to_string();
        self
    }

    /// `[height, width]`
    pub fn kernel_size(mut self, kernel_size: &[usize]) -> Self {
        self.kernel_size = kernel_size.to_vec();
        self
    }

    /// One stride per NHWC axis.
    pub fn strides(mut self, strides: &[usize]) -> Self {
        self.strides = strides.to_vec();
        self
    }

    /// One dilation rate per NHWC axis.
    pub fn dilations(mut self, dilations: &[usize]) -> Self {
        self.dilations = dilations.to_vec();
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

    pub fn padding(mut self, padding: Padding) -> Self {
        self.padding = padding;
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

impl<B: Backend> Layer<B> for Conv2D<B> {
    fn name(&self) -> &str {
        &self.name
    }

    fn set_name(&mut self, name: String) {
        self.name = name;
    }

    fn kind(&self) -> &'static str {
        "Conv2D"
    }

    fn validate(&self) -> Result<()> {
        require_array_size(&self.kernel_size, 2, "kernelSize")?;
        require_array_size(&self.strides, 4, "strides")?;
        require_array_size(&self.dilations, 4, "dilations")?;
        require_positive(&self.kernel_size, "kernelSize")?;
        require_positive(&self.strides, "strides")?;
        require_positive(&self.dilations, "dilations")?;
        if self.filters == 0 {
            return Err(Error::InvalidConfig(format!(
                "Conv2D layer {} needs at least one filter",
                self.name
            )));
        }
        Ok(())
    }

    fn build(&mut self, graph: &Graph<B>, input_shape: &[usize]) -> Result<()> {
        if self.input_shape.is_some() {
            return Err(Error::LayerAlreadyBuilt(self.name.clone()));
        }
        Layer::<B>::compute_output_shape(self, input_shape)?;

        let channels = input_shape[3];
        let fan_in = channels * self.kernel_size[0] * self.kernel_size[1];
        let fan_out = conv_fan_out(self.filters, &self.kernel_size, &self.strides);

        self.kernel = Some(create_variable(
            graph,
            &conv2d_kernel_var_name(&self.name),
            &[self.kernel_size[0], self.kernel_size[1], channels, self.filters],
            fan_in,
            fan_out,
            &self.kernel_initializer,
            self.kernel_regularizer,
            self.trainable,
        )?);
        if self.use_bias {
            self.bias = Some(create_variable(
                graph,
                &conv2d_bias_var_name(&self.name),
                &[self.filters],
                fan_in,
                fan_out,
                &self.bias_initializer,
                self.bias_regularizer,
                self.trainable,
            )?);
        }
        self.geometry = Some(window_geometry(
            input_shape,
            &self.kernel_size,
            &self.strides,
            &self.dilations,
            self.padding,
        ));
        self.input_shape = Some(input_shape.to_vec());
        Ok(())
    }

    fn is_built(&self) -> bool {
        self.input_shape.is_some()
    }

    fn compute_output_shape(&self, input_shape: &[usize]) -> Result<Vec<usize>> {
        Layer::<B>::validate(self)?;
        require_rank(&self.name, input_shape, 4)?;
        let (rows, cols) = window_output_size(
            &self.name,
            input_shape,
            &self.kernel_size,
            &self.strides,
            &self.dilations,
            self.padding,
        )?;
        Ok(vec![input_shape[0], rows, cols, self.filters])
    }

    fn forward(&self, input: &Tensor<B>) -> Result<Tensor<B>> {
        let (Some(built_shape), Some(geo)) = (&self.input_shape, self.geometry) else {
            return Err(Error::LayerNotBuilt(self.name.clone()));
        };
        require_built_shape(&self.name, built_shape, &input.shape())?;

        let kernel = built(&self.kernel, &self.name)?;
        let mut output = input.clone().conv2d(kernel.tensor.clone(), geo);
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
    fn output_shape_with_strides() {
        let layer = Conv2D::<NdArray>::new(8)
            .with_name("c")
            .strides(&[1, 2, 2, 1])
            .padding(Padding::Valid);
        assert_eq!(
            layer.compute_output_shape(&[UNKNOWN_DIM, 28, 28, 1]).unwrap(),
            vec![UNKNOWN_DIM, 13, 13, 8]
        );
    }

    #[test]
    fn malformed_strides_are_rejected() {
        let layer = Conv2D::<NdArray>::new(8).with_name("c").strides(&[2, 2]);
        assert!(matches!(
            Layer::<NdArray>::validate(&layer),
            Err(Error::InvalidArraySize { expected: 4, actual: 2, .. })
        ));
    }

    #[test]
    fn conv_requires_nhwc_input() {
        let graph = Graph::<NdArray>::new();
        let mut layer = Conv2D::<NdArray>::new(8).with_name("c");
        assert!(matches!(
            layer.build(&graph, &[UNKNOWN_DIM, 28, 28]),
            Err(Error::IncompatibleRank { expected: 4, .. })
        ));
    }

    #[test]
    fn valid_window_larger_than_input_fails_at_build() {
        let graph = Graph::<NdArray>::new();
        let mut layer = Conv2D::<NdArray>::new(4).with_name("c").padding(Padding::Valid);
        let err = layer.build(&graph, &[UNKNOWN_DIM, 2, 2, 1]).unwrap_err();
        match err {
            Error::ShapeMismatch { expected, actual, .. } => {
                assert_eq!(expected, vec![3, 3]);
                assert_eq!(actual, vec![2, 2]);
            }
            other => panic!("unexpected error {other:?}"),
        }
        assert!(!layer.is_built());
        assert!(graph.variable_names().is_empty());
    }

    #[test]
    fn dilation_counts_towards_valid_window() {
        let layer = Conv2D::<NdArray>::new(4)
            .with_name("c")
            .dilations(&[1, 2, 2, 1])
            .padding(Padding::Valid);
        assert!(layer.compute_output_shape(&[UNKNOWN_DIM, 4, 4, 1]).is_err());
        assert_eq!(
            layer.compute_output_shape(&[UNKNOWN_DIM, 5, 5, 1]).unwrap(),
            vec![UNKNOWN_DIM, 1, 1, 4]
        );
    }

    #[test]
    fn kernel_is_hwio() {
        let graph = Graph::<NdArray>::new();
        let mut layer = Conv2D::<NdArray>::new(8).with_name("c").kernel_size(&[5, 3]);
        layer.build(&graph, &[UNKNOWN_DIM, 28, 28, 2]).unwrap();
        assert_eq!(layer.kernel_shape(), Some(&[5, 3, 2, 8][..]));
        assert_eq!(layer.param_count(), 5 * 3 * 2 * 8 + 8);
    }
}
