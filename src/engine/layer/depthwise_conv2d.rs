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
use crate::engine::variable::{
    depthwise_conv2d_bias_var_name, depthwise_conv2d_kernel_var_name, Variable,
};
use crate::engine::Graph;
use crate::error::{Error, Result};

/// Convolves every input channel with its own `depth_multiplier` filters.
#[derive(Debug, Clone)]
pub struct DepthwiseConv2D<B: Backend> {
    name: String,
    pub kernel_size: Vec<usize>,
    pub strides: Vec<usize>,
    pub dilations: Vec<usize>,
    pub activation: Activation,
    pub depth_multiplier: usize,
    pub depthwise_initializer: Initializer,
    pub bias_initializer: Initializer,
    pub depthwise_regularizer: Option<Regularizer>,
    pub bias_regularizer: Option<Regularizer>,
    pub padding: Padding,
    pub use_bias: bool,
    pub trainable: bool,
    input_shape: Option<Vec<usize>>,
    geometry: Option<Conv2dGeometry>,
    kernel: Option<Variable<B>>,
    bias: Option<Variable<B>>,
}

impl<B: Backend> Default for DepthwiseConv2D<B> {
    fn default() -> Self {
        Self::new()
    }
}

impl<B: Backend> DepthwiseConv2D<B> {
    pub fn new() -> Self {
        Self {
            name: String::new(),
            kernel_size: vec![3, 3],
            strides: vec![1, 1, 1, 1],
            dilations: vec![1, 1, 1, 1],
            activation: Activation::Relu,
            depth_multiplier: 1,
            depthwise_initializer: Initializer::he_normal(None),
            bias_initializer: Initializer::he_uniform(None),
            depthwise_regularizer: None,
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

    pub fn kernel_size(mut self, kernel_size: &[usize]) -> Self {
        self.kernel_size = kernel_size.to_vec();
        self
    }

    pub fn strides(mut self, strides: &[usize]) -> Self {
        self.strides = strides.to_vec();
        self
    }

    pub fn dilations(mut self, dilations: &[usize]) -> Self {
        self.dilations = dilations.to_vec();
        self
    }

    pub fn activation(mut self, activation: Activation) -> Self {
        self.activation = activation;
        self
    }

    pub fn depth_multiplier(mut self, depth_multiplier: usize) -> Self {
        self.depth_multiplier = depth_multiplier;
        self
    }

    pub fn depthwise_initializer(mut self, initializer: Initializer) -> Self {
        self.depthwise_initializer = initializer;
        self
    }

    pub fn bias_initializer(mut self, initializer: Initializer) -> Self {
        self.bias_initializer = initializer;
        self
    }

    pub fn depthwise_regularizer(mut self, regularizer: Regularizer) -> Self {
        self.depthwise_regularizer = Some(regularizer);
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

impl<B: Backend> Layer<B> for DepthwiseConv2D<B> {
    fn name(&self) -> &str {
        &self.name
    }

    fn set_name(&mut self, name: String) {
        self.name = name;
    }

    fn kind(&self) -> &'static str {
        "DepthwiseConv2D"
    }

    fn validate(&self) -> Result<()> {
        require_array_size(&self.kernel_size, 2, "kernelSize")?;
        require_array_size(&self.strides, 4, "strides")?;
        require_array_size(&self.dilations, 4, "dilations")?;
        require_positive(&self.kernel_size, "kernelSize")?;
        require_positive(&self.strides, "strides")?;
        require_positive(&self.dilations, "dilations")?;
        require_positive(&[self.depth_multiplier], "depthMultiplier")
    }

    fn build(&mut self, graph: &Graph<B>, input_shape: &[usize]) -> Result<()> {
        if self.input_shape.is_some() {
            return Err(Error::LayerAlreadyBuilt(self.name.clone()));
        }
        Layer::<B>::compute_output_shape(self, input_shape)?;

        let channels = input_shape[3];
        let out_channels = channels * self.depth_multiplier;
        let fan_in = channels * self.kernel_size[0] * self.kernel_size[1];
        let fan_out = conv_fan_out(out_channels, &self.kernel_size, &self.strides);

        self.kernel = Some(create_variable(
            graph,
            &depthwise_conv2d_kernel_var_name(&self.name),
            &[
                self.kernel_size[0],
                self.kernel_size[1],
                channels,
                self.depth_multiplier,
            ],
            fan_in,
            fan_out,
            &self.depthwise_initializer,
            self.depthwise_regularizer,
            self.trainable,
        )?);
        if self.use_bias {
            self.bias = Some(create_variable(
                graph,
                &depthwise_conv2d_bias_var_name(&self.name),
                &[out_channels],
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
        Ok(vec![
            input_shape[0],
            rows,
            cols,
            input_shape[3] * self.depth_multiplier,
        ])
    }

    fn forward(&self, input: &Tensor<B>) -> Result<Tensor<B>> {
        let (Some(built_shape), Some(geo)) = (&self.input_shape, self.geometry) else {
            return Err(Error::LayerNotBuilt(self.name.clone()));
        };
        require_built_shape(&self.name, built_shape, &input.shape())?;

        let kernel = built(&self.kernel, &self.name)?;
        let mut output = input.clone().depthwise_conv2d(kernel.tensor.clone(), geo);
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
