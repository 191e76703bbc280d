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
    separable_conv2d_bias_var_name, separable_conv2d_depthwise_kernel_var_name,
    separable_conv2d_pointwise_kernel_var_name, Variable,
};
use crate::engine::Graph;
use crate::error::{Error, Result};

/// 2-D convolution with separable filters.
///
/// A depthwise convolution acting on each channel separately is followed by
/// a 1x1 pointwise convolution mixing the `C * depth_multiplier` channels
/// into `filters` outputs. The separability is between the spatial axes and
/// the channel axis, not between height and width.
#[derive(Debug, Clone)]
pub struct SeparableConv2D<B: Backend> {
    name: String,
    pub filters: usize,
    pub kernel_size: Vec<usize>,
    pub strides: Vec<usize>,
    pub dilations: Vec<usize>,
    pub activation: Activation,
    pub depth_multiplier: usize,
    pub depthwise_initializer: Initializer,
    pub pointwise_initializer: Initializer,
    pub bias_initializer: Initializer,
    pub depthwise_regularizer: Option<Regularizer>,
    pub pointwise_regularizer: Option<Regularizer>,
    pub bias_regularizer: Option<Regularizer>,
    pub padding: Padding,
    pub use_bias: bool,
    pub trainable: bool,
    input_shape: Option<Vec<usize>>,
    depthwise_geometry: Option<Conv2dGeometry>,
    pointwise_geometry: Option<Conv2dGeometry>,
    depthwise_kernel: Option<Variable<B>>,
    pointwise_kernel: Option<Variable<B>>,
    bias: Option<Variable<B>>,
}

impl<B: Backend> SeparableConv2D<B> {
    pub fn new(filters: usize) -> Self {
        Self {
            name: String::new(),
            filters,
            kernel_size: vec![3, 3],
            strides: vec![1, 1, 1, 1],
            dilations: vec![1, 1, 1, 1],
            activation: Activation::Relu,
            depth_multiplier: 1,
            depthwise_initializer: Initializer::he_normal(None),
            pointwise_initializer: Initializer::he_normal(None),
            bias_initializer: Initializer::he_uniform(None),
            depthwise_regularizer: None,
            pointwise_regularizer: None,
            bias_regularizer: None,
            padding: Padding::Same,
            use_bias: true,
            trainable: true,
            input_shape: None,
            depthwise_geometry: None,
            pointwise_geometry: None,
            depthwise_kernel: None,
            pointwise_kernel: None,
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

    pub fn pointwise_initializer(mut self, initializer: Initializer) -> Self {
        self.pointwise_initializer = initializer;
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

    pub fn pointwise_regularizer(mut self, regularizer: Regularizer) -> Self {
        self.pointwise_regularizer = Some(regularizer);
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

    pub fn depthwise_shape(&self) -> Option<&[usize]> {
        self.depthwise_kernel.as_ref().map(|k| k.shape.as_slice())
    }

    pub fn pointwise_shape(&self) -> Option<&[usize]> {
        self.pointwise_kernel.as_ref().map(|k| k.shape.as_slice())
    }

    pub fn bias_shape(&self) -> Option<&[usize]> {
        self.bias.as_ref().map(|b| b.shape.as_slice())
    }
}

impl<B: Backend> Layer<B> for SeparableConv2D<B> {
    fn name(&self) -> &str {
        &self.name
    }

    fn set_name(&mut self, name: String) {
        self.name = name;
    }

    fn kind(&self) -> &'static str {
        "SeparableConv2D"
    }

    fn validate(&self) -> Result<()> {
        require_array_size(&self.kernel_size, 2, "kernelSize")?;
        require_array_size(&self.strides, 4, "strides")?;
        require_array_size(&self.dilations, 4, "dilations")?;
        require_positive(&self.kernel_size, "kernelSize")?;
        require_positive(&self.strides, "strides")?;
        require_positive(&self.dilations, "dilations")?;
        require_positive(&[self.depth_multiplier], "depthMultiplier")?;
        if self.filters == 0 {
            return Err(Error::InvalidConfig(format!(
                "SeparableConv2D layer {} needs at least one filter",
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
        let depthwise_channels = channels * self.depth_multiplier;
        // Both kernels share the fans of the depthwise stage.
        let fan_in = channels * self.kernel_size[0] * self.kernel_size[1];
        let fan_out = conv_fan_out(depthwise_channels, &self.kernel_size, &self.strides);

        self.depthwise_kernel = Some(create_variable(
            graph,
            &separable_conv2d_depthwise_kernel_var_name(&self.name),
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
        self.pointwise_kernel = Some(create_variable(
            graph,
            &separable_conv2d_pointwise_kernel_var_name(&self.name),
            &[1, 1, depthwise_channels, self.filters],
            fan_in,
            fan_out,
            &self.pointwise_initializer,
            self.pointwise_regularizer,
            self.trainable,
        )?);
        if self.use_bias {
            self.bias = Some(create_variable(
                graph,
                &separable_conv2d_bias_var_name(&self.name),
                &[self.filters],
                fan_in,
                fan_out,
                &self.bias_initializer,
                self.bias_regularizer,
                self.trainable,
            )?);
        }

        let depthwise = window_geometry(
            input_shape,
            &self.kernel_size,
            &self.strides,
            &self.dilations,
            self.padding,
        );
        self.pointwise_geometry = Some(Conv2dGeometry::new(
            (depthwise.out_h, depthwise.out_w),
            (1, 1),
            (1, 1),
            (1, 1),
            Padding::Valid,
        ));
        self.depthwise_geometry = Some(depthwise);
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
        let (Some(built_shape), Some(depthwise), Some(pointwise)) = (
            &self.input_shape,
            self.depthwise_geometry,
            self.pointwise_geometry,
        ) else {
            return Err(Error::LayerNotBuilt(self.name.clone()));
        };
        require_built_shape(&self.name, built_shape, &input.shape())?;

        let depthwise_kernel = built(&self.depthwise_kernel, &self.name)?;
        let pointwise_kernel = built(&self.pointwise_kernel, &self.name)?;
        let mut output = input
            .clone()
            .depthwise_conv2d(depthwise_kernel.tensor.clone(), depthwise)
            .conv2d(pointwise_kernel.tensor.clone(), pointwise);
        if let Some(bias) = &self.bias {
            output = output + bias.tensor.clone();
        }
        Ok(self.activation.apply(output))
    }

    fn variables(&self) -> Vec<Variable<B>> {
        self.depthwise_kernel
            .iter()
            .chain(self.pointwise_kernel.iter())
            .chain(self.bias.iter())
            .cloned()
            .collect()
    }

    fn is_trainable(&self) -> bool {
        self.trainable
    }

    fn has_activation(&self) -> bool {
        true
    }
}
