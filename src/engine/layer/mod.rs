use std::collections::BTreeMap;
use std::fmt::Debug;

use log::debug;

use crate::backend::Backend;
use crate::engine::initializer::Initializer;
use crate::engine::regularizer::Regularizer;
use crate::engine::shape::{
    conv_output_length, effective_kernel_size, format_shape, Conv2dGeometry, Padding, UNKNOWN_DIM,
};
use crate::engine::tensor::Tensor;
use crate::engine::variable::Variable;
use crate::engine::Graph;
use crate::error::{Error, Result};

pub mod activations;
pub mod conv2d;
pub mod dense;
pub mod depthwise_conv2d;
pub mod flatten;
pub mod input;
pub mod pooling;
pub mod separable_conv2d;

pub use activations::ActivationLayer;
pub use conv2d::Conv2D;
pub use dense::Dense;
pub use depthwise_conv2d::DepthwiseConv2D;
pub use flatten::Flatten;
pub use input::Input;
pub use pooling::{AvgPool2D, MaxPool2D};
pub use separable_conv2d::SeparableConv2D;

// Tensor<B>に対する演算の集合をまとめておくレイヤーのトレイト
// `build` で変数を確保し、`forward` で計算グラフを組み立てる（実行はしない）
pub trait Layer<B: Backend>: Debug {
    fn name(&self) -> &str;

    /// Used by `Sequential` to name layers constructed without a name.
    fn set_name(&mut self, name: String);

    /// Short type name such as `"Conv2D"`.
    fn kind(&self) -> &'static str;

    /// Checks the configuration without touching a graph.
    fn validate(&self) -> Result<()> {
        Ok(())
    }

    /// Allocates the layer's variables for inputs of `input_shape`.
    /// Must be called exactly once, before `forward`.
    fn build(&mut self, graph: &Graph<B>, input_shape: &[usize]) -> Result<()>;

    fn is_built(&self) -> bool;

    fn compute_output_shape(&self, input_shape: &[usize]) -> Result<Vec<usize>>;

    /// Appends the layer's computation on `input` to the graph.
    fn forward(&self, input: &Tensor<B>) -> Result<Tensor<B>>;

    /// Shape fed to the model, batch axis included. Only input layers have one.
    fn input_shape(&self) -> Option<Vec<usize>> {
        None
    }

    fn variables(&self) -> Vec<Variable<B>> {
        Vec::new()
    }

    fn is_trainable(&self) -> bool {
        true
    }

    fn has_activation(&self) -> bool {
        false
    }

    fn param_count(&self) -> usize {
        self.variables().iter().map(|v| v.num_elements()).sum()
    }

    /// Current values of every owned variable, keyed by variable name.
    fn weights(&self) -> Result<BTreeMap<String, B::Tensor>> {
        self.variables()
            .into_iter()
            .map(|v| Ok((v.name.clone(), v.value()?)))
            .collect()
    }

    /// Overwrites owned variables. Every name and shape is checked before
    /// anything is written.
    fn set_weights(&self, weights: &BTreeMap<String, B::Tensor>) -> Result<()> {
        self.check_weights(weights)?;
        for v in &self.variables() {
            if let Some(data) = weights.get(&v.name) {
                v.assign_value(data.clone())?;
            }
        }
        Ok(())
    }

    /// Fails unless `weights` holds exactly one correctly shaped tensor per
    /// owned variable.
    fn check_weights(&self, weights: &BTreeMap<String, B::Tensor>) -> Result<()> {
        let variables = self.variables();
        for name in weights.keys() {
            if !variables.iter().any(|v| &v.name == name) {
                return Err(Error::InvalidConfig(format!(
                    "layer {} has no variable named {name}",
                    self.name()
                )));
            }
        }
        for v in &variables {
            let data = weights.get(&v.name).ok_or_else(|| Error::MissingWeight {
                layer: self.name().to_string(),
                variable: v.name.clone(),
            })?;
            let actual = B::shape(data);
            if actual != v.shape {
                return Err(Error::ShapeMismatch {
                    context: format!("weights of {}", v.name),
                    expected: v.shape.clone(),
                    actual,
                });
            }
        }
        Ok(())
    }
}

pub(crate) fn require_array_size(array: &[usize], size: usize, name: &str) -> Result<()> {
    if array.len() != size {
        return Err(Error::InvalidArraySize {
            name: name.to_string(),
            expected: size,
            actual: array.len(),
        });
    }
    Ok(())
}

pub(crate) fn require_positive(array: &[usize], name: &str) -> Result<()> {
    if array.iter().any(|&d| d == 0) {
        return Err(Error::InvalidConfig(format!(
            "{name} must be positive, got {array:?}"
        )));
    }
    Ok(())
}

pub(crate) fn require_rank(layer: &str, input_shape: &[usize], rank: usize) -> Result<()> {
    if input_shape.len() != rank {
        return Err(Error::IncompatibleRank {
            layer: layer.to_string(),
            expected: rank,
            actual: input_shape.to_vec(),
        });
    }
    Ok(())
}

/// Fails unless `actual` agrees with the shape the layer was built for.
/// Unknown dimensions on either side match anything.
pub(crate) fn require_built_shape(layer: &str, built: &[usize], actual: &[usize]) -> Result<()> {
    let compatible = built.len() == actual.len()
        && built
            .iter()
            .zip(actual)
            .all(|(&b, &a)| b == a || b == UNKNOWN_DIM || a == UNKNOWN_DIM);
    if !compatible {
        return Err(Error::ShapeMismatch {
            context: format!("input of layer {layer}"),
            expected: built.to_vec(),
            actual: actual.to_vec(),
        });
    }
    Ok(())
}

/// Geometry of a 2-D window over an NHWC input. `strides` and `dilations`
/// are given per NHWC axis.
pub(crate) fn window_geometry(
    input_shape: &[usize],
    window: &[usize],
    strides: &[usize],
    dilations: &[usize],
    padding: Padding,
) -> Conv2dGeometry {
    Conv2dGeometry::new(
        (input_shape[1], input_shape[2]),
        (window[0], window[1]),
        (strides[1], strides[2]),
        (dilations[1], dilations[2]),
        padding,
    )
}

/// Output `(rows, cols)` of a 2-D window over an NHWC input. A VALID window
/// must fit inside every known spatial dimension.
pub(crate) fn window_output_size(
    layer: &str,
    input_shape: &[usize],
    window: &[usize],
    strides: &[usize],
    dilations: &[usize],
    padding: Padding,
) -> Result<(usize, usize)> {
    let spatial = [input_shape[1], input_shape[2]];
    let effective = [
        effective_kernel_size(window[0], dilations[1]),
        effective_kernel_size(window[1], dilations[2]),
    ];
    let too_small = spatial
        .iter()
        .zip(&effective)
        .any(|(&input, &kernel)| input != UNKNOWN_DIM && input < kernel);
    if padding == Padding::Valid && too_small {
        return Err(Error::ShapeMismatch {
            context: format!("VALID window of layer {layer} (kernel vs input height and width)"),
            expected: effective.to_vec(),
            actual: spatial.to_vec(),
        });
    }
    let rows = conv_output_length(spatial[0], window[0], padding, strides[1], dilations[1]);
    let cols = conv_output_length(spatial[1], window[1], padding, strides[2], dilations[2]);
    Ok((rows, cols))
}

/// `fan_out` of a convolution producing `out_channels` channels. The
/// receptive size is divided by the first two entries of the NHWC `strides`,
/// which for `[1, s, s, 1]` is `s`.
pub(crate) fn conv_fan_out(out_channels: usize, kernel_size: &[usize], strides: &[usize]) -> usize {
    let receptive = (out_channels * kernel_size[0] * kernel_size[1]) as f64;
    (receptive / (strides[0] * strides[1]) as f64).round() as usize
}

#[allow(clippy::too_many_arguments)]
pub(crate) fn create_variable<B: Backend>(
    graph: &Graph<B>,
    name: &str,
    shape: &[usize],
    fan_in: usize,
    fan_out: usize,
    initializer: &Initializer,
    regularizer: Option<Regularizer>,
    trainable: bool,
) -> Result<Variable<B>> {
    let data = initializer.initialize::<B>(shape, fan_in, fan_out)?;
    debug!(
        "variable {name}: shape {}, fan_in {fan_in}, fan_out {fan_out}",
        format_shape(shape)
    );
    Variable::new(graph, name, data, trainable, regularizer)
}

/// Unwraps a lazily created variable, failing when the layer is unbuilt.
pub(crate) fn built<'a, B: Backend>(
    variable: &'a Option<Variable<B>>,
    layer: &str,
) -> Result<&'a Variable<B>> {
    variable
        .as_ref()
        .ok_or_else(|| Error::LayerNotBuilt(layer.to_string()))
}
