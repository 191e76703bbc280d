use std::fmt::Debug;

use crate::engine::shape::Conv2dGeometry;
use crate::error::Result;

pub mod kernels;
pub mod ndarray;

pub type Elm = f32;

/// Numeric kernels the graph executor delegates to.
///
/// All functions are stateless and return fresh tensors. Binary arithmetic
/// broadcasts with numpy semantics. Image tensors are NHWC, convolution
/// kernels are HWIO and depthwise kernels are `[kh, kw, in, multiplier]`.
pub trait Backend: Clone + Debug + 'static {
    type Tensor: Clone + Debug;

    fn zeros(shape: &[usize]) -> Self::Tensor;
    fn ones(shape: &[usize]) -> Self::Tensor;
    fn full(shape: &[usize], value: Elm) -> Self::Tensor;
    fn ones_like(tensor: &Self::Tensor) -> Self::Tensor;
    fn random_normal(
        shape: &[usize],
        mean: Elm,
        std: Elm,
        seed: Option<u64>,
    ) -> Result<Self::Tensor>;
    fn random_uniform(
        shape: &[usize],
        low: Elm,
        high: Elm,
        seed: Option<u64>,
    ) -> Result<Self::Tensor>;
    /// Normal samples redrawn until they fall within two standard deviations.
    fn truncated_normal(
        shape: &[usize],
        mean: Elm,
        std: Elm,
        seed: Option<u64>,
    ) -> Result<Self::Tensor>;

    fn from_vec(vec: Vec<Elm>, shape: &[usize]) -> Result<Self::Tensor>;
    fn to_vec(tensor: &Self::Tensor) -> Vec<Elm>;
    fn shape(tensor: &Self::Tensor) -> Vec<usize>;

    fn add(a: &Self::Tensor, b: &Self::Tensor) -> Self::Tensor;
    fn sub(a: &Self::Tensor, b: &Self::Tensor) -> Self::Tensor;
    fn mul(a: &Self::Tensor, b: &Self::Tensor) -> Self::Tensor;
    fn div(a: &Self::Tensor, b: &Self::Tensor) -> Self::Tensor;
    fn maximum(a: &Self::Tensor, b: &Self::Tensor) -> Self::Tensor;
    fn mul_scalar(a: &Self::Tensor, s: Elm) -> Self::Tensor;
    fn add_scalar(a: &Self::Tensor, s: Elm) -> Self::Tensor;
    fn matmul(a: &Self::Tensor, b: &Self::Tensor) -> Self::Tensor;
    fn transpose(tensor: &Self::Tensor) -> Self::Tensor;
    fn reshape(tensor: &Self::Tensor, shape: &[usize]) -> Result<Self::Tensor>;

    fn sum(a: &Self::Tensor, axis: Option<usize>, keep_dims: bool) -> Self::Tensor;
    /// Sums `a` over broadcast dimensions so that it takes `shape`.
    fn sum_to(a: &Self::Tensor, shape: &[usize]) -> Self::Tensor;
    fn mean(a: &Self::Tensor) -> Self::Tensor;
    fn argmax(a: &Self::Tensor, axis: usize) -> Self::Tensor;
    fn eq(a: &Self::Tensor, b: &Self::Tensor) -> Self::Tensor;
    fn gt(a: &Self::Tensor, b: &Self::Tensor) -> Self::Tensor;

    fn neg(a: &Self::Tensor) -> Self::Tensor;
    fn abs(a: &Self::Tensor) -> Self::Tensor;
    fn sign(a: &Self::Tensor) -> Self::Tensor;
    fn sqrt(a: &Self::Tensor) -> Self::Tensor;
    fn exp(a: &Self::Tensor) -> Self::Tensor;
    fn log(a: &Self::Tensor) -> Self::Tensor;
    fn powi(a: &Self::Tensor, n: i32) -> Self::Tensor;
    fn relu(a: &Self::Tensor) -> Self::Tensor;
    fn sigmoid(a: &Self::Tensor) -> Self::Tensor;
    fn tanh(a: &Self::Tensor) -> Self::Tensor;
    fn softmax(a: &Self::Tensor, axis: usize) -> Self::Tensor;
    fn log_softmax(a: &Self::Tensor, axis: usize) -> Self::Tensor;
    fn map(a: &Self::Tensor, f: &dyn Fn(Elm) -> Elm) -> Self::Tensor;

    fn conv2d(x: &Self::Tensor, kernel: &Self::Tensor, geo: &Conv2dGeometry) -> Self::Tensor;
    fn conv2d_backprop_input(
        x_shape: &[usize],
        kernel: &Self::Tensor,
        gy: &Self::Tensor,
        geo: &Conv2dGeometry,
    ) -> Self::Tensor;
    fn conv2d_backprop_filter(
        x: &Self::Tensor,
        kernel_shape: &[usize],
        gy: &Self::Tensor,
        geo: &Conv2dGeometry,
    ) -> Self::Tensor;

    fn depthwise_conv2d(
        x: &Self::Tensor,
        kernel: &Self::Tensor,
        geo: &Conv2dGeometry,
    ) -> Self::Tensor;
    fn depthwise_conv2d_backprop_input(
        x_shape: &[usize],
        kernel: &Self::Tensor,
        gy: &Self::Tensor,
        geo: &Conv2dGeometry,
    ) -> Self::Tensor;
    fn depthwise_conv2d_backprop_filter(
        x: &Self::Tensor,
        kernel_shape: &[usize],
        gy: &Self::Tensor,
        geo: &Conv2dGeometry,
    ) -> Self::Tensor;

    fn max_pool2d(x: &Self::Tensor, geo: &Conv2dGeometry) -> Self::Tensor;
    fn max_pool2d_grad(x: &Self::Tensor, gy: &Self::Tensor, geo: &Conv2dGeometry) -> Self::Tensor;
    fn avg_pool2d(x: &Self::Tensor, geo: &Conv2dGeometry) -> Self::Tensor;
    fn avg_pool2d_grad(
        x_shape: &[usize],
        gy: &Self::Tensor,
        geo: &Conv2dGeometry,
    ) -> Self::Tensor;

    /// Reads the single element of a rank-0 (or one-element) tensor.
    fn scalar_value(tensor: &Self::Tensor) -> Option<Elm> {
        let v = Self::to_vec(tensor);
        if v.len() == 1 { Some(v[0]) } else { None }
    }
}
