//! Convolution and pooling operations over NHWC images.

use std::rc::Rc;

use crate::backend::Backend;
use crate::engine::operation::Operation;
use crate::engine::shape::Conv2dGeometry;
use crate::engine::tensor::Tensor;
use crate::error::Result;

type ShapeResult = std::result::Result<Vec<usize>, String>;

fn check_image(name: &str, x: &[usize], geo: &Conv2dGeometry) -> std::result::Result<(), String> {
    if x.len() != 4 {
        return Err(format!("{name} expects a rank-4 NHWC input, got {:?}", x));
    }
    if x[1] != geo.in_h || x[2] != geo.in_w {
        return Err(format!(
            "{name} was configured for {}x{} images, got {:?}",
            geo.in_h, geo.in_w, x
        ));
    }
    Ok(())
}

fn check_kernel(
    name: &str,
    x: &[usize],
    k: &[usize],
    geo: &Conv2dGeometry,
) -> std::result::Result<(), String> {
    if k.len() != 4 || k[0] != geo.kernel_h || k[1] != geo.kernel_w || k[2] != x[3] {
        return Err(format!(
            "{name} kernel {:?} does not fit input {:?} with a {}x{} window",
            k, x, geo.kernel_h, geo.kernel_w
        ));
    }
    Ok(())
}

#[derive(Debug, Clone)]
pub struct Conv2dOp {
    pub geo: Conv2dGeometry,
}
impl<B: Backend> Operation<B> for Conv2dOp {
    fn name(&self) -> String {
        "Conv2d".to_string()
    }
    fn output_shape(&self, inputs: &[Vec<usize>]) -> ShapeResult {
        let (x, k) = (&inputs[0], &inputs[1]);
        check_image("Conv2d", x, &self.geo)?;
        check_kernel("Conv2d", x, k, &self.geo)?;
        Ok(vec![x[0], self.geo.out_h, self.geo.out_w, k[3]])
    }
    fn forward(&self, inputs: &[&B::Tensor]) -> Result<B::Tensor> {
        Ok(B::conv2d(inputs[0], inputs[1], &self.geo))
    }
    fn backward(&self, gy: &Tensor<B>, inputs: &[Tensor<B>], _: &Tensor<B>) -> Vec<Option<Tensor<B>>> {
        let (x, k) = (&inputs[0], &inputs[1]);
        let gx = Tensor::op(Rc::new(Conv2dBackpropInputOp { geo: self.geo }), vec![x, k, gy]);
        let gk = Tensor::op(Rc::new(Conv2dBackpropFilterOp { geo: self.geo }), vec![x, k, gy]);
        vec![Some(gx), Some(gk)]
    }
}

/// Inputs are `[x, kernel, gy]`; only the shape of `x` is read.
#[derive(Debug, Clone)]
pub struct Conv2dBackpropInputOp {
    pub geo: Conv2dGeometry,
}
impl<B: Backend> Operation<B> for Conv2dBackpropInputOp {
    fn name(&self) -> String {
        "Conv2dBackpropInput".to_string()
    }
    fn output_shape(&self, inputs: &[Vec<usize>]) -> ShapeResult {
        Ok(inputs[0].clone())
    }
    fn forward(&self, inputs: &[&B::Tensor]) -> Result<B::Tensor> {
        Ok(B::conv2d_backprop_input(
            &B::shape(inputs[0]),
            inputs[1],
            inputs[2],
            &self.geo,
        ))
    }
    fn backward(&self, _: &Tensor<B>, _: &[Tensor<B>], _: &Tensor<B>) -> Vec<Option<Tensor<B>>> {
        vec![None, None, None]
    }
}

/// Inputs are `[x, kernel, gy]`; only the shape of `kernel` is read.
#[derive(Debug, Clone)]
pub struct Conv2dBackpropFilterOp {
    pub geo: Conv2dGeometry,
}
impl<B: Backend> Operation<B> for Conv2dBackpropFilterOp {
    fn name(&self) -> String {
        "Conv2dBackpropFilter".to_string()
    }
    fn output_shape(&self, inputs: &[Vec<usize>]) -> ShapeResult {
        Ok(inputs[1].clone())
    }
    fn forward(&self, inputs: &[&B::Tensor]) -> Result<B::Tensor> {
        Ok(B::conv2d_backprop_filter(
            inputs[0],
            &B::shape(inputs[1]),
            inputs[2],
            &self.geo,
        ))
    }
    fn backward(&self, _: &Tensor<B>, _: &[Tensor<B>], _: &Tensor<B>) -> Vec<Option<Tensor<B>>> {
        vec![None, None, None]
    }
}

#[derive(Debug, Clone)]
pub struct DepthwiseConv2dOp {
    pub geo: Conv2dGeometry,
}
impl<B: Backend> Operation<B> for DepthwiseConv2dOp {
    fn name(&self) -> String {
        "DepthwiseConv2d".to_string()
    }
    fn output_shape(&self, inputs: &[Vec<usize>]) -> ShapeResult {
        let (x, k) = (&inputs[0], &inputs[1]);
        check_image("DepthwiseConv2d", x, &self.geo)?;
        check_kernel("DepthwiseConv2d", x, k, &self.geo)?;
        Ok(vec![x[0], self.geo.out_h, self.geo.out_w, x[3] * k[3]])
    }
    fn forward(&self, inputs: &[&B::Tensor]) -> Result<B::Tensor> {
        Ok(B::depthwise_conv2d(inputs[0], inputs[1], &self.geo))
    }
    fn backward(&self, gy: &Tensor<B>, inputs: &[Tensor<B>], _: &Tensor<B>) -> Vec<Option<Tensor<B>>> {
        let (x, k) = (&inputs[0], &inputs[1]);
        let gx = Tensor::op(
            Rc::new(DepthwiseConv2dBackpropInputOp { geo: self.geo }),
            vec![x, k, gy],
        );
        let gk = Tensor::op(
            Rc::new(DepthwiseConv2dBackpropFilterOp { geo: self.geo }),
            vec![x, k, gy],
        );
        vec![Some(gx), Some(gk)]
    }
}

#[derive(Debug, Clone)]
pub struct DepthwiseConv2dBackpropInputOp {
    pub geo: Conv2dGeometry,
}
impl<B: Backend> Operation<B> for DepthwiseConv2dBackpropInputOp {
    fn name(&self) -> String {
        "DepthwiseConv2dBackpropInput".to_string()
    }
    fn output_shape(&self, inputs: &[Vec<usize>]) -> ShapeResult {
        Ok(inputs[0].clone())
    }
    fn forward(&self, inputs: &[&B::Tensor]) -> Result<B::Tensor> {
        Ok(B::depthwise_conv2d_backprop_input(
            &B::shape(inputs[0]),
            inputs[1],
            inputs[2],
            &self.geo,
        ))
    }
    fn backward(&self, _: &Tensor<B>, _: &[Tensor<B>], _: &Tensor<B>) -> Vec<Option<Tensor<B>>> {
        vec![None, None, None]
    }
}

#[derive(Debug, Clone)]
pub struct DepthwiseConv2dBackpropFilterOp {
    pub geo: Conv2dGeometry,
}
impl<B: Backend> Operation<B> for DepthwiseConv2dBackpropFilterOp {
    fn name(&self) -> String {
        "DepthwiseConv2dBackpropFilter".to_string()
    }
    fn output_shape(&self, inputs: &[Vec<usize>]) -> ShapeResult {
        Ok(inputs[1].clone())
    }
    fn forward(&self, inputs: &[&B::Tensor]) -> Result<B::Tensor> {
        Ok(B::depthwise_conv2d_backprop_filter(
            inputs[0],
            &B::shape(inputs[1]),
            inputs[2],
            &self.geo,
        ))
    }
    fn backward(&self, _: &Tensor<B>, _: &[Tensor<B>], _: &Tensor<B>) -> Vec<Option<Tensor<B>>> {
        vec![None, None, None]
    }
}

#[derive(Debug, Clone)]
pub struct MaxPool2dOp {
    pub geo: Conv2dGeometry,
}
impl<B: Backend> Operation<B> for MaxPool2dOp {
    fn name(&self) -> String {
        "MaxPool2d".to_string()
    }
    fn output_shape(&self, inputs: &[Vec<usize>]) -> ShapeResult {
        let x = &inputs[0];
        check_image("MaxPool2d", x, &self.geo)?;
        Ok(vec![x[0], self.geo.out_h, self.geo.out_w, x[3]])
    }
    fn forward(&self, inputs: &[&B::Tensor]) -> Result<B::Tensor> {
        Ok(B::max_pool2d(inputs[0], &self.geo))
    }
    fn backward(&self, gy: &Tensor<B>, inputs: &[Tensor<B>], _: &Tensor<B>) -> Vec<Option<Tensor<B>>> {
        let gx = Tensor::op(Rc::new(MaxPool2dGradOp { geo: self.geo }), vec![&inputs[0], gy]);
        vec![Some(gx)]
    }
}

/// Routes each output gradient to the first maximum of its window.
/// Inputs are `[x, gy]`.
#[derive(Debug, Clone)]
pub struct MaxPool2dGradOp {
    pub geo: Conv2dGeometry,
}
impl<B: Backend> Operation<B> for MaxPool2dGradOp {
    fn name(&self) -> String {
        "MaxPool2dGrad".to_string()
    }
    fn output_shape(&self, inputs: &[Vec<usize>]) -> ShapeResult {
        Ok(inputs[0].clone())
    }
    fn forward(&self, inputs: &[&B::Tensor]) -> Result<B::Tensor> {
        Ok(B::max_pool2d_grad(inputs[0], inputs[1], &self.geo))
    }
    fn backward(&self, _: &Tensor<B>, _: &[Tensor<B>], _: &Tensor<B>) -> Vec<Option<Tensor<B>>> {
        vec![None, None]
    }
}

#[derive(Debug, Clone)]
pub struct AvgPool2dOp {
    pub geo: Conv2dGeometry,
}
impl<B: Backend> Operation<B> for AvgPool2dOp {
    fn name(&self) -> String {
        "AvgPool2d".to_string()
    }
    fn output_shape(&self, inputs: &[Vec<usize>]) -> ShapeResult {
        let x = &inputs[0];
        check_image("AvgPool2d", x, &self.geo)?;
        Ok(vec![x[0], self.geo.out_h, self.geo.out_w, x[3]])
    }
    fn forward(&self, inputs: &[&B::Tensor]) -> Result<B::Tensor> {
        Ok(B::avg_pool2d(inputs[0], &self.geo))
    }
    fn backward(&self, gy: &Tensor<B>, inputs: &[Tensor<B>], _: &Tensor<B>) -> Vec<Option<Tensor<B>>> {
        let gx = Tensor::op(Rc::new(AvgPool2dGradOp { geo: self.geo }), vec![&inputs[0], gy]);
        vec![Some(gx)]
    }
}

/// Inputs are `[x, gy]`; only the shape of `x` is read.
#[derive(Debug, Clone)]
pub struct AvgPool2dGradOp {
    pub geo: Conv2dGeometry,
}
impl<B: Backend> Operation<B> for AvgPool2dGradOp {
    fn name(&self) -> String {
        "AvgPool2dGrad".to_string()
    }
    fn output_shape(&self, inputs: &[Vec<usize>]) -> ShapeResult {
        Ok(inputs[0].clone())
    }
    fn forward(&self, inputs: &[&B::Tensor]) -> Result<B::Tensor> {
        Ok(B::avg_pool2d_grad(&B::shape(inputs[0]), inputs[1], &self.geo))
    }
    fn backward(&self, _: &Tensor<B>, _: &[Tensor<B>], _: &Tensor<B>) -> Vec<Option<Tensor<B>>> {
        vec![None, None]
    }
}
