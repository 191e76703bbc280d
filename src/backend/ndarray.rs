use ndarray::{ArrayD, Axis, Ix2, IxDyn};
use ndarray_rand::{RandomExt, rand_distr::Normal};
use rand::{Rng, SeedableRng, distributions::Uniform, rngs::StdRng};

use crate::backend::{Backend, Elm, kernels};
use crate::engine::shape::Conv2dGeometry;
use crate::error::{Error, Result};

#[derive(Debug, Clone)]
pub struct NdArray;

fn rng(seed: Option<u64>) -> StdRng {
    match seed {
        Some(s) => StdRng::seed_from_u64(s),
        None => StdRng::from_entropy(),
    }
}

fn normal(mean: Elm, std: Elm) -> Result<Normal<Elm>> {
    Normal::new(mean, std)
        .map_err(|e| Error::InvalidConfig(format!("normal(mean={mean}, std={std}): {e}")))
}

// Row-major copy regardless of the array's memory layout.
fn contiguous(tensor: &ArrayD<Elm>) -> Vec<Elm> {
    tensor.iter().copied().collect()
}

// Kernels are only ever handed shapes they produced, so the length always matches.
fn from_kernel(data: Vec<Elm>, shape: &[usize]) -> ArrayD<Elm> {
    ArrayD::from_shape_vec(IxDyn(shape), data).unwrap_or_else(|e| {
        panic!("kernel produced a buffer that does not match {:?}: {}", shape, e)
    })
}

fn nhwc(shape: &[usize]) -> (usize, usize) {
    (shape[0], shape[3])
}

impl Backend for NdArray {
    type Tensor = ArrayD<Elm>;

    fn zeros(shape: &[usize]) -> Self::Tensor {
        ArrayD::zeros(shape)
    }
    fn ones(shape: &[usize]) -> Self::Tensor {
        ArrayD::ones(shape)
    }
    fn full(shape: &[usize], value: Elm) -> Self::Tensor {
        ArrayD::from_elem(shape, value)
    }
    fn ones_like(tensor: &Self::Tensor) -> Self::Tensor {
        ArrayD::ones(tensor.shape())
    }
    fn random_normal(
        shape: &[usize],
        mean: Elm,
        std: Elm,
        seed: Option<u64>,
    ) -> Result<Self::Tensor> {
        let mut rng = rng(seed);
        Ok(ArrayD::random_using(shape, normal(mean, std)?, &mut rng))
    }
    fn random_uniform(
        shape: &[usize],
        low: Elm,
        high: Elm,
        seed: Option<u64>,
    ) -> Result<Self::Tensor> {
        if !(low < high) {
            return Err(Error::InvalidConfig(format!(
                "uniform range must satisfy low < high, got [{low}, {high})"
            )));
        }
        let mut rng = rng(seed);
        Ok(ArrayD::random_using(shape, Uniform::new(low, high), &mut rng))
    }
    fn truncated_normal(
        shape: &[usize],
        mean: Elm,
        std: Elm,
        seed: Option<u64>,
    ) -> Result<Self::Tensor> {
        let dist = normal(mean, std)?;
        let mut rng = rng(seed);
        let bound = 2.0 * std;
        Ok(ArrayD::from_shape_simple_fn(shape, || loop {
            let v: Elm = rng.sample(dist);
            if (v - mean).abs() <= bound {
                break v;
            }
        }))
    }

    fn from_vec(vec: Vec<Elm>, shape: &[usize]) -> Result<Self::Tensor> {
        let len = vec.len();
        ArrayD::from_shape_vec(IxDyn(shape), vec).map_err(|_| Error::ShapeMismatch {
            context: format!("from_vec with {} elements", len),
            expected: shape.to_vec(),
            actual: vec![len],
        })
    }
    fn to_vec(tensor: &Self::Tensor) -> Vec<Elm> {
        tensor.iter().cloned().collect()
    }

    fn shape(tensor: &Self::Tensor) -> Vec<usize> {
        tensor.shape().to_vec()
    }

    fn add(a: &Self::Tensor, b: &Self::Tensor) -> Self::Tensor {
        a + b
    }
    fn sub(a: &Self::Tensor, b: &Self::Tensor) -> Self::Tensor {
        a - b
    }
    fn mul(a: &Self::Tensor, b: &Self::Tensor) -> Self::Tensor {
        a * b
    }
    fn div(a: &Self::Tensor, b: &Self::Tensor) -> Self::Tensor {
        a / b
    }
    fn maximum(a: &Self::Tensor, b: &Self::Tensor) -> Self::Tensor {
        let mut out = a.clone();
        out.zip_mut_with(b, |x, &y| *x = x.max(y));
        out
    }
    fn mul_scalar(a: &Self::Tensor, s: Elm) -> Self::Tensor {
        a * s
    }
    fn add_scalar(a: &Self::Tensor, s: Elm) -> Self::Tensor {
        a + s
    }
    fn matmul(a: &Self::Tensor, b: &Self::Tensor) -> Self::Tensor {
        match (
            a.view().into_dimensionality::<Ix2>(),
            b.view().into_dimensionality::<Ix2>(),
        ) {
            (Ok(a2), Ok(b2)) => a2.dot(&b2).into_dyn(),
            _ => panic!(
                "Unsupported dimensions for matmul: A ndim={}, B ndim={} (shapes: {:?}, {:?})",
                a.ndim(),
                b.ndim(),
                a.shape(),
                b.shape()
            ),
        }
    }

    fn transpose(tensor: &Self::Tensor) -> Self::Tensor {
        let ndim = tensor.ndim();
        if ndim < 2 {
            return tensor.clone();
        }
        let mut view = tensor.view();
        view.swap_axes(ndim - 1, ndim - 2);
        view.to_owned()
    }

    fn reshape(tensor: &Self::Tensor, shape: &[usize]) -> Result<Self::Tensor> {
        Self::from_vec(contiguous(tensor), shape)
    }

    fn sum(a: &Self::Tensor, axis: Option<usize>, keep_dims: bool) -> Self::Tensor {
        match axis {
            Some(ax) => {
                let res = a.sum_axis(Axis(ax));
                if keep_dims {
                    res.insert_axis(Axis(ax))
                } else {
                    res
                }
            }
            None => {
                let val = a.sum();
                if keep_dims {
                    ArrayD::from_elem(vec![1; a.ndim()], val)
                } else {
                    ArrayD::from_elem(vec![], val)
                }
            }
        }
    }

    fn sum_to(a: &Self::Tensor, shape: &[usize]) -> Self::Tensor {
        let mut out = a.clone();
        while out.ndim() > shape.len() {
            out = out.sum_axis(Axis(0));
        }
        for (ax, &dim) in shape.iter().enumerate() {
            if dim == 1 && out.shape()[ax] != 1 {
                out = out.sum_axis(Axis(ax)).insert_axis(Axis(ax));
            }
        }
        out
    }

    fn mean(a: &Self::Tensor) -> Self::Tensor {
        let n = a.len().max(1) as Elm;
        ArrayD::from_elem(vec![], a.sum() / n)
    }

    fn argmax(a: &Self::Tensor, axis: usize) -> Self::Tensor {
        a.map_axis(Axis(axis), |lane| {
            let mut best = 0usize;
            let mut best_val = Elm::NEG_INFINITY;
            for (i, &v) in lane.iter().enumerate() {
                if v > best_val {
                    best = i;
                    best_val = v;
                }
            }
            best as Elm
        })
    }

    fn eq(a: &Self::Tensor, b: &Self::Tensor) -> Self::Tensor {
        (a - b).mapv(|v| if v == 0.0 { 1.0 } else { 0.0 })
    }

    fn gt(a: &Self::Tensor, b: &Self::Tensor) -> Self::Tensor {
        (a - b).mapv(|v| if v > 0.0 { 1.0 } else { 0.0 })
    }

    fn neg(a: &Self::Tensor) -> Self::Tensor {
        -a
    }

    fn abs(a: &Self::Tensor) -> Self::Tensor {
        a.mapv(|v| v.abs())
    }

    fn sign(a: &Self::Tensor) -> Self::Tensor {
        a.mapv(|v| {
            if v > 0.0 {
                1.0
            } else if v < 0.0 {
                -1.0
            } else {
                0.0
            }
        })
    }

    fn sqrt(a: &Self::Tensor) -> Self::Tensor {
        a.mapv(|v| v.sqrt())
    }

    fn exp(a: &Self::Tensor) -> Self::Tensor {
        a.mapv(|v| v.exp())
    }

    fn log(a: &Self::Tensor) -> Self::Tensor {
        a.mapv(|v| v.ln())
    }

    fn powi(a: &Self::Tensor, n: i32) -> Self::Tensor {
        a.mapv(|v| v.powi(n))
    }

    fn relu(a: &Self::Tensor) -> Self::Tensor {
        a.mapv(|v| v.max(0.0))
    }

    fn sigmoid(a: &Self::Tensor) -> Self::Tensor {
        a.mapv(|v| 1.0 / (1.0 + (-v).exp()))
    }

    fn tanh(a: &Self::Tensor) -> Self::Tensor {
        a.mapv(|v| v.tanh())
    }

    fn softmax(a: &Self::Tensor, axis: usize) -> Self::Tensor {
        let mut out = a.clone();
        for mut lane in out.lanes_mut(Axis(axis)) {
            let max = lane.fold(Elm::NEG_INFINITY, |acc, &x| acc.max(x));
            lane.mapv_inplace(|v| (v - max).exp());
            let sum = lane.sum();
            lane.mapv_inplace(|v| v / sum);
        }
        out
    }

    fn log_softmax(a: &Self::Tensor, axis: usize) -> Self::Tensor {
        let mut out = a.clone();
        for mut lane in out.lanes_mut(Axis(axis)) {
            let max = lane.fold(Elm::NEG_INFINITY, |acc, &x| acc.max(x));
            let log_sum = lane.fold(0.0, |acc, &x| acc + (x - max).exp()).ln();
            lane.mapv_inplace(|v| v - max - log_sum);
        }
        out
    }

    fn map(a: &Self::Tensor, f: &dyn Fn(Elm) -> Elm) -> Self::Tensor {
        a.mapv(f)
    }

    fn conv2d(x: &Self::Tensor, kernel: &Self::Tensor, geo: &Conv2dGeometry) -> Self::Tensor {
        let (n, c) = nhwc(x.shape());
        let f = kernel.shape()[3];
        let out = kernels::conv2d(&contiguous(x), &contiguous(kernel), n, c, f, geo);
        from_kernel(out, &[n, geo.out_h, geo.out_w, f])
    }

    fn conv2d_backprop_input(
        x_shape: &[usize],
        kernel: &Self::Tensor,
        gy: &Self::Tensor,
        geo: &Conv2dGeometry,
    ) -> Self::Tensor {
        let (n, c) = nhwc(x_shape);
        let f = kernel.shape()[3];
        let gx = kernels::conv2d_backprop_input(&contiguous(kernel), &contiguous(gy), n, c, f, geo);
        from_kernel(gx, x_shape)
    }

    fn conv2d_backprop_filter(
        x: &Self::Tensor,
        kernel_shape: &[usize],
        gy: &Self::Tensor,
        geo: &Conv2dGeometry,
    ) -> Self::Tensor {
        let (n, c) = nhwc(x.shape());
        let f = kernel_shape[3];
        let gk = kernels::conv2d_backprop_filter(&contiguous(x), &contiguous(gy), n, c, f, geo);
        from_kernel(gk, kernel_shape)
    }

    fn depthwise_conv2d(
        x: &Self::Tensor,
        kernel: &Self::Tensor,
        geo: &Conv2dGeometry,
    ) -> Self::Tensor {
        let (n, c) = nhwc(x.shape());
        let m = kernel.shape()[3];
        let out = kernels::depthwise_conv2d(&contiguous(x), &contiguous(kernel), n, c, m, geo);
        from_kernel(out, &[n, geo.out_h, geo.out_w, c * m])
    }

    fn depthwise_conv2d_backprop_input(
        x_shape: &[usize],
        kernel: &Self::Tensor,
        gy: &Self::Tensor,
        geo: &Conv2dGeometry,
    ) -> Self::Tensor {
        let (n, c) = nhwc(x_shape);
        let m = kernel.shape()[3];
        let gx = kernels::depthwise_conv2d_backprop_input(
            &contiguous(kernel),
            &contiguous(gy),
            n,
            c,
            m,
            geo,
        );
        from_kernel(gx, x_shape)
    }

    fn depthwise_conv2d_backprop_filter(
        x: &Self::Tensor,
        kernel_shape: &[usize],
        gy: &Self::Tensor,
        geo: &Conv2dGeometry,
    ) -> Self::Tensor {
        let (n, c) = nhwc(x.shape());
        let m = kernel_shape[3];
        let gk =
            kernels::depthwise_conv2d_backprop_filter(&contiguous(x), &contiguous(gy), n, c, m, geo);
        from_kernel(gk, kernel_shape)
    }

    fn max_pool2d(x: &Self::Tensor, geo: &Conv2dGeometry) -> Self::Tensor {
        let (n, c) = nhwc(x.shape());
        let out = kernels::max_pool2d(&contiguous(x), n, c, geo);
        from_kernel(out, &[n, geo.out_h, geo.out_w, c])
    }

    fn max_pool2d_grad(x: &Self::Tensor, gy: &Self::Tensor, geo: &Conv2dGeometry) -> Self::Tensor {
        let (n, c) = nhwc(x.shape());
        let gx = kernels::max_pool2d_grad(&contiguous(x), &contiguous(gy), n, c, geo);
        from_kernel(gx, x.shape())
    }

    fn avg_pool2d(x: &Self::Tensor, geo: &Conv2dGeometry) -> Self::Tensor {
        let (n, c) = nhwc(x.shape());
        let out = kernels::avg_pool2d(&contiguous(x), n, c, geo);
        from_kernel(out, &[n, geo.out_h, geo.out_w, c])
    }

    fn avg_pool2d_grad(
        x_shape: &[usize],
        gy: &Self::Tensor,
        geo: &Conv2dGeometry,
    ) -> Self::Tensor {
        let (n, c) = nhwc(x_shape);
        let gx = kernels::avg_pool2d_grad(&contiguous(gy), n, c, geo);
        from_kernel(gx, x_shape)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sum_to_reduces_broadcast_axes() {
        let a = NdArray::from_vec(vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0], &[2, 3]).unwrap();
        assert_eq!(NdArray::to_vec(&NdArray::sum_to(&a, &[3])), vec![5.0, 7.0, 9.0]);
        assert_eq!(NdArray::shape(&NdArray::sum_to(&a, &[2, 1])), vec![2, 1]);
        assert_eq!(NdArray::to_vec(&NdArray::sum_to(&a, &[])), vec![21.0]);
    }

    #[test]
    fn truncated_normal_stays_within_two_sigma() {
        let t = NdArray::truncated_normal(&[1000], 0.0, 1.0, Some(7)).unwrap();
        assert!(NdArray::to_vec(&t).iter().all(|v| v.abs() <= 2.0));
    }

    #[test]
    fn seeded_sampling_is_reproducible() {
        let a = NdArray::random_normal(&[16], 0.0, 1.0, Some(42)).unwrap();
        let b = NdArray::random_normal(&[16], 0.0, 1.0, Some(42)).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn log_softmax_matches_log_of_softmax() {
        let a = NdArray::from_vec(vec![1.0, 2.0, 3.0], &[1, 3]).unwrap();
        let lhs = NdArray::to_vec(&NdArray::log_softmax(&a, 1));
        let rhs = NdArray::to_vec(&NdArray::log(&NdArray::softmax(&a, 1)));
        for (l, r) in lhs.iter().zip(rhs.iter()) {
            assert!((l - r).abs() < 1e-6);
        }
    }

    #[test]
    fn invalid_uniform_range_is_rejected() {
        assert!(NdArray::random_uniform(&[2], 1.0, 1.0, None).is_err());
    }
}
