use serde::{Deserialize, Serialize};

/// Placeholder for a dimension only known at run time (the batch size).
pub const UNKNOWN_DIM: usize = 0;

/// How convolution and pooling windows treat the input boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Padding {
    /// Zero-pads so that `out = ceil(in / stride)`.
    Same,
    /// No padding; windows never leave the input.
    Valid,
    /// Pads `effective_kernel - 1` on each side.
    Full,
}

impl Padding {
    pub fn name(&self) -> &'static str {
        match self {
            Padding::Same => "SAME",
            Padding::Valid => "VALID",
            Padding::Full => "FULL",
        }
    }
}

pub fn num_elements(shape: &[usize]) -> usize {
    shape.iter().product()
}

/// Renders a shape with unknown dimensions shown as `None`.
pub fn format_shape(shape: &[usize]) -> String {
    let dims: Vec<String> = shape
        .iter()
        .map(|&d| {
            if d == UNKNOWN_DIM {
                "None".to_string()
            } else {
                d.to_string()
            }
        })
        .collect();
    format!("[{}]", dims.join(", "))
}

/// Size of a kernel once dilation holes are accounted for.
pub fn effective_kernel_size(kernel: usize, dilation: usize) -> usize {
    kernel + (kernel - 1) * (dilation - 1)
}

/// Output length of a convolution or pooling window along one axis.
pub fn conv_output_length(
    input: usize,
    kernel: usize,
    padding: Padding,
    stride: usize,
    dilation: usize,
) -> usize {
    let dilated = effective_kernel_size(kernel, dilation);
    let length = match padding {
        Padding::Same => input,
        Padding::Valid => {
            if input < dilated {
                return 0;
            }
            input - dilated + 1
        }
        Padding::Full => input + dilated - 1,
    };
    length.div_ceil(stride)
}

/// Spatial geometry of a 2-D window operation over NHWC images.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Conv2dGeometry {
    pub in_h: usize,
    pub in_w: usize,
    pub kernel_h: usize,
    pub kernel_w: usize,
    pub stride_h: usize,
    pub stride_w: usize,
    pub dilation_h: usize,
    pub dilation_w: usize,
    pub out_h: usize,
    pub out_w: usize,
    pub pad_top: usize,
    pub pad_left: usize,
}

impl Conv2dGeometry {
    pub fn new(
        input_hw: (usize, usize),
        kernel_hw: (usize, usize),
        strides: (usize, usize),
        dilations: (usize, usize),
        padding: Padding,
    ) -> Self {
        let (in_h, in_w) = input_hw;
        let (kernel_h, kernel_w) = kernel_hw;
        let (stride_h, stride_w) = strides;
        let (dilation_h, dilation_w) = dilations;

        let out_h = conv_output_length(in_h, kernel_h, padding, stride_h, dilation_h);
        let out_w = conv_output_length(in_w, kernel_w, padding, stride_w, dilation_w);
        let pad_top = pad_before(in_h, out_h, kernel_h, stride_h, dilation_h, padding);
        let pad_left = pad_before(in_w, out_w, kernel_w, stride_w, dilation_w, padding);

        Self {
            in_h,
            in_w,
            kernel_h,
            kernel_w,
            stride_h,
            stride_w,
            dilation_h,
            dilation_w,
            out_h,
            out_w,
            pad_top,
            pad_left,
        }
    }

    /// Input row read by output row `oy` at kernel row `ky`, if inside the image.
    #[inline]
    pub fn input_row(&self, oy: usize, ky: usize) -> Option<usize> {
        let pos = (oy * self.stride_h + ky * self.dilation_h) as isize - self.pad_top as isize;
        if pos < 0 || pos as usize >= self.in_h {
            None
        } else {
            Some(pos as usize)
        }
    }

    #[inline]
    pub fn input_col(&self, ox: usize, kx: usize) -> Option<usize> {
        let pos = (ox * self.stride_w + kx * self.dilation_w) as isize - self.pad_left as isize;
        if pos < 0 || pos as usize >= self.in_w {
            None
        } else {
            Some(pos as usize)
        }
    }
}

fn pad_before(
    input: usize,
    output: usize,
    kernel: usize,
    stride: usize,
    dilation: usize,
    padding: Padding,
) -> usize {
    let dilated = effective_kernel_size(kernel, dilation);
    match padding {
        Padding::Valid => 0,
        Padding::Full => dilated - 1,
        Padding::Same => {
            let needed = (output.saturating_sub(1)) * stride + dilated;
            needed.saturating_sub(input) / 2
        }
    }
}

pub fn broadcast_shape(a: &[usize], b: &[usize]) -> Result<Vec<usize>, String> {
    let a_len = a.len();
    let b_len = b.len();
    let max_len = a_len.max(b_len);
    let mut result = Vec::with_capacity(max_len);

    for i in 0..max_len {
        let a_dim = if i < max_len - a_len {
            1
        } else {
            a[i - (max_len - a_len)]
        };
        let b_dim = if i < max_len - b_len {
            1
        } else {
            b[i - (max_len - b_len)]
        };

        if a_dim == b_dim {
            result.push(a_dim);
        } else if a_dim == 1 {
            result.push(b_dim);
        } else if b_dim == 1 {
            result.push(a_dim);
        } else if a_dim == UNKNOWN_DIM {
            result.push(b_dim);
        } else if b_dim == UNKNOWN_DIM {
            result.push(a_dim);
        } else {
            return Err(format!(
                "Broadcast error: dimension mismatch at index {} (from right): {} vs {} (shapes: {:?}, {:?})",
                max_len - i - 1,
                a_dim,
                b_dim,
                a,
                b
            ));
        }
    }
    Ok(result)
}

pub fn matmul_shape(a: &[usize], b: &[usize]) -> Result<Vec<usize>, String> {
    if a.len() != 2 || b.len() != 2 {
        return Err(format!(
            "Matmul requires two rank-2 operands (e.g. [Batch, In] x [In, Out]), got {:?} x {:?}",
            a, b
        ));
    }
    if a[1] != b[0] {
        return Err(format!(
            "Matmul shape mismatch: inner dimensions MUST match. {:?} x {:?} ({} != {})",
            a, b, a[1], b[0]
        ));
    }
    Ok(vec![a[0], b[1]])
}

pub fn transpose_shape(a: &[usize]) -> Vec<usize> {
    let mut shape = a.to_vec();
    let ndim = shape.len();
    if ndim >= 2 {
        shape.swap(ndim - 1, ndim - 2);
    }
    shape
}

pub fn reduce_shape(a: &[usize], axis: Option<usize>, keep_dims: bool) -> Result<Vec<usize>, String> {
    match axis {
        Some(ax) => {
            if ax >= a.len() {
                return Err(format!("Sum axis {} out of bounds for shape {:?}", ax, a));
            }
            let mut shape = a.to_vec();
            if keep_dims {
                shape[ax] = 1;
            } else {
                shape.remove(ax);
            }
            Ok(shape)
        }
        None if keep_dims => Ok(vec![1; a.len()]),
        None => Ok(vec![]),
    }
}

/// Resolves at most one `UNKNOWN_DIM` entry of `target` from the element
/// count of `actual`.
pub fn resolve_reshape(actual: &[usize], target: &[usize]) -> Result<Vec<usize>, String> {
    let total = num_elements(actual);
    let unknown: Vec<usize> = target
        .iter()
        .enumerate()
        .filter(|(_, &d)| d == UNKNOWN_DIM)
        .map(|(i, _)| i)
        .collect();
    let known: usize = target.iter().filter(|&&d| d != UNKNOWN_DIM).product();

    match unknown.len() {
        0 if known == total => Ok(target.to_vec()),
        1 if known > 0 && total % known == 0 => {
            let mut shape = target.to_vec();
            shape[unknown[0]] = total / known;
            Ok(shape)
        }
        _ => Err(format!(
            "Cannot reshape {:?} ({} elements) into {}",
            actual,
            total,
            format_shape(target)
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_padding_uses_ceil_division() {
        for input in 1..20 {
            for stride in 1..4 {
                let expected = (input + stride - 1) / stride;
                assert_eq!(
                    conv_output_length(input, 3, Padding::Same, stride, 1),
                    expected
                );
            }
        }
    }

    #[test]
    fn valid_and_full_follow_literal_formula() {
        for input in 5..20 {
            for kernel in 1..4 {
                for stride in 1..4 {
                    for dilation in 1..3 {
                        let eff = kernel + (kernel - 1) * (dilation - 1);
                        if eff > input {
                            continue;
                        }
                        assert_eq!(
                            conv_output_length(input, kernel, Padding::Valid, stride, dilation),
                            (input - eff) / stride + 1
                        );
                        assert_eq!(
                            conv_output_length(input, kernel, Padding::Full, stride, dilation),
                            (input + eff - 1 + stride - 1) / stride
                        );
                    }
                }
            }
        }
    }

    #[test]
    fn dilation_widens_kernel() {
        assert_eq!(effective_kernel_size(3, 1), 3);
        assert_eq!(effective_kernel_size(3, 2), 5);
        assert_eq!(conv_output_length(10, 3, Padding::Valid, 1, 2), 6);
    }

    #[test]
    fn same_padding_is_centered() {
        let geo = Conv2dGeometry::new((5, 5), (3, 3), (1, 1), (1, 1), Padding::Same);
        assert_eq!((geo.out_h, geo.out_w), (5, 5));
        assert_eq!((geo.pad_top, geo.pad_left), (1, 1));
        assert_eq!(geo.input_row(0, 0), None);
        assert_eq!(geo.input_row(0, 1), Some(0));
    }

    #[test]
    fn broadcast_with_unknown_batch() {
        assert_eq!(
            broadcast_shape(&[UNKNOWN_DIM, 10], &[10]).unwrap(),
            vec![UNKNOWN_DIM, 10]
        );
        assert!(broadcast_shape(&[2, 3], &[2, 4]).is_err());
    }

    #[test]
    fn reshape_resolves_unknown_dim() {
        assert_eq!(
            resolve_reshape(&[4, 2, 3], &[UNKNOWN_DIM, 6]).unwrap(),
            vec![4, 6]
        );
        assert!(resolve_reshape(&[4, 2, 3], &[UNKNOWN_DIM, 5]).is_err());
    }
}
