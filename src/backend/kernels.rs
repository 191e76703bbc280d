//! Slice-level NHWC window kernels shared by CPU backends.
//!
//! Every function takes row-major buffers plus their logical dimensions and
//! parallelises over the batch with rayon.

use rayon::prelude::*;

use crate::backend::Elm;
use crate::engine::shape::Conv2dGeometry;

/// `x`: `[n, h, w, c]`, `kernel`: `[kh, kw, c, f]` -> `[n, oh, ow, f]`.
pub fn conv2d(
    x: &[Elm],
    kernel: &[Elm],
    n: usize,
    c: usize,
    f: usize,
    geo: &Conv2dGeometry,
) -> Vec<Elm> {
    let in_image = geo.in_h * geo.in_w * c;
    let out_image = geo.out_h * geo.out_w * f;
    let mut out = vec![0.0; n * out_image];

    out.par_chunks_mut(out_image.max(1))
        .enumerate()
        .for_each(|(b, out_b)| {
            let x_b = &x[b * in_image..(b + 1) * in_image];
            for oy in 0..geo.out_h {
                for ox in 0..geo.out_w {
                    let acc = &mut out_b[(oy * geo.out_w + ox) * f..(oy * geo.out_w + ox + 1) * f];
                    for ky in 0..geo.kernel_h {
                        let Some(iy) = geo.input_row(oy, ky) else { continue };
                        for kx in 0..geo.kernel_w {
                            let Some(ix) = geo.input_col(ox, kx) else { continue };
                            let x_px = &x_b[(iy * geo.in_w + ix) * c..(iy * geo.in_w + ix + 1) * c];
                            let k_base = (ky * geo.kernel_w + kx) * c * f;
                            for (ci, &xv) in x_px.iter().enumerate() {
                                let k_row = &kernel[k_base + ci * f..k_base + (ci + 1) * f];
                                for (a, &kv) in acc.iter_mut().zip(k_row) {
                                    *a += xv * kv;
                                }
                            }
                        }
                    }
                }
            }
        });
    out
}

pub fn conv2d_backprop_input(
    kernel: &[Elm],
    gy: &[Elm],
    n: usize,
    c: usize,
    f: usize,
    geo: &Conv2dGeometry,
) -> Vec<Elm> {
    let in_image = geo.in_h * geo.in_w * c;
    let out_image = geo.out_h * geo.out_w * f;
    let mut gx = vec![0.0; n * in_image];

    gx.par_chunks_mut(in_image.max(1))
        .enumerate()
        .for_each(|(b, gx_b)| {
            let gy_b = &gy[b * out_image..(b + 1) * out_image];
            for oy in 0..geo.out_h {
                for ox in 0..geo.out_w {
                    let g = &gy_b[(oy * geo.out_w + ox) * f..(oy * geo.out_w + ox + 1) * f];
                    for ky in 0..geo.kernel_h {
                        let Some(iy) = geo.input_row(oy, ky) else { continue };
                        for kx in 0..geo.kernel_w {
                            let Some(ix) = geo.input_col(ox, kx) else { continue };
                            let k_base = (ky * geo.kernel_w + kx) * c * f;
                            let px = (iy * geo.in_w + ix) * c;
                            for ci in 0..c {
                                let k_row = &kernel[k_base + ci * f..k_base + (ci + 1) * f];
                                let dot: Elm = g.iter().zip(k_row).map(|(a, b)| a * b).sum();
                                gx_b[px + ci] += dot;
                            }
                        }
                    }
                }
            }
        });
    gx
}

pub fn conv2d_backprop_filter(
    x: &[Elm],
    gy: &[Elm],
    n: usize,
    c: usize,
    f: usize,
    geo: &Conv2dGeometry,
) -> Vec<Elm> {
    let in_image = geo.in_h * geo.in_w * c;
    let out_image = geo.out_h * geo.out_w * f;
    let k_len = geo.kernel_h * geo.kernel_w * c * f;

    (0..n)
        .into_par_iter()
        .map(|b| {
            let mut gk = vec![0.0; k_len];
            let x_b = &x[b * in_image..(b + 1) * in_image];
            let gy_b = &gy[b * out_image..(b + 1) * out_image];
            for oy in 0..geo.out_h {
                for ox in 0..geo.out_w {
                    let g = &gy_b[(oy * geo.out_w + ox) * f..(oy * geo.out_w + ox + 1) * f];
                    for ky in 0..geo.kernel_h {
                        let Some(iy) = geo.input_row(oy, ky) else { continue };
                        for kx in 0..geo.kernel_w {
                            let Some(ix) = geo.input_col(ox, kx) else { continue };
                            let k_base = (ky * geo.kernel_w + kx) * c * f;
                            let px = (iy * geo.in_w + ix) * c;
                            for ci in 0..c {
                                let xv = x_b[px + ci];
                                let k_row = &mut gk[k_base + ci * f..k_base + (ci + 1) * f];
                                for (kv, &gv) in k_row.iter_mut().zip(g) {
                                    *kv += xv * gv;
                                }
                            }
                        }
                    }
                }
            }
            gk
        })
        .reduce(|| vec![0.0; k_len], add_into)
}

/// `x`: `[n, h, w, c]`, `kernel`: `[kh, kw, c, m]` -> `[n, oh, ow, c * m]`.
pub fn depthwise_conv2d(
    x: &[Elm],
    kernel: &[Elm],
    n: usize,
    c: usize,
    m: usize,
    geo: &Conv2dGeometry,
) -> Vec<Elm> {
    let in_image = geo.in_h * geo.in_w * c;
    let out_c = c * m;
    let out_image = geo.out_h * geo.out_w * out_c;
    let mut out = vec![0.0; n * out_image];

    out.par_chunks_mut(out_image.max(1))
        .enumerate()
        .for_each(|(b, out_b)| {
            let x_b = &x[b * in_image..(b + 1) * in_image];
            for oy in 0..geo.out_h {
                for ox in 0..geo.out_w {
                    let o_base = (oy * geo.out_w + ox) * out_c;
                    for ky in 0..geo.kernel_h {
                        let Some(iy) = geo.input_row(oy, ky) else { continue };
                        for kx in 0..geo.kernel_w {
                            let Some(ix) = geo.input_col(ox, kx) else { continue };
                            let px = (iy * geo.in_w + ix) * c;
                            let k_base = (ky * geo.kernel_w + kx) * out_c;
                            for ci in 0..c {
                                let xv = x_b[px + ci];
                                for mi in 0..m {
                                    out_b[o_base + ci * m + mi] += xv * kernel[k_base + ci * m + mi];
                                }
                            }
                        }
                    }
                }
            }
        });
    out
}

pub fn depthwise_conv2d_backprop_input(
    kernel: &[Elm],
    gy: &[Elm],
    n: usize,
    c: usize,
    m: usize,
    geo: &Conv2dGeometry,
) -> Vec<Elm> {
    let in_image = geo.in_h * geo.in_w * c;
    let out_c = c * m;
    let out_image = geo.out_h * geo.out_w * out_c;
    let mut gx = vec![0.0; n * in_image];

    gx.par_chunks_mut(in_image.max(1))
        .enumerate()
        .for_each(|(b, gx_b)| {
            let gy_b = &gy[b * out_image..(b + 1) * out_image];
            for oy in 0..geo.out_h {
                for ox in 0..geo.out_w {
                    let o_base = (oy * geo.out_w + ox) * out_c;
                    for ky in 0..geo.kernel_h {
                        let Some(iy) = geo.input_row(oy, ky) else { continue };
                        for kx in 0..geo.kernel_w {
                            let Some(ix) = geo.input_col(ox, kx) else { continue };
                            let px = (iy * geo.in_w + ix) * c;
                            let k_base = (ky * geo.kernel_w + kx) * out_c;
                            for ci in 0..c {
                                let mut acc = 0.0;
                                for mi in 0..m {
                                    acc += gy_b[o_base + ci * m + mi] * kernel[k_base + ci * m + mi];
                                }
                                gx_b[px + ci] += acc;
                            }
                        }
                    }
                }
            }
        });
    gx
}

pub fn depthwise_conv2d_backprop_filter(
    x: &[Elm],
    gy: &[Elm],
    n: usize,
    c: usize,
    m: usize,
    geo: &Conv2dGeometry,
) -> Vec<Elm> {
    let in_image = geo.in_h * geo.in_w * c;
    let out_c = c * m;
    let out_image = geo.out_h * geo.out_w * out_c;
    let k_len = geo.kernel_h * geo.kernel_w * out_c;

    (0..n)
        .into_par_iter()
        .map(|b| {
            let mut gk = vec![0.0; k_len];
            let x_b = &x[b * in_image..(b + 1) * in_image];
            let gy_b = &gy[b * out_image..(b + 1) * out_image];
            for oy in 0..geo.out_h {
                for ox in 0..geo.out_w {
                    let o_base = (oy * geo.out_w + ox) * out_c;
                    for ky in 0..geo.kernel_h {
                        let Some(iy) = geo.input_row(oy, ky) else { continue };
                        for kx in 0..geo.kernel_w {
                            let Some(ix) = geo.input_col(ox, kx) else { continue };
                            let px = (iy * geo.in_w + ix) * c;
                            let k_base = (ky * geo.kernel_w + kx) * out_c;
                            for ci in 0..c {
                                let xv = x_b[px + ci];
                                for mi in 0..m {
                                    gk[k_base + ci * m + mi] += xv * gy_b[o_base + ci * m + mi];
                                }
                            }
                        }
                    }
                }
            }
            gk
        })
        .reduce(|| vec![0.0; k_len], add_into)
}

/// Max pooling; padded positions never win.
pub fn max_pool2d(x: &[Elm], n: usize, c: usize, geo: &Conv2dGeometry) -> Vec<Elm> {
    let in_image = geo.in_h * geo.in_w * c;
    let out_image = geo.out_h * geo.out_w * c;
    let mut out = vec![Elm::NEG_INFINITY; n * out_image];

    out.par_chunks_mut(out_image.max(1))
        .enumerate()
        .for_each(|(b, out_b)| {
            let x_b = &x[b * in_image..(b + 1) * in_image];
            for oy in 0..geo.out_h {
                for ox in 0..geo.out_w {
                    let o_base = (oy * geo.out_w + ox) * c;
                    for_each_window_pixel(geo, oy, ox, |px| {
                        for ci in 0..c {
                            let v = x_b[px * c + ci];
                            if v > out_b[o_base + ci] {
                                out_b[o_base + ci] = v;
                            }
                        }
                    });
                }
            }
        });
    out
}

/// Routes each output gradient to the first maximal input of its window.
pub fn max_pool2d_grad(
    x: &[Elm],
    gy: &[Elm],
    n: usize,
    c: usize,
    geo: &Conv2dGeometry,
) -> Vec<Elm> {
    let in_image = geo.in_h * geo.in_w * c;
    let out_image = geo.out_h * geo.out_w * c;
    let mut gx = vec![0.0; n * in_image];

    gx.par_chunks_mut(in_image.max(1))
        .enumerate()
        .for_each(|(b, gx_b)| {
            let x_b = &x[b * in_image..(b + 1) * in_image];
            let gy_b = &gy[b * out_image..(b + 1) * out_image];
            for oy in 0..geo.out_h {
                for ox in 0..geo.out_w {
                    let o_base = (oy * geo.out_w + ox) * c;
                    for ci in 0..c {
                        let mut best: Option<(usize, Elm)> = None;
                        for_each_window_pixel(geo, oy, ox, |px| {
                            let v = x_b[px * c + ci];
                            if best.map_or(true, |(_, bv)| v > bv) {
                                best = Some((px, v));
                            }
                        });
                        if let Some((px, _)) = best {
                            gx_b[px * c + ci] += gy_b[o_base + ci];
                        }
                    }
                }
            }
        });
    gx
}

/// Average pooling over the in-bounds part of each window.
pub fn avg_pool2d(x: &[Elm], n: usize, c: usize, geo: &Conv2dGeometry) -> Vec<Elm> {
    let in_image = geo.in_h * geo.in_w * c;
    let out_image = geo.out_h * geo.out_w * c;
    let mut out = vec![0.0; n * out_image];

    out.par_chunks_mut(out_image.max(1))
        .enumerate()
        .for_each(|(b, out_b)| {
            let x_b = &x[b * in_image..(b + 1) * in_image];
            for oy in 0..geo.out_h {
                for ox in 0..geo.out_w {
                    let o_base = (oy * geo.out_w + ox) * c;
                    let mut count = 0usize;
                    for_each_window_pixel(geo, oy, ox, |px| {
                        count += 1;
                        for ci in 0..c {
                            out_b[o_base + ci] += x_b[px * c + ci];
                        }
                    });
                    if count > 0 {
                        for v in &mut out_b[o_base..o_base + c] {
                            *v /= count as Elm;
                        }
                    }
                }
            }
        });
    out
}

pub fn avg_pool2d_grad(gy: &[Elm], n: usize, c: usize, geo: &Conv2dGeometry) -> Vec<Elm> {
    let in_image = geo.in_h * geo.in_w * c;
    let out_image = geo.out_h * geo.out_w * c;
    let mut gx = vec![0.0; n * in_image];

    gx.par_chunks_mut(in_image.max(1))
        .enumerate()
        .for_each(|(b, gx_b)| {
            let gy_b = &gy[b * out_image..(b + 1) * out_image];
            for oy in 0..geo.out_h {
                for ox in 0..geo.out_w {
                    let o_base = (oy * geo.out_w + ox) * c;
                    let mut pixels = Vec::with_capacity(geo.kernel_h * geo.kernel_w);
                    for_each_window_pixel(geo, oy, ox, |px| pixels.push(px));
                    if pixels.is_empty() {
                        continue;
                    }
                    let share = 1.0 / pixels.len() as Elm;
                    for px in pixels {
                        for ci in 0..c {
                            gx_b[px * c + ci] += gy_b[o_base + ci] * share;
                        }
                    }
                }
            }
        });
    gx
}

fn for_each_window_pixel(geo: &Conv2dGeometry, oy: usize, ox: usize, mut f: impl FnMut(usize)) {
    for ky in 0..geo.kernel_h {
        let Some(iy) = geo.input_row(oy, ky) else { continue };
        for kx in 0..geo.kernel_w {
            let Some(ix) = geo.input_col(ox, kx) else { continue };
            f(iy * geo.in_w + ix);
        }
    }
}

fn add_into(mut a: Vec<Elm>, b: Vec<Elm>) -> Vec<Elm> {
    for (x, y) in a.iter_mut().zip(b) {
        *x += y;
    }
    a
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::shape::Padding;

    #[test]
    fn conv2d_identity_kernel_copies_input() {
        let geo = Conv2dGeometry::new((2, 2), (1, 1), (1, 1), (1, 1), Padding::Valid);
        let x = vec![1.0, 2.0, 3.0, 4.0];
        let out = conv2d(&x, &[1.0], 1, 1, 1, &geo);
        assert_eq!(out, x);
    }

    #[test]
    fn conv2d_same_padding_sums_neighbourhood() {
        let geo = Conv2dGeometry::new((3, 3), (3, 3), (1, 1), (1, 1), Padding::Same);
        let x = vec![1.0; 9];
        let out = conv2d(&x, &[1.0; 9], 1, 1, 1, &geo);
        assert_eq!(out, vec![4.0, 6.0, 4.0, 6.0, 9.0, 6.0, 4.0, 6.0, 4.0]);
    }

    #[test]
    fn max_pool_picks_window_maximum() {
        let geo = Conv2dGeometry::new((2, 4), (2, 2), (2, 2), (1, 1), Padding::Valid);
        let x = vec![1.0, 5.0, 2.0, 0.0, 3.0, 4.0, 8.0, 1.0];
        assert_eq!(max_pool2d(&x, 1, 1, &geo), vec![5.0, 8.0]);
        let gx = max_pool2d_grad(&x, &[1.0, 2.0], 1, 1, &geo);
        assert_eq!(gx, vec![0.0, 1.0, 0.0, 0.0, 0.0, 0.0, 2.0, 0.0]);
    }

    #[test]
    fn avg_pool_grad_spreads_evenly() {
        let geo = Conv2dGeometry::new((2, 2), (2, 2), (2, 2), (1, 1), Padding::Valid);
        assert_eq!(avg_pool2d(&[1.0, 2.0, 3.0, 6.0], 1, 1, &geo), vec![3.0]);
        assert_eq!(avg_pool2d_grad(&[4.0], 1, 1, &geo), vec![1.0; 4]);
    }
}
