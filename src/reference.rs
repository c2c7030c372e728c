//! Naive reference implementations. Everything here materializes full tensors
//! and accumulates exactly in i64 / f64; the streaming kernels are checked
//! against it by the tests, the benches and `qkern-sweep`.
use crate::kernels::conv::{ConvGeometry, ConvQuant};
use crate::kernels::matmul::MatmulDims;
use crate::kernels::reduce::ReduceKind;
use crate::quant::{Activation, QuantParams};
use crate::ring::planner::RingLayout;
use crate::shape::TensorShape;

/// Exact conv accumulators, `[N, OH, OW, C_out]`, bias included. Padding cells
/// hold the input zero point and so contribute nothing.
pub fn conv2d_accumulators<X: Activation>(input: &[X], geom: &ConvGeometry, weights: &[i8], bias: Option<&[i64]>, quant: &ConvQuant<'_>) -> Vec<i64> {
    let (h, w, c) = (geom.input.height(), geom.input.width(), geom.input.channels());
    let k = &geom.kernel;
    let p = &geom.params;
    let mut out = Vec::with_capacity(geom.input.batch() * geom.output_image_len());
    for n in 0..geom.input.batch() {
        for oy in 0..geom.output_h {
            for ox in 0..geom.output_w {
                for co in 0..k.out_channels {
                    let mut acc = bias.map_or(0, |b| b[co]);
                    for ky in 0..k.height {
                        let y = (oy * p.stride_h + ky * p.dilation_h) as isize - p.pad_top as isize;
                        if y < 0 || y >= h as isize { continue; }
                        for kx in 0..k.width {
                            let x = (ox * p.stride_w + kx * p.dilation_w) as isize - p.pad_left as isize;
                            if x < 0 || x >= w as isize { continue; }
                            let base = ((n * h + y as usize) * w + x as usize) * c;
                            let wbase = ((co * k.height + ky) * k.width + kx) * c;
                            for ci in 0..c {
                                let a = (weights[wbase + ci] as i32 - quant.weight_zero_point) as i64;
                                let b = (input[base + ci].to_i32() - quant.input_zero_point) as i64;
                                acc += a * b;
                            }
                        }
                    }
                    out.push(acc);
                }
            }
        }
    }
    out
}

/// Exact matmul accumulators, `out[v * rows + r]`.
pub fn matmul_accumulators<X: Activation>(weights: &[i8], vectors: &[X], bias: Option<&[i64]>, dims: &MatmulDims, weight_zero_point: i32, input_zero_point: i32) -> Vec<i64> {
    let mut out = Vec::with_capacity(dims.rows * dims.vector_count);
    for v in 0..dims.vector_count {
        for r in 0..dims.rows {
            let mut acc = bias.map_or(0, |b| b[r]);
            for c in 0..dims.cols {
                let a = (weights[r * dims.row_stride + c] as i32 - weight_zero_point) as i64;
                let b = (vectors[v * dims.vector_stride + c].to_i32() - input_zero_point) as i64;
                acc += a * b;
            }
            out.push(acc);
        }
    }
    out
}

/// Requantize in floating point: `round(acc * scale) + zp`, ties away from
/// zero, clamped to `[min, max]`. Agrees with the fixed-point path to within one.
pub fn requantize_f64(acc: i64, out: &QuantParams, min: i32, max: i32) -> i32 {
    let v = (acc as f64 * out.scale()).round() as i64 + out.zero_point as i64;
    v.clamp(min as i64, max as i64) as i32
}

/// Reduce in floating point. Output keeps the input rank with reduced axes at
/// extent one. Mean results are `round(mean(x - in_zp) * out_scale) + out_zp`.
pub fn reduce_reference<X: Activation>(input: &[X], shape: &TensorShape, axes: &[usize], kind: ReduceKind, input_zero_point: i32, out: &QuantParams) -> Vec<i32> {
    let dims = shape.dims();
    let promoted: Vec<usize> = axes.iter().map(|&a| shape.promote_axis(a)).collect();
    let mut out_dims = dims;
    for &a in &promoted { out_dims[a] = 1; }
    let out_len: usize = out_dims.iter().product();
    let mut max = vec![i32::MIN; out_len];
    let mut sum = vec![0i64; out_len];
    let mut count = vec![0usize; out_len];
    for (i, &x) in input.iter().enumerate() {
        let mut rem = i;
        let mut idx = [0usize; 4];
        for d in (0..4).rev() {
            idx[d] = rem % dims[d];
            rem /= dims[d];
        }
        let mut o = 0;
        for d in 0..4 {
            let id = if promoted.contains(&d) { 0 } else { idx[d] };
            o = o * out_dims[d] + id;
        }
        max[o] = max[o].max(x.to_i32());
        sum[o] += (x.to_i32() - input_zero_point) as i64;
        count[o] += 1;
    }
    (0..out_len)
        .map(|o| match kind {
            ReduceKind::Max => max[o],
            ReduceKind::Mean => {
                let mean = sum[o] as f64 / count[o] as f64;
                let v = (mean * out.scale()).round() as i64 + out.zero_point as i64;
                v.clamp(X::MIN as i64, X::MAX as i64) as i32
            }
        })
        .collect()
}

/// The padded columns the window for output column `position` covers, laid out
/// exactly like the ring: one plane per tap, oldest tap first.
pub fn padded_window<X: Activation>(image: &[X], layout: &RingLayout, position: usize, pad: X) -> Vec<X> {
    let (top, left) = (layout.plan.top as isize, layout.plan.left as isize);
    let c = layout.channels;
    let mut out = Vec::with_capacity(layout.ring_len());
    for tap in 0..layout.kernel_w {
        let x = layout.tap_column(position, tap) as isize - left;
        for r in 0..layout.padded_height() {
            let y = r as isize - top;
            let inside = y >= 0 && y < layout.height as isize && x >= 0 && x < layout.width as isize;
            for ci in 0..c {
                out.push(if inside { image[(y as usize * layout.width + x as usize) * c + ci] } else { pad });
            }
        }
    }
    out
}
