//! Quantized dot products: i8 weights against i8 or i16 activations.
//!
//! Every path computes `sum (w - w_zp) * (x - x_zp)` with wrapping accumulator
//! arithmetic, so the block, scalar and batched forms agree bit for bit even
//! when the accumulator overflows.
use crate::quant::{Accumulate, Activation};

/// Elements folded per block iteration. Purely a throughput knob.
pub const DOT_BLOCK: usize = 16;
/// Operand alignment (bytes) the block path expects; anything else goes scalar.
pub const DOT_ALIGN: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ZeroPoints {
    pub weight: i32,
    pub input: i32,
}

impl ZeroPoints {
    pub const fn new(weight: i32, input: i32) -> Self { Self { weight, input } }
}

#[inline]
pub fn is_block_aligned<T>(s: &[T]) -> bool { (s.as_ptr() as usize) % DOT_ALIGN == 0 }

/// Element-at-a-time reference path.
#[inline]
pub fn dot_scalar<X: Activation>(w: &[i8], x: &[X], zp: ZeroPoints) -> X::Acc {
    let mut acc = X::Acc::ZERO;
    for (&wi, &xi) in w.iter().zip(x) {
        acc = acc.mul_add(wi as i32 - zp.weight, xi.to_i32() - zp.input);
    }
    acc
}

/// Block path: raw products plus operand sums per block, zero points folded in
/// once at the end.
pub fn dot_blocked<X: Activation>(w: &[i8], x: &[X], zp: ZeroPoints) -> X::Acc {
    let n = w.len().min(x.len());
    let (w, x) = (&w[..n], &x[..n]);
    let mut prod = X::Acc::ZERO;
    let mut sum_w = X::Acc::ZERO;
    let mut sum_x = X::Acc::ZERO;
    let wb = w.chunks_exact(DOT_BLOCK);
    let xb = x.chunks_exact(DOT_BLOCK);
    let (w_tail, x_tail) = (wb.remainder(), xb.remainder());
    for (wc, xc) in wb.zip(xb) {
        let mut p = X::Acc::ZERO;
        let mut sw = 0i32;
        let mut sx = X::Acc::ZERO;
        for i in 0..DOT_BLOCK {
            let (a, b) = (wc[i] as i32, xc[i].to_i32());
            p = p.mul_add(a, b);
            sw += a;
            sx = sx.wrapping_add(X::Acc::from_i32(b));
        }
        prod = prod.wrapping_add(p);
        sum_w = sum_w.wrapping_add(X::Acc::from_i32(sw));
        sum_x = sum_x.wrapping_add(sx);
    }
    // (w - a)(x - b) = wx - b*w - a*x + a*b
    let corrected = prod
        .wrapping_sub(sum_w.scale_by(zp.input))
        .wrapping_sub(sum_x.scale_by(zp.weight))
        .wrapping_add(X::Acc::from_i32((n - w_tail.len()) as i32).scale_by(zp.weight).scale_by(zp.input));
    corrected.wrapping_add(dot_scalar(w_tail, x_tail, zp))
}

/// Pick the block path for aligned operands, the scalar path otherwise.
#[inline]
pub fn dot<X: Activation>(w: &[i8], x: &[X], zp: ZeroPoints) -> X::Acc {
    if is_block_aligned(x) && w.len() >= DOT_BLOCK {
        dot_blocked(w, x, zp)
    } else {
        dot_scalar(w, x, zp)
    }
}

/// Accumulate `rows` weight rows (each `x.len()` long, `row_stride` apart)
/// against one operand into `acc[r]`.
pub fn dot_rows_accumulate<X: Activation>(weights: &[i8], rows: usize, row_stride: usize, x: &[X], zp: ZeroPoints, acc: &mut [X::Acc]) {
    let len = x.len();
    let mut r = 0;
    while r + 2 <= rows {
        let w0 = &weights[r * row_stride..r * row_stride + len];
        let w1 = &weights[(r + 1) * row_stride..(r + 1) * row_stride + len];
        let (a0, a1) = dot_2x1(w0, w1, x, zp);
        acc[r] = acc[r].wrapping_add(a0);
        acc[r + 1] = acc[r + 1].wrapping_add(a1);
        r += 2;
    }
    if r < rows {
        acc[r] = acc[r].wrapping_add(dot(&weights[r * row_stride..r * row_stride + len], x, zp));
    }
}

#[inline]
fn dot_2x1<X: Activation>(w0: &[i8], w1: &[i8], x: &[X], zp: ZeroPoints) -> (X::Acc, X::Acc) {
    let (mut a0, mut a1) = (X::Acc::ZERO, X::Acc::ZERO);
    for i in 0..x.len() {
        let xv = x[i].to_i32() - zp.input;
        a0 = a0.mul_add(w0[i] as i32 - zp.weight, xv);
        a1 = a1.mul_add(w1[i] as i32 - zp.weight, xv);
    }
    (a0, a1)
}

#[inline]
fn dot_2x2<X: Activation>(w0: &[i8], w1: &[i8], x0: &[X], x1: &[X], zp: ZeroPoints) -> [X::Acc; 4] {
    let mut a = [X::Acc::ZERO; 4];
    for i in 0..x0.len() {
        let (p, q) = (w0[i] as i32 - zp.weight, w1[i] as i32 - zp.weight);
        let (u, v) = (x0[i].to_i32() - zp.input, x1[i].to_i32() - zp.input);
        a[0] = a[0].mul_add(p, u);
        a[1] = a[1].mul_add(q, u);
        a[2] = a[2].mul_add(p, v);
        a[3] = a[3].mul_add(q, v);
    }
    a
}

/// `rows` weight rows times `vector_count` operand vectors, `len` elements
/// each. Writes `out[v * rows + r]`. Works in 2x2 tiles with single-row and
/// single-vector remainders.
#[allow(clippy::too_many_arguments)]
pub fn dot_batched<X: Activation>(
    weights: &[i8],
    rows: usize,
    row_stride: usize,
    vectors: &[X],
    vector_count: usize,
    vector_stride: usize,
    len: usize,
    zp: ZeroPoints,
    out: &mut [X::Acc],
) {
    let row = |r: usize| &weights[r * row_stride..r * row_stride + len];
    let vec_at = |v: usize| &vectors[v * vector_stride..v * vector_stride + len];
    let mut v = 0;
    while v + 2 <= vector_count {
        let (x0, x1) = (vec_at(v), vec_at(v + 1));
        let mut r = 0;
        while r + 2 <= rows {
            let a = dot_2x2(row(r), row(r + 1), x0, x1, zp);
            out[v * rows + r] = a[0];
            out[v * rows + r + 1] = a[1];
            out[(v + 1) * rows + r] = a[2];
            out[(v + 1) * rows + r + 1] = a[3];
            r += 2;
        }
        if r < rows {
            out[v * rows + r] = dot(row(r), x0, zp);
            out[(v + 1) * rows + r] = dot(row(r), x1, zp);
        }
        v += 2;
    }
    if v < vector_count {
        let slot = &mut out[v * rows..(v + 1) * rows];
        slot.fill(X::Acc::ZERO);
        dot_rows_accumulate(weights, rows, row_stride, vec_at(v), zp, slot);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scalar_matches_hand_computation() {
        let w = [1i8, -2, 3];
        let x = [4i8, 5, -6];
        // (1-1)(4+1) + (-2-1)(5+1) + (3-1)(-6+1) = 0 - 18 - 10
        assert_eq!(dot_scalar(&w, &x, ZeroPoints::new(1, -1)), -28);
    }

    #[test]
    fn blocked_matches_scalar_with_tail() {
        let w: Vec<i8> = (0..37).map(|i| ((i * 7) % 23 - 11) as i8).collect();
        let x: Vec<i16> = (0..37).map(|i| ((i * 131) % 2001 - 1000) as i16).collect();
        let zp = ZeroPoints::new(3, -17);
        assert_eq!(dot_blocked(&w, &x, zp), dot_scalar(&w, &x, zp));
    }

    #[test]
    fn wrapping_overflow_is_path_independent() {
        let w = vec![-128i8; 40_000];
        let x = vec![-128i8; 40_000];
        let zp = ZeroPoints::new(127, 127);
        // 40000 * 255^2 overflows i32; both paths must wrap identically.
        assert_eq!(dot_blocked(&w, &x, zp), dot_scalar(&w, &x, zp));
    }
}
