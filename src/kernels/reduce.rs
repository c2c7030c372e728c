//! Max / mean reduction over an axis set of a rank <= 4 tensor.
//!
//! Axes fold one at a time through an accumulator slab. The first fold reads
//! the input and writes the slab; every later fold runs in place on the slab,
//! which only shrinks. Folding the largest axis first therefore bounds the slab
//! at `input_len / largest_extent` elements.
use super::elementwise::requantize_slice;
use crate::error::{ensure_exact, ensure_len, KernelError, Result};
use crate::quant::requant::{quantize_multiplier, Requantizer};
use crate::quant::{validate_zero_point, Accumulate, Activation, ActivationRange, QuantParams, RoundingMode};
use crate::shape::{AxisSet, TensorShape};
use log::debug;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReduceKind {
    Max,
    Mean,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FoldOrder {
    /// Largest requested extent first, the rest in the order given.
    #[default]
    LargestFirst,
    AsGiven,
}

impl FoldOrder {
    fn arrange(self, axes: &AxisSet, dims: &[usize; 4]) -> AxisSet {
        match self {
            FoldOrder::LargestFirst => axes.largest_first(dims),
            FoldOrder::AsGiven => *axes,
        }
    }

    /// Slab elements needed to reduce `shape` over `axes` in this order.
    pub fn scratch_len(self, shape: &TensorShape, axes: &AxisSet) -> usize {
        let dims = shape.dims();
        let order = self.arrange(&axes.promoted(shape), &dims);
        match order.as_slice().first() {
            Some(&a) => shape.len() / dims[a],
            None => 0,
        }
    }
}

/// Quantization of a reduction. The output multiplier/shift is the
/// input-to-output scale ratio; mean folds `1 / count` into it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReduceQuant {
    pub input_zero_point: i32,
    pub output: QuantParams,
    pub rounding: RoundingMode,
}

impl ReduceQuant {
    /// Output quantized exactly like the input.
    pub fn same(zero_point: i32) -> Self {
        Self { input_zero_point: zero_point, output: QuantParams::identity(zero_point), rounding: RoundingMode::default() }
    }
}

pub fn reduce_scratch_len(shape: &TensorShape, axes: &AxisSet) -> usize {
    FoldOrder::LargestFirst.scratch_len(shape, axes)
}

#[allow(clippy::too_many_arguments)]
pub fn reduce<X: Activation>(
    output: &mut [X],
    output_shape: &TensorShape,
    input: &[X],
    input_shape: &TensorShape,
    axes: &[usize],
    kind: ReduceKind,
    quant: &ReduceQuant,
    scratch: &mut [X::Acc],
) -> Result<()> {
    reduce_with_order(output, output_shape, input, input_shape, axes, kind, quant, scratch, FoldOrder::default())
}

struct Plan {
    order: AxisSet,
    count: usize,
    count_i32: i32,
    out_len: usize,
}

#[allow(clippy::too_many_arguments)]
fn validate<X: Activation>(
    output: &[X],
    output_shape: &TensorShape,
    input: &[X],
    input_shape: &TensorShape,
    axes: &[usize],
    quant: &ReduceQuant,
    scratch: &[X::Acc],
    fold: FoldOrder,
) -> Result<Plan> {
    let set = AxisSet::new(axes, input_shape.rank())?;
    let dims = input_shape.dims();
    let order = fold.arrange(&set.promoted(input_shape), &dims);
    let count: usize = order.as_slice().iter().map(|&a| dims[a]).product();
    let count_i32 = i32::try_from(count).map_err(|_| KernelError::CountOutOfRange(count))?;
    ensure_exact("input", input_shape.len(), input.len())?;
    validate_zero_point::<X>(quant.input_zero_point)?;
    quant.output.validate_for::<X>()?;
    let out_len = input_shape.len() / count;
    ensure_exact("output shape", out_len, output_shape.len())?;
    ensure_len("output", out_len, output.len())?;
    ensure_len("reduction scratch", fold.scratch_len(input_shape, &set), scratch.len())?;
    Ok(Plan { order, count, count_i32, out_len })
}

/// Reduce with an explicit fold order. Results do not depend on the order;
/// only the scratch requirement does.
#[allow(clippy::too_many_arguments)]
pub fn reduce_with_order<X: Activation>(
    output: &mut [X],
    output_shape: &TensorShape,
    input: &[X],
    input_shape: &TensorShape,
    axes: &[usize],
    kind: ReduceKind,
    quant: &ReduceQuant,
    scratch: &mut [X::Acc],
    fold: FoldOrder,
) -> Result<()> {
    let checked = validate(output, output_shape, input, input_shape, axes, quant, scratch, fold);
    let plan = super::logged("reduce", checked)?;
    let out = &mut output[..plan.out_len];
    if plan.order.is_empty() {
        out.copy_from_slice(input);
        return Ok(());
    }
    if plan.count == 1 {
        return requantize_slice(out, input, quant.input_zero_point, &quant.output, quant.rounding, ActivationRange::full::<X>());
    }
    debug!("reduce {:?} {:?} over {:?}: {} elements per output", kind, input_shape.dims(), plan.order.as_slice(), plan.count);

    let mut dims = input_shape.dims();
    let mut live = 0;
    for (i, &axis) in plan.order.as_slice().iter().enumerate() {
        live = if i == 0 {
            fold_axis(kind, &dims, axis, |j| X::Acc::from_i32(input[j].to_i32()), scratch)
        } else {
            fold_axis_in_place(kind, &dims, axis, scratch)
        };
        dims[axis] = 1;
    }
    debug_assert_eq!(live, plan.out_len);

    let slab = &scratch[..plan.out_len];
    match kind {
        ReduceKind::Max => {
            let rq = Requantizer::new::<X>(&quant.output, quant.rounding, ActivationRange::full::<X>())?;
            for (o, &m) in out.iter_mut().zip(slab) {
                *o = rq.rescale::<X, X>(X::saturate(m.to_i64()), quant.input_zero_point);
            }
        }
        ReduceKind::Mean => {
            let (multiplier, shift) = quantize_multiplier(quant.output.scale() / plan.count as f64)?;
            let mean_q = QuantParams::new(quant.output.zero_point, multiplier, shift);
            let rq = Requantizer::new::<X>(&mean_q, quant.rounding, ActivationRange::full::<X>())?;
            let offset = X::Acc::from_i32(quant.input_zero_point).scale_by(plan.count_i32);
            for (o, &s) in out.iter_mut().zip(slab) {
                *o = rq.apply::<X::Acc, X>(s.wrapping_sub(offset));
            }
        }
    }
    Ok(())
}

#[inline]
fn combine<A: Accumulate>(kind: ReduceKind, acc: A, v: A) -> A {
    match kind {
        ReduceKind::Max => acc.max(v),
        ReduceKind::Mean => acc.wrapping_add(v),
    }
}

fn seed<A: Accumulate>(kind: ReduceKind) -> A {
    match kind {
        ReduceKind::Max => A::MIN,
        ReduceKind::Mean => A::ZERO,
    }
}

/// `(outer, extent, inner)` split of `dims` around `axis`.
fn split(dims: &[usize; 4], axis: usize) -> (usize, usize, usize) {
    let outer = dims[..axis].iter().product();
    let inner = dims[axis + 1..].iter().product();
    (outer, dims[axis], inner)
}

/// Fold `axis` of a dense tensor read through `src` into `dst`. Returns the
/// number of elements written.
fn fold_axis<A, F>(kind: ReduceKind, dims: &[usize; 4], axis: usize, src: F, dst: &mut [A]) -> usize
where
    A: Accumulate,
    F: Fn(usize) -> A,
{
    let (outer, n, inner) = split(dims, axis);
    for o in 0..outer {
        for i in 0..inner {
            let mut acc = seed(kind);
            for k in 0..n {
                acc = combine(kind, acc, src((o * n + k) * inner + i));
            }
            dst[o * inner + i] = acc;
        }
    }
    outer * inner
}

/// Same fold, reading and writing the slab. Writes land at or before every
/// position still to be read, so a single forward pass is safe.
fn fold_axis_in_place<A: Accumulate>(kind: ReduceKind, dims: &[usize; 4], axis: usize, slab: &mut [A]) -> usize {
    let (outer, n, inner) = split(dims, axis);
    for o in 0..outer {
        for i in 0..inner {
            let mut acc = seed(kind);
            for k in 0..n {
                acc = combine(kind, acc, slab[(o * n + k) * inner + i]);
            }
            slab[o * inner + i] = acc;
        }
    }
    outer * inner
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scratch_uses_largest_axis() {
        let s = TensorShape::nhwc(2, 3, 5, 4).unwrap();
        let axes = AxisSet::new(&[1, 2], 4).unwrap();
        assert_eq!(reduce_scratch_len(&s, &axes), 120 / 5);
        assert_eq!(FoldOrder::AsGiven.scratch_len(&s, &axes), 120 / 3);
        assert_eq!(reduce_scratch_len(&s, &AxisSet::empty()), 0);
    }

    #[test]
    fn max_over_rows() {
        let shape = TensorShape::new(&[2, 3]).unwrap();
        let input = [1i8, -7, 3, 4, 5, -6];
        let out_shape = TensorShape::new(&[1, 3]).unwrap();
        let mut out = [0i8; 3];
        let mut scratch = vec![0i32; 3];
        reduce(&mut out, &out_shape, &input, &shape, &[0], ReduceKind::Max, &ReduceQuant::same(0), &mut scratch).unwrap();
        assert_eq!(out, [4, 5, 3]);
    }

    #[test]
    fn mean_subtracts_zero_point() {
        let shape = TensorShape::new(&[4]).unwrap();
        let input = [12i8, 14, 16, 18];
        let out_shape = TensorShape::new(&[1]).unwrap();
        let mut out = [0i8; 1];
        let mut scratch = vec![0i32; 1];
        // zero point 10: real values 2, 4, 6, 8 -> mean 5 -> q 15
        reduce(&mut out, &out_shape, &input, &shape, &[0], ReduceKind::Mean, &ReduceQuant::same(10), &mut scratch).unwrap();
        assert_eq!(out, [15]);
    }

    #[test]
    fn rejects_counts_beyond_i32() {
        let shape = TensorShape::new(&[1 << 16, 1 << 16]).unwrap();
        let out_shape = TensorShape::new(&[1, 1]).unwrap();
        let mut out = [0i8; 1];
        let r = reduce(&mut out, &out_shape, &[], &shape, &[0, 1], ReduceKind::Mean, &ReduceQuant::same(0), &mut []);
        assert_eq!(r, Err(KernelError::CountOutOfRange(1 << 32)));
        assert_eq!(r.unwrap_err().status_code(), -9);
    }

    #[test]
    fn in_place_fold_matches_direct() {
        let dims = [1, 2, 3, 2];
        let mut slab: Vec<i32> = (0..12).collect();
        let n = fold_axis_in_place(ReduceKind::Mean, &dims, 2, &mut slab);
        assert_eq!(n, 4);
        // [r][w][c]: r0c0 0+2+4, r0c1 1+3+5, r1c0 6+8+10, r1c1 7+9+11
        assert_eq!(&slab[..4], &[6, 9, 24, 27]);
    }
}
