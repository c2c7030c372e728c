//! Elementwise kernels: requantizing copy and quantized comparisons.
use crate::error::{ensure_exact, KernelError, Result};
use crate::quant::requant::{multiply_by_quantized_multiplier, quantize_multiplier, Requantizer};
use crate::quant::{validate_zero_point, Activation, ActivationRange, QuantParams, RoundingMode};
use log::trace;
use serde::{Deserialize, Serialize};

/// `output[i] = requant(input[i] - input_zero_point)`. When both sides share a
/// quantization the multiply is skipped and values are copied (then clamped).
pub fn requantize_slice<X: Activation, Y: Activation>(
    output: &mut [Y],
    input: &[X],
    input_zero_point: i32,
    out: &QuantParams,
    rounding: RoundingMode,
    activation: ActivationRange,
) -> Result<()> {
    let checked = (|| {
        ensure_exact("output", input.len(), output.len())?;
        validate_zero_point::<X>(input_zero_point)?;
        Requantizer::new::<Y>(out, rounding, activation)
    })();
    let rq = super::logged("requantize_slice", checked)?;
    if rq.is_passthrough(input_zero_point) {
        trace!("requantize_slice: {} elements, copy path", input.len());
        let (lo, hi) = rq.clamp_range();
        for (o, &x) in output.iter_mut().zip(input) {
            *o = Y::saturate(x.to_i32().clamp(lo, hi) as i64);
        }
    } else {
        for (o, &x) in output.iter_mut().zip(input) {
            *o = rq.rescale::<X, Y>(x, input_zero_point);
        }
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Comparison {
    Equal,
    NotEqual,
    Greater,
    GreaterEqual,
    Less,
    LessEqual,
}

impl Comparison {
    #[inline]
    pub fn holds(self, a: i64, b: i64) -> bool {
        match self {
            Comparison::Equal => a == b,
            Comparison::NotEqual => a != b,
            Comparison::Greater => a > b,
            Comparison::GreaterEqual => a >= b,
            Comparison::Less => a < b,
            Comparison::LessEqual => a <= b,
        }
    }
}

pub const DEFAULT_COMPARE_LEFT_SHIFT: u32 = 8;

/// Both operands' quantizations. Each side's multiplier/shift maps it onto a
/// common scale after the values are shifted left by `left_shift`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompareQuant {
    pub lhs: QuantParams,
    pub rhs: QuantParams,
    pub left_shift: u32,
    pub rounding: RoundingMode,
}

impl CompareQuant {
    /// Operands that share one quantization; compared raw.
    pub fn shared(zero_point: i32) -> Self {
        let q = QuantParams::identity(zero_point);
        Self { lhs: q, rhs: q, left_shift: DEFAULT_COMPARE_LEFT_SHIFT, rounding: RoundingMode::default() }
    }

    /// Derive the per-side multipliers from real scales: each side is mapped
    /// onto twice the larger scale.
    pub fn from_scales(lhs_scale: f64, lhs_zero_point: i32, rhs_scale: f64, rhs_zero_point: i32) -> Result<Self> {
        let twice_max = 2.0 * lhs_scale.max(rhs_scale);
        if twice_max.is_nan() || twice_max <= 0.0 { return Err(KernelError::ScaleOutOfRange(twice_max)); }
        let (lm, ls) = quantize_multiplier(lhs_scale / twice_max)?;
        let (rm, rs) = quantize_multiplier(rhs_scale / twice_max)?;
        Ok(Self {
            lhs: QuantParams::new(lhs_zero_point, lm, ls),
            rhs: QuantParams::new(rhs_zero_point, rm, rs),
            left_shift: DEFAULT_COMPARE_LEFT_SHIFT,
            rounding: RoundingMode::default(),
        })
    }

    #[inline]
    fn scaled(&self, q: &QuantParams, v: i32) -> i64 {
        let shifted = ((v - q.zero_point) as i64) << self.left_shift;
        multiply_by_quantized_multiplier(shifted, q.multiplier, q.shift, self.rounding)
    }
}

/// `out[i] = op(lhs[i], rhs[i])` on the real values the operands encode.
pub fn compare<X: Activation>(op: Comparison, lhs: &[X], rhs: &[X], quant: &CompareQuant, out: &mut [bool]) -> Result<()> {
    let checked = (|| {
        ensure_exact("rhs", lhs.len(), rhs.len())?;
        ensure_exact("output", lhs.len(), out.len())?;
        quant.lhs.validate_for::<X>()?;
        quant.rhs.validate_for::<X>()?;
        if quant.left_shift > 31 { return Err(KernelError::ShiftOutOfRange(quant.left_shift as i32)); }
        Ok(())
    })();
    super::logged("compare", checked)?;
    if quant.lhs == quant.rhs {
        for ((o, &a), &b) in out.iter_mut().zip(lhs).zip(rhs) {
            *o = op.holds(a.to_i32() as i64, b.to_i32() as i64);
        }
        return Ok(());
    }
    for ((o, &a), &b) in out.iter_mut().zip(lhs).zip(rhs) {
        *o = op.holds(quant.scaled(&quant.lhs, a.to_i32()), quant.scaled(&quant.rhs, b.to_i32()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn passthrough_copies_and_clamps() {
        let input = [-100i8, 0, 50, 127];
        let mut out = [0i8; 4];
        let relu = ActivationRange { min: 0, max: 127 };
        requantize_slice(&mut out, &input, 3, &QuantParams::identity(3), RoundingMode::Double, relu).unwrap();
        assert_eq!(out, [0, 0, 50, 127]);
    }

    #[test]
    fn widening_rescale() {
        // i8 around zp 0 into i16 with a 4x rescale and zp 10
        let input = [-3i8, 0, 5];
        let mut out = [0i16; 3];
        let q = QuantParams::from_scale(4.0, 10).unwrap();
        requantize_slice(&mut out, &input, 0, &q, RoundingMode::Single, ActivationRange::full::<i16>()).unwrap();
        assert_eq!(out, [-2, 10, 30]);
    }

    #[test]
    fn compares_across_scales() {
        // lhs scale 0.5 zp 0, rhs scale 1.0 zp 2
        let q = CompareQuant::from_scales(0.5, 0, 1.0, 2).unwrap();
        let lhs = [4i8, 4, 4];
        let rhs = [3i8, 4, 5]; // reals 1, 2, 3 vs lhs real 2
        let mut out = [false; 3];
        compare(Comparison::Greater, &lhs, &rhs, &q, &mut out).unwrap();
        assert_eq!(out, [true, false, false]);
        compare(Comparison::Equal, &lhs, &rhs, &q, &mut out).unwrap();
        assert_eq!(out, [false, true, false]);
    }
}
