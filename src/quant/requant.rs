//! Fixed-point requantization: accumulator -> multiplier/shift rescale -> zero
//! point -> saturate.
use super::{Accumulate, Activation, ActivationRange, QuantParams, RoundingMode};
use crate::error::{KernelError, Result};

/// `round(a * b / 2^31)` with ties away from zero, saturating the single
/// overflow case `i32::MIN * i32::MIN`.
#[inline]
pub fn saturating_rounding_doubling_high_mul(a: i32, b: i32) -> i32 {
    if a == i32::MIN && b == i32::MIN { return i32::MAX; }
    let ab = a as i64 * b as i64;
    let q = (ab.abs() + (1 << 30)) >> 31;
    (if ab < 0 { -q } else { q }) as i32
}

/// 64-bit operand variant of [`saturating_rounding_doubling_high_mul`].
#[inline]
pub fn saturating_rounding_doubling_high_mul_i64(a: i64, b: i32) -> i64 {
    let ab = a as i128 * b as i128;
    let q = (ab.abs() + (1 << 30)) >> 31;
    (if ab < 0 { -q } else { q }).clamp(i64::MIN as i128, i64::MAX as i128) as i64
}

/// Arithmetic right shift rounding to nearest, ties away from zero.
#[inline]
pub fn rounding_divide_by_pot(x: i64, exponent: u32) -> i64 {
    if exponent == 0 { return x; }
    let mask = (1i64 << exponent) - 1;
    let remainder = x & mask;
    let threshold = (mask >> 1) + (x < 0) as i64;
    (x >> exponent) + (remainder > threshold) as i64
}

/// Arithmetic right shift rounding to nearest, ties to even.
#[inline]
pub fn round_half_even_shift(x: i128, exponent: u32) -> i128 {
    if exponent == 0 { return x; }
    let floor = x >> exponent;
    let remainder = x - (floor << exponent);
    let half = 1i128 << (exponent - 1);
    if remainder > half || (remainder == half && floor & 1 == 1) { floor + 1 } else { floor }
}

#[inline]
fn saturating_shl_i32(x: i32, n: u32) -> i32 {
    ((x as i64) << n).clamp(i32::MIN as i64, i32::MAX as i64) as i32
}

#[inline]
fn saturating_shl_i64(x: i64, n: u32) -> i64 {
    ((x as i128) << n).clamp(i64::MIN as i128, i64::MAX as i128) as i64
}

/// Largest shift magnitude; shifts outside `[-MAX_SHIFT, MAX_SHIFT]` are clamped.
pub const MAX_SHIFT: i32 = 31;

/// Multiply `x` by `multiplier * 2^(shift - 31)` in 64-bit arithmetic.
pub fn multiply_by_quantized_multiplier(x: i64, multiplier: i32, shift: i32, mode: RoundingMode) -> i64 {
    let shift = shift.clamp(-MAX_SHIFT, MAX_SHIFT);
    match mode {
        RoundingMode::Double => {
            let left = shift.max(0) as u32;
            let right = (-shift).max(0) as u32;
            let high = saturating_rounding_doubling_high_mul_i64(saturating_shl_i64(x, left), multiplier);
            rounding_divide_by_pot(high, right)
        }
        RoundingMode::Single => single_rounding(x, multiplier, shift),
    }
}

#[inline]
fn single_rounding(x: i64, multiplier: i32, shift: i32) -> i64 {
    let total = (31 - shift) as u32;
    let prod = x as i128 * multiplier as i128;
    round_half_even_shift(prod, total).clamp(i64::MIN as i128, i64::MAX as i128) as i64
}

/// Rescale an accumulator; 32-bit accumulators take the 32-bit saturating path
/// in the double-rounding regime.
#[inline]
pub fn scale_accumulator<A: Accumulate>(acc: A, multiplier: i32, shift: i32, mode: RoundingMode) -> i64 {
    let shift = shift.clamp(-MAX_SHIFT, MAX_SHIFT);
    if A::BITS == 32 && mode == RoundingMode::Double {
        let left = shift.max(0) as u32;
        let right = (-shift).max(0) as u32;
        let x = acc.to_i64() as i32;
        let high = saturating_rounding_doubling_high_mul(saturating_shl_i32(x, left), multiplier);
        return rounding_divide_by_pot(high as i64, right);
    }
    multiply_by_quantized_multiplier(acc.to_i64(), multiplier, shift, mode)
}

/// Encode a non-negative real scale as `(multiplier, shift)` with the
/// multiplier in `[2^30, 2^31)`. Scales too small to represent collapse to zero.
pub fn quantize_multiplier(real: f64) -> Result<(i32, i32)> {
    if !real.is_finite() || real < 0.0 { return Err(KernelError::ScaleOutOfRange(real)); }
    if real == 0.0 { return Ok((0, 0)); }
    let mut shift = real.log2().floor() as i32 + 1;
    let mut q = real / 2f64.powi(shift);
    while q >= 1.0 { q /= 2.0; shift += 1; }
    while q < 0.5 { q *= 2.0; shift -= 1; }
    let mut m = (q * (1i64 << 31) as f64).round() as i64;
    if m == 1i64 << 31 {
        m /= 2;
        shift += 1;
    }
    if shift < -31 { return Ok((0, 0)); }
    if shift > 31 { return Err(KernelError::ScaleOutOfRange(real)); }
    Ok((m as i32, shift))
}

pub fn dequantize_multiplier(multiplier: i32, shift: i32) -> f64 {
    multiplier as f64 * 2f64.powi(shift - 31)
}

/// Scalar requantization: rescale, add the output zero point and
/// saturate to the full range of `X`. Unvalidated shifts are clamped to
/// `[-31, 31]`.
pub fn requantize<X: Activation>(acc: X::Acc, multiplier: i32, shift: i32, mode: RoundingMode, out_zero_point: i32) -> X {
    let v = scale_accumulator(acc, multiplier, shift, mode);
    X::saturate(v.saturating_add(out_zero_point as i64))
}

/// A validated output quantization, ready to apply to accumulators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Requantizer {
    pub multiplier: i32,
    pub shift: i32,
    pub zero_point: i32,
    pub rounding: RoundingMode,
    min: i32,
    max: i32,
}

impl Requantizer {
    pub fn new<Y: Activation>(out: &QuantParams, rounding: RoundingMode, act: ActivationRange) -> Result<Self> {
        out.validate_for::<Y>()?;
        let (min, max) = act.resolve::<Y>()?;
        Ok(Self { multiplier: out.multiplier, shift: out.shift, zero_point: out.zero_point, rounding, min, max })
    }

    /// Same output, different channel scale.
    pub fn with_scale(mut self, multiplier: i32, shift: i32) -> Self {
        self.multiplier = multiplier;
        self.shift = shift;
        self
    }

    pub fn clamp_range(&self) -> (i32, i32) { (self.min, self.max) }

    /// True when rescaling values quantized around `in_zero_point` is a plain copy.
    pub fn is_passthrough(&self, in_zero_point: i32) -> bool {
        in_zero_point == self.zero_point
            && self.multiplier == super::IDENTITY_MULTIPLIER
            && self.shift == super::IDENTITY_SHIFT
    }

    #[inline]
    pub fn apply<A: Accumulate, Y: Activation>(&self, acc: A) -> Y {
        let v = scale_accumulator(acc, self.multiplier, self.shift, self.rounding);
        let v = v.saturating_add(self.zero_point as i64);
        Y::saturate(v.clamp(self.min as i64, self.max as i64))
    }

    /// Rescale one element from another quantization, copying it when the
    /// quantizations match.
    #[inline]
    pub fn rescale<X: Activation, Y: Activation>(&self, x: X, in_zero_point: i32) -> Y {
        if self.is_passthrough(in_zero_point) {
            let v = x.to_i32().clamp(self.min, self.max);
            return Y::saturate(v as i64);
        }
        self.apply::<Y::Acc, Y>(Y::Acc::from_i32(x.to_i32() - in_zero_point))
    }
}
