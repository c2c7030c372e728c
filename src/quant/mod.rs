//! Quantization parameters and the integer element types the kernels run on.
//!
//! A quantized tensor maps `real = scale * (q - zero_point)`. Scales never
//! appear as floats inside a kernel: they travel as a Q31 `multiplier` plus a
//! power-of-two `shift`, so `scale = multiplier * 2^(shift - 31)`.
pub mod requant;

use crate::error::{KernelError, Result};
use serde::{Deserialize, Serialize};
use std::fmt::Debug;

/// Q31 multiplier that, with [`IDENTITY_SHIFT`], encodes a scale of exactly 1.0.
pub const IDENTITY_MULTIPLIER: i32 = 1 << 30;
pub const IDENTITY_SHIFT: i32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct QuantParams {
    pub zero_point: i32,
    pub multiplier: i32,
    pub shift: i32,
}

impl QuantParams {
    pub const fn new(zero_point: i32, multiplier: i32, shift: i32) -> Self {
        Self { zero_point, multiplier, shift }
    }

    /// Unit scale around `zero_point`.
    pub const fn identity(zero_point: i32) -> Self {
        Self { zero_point, multiplier: IDENTITY_MULTIPLIER, shift: IDENTITY_SHIFT }
    }

    /// Encode a positive real scale; see [`requant::quantize_multiplier`].
    pub fn from_scale(scale: f64, zero_point: i32) -> Result<Self> {
        let (multiplier, shift) = requant::quantize_multiplier(scale)?;
        Ok(Self { zero_point, multiplier, shift })
    }

    pub fn is_identity_scale(&self) -> bool {
        self.multiplier == IDENTITY_MULTIPLIER && self.shift == IDENTITY_SHIFT
    }

    /// Real value of the multiplier/shift pair.
    pub fn scale(&self) -> f64 { requant::dequantize_multiplier(self.multiplier, self.shift) }

    /// Check the scale half (multiplier sign, shift range) only.
    pub fn validate_scale(&self) -> Result<()> {
        if self.multiplier < 0 { return Err(KernelError::NegativeMultiplier(self.multiplier)); }
        if !(-requant::MAX_SHIFT..=requant::MAX_SHIFT).contains(&self.shift) { return Err(KernelError::ShiftOutOfRange(self.shift)); }
        Ok(())
    }

    /// Full check against the element type the parameters describe.
    pub fn validate_for<X: Activation>(&self) -> Result<()> {
        validate_zero_point::<X>(self.zero_point)?;
        self.validate_scale()
    }
}

pub fn validate_zero_point<X: Activation>(zp: i32) -> Result<()> {
    if zp < X::MIN || zp > X::MAX {
        return Err(KernelError::ZeroPointOutOfRange { value: zp, min: X::MIN, max: X::MAX });
    }
    Ok(())
}

/// How the fixed-point multiply rounds. Results of the two regimes differ by at
/// most one unit in the last place.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RoundingMode {
    /// Saturating left shift, rounding doubling high multiply, then a rounding
    /// (half away from zero) right shift.
    #[default]
    Double,
    /// A single round-half-to-even step on `acc * multiplier / 2^(31 - shift)`.
    Single,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Precision {
    #[default]
    S8,
    S16,
}

impl Precision {
    pub fn from_code(bits: u32) -> Result<Self> {
        match bits {
            8 => Ok(Precision::S8),
            16 => Ok(Precision::S16),
            other => Err(KernelError::UnsupportedPrecision(other)),
        }
    }

    pub fn element_bytes(self) -> usize {
        match self {
            Precision::S8 => 1,
            Precision::S16 => 2,
        }
    }
}

/// Clamp applied after requantization (fused ReLU/ReLU6 and friends).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActivationRange {
    pub min: i32,
    pub max: i32,
}

impl ActivationRange {
    pub fn full<X: Activation>() -> Self { Self { min: X::MIN, max: X::MAX } }

    /// Intersect with the representable range of `X`; empty results are an error.
    pub fn resolve<X: Activation>(&self) -> Result<(i32, i32)> {
        let lo = self.min.max(X::MIN);
        let hi = self.max.min(X::MAX);
        if lo > hi { return Err(KernelError::EmptyActivationRange { min: self.min, max: self.max }); }
        Ok((lo, hi))
    }
}

/// Per-output-channel scale overrides for conv and matmul.
#[derive(Debug, Clone, Copy)]
pub struct PerChannelScale<'a> {
    pub multipliers: &'a [i32],
    pub shifts: &'a [i32],
}

impl<'a> PerChannelScale<'a> {
    pub fn validate(&self, channels: usize) -> Result<()> {
        crate::error::ensure_exact("per-channel multipliers", channels, self.multipliers.len())?;
        crate::error::ensure_exact("per-channel shifts", channels, self.shifts.len())?;
        for (&m, &s) in self.multipliers.iter().zip(self.shifts) {
            QuantParams::new(0, m, s).validate_scale()?;
        }
        Ok(())
    }
}

/// Wide accumulator: i32 for 8-bit activations, i64 for 16-bit ones.
/// All arithmetic wraps so every code path agrees bit for bit.
pub trait Accumulate: Copy + Default + Ord + Debug + Send + Sync + 'static {
    const ZERO: Self;
    /// Seed for max folds.
    const MIN: Self;
    const BITS: u32;
    fn wrapping_add(self, other: Self) -> Self;
    fn wrapping_sub(self, other: Self) -> Self;
    /// `self + a * b`, wrapping.
    fn mul_add(self, a: i32, b: i32) -> Self;
    /// `self * k`, wrapping.
    fn scale_by(self, k: i32) -> Self;
    fn from_i32(v: i32) -> Self;
    fn to_i64(self) -> i64;
}

impl Accumulate for i32 {
    const ZERO: Self = 0;
    const MIN: Self = i32::MIN;
    const BITS: u32 = 32;
    #[inline] fn wrapping_add(self, other: Self) -> Self { i32::wrapping_add(self, other) }
    #[inline] fn wrapping_sub(self, other: Self) -> Self { i32::wrapping_sub(self, other) }
    #[inline] fn mul_add(self, a: i32, b: i32) -> Self { self.wrapping_add(a.wrapping_mul(b)) }
    #[inline] fn scale_by(self, k: i32) -> Self { self.wrapping_mul(k) }
    #[inline] fn from_i32(v: i32) -> Self { v }
    #[inline] fn to_i64(self) -> i64 { self as i64 }
}

impl Accumulate for i64 {
    const ZERO: Self = 0;
    const MIN: Self = i64::MIN;
    const BITS: u32 = 64;
    #[inline] fn wrapping_add(self, other: Self) -> Self { i64::wrapping_add(self, other) }
    #[inline] fn wrapping_sub(self, other: Self) -> Self { i64::wrapping_sub(self, other) }
    #[inline] fn mul_add(self, a: i32, b: i32) -> Self { self.wrapping_add((a as i64).wrapping_mul(b as i64)) }
    #[inline] fn scale_by(self, k: i32) -> Self { self.wrapping_mul(k as i64) }
    #[inline] fn from_i32(v: i32) -> Self { v as i64 }
    #[inline] fn to_i64(self) -> i64 { self }
}

/// Activation element: the type of inputs and outputs. Weights are always i8.
pub trait Activation: Copy + Default + PartialEq + PartialOrd + Debug + Send + Sync + 'static {
    type Acc: Accumulate;
    const PRECISION: Precision;
    const MIN: i32;
    const MAX: i32;
    fn to_i32(self) -> i32;
    /// Clamp into range, then narrow.
    fn saturate(v: i64) -> Self;
}

impl Activation for i8 {
    type Acc = i32;
    const PRECISION: Precision = Precision::S8;
    const MIN: i32 = i8::MIN as i32;
    const MAX: i32 = i8::MAX as i32;
    #[inline] fn to_i32(self) -> i32 { self as i32 }
    #[inline] fn saturate(v: i64) -> Self { v.clamp(Self::MIN as i64, Self::MAX as i64) as i8 }
}

impl Activation for i16 {
    type Acc = i64;
    const PRECISION: Precision = Precision::S16;
    const MIN: i32 = i16::MIN as i32;
    const MAX: i32 = i16::MAX as i32;
    #[inline] fn to_i32(self) -> i32 { self as i32 }
    #[inline] fn saturate(v: i64) -> Self { v.clamp(Self::MIN as i64, Self::MAX as i64) as i16 }
}
