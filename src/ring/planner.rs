use crate::error::{ensure_positive, Result};
use crate::quant::Precision;
use serde::Serialize;

/// Span covered by a kernel of `kernel` taps spaced `dilation` apart.
#[inline]
pub fn effective_extent(kernel: usize, dilation: usize) -> usize {
    if kernel == 1 { 1 } else { kernel + (dilation - 1) * (kernel - 1) }
}

/// Zero-point padding on both sides of one spatial axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct AxisPlan {
    pub before: usize,
    pub after: usize,
}

/// Derive the trailing padding that makes `output` windows fit. `before` comes
/// from the layer configuration.
pub fn plan_axis(input: usize, kernel: usize, stride: usize, dilation: usize, output: usize, before: usize) -> Result<AxisPlan> {
    ensure_positive("input extent", input)?;
    ensure_positive("kernel extent", kernel)?;
    ensure_positive("stride", stride)?;
    ensure_positive("dilation", dilation)?;
    ensure_positive("output extent", output)?;
    let effective = effective_extent(kernel, dilation);
    let needed = effective + (output - 1) * stride;
    // Windows past the input read zero-point padding only; `after` always
    // covers the last window, so the padded extent never falls short.
    let after = needed.saturating_sub(before + input);
    Ok(AxisPlan { before, after })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct PaddingPlan {
    pub top: usize,
    pub bottom: usize,
    pub left: usize,
    pub right: usize,
}

impl PaddingPlan {
    pub fn from_axes(height: AxisPlan, width: AxisPlan) -> Self {
        Self { top: height.before, bottom: height.after, left: width.before, right: width.after }
    }
}

/// Where a logical padded column comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnSource {
    LeftPad,
    Input(usize),
    RightPad,
}

/// Shape of the ring for one image: `kernel_w` planes, each one padded column
/// (`padded_height * channels` elements, rows then channels).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RingLayout {
    pub height: usize,
    pub width: usize,
    pub channels: usize,
    pub kernel_w: usize,
    pub stride_w: usize,
    pub dilation_w: usize,
    pub plan: PaddingPlan,
}

impl RingLayout {
    pub fn padded_height(&self) -> usize { self.plan.top + self.height + self.plan.bottom }
    pub fn padded_width(&self) -> usize { self.plan.left + self.width + self.plan.right }
    pub fn plane_len(&self) -> usize { self.padded_height() * self.channels }
    pub fn planes(&self) -> usize { self.kernel_w }
    pub fn ring_len(&self) -> usize { self.planes() * self.plane_len() }
    pub fn image_len(&self) -> usize { self.height * self.width * self.channels }
    pub fn is_dilated(&self) -> bool { self.dilation_w > 1 }

    pub fn scratch_bytes(&self, precision: Precision) -> usize {
        super::align_up(self.ring_len() * precision.element_bytes())
    }

    /// Padded column of tap `tap` for the window at output column `position`.
    #[inline]
    pub fn tap_column(&self, position: usize, tap: usize) -> usize {
        position * self.stride_w + tap * self.dilation_w
    }

    pub fn column_source(&self, col: usize) -> ColumnSource {
        if col < self.plan.left {
            ColumnSource::LeftPad
        } else if col < self.plan.left + self.width {
            ColumnSource::Input(col - self.plan.left)
        } else {
            ColumnSource::RightPad
        }
    }
}
