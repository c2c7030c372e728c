//! Streaming 2D convolution over the ring buffer.
//!
//! Activations are NHWC, weights `[C_out, KH, KW, C_in]`. The driver keeps only
//! `KW` padded input columns resident and walks the output column by column:
//! `prime` loads the first window, each `step` slides it (after the first) and
//! produces one full output column for every output channel.
use super::accumulator::AccumulatorRow;
use super::dot::{dot_rows_accumulate, ZeroPoints};
use crate::error::{ensure_exact, ensure_len, ensure_positive, KernelError, Result};
use crate::quant::requant::Requantizer;
use crate::quant::{validate_zero_point, Activation, ActivationRange, PerChannelScale, Precision, QuantParams, RoundingMode};
use crate::ring::loader::{self, LoaderMode, LoaderState};
use crate::ring::planner::{effective_extent, plan_axis, PaddingPlan, RingLayout};
use crate::ring::{align_up, CircularBuffer};
use crate::shape::TensorShape;
use log::debug;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct KernelShape {
    pub out_channels: usize,
    pub height: usize,
    pub width: usize,
    pub in_channels: usize,
}

impl KernelShape {
    pub fn new(out_channels: usize, height: usize, width: usize, in_channels: usize) -> Self {
        Self { out_channels, height, width, in_channels }
    }

    /// Weights feeding one output channel.
    pub fn row_len(&self) -> usize { self.height * self.width * self.in_channels }
    pub fn len(&self) -> usize { self.out_channels * self.row_len() }
    pub fn is_empty(&self) -> bool { self.len() == 0 }

    fn validate(&self) -> Result<()> {
        ensure_positive("output channels", self.out_channels)?;
        ensure_positive("kernel height", self.height)?;
        ensure_positive("kernel width", self.width)?;
        ensure_positive("kernel input channels", self.in_channels)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConvParams {
    pub stride_h: usize,
    pub stride_w: usize,
    pub dilation_h: usize,
    pub dilation_w: usize,
    pub pad_top: usize,
    pub pad_left: usize,
}

impl Default for ConvParams {
    fn default() -> Self { Self { stride_h: 1, stride_w: 1, dilation_h: 1, dilation_w: 1, pad_top: 0, pad_left: 0 } }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConvGeometry {
    pub input: TensorShape,
    pub kernel: KernelShape,
    pub params: ConvParams,
    pub output_h: usize,
    pub output_w: usize,
}

impl ConvGeometry {
    pub fn new(input: TensorShape, kernel: KernelShape, params: ConvParams, output_h: usize, output_w: usize) -> Self {
        Self { input, kernel, params, output_h, output_w }
    }

    /// Output extents assuming trailing padding equal to the leading padding.
    pub fn with_symmetric_output(input: TensorShape, kernel: KernelShape, params: ConvParams) -> Result<Self> {
        let out = |extent: usize, k: usize, s: usize, d: usize, pad: usize| -> Result<usize> {
            ensure_positive("stride", s)?;
            ensure_positive("dilation", d)?;
            ensure_positive("kernel extent", k)?;
            let eff = effective_extent(k, d);
            let padded = extent + 2 * pad;
            if eff > padded { return Err(KernelError::WindowTooLarge { effective: eff, padded }); }
            Ok((padded - eff) / s + 1)
        };
        let p = &params;
        let oh = out(input.height(), kernel.height, p.stride_h, p.dilation_h, p.pad_top)?;
        let ow = out(input.width(), kernel.width, p.stride_w, p.dilation_w, p.pad_left)?;
        Ok(Self::new(input, kernel, params, oh, ow))
    }

    pub fn plan(&self) -> Result<PaddingPlan> {
        let p = &self.params;
        let h = plan_axis(self.input.height(), self.kernel.height, p.stride_h, p.dilation_h, self.output_h, p.pad_top)?;
        let w = plan_axis(self.input.width(), self.kernel.width, p.stride_w, p.dilation_w, self.output_w, p.pad_left)?;
        Ok(PaddingPlan::from_axes(h, w))
    }

    pub fn layout(&self) -> Result<RingLayout> {
        self.kernel.validate()?;
        if self.kernel.in_channels != self.input.channels() {
            return Err(KernelError::ChannelMismatch { input: self.input.channels(), kernel: self.kernel.in_channels });
        }
        let plan = self.plan()?;
        Ok(RingLayout {
            height: self.input.height(),
            width: self.input.width(),
            channels: self.input.channels(),
            kernel_w: self.kernel.width,
            stride_w: self.params.stride_w,
            dilation_w: self.params.dilation_w,
            plan,
        })
    }

    pub fn output_shape(&self) -> Result<TensorShape> {
        TensorShape::nhwc(self.input.batch(), self.output_h, self.output_w, self.kernel.out_channels)
    }

    pub fn input_image_len(&self) -> usize { self.input.height() * self.input.width() * self.input.channels() }
    pub fn output_image_len(&self) -> usize { self.output_h * self.output_w * self.kernel.out_channels }
}

/// Ring scratch in bytes. Depends on the output height (through the trailing
/// padding) but not on the output width.
pub fn query_scratch_size(input: &TensorShape, kernel: &KernelShape, params: &ConvParams, output_height: usize, precision: Precision) -> Result<usize> {
    let r = (|| {
        kernel.validate()?;
        if kernel.in_channels != input.channels() {
            return Err(KernelError::ChannelMismatch { input: input.channels(), kernel: kernel.in_channels });
        }
        ensure_positive("stride", params.stride_w)?;
        ensure_positive("dilation", params.dilation_w)?;
        let h = plan_axis(input.height(), kernel.height, params.stride_h, params.dilation_h, output_height, params.pad_top)?;
        let padded_h = h.before + input.height() + h.after;
        Ok(align_up(kernel.width * padded_h * input.channels() * precision.element_bytes()))
    })();
    super::logged("query_scratch_size", r)
}

/// Scratch requirement in elements of `X`.
pub fn scratch_len<X: Activation>(geom: &ConvGeometry) -> Result<usize> {
    let bytes = query_scratch_size(&geom.input, &geom.kernel, &geom.params, geom.output_h, X::PRECISION)?;
    Ok(bytes / X::PRECISION.element_bytes())
}

#[derive(Debug, Clone, Copy)]
pub struct ConvQuant<'a> {
    pub input_zero_point: i32,
    pub weight_zero_point: i32,
    pub output: QuantParams,
    pub per_channel: Option<PerChannelScale<'a>>,
    pub rounding: RoundingMode,
    pub activation: ActivationRange,
}

impl<'a> ConvQuant<'a> {
    pub fn per_tensor<X: Activation>(input_zero_point: i32, weight_zero_point: i32, output: QuantParams) -> Self {
        Self {
            input_zero_point,
            weight_zero_point,
            output,
            per_channel: None,
            rounding: RoundingMode::default(),
            activation: ActivationRange::full::<X>(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverState {
    Uninitialized,
    /// Ring holds the window for output column 0.
    Primed,
    /// `next` is the output column the following `step` produces.
    Stepping { next: usize },
    Done,
}

impl DriverState {
    pub fn name(&self) -> &'static str {
        match self {
            DriverState::Uninitialized => "uninitialized",
            DriverState::Primed => "primed",
            DriverState::Stepping { .. } => "stepping",
            DriverState::Done => "done",
        }
    }
}

pub struct ConvDriver<'a, X: Activation> {
    geom: ConvGeometry,
    layout: RingLayout,
    mode: LoaderMode,
    weights: &'a [i8],
    bias: Option<&'a [X::Acc]>,
    per_channel: Option<PerChannelScale<'a>>,
    zp: ZeroPoints,
    pad: X,
    rq: Requantizer,
    ring: CircularBuffer<'a, X>,
    loader: LoaderState,
    state: DriverState,
    row: AccumulatorRow<X::Acc>,
}

impl<'a, X: Activation> ConvDriver<'a, X> {
    /// Validate the whole configuration and bind the ring to `scratch`.
    pub fn new(geom: ConvGeometry, weights: &'a [i8], bias: Option<&'a [X::Acc]>, quant: &ConvQuant<'a>, scratch: &'a mut [X]) -> Result<Self> {
        let r = Self::build(geom, weights, bias, quant, scratch);
        super::logged("conv driver init", r)
    }

    fn build(geom: ConvGeometry, weights: &'a [i8], bias: Option<&'a [X::Acc]>, quant: &ConvQuant<'a>, scratch: &'a mut [X]) -> Result<Self> {
        let layout = geom.layout()?;
        ensure_positive("stride", geom.params.stride_h)?;
        ensure_exact("weights", geom.kernel.len(), weights.len())?;
        if let Some(b) = bias { ensure_exact("bias", geom.kernel.out_channels, b.len())?; }
        validate_zero_point::<X>(quant.input_zero_point)?;
        validate_zero_point::<i8>(quant.weight_zero_point)?;
        if let Some(pc) = &quant.per_channel { pc.validate(geom.kernel.out_channels)?; }
        let rq = Requantizer::new::<X>(&quant.output, quant.rounding, quant.activation)?;
        let ring = CircularBuffer::new(scratch, layout.ring_len())?;
        let mode = LoaderMode::for_layout(&layout);
        debug!(
            "conv {:?} -> {}x{}x{}: plan {:?}, {:?} ring of {} planes x {} elements",
            geom.input.dims(), geom.output_h, geom.output_w, geom.kernel.out_channels,
            layout.plan, mode, layout.planes(), layout.plane_len()
        );
        Ok(Self {
            geom,
            layout,
            mode,
            weights,
            bias,
            per_channel: quant.per_channel,
            zp: ZeroPoints::new(quant.weight_zero_point, quant.input_zero_point),
            pad: X::saturate(quant.input_zero_point as i64),
            rq,
            ring,
            loader: LoaderState::default(),
            state: DriverState::Uninitialized,
            row: AccumulatorRow::new(geom.kernel.out_channels),
        })
    }

    pub fn state(&self) -> DriverState { self.state }
    pub fn layout(&self) -> &RingLayout { &self.layout }
    pub fn loader_state(&self) -> &LoaderState { &self.loader }
    pub fn ring(&self) -> &CircularBuffer<'a, X> { &self.ring }

    /// Load the window for output column 0 of `image`. Valid from any state;
    /// this is also how a finished driver moves on to the next image.
    pub fn prime(&mut self, image: &[X]) -> Result<()> {
        ensure_exact("input image", self.layout.image_len(), image.len())?;
        loader::init_fill(&mut self.ring, &self.layout, &mut self.loader, image, self.pad)?;
        self.state = DriverState::Primed;
        Ok(())
    }

    /// Produce the next output column into `out_image` (`[OH, OW, C_out]`).
    pub fn step(&mut self, image: &[X], out_image: &mut [X]) -> Result<DriverState> {
        let column = match self.state {
            DriverState::Primed => 0,
            DriverState::Stepping { next } => next,
            DriverState::Uninitialized | DriverState::Done => {
                return Err(KernelError::InvalidState { actual: self.state.name(), op: "step" });
            }
        };
        ensure_exact("input image", self.layout.image_len(), image.len())?;
        ensure_exact("output image", self.geom.output_image_len(), out_image.len())?;
        if column > 0 {
            loader::update(self.mode, &mut self.ring, &self.layout, &mut self.loader, image, self.pad)?;
        }
        self.compute_column(column, out_image);
        self.state = if column + 1 == self.geom.output_w { DriverState::Done } else { DriverState::Stepping { next: column + 1 } };
        Ok(self.state)
    }

    fn compute_column(&mut self, ox: usize, out: &mut [X]) {
        let k = &self.geom.kernel;
        let p = &self.geom.params;
        let c = k.in_channels;
        let cout = k.out_channels;
        let plane = self.layout.plane_len();
        let row_len = k.row_len();
        for oy in 0..self.geom.output_h {
            self.row.seed(self.bias);
            for ky in 0..k.height {
                let r = oy * p.stride_h + ky * p.dilation_h;
                for kx in 0..k.width {
                    let w_off = (ky * k.width + kx) * c;
                    let (a, b) = self.ring.segments(kx * plane + r * c, c);
                    dot_rows_accumulate(&self.weights[w_off..], cout, row_len, a, self.zp, &mut self.row.buf);
                    if !b.is_empty() {
                        dot_rows_accumulate(&self.weights[w_off + a.len()..], cout, row_len, b, self.zp, &mut self.row.buf);
                    }
                }
            }
            let o = (oy * self.geom.output_w + ox) * cout;
            self.row.requantize_into(&self.rq, self.per_channel.as_ref(), &mut out[o..o + cout]);
        }
    }
}

/// Full convolution: every batch image through prime + steps until done.
pub fn conv2d<X: Activation>(
    output: &mut [X],
    input: &[X],
    geom: &ConvGeometry,
    weights: &[i8],
    bias: Option<&[X::Acc]>,
    quant: &ConvQuant<'_>,
    scratch: &mut [X],
) -> Result<()> {
    let lens = (|| {
        ensure_exact("input", geom.input.len(), input.len())?;
        let out_len = geom.input.batch() * geom.output_image_len();
        ensure_len("output", out_len, output.len())
    })();
    super::logged("conv2d", lens)?;
    let mut driver = ConvDriver::new(*geom, weights, bias, quant, scratch)?;
    let (in_len, out_len) = (geom.input_image_len(), geom.output_image_len());
    for n in 0..geom.input.batch() {
        let image = &input[n * in_len..(n + 1) * in_len];
        let out = &mut output[n * out_len..(n + 1) * out_len];
        driver.prime(image)?;
        while driver.step(image, out)? != DriverState::Done {}
    }
    Ok(())
}
