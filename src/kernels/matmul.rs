use super::accumulator::AccumulatorRow;
use super::dot::{dot_batched, ZeroPoints};
use crate::error::{ensure_exact, ensure_len, ensure_positive, Result};
use crate::quant::requant::Requantizer;
use crate::quant::{validate_zero_point, Accumulate, Activation, ActivationRange, PerChannelScale, QuantParams, RoundingMode};

/// Layout of a fully-connected call: `rows x cols` weights (rows `row_stride`
/// apart), `vector_count` operands (`vector_stride` apart), outputs for vector
/// `v` at `v * output_stride`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MatmulDims {
    pub rows: usize,
    pub cols: usize,
    pub row_stride: usize,
    pub vector_count: usize,
    pub vector_stride: usize,
    pub output_stride: usize,
}

impl MatmulDims {
    /// Densely packed operands and outputs.
    pub fn packed(rows: usize, cols: usize, vector_count: usize) -> Self {
        Self { rows, cols, row_stride: cols, vector_count, vector_stride: cols, output_stride: rows }
    }

    fn validate(&self) -> Result<()> {
        ensure_positive("rows", self.rows)?;
        ensure_positive("cols", self.cols)?;
        ensure_positive("vector count", self.vector_count)?;
        ensure_len("row stride", self.cols, self.row_stride)?;
        ensure_len("vector stride", self.cols, self.vector_stride)?;
        ensure_len("output stride", self.rows, self.output_stride)?;
        Ok(())
    }
}

#[derive(Debug, Clone, Copy)]
pub struct MatmulQuant<'a> {
    pub weight_zero_point: i32,
    pub input_zero_point: i32,
    pub output: QuantParams,
    pub per_channel: Option<PerChannelScale<'a>>,
    pub rounding: RoundingMode,
    pub activation: ActivationRange,
}

impl<'a> MatmulQuant<'a> {
    pub fn per_tensor<X: Activation>(weight_zero_point: i32, input_zero_point: i32, output: QuantParams) -> Self {
        Self {
            weight_zero_point,
            input_zero_point,
            output,
            per_channel: None,
            rounding: RoundingMode::default(),
            activation: ActivationRange::full::<X>(),
        }
    }
}

/// `output[v][r] = requant(bias[r] + sum_c (w[r][c] - w_zp) * (x[v][c] - x_zp))`.
pub fn quantized_matmul<X: Activation>(
    output: &mut [X],
    weights: &[i8],
    vectors: &[X],
    bias: Option<&[X::Acc]>,
    dims: &MatmulDims,
    quant: &MatmulQuant<'_>,
) -> Result<()> {
    let rq = super::logged("quantized_matmul", validate(output, weights, vectors, bias, dims, quant))?;
    let zp = ZeroPoints::new(quant.weight_zero_point, quant.input_zero_point);
    let (rows, vc) = (dims.rows, dims.vector_count);
    let mut acc = vec![X::Acc::ZERO; rows * vc];
    dot_batched(weights, rows, dims.row_stride, vectors, vc, dims.vector_stride, dims.cols, zp, &mut acc);
    let mut row = AccumulatorRow::new(rows);
    for v in 0..vc {
        row.seed(bias);
        for (a, &d) in row.buf.iter_mut().zip(&acc[v * rows..(v + 1) * rows]) { *a = a.wrapping_add(d); }
        let out = &mut output[v * dims.output_stride..v * dims.output_stride + rows];
        row.requantize_into(&rq, quant.per_channel.as_ref(), out);
    }
    Ok(())
}

fn validate<X: Activation>(
    output: &[X],
    weights: &[i8],
    vectors: &[X],
    bias: Option<&[X::Acc]>,
    dims: &MatmulDims,
    quant: &MatmulQuant<'_>,
) -> Result<Requantizer> {
    dims.validate()?;
    ensure_len("weights", (dims.rows - 1) * dims.row_stride + dims.cols, weights.len())?;
    ensure_len("vectors", (dims.vector_count - 1) * dims.vector_stride + dims.cols, vectors.len())?;
    ensure_len("output", (dims.vector_count - 1) * dims.output_stride + dims.rows, output.len())?;
    if let Some(b) = bias { ensure_exact("bias", dims.rows, b.len())?; }
    validate_zero_point::<i8>(quant.weight_zero_point)?;
    validate_zero_point::<X>(quant.input_zero_point)?;
    if let Some(pc) = &quant.per_channel { pc.validate(dims.rows)?; }
    Requantizer::new::<X>(&quant.output, quant.rounding, quant.activation)
}
