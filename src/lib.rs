// Quantized NN kernels: streaming convolution over a ring buffer, matmul,
// reductions and elementwise requantization on i8 / i16 activations.
pub mod config;
pub mod error;
pub mod kernels;
pub mod quant;
pub mod reference;
pub mod ring;
pub mod shape;

pub use error::{status, KernelError, Result};
pub use kernels::conv::{conv2d, query_scratch_size, ConvDriver, ConvGeometry, ConvParams, ConvQuant, DriverState, KernelShape};
pub use kernels::elementwise::{compare, requantize_slice, CompareQuant, Comparison};
pub use kernels::matmul::{quantized_matmul, MatmulDims, MatmulQuant};
pub use kernels::reduce::{reduce, reduce_scratch_len, reduce_with_order, FoldOrder, ReduceKind, ReduceQuant};
pub use quant::{ActivationRange, PerChannelScale, Precision, QuantParams, RoundingMode};
pub use shape::{AxisSet, TensorShape};
