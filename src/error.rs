use thiserror::Error;

/// Everything a kernel entry point can reject. Checks run before any scratch or
/// output memory is touched, so an error always means "nothing was written".
#[derive(Debug, Clone, PartialEq, Error)]
pub enum KernelError {
    // Argument errors
    #[error("{what} buffer too small: need {need} elements, got {got}")]
    BufferTooSmall { what: &'static str, need: usize, got: usize },
    #[error("{what} length mismatch: expected {expected}, got {got}")]
    LengthMismatch { what: &'static str, expected: usize, got: usize },
    #[error("{what} must be positive")]
    NonPositive { what: &'static str },
    #[error("zero point {value} outside [{min}, {max}]")]
    ZeroPointOutOfRange { value: i32, min: i32, max: i32 },
    #[error("shift {0} outside [-31, 31]")]
    ShiftOutOfRange(i32),
    #[error("negative multiplier {0}")]
    NegativeMultiplier(i32),
    #[error("activation range [{min}, {max}] is empty")]
    EmptyActivationRange { min: i32, max: i32 },
    #[error("real scale {0} cannot be encoded as a Q31 multiplier")]
    ScaleOutOfRange(f64),
    #[error("{0} elements per reduced output exceeds i32 range")]
    CountOutOfRange(usize),

    // Configuration errors
    #[error("rank {0} not in 1..=4")]
    RankOutOfRange(usize),
    #[error("effective kernel extent {effective} exceeds padded input extent {padded}")]
    WindowTooLarge { effective: usize, padded: usize },
    #[error("unsupported element precision code {0}")]
    UnsupportedPrecision(u32),
    #[error("axis {axis} out of range for rank {rank}")]
    AxisOutOfRange { axis: usize, rank: usize },
    #[error("axis {0} repeated")]
    RepeatedAxis(usize),
    #[error("channel count mismatch: input has {input}, kernel expects {kernel}")]
    ChannelMismatch { input: usize, kernel: usize },

    // Sequencing errors
    #[error("convolution driver is {actual}, cannot {op}")]
    InvalidState { actual: &'static str, op: &'static str },
}

impl KernelError {
    /// Negative status code for C-style callers: argument errors are -1..-19,
    /// configuration errors -20..-39, sequencing errors -40.
    pub fn status_code(&self) -> i32 {
        match self {
            KernelError::BufferTooSmall { .. } => -1,
            KernelError::LengthMismatch { .. } => -2,
            KernelError::NonPositive { .. } => -3,
            KernelError::ZeroPointOutOfRange { .. } => -4,
            KernelError::ShiftOutOfRange(_) => -5,
            KernelError::NegativeMultiplier(_) => -6,
            KernelError::EmptyActivationRange { .. } => -7,
            KernelError::ScaleOutOfRange(_) => -8,
            KernelError::CountOutOfRange(_) => -9,
            KernelError::RankOutOfRange(_) => -20,
            KernelError::WindowTooLarge { .. } => -21,
            KernelError::UnsupportedPrecision(_) => -23,
            KernelError::AxisOutOfRange { .. } => -24,
            KernelError::RepeatedAxis(_) => -25,
            KernelError::ChannelMismatch { .. } => -26,
            KernelError::InvalidState { .. } => -40,
        }
    }

    pub fn is_argument_error(&self) -> bool { (-19..=-1).contains(&self.status_code()) }

    pub fn is_config_error(&self) -> bool { (-39..=-20).contains(&self.status_code()) }
}

pub type Result<T> = std::result::Result<T, KernelError>;

/// Collapse a kernel result into the `0` / negative status convention.
pub fn status<T>(r: &Result<T>) -> i32 {
    match r {
        Ok(_) => 0,
        Err(e) => e.status_code(),
    }
}

pub(crate) fn ensure_len(what: &'static str, need: usize, got: usize) -> Result<()> {
    if got < need { return Err(KernelError::BufferTooSmall { what, need, got }); }
    Ok(())
}

pub(crate) fn ensure_exact(what: &'static str, expected: usize, got: usize) -> Result<()> {
    if got != expected { return Err(KernelError::LengthMismatch { what, expected, got }); }
    Ok(())
}

pub(crate) fn ensure_positive(what: &'static str, v: usize) -> Result<()> {
    if v == 0 { return Err(KernelError::NonPositive { what }); }
    Ok(())
}
