pub mod accumulator;
pub mod conv;
pub mod dot;
pub mod elementwise;
pub mod matmul;
pub mod reduce;

use crate::error::Result;
use log::debug;

/// Pass `r` through, logging the rejection when an entry point refuses its arguments.
pub(crate) fn logged<T>(op: &str, r: Result<T>) -> Result<T> {
    if let Err(e) = &r {
        debug!("{op} rejected: {e} (status {})", e.status_code());
    }
    r
}
