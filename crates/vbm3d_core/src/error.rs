//! Error types for the configuration layer and the checked entry points.
//!
//! The filtering kernel itself never fails; everything here is raised before
//! a kernel is invoked.

use thiserror::Error;

/// Result alias for fallible operations in this crate.
pub type Result<T> = std::result::Result<T, Bm3dError>;

/// Errors reported while validating parameters, formats and buffer shapes.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Bm3dError {
    /// A parameter is outside of its accepted range.
    #[error("invalid parameter \"{name}\": {reason}")]
    InvalidParameter {
        name: &'static str,
        reason: String,
    },
    /// Two buffers that must agree in shape do not.
    #[error("dimension mismatch for {what}: expected {expected:?}, got {actual:?}")]
    DimensionMismatch {
        what: &'static str,
        expected: (usize, usize),
        actual: (usize, usize),
    },
    /// The frame layout cannot be processed in the requested mode.
    #[error("unsupported format: {0}")]
    UnsupportedFormat(String),
    /// A plane is smaller than a single block.
    #[error("plane of size {height}x{width} is smaller than the {block}x{block} block")]
    PlaneTooSmall {
        height: usize,
        width: usize,
        block: usize,
    },
    /// A strided plane description does not fit its backing slice.
    #[error("invalid stride {stride} for width {width}, height {height} and {len} samples")]
    InvalidStride {
        width: usize,
        height: usize,
        stride: usize,
        len: usize,
    },
}

impl Bm3dError {
    pub(crate) fn invalid(name: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidParameter {
            name,
            reason: reason.into(),
        }
    }
}
