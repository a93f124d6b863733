//! Float trait abstraction for f32/f64 support.
//!
//! Every kernel in this crate is generic over the sample type so that planes
//! can be filtered in single precision (the usual video case) or in double
//! precision for reference runs.

use num_traits::{Float, FromPrimitive, NumAssign};
use rustfft::FftNum;
use std::fmt::Debug;
use std::iter::Sum;

/// Trait alias for floating point sample types supported by the filter.
///
/// Combines the bounds needed by the block matcher, the Fourier plans
/// (`FftNum` from rustfft) and the aggregation buffers.
pub trait Bm3dFloat:
    Float + FftNum + FromPrimitive + NumAssign + Sum + Debug + Send + Sync + 'static
{
    /// The constant PI for this float type.
    const PI: Self;

    /// Create a value from an f64 constant.
    fn from_f64_c(val: f64) -> Self;

    /// Create a value from a usize constant.
    fn usize_as(val: usize) -> Self;

    /// `1 / sqrt(n)`, the per-axis scale of a unitary transform of length `n`.
    #[inline]
    fn unitary_scale(n: usize) -> Self {
        Self::one() / Self::usize_as(n).sqrt()
    }
}

impl Bm3dFloat for f32 {
    const PI: Self = std::f32::consts::PI;

    #[inline]
    fn from_f64_c(val: f64) -> Self {
        val as f32
    }

    #[inline]
    fn usize_as(val: usize) -> Self {
        val as f32
    }
}

impl Bm3dFloat for f64 {
    const PI: Self = std::f64::consts::PI;

    #[inline]
    fn from_f64_c(val: f64) -> Self {
        val
    }

    #[inline]
    fn usize_as(val: usize) -> Self {
        val as f64
    }
}
