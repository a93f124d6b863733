//! Plane views and temporal plane windows.
//!
//! Planes are plain `ndarray` views so that callers can hand over padded
//! buffers (row stride larger than the width) without copying.

use ndarray::{ArrayView2, ArrayViewMut2, ShapeBuilder};

use crate::error::{Bm3dError, Result};
use crate::float_trait::Bm3dFloat;

/// Side length of the square blocks that are matched and filtered.
pub const BLOCK_SIZE: usize = 8;

/// Number of samples in one block.
pub const BLOCK_AREA: usize = BLOCK_SIZE * BLOCK_SIZE;

fn check_stride(len: usize, width: usize, height: usize, stride: usize) -> Result<()> {
    let needed = if height == 0 {
        0
    } else {
        (height - 1) * stride + width
    };
    if stride < width || needed > len {
        return Err(Bm3dError::InvalidStride {
            width,
            height,
            stride,
            len,
        });
    }
    Ok(())
}

/// Borrow a row-strided sample buffer as a read-only plane view.
///
/// `stride` is counted in samples, not bytes, and must be at least `width`.
pub fn plane_view<F: Bm3dFloat>(
    data: &[F],
    width: usize,
    height: usize,
    stride: usize,
) -> Result<ArrayView2<'_, F>> {
    check_stride(data.len(), width, height, stride)?;
    let needed = if height == 0 { 0 } else { (height - 1) * stride + width };
    ArrayView2::from_shape((height, width).strides((stride, 1)), &data[..needed]).map_err(|_| {
        Bm3dError::InvalidStride {
            width,
            height,
            stride,
            len: data.len(),
        }
    })
}

/// Borrow a row-strided sample buffer as a writable plane view.
pub fn plane_view_mut<F: Bm3dFloat>(
    data: &mut [F],
    width: usize,
    height: usize,
    stride: usize,
) -> Result<ArrayViewMut2<'_, F>> {
    let len = data.len();
    check_stride(len, width, height, stride)?;
    let needed = if height == 0 { 0 } else { (height - 1) * stride + width };
    ArrayViewMut2::from_shape((height, width).strides((stride, 1)), &mut data[..needed]).map_err(
        |_| Bm3dError::InvalidStride {
            width,
            height,
            stride,
            len,
        },
    )
}

/// The frames of one plane around the frame being filtered.
///
/// Holds `2 * radius + 1` views; the frame being filtered sits at index
/// `radius`. A spatial-only invocation uses a window of length one.
#[derive(Debug, Clone)]
pub struct PlaneWindow<'a, F: Bm3dFloat> {
    pub frames: Vec<ArrayView2<'a, F>>,
}

impl<'a, F: Bm3dFloat> PlaneWindow<'a, F> {
    pub fn new(frames: Vec<ArrayView2<'a, F>>) -> Self {
        Self { frames }
    }

    /// Window made of a single frame (radius 0).
    pub fn single(frame: ArrayView2<'a, F>) -> Self {
        Self {
            frames: vec![frame],
        }
    }

    pub fn radius(&self) -> usize {
        self.frames.len().saturating_sub(1) / 2
    }

    pub fn center(&self) -> ArrayView2<'a, F> {
        self.frames[self.radius()]
    }

    /// `(rows, cols)` of the centre frame.
    pub fn dim(&self) -> (usize, usize) {
        self.center().dim()
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }
}
