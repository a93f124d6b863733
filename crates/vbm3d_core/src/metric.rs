//! Patch similarity metric.

use ndarray::{s, ArrayView2};

use crate::float_trait::Bm3dFloat;
use crate::plane::{PlaneWindow, BLOCK_AREA, BLOCK_SIZE};

/// Origin of a block inside a temporal plane window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PatchRef {
    /// Index of the frame inside the window.
    pub frame: usize,
    pub row: usize,
    pub col: usize,
}

impl PatchRef {
    pub fn new(frame: usize, row: usize, col: usize) -> Self {
        Self { frame, row, col }
    }
}

/// Sum of squared differences between two equally sized patches, scaled by
/// `inv_area`, with early termination.
///
/// Returns as soon as the scaled partial sum reaches `bound`; the returned
/// value is then some number `>= bound`.
#[inline]
pub fn scaled_squared_distance<F: Bm3dFloat>(
    p1: ArrayView2<F>,
    p2: ArrayView2<F>,
    inv_area: F,
    partial: F,
    bound: F,
) -> F {
    let mut sum_sq = partial;
    for (r1, r2) in p1.outer_iter().zip(p2.outer_iter()) {
        for (a, b) in r1.iter().zip(r2.iter()) {
            let diff = *a - *b;
            sum_sq += diff * diff * inv_area;
        }
        if sum_sq >= bound {
            return sum_sq;
        }
    }
    sum_sq
}

/// Distance between two blocks of the given planes.
///
/// With a single plane this is the mean squared difference over the block.
/// With several planes (chroma-joint matching) the per-plane values are
/// summed. `bound` enables early termination; pass `F::infinity()` for an
/// exact result.
pub fn patch_distance<F: Bm3dFloat>(
    planes: &[PlaneWindow<'_, F>],
    a: PatchRef,
    b: PatchRef,
    bound: F,
) -> F {
    let inv_area = F::one() / F::usize_as(BLOCK_AREA);
    let mut total = F::zero();
    for window in planes {
        let pa = window.frames[a.frame].slice(s![
            a.row..a.row + BLOCK_SIZE,
            a.col..a.col + BLOCK_SIZE
        ]);
        let pb = window.frames[b.frame].slice(s![
            b.row..b.row + BLOCK_SIZE,
            b.col..b.col + BLOCK_SIZE
        ]);
        total = scaled_squared_distance(pa, pb, inv_area, total, bound);
        if total >= bound {
            return total;
        }
    }
    total
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array2;

    fn ramp(rows: usize, cols: usize, scale: f32) -> Array2<f32> {
        Array2::from_shape_fn((rows, cols), |(r, c)| (r * cols + c) as f32 * scale)
    }

    #[test]
    fn test_identical_patches_have_zero_distance() {
        let img = ramp(16, 16, 0.01);
        let windows = [PlaneWindow::single(img.view())];
        let p = PatchRef::new(0, 3, 5);
        assert_eq!(patch_distance(&windows, p, p, f32::INFINITY), 0.0);
    }

    #[test]
    fn test_distance_is_mean_squared_difference() {
        let a = Array2::<f64>::zeros((8, 8));
        let b = Array2::<f64>::from_elem((8, 8), 0.5);
        let windows = [PlaneWindow::new(vec![a.view(), b.view()])];
        let d = patch_distance(
            &windows,
            PatchRef::new(0, 0, 0),
            PatchRef::new(1, 0, 0),
            f64::INFINITY,
        );
        assert!((d - 0.25).abs() < 1e-12);
    }

    #[test]
    fn test_distance_is_symmetric() {
        let img = Array2::from_shape_fn((20, 20), |(r, c)| ((r * 7 + c * 13) % 17) as f32);
        let windows = [PlaneWindow::single(img.view())];
        let a = PatchRef::new(0, 1, 2);
        let b = PatchRef::new(0, 9, 4);
        assert_eq!(
            patch_distance(&windows, a, b, f32::INFINITY),
            patch_distance(&windows, b, a, f32::INFINITY)
        );
    }

    #[test]
    fn test_joint_distance_sums_planes() {
        let y = ramp(16, 16, 0.01);
        let u = ramp(16, 16, 0.02);
        let v = ramp(16, 16, 0.03);
        let a = PatchRef::new(0, 0, 0);
        let b = PatchRef::new(0, 4, 4);
        let single: Vec<f32> = [&y, &u, &v]
            .iter()
            .map(|p| patch_distance(&[PlaneWindow::single(p.view())], a, b, f32::INFINITY))
            .collect();
        let joint = patch_distance(
            &[
                PlaneWindow::single(y.view()),
                PlaneWindow::single(u.view()),
                PlaneWindow::single(v.view()),
            ],
            a,
            b,
            f32::INFINITY,
        );
        let expected: f32 = single.iter().sum();
        assert!((joint - expected).abs() < 1e-3 * expected);
    }

    #[test]
    fn test_early_termination_respects_bound() {
        let a = Array2::<f32>::zeros((8, 8));
        let b = Array2::<f32>::ones((8, 8));
        let windows = [PlaneWindow::new(vec![a.view(), b.view()])];
        let exact = patch_distance(
            &windows,
            PatchRef::new(0, 0, 0),
            PatchRef::new(1, 0, 0),
            f32::INFINITY,
        );
        let bounded = patch_distance(
            &windows,
            PatchRef::new(0, 0, 0),
            PatchRef::new(1, 0, 0),
            0.1,
        );
        assert!((exact - 1.0).abs() < 1e-6);
        assert!(bounded >= 0.1);
        assert!(bounded <= exact + 1e-6);
    }
}
