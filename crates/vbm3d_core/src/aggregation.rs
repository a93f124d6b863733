//! Overlap-add aggregation of filtered patches.

use ndarray::{s, Array2, ArrayView2, ArrayViewMut2, Axis, Zip};

use crate::float_trait::Bm3dFloat;
use crate::plane::BLOCK_SIZE;

/// Build separable patch-blend weights for overlap-add aggregation.
///
/// Uses a sine window with positive edges (no hard zeros), then normalizes
/// mean weight to 1.0 so effective global scaling remains stable.
pub fn compute_patch_blend_weights<F: Bm3dFloat>(patch_size: usize) -> Array2<F> {
    if patch_size <= 1 {
        return Array2::ones((patch_size.max(1), patch_size.max(1)));
    }

    let n = F::usize_as(patch_size);
    let half = F::from_f64_c(0.5);
    let one_d: Vec<F> = (0..patch_size)
        .map(|i| (F::PI * (F::usize_as(i) + half) / n).sin())
        .collect();

    let mut weights =
        Array2::<F>::from_shape_fn((patch_size, patch_size), |(r, c)| one_d[r] * one_d[c]);
    let mean = weights.sum() / F::usize_as(patch_size * patch_size);
    if mean > F::zero() {
        weights.mapv_inplace(|v| v / mean);
    }
    weights
}

/// Numerator/denominator pair covering one frame of one plane.
pub struct Accumulator<'b, F: Bm3dFloat> {
    pub numerator: ArrayViewMut2<'b, F>,
    pub denominator: ArrayViewMut2<'b, F>,
}

impl<'b, F: Bm3dFloat> Accumulator<'b, F> {
    pub fn new(numerator: ArrayViewMut2<'b, F>, denominator: ArrayViewMut2<'b, F>) -> Self {
        debug_assert_eq!(numerator.dim(), denominator.dim());
        Self {
            numerator,
            denominator,
        }
    }

    /// Add `weight * window * patch` to the numerator and `weight * window`
    /// to the denominator at block origin `(row, col)`.
    pub fn add_patch(
        &mut self,
        patch: &Array2<F>,
        row: usize,
        col: usize,
        weight: F,
        window: &Array2<F>,
    ) {
        let region = s![row..row + BLOCK_SIZE, col..col + BLOCK_SIZE];
        Zip::from(self.numerator.slice_mut(region))
            .and(self.denominator.slice_mut(region))
            .and(patch)
            .and(window)
            .for_each(|num, den, &p, &w| {
                let wt = weight * w;
                *num += p * wt;
                *den += wt;
            });
    }

    /// Write `numerator / denominator` into `dst`, falling back to
    /// `fallback` wherever the denominator is not positive.
    ///
    /// Returns the number of pixels that used the fallback.
    pub fn normalize_into(&self, fallback: ArrayView2<F>, dst: ArrayViewMut2<F>) -> usize {
        let mut fallback_pixels = 0usize;
        Zip::from(dst)
            .and(&self.numerator)
            .and(&self.denominator)
            .and(fallback)
            .for_each(|out, &num, &den, &src| {
                if den > F::zero() {
                    *out = num / den;
                } else {
                    *out = src;
                    fallback_pixels += 1;
                }
            });
        fallback_pixels
    }
}

/// Split a stacked temporal destination into one accumulator per frame.
///
/// The destination holds `frames` pairs of `frame_height`-row blocks:
/// numerator first, then denominator.
pub fn split_stacked<F: Bm3dFloat>(
    mut stacked: ArrayViewMut2<'_, F>,
    frame_height: usize,
    frames: usize,
) -> Vec<Accumulator<'_, F>> {
    debug_assert!(stacked.nrows() >= 2 * frames * frame_height);
    let mut out = Vec::with_capacity(frames);
    for _ in 0..frames {
        let (numerator, rest) = stacked.split_at(Axis(0), frame_height);
        let (denominator, rest) = rest.split_at(Axis(0), frame_height);
        out.push(Accumulator::new(numerator, denominator));
        stacked = rest;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn aggregate_patch_reference(
        spatial: &Array2<f32>,
        row: usize,
        col: usize,
        weight: f32,
        window: &Array2<f32>,
        rows: usize,
        cols: usize,
    ) -> (Array2<f32>, Array2<f32>) {
        let mut numerator = Array2::<f32>::zeros((rows, cols));
        let mut denominator = Array2::<f32>::zeros((rows, cols));
        for pr in 0..BLOCK_SIZE {
            for pc in 0..BLOCK_SIZE {
                let w = weight * window[[pr, pc]];
                numerator[[row + pr, col + pc]] += spatial[[pr, pc]] * w;
                denominator[[row + pr, col + pc]] += w;
            }
        }
        (numerator, denominator)
    }

    #[test]
    fn test_blend_weights_positive_with_unit_mean() {
        let w = compute_patch_blend_weights::<f64>(8);
        assert!(w.iter().all(|&v| v > 0.0));
        assert!((w.mean().unwrap() - 1.0).abs() < 1e-12);
        // Centre outweighs the border.
        assert!(w[[3, 3]] > w[[0, 0]]);
        assert_eq!(w[[0, 7]], w[[7, 0]]);
    }

    #[test]
    fn test_add_patch_matches_reference() {
        let (rows, cols) = (16usize, 20usize);
        let spatial =
            Array2::from_shape_fn((8, 8), |(r, c)| 1.0 + (r * 8 + c) as f32 * 0.01);
        let window = compute_patch_blend_weights::<f32>(8);
        let mut num = Array2::<f32>::zeros((rows, cols));
        let mut den = Array2::<f32>::zeros((rows, cols));
        {
            let mut acc = Accumulator::new(num.view_mut(), den.view_mut());
            acc.add_patch(&spatial, 5, 9, 0.75, &window);
        }
        let (num_ref, den_ref) = aggregate_patch_reference(&spatial, 5, 9, 0.75, &window, rows, cols);
        for ((a, b), (c, d)) in num.iter().zip(num_ref.iter()).zip(den.iter().zip(den_ref.iter())) {
            assert!((a - b).abs() < 1e-6);
            assert!((c - d).abs() < 1e-6);
        }
    }

    #[test]
    fn test_normalize_recovers_common_value() {
        let window = compute_patch_blend_weights::<f64>(8);
        let patch = Array2::<f64>::from_elem((8, 8), 0.4);
        let mut num = Array2::<f64>::zeros((12, 12));
        let mut den = Array2::<f64>::zeros((12, 12));
        let mut acc = Accumulator::new(num.view_mut(), den.view_mut());
        acc.add_patch(&patch, 0, 0, 0.2, &window);
        acc.add_patch(&patch, 4, 4, 3.0, &window);

        let fallback = Array2::<f64>::from_elem((12, 12), -1.0);
        let mut out = Array2::<f64>::zeros((12, 12));
        let fallbacks = acc.normalize_into(fallback.view(), out.view_mut());

        // Covered pixels hold the patch value, uncovered ones the fallback.
        assert_eq!(fallbacks, 2 * 4 * 4);
        assert!((out[[6, 6]] - 0.4).abs() < 1e-12);
        assert!((out[[1, 1]] - 0.4).abs() < 1e-12);
        assert_eq!(out[[0, 11]], -1.0);
        assert_eq!(out[[11, 0]], -1.0);
    }

    #[test]
    fn test_split_stacked_layout() {
        // Three frames of height 8: rows [16t, 16t + 8) numerator,
        // [16t + 8, 16t + 16) denominator.
        let mut stacked = Array2::<f32>::zeros((48, 10));
        {
            let mut accs = split_stacked(stacked.view_mut(), 8, 3);
            assert_eq!(accs.len(), 3);
            for (t, acc) in accs.iter_mut().enumerate() {
                acc.numerator.fill(t as f32 + 1.0);
                acc.denominator.fill(-(t as f32 + 1.0));
            }
        }
        for t in 0..3 {
            assert_eq!(stacked[[16 * t, 0]], t as f32 + 1.0);
            assert_eq!(stacked[[16 * t + 7, 9]], t as f32 + 1.0);
            assert_eq!(stacked[[16 * t + 8, 0]], -(t as f32 + 1.0));
            assert_eq!(stacked[[16 * t + 15, 9]], -(t as f32 + 1.0));
        }
    }
}
