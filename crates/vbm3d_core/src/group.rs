//! Separable 3D group transform.
//!
//! A group is stored as a `(k, 8, 8)` complex array: every patch gets a 2D
//! transform, then every coefficient position gets a 1D transform across the
//! `k` patches. The inverse runs the stages in reverse order.

use ndarray::{s, Array2, Array3, ArrayView2, Axis};
use rustfft::num_complex::Complex;
use rustfft::Fft;
use std::sync::Arc;

use crate::block_matching::PatchMatch;
use crate::float_trait::Bm3dFloat;
use crate::plane::BLOCK_SIZE;
use crate::transforms;

/// Upper bound on the number of patches in one group.
pub const MAX_GROUP_SIZE: usize = 64;

/// 2D transform applied to each patch of a group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Transform2d {
    /// Unitary 2D FFT.
    #[default]
    Fourier,
    /// Unitary 8x8 Walsh-Hadamard transform (additions only).
    Hadamard,
}

/// Pre-computed FFT plans for the patch transform and for every group length
/// up to `group_size`.
pub struct Bm3dPlans<F: Bm3dFloat> {
    transform: Transform2d,
    fft_2d: Arc<dyn Fft<F>>,
    ifft_2d: Arc<dyn Fft<F>>,
    fft_1d_plans: Vec<Arc<dyn Fft<F>>>,
    ifft_1d_plans: Vec<Arc<dyn Fft<F>>>,
}

impl<F: Bm3dFloat> Bm3dPlans<F> {
    pub fn new(transform: Transform2d, group_size: usize) -> Self {
        let group_size = group_size.max(1);
        let mut planner = rustfft::FftPlanner::new();
        let fft_2d = planner.plan_fft_forward(BLOCK_SIZE);
        let ifft_2d = planner.plan_fft_inverse(BLOCK_SIZE);

        // Index k holds the plan for groups of k patches; slot 0 is unused.
        let mut fft_1d_plans = Vec::with_capacity(group_size + 1);
        let mut ifft_1d_plans = Vec::with_capacity(group_size + 1);
        fft_1d_plans.push(planner.plan_fft_forward(1));
        ifft_1d_plans.push(planner.plan_fft_inverse(1));
        for k in 1..=group_size {
            fft_1d_plans.push(planner.plan_fft_forward(k));
            ifft_1d_plans.push(planner.plan_fft_inverse(k));
        }

        Self {
            transform,
            fft_2d,
            ifft_2d,
            fft_1d_plans,
            ifft_1d_plans,
        }
    }

    pub fn transform(&self) -> Transform2d {
        self.transform
    }

    /// Largest group length these plans can transform.
    pub fn group_size(&self) -> usize {
        self.fft_1d_plans.len() - 1
    }
}

/// Working buffers for one group, sized for the largest group.
pub struct GroupBuffers<F: Bm3dFloat> {
    pub coeffs: Array3<Complex<F>>,
    line: Vec<Complex<F>>,
    column: Vec<Complex<F>>,
    work: Array2<Complex<F>>,
}

impl<F: Bm3dFloat> GroupBuffers<F> {
    pub fn new(group_size: usize) -> Self {
        let group_size = group_size.max(1);
        Self {
            coeffs: Array3::zeros((group_size, BLOCK_SIZE, BLOCK_SIZE)),
            line: vec![Complex::new(F::zero(), F::zero()); BLOCK_SIZE],
            column: vec![Complex::new(F::zero(), F::zero()); group_size],
            work: Array2::zeros((BLOCK_SIZE, BLOCK_SIZE)),
        }
    }
}

/// 2D-transform the patches at `matches` (read from `frames`) into the first
/// `matches.len()` slots of `buf.coeffs`.
pub fn load_group<F: Bm3dFloat>(
    frames: &[ArrayView2<'_, F>],
    matches: &[PatchMatch<F>],
    plans: &Bm3dPlans<F>,
    buf: &mut GroupBuffers<F>,
) {
    for (i, m) in matches.iter().enumerate() {
        let patch = frames[m.frame].slice(s![
            m.row..m.row + BLOCK_SIZE,
            m.col..m.col + BLOCK_SIZE
        ]);
        let out = buf.coeffs.slice_mut(s![i, .., ..]);
        match plans.transform {
            Transform2d::Fourier => {
                transforms::fft2d_into(patch, &plans.fft_2d, &mut buf.line, out)
            }
            Transform2d::Hadamard => transforms::wht2d_8x8_forward_into(patch, out),
        }
    }
}

fn apply_1d_transform<F: Bm3dFloat>(
    buf: &mut GroupBuffers<F>,
    k: usize,
    plan: &Arc<dyn Fft<F>>,
) {
    if k <= 1 {
        return;
    }
    let column = &mut buf.column[..k];
    let mut group = buf.coeffs.slice_mut(s![..k, .., ..]);
    for mut lane in group.lanes_mut(Axis(0)) {
        for (dst, src) in column.iter_mut().zip(lane.iter()) {
            *dst = *src;
        }
        transforms::fft1d_unitary_inplace(column, plan);
        for (dst, src) in lane.iter_mut().zip(column.iter()) {
            *dst = *src;
        }
    }
}

/// Forward 1D transform across the first `k` patches of the group.
pub fn forward_group<F: Bm3dFloat>(buf: &mut GroupBuffers<F>, k: usize, plans: &Bm3dPlans<F>) {
    apply_1d_transform(buf, k, &plans.fft_1d_plans[k]);
}

/// Inverse 1D transform across the first `k` patches of the group.
pub fn inverse_group<F: Bm3dFloat>(buf: &mut GroupBuffers<F>, k: usize, plans: &Bm3dPlans<F>) {
    apply_1d_transform(buf, k, &plans.ifft_1d_plans[k]);
}

/// Inverse 2D transform of patch `i` of the group into `out`.
pub fn unload_patch<F: Bm3dFloat>(
    buf: &mut GroupBuffers<F>,
    i: usize,
    plans: &Bm3dPlans<F>,
    out: &mut Array2<F>,
) {
    let coeffs = buf.coeffs.slice(s![i, .., ..]);
    match plans.transform {
        Transform2d::Fourier => transforms::ifft2d_into(
            coeffs,
            &plans.ifft_2d,
            &mut buf.line,
            &mut buf.work,
            out.view_mut(),
        ),
        Transform2d::Hadamard => transforms::wht2d_8x8_inverse_into(coeffs, out.view_mut()),
    }
}

/// Full forward 3D transform of the patches at `matches`.
pub fn forward_3d<F: Bm3dFloat>(
    frames: &[ArrayView2<'_, F>],
    matches: &[PatchMatch<F>],
    plans: &Bm3dPlans<F>,
    buf: &mut GroupBuffers<F>,
) {
    load_group(frames, matches, plans, buf);
    forward_group(buf, matches.len(), plans);
}
