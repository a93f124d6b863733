//! Plane processor - drives block matching, group transforms, spectral
//! filtering and aggregation over the anchor grid of one invocation.

use ndarray::{Array2, ArrayViewMut2};
use std::ops::Range;

use crate::aggregation::{compute_patch_blend_weights, split_stacked, Accumulator};
use crate::block_matching::{BlockMatcher, SearchParams};
use crate::error::{Bm3dError, Result};
use crate::filtering::{hard_threshold, wiener_filter};
use crate::float_trait::Bm3dFloat;
use crate::group::{forward_3d, inverse_group, unload_patch, Bm3dPlans, GroupBuffers};
use crate::plane::{PlaneWindow, BLOCK_SIZE};
use crate::scratch::{AccumulatorPair, ScratchPool};
use crate::trace::{trace_event, trace_span};

/// Planes whose sigma is below this value are passed through unfiltered.
const PROCESS_EPSILON: f64 = f32::EPSILON as f64;

/// Largest accepted block step; larger steps would leave pixels uncovered.
pub const MAX_BLOCK_STEP: usize = BLOCK_SIZE;

/// Per-plane filter parameters, with sigma already rescaled to the sample
/// range (and multiplied by the hard-threshold factor for basic estimates).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlaneParams<F: Bm3dFloat> {
    pub sigma: F,
    pub block_step: usize,
    pub search: SearchParams,
}

impl<F: Bm3dFloat> PlaneParams<F> {
    pub fn new(sigma: F, block_step: usize, search: SearchParams) -> Self {
        Self {
            sigma,
            block_step,
            search,
        }
    }

    /// Whether this plane is filtered at all.
    pub fn is_active(&self) -> bool {
        self.sigma >= F::from_f64_c(PROCESS_EPSILON)
    }
}

/// Hard-threshold basic estimate, or Wiener final estimate guided by a
/// reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Estimate {
    Basic,
    Final,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Topology {
    /// One frame, normalized output.
    Spatial,
    /// `2 * radius + 1` frames, stacked numerator/denominator output.
    Temporal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Channels {
    /// Every plane matched and filtered on its own.
    Single,
    /// Three equally sized planes share one block-matching result.
    Joint,
}

/// The kernel configuration selected for one invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KernelVariant {
    pub estimate: Estimate,
    pub topology: Topology,
    pub channels: Channels,
}

impl KernelVariant {
    pub fn resolve<F: Bm3dFloat>(inv: &Invocation<'_, '_, F>) -> Self {
        Self {
            estimate: if inv.reference.is_some() {
                Estimate::Final
            } else {
                Estimate::Basic
            },
            topology: if inv.radius() > 0 {
                Topology::Temporal
            } else {
                Topology::Spatial
            },
            channels: if inv.chroma {
                Channels::Joint
            } else {
                Channels::Single
            },
        }
    }
}

/// Lifecycle of a [`PlaneProcessor`] run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProcessorState {
    #[default]
    Idle,
    Accumulating,
    Normalizing,
    Done,
}

/// Counters collected over one invocation.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct KernelStats {
    pub groups: u64,
    pub matched_patches: u64,
    /// Output pixels that fell back to the source value.
    pub fallback_pixels: u64,
}

impl KernelStats {
    pub fn merge(self, other: Self) -> Self {
        Self {
            groups: self.groups + other.groups,
            matched_patches: self.matched_patches + other.matched_patches,
            fallback_pixels: self.fallback_pixels + other.fallback_pixels,
        }
    }
}

/// Side-channel information attached to stacked temporal output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TemporalMetadata {
    pub radius: usize,
    /// Which planes were filtered; unfiltered planes hold no accumulation.
    pub process: [bool; 3],
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InvocationReport {
    pub stats: KernelStats,
    pub metadata: Option<TemporalMetadata>,
}

/// Everything one kernel run reads.
///
/// `source[p]` is the temporal window of plane `p`; `reference`, when present,
/// has the same shape and switches the run to the final (Wiener) estimate.
pub struct Invocation<'i, 'a, F: Bm3dFloat> {
    pub source: &'i [PlaneWindow<'a, F>],
    pub reference: Option<&'i [PlaneWindow<'a, F>]>,
    pub params: &'i [PlaneParams<F>],
    /// Match once over all three planes instead of per plane.
    pub chroma: bool,
    pub pool: Option<&'i ScratchPool<F>>,
}

impl<'i, 'a, F: Bm3dFloat> Invocation<'i, 'a, F> {
    pub fn new(source: &'i [PlaneWindow<'a, F>], params: &'i [PlaneParams<F>]) -> Self {
        Self {
            source,
            reference: None,
            params,
            chroma: false,
            pool: None,
        }
    }

    pub fn with_reference(mut self, reference: &'i [PlaneWindow<'a, F>]) -> Self {
        self.reference = Some(reference);
        self
    }

    pub fn with_chroma(mut self, chroma: bool) -> Self {
        self.chroma = chroma;
        self
    }

    pub fn with_pool(mut self, pool: &'i ScratchPool<F>) -> Self {
        self.pool = Some(pool);
        self
    }

    pub fn radius(&self) -> usize {
        self.source.first().map_or(0, PlaneWindow::radius)
    }

    /// Expected `(rows, cols)` of the destination for plane `p`.
    pub fn destination_dim(&self, p: usize) -> (usize, usize) {
        let (rows, cols) = self.source[p].dim();
        match self.radius() {
            0 => (rows, cols),
            r => (2 * (2 * r + 1) * rows, cols),
        }
    }

    fn process_flags(&self) -> [bool; 3] {
        let mut process = [false; 3];
        for (flag, params) in process.iter_mut().zip(self.params) {
            *flag = params.is_active();
        }
        process
    }

    /// Plane ranges that are matched together.
    fn plane_sets(&self, channels: Channels) -> Vec<Range<usize>> {
        match channels {
            Channels::Joint => vec![0..self.source.len()],
            Channels::Single => (0..self.source.len()).map(|p| p..p + 1).collect(),
        }
    }
}

/// Anchor origins along one axis: every `step`-th position plus the last
/// valid one, so the whole extent is covered.
pub fn anchor_positions(extent: usize, step: usize) -> Vec<usize> {
    if extent < BLOCK_SIZE {
        return Vec::new();
    }
    let last = extent - BLOCK_SIZE;
    let mut positions: Vec<usize> = (0..=last).step_by(step.max(1)).collect();
    if positions.last() != Some(&last) {
        positions.push(last);
    }
    positions
}

fn with_accumulation_buffers<F: Bm3dFloat, R>(
    pool: Option<&ScratchPool<F>>,
    planes: usize,
    dim: (usize, usize),
    f: impl FnOnce(&mut [AccumulatorPair<'_, F>]) -> R,
) -> R {
    match pool {
        Some(pool) => pool.with_buffers(planes, dim, f),
        None => {
            let mut local: Vec<(Array2<F>, Array2<F>)> = (0..planes)
                .map(|_| (Array2::zeros(dim), Array2::zeros(dim)))
                .collect();
            let mut views: Vec<AccumulatorPair<'_, F>> = local
                .iter_mut()
                .map(|(num, den)| (num.view_mut(), den.view_mut()))
                .collect();
            f(&mut views)
        }
    }
}

/// Runs one invocation through the `Idle -> Accumulating -> Normalizing ->
/// Done` lifecycle.
pub struct PlaneProcessor<'p, F: Bm3dFloat> {
    plans: &'p Bm3dPlans<F>,
    state: ProcessorState,
}

impl<'p, F: Bm3dFloat> PlaneProcessor<'p, F> {
    pub fn new(plans: &'p Bm3dPlans<F>) -> Self {
        Self {
            plans,
            state: ProcessorState::Idle,
        }
    }

    pub fn state(&self) -> ProcessorState {
        self.state
    }

    /// Filter `inv` into `dst` (one view per source plane).
    ///
    /// Spatial runs write final pixels; planes with zero sigma receive a copy
    /// of the source. Temporal runs write the stacked numerator/denominator
    /// layout and leave unfiltered planes untouched.
    pub fn run(
        &mut self,
        inv: &Invocation<'_, '_, F>,
        dst: &mut [ArrayViewMut2<'_, F>],
    ) -> InvocationReport {
        let variant = KernelVariant::resolve(inv);
        let _span = trace_span!(
            "vbm3d_invocation",
            planes = inv.source.len(),
            radius = inv.radius(),
            final_estimate = variant.estimate == Estimate::Final,
            joint = variant.channels == Channels::Joint
        )
        .entered();

        self.state = ProcessorState::Accumulating;
        let stats = match (variant.estimate, variant.topology) {
            (Estimate::Basic, Topology::Spatial) => self.run_spatial::<false>(inv, variant, dst),
            (Estimate::Final, Topology::Spatial) => self.run_spatial::<true>(inv, variant, dst),
            (Estimate::Basic, Topology::Temporal) => self.run_temporal::<false>(inv, variant, dst),
            (Estimate::Final, Topology::Temporal) => self.run_temporal::<true>(inv, variant, dst),
        };
        self.state = ProcessorState::Done;

        trace_event!(
            "vbm3d_invocation_done",
            groups = stats.groups,
            matched_patches = stats.matched_patches,
            fallback_pixels = stats.fallback_pixels
        );

        let metadata = match variant.topology {
            Topology::Spatial => None,
            Topology::Temporal => Some(TemporalMetadata {
                radius: inv.radius(),
                process: inv.process_flags(),
            }),
        };
        InvocationReport { stats, metadata }
    }

    fn run_spatial<const FINAL: bool>(
        &mut self,
        inv: &Invocation<'_, '_, F>,
        variant: KernelVariant,
        dst: &mut [ArrayViewMut2<'_, F>],
    ) -> KernelStats {
        let mut stats = KernelStats::default();
        for set in inv.plane_sets(variant.channels) {
            let active: Vec<usize> = set.clone().filter(|&p| inv.params[p].is_active()).collect();
            for p in set.clone().filter(|p| !active.contains(p)) {
                dst[p].assign(&inv.source[p].center());
            }
            if active.is_empty() {
                continue;
            }

            let dim = inv.source[set.start].dim();
            let set_stats = with_accumulation_buffers(inv.pool, active.len(), dim, |pairs| {
                let mut accs: Vec<Vec<Accumulator<'_, F>>> = pairs
                    .iter_mut()
                    .map(|(num, den)| vec![Accumulator::new(num.view_mut(), den.view_mut())])
                    .collect();
                let mut set_stats = self.accumulate::<FINAL>(inv, set.clone(), &active, &mut accs);

                self.state = ProcessorState::Normalizing;
                for (frames, &p) in accs.iter().zip(&active) {
                    let fallback =
                        frames[0].normalize_into(inv.source[p].center(), dst[p].view_mut());
                    set_stats.fallback_pixels += fallback as u64;
                }
                set_stats
            });
            stats = stats.merge(set_stats);
            self.state = ProcessorState::Accumulating;
        }
        self.state = ProcessorState::Normalizing;
        stats
    }

    fn run_temporal<const FINAL: bool>(
        &mut self,
        inv: &Invocation<'_, '_, F>,
        variant: KernelVariant,
        dst: &mut [ArrayViewMut2<'_, F>],
    ) -> KernelStats {
        let frames = 2 * inv.radius() + 1;
        let mut stats = KernelStats::default();
        let mut views: Vec<Option<ArrayViewMut2<'_, F>>> =
            dst.iter_mut().map(|d| Some(d.view_mut())).collect();

        for set in inv.plane_sets(variant.channels) {
            let active: Vec<usize> = set.clone().filter(|&p| inv.params[p].is_active()).collect();
            if active.is_empty() {
                continue;
            }
            let frame_height = inv.source[set.start].dim().0;
            let mut accs: Vec<Vec<Accumulator<'_, F>>> = Vec::with_capacity(active.len());
            for &p in &active {
                if let Some(mut view) = views[p].take() {
                    view.fill(F::zero());
                    accs.push(split_stacked(view, frame_height, frames));
                }
            }
            stats = stats.merge(self.accumulate::<FINAL>(inv, set, &active, &mut accs));
        }
        // The stacked buffers are handed over as-is; merging them is done
        // downstream.
        self.state = ProcessorState::Normalizing;
        stats
    }

    /// Match, filter and aggregate every anchor of the planes in `set`.
    ///
    /// `accs[j]` holds one accumulator per window frame for plane `active[j]`.
    fn accumulate<const FINAL: bool>(
        &self,
        inv: &Invocation<'_, '_, F>,
        set: Range<usize>,
        active: &[usize],
        accs: &mut [Vec<Accumulator<'_, F>>],
    ) -> KernelStats {
        let plans = self.plans;
        let lead = inv.params[set.start];
        let pilot = match (FINAL, inv.reference) {
            (true, Some(reference)) => reference,
            _ => inv.source,
        };
        let guide = &pilot[set.clone()];
        let (rows, cols) = inv.source[set.start].dim();
        let anchor_rows = anchor_positions(rows, lead.block_step);
        let anchor_cols = anchor_positions(cols, lead.block_step);

        let group_size = plans.group_size();
        let mut matcher = BlockMatcher::new(lead.search, group_size);
        let mut noisy_buf = GroupBuffers::new(group_size);
        let mut pilot_buf = GroupBuffers::new(group_size);
        let window = compute_patch_blend_weights::<F>(BLOCK_SIZE);
        let mut patch = Array2::<F>::zeros((BLOCK_SIZE, BLOCK_SIZE));
        let mut stats = KernelStats::default();

        for &row in &anchor_rows {
            for &col in &anchor_cols {
                let group = matcher.find_group(guide, row, col);
                let k = group.len();
                stats.groups += 1;
                stats.matched_patches += k as u64;

                for (frames, &p) in accs.iter_mut().zip(active) {
                    let sigma = inv.params[p].sigma;
                    forward_3d(&inv.source[p].frames, group, plans, &mut noisy_buf);
                    let weight = if FINAL {
                        forward_3d(&pilot[p].frames, group, plans, &mut pilot_buf);
                        wiener_filter(&mut noisy_buf.coeffs, &pilot_buf.coeffs, k, sigma)
                    } else {
                        hard_threshold(&mut noisy_buf.coeffs, k, sigma)
                    };
                    inverse_group(&mut noisy_buf, k, plans);

                    for (i, m) in group.iter().enumerate() {
                        unload_patch(&mut noisy_buf, i, plans, &mut patch);
                        frames[m.frame].add_patch(&patch, m.row, m.col, weight, &window);
                    }
                }
            }
        }
        stats
    }
}

/// Run one invocation without validation.
///
/// Callers must uphold the shape requirements checked by
/// [`run_invocation_checked`]; violating them panics on an out-of-bounds
/// slice.
pub fn run_invocation<F: Bm3dFloat>(
    inv: &Invocation<'_, '_, F>,
    plans: &Bm3dPlans<F>,
    dst: &mut [ArrayViewMut2<'_, F>],
) -> InvocationReport {
    PlaneProcessor::new(plans).run(inv, dst)
}

/// Validate shapes and parameters, then run the invocation.
pub fn run_invocation_checked<F: Bm3dFloat>(
    inv: &Invocation<'_, '_, F>,
    plans: &Bm3dPlans<F>,
    dst: &mut [ArrayViewMut2<'_, F>],
) -> Result<InvocationReport> {
    validate_invocation(inv, dst)?;
    Ok(run_invocation(inv, plans, dst))
}

fn check_window<F: Bm3dFloat>(
    what: &'static str,
    window: &PlaneWindow<'_, F>,
    expected_len: usize,
    expected_dim: (usize, usize),
) -> Result<()> {
    if window.len() != expected_len {
        return Err(Bm3dError::invalid(
            "radius",
            format!(
                "{what} window has {} frames, expected {expected_len}",
                window.len()
            ),
        ));
    }
    for frame in &window.frames {
        if frame.dim() != expected_dim {
            return Err(Bm3dError::DimensionMismatch {
                what,
                expected: expected_dim,
                actual: frame.dim(),
            });
        }
    }
    Ok(())
}

fn check_plane_params<F: Bm3dFloat>(params: &PlaneParams<F>) -> Result<()> {
    if !params.sigma.is_finite() || params.sigma < F::zero() {
        return Err(Bm3dError::invalid("sigma", "must be finite and non-negative"));
    }
    if params.block_step == 0 || params.block_step > MAX_BLOCK_STEP {
        return Err(Bm3dError::invalid(
            "block_step",
            format!("must be in range [1, {MAX_BLOCK_STEP}]"),
        ));
    }
    if params.search.bm_range == 0 {
        return Err(Bm3dError::invalid("bm_range", "must be positive"));
    }
    if params.search.ps_num == 0 {
        return Err(Bm3dError::invalid("ps_num", "must be positive"));
    }
    if params.search.ps_range == 0 {
        return Err(Bm3dError::invalid("ps_range", "must be positive"));
    }
    Ok(())
}

fn validate_invocation<F: Bm3dFloat>(
    inv: &Invocation<'_, '_, F>,
    dst: &[ArrayViewMut2<'_, F>],
) -> Result<()> {
    let planes = inv.source.len();
    if planes == 0 || planes > 3 {
        return Err(Bm3dError::invalid(
            "source",
            format!("expected 1 to 3 planes, got {planes}"),
        ));
    }
    if inv.params.len() != planes {
        return Err(Bm3dError::invalid(
            "params",
            format!("expected {planes} entries, got {}", inv.params.len()),
        ));
    }
    let window_len = inv.source[0].len();
    if window_len % 2 == 0 {
        return Err(Bm3dError::invalid(
            "radius",
            format!("window of {window_len} frames has no centre"),
        ));
    }
    if inv.chroma && planes != 3 {
        return Err(Bm3dError::UnsupportedFormat(format!(
            "joint chroma filtering needs 3 planes, got {planes}"
        )));
    }

    for (p, window) in inv.source.iter().enumerate() {
        let dim = window.dim();
        if dim.0 < BLOCK_SIZE || dim.1 < BLOCK_SIZE {
            return Err(Bm3dError::PlaneTooSmall {
                height: dim.0,
                width: dim.1,
                block: BLOCK_SIZE,
            });
        }
        if inv.chroma && dim != inv.source[0].dim() {
            return Err(Bm3dError::UnsupportedFormat(
                "joint chroma filtering needs planes of equal size".to_string(),
            ));
        }
        check_window("source", window, window_len, dim)?;
        check_plane_params(&inv.params[p])?;
    }

    if let Some(reference) = inv.reference {
        if reference.len() != planes {
            return Err(Bm3dError::invalid(
                "reference",
                format!("expected {planes} planes, got {}", reference.len()),
            ));
        }
        for (window, source) in reference.iter().zip(inv.source) {
            check_window("reference", window, window_len, source.dim())?;
        }
    }

    if dst.len() != planes {
        return Err(Bm3dError::invalid(
            "destination",
            format!("expected {planes} planes, got {}", dst.len()),
        ));
    }
    for (p, view) in dst.iter().enumerate() {
        let expected = inv.destination_dim(p);
        if view.dim() != expected {
            return Err(Bm3dError::DimensionMismatch {
                what: "destination",
                expected,
                actual: view.dim(),
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::group::Transform2d;
    use ndarray::s;

    // Simple Linear Congruential Generator for deterministic test data
    struct SimpleLcg {
        state: u64,
    }

    impl SimpleLcg {
        fn new(seed: u64) -> Self {
            Self { state: seed }
        }

        fn next_f64(&mut self) -> f64 {
            self.state = self.state.wrapping_mul(6364136223846793005).wrapping_add(1);
            (self.state >> 11) as f64 / (1u64 << 53) as f64
        }
    }

    fn random_matrix(rows: usize, cols: usize, seed: u64) -> Array2<f64> {
        let mut rng = SimpleLcg::new(seed);
        Array2::from_shape_fn((rows, cols), |_| rng.next_f64())
    }

    const SEARCH: SearchParams = SearchParams {
        bm_range: 9,
        ps_num: 2,
        ps_range: 4,
    };

    fn plane(sigma: f64) -> PlaneParams<f64> {
        PlaneParams::new(sigma, 8, SEARCH)
    }

    fn plans() -> Bm3dPlans<f64> {
        Bm3dPlans::new(Transform2d::Fourier, 8)
    }

    fn run_single(img: &Array2<f64>, p: PlaneParams<f64>) -> (Array2<f64>, InvocationReport) {
        let source = [PlaneWindow::single(img.view())];
        let params = [p];
        let inv = Invocation::new(&source, &params);
        let mut out = Array2::<f64>::zeros(img.dim());
        let report = run_invocation_checked(&inv, &plans(), &mut [out.view_mut()]).unwrap();
        (out, report)
    }

    #[test]
    fn test_anchor_positions_cover_extent() {
        assert_eq!(anchor_positions(32, 8), vec![0, 8, 16, 24]);
        assert_eq!(anchor_positions(30, 8), vec![0, 8, 16, 22]);
        assert_eq!(anchor_positions(8, 3), vec![0]);
        assert_eq!(anchor_positions(11, 1), vec![0, 1, 2, 3]);
        assert!(anchor_positions(7, 1).is_empty());
    }

    #[test]
    fn test_zero_sigma_passes_through() {
        let img = random_matrix(24, 40, 1);
        let (out, report) = run_single(&img, plane(0.0));
        assert_eq!(out, img);
        assert_eq!(report.stats.groups, 0);
        assert!(report.metadata.is_none());
    }

    #[test]
    fn test_flat_plane_stays_flat() {
        let img = Array2::<f64>::from_elem((32, 32), 0.5);
        let (out, report) = run_single(&img, plane(0.1));
        for &v in out.iter() {
            assert!((v - 0.5).abs() < 1e-9, "got {}", v);
        }
        assert_eq!(report.stats.groups, 16);
        assert_eq!(report.stats.fallback_pixels, 0);
    }

    #[test]
    fn test_every_pixel_is_covered() {
        let img = random_matrix(37, 29, 2);
        for step in [1usize, 3, 5, 8] {
            let (out, report) = run_single(&img, PlaneParams::new(0.05, step, SEARCH));
            assert_eq!(report.stats.fallback_pixels, 0, "step {}", step);
            assert!(out.iter().all(|v| v.is_finite()));
        }
    }

    #[test]
    fn test_runs_are_deterministic() {
        let img = random_matrix(40, 40, 3);
        let (a, _) = run_single(&img, plane(0.1));
        let (b, _) = run_single(&img, plane(0.1));
        assert_eq!(a, b);
    }

    #[test]
    fn test_pool_and_local_buffers_agree() {
        let img = random_matrix(32, 24, 4);
        let source = [PlaneWindow::single(img.view())];
        let params = [plane(0.2)];
        let plans = plans();
        let pool = ScratchPool::new();

        let mut pooled = Array2::<f64>::zeros(img.dim());
        let inv = Invocation::new(&source, &params).with_pool(&pool);
        run_invocation(&inv, &plans, &mut [pooled.view_mut()]);
        // Second use of the same (now dirty) pool buffers.
        run_invocation(&inv, &plans, &mut [pooled.view_mut()]);

        let (local, _) = run_single(&img, params[0]);
        assert_eq!(pooled, local);
        assert_eq!(pool.len(), 1);
    }

    #[test]
    fn test_final_estimate_with_clean_reference_keeps_signal() {
        let img = random_matrix(32, 32, 5);
        let source = [PlaneWindow::single(img.view())];
        let reference = [PlaneWindow::single(img.view())];
        let params = [plane(1e-3)];
        let inv = Invocation::new(&source, &params).with_reference(&reference);
        let mut out = Array2::<f64>::zeros(img.dim());
        run_invocation_checked(&inv, &plans(), &mut [out.view_mut()]).unwrap();
        for (a, b) in out.iter().zip(img.iter()) {
            assert!((a - b).abs() < 1e-2);
        }
    }

    #[test]
    fn test_processor_reaches_done() {
        let img = random_matrix(16, 16, 6);
        let source = [PlaneWindow::single(img.view())];
        let params = [plane(0.1)];
        let inv = Invocation::new(&source, &params);
        let plans = plans();
        let mut processor = PlaneProcessor::new(&plans);
        assert_eq!(processor.state(), ProcessorState::Idle);
        let mut out = Array2::<f64>::zeros(img.dim());
        processor.run(&inv, &mut [out.view_mut()]);
        assert_eq!(processor.state(), ProcessorState::Done);
    }

    #[test]
    fn test_temporal_output_layout() {
        let frames: Vec<Array2<f64>> = (0..3).map(|t| random_matrix(24, 24, 10 + t)).collect();
        let source = [PlaneWindow::new(frames.iter().map(|f| f.view()).collect())];
        let params = [plane(0.1)];
        let inv = Invocation::new(&source, &params);
        assert_eq!(inv.destination_dim(0), (144, 24));

        let mut out = Array2::<f64>::from_elem((144, 24), 9.0);
        let report = run_invocation_checked(&inv, &plans(), &mut [out.view_mut()]).unwrap();
        assert_eq!(
            report.metadata,
            Some(TemporalMetadata {
                radius: 1,
                process: [true, false, false],
            })
        );

        // Centre frame: numerator rows [48, 72), denominator rows [72, 96).
        let center_den = out.slice(s![72..96, ..]);
        assert!(center_den.iter().all(|&v| v > 0.0));
        for t in 0..3 {
            let den = out.slice(s![(2 * t + 1) * 24..(2 * t + 2) * 24, ..]);
            assert!(den.iter().all(|&v| v >= 0.0));
        }
    }

    #[test]
    fn test_temporal_leaves_unprocessed_plane_untouched() {
        let frames: Vec<Array2<f64>> = (0..3).map(|t| random_matrix(16, 16, 20 + t)).collect();
        let window = PlaneWindow::new(frames.iter().map(|f| f.view()).collect());
        let source = [window.clone(), window];
        let params = [plane(0.1), plane(0.0)];
        let inv = Invocation::new(&source, &params);
        let mut a = Array2::<f64>::zeros((96, 16));
        let mut b = Array2::<f64>::from_elem((96, 16), 3.0);
        let report =
            run_invocation_checked(&inv, &plans(), &mut [a.view_mut(), b.view_mut()]).unwrap();
        assert!(b.iter().all(|&v| v == 3.0));
        assert_eq!(report.metadata.map(|m| m.process), Some([true, false, false]));
    }

    #[test]
    fn test_final_temporal_reference_equals_source() {
        let frames: Vec<Array2<f64>> = (0..3).map(|t| random_matrix(24, 24, 30 + t)).collect();
        let window = PlaneWindow::new(frames.iter().map(|f| f.view()).collect());
        let source = [window.clone()];
        let reference = [window];
        let params = [plane(1e-3)];
        let inv = Invocation::new(&source, &params).with_reference(&reference);
        assert_eq!(KernelVariant::resolve(&inv).estimate, Estimate::Final);
        assert_eq!(KernelVariant::resolve(&inv).topology, Topology::Temporal);

        let mut out = Array2::<f64>::zeros((144, 24));
        let report = run_invocation_checked(&inv, &plans(), &mut [out.view_mut()]).unwrap();
        assert_eq!(report.metadata.map(|m| m.radius), Some(1));

        let num = out.slice(s![48..72, ..]);
        let den = out.slice(s![72..96, ..]);
        for ((&n, &d), &v) in num.iter().zip(den.iter()).zip(frames[1].iter()) {
            assert!(d > 0.0);
            assert!((n / d - v).abs() < 1e-4, "{} vs {}", n / d, v);
        }
    }

    #[test]
    fn test_joint_temporal_fills_every_processed_plane() {
        let planes: Vec<Vec<Array2<f64>>> = (0..3)
            .map(|p| (0..3).map(|t| random_matrix(16, 16, 40 + 10 * p + t)).collect())
            .collect();
        let source: Vec<PlaneWindow<'_, f64>> = planes
            .iter()
            .map(|frames| PlaneWindow::new(frames.iter().map(|f| f.view()).collect()))
            .collect();
        let plans = plans();

        for (params, process) in [
            ([plane(0.1), plane(0.1), plane(0.1)], [true, true, true]),
            ([plane(0.1), plane(0.0), plane(0.05)], [true, false, true]),
        ] {
            let inv = Invocation::new(&source, &params).with_chroma(true);
            assert_eq!(KernelVariant::resolve(&inv).channels, Channels::Joint);
            let mut outs: Vec<Array2<f64>> =
                (0..3).map(|_| Array2::from_elem((96, 16), 5.0)).collect();
            let mut views: Vec<_> = outs.iter_mut().map(|o| o.view_mut()).collect();
            let report = run_invocation_checked(&inv, &plans, &mut views).unwrap();
            assert_eq!(
                report.metadata,
                Some(TemporalMetadata { radius: 1, process })
            );

            for (out, &active) in outs.iter().zip(&process) {
                if active {
                    assert!(out.slice(s![48..64, ..]).iter().any(|&v| v != 0.0));
                    assert!(out.slice(s![64..80, ..]).iter().all(|&v| v > 0.0));
                    assert!(out.iter().all(|&v| v != 5.0));
                } else {
                    assert!(out.iter().all(|&v| v == 5.0));
                }
            }
        }
    }

    #[test]
    fn test_joint_matching_on_identical_planes_matches_single() {
        let img = random_matrix(32, 32, 7);
        let (single, _) = run_single(&img, plane(0.15));

        let source = [
            PlaneWindow::single(img.view()),
            PlaneWindow::single(img.view()),
            PlaneWindow::single(img.view()),
        ];
        let params = [plane(0.15), plane(0.0), plane(0.15)];
        let inv = Invocation::new(&source, &params).with_chroma(true);
        let mut outs: Vec<Array2<f64>> = (0..3).map(|_| Array2::zeros((32, 32))).collect();
        let mut views: Vec<_> = outs.iter_mut().map(|o| o.view_mut()).collect();
        run_invocation_checked(&inv, &plans(), &mut views).unwrap();

        assert_eq!(outs[1], img);
        for p in [0, 2] {
            for (a, b) in outs[p].iter().zip(single.iter()) {
                assert!((a - b).abs() < 1e-12);
            }
        }
    }

    #[test]
    fn test_checked_rejects_bad_shapes() {
        let img = random_matrix(16, 16, 8);
        let small = random_matrix(7, 16, 9);
        let source = [PlaneWindow::single(img.view())];
        let params = [plane(0.1)];
        let plans = plans();

        let inv = Invocation::new(&source, &params);
        let mut wrong = Array2::<f64>::zeros((16, 15));
        let err = run_invocation_checked(&inv, &plans, &mut [wrong.view_mut()]).unwrap_err();
        assert!(matches!(err, Bm3dError::DimensionMismatch { what: "destination", .. }));

        let tiny = [PlaneWindow::single(small.view())];
        let inv = Invocation::new(&tiny, &params);
        let mut out = Array2::<f64>::zeros((7, 16));
        let err = run_invocation_checked(&inv, &plans, &mut [out.view_mut()]).unwrap_err();
        assert!(matches!(err, Bm3dError::PlaneTooSmall { .. }));

        let inv = Invocation::new(&source, &params).with_chroma(true);
        let mut out = Array2::<f64>::zeros((16, 16));
        let err = run_invocation_checked(&inv, &plans, &mut [out.view_mut()]).unwrap_err();
        assert!(matches!(err, Bm3dError::UnsupportedFormat(_)));

        let bad = [PlaneParams::new(0.1, 9, SEARCH)];
        let inv = Invocation::new(&source, &bad);
        let err = run_invocation_checked(&inv, &plans, &mut [out.view_mut()]).unwrap_err();
        assert!(matches!(err, Bm3dError::InvalidParameter { name: "block_step", .. }));
    }
}
