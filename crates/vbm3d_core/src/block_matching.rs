use rustc_hash::FxHashSet;

use crate::float_trait::Bm3dFloat;
use crate::metric::{patch_distance, PatchRef};
use crate::plane::{PlaneWindow, BLOCK_SIZE};

/// A matched block and its distance to the anchor.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PatchMatch<F: Bm3dFloat> {
    pub frame: usize,
    pub row: usize,
    pub col: usize,
    pub distance: F,
}

impl<F: Bm3dFloat> PatchMatch<F> {
    pub fn new(patch: PatchRef, distance: F) -> Self {
        Self {
            frame: patch.frame,
            row: patch.row,
            col: patch.col,
            distance,
        }
    }

    pub fn patch(&self) -> PatchRef {
        PatchRef::new(self.frame, self.row, self.col)
    }
}

/// Fixed-capacity container keeping the best (smallest distance) matches in
/// ascending order.
///
/// Equal distances keep insertion order, so a candidate visited earlier
/// wins a tie against one visited later.
#[derive(Debug, Clone)]
pub struct MatchSelector<F: Bm3dFloat> {
    capacity: usize,
    items: Vec<PatchMatch<F>>,
}

impl<F: Bm3dFloat> MatchSelector<F> {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            items: Vec::with_capacity(capacity + 1),
        }
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.items.len() >= self.capacity
    }

    /// Distance a candidate must beat to be admitted.
    #[inline]
    pub fn admission_bound(&self) -> F {
        if self.is_full() {
            self.items
                .last()
                .map(|m| m.distance)
                .unwrap_or_else(F::neg_infinity)
        } else {
            F::infinity()
        }
    }

    /// Insert a candidate; returns whether it was kept.
    pub fn push(&mut self, candidate: PatchMatch<F>) -> bool {
        if candidate.distance.is_nan() {
            return false;
        }
        let pos = self
            .items
            .partition_point(|m| m.distance <= candidate.distance);
        if pos >= self.capacity {
            return false;
        }
        if self.is_full() {
            self.items.pop();
        }
        self.items.insert(pos, candidate);
        true
    }

    pub fn as_slice(&self) -> &[PatchMatch<F>] {
        &self.items
    }
}

/// Search extents used by the block matcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SearchParams {
    /// Radius of the search window in the anchor's frame.
    pub bm_range: usize,
    /// Number of best positions per frame used as search centres in the
    /// next frame of the temporal walk.
    pub ps_num: usize,
    /// Radius of the window searched around each of those centres.
    pub ps_range: usize,
}

#[inline]
fn search_range(center: usize, radius: usize, max_origin: usize) -> (usize, usize) {
    (
        center.saturating_sub(radius),
        (center + radius).min(max_origin),
    )
}

/// Reusable block matcher for one plane (or joint plane set).
///
/// Distances are always computed on the `guide` planes handed to
/// [`BlockMatcher::find_group`]; callers decide whether those are the noisy
/// source or a reference estimate.
pub struct BlockMatcher<F: Bm3dFloat> {
    params: SearchParams,
    group: MatchSelector<F>,
    frame_best: MatchSelector<F>,
    seeds: Vec<PatchRef>,
    center_seeds: Vec<PatchRef>,
    visited: FxHashSet<(usize, usize)>,
}

impl<F: Bm3dFloat> BlockMatcher<F> {
    pub fn new(params: SearchParams, group_size: usize) -> Self {
        let ps_num = params.ps_num.max(1);
        Self {
            params,
            group: MatchSelector::new(group_size.max(1)),
            frame_best: MatchSelector::new(ps_num),
            seeds: Vec::with_capacity(ps_num),
            center_seeds: Vec::with_capacity(ps_num),
            visited: FxHashSet::default(),
        }
    }

    /// Collect the group for the anchor at `(row, col)` of the centre frame.
    ///
    /// The anchor itself is always the first entry, with distance zero.
    pub fn find_group(
        &mut self,
        guide: &[PlaneWindow<'_, F>],
        row: usize,
        col: usize,
    ) -> &[PatchMatch<F>] {
        let window = &guide[0];
        let center = window.radius();
        let (rows, cols) = window.dim();
        let max_row = rows - BLOCK_SIZE;
        let max_col = cols - BLOCK_SIZE;
        let anchor = PatchRef::new(center, row, col);
        let temporal = window.len() > 1;

        self.group.clear();
        self.frame_best.clear();
        self.group.push(PatchMatch::new(anchor, F::zero()));
        if temporal {
            self.frame_best.push(PatchMatch::new(anchor, F::zero()));
        }

        let (r0, r1) = search_range(row, self.params.bm_range, max_row);
        let (c0, c1) = search_range(col, self.params.bm_range, max_col);
        for r in r0..=r1 {
            for c in c0..=c1 {
                if r == row && c == col {
                    continue;
                }
                let candidate = PatchRef::new(center, r, c);
                if temporal {
                    let bound = self
                        .group
                        .admission_bound()
                        .max(self.frame_best.admission_bound());
                    let d = patch_distance(guide, anchor, candidate, bound);
                    self.group.push(PatchMatch::new(candidate, d));
                    self.frame_best.push(PatchMatch::new(candidate, d));
                } else {
                    let d = patch_distance(guide, anchor, candidate, self.group.admission_bound());
                    self.group.push(PatchMatch::new(candidate, d));
                }
            }
        }

        if temporal {
            self.center_seeds.clear();
            self.center_seeds
                .extend(self.frame_best.as_slice().iter().map(|m| m.patch()));
            let last_frame = window.len() - 1;

            // Walk backwards, then forwards, re-centring on the best matches
            // of the previously searched frame.
            for forward in [false, true] {
                self.seeds.clear();
                self.seeds.extend_from_slice(&self.center_seeds);
                let mut frame = center;
                loop {
                    frame = match (forward, frame) {
                        (false, 0) => break,
                        (false, f) => f - 1,
                        (true, f) if f == last_frame => break,
                        (true, f) => f + 1,
                    };
                    self.frame_best.clear();
                    self.visited.clear();
                    for seed in &self.seeds {
                        let (r0, r1) = search_range(seed.row, self.params.ps_range, max_row);
                        let (c0, c1) = search_range(seed.col, self.params.ps_range, max_col);
                        for r in r0..=r1 {
                            for c in c0..=c1 {
                                if !self.visited.insert((r, c)) {
                                    continue;
                                }
                                let candidate = PatchRef::new(frame, r, c);
                                let bound = self
                                    .group
                                    .admission_bound()
                                    .max(self.frame_best.admission_bound());
                                let d = patch_distance(guide, anchor, candidate, bound);
                                self.group.push(PatchMatch::new(candidate, d));
                                self.frame_best.push(PatchMatch::new(candidate, d));
                            }
                        }
                    }
                    self.seeds.clear();
                    self.seeds
                        .extend(self.frame_best.as_slice().iter().map(|m| m.patch()));
                }
            }
        }

        self.group.as_slice()
    }
}

/// One-shot block matching, mainly for validation and benchmarks.
pub fn find_similar_patches<F: Bm3dFloat>(
    guide: &[PlaneWindow<'_, F>],
    anchor: (usize, usize),
    params: SearchParams,
    group_size: usize,
) -> Vec<PatchMatch<F>> {
    let mut matcher = BlockMatcher::new(params, group_size);
    matcher.find_group(guide, anchor.0, anchor.1).to_vec()
}
