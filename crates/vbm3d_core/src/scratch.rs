//! Thread-keyed accumulation buffers for spatial (radius 0) invocations.
//!
//! Every worker thread lazily receives its own numerator/denominator storage
//! per plane. Storage only grows: a request for a smaller plane is served from
//! the top-left corner of the existing arrays, so alternating plane sizes
//! (luma and subsampled chroma) never reallocate. The requested region is
//! zeroed on every use; storage is released when the pool is dropped.

use ndarray::{s, Array2, ArrayViewMut2};
use rustc_hash::FxHashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, ThreadId};

use crate::float_trait::Bm3dFloat;

/// Numerator/denominator views for one plane.
pub type AccumulatorPair<'a, F> = (ArrayViewMut2<'a, F>, ArrayViewMut2<'a, F>);

struct ScratchBuffers<F: Bm3dFloat> {
    capacity: (usize, usize),
    planes: Vec<(Array2<F>, Array2<F>)>,
}

impl<F: Bm3dFloat> ScratchBuffers<F> {
    fn empty() -> Self {
        Self {
            capacity: (0, 0),
            planes: Vec::new(),
        }
    }

    fn prepare(
        &mut self,
        planes: usize,
        (rows, cols): (usize, usize),
    ) -> Vec<AccumulatorPair<'_, F>> {
        if rows > self.capacity.0 || cols > self.capacity.1 {
            self.capacity = (rows.max(self.capacity.0), cols.max(self.capacity.1));
            let capacity = self.capacity;
            for (num, den) in self.planes.iter_mut() {
                *num = Array2::zeros(capacity);
                *den = Array2::zeros(capacity);
            }
        }
        while self.planes.len() < planes {
            let capacity = self.capacity;
            self.planes
                .push((Array2::zeros(capacity), Array2::zeros(capacity)));
        }
        self.planes
            .iter_mut()
            .take(planes)
            .map(|(num, den)| {
                let mut num = num.slice_mut(s![..rows, ..cols]);
                let mut den = den.slice_mut(s![..rows, ..cols]);
                num.fill(F::zero());
                den.fill(F::zero());
                (num, den)
            })
            .collect()
    }
}

/// Pool of per-thread accumulation buffers.
pub struct ScratchPool<F: Bm3dFloat> {
    entries: Mutex<FxHashMap<ThreadId, Arc<Mutex<ScratchBuffers<F>>>>>,
}

impl<F: Bm3dFloat> Default for ScratchPool<F> {
    fn default() -> Self {
        Self::new()
    }
}

impl<F: Bm3dFloat> ScratchPool<F> {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(FxHashMap::default()),
        }
    }

    /// Pool with room reserved for `threads` workers.
    pub fn with_capacity(threads: usize) -> Self {
        let mut map = FxHashMap::default();
        map.reserve(threads);
        Self {
            entries: Mutex::new(map),
        }
    }

    /// Number of threads that currently own a buffer set.
    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Run `f` with `planes` zeroed accumulator pairs of shape `dim` owned by
    /// the calling thread.
    pub fn with_buffers<R>(
        &self,
        planes: usize,
        dim: (usize, usize),
        f: impl FnOnce(&mut [AccumulatorPair<'_, F>]) -> R,
    ) -> R {
        let entry = {
            let mut map = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
            Arc::clone(
                map.entry(thread::current().id())
                    .or_insert_with(|| Arc::new(Mutex::new(ScratchBuffers::empty()))),
            )
        };
        let mut buffers = entry.lock().unwrap_or_else(PoisonError::into_inner);
        let mut views = buffers.prepare(planes, dim);
        f(&mut views)
    }
}
