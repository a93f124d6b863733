//! Frame-level driver for V-BM3D denoising.
//!
//! Builds temporal plane windows from a clip of owned frames, allocates the
//! output planes, and runs the plane processor. It combines:
//! - Configuration resolution and clip format checks
//! - Frame index clamping at the clip boundaries
//! - Per-thread scratch buffers shared across parallel frames
//! - Two-pass denoising: basic estimate, then Wiener guided by it
//!
//! ## Output layout
//!
//! - **radius 0**: every plane has the shape of the source plane.
//! - **radius > 0**: every plane is `2 * (2 * radius + 1)` times taller and
//!   holds the per-frame numerator/denominator stack; merging the stack into
//!   pixels is left to the caller.

use ndarray::{Array2, ArrayViewMut2};
use rayon::prelude::*;

use crate::config::{Bm3dConfig, FrameFormat, ResolvedConfig};
use crate::error::{Bm3dError, Result};
use crate::float_trait::Bm3dFloat;
use crate::group::Bm3dPlans;
use crate::pipeline::{run_invocation_checked, Invocation, KernelStats, TemporalMetadata};
use crate::plane::PlaneWindow;
use crate::scratch::ScratchPool;
use crate::trace::{trace_event, trace_span};

// =============================================================================
// Types
// =============================================================================

/// Planes of one video frame (luma first).
#[derive(Debug, Clone, PartialEq)]
pub struct Frame<F: Bm3dFloat> {
    pub planes: Vec<Array2<F>>,
}

impl<F: Bm3dFloat> Frame<F> {
    pub fn new(planes: Vec<Array2<F>>) -> Self {
        Self { planes }
    }

    /// Single-plane (grayscale) frame.
    pub fn gray(plane: Array2<F>) -> Self {
        Self {
            planes: vec![plane],
        }
    }

    pub fn plane_dims(&self) -> Vec<(usize, usize)> {
        self.planes.iter().map(Array2::dim).collect()
    }
}

/// Output of one filtered frame.
#[derive(Debug, Clone, PartialEq)]
pub struct DenoisedFrame<F: Bm3dFloat> {
    pub planes: Vec<Array2<F>>,
    /// Present for temporal (stacked) output.
    pub metadata: Option<TemporalMetadata>,
    pub stats: KernelStats,
}

impl<F: Bm3dFloat> DenoisedFrame<F> {
    pub fn into_frame(self) -> Frame<F> {
        Frame::new(self.planes)
    }
}

/// Frame indices of the temporal window around `n`, clamped to the clip.
pub(crate) fn window_indices(n: usize, radius: usize, frames: usize) -> Vec<usize> {
    let last = frames.saturating_sub(1);
    (0..=2 * radius)
        .map(|i| (n + i).saturating_sub(radius).min(last))
        .collect()
}

fn clip_format<F: Bm3dFloat>(what: &'static str, clip: &[Frame<F>]) -> Result<FrameFormat> {
    let first = clip
        .first()
        .ok_or_else(|| Bm3dError::UnsupportedFormat(format!("{what} has no frames")))?;
    let planes = first.plane_dims();
    for frame in &clip[1..] {
        if frame.planes.len() != planes.len() {
            return Err(Bm3dError::UnsupportedFormat(format!(
                "{what} frames disagree on plane count"
            )));
        }
        for (&expected, plane) in planes.iter().zip(&frame.planes) {
            if plane.dim() != expected {
                return Err(Bm3dError::DimensionMismatch {
                    what,
                    expected,
                    actual: plane.dim(),
                });
            }
        }
    }
    Ok(FrameFormat::new(planes, clip.len()))
}

fn plane_windows<'a, F: Bm3dFloat>(
    clip: &'a [Frame<F>],
    indices: &[usize],
    planes: usize,
) -> Vec<PlaneWindow<'a, F>> {
    (0..planes)
        .map(|p| {
            PlaneWindow::new(
                indices
                    .iter()
                    .map(|&i| clip[i].planes[p].view())
                    .collect(),
            )
        })
        .collect()
}

// =============================================================================
// Filter
// =============================================================================

/// A configured filter: resolved parameters, transform plans, and the scratch
/// pool shared by every frame it processes.
pub struct Bm3dFilter<F: Bm3dFloat> {
    config: ResolvedConfig<F>,
    plans: Bm3dPlans<F>,
    pool: ScratchPool<F>,
}

impl<F: Bm3dFloat> Bm3dFilter<F> {
    /// Build a filter. With `has_reference` every call must supply a
    /// reference clip and the final (Wiener) estimate is computed.
    pub fn new(config: &Bm3dConfig, has_reference: bool) -> Result<Self> {
        let config = config.resolve::<F>(has_reference)?;
        let plans = Bm3dPlans::new(config.transform, config.group_size);
        let pool = ScratchPool::with_capacity(rayon::current_num_threads());
        Ok(Self {
            config,
            plans,
            pool,
        })
    }

    pub fn config(&self) -> &ResolvedConfig<F> {
        &self.config
    }

    /// Layout of the frames this filter produces for `format`.
    pub fn output_format(&self, format: &FrameFormat) -> FrameFormat {
        let stack = match self.config.radius {
            0 => 1,
            r => 2 * (2 * r + 1),
        };
        FrameFormat::new(
            format
                .planes
                .iter()
                .map(|&(rows, cols)| (rows * stack, cols))
                .collect(),
            format.frames,
        )
    }

    /// Check `clip` (and `reference`) against this filter's configuration.
    pub fn check_clip(
        &self,
        clip: &[Frame<F>],
        reference: Option<&[Frame<F>]>,
    ) -> Result<FrameFormat> {
        let format = clip_format("clip", clip)?;
        format.check(self.config.chroma)?;
        match (reference, self.config.has_reference) {
            (Some(reference), true) => format.check_reference(&clip_format("reference", reference)?)?,
            (None, false) => {}
            (Some(_), false) => {
                return Err(Bm3dError::invalid(
                    "reference",
                    "filter was built without a reference clip",
                ))
            }
            (None, true) => {
                return Err(Bm3dError::invalid("reference", "filter needs a reference clip"))
            }
        }
        Ok(format)
    }

    /// Filter frame `n` of `clip`.
    pub fn denoise_frame(
        &self,
        clip: &[Frame<F>],
        reference: Option<&[Frame<F>]>,
        n: usize,
    ) -> Result<DenoisedFrame<F>> {
        self.check_clip(clip, reference)?;
        if n >= clip.len() {
            return Err(Bm3dError::invalid(
                "n",
                format!("frame {n} is outside a clip of {} frames", clip.len()),
            ));
        }
        self.render_frame(clip, reference, n)
    }

    /// Filter every frame of `clip` in parallel.
    pub fn denoise_clip(
        &self,
        clip: &[Frame<F>],
        reference: Option<&[Frame<F>]>,
    ) -> Result<Vec<DenoisedFrame<F>>> {
        let format = self.check_clip(clip, reference)?;
        let _span = trace_span!(
            "vbm3d_clip",
            frames = format.frames,
            planes = format.planes.len()
        )
        .entered();
        (0..clip.len())
            .into_par_iter()
            .map(|n| self.render_frame(clip, reference, n))
            .collect()
    }

    fn render_frame(
        &self,
        clip: &[Frame<F>],
        reference: Option<&[Frame<F>]>,
        n: usize,
    ) -> Result<DenoisedFrame<F>> {
        let _span = trace_span!("vbm3d_frame", n = n).entered();
        let indices = window_indices(n, self.config.radius, clip.len());
        let planes = clip[n].planes.len();
        let source = plane_windows(clip, &indices, planes);
        let reference_windows = reference.map(|r| plane_windows(r, &indices, planes));

        let mut inv = Invocation::new(&source, &self.config.planes[..planes])
            .with_chroma(self.config.chroma)
            .with_pool(&self.pool);
        if let Some(reference_windows) = reference_windows.as_deref() {
            inv = inv.with_reference(reference_windows);
        }

        let mut outputs: Vec<Array2<F>> = (0..planes)
            .map(|p| Array2::zeros(inv.destination_dim(p)))
            .collect();
        let mut views: Vec<ArrayViewMut2<'_, F>> =
            outputs.iter_mut().map(|o| o.view_mut()).collect();
        let report = run_invocation_checked(&inv, &self.plans, &mut views)?;
        drop(views);

        trace_event!("vbm3d_frame_done", n = n, groups = report.stats.groups);
        Ok(DenoisedFrame {
            planes: outputs,
            metadata: report.metadata,
            stats: report.stats,
        })
    }
}

/// Basic estimate followed by a final estimate that uses it as reference.
///
/// Only spatial (radius 0) output can be fed back as a reference.
pub fn denoise_two_pass<F: Bm3dFloat>(
    config: &Bm3dConfig,
    clip: &[Frame<F>],
) -> Result<Vec<DenoisedFrame<F>>> {
    if config.radius != 0 {
        return Err(Bm3dError::invalid(
            "radius",
            "two-pass denoising needs radius 0",
        ));
    }
    let basic: Vec<Frame<F>> = Bm3dFilter::new(config, false)?
        .denoise_clip(clip, None)?
        .into_iter()
        .map(DenoisedFrame::into_frame)
        .collect();
    Bm3dFilter::new(config, true)?.denoise_clip(clip, Some(&basic))
}
