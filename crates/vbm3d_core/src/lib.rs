//! V-BM3D Core Algorithm Library
//!
//! Pure Rust implementation of BM3D (Block-Matching and 3D filtering) and its
//! video extension V-BM3D for image and video plane denoising. Planes are
//! borrowed as `ndarray` views; the crate never owns the caller's pixels
//! except through the [`orchestration`] frame driver.

pub mod aggregation;
pub mod block_matching;
pub mod config;
pub mod error;
pub mod filtering;
pub mod float_trait;
pub mod group;
pub mod metric;
pub mod orchestration;
pub mod pipeline;
pub mod plane;
pub mod scratch;
pub mod transforms;

mod trace;

// Re-export commonly used types at the crate root
pub use block_matching::{find_similar_patches, BlockMatcher, PatchMatch, SearchParams};
pub use config::{Bm3dConfig, FrameFormat, ResolvedConfig};
pub use error::{Bm3dError, Result};
pub use float_trait::Bm3dFloat;
pub use group::{Bm3dPlans, Transform2d};
pub use orchestration::{denoise_two_pass, Bm3dFilter, DenoisedFrame, Frame};
pub use pipeline::{
    run_invocation, run_invocation_checked, Invocation, InvocationReport, KernelStats,
    PlaneParams, TemporalMetadata,
};
pub use plane::{plane_view, plane_view_mut, PlaneWindow, BLOCK_SIZE};
pub use scratch::ScratchPool;
