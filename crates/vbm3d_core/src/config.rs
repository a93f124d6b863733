//! Filter configuration: per-plane parameters, validation, and resolution
//! into kernel parameters.

use crate::block_matching::SearchParams;
use crate::error::{Bm3dError, Result};
use crate::float_trait::Bm3dFloat;
use crate::group::{Transform2d, MAX_GROUP_SIZE};
use crate::pipeline::{PlaneParams, MAX_BLOCK_STEP};
use crate::plane::BLOCK_SIZE;

/// Hard-threshold multiplier applied to sigma for basic estimates.
pub const HARD_THRESHOLD: f64 = 2.7;

/// Sigma is given on a 0-255 scale for samples in [0, 1].
pub const SIGMA_UNIT: f64 = 255.0;

/// Fixed attenuation of the user sigma before it reaches the kernels.
pub const SIGMA_SCALE: f64 = 0.75;

pub const DEFAULT_SIGMA: f64 = 3.0;
pub const DEFAULT_BLOCK_STEP: usize = 8;
pub const DEFAULT_BM_RANGE: usize = 9;
pub const DEFAULT_RADIUS: usize = 0;
pub const DEFAULT_PS_NUM: usize = 2;
pub const DEFAULT_PS_RANGE: usize = 4;
pub const DEFAULT_GROUP_SIZE: usize = 8;

const USE_HADAMARD_ENV: &str = "VBM3D_USE_HADAMARD";

/// Expand 1 to 3 per-plane values; missing planes repeat the previous one.
fn per_plane<T: Copy>(name: &'static str, values: &[T]) -> Result<[T; 3]> {
    match *values {
        [a] => Ok([a, a, a]),
        [a, b] => Ok([a, b, b]),
        [a, b, c] => Ok([a, b, c]),
        _ => Err(Bm3dError::invalid(
            name,
            format!("expected 1 to 3 values, got {}", values.len()),
        )),
    }
}

fn env_flag(name: &str) -> bool {
    std::env::var(name)
        .ok()
        .map(|value| {
            let v = value.trim();
            v == "1"
                || v.eq_ignore_ascii_case("true")
                || v.eq_ignore_ascii_case("yes")
                || v.eq_ignore_ascii_case("on")
        })
        .unwrap_or(false)
}

/// User-facing filter configuration.
///
/// Sigma is expressed on the 0-255 scale; [`Bm3dConfig::resolve`] converts
/// it to the sample range.
#[derive(Debug, Clone, PartialEq)]
pub struct Bm3dConfig {
    pub sigma: [f64; 3],
    pub block_step: [usize; 3],
    pub bm_range: [usize; 3],
    pub ps_num: [usize; 3],
    pub ps_range: [usize; 3],
    /// Temporal radius; 0 selects spatial filtering.
    pub radius: usize,
    /// Joint matching over three equally sized planes.
    pub chroma: bool,
    pub group_size: usize,
    pub transform: Transform2d,
}

impl Default for Bm3dConfig {
    fn default() -> Self {
        Self {
            sigma: [DEFAULT_SIGMA; 3],
            block_step: [DEFAULT_BLOCK_STEP; 3],
            bm_range: [DEFAULT_BM_RANGE; 3],
            ps_num: [DEFAULT_PS_NUM; 3],
            ps_range: [DEFAULT_PS_RANGE; 3],
            radius: DEFAULT_RADIUS,
            chroma: false,
            group_size: DEFAULT_GROUP_SIZE,
            transform: Transform2d::default(),
        }
    }
}

impl Bm3dConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sigma(mut self, values: &[f64]) -> Result<Self> {
        self.sigma = per_plane("sigma", values)?;
        Ok(self)
    }

    pub fn block_step(mut self, values: &[usize]) -> Result<Self> {
        self.block_step = per_plane("block_step", values)?;
        Ok(self)
    }

    pub fn bm_range(mut self, values: &[usize]) -> Result<Self> {
        self.bm_range = per_plane("bm_range", values)?;
        Ok(self)
    }

    pub fn ps_num(mut self, values: &[usize]) -> Result<Self> {
        self.ps_num = per_plane("ps_num", values)?;
        Ok(self)
    }

    pub fn ps_range(mut self, values: &[usize]) -> Result<Self> {
        self.ps_range = per_plane("ps_range", values)?;
        Ok(self)
    }

    pub fn radius(mut self, radius: usize) -> Self {
        self.radius = radius;
        self
    }

    pub fn chroma(mut self, chroma: bool) -> Self {
        self.chroma = chroma;
        self
    }

    pub fn group_size(mut self, group_size: usize) -> Self {
        self.group_size = group_size;
        self
    }

    pub fn transform(mut self, transform: Transform2d) -> Self {
        self.transform = transform;
        self
    }

    /// Apply environment overrides: `VBM3D_USE_HADAMARD=1` selects the
    /// Walsh-Hadamard patch transform.
    pub fn with_env_overrides(mut self) -> Self {
        if env_flag(USE_HADAMARD_ENV) {
            self.transform = Transform2d::Hadamard;
        }
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.sigma.iter().any(|s| !s.is_finite() || *s < 0.0) {
            return Err(Bm3dError::invalid("sigma", "must be non-negative"));
        }
        if self
            .block_step
            .iter()
            .any(|&s| s == 0 || s > MAX_BLOCK_STEP)
        {
            return Err(Bm3dError::invalid(
                "block_step",
                format!("must be in range [1, {MAX_BLOCK_STEP}]"),
            ));
        }
        if self.bm_range.contains(&0) {
            return Err(Bm3dError::invalid("bm_range", "must be positive"));
        }
        if self.ps_num.contains(&0) {
            return Err(Bm3dError::invalid("ps_num", "must be positive"));
        }
        if self.ps_range.contains(&0) {
            return Err(Bm3dError::invalid("ps_range", "must be positive"));
        }
        if self.group_size == 0 || self.group_size > MAX_GROUP_SIZE {
            return Err(Bm3dError::invalid(
                "group_size",
                format!("must be in range [1, {MAX_GROUP_SIZE}]"),
            ));
        }
        Ok(())
    }

    /// Validate and convert into kernel parameters.
    ///
    /// With a reference clip the final (Wiener) estimate runs and sigma is
    /// used as is; otherwise it is scaled by [`HARD_THRESHOLD`]. Both are
    /// multiplied by [`SIGMA_SCALE`] and divided by [`SIGMA_UNIT`].
    pub fn resolve<F: Bm3dFloat>(&self, has_reference: bool) -> Result<ResolvedConfig<F>> {
        self.validate()?;
        let scale = if has_reference {
            SIGMA_SCALE / SIGMA_UNIT
        } else {
            SIGMA_SCALE * HARD_THRESHOLD / SIGMA_UNIT
        };
        let planes: [PlaneParams<F>; 3] = std::array::from_fn(|i| {
            PlaneParams::new(
                F::from_f64_c(self.sigma[i] * scale),
                self.block_step[i],
                SearchParams {
                    bm_range: self.bm_range[i],
                    ps_num: self.ps_num[i],
                    ps_range: self.ps_range[i],
                },
            )
        });
        let process = std::array::from_fn(|i| planes[i].is_active());
        Ok(ResolvedConfig {
            planes,
            process,
            radius: self.radius,
            chroma: self.chroma,
            group_size: self.group_size,
            transform: self.transform,
            has_reference,
        })
    }
}

/// Configuration converted to kernel units.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedConfig<F: Bm3dFloat> {
    pub planes: [PlaneParams<F>; 3],
    /// Planes with a non-zero sigma.
    pub process: [bool; 3],
    pub radius: usize,
    pub chroma: bool,
    pub group_size: usize,
    pub transform: Transform2d,
    pub has_reference: bool,
}

/// Plane layout of a clip: `(rows, cols)` per plane and frame count.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameFormat {
    pub planes: Vec<(usize, usize)>,
    pub frames: usize,
}

impl FrameFormat {
    pub fn new(planes: Vec<(usize, usize)>, frames: usize) -> Self {
        Self { planes, frames }
    }

    /// Check that this clip can be filtered, jointly over its planes when
    /// `chroma` is set.
    pub fn check(&self, chroma: bool) -> Result<()> {
        if self.planes.is_empty() || self.planes.len() > 3 {
            return Err(Bm3dError::UnsupportedFormat(format!(
                "expected 1 to 3 planes, got {}",
                self.planes.len()
            )));
        }
        if self.frames == 0 {
            return Err(Bm3dError::UnsupportedFormat("clip has no frames".into()));
        }
        for &(height, width) in &self.planes {
            if height < BLOCK_SIZE || width < BLOCK_SIZE {
                return Err(Bm3dError::PlaneTooSmall {
                    height,
                    width,
                    block: BLOCK_SIZE,
                });
            }
        }
        if chroma
            && (self.planes.len() != 3 || self.planes.iter().any(|&d| d != self.planes[0]))
        {
            return Err(Bm3dError::UnsupportedFormat(
                "clip must have three planes of equal size when chroma is enabled".into(),
            ));
        }
        Ok(())
    }

    /// Check that a reference clip has the same layout.
    pub fn check_reference(&self, reference: &FrameFormat) -> Result<()> {
        if reference.planes.len() != self.planes.len() {
            return Err(Bm3dError::UnsupportedFormat(
                "reference must have the same format as the clip".into(),
            ));
        }
        for (&expected, &actual) in self.planes.iter().zip(&reference.planes) {
            if expected != actual {
                return Err(Bm3dError::DimensionMismatch {
                    what: "reference",
                    expected,
                    actual,
                });
            }
        }
        if reference.frames != self.frames {
            return Err(Bm3dError::invalid(
                "reference",
                format!(
                    "must have the same number of frames as the clip ({} vs {})",
                    reference.frames, self.frames
                ),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cfg = Bm3dConfig::default();
        assert_eq!(cfg.sigma, [3.0; 3]);
        assert_eq!(cfg.block_step, [8; 3]);
        assert_eq!(cfg.bm_range, [9; 3]);
        assert_eq!(cfg.ps_num, [2; 3]);
        assert_eq!(cfg.ps_range, [4; 3]);
        assert_eq!(cfg.radius, 0);
        assert!(!cfg.chroma);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_missing_planes_inherit_previous_value() {
        let cfg = Bm3dConfig::new()
            .sigma(&[10.0, 5.0])
            .unwrap()
            .block_step(&[4])
            .unwrap();
        assert_eq!(cfg.sigma, [10.0, 5.0, 5.0]);
        assert_eq!(cfg.block_step, [4, 4, 4]);
        assert!(Bm3dConfig::new().bm_range(&[]).is_err());
        assert!(Bm3dConfig::new().ps_num(&[1, 2, 3, 4]).is_err());
    }

    #[test]
    fn test_validate_rejects_out_of_range() {
        let bad_sigma = Bm3dConfig::new().sigma(&[-1.0]).unwrap();
        assert!(matches!(
            bad_sigma.validate(),
            Err(Bm3dError::InvalidParameter { name: "sigma", .. })
        ));
        for step in [0usize, 9] {
            let cfg = Bm3dConfig::new().block_step(&[step]).unwrap();
            assert!(cfg.validate().is_err(), "block_step {}", step);
        }
        assert!(Bm3dConfig::new().ps_range(&[4, 0]).unwrap().validate().is_err());
        assert!(Bm3dConfig::new().group_size(0).validate().is_err());
        assert!(Bm3dConfig::new()
            .group_size(MAX_GROUP_SIZE + 1)
            .validate()
            .is_err());
    }

    #[test]
    fn test_resolve_rescales_sigma() {
        let cfg = Bm3dConfig::new().sigma(&[25.5, 0.0, 255.0]).unwrap();
        let basic = cfg.resolve::<f64>(false).unwrap();
        assert!((basic.planes[0].sigma - 0.2025).abs() < 1e-12);
        assert!((basic.planes[2].sigma - 2.025).abs() < 1e-12);
        assert_eq!(basic.process, [true, false, true]);
        assert!(!basic.has_reference);

        let fin = cfg.resolve::<f32>(true).unwrap();
        assert!((fin.planes[0].sigma - 0.075).abs() < 1e-6);
        assert!(fin.has_reference);
    }

    #[test]
    fn test_format_checks() {
        let yuv444 = FrameFormat::new(vec![(32, 32); 3], 4);
        let yuv420 = FrameFormat::new(vec![(32, 32), (16, 16), (16, 16)], 4);
        assert!(yuv444.check(true).is_ok());
        assert!(matches!(
            yuv420.check(true),
            Err(Bm3dError::UnsupportedFormat(_))
        ));
        assert!(yuv420.check(false).is_ok());

        let tiny = FrameFormat::new(vec![(4, 32)], 1);
        assert!(matches!(
            tiny.check(false),
            Err(Bm3dError::PlaneTooSmall { .. })
        ));

        assert!(yuv444.check_reference(&yuv444.clone()).is_ok());
        assert!(yuv444.check_reference(&yuv420).is_err());
        assert!(yuv444
            .check_reference(&FrameFormat::new(vec![(32, 32); 3], 5))
            .is_err());
    }

    #[test]
    fn test_env_override_selects_hadamard() {
        std::env::set_var(USE_HADAMARD_ENV, "yes");
        let cfg = Bm3dConfig::new().with_env_overrides();
        std::env::remove_var(USE_HADAMARD_ENV);
        assert_eq!(cfg.transform, Transform2d::Hadamard);
        assert_eq!(Bm3dConfig::new().transform, Transform2d::Fourier);
    }
}
