//! Collaborative filtering of a transformed group.

use ndarray::{s, Array3, Zip};
use rustfft::num_complex::Complex;

use crate::float_trait::Bm3dFloat;

/// Weight given to a group whose every coefficient was removed.
pub const WEIGHT_FLOOR: f64 = 1e-6;

/// Small epsilon for numerical stability in the Wiener group weight.
const WIENER_EPSILON: f64 = 1e-8;

/// Maximum allowed group weight in Wiener filtering.
/// Clamps weights when almost every coefficient was attenuated away.
const MAX_WIENER_WEIGHT: f64 = 1e6;

/// Hard-threshold the first `k` patches of a transformed group in place.
///
/// Coefficients with magnitude below `threshold` are zeroed; the 3D DC
/// coefficient is always kept so flat content keeps its level. Returns the
/// aggregation weight, `1 / retained`.
pub fn hard_threshold<F: Bm3dFloat>(group: &mut Array3<Complex<F>>, k: usize, threshold: F) -> F {
    let zero = Complex::new(F::zero(), F::zero());
    let mut retained = 0usize;
    for (idx, coeff) in group.slice_mut(s![..k, .., ..]).iter_mut().enumerate() {
        if idx == 0 || coeff.norm() >= threshold {
            retained += 1;
        } else {
            *coeff = zero;
        }
    }

    if retained == 0 {
        F::from_f64_c(WEIGHT_FLOOR)
    } else {
        F::one() / F::usize_as(retained)
    }
}

/// Wiener-filter the first `k` patches of `group` using `reference` (the same
/// positions transformed from the reference planes).
///
/// Each coefficient is scaled by `r^2 / (r^2 + sigma^2)`. Returns the
/// aggregation weight `1 / (sigma^2 * sum(gain^2))`, clamped to a finite
/// maximum.
pub fn wiener_filter<F: Bm3dFloat>(
    group: &mut Array3<Complex<F>>,
    reference: &Array3<Complex<F>>,
    k: usize,
    sigma: F,
) -> F {
    let sigma_sq = sigma * sigma;
    let wiener_eps = F::from_f64_c(WIENER_EPSILON);
    let max_weight = F::from_f64_c(MAX_WIENER_WEIGHT);
    let mut gain_sum = F::zero();

    Zip::from(group.slice_mut(s![..k, .., ..]))
        .and(reference.slice(s![..k, .., ..]))
        .for_each(|coeff, r| {
            let gain = wiener_gain(r.norm_sqr(), sigma_sq);
            *coeff = *coeff * gain;
            gain_sum += gain * gain;
        });

    let weight = F::one() / (gain_sum * sigma_sq + wiener_eps);
    if weight > max_weight {
        max_weight
    } else {
        weight
    }
}

#[inline]
fn wiener_gain<F: Bm3dFloat>(r_pow: F, sigma_sq: F) -> F {
    let denom = r_pow + sigma_sq;
    if denom > F::zero() {
        r_pow / denom
    } else {
        // Reference and noise are both zero.
        F::zero()
    }
}
