use ndarray::{Array2, ArrayView2, ArrayViewMut2};
use rustfft::{num_complex::Complex, Fft};
use std::sync::Arc;

use crate::float_trait::Bm3dFloat;

// =============================================================================
// Unitary 2D Fourier Transform
// =============================================================================

// All transforms here are unitary: forward and inverse both carry a
// 1/sqrt(N) factor, so white noise of standard deviation sigma keeps the same
// standard deviation in every coefficient.

/// Unitary 2D FFT of a square patch, written into `out`.
///
/// `plan` must be a forward plan whose length equals the patch side, and
/// `line` a scratch buffer of at least that length.
pub fn fft2d_into<F: Bm3dFloat>(
    input: ArrayView2<F>,
    plan: &Arc<dyn Fft<F>>,
    line: &mut [Complex<F>],
    mut out: ArrayViewMut2<Complex<F>>,
) {
    let (rows, cols) = input.dim();
    debug_assert_eq!(rows, cols, "patch must be square");
    let line = &mut line[..cols];
    let scale = F::unitary_scale(rows * cols);

    // 1. Transform rows
    for r in 0..rows {
        for (slot, &v) in line.iter_mut().zip(input.row(r).iter()) {
            *slot = Complex::new(v, F::zero());
        }
        plan.process(line);
        for (dst, src) in out.row_mut(r).iter_mut().zip(line.iter()) {
            *dst = *src;
        }
    }

    // 2. Transform columns
    for c in 0..cols {
        for r in 0..rows {
            line[r] = out[[r, c]];
        }
        plan.process(line);
        for r in 0..rows {
            out[[r, c]] = line[r] * scale;
        }
    }
}

/// Inverse of [`fft2d_into`]; keeps the real part.
pub fn ifft2d_into<F: Bm3dFloat>(
    input: ArrayView2<Complex<F>>,
    plan: &Arc<dyn Fft<F>>,
    line: &mut [Complex<F>],
    work: &mut Array2<Complex<F>>,
    mut out: ArrayViewMut2<F>,
) {
    let (rows, cols) = input.dim();
    debug_assert_eq!(rows, cols, "patch must be square");
    let line = &mut line[..rows];
    let scale = F::unitary_scale(rows * cols);

    // 1. Transform columns
    for c in 0..cols {
        for r in 0..rows {
            line[r] = input[[r, c]];
        }
        plan.process(line);
        for r in 0..rows {
            work[[r, c]] = line[r];
        }
    }

    // 2. Transform rows
    for r in 0..rows {
        for (slot, src) in line.iter_mut().zip(work.row(r).iter()) {
            *slot = *src;
        }
        plan.process(line);
        for (dst, src) in out.row_mut(r).iter_mut().zip(line.iter()) {
            *dst = src.re * scale;
        }
    }
}

/// Allocating convenience wrapper around [`fft2d_into`].
pub fn fft2d<F: Bm3dFloat>(input: ArrayView2<F>, plan: &Arc<dyn Fft<F>>) -> Array2<Complex<F>> {
    let (rows, cols) = input.dim();
    let mut out = Array2::<Complex<F>>::zeros((rows, cols));
    let mut line = vec![Complex::new(F::zero(), F::zero()); rows.max(cols)];
    fft2d_into(input, plan, &mut line, out.view_mut());
    out
}

/// Allocating convenience wrapper around [`ifft2d_into`].
pub fn ifft2d<F: Bm3dFloat>(input: ArrayView2<Complex<F>>, plan: &Arc<dyn Fft<F>>) -> Array2<F> {
    let (rows, cols) = input.dim();
    let mut out = Array2::<F>::zeros((rows, cols));
    let mut work = Array2::<Complex<F>>::zeros((rows, cols));
    let mut line = vec![Complex::new(F::zero(), F::zero()); rows.max(cols)];
    ifft2d_into(input, plan, &mut line, &mut work, out.view_mut());
    out
}

/// Unitary 1D FFT (forward or inverse, depending on the plan) in place.
#[inline]
pub fn fft1d_unitary_inplace<F: Bm3dFloat>(buf: &mut [Complex<F>], plan: &Arc<dyn Fft<F>>) {
    let n = buf.len();
    if n <= 1 {
        return;
    }
    plan.process(buf);
    let scale = F::unitary_scale(n);
    for v in buf.iter_mut() {
        *v = *v * scale;
    }
}

// =============================================================================
// 8x8 Walsh-Hadamard Transform
// =============================================================================

/// In-place Fast Walsh-Hadamard Transform (Natural Order) for 8 elements.
/// Uses a butterfly network with only additions and subtractions.
#[inline(always)]
fn fwht8<F: Bm3dFloat>(buf: &mut [F; 8]) {
    // Stage 1 (Stride 1)
    let t0 = buf[0] + buf[1];
    buf[1] = buf[0] - buf[1];
    buf[0] = t0;
    let t2 = buf[2] + buf[3];
    buf[3] = buf[2] - buf[3];
    buf[2] = t2;
    let t4 = buf[4] + buf[5];
    buf[5] = buf[4] - buf[5];
    buf[4] = t4;
    let t6 = buf[6] + buf[7];
    buf[7] = buf[6] - buf[7];
    buf[6] = t6;

    // Stage 2 (Stride 2)
    let t0 = buf[0] + buf[2];
    buf[2] = buf[0] - buf[2];
    buf[0] = t0;
    let t1 = buf[1] + buf[3];
    buf[3] = buf[1] - buf[3];
    buf[1] = t1;
    let t4 = buf[4] + buf[6];
    buf[6] = buf[4] - buf[6];
    buf[4] = t4;
    let t5 = buf[5] + buf[7];
    buf[7] = buf[5] - buf[7];
    buf[5] = t5;

    // Stage 3 (Stride 4)
    let t0 = buf[0] + buf[4];
    buf[4] = buf[0] - buf[4];
    buf[0] = t0;
    let t1 = buf[1] + buf[5];
    buf[5] = buf[1] - buf[5];
    buf[1] = t1;
    let t2 = buf[2] + buf[6];
    buf[6] = buf[2] - buf[6];
    buf[2] = t2;
    let t3 = buf[3] + buf[7];
    buf[7] = buf[3] - buf[7];
    buf[3] = t3;
}

/// Separable 8x8 WHT over a row-major buffer, scaled to be unitary.
fn wht2d_8x8_in_place<F: Bm3dFloat>(data: &mut [F; 64]) {
    for r in 0..8 {
        let mut row_buf = [F::zero(); 8];
        let offset = r * 8;
        row_buf.copy_from_slice(&data[offset..offset + 8]);
        fwht8(&mut row_buf);
        data[offset..offset + 8].copy_from_slice(&row_buf);
    }
    for c in 0..8 {
        let mut col_buf = [F::zero(); 8];
        for r in 0..8 {
            col_buf[r] = data[r * 8 + c];
        }
        fwht8(&mut col_buf);
        for r in 0..8 {
            data[r * 8 + c] = col_buf[r];
        }
    }
    let scale = F::unitary_scale(64);
    for v in data.iter_mut() {
        *v *= scale;
    }
}

/// Unitary 2D WHT of an 8x8 patch. Output is complex (im = 0) so it can share
/// the group buffers of the Fourier path.
pub fn wht2d_8x8_forward_into<F: Bm3dFloat>(
    input: ArrayView2<F>,
    mut out: ArrayViewMut2<Complex<F>>,
) {
    let mut data = [F::zero(); 64];
    for ((r, c), &v) in input.indexed_iter() {
        data[r * 8 + c] = v;
    }
    wht2d_8x8_in_place(&mut data);
    for ((r, c), dst) in out.indexed_iter_mut() {
        *dst = Complex::new(data[r * 8 + c], F::zero());
    }
}

/// Inverse of [`wht2d_8x8_forward_into`]. Only the real part is used.
pub fn wht2d_8x8_inverse_into<F: Bm3dFloat>(
    input: ArrayView2<Complex<F>>,
    mut out: ArrayViewMut2<F>,
) {
    let mut data = [F::zero(); 64];
    for ((r, c), v) in input.indexed_iter() {
        data[r * 8 + c] = v.re;
    }
    wht2d_8x8_in_place(&mut data);
    for ((r, c), dst) in out.indexed_iter_mut() {
        *dst = data[r * 8 + c];
    }
}
