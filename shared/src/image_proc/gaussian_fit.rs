//! Levenberg–Marquardt refinement of the star position.
//!
//! A 16-pixel window is cut around the center-of-mass seed and a 2-D
//! Gaussian
//!
//! `f(x, y) = amp * exp(-0.5 * (dx²/(fx²·K) + dy²/(fy²·K))) + bg`
//!
//! with `K = 1/2.35482²` is fitted to it, so `fx`/`fy` are FWHMs directly.
//! Guiding fixes the widths at 2.5 px and the background at the raster
//! median, leaving a fast 3-parameter fit; the one-shot measurement at guide
//! start frees the widths to report the actual FWHM. Residuals are
//! unweighted; the Jacobian is forward-difference.

use nalgebra::{DMatrix, DVector};
use ndarray::ArrayView2;
use serde::{Deserialize, Serialize};

use crate::algo::median::quickselect_median;

use super::centroid::center_of_mass;

/// Width-to-variance factor: 1 / 2.35482², so widths are FWHMs.
const SHAPE_K: f64 = 0.180337;

/// Half-width of the fit window around the seed (a quarter of the guide
/// subraster).
const FIT_HALF_WIDTH: isize = 8;

/// Initial width guess, px FWHM.
const INITIAL_FWHM: f64 = 2.5;

/// Initial amplitude guess, DN.
const INITIAL_AMPLITUDE: f64 = 12_800.0;

const MAX_ITERATIONS: usize = 100;
const LAMBDA_INITIAL: f64 = 1e-3;
const LAMBDA_GROW: f64 = 10.0;
const LAMBDA_SHRINK: f64 = 0.3;
const LAMBDA_CEILING: f64 = 1e8;
const STEP_TOLERANCE: f64 = 1e-8;

/// Which parameters the minimiser may move.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FitMode {
    /// Position and amplitude only; widths and background stay fixed.
    /// The per-frame guiding fit.
    Centroid,
    /// Position, widths and amplitude; background stays fixed. The one-shot
    /// FWHM measurement at guide start.
    Fwhm,
}

impl FitMode {
    fn free_parameters(self) -> &'static [usize] {
        match self {
            FitMode::Centroid => &[0, 1, 4],
            FitMode::Fwhm => &[0, 1, 2, 3, 4],
        }
    }
}

/// Refined star model. Positions are in raster pixel coordinates (x along
/// columns, y along rows) without the half-pixel origin convention; callers
/// that report source-extractor style centers add 0.5 themselves.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct GaussianFit {
    pub x: f64,
    pub y: f64,
    pub fwhm_x: f64,
    pub fwhm_y: f64,
    pub amplitude: f64,
    pub background: f64,
    pub iterations: usize,
}

/// Seed with center-of-mass, then refine with the Gaussian model.
pub fn fit_star(image: &ArrayView2<u16>, mode: FitMode) -> GaussianFit {
    let (rows, cols) = image.dim();
    let (seed_x, seed_y) = center_of_mass(image);

    let mut scratch: Vec<f64> = image.iter().map(|&v| v as f64).collect();
    let median = quickselect_median(&mut scratch);

    // Fit window around the seed, clamped to the raster.
    let sx = seed_x.floor() as isize;
    let sy = seed_y.floor() as isize;
    let x0 = (sx - FIT_HALF_WIDTH).max(0) as usize;
    let x1 = ((sx + FIT_HALF_WIDTH - 1).min(cols as isize - 1)).max(x0 as isize) as usize;
    let y0 = (sy - FIT_HALF_WIDTH).max(0) as usize;
    let y1 = ((sy + FIT_HALF_WIDTH - 1).min(rows as isize - 1)).max(y0 as isize) as usize;
    let win_w = x1 - x0 + 1;
    let win_h = y1 - y0 + 1;

    let mut data = Vec::with_capacity(win_w * win_h);
    for row in y0..=y1 {
        for col in x0..=x1 {
            data.push(image[[row, col]] as f64);
        }
    }

    let mut params = [
        seed_x - x0 as f64,
        seed_y - y0 as f64,
        INITIAL_FWHM,
        INITIAL_FWHM,
        INITIAL_AMPLITUDE,
        median,
    ];

    let iterations = levenberg_marquardt(&data, win_w, &mut params, mode.free_parameters());

    // A fit that walked off the raster is rejected in favour of the seed.
    let x = if x0 as f64 + params[0] < 0.0 {
        seed_x
    } else {
        x0 as f64 + params[0]
    };
    let y = if y0 as f64 + params[1] < 0.0 {
        seed_y
    } else {
        y0 as f64 + params[1]
    };

    GaussianFit {
        x,
        y,
        fwhm_x: params[2].abs(),
        fwhm_y: params[3].abs(),
        amplitude: params[4],
        background: params[5],
        iterations,
    }
}

fn fill_residuals(data: &[f64], win_w: usize, params: &[f64; 6], out: &mut [f64]) {
    let wx2 = (params[2] * params[2] * SHAPE_K).max(1e-12);
    let wy2 = (params[3] * params[3] * SHAPE_K).max(1e-12);
    for (k, (&value, out)) in data.iter().zip(out.iter_mut()).enumerate() {
        let dx = (k % win_w) as f64 - params[0];
        let dy = (k / win_w) as f64 - params[1];
        let model = params[4] * (-0.5 * (dx * dx / wx2 + dy * dy / wy2)).exp() + params[5];
        *out = value - model;
    }
}

fn cost(residuals: &[f64]) -> f64 {
    residuals.iter().map(|r| r * r).sum()
}

/// Damped least squares over the free parameter subset. Returns the number
/// of accepted iterations.
fn levenberg_marquardt(
    data: &[f64],
    win_w: usize,
    params: &mut [f64; 6],
    free: &[usize],
) -> usize {
    let n = data.len();
    let m = free.len();

    let mut residuals = vec![0.0; n];
    fill_residuals(data, win_w, params, &mut residuals);
    let mut current_cost = cost(&residuals);

    let mut lambda = LAMBDA_INITIAL;
    let mut scratch = vec![0.0; n];

    for iteration in 1..=MAX_ITERATIONS {
        // Forward-difference Jacobian of the residuals, free columns only.
        let mut jacobian = DMatrix::<f64>::zeros(n, m);
        for (j, &pi) in free.iter().enumerate() {
            let h = (params[pi].abs() * 1e-6).max(1e-7);
            let mut shifted = *params;
            shifted[pi] += h;
            fill_residuals(data, win_w, &shifted, &mut scratch);
            for k in 0..n {
                jacobian[(k, j)] = (scratch[k] - residuals[k]) / h;
            }
        }

        let jt = jacobian.transpose();
        let normal = &jt * &jacobian;
        let gradient = &jt * DVector::from_column_slice(&residuals);

        loop {
            let mut damped = normal.clone();
            for d in 0..m {
                damped[(d, d)] += lambda * normal[(d, d)].max(1e-12);
            }

            let step = match damped.lu().solve(&(-&gradient)) {
                Some(step) => step,
                None => {
                    lambda *= LAMBDA_GROW;
                    if lambda > LAMBDA_CEILING {
                        return iteration;
                    }
                    continue;
                }
            };

            let mut trial = *params;
            for (j, &pi) in free.iter().enumerate() {
                trial[pi] += step[j];
            }
            fill_residuals(data, win_w, &trial, &mut scratch);
            let trial_cost = cost(&scratch);

            if trial_cost.is_finite() && trial_cost < current_cost {
                *params = trial;
                std::mem::swap(&mut residuals, &mut scratch);
                let improvement = current_cost - trial_cost;
                current_cost = trial_cost;
                lambda = (lambda * LAMBDA_SHRINK).max(1e-12);

                if step.norm() < STEP_TOLERANCE
                    || improvement <= 1e-12 * current_cost.max(1e-30)
                {
                    return iteration;
                }
                break;
            }

            lambda *= LAMBDA_GROW;
            if lambda > LAMBDA_CEILING {
                return iteration;
            }
        }
    }

    MAX_ITERATIONS
}
