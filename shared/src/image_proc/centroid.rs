//! Center-of-mass seed estimate.
//!
//! Subtracts the raster median as a background estimate, clamps negative
//! residuals to zero and takes intensity-weighted first moments. The result
//! seeds the Gaussian refinement; on a starless raster (zero residual flux)
//! it falls back to the geometric center so the refinement window stays on
//! the raster.

use ndarray::ArrayView2;

use crate::algo::median::quickselect_median;

/// Intensity-weighted centroid of a raster, `(x, y)` in pixel indices with
/// x along columns and y along rows.
pub fn center_of_mass(image: &ArrayView2<u16>) -> (f64, f64) {
    let (rows, cols) = image.dim();

    let mut scratch: Vec<f64> = image.iter().map(|&v| v as f64).collect();
    let median = quickselect_median(&mut scratch);

    let mut x_moment = 0.0;
    let mut y_moment = 0.0;
    let mut flux = 0.0;

    for ((row, col), &value) in image.indexed_iter() {
        let residual = value as f64 - median;
        if residual > 0.0 {
            x_moment += col as f64 * residual;
            y_moment += row as f64 * residual;
            flux += residual;
        }
    }

    if flux > 0.0 {
        (x_moment / flux, y_moment / flux)
    } else {
        (cols as f64 / 2.0, rows as f64 / 2.0)
    }
}
