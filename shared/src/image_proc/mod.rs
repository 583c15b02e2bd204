//! Star position estimation on the guide subraster.
//!
//! Two stages: a median-subtracted center-of-mass seed ([`centroid`]) and a
//! Levenberg–Marquardt Gaussian refinement around it ([`gaussian_fit`]).

pub mod centroid;
pub mod gaussian_fit;

pub use centroid::center_of_mass;
pub use gaussian_fit::{fit_star, FitMode, GaussianFit};
