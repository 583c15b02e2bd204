//! Statistics helpers for the guiding pipeline.

pub mod median;

pub use median::quickselect_median;
