//! Sensor and guide-raster geometry of the optical train.

/// Full sensor readout width, pixels.
pub const FULL_WIDTH: usize = 640;

/// Full sensor readout height, pixels.
pub const FULL_HEIGHT: usize = 512;

/// Guide subraster side length, pixels. The subraster is always square.
pub const GUIDE_SIZE: usize = 32;

/// Plate scale of this optical train, arcseconds per pixel.
pub const PIXSCALE: f64 = 0.128;

/// Largest legal guide-raster X origin.
pub const GUIDE_X0_MAX: usize = FULL_WIDTH - GUIDE_SIZE;

/// Largest legal guide-raster Y origin.
pub const GUIDE_Y0_MAX: usize = FULL_HEIGHT - GUIDE_SIZE;
