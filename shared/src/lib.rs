//! Device-independent pieces of the fast-guiding server: raster geometry
//! constants, statistics helpers, the two-stage centroid estimator, the FITS
//! record serializer and the guider configuration file.

pub mod algo;
pub mod fits;
pub mod guide_config;
pub mod image_proc;
pub mod raster;
