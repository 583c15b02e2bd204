//! Pixel offset to mechanism angle.
//!
//! The refined centroid lives in guide-subraster coordinates; adding the
//! subraster origin and subtracting the null pixel gives the pointing error
//! on the sensor, scaled to arcseconds by the plate scale. The ISU
//! collaborator supplies both calibration maps: sky arcseconds to mechanism
//! milliradians and requested setpoint to true angle. The commanded
//! absolute target is the current mechanism angle minus the calibrated
//! delta, per axis.

use hardware::isu::{IsuInterface, IsuResult};
use shared::raster::PIXSCALE;

/// Correction computed for one frame.
#[derive(Debug, Clone, Copy)]
pub struct IsuCorrection {
    /// Calibrated delta to remove, mrad.
    pub delta_mrad: (f64, f64),
    /// Mechanism angles read back before the move, mrad.
    pub status_mrad: (f64, f64),
    /// Absolute target (status minus delta), mrad.
    pub target_mrad: (f64, f64),
}

/// Star offset from the null in arcseconds, from a refined subraster
/// centroid.
pub fn offsets_arcsec(
    centroid: (f64, f64),
    guide_origin: (usize, usize),
    null: (f64, f64),
) -> (f64, f64) {
    (
        (guide_origin.0 as f64 + centroid.0 - null.0) * PIXSCALE,
        (guide_origin.1 as f64 + centroid.1 - null.1) * PIXSCALE,
    )
}

/// Turn an arcsecond offset into the mechanism move that cancels it.
pub fn correction(
    isu: &dyn IsuInterface,
    offset_arcsec: (f64, f64),
) -> IsuResult<IsuCorrection> {
    let (mx, my) = isu.arcsec_to_mrad(offset_arcsec.0, offset_arcsec.1);
    let delta_mrad = isu.setup_to_true(mx, my);
    let status_mrad = isu.read_angles()?;
    let target_mrad = (
        status_mrad.0 - delta_mrad.0,
        status_mrad.1 - delta_mrad.1,
    );
    Ok(IsuCorrection {
        delta_mrad,
        status_mrad,
        target_mrad,
    })
}
