//! Image Stabilization Unit capability set.
//!
//! The ISU is a two-axis tip/tilt steering mechanism commanded in
//! milliradians. The guiding loop needs a small surface: homing (slow and
//! blocking, so it runs on a worker thread), enable/stop, angle read-back, the
//! slope command that ramps the analog outputs toward a new setpoint over
//! one frame period, a direct setpoint alternative, fault flags, and the two
//! calibration maps (sky arcseconds to mechanism milliradians, and the
//! requested setpoint to the angle the mechanism actually reaches).
//!
//! Deployments without the mechanism use [`NoopIsu`], which reports itself
//! absent so the loop skips the correction path entirely.

pub mod mock;

use thiserror::Error;

pub use mock::MockIsu;

#[derive(Debug, Error)]
pub enum IsuError {
    #[error("ISU homing failed")]
    HomingFailed,

    #[error("ISU refused command: {0}")]
    Rejected(String),

    #[error("ISU communication failure: {0}")]
    Comm(String),
}

pub type IsuResult<T> = Result<T, IsuError>;

/// Capability surface of the steering mechanism.
///
/// Methods take `&self` so the handle can be shared (`Arc`) with the homing
/// and slope worker threads; implementations guard their own state.
pub trait IsuInterface: Send + Sync {
    /// Whether a mechanism is actually attached. The no-op variant returns
    /// false and the frame loop skips corrections.
    fn is_present(&self) -> bool {
        true
    }

    /// Run the homing sequence. Blocks for its full duration.
    fn home(&self) -> IsuResult<()>;

    fn is_homed(&self) -> IsuResult<bool>;

    fn enable(&self) -> IsuResult<()>;

    fn stop(&self) -> IsuResult<()>;

    /// Current mechanism angles, mrad.
    fn read_angles(&self) -> IsuResult<(f64, f64)>;

    /// Ramp the analog outputs from the last to the next setpoint over one
    /// period of `rate_hz`.
    fn setup_slope(
        &self,
        rate_hz: f64,
        last_x_mrad: f64,
        last_y_mrad: f64,
        next_x_mrad: f64,
        next_y_mrad: f64,
    ) -> IsuResult<()>;

    /// Command an immediate setpoint. Synchronous alternative to the slope
    /// ramp.
    fn setup_direct(&self, x_mrad: f64, y_mrad: f64) -> IsuResult<()>;

    /// Per-axis fault flags `(x_fault, y_fault)`.
    fn check_fault(&self) -> IsuResult<(bool, bool)>;

    /// Sky angle to mechanism angle, per axis.
    fn arcsec_to_mrad(&self, x_arcsec: f64, y_arcsec: f64) -> (f64, f64);

    /// Requested setpoint to the true angle the mechanism settles at.
    fn setup_to_true(&self, x_mrad: f64, y_mrad: f64) -> (f64, f64);
}

/// Stand-in for deployments without a steering mechanism. Reports itself
/// absent; every motion call is accepted and ignored.
pub struct NoopIsu;

impl IsuInterface for NoopIsu {
    fn is_present(&self) -> bool {
        false
    }

    fn home(&self) -> IsuResult<()> {
        Ok(())
    }

    fn is_homed(&self) -> IsuResult<bool> {
        Ok(true)
    }

    fn enable(&self) -> IsuResult<()> {
        Ok(())
    }

    fn stop(&self) -> IsuResult<()> {
        Ok(())
    }

    fn read_angles(&self) -> IsuResult<(f64, f64)> {
        Ok((0.0, 0.0))
    }

    fn setup_slope(&self, _: f64, _: f64, _: f64, _: f64, _: f64) -> IsuResult<()> {
        Ok(())
    }

    fn setup_direct(&self, _: f64, _: f64) -> IsuResult<()> {
        Ok(())
    }

    fn check_fault(&self) -> IsuResult<(bool, bool)> {
        Ok((false, false))
    }

    fn arcsec_to_mrad(&self, _: f64, _: f64) -> (f64, f64) {
        (0.0, 0.0)
    }

    fn setup_to_true(&self, x_mrad: f64, y_mrad: f64) -> (f64, f64) {
        (x_mrad, y_mrad)
    }
}
