//! Scriptable in-memory ISU, used by the simulator backend and the tests.
//!
//! Faithful to the mechanism's command model: slope commands move the
//! recorded angles to their target, homing flips the homed latch, faults are
//! injectable per axis. The calibration maps use a nominal optical gain:
//! one sky arcsecond is 2 mirror-fold times 4.8481e-3 mrad, and the
//! setup-to-true map is a fixed small linear correction.

use std::sync::Mutex;

use tracing::debug;

use super::{IsuError, IsuInterface, IsuResult};

/// mrad per arcsecond of sky motion (includes the factor 2 mirror fold).
const MRAD_PER_ARCSEC: f64 = 2.0 * 4.848_136_8e-3;

/// Linear setup-to-true calibration: true = GAIN * setpoint + OFFSET.
const SETUP_TO_TRUE_GAIN: f64 = 0.982;
const SETUP_TO_TRUE_OFFSET_MRAD: f64 = -0.004;

#[derive(Debug, Clone, Copy)]
pub struct SlopeRecord {
    pub rate_hz: f64,
    pub last: (f64, f64),
    pub next: (f64, f64),
}

#[derive(Debug, Default)]
struct MockIsuState {
    homed: bool,
    enabled: bool,
    angles: (f64, f64),
    x_fault: bool,
    y_fault: bool,
    fail_homing: bool,
    slope_commands: Vec<SlopeRecord>,
    direct_commands: Vec<(f64, f64)>,
}

pub struct MockIsu {
    state: Mutex<MockIsuState>,
}

impl MockIsu {
    /// A mechanism that still needs homing.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MockIsuState::default()),
        }
    }

    /// A mechanism that has already been homed.
    pub fn homed() -> Self {
        let isu = Self::new();
        isu.state.lock().unwrap().homed = true;
        isu
    }

    pub fn inject_fault(&self, x_fault: bool, y_fault: bool) {
        let mut state = self.state.lock().unwrap();
        state.x_fault = x_fault;
        state.y_fault = y_fault;
    }

    pub fn fail_homing(&self) {
        self.state.lock().unwrap().fail_homing = true;
    }

    pub fn set_angles(&self, x_mrad: f64, y_mrad: f64) {
        self.state.lock().unwrap().angles = (x_mrad, y_mrad);
    }

    pub fn slope_commands(&self) -> Vec<SlopeRecord> {
        self.state.lock().unwrap().slope_commands.clone()
    }

    pub fn direct_commands(&self) -> Vec<(f64, f64)> {
        self.state.lock().unwrap().direct_commands.clone()
    }

    pub fn is_enabled(&self) -> bool {
        self.state.lock().unwrap().enabled
    }
}

impl Default for MockIsu {
    fn default() -> Self {
        Self::new()
    }
}

impl IsuInterface for MockIsu {
    fn home(&self) -> IsuResult<()> {
        let mut state = self.state.lock().unwrap();
        if state.fail_homing {
            return Err(IsuError::HomingFailed);
        }
        state.homed = true;
        state.angles = (0.0, 0.0);
        debug!("mock ISU homed");
        Ok(())
    }

    fn is_homed(&self) -> IsuResult<bool> {
        Ok(self.state.lock().unwrap().homed)
    }

    fn enable(&self) -> IsuResult<()> {
        let mut state = self.state.lock().unwrap();
        if !state.homed {
            return Err(IsuError::Rejected("enable before homing".into()));
        }
        state.enabled = true;
        Ok(())
    }

    fn stop(&self) -> IsuResult<()> {
        self.state.lock().unwrap().enabled = false;
        Ok(())
    }

    fn read_angles(&self) -> IsuResult<(f64, f64)> {
        Ok(self.state.lock().unwrap().angles)
    }

    fn setup_slope(
        &self,
        rate_hz: f64,
        last_x_mrad: f64,
        last_y_mrad: f64,
        next_x_mrad: f64,
        next_y_mrad: f64,
    ) -> IsuResult<()> {
        let mut state = self.state.lock().unwrap();
        if !state.enabled {
            return Err(IsuError::Rejected("slope command while disabled".into()));
        }
        state.slope_commands.push(SlopeRecord {
            rate_hz,
            last: (last_x_mrad, last_y_mrad),
            next: (next_x_mrad, next_y_mrad),
        });
        state.angles = (next_x_mrad, next_y_mrad);
        Ok(())
    }

    fn setup_direct(&self, x_mrad: f64, y_mrad: f64) -> IsuResult<()> {
        let mut state = self.state.lock().unwrap();
        if !state.enabled {
            return Err(IsuError::Rejected("setpoint while disabled".into()));
        }
        state.direct_commands.push((x_mrad, y_mrad));
        state.angles = (x_mrad, y_mrad);
        Ok(())
    }

    fn check_fault(&self) -> IsuResult<(bool, bool)> {
        let state = self.state.lock().unwrap();
        Ok((state.x_fault, state.y_fault))
    }

    fn arcsec_to_mrad(&self, x_arcsec: f64, y_arcsec: f64) -> (f64, f64) {
        (x_arcsec * MRAD_PER_ARCSEC, y_arcsec * MRAD_PER_ARCSEC)
    }

    fn setup_to_true(&self, x_mrad: f64, y_mrad: f64) -> (f64, f64) {
        (
            SETUP_TO_TRUE_GAIN * x_mrad + SETUP_TO_TRUE_OFFSET_MRAD,
            SETUP_TO_TRUE_GAIN * y_mrad + SETUP_TO_TRUE_OFFSET_MRAD,
        )
    }
}
