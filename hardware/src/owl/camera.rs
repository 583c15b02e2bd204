//! Typed driver for the OWL camera, layered over [`SerialTransport`].
//!
//! Every operation maps to one or more framed register exchanges; writes are
//! verified against the camera's echo and multi-byte parameters are
//! assembled MSB-first from their register sequence.

use std::cell::OnceCell;

use thiserror::Error;
use tracing::debug;

use super::calibration::TempCalibration;
use super::codec::{self, reg};
use super::serial::{to_hex_string, SerialError, SerialTransport};

#[derive(Debug, Error)]
pub enum CameraError {
    #[error(transparent)]
    Serial(#[from] SerialError),

    #[error("camera echo mismatch: expected {expected:?}, got {got:?}")]
    BadEcho { expected: String, got: String },

    #[error("camera status handshake failed: got {got:?}")]
    BadStatus { got: String },

    #[error("short reply: expected {expected} bytes, got {got}")]
    ShortReply { expected: usize, got: usize },

    #[error("manufacturing block has {got} bytes, expected {expected}")]
    BadManufacturingBlock { expected: usize, got: usize },

    #[error("manufacturing calibration anchors are degenerate")]
    DegenerateCalibration,

    #[error("unknown gain mode byte 0x{0:02x}")]
    UnknownGainMode(u8),

    #[error("{0} is not supported by the camera")]
    Unsupported(&'static str),
}

pub type CameraResult<T> = Result<T, CameraError>;

/// Sensor analog gain mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GainMode {
    Low,
    High,
}

impl GainMode {
    pub fn register_value(self) -> u8 {
        match self {
            GainMode::Low => reg::GAIN_LOW,
            GainMode::High => reg::GAIN_HIGH,
        }
    }

    pub fn from_register_value(value: u8) -> CameraResult<Self> {
        match value {
            reg::GAIN_LOW => Ok(GainMode::Low),
            reg::GAIN_HIGH => Ok(GainMode::High),
            other => Err(CameraError::UnknownGainMode(other)),
        }
    }
}

/// High-level camera driver. Owns the serial channel; the manufacturing
/// calibration block is read once and cached (it is factory data).
pub struct OwlCamera {
    link: Box<dyn SerialTransport>,
    calibration: OnceCell<TempCalibration>,
}

impl OwlCamera {
    pub fn new(link: Box<dyn SerialTransport>) -> Self {
        Self {
            link,
            calibration: OnceCell::new(),
        }
    }

    /// Send a framed command and verify the `50 CSUM` echo.
    fn command(&mut self, frame: &[u8]) -> CameraResult<()> {
        let reply = self.link.transact(frame)?;
        let expected = codec::expected_echo(frame);
        if reply != expected {
            return Err(CameraError::BadEcho {
                expected: to_hex_string(&expected),
                got: to_hex_string(&reply),
            });
        }
        Ok(())
    }

    fn write_register(&mut self, register: u8, value: u8) -> CameraResult<()> {
        let frame = codec::write_frame(register, value);
        debug!(command = %to_hex_string(&frame), "camera register write");
        self.command(&frame)
    }

    fn read_register(&mut self, register: u8) -> CameraResult<u8> {
        self.command(&codec::read_frame(register))?;
        let reply = self.link.transact(&codec::FETCH)?;
        match reply.first() {
            Some(&value) => Ok(value),
            None => Err(CameraError::ShortReply {
                expected: 1,
                got: 0,
            }),
        }
    }

    /// Read consecutive registers and assemble the value MSB-first.
    fn read_register_block(&mut self, registers: &[u8]) -> CameraResult<u64> {
        let mut value: u64 = 0;
        for &register in registers {
            value = (value << 8) | self.read_register(register)? as u64;
        }
        Ok(value)
    }

    /// Write a value MSB-first across consecutive registers.
    fn write_register_block(&mut self, registers: &[u8], value: u64) -> CameraResult<()> {
        let width = registers.len();
        for (i, &register) in registers.iter().enumerate() {
            let byte = (value >> (8 * (width - 1 - i))) as u8;
            self.write_register(register, byte)?;
        }
        Ok(())
    }

    /// Status handshake: get status, then set status, expecting `50 4c`.
    /// A failure here means the camera link (or the camera) is dead.
    pub fn check_status(&mut self) -> CameraResult<()> {
        self.link.transact(&codec::GET_STATUS)?;
        let reply = self.link.transact(&codec::SET_STATUS)?;
        if reply != codec::STATUS_OK {
            return Err(CameraError::BadStatus {
                got: to_hex_string(&reply),
            });
        }
        Ok(())
    }

    /// Non-uniformity correction. Only turning it off is supported.
    pub fn set_nuc(&mut self, enabled: bool) -> CameraResult<()> {
        if enabled {
            return Err(CameraError::Unsupported("enabling NUC"));
        }
        self.write_register(reg::NUC, 0x01)
    }

    /// Automatic level control. Only turning it off is supported.
    pub fn set_auto_level(&mut self, enabled: bool) -> CameraResult<()> {
        if enabled {
            return Err(CameraError::Unsupported("enabling auto-level"));
        }
        self.write_register(reg::AUTO_LEVEL, 0x00)
    }

    /// Enable the TEC cooler.
    pub fn enable_tec(&mut self) -> CameraResult<()> {
        self.write_register(reg::SYSTEM, reg::TEC_ENABLE)
    }

    pub fn set_gain_mode(&mut self, mode: GainMode) -> CameraResult<()> {
        self.write_register(reg::GAIN_MODE, mode.register_value())
    }

    pub fn gain_mode(&mut self) -> CameraResult<GainMode> {
        GainMode::from_register_value(self.read_register(reg::GAIN_MODE)?)
    }

    pub fn set_exposure_ms(&mut self, exposure_ms: f64) -> CameraResult<()> {
        let counts = codec::exposure_counts(exposure_ms);
        self.write_register_block(&reg::EXPOSURE, counts as u64)
    }

    pub fn exposure_ms(&mut self) -> CameraResult<f64> {
        let counts = self.read_register_block(&reg::EXPOSURE)? as u32;
        Ok(codec::exposure_ms(counts))
    }

    pub fn set_frame_rate_hz(&mut self, rate_hz: f64) -> CameraResult<()> {
        let counts = codec::frame_rate_counts(rate_hz);
        debug!(rate_hz, counts, "setting frame period");
        self.write_register_block(&reg::FRAME_RATE, counts as u64)
    }

    pub fn frame_rate_hz(&mut self) -> CameraResult<f64> {
        let counts = self.read_register_block(&reg::FRAME_RATE)? as u32;
        Ok(codec::frame_rate_hz(counts))
    }

    pub fn set_digital_gain(&mut self, gain: u16) -> CameraResult<()> {
        let raw = codec::digital_gain_raw(gain);
        self.write_register_block(&reg::DIGITAL_GAIN, raw as u64)
    }

    pub fn digital_gain(&mut self) -> CameraResult<u16> {
        let raw = self.read_register_block(&reg::DIGITAL_GAIN)? as u16;
        Ok(codec::digital_gain(raw))
    }

    pub fn set_tec_setpoint_c(&mut self, temp_c: f64) -> CameraResult<f64> {
        let cal = self.calibration()?;
        let count = cal.dac_for_setpoint(temp_c);
        self.write_register_block(&reg::TEC_SETPOINT, count as u64)?;
        // The DAC quantises the request; report what was actually set.
        Ok(cal.setpoint_from_dac(count))
    }

    pub fn tec_setpoint_c(&mut self) -> CameraResult<f64> {
        let cal = self.calibration()?;
        let count = self.read_register_block(&reg::TEC_SETPOINT)? as u16;
        Ok(cal.setpoint_from_dac(count))
    }

    /// Current sensor temperature, °C.
    pub fn sensor_temperature_c(&mut self) -> CameraResult<f64> {
        let cal = self.calibration()?;
        let count = self.read_register_block(&reg::SENSOR_TEMP)? as u16;
        Ok(cal.temp_from_adc(count))
    }

    /// The factory temperature calibration, read from the manufacturing data
    /// block on first use and cached.
    pub fn calibration(&mut self) -> CameraResult<TempCalibration> {
        if let Some(&cal) = self.calibration.get() {
            return Ok(cal);
        }
        self.link.transact(&codec::MFG_SELECT)?;
        let block = self.link.transact(&codec::MFG_FETCH)?;
        let cal = TempCalibration::from_block(&block)?;
        debug!(?cal, "manufacturing calibration block");
        let _ = self.calibration.set(cal);
        Ok(cal)
    }
}

#[cfg(test)]
mod tests {
    use super::super::mock::MockSerial;
    use super::*;
    use approx::assert_abs_diff_eq;

    fn camera() -> OwlCamera {
        OwlCamera::new(Box::new(MockSerial::with_defaults()))
    }

    #[test]
    fn status_handshake_passes_on_mock() {
        assert!(camera().check_status().is_ok());
    }

    #[test]
    fn exposure_set_get_is_exact_in_clock_counts() {
        let mut cam = camera();
        for exposure in [0.025_f64, 1.0, 10.0, 100.0, 5000.0] {
            cam.set_exposure_ms(exposure).unwrap();
            assert_abs_diff_eq!(cam.exposure_ms().unwrap(), exposure, epsilon = 1e-9);
        }
    }

    #[test]
    fn frame_rate_round_trips_within_one_percent() {
        let mut cam = camera();
        for rate in [1.0_f64, 10.0, 30.0, 50.0, 120.0] {
            cam.set_frame_rate_hz(rate).unwrap();
            let back = cam.frame_rate_hz().unwrap();
            assert!((back - rate).abs() / rate < 0.01, "{rate} -> {back}");
        }
    }

    #[test]
    fn digital_gain_round_trips_exactly() {
        let mut cam = camera();
        for gain in [1_u16, 2, 4, 16, 255] {
            cam.set_digital_gain(gain).unwrap();
            assert_eq!(cam.digital_gain().unwrap(), gain);
        }
    }

    #[test]
    fn gain_mode_round_trips() {
        let mut cam = camera();
        cam.set_gain_mode(GainMode::High).unwrap();
        assert_eq!(cam.gain_mode().unwrap(), GainMode::High);
        cam.set_gain_mode(GainMode::Low).unwrap();
        assert_eq!(cam.gain_mode().unwrap(), GainMode::Low);
    }

    #[test]
    fn tec_setpoint_round_trips_within_dac_quantisation() {
        let mut cam = camera();
        for temp in [-40.0_f64, -20.0, 0.0, 15.0] {
            let applied = cam.set_tec_setpoint_c(temp).unwrap();
            assert_abs_diff_eq!(applied, temp, epsilon = 0.1);
            assert_abs_diff_eq!(cam.tec_setpoint_c().unwrap(), applied, epsilon = 1e-9);
        }
    }

    #[test]
    fn sensor_temperature_follows_the_adc_calibration() {
        let mut link = MockSerial::with_defaults();
        // Defaults calibrate ADC 6000 -> 0 C, 9000 -> 40 C; 7500 is 20 C.
        link.set_register_pair(reg::SENSOR_TEMP, 7500);
        let mut cam = OwlCamera::new(Box::new(link));
        assert_abs_diff_eq!(cam.sensor_temperature_c().unwrap(), 20.0, epsilon = 0.05);
    }

    #[test]
    fn nuc_and_auto_level_only_turn_off() {
        let mut cam = camera();
        assert!(cam.set_nuc(false).is_ok());
        assert!(matches!(
            cam.set_nuc(true),
            Err(CameraError::Unsupported(_))
        ));
        assert!(cam.set_auto_level(false).is_ok());
        assert!(cam.set_auto_level(true).is_err());
        assert!(cam.enable_tec().is_ok());
    }

    #[test]
    fn bad_echo_surfaces_as_error() {
        let mut link = MockSerial::with_defaults();
        link.corrupt_next_echo();
        let mut cam = OwlCamera::new(Box::new(link));
        assert!(matches!(
            cam.set_digital_gain(1),
            Err(CameraError::BadEcho { .. })
        ));
    }

    #[test]
    fn timeout_surfaces_as_error() {
        let mut link = MockSerial::with_defaults();
        link.fail_next_transact();
        let mut cam = OwlCamera::new(Box::new(link));
        assert!(matches!(
            cam.check_status(),
            Err(CameraError::Serial(SerialError::Timeout(_)))
        ));
    }
}
