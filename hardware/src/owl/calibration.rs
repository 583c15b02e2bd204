//! Temperature calibration from the camera's manufacturing data block.
//!
//! The factory burns four 16-bit anchors into the camera: the sensor ADC
//! reading at 0 °C and at +40 °C, and the TEC DAC count at 0 °C and at
//! +40 °C. Both temperature conversions are linear interpolations between
//! their pair of anchors. The anchors arrive little-endian at fixed offsets
//! of the 18-byte block.

use super::camera::{CameraError, CameraResult};
use super::codec::MFG_BLOCK_LEN;

/// Byte offset of the ADC-at-0°C anchor (little-endian pair).
const ADC_0C_OFFSET: usize = 10;
/// Byte offset of the ADC-at-40°C anchor.
const ADC_40C_OFFSET: usize = 12;
/// Byte offset of the DAC-at-0°C anchor.
const DAC_0C_OFFSET: usize = 14;
/// Byte offset of the DAC-at-40°C anchor.
const DAC_40C_OFFSET: usize = 16;

/// Temperature span between the two calibration anchors, °C.
const CAL_SPAN_C: f64 = 40.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TempCalibration {
    pub adc_at_0c: u16,
    pub adc_at_40c: u16,
    pub dac_at_0c: u16,
    pub dac_at_40c: u16,
}

impl TempCalibration {
    /// Decode the calibration anchors from the manufacturing block reply.
    pub fn from_block(block: &[u8]) -> CameraResult<Self> {
        if block.len() != MFG_BLOCK_LEN {
            return Err(CameraError::BadManufacturingBlock {
                expected: MFG_BLOCK_LEN,
                got: block.len(),
            });
        }

        let le16 = |offset: usize| u16::from_le_bytes([block[offset], block[offset + 1]]);
        let cal = Self {
            adc_at_0c: le16(ADC_0C_OFFSET),
            adc_at_40c: le16(ADC_40C_OFFSET),
            dac_at_0c: le16(DAC_0C_OFFSET),
            dac_at_40c: le16(DAC_40C_OFFSET),
        };

        if cal.adc_at_40c == cal.adc_at_0c || cal.dac_at_40c == cal.dac_at_0c {
            return Err(CameraError::DegenerateCalibration);
        }
        Ok(cal)
    }

    /// TEC DAC count commanding the given setpoint temperature.
    pub fn dac_for_setpoint(&self, temp_c: f64) -> u16 {
        let slope = (self.dac_at_40c as f64 - self.dac_at_0c as f64) / CAL_SPAN_C;
        let count = temp_c * slope + self.dac_at_0c as f64;
        count.clamp(0.0, u16::MAX as f64) as u16
    }

    /// Setpoint temperature encoded by a TEC DAC count.
    pub fn setpoint_from_dac(&self, count: u16) -> f64 {
        let slope = CAL_SPAN_C / (self.dac_at_40c as f64 - self.dac_at_0c as f64);
        slope * count as f64 - slope * self.dac_at_0c as f64
    }

    /// Sensor temperature from the temperature ADC reading.
    pub fn temp_from_adc(&self, count: u16) -> f64 {
        let slope = CAL_SPAN_C / (self.adc_at_40c as f64 - self.adc_at_0c as f64);
        slope * count as f64 - slope * self.adc_at_0c as f64
    }
}
