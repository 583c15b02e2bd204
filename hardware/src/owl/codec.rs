//! Stateless frame codec for the camera register protocol.
//!
//! A single-byte register write is the 7-byte frame
//! `53 E0 02 REG VAL 50 CSUM` where `CSUM` is the XOR of the six preceding
//! bytes; the camera acknowledges with the echo `50 CSUM`. A read is the
//! request `53 E0 01 REG 50 CSUM` followed by the fetch frame
//! `53 E1 01 50 E3`, whose reply carries the register value. Multi-byte
//! parameters are laid out MSB-first across consecutive registers and
//! written/read one byte at a time.

/// Pixel clock of the sensor, Hz. Exposure and frame-rate registers count in
/// this clock.
pub const PIXEL_CLOCK_HZ: f64 = 40e6;

/// Terminator byte present in every framed command.
pub const ETX: u8 = 0x50;

/// "Get system status" raw sequence.
pub const GET_STATUS: [u8; 3] = [0x49, 0x50, 0x19];

/// "Set system status" raw sequence; the expected reply is [`STATUS_OK`].
pub const SET_STATUS: [u8; 4] = [0x4f, 0x53, 0x50, 0x4c];

/// Reply confirming the status handshake.
pub const STATUS_OK: [u8; 2] = [0x50, 0x4c];

/// Fetch frame that retrieves the value after a read request.
pub const FETCH: [u8; 5] = [0x53, 0xe1, 0x01, 0x50, 0xe3];

/// Selects the manufacturing data area for readout.
pub const MFG_SELECT: [u8; 10] = [0x53, 0xae, 0x05, 0x01, 0x00, 0x00, 0x02, 0x00, 0x50, 0xab];

/// Fetches the 18-byte manufacturing data block.
pub const MFG_FETCH: [u8; 5] = [0x53, 0xaf, 0x12, 0x50, 0xbe];

/// Number of bytes in the manufacturing data block reply.
pub const MFG_BLOCK_LEN: usize = 18;

/// Register map. Multi-byte parameters list their registers MSB-first.
pub mod reg {
    /// System register; writing 0x81 enables the TEC cooler.
    pub const SYSTEM: u8 = 0x00;
    /// TEC enable value for [`SYSTEM`].
    pub const TEC_ENABLE: u8 = 0x81;

    /// Auto-level control; 0x00 disables.
    pub const AUTO_LEVEL: u8 = 0x23;

    /// Sensor temperature ADC, high then low byte.
    pub const SENSOR_TEMP: [u8; 2] = [0x6e, 0x6f];

    /// Digital gain, high then low byte of `gain * 256`.
    pub const DIGITAL_GAIN: [u8; 2] = [0xc6, 0xc7];

    /// Frame period in 100ths of the pixel clock, four bytes MSB-first.
    pub const FRAME_RATE: [u8; 4] = [0xdd, 0xde, 0xdf, 0xe0];

    /// Exposure time in pixel clocks, four bytes MSB-first.
    pub const EXPOSURE: [u8; 4] = [0xee, 0xef, 0xf0, 0xf1];

    /// Gain mode; 0x00 low gain, 0x06 high gain.
    pub const GAIN_MODE: u8 = 0xf2;
    pub const GAIN_LOW: u8 = 0x00;
    pub const GAIN_HIGH: u8 = 0x06;

    /// Non-uniformity correction control; 0x01 disables.
    pub const NUC: u8 = 0xf9;

    /// TEC setpoint DAC, high then low byte.
    pub const TEC_SETPOINT: [u8; 2] = [0xfb, 0xfa];
}

/// XOR of all bytes; the frame checksum law.
pub fn xor_checksum(bytes: &[u8]) -> u8 {
    bytes.iter().fold(0, |acc, b| acc ^ b)
}

/// Build a single-byte register write frame.
pub fn write_frame(register: u8, value: u8) -> [u8; 7] {
    let mut frame = [0x53, 0xe0, 0x02, register, value, ETX, 0];
    frame[6] = xor_checksum(&frame[..6]);
    frame
}

/// Build a register read-request frame. The value comes back after [`FETCH`].
pub fn read_frame(register: u8) -> [u8; 6] {
    let mut frame = [0x53, 0xe0, 0x01, register, ETX, 0];
    frame[5] = xor_checksum(&frame[..5]);
    frame
}

/// Echo expected in reply to a framed command: `50` followed by the frame's
/// own checksum.
pub fn expected_echo(frame: &[u8]) -> [u8; 2] {
    [ETX, frame[frame.len() - 1]]
}

/// Exposure milliseconds to pixel-clock counts (40 000 counts per ms).
pub fn exposure_counts(exposure_ms: f64) -> u32 {
    (exposure_ms * PIXEL_CLOCK_HZ / 1e3) as u32
}

/// Pixel-clock counts back to exposure milliseconds.
pub fn exposure_ms(counts: u32) -> f64 {
    counts as f64 * 1e3 / PIXEL_CLOCK_HZ
}

/// Frame rate in Hz to the frame-period register count.
pub fn frame_rate_counts(rate_hz: f64) -> u32 {
    (4e9 / (rate_hz * 100.0)).floor() as u32
}

/// Frame-period register count back to Hz. A zero count reads as a stopped
/// clock, not a division error.
pub fn frame_rate_hz(counts: u32) -> f64 {
    if counts == 0 {
        0.0
    } else {
        PIXEL_CLOCK_HZ / counts as f64
    }
}

/// Digital gain to its raw 16-bit register value.
pub fn digital_gain_raw(gain: u16) -> u16 {
    gain.saturating_mul(256)
}

/// Raw digital-gain register value back to the gain factor.
pub fn digital_gain(raw: u16) -> u16 {
    raw / 256
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn checksum_law_holds_for_every_write_frame() {
        for register in 0..=0xff_u16 {
            for value in [0x00_u8, 0x01, 0x7f, 0x80, 0xff] {
                let frame = write_frame(register as u8, value);
                assert_eq!(frame[6], xor_checksum(&frame[..6]));
                // XOR of the full frame including its checksum is zero.
                assert_eq!(xor_checksum(&frame), 0);
            }
        }
    }

    #[test]
    fn known_frames_match_the_wire_protocol() {
        // NUC off, auto-level off, TEC enable, gain modes.
        assert_eq!(
            write_frame(reg::NUC, 0x01),
            [0x53, 0xe0, 0x02, 0xf9, 0x01, 0x50, 0x19]
        );
        assert_eq!(
            write_frame(reg::AUTO_LEVEL, 0x00),
            [0x53, 0xe0, 0x02, 0x23, 0x00, 0x50, 0xc2]
        );
        assert_eq!(
            write_frame(reg::SYSTEM, reg::TEC_ENABLE),
            [0x53, 0xe0, 0x02, 0x00, 0x81, 0x50, 0x60]
        );
        assert_eq!(
            write_frame(reg::GAIN_MODE, reg::GAIN_LOW),
            [0x53, 0xe0, 0x02, 0xf2, 0x00, 0x50, 0x13]
        );
        assert_eq!(
            write_frame(reg::GAIN_MODE, reg::GAIN_HIGH),
            [0x53, 0xe0, 0x02, 0xf2, 0x06, 0x50, 0x15]
        );
    }

    #[test]
    fn known_read_frames_match_the_wire_protocol() {
        assert_eq!(read_frame(0xdd), [0x53, 0xe0, 0x01, 0xdd, 0x50, 0x3f]);
        assert_eq!(read_frame(0xee), [0x53, 0xe0, 0x01, 0xee, 0x50, 0x0c]);
        assert_eq!(read_frame(0xfb), [0x53, 0xe0, 0x01, 0xfb, 0x50, 0x19]);
        assert_eq!(read_frame(0x6e), [0x53, 0xe0, 0x01, 0x6e, 0x50, 0x8c]);
        assert_eq!(xor_checksum(&FETCH[..4]), FETCH[4]);
    }

    #[test]
    fn exposure_counts_are_exact_at_40mhz() {
        assert_eq!(exposure_counts(10.0), 400_000);
        assert_eq!(exposure_counts(1.0), 40_000);
        assert_eq!(exposure_ms(400_000), 10.0);
    }

    #[test]
    fn frame_rate_encode_law() {
        for rate in [0.5_f64, 1.0, 10.0, 30.0, 50.0, 60.0, 119.9, 120.0] {
            let counts = frame_rate_counts(rate);
            assert_eq!(counts, (4e9 / (rate * 100.0)).floor() as u32);
            let decoded = frame_rate_hz(counts);
            assert!(
                (decoded - rate).abs() / rate < 0.01,
                "rate {rate} decoded as {decoded}"
            );
        }
        assert_eq!(frame_rate_hz(0), 0.0);
        assert_eq!(frame_rate_counts(50.0), 800_000);
    }

    #[test]
    fn digital_gain_scaling() {
        assert_eq!(digital_gain_raw(1), 256);
        assert_eq!(digital_gain_raw(4), 1024);
        assert_eq!(digital_gain(256), 1);
        assert_eq!(digital_gain(1024), 4);
    }
}
