//! Register-file mock of the camera serial channel.
//!
//! Behaves like a healthy camera: framed writes are checksum-verified,
//! stored, and echoed; read requests latch the register value for the next
//! fetch frame; the status handshake and the manufacturing data block are
//! served from canned data. Failure injection covers the two error classes
//! the driver distinguishes (timeouts and bad echoes).

use std::collections::HashMap;

use super::codec::{self, MFG_BLOCK_LEN};
use super::serial::{SerialError, SerialResult, SerialTransport, SERIAL_TIMEOUT_S};

/// Default calibration anchors: ADC 6000/9000 and DAC 5000/8000 at 0/40 °C.
/// Chosen so one DAC step is well under the 0.1 °C test tolerance.
const DEFAULT_ANCHORS: (u16, u16, u16, u16) = (6000, 9000, 5000, 8000);

pub struct MockSerial {
    registers: HashMap<u8, u8>,
    pending_read: Option<u8>,
    mfg_block: [u8; MFG_BLOCK_LEN],
    fail_next: bool,
    corrupt_next_echo: bool,
}

impl MockSerial {
    /// Mock with nominal factory calibration and a mid-scale sensor
    /// temperature reading (about -26 °C with the default anchors).
    pub fn with_defaults() -> Self {
        let (adc0, adc40, dac0, dac40) = DEFAULT_ANCHORS;
        let mut mock = Self {
            registers: HashMap::new(),
            pending_read: None,
            mfg_block: [0; MFG_BLOCK_LEN],
            fail_next: false,
            corrupt_next_echo: false,
        };
        mock.mfg_block[10..12].copy_from_slice(&adc0.to_le_bytes());
        mock.mfg_block[12..14].copy_from_slice(&adc40.to_le_bytes());
        mock.mfg_block[14..16].copy_from_slice(&dac0.to_le_bytes());
        mock.mfg_block[16..18].copy_from_slice(&dac40.to_le_bytes());
        mock.set_register_pair(codec::reg::SENSOR_TEMP, 4000);
        mock
    }

    /// Directly set a register byte, bypassing the protocol.
    pub fn set_register(&mut self, register: u8, value: u8) {
        self.registers.insert(register, value);
    }

    /// Set a two-register parameter, high byte into the first register.
    pub fn set_register_pair(&mut self, registers: [u8; 2], value: u16) {
        let [high, low] = value.to_be_bytes();
        self.set_register(registers[0], high);
        self.set_register(registers[1], low);
    }

    /// Make the next transact fail with a timeout.
    pub fn fail_next_transact(&mut self) {
        self.fail_next = true;
    }

    /// Corrupt the echo of the next framed command.
    pub fn corrupt_next_echo(&mut self) {
        self.corrupt_next_echo = true;
    }

    fn echo(&mut self, frame: &[u8]) -> Vec<u8> {
        let mut echo = codec::expected_echo(frame).to_vec();
        if self.corrupt_next_echo {
            self.corrupt_next_echo = false;
            echo[1] ^= 0xff;
        }
        echo
    }
}

impl SerialTransport for MockSerial {
    fn transact(&mut self, request: &[u8]) -> SerialResult<Vec<u8>> {
        if self.fail_next {
            self.fail_next = false;
            return Err(SerialError::Timeout(SERIAL_TIMEOUT_S));
        }

        match request {
            r if r == codec::GET_STATUS.as_slice() => Ok(vec![0x4f]),
            r if r == codec::SET_STATUS.as_slice() => Ok(codec::STATUS_OK.to_vec()),
            r if r == codec::MFG_SELECT.as_slice() => Ok(self.echo(request)),
            r if r == codec::MFG_FETCH.as_slice() => Ok(self.mfg_block.to_vec()),
            r if r == codec::FETCH.as_slice() => match self.pending_read.take() {
                Some(value) => Ok(vec![value]),
                None => Err(SerialError::Io("fetch without a read request".into())),
            },
            // Framed register write: 53 E0 02 REG VAL 50 CSUM.
            [0x53, 0xe0, 0x02, register, value, _, csum] => {
                if *csum != codec::xor_checksum(&request[..6]) {
                    return Err(SerialError::Io("bad command checksum".into()));
                }
                self.registers.insert(*register, *value);
                Ok(self.echo(request))
            }
            // Framed register read request: 53 E0 01 REG 50 CSUM.
            [0x53, 0xe0, 0x01, register, _, csum] => {
                if *csum != codec::xor_checksum(&request[..5]) {
                    return Err(SerialError::Io("bad command checksum".into()));
                }
                self.pending_read = Some(*self.registers.get(register).unwrap_or(&0));
                Ok(self.echo(request))
            }
            other => Err(SerialError::Io(format!(
                "unrecognized command: {}",
                super::serial::to_hex_string(other)
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_then_read_returns_the_stored_byte() {
        let mut mock = MockSerial::with_defaults();
        let frame = codec::write_frame(0xc6, 0x04);
        assert_eq!(
            mock.transact(&frame).unwrap(),
            codec::expected_echo(&frame)
        );

        let read = codec::read_frame(0xc6);
        mock.transact(&read).unwrap();
        assert_eq!(mock.transact(&codec::FETCH).unwrap(), vec![0x04]);
    }

    #[test]
    fn unwritten_registers_read_as_zero() {
        let mut mock = MockSerial::with_defaults();
        mock.transact(&codec::read_frame(0x42)).unwrap();
        assert_eq!(mock.transact(&codec::FETCH).unwrap(), vec![0x00]);
    }

    #[test]
    fn fetch_without_request_is_an_error() {
        let mut mock = MockSerial::with_defaults();
        assert!(mock.transact(&codec::FETCH).is_err());
    }

    #[test]
    fn manufacturing_block_has_protocol_length() {
        let mut mock = MockSerial::with_defaults();
        mock.transact(&codec::MFG_SELECT).unwrap();
        let block = mock.transact(&codec::MFG_FETCH).unwrap();
        assert_eq!(block.len(), MFG_BLOCK_LEN);
    }
}
