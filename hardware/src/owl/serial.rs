//! Serial transport contract for the camera register protocol.
//!
//! The real channel is the frame grabber's CameraLink serial port (115200
//! baud, 6 second per-read timeout, 500 ms wait between byte groups). That
//! plumbing belongs to the vendor library; this module only defines the
//! request/response seam the codec drives, plus the hex-token helpers used
//! for logging and for replies that are compared as token strings.

use thiserror::Error;

/// Serial channel timeout, seconds. Matches the camera's worst-case response
/// latency on a cold TEC loop.
pub const SERIAL_TIMEOUT_S: u64 = 6;

/// Baud rate of the CameraLink serial channel.
pub const SERIAL_BAUD: u32 = 115_200;

#[derive(Debug, Error)]
pub enum SerialError {
    #[error("serial channel timed out after {0} s")]
    Timeout(u64),

    #[error("serial channel I/O failure: {0}")]
    Io(String),

    #[error("malformed hex token {0:?} in serial response")]
    BadToken(String),

    #[error("serial channel is not open")]
    NotOpen,
}

pub type SerialResult<T> = Result<T, SerialError>;

/// One request/response exchange on the camera serial channel.
///
/// Implementations write the request bytes, wait for the camera to go quiet
/// (or for the wait character) and return everything read back. The codec
/// layers framing, echo verification and value extraction on top.
pub trait SerialTransport: Send {
    fn transact(&mut self, request: &[u8]) -> SerialResult<Vec<u8>>;
}

/// Render bytes as the space-separated lowercase hex form used in logs and
/// token-string comparisons, e.g. `[0x50, 0x4c]` -> `"50 4c"`.
pub fn to_hex_string(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Parse a whitespace-separated string of 2-hex-digit tokens back to bytes.
/// Leading/trailing whitespace is trimmed; empty input yields an empty vec.
pub fn parse_hex_tokens(text: &str) -> SerialResult<Vec<u8>> {
    text.split_whitespace()
        .map(|tok| {
            u8::from_str_radix(tok, 16).map_err(|_| SerialError::BadToken(tok.to_string()))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hex_string_round_trip() {
        let bytes = [0x53, 0xe0, 0x02, 0xf9, 0x01, 0x50, 0x19];
        let text = to_hex_string(&bytes);
        assert_eq!(text, "53 e0 02 f9 01 50 19");
        assert_eq!(parse_hex_tokens(&text).unwrap(), bytes);
    }

    #[test]
    fn parse_trims_and_handles_empty() {
        assert_eq!(parse_hex_tokens("  50 4c \n").unwrap(), vec![0x50, 0x4c]);
        assert!(parse_hex_tokens("").unwrap().is_empty());
    }

    #[test]
    fn parse_rejects_wide_tokens() {
        assert!(parse_hex_tokens("1ff").is_err());
        assert!(parse_hex_tokens("zz").is_err());
    }
}
