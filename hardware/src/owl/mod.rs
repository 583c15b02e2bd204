//! OWL SWIR camera control protocol.
//!
//! The camera is configured through a byte-oriented register protocol carried
//! over the frame-grabber's CameraLink serial channel. Every parameter write
//! is a checksummed 7-byte frame that the camera echoes back; reads are a
//! request frame followed by a fetch frame that returns the register value.
//!
//! This module provides the stateless frame codec ([`codec`]), the serial
//! transport contract ([`serial`]), the temperature calibration read from the
//! camera's manufacturing data block ([`calibration`]), and the typed driver
//! ([`camera::OwlCamera`]) the rest of the system talks to.

pub mod calibration;
pub mod camera;
pub mod codec;
pub mod mock;
pub mod serial;

pub use calibration::TempCalibration;
pub use camera::{CameraError, CameraResult, GainMode, OwlCamera};
pub use mock::MockSerial;
pub use serial::{SerialError, SerialResult, SerialTransport};
