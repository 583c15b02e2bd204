//! Frame-grabber contract.
//!
//! The frame loop drives the CameraLink grabber through this narrow surface:
//! open happens in the factory that produces the boxed grabber, and after
//! that the loop only sets/enables the ROI, sizes its buffers, starts one
//! image at a time and blocks on its arrival. The timeout counter is polled
//! and logged, never acted on.

pub mod sim;

use ndarray::Array2;
use thiserror::Error;

pub use sim::{SimGrabber, SimStar};

#[derive(Debug, Error)]
pub enum GrabberError {
    #[error("unable to open grabber channel: {0}")]
    Open(String),

    #[error("invalid ROI ({x0},{y0}) {width}x{height} for a {sensor_width}x{sensor_height} sensor")]
    InvalidRoi {
        x0: usize,
        y0: usize,
        width: usize,
        height: usize,
        sensor_width: usize,
        sensor_height: usize,
    },

    #[error("ring buffer allocation failed: {0}")]
    Multibuf(String),

    #[error("timeout configuration failed: {0}")]
    Timeout(String),

    #[error("image acquisition failed: {0}")]
    Acquire(String),
}

pub type GrabberResult<T> = Result<T, GrabberError>;

/// One CameraLink acquisition channel.
///
/// `width`/`height` report the current readout size (the ROI when enabled,
/// the full sensor otherwise). `start_image` arms a single acquisition and
/// `wait_image` blocks until that frame lands; at most one image is in
/// flight.
pub trait FrameGrabber: Send {
    fn width(&self) -> usize;
    fn height(&self) -> usize;

    fn set_roi(&mut self, x0: usize, width: usize, y0: usize, height: usize) -> GrabberResult<()>;
    fn enable_roi(&mut self, enabled: bool) -> GrabberResult<()>;

    /// Size the DMA ring buffer. Four buffers is the recommended number.
    fn multibuf(&mut self, buffers: usize) -> GrabberResult<()>;

    /// Acquisition timeout in milliseconds; 0 blocks indefinitely.
    fn set_timeout(&mut self, timeout_ms: u32) -> GrabberResult<()>;

    fn start_image(&mut self) -> GrabberResult<()>;
    fn wait_image(&mut self) -> GrabberResult<Array2<u16>>;

    /// Cumulative acquisition-timeout count since open.
    fn timeouts(&self) -> u32;
}

/// Produces an opened grabber channel. The frame loop calls this lazily on
/// the rising edge of video mode and retries on the next rising edge if it
/// fails.
pub type GrabberFactory = Box<dyn FnMut() -> GrabberResult<Box<dyn FrameGrabber>> + Send>;
