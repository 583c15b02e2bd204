//! Fast-guiding server core.
//!
//! The process owns an infrared guide camera over a frame-grabber link,
//! reads subraster images at tens of hertz, fits the stellar centroid in
//! each frame and commands the two-axis Image Stabilization Unit so the star
//! stays on the configured null pixel. Every frame is serialized as a FITS
//! record on stdout for the downstream capture pipe, and operators steer the
//! whole thing over a line-oriented TCP protocol.
//!
//! Layout follows the data path: [`state`] is the single server record,
//! [`command`]/[`server`] absorb operator traffic between frames,
//! [`geometry`] turns pixel offsets into mechanism angles, [`actuator`]
//! carries the slope command onto its worker thread, [`header`] fills the
//! per-frame FITS keyword contract, and [`frame_loop`] ties it together as
//! the real-time owner of the camera handle.

pub mod actuator;
pub mod command;
pub mod error;
pub mod frame_loop;
pub mod geometry;
pub mod header;
pub mod server;
pub mod state;

pub use error::GuiderError;
pub use frame_loop::FrameLoop;
pub use state::ServerState;
