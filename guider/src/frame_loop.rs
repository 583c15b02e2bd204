//! The real-time frame loop.
//!
//! Owner of the camera handle and the only component that starts and waits
//! on images. Per tick: service the command socket for at most the poll
//! window, pump the homing notification, handle the video-mode edges, take
//! one frame, run the guide processing when enabled, and serialize the
//! frame to the output stream. The loop never blocks anywhere except the
//! bounded poll and the camera's own frame wait.
//!
//! Failure policy: camera-open trouble drops video mode and is retried on
//! the next rising edge; acquisition timeouts are counted and logged; an
//! ISU fault or a worker-spawn failure aborts the process.

use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::Utc;
use ndarray::Array2;
use tracing::{error, info, warn};

use hardware::grabber::{FrameGrabber, GrabberFactory};
use hardware::isu::IsuInterface;
use hardware::owl::OwlCamera;
use shared::fits;
use shared::image_proc::{fit_star, FitMode};

use crate::actuator::{ActuatorHandle, HomingSlot, SlopeCommand};
use crate::command::CommandContext;
use crate::error::GuiderError;
use crate::geometry;
use crate::header::build_frame_header;
use crate::server::{CommandServer, POLL_INTERVAL};
use crate::state::{ServerState, DEFAULT_FRAME_RATE_HZ};

/// Number of DMA ring buffers. One reading in, one reading out, one being
/// set up, one spare.
const DMA_BUFFERS: usize = 4;

/// Half-pixel shift to the source-extractor origin convention (pixel
/// centers at half-integers).
const PIXEL_CENTER_OFFSET: f64 = 0.5;

pub struct FrameLoop<W: Write> {
    state: ServerState,
    server: CommandServer,
    camera: OwlCamera,
    open_grabber: GrabberFactory,
    grabber: Option<Box<dyn FrameGrabber>>,
    isu: Arc<dyn IsuInterface>,
    actuator: ActuatorHandle,
    homing: HomingSlot,
    output: W,
    shutdown: Arc<AtomicBool>,
    last_video_on: bool,
    last_guide_on: bool,
    last_timeouts: u32,
}

impl<W: Write> FrameLoop<W> {
    pub fn new(
        state: ServerState,
        server: CommandServer,
        camera: OwlCamera,
        open_grabber: GrabberFactory,
        isu: Arc<dyn IsuInterface>,
        output: W,
        shutdown: Arc<AtomicBool>,
    ) -> Result<Self, GuiderError> {
        let actuator = ActuatorHandle::spawn(Arc::clone(&isu))?;
        Ok(Self {
            state,
            server,
            camera,
            open_grabber,
            grabber: None,
            isu,
            actuator,
            homing: HomingSlot::new(),
            output,
            shutdown,
            last_video_on: false,
            last_guide_on: false,
            last_timeouts: 0,
        })
    }

    pub fn state(&self) -> &ServerState {
        &self.state
    }

    pub fn server(&self) -> &CommandServer {
        &self.server
    }

    /// Run until SHUTDOWN or a termination signal. Fatal conditions return
    /// the error; the caller exits non-zero.
    pub fn run(&mut self) -> Result<(), GuiderError> {
        loop {
            if !self.tick()? {
                info!("frame loop exiting");
                return Ok(());
            }
        }
    }

    /// One loop iteration. Returns false once the loop should stop.
    pub fn tick(&mut self) -> Result<bool, GuiderError> {
        if self.shutdown.load(Ordering::SeqCst) {
            info!("termination signal received, shutting down");
            return Ok(false);
        }

        // Absorb operator commands between frames. The dispatcher gets
        // exclusive access to the state record for the whole window.
        let mut ctx = CommandContext {
            state: &mut self.state,
            camera: &mut self.camera,
            grabber: &mut self.grabber,
            isu: &self.isu,
            homing: &mut self.homing,
        };
        self.server.poll(POLL_INTERVAL, &mut ctx)?;

        if let Some(homed) = self.homing.poll() {
            self.state.isu_on = homed;
        }

        if self.state.serv_done {
            return Ok(false);
        }

        // Rising edge of video mode: bring up the acquisition channel.
        if self.state.video_on && !self.last_video_on {
            if !self.enable_video() {
                // Retried on the next VIDEO ON.
                return Ok(true);
            }
            self.last_video_on = true;
        }

        if self.state.video_on {
            self.acquire_and_emit()?;
        } else {
            if self.last_video_on {
                self.last_video_on = false;
            }
            if self.last_guide_on {
                self.last_guide_on = false;
                self.state.first_done = false;
            }
        }

        Ok(true)
    }

    /// Open the grabber lazily and configure buffering. Any failure drops
    /// video mode.
    fn enable_video(&mut self) -> bool {
        if self.grabber.is_none() {
            match (self.open_grabber)() {
                Ok(grabber) => self.grabber = Some(grabber),
                Err(e) => {
                    warn!("grabber channel open failed: {e}");
                    self.state.video_on = false;
                    return false;
                }
            }
        }

        let Some(grabber) = self.grabber.as_mut() else {
            return false;
        };
        let (width, height) = (grabber.width(), grabber.height());
        if width <= 1 && height <= 1 {
            warn!("image size incorrect (width={width}, height={height})");
            self.state.video_on = false;
            self.grabber = None;
            return false;
        }
        self.state.image_width = width;
        self.state.image_height = height;

        if let Err(e) = grabber.multibuf(DMA_BUFFERS) {
            warn!("ring buffer allocation failed: {e}");
            self.state.video_on = false;
            self.grabber = None;
            return false;
        }
        if let Err(e) = grabber.set_timeout(0) {
            warn!("acquisition timeout setup failed: {e}");
            self.state.video_on = false;
            self.grabber = None;
            return false;
        }

        info!("video enabled at {width}x{height}");
        true
    }

    fn acquire_and_emit(&mut self) -> Result<(), GuiderError> {
        let Some(grabber) = self.grabber.as_mut() else {
            // VIDEO ON raced a failed open; drop the mode and retry later.
            self.state.video_on = false;
            return Ok(());
        };

        if let Err(e) = grabber.start_image() {
            warn!("start_image failed, dropping frame: {e}");
            return Ok(());
        }
        let frame = match grabber.wait_image() {
            Ok(frame) => frame,
            Err(e) => {
                warn!("wait_image failed, dropping frame: {e}");
                return Ok(());
            }
        };

        if self.state.guide_on {
            self.process_guide_frame(&frame)?;
            self.last_guide_on = true;
        } else if self.last_guide_on {
            self.last_guide_on = false;
            self.state.first_done = false;
        }

        // Timeouts are observed and logged, never acted on.
        let timeouts = self.grabber.as_ref().map(|g| g.timeouts()).unwrap_or(0);
        if timeouts > self.last_timeouts {
            warn!(
                "received {} acquisition timeouts since the last image",
                timeouts - self.last_timeouts
            );
            self.last_timeouts = timeouts;
        }

        self.emit_frame(&frame);
        Ok(())
    }

    /// Centroid, transform, dispatch. The first frame of a session also
    /// runs the FWHM measurement and the fault check.
    fn process_guide_frame(&mut self, frame: &Array2<u16>) -> Result<(), GuiderError> {
        if !self.state.first_done {
            let fwhm = fit_star(&frame.view(), FitMode::Fwhm);
            self.state.fwhm_x = fwhm.fwhm_x;
            self.state.fwhm_y = fwhm.fwhm_y;
            info!(
                "guide start: FWHM {:.2} x {:.2} px",
                fwhm.fwhm_x, fwhm.fwhm_y
            );

            if self.isu.is_present() {
                match self.isu.check_fault() {
                    Ok((false, false)) => {}
                    Ok((x_fault, y_fault)) => {
                        error!(
                            "fatal error on the fast guiding loop: ISU axis fault \
                             (x={x_fault}, y={y_fault}); relaunch the fast guiding loop"
                        );
                        return Err(GuiderError::IsuFault { x_fault, y_fault });
                    }
                    Err(e) => {
                        warn!("failed checking ISU fault flags: {e}");
                    }
                }
            }
        }

        let fit = fit_star(&frame.view(), FitMode::Centroid);
        let xc = fit.x + PIXEL_CENTER_OFFSET;
        let yc = fit.y + PIXEL_CENTER_OFFSET;

        let (xoff, yoff) = geometry::offsets_arcsec(
            (xc, yc),
            (self.state.guide_x0, self.state.guide_y0),
            (self.state.null_x, self.state.null_y),
        );
        self.state.guide_xoff = xoff;
        self.state.guide_yoff = yoff;

        if self.isu.is_present() {
            let correction = geometry::correction(self.isu.as_ref(), (xoff, yoff))
                .map_err(GuiderError::Isu)?;
            self.state.isu_mrad_delta_setup = correction.delta_mrad;
            self.state.isu_mrad_status = correction.status_mrad;

            if self.state.isu_on {
                let rate_hz = if self.state.frame_rate > 0.0 {
                    self.state.frame_rate
                } else {
                    DEFAULT_FRAME_RATE_HZ
                };
                self.actuator.dispatch(SlopeCommand {
                    rate_hz,
                    last_x: correction.status_mrad.0,
                    last_y: correction.status_mrad.1,
                    next_x: correction.target_mrad.0,
                    next_y: correction.target_mrad.1,
                });
            }
        }

        self.state.first_done = true;
        Ok(())
    }

    /// Serialize the frame as a FITS record. A failed write is logged and
    /// the frame dropped; there is no in-band error channel on the stream.
    fn emit_frame(&mut self, frame: &Array2<u16>) {
        let header = build_frame_header(&mut self.state, Utc::now());
        if let Err(e) = write_record(&mut self.output, &header, frame) {
            warn!("unable to write FITS record to the output stream: {e}");
        }
        self.state.finish_save_frame();
    }

    /// Tear down the worker on the way out.
    pub fn into_output(self) -> W {
        let Self {
            actuator, output, ..
        } = self;
        actuator.shutdown();
        output
    }
}

fn write_record<W: Write>(
    output: &mut W,
    header: &fits::FitsHeader,
    frame: &Array2<u16>,
) -> std::io::Result<()> {
    header.write_to(output)?;
    fits::write_image_u16(output, &frame.view())?;
    output.flush()
}
