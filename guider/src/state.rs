//! The process-wide server state record.
//!
//! One value, owned by the frame loop and lent by exclusive reference to the
//! command dispatcher between frames. Worker threads never see it; they get
//! value copies of the arguments they need.

use shared::guide_config::GuideConfig;
use shared::raster::{FULL_HEIGHT, FULL_WIDTH, GUIDE_SIZE};

/// Longest operator-supplied comment or filename carried into a header.
pub const MAX_TAG_LEN: usize = 50;

/// Longest RA/DEC sexagesimal string carried into a header.
pub const MAX_COORD_LEN: usize = 20;

/// Upper bound on a save-sequence length.
pub const MAX_SAVE_COUNT: u32 = 1_000_000;

/// Defaults applied during camera bring-up.
pub const DEFAULT_TEC_SETPOINT_C: f64 = -40.0;
pub const DEFAULT_DIGITAL_GAIN: u16 = 1;
pub const DEFAULT_EXPOSURE_MS: f64 = 10.0;
pub const DEFAULT_FRAME_RATE_HZ: f64 = 50.0;

/// Longest tolerated frame interval, ms. Frame rates below 1000/this are
/// rejected.
pub const USER_TIMEOUT_MS: f64 = 20_000.0;

/// Cap an operator-supplied string to at most `max` bytes, backing off to a
/// character boundary.
pub fn clamp_len(text: &mut String, max: usize) {
    if text.len() > max {
        let mut end = max;
        while !text.is_char_boundary(end) {
            end -= 1;
        }
        text.truncate(end);
    }
}

#[derive(Debug, Clone)]
pub struct ServerState {
    /// Requested frame rate, Hz.
    pub frame_rate: f64,
    /// Exposure (integration) time, ms.
    pub exposure_time: f64,
    /// TEC cooler setpoint, °C.
    pub tec_setpoint: f64,
    /// Last sensor temperature read-back, °C.
    pub temp: f64,

    /// Current readout size in pixels.
    pub image_width: usize,
    pub image_height: usize,
    /// Origin of the current readout window on the sensor.
    pub win_x0: usize,
    pub win_y0: usize,

    /// Configured guide subraster origin.
    pub guide_x0: usize,
    pub guide_y0: usize,
    /// Null position: the pixel the star is held on.
    pub null_x: f64,
    pub null_y: f64,

    /// Last computed star offset from the null, arcsec.
    pub guide_xoff: f64,
    pub guide_yoff: f64,

    /// Mode flags.
    pub video_on: bool,
    pub guide_on: bool,
    pub isu_on: bool,
    pub exp_on: bool,

    /// Last commanded ISU delta and last read-back, mrad.
    pub isu_mrad_delta_setup: (f64, f64),
    pub isu_mrad_status: (f64, f64),

    /// One-shot FWHM measured at guide start, px.
    pub fwhm_x: f64,
    pub fwhm_y: f64,

    /// Save-sequence bookkeeping.
    pub frame_sequence: u32,
    pub frame_save_count: u32,
    pub fits_comment: String,

    /// Exposure tagging set by STARTEXP.
    pub filename: Option<String>,
    pub ra: Option<String>,
    pub dec: Option<String>,
    pub equinox: Option<f64>,
    pub objmag: Option<f64>,

    /// Latch: the first frame of a guide session runs the FWHM measurement
    /// and the ISU fault check.
    pub first_done: bool,

    /// Set by SHUTDOWN; the frame loop exits at the next tick.
    pub serv_done: bool,
}

impl ServerState {
    pub fn new(config: &GuideConfig) -> Self {
        Self {
            frame_rate: DEFAULT_FRAME_RATE_HZ,
            exposure_time: DEFAULT_EXPOSURE_MS,
            tec_setpoint: DEFAULT_TEC_SETPOINT_C,
            temp: 0.0,
            image_width: FULL_WIDTH,
            image_height: FULL_HEIGHT,
            win_x0: 0,
            win_y0: 0,
            guide_x0: config.guide_x0,
            guide_y0: config.guide_y0,
            null_x: config.null_x,
            null_y: config.null_y,
            guide_xoff: 0.0,
            guide_yoff: 0.0,
            video_on: false,
            guide_on: false,
            isu_on: false,
            exp_on: false,
            isu_mrad_delta_setup: (0.0, 0.0),
            isu_mrad_status: (0.0, 0.0),
            fwhm_x: 0.0,
            fwhm_y: 0.0,
            frame_sequence: 0,
            frame_save_count: 0,
            fits_comment: String::new(),
            filename: None,
            ra: None,
            dec: None,
            equinox: None,
            objmag: None,
            first_done: false,
            serv_done: false,
        }
    }

    /// Switch the readout window to the guide subraster.
    pub fn enter_guide_window(&mut self) {
        self.win_x0 = self.guide_x0;
        self.win_y0 = self.guide_y0;
        self.image_width = GUIDE_SIZE;
        self.image_height = GUIDE_SIZE;
    }

    /// Switch the readout window back to the full raster.
    pub fn enter_full_window(&mut self) {
        self.win_x0 = 0;
        self.win_y0 = 0;
        self.image_width = FULL_WIDTH;
        self.image_height = FULL_HEIGHT;
    }

    /// Whether the readout is currently the guide subraster.
    pub fn in_guide_window(&self) -> bool {
        self.image_width == GUIDE_SIZE && self.image_height == GUIDE_SIZE
    }

    /// Arm (or with `count == 0` cancel) a save sequence.
    pub fn arm_save(&mut self, count: u32, comment: &str) {
        self.frame_save_count = count;
        self.frame_sequence = 0;
        self.fits_comment = if count == 0 {
            String::new()
        } else {
            let mut comment = comment.to_string();
            clamp_len(&mut comment, MAX_TAG_LEN);
            comment
        };
    }

    /// Whether frames are currently tagged as part of a save sequence.
    pub fn save_active(&self) -> bool {
        self.frame_save_count > 0
    }

    /// Called after a frame is emitted: once the sequence is complete, the
    /// save state resets.
    pub fn finish_save_frame(&mut self) {
        if self.save_active() && self.frame_sequence >= self.frame_save_count {
            self.fits_comment.clear();
            self.frame_save_count = 0;
            self.frame_sequence = 0;
        }
    }
}
