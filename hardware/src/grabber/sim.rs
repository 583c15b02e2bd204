//! Simulator-backed grabber.
//!
//! Renders synthetic frames at the sensor geometry of the guide camera: a
//! flat background, optionally a Gaussian star. Star jitter reproduces
//! seeing: each frame the star center is displaced by a zero-mean Gaussian
//! whose sigma is given in arcseconds on the sky.

use ndarray::Array2;
use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, Normal};

use shared::raster::{FULL_HEIGHT, FULL_WIDTH, PIXSCALE};

use super::{FrameGrabber, GrabberError, GrabberResult};

/// sigma = FWHM / 2.35482 for a Gaussian profile.
const FWHM_TO_SIGMA: f64 = 1.0 / 2.354_82;

/// Synthetic guide star description, in full-sensor pixel coordinates.
#[derive(Debug, Clone, Copy)]
pub struct SimStar {
    pub x: f64,
    pub y: f64,
    pub fwhm: f64,
    pub peak: f64,
    /// Per-frame Gaussian jitter of the star position, arcsec (1-sigma).
    pub jitter_arcsec: f64,
}

impl SimStar {
    /// A bright, tight star with no jitter. Tests start from this.
    pub fn pinned(x: f64, y: f64) -> Self {
        Self {
            x,
            y,
            fwhm: 2.5,
            peak: 12_000.0,
            jitter_arcsec: 0.0,
        }
    }

    /// Seeing-limited star for closed-loop bench runs: 0.65 arcsec seeing
    /// is a 0.276 arcsec 1-sigma displacement.
    pub fn seeing_limited(x: f64, y: f64) -> Self {
        Self {
            x,
            y,
            fwhm: 2.5,
            peak: 12_000.0,
            jitter_arcsec: 0.276,
        }
    }
}

pub struct SimGrabber {
    sensor_width: usize,
    sensor_height: usize,
    roi: (usize, usize, usize, usize),
    roi_enabled: bool,
    background: u16,
    star: Option<SimStar>,
    pending: bool,
    timeouts: u32,
    rng: StdRng,
}

impl SimGrabber {
    pub fn new(star: Option<SimStar>) -> Self {
        Self {
            sensor_width: FULL_WIDTH,
            sensor_height: FULL_HEIGHT,
            roi: (0, FULL_WIDTH, 0, FULL_HEIGHT),
            roi_enabled: false,
            background: 1000,
            star,
            pending: false,
            timeouts: 0,
            rng: StdRng::seed_from_u64(0x0771),
        }
    }

    /// Move the simulated star (e.g. to model a telescope offset).
    pub fn set_star(&mut self, star: Option<SimStar>) {
        self.star = star;
    }

    fn render(&mut self) -> Array2<u16> {
        let (x0, width, y0, height) = if self.roi_enabled {
            self.roi
        } else {
            (0, self.sensor_width, 0, self.sensor_height)
        };

        let mut frame = Array2::from_elem((height, width), self.background);

        if let Some(star) = self.star {
            let jitter_px = star.jitter_arcsec / PIXSCALE;
            let (dx, dy) = if jitter_px > 0.0 {
                let normal = Normal::new(0.0, jitter_px).unwrap();
                (normal.sample(&mut self.rng), normal.sample(&mut self.rng))
            } else {
                (0.0, 0.0)
            };

            let cx = star.x + dx - x0 as f64;
            let cy = star.y + dy - y0 as f64;
            let sigma = star.fwhm * FWHM_TO_SIGMA;
            let denom = 2.0 * sigma * sigma;

            for ((row, col), value) in frame.indexed_iter_mut() {
                let ddx = col as f64 - cx;
                let ddy = row as f64 - cy;
                let signal = star.peak * (-(ddx * ddx + ddy * ddy) / denom).exp();
                *value = (*value as f64 + signal).min(u16::MAX as f64) as u16;
            }
        }

        frame
    }
}

impl FrameGrabber for SimGrabber {
    fn width(&self) -> usize {
        if self.roi_enabled {
            self.roi.1
        } else {
            self.sensor_width
        }
    }

    fn height(&self) -> usize {
        if self.roi_enabled {
            self.roi.3
        } else {
            self.sensor_height
        }
    }

    fn set_roi(&mut self, x0: usize, width: usize, y0: usize, height: usize) -> GrabberResult<()> {
        if width == 0
            || height == 0
            || x0 + width > self.sensor_width
            || y0 + height > self.sensor_height
        {
            return Err(GrabberError::InvalidRoi {
                x0,
                y0,
                width,
                height,
                sensor_width: self.sensor_width,
                sensor_height: self.sensor_height,
            });
        }
        self.roi = (x0, width, y0, height);
        Ok(())
    }

    fn enable_roi(&mut self, enabled: bool) -> GrabberResult<()> {
        self.roi_enabled = enabled;
        Ok(())
    }

    fn multibuf(&mut self, _buffers: usize) -> GrabberResult<()> {
        Ok(())
    }

    fn set_timeout(&mut self, _timeout_ms: u32) -> GrabberResult<()> {
        Ok(())
    }

    fn start_image(&mut self) -> GrabberResult<()> {
        self.pending = true;
        Ok(())
    }

    fn wait_image(&mut self) -> GrabberResult<Array2<u16>> {
        if !self.pending {
            return Err(GrabberError::Acquire("no image started".into()));
        }
        self.pending = false;
        Ok(self.render())
    }

    fn timeouts(&self) -> u32 {
        self.timeouts
    }
}
