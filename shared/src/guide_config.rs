//! Guider configuration file.
//!
//! A line-oriented `key=value` file pins the guide subraster origin and the
//! null position (the aperture-hole center the star is held on). All four
//! keys are required; a missing or out-of-range value is a startup failure.
//! Unknown keys are warned about and skipped so site files can carry extra
//! annotations.

use std::fs;
use std::path::Path;

use thiserror::Error;
use tracing::warn;

use crate::raster::{FULL_HEIGHT, FULL_WIDTH, GUIDE_X0_MAX, GUIDE_Y0_MAX};

pub const KEY_GUIDE_RASTER_X0: &str = "guideRasterX0";
pub const KEY_GUIDE_RASTER_Y0: &str = "guideRasterY0";
pub const KEY_HOLE_NULL_X: &str = "holeNullX";
pub const KEY_HOLE_NULL_Y: &str = "holeNullY";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("unable to read config file {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },

    #[error("invalid value {value:?} for {key}")]
    InvalidValue { key: String, value: String },

    #[error("{key} value {value} is out of range")]
    OutOfRange { key: String, value: f64 },

    #[error("missing required key {0}")]
    MissingKey(&'static str),
}

/// Guide raster origin and null position loaded at startup. The raster
/// origin is operator-adjustable later through the ROI command; the null
/// through the NULL command.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GuideConfig {
    pub guide_x0: usize,
    pub guide_y0: usize,
    pub null_x: f64,
    pub null_y: f64,
}

impl GuideConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::parse(&text)
    }

    pub fn parse(text: &str) -> Result<Self, ConfigError> {
        let mut guide_x0: Option<usize> = None;
        let mut guide_y0: Option<usize> = None;
        let mut null_x: Option<f64> = None;
        let mut null_y: Option<f64> = None;

        for line in text.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let Some((key, value)) = line.split_once('=') else {
                continue;
            };
            let key = key.trim();
            let value = value.trim();

            if key.eq_ignore_ascii_case(KEY_GUIDE_RASTER_X0) {
                guide_x0 = Some(parse_origin(key, value, GUIDE_X0_MAX)?);
            } else if key.eq_ignore_ascii_case(KEY_GUIDE_RASTER_Y0) {
                guide_y0 = Some(parse_origin(key, value, GUIDE_Y0_MAX)?);
            } else if key.eq_ignore_ascii_case(KEY_HOLE_NULL_X) {
                null_x = Some(parse_null(key, value, FULL_WIDTH as f64)?);
            } else if key.eq_ignore_ascii_case(KEY_HOLE_NULL_Y) {
                null_y = Some(parse_null(key, value, FULL_HEIGHT as f64)?);
            } else {
                warn!(key, "unsupported configuration parameter");
            }
        }

        Ok(Self {
            guide_x0: guide_x0.ok_or(ConfigError::MissingKey(KEY_GUIDE_RASTER_X0))?,
            guide_y0: guide_y0.ok_or(ConfigError::MissingKey(KEY_GUIDE_RASTER_Y0))?,
            null_x: null_x.ok_or(ConfigError::MissingKey(KEY_HOLE_NULL_X))?,
            null_y: null_y.ok_or(ConfigError::MissingKey(KEY_HOLE_NULL_Y))?,
        })
    }
}

fn parse_origin(key: &str, value: &str, max: usize) -> Result<usize, ConfigError> {
    let parsed: i64 = value.parse().map_err(|_| ConfigError::InvalidValue {
        key: key.to_string(),
        value: value.to_string(),
    })?;
    if parsed < 0 || parsed as usize > max {
        return Err(ConfigError::OutOfRange {
            key: key.to_string(),
            value: parsed as f64,
        });
    }
    Ok(parsed as usize)
}

fn parse_null(key: &str, value: &str, max: f64) -> Result<f64, ConfigError> {
    let parsed: f64 = value.parse().map_err(|_| ConfigError::InvalidValue {
        key: key.to_string(),
        value: value.to_string(),
    })?;
    if !parsed.is_finite() || parsed < 0.0 || parsed > max {
        return Err(ConfigError::OutOfRange {
            key: key.to_string(),
            value: parsed,
        });
    }
    Ok(parsed)
}
