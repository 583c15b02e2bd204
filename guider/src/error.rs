//! Fatal error surface of the guiding process.
//!
//! The split matters: transient serial or socket trouble is reported to the
//! operator and the loop keeps running, while the conditions below abort the
//! process with a non-zero exit. The design prefers hard failure over
//! silent drift of the guide loop.

use hardware::isu::IsuError;
use hardware::owl::CameraError;
use shared::guide_config::ConfigError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum GuiderError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("camera initialization failed: {0}")]
    CameraInit(#[from] CameraError),

    #[error("camera read-back mismatch during init: {0}")]
    InitVerify(String),

    #[error("ISU fault during guiding (x_fault={x_fault}, y_fault={y_fault})")]
    IsuFault { x_fault: bool, y_fault: bool },

    #[error("ISU failure: {0}")]
    Isu(#[from] IsuError),

    #[error("failed to spawn worker thread: {0}")]
    ThreadSpawn(std::io::Error),

    #[error("command socket failure: {0}")]
    Socket(std::io::Error),
}
