//! Fast-guiding server binary.
//!
//! Brings the camera up into a known state (NUC and auto-level off, TEC
//! enabled and set, high gain verified, defaults applied), binds the command
//! port and hands control to the frame loop. Image records stream on
//! stdout; all logging goes to stderr.

use std::path::PathBuf;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, ValueEnum};
use tracing::info;

use guider::frame_loop::FrameLoop;
use guider::server::{CommandServer, DEFAULT_PORT};
use guider::state::{
    ServerState, DEFAULT_DIGITAL_GAIN, DEFAULT_EXPOSURE_MS, DEFAULT_FRAME_RATE_HZ,
    DEFAULT_TEC_SETPOINT_C,
};
use guider::GuiderError;
use hardware::grabber::{FrameGrabber, GrabberFactory, SimGrabber, SimStar};
use hardware::isu::{IsuInterface, MockIsu, NoopIsu};
use hardware::owl::{GainMode, MockSerial, OwlCamera};
use shared::guide_config::GuideConfig;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Backend {
    /// Simulated camera, grabber and mechanism; no hardware needed.
    Sim,
    /// EDT CameraLink frame grabber (requires the vendor driver).
    Edt,
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Guide camera server for the fast tip/tilt loop")]
struct Args {
    /// TCP port for operator commands.
    #[arg(short = 'p', long, default_value_t = DEFAULT_PORT)]
    port: u16,

    /// Guider configuration file (guide raster origin and null position).
    #[arg(short = 'c', long, default_value = "/cfht/conf/spirou_guide.conf")]
    config: PathBuf,

    /// Acquisition backend.
    #[arg(short = 'b', long, value_enum, default_value = "sim")]
    backend: Backend,

    /// Render a seeing-jittered star in the simulated frames, centered on
    /// the configured null position.
    #[arg(long)]
    sim_star: bool,

    /// Run without a steering mechanism (corrections are skipped).
    #[arg(long)]
    no_isu: bool,
}

fn main() -> Result<()> {
    // stdout carries the image stream, so logging must stay on stderr.
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let config = GuideConfig::load(&args.config)
        .with_context(|| format!("unable to load guider configuration {}", args.config.display()))?;
    info!(
        "guide raster at ({}, {}), null at ({}, {})",
        config.guide_x0, config.guide_y0, config.null_x, config.null_y
    );

    let (mut camera, open_grabber): (OwlCamera, GrabberFactory) = match args.backend {
        Backend::Sim => {
            let star = args
                .sim_star
                .then(|| SimStar::seeing_limited(config.null_x, config.null_y));
            let factory: GrabberFactory = Box::new(move || {
                let grabber: Box<dyn FrameGrabber> = Box::new(SimGrabber::new(star));
                Ok(grabber)
            });
            (
                OwlCamera::new(Box::new(MockSerial::with_defaults())),
                factory,
            )
        }
        Backend::Edt => {
            bail!(
                "the EDT CameraLink backend requires the vendor driver and is \
                 not compiled into this build"
            );
        }
    };

    let isu: Arc<dyn IsuInterface> = if args.no_isu {
        Arc::new(NoopIsu)
    } else {
        Arc::new(MockIsu::new())
    };

    initialize_camera(&mut camera)?;

    let state = ServerState::new(&config);
    let server = CommandServer::bind(args.port).context("unable to bind the command port")?;

    let shutdown = Arc::new(AtomicBool::new(false));
    for signal in [signal_hook::consts::SIGINT, signal_hook::consts::SIGTERM] {
        signal_hook::flag::register(signal, Arc::clone(&shutdown))
            .context("unable to register signal handler")?;
    }

    let mut frame_loop = FrameLoop::new(
        state,
        server,
        camera,
        open_grabber,
        isu,
        std::io::stdout().lock(),
        shutdown,
    )?;

    eprintln!("Ready to answer requests");
    frame_loop.run().map_err(Into::into)
}

/// Camera bring-up: every step verified, any failure is fatal.
fn initialize_camera(camera: &mut OwlCamera) -> Result<()> {
    camera
        .check_status()
        .context("no response from the camera when checking status")?;
    info!("camera status OK");

    camera.set_nuc(false).context("unable to set NUC state")?;
    info!("camera NUC turned off");

    camera
        .set_auto_level(false)
        .context("unable to set camera auto level")?;
    info!("camera auto level turned off");

    camera.enable_tec().context("enable TEC control failed")?;
    info!("camera TEC enabled");

    camera
        .check_status()
        .context("no response from the camera after TEC enable")?;

    camera
        .set_gain_mode(GainMode::High)
        .context("unable to set camera to high-gain mode")?;
    let gain_mode = camera
        .gain_mode()
        .context("unable to retrieve gain mode from the camera")?;
    if gain_mode != GainMode::High {
        return Err(GuiderError::InitVerify(format!(
            "gain mode read back as {gain_mode:?}, expected high"
        ))
        .into());
    }
    info!("camera is set to HIGH gain mode");

    let applied = camera
        .set_tec_setpoint_c(DEFAULT_TEC_SETPOINT_C)
        .context("unable to set the TEC setpoint")?;
    info!("TEC setpoint set to {applied:.2} degrees");

    camera
        .set_digital_gain(DEFAULT_DIGITAL_GAIN)
        .context("unable to set default digital gain")?;
    let digital_gain = camera
        .digital_gain()
        .context("unable to retrieve digital gain from the camera")?;
    if digital_gain != DEFAULT_DIGITAL_GAIN {
        return Err(GuiderError::InitVerify(format!(
            "digital gain read back as {digital_gain}, expected {DEFAULT_DIGITAL_GAIN}"
        ))
        .into());
    }

    camera
        .set_exposure_ms(DEFAULT_EXPOSURE_MS)
        .context("unable to set the default exposure time")?;
    info!("exposure time in camera set to {DEFAULT_EXPOSURE_MS:.3} ms");

    camera
        .set_frame_rate_hz(DEFAULT_FRAME_RATE_HZ)
        .context("unable to set the default frame rate")?;
    info!("frame rate in camera set to {DEFAULT_FRAME_RATE_HZ:.2} Hz");

    Ok(())
}
