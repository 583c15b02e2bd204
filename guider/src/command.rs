//! Operator command grammar and dispatcher.
//!
//! Commands are case-insensitive single lines; arguments are whitespace
//! separated with double-quoted strings supported. Every reply is one line:
//! a leading `.` for pass or `!` for fail, the echoed command, and any value
//! or quoted message. The dispatcher runs on the main thread between frames
//! with exclusive access to the server state, so configuration changes take
//! effect before the next acquisition starts.

use std::sync::Arc;

use tracing::{debug, error, warn};

use hardware::grabber::FrameGrabber;
use hardware::isu::IsuInterface;
use hardware::owl::OwlCamera;
use shared::raster::{
    FULL_HEIGHT, FULL_WIDTH, GUIDE_SIZE, GUIDE_X0_MAX, GUIDE_Y0_MAX,
};

use crate::actuator::HomingSlot;
use crate::error::GuiderError;
use crate::state::{
    clamp_len, ServerState, MAX_COORD_LEN, MAX_SAVE_COUNT, MAX_TAG_LEN, USER_TIMEOUT_MS,
};

/// Highest accepted frame rate, Hz.
pub const MAX_FRAME_RATE_HZ: f64 = 120.0;

/// Everything a command may touch. Borrowed for the duration of one
/// dispatch; the frame loop owns all of it.
pub struct CommandContext<'a> {
    pub state: &'a mut ServerState,
    pub camera: &'a mut OwlCamera,
    pub grabber: &'a mut Option<Box<dyn FrameGrabber>>,
    pub isu: &'a Arc<dyn IsuInterface>,
    pub homing: &'a mut HomingSlot,
}

/// What the server should do with the connection after a dispatch.
#[derive(Debug, PartialEq, Eq)]
pub enum Outcome {
    /// Send this line back.
    Reply(String),
    /// Send nothing (SHUTDOWN acknowledges by exiting).
    Silent,
    /// Close the connection quietly.
    Disconnect,
}

fn pass(text: impl Into<String>) -> Outcome {
    Outcome::Reply(format!(". {}", text.into()))
}

fn fail(text: impl Into<String>) -> Outcome {
    Outcome::Reply(format!("! {}", text.into()))
}

/// Split a command line into whitespace-separated tokens, honouring double
/// quotes (quotes group, and are stripped from the token).
pub fn split_quoted(input: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut seen_any = false;

    for ch in input.chars() {
        match ch {
            '"' => {
                in_quotes = !in_quotes;
                seen_any = true;
            }
            c if c.is_whitespace() && !in_quotes => {
                if seen_any {
                    tokens.push(std::mem::take(&mut current));
                    seen_any = false;
                }
            }
            c => {
                current.push(c);
                seen_any = true;
            }
        }
    }
    if seen_any {
        tokens.push(current);
    }
    tokens
}

fn parse_finite_f64(token: &str) -> Option<f64> {
    token.parse::<f64>().ok().filter(|v| v.is_finite())
}

/// Dispatch one command line. Errors are fatal conditions (worker spawn
/// failure); everything recoverable becomes a `!` reply.
pub fn handle_line(line: &str, ctx: &mut CommandContext<'_>) -> Result<Outcome, GuiderError> {
    debug!("RECV> {line}");
    let tokens = split_quoted(line);
    let Some(command) = tokens.first() else {
        return Ok(fail("\"Syntax Error\""));
    };
    let command = command.to_ascii_uppercase();
    let args = &tokens[1..];

    let outcome = match command.as_str() {
        "QUIT" | "BYE" | "EXIT" | "LOGOUT" => Ok(Outcome::Disconnect),
        "SHUTDOWN" => {
            ctx.state.serv_done = true;
            Ok(Outcome::Silent)
        }
        "ENDEXP" => {
            ctx.state.exp_on = false;
            Ok(pass("ENDEXP"))
        }
        "STARTEXP" => Ok(startexp(args, ctx)),
        "FRAMERATE" => Ok(framerate(args, ctx)),
        "EXPTIME" => Ok(exptime(args, ctx)),
        "TEC" => Ok(tec(args, ctx)),
        "TEMP" => Ok(temperature(ctx)),
        "ROI" => Ok(roi(args, ctx)),
        "NULL" => Ok(null_position(args, ctx)),
        "VIDEO" => Ok(video(args, ctx)),
        "GUIDE" => Ok(guide(args, ctx)),
        "ISU" => isu(args, ctx),
        "SAVE" => Ok(save(args, ctx)),
        _ => Ok(fail("\"Syntax Error\"")),
    };

    if let Ok(Outcome::Reply(reply)) = &outcome {
        debug!("SEND> {reply}");
    }
    outcome
}

/// STARTEXP FILENAME=<name> [RA=... DEC=... EQUINOX=<f> OBJMAG=<f>]
fn startexp(args: &[String], ctx: &mut CommandContext<'_>) -> Outcome {
    let has_filename = args.iter().any(|a| {
        a.get(..9)
            .is_some_and(|prefix| prefix.eq_ignore_ascii_case("filename="))
    });
    if !has_filename {
        return fail("STARTEXP \"Filename argument is mandatory\"");
    }

    // Partial argument sets leave the omitted keys undefined.
    ctx.state.ra = None;
    ctx.state.dec = None;
    ctx.state.equinox = None;
    ctx.state.objmag = None;

    for arg in args {
        let Some((key, value)) = arg.split_once('=') else {
            return fail(format!("STARTEXP \"{arg} argument is unsupported\""));
        };
        if key.eq_ignore_ascii_case("filename") {
            let mut name = value.to_string();
            clamp_len(&mut name, MAX_TAG_LEN);
            ctx.state.filename = Some(name);
        } else if key.eq_ignore_ascii_case("ra") {
            let mut ra = value.to_string();
            clamp_len(&mut ra, MAX_COORD_LEN);
            ctx.state.ra = Some(ra);
        } else if key.eq_ignore_ascii_case("dec") {
            let mut dec = value.to_string();
            clamp_len(&mut dec, MAX_COORD_LEN);
            ctx.state.dec = Some(dec);
        } else if key.eq_ignore_ascii_case("equinox") {
            match parse_finite_f64(value) {
                Some(equinox) => ctx.state.equinox = Some(equinox),
                None => return fail("STARTEXP \"float equinox argument expected\""),
            }
        } else if key.eq_ignore_ascii_case("objmag") {
            match parse_finite_f64(value) {
                Some(objmag) => ctx.state.objmag = Some(objmag),
                None => return fail("STARTEXP \"float objmag argument expected\""),
            }
        } else {
            return fail(format!("STARTEXP \"{arg} argument is unsupported\""));
        }
    }

    ctx.state.exp_on = true;
    pass("STARTEXP")
}

/// FRAMERATE queries; FRAMERATE <hz> sets with read-back verification.
fn framerate(args: &[String], ctx: &mut CommandContext<'_>) -> Outcome {
    if args.is_empty() {
        if let Err(e) = ctx.camera.check_status() {
            error!("no response from the camera when checking status: {e}");
        }
        return match ctx.camera.frame_rate_hz() {
            Ok(rate) => {
                ctx.state.frame_rate = rate;
                pass(format!("FRAMERATE {rate:.2}"))
            }
            Err(e) => {
                warn!("unable to read frame rate from the camera: {e}");
                fail("FRAMERATE \"Unable to read frame rate in the camera\"")
            }
        };
    }

    let Some(rate) = parse_finite_f64(&args[0]) else {
        return fail("FRAMERATE \"Invalid Argument Specified\"");
    };
    if rate <= 0.0 || rate > MAX_FRAME_RATE_HZ || 1e3 / rate > USER_TIMEOUT_MS {
        return fail("FRAMERATE \"Frame Rate Specified is Invalid\"");
    }

    if let Err(e) = ctx.camera.check_status() {
        error!("no response from the camera when checking status: {e}");
    }
    if let Err(e) = ctx.camera.set_frame_rate_hz(rate) {
        warn!("unable to set frame rate to {rate:.2} Hz: {e}");
        return fail("FRAMERATE \"Unable to set frame rate in the camera\"");
    }

    // Read back what the divider actually gives.
    match ctx.camera.frame_rate_hz() {
        Ok(actual) => {
            ctx.state.frame_rate = actual;
            pass(format!("FRAMERATE {actual:.2}"))
        }
        Err(e) => {
            warn!("unable to read frame rate from the camera: {e}");
            fail("FRAMERATE \"Unable to read frame rate in the camera\"")
        }
    }
}

/// EXPTIME queries; EXPTIME <ms> sets.
fn exptime(args: &[String], ctx: &mut CommandContext<'_>) -> Outcome {
    if args.is_empty() {
        return match ctx.camera.exposure_ms() {
            Ok(exposure) => {
                ctx.state.exposure_time = exposure;
                pass(format!("EXPTIME {exposure:.9}"))
            }
            Err(e) => {
                warn!("unable to read exposure time from the camera: {e}");
                fail("EXPTIME \"Unable to read exposure time in the camera\"")
            }
        };
    }

    let Some(exposure) = parse_finite_f64(&args[0]).filter(|&v| v > 0.0) else {
        return fail("EXPTIME \"Invalid Argument Specified\"");
    };
    if let Err(e) = ctx.camera.set_exposure_ms(exposure) {
        warn!("unable to set exposure time to {exposure:.3} ms: {e}");
        return fail("EXPTIME \"Unable to set exposure time in the camera\"");
    }
    ctx.state.exposure_time = exposure;
    pass(format!("EXPTIME {exposure:.2}"))
}

/// TEC queries; TEC <deg_c> sets.
fn tec(args: &[String], ctx: &mut CommandContext<'_>) -> Outcome {
    if args.is_empty() {
        return match ctx.camera.tec_setpoint_c() {
            Ok(setpoint) => {
                ctx.state.tec_setpoint = setpoint;
                pass(format!("TEC {setpoint:.1} degrees C"))
            }
            Err(e) => {
                warn!("unable to read TEC set point from the camera: {e}");
                fail("TEC \"Unable to read TEC set point in the camera\"")
            }
        };
    }

    let Some(setpoint) = parse_finite_f64(&args[0]) else {
        return fail("TEC \"Invalid Argument Specified\"");
    };
    match ctx.camera.set_tec_setpoint_c(setpoint) {
        Ok(applied) => {
            ctx.state.tec_setpoint = applied;
            pass(format!("TEC {applied:.2}"))
        }
        Err(e) => {
            warn!("unable to set TEC setpoint to {setpoint:.2} degrees C: {e}");
            fail("TEC \"Unable to set TEC set point in the camera\"")
        }
    }
}

fn temperature(ctx: &mut CommandContext<'_>) -> Outcome {
    match ctx.camera.sensor_temperature_c() {
        Ok(temp) => {
            ctx.state.temp = temp;
            pass(format!("TEMP {temp:.1} degrees C"))
        }
        Err(e) => {
            warn!("unable to read temperature from the camera: {e}");
            fail("TEMP \"Unable to read temperature in the camera\"")
        }
    }
}

/// ROI queries the current readout size; ROI <x0> <y0> moves the guide
/// raster origin, reapplying the camera window when currently subrastered.
fn roi(args: &[String], ctx: &mut CommandContext<'_>) -> Outcome {
    if args.is_empty() {
        let Some(grabber) = ctx.grabber.as_deref() else {
            return fail("ROI \"video is not enabled\"");
        };
        return pass(format!("ROI is {} X {}", grabber.width(), grabber.height()));
    }

    if args.len() != 2 {
        return fail("\"Invalid ROI command. Should be ROI <X0 Y0>\"");
    }
    let (Ok(x), Ok(y)) = (args[0].parse::<i64>(), args[1].parse::<i64>()) else {
        return fail("\"Invalid ROI command. Argument is not a valid integer\"");
    };
    if x < 0 || x > GUIDE_X0_MAX as i64 || y < 0 || y > GUIDE_Y0_MAX as i64 {
        return fail("\"Invalid ROI command. Arguments are out of range\"");
    }

    ctx.state.guide_x0 = x as usize;
    ctx.state.guide_y0 = y as usize;

    // Apply immediately when the camera is already windowed down.
    if ctx.state.in_guide_window() {
        let Some(grabber) = ctx.grabber.as_deref_mut() else {
            return fail("ROI \"video is not enabled\"");
        };
        if let Err(e) = grabber.set_roi(x as usize, GUIDE_SIZE, y as usize, GUIDE_SIZE) {
            warn!("unable to set image ROI: {e}");
            return fail("ROI \"unable to set image ROI\"");
        }
        if let Err(e) = grabber.enable_roi(true) {
            warn!("set ROI failed: {e}");
            return fail("ROI \"set ROI failed\"");
        }
        ctx.state.win_x0 = x as usize;
        ctx.state.win_y0 = y as usize;
    }

    pass("ROI")
}

/// NULL queries; NULL <x> <y> moves the null position.
fn null_position(args: &[String], ctx: &mut CommandContext<'_>) -> Outcome {
    if args.is_empty() {
        return pass(format!(
            "NULL {} {}",
            ctx.state.null_x, ctx.state.null_y
        ));
    }

    if args.len() != 2 {
        return fail("\"Invalid NULL command. Should be NULL <NULLX> <NULLY>\"");
    }
    let (Some(x), Some(y)) = (parse_finite_f64(&args[0]), parse_finite_f64(&args[1])) else {
        return fail("NULL \"Invalid NULL position\"");
    };
    if x < 0.0 || x > FULL_WIDTH as f64 || y < 0.0 || y > FULL_HEIGHT as f64 {
        warn!("NULL position ({x},{y}) is out of range");
        return fail("NULL \"NULL position out of range\"");
    }

    ctx.state.null_x = x;
    ctx.state.null_y = y;
    pass("NULL")
}

fn video(args: &[String], ctx: &mut CommandContext<'_>) -> Outcome {
    match args {
        [mode] if mode.eq_ignore_ascii_case("on") => {
            ctx.state.video_on = true;
            pass("VIDEO ON")
        }
        [mode] if mode.eq_ignore_ascii_case("off") => {
            ctx.state.video_on = false;
            pass("VIDEO OFF")
        }
        _ => fail("\"Invalid video mode\""),
    }
}

/// GUIDE ON windows the camera down to the guide subraster; GUIDE OFF
/// restores the full raster. Both require an open camera channel.
fn guide(args: &[String], ctx: &mut CommandContext<'_>) -> Outcome {
    let [mode] = args else {
        return fail("\"Invalid guide command. Should be <ON|OFF>\"");
    };

    if mode.eq_ignore_ascii_case("on") {
        let Some(grabber) = ctx.grabber.as_deref_mut() else {
            return fail("GUIDE \"video is not enabled\"");
        };
        if let Err(e) = grabber.set_roi(
            ctx.state.guide_x0,
            GUIDE_SIZE,
            ctx.state.guide_y0,
            GUIDE_SIZE,
        ) {
            warn!("unable to set image ROI: {e}");
            return fail("GUIDE \"unable to set image ROI\"");
        }
        if let Err(e) = grabber.enable_roi(true) {
            warn!("set ROI failed: {e}");
            return fail("GUIDE \"set ROI failed\"");
        }
        ctx.state.enter_guide_window();
        ctx.state.guide_on = true;
        pass("GUIDE ON")
    } else if mode.eq_ignore_ascii_case("off") {
        let Some(grabber) = ctx.grabber.as_deref_mut() else {
            return fail("GUIDE \"video is not enabled\"");
        };
        if let Err(e) = grabber.enable_roi(false) {
            warn!("unable to reset image ROI: {e}");
            return fail("GUIDE \"unable to reset image ROI\"");
        }
        ctx.state.enter_full_window();
        ctx.state.guide_on = false;
        ctx.state.first_done = false;
        pass("GUIDE OFF")
    } else {
        fail("\"Invalid guide command. Should be <ON|OFF>\"")
    }
}

/// ISU ON homes (on a worker) or enables the mechanism; ISU OFF stops it.
fn isu(args: &[String], ctx: &mut CommandContext<'_>) -> Result<Outcome, GuiderError> {
    let [mode] = args else {
        return Ok(fail("\"Invalid isu mode\""));
    };

    if mode.eq_ignore_ascii_case("on") {
        if !ctx.isu.is_present() {
            return Ok(fail("ISU \"no ISU present in this configuration\""));
        }
        if ctx.homing.in_progress() {
            // Homing already underway; confirmation was already given.
            return Ok(pass("ISU ON"));
        }

        let homed = match ctx.isu.is_homed() {
            Ok(homed) => homed,
            Err(e) => {
                warn!("failed checking homing status of the ISU mechanism: {e}");
                false
            }
        };

        if !homed {
            // Homing blocks for a long time; run it on a worker and confirm
            // now. The log confirms again when it really finishes.
            ctx.homing.start(Arc::clone(ctx.isu))?;
            Ok(pass("ISU ON"))
        } else if let Err(e) = ctx.isu.enable() {
            warn!("failed enabling the ISU mechanism: {e}");
            Ok(fail("ISU OFF"))
        } else {
            ctx.state.isu_on = true;
            Ok(pass("ISU ON"))
        }
    } else if mode.eq_ignore_ascii_case("off") {
        if let Err(e) = ctx.isu.stop() {
            warn!("failed stopping the ISU mechanism: {e}");
            return Ok(fail("ISU OFF"));
        }
        ctx.state.isu_on = false;
        Ok(pass("ISU OFF"))
    } else {
        Ok(fail("\"Invalid isu mode\""))
    }
}

/// SAVE <count> <comment> arms the save sequence; SAVE 0 cancels it.
fn save(args: &[String], ctx: &mut CommandContext<'_>) -> Outcome {
    let [count, comment] = args else {
        return fail("SAVE \"Invalid Argument Specified\"");
    };
    let Ok(count) = count.parse::<i64>() else {
        return fail("SAVE \"Invalid Argument Specified\"");
    };
    if count < 0 || count > MAX_SAVE_COUNT as i64 {
        return fail("SAVE \"Invalid Argument Specified\"");
    }

    ctx.state.arm_save(count as u32, comment);
    debug!("save count = {count}, comment = {comment}");
    pass("SAVE")
}
