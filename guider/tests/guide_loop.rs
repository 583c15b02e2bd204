//! End-to-end tests of the guiding loop against the simulator backend.
//!
//! Each test drives a real frame loop: commands travel over a loopback TCP
//! connection into the polled server, frames come from the simulated
//! grabber, and the emitted FITS records are parsed back out of the output
//! buffer.

use std::collections::HashMap;
use std::io::{BufRead, BufReader, ErrorKind, Read, Write};
use std::net::TcpStream;
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use approx::assert_abs_diff_eq;

use guider::frame_loop::FrameLoop;
use guider::server::CommandServer;
use guider::state::ServerState;
use guider::GuiderError;
use hardware::grabber::{FrameGrabber, GrabberFactory, SimGrabber, SimStar};
use hardware::isu::{IsuInterface, MockIsu};
use hardware::owl::{MockSerial, OwlCamera};
use shared::guide_config::GuideConfig;
use shared::raster::PIXSCALE;

const GUIDE_X0: usize = 100;
const GUIDE_Y0: usize = 200;
const NULL_X: f64 = 115.5;
const NULL_Y: f64 = 215.5;

/// Star pinned to the null pixel of the test configuration.
fn pinned_star() -> SimStar {
    SimStar::pinned(NULL_X, NULL_Y)
}

#[derive(Clone, Default)]
struct SharedBuf(Arc<Mutex<Vec<u8>>>);

impl Write for SharedBuf {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

struct Harness {
    frame_loop: FrameLoop<SharedBuf>,
    output: SharedBuf,
    isu: Arc<MockIsu>,
    client: BufReader<TcpStream>,
}

impl Harness {
    fn new(star: Option<SimStar>) -> Self {
        let config = GuideConfig {
            guide_x0: GUIDE_X0,
            guide_y0: GUIDE_Y0,
            null_x: NULL_X,
            null_y: NULL_Y,
        };

        let mut camera = OwlCamera::new(Box::new(MockSerial::with_defaults()));
        camera.set_frame_rate_hz(50.0).unwrap();
        camera.set_tec_setpoint_c(-40.0).unwrap();
        camera.set_exposure_ms(10.0).unwrap();

        let factory: GrabberFactory = Box::new(move || {
            let grabber: Box<dyn FrameGrabber> = Box::new(SimGrabber::new(star));
            Ok(grabber)
        });

        let isu = Arc::new(MockIsu::homed());
        let isu_dyn: Arc<dyn IsuInterface> = isu.clone();

        let server = CommandServer::bind_addr("127.0.0.1:0").unwrap();
        let addr = server.local_addr().unwrap();

        let output = SharedBuf::default();
        let mut frame_loop = FrameLoop::new(
            ServerState::new(&config),
            server,
            camera,
            factory,
            isu_dyn,
            output.clone(),
            Arc::new(AtomicBool::new(false)),
        )
        .unwrap();

        let stream = TcpStream::connect(addr).unwrap();
        stream
            .set_read_timeout(Some(Duration::from_millis(100)))
            .unwrap();
        // Let the server accept the connection.
        frame_loop.tick().unwrap();

        Self {
            frame_loop,
            output,
            isu,
            client: BufReader::new(stream),
        }
    }

    /// Send a command and pump the loop until the reply arrives.
    fn send(&mut self, line: &str) -> String {
        writeln!(self.client.get_mut(), "{line}").unwrap();
        let mut reply = String::new();
        for _ in 0..100 {
            self.frame_loop.tick().unwrap();
            match self.client.read_line(&mut reply) {
                Ok(_) => return reply.trim_end().to_string(),
                Err(e) if e.kind() == ErrorKind::WouldBlock || e.kind() == ErrorKind::TimedOut => {
                    continue
                }
                Err(e) => panic!("read failed: {e}"),
            }
        }
        panic!("no reply to {line:?}");
    }

    fn tick(&mut self) {
        self.frame_loop.tick().unwrap();
    }

    fn state(&self) -> &ServerState {
        self.frame_loop.state()
    }

    fn records(&self) -> Vec<FitsRecord> {
        parse_records(&self.output.0.lock().unwrap())
    }
}

struct FitsRecord {
    cards: HashMap<String, String>,
    data_len: usize,
}

impl FitsRecord {
    fn value(&self, keyword: &str) -> &str {
        self.cards
            .get(keyword)
            .unwrap_or_else(|| panic!("missing keyword {keyword}"))
    }

    fn int(&self, keyword: &str) -> i64 {
        self.value(keyword).parse().unwrap()
    }

    fn real(&self, keyword: &str) -> f64 {
        self.value(keyword).parse().unwrap()
    }

    fn is_undefined(&self, keyword: &str) -> bool {
        self.value(keyword).is_empty()
    }
}

/// Walk a byte stream of concatenated header+payload FITS records.
fn parse_records(bytes: &[u8]) -> Vec<FitsRecord> {
    const BLOCK: usize = 2880;
    const CARD: usize = 80;

    let mut records = Vec::new();
    let mut reader = bytes;

    while !reader.is_empty() {
        let mut cards = HashMap::new();
        let mut ended = false;
        while !ended {
            let mut block = [0u8; BLOCK];
            if reader.read_exact(&mut block).is_err() {
                return records;
            }
            for card in block.chunks(CARD) {
                let text = String::from_utf8_lossy(card);
                if text.starts_with("END ") || text.trim() == "END" {
                    ended = true;
                    break;
                }
                if text[8..10].trim() != "=" {
                    continue;
                }
                let keyword = text[..8].trim().to_string();
                let rest = &text[10..];
                let value = match rest.find(" / ") {
                    Some(slash) => &rest[..slash],
                    None => rest,
                };
                let value = value.trim().trim_matches('\'').trim().to_string();
                cards.insert(keyword, value);
            }
        }

        let width = cards["NAXIS1"].parse::<usize>().unwrap();
        let height = cards["NAXIS2"].parse::<usize>().unwrap();
        let data_len = width * height * 2;
        let padded = data_len.div_ceil(BLOCK) * BLOCK;
        if reader.len() < padded {
            return records;
        }
        reader = &reader[padded..];
        records.push(FitsRecord { cards, data_len });
    }

    records
}

#[test]
fn cold_boot_reports_defaults_on_the_full_raster() {
    let mut harness = Harness::new(Some(pinned_star()));

    assert_eq!(harness.send("VIDEO ON"), ". VIDEO ON");
    harness.tick();

    assert_eq!(harness.send("FRAMERATE"), ". FRAMERATE 50.00");
    let tec = harness.send("TEC");
    assert!(tec.starts_with(". TEC -40.0"), "{tec}");

    let state = harness.state();
    assert_eq!((state.image_width, state.image_height), (640, 512));
    assert!(!state.in_guide_window());

    let records = harness.records();
    assert!(!records.is_empty());
    let first = &records[0];
    assert_eq!(first.int("NAXIS1"), 640);
    assert_eq!(first.int("NAXIS2"), 512);
    assert_eq!(first.value("ETYPE"), "ACQUIRE");
    assert_eq!(first.value("ORIGIN"), "CFHT");
    assert_abs_diff_eq!(first.real("PIXSCALE"), PIXSCALE, epsilon = 1e-9);
    assert!(first.is_undefined("GD_XOFF"));
    assert!(first.is_undefined("SMRAD_X"));
    assert!(first.is_undefined("FILENAME"));
    assert_eq!(first.data_len, 640 * 512 * 2);
}

#[test]
fn guide_engage_windows_down_and_measures_fwhm() {
    let mut harness = Harness::new(Some(pinned_star()));
    harness.send("VIDEO ON");
    harness.tick();

    assert_eq!(harness.send("GUIDE ON"), ". GUIDE ON");
    // The GUIDE ON tick already processed the first guide frame.
    let state = harness.state();
    assert_eq!((state.image_width, state.image_height), (32, 32));
    assert_eq!((state.win_x0, state.win_y0), (GUIDE_X0, GUIDE_Y0));
    assert!(state.first_done);
    assert_abs_diff_eq!(state.fwhm_x, 2.5, epsilon = 0.1);
    assert_abs_diff_eq!(state.fwhm_y, 2.5, epsilon = 0.1);

    // Subsequent frames run the centroid; the star sits on the null up to
    // the half-pixel origin convention.
    harness.tick();
    let state = harness.state();
    let expected_xoff = (GUIDE_X0 as f64 + 16.0 - NULL_X) * PIXSCALE;
    let expected_yoff = (GUIDE_Y0 as f64 + 16.0 - NULL_Y) * PIXSCALE;
    assert_abs_diff_eq!(state.guide_xoff, expected_xoff, epsilon = 0.01);
    assert_abs_diff_eq!(state.guide_yoff, expected_yoff, epsilon = 0.01);

    // Guide frames are 32x32 records carrying the offsets.
    let records = harness.records();
    let last = records.last().unwrap();
    assert_eq!(last.int("NAXIS1"), 32);
    assert_eq!(last.int("NAXIS2"), 32);
    assert_eq!(last.int("WIN_X0"), GUIDE_X0 as i64);
    assert_eq!(last.int("WIN_X1"), GUIDE_X0 as i64 + 31);
    assert!(!last.is_undefined("GD_XOFF"));
    assert_abs_diff_eq!(last.real("GD_XOFF"), expected_xoff, epsilon = 0.01);
}

#[test]
fn identical_frames_leave_the_offsets_unchanged() {
    let mut harness = Harness::new(Some(pinned_star()));
    harness.send("VIDEO ON");
    harness.send("GUIDE ON");
    harness.tick();
    let first = (harness.state().guide_xoff, harness.state().guide_yoff);
    harness.tick();
    harness.tick();
    let later = (harness.state().guide_xoff, harness.state().guide_yoff);
    assert_eq!(first, later);
}

#[test]
fn save_sequence_tags_exactly_n_frames() {
    let mut harness = Harness::new(Some(pinned_star()));
    harness.send("VIDEO ON");
    harness.send("GUIDE ON");

    let before = harness.records().len();
    assert_eq!(harness.send("SAVE 3 \"seq42\""), ". SAVE");
    // The SAVE tick itself emitted at least one tagged frame; pump until
    // four more frames are out.
    while harness.records().len() < before + 4 {
        harness.tick();
    }

    let records = harness.records();
    let tail = &records[before..];
    assert_eq!(tail[0].value("ETYPE"), "GUIDE");
    assert_eq!(tail[0].value("IMGINFO"), "seq42");
    assert_eq!(tail[0].int("SEQNUM"), 1);
    assert_eq!(tail[1].int("SEQNUM"), 2);
    assert_eq!(tail[2].int("SEQNUM"), 3);
    assert_eq!(tail[2].value("ETYPE"), "GUIDE");

    // Fourth frame: sequence over, back to ACQUIRE with a cleared comment.
    assert_eq!(tail[3].value("ETYPE"), "ACQUIRE");
    assert_eq!(tail[3].value("IMGINFO"), "");
    assert_eq!(tail[3].int("SEQNUM"), 0);
}

#[test]
fn null_update_recomputes_offsets_on_the_next_frame() {
    let mut harness = Harness::new(Some(pinned_star()));
    harness.send("VIDEO ON");
    harness.send("GUIDE ON");
    assert_eq!(harness.send("ISU ON"), ". ISU ON");
    harness.tick();

    let before = harness.state().guide_xoff;

    assert_eq!(harness.send("NULL 150 150"), ". NULL");
    harness.tick();

    let state = harness.state();
    let expected_xoff = (GUIDE_X0 as f64 + 16.0 - 150.0) * PIXSCALE;
    let expected_yoff = (GUIDE_Y0 as f64 + 16.0 - 150.0) * PIXSCALE;
    assert_abs_diff_eq!(state.guide_xoff, expected_xoff, epsilon = 0.01);
    assert_abs_diff_eq!(state.guide_yoff, expected_yoff, epsilon = 0.01);
    assert!((state.guide_xoff - before).abs() > 1.0);

    // Subsequent headers carry the new delta in the mechanism keywords.
    let records = harness.records();
    let last = records.last().unwrap();
    let (mx, my) = harness.isu.arcsec_to_mrad(expected_xoff, expected_yoff);
    let (dx, dy) = harness.isu.setup_to_true(mx, my);
    assert_abs_diff_eq!(last.real("SMRAD_X"), dx, epsilon = 1e-3);
    assert_abs_diff_eq!(last.real("SMRAD_Y"), dy, epsilon = 1e-3);
    assert!(!last.is_undefined("RMRAD_X"));

    // The slope worker saw corrections for the new null.
    let deadline = std::time::Instant::now() + Duration::from_secs(2);
    while harness.isu.slope_commands().is_empty() {
        assert!(
            std::time::Instant::now() < deadline,
            "no slope command reached the mechanism"
        );
        std::thread::sleep(Duration::from_millis(5));
    }
}

#[test]
fn invalid_framerate_is_rejected_without_a_camera_write() {
    let mut harness = Harness::new(Some(pinned_star()));
    assert_eq!(
        harness.send("FRAMERATE 200"),
        "! FRAMERATE \"Frame Rate Specified is Invalid\""
    );
    // The divider still holds the boot value.
    assert_eq!(harness.send("FRAMERATE"), ". FRAMERATE 50.00");
}

#[test]
fn isu_fault_on_the_first_guide_frame_is_fatal() {
    let mut harness = Harness::new(Some(pinned_star()));
    harness.send("VIDEO ON");
    harness.tick();
    harness.isu.inject_fault(true, false);

    let frames_before = harness.records().len();
    writeln!(harness.client.get_mut(), "GUIDE ON").unwrap();

    let mut fatal = None;
    for _ in 0..100 {
        match harness.frame_loop.tick() {
            Ok(true) => continue,
            Ok(false) => panic!("loop stopped without an error"),
            Err(e) => {
                fatal = Some(e);
                break;
            }
        }
    }

    match fatal {
        Some(GuiderError::IsuFault { x_fault, y_fault }) => {
            assert!(x_fault);
            assert!(!y_fault);
        }
        other => panic!("expected an ISU fault, got {other:?}"),
    }

    // The faulted frame was never emitted.
    assert_eq!(harness.records().len(), frames_before);
}

#[test]
fn shutdown_stops_the_loop_cleanly() {
    let mut harness = Harness::new(None);
    writeln!(harness.client.get_mut(), "SHUTDOWN").unwrap();

    let mut stopped = false;
    for _ in 0..100 {
        if !harness.frame_loop.tick().unwrap() {
            stopped = true;
            break;
        }
    }
    assert!(stopped);
    assert!(harness.state().serv_done);
}
