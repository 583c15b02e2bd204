//! Per-frame FITS header contract.
//!
//! Every emitted record carries the full keyword set; keywords whose source
//! is inactive (guide offsets outside a guide session, mechanism angles with
//! the ISU off, exposure tags outside an exposure) are written as undefined
//! cards so downstream readers see a stable header. While a save sequence
//! is armed the frames are typed GUIDE and numbered 1..n; outside one they
//! are ACQUIRE with a zero sequence number.

use chrono::{DateTime, FixedOffset, Utc};

use shared::fits::FitsHeader;
use shared::raster::{GUIDE_SIZE, PIXSCALE};

use crate::state::ServerState;

/// Hawaii Standard Time is UTC-10 year round.
const HST_OFFSET_SECONDS: i32 = -10 * 3600;

/// Exposure type while a save sequence is armed.
pub const ETYPE_GUIDE: &str = "GUIDE";

/// Exposure type outside a save sequence.
pub const ETYPE_ACQUIRE: &str = "ACQUIRE";

/// Build the header for the frame being emitted, advancing the save
/// sequence counter when one is armed.
pub fn build_frame_header(state: &mut ServerState, now: DateTime<Utc>) -> FitsHeader {
    let mut hu = FitsHeader::primary_u16(state.image_width, state.image_height);

    hu.set_str(
        "DATE",
        &now.format("%Y-%m-%dT%H:%M:%S").to_string(),
        "UTC Date of file creation",
    );
    let hst_zone = FixedOffset::east_opt(HST_OFFSET_SECONDS).expect("HST offset is in range");
    let hst = now.with_timezone(&hst_zone);
    hu.set_str(
        "HSTTIME",
        &hst.format("%a %b %d %H:%M:%S HST %Y").to_string(),
        "Local time in Hawaii",
    );
    let unixtime = now.timestamp() as f64 + now.timestamp_subsec_micros() as f64 / 1e6;
    hu.set_real(
        "UNIXTIME",
        unixtime,
        6,
        "Fractional UNIX timestamp when image was taken",
    );
    hu.set_str("ORIGIN", "CFHT", "Canada-France-Hawaii Telescope");
    hu.set_real("BZERO", 32768.0, 1, "Zero factor");
    hu.set_real("BSCALE", 1.0, 1, "Scale factor");
    hu.set_real("ETIME", state.exposure_time, 6, "Integration time (ms)");

    if state.save_active() {
        state.frame_sequence += 1;
        hu.set_str("ETYPE", ETYPE_GUIDE, "Exposure type");
    } else {
        hu.set_str("ETYPE", ETYPE_ACQUIRE, "Exposure type");
    }
    hu.set_str("IMGINFO", &state.fits_comment, "Sequence details");
    hu.set_real("FRMRATE", state.frame_rate, 4, "Requested frame rate (Hz)");
    hu.set_real("TEMP", state.tec_setpoint, 6, "TEC cooler setpoint (C)");
    hu.set_int(
        "SEQNUM",
        state.frame_sequence as i64,
        "Frame sequence number",
    );
    hu.set_real("PIXSCALE", PIXSCALE, 5, "Pixel scale (arcseconds / pixel)");

    hu.set_int(
        "WIN_X0",
        state.win_x0 as i64,
        "X0 coordinate for the camera raster",
    );
    hu.set_int(
        "WIN_Y0",
        state.win_y0 as i64,
        "Y0 coordinate for the camera raster",
    );
    hu.set_int(
        "WIN_X1",
        (state.win_x0 + state.image_width - 1) as i64,
        "X1 coordinate for the camera raster",
    );
    hu.set_int(
        "WIN_Y1",
        (state.win_y0 + state.image_height - 1) as i64,
        "Y1 coordinate for the camera raster",
    );
    hu.set_int(
        "GUIDE_X0",
        state.guide_x0 as i64,
        "X0 coordinate for the guide raster",
    );
    hu.set_int(
        "GUIDE_Y0",
        state.guide_y0 as i64,
        "Y0 coordinate for the guide raster",
    );
    hu.set_int(
        "GUIDE_X1",
        (state.guide_x0 + GUIDE_SIZE - 1) as i64,
        "X1 coordinate for the guide raster",
    );
    hu.set_int(
        "GUIDE_Y1",
        (state.guide_y0 + GUIDE_SIZE - 1) as i64,
        "Y1 coordinate for the guide raster",
    );
    hu.set_real(
        "NULLX",
        state.null_x,
        5,
        "Null position (center of aperture hole in X",
    );
    hu.set_real(
        "NULLY",
        state.null_y,
        5,
        "Null position (center of aperture hole in Y",
    );

    let guide_offsets = state
        .guide_on
        .then_some((state.guide_xoff, state.guide_yoff));
    hu.set_opt_real(
        "GD_XOFF",
        guide_offsets.map(|o| o.0),
        5,
        "Guide star offset in X",
    );
    hu.set_opt_real(
        "GD_YOFF",
        guide_offsets.map(|o| o.1),
        5,
        "Guide star offset in Y",
    );

    let isu = state.isu_on.then_some(());
    hu.set_opt_real(
        "SMRAD_X",
        isu.map(|_| state.isu_mrad_delta_setup.0),
        5,
        "delta X position sent to the ISU in mrad",
    );
    hu.set_opt_real(
        "SMRAD_Y",
        isu.map(|_| state.isu_mrad_delta_setup.1),
        5,
        "delta Y position sent to the ISU in mrad",
    );
    hu.set_opt_real(
        "RMRAD_X",
        isu.map(|_| state.isu_mrad_status.0),
        5,
        "X position read from the ISU in mrad",
    );
    hu.set_opt_real(
        "RMRAD_Y",
        isu.map(|_| state.isu_mrad_status.1),
        5,
        "Y position read from the ISU in mrad",
    );

    if state.exp_on {
        hu.set_opt_str("FILENAME", state.filename.as_deref(), "Observation file name");
        hu.set_opt_str("RA", state.ra.as_deref(), "Telescope right ascension");
        hu.set_opt_str("DEC", state.dec.as_deref(), "Telescope declination");
        hu.set_opt_real("EQUINOX", state.equinox, 5, "Equinox");
        hu.set_opt_real("OBJMAG", state.objmag, 5, "Object magnitude");
    } else {
        hu.set_undefined("FILENAME", "Observation file name");
        hu.set_undefined("RA", "Telescope right ascension");
        hu.set_undefined("DEC", "Telescope declination");
        hu.set_undefined("EQUINOX", "Equinox");
        hu.set_undefined("OBJMAG", "Object magnitude");
    }

    hu
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::fits::CARD_SIZE;
    use shared::guide_config::GuideConfig;

    fn state() -> ServerState {
        ServerState::new(&GuideConfig {
            guide_x0: 100,
            guide_y0: 200,
            null_x: 115.5,
            null_y: 215.5,
        })
    }

    fn render(state: &mut ServerState) -> Vec<String> {
        let now = DateTime::parse_from_rfc3339("2017-05-25T10:30:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let header = build_frame_header(state, now);
        let mut buffer = Vec::new();
        header.write_to(&mut buffer).unwrap();
        buffer
            .chunks(CARD_SIZE)
            .map(|c| String::from_utf8_lossy(c).into_owned())
            .collect()
    }

    fn card<'a>(cards: &'a [String], keyword: &str) -> &'a str {
        cards
            .iter()
            .find(|c| c.starts_with(&format!("{keyword:<8}=")))
            .unwrap_or_else(|| panic!("missing card {keyword}"))
    }

    #[test]
    fn acquire_frame_has_the_full_keyword_set() {
        let mut state = state();
        let cards = render(&mut state);

        assert!(card(&cards, "ETYPE").contains("ACQUIRE"));
        assert!(card(&cards, "SEQNUM").contains(" 0 /"));
        assert!(card(&cards, "ORIGIN").contains("CFHT"));
        assert!(card(&cards, "PIXSCALE").contains("0.12800"));
        assert!(card(&cards, "NAXIS1").contains("640"));
        assert!(card(&cards, "NAXIS2").contains("512"));
        assert!(card(&cards, "WIN_X1").contains("639"));
        assert!(card(&cards, "GUIDE_X0").contains("100"));
        assert!(card(&cards, "GUIDE_X1").contains("131"));
        assert!(card(&cards, "NULLX").contains("115.50000"));
        // Undefined sentinels: value field blank.
        assert_eq!(card(&cards, "GD_XOFF")[10..30].trim(), "");
        assert_eq!(card(&cards, "SMRAD_X")[10..30].trim(), "");
        assert_eq!(card(&cards, "FILENAME")[10..30].trim(), "");
    }

    #[test]
    fn hst_time_is_ten_hours_behind_utc() {
        let mut state = state();
        let cards = render(&mut state);
        // 10:30 UTC is 00:30 HST the same calendar day.
        assert!(card(&cards, "DATE").contains("2017-05-25T10:30:00"));
        assert!(card(&cards, "HSTTIME").contains("00:30:00 HST 2017"));
    }

    #[test]
    fn guide_frames_in_a_save_sequence_are_numbered() {
        let mut state = state();
        state.arm_save(3, "seq42");

        for expected in 1..=3 {
            let cards = render(&mut state);
            assert!(card(&cards, "ETYPE").contains("GUIDE"));
            assert!(card(&cards, "IMGINFO").contains("seq42"));
            assert!(card(&cards, "SEQNUM").contains(&format!(" {expected} /")));
            state.finish_save_frame();
        }

        // Sequence exhausted: back to ACQUIRE with the counter reset.
        let cards = render(&mut state);
        assert!(card(&cards, "ETYPE").contains("ACQUIRE"));
        assert!(card(&cards, "SEQNUM").contains(" 0 /"));
        assert_eq!(card(&cards, "IMGINFO")[10..13], *"'  ");
    }

    #[test]
    fn guiding_and_isu_fill_their_keywords() {
        let mut state = state();
        state.guide_on = true;
        state.isu_on = true;
        state.guide_xoff = 0.256;
        state.guide_yoff = -0.128;
        state.isu_mrad_delta_setup = (0.01, -0.02);
        state.isu_mrad_status = (0.5, 0.25);

        let cards = render(&mut state);
        assert!(card(&cards, "GD_XOFF").contains("0.25600"));
        assert!(card(&cards, "GD_YOFF").contains("-0.12800"));
        assert!(card(&cards, "SMRAD_X").contains("0.01000"));
        assert!(card(&cards, "RMRAD_Y").contains("0.25000"));
    }

    #[test]
    fn exposure_tags_appear_only_with_an_exposure() {
        let mut state = state();
        state.exp_on = true;
        state.filename = Some("2083948o".into());
        state.ra = Some("12:34:56.7".into());
        state.dec = None;
        state.equinox = Some(2000.0);

        let cards = render(&mut state);
        assert!(card(&cards, "FILENAME").contains("2083948o"));
        assert!(card(&cards, "RA").contains("12:34:56.7"));
        assert_eq!(card(&cards, "DEC")[10..30].trim(), "");
        assert!(card(&cards, "EQUINOX").contains("2000.00000"));
        assert_eq!(card(&cards, "OBJMAG")[10..30].trim(), "");
    }
}
