//! Streaming FITS record serialization.
//!
//! Every acquired frame goes down the output pipe as a self-contained FITS
//! record: a header of 80-character keyword cards padded to the 2880-byte
//! block size, then the pixel payload as 16-bit big-endian words with
//! `BZERO = 32768, BSCALE = 1` (offset binary), zero-padded to a block
//! multiple. Keywords that are conditionally absent (guide offsets outside a
//! guide session, mechanism angles with the ISU off, exposure tags outside
//! an exposure) are written as undefined-value cards so the keyword set is
//! stable for downstream readers.

use std::io::{self, Write};

use ndarray::ArrayView2;

/// FITS block size, bytes.
pub const BLOCK_SIZE: usize = 2880;

/// FITS card size, bytes.
pub const CARD_SIZE: usize = 80;

/// Offset applied to pixel values (unsigned data in signed storage).
pub const BZERO: f64 = 32768.0;

#[derive(Debug, Clone, PartialEq)]
pub enum CardValue {
    Logical(bool),
    Integer(i64),
    /// Fixed-point real with the given number of decimals.
    Real(f64, usize),
    Text(String),
    /// Keyword present, value undefined.
    Undefined,
}

#[derive(Debug, Clone)]
struct Card {
    keyword: String,
    value: CardValue,
    comment: String,
}

/// Ordered FITS header under construction.
#[derive(Debug, Clone, Default)]
pub struct FitsHeader {
    cards: Vec<Card>,
}

impl FitsHeader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mandatory leading cards for a 16-bit 2-D primary HDU.
    pub fn primary_u16(width: usize, height: usize) -> Self {
        let mut header = Self::new();
        header.set_logical("SIMPLE", true, "Standard FITS");
        header.set_int("BITPIX", 16, "16-bit data");
        header.set_int("NAXIS", 2, "Number of axes");
        header.set_int("NAXIS1", width as i64, "Number of pixel columns");
        header.set_int("NAXIS2", height as i64, "Number of pixel rows");
        header.set_int("PCOUNT", 0, "No 'random' parameters");
        header.set_int("GCOUNT", 1, "Only one group");
        header
    }

    pub fn set_logical(&mut self, keyword: &str, value: bool, comment: &str) {
        self.push(keyword, CardValue::Logical(value), comment);
    }

    pub fn set_int(&mut self, keyword: &str, value: i64, comment: &str) {
        self.push(keyword, CardValue::Integer(value), comment);
    }

    pub fn set_real(&mut self, keyword: &str, value: f64, decimals: usize, comment: &str) {
        self.push(keyword, CardValue::Real(value, decimals), comment);
    }

    pub fn set_str(&mut self, keyword: &str, value: &str, comment: &str) {
        self.push(keyword, CardValue::Text(value.to_string()), comment);
    }

    pub fn set_undefined(&mut self, keyword: &str, comment: &str) {
        self.push(keyword, CardValue::Undefined, comment);
    }

    /// Real-valued card that may be undefined.
    pub fn set_opt_real(&mut self, keyword: &str, value: Option<f64>, decimals: usize, comment: &str) {
        match value {
            Some(v) => self.set_real(keyword, v, decimals, comment),
            None => self.set_undefined(keyword, comment),
        }
    }

    /// String-valued card that may be undefined.
    pub fn set_opt_str(&mut self, keyword: &str, value: Option<&str>, comment: &str) {
        match value {
            Some(v) => self.set_str(keyword, v, comment),
            None => self.set_undefined(keyword, comment),
        }
    }

    fn push(&mut self, keyword: &str, value: CardValue, comment: &str) {
        self.cards.push(Card {
            keyword: keyword.to_uppercase(),
            value,
            comment: comment.to_string(),
        });
    }

    /// Serialize the header including END, padded with blanks to a block
    /// boundary. Returns the number of bytes written.
    pub fn write_to<W: Write>(&self, writer: &mut W) -> io::Result<usize> {
        let mut buffer = Vec::with_capacity(BLOCK_SIZE);
        for card in &self.cards {
            buffer.extend_from_slice(&format_card(card));
        }

        let mut end = [b' '; CARD_SIZE];
        end[..3].copy_from_slice(b"END");
        buffer.extend_from_slice(&end);

        let padding = buffer.len().next_multiple_of(BLOCK_SIZE) - buffer.len();
        buffer.extend(std::iter::repeat(b' ').take(padding));

        writer.write_all(&buffer)?;
        Ok(buffer.len())
    }
}

/// Render one 80-byte card. Fixed-format: value right-justified ending at
/// column 30 for numbers and logicals, strings quoted from column 11.
fn format_card(card: &Card) -> [u8; CARD_SIZE] {
    let value_field = match &card.value {
        CardValue::Logical(true) => format!("{:>20}", "T"),
        CardValue::Logical(false) => format!("{:>20}", "F"),
        CardValue::Integer(v) => format!("{v:>20}"),
        CardValue::Real(v, decimals) => {
            let decimals = *decimals;
            format!("{v:>20.decimals$}")
        }
        CardValue::Text(v) => {
            // Escape embedded quotes; pad the closing quote to column 20.
            let escaped = v.replace('\'', "''");
            format!("'{:<8}'", escaped)
        }
        CardValue::Undefined => format!("{:20}", ""),
    };

    let text = format!(
        "{:<8}= {} / {}",
        truncate(&card.keyword, 8),
        value_field,
        card.comment
    );

    // Copy bytewise: FITS cards are ASCII and anything past 80 bytes is cut.
    let mut bytes = [b' '; CARD_SIZE];
    for (slot, byte) in bytes.iter_mut().zip(text.bytes()) {
        *slot = byte;
    }
    bytes
}

fn truncate(text: &str, max: usize) -> &str {
    &text[..text.len().min(max)]
}

/// Write the pixel payload: offset-binary big-endian 16-bit words followed
/// by zero padding to the block size. Returns the number of bytes written.
pub fn write_image_u16<W: Write>(writer: &mut W, image: &ArrayView2<u16>) -> io::Result<usize> {
    let mut buffer = Vec::with_capacity(image.len() * 2);
    for &value in image.iter() {
        let stored = (value as i32 - BZERO as i32) as i16;
        buffer.extend_from_slice(&stored.to_be_bytes());
    }

    let padding = buffer.len().next_multiple_of(BLOCK_SIZE) - buffer.len();
    buffer.extend(std::iter::repeat(0u8).take(padding));

    writer.write_all(&buffer)?;
    Ok(buffer.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array2;

    fn card_at(bytes: &[u8], index: usize) -> String {
        String::from_utf8_lossy(&bytes[index * CARD_SIZE..(index + 1) * CARD_SIZE]).into_owned()
    }

    #[test]
    fn header_is_block_aligned_and_starts_with_simple() {
        let mut buffer = Vec::new();
        let header = FitsHeader::primary_u16(32, 32);
        let written = header.write_to(&mut buffer).unwrap();
        assert_eq!(written, BLOCK_SIZE);
        assert_eq!(buffer.len() % BLOCK_SIZE, 0);

        let first = card_at(&buffer, 0);
        assert!(first.starts_with("SIMPLE  ="));
        assert_eq!(first.as_bytes()[29], b'T');

        let second = card_at(&buffer, 1);
        assert!(second.starts_with("BITPIX  ="));
        assert!(second.contains("16"));
    }

    #[test]
    fn end_card_terminates_the_header() {
        let mut buffer = Vec::new();
        FitsHeader::primary_u16(640, 512).write_to(&mut buffer).unwrap();
        let cards: Vec<String> = (0..buffer.len() / CARD_SIZE)
            .map(|i| card_at(&buffer, i))
            .collect();
        assert!(cards.iter().any(|c| c.starts_with("END ")));
    }

    #[test]
    fn numeric_values_end_at_column_30() {
        let mut header = FitsHeader::new();
        header.set_int("SEQNUM", 42, "Frame sequence number");
        header.set_real("PIXSCALE", 0.128, 5, "Pixel scale (arcseconds / pixel)");
        let mut buffer = Vec::new();
        header.write_to(&mut buffer).unwrap();

        let seqnum = card_at(&buffer, 0);
        assert_eq!(&seqnum[8..10], "= ");
        assert_eq!(seqnum.as_bytes()[29], b'2');
        let pixscale = card_at(&buffer, 1);
        assert!(pixscale.contains("0.12800"));
    }

    #[test]
    fn string_and_undefined_cards_render() {
        let mut header = FitsHeader::new();
        header.set_str("ETYPE", "ACQUIRE", "Exposure type");
        header.set_undefined("GD_XOFF", "Guide star offset in X");
        header.set_str("ORIGIN", "CFHT", "Canada-France-Hawaii Telescope");
        let mut buffer = Vec::new();
        header.write_to(&mut buffer).unwrap();

        let etype = card_at(&buffer, 0);
        assert!(etype.starts_with("ETYPE   = 'ACQUIRE "));
        let undefined = card_at(&buffer, 1);
        assert!(undefined.starts_with("GD_XOFF ="));
        assert_eq!(undefined[10..30].trim(), "");
        assert!(undefined.contains("/ Guide star offset in X"));
        // Short strings are padded to the minimum quoted width.
        let origin = card_at(&buffer, 2);
        assert!(origin.starts_with("ORIGIN  = 'CFHT    '"));
    }

    #[test]
    fn payload_is_offset_binary_big_endian_and_padded() {
        let image = Array2::from_shape_fn((4, 4), |(row, col)| (row * 4 + col) as u16 * 1000);
        let mut buffer = Vec::new();
        let written = write_image_u16(&mut buffer, &image.view()).unwrap();
        assert_eq!(written, BLOCK_SIZE);
        assert_eq!(buffer.len() % BLOCK_SIZE, 0);

        // First pixel 0 stores as -32768, big endian 0x8000.
        assert_eq!(&buffer[0..2], &[0x80, 0x00]);
        // Pixel value 1000 stores as 1000 - 32768 = -31768 = 0x83E8.
        assert_eq!(&buffer[2..4], &[0x83, 0xe8]);
        // Padding beyond the 32 data bytes is zero.
        assert!(buffer[32..].iter().all(|&b| b == 0));
    }

    #[test]
    fn payload_round_trips_through_the_offset() {
        let image = Array2::from_shape_fn((2, 3), |(row, col)| (row * 3 + col) as u16 * 13007);
        let mut buffer = Vec::new();
        write_image_u16(&mut buffer, &image.view()).unwrap();

        for (k, &expected) in image.iter().enumerate() {
            let stored = i16::from_be_bytes([buffer[2 * k], buffer[2 * k + 1]]);
            let recovered = (stored as i32 + BZERO as i32) as u16;
            assert_eq!(recovered, expected);
        }
    }
}
