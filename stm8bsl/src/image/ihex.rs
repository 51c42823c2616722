//! Intel HEX reader and writer.
//!
//! ```text
//! : | count | address (2 B) | type | data ... | checksum
//! ```
//!
//! The checksum is the two's complement of the low byte of the sum of all
//! preceding record bytes.

use std::fmt::Write as _;

use crate::error::{Error, Result};
use crate::image::{MemoryImage, Segment, decode_hex};

const BYTES_PER_RECORD: usize = 16;

const DATA: u8 = 0x00;
const END_OF_FILE: u8 = 0x01;
const EXTENDED_SEGMENT_ADDRESS: u8 = 0x02;
const START_SEGMENT_ADDRESS: u8 = 0x03;
const EXTENDED_LINEAR_ADDRESS: u8 = 0x04;
const START_LINEAR_ADDRESS: u8 = 0x05;

/// Parse Intel HEX text into data segments.
///
/// Parsing stops at the end-of-file record.
pub fn parse(text: &str) -> Result<Vec<Segment>> {
    let mut segments = Vec::new();
    let mut base: u32 = 0;

    for (index, raw) in text.lines().enumerate() {
        let line = index + 1;
        let record = raw.trim();
        if record.is_empty() {
            continue;
        }

        let invalid = |msg: &str| Error::InvalidImage(format!("line {line}: {msg}"));
        let digits = record
            .strip_prefix(':')
            .ok_or_else(|| invalid("missing ':' record mark"))?;
        let bytes = decode_hex(digits, line)?;
        if bytes.len() < 5 {
            return Err(invalid("record too short"));
        }

        let count = usize::from(bytes[0]);
        if bytes.len() != count + 5 {
            return Err(invalid("byte count does not match record length"));
        }
        if bytes.iter().fold(0u8, |acc, &b| acc.wrapping_add(b)) != 0 {
            return Err(invalid("checksum mismatch"));
        }

        let offset = u32::from(u16::from_be_bytes([bytes[1], bytes[2]]));
        let data = &bytes[4..4 + count];
        match bytes[3] {
            DATA => segments.push(Segment {
                address: base.wrapping_add(offset),
                data: data.to_vec(),
            }),
            END_OF_FILE => break,
            EXTENDED_SEGMENT_ADDRESS => {
                base = u32::from(upper_word(data).ok_or_else(|| invalid("bad segment record"))?)
                    << 4;
            },
            EXTENDED_LINEAR_ADDRESS => {
                base = u32::from(upper_word(data).ok_or_else(|| invalid("bad linear record"))?)
                    << 16;
            },
            START_SEGMENT_ADDRESS | START_LINEAR_ADDRESS => {},
            other => return Err(invalid(&format!("unsupported record type {other:02X}"))),
        }
    }

    Ok(segments)
}

fn upper_word(data: &[u8]) -> Option<u16> {
    match data {
        [hi, lo] => Some(u16::from_be_bytes([*hi, *lo])),
        _ => None,
    }
}

/// Render an image as Intel HEX.
///
/// Records never cross a 64 KB boundary; an extended linear address record
/// precedes data above 0xFFFF.
pub fn write(image: &MemoryImage) -> String {
    let mut out = String::new();
    let mut upper: u16 = 0;
    let mut offset = 0;

    while offset < image.data.len() {
        let address = image.start + offset as u32;
        let high = (address >> 16) as u16;
        if high != upper {
            push_record(&mut out, EXTENDED_LINEAR_ADDRESS, 0, &high.to_be_bytes());
            upper = high;
        }

        let to_boundary = 0x1_0000 - (address & 0xFFFF) as usize;
        let len = BYTES_PER_RECORD
            .min(to_boundary)
            .min(image.data.len() - offset);
        push_record(
            &mut out,
            DATA,
            (address & 0xFFFF) as u16,
            &image.data[offset..offset + len],
        );
        offset += len;
    }

    push_record(&mut out, END_OF_FILE, 0, &[]);
    out
}

fn push_record(out: &mut String, kind: u8, address: u16, data: &[u8]) {
    let mut record = vec![data.len() as u8];
    record.extend_from_slice(&address.to_be_bytes());
    record.push(kind);
    record.extend_from_slice(data);
    let sum = record.iter().fold(0u8, |acc, &b| acc.wrapping_add(b));
    record.push(sum.wrapping_neg());

    out.push(':');
    for byte in &record {
        let _ = write!(out, "{byte:02X}");
    }
    out.push('\n');
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_data_records() {
        let text = ":10010000214601360121470136007EFE09D2190140\n\
                    :100110002146017E17C20001FF5F16002148011928\n\
                    :00000001FF\n";
        let segments = parse(text).unwrap();
        assert_eq!(segments.len(), 2);
        assert_eq!(segments[0].address, 0x0100);
        assert_eq!(segments[1].address, 0x0110);
        assert_eq!(segments[0].data[0], 0x21);
        assert_eq!(segments[1].data.len(), 16);
    }

    #[test]
    fn test_extended_linear_address() {
        let text = ":020000040002F8\n:0280000001027B\n:00000001FF\n";
        let segments = parse(text).unwrap();
        assert_eq!(segments[0].address, 0x0002_8000);
        assert_eq!(segments[0].data, vec![0x01, 0x02]);
    }

    #[test]
    fn test_extended_segment_address() {
        let text = ":020000021000EC\n:0100000055AA\n:00000001FF\n";
        let segments = parse(text).unwrap();
        assert_eq!(segments[0].address, 0x0001_0000);
    }

    #[test]
    fn test_data_after_eof_is_ignored() {
        let text = ":00000001FF\n:0100000055AA\n";
        assert!(parse(text).unwrap().is_empty());
    }

    #[test]
    fn test_bad_checksum_names_line() {
        let text = ":00000001FF\n";
        assert!(parse(text).is_ok());
        let err = parse(":0100000055AB\n").unwrap_err();
        assert!(err.to_string().contains("line 1"));
        assert!(err.to_string().contains("checksum"));
    }

    #[test]
    fn test_start_address_records_ignored() {
        let text = ":040000050000800077\n:0100000055AA\n:00000001FF\n";
        let segments = parse(text).unwrap();
        assert_eq!(segments.len(), 1);
    }

    #[test]
    fn test_write_splits_at_64k_boundary() {
        let image = MemoryImage::new(0xFFF8, (0..16).collect());
        let text = write(&image);
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], ":08FFF8000001020304050607E5");
        assert_eq!(lines[1], ":020000040001F9");
        assert!(lines[2].starts_with(":08000000"));
        assert_eq!(*lines.last().unwrap(), ":00000001FF");

        let back = MemoryImage::from_segments(parse(&text).unwrap()).unwrap();
        assert_eq!(back, image);
    }
}
