//! Motorola S-record reader and writer.
//!
//! ```text
//! S | type | count | address (2/3/4 B) | data ... | checksum
//! ```
//!
//! `count` covers address, data and checksum. The checksum is the one's
//! complement of the low byte of the sum of count, address and data.

use std::fmt::Write as _;

use crate::error::{Error, Result};
use crate::image::{MemoryImage, Segment, decode_hex};

const BYTES_PER_RECORD: usize = 32;

/// Parse S-record text into data segments.
///
/// Header (S0), count (S5/S6) and start address (S7/S8/S9) records are
/// checked but carry no data.
pub fn parse(text: &str) -> Result<Vec<Segment>> {
    let mut segments = Vec::new();

    for (index, raw) in text.lines().enumerate() {
        let line = index + 1;
        let record = raw.trim();
        if record.is_empty() {
            continue;
        }

        let invalid = |msg: &str| Error::InvalidImage(format!("line {line}: {msg}"));
        let body = record
            .strip_prefix('S')
            .or_else(|| record.strip_prefix('s'))
            .ok_or_else(|| invalid("missing 'S' record mark"))?;
        let kind = body
            .chars()
            .next()
            .ok_or_else(|| invalid("missing record type"))?;
        let bytes = decode_hex(&body[kind.len_utf8()..], line)?;

        let (&count, rest) = bytes
            .split_first()
            .ok_or_else(|| invalid("record too short"))?;
        if rest.len() != usize::from(count) {
            return Err(invalid("byte count does not match record length"));
        }
        let (&checksum, payload) = rest
            .split_last()
            .ok_or_else(|| invalid("record too short"))?;
        if checksum != record_checksum(count, payload) {
            return Err(invalid("checksum mismatch"));
        }

        let addr_len = match kind {
            '0' | '5' | '6' | '7' | '8' | '9' => continue,
            '1' => 2,
            '2' => 3,
            '3' => 4,
            other => return Err(invalid(&format!("unsupported record type S{other}"))),
        };
        if payload.len() < addr_len {
            return Err(invalid("record too short for its address"));
        }

        let (addr_bytes, data) = payload.split_at(addr_len);
        let address = addr_bytes
            .iter()
            .fold(0u32, |acc, &b| (acc << 8) | u32::from(b));
        segments.push(Segment {
            address,
            data: data.to_vec(),
        });
    }

    Ok(segments)
}

/// Render an image as S-records, using the shortest address width that fits.
pub fn write(image: &MemoryImage) -> String {
    let (data_kind, end_kind, addr_len) = match image.end() {
        end if end <= 0x1_0000 => ('1', '9', 2),
        end if end <= 0x100_0000 => ('2', '8', 3),
        _ => ('3', '7', 4),
    };

    let mut out = String::new();
    push_record(&mut out, '0', 0, 2, b"HDR");
    for (i, chunk) in image.data.chunks(BYTES_PER_RECORD).enumerate() {
        let address = image.start + (i * BYTES_PER_RECORD) as u32;
        push_record(&mut out, data_kind, address, addr_len, chunk);
    }
    push_record(&mut out, end_kind, 0, addr_len, &[]);
    out
}

fn push_record(out: &mut String, kind: char, address: u32, addr_len: usize, data: &[u8]) {
    let mut payload = address.to_be_bytes()[4 - addr_len..].to_vec();
    payload.extend_from_slice(data);
    let count = (payload.len() + 1) as u8;

    let _ = write!(out, "S{kind}{count:02X}");
    for byte in &payload {
        let _ = write!(out, "{byte:02X}");
    }
    let _ = writeln!(out, "{:02X}", record_checksum(count, &payload));
}

fn record_checksum(count: u8, payload: &[u8]) -> u8 {
    !payload.iter().fold(count, |acc, &b| acc.wrapping_add(b))
}
