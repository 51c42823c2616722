//! STM8 bootloader frame codec.
//!
//! Pure byte-level encoding and decoding of the request/response frames
//! exchanged with the ROM bootloader. Nothing here performs I/O.
//!
//! ## Frame shapes
//!
//! ```text
//! Command:   +------+-------------+
//!            | code | code ^ 0xFF |
//!            +------+-------------+
//!
//! Address:   +----+----+----+----+-------------------+
//!            | a3 | a2 | a1 | a0 | a3 ^ a2 ^ a1 ^ a0 |   (big-endian)
//!            +----+----+----+----+-------------------+
//!
//! Payload:   +-----+----------------+--------------------------+
//!            | n-1 |  data (n B)    | (n-1) ^ data[0] ^ ...    |
//!            +-----+----------------+--------------------------+
//! ```
//!
//! Every multi-byte request ends with the XOR of the bytes before it. The
//! single SYNC byte carries no checksum.

use byteorder::{BigEndian, ByteOrder};

/// Positive acknowledgement.
pub const ACK: u8 = 0x79;

/// Negative acknowledgement.
pub const NACK: u8 = 0x1F;

/// Synchronization byte used for baud-rate detection.
pub const SYNC: u8 = 0x7F;

/// Length of the GET response, including leading and trailing ACK.
pub const GET_RESPONSE_LEN: usize = 9;

/// Bootloader commands and their wire codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Command {
    /// Query bootloader version and supported commands.
    Get = 0x00,
    /// Read up to 256 bytes of memory.
    Read = 0x11,
    /// Jump to an address.
    Go = 0x21,
    /// Write up to 128 bytes of memory.
    Write = 0x31,
    /// Erase flash or data EEPROM sectors.
    Erase = 0x43,
}

impl Command {
    /// Commands in the order the GET response echoes them.
    pub const GET_ORDER: [Self; 5] = [Self::Get, Self::Read, Self::Go, Self::Write, Self::Erase];

    /// One-byte wire code.
    pub fn code(self) -> u8 {
        self as u8
    }

    /// Complement byte sent after the code.
    pub fn complement(self) -> u8 {
        !(self as u8)
    }

    /// Human-readable command name used in error stages.
    pub fn name(self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Read => "READ",
            Self::Go => "GO",
            Self::Write => "WRITE",
            Self::Erase => "ERASE",
        }
    }
}

/// XOR of all bytes.
pub fn xor_checksum(bytes: &[u8]) -> u8 {
    bytes.iter().fold(0, |acc, b| acc ^ b)
}

/// Encode a command frame: `[code, code ^ 0xFF]`.
pub fn encode_command(cmd: Command) -> [u8; 2] {
    [cmd.code(), cmd.complement()]
}

/// Encode an address frame: four big-endian bytes followed by their XOR.
pub fn encode_address(addr: u32) -> [u8; 5] {
    let mut frame = [0u8; 5];
    BigEndian::write_u32(&mut frame[..4], addr);
    frame[4] = xor_checksum(&frame[..4]);
    frame
}

/// Encode a READ length request for `len` bytes (1..=256).
///
/// The bootloader expects `[n-1, (n-1) ^ 0xFF]`.
pub fn encode_read_length(len: usize) -> [u8; 2] {
    debug_assert!((1..=256).contains(&len));
    let n = (len - 1) as u8;
    [n, !n]
}

/// Encode a length-prefixed payload frame.
///
/// Produces `[length_minus_one, payload..., checksum]` where the checksum is
/// the XOR of the length byte and every payload byte.
pub fn encode_lengthed_payload(length_minus_one: u8, payload: &[u8]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(payload.len() + 2);
    frame.push(length_minus_one);
    frame.extend_from_slice(payload);
    frame.push(xor_checksum(&frame));
    frame
}

/// Encode the ERASE sector frame for a single sector: `[0x00, sector, sector]`.
pub fn encode_erase_sector(sector: u8) -> [u8; 3] {
    // checksum is 0x00 ^ sector
    [0x00, sector, sector]
}

/// Parsed GET response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GetResponse {
    /// Number of bytes that follow the count byte, as reported by the device.
    pub count: u8,
    /// Raw version byte (major in the high nibble, minor in the low nibble).
    pub version: u8,
    /// Command codes echoed by the device, in [`Command::GET_ORDER`].
    pub codes: [u8; 5],
}

/// Errors found while decoding a GET response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GetResponseError {
    /// Byte at `index` should have been ACK.
    MissingAck {
        /// Offset in the response.
        index: usize,
        /// Byte found there.
        actual: u8,
    },
    /// Echoed code for `command` differs from the known code.
    CodeMismatch {
        /// Command whose code was echoed wrongly.
        command: Command,
        /// Byte found in the response.
        actual: u8,
    },
}

impl GetResponse {
    /// Decode a 9-byte GET response.
    ///
    /// Layout: `[ACK, count, version, GET, READ, GO, WRITE, ERASE, ACK]`.
    pub fn parse(bytes: &[u8; GET_RESPONSE_LEN]) -> Result<Self, GetResponseError> {
        for index in [0, GET_RESPONSE_LEN - 1] {
            if bytes[index] != ACK {
                return Err(GetResponseError::MissingAck {
                    index,
                    actual: bytes[index],
                });
            }
        }

        let mut codes = [0u8; 5];
        codes.copy_from_slice(&bytes[3..8]);
        for (command, &actual) in Command::GET_ORDER.iter().zip(codes.iter()) {
            if command.code() != actual {
                return Err(GetResponseError::CodeMismatch {
                    command: *command,
                    actual,
                });
            }
        }

        Ok(Self {
            count: bytes[1],
            version: bytes[2],
            codes,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_frames() {
        assert_eq!(encode_command(Command::Get), [0x00, 0xFF]);
        assert_eq!(encode_command(Command::Read), [0x11, 0xEE]);
        assert_eq!(encode_command(Command::Go), [0x21, 0xDE]);
        assert_eq!(encode_command(Command::Write), [0x31, 0xCE]);
        assert_eq!(encode_command(Command::Erase), [0x43, 0xBC]);
    }

    #[test]
    fn test_address_frame() {
        assert_eq!(encode_address(0x0000_8000), [0x00, 0x00, 0x80, 0x00, 0x80]);
        assert_eq!(encode_address(0x0002_7FFF), [0x00, 0x02, 0x7F, 0xFF, 0x82]);
        assert_eq!(encode_address(0x1234_5678), [0x12, 0x34, 0x56, 0x78, 0x08]);
    }

    #[test]
    fn test_address_checksum_is_deterministic() {
        for addr in [0u32, 0x8000, 0x487E, 0x047FFF, 0xDEAD_BEEF, u32::MAX] {
            let frame = encode_address(addr);
            assert_eq!(xor_checksum(&frame), 0, "frame {frame:02X?}");
            assert_eq!(frame, encode_address(addr));
        }
    }

    #[test]
    fn test_read_length() {
        assert_eq!(encode_read_length(1), [0x00, 0xFF]);
        assert_eq!(encode_read_length(256), [0xFF, 0x00]);
        assert_eq!(encode_read_length(128), [0x7F, 0x80]);
    }

    #[test]
    fn test_lengthed_payload() {
        let frame = encode_lengthed_payload(1, &[0x55, 0xAA]);
        assert_eq!(frame, vec![0x01, 0x55, 0xAA, 0x01 ^ 0x55 ^ 0xAA]);
        assert_eq!(xor_checksum(&frame), 0);
    }

    #[test]
    fn test_erase_sector_frame() {
        assert_eq!(encode_erase_sector(1), [0x00, 0x01, 0x01]);
        assert_eq!(encode_erase_sector(0x7F), [0x00, 0x7F, 0x7F]);
    }

    #[test]
    fn test_parse_get_response() {
        let bytes = [ACK, 0x05, 0x13, 0x00, 0x11, 0x21, 0x31, 0x43, ACK];
        let resp = GetResponse::parse(&bytes).unwrap();
        assert_eq!(resp.count, 5);
        assert_eq!(resp.version, 0x13);
        assert_eq!(resp.codes, [0x00, 0x11, 0x21, 0x31, 0x43]);
    }

    #[test]
    fn test_parse_get_response_missing_trailing_ack() {
        let bytes = [ACK, 0x05, 0x13, 0x00, 0x11, 0x21, 0x31, 0x43, NACK];
        assert_eq!(
            GetResponse::parse(&bytes),
            Err(GetResponseError::MissingAck {
                index: 8,
                actual: NACK
            })
        );
    }

    #[test]
    fn test_parse_get_response_code_mismatch() {
        let bytes = [ACK, 0x05, 0x22, 0x00, 0x11, 0x21, 0x31, 0x44, ACK];
        assert_eq!(
            GetResponse::parse(&bytes),
            Err(GetResponseError::CodeMismatch {
                command: Command::Erase,
                actual: 0x44
            })
        );
    }
}
