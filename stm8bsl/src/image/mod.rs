//! Memory images loaded from and saved to firmware files.
//!
//! Three file formats are understood:
//!
//! | Extension                          | Format            |
//! |------------------------------------|-------------------|
//! | `.s19` `.s28` `.s37` `.srec` `.mot` | Motorola S-record |
//! | `.hex` `.ihx`                      | Intel HEX         |
//! | `.bin`                             | raw, at 0x8000    |
//!
//! Whatever the format, the result is one contiguous [`MemoryImage`] from
//! the lowest to the highest address in the file. Gaps read as 0xFF, the
//! value of erased flash.

pub mod ihex;
pub mod srec;

use std::fs;
use std::path::Path;

use log::debug;

use crate::error::{Error, Result};
use crate::target::FLASH_BASE;

/// Byte used for addresses not covered by any record.
pub const FILL_BYTE: u8 = 0xFF;

/// Largest span a single image may cover (16 MB).
const MAX_IMAGE_SPAN: u64 = 16 * 1024 * 1024;

/// Supported file formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageFormat {
    /// Motorola S-record.
    SRecord,
    /// Intel HEX.
    IntelHex,
    /// Raw binary, placed at the flash base.
    Binary,
}

impl ImageFormat {
    /// Pick the format from a file extension.
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        match ext.as_str() {
            "s19" | "s28" | "s37" | "srec" | "mot" => Some(Self::SRecord),
            "hex" | "ihx" => Some(Self::IntelHex),
            "bin" => Some(Self::Binary),
            _ => None,
        }
    }
}

/// A block of data found at one address in a hex file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    /// Address of the first byte.
    pub address: u32,
    /// Record payload.
    pub data: Vec<u8>,
}

/// Contiguous memory contents starting at `start`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryImage {
    /// Address of the first byte.
    pub start: u32,
    /// Image bytes.
    pub data: Vec<u8>,
}

impl MemoryImage {
    /// Create an image from raw bytes.
    pub fn new(start: u32, data: Vec<u8>) -> Self {
        Self { start, data }
    }

    /// Load an image, choosing the parser by file extension.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let format = ImageFormat::from_path(path).ok_or_else(|| {
            Error::InvalidImage(format!("unsupported file format: {}", path.display()))
        })?;
        let bytes = fs::read(path)?;
        let image = Self::from_bytes(&bytes, format)?;
        debug!(
            "Loaded {} ({} bytes at 0x{:06X})",
            path.display(),
            image.len(),
            image.start
        );
        Ok(image)
    }

    /// Parse file contents in the given format.
    pub fn from_bytes(bytes: &[u8], format: ImageFormat) -> Result<Self> {
        match format {
            ImageFormat::Binary => Ok(Self::new(FLASH_BASE, bytes.to_vec())),
            ImageFormat::SRecord => Self::from_segments(srec::parse(as_text(bytes)?)?),
            ImageFormat::IntelHex => Self::from_segments(ihex::parse(as_text(bytes)?)?),
        }
    }

    /// Merge segments into one image, filling gaps with [`FILL_BYTE`].
    ///
    /// Later segments overwrite earlier ones where they overlap.
    pub fn from_segments(segments: Vec<Segment>) -> Result<Self> {
        let segments: Vec<Segment> = segments.into_iter().filter(|s| !s.data.is_empty()).collect();
        let Some(start) = segments.iter().map(|s| s.address).min() else {
            return Err(Error::InvalidImage("file contains no data".to_string()));
        };
        let end = segments
            .iter()
            .map(|s| u64::from(s.address) + s.data.len() as u64)
            .max()
            .unwrap_or(u64::from(start));

        let span = end - u64::from(start);
        if span > MAX_IMAGE_SPAN {
            return Err(Error::InvalidImage(format!(
                "data spans {span} bytes from 0x{start:06X}"
            )));
        }

        let mut data = vec![FILL_BYTE; span as usize];
        for segment in &segments {
            let offset = (segment.address - start) as usize;
            data[offset..offset + segment.data.len()].copy_from_slice(&segment.data);
        }
        Ok(Self { start, data })
    }

    /// Number of bytes.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Whether the image holds no bytes.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Address one past the last byte.
    pub fn end(&self) -> u64 {
        u64::from(self.start) + self.data.len() as u64
    }

    /// Render as Intel HEX.
    pub fn to_ihex(&self) -> String {
        ihex::write(self)
    }

    /// Render as Motorola S-record.
    pub fn to_srec(&self) -> String {
        srec::write(self)
    }

    /// Save in the format matching the file extension (raw binary otherwise).
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        match ImageFormat::from_path(path) {
            Some(ImageFormat::SRecord) => fs::write(path, self.to_srec())?,
            Some(ImageFormat::IntelHex) => fs::write(path, self.to_ihex())?,
            Some(ImageFormat::Binary) | None => fs::write(path, &self.data)?,
        }
        Ok(())
    }
}

fn as_text(bytes: &[u8]) -> Result<&str> {
    std::str::from_utf8(bytes).map_err(|_| Error::InvalidImage("file is not text".to_string()))
}

/// Decode a string of hex digit pairs.
pub(crate) fn decode_hex(digits: &str, line: usize) -> Result<Vec<u8>> {
    if digits.len() % 2 != 0 {
        return Err(Error::InvalidImage(format!(
            "line {line}: odd number of hex digits"
        )));
    }
    (0..digits.len())
        .step_by(2)
        .map(|i| {
            digits
                .get(i..i + 2)
                .filter(|pair| pair.bytes().all(|b| b.is_ascii_hexdigit()))
                .and_then(|pair| u8::from_str_radix(pair, 16).ok())
                .ok_or_else(|| Error::InvalidImage(format!("line {line}: invalid hex digits")))
        })
        .collect()
}
