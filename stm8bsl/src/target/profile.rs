//! Device profile: flash size and bootloader version.
//!
//! The ROM bootloader does not report its flash size, so the resolver reads
//! the last byte of each candidate flash size, largest first. The first
//! address the device accepts fixes the size. The version comes from GET.

use std::fmt;

use log::{debug, info};

use crate::error::{Error, Result};

/// First address of program flash.
pub const FLASH_BASE: u32 = 0x8000;

/// Erase unit size in bytes.
pub const SECTOR_SIZE: u32 = 1024;

/// Flash sizes the resolver can tell apart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub enum FlashSize {
    /// 8 KB (STM8S003, STM8S103, ...).
    Kb8,
    /// 32 KB (STM8S105, STM8AF626x, ...).
    Kb32,
    /// 128 KB (STM8S208, STM8AF52xx, ...).
    Kb128,
    /// 256 KB (STM8AF62Ax, ...).
    Kb256,
}

impl FlashSize {
    /// Candidates in probe order.
    pub const PROBE_ORDER: [Self; 4] = [Self::Kb256, Self::Kb128, Self::Kb32, Self::Kb8];

    /// Size in kilobytes.
    pub fn kb(self) -> u32 {
        match self {
            Self::Kb8 => 8,
            Self::Kb32 => 32,
            Self::Kb128 => 128,
            Self::Kb256 => 256,
        }
    }

    /// Size in bytes.
    pub fn bytes(self) -> u32 {
        self.kb() * 1024
    }

    /// Last flash address of a device with this size.
    pub fn probe_address(self) -> u32 {
        self.flash_end() - 1
    }

    /// One past the last flash address.
    pub fn flash_end(self) -> u32 {
        FLASH_BASE + self.bytes()
    }

    /// Number of 1 KB erase sectors.
    pub fn sector_count(self) -> u32 {
        self.bytes() / SECTOR_SIZE
    }
}

impl fmt::Display for FlashSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}KB", self.kb())
    }
}

/// Bootloader version reported by GET.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct BslVersion {
    /// Major version (high nibble).
    pub major: u8,
    /// Minor version (low nibble).
    pub minor: u8,
}

impl BslVersion {
    /// Decode a version byte.
    pub fn from_byte(byte: u8) -> Self {
        Self {
            major: byte >> 4,
            minor: byte & 0x0F,
        }
    }

    /// Encode back into the version byte.
    pub fn to_byte(self) -> u8 {
        (self.major << 4) | (self.minor & 0x0F)
    }
}

impl fmt::Display for BslVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

/// Flash sizes and versions for which erase/write RAM routines exist.
const ROUTINE_SETS: &[(FlashSize, u8)] = &[
    (FlashSize::Kb32, 0x10),
    (FlashSize::Kb32, 0x12),
    (FlashSize::Kb32, 0x13),
    (FlashSize::Kb32, 0x14),
    (FlashSize::Kb128, 0x20),
    (FlashSize::Kb128, 0x21),
    (FlashSize::Kb128, 0x22),
    (FlashSize::Kb128, 0x24),
    (FlashSize::Kb256, 0x10),
];

/// What the session knows about the connected device.
///
/// Resolved once per session and never changed afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct DeviceProfile {
    /// Flash size found by probing.
    pub flash_size: FlashSize,
    /// Bootloader version from GET.
    pub version: BslVersion,
}

impl DeviceProfile {
    /// Flash size in kilobytes.
    pub fn flash_size_kb(&self) -> u32 {
        self.flash_size.kb()
    }

    /// Whether `addr` lies in program flash.
    pub fn contains_flash(&self, addr: u32) -> bool {
        (FLASH_BASE..self.flash_size.flash_end()).contains(&addr)
    }

    /// Erase sector holding `addr`, if it is in flash.
    pub fn sector_of(&self, addr: u32) -> Option<u8> {
        if !self.contains_flash(addr) {
            return None;
        }
        u8::try_from((addr - FLASH_BASE) / SECTOR_SIZE).ok()
    }

    /// Whether erase/write RAM routines are known for this device.
    pub fn has_routines(&self) -> bool {
        ROUTINE_SETS.contains(&(self.flash_size, self.version.to_byte()))
    }

    /// File name of the erase/write RAM routines for this device.
    ///
    /// `None` when no routines are known for this flash size and version.
    pub fn routines_file(&self) -> Option<String> {
        self.has_routines().then(|| {
            format!(
                "E_W_ROUTINEs_{}K_ver_{}.s19",
                self.flash_size.kb(),
                self.version
            )
        })
    }
}

impl fmt::Display for DeviceProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} flash, BSL v{}", self.flash_size, self.version)
    }
}

/// Device-side queries the resolver needs.
pub trait ProbeTarget {
    /// Called before the first size probe (e.g. to shorten the timeout).
    fn begin_probe(&mut self) -> Result<()> {
        Ok(())
    }

    /// Called after size probing, whether it succeeded or not.
    fn end_probe(&mut self) -> Result<()> {
        Ok(())
    }

    /// Whether `addr` is readable; `Ok(false)` when the address is NACKed.
    fn memory_probe(&mut self, addr: u32) -> Result<bool>;

    /// Bootloader version from a validated GET response.
    fn bsl_version(&mut self) -> Result<BslVersion>;
}

/// Ordered-probe strategy that turns a [`ProbeTarget`] into a [`DeviceProfile`].
#[derive(Debug, Clone, Copy, Default)]
pub struct ProfileResolver;

impl ProfileResolver {
    /// Probe candidate flash sizes largest first, then read the version.
    pub fn resolve<T: ProbeTarget + ?Sized>(target: &mut T) -> Result<DeviceProfile> {
        target.begin_probe()?;
        let found = Self::probe_flash_size(target);
        target.end_probe()?;
        let flash_size = found?;

        let version = target.bsl_version()?;
        let profile = DeviceProfile {
            flash_size,
            version,
        };
        info!("Device: {profile}");
        Ok(profile)
    }

    fn probe_flash_size<T: ProbeTarget + ?Sized>(target: &mut T) -> Result<FlashSize> {
        for size in FlashSize::PROBE_ORDER {
            let addr = size.probe_address();
            if target.memory_probe(addr)? {
                debug!("Probe 0x{addr:06X} readable, flash is {size}");
                return Ok(size);
            }
            debug!("Probe 0x{addr:06X} rejected");
        }
        Err(Error::DeviceNotFound)
    }
}
