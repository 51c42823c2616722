//! Bootloader session: device profile resolution and the protocol engine.
//!
//! ```text
//!   Disconnected --sync--> Synchronizing --> Identifying --identify--> Ready
//!                                                                        |
//!        +--------------+-------------+-------------+-------------------+
//!        v              v             v             v
//!     Reading        Erasing       Writing       Jumping --> Disconnected
//!        |              |             |
//!        +--> Ready on success, Failed on a link error
//! ```
//!
//! `Failed` blocks every operation until a fresh `sync`, which returns the
//! session to `Ready` with the profile resolved earlier.

pub mod flasher;
pub mod profile;

use std::fmt;

pub use flasher::{SessionConfig, Stm8Flasher};
pub use profile::{
    BslVersion, DeviceProfile, FLASH_BASE, FlashSize, ProbeTarget, ProfileResolver, SECTOR_SIZE,
};

/// Where a bootloader session currently stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub enum SessionState {
    /// No handshake has happened yet, or the device left the bootloader.
    #[default]
    Disconnected,
    /// SYNC bytes are being exchanged.
    Synchronizing,
    /// Synchronized, flash size and version not yet known.
    Identifying,
    /// Idle and able to accept an operation.
    Ready,
    /// Memory read in progress.
    Reading,
    /// Sector erase in progress.
    Erasing,
    /// Memory write in progress.
    Writing,
    /// GO command in progress.
    Jumping,
    /// The link desynchronized; only `sync` is accepted.
    Failed,
}

impl SessionState {
    /// Whether an operation is in flight.
    pub fn is_busy(self) -> bool {
        matches!(
            self,
            Self::Synchronizing | Self::Reading | Self::Erasing | Self::Writing | Self::Jumping
        )
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Disconnected => "disconnected",
            Self::Synchronizing => "synchronizing",
            Self::Identifying => "identifying",
            Self::Ready => "ready",
            Self::Reading => "reading",
            Self::Erasing => "erasing",
            Self::Writing => "writing",
            Self::Jumping => "jumping",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}
