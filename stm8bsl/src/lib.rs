//! # stm8bsl
//!
//! A library for programming STM8 microcontrollers through their ROM serial
//! bootloader (BSL).
//!
//! This crate provides the host side of the bootloader protocol:
//!
//! - Frame codec (command, address and payload frames with XOR checksums)
//! - Protocol engine with SYNC retry, chunked read/write, sector erase, GO
//! - Flash size and bootloader version detection
//! - Motorola S-record, Intel HEX and raw binary images
//! - Serial port discovery
//!
//! ## Supported Devices
//!
//! STM8S, STM8AF and STM8L parts with 8, 32, 128 or 256 KB of flash whose
//! ROM bootloader is reachable over UART.
//!
//! ## Features
//!
//! - `native` (default): serial port support via the `serialport` crate
//! - `serde`: Serialization support for data types
//!
//! ## Example
//!
//! ```rust,no_run
//! use stm8bsl::{MemoryImage, SerialConfig, Stm8Flasher};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let image = MemoryImage::load("firmware.s19")?;
//!
//!     #[cfg(feature = "native")]
//!     {
//!         let config = SerialConfig::new("/dev/ttyUSB0", 115200);
//!         let mut flasher = Stm8Flasher::open(&config)?;
//!         let profile = flasher.connect()?;
//!         println!("Found {profile}");
//!
//!         flasher.write_memory_with_progress(image.start, &image.data, |done, total| {
//!             println!("{done}/{total} bytes");
//!         })?;
//!         flasher.jump_to(0x8000)?;
//!     }
//!
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod device;
pub mod error;
pub mod image;
pub mod port;
pub mod protocol;
pub mod target;

#[cfg(feature = "native")]
pub use port::native::NativePort;
pub use {
    device::{BridgeKind, DetectedPort, auto_detect_port, detect_ports, format_port_list},
    error::{Error, Result},
    image::{ImageFormat, MemoryImage},
    port::{DataBits, FlowControl, Parity, Port, SerialConfig, StopBits},
    protocol::{ACK, Command, NACK, SYNC, TransferRange},
    target::{
        BslVersion, DeviceProfile, FLASH_BASE, FlashSize, SECTOR_SIZE, SessionConfig, SessionState,
        Stm8Flasher,
        flasher::{OPTION_BSL_ADDRESS, OPTION_BSL_ENABLE},
    },
};
