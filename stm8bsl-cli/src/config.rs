//! Configuration file support for stm8bsl.
//!
//! Configuration is loaded from multiple sources with the following priority (highest first):
//! 1. Command-line arguments
//! 2. Environment variables (STM8BSL_*)
//! 3. Local config file (./stm8bsl.toml)
//! 4. Global config file (~/.config/stm8bsl/config.toml)
//!
//! ```toml
//! [connection]
//! serial = "/dev/ttyUSB0"
//! baud = 115200
//! parity = "even"
//!
//! [flash]
//! routines_dir = "routines"
//! verify = true
//!
//! [[usb_device]]
//! vid = 0x1A86
//! pid = 0x7523
//! ```

use directories::ProjectDirs;
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use stm8bsl::Parity;

/// Name of the per-project config file.
pub const LOCAL_CONFIG_FILE: &str = "stm8bsl.toml";

/// Extra USB VID/PID pair to treat as a known adapter.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UsbDevice {
    /// USB Vendor ID.
    pub vid: u16,
    /// USB Product ID.
    pub pid: u16,
}

impl UsbDevice {
    /// Check if this device matches the given USB info.
    pub fn matches(&self, vid: u16, pid: u16) -> bool {
        self.vid == vid && self.pid == pid
    }
}

/// Connection configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// Preferred serial port (e.g., "/dev/ttyUSB0" or "COM3").
    pub serial: Option<String>,
    /// Default baud rate.
    pub baud: Option<u32>,
    /// UART parity.
    pub parity: Option<Parity>,
}

/// Flash configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FlashConfig {
    /// Directory holding the `E_W_ROUTINEs_*.s19` files.
    pub routines_dir: Option<PathBuf>,
    /// Verify after writing.
    pub verify: Option<bool>,
    /// Erase touched sectors before writing.
    pub erase: Option<bool>,
    /// Program the option bytes that keep the bootloader enabled.
    pub enable_bootloader: Option<bool>,
    /// Jump to the application after flashing.
    pub jump: Option<bool>,
}

/// Main configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Connection settings.
    #[serde(default)]
    pub connection: ConnectionConfig,
    /// Flash settings.
    #[serde(default)]
    pub flash: FlashConfig,
    /// Known USB devices for auto-detection.
    #[serde(default)]
    pub usb_device: Vec<UsbDevice>,
}

impl Config {
    /// Load configuration from all available sources.
    pub fn load() -> Self {
        let mut config = Self::default();

        // Load global config
        if let Some(global_path) = Self::global_config_path() {
            if let Some(global_config) = Self::load_from_file(&global_path) {
                debug!("Loaded global config from {}", global_path.display());
                config.merge(global_config);
            }
        }

        // Load local config (overrides global)
        if let Some(local_config) = Self::load_from_file(Path::new(LOCAL_CONFIG_FILE)) {
            debug!("Loaded local config from {LOCAL_CONFIG_FILE}");
            config.merge(local_config);
        }

        config
    }

    /// Load configuration from a specific file path (--config flag).
    pub fn load_from_path(path: &Path) -> Self {
        if let Some(config) = Self::load_from_file(path) {
            debug!("Loaded config from {}", path.display());
            config
        } else {
            warn!(
                "Could not load config from {}, using defaults",
                path.display()
            );
            Self::default()
        }
    }

    /// Load configuration from a specific file.
    fn load_from_file(path: &Path) -> Option<Self> {
        if !path.exists() {
            return None;
        }

        match fs::read_to_string(path) {
            Ok(content) => match toml::from_str(&content) {
                Ok(config) => Some(config),
                Err(e) => {
                    warn!("Failed to parse config file {}: {}", path.display(), e);
                    None
                },
            },
            Err(e) => {
                warn!("Failed to read config file {}: {}", path.display(), e);
                None
            },
        }
    }

    /// Get the global configuration directory.
    pub fn global_config_dir() -> Option<PathBuf> {
        ProjectDirs::from("", "", "stm8bsl").map(|dirs| dirs.config_dir().to_path_buf())
    }

    /// Get the global configuration file path.
    pub fn global_config_path() -> Option<PathBuf> {
        Self::global_config_dir().map(|dir| dir.join("config.toml"))
    }

    /// Merge another config into this one.
    fn merge(&mut self, other: Self) {
        let conn = other.connection;
        if conn.serial.is_some() {
            self.connection.serial = conn.serial;
        }
        if conn.baud.is_some() {
            self.connection.baud = conn.baud;
        }
        if conn.parity.is_some() {
            self.connection.parity = conn.parity;
        }

        let flash = other.flash;
        if flash.routines_dir.is_some() {
            self.flash.routines_dir = flash.routines_dir;
        }
        self.flash.verify = flash.verify.or(self.flash.verify);
        self.flash.erase = flash.erase.or(self.flash.erase);
        self.flash.enable_bootloader = flash.enable_bootloader.or(self.flash.enable_bootloader);
        self.flash.jump = flash.jump.or(self.flash.jump);

        for device in other.usb_device {
            if !self.usb_device.contains(&device) {
                self.usb_device.push(device);
            }
        }
    }

    /// Whether a VID/PID pair was listed under `[[usb_device]]`.
    pub fn is_configured_device(&self, vid: u16, pid: u16) -> bool {
        self.usb_device.iter().any(|d| d.matches(vid, pid))
    }
}
