//! Serial port discovery.
//!
//! STM8 boards are reached through a USB-UART bridge wired to the UART1 (or
//! UART2/3 on larger parts) pins the ROM bootloader listens on. Ports are
//! classified by USB VID/PID so the CLI can pick the likely adapter.

use crate::error::{Error, Result};

#[cfg(feature = "native")]
use log::{debug, trace};
use log::info;

/// USB-UART bridge kinds commonly used to reach the bootloader.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "kebab-case"))]
pub enum BridgeKind {
    /// WCH CH340/CH341.
    Ch340,
    /// Silicon Labs CP210x.
    Cp210x,
    /// FTDI FT232/FT2232/FT4232.
    Ftdi,
    /// Prolific PL2303.
    Prolific,
    /// ST-LINK/V2-1 or V3 virtual COM port on Nucleo and Discovery boards.
    StLinkVcp,
    /// Anything else.
    Unknown,
}

/// Known USB VID/PID pairs.
const KNOWN_BRIDGES: &[(u16, &[u16], BridgeKind)] = &[
    (
        0x1A86,
        &[0x7523, 0x7522, 0x5523, 0x55D4],
        BridgeKind::Ch340,
    ),
    (0x10C4, &[0xEA60, 0xEA70, 0xEA71], BridgeKind::Cp210x),
    (
        0x0403,
        &[0x6001, 0x6010, 0x6011, 0x6014, 0x6015],
        BridgeKind::Ftdi,
    ),
    (0x067B, &[0x2303, 0x23A3, 0x23C3, 0x23D3], BridgeKind::Prolific),
    (
        0x0483,
        &[0x374B, 0x374E, 0x374F, 0x3752, 0x3753],
        BridgeKind::StLinkVcp,
    ),
];

impl BridgeKind {
    /// Classify a USB VID/PID pair.
    #[must_use]
    pub fn from_vid_pid(vid: u16, pid: u16) -> Self {
        KNOWN_BRIDGES
            .iter()
            .find(|(known_vid, pids, _)| vid == *known_vid && pids.contains(&pid))
            .map_or(Self::Unknown, |(_, _, kind)| *kind)
    }

    /// Human-readable name.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Ch340 => "CH340/CH341",
            Self::Cp210x => "CP210x",
            Self::Ftdi => "FTDI",
            Self::Prolific => "PL2303",
            Self::StLinkVcp => "ST-LINK VCP",
            Self::Unknown => "Unknown",
        }
    }

    /// Whether this is a recognised USB-UART bridge.
    pub fn is_known(&self) -> bool {
        !matches!(self, Self::Unknown)
    }
}

/// A serial port found on the host.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct DetectedPort {
    /// Port name/path (e.g., "/dev/ttyUSB0" or "COM3").
    pub name: String,
    /// Bridge classification.
    pub bridge: BridgeKind,
    /// USB Vendor ID (if available).
    pub vid: Option<u16>,
    /// USB Product ID (if available).
    pub pid: Option<u16>,
    /// Manufacturer string (if available).
    pub manufacturer: Option<String>,
    /// Product string (if available).
    pub product: Option<String>,
    /// Serial number (if available).
    pub serial: Option<String>,
}

impl DetectedPort {
    /// A port with no USB metadata.
    pub fn plain(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            bridge: BridgeKind::Unknown,
            vid: None,
            pid: None,
            manufacturer: None,
            product: None,
            serial: None,
        }
    }

    /// Whether the port sits behind a recognised USB-UART bridge.
    pub fn is_known_bridge(&self) -> bool {
        self.bridge.is_known()
    }

    /// One-line description for listings and prompts.
    pub fn describe(&self) -> String {
        let bridge = if self.bridge.is_known() {
            format!(" [{}]", self.bridge.name())
        } else if let (Some(vid), Some(pid)) = (self.vid, self.pid) {
            format!(" [VID:{vid:04X} PID:{pid:04X}]")
        } else {
            String::new()
        };
        let product = self
            .product
            .as_ref()
            .map(|p| format!(" - {p}"))
            .unwrap_or_default();
        format!("{}{bridge}{product}", self.name)
    }
}

/// Enumerate serial ports with USB metadata.
#[cfg(feature = "native")]
pub fn detect_ports() -> Vec<DetectedPort> {
    let ports = match serialport::available_ports() {
        Ok(ports) => ports,
        Err(e) => {
            debug!("Failed to enumerate serial ports: {e}");
            return Vec::new();
        },
    };

    ports
        .into_iter()
        .map(|info| {
            let mut detected = DetectedPort::plain(info.port_name);
            if let serialport::SerialPortType::UsbPort(usb) = info.port_type {
                detected.bridge = BridgeKind::from_vid_pid(usb.vid, usb.pid);
                detected.vid = Some(usb.vid);
                detected.pid = Some(usb.pid);
                detected.manufacturer = usb.manufacturer;
                detected.product = usb.product;
                detected.serial = usb.serial_number;
                trace!(
                    "Found USB port {} (VID {:04X}, PID {:04X}, {})",
                    detected.name,
                    usb.vid,
                    usb.pid,
                    detected.bridge.name()
                );
            }
            detected
        })
        .collect()
}

/// Enumerate serial ports (no serial backend compiled in).
#[cfg(not(feature = "native"))]
pub fn detect_ports() -> Vec<DetectedPort> {
    Vec::new()
}

/// Pick a port from `ports`: the first known bridge, else the first port.
pub fn select_port(ports: &[DetectedPort]) -> Result<DetectedPort> {
    if let Some(port) = ports.iter().find(|p| p.is_known_bridge()) {
        info!("Auto-detected {} bridge: {}", port.bridge.name(), port.name);
        return Ok(port.clone());
    }
    if let Some(port) = ports.first() {
        info!("Using first available port: {}", port.name);
        return Ok(port.clone());
    }
    Err(Error::TransportUnavailable(
        "no serial ports found".to_string(),
    ))
}

/// Auto-detect the port to use on this host.
pub fn auto_detect_port() -> Result<DetectedPort> {
    select_port(&detect_ports())
}

/// Format a list of detected ports for display.
pub fn format_port_list(ports: &[DetectedPort]) -> Vec<String> {
    ports.iter().map(DetectedPort::describe).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ch340(name: &str) -> DetectedPort {
        DetectedPort {
            bridge: BridgeKind::Ch340,
            vid: Some(0x1A86),
            pid: Some(0x7523),
            manufacturer: Some("WCH".to_string()),
            product: Some("USB-Serial".to_string()),
            ..DetectedPort::plain(name)
        }
    }

    #[test]
    fn test_bridge_from_vid_pid() {
        assert_eq!(BridgeKind::from_vid_pid(0x1A86, 0x7523), BridgeKind::Ch340);
        assert_eq!(BridgeKind::from_vid_pid(0x10C4, 0xEA60), BridgeKind::Cp210x);
        assert_eq!(BridgeKind::from_vid_pid(0x0403, 0x6001), BridgeKind::Ftdi);
        assert_eq!(BridgeKind::from_vid_pid(0x067B, 0x2303), BridgeKind::Prolific);
        assert_eq!(
            BridgeKind::from_vid_pid(0x0483, 0x374B),
            BridgeKind::StLinkVcp
        );
        assert_eq!(BridgeKind::from_vid_pid(0x0483, 0x5740), BridgeKind::Unknown);
        assert_eq!(BridgeKind::from_vid_pid(0x1234, 0x5678), BridgeKind::Unknown);
    }

    #[test]
    fn test_select_prefers_known_bridge() {
        let ports = vec![DetectedPort::plain("/dev/ttyS0"), ch340("/dev/ttyUSB0")];
        assert_eq!(select_port(&ports).unwrap().name, "/dev/ttyUSB0");
    }

    #[test]
    fn test_select_falls_back_to_first() {
        let ports = vec![DetectedPort::plain("/dev/ttyS0"), DetectedPort::plain("/dev/ttyS1")];
        assert_eq!(select_port(&ports).unwrap().name, "/dev/ttyS0");
    }

    #[test]
    fn test_select_without_ports() {
        assert!(matches!(
            select_port(&[]),
            Err(Error::TransportUnavailable(_))
        ));
    }

    #[test]
    fn test_format_port_list() {
        let mut unknown_usb = DetectedPort::plain("/dev/ttyACM0");
        unknown_usb.vid = Some(0x1234);
        unknown_usb.pid = Some(0xABCD);

        let formatted = format_port_list(&[
            ch340("/dev/ttyUSB0"),
            unknown_usb,
            DetectedPort::plain("/dev/ttyS0"),
        ]);
        assert_eq!(formatted[0], "/dev/ttyUSB0 [CH340/CH341] - USB-Serial");
        assert_eq!(formatted[1], "/dev/ttyACM0 [VID:1234 PID:ABCD]");
        assert_eq!(formatted[2], "/dev/ttyS0");
    }
}
