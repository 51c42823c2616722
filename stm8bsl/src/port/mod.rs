//! Port abstraction for serial communication with the bootloader.
//!
//! The protocol engine never touches an OS serial handle directly. It talks
//! to a `Port`, which native builds implement on top of the `serialport`
//! crate and tests implement with an in-memory simulated bootloader.
//!
//! ```text
//! +------------------+
//! |  Protocol Engine |
//! |   (Stm8Flasher)  |
//! +--------+---------+
//!          |
//!          v
//! +--------+---------+     +------------------+
//! |   Port Trait     +---->+  SimulatedBsl    |  (tests)
//! +--------+---------+     +------------------+
//!          |
//!          v
//! +--------+---------+
//! | Native SerialPort|
//! |   (serialport)   |
//! +------------------+
//! ```
//!
//! ## Example
//!
//! ```rust,no_run
//! use stm8bsl::port::Port;
//!
//! fn example<P: Port>(port: &mut P) -> stm8bsl::Result<()> {
//!     port.clear_buffers()?;
//!     port.send(&[0x7F])?;
//!     let reply = port.receive(1)?;
//!     println!("Received: {reply:02X?}");
//!     Ok(())
//! }
//! ```

#[cfg(feature = "native")]
pub mod native;

#[cfg(test)]
pub(crate) mod sim;

use std::io::{ErrorKind, Read, Write};
use std::time::{Duration, Instant};

use log::trace;

use crate::error::{Error, Result};

/// Serial port configuration.
#[derive(Debug, Clone)]
pub struct SerialConfig {
    /// Port name/path (e.g., "/dev/ttyUSB0", "COM3").
    pub port_name: String,
    /// Baud rate.
    pub baud_rate: u32,
    /// Read/write timeout.
    pub timeout: Duration,
    /// Data bits (typically 8).
    pub data_bits: DataBits,
    /// Parity (the UART bootloader expects Even; single-wire reply mode uses None).
    pub parity: Parity,
    /// Stop bits (typically One).
    pub stop_bits: StopBits,
    /// Flow control (typically None).
    pub flow_control: FlowControl,
    /// RTS level applied after opening.
    pub rts: bool,
    /// DTR level applied after opening.
    pub dtr: bool,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            port_name: String::new(),
            baud_rate: 115200,
            timeout: Duration::from_millis(1000),
            data_bits: DataBits::Eight,
            parity: Parity::Even,
            stop_bits: StopBits::One,
            flow_control: FlowControl::None,
            rts: false,
            dtr: false,
        }
    }
}

impl SerialConfig {
    /// Create a new configuration with port name and baud rate.
    pub fn new(port_name: impl Into<String>, baud_rate: u32) -> Self {
        Self {
            port_name: port_name.into(),
            baud_rate,
            ..Default::default()
        }
    }

    /// Set the timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the parity mode.
    #[must_use]
    pub fn with_parity(mut self, parity: Parity) -> Self {
        self.parity = parity;
        self
    }

    /// Set the RTS and DTR levels applied after opening.
    #[must_use]
    pub fn with_control_lines(mut self, rts: bool, dtr: bool) -> Self {
        self.rts = rts;
        self.dtr = dtr;
        self
    }

    /// Reject settings no port can be opened with.
    pub fn validate(&self) -> Result<()> {
        if self.baud_rate == 0 {
            return Err(Error::Config("baud rate must be non-zero".to_string()));
        }
        if self.timeout.is_zero() {
            return Err(Error::Config("timeout must be non-zero".to_string()));
        }
        Ok(())
    }
}

/// Number of data bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DataBits {
    /// 7 data bits.
    Seven,
    /// 8 data bits.
    #[default]
    Eight,
}

/// Parity checking mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum Parity {
    /// No parity.
    None,
    /// Odd parity.
    Odd,
    /// Even parity.
    #[default]
    Even,
}

impl Parity {
    /// Parse a parity name ("none", "odd", "even").
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "none" | "n" => Some(Self::None),
            "odd" | "o" => Some(Self::Odd),
            "even" | "e" => Some(Self::Even),
            _ => None,
        }
    }
}

/// Number of stop bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StopBits {
    /// 1 stop bit.
    #[default]
    One,
    /// 2 stop bits.
    Two,
}

/// Flow control mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FlowControl {
    /// No flow control.
    #[default]
    None,
    /// Hardware flow control (RTS/CTS).
    Hardware,
    /// Software flow control (XON/XOFF).
    Software,
}

/// Byte-duplex channel to the bootloader.
///
/// Reads block for at most [`Port::timeout`] and report a timeout either as
/// `Ok(0)` or as an `ErrorKind::TimedOut` I/O error.
pub trait Port: Read + Write + Send {
    /// Set the read/write timeout.
    fn set_timeout(&mut self, timeout: Duration) -> Result<()>;

    /// Get the current timeout.
    fn timeout(&self) -> Duration;

    /// Set the baud rate.
    fn set_baud_rate(&mut self, baud_rate: u32) -> Result<()>;

    /// Get the current baud rate.
    fn baud_rate(&self) -> u32;

    /// Discard pending input and output.
    fn clear_buffers(&mut self) -> Result<()>;

    /// Get the port name/path.
    fn name(&self) -> &str;

    /// Set DTR (Data Terminal Ready) pin state.
    fn set_dtr(&mut self, level: bool) -> Result<()>;

    /// Set RTS (Request To Send) pin state.
    fn set_rts(&mut self, level: bool) -> Result<()>;

    /// Close the port and release resources.
    ///
    /// After calling this method, the port cannot be used for further I/O.
    fn close(&mut self) -> Result<()>;

    /// Send a frame, returning how many bytes the port accepted.
    fn send(&mut self, bytes: &[u8]) -> Result<usize> {
        let mut sent = 0;
        while sent < bytes.len() {
            match self.write(&bytes[sent..]) {
                Ok(0) => break,
                Ok(n) => sent += n,
                Err(e) if e.kind() == ErrorKind::Interrupted => {},
                Err(e) if e.kind() == ErrorKind::TimedOut => break,
                Err(e) => return Err(e.into()),
            }
        }
        self.flush()?;
        trace!("TX {:02X?}", &bytes[..sent]);
        Ok(sent)
    }

    /// Receive up to `len` bytes, waiting no longer than the port timeout.
    ///
    /// A short result means the timeout expired.
    fn receive(&mut self, len: usize) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; len];
        let mut received = 0;
        let deadline = Instant::now() + self.timeout();

        while received < len {
            match self.read(&mut buf[received..]) {
                Ok(0) => break,
                Ok(n) => received += n,
                Err(e) if e.kind() == ErrorKind::Interrupted => {},
                Err(e) if matches!(e.kind(), ErrorKind::TimedOut | ErrorKind::WouldBlock) => {
                    break;
                },
                Err(e) => return Err(e.into()),
            }
            if Instant::now() >= deadline {
                break;
            }
        }

        buf.truncate(received);
        trace!("RX {buf:02X?}");
        Ok(buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serial_config_default() {
        let config = SerialConfig::default();
        assert_eq!(config.baud_rate, 115200);
        assert_eq!(config.timeout, Duration::from_millis(1000));
        assert_eq!(config.data_bits, DataBits::Eight);
        assert_eq!(config.parity, Parity::Even);
        assert_eq!(config.stop_bits, StopBits::One);
        assert_eq!(config.flow_control, FlowControl::None);
        assert!(!config.rts);
        assert!(!config.dtr);
    }

    #[test]
    fn test_serial_config_builder() {
        let config = SerialConfig::new("/dev/ttyUSB0", 57600)
            .with_timeout(Duration::from_secs(2))
            .with_parity(Parity::None)
            .with_control_lines(true, false);

        assert_eq!(config.port_name, "/dev/ttyUSB0");
        assert_eq!(config.baud_rate, 57600);
        assert_eq!(config.timeout, Duration::from_secs(2));
        assert_eq!(config.parity, Parity::None);
        assert!(config.rts);
        assert!(!config.dtr);
    }

    #[test]
    fn test_serial_config_validate() {
        assert!(SerialConfig::new("/dev/ttyUSB0", 115200).validate().is_ok());
        assert!(matches!(
            SerialConfig::new("/dev/ttyUSB0", 0).validate(),
            Err(Error::Config(_))
        ));
        assert!(matches!(
            SerialConfig::new("/dev/ttyUSB0", 9600)
                .with_timeout(Duration::ZERO)
                .validate(),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn test_parity_from_name() {
        assert_eq!(Parity::from_name("even"), Some(Parity::Even));
        assert_eq!(Parity::from_name("NONE"), Some(Parity::None));
        assert_eq!(Parity::from_name("o"), Some(Parity::Odd));
        assert_eq!(Parity::from_name("mark"), None);
    }
}
