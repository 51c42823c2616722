//! Native serial port implementation using the `serialport` crate.
//!
//! This module provides the serial port implementation for native platforms
//! (Linux, macOS, Windows, FreeBSD, etc.).

use {
    crate::{
        error::{Error, Result},
        port::{DataBits, FlowControl, Parity, Port, SerialConfig, StopBits},
    },
    log::{debug, trace},
    serialport::ClearBuffer,
    std::{
        io::{Read, Write},
        time::Duration,
    },
};

/// Native serial port implementation.
pub struct NativePort {
    port: Option<Box<dyn serialport::SerialPort>>,
    name: String,
    timeout: Duration,
    baud_rate: u32,
}

impl NativePort {
    /// Open a serial port with the given configuration.
    ///
    /// RTS and DTR are driven to the configured levels right after opening,
    /// since some adapters wire them to the target's reset line.
    pub fn open(config: &SerialConfig) -> Result<Self> {
        if config.port_name.is_empty() {
            return Err(Error::TransportUnavailable(
                "no serial port name given".to_string(),
            ));
        }
        config.validate()?;

        debug!(
            "Opening {} at {} baud ({:?} parity)",
            config.port_name, config.baud_rate, config.parity
        );

        let port = serialport::new(&config.port_name, config.baud_rate)
            .timeout(config.timeout)
            .data_bits(config.data_bits.into())
            .parity(config.parity.into())
            .stop_bits(config.stop_bits.into())
            .flow_control(config.flow_control.into())
            .open()?;

        let mut native = Self {
            port: Some(port),
            name: config.port_name.clone(),
            timeout: config.timeout,
            baud_rate: config.baud_rate,
        };
        native.set_rts(config.rts)?;
        native.set_dtr(config.dtr)?;
        Ok(native)
    }

    /// Open a serial port with default settings (8E1, 1 s timeout).
    pub fn open_simple(port_name: &str, baud_rate: u32) -> Result<Self> {
        let config = SerialConfig::new(port_name, baud_rate);
        Self::open(&config)
    }

    /// Whether the port is still open.
    pub fn is_open(&self) -> bool {
        self.port.is_some()
    }

    fn handle(&mut self) -> Result<&mut Box<dyn serialport::SerialPort>> {
        let name = &self.name;
        self.port
            .as_mut()
            .ok_or_else(|| Error::TransportUnavailable(format!("{name} is closed")))
    }
}

impl Port for NativePort {
    fn set_timeout(&mut self, timeout: Duration) -> Result<()> {
        self.handle()?.set_timeout(timeout)?;
        self.timeout = timeout;
        Ok(())
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    fn set_baud_rate(&mut self, baud_rate: u32) -> Result<()> {
        self.handle()?.set_baud_rate(baud_rate)?;
        self.baud_rate = baud_rate;
        Ok(())
    }

    fn baud_rate(&self) -> u32 {
        self.baud_rate
    }

    fn clear_buffers(&mut self) -> Result<()> {
        self.handle()?.clear(ClearBuffer::All)?;
        Ok(())
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn set_dtr(&mut self, level: bool) -> Result<()> {
        trace!("Setting DTR to {level}");
        self.handle()?.write_data_terminal_ready(level)?;
        Ok(())
    }

    fn set_rts(&mut self, level: bool) -> Result<()> {
        trace!("Setting RTS to {level}");
        self.handle()?.write_request_to_send(level)?;
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        if self.port.take().is_some() {
            debug!("Closed {}", self.name);
        }
        Ok(())
    }
}

fn closed() -> std::io::Error {
    std::io::Error::new(std::io::ErrorKind::NotConnected, "port closed")
}

impl Read for NativePort {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.port
            .as_mut()
            .ok_or_else(closed)
            .and_then(|p| p.read(buf))
    }
}

impl Write for NativePort {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.port
            .as_mut()
            .ok_or_else(closed)
            .and_then(|p| p.write(buf))
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.port
            .as_mut()
            .ok_or_else(closed)
            .and_then(std::io::Write::flush)
    }
}

impl From<DataBits> for serialport::DataBits {
    fn from(bits: DataBits) -> Self {
        match bits {
            DataBits::Seven => Self::Seven,
            DataBits::Eight => Self::Eight,
        }
    }
}

impl From<Parity> for serialport::Parity {
    fn from(parity: Parity) -> Self {
        match parity {
            Parity::None => Self::None,
            Parity::Odd => Self::Odd,
            Parity::Even => Self::Even,
        }
    }
}

impl From<StopBits> for serialport::StopBits {
    fn from(bits: StopBits) -> Self {
        match bits {
            StopBits::One => Self::One,
            StopBits::Two => Self::Two,
        }
    }
}

impl From<FlowControl> for serialport::FlowControl {
    fn from(flow: FlowControl) -> Self {
        match flow {
            FlowControl::None => Self::None,
            FlowControl::Hardware => Self::Hardware,
            FlowControl::Software => Self::Software,
        }
    }
}
