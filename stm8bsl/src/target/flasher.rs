//! STM8 bootloader protocol engine.
//!
//! Drives one half-duplex session with the ROM bootloader: every frame sent
//! is answered before the next one goes out, and any unexpected byte or
//! short reply aborts the running operation.
//!
//! ## Generic Port Support
//!
//! The flasher is generic over the `Port` trait. Native builds use
//! `NativePort`; tests drive it against a simulated bootloader.
//!
//! ## Example
//!
//! ```rust,no_run
//! use stm8bsl::{SerialConfig, Stm8Flasher};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     #[cfg(feature = "native")]
//!     {
//!         let config = SerialConfig::new("/dev/ttyUSB0", 115200);
//!         let mut flasher = Stm8Flasher::open(&config)?;
//!
//!         let profile = flasher.connect()?;
//!         println!("Connected: {profile}");
//!
//!         flasher.write_memory(0x8000, &[0x82, 0x00, 0x80, 0x80])?;
//!         flasher.jump_to(0x8000)?;
//!     }
//!
//!     Ok(())
//! }
//! ```

use {
    crate::{
        error::{Error, Result},
        port::Port,
        protocol::{
            ACK, Command, GET_RESPONSE_LEN, GetResponse, GetResponseError, NACK,
            READ_CHUNK_SIZE, SYNC, TransferRange, WRITE_CHUNK_SIZE, encode_address,
            encode_command, encode_erase_sector, encode_lengthed_payload, encode_read_length,
        },
        target::{
            SessionState,
            profile::{BslVersion, DeviceProfile, ProbeTarget, ProfileResolver},
        },
    },
    log::{debug, info, trace, warn},
    std::{thread, time::Duration},
};

/// Option byte address holding the bootloader enable flag.
pub const OPTION_BSL_ADDRESS: u32 = 0x487E;

/// Value written to [`OPTION_BSL_ADDRESS`] to keep the ROM bootloader enabled.
pub const OPTION_BSL_ENABLE: [u8; 2] = [0x55, 0xAA];

/// Timing and retry settings for a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionConfig {
    /// How long to wait for each reply.
    pub response_timeout: Duration,
    /// Shorter reply window used while probing the flash size.
    pub probe_timeout: Duration,
    /// Number of SYNC bytes sent before giving up.
    pub sync_attempts: u32,
    /// Pause between SYNC attempts.
    pub sync_retry_delay: Duration,
    /// Pause before probing, letting the bootloader settle after SYNC.
    pub settle_delay: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            response_timeout: Duration::from_millis(1000),
            probe_timeout: Duration::from_millis(100),
            sync_attempts: 15,
            sync_retry_delay: Duration::from_millis(10),
            settle_delay: Duration::from_millis(50),
        }
    }
}

type InterruptChecker = Box<dyn Fn() -> bool + Send>;

/// STM8 ROM bootloader client.
///
/// Generic over the port type `P`, which must implement the `Port` trait.
pub struct Stm8Flasher<P: Port> {
    port: P,
    config: SessionConfig,
    state: SessionState,
    profile: Option<DeviceProfile>,
    interrupt: Option<InterruptChecker>,
}

impl<P: Port> Stm8Flasher<P> {
    /// Create a flasher on an already opened port.
    pub fn new(port: P) -> Self {
        Self {
            port,
            config: SessionConfig::default(),
            state: SessionState::Disconnected,
            profile: None,
            interrupt: None,
        }
    }

    /// Replace the timing settings.
    #[must_use]
    pub fn with_config(mut self, config: SessionConfig) -> Self {
        self.config = config;
        self
    }

    /// Install a checker polled between chunks of multi-chunk operations.
    ///
    /// When it returns `true` the operation stops with [`Error::Interrupted`].
    #[must_use]
    pub fn with_interrupt_checker<F>(mut self, checker: F) -> Self
    where
        F: Fn() -> bool + Send + 'static,
    {
        self.interrupt = Some(Box::new(checker));
        self
    }

    /// Get a reference to the underlying port.
    pub fn port(&self) -> &P {
        &self.port
    }

    /// Get a mutable reference to the underlying port.
    pub fn port_mut(&mut self) -> &mut P {
        &mut self.port
    }

    /// Consume the flasher and return the underlying port.
    pub fn into_port(self) -> P {
        self.port
    }

    /// Current session state.
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Device profile, once identified.
    pub fn profile(&self) -> Option<DeviceProfile> {
        self.profile
    }

    /// Timing settings in use.
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Synchronize and identify in one step.
    pub fn connect(&mut self) -> Result<DeviceProfile> {
        info!("Synchronizing with bootloader on {}...", self.port.name());
        self.sync()?;
        self.identify()
    }

    /// Run the SYNC handshake.
    ///
    /// Allowed in any state; this is also how a failed session recovers.
    /// A profile kept from before goes straight back to `Ready`; after a
    /// jump or close the device has to be identified again.
    /// Returns the number of SYNC bytes it took.
    pub fn sync(&mut self) -> Result<u32> {
        self.state = SessionState::Synchronizing;
        match self.try_sync() {
            Ok(attempts) => {
                self.state = if self.profile.is_some() {
                    SessionState::Ready
                } else {
                    SessionState::Identifying
                };
                Ok(attempts)
            },
            Err(e) => {
                self.state = SessionState::Failed;
                Err(e)
            },
        }
    }

    fn try_sync(&mut self) -> Result<u32> {
        self.port.clear_buffers()?;
        self.port.set_timeout(self.config.response_timeout)?;

        let attempts = self.config.sync_attempts;
        let mut last_response = None;
        for attempt in 1..=attempts {
            self.send_frame("SYNC", &[SYNC])?;
            let reply = self.port.receive(1)?;

            match reply.first().copied() {
                Some(byte @ (ACK | NACK)) => {
                    let how = if byte == ACK { "ACK" } else { "NACK, already synchronized" };
                    info!("Synchronized after {attempt} attempt(s) ({how})");
                    return Ok(attempt);
                },
                Some(byte) => {
                    warn!("Unexpected SYNC reply 0x{byte:02X} (attempt {attempt}/{attempts})");
                    last_response = Some(byte);
                },
                None => {
                    warn!("No SYNC reply (attempt {attempt}/{attempts})");
                },
            }

            if attempt < attempts {
                thread::sleep(self.config.sync_retry_delay);
            }
        }

        Err(Error::SyncFailed {
            attempts,
            last_response,
        })
    }

    /// Resolve the device profile.
    ///
    /// Requires a synchronized session. Once resolved the profile is cached
    /// and returned as-is by later calls.
    pub fn identify(&mut self) -> Result<DeviceProfile> {
        if self.state == SessionState::Ready {
            if let Some(profile) = self.profile {
                return Ok(profile);
            }
        }
        if self.state != SessionState::Identifying {
            return Err(Error::InvalidState {
                operation: "identify",
                state: self.state,
            });
        }

        self.port.clear_buffers()?;
        thread::sleep(self.config.settle_delay);

        match ProfileResolver::resolve(&mut Probing(self)) {
            Ok(profile) => {
                self.profile = Some(profile);
                self.state = SessionState::Ready;
                Ok(profile)
            },
            Err(e) => {
                if e.is_link_failure() {
                    self.state = SessionState::Failed;
                }
                Err(e)
            },
        }
    }

    /// Check whether `addr` is readable.
    ///
    /// A NACK on the address frame yields `Ok(false)`; any other failure is
    /// an error.
    pub fn memory_probe(&mut self, addr: u32) -> Result<bool> {
        let restore = self.state;
        if !matches!(restore, SessionState::Identifying | SessionState::Ready) {
            return Err(Error::InvalidState {
                operation: "probe memory",
                state: restore,
            });
        }
        self.state = SessionState::Reading;
        let result = self.probe_address(addr);
        self.settle(restore, &result, "memory probe");
        result
    }

    /// Read `len` bytes starting at `start`.
    pub fn read_memory(&mut self, start: u32, len: usize) -> Result<Vec<u8>> {
        self.read_memory_with_progress(start, len, |_, _| {})
    }

    /// Read memory, calling `progress(done, total)` after each chunk.
    pub fn read_memory_with_progress<F>(
        &mut self,
        start: u32,
        len: usize,
        mut progress: F,
    ) -> Result<Vec<u8>>
    where
        F: FnMut(usize, usize),
    {
        self.run("read memory", SessionState::Reading, |this| {
            let range = TransferRange::new(start, len)?;
            debug!("Reading {len} bytes from 0x{start:06X}");

            let mut data = Vec::with_capacity(len);
            for chunk in range.chunks(READ_CHUNK_SIZE) {
                this.check_interrupt()?;
                this.read_chunk(chunk.address, chunk.len, &mut data)?;
                progress(data.len(), len);
            }
            Ok(data)
        })
    }

    /// Erase the 1 KB flash sector containing `addr`.
    pub fn flash_erase(&mut self, addr: u32) -> Result<()> {
        self.run("erase flash", SessionState::Erasing, |this| {
            let sector = this.sector_of(addr, 1)?;
            this.erase_sector(sector)
        })
    }

    /// Erase every sector touched by `[start, start + len)`, in ascending order.
    ///
    /// Returns the number of sectors erased.
    pub fn erase_range(&mut self, start: u32, len: usize) -> Result<usize> {
        self.run("erase flash", SessionState::Erasing, |this| {
            let range = TransferRange::new(start, len)?;
            if range.is_empty() {
                return Ok(0);
            }
            let last_addr = start + (range.length - 1);
            let first = this.sector_of(start, range.length)?;
            let last = this.sector_of(last_addr, range.length)?;

            debug!("Erasing sectors {first}..={last}");
            for sector in first..=last {
                this.check_interrupt()?;
                this.erase_sector(sector)?;
            }
            Ok(usize::from(last - first) + 1)
        })
    }

    /// Write `data` starting at `start`.
    pub fn write_memory(&mut self, start: u32, data: &[u8]) -> Result<()> {
        self.write_memory_with_progress(start, data, |_, _| {})
    }

    /// Write memory, calling `progress(done, total)` after each chunk.
    pub fn write_memory_with_progress<F>(
        &mut self,
        start: u32,
        data: &[u8],
        mut progress: F,
    ) -> Result<()>
    where
        F: FnMut(usize, usize),
    {
        self.run("write memory", SessionState::Writing, |this| {
            let range = TransferRange::new(start, data.len())?;
            debug!("Writing {} bytes to 0x{start:06X}", data.len());

            for chunk in range.chunks(WRITE_CHUNK_SIZE) {
                this.check_interrupt()?;
                let bytes = &data[chunk.offset..chunk.offset + chunk.len];
                this.write_chunk(chunk.address, bytes)?;
                progress(chunk.offset + chunk.len, data.len());
            }
            Ok(())
        })
    }

    /// Read back `[start, start + expected.len())` and compare with `expected`.
    pub fn verify<F>(&mut self, start: u32, expected: &[u8], progress: F) -> Result<()>
    where
        F: FnMut(usize, usize),
    {
        let actual = self.read_memory_with_progress(start, expected.len(), progress)?;
        let mismatch = expected
            .iter()
            .zip(actual.iter())
            .position(|(want, got)| want != got);

        match mismatch {
            Some(offset) => Err(Error::violation(
                format!("verify 0x{:06X}", start + offset as u32),
                expected[offset],
                actual[offset],
            )),
            None => {
                debug!("Verified {} bytes at 0x{start:06X}", expected.len());
                Ok(())
            },
        }
    }

    /// Program the option bytes so the ROM bootloader stays enabled.
    pub fn enable_bootloader(&mut self) -> Result<()> {
        info!("Enabling ROM bootloader in option bytes");
        self.write_memory(OPTION_BSL_ADDRESS, &OPTION_BSL_ENABLE)
    }

    /// Start execution at `addr`.
    ///
    /// The device leaves the bootloader, so the session ends up
    /// `Disconnected` and the cached profile is dropped.
    pub fn jump_to(&mut self, addr: u32) -> Result<()> {
        self.run("jump", SessionState::Jumping, |this| {
            this.command(Command::Go)?;
            this.address(addr)
        })?;
        info!("Jumped to 0x{addr:06X}");
        self.state = SessionState::Disconnected;
        self.profile = None;
        Ok(())
    }

    /// Close the port. The session is `Disconnected` afterwards.
    pub fn close(&mut self) -> Result<()> {
        self.state = SessionState::Disconnected;
        self.profile = None;
        self.port.close()
    }

    /// Run `op` in `busy` state; only allowed from `Ready`.
    fn run<T>(
        &mut self,
        operation: &'static str,
        busy: SessionState,
        op: impl FnOnce(&mut Self) -> Result<T>,
    ) -> Result<T> {
        if self.state != SessionState::Ready {
            return Err(Error::InvalidState {
                operation,
                state: self.state,
            });
        }
        self.state = busy;
        let result = op(self);
        self.settle(SessionState::Ready, &result, operation);
        result
    }

    fn settle<T>(&mut self, idle: SessionState, result: &Result<T>, operation: &str) {
        self.state = match result {
            Err(e) if e.is_link_failure() => {
                warn!("{operation} failed, link needs a fresh sync: {e}");
                SessionState::Failed
            },
            _ => idle,
        };
    }

    fn check_interrupt(&self) -> Result<()> {
        if self.interrupt.as_ref().is_some_and(|check| check()) {
            return Err(Error::Interrupted);
        }
        Ok(())
    }

    fn sector_of(&self, addr: u32, length: u32) -> Result<u8> {
        self.profile
            .and_then(|profile| profile.sector_of(addr))
            .ok_or(Error::AddressOutOfRange {
                address: addr,
                length,
            })
    }

    fn send_frame(&mut self, stage: &str, frame: &[u8]) -> Result<()> {
        let sent = self.port.send(frame)?;
        if sent != frame.len() {
            return Err(Error::TransportUnavailable(format!(
                "{stage}: sent {sent} of {} bytes",
                frame.len()
            )));
        }
        Ok(())
    }

    /// Wait for a single reply byte, which must be ACK.
    fn expect_ack(&mut self, stage: &str) -> Result<()> {
        match self.port.receive(1)?.first().copied() {
            Some(ACK) => Ok(()),
            Some(byte) => Err(Error::violation(stage, ACK, byte)),
            None => Err(Error::timeout(stage, 1, 0)),
        }
    }

    fn command(&mut self, cmd: Command) -> Result<()> {
        let stage = format!("{} command", cmd.name());
        trace!("Sending {stage}");
        self.send_frame(&stage, &encode_command(cmd))?;
        self.expect_ack(&stage)
    }

    fn address(&mut self, addr: u32) -> Result<()> {
        let stage = format!("address 0x{addr:06X}");
        self.send_frame(&stage, &encode_address(addr))?;
        self.expect_ack(&stage)
    }

    fn probe_address(&mut self, addr: u32) -> Result<bool> {
        self.command(Command::Read)?;

        let stage = format!("address 0x{addr:06X}");
        self.send_frame(&stage, &encode_address(addr))?;
        match self.port.receive(1)?.first().copied() {
            Some(ACK) => {},
            Some(byte) => {
                trace!("Probe 0x{addr:06X} answered 0x{byte:02X}");
                return Ok(false);
            },
            None => return Err(Error::timeout(stage, 1, 0)),
        }

        let stage = format!("data 0x{addr:06X}");
        self.send_frame(&stage, &encode_read_length(1))?;
        let reply = self.port.receive(2)?;
        Self::check_data_reply(&stage, &reply, 2)?;
        Ok(true)
    }

    fn read_version(&mut self) -> Result<BslVersion> {
        self.command(Command::Get)?;

        // the ACK consumed above is the first byte of the response
        let rest = self.port.receive(GET_RESPONSE_LEN - 1)?;
        if rest.len() < GET_RESPONSE_LEN - 1 {
            return Err(Error::timeout(
                "GET response",
                GET_RESPONSE_LEN,
                rest.len() + 1,
            ));
        }
        let mut response = [ACK; GET_RESPONSE_LEN];
        response[1..].copy_from_slice(&rest);

        let parsed = GetResponse::parse(&response).map_err(|e| match e {
            GetResponseError::MissingAck { index, actual } => {
                Error::violation(format!("GET response byte {index}"), ACK, actual)
            },
            GetResponseError::CodeMismatch { command, actual } => Error::violation(
                format!("GET echo of {}", command.name()),
                command.code(),
                actual,
            ),
        })?;

        let version = BslVersion::from_byte(parsed.version);
        debug!("Bootloader v{version}, {} command bytes", parsed.count);
        Ok(version)
    }

    fn read_chunk(&mut self, addr: u32, len: usize, out: &mut Vec<u8>) -> Result<()> {
        self.command(Command::Read)?;
        self.address(addr)?;

        let stage = format!("data 0x{addr:06X}");
        self.send_frame(&stage, &encode_read_length(len))?;
        let reply = self.port.receive(len + 1)?;
        Self::check_data_reply(&stage, &reply, len + 1)?;
        out.extend_from_slice(&reply[1..]);
        Ok(())
    }

    /// A READ data reply is ACK followed by the bytes; a NACK in place of
    /// the ACK is reported as such even though nothing follows it.
    fn check_data_reply(stage: &str, reply: &[u8], expected: usize) -> Result<()> {
        match reply.first() {
            None => Err(Error::timeout(stage, expected, 0)),
            Some(&byte) if byte != ACK => Err(Error::violation(stage, ACK, byte)),
            Some(_) if reply.len() < expected => {
                Err(Error::timeout(stage, expected, reply.len()))
            },
            Some(_) => Ok(()),
        }
    }

    #[allow(clippy::cast_possible_truncation)]
    fn write_chunk(&mut self, addr: u32, bytes: &[u8]) -> Result<()> {
        self.command(Command::Write)?;
        self.address(addr)?;

        let stage = format!("data 0x{addr:06X}");
        // chunks never exceed WRITE_CHUNK_SIZE, so len - 1 fits a byte
        let frame = encode_lengthed_payload((bytes.len() - 1) as u8, bytes);
        self.send_frame(&stage, &frame)?;
        self.expect_ack(&stage)
    }

    fn erase_sector(&mut self, sector: u8) -> Result<()> {
        trace!("Erasing sector {sector}");
        self.command(Command::Erase)?;

        let stage = format!("erase sector {sector}");
        self.send_frame(&stage, &encode_erase_sector(sector))?;
        self.expect_ack(&stage)
    }
}

/// Size-probing view of a flasher handed to the resolver.
struct Probing<'a, P: Port>(&'a mut Stm8Flasher<P>);

impl<P: Port> ProbeTarget for Probing<'_, P> {
    fn begin_probe(&mut self) -> Result<()> {
        let timeout = self.0.config.probe_timeout;
        self.0.port.set_timeout(timeout)
    }

    fn end_probe(&mut self) -> Result<()> {
        let timeout = self.0.config.response_timeout;
        self.0.port.set_timeout(timeout)
    }

    fn memory_probe(&mut self, addr: u32) -> Result<bool> {
        self.0.probe_address(addr)
    }

    fn bsl_version(&mut self) -> Result<BslVersion> {
        self.0.read_version()
    }
}

// Native-specific convenience functions
#[cfg(feature = "native")]
mod native_impl {
    use super::{Duration, Error, Result, Stm8Flasher, debug, thread, warn};
    use crate::port::SerialConfig;
    use crate::port::native::NativePort;

    const MAX_OPEN_PORT_ATTEMPTS: usize = 3;
    const OPEN_RETRY_DELAY: Duration = Duration::from_millis(500);

    impl Stm8Flasher<NativePort> {
        /// Open a serial port and wrap it in a flasher.
        ///
        /// USB-serial adapters sometimes need a moment after plug-in, so
        /// opening is retried a few times.
        pub fn open(config: &SerialConfig) -> Result<Self> {
            let mut last_error = None;

            for attempt in 1..=MAX_OPEN_PORT_ATTEMPTS {
                match NativePort::open(config) {
                    Ok(port) => {
                        if attempt > 1 {
                            debug!("Port opened on attempt {attempt}");
                        }
                        return Ok(Self::new(port));
                    },
                    Err(e @ (Error::TransportUnavailable(_) | Error::Config(_))) => return Err(e),
                    Err(e) => {
                        warn!(
                            "Failed to open port {} (attempt {attempt}/{MAX_OPEN_PORT_ATTEMPTS}): {e}",
                            config.port_name
                        );
                        last_error = Some(e);

                        if attempt < MAX_OPEN_PORT_ATTEMPTS {
                            thread::sleep(OPEN_RETRY_DELAY);
                        }
                    },
                }
            }

            Err(last_error.unwrap_or_else(|| {
                Error::TransportUnavailable(format!("cannot open {}", config.port_name))
            }))
        }
    }
}
