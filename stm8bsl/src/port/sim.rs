//! In-memory STM8 ROM bootloader used by the engine tests.
//!
//! Bytes written to the simulator are decoded frame by frame exactly as the
//! device would, and the replies are queued for the next `read`. Reading an
//! empty queue reports `TimedOut`, like a silent serial line.

use std::collections::{HashMap, VecDeque};
use std::io::{self, Read, Write};
use std::time::Duration;

use crate::error::Result;
use crate::port::Port;
use crate::protocol::{ACK, Command, NACK, SYNC, xor_checksum};
use crate::target::{FLASH_BASE, FlashSize, SECTOR_SIZE};

/// Protocol stage at which a fault can be injected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum Stage {
    /// Command byte pair.
    Command(Command),
    /// Address frame following a command.
    Address(Command),
    /// Length, data, or sector frame following the address.
    Data(Command),
}

#[derive(Debug, Clone, Copy)]
enum Expect {
    Command,
    Address(Command),
    ReadLength(u32),
    WriteData(u32),
    EraseSectors,
}

pub(crate) struct SimulatedBsl {
    flash_size: FlashSize,
    version: u8,
    echoed_codes: [u8; 5],
    memory: HashMap<u32, u8>,
    synced: bool,
    silent_syncs: usize,
    sync_reply: Option<u8>,
    faults: HashMap<Stage, (usize, u8)>,
    silences: HashMap<Stage, usize>,
    expect: Expect,
    pending: Vec<u8>,
    replies: VecDeque<u8>,
    refuse_writes: bool,
    timeout: Duration,
    baud_rate: u32,

    pub(crate) sync_bytes: usize,
    pub(crate) written: Vec<u8>,
    pub(crate) erased_sectors: Vec<u8>,
    pub(crate) jumped_to: Option<u32>,
    pub(crate) timeouts: Vec<Duration>,
}

impl SimulatedBsl {
    pub(crate) fn new(flash_size: FlashSize, version: u8) -> Self {
        Self {
            flash_size,
            version,
            echoed_codes: Command::GET_ORDER.map(Command::code),
            memory: HashMap::new(),
            synced: false,
            silent_syncs: 0,
            sync_reply: None,
            faults: HashMap::new(),
            silences: HashMap::new(),
            expect: Expect::Command,
            pending: Vec::new(),
            replies: VecDeque::new(),
            refuse_writes: false,
            timeout: Duration::from_millis(1000),
            baud_rate: 115200,
            sync_bytes: 0,
            written: Vec::new(),
            erased_sectors: Vec::new(),
            jumped_to: None,
            timeouts: Vec::new(),
        }
    }

    /// Ignore the first `count` SYNC bytes.
    pub(crate) fn with_silent_syncs(mut self, count: usize) -> Self {
        self.silent_syncs = count;
        self
    }

    /// Answer every SYNC with `byte` instead of ACK/NACK.
    pub(crate) fn with_sync_reply(mut self, byte: u8) -> Self {
        self.sync_reply = Some(byte);
        self
    }

    /// Start out already synchronized, so SYNC is answered with NACK.
    pub(crate) fn already_synced(mut self) -> Self {
        self.synced = true;
        self
    }

    /// Replace the command codes echoed by GET.
    pub(crate) fn with_echoed_codes(mut self, codes: [u8; 5]) -> Self {
        self.echoed_codes = codes;
        self
    }

    /// Answer the `occurrence`-th (0-based) pass through `stage` with `reply`.
    pub(crate) fn with_fault(mut self, stage: Stage, occurrence: usize, reply: u8) -> Self {
        self.faults.insert(stage, (occurrence, reply));
        self
    }

    /// Leave the `occurrence`-th (0-based) pass through `stage` unanswered.
    pub(crate) fn with_silence(mut self, stage: Stage, occurrence: usize) -> Self {
        self.silences.insert(stage, occurrence);
        self
    }

    /// Accept no bytes on write, as a port that went away would.
    pub(crate) fn refuse_writes(&mut self) {
        self.refuse_writes = true;
    }

    pub(crate) fn poke(&mut self, addr: u32, bytes: &[u8]) {
        for (i, b) in bytes.iter().enumerate() {
            self.memory.insert(addr + i as u32, *b);
        }
    }

    pub(crate) fn peek(&self, addr: u32, len: usize) -> Vec<u8> {
        (0..len)
            .map(|i| self.memory.get(&(addr + i as u32)).copied().unwrap_or(0))
            .collect()
    }

    fn readable(&self, addr: u32) -> bool {
        addr < self.flash_size.flash_end()
    }

    /// Reply for `stage`: the injected fault byte when one is due, `None`
    /// when the device should stay silent.
    fn answer(&mut self, stage: Stage) -> Option<u8> {
        let mut silent = false;
        if let Some(remaining) = self.silences.get_mut(&stage) {
            if *remaining == 0 {
                self.silences.remove(&stage);
                silent = true;
            } else {
                *remaining -= 1;
            }
        }

        let mut reply = ACK;
        if let Some((remaining, byte)) = self.faults.get_mut(&stage) {
            if *remaining == 0 {
                reply = *byte;
                self.faults.remove(&stage);
            } else {
                *remaining -= 1;
            }
        }

        (!silent).then_some(reply)
    }

    fn reply(&mut self, bytes: &[u8]) {
        self.replies.extend(bytes);
    }

    /// Reply to a stage; silence or anything other than ACK aborts back to
    /// command wait.
    fn step(&mut self, stage: Stage, next: Expect) -> bool {
        match self.answer(stage) {
            Some(ACK) => {
                self.reply(&[ACK]);
                self.expect = next;
                true
            },
            Some(byte) => {
                self.reply(&[byte]);
                self.expect = Expect::Command;
                false
            },
            None => {
                self.expect = Expect::Command;
                false
            },
        }
    }

    fn process(&mut self) {
        loop {
            let consumed = match self.expect {
                Expect::Command => self.on_command(),
                Expect::Address(cmd) => self.on_address(cmd),
                Expect::ReadLength(addr) => self.on_read_length(addr),
                Expect::WriteData(addr) => self.on_write_data(addr),
                Expect::EraseSectors => self.on_erase(),
            };
            match consumed {
                Some(n) => {
                    self.pending.drain(..n);
                },
                None => break,
            }
        }
    }

    fn on_command(&mut self) -> Option<usize> {
        let first = *self.pending.first()?;
        if first == SYNC {
            self.sync_bytes += 1;
            if self.silent_syncs > 0 {
                self.silent_syncs -= 1;
            } else if let Some(byte) = self.sync_reply {
                self.reply(&[byte]);
            } else {
                let byte = if self.synced { NACK } else { ACK };
                self.synced = true;
                self.reply(&[byte]);
            }
            return Some(1);
        }
        if self.pending.len() < 2 {
            return None;
        }
        let (code, complement) = (self.pending[0], self.pending[1]);
        let command = Command::GET_ORDER
            .into_iter()
            .find(|c| c.code() == code && c.complement() == complement);
        let Some(command) = command else {
            self.reply(&[NACK]);
            return Some(2);
        };

        match command {
            Command::Get => {
                if self.step(Stage::Command(command), Expect::Command) {
                    let count = self.echoed_codes.len() as u8;
                    self.reply(&[count, self.version]);
                    let codes = self.echoed_codes;
                    self.reply(&codes);
                    self.reply(&[ACK]);
                }
            },
            Command::Erase => {
                self.step(Stage::Command(command), Expect::EraseSectors);
            },
            _ => {
                self.step(Stage::Command(command), Expect::Address(command));
            },
        }
        Some(2)
    }

    fn on_address(&mut self, cmd: Command) -> Option<usize> {
        if self.pending.len() < 5 {
            return None;
        }
        let frame = &self.pending[..5];
        let addr = u32::from_be_bytes([frame[0], frame[1], frame[2], frame[3]]);
        if xor_checksum(frame) != 0 || !self.readable(addr) {
            self.reply(&[NACK]);
            self.expect = Expect::Command;
            return Some(5);
        }

        let next = match cmd {
            Command::Read => Expect::ReadLength(addr),
            Command::Write => Expect::WriteData(addr),
            _ => Expect::Command,
        };
        if self.step(Stage::Address(cmd), next) && cmd == Command::Go {
            self.jumped_to = Some(addr);
        }
        Some(5)
    }

    fn on_read_length(&mut self, addr: u32) -> Option<usize> {
        if self.pending.len() < 2 {
            return None;
        }
        let (n, complement) = (self.pending[0], self.pending[1]);
        if n != !complement {
            self.reply(&[NACK]);
            self.expect = Expect::Command;
            return Some(2);
        }
        if self.step(Stage::Data(Command::Read), Expect::Command) {
            let data = self.peek(addr, usize::from(n) + 1);
            self.reply(&data);
        }
        Some(2)
    }

    fn on_write_data(&mut self, addr: u32) -> Option<usize> {
        let n = usize::from(*self.pending.first()?) + 1;
        if self.pending.len() < n + 2 {
            return None;
        }
        let frame = self.pending[..n + 2].to_vec();
        if xor_checksum(&frame) != 0 || n > 128 {
            self.reply(&[NACK]);
            self.expect = Expect::Command;
            return Some(n + 2);
        }
        if self.step(Stage::Data(Command::Write), Expect::Command) {
            self.poke(addr, &frame[1..=n]);
        }
        Some(n + 2)
    }

    fn on_erase(&mut self) -> Option<usize> {
        let count = usize::from(*self.pending.first()?) + 1;
        if self.pending.len() < count + 2 {
            return None;
        }
        let frame = self.pending[..count + 2].to_vec();
        if xor_checksum(&frame) != 0 {
            self.reply(&[NACK]);
            self.expect = Expect::Command;
            return Some(count + 2);
        }
        if self.step(Stage::Data(Command::Erase), Expect::Command) {
            for &sector in &frame[1..=count] {
                self.erased_sectors.push(sector);
                let start = FLASH_BASE + u32::from(sector) * SECTOR_SIZE;
                for addr in start..start + SECTOR_SIZE {
                    self.memory.remove(&addr);
                }
            }
        }
        Some(count + 2)
    }
}

impl Read for SimulatedBsl {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.replies.is_empty() {
            return Err(io::Error::new(io::ErrorKind::TimedOut, "no data"));
        }
        let n = buf.len().min(self.replies.len());
        for (slot, byte) in buf.iter_mut().zip(self.replies.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }
}

impl Write for SimulatedBsl {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.refuse_writes {
            return Ok(0);
        }
        self.written.extend_from_slice(buf);
        self.pending.extend_from_slice(buf);
        self.process();
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Port for SimulatedBsl {
    fn set_timeout(&mut self, timeout: Duration) -> Result<()> {
        self.timeout = timeout;
        self.timeouts.push(timeout);
        Ok(())
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    fn set_baud_rate(&mut self, baud_rate: u32) -> Result<()> {
        self.baud_rate = baud_rate;
        Ok(())
    }

    fn baud_rate(&self) -> u32 {
        self.baud_rate
    }

    fn clear_buffers(&mut self) -> Result<()> {
        self.replies.clear();
        Ok(())
    }

    fn name(&self) -> &str {
        "sim"
    }

    fn set_dtr(&mut self, _level: bool) -> Result<()> {
        Ok(())
    }

    fn set_rts(&mut self, _level: bool) -> Result<()> {
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        self.refuse_writes = true;
        Ok(())
    }
}
