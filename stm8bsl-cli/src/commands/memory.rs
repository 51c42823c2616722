//! Memory read command implementation.

use anyhow::{Context, Result};
use console::style;
use std::fmt::Write as _;
use std::path::Path;
use stm8bsl::MemoryImage;

use super::{progress_bar, step, with_session};
use crate::Cli;
use crate::config::Config;

const DUMP_WIDTH: usize = 16;

/// Read command implementation.
pub(crate) fn cmd_read(
    cli: &Cli,
    config: &Config,
    address: u32,
    length: usize,
    output: Option<&Path>,
) -> Result<()> {
    let data = with_session(cli, config, |flasher, _| {
        let pb = progress_bar(cli, length, "Reading");
        let data = flasher
            .read_memory_with_progress(address, length, |done, _| {
                pb.set_position(done as u64);
            })
            .with_context(|| format!("Failed to read {length} bytes at 0x{address:06X}"))?;
        pb.finish_with_message("Read");
        Ok(data)
    })?;

    match output {
        Some(path) => {
            MemoryImage::new(address, data)
                .save(path)
                .with_context(|| format!("Failed to write {}", path.display()))?;
            step(
                cli,
                style("💾").cyan(),
                format!("Saved {length} bytes to {}", path.display()),
            );
        },
        None => print!("{}", hex_dump(address, &data)),
    }
    Ok(())
}

/// Classic 16-bytes-per-line hex dump with an ASCII column.
fn hex_dump(start: u32, data: &[u8]) -> String {
    let mut out = String::new();
    for (i, row) in data.chunks(DUMP_WIDTH).enumerate() {
        let address = start as usize + i * DUMP_WIDTH;
        let _ = write!(out, "{address:06X}:");
        for byte in row {
            let _ = write!(out, " {byte:02X}");
        }
        for _ in row.len()..DUMP_WIDTH {
            out.push_str("   ");
        }
        out.push_str("  |");
        out.extend(row.iter().map(|&b| {
            if b.is_ascii_graphic() || b == b' ' {
                char::from(b)
            } else {
                '.'
            }
        }));
        out.push_str("|\n");
    }
    out
}
