//! Subcommand implementations and the session plumbing they share.

pub(crate) mod flash;
pub(crate) mod info;
pub(crate) mod memory;

use anyhow::{Context, Result};
use console::style;
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use log::debug;
use stm8bsl::{DeviceProfile, NativePort, SerialConfig, Stm8Flasher};

use crate::config::Config;
use crate::{Cli, CliError, get_port, resolve_baud, resolve_parity, use_fancy_output, was_interrupted};

pub(crate) fn ensure_not_interrupted() -> Result<()> {
    if was_interrupted() {
        Err(CliError::Cancelled("Interrupted".to_string()).into())
    } else {
        Ok(())
    }
}

/// Print a status line unless `--quiet`.
pub(crate) fn step(cli: &Cli, icon: console::StyledObject<&str>, message: impl std::fmt::Display) {
    if !cli.quiet {
        eprintln!("{icon} {message}");
    }
}

/// Open the port, synchronize, identify the device and run `op`.
///
/// The port is closed afterwards whether `op` succeeds or not.
pub(crate) fn with_session<T>(
    cli: &Cli,
    config: &Config,
    op: impl FnOnce(&mut Stm8Flasher<NativePort>, DeviceProfile) -> Result<T>,
) -> Result<T> {
    let port = get_port(cli, config)?;
    let baud = resolve_baud(cli, config);
    step(
        cli,
        style("🔌").cyan(),
        format!("Using port {port} @ {baud} baud"),
    );

    let serial = SerialConfig::new(&port, baud).with_parity(resolve_parity(cli, config));
    let mut flasher = Stm8Flasher::open(&serial)
        .with_context(|| format!("Failed to open {port}"))?
        .with_interrupt_checker(was_interrupted);
    ensure_not_interrupted()?;

    step(cli, style("⏳").yellow(), "Waiting for bootloader...");
    let result = flasher
        .connect()
        .context("Could not reach the bootloader (is the device in BSL mode?)")
        .and_then(|profile| {
            step(cli, style("✓").green(), format!("Connected: {profile}"));
            op(&mut flasher, profile)
        });

    if let Err(e) = flasher.close() {
        debug!("Failed to close {port}: {e}");
    }
    result
}

/// Byte-count progress bar on stderr, hidden when quiet or not a TTY.
pub(crate) fn progress_bar(cli: &Cli, total: usize, message: &'static str) -> ProgressBar {
    if cli.quiet || !use_fancy_output() {
        return ProgressBar::hidden();
    }

    let pb = ProgressBar::new(total as u64);
    if let Ok(bar_style) = ProgressStyle::default_bar()
        .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {bytes}/{total_bytes} {msg}")
    {
        pb.set_style(bar_style.progress_chars("#>-"));
    }
    pb.set_draw_target(ProgressDrawTarget::stderr());
    pb.set_message(message);
    pb
}
