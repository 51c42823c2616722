//! Flash, erase and go command implementations.

use anyhow::{Context, Result};
use console::style;
use std::path::{Path, PathBuf};
use stm8bsl::{DeviceProfile, FLASH_BASE, MemoryImage};

use super::{ensure_not_interrupted, progress_bar, step, with_session};
use crate::config::Config;
use crate::{Cli, CliError};

/// Switches for `flash`, after merging flags with the config file.
#[derive(Debug, Clone, Default)]
pub(crate) struct FlashOptions {
    /// Explicit RAM routines file.
    pub routines: Option<PathBuf>,
    /// Erase touched sectors first.
    pub erase: bool,
    /// Read back and compare.
    pub verify: bool,
    /// Program the BSL option bytes.
    pub enable_bootloader: bool,
    /// Jump to the application when done.
    pub jump: bool,
}

fn load_image(cli: &Cli, path: &Path, what: &str) -> Result<MemoryImage> {
    step(
        cli,
        style("📦").cyan(),
        format!("Loading {what} {}", path.display()),
    );
    let image = MemoryImage::load(path)
        .with_context(|| format!("Failed to load {what} {}", path.display()))?;
    step(
        cli,
        style("ℹ").blue(),
        format!(
            "{} bytes at 0x{:06X}..0x{:06X}",
            image.len(),
            image.start,
            image.end()
        ),
    );
    Ok(image)
}

/// Find the RAM routines for `profile` in the configured directory.
fn routines_from_dir(cli: &Cli, dir: &Path, profile: &DeviceProfile) -> Result<MemoryImage> {
    let file = profile.routines_file().ok_or_else(|| {
        CliError::Usage(format!(
            "No erase/write routines are known for {profile}; pass --routines"
        ))
    })?;
    load_image(cli, &dir.join(file), "routines")
}

/// Flash command implementation.
pub(crate) fn cmd_flash(
    cli: &Cli,
    config: &Config,
    firmware: &Path,
    options: &FlashOptions,
) -> Result<()> {
    let image = load_image(cli, firmware, "firmware")?;
    let explicit_routines = options
        .routines
        .as_deref()
        .map(|path| load_image(cli, path, "routines"))
        .transpose()?;

    with_session(cli, config, |flasher, profile| {
        let routines = match (explicit_routines, &config.flash.routines_dir) {
            (Some(routines), _) => Some(routines),
            (None, Some(dir)) => Some(routines_from_dir(cli, dir, &profile)?),
            (None, None) => None,
        };

        match routines {
            Some(routines) => {
                step(
                    cli,
                    style("⬆").cyan(),
                    format!("Uploading RAM routines to 0x{:06X}", routines.start),
                );
                flasher
                    .write_memory(routines.start, &routines.data)
                    .context("Failed to upload erase/write routines")?;
            },
            None => {
                if let Some(file) = profile.routines_file() {
                    step(
                        cli,
                        style("⚠").yellow(),
                        format!("No RAM routines given; this device expects {file}"),
                    );
                }
            },
        }
        ensure_not_interrupted()?;

        if options.erase {
            step(cli, style("🗑").red(), "Erasing sectors...");
            let erased = flasher
                .erase_range(image.start, image.len())
                .context("Erase failed")?;
            step(cli, style("✓").green(), format!("Erased {erased} sectors"));
        }

        let pb = progress_bar(cli, image.len(), "Writing");
        flasher
            .write_memory_with_progress(image.start, &image.data, |done, _| {
                pb.set_position(done as u64);
            })
            .context("Write failed")?;
        pb.finish_with_message("Written");
        ensure_not_interrupted()?;

        if options.verify {
            let pb = progress_bar(cli, image.len(), "Verifying");
            flasher
                .verify(image.start, &image.data, |done, _| {
                    pb.set_position(done as u64);
                })
                .context("Verification failed")?;
            pb.finish_with_message("Verified");
            step(cli, style("✓").green(), "Verification passed");
        }

        if options.enable_bootloader {
            step(cli, style("🔒").cyan(), "Enabling ROM bootloader option bytes");
            flasher
                .enable_bootloader()
                .context("Failed to program option bytes")?;
        }

        if options.jump {
            flasher
                .jump_to(FLASH_BASE)
                .context("Failed to start the application")?;
            step(
                cli,
                style("🚀").cyan(),
                format!("Started application at 0x{FLASH_BASE:06X}"),
            );
        }
        Ok(())
    })?;

    if !cli.quiet {
        eprintln!("\n{} Flash completed", style("🎉").green().bold());
    }
    Ok(())
}

/// Erase command implementation.
pub(crate) fn cmd_erase(cli: &Cli, config: &Config, addresses: &[u32]) -> Result<()> {
    with_session(cli, config, |flasher, profile| {
        for &addr in addresses {
            ensure_not_interrupted()?;
            let sector = profile.sector_of(addr).ok_or_else(|| {
                CliError::Usage(format!(
                    "0x{addr:06X} is outside the {} flash",
                    profile.flash_size
                ))
            })?;
            step(
                cli,
                style("🗑").red(),
                format!("Erasing sector {sector} (0x{addr:06X})"),
            );
            flasher
                .flash_erase(addr)
                .with_context(|| format!("Failed to erase sector {sector}"))?;
        }
        Ok(())
    })?;

    if !cli.quiet {
        eprintln!(
            "\n{} Erased {} sector(s)",
            style("✓").green().bold(),
            addresses.len()
        );
    }
    Ok(())
}

/// Go command implementation.
pub(crate) fn cmd_go(cli: &Cli, config: &Config, address: u32) -> Result<()> {
    with_session(cli, config, |flasher, _| {
        flasher
            .jump_to(address)
            .with_context(|| format!("Failed to jump to 0x{address:06X}"))
    })?;

    step(
        cli,
        style("🚀").cyan(),
        format!("Started execution at 0x{address:06X}"),
    );
    Ok(())
}
