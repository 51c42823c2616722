//! Device info and port listing command implementations.

use {
    super::with_session,
    crate::{Cli, config::Config},
    anyhow::Result,
    console::style,
    stm8bsl::{DetectedPort, DeviceProfile, FLASH_BASE, auto_detect_port, detect_ports},
};

/// List ports command implementation.
pub(crate) fn cmd_list_ports(json: bool) -> Result<()> {
    let detected = detect_ports();

    if json {
        println!("{}", serde_json::to_string_pretty(&ports_json(&detected)?)?);
        return Ok(());
    }

    eprintln!("{}", style("Available serial ports:").bold().underlined());

    if detected.is_empty() {
        eprintln!("  {}", style("No serial ports found").dim());
        return Ok(());
    }

    for port in &detected {
        let bridge = if port.bridge.is_known() {
            format!(" [{}]", style(port.bridge.name()).yellow())
        } else {
            String::new()
        };
        let vid_pid = match (port.vid, port.pid) {
            (Some(vid), Some(pid)) => format!(" ({vid:04X}:{pid:04X})"),
            _ => String::new(),
        };
        let product = port
            .product
            .as_deref()
            .map(|p| format!(" - {}", style(p).dim()))
            .unwrap_or_default();

        eprintln!(
            "  {} {}{bridge}{vid_pid}{product}",
            style("•").green(),
            style(&port.name).cyan(),
        );
    }

    if let Ok(auto_port) = auto_detect_port() {
        eprintln!(
            "\n{} Auto-detected: {}",
            style("→").green().bold(),
            style(&auto_port.name).cyan().bold()
        );
    }

    Ok(())
}

fn ports_json(ports: &[DetectedPort]) -> Result<serde_json::Value> {
    Ok(serde_json::json!({
        "ok": true,
        "data": {
            "ports": serde_json::to_value(ports)?,
        }
    }))
}

/// Info command implementation.
pub(crate) fn cmd_info(cli: &Cli, config: &Config, json: bool) -> Result<()> {
    let profile = with_session(cli, config, |_, profile| Ok(profile))?;

    if json {
        println!("{}", serde_json::to_string_pretty(&profile_json(&profile))?);
        return Ok(());
    }

    eprintln!("\n{}", style("Device").bold().underlined());
    eprintln!(
        "  {:<18} {} ({} sectors of 1 KB)",
        "Flash size:",
        style(profile.flash_size).cyan(),
        profile.flash_size.sector_count()
    );
    eprintln!(
        "  {:<18} 0x{FLASH_BASE:06X}..0x{:06X}",
        "Flash range:",
        profile.flash_size.flash_end()
    );
    eprintln!(
        "  {:<18} {}",
        "Bootloader:",
        style(format!("v{}", profile.version)).cyan()
    );
    match profile.routines_file() {
        Some(file) => eprintln!("  {:<18} {file}", "RAM routines:"),
        None => eprintln!(
            "  {:<18} {}",
            "RAM routines:",
            style("none known for this device").yellow()
        ),
    }

    Ok(())
}

fn profile_json(profile: &DeviceProfile) -> serde_json::Value {
    serde_json::json!({
        "ok": true,
        "data": {
            "flash_size_kb": profile.flash_size_kb(),
            "flash_start": FLASH_BASE,
            "flash_end": profile.flash_size.flash_end(),
            "sectors": profile.flash_size.sector_count(),
            "bsl_version": profile.version.to_string(),
            "routines_file": profile.routines_file(),
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use stm8bsl::{BridgeKind, BslVersion, FlashSize};

    #[test]
    fn test_ports_json_shape() {
        let ports = vec![
            DetectedPort {
                bridge: BridgeKind::Ch340,
                vid: Some(0x1A86),
                pid: Some(0x7523),
                ..DetectedPort::plain("/dev/ttyUSB0")
            },
            DetectedPort::plain("/dev/ttyS0"),
        ];
        let value = ports_json(&ports).unwrap();
        assert_eq!(value["ok"], true);
        let listed = value["data"]["ports"].as_array().unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0]["name"], "/dev/ttyUSB0");
        assert_eq!(listed[0]["bridge"], "ch340");
        assert_eq!(listed[0]["vid"], 0x1A86);
        assert!(listed[1]["vid"].is_null());
    }

    #[test]
    fn test_profile_json_with_routines() {
        let profile = DeviceProfile {
            flash_size: FlashSize::Kb32,
            version: BslVersion::from_byte(0x13),
        };
        let value = profile_json(&profile);
        let data = &value["data"];
        assert_eq!(data["flash_size_kb"], 32);
        assert_eq!(data["flash_start"], 0x8000);
        assert_eq!(data["flash_end"], 0x10000);
        assert_eq!(data["sectors"], 32);
        assert_eq!(data["bsl_version"], "1.3");
        assert_eq!(data["routines_file"], "E_W_ROUTINEs_32K_ver_1.3.s19");
    }

    #[test]
    fn test_profile_json_without_routines() {
        let profile = DeviceProfile {
            flash_size: FlashSize::Kb8,
            version: BslVersion::from_byte(0x13),
        };
        assert!(profile_json(&profile)["data"]["routines_file"].is_null());
    }
}
