//! Interactive serial port selection.
//!
//! A port is chosen from, in order:
//! - the `--port` flag (or `STM8BSL_PORT`)
//! - the `[connection] serial` config entry
//! - the single detected USB-UART bridge
//! - an interactive prompt listing the candidates

use {
    crate::{CliError, config::Config},
    anyhow::Result,
    console::style,
    dialoguer::{Confirm, Error as DialoguerError, Select, theme::ColorfulTheme},
    log::{debug, info},
    std::{cmp::Ordering, io::IsTerminal},
    stm8bsl::{DetectedPort, detect_ports},
};

/// Options for serial port selection.
#[derive(Debug, Clone, Default)]
pub struct SerialOptions {
    /// Explicit port specified via CLI.
    pub port: Option<String>,
    /// Non-interactive mode (fail if the choice is ambiguous).
    pub non_interactive: bool,
    /// Force confirmation even for a single recognized port.
    pub confirm_port: bool,
}

/// Result of port selection.
pub struct SelectedPort {
    /// The selected port info.
    pub port: DetectedPort,
    /// Whether this port matched a known or configured adapter.
    pub is_known: bool,
}

fn usage_err(message: &str) -> anyhow::Error {
    CliError::Usage(message.to_string()).into()
}

fn cancelled() -> anyhow::Error {
    CliError::Cancelled("Port selection cancelled".to_string()).into()
}

fn select_non_interactive_port(
    selection_ports: Vec<DetectedPort>,
    config: &Config,
) -> Result<SelectedPort> {
    let mut ports = selection_ports.into_iter();
    match (ports.next(), ports.next()) {
        (Some(port), None) => Ok(SelectedPort {
            is_known: is_known_device(&port, config),
            port,
        }),
        (Some(_), Some(_)) => Err(usage_err(
            "Found multiple serial ports; pass --port to choose one",
        )),
        (None, _) => Err(usage_err("No serial ports available")),
    }
}

/// Select a serial port interactively or automatically.
pub fn select_serial_port(options: &SerialOptions, config: &Config) -> Result<SelectedPort> {
    if let Some(port_name) = &options.port {
        return Ok(find_port_by_name(port_name, config));
    }

    if let Some(port_name) = &config.connection.serial {
        debug!("Using port from config: {port_name}");
        return Ok(find_port_by_name(port_name, config));
    }

    let ports = detect_ports();
    if ports.is_empty() {
        return Err(usage_err(
            "No serial ports found; connect the adapter or pass --port",
        ));
    }

    // Known adapters first; fall back to everything when none is recognized
    let known_ports: Vec<DetectedPort> = ports
        .iter()
        .filter(|p| is_known_device(p, config))
        .cloned()
        .collect();
    let selection_ports = if known_ports.is_empty() {
        ports
    } else {
        known_ports
    };

    if options.non_interactive {
        return select_non_interactive_port(selection_ports, config);
    }

    match selection_ports.len().cmp(&1) {
        Ordering::Greater => {
            ensure_interactive_terminal()?;
            select_port_interactive(selection_ports, config)
        },
        Ordering::Equal => {
            let Some(port) = selection_ports.into_iter().next() else {
                return Err(usage_err("No serial ports available"));
            };
            let is_known = is_known_device(&port, config);

            if is_known && !options.confirm_port {
                info!("Auto-selected port: {}", port.describe());
                Ok(SelectedPort { port, is_known })
            } else {
                ensure_interactive_terminal()?;
                confirm_single_port(port)
            }
        },
        Ordering::Less => Err(usage_err("No serial ports available")),
    }
}

fn ensure_interactive_terminal() -> Result<()> {
    if std::io::stdin().is_terminal() && std::io::stderr().is_terminal() {
        Ok(())
    } else {
        Err(usage_err(
            "Port selection needs an interactive terminal; pass --port",
        ))
    }
}

fn map_prompt_error(err: DialoguerError) -> anyhow::Error {
    match err {
        DialoguerError::IO(io_err) => {
            if io_err.kind() == std::io::ErrorKind::Interrupted {
                cancelled()
            } else {
                usage_err(&format!("Port prompt failed: {io_err}"))
            }
        },
    }
}

/// Find a port by name, keeping its USB metadata when it is present.
fn find_port_by_name(name: &str, config: &Config) -> SelectedPort {
    let ports = detect_ports();

    let found = ports
        .iter()
        .find(|p| p.name == name)
        .or_else(|| ports.iter().find(|p| p.name.eq_ignore_ascii_case(name)));

    match found {
        Some(port) => SelectedPort {
            is_known: is_known_device(port, config),
            port: port.clone(),
        },
        // Explicitly named ports are used even when enumeration misses them
        None => SelectedPort {
            port: DetectedPort::plain(name),
            is_known: false,
        },
    }
}

/// Check if a port is a built-in bridge or listed under `[[usb_device]]`.
fn is_known_device(port: &DetectedPort, config: &Config) -> bool {
    if port.is_known_bridge() {
        return true;
    }
    match (port.vid, port.pid) {
        (Some(vid), Some(pid)) => config.is_configured_device(vid, pid),
        _ => false,
    }
}

/// Interactive port selection.
fn select_port_interactive(mut ports: Vec<DetectedPort>, config: &Config) -> Result<SelectedPort> {
    eprintln!(
        "{} Found {} serial ports",
        style("ℹ").blue(),
        ports.len()
    );

    ports.sort_by_key(|p| !is_known_device(p, config));

    let term_width = console::Term::stderr().size().1 as usize;
    let max_item_width = term_width.saturating_sub(4);
    let port_names: Vec<String> = ports
        .iter()
        .map(|port| {
            let label = if is_known_device(port, config) {
                style(port.describe()).bold().to_string()
            } else {
                port.describe()
            };
            console::truncate_str(&label, max_item_width, "\u{2026}").into_owned()
        })
        .collect();

    let selection = Select::with_theme(&ColorfulTheme::default())
        .with_prompt("Select the serial port wired to the STM8 UART")
        .items(&port_names)
        .default(0)
        .interact_opt()
        .map_err(map_prompt_error)?;

    match selection {
        Some(index) => {
            let port = ports
                .into_iter()
                .nth(index)
                .ok_or_else(|| anyhow::anyhow!("Invalid port index: {index}"))?;
            let is_known = is_known_device(&port, config);
            Ok(SelectedPort { port, is_known })
        },
        None => Err(cancelled()),
    }
}

/// Confirm use of a single port.
fn confirm_single_port(port: DetectedPort) -> Result<SelectedPort> {
    let confirmed = Confirm::with_theme(&ColorfulTheme::default())
        .with_prompt(format!("Use {}?", port.describe()))
        .default(true)
        .interact_opt()
        .map_err(map_prompt_error)?
        .unwrap_or(false);

    if confirmed {
        let is_known = port.is_known_bridge();
        Ok(SelectedPort { port, is_known })
    } else {
        Err(cancelled())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::UsbDevice;
    use stm8bsl::BridgeKind;

    fn usb_port(name: &str, bridge: BridgeKind, vid: u16, pid: u16) -> DetectedPort {
        DetectedPort {
            bridge,
            vid: Some(vid),
            pid: Some(pid),
            ..DetectedPort::plain(name)
        }
    }

    fn assert_usage_error(result: Result<SelectedPort>) {
        let Err(err) = result else {
            panic!("expected an error");
        };
        assert!(matches!(
            err.downcast_ref::<CliError>(),
            Some(CliError::Usage(_))
        ));
    }

    #[test]
    fn test_serial_options_default() {
        let options = SerialOptions::default();
        assert!(options.port.is_none());
        assert!(!options.non_interactive);
        assert!(!options.confirm_port);
    }

    #[test]
    fn test_is_known_device_builtin() {
        let port = usb_port("/dev/ttyUSB0", BridgeKind::Ch340, 0x1A86, 0x7523);
        assert!(is_known_device(&port, &Config::default()));
    }

    #[test]
    fn test_is_known_device_unknown() {
        let port = usb_port("/dev/ttyUSB0", BridgeKind::Unknown, 0x9999, 0x9999);
        assert!(!is_known_device(&port, &Config::default()));
    }

    #[test]
    fn test_is_known_device_from_config() {
        let port = usb_port("/dev/ttyACM0", BridgeKind::Unknown, 0xABCD, 0x1234);
        let mut config = Config::default();
        config.usb_device.push(UsbDevice {
            vid: 0xABCD,
            pid: 0x1234,
        });
        assert!(is_known_device(&port, &config));
    }

    #[test]
    fn test_is_known_device_no_vid_pid() {
        let port = DetectedPort::plain("/dev/ttyS0");
        assert!(!is_known_device(&port, &Config::default()));
    }

    #[test]
    fn test_explicit_port_is_used_verbatim() {
        let options = SerialOptions {
            port: Some("/dev/stm8-does-not-exist".to_string()),
            ..Default::default()
        };
        let selected = select_serial_port(&options, &Config::default()).unwrap();
        assert_eq!(selected.port.name, "/dev/stm8-does-not-exist");
        assert!(!selected.is_known);
    }

    #[test]
    fn test_configured_port_is_used() {
        let mut config = Config::default();
        config.connection.serial = Some("/dev/stm8-configured".to_string());
        let selected = select_serial_port(&SerialOptions::default(), &config).unwrap();
        assert_eq!(selected.port.name, "/dev/stm8-configured");
    }

    #[test]
    fn test_select_non_interactive_multiple_ports_returns_usage_error() {
        let ports = vec![
            DetectedPort::plain("/dev/ttyUSB0"),
            DetectedPort::plain("/dev/ttyUSB1"),
        ];
        assert_usage_error(select_non_interactive_port(ports, &Config::default()));
    }

    #[test]
    fn test_select_non_interactive_no_ports_returns_usage_error() {
        assert_usage_error(select_non_interactive_port(vec![], &Config::default()));
    }

    #[test]
    fn test_select_non_interactive_single_port() {
        let ports = vec![usb_port(
            "/dev/ttyUSB0",
            BridgeKind::Cp210x,
            0x10C4,
            0xEA60,
        )];
        let selected = select_non_interactive_port(ports, &Config::default()).unwrap();
        assert_eq!(selected.port.name, "/dev/ttyUSB0");
        assert!(selected.is_known);
    }
}
