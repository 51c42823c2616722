//! stm8bsl CLI - Command-line tool for programming STM8 devices through the
//! ROM serial bootloader.
//!
//! ## Features
//!
//! - Flash S-record, Intel HEX and raw binary images
//! - Read memory back to a file or a hex dump
//! - Erase flash sectors
//! - Start the application (GO)
//! - Interactive serial port selection
//! - Environment variable and config file support

use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use console::style;
use env_logger::Env;
use log::debug;
use std::env;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};

mod commands;
mod config;
mod serial;

use config::Config;
use serial::{SerialOptions, select_serial_port};

/// Whether stderr is a terminal (set once at startup).
static STDERR_IS_TTY: AtomicBool = AtomicBool::new(true);

/// Set by the Ctrl-C handler.
static INTERRUPTED: AtomicBool = AtomicBool::new(false);

/// Baud rate used when neither the command line nor a config file sets one.
const DEFAULT_BAUD: u32 = 115_200;

/// Check if emoji/animations should be used (TTY and colors enabled).
fn use_fancy_output() -> bool {
    STDERR_IS_TTY.load(Ordering::Relaxed) && console::colors_enabled_stderr()
}

/// Whether Ctrl-C was pressed.
fn was_interrupted() -> bool {
    INTERRUPTED.load(Ordering::Relaxed)
}

/// Errors that map to a dedicated exit code.
#[derive(Debug, thiserror::Error)]
enum CliError {
    /// Bad invocation or missing setup (exit code 2).
    #[error("{0}")]
    Usage(String),
    /// The user cancelled (exit code 130).
    #[error("{0}")]
    Cancelled(String),
}

impl CliError {
    fn exit_code(&self) -> u8 {
        match self {
            Self::Usage(_) => 2,
            Self::Cancelled(_) => 130,
        }
    }
}

/// stm8bsl - Program STM8 devices through the ROM serial bootloader.
///
/// Environment variables:
///   STM8BSL_PORT              - Default serial port
///   STM8BSL_BAUD              - Default baud rate (default: 115200)
///   STM8BSL_NON_INTERACTIVE   - Non-interactive mode (disable prompts)
#[derive(Parser)]
#[command(name = "stm8bsl")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Serial port to use (auto-detected if not specified).
    #[arg(short, long, global = true, env = "STM8BSL_PORT")]
    port: Option<String>,

    /// Baud rate [default: 115200].
    #[arg(short, long, global = true, env = "STM8BSL_BAUD")]
    baud: Option<u32>,

    /// UART parity; `none` for single-wire reply mode [default: even].
    #[arg(long, global = true, value_enum)]
    parity: Option<ParityArg>,

    /// Verbose output level (-v, -vv for increasing detail).
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Quiet mode (suppress non-essential output).
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Non-interactive mode (fail instead of prompting).
    #[arg(long, global = true, env = "STM8BSL_NON_INTERACTIVE")]
    non_interactive: bool,

    /// Confirm port selection even for auto-detected ports.
    #[arg(long, global = true)]
    confirm_port: bool,

    /// Path to a configuration file.
    #[arg(long = "config", global = true, value_name = "PATH")]
    config_path: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

/// UART parity choices.
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum ParityArg {
    /// Even parity (standard BSL frame format).
    Even,
    /// No parity (single-wire reply mode).
    None,
    /// Odd parity.
    Odd,
}

impl From<ParityArg> for stm8bsl::Parity {
    fn from(parity: ParityArg) -> Self {
        match parity {
            ParityArg::Even => Self::Even,
            ParityArg::None => Self::None,
            ParityArg::Odd => Self::Odd,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Flash a firmware image (.s19, .hex or .bin).
    Flash {
        /// Image file to write.
        firmware: PathBuf,

        /// Erase/write RAM routines to upload first.
        #[arg(long, value_name = "FILE")]
        routines: Option<PathBuf>,

        /// Erase every sector the image touches before writing.
        #[arg(long)]
        erase: bool,

        /// Read the image back and compare after writing.
        #[arg(long)]
        verify: bool,

        /// Leave the option bytes untouched.
        #[arg(long)]
        no_enable_bsl: bool,

        /// Stay in the bootloader after writing.
        #[arg(long)]
        no_jump: bool,
    },

    /// Read device memory.
    Read {
        /// Start address (hex).
        #[arg(short, long, value_parser = parse_hex_u32)]
        address: u32,

        /// Number of bytes to read.
        #[arg(short, long, value_parser = parse_size)]
        length: usize,

        /// Output file (.hex/.ihx, .s19 or raw binary); hex dump when omitted.
        #[arg(short, long, value_name = "FILE")]
        output: Option<PathBuf>,
    },

    /// Erase the flash sectors holding the given addresses.
    Erase {
        /// Addresses (hex) inside the sectors to erase.
        #[arg(required = true, value_parser = parse_hex_u32)]
        addresses: Vec<u32>,
    },

    /// Start execution at an address.
    Go {
        /// Entry address (hex).
        #[arg(value_parser = parse_hex_u32, default_value = "0x8000")]
        address: u32,
    },

    /// Show the connected device's flash size and bootloader version.
    Info {
        /// Output in JSON format.
        #[arg(long)]
        json: bool,
    },

    /// List available serial ports.
    ListPorts {
        /// Output in JSON format.
        #[arg(long)]
        json: bool,
    },
}

/// Parse hexadecimal address (supports 0x prefix and underscores).
fn parse_hex_u32(s: &str) -> Result<u32, String> {
    let s = s.trim();
    let s = s.trim_start_matches("0x").trim_start_matches("0X");
    let s: String = s.chars().filter(|c| *c != '_').collect();
    u32::from_str_radix(&s, 16).map_err(|e| format!("Invalid hex address: {e}"))
}

/// Parse a byte count: decimal, or hex with a 0x prefix.
fn parse_size(s: &str) -> Result<usize, String> {
    let s = s.trim();
    let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => usize::from_str_radix(hex, 16),
        None => s.parse(),
    };
    match parsed {
        Ok(0) => Err("Length must be at least 1".to_string()),
        Ok(n) => Ok(n),
        Err(e) => Err(format!("Invalid length: {e}")),
    }
}

fn main() -> ExitCode {
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("{} {err:#}", style("Error:").red().bold());
            ExitCode::from(exit_code_for(&err))
        },
    }
}

/// Map an error to the process exit code.
fn exit_code_for(err: &anyhow::Error) -> u8 {
    if let Some(cli_err) = err.downcast_ref::<CliError>() {
        return cli_err.exit_code();
    }
    if matches!(
        err.downcast_ref::<stm8bsl::Error>(),
        Some(stm8bsl::Error::Interrupted)
    ) {
        return 130;
    }
    1
}

fn run() -> Result<()> {
    // --- NO_COLOR and TTY detection ---
    let stderr_is_tty = console::Term::stderr().is_term();
    STDERR_IS_TTY.store(stderr_is_tty, Ordering::Relaxed);

    if env::var("NO_COLOR").is_ok() || !stderr_is_tty {
        console::set_colors_enabled(false);
        console::set_colors_enabled_stderr(false);
    }

    let cli = Cli::parse();

    // Setup logging based on verbosity
    let log_level = if cli.quiet {
        "warn"
    } else {
        match cli.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };
    env_logger::Builder::from_env(Env::default().default_filter_or(log_level))
        .format_target(cli.verbose >= 2)
        .format_timestamp(if cli.verbose >= 2 {
            Some(env_logger::TimestampPrecision::Millis)
        } else {
            None
        })
        .init();

    debug!(
        "stm8bsl v{} (verbose level: {})",
        env!("CARGO_PKG_VERSION"),
        cli.verbose
    );

    if let Err(e) = ctrlc::set_handler(|| INTERRUPTED.store(true, Ordering::Relaxed)) {
        debug!("Could not install Ctrl-C handler: {e}");
    }

    // Load configuration
    let config = if let Some(ref path) = cli.config_path {
        Config::load_from_path(path)
    } else {
        Config::load()
    };

    match &cli.command {
        Commands::Flash {
            firmware,
            routines,
            erase,
            verify,
            no_enable_bsl,
            no_jump,
        } => {
            let options = commands::flash::FlashOptions {
                routines: routines.clone(),
                erase: *erase || config.flash.erase.unwrap_or(false),
                verify: *verify || config.flash.verify.unwrap_or(false),
                enable_bootloader: !*no_enable_bsl
                    && config.flash.enable_bootloader.unwrap_or(true),
                jump: !*no_jump && config.flash.jump.unwrap_or(true),
            };
            commands::flash::cmd_flash(&cli, &config, firmware, &options)
        },
        Commands::Read {
            address,
            length,
            output,
        } => commands::memory::cmd_read(&cli, &config, *address, *length, output.as_deref()),
        Commands::Erase { addresses } => commands::flash::cmd_erase(&cli, &config, addresses),
        Commands::Go { address } => commands::flash::cmd_go(&cli, &config, *address),
        Commands::Info { json } => commands::info::cmd_info(&cli, &config, *json),
        Commands::ListPorts { json } => commands::info::cmd_list_ports(*json),
    }
}

/// Get serial port from CLI args or interactive selection.
fn get_port(cli: &Cli, config: &Config) -> Result<String> {
    let options = SerialOptions {
        port: cli.port.clone(),
        non_interactive: cli.non_interactive,
        confirm_port: cli.confirm_port,
    };

    let selected = select_serial_port(&options, config)?;
    Ok(selected.port.name)
}

/// Effective baud rate: flag or env, then config, then the default.
fn resolve_baud(cli: &Cli, config: &Config) -> u32 {
    cli.baud
        .or(config.connection.baud)
        .unwrap_or(DEFAULT_BAUD)
}

/// Effective parity: flag, then config, then even.
fn resolve_parity(cli: &Cli, config: &Config) -> stm8bsl::Parity {
    cli.parity
        .map(stm8bsl::Parity::from)
        .or(config.connection.parity)
        .unwrap_or_default()
}
