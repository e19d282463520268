use crate::domain::config::{FlowControl, LineEnding, Parity};
use clap::{Args as ClapArgs, Parser, Subcommand, ValueEnum};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Command line arguments for Sercom
#[derive(Parser, Debug)]
#[command(
    name = "sercom",
    version = env!("CARGO_PKG_VERSION"),
    about = "Serial port session manager",
    long_about = "Open a serial device, stream timestamped received text to the console and send lines typed on stdin."
)]
pub struct Args {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Suppress logging
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Configuration file path
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Output format
    #[arg(short, long, value_enum, default_value = "text", global = true)]
    pub output: OutputFormat,

    /// Command to execute
    #[command(subcommand)]
    pub command: Command,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// List available serial ports
    Ports,
    /// Open an interactive session on a serial port
    Open(OpenArgs),
    /// Configuration management commands
    Config(ConfigArgs),
    /// Display version information
    Version,
}

/// Output format options
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum OutputFormat {
    /// Human-readable text output
    #[default]
    Text,
    /// JSON output
    Json,
    /// Table output
    Table,
    /// CSV output
    Csv,
}

/// Session arguments; unset line settings come from the configuration file
#[derive(ClapArgs, Debug)]
pub struct OpenArgs {
    /// Serial port path
    #[arg(short, long)]
    pub port: String,

    /// Baud rate
    #[arg(short, long)]
    pub baud: Option<u32>,

    /// Data bits (5-8)
    #[arg(long)]
    pub data_bits: Option<u8>,

    /// Stop bits (1 or 2)
    #[arg(long)]
    pub stop_bits: Option<u8>,

    /// Parity
    #[arg(long, value_enum)]
    pub parity: Option<ParityArg>,

    /// Flow control
    #[arg(long, value_enum)]
    pub flow_control: Option<FlowControlArg>,

    /// Terminator appended to each text line sent
    #[arg(long, value_enum)]
    pub line_ending: Option<LineEndingArg>,

    /// How stdin lines are interpreted
    #[arg(short, long, value_enum, default_value = "text")]
    pub format: DataFormat,
}

/// Configuration management arguments
#[derive(ClapArgs, Debug)]
pub struct ConfigArgs {
    /// Configuration subcommand
    #[command(subcommand)]
    pub command: ConfigCommand,
}

/// Configuration management subcommands
#[derive(Subcommand, Debug)]
pub enum ConfigCommand {
    /// Show current configuration
    Show,
    /// Create default configuration
    Init {
        /// Output file path (defaults to the active configuration path)
        #[arg(short, long)]
        path: Option<PathBuf>,
        /// Overwrite an existing file
        #[arg(short, long)]
        force: bool,
    },
    /// Validate configuration
    Validate {
        /// Configuration file path
        file: Option<PathBuf>,
    },
}

/// Parity configuration argument
#[derive(ValueEnum, Debug, Clone, Copy)]
pub enum ParityArg {
    None,
    Even,
    Odd,
}

/// Flow control configuration argument
#[derive(ValueEnum, Debug, Clone, Copy)]
pub enum FlowControlArg {
    None,
    DtrDsr,
    RtsCts,
    XonXoff,
}

/// Line ending argument
#[derive(ValueEnum, Debug, Clone, Copy)]
pub enum LineEndingArg {
    None,
    Lf,
    Cr,
    Crlf,
}

/// Data format argument
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataFormat {
    Text,
    Hex,
    Base64,
}

impl From<ParityArg> for Parity {
    fn from(parity: ParityArg) -> Self {
        match parity {
            ParityArg::None => Self::None,
            ParityArg::Even => Self::Even,
            ParityArg::Odd => Self::Odd,
        }
    }
}

impl From<FlowControlArg> for FlowControl {
    fn from(flow_control: FlowControlArg) -> Self {
        match flow_control {
            FlowControlArg::None => Self::None,
            FlowControlArg::DtrDsr => Self::DtrDsr,
            FlowControlArg::RtsCts => Self::RtsCts,
            FlowControlArg::XonXoff => Self::XonXoff,
        }
    }
}

impl From<LineEndingArg> for LineEnding {
    fn from(line_ending: LineEndingArg) -> Self {
        match line_ending {
            LineEndingArg::None => Self::None,
            LineEndingArg::Lf => Self::Lf,
            LineEndingArg::Cr => Self::Cr,
            LineEndingArg::Crlf => Self::CrLf,
        }
    }
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OutputFormat::Text => write!(f, "text"),
            OutputFormat::Json => write!(f, "json"),
            OutputFormat::Table => write!(f, "table"),
            OutputFormat::Csv => write!(f, "csv"),
        }
    }
}

impl std::fmt::Display for DataFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DataFormat::Text => write!(f, "text"),
            DataFormat::Hex => write!(f, "hex"),
            DataFormat::Base64 => write!(f, "base64"),
        }
    }
}
