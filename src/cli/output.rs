use crate::cli::args::OutputFormat;
use crate::core::catalog::PortInfo;
use crate::core::record::{InboundRecord, OutboundRecord};
use crate::core::session::SessionState;
use crate::domain::config::SercomConfig;
use serde_json::json;
use std::io::{self, Write};
use tabled::{Table, Tabled};

/// Output writer trait for different formats
pub trait OutputWriter {
    fn write_ports(&self, ports: &[PortInfo]) -> Result<(), OutputError>;
    fn write_record(&self, record: &InboundRecord) -> Result<(), OutputError>;
    fn write_sent(&self, record: &OutboundRecord) -> Result<(), OutputError>;
    fn write_state(&self, state: SessionState, reason: Option<&str>) -> Result<(), OutputError>;
    fn write_config(&self, config: &SercomConfig) -> Result<(), OutputError>;
    fn write_message(&self, message: &str) -> Result<(), OutputError>;
    fn write_error(&self, error: &str) -> Result<(), OutputError>;
}

/// Output formatting errors
#[derive(Debug, thiserror::Error)]
pub enum OutputError {
    #[error("JSON serialization error: {0}")]
    JsonError(#[from] serde_json::Error),
    #[error("TOML serialization error: {0}")]
    TomlError(#[from] toml::ser::Error),
    #[error("IO error: {0}")]
    IoError(#[from] io::Error),
}

impl From<OutputError> for crate::domain::error::SercomError {
    fn from(err: OutputError) -> Self {
        Self::Output(err.to_string())
    }
}

/// Console output writer
pub struct ConsoleWriter {
    format: OutputFormat,
}

impl ConsoleWriter {
    pub fn new(format: OutputFormat) -> Self {
        Self { format }
    }

    pub fn format(&self) -> OutputFormat {
        self.format
    }

    fn print(&self, line: &str) -> Result<(), OutputError> {
        let mut stdout = io::stdout().lock();
        writeln!(stdout, "{}", line)?;
        stdout.flush()?;
        Ok(())
    }
}

impl OutputWriter for ConsoleWriter {
    fn write_ports(&self, ports: &[PortInfo]) -> Result<(), OutputError> {
        match self.format {
            OutputFormat::Text => {
                if ports.is_empty() {
                    self.print("No serial ports found")?;
                }
                for port in ports {
                    self.print(&format!("{}  {}", port.id, port.kind))?;
                    if let Some(product) = &port.product {
                        self.print(&format!("  Product: {}", product))?;
                    }
                    if let Some(manufacturer) = &port.manufacturer {
                        self.print(&format!("  Manufacturer: {}", manufacturer))?;
                    }
                }
            }
            OutputFormat::Json => {
                self.print(&serde_json::to_string_pretty(ports)?)?;
            }
            OutputFormat::Table => {
                if !ports.is_empty() {
                    let rows: Vec<PortTableRow> = ports.iter().map(PortTableRow::from).collect();
                    self.print(&Table::new(rows).to_string())?;
                }
            }
            OutputFormat::Csv => {
                self.print("port,type,manufacturer,product")?;
                for port in ports {
                    self.print(&format!(
                        "{},{},{},{}",
                        port.id,
                        port.kind,
                        port.manufacturer.as_deref().unwrap_or(""),
                        port.product.as_deref().unwrap_or("")
                    ))?;
                }
            }
        }
        Ok(())
    }

    fn write_record(&self, record: &InboundRecord) -> Result<(), OutputError> {
        match self.format {
            OutputFormat::Json => self.print(&serde_json::to_string(record)?),
            OutputFormat::Csv => self.print(&format!(
                "{},rx,{:?}",
                record.timestamp().to_rfc3339(),
                record.text()
            )),
            // Received text carries its own line breaks.
            OutputFormat::Text | OutputFormat::Table => {
                let mut stdout = io::stdout().lock();
                write!(stdout, "{}", record.format_for_display())?;
                stdout.flush()?;
                Ok(())
            }
        }
    }

    fn write_sent(&self, record: &OutboundRecord) -> Result<(), OutputError> {
        match self.format {
            OutputFormat::Json => self.print(&serde_json::to_string(record)?),
            OutputFormat::Csv => self.print(&format!(
                "{},tx,{:?}",
                record.timestamp().to_rfc3339(),
                record.text()
            )),
            OutputFormat::Text | OutputFormat::Table => {
                self.print(record.format_for_display().trim_end_matches(['\r', '\n']))
            }
        }
    }

    fn write_state(&self, state: SessionState, reason: Option<&str>) -> Result<(), OutputError> {
        match self.format {
            OutputFormat::Json => self.print(&json!({ "state": state, "reason": reason }).to_string()),
            _ => match reason {
                Some(reason) => self.print(&format!("-- {} ({})", state, reason)),
                None => self.print(&format!("-- {}", state)),
            },
        }
    }

    fn write_config(&self, config: &SercomConfig) -> Result<(), OutputError> {
        match self.format {
            OutputFormat::Text => {
                self.print("Sercom Configuration:")?;
                self.print(&format!("  Log level: {}", config.global.log_level))?;
                self.print(&format!("  History limit: {}", config.global.history_limit))?;
                self.print(&format!("  Default port settings: {}", config.port))?;
                self.print(&format!("  Write timeout: {} ms", config.session.write_timeout_ms))?;
                self.print(&format!("  Read poll: {} ms", config.session.read_poll_ms))?;
                self.print(&format!("  Read buffer: {} bytes", config.session.read_buffer_size))?;
                self.print(&format!("  Line ending: {:?}", config.session.line_ending))?;
            }
            OutputFormat::Json => {
                self.print(&serde_json::to_string_pretty(config)?)?;
            }
            OutputFormat::Table | OutputFormat::Csv => {
                self.print(&toml::to_string_pretty(config)?)?;
            }
        }
        Ok(())
    }

    fn write_message(&self, message: &str) -> Result<(), OutputError> {
        match self.format {
            OutputFormat::Json => self.print(&json!({ "message": message }).to_string()),
            _ => self.print(message),
        }
    }

    fn write_error(&self, error: &str) -> Result<(), OutputError> {
        let mut stderr = io::stderr().lock();
        match self.format {
            OutputFormat::Json => writeln!(stderr, "{}", json!({ "error": error }))?,
            _ => writeln!(stderr, "Error: {}", error)?,
        }
        Ok(())
    }
}

#[derive(Tabled)]
struct PortTableRow {
    #[tabled(rename = "Port")]
    port: String,
    #[tabled(rename = "Type")]
    kind: String,
    #[tabled(rename = "Manufacturer")]
    manufacturer: String,
    #[tabled(rename = "Product")]
    product: String,
}

impl From<&PortInfo> for PortTableRow {
    fn from(port: &PortInfo) -> Self {
        Self {
            port: port.id.to_string(),
            kind: port.kind.to_string(),
            manufacturer: port.manufacturer.clone().unwrap_or_default(),
            product: port.product.clone().unwrap_or_default(),
        }
    }
}
