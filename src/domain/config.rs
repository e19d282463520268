use crate::domain::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Standard baud rates accepted by [`PortConfig`]
pub const STANDARD_BAUD_RATES: &[u32] = &[
    110, 300, 600, 1200, 2400, 4800, 9600, 14400, 19200, 38400, 57600, 115200, 128000, 230400,
    256000, 460800, 921600,
];

/// Legal data bit counts
pub const DATA_BITS_OPTIONS: &[u8] = &[5, 6, 7, 8];

/// Legal stop bit counts
pub const STOP_BITS_OPTIONS: &[u8] = &[1, 2];

/// Opaque identifier of a serial device as reported by the host OS
/// (`/dev/ttyUSB0`, `COM3`, ...).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceId(String);

impl DeviceId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DeviceId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for DeviceId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Parity setting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Parity {
    None,
    Odd,
    Even,
}

impl Parity {
    pub const ALL: [Parity; 3] = [Parity::None, Parity::Odd, Parity::Even];

    pub fn as_str(&self) -> &'static str {
        match self {
            Parity::None => "none",
            Parity::Odd => "odd",
            Parity::Even => "even",
        }
    }
}

impl FromStr for Parity {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Parity::ALL
            .into_iter()
            .find(|p| p.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| ConfigError::invalid("parity", s))
    }
}

impl fmt::Display for Parity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Flow control setting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FlowControl {
    None,
    DtrDsr,
    RtsCts,
    XonXoff,
}

impl FlowControl {
    pub const ALL: [FlowControl; 4] = [
        FlowControl::None,
        FlowControl::DtrDsr,
        FlowControl::RtsCts,
        FlowControl::XonXoff,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            FlowControl::None => "none",
            FlowControl::DtrDsr => "dtr-dsr",
            FlowControl::RtsCts => "rts-cts",
            FlowControl::XonXoff => "xon-xoff",
        }
    }
}

impl FromStr for FlowControl {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().replace('_', "-");
        FlowControl::ALL
            .into_iter()
            .find(|fc| fc.as_str().eq_ignore_ascii_case(&wanted))
            .ok_or_else(|| ConfigError::invalid("flow control", s))
    }
}

impl fmt::Display for FlowControl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Validated line settings for a serial device.
///
/// Fields are private so a `PortConfig` can only exist in a legal
/// combination; build one with [`PortConfig::new`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawPortConfig", into = "RawPortConfig")]
pub struct PortConfig {
    baud_rate: u32,
    data_bits: u8,
    stop_bits: u8,
    parity: Parity,
    flow_control: FlowControl,
}

impl PortConfig {
    pub fn new(
        baud_rate: u32,
        data_bits: u8,
        stop_bits: u8,
        parity: Parity,
        flow_control: FlowControl,
    ) -> Result<Self, ConfigError> {
        if !STANDARD_BAUD_RATES.contains(&baud_rate) {
            return Err(ConfigError::invalid("baud rate", baud_rate));
        }
        if !DATA_BITS_OPTIONS.contains(&data_bits) {
            return Err(ConfigError::invalid("data bits", data_bits));
        }
        if !STOP_BITS_OPTIONS.contains(&stop_bits) {
            return Err(ConfigError::invalid("stop bits", stop_bits));
        }

        Ok(Self {
            baud_rate,
            data_bits,
            stop_bits,
            parity,
            flow_control,
        })
    }

    pub fn baud_rate(&self) -> u32 {
        self.baud_rate
    }

    pub fn data_bits(&self) -> u8 {
        self.data_bits
    }

    pub fn stop_bits(&self) -> u8 {
        self.stop_bits
    }

    pub fn parity(&self) -> Parity {
        self.parity
    }

    pub fn flow_control(&self) -> FlowControl {
        self.flow_control
    }
}

impl Default for PortConfig {
    fn default() -> Self {
        Self {
            baud_rate: default_baud_rate(),
            data_bits: default_data_bits(),
            stop_bits: default_stop_bits(),
            parity: Parity::None,
            flow_control: FlowControl::None,
        }
    }
}

impl fmt::Display for PortConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parity = match self.parity {
            Parity::None => 'N',
            Parity::Odd => 'O',
            Parity::Even => 'E',
        };
        write!(
            f,
            "{} {}{}{} flow={}",
            self.baud_rate, self.data_bits, parity, self.stop_bits, self.flow_control
        )
    }
}

/// Unvalidated on-disk form of [`PortConfig`]
#[derive(Debug, Clone, Serialize, Deserialize)]
struct RawPortConfig {
    #[serde(default = "default_baud_rate")]
    baud_rate: u32,
    #[serde(default = "default_data_bits")]
    data_bits: u8,
    #[serde(default = "default_stop_bits")]
    stop_bits: u8,
    #[serde(default = "default_parity")]
    parity: Parity,
    #[serde(default = "default_flow_control")]
    flow_control: FlowControl,
}

impl TryFrom<RawPortConfig> for PortConfig {
    type Error = ConfigError;

    fn try_from(raw: RawPortConfig) -> Result<Self, Self::Error> {
        PortConfig::new(
            raw.baud_rate,
            raw.data_bits,
            raw.stop_bits,
            raw.parity,
            raw.flow_control,
        )
    }
}

impl From<PortConfig> for RawPortConfig {
    fn from(config: PortConfig) -> Self {
        Self {
            baud_rate: config.baud_rate,
            data_bits: config.data_bits,
            stop_bits: config.stop_bits,
            parity: config.parity,
            flow_control: config.flow_control,
        }
    }
}

/// Terminator appended by line-oriented sends
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LineEnding {
    None,
    Lf,
    Cr,
    CrLf,
}

impl LineEnding {
    pub fn as_bytes(&self) -> &'static [u8] {
        match self {
            LineEnding::None => b"",
            LineEnding::Lf => b"\n",
            LineEnding::Cr => b"\r",
            LineEnding::CrLf => b"\r\n",
        }
    }
}

impl Default for LineEnding {
    fn default() -> Self {
        LineEnding::Lf
    }
}

/// Runtime tuning for a serial session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionOptions {
    /// Upper bound on a single write, in milliseconds
    #[serde(default = "default_write_timeout")]
    pub write_timeout_ms: u64,
    /// Read poll interval; bounds how long close waits for the read worker
    #[serde(default = "default_read_poll")]
    pub read_poll_ms: u64,
    /// Size of the read buffer handed to the device
    #[serde(default = "default_read_buffer_size")]
    pub read_buffer_size: usize,
    #[serde(default)]
    pub line_ending: LineEnding,
}

impl SessionOptions {
    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms.max(1))
    }

    pub fn read_poll(&self) -> Duration {
        Duration::from_millis(self.read_poll_ms.max(1))
    }

    pub fn with_line_ending(mut self, line_ending: LineEnding) -> Self {
        self.line_ending = line_ending;
        self
    }
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            write_timeout_ms: default_write_timeout(),
            read_poll_ms: default_read_poll(),
            read_buffer_size: default_read_buffer_size(),
            line_ending: LineEnding::default(),
        }
    }
}

/// Sercom configuration file
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SercomConfig {
    #[serde(default)]
    pub global: GlobalConfig,
    #[serde(default)]
    pub session: SessionOptions,
    /// Line settings used when the command line does not override them
    #[serde(default)]
    pub port: PortConfig,
}

/// Global configuration settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GlobalConfig {
    /// Default log level
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Records kept by an in-memory record log
    #[serde(default = "default_history_limit")]
    pub history_limit: usize,
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            history_limit: default_history_limit(),
        }
    }
}

// Default value functions
fn default_log_level() -> String {
    "info".to_string()
}

fn default_history_limit() -> usize {
    1000
}

fn default_baud_rate() -> u32 {
    9600
}

fn default_data_bits() -> u8 {
    8
}

fn default_stop_bits() -> u8 {
    1
}

fn default_parity() -> Parity {
    Parity::None
}

fn default_flow_control() -> FlowControl {
    FlowControl::None
}

fn default_write_timeout() -> u64 {
    1000
}

fn default_read_poll() -> u64 {
    50
}

fn default_read_buffer_size() -> usize {
    1024
}
