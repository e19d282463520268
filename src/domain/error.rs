use thiserror::Error;

/// Port configuration validation error
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid {field}: '{value}' is not a supported option")]
    InvalidOption { field: &'static str, value: String },
}

impl ConfigError {
    pub(crate) fn invalid(field: &'static str, value: impl ToString) -> Self {
        Self::InvalidOption {
            field,
            value: value.to_string(),
        }
    }
}

/// Errors returned synchronously by session operations.
///
/// Failures on the background read path are never returned here; they are
/// reported through the event sink as a state change.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    #[error("Device '{device}' unavailable: {message}")]
    DeviceUnavailable { device: String, message: String },

    #[error("Device '{device}' rejected configuration: {message}")]
    ConfigRejected { device: String, message: String },

    #[error("Write failed: {message}")]
    WriteFailed { message: String },

    #[error("Session already open on '{device}'")]
    AlreadyOpen { device: String },

    #[error("Session is not open")]
    NotOpen,
}

/// Sercom application error type
#[derive(Error, Debug)]
pub enum SercomError {
    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Port option error: {0}")]
    PortOption(#[from] ConfigError),

    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Output error: {0}")]
    Output(String),
}

pub type SercomResult<T> = Result<T, SercomError>;
