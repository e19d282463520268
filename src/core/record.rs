use chrono::{DateTime, Local};
use serde::Serialize;

const DISPLAY_TIME_FORMAT: &str = "%H:%M:%S%.3f";

/// Decoded text received from the device
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InboundRecord {
    timestamp: DateTime<Local>,
    text: String,
}

impl InboundRecord {
    /// Create a record stamped with the current wall-clock time
    pub fn new(text: impl Into<String>) -> Self {
        Self::at(Local::now(), text)
    }

    pub fn at(timestamp: DateTime<Local>, text: impl Into<String>) -> Self {
        Self {
            timestamp,
            text: text.into(),
        }
    }

    pub fn timestamp(&self) -> DateTime<Local> {
        self.timestamp
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    /// Format for display, e.g. `[14:03:07.412] PONG`
    pub fn format_for_display(&self) -> String {
        format!(
            "[{}] {}",
            self.timestamp.format(DISPLAY_TIME_FORMAT),
            self.text
        )
    }
}

/// Text that was successfully written to the device, terminator included
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OutboundRecord {
    timestamp: DateTime<Local>,
    text: String,
    size: usize,
}

impl OutboundRecord {
    pub fn new(data: &[u8]) -> Self {
        Self {
            timestamp: Local::now(),
            text: String::from_utf8_lossy(data).into_owned(),
            size: data.len(),
        }
    }

    pub fn timestamp(&self) -> DateTime<Local> {
        self.timestamp
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    /// Number of bytes written
    pub fn size(&self) -> usize {
        self.size
    }

    pub fn format_for_display(&self) -> String {
        format!(
            "[{}] > {}",
            self.timestamp.format(DISPLAY_TIME_FORMAT),
            self.text
        )
    }
}
