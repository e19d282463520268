//! Sercom Library
//!
//! Serial port session management: open a device with validated line
//! settings, stream timestamped received text to an event sink, write to the
//! device and survive faults with a clean, reopenable state.

pub mod cli;
pub mod core;
pub mod domain;
pub mod infrastructure;

pub use crate::core::catalog::{PortCatalog, PortInfo, PortKind};
pub use crate::core::record::{InboundRecord, OutboundRecord};
pub use crate::core::session::{DisconnectReason, SerialSession, SessionState};
pub use crate::core::sink::{ChannelSink, EventSink, FanoutSink, LogEntry, RecordLog, SessionEvent};
pub use crate::core::transport::{PortHandle, SerialTransport};
pub use crate::domain::config::{
    DeviceId, FlowControl, LineEnding, Parity, PortConfig, SercomConfig, SessionOptions,
};
pub use crate::domain::error::{ConfigError, SercomError, SercomResult, SessionError};
pub use crate::infrastructure::serial::{
    list_ports, system_session, MockDevice, MockTransport, SystemCatalog, SystemTransport,
};
