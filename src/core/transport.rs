use crate::domain::config::{DeviceId, PortConfig, SessionOptions};
use crate::domain::error::SessionError;
use std::io::{Read, Write};

/// Read half of an open device
pub type PortReader = Box<dyn Read + Send>;

/// Write half of an open device
pub type PortWriter = Box<dyn Write + Send>;

/// An opened device split into independently owned halves.
///
/// The device is released once both halves are dropped. Reads on
/// `reader` must return `ErrorKind::TimedOut` (or `WouldBlock`) when no data
/// arrives within the session's read poll interval, and `Ok(0)` only at end
/// of stream.
pub struct PortHandle {
    pub reader: PortReader,
    pub writer: PortWriter,
}

/// Access to serial devices
pub trait SerialTransport: Send + Sync {
    /// Acquire `device` exclusively and apply `config` to it.
    ///
    /// Fails with [`SessionError::DeviceUnavailable`] when the device is
    /// missing, busy or not permitted, and [`SessionError::ConfigRejected`]
    /// when the driver refuses the line settings.
    fn open(
        &self,
        device: &DeviceId,
        config: &PortConfig,
        options: &SessionOptions,
    ) -> Result<PortHandle, SessionError>;
}
