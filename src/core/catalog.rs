use crate::domain::config::DeviceId;
use serde::Serialize;
use std::fmt;

/// Kind of hardware behind a serial device
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum PortKind {
    Usb { vid: u16, pid: u16 },
    Pci,
    Bluetooth,
    Unknown,
}

impl fmt::Display for PortKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PortKind::Usb { vid, pid } => write!(f, "USB ({:04X}:{:04X})", vid, pid),
            PortKind::Pci => write!(f, "PCI"),
            PortKind::Bluetooth => write!(f, "Bluetooth"),
            PortKind::Unknown => write!(f, "Native"),
        }
    }
}

/// A serial device present on the host
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PortInfo {
    pub id: DeviceId,
    pub kind: PortKind,
    pub manufacturer: Option<String>,
    pub product: Option<String>,
}

impl PortInfo {
    pub fn new(id: impl Into<DeviceId>, kind: PortKind) -> Self {
        Self {
            id: id.into(),
            kind,
            manufacturer: None,
            product: None,
        }
    }
}

/// Enumeration of available serial devices.
///
/// Implementations query on every call so the result tracks devices being
/// plugged and unplugged.
pub trait PortCatalog: Send + Sync {
    /// Ports sorted by device id
    fn list_port_details(&self) -> Vec<PortInfo>;

    fn list_ports(&self) -> Vec<DeviceId> {
        self.list_port_details()
            .into_iter()
            .map(|port| port.id)
            .collect()
    }
}
