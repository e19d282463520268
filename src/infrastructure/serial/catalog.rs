use crate::core::catalog::{PortCatalog, PortInfo, PortKind};
use crate::domain::config::DeviceId;
use crate::domain::error::SercomResult;
use serialport::SerialPortType;
use tracing::{debug, warn};

/// Catalog backed by the OS device enumeration
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemCatalog;

impl SystemCatalog {
    pub fn new() -> Self {
        Self
    }

    /// Enumerate ports, surfacing enumeration failures
    pub fn try_list(&self) -> SercomResult<Vec<PortInfo>> {
        let mut ports: Vec<PortInfo> = serialport::available_ports()?
            .into_iter()
            .map(port_info)
            .collect();
        ports.sort_by(|a, b| a.id.cmp(&b.id));

        debug!("Enumerated {} serial ports", ports.len());
        Ok(ports)
    }
}

impl PortCatalog for SystemCatalog {
    fn list_port_details(&self) -> Vec<PortInfo> {
        match self.try_list() {
            Ok(ports) => ports,
            Err(e) => {
                warn!("Failed to enumerate serial ports: {}", e);
                Vec::new()
            }
        }
    }
}

/// Device ids currently present on the host
pub fn list_ports() -> Vec<DeviceId> {
    SystemCatalog::new().list_ports()
}

fn port_info(port: serialport::SerialPortInfo) -> PortInfo {
    match port.port_type {
        SerialPortType::UsbPort(usb) => PortInfo {
            id: port.port_name.into(),
            kind: PortKind::Usb {
                vid: usb.vid,
                pid: usb.pid,
            },
            manufacturer: usb.manufacturer,
            product: usb.product,
        },
        SerialPortType::PciPort => PortInfo::new(port.port_name, PortKind::Pci),
        SerialPortType::BluetoothPort => PortInfo::new(port.port_name, PortKind::Bluetooth),
        SerialPortType::Unknown => PortInfo::new(port.port_name, PortKind::Unknown),
    }
}
