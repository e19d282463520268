// Serial module - Host serial devices and scripted test devices
pub mod catalog;
pub mod client;
pub mod mock;

pub use catalog::{list_ports, SystemCatalog};
pub use client::{system_session, SystemTransport};
pub use mock::{MockDevice, MockTransport};
