use crate::core::session::SerialSession;
use crate::core::sink::EventSink;
use crate::core::transport::{PortHandle, SerialTransport};
use crate::domain::config::{DeviceId, FlowControl, Parity, PortConfig, SessionOptions};
use crate::domain::error::SessionError;
use serialport::SerialPort;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Transport over the host's serial devices via the `serialport` crate
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemTransport;

impl SystemTransport {
    pub fn new() -> Self {
        Self
    }
}

/// Session over the host's serial devices
pub fn system_session(sink: Arc<dyn EventSink>, options: SessionOptions) -> SerialSession {
    SerialSession::new(Arc::new(SystemTransport::new()), sink, options)
}

/// Driver-level write timeout, kept below the session's own write bound so
/// a stuck write fails in the driver and gives the port back.
pub(crate) fn driver_write_timeout(bound: Duration) -> Duration {
    (bound * 4 / 5).max(Duration::from_millis(1))
}

impl SerialTransport for SystemTransport {
    fn open(
        &self,
        device: &DeviceId,
        config: &PortConfig,
        options: &SessionOptions,
    ) -> Result<PortHandle, SessionError> {
        let unsupported = |what: &str, value: u8| SessionError::ConfigRejected {
            device: device.to_string(),
            message: format!("unsupported {}: {}", what, value),
        };
        let data_bits = to_data_bits(config.data_bits())
            .ok_or_else(|| unsupported("data bits", config.data_bits()))?;
        let stop_bits = to_stop_bits(config.stop_bits())
            .ok_or_else(|| unsupported("stop bits", config.stop_bits()))?;
        let write_timeout = driver_write_timeout(options.write_timeout());

        let builder = serialport::new(device.as_str(), config.baud_rate())
            .data_bits(data_bits)
            .stop_bits(stop_bits)
            .parity(to_parity(config.parity()))
            .flow_control(to_flow_control(config.flow_control()))
            .timeout(write_timeout);

        let mut port = builder.open().map_err(|e| open_error(device, e))?;

        // serialport has no DTR/DSR mode; assert DTR so the peer may send.
        if config.flow_control() == FlowControl::DtrDsr {
            port.write_data_terminal_ready(true)
                .map_err(|e| SessionError::ConfigRejected {
                    device: device.to_string(),
                    message: format!("failed to assert DTR: {}", e),
                })?;
        }

        let mut reader = port.try_clone().map_err(|e| open_error(device, e))?;
        reader
            .set_timeout(options.read_poll())
            .map_err(|e| SessionError::ConfigRejected {
                device: device.to_string(),
                message: format!("failed to set read timeout: {}", e),
            })?;

        info!("Serial port '{}' opened at {}", device, config);
        debug!(
            "Read poll {:?}, write timeout {:?}",
            options.read_poll(),
            write_timeout
        );

        Ok(PortHandle {
            reader: Box::new(reader),
            writer: Box::new(port),
        })
    }
}

fn open_error(device: &DeviceId, err: serialport::Error) -> SessionError {
    match err.kind() {
        serialport::ErrorKind::InvalidInput => SessionError::ConfigRejected {
            device: device.to_string(),
            message: err.to_string(),
        },
        _ => SessionError::DeviceUnavailable {
            device: device.to_string(),
            message: err.to_string(),
        },
    }
}

pub(crate) fn to_data_bits(bits: u8) -> Option<serialport::DataBits> {
    match bits {
        5 => Some(serialport::DataBits::Five),
        6 => Some(serialport::DataBits::Six),
        7 => Some(serialport::DataBits::Seven),
        8 => Some(serialport::DataBits::Eight),
        _ => None,
    }
}

pub(crate) fn to_stop_bits(bits: u8) -> Option<serialport::StopBits> {
    match bits {
        1 => Some(serialport::StopBits::One),
        2 => Some(serialport::StopBits::Two),
        _ => None,
    }
}

pub(crate) fn to_parity(parity: Parity) -> serialport::Parity {
    match parity {
        Parity::None => serialport::Parity::None,
        Parity::Odd => serialport::Parity::Odd,
        Parity::Even => serialport::Parity::Even,
    }
}

pub(crate) fn to_flow_control(flow_control: FlowControl) -> serialport::FlowControl {
    match flow_control {
        FlowControl::None | FlowControl::DtrDsr => serialport::FlowControl::None,
        FlowControl::RtsCts => serialport::FlowControl::Hardware,
        FlowControl::XonXoff => serialport::FlowControl::Software,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_device_is_unavailable() {
        let result = SystemTransport::new().open(
            &DeviceId::from("/dev/sercom-does-not-exist"),
            &PortConfig::default(),
            &SessionOptions::default(),
        );

        assert!(matches!(
            result,
            Err(SessionError::DeviceUnavailable { ref device, .. }) if device == "/dev/sercom-does-not-exist"
        ));
    }

    #[test]
    fn test_option_mapping() {
        assert_eq!(to_data_bits(7), Some(serialport::DataBits::Seven));
        assert_eq!(to_data_bits(8), Some(serialport::DataBits::Eight));
        assert_eq!(to_stop_bits(1), Some(serialport::StopBits::One));
        assert_eq!(to_stop_bits(2), Some(serialport::StopBits::Two));
        assert_eq!(to_parity(Parity::Odd), serialport::Parity::Odd);
        assert_eq!(
            to_flow_control(FlowControl::RtsCts),
            serialport::FlowControl::Hardware
        );
        assert_eq!(
            to_flow_control(FlowControl::DtrDsr),
            serialport::FlowControl::None
        );
    }

    #[test]
    fn test_unsupported_bit_counts_are_not_mapped() {
        assert_eq!(to_data_bits(9), None);
        assert_eq!(to_data_bits(0), None);
        assert_eq!(to_stop_bits(0), None);
        assert_eq!(to_stop_bits(3), None);
    }

    #[test]
    fn test_driver_timeout_stays_below_write_bound() {
        for ms in [1u64, 2, 10, 200, 1000, 60_000] {
            let bound = Duration::from_millis(ms);
            let driver = driver_write_timeout(bound);
            assert!(driver > Duration::ZERO);
            if ms > 1 {
                assert!(driver < bound, "{:?} not below {:?}", driver, bound);
            }
        }
        assert_eq!(
            driver_write_timeout(Duration::from_millis(1000)),
            Duration::from_millis(800)
        );
    }

    #[test]
    fn test_invalid_input_maps_to_config_rejected() {
        let err = serialport::Error::new(serialport::ErrorKind::InvalidInput, "bad baud");
        assert!(matches!(
            open_error(&DeviceId::from("COM1"), err),
            SessionError::ConfigRejected { .. }
        ));

        let err = serialport::Error::new(serialport::ErrorKind::NoDevice, "gone");
        assert!(matches!(
            open_error(&DeviceId::from("COM1"), err),
            SessionError::DeviceUnavailable { .. }
        ));
    }
}
