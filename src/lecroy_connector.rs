use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::visa_terminal::{SerialTransport, TcpTransport, TerminalError, Transport, VisaTerminal};

/// USB vendor ID assigned to LeCroy (Teledyne LeCroy).
pub const LECROY_USB_VENDOR_ID: u16 = 0x05ff;

pub const DEFAULT_SOCKET_PORT: u16 = 5025;
pub const DEFAULT_BAUD_RATE: u32 = 115_200;

#[derive(Debug, Clone)]
pub struct LeCroyDevice {
    pub name: String,
    pub port: String,
}

impl LeCroyDevice {
    pub fn new(name: String, port: String) -> Self {
        Self { name, port }
    }

    /// Resource string that opens this device
    pub fn resource(&self) -> String {
        ResourceAddress::Serial {
            port: self.port.clone(),
            baud_rate: DEFAULT_BAUD_RATE,
        }
        .to_string()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConnectorError {
    #[error("Terminal error: {0}")]
    Terminal(#[from] TerminalError),

    #[error("Serial port error: {0}")]
    SerialPort(#[from] serialport::Error),

    #[error("'{resource}' is not a supported resource string: {reason}")]
    InvalidResource { resource: String, reason: String },

    #[error("No LeCroy device found. Please connect a scope or specify the resource manually")]
    DeviceNotFound,
}

/// Parsed VISA resource string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResourceAddress {
    /// `TCPIP[board]::<host>::<port>::SOCKET`, or `TCPIP[board]::<host>[::INSTR]`
    /// which falls back to the raw SCPI port.
    Socket { host: String, port: u16 },
    /// `ASRL<port>[::INSTR]`
    Serial { port: String, baud_rate: u32 },
}

impl FromStr for ResourceAddress {
    type Err = ConnectorError;

    fn from_str(resource: &str) -> Result<Self, Self::Err> {
        let invalid = |reason: &str| ConnectorError::InvalidResource {
            resource: resource.to_string(),
            reason: reason.to_string(),
        };

        let parts: Vec<&str> = resource.trim().split("::").collect();
        let interface = parts[0].to_ascii_uppercase();

        if let Some(board) = interface.strip_prefix("TCPIP") {
            if !board.chars().all(|c| c.is_ascii_digit()) {
                return Err(invalid("invalid TCPIP board number"));
            }
            let host = parts
                .get(1)
                .filter(|h| !h.is_empty())
                .ok_or_else(|| invalid("missing host"))?
                .to_string();

            match &parts[2..] {
                [] => Ok(Self::Socket {
                    host,
                    port: DEFAULT_SOCKET_PORT,
                }),
                [suffix] if suffix.eq_ignore_ascii_case("INSTR") => Ok(Self::Socket {
                    host,
                    port: DEFAULT_SOCKET_PORT,
                }),
                [port, suffix] if suffix.eq_ignore_ascii_case("SOCKET") => {
                    let port = port.parse().map_err(|_| invalid("invalid port number"))?;
                    Ok(Self::Socket { host, port })
                }
                _ => Err(invalid("expected ::<port>::SOCKET or ::INSTR")),
            }
        } else if interface.starts_with("ASRL") {
            // Keep the port name's original case, e.g. ASRL/dev/ttyACM0
            let port = &parts[0]["ASRL".len()..];
            if port.is_empty() {
                return Err(invalid("missing serial port"));
            }
            match &parts[1..] {
                [] => {}
                [suffix] if suffix.eq_ignore_ascii_case("INSTR") => {}
                _ => return Err(invalid("expected ASRL<port>::INSTR")),
            }
            Ok(Self::Serial {
                port: port.to_string(),
                baud_rate: DEFAULT_BAUD_RATE,
            })
        } else {
            Err(invalid("only TCPIP and ASRL resources are supported"))
        }
    }
}

impl fmt::Display for ResourceAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Socket { host, port } => write!(f, "TCPIP0::{host}::{port}::SOCKET"),
            Self::Serial { port, .. } => write!(f, "ASRL{port}::INSTR"),
        }
    }
}

pub struct LeCroyConnector;

impl LeCroyConnector {
    /// Open a terminal to the scope named by `resource`, or to the first
    /// LeCroy USB device found when `resource` is `None`.
    pub fn connect(
        resource: Option<&str>,
        timeout: Duration,
    ) -> Result<VisaTerminal<Box<dyn Transport>>, ConnectorError> {
        let address = match resource {
            Some(resource) => resource.parse()?,
            None => {
                let device = Self::get_available_devices()?
                    .into_iter()
                    .next()
                    .ok_or(ConnectorError::DeviceNotFound)?;
                log::debug!("Using LeCroy device {} at {}", device.name, device.port);
                ResourceAddress::Serial {
                    port: device.port,
                    baud_rate: DEFAULT_BAUD_RATE,
                }
            }
        };

        Self::open(&address, timeout)
    }

    pub fn open(
        address: &ResourceAddress,
        timeout: Duration,
    ) -> Result<VisaTerminal<Box<dyn Transport>>, ConnectorError> {
        log::debug!("Connecting to {}", address);
        let transport: Box<dyn Transport> = match address {
            ResourceAddress::Socket { host, port } => {
                Box::new(TcpTransport::connect(host, *port, timeout)?)
            }
            ResourceAddress::Serial { port, baud_rate } => {
                Box::new(SerialTransport::open(port, *baud_rate, timeout)?)
            }
        };

        Ok(VisaTerminal::new(transport))
    }

    /// Get all serial ports that belong to a LeCroy USB device
    pub fn get_available_devices() -> Result<Vec<LeCroyDevice>, ConnectorError> {
        let devices = serialport::available_ports()?
            .into_iter()
            .filter_map(|port| match port.port_type {
                serialport::SerialPortType::UsbPort(info) if info.vid == LECROY_USB_VENDOR_ID => {
                    let name = info
                        .product
                        .unwrap_or_else(|| format!("LeCroy {:04x}", info.pid));
                    Some(LeCroyDevice::new(name, port.port_name))
                }
                _ => None,
            })
            .collect();

        Ok(devices)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_socket_resource() {
        assert_eq!(
            "TCPIP0::192.168.1.20::1861::SOCKET"
                .parse::<ResourceAddress>()
                .unwrap(),
            ResourceAddress::Socket {
                host: "192.168.1.20".to_string(),
                port: 1861
            }
        );
        assert_eq!(
            "tcpip::scope.lab::INSTR".parse::<ResourceAddress>().unwrap(),
            ResourceAddress::Socket {
                host: "scope.lab".to_string(),
                port: DEFAULT_SOCKET_PORT
            }
        );
        assert_eq!(
            "TCPIP1::10.0.0.2".parse::<ResourceAddress>().unwrap(),
            ResourceAddress::Socket {
                host: "10.0.0.2".to_string(),
                port: DEFAULT_SOCKET_PORT
            }
        );
    }

    #[test]
    fn test_parse_serial_resource() {
        assert_eq!(
            "ASRL/dev/ttyACM0::INSTR".parse::<ResourceAddress>().unwrap(),
            ResourceAddress::Serial {
                port: "/dev/ttyACM0".to_string(),
                baud_rate: DEFAULT_BAUD_RATE
            }
        );
        assert_eq!(
            "ASRLCOM3".parse::<ResourceAddress>().unwrap(),
            ResourceAddress::Serial {
                port: "COM3".to_string(),
                baud_rate: DEFAULT_BAUD_RATE
            }
        );
    }

    #[test]
    fn test_reject_unsupported_resources() {
        for resource in [
            "USB0::0x05FF::0x1023::LCRY0001::INSTR",
            "TCPIP0::::INSTR",
            "TCPIP0::host::port::SOCKET",
            "TCPIP0::host::5025::INSTR",
            "TCPIPx::host",
            "ASRL::INSTR",
            "GPIB0::5::INSTR",
        ] {
            assert!(
                matches!(
                    resource.parse::<ResourceAddress>(),
                    Err(ConnectorError::InvalidResource { .. })
                ),
                "{resource} should be rejected"
            );
        }
    }

    #[test]
    fn test_resource_display_round_trips() {
        let address = ResourceAddress::Socket {
            host: "scope".to_string(),
            port: 1861,
        };
        assert_eq!(address.to_string().parse::<ResourceAddress>().unwrap(), address);

        let device = LeCroyDevice::new("WavePro".to_string(), "/dev/ttyACM1".to_string());
        assert_eq!(device.resource(), "ASRL/dev/ttyACM1::INSTR");
    }

    #[test]
    fn test_get_available_devices() {
        // Depends on what is plugged in; only check the shape of the result
        match LeCroyConnector::get_available_devices() {
            Ok(devices) => {
                for device in devices {
                    assert!(!device.name.is_empty());
                    assert!(!device.port.is_empty());
                }
            }
            Err(ConnectorError::SerialPort(_)) => {
                // Expected if port enumeration is not available
            }
            Err(e) => unreachable!("Unexpected error: {e:?}"),
        }
    }
}
