//! Serial port enumeration
//!
//! Used to tell the operator which ports exist when the configured one does
//! not answer.

use serialport::{available_ports, SerialPortType};
use tracing::info;

use crate::error::TransportError;

/// A serial port present on this machine
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortInfo {
    /// Port name (e.g., /dev/ttyUSB0, COM3)
    pub name: String,
    /// USB product string, if any
    pub product: Option<String>,
}

impl PortInfo {
    fn from_serialport(name: String, port_type: &SerialPortType) -> Self {
        let product = match port_type {
            SerialPortType::UsbPort(usb) => usb.product.clone(),
            _ => None,
        };
        Self { name, product }
    }
}

impl std::fmt::Display for PortInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.product {
            Some(product) => write!(f, "{} ({})", self.name, product),
            None => f.write_str(&self.name),
        }
    }
}

/// List serial ports, skipping Bluetooth and debug ports
pub fn list_ports() -> Result<Vec<PortInfo>, TransportError> {
    let ports = available_ports().map_err(|e| TransportError::EnumerationFailed(e.to_string()))?;

    let result: Vec<PortInfo> = ports
        .into_iter()
        .map(|p| PortInfo::from_serialport(p.port_name, &p.port_type))
        .filter(|p| !p.name.contains("Bluetooth") && !p.name.contains("debug"))
        .collect();

    info!("Found {} serial port(s)", result.len());
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serialport::UsbPortInfo;

    #[test]
    fn test_usb_port_keeps_product() {
        let usb = SerialPortType::UsbPort(UsbPortInfo {
            vid: 0x10c4,
            pid: 0xea70,
            serial_number: None,
            manufacturer: Some("Silicon Labs".to_string()),
            product: Some("CP2105 Dual USB to UART".to_string()),
        });

        let info = PortInfo::from_serialport("/dev/ttyUSB0".to_string(), &usb);
        assert_eq!(info.to_string(), "/dev/ttyUSB0 (CP2105 Dual USB to UART)");
    }

    #[test]
    fn test_plain_port() {
        let info = PortInfo::from_serialport("COM3".to_string(), &SerialPortType::Unknown);
        assert_eq!(info.product, None);
        assert_eq!(info.to_string(), "COM3");
    }
}
