//! Serial port discovery for the connection settings.

use serde::Serialize;
use serialport::{SerialPortInfo, SerialPortType};
use std::collections::HashSet;

/// What the port picker shows for one device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PortSummary {
    pub port_name: String,
    pub port_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl From<&SerialPortInfo> for PortSummary {
    fn from(info: &SerialPortInfo) -> Self {
        let (port_type, description) = match &info.port_type {
            SerialPortType::UsbPort(usb) => (
                format!("usb {:04x}:{:04x}", usb.vid, usb.pid),
                usb.product.clone().or_else(|| usb.manufacturer.clone()),
            ),
            SerialPortType::PciPort => ("pci".to_string(), None),
            SerialPortType::BluetoothPort => ("bluetooth".to_string(), None),
            SerialPortType::Unknown => ("unknown".to_string(), None),
        };
        Self {
            port_name: info.port_name.clone(),
            port_type,
            description,
        }
    }
}

/// Currently attached serial ports, USB adapters first.
pub fn available_ports_sorted() -> Vec<PortSummary> {
    let raw_ports = match serialport::available_ports() {
        Ok(ports) => ports,
        Err(err) => {
            log::warn!("Serial port enumeration failed: {err}");
            Vec::new()
        }
    };
    sort_and_dedup_ports(raw_ports.iter().map(PortSummary::from).collect())
}

pub(crate) fn sort_and_dedup_ports(raw_ports: Vec<PortSummary>) -> Vec<PortSummary> {
    let mut seen: HashSet<String> = HashSet::new();
    let mut ports: Vec<PortSummary> = raw_ports
        .into_iter()
        .filter(|p| seen.insert(p.port_name.to_lowercase()))
        .collect();

    fn priority(name: &str) -> i32 {
        let n = name.to_lowercase();
        if n.contains("ttyusb") || n.contains("usb") {
            0
        } else if n.contains("acm") {
            1
        } else if n.starts_with("com") {
            2
        } else {
            10
        }
    }

    // COM10 after COM9
    fn numeric_suffix(name: &str) -> u32 {
        let digits: String = name
            .chars()
            .rev()
            .take_while(|c| c.is_ascii_digit())
            .collect::<Vec<_>>()
            .into_iter()
            .rev()
            .collect();
        digits.parse().unwrap_or(0)
    }

    ports.sort_by(|a, b| {
        priority(&a.port_name)
            .cmp(&priority(&b.port_name))
            .then_with(|| {
                let stem_a = a.port_name.trim_end_matches(|c: char| c.is_ascii_digit());
                let stem_b = b.port_name.trim_end_matches(|c: char| c.is_ascii_digit());
                stem_a.cmp(stem_b)
            })
            .then_with(|| numeric_suffix(&a.port_name).cmp(&numeric_suffix(&b.port_name)))
    });

    ports
}
