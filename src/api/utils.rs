use anyhow::{anyhow, Result};
use std::time::Duration;

use crate::protocol::{ConnectionConfig, DataBits, Parity, StopBits};

/// Open the serial port described by `config`, enabling exclusive access on Unix systems.
pub fn open_serial_port(config: &ConnectionConfig) -> Result<Box<dyn serialport::SerialPort>> {
    let port = config.port_name.as_str();
    let builder = serialport::new(port, config.baud_rate.as_u32())
        .data_bits(data_bits(config.data_bits))
        .parity(parity(config.parity)?)
        .stop_bits(stop_bits(config.stop_bits)?)
        .flow_control(serialport::FlowControl::None)
        .timeout(Duration::from_millis(config.timeout_ms));

    #[cfg(unix)]
    {
        let mut handle = builder
            .open_native()
            .map_err(|err| anyhow!("Failed to open port {port}: {err}"))?;
        handle
            .set_exclusive(true)
            .map_err(|err| anyhow!("Failed to acquire exclusive access to {port}: {err}"))?;
        Ok(Box::new(handle))
    }

    #[cfg(not(unix))]
    {
        builder
            .open()
            .map_err(|err| anyhow!("Failed to open port {port}: {err}"))
    }
}

fn data_bits(bits: DataBits) -> serialport::DataBits {
    match bits {
        DataBits::Five => serialport::DataBits::Five,
        DataBits::Six => serialport::DataBits::Six,
        DataBits::Seven => serialport::DataBits::Seven,
        DataBits::Eight => serialport::DataBits::Eight,
    }
}

fn parity(parity: Parity) -> Result<serialport::Parity> {
    match parity {
        Parity::None => Ok(serialport::Parity::None),
        Parity::Even => Ok(serialport::Parity::Even),
        Parity::Odd => Ok(serialport::Parity::Odd),
        other => Err(anyhow!(
            "{other} parity is not supported by the serial backend"
        )),
    }
}

fn stop_bits(stop_bits: StopBits) -> Result<serialport::StopBits> {
    match stop_bits {
        StopBits::One => Ok(serialport::StopBits::One),
        StopBits::Two => Ok(serialport::StopBits::Two),
        StopBits::OneAndHalf => Err(anyhow!(
            "1.5 stop bits are not supported by the serial backend"
        )),
    }
}
