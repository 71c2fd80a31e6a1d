use anyhow::Result;

use rmodbus::{client::ModbusRequest, ModbusProto};

/// Build a write single coil request (0x05).
pub fn generate_pull_set_coil_request(
    id: u8,
    address: u16,
    value: bool,
) -> Result<(ModbusRequest, Vec<u8>)> {
    let mut request = ModbusRequest::new(id, ModbusProto::Rtu);
    let mut raw = Vec::with_capacity(8);
    request.generate_set_coil(address, value, &mut raw)?;
    Ok((request, raw))
}

/// Build a write multiple coils request (0x0F); bits are packed LSB first.
pub fn generate_pull_set_coils_request(
    id: u8,
    start_address: u16,
    values: &[bool],
) -> Result<(ModbusRequest, Vec<u8>)> {
    let mut request = ModbusRequest::new(id, ModbusProto::Rtu);
    let mut raw = Vec::with_capacity(9 + values.len().div_ceil(8));
    request.generate_set_coils_bulk(start_address, values, &mut raw)?;
    Ok((request, raw))
}
