use anyhow::Result;

use rmodbus::{client::ModbusRequest, ModbusProto};

/// Build a frame to write a single holding register (function 0x06)
pub fn generate_pull_set_holding_request(
    id: u8,
    address: u16,
    value: u16,
) -> Result<(ModbusRequest, Vec<u8>)> {
    let mut request = ModbusRequest::new(id, ModbusProto::Rtu);
    let mut raw = Vec::with_capacity(8);
    request.generate_set_holding(address, value, &mut raw)?;
    Ok((request, raw))
}

/// Build a frame to write consecutive holding registers (function 0x10)
pub fn generate_pull_set_holdings_request(
    id: u8,
    start_address: u16,
    values: &[u16],
) -> Result<(ModbusRequest, Vec<u8>)> {
    let mut request = ModbusRequest::new(id, ModbusProto::Rtu);
    let mut raw = Vec::with_capacity(9 + values.len() * 2);
    request.generate_set_holdings_bulk(start_address, values, &mut raw)?;
    Ok((request, raw))
}
