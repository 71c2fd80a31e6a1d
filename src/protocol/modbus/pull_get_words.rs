use anyhow::{bail, ensure, Result};

use rmodbus::{client::ModbusRequest, ModbusProto};

use crate::protocol::types::RegisterKind;

/// Build a read request for a 16-bit table (0x03 holding, 0x04 input registers).
pub fn generate_pull_get_words_request(
    id: u8,
    kind: RegisterKind,
    start_address: u16,
    count: u16,
) -> Result<(ModbusRequest, Vec<u8>)> {
    let mut request = ModbusRequest::new(id, ModbusProto::Rtu);
    let mut raw = Vec::with_capacity(8);
    match kind {
        RegisterKind::HoldingRegisters => {
            request.generate_get_holdings(start_address, count, &mut raw)?
        }
        RegisterKind::InputRegisters => {
            request.generate_get_inputs(start_address, count, &mut raw)?
        }
        other => bail!("{other} are not a register table"),
    }
    Ok((request, raw))
}

/// Big-endian register values from a word read response.
pub fn parse_pull_get_words(
    request: &ModbusRequest,
    response: &[u8],
    count: u16,
) -> Result<Vec<u16>> {
    let mut values = Vec::with_capacity(count as usize);
    request.parse_u16(response, &mut values)?;
    ensure!(
        values.len() == count as usize,
        "Expected {count} registers in response, got {}",
        values.len()
    );
    log::debug!("Received registers: {values:04x?}");

    Ok(values)
}
