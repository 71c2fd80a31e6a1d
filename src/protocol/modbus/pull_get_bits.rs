use anyhow::{bail, ensure, Result};

use rmodbus::{client::ModbusRequest, ModbusProto};

use crate::protocol::types::RegisterKind;

/// Build a read request for a single-bit table (0x01 coils, 0x02 discrete inputs).
pub fn generate_pull_get_bits_request(
    id: u8,
    kind: RegisterKind,
    start_address: u16,
    count: u16,
) -> Result<(ModbusRequest, Vec<u8>)> {
    let mut request = ModbusRequest::new(id, ModbusProto::Rtu);
    let mut raw = Vec::with_capacity(8);
    match kind {
        RegisterKind::Coils => request.generate_get_coils(start_address, count, &mut raw)?,
        RegisterKind::DiscreteInputs => {
            request.generate_get_discretes(start_address, count, &mut raw)?
        }
        other => bail!("{other} are not a single-bit table"),
    }
    Ok((request, raw))
}

/// Unpack a bit read response; the first bit is the LSB of the first data byte.
pub fn parse_pull_get_bits(
    request: &ModbusRequest,
    response: &[u8],
    count: u16,
) -> Result<Vec<bool>> {
    let mut values = Vec::with_capacity(count as usize);
    request.parse_bool(response, &mut values)?;
    ensure!(
        values.len() == count as usize,
        "Expected {count} bits in response, got {}",
        values.len()
    );
    log::debug!("Received bits: {values:?}");

    Ok(values)
}
