use anyhow::Result;

use rmodbus::{guess_response_frame_len, ModbusProto};

/// Bytes needed before the total RTU response length can be known:
/// unit id, function code and either the byte count or the exception code.
pub const HEADER_LEN: usize = 3;

/// Total length of an RTU response frame (CRC included) from its first bytes.
pub fn parse_modbus_header(buf: [u8; HEADER_LEN]) -> Result<usize> {
    Ok(guess_response_frame_len(&buf, ModbusProto::Rtu)? as usize)
}
