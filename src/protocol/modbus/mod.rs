mod frame;
mod header;
mod pull_get_bits;
mod pull_get_words;
mod pull_set_coils;
mod pull_set_holdings;

use anyhow::{anyhow, ensure, Result};
use std::fmt;

use rmodbus::{client::ModbusRequest, ErrorKind};

use crate::protocol::types::{DataUnit, RegisterKind};

pub use frame::{read_modbus_frame, FrameError};
pub use header::{parse_modbus_header, HEADER_LEN};
pub use pull_get_bits::{generate_pull_get_bits_request, parse_pull_get_bits};
pub use pull_get_words::{generate_pull_get_words_request, parse_pull_get_words};
pub use pull_set_coils::{generate_pull_set_coil_request, generate_pull_set_coils_request};
pub use pull_set_holdings::{generate_pull_set_holding_request, generate_pull_set_holdings_request};

/// One request a client can put on the bus.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
    Read {
        kind: RegisterKind,
        start_address: u16,
        count: u16,
    },
    WriteSingleCoil {
        address: u16,
        value: bool,
    },
    WriteSingleRegister {
        address: u16,
        value: u16,
    },
    /// Function 0x0F for coils (values 0/1), 0x10 for holding registers.
    WriteMultiple {
        kind: RegisterKind,
        start_address: u16,
        values: Vec<u16>,
    },
}

impl Operation {
    pub fn kind(&self) -> RegisterKind {
        match self {
            Operation::Read { kind, .. } | Operation::WriteMultiple { kind, .. } => *kind,
            Operation::WriteSingleCoil { .. } => RegisterKind::Coils,
            Operation::WriteSingleRegister { .. } => RegisterKind::HoldingRegisters,
        }
    }

    pub fn start_address(&self) -> u16 {
        match self {
            Operation::Read { start_address, .. }
            | Operation::WriteMultiple { start_address, .. } => *start_address,
            Operation::WriteSingleCoil { address, .. }
            | Operation::WriteSingleRegister { address, .. } => *address,
        }
    }

    pub fn count(&self) -> u16 {
        match self {
            Operation::Read { count, .. } => *count,
            Operation::WriteMultiple { values, .. } => values.len() as u16,
            Operation::WriteSingleCoil { .. } | Operation::WriteSingleRegister { .. } => 1,
        }
    }

    /// Protocol limits only: counts, address overflow and table writability.
    pub fn validate(&self) -> Result<()> {
        let kind = self.kind();
        match self {
            Operation::Read { count, .. } => {
                ensure!(
                    (1..=kind.max_read_count()).contains(count),
                    "Read count for {kind} must be 1-{}, got {count}",
                    kind.max_read_count()
                );
            }
            Operation::WriteMultiple { values, .. } => {
                ensure!(kind.is_writable(), "{kind} are read-only");
                ensure!(
                    !values.is_empty() && values.len() <= kind.max_write_count() as usize,
                    "Write count for {kind} must be 1-{}, got {}",
                    kind.max_write_count(),
                    values.len()
                );
            }
            Operation::WriteSingleCoil { .. } | Operation::WriteSingleRegister { .. } => {}
        }
        let last = self.start_address() as u32 + self.count() as u32 - 1;
        ensure!(
            last <= u16::MAX as u32,
            "Address range {}..={last} exceeds 65535",
            self.start_address()
        );
        Ok(())
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operation::Read {
                kind,
                start_address,
                count,
            } => write!(f, "read {kind} @{start_address} x{count}"),
            Operation::WriteSingleCoil { address, value } => {
                write!(f, "write coil @{address} = {}", if *value { "ON" } else { "OFF" })
            }
            Operation::WriteSingleRegister { address, value } => {
                write!(f, "write holding register @{address} = 0x{value:04X}")
            }
            Operation::WriteMultiple {
                kind,
                start_address,
                values,
            } => write!(f, "write {kind} @{start_address} x{}", values.len()),
        }
    }
}

/// Why a response frame could not be turned into a [`DataUnit`].
#[derive(Debug, Clone, PartialEq, Eq, derive_more::Display, derive_more::Error)]
pub enum DecodeError {
    /// The slave answered with an exception response.
    #[display("device exception 0x{_0:02X} ({})", exception_text(*_0))]
    Exception(#[error(not(source))] u8),
    /// CRC mismatch, wrong unit/function or truncated payload.
    #[display("malformed response: {_0}")]
    Frame(#[error(not(source))] String),
}

/// Human-readable name of a Modbus exception code.
pub fn exception_text(code: u8) -> &'static str {
    match code {
        0x01 => "illegal function",
        0x02 => "illegal data address",
        0x03 => "illegal data value",
        0x04 => "slave device failure",
        0x05 => "acknowledge",
        0x06 => "slave device busy",
        0x08 => "memory parity error",
        0x0A => "gateway path unavailable",
        0x0B => "gateway target device failed to respond",
        _ => "unknown exception",
    }
}

/// An encoded request together with the state needed to check its response.
pub struct PreparedRequest {
    pub operation: Operation,
    pub frame: Vec<u8>,
    request: ModbusRequest,
}

impl PreparedRequest {
    /// Validate and encode `operation` for slave `unit_id`.
    pub fn new(unit_id: u8, operation: Operation) -> Result<Self> {
        operation.validate()?;
        let (request, frame) = match &operation {
            Operation::Read {
                kind,
                start_address,
                count,
            } if kind.is_bit() => {
                generate_pull_get_bits_request(unit_id, *kind, *start_address, *count)?
            }
            Operation::Read {
                kind,
                start_address,
                count,
            } => generate_pull_get_words_request(unit_id, *kind, *start_address, *count)?,
            Operation::WriteSingleCoil { address, value } => {
                generate_pull_set_coil_request(unit_id, *address, *value)?
            }
            Operation::WriteSingleRegister { address, value } => {
                generate_pull_set_holding_request(unit_id, *address, *value)?
            }
            Operation::WriteMultiple {
                kind: RegisterKind::Coils,
                start_address,
                values,
            } => {
                let bits = values.iter().map(|v| *v != 0).collect::<Vec<_>>();
                generate_pull_set_coils_request(unit_id, *start_address, &bits)?
            }
            Operation::WriteMultiple {
                kind: RegisterKind::HoldingRegisters,
                start_address,
                values,
            } => generate_pull_set_holdings_request(unit_id, *start_address, values)?,
            Operation::WriteMultiple { kind, .. } => {
                return Err(anyhow!("Cannot write {kind}"));
            }
        };
        log::debug!(
            "Prepared {} for unit {}: {:02x?}",
            operation,
            unit_id,
            frame
        );
        Ok(Self {
            operation,
            frame,
            request,
        })
    }

    /// An exception frame answering this request: our unit, our function
    /// with the high bit set, one code byte and the CRC.
    fn is_exception(&self, response: &[u8]) -> bool {
        response.len() == 5
            && response[0] == self.frame[0]
            && response[1] == self.frame[1] | 0x80
    }

    /// Check `response` against this request and decode its payload.
    ///
    /// Writes decode to the range that was written, so callers can treat
    /// every settled reply the same way.
    pub fn decode(&self, response: &[u8]) -> Result<DataUnit, DecodeError> {
        if let Err(err) = self.request.parse_ok(response) {
            // CRC and unit id are checked before the function code
            return Err(match err {
                ErrorKind::FrameCRCError | ErrorKind::FrameBroken => {
                    DecodeError::Frame(format!("{err:?}"))
                }
                _ if self.is_exception(response) => DecodeError::Exception(response[2]),
                _ => DecodeError::Frame(format!("{err:?}")),
            });
        }

        let kind = self.operation.kind();
        let start = self.operation.start_address();
        match &self.operation {
            Operation::Read { count, .. } if kind.is_bit() => {
                parse_pull_get_bits(&self.request, response, *count)
                    .map(|bits| DataUnit::from_bits(kind, start, &bits))
                    .map_err(|err| DecodeError::Frame(err.to_string()))
            }
            Operation::Read { count, .. } => parse_pull_get_words(&self.request, response, *count)
                .map(|values| DataUnit::new(kind, start, values))
                .map_err(|err| DecodeError::Frame(err.to_string())),
            Operation::WriteSingleCoil { value, .. } => {
                Ok(DataUnit::from_bits(kind, start, &[*value]))
            }
            Operation::WriteSingleRegister { value, .. } => {
                Ok(DataUnit::new(kind, start, vec![*value]))
            }
            Operation::WriteMultiple { values, .. } => {
                Ok(DataUnit::new(kind, start, values.clone()))
            }
        }
    }
}
