pub mod modbus;
pub mod tty;
pub mod types;

pub use types::{
    BaudRate, ConnectionConfig, DataBits, DataUnit, Parity, RegisterKind, StopBits,
};
