//! Parsing of user-typed register input.
//!
//! Every frontend (CLI flags, shell lines, write tables) accepts the same
//! spellings, so the rules live here.
use anyhow::{anyhow, Result};

use crate::protocol::RegisterKind;

/// Parse a 16-bit value: `0x`-prefixed hex or plain decimal. Empty input is 0.
pub fn parse_u16(text: &str) -> Result<u16> {
    let text = text.trim();
    if text.is_empty() {
        return Ok(0);
    }
    let parsed = if text.starts_with("0x") || text.starts_with("0X") {
        u16::from_str_radix(&text[2..], 16)
    } else {
        text.parse::<u16>()
    };
    parsed.map_err(|_| anyhow!("'{text}' is not a 16-bit value (use decimal or 0x hex)"))
}

/// Parse a coil state: `on`/`off`, `true`/`false` or `1`/`0`.
pub fn parse_coil(text: &str) -> Result<bool> {
    match text.trim().to_ascii_lowercase().as_str() {
        "on" | "true" | "1" => Ok(true),
        "off" | "false" | "0" => Ok(false),
        other => Err(anyhow!("'{other}' is not a coil state (use on/off)")),
    }
}

/// Parse one value for a table of `kind`; bits come back as 0/1.
pub fn parse_register_value(kind: RegisterKind, text: &str) -> Result<u16> {
    if kind.is_bit() {
        parse_coil(text).map(u16::from)
    } else {
        parse_u16(text)
    }
}

/// Parse a comma or whitespace separated list of values for `kind`.
pub fn parse_value_list(kind: RegisterKind, text: &str) -> Result<Vec<u16>> {
    text.split(|c: char| c == ',' || c.is_whitespace())
        .filter(|s| !s.is_empty())
        .map(|s| parse_register_value(kind, s))
        .collect()
}
