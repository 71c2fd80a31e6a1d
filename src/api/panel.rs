//! One register table (coils, discrete inputs, input or holding registers)
//! with its four controls.
use std::collections::HashMap;

use serde::Serialize;
use strum::IntoEnumIterator;

use super::{
    error::{RequestError, Severity},
    single_flight::{SingleFlight, SlotAction, SlotKey, SlotView},
    transport::{ReplyId, Transport},
};
use crate::{protocol::{DataUnit, RegisterKind}, utils::parse_register_value};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NoticeLevel {
    Success,
    Warning,
    Critical,
}

impl From<Severity> for NoticeLevel {
    fn from(severity: Severity) -> Self {
        match severity {
            Severity::Warning => NoticeLevel::Warning,
            Severity::Critical => NoticeLevel::Critical,
        }
    }
}

/// Something the user should see, raised by a control.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notice {
    pub level: NoticeLevel,
    pub kind: RegisterKind,
    pub action: SlotAction,
    pub message: String,
}

/// One display row.
///
/// `hex` is zero-padded upper-case hex of the value for word tables. For bit
/// tables it carries the packed byte of the eight bits starting at this row
/// and is empty on the other seven rows.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Row {
    pub address: u16,
    pub value: u16,
    pub hex: String,
}

impl Row {
    /// `ON`/`OFF` for bits, decimal for words.
    pub fn display_value(&self, kind: RegisterKind) -> String {
        if kind.is_bit() {
            on_off(self.value != 0).to_string()
        } else {
            self.value.to_string()
        }
    }
}

pub fn on_off(value: bool) -> &'static str {
    if value {
        "ON"
    } else {
        "OFF"
    }
}

pub fn word_hex(value: u16) -> String {
    format!("0x{value:04X}")
}

/// Rows for a decoded payload.
pub fn rows_for(unit: &DataUnit) -> Vec<Row> {
    let mut rows = unit
        .rows()
        .map(|(address, value)| Row {
            address,
            value,
            hex: if unit.kind.is_bit() {
                String::new()
            } else {
                word_hex(value)
            },
        })
        .collect::<Vec<_>>();

    if unit.kind.is_bit() {
        for (index, chunk) in unit.values.chunks(8).enumerate() {
            let byte = chunk
                .iter()
                .enumerate()
                .fold(0u8, |acc, (bit, v)| if *v != 0 { acc | (1 << bit) } else { acc });
            rows[index * 8].hex = format!("0x{byte:02X}");
        }
    }
    rows
}

enum FollowUp {
    ReadBack { start: u16, count: u16 },
}

/// Everything the controls of one panel render into.
pub struct PanelState {
    kind: RegisterKind,
    enabled: HashMap<SlotAction, bool>,
    single: Option<Row>,
    read_rows: Vec<Row>,
    write_start: u16,
    write_values: Vec<u16>,
    notices: Vec<Notice>,
    follow_ups: Vec<FollowUp>,
}

impl PanelState {
    fn new(kind: RegisterKind) -> Self {
        Self {
            kind,
            enabled: SlotAction::iter().map(|a| (a, true)).collect(),
            single: None,
            read_rows: Vec::new(),
            write_start: 0,
            write_values: vec![0; 10],
            notices: Vec::new(),
            follow_ups: Vec::new(),
        }
    }

    pub fn is_enabled(&self, action: SlotAction) -> bool {
        self.enabled.get(&action).copied().unwrap_or(true)
    }

    /// Value shown by the single-read control.
    pub fn single_value(&self) -> Option<&Row> {
        self.single.as_ref()
    }

    pub fn read_rows(&self) -> &[Row] {
        &self.read_rows
    }

    /// The editable write table, seeded with zeros.
    pub fn write_rows(&self) -> Vec<Row> {
        let unit = DataUnit::new(self.kind, self.write_start, self.write_values.clone());
        let mut rows = rows_for(&unit);
        if self.kind.is_bit() {
            for row in &mut rows {
                row.hex.clear();
            }
        }
        rows
    }

    pub fn take_notices(&mut self) -> Vec<Notice> {
        std::mem::take(&mut self.notices)
    }

    fn notify(&mut self, action: SlotAction, level: NoticeLevel, message: String) {
        match level {
            NoticeLevel::Success => log::debug!("{message}"),
            NoticeLevel::Warning | NoticeLevel::Critical => log::warn!("{message}"),
        }
        self.notices.push(Notice {
            level,
            kind: self.kind,
            action,
            message,
        });
    }

    fn reject(&mut self, action: SlotAction, err: RequestError) -> Result<ReplyId, RequestError> {
        self.report_error(SlotKey::new(self.kind, action), &err);
        Err(err)
    }

    fn show_single(&mut self, unit: DataUnit) {
        let Some(row) = rows_for(&unit).into_iter().next() else {
            return;
        };
        let message = format!(
            "Single {} read successful - Address: {} Value: {}",
            self.kind.label(),
            row.address,
            row.display_value(self.kind)
        );
        self.single = Some(row);
        self.notify(SlotAction::ReadSingle, NoticeLevel::Success, message);
    }

    fn show_rows(&mut self, unit: DataUnit) {
        let message = format!(
            "Multiple {} read successful - Start address: {} Count: {}",
            self.kind.label(),
            unit.start_address,
            unit.len()
        );
        self.read_rows = rows_for(&unit);
        self.notify(SlotAction::ReadMultiple, NoticeLevel::Success, message);
    }
}

impl SlotView for PanelState {
    fn set_enabled(&mut self, slot: SlotKey, enabled: bool) {
        self.enabled.insert(slot.action, enabled);
    }

    fn report_error(&mut self, slot: SlotKey, error: &RequestError) {
        self.notify(slot.action, error.severity().into(), format!("{slot}: {error}"));
    }
}

/// A register table with read-single, read-multiple, write-single and
/// write-multiple controls, each backed by its own [`SingleFlight`] slot.
pub struct RegisterPanel {
    kind: RegisterKind,
    read_single: SingleFlight<PanelState>,
    read_multiple: SingleFlight<PanelState>,
    write_single: SingleFlight<PanelState>,
    write_multiple: SingleFlight<PanelState>,
    state: PanelState,
}

impl RegisterPanel {
    pub fn new(kind: RegisterKind) -> Self {
        let slot = |action| SingleFlight::new(SlotKey::new(kind, action));
        Self {
            kind,
            read_single: slot(SlotAction::ReadSingle),
            read_multiple: slot(SlotAction::ReadMultiple),
            write_single: slot(SlotAction::WriteSingle),
            write_multiple: slot(SlotAction::WriteMultiple),
            state: PanelState::new(kind),
        }
    }

    pub fn kind(&self) -> RegisterKind {
        self.kind
    }

    pub fn state(&self) -> &PanelState {
        &self.state
    }

    pub fn take_notices(&mut self) -> Vec<Notice> {
        self.state.take_notices()
    }

    pub fn is_pending(&self, action: SlotAction) -> bool {
        self.slot(action).is_pending()
    }

    /// Number of requests this panel still holds, pending or superseded.
    pub fn outstanding(&self) -> usize {
        SlotAction::iter()
            .map(|a| {
                let slot = self.slot(a);
                usize::from(slot.is_pending()) + slot.retired_len()
            })
            .sum()
    }

    pub fn read_single<T: Transport + ?Sized>(
        &mut self,
        transport: &T,
        address: u16,
    ) -> Result<ReplyId, RequestError> {
        let kind = self.kind;
        self.read_single.start(
            transport,
            &mut self.state,
            move |t| t.read_registers(kind, address, 1),
            PanelState::show_single,
        )
    }

    pub fn read_multiple<T: Transport + ?Sized>(
        &mut self,
        transport: &T,
        start: u16,
        count: u16,
    ) -> Result<ReplyId, RequestError> {
        let kind = self.kind;
        if count == 0 || count > kind.max_read_count() {
            return self.state.reject(
                SlotAction::ReadMultiple,
                RequestError::InvalidInput(format!(
                    "count must be 1-{}, got {count}",
                    kind.max_read_count()
                )),
            );
        }
        self.read_multiple.start(
            transport,
            &mut self.state,
            move |t| t.read_registers(kind, start, count),
            PanelState::show_rows,
        )
    }

    /// Write one value; for coils any non-zero value is ON.
    pub fn write_single<T: Transport + ?Sized>(
        &mut self,
        transport: &T,
        address: u16,
        value: u16,
    ) -> Result<ReplyId, RequestError> {
        let kind = self.kind;
        if !kind.is_writable() {
            return self.state.reject(
                SlotAction::WriteSingle,
                RequestError::InvalidInput(format!("{kind} are read-only")),
            );
        }
        self.write_single.start(
            transport,
            &mut self.state,
            move |t| {
                if kind.is_bit() {
                    t.write_single_coil(address, value != 0)
                } else {
                    t.write_single_register(address, value)
                }
            },
            move |state, unit| {
                let shown = rows_for(&unit)
                    .first()
                    .map(|row| row.display_value(kind))
                    .unwrap_or_default();
                state.notify(
                    SlotAction::WriteSingle,
                    NoticeLevel::Success,
                    format!(
                        "Single {} write successful - Address: {} Value: {}",
                        kind.label(),
                        address,
                        shown
                    ),
                );
            },
        )
    }

    /// Write a contiguous run and read it back into the read table on success.
    pub fn write_multiple<T: Transport + ?Sized>(
        &mut self,
        transport: &T,
        start: u16,
        values: Vec<u16>,
    ) -> Result<ReplyId, RequestError> {
        let kind = self.kind;
        if !kind.is_writable() {
            return self.state.reject(
                SlotAction::WriteMultiple,
                RequestError::InvalidInput(format!("{kind} are read-only")),
            );
        }
        if values.is_empty() || values.len() > kind.max_write_count() as usize {
            return self.state.reject(
                SlotAction::WriteMultiple,
                RequestError::InvalidInput(format!(
                    "value count must be 1-{}, got {}",
                    kind.max_write_count(),
                    values.len()
                )),
            );
        }
        let values = if kind.is_bit() {
            values.into_iter().map(|v| u16::from(v != 0)).collect()
        } else {
            values
        };
        self.write_multiple.start(
            transport,
            &mut self.state,
            move |t| t.write_multiple_registers(kind, start, &values),
            move |state, unit| {
                let count = unit.len() as u16;
                state.notify(
                    SlotAction::WriteMultiple,
                    NoticeLevel::Success,
                    format!(
                        "Multiple {} write successful - Start address: {} Count: {}",
                        kind.label(),
                        start,
                        count
                    ),
                );
                state.follow_ups.push(FollowUp::ReadBack { start, count });
            },
        )
    }

    /// Resize the write table; values at addresses that stay in range are kept.
    pub fn set_write_range(&mut self, start: u16, count: u16) -> Result<(), RequestError> {
        let max = self.kind.max_write_count();
        if count == 0 || count > max || start as u32 + count as u32 > 0x1_0000 {
            return self
                .state
                .reject(
                    SlotAction::WriteMultiple,
                    RequestError::InvalidInput(format!(
                        "write range {start}+{count} is out of bounds (count 1-{max})"
                    )),
                )
                .map(|_| ());
        }
        let old_start = self.state.write_start;
        let old = std::mem::take(&mut self.state.write_values);
        self.state.write_start = start;
        self.state.write_values = (0..count)
            .map(|i| {
                let address = start as usize + i as usize;
                address
                    .checked_sub(old_start as usize)
                    .and_then(|offset| old.get(offset).copied())
                    .unwrap_or(0)
            })
            .collect();
        Ok(())
    }

    /// Edit one cell of the write table from user text.
    pub fn set_write_value(&mut self, address: u16, text: &str) -> Result<(), RequestError> {
        let offset = address
            .checked_sub(self.state.write_start)
            .map(usize::from)
            .filter(|o| *o < self.state.write_values.len());
        let parsed = parse_register_value(self.kind, text);
        match (offset, parsed) {
            (Some(offset), Ok(value)) => {
                self.state.write_values[offset] = value;
                Ok(())
            }
            (None, _) => self
                .state
                .reject(
                    SlotAction::WriteMultiple,
                    RequestError::InvalidInput(format!(
                        "address {address} is outside the write table"
                    )),
                )
                .map(|_| ()),
            (_, Err(err)) => self
                .state
                .reject(
                    SlotAction::WriteMultiple,
                    RequestError::InvalidInput(err.to_string()),
                )
                .map(|_| ()),
        }
    }

    pub fn set_all_write_values(&mut self, value: u16) {
        let value = if self.kind.is_bit() {
            u16::from(value != 0)
        } else {
            value
        };
        self.state.write_values.fill(value);
    }

    pub fn write_multiple_from_table<T: Transport + ?Sized>(
        &mut self,
        transport: &T,
    ) -> Result<ReplyId, RequestError> {
        let start = self.state.write_start;
        let values = self.state.write_values.clone();
        self.write_multiple(transport, start, values)
    }

    /// Route a settled reply. Returns `true` when one of this panel's slots
    /// owned it.
    pub fn on_reply_settled<T: Transport + ?Sized>(&mut self, transport: &T, id: ReplyId) -> bool {
        let handled = self.read_single.on_reply_settled(id, &mut self.state)
            || self.read_multiple.on_reply_settled(id, &mut self.state)
            || self.write_single.on_reply_settled(id, &mut self.state)
            || self.write_multiple.on_reply_settled(id, &mut self.state);

        for follow_up in std::mem::take(&mut self.state.follow_ups) {
            match follow_up {
                FollowUp::ReadBack { start, count } => {
                    // failures are already reported to the state
                    let _ = self.read_multiple(transport, start, count);
                }
            }
        }
        handled
    }

    /// Drop superseded replies that settled without an event.
    pub fn collect_retired(&mut self) -> usize {
        self.read_single.collect_retired()
            + self.read_multiple.collect_retired()
            + self.write_single.collect_retired()
            + self.write_multiple.collect_retired()
    }

    fn slot(&self, action: SlotAction) -> &SingleFlight<PanelState> {
        match action {
            SlotAction::ReadSingle => &self.read_single,
            SlotAction::ReadMultiple => &self.read_multiple,
            SlotAction::WriteSingle => &self.write_single,
            SlotAction::WriteMultiple => &self.write_multiple,
        }
    }
}
