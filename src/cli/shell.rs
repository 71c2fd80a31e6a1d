//! Line-oriented interactive session over all four register tables.
use anyhow::{anyhow, bail, Result};
use std::{io::Write, str::FromStr};
use strum::IntoEnumIterator;

use super::actions::format_rows;
use crate::{
    api::{ModbusConnection, Notice, NoticeLevel, SlotAction, Transport},
    core::{bus::spawn_stdin_reader, Bus, Frontend, LoopControl, Workbench},
    protocol::{ConnectionConfig, RegisterKind},
    utils::{parse_register_value, parse_u16, parse_value_list},
};

const HELP: &str = "\
commands:
  read <kind> <address> [count]         read one value, or a run into the read table
  write <kind> <address> <value>        write one coil (on/off) or holding register
  write-multiple <kind> <address> <v,..> write a run, then read it back
  table <kind> [<start> <count>]        show or resize the write table
  set <kind> <address> <value>          edit one write table cell
  fill <kind> <value>                   set every write table cell
  send <kind>                           write the whole write table
  show <kind>                           show the last values read
  status                                connection and pending requests
  log                                   notice history
  quit
kinds: coils, discrete, input, holding";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShellCommand {
    Read {
        kind: RegisterKind,
        address: u16,
        count: Option<u16>,
    },
    Write {
        kind: RegisterKind,
        address: u16,
        value: u16,
    },
    WriteMultiple {
        kind: RegisterKind,
        address: u16,
        values: Vec<u16>,
    },
    Table {
        kind: RegisterKind,
        range: Option<(u16, u16)>,
    },
    Set {
        kind: RegisterKind,
        address: u16,
        value: String,
    },
    Fill {
        kind: RegisterKind,
        value: u16,
    },
    Send(RegisterKind),
    Show(RegisterKind),
    Status,
    Log,
    Help,
    Quit,
}

fn arg<'a>(words: &[&'a str], index: usize, what: &str) -> Result<&'a str> {
    words
        .get(index)
        .copied()
        .ok_or_else(|| anyhow!("missing {what}"))
}

impl FromStr for ShellCommand {
    type Err = anyhow::Error;

    fn from_str(line: &str) -> Result<Self> {
        let words = line.split_whitespace().collect::<Vec<_>>();
        let Some(command) = words.first() else {
            bail!("empty command");
        };
        let kind = || -> Result<RegisterKind> { arg(&words, 1, "register kind")?.parse() };
        let address = || -> Result<u16> { parse_u16(arg(&words, 2, "address")?) };

        Ok(match command.to_ascii_lowercase().as_str() {
            "read" | "r" => ShellCommand::Read {
                kind: kind()?,
                address: address()?,
                count: words.get(3).map(|c| parse_u16(c)).transpose()?,
            },
            "write" | "w" => {
                let kind = kind()?;
                ShellCommand::Write {
                    kind,
                    address: address()?,
                    value: parse_register_value(kind, arg(&words, 3, "value")?)?,
                }
            }
            "write-multiple" | "wm" => {
                let kind = kind()?;
                ShellCommand::WriteMultiple {
                    kind,
                    address: address()?,
                    values: parse_value_list(kind, &words[3.min(words.len())..].join(","))?,
                }
            }
            "table" => ShellCommand::Table {
                kind: kind()?,
                range: match (words.get(2), words.get(3)) {
                    (Some(start), Some(count)) => Some((parse_u16(start)?, parse_u16(count)?)),
                    (None, None) => None,
                    _ => bail!("table needs both <start> and <count>"),
                },
            },
            "set" => ShellCommand::Set {
                kind: kind()?,
                address: address()?,
                value: arg(&words, 3, "value")?.to_string(),
            },
            "fill" => {
                let kind = kind()?;
                ShellCommand::Fill {
                    kind,
                    value: parse_register_value(kind, arg(&words, 2, "value")?)?,
                }
            }
            "send" => ShellCommand::Send(kind()?),
            "show" => ShellCommand::Show(kind()?),
            "status" => ShellCommand::Status,
            "log" => ShellCommand::Log,
            "help" | "?" => ShellCommand::Help,
            "quit" | "exit" | "q" => ShellCommand::Quit,
            other => bail!("unknown command '{other}' (try help)"),
        })
    }
}

/// Prints notices and tables to a writer.
pub struct ShellFrontend<W: Write> {
    out: W,
}

impl<W: Write> ShellFrontend<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }

    fn print_notices(&mut self, notices: &[Notice]) -> std::io::Result<()> {
        for notice in notices {
            let tag = match notice.level {
                NoticeLevel::Success => "ok",
                NoticeLevel::Warning => "warning",
                NoticeLevel::Critical => "error",
            };
            writeln!(self.out, "[{tag}] {}", notice.message)?;
        }
        Ok(())
    }

    fn show<T: Transport>(&mut self, bench: &Workbench<T>, kind: RegisterKind) -> Result<()> {
        let panel = bench
            .panel(kind)
            .ok_or_else(|| anyhow!("no panel for {kind}"))?;
        let state = panel.state();
        if let Some(row) = state.single_value() {
            writeln!(
                self.out,
                "{} @{}: {} ({})",
                kind.label(),
                row.address,
                row.display_value(kind),
                row.hex
            )?;
        }
        if state.read_rows().is_empty() {
            writeln!(self.out, "read table is empty")?;
        } else {
            write!(self.out, "{}", format_rows(kind, state.read_rows()))?;
        }
        Ok(())
    }

    fn execute<T: Transport>(
        &mut self,
        bench: &mut Workbench<T>,
        command: ShellCommand,
    ) -> Result<LoopControl> {
        let notices = match command {
            ShellCommand::Read {
                kind,
                address,
                count: None,
            } => bench.read_single(kind, address).1,
            ShellCommand::Read {
                kind,
                address,
                count: Some(count),
            } => bench.read_multiple(kind, address, count).1,
            ShellCommand::Write {
                kind,
                address,
                value,
            } => bench.write_single(kind, address, value).1,
            ShellCommand::WriteMultiple {
                kind,
                address,
                values,
            } => bench.write_multiple(kind, address, values).1,
            ShellCommand::Table { kind, range } => {
                let notices = bench
                    .with_panel(kind, |panel, _| {
                        if let Some((start, count)) = range {
                            let _ = panel.set_write_range(start, count);
                        }
                    })
                    .map(|(_, n)| n)
                    .unwrap_or_default();
                if let Some(panel) = bench.panel(kind) {
                    write!(self.out, "{}", format_rows(kind, &panel.state().write_rows()))?;
                }
                notices
            }
            ShellCommand::Set {
                kind,
                address,
                value,
            } => bench
                .with_panel(kind, |panel, _| {
                    let _ = panel.set_write_value(address, &value);
                })
                .map(|(_, n)| n)
                .unwrap_or_default(),
            ShellCommand::Fill { kind, value } => bench
                .with_panel(kind, |panel, _| panel.set_all_write_values(value))
                .map(|(_, n)| n)
                .unwrap_or_default(),
            ShellCommand::Send(kind) => bench
                .with_panel(kind, |panel, t| {
                    let _ = panel.write_multiple_from_table(t);
                })
                .map(|(_, n)| n)
                .unwrap_or_default(),
            ShellCommand::Show(kind) => {
                self.show(bench, kind)?;
                Vec::new()
            }
            ShellCommand::Status => {
                writeln!(
                    self.out,
                    "connected: {}, outstanding requests: {}",
                    bench.transport().is_connected(),
                    bench.outstanding()
                )?;
                for kind in RegisterKind::all() {
                    if let Some(panel) = bench.panel(*kind) {
                        let busy = SlotAction::iter()
                            .filter(|a| panel.is_pending(*a))
                            .map(|a| a.to_string())
                            .collect::<Vec<_>>();
                        if !busy.is_empty() {
                            writeln!(self.out, "  {kind}: {}", busy.join(", "))?;
                        }
                    }
                }
                Vec::new()
            }
            ShellCommand::Log => {
                for entry in bench.logs().entries() {
                    writeln!(
                        self.out,
                        "{} {:?} {}",
                        entry.timestamp.format("%H:%M:%S%.3f"),
                        entry.level,
                        entry.message
                    )?;
                }
                Vec::new()
            }
            ShellCommand::Help => {
                writeln!(self.out, "{HELP}")?;
                Vec::new()
            }
            ShellCommand::Quit => return Ok(LoopControl::Quit),
        };
        self.print_notices(&notices)?;
        self.out.flush()?;
        Ok(LoopControl::Continue)
    }
}

impl<T: Transport, W: Write> Frontend<T> for ShellFrontend<W> {
    fn on_input(&mut self, bench: &mut Workbench<T>, line: &str) -> Result<LoopControl> {
        match line.parse::<ShellCommand>() {
            Ok(command) => self.execute(bench, command),
            Err(err) => {
                writeln!(self.out, "{err}")?;
                Ok(LoopControl::Continue)
            }
        }
    }

    fn on_notices(&mut self, bench: &Workbench<T>, notices: &[Notice]) {
        if let Err(err) = self.print_notices(notices) {
            log::warn!("Failed to print notices: {err}");
            return;
        }
        // a finished read refreshes its table
        for notice in notices {
            let is_read = matches!(
                notice.action,
                SlotAction::ReadSingle | SlotAction::ReadMultiple
            );
            if notice.level == NoticeLevel::Success && is_read {
                if let Err(err) = self.show(bench, notice.kind) {
                    log::warn!("Failed to print table: {err}");
                }
            }
        }
        let _ = self.out.flush();
    }
}

/// Connect and run the shell on stdin/stdout until `quit` or EOF.
pub fn run(config: ConnectionConfig) -> Result<()> {
    let connection = ModbusConnection::new();
    connection.connect(&config)?;
    let replies = connection.events().clone();

    let bus = Bus::new();
    spawn_stdin_reader(bus.tx.clone())?;

    if let (Some(port), Some(baud), Some(unit)) = (
        connection.port_name(),
        connection.baud_rate(),
        connection.unit_id(),
    ) {
        println!("Connected to {port} at {baud} baud (unit {unit}). Type 'help' for commands.");
    }
    let mut bench = Workbench::new(connection, replies);
    let mut frontend = ShellFrontend::new(std::io::stdout());
    bench.run(&bus.rx, &mut frontend)
}
