use anyhow::{anyhow, Result};
use serde::Serialize;

use clap::ArgMatches;

use super::config::connection_config;
use crate::{
    api::{panel::rows_for, ModbusConnection, Reply, Row, Transport},
    protocol::{tty::available_ports_sorted, DataUnit, RegisterKind},
    utils::{parse_coil, parse_u16, parse_value_list},
};

#[derive(Serialize)]
struct ReplyOutput<'a> {
    operation: String,
    kind: RegisterKind,
    start_address: u16,
    rows: &'a [Row],
}

/// Render rows as aligned text, the way the shell and one-shot reads print them.
pub fn format_rows(kind: RegisterKind, rows: &[Row]) -> String {
    let mut out = String::new();
    for row in rows {
        let line = if kind.is_bit() {
            format!(
                "{:>5}  {:<4}  {:>3}  {}",
                row.address,
                row.hex,
                row.value,
                row.display_value(kind)
            )
        } else {
            format!("{:>5}  {}  {:>5}", row.address, row.hex, row.value)
        };
        out.push_str(line.trim_end());
        out.push('\n');
    }
    out
}

fn print_unit(operation: &str, unit: &DataUnit, json: bool) -> Result<()> {
    let rows = rows_for(unit);
    if json {
        let out = ReplyOutput {
            operation: operation.to_string(),
            kind: unit.kind,
            start_address: unit.start_address,
            rows: &rows,
        };
        println!("{}", serde_json::to_string_pretty(&out)?);
    } else {
        print!("{}", format_rows(unit.kind, &rows));
    }
    Ok(())
}

fn list_ports(json: bool) -> Result<()> {
    let ports = available_ports_sorted();
    if json {
        println!("{}", serde_json::to_string_pretty(&ports)?);
    } else {
        for p in &ports {
            match &p.description {
                Some(desc) => println!("{}\t{}", p.port_name, desc),
                None => println!("{}", p.port_name),
            }
        }
    }
    Ok(())
}

async fn settle(reply: Reply, json: bool) -> Result<()> {
    let operation = reply.operation().to_string();
    match reply.settled().await {
        Ok(unit) => {
            log::info!("{operation} succeeded");
            print_unit(&operation, unit, json)
        }
        Err(err) => Err(anyhow!("{operation} failed: {err}")),
    }
}

async fn one_shot(name: &str, sub: &ArgMatches) -> Result<()> {
    let config = connection_config(sub)?;
    let json = sub.get_flag("json");
    let address = sub.get_one::<u16>("address").copied().unwrap_or(0);

    let connection = ModbusConnection::new();
    connection.connect(&config)?;

    let reply = match name {
        "read" => {
            let kind = required::<String>(sub, "kind")?.parse::<RegisterKind>()?;
            let count = sub.get_one::<u16>("count").copied().unwrap_or(1);
            connection.read_registers(kind, address, count)?
        }
        "write-coil" => {
            let value = parse_coil(required::<String>(sub, "value")?)?;
            connection.write_single_coil(address, value)?
        }
        "write-register" => {
            let value = parse_u16(required::<String>(sub, "value")?)?;
            connection.write_single_register(address, value)?
        }
        "write-multiple" => {
            let kind = required::<String>(sub, "kind")?.parse::<RegisterKind>()?;
            let values = parse_value_list(kind, required::<String>(sub, "values")?)?;
            connection.write_multiple_registers(kind, address, &values)?
        }
        other => return Err(anyhow!("Unknown command {other}")),
    };

    let result = settle(reply, json).await;
    connection.close();
    result
}

fn required<'a, T: Clone + Send + Sync + 'static>(
    matches: &'a ArgMatches,
    id: &str,
) -> Result<&'a T> {
    matches
        .get_one::<T>(id)
        .ok_or_else(|| anyhow!("Missing required argument --{id}"))
}

/// Run whatever the command line asked for.
pub async fn run(matches: &ArgMatches) -> Result<()> {
    if matches.get_flag("list-ports") {
        return list_ports(matches.get_flag("json"));
    }

    match matches.subcommand() {
        Some(("shell", sub)) => {
            let config = connection_config(sub)?;
            tokio::task::spawn_blocking(move || super::shell::run(config))
                .await
                .map_err(|err| anyhow!("Shell thread failed: {err}"))?
        }
        Some((name, sub)) => one_shot(name, sub).await,
        None => Err(anyhow!(
            "Nothing to do; try --list-ports, a subcommand or --help"
        )),
    }
}
