use anyhow::{anyhow, Result};
use clap::{parser::ValueSource, ArgMatches};
use std::path::Path;

use crate::protocol::{BaudRate, ConnectionConfig, DataBits, Parity, StopBits};

fn given(matches: &ArgMatches, id: &str) -> bool {
    matches.value_source(id) == Some(ValueSource::CommandLine)
}

/// Build connection settings from `--config` and the serial flags.
///
/// Without a file every flag applies, defaults included. With a file only
/// flags typed on the command line override it.
pub fn connection_config(matches: &ArgMatches) -> Result<ConnectionConfig> {
    let file = matches.get_one::<String>("config");
    let mut config = match file {
        Some(path) => ConnectionConfig::from_file(Path::new(path))?,
        None => ConnectionConfig::new(String::new()),
    };
    let apply = |id: &str| file.is_none() || given(matches, id);

    if let Some(port) = matches.get_one::<String>("port") {
        config.port_name = port.clone();
    }
    if apply("baud-rate") {
        if let Some(baud) = matches.get_one::<u32>("baud-rate") {
            config.baud_rate = BaudRate::try_from(*baud)?;
        }
    }
    if apply("data-bits") {
        if let Some(bits) = matches.get_one::<u8>("data-bits") {
            config.data_bits = DataBits::try_from(*bits)?;
        }
    }
    if apply("parity") {
        if let Some(parity) = matches.get_one::<String>("parity") {
            config.parity = parity.parse::<Parity>()?;
        }
    }
    if apply("stop-bits") {
        if let Some(stop) = matches.get_one::<String>("stop-bits") {
            config.stop_bits = stop.parse::<StopBits>()?;
        }
    }
    if apply("unit-id") {
        if let Some(unit) = matches.get_one::<u8>("unit-id") {
            config.unit_id = *unit;
        }
    }
    if apply("timeout") {
        if let Some(timeout) = matches.get_one::<u64>("timeout") {
            config.timeout_ms = *timeout;
        }
    }

    if config.port_name.trim().is_empty() {
        return Err(anyhow!(
            "No serial port given; pass --port or a --config file (see --list-ports)"
        ));
    }
    config.validate()?;
    log::debug!("Connection settings: {config:?}");
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn matches(args: &[&str]) -> ArgMatches {
        let mut argv = vec!["rtu_client"];
        argv.extend_from_slice(args);
        super::super::command().try_get_matches_from(argv).unwrap()
    }

    #[test]
    fn flags_build_a_config() {
        let config = connection_config(&matches(&[
            "--port",
            "COM3",
            "--baud-rate",
            "19200",
            "--parity",
            "even",
            "--stop-bits",
            "2",
            "--unit-id",
            "17",
        ]))
        .unwrap();
        assert_eq!(config.port_name, "COM3");
        assert_eq!(config.baud_rate, BaudRate::B19200);
        assert_eq!(config.parity, Parity::Even);
        assert_eq!(config.stop_bits, StopBits::Two);
        assert_eq!(config.unit_id, 17);
        assert_eq!(config.timeout_ms, 1000);
    }

    #[test]
    fn missing_port_is_an_error() {
        assert!(connection_config(&matches(&[])).is_err());
    }

    #[test]
    fn unsupported_baud_rate_is_rejected() {
        assert!(connection_config(&matches(&["--port", "COM1", "--baud-rate", "300"])).is_err());
    }

    #[test]
    fn file_values_survive_default_flags() {
        let dir = std::env::temp_dir().join(format!("rtu_client_cfg_{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("link.toml");
        std::fs::write(
            &path,
            "port_name = \"/dev/ttyS1\"\nbaud_rate = 38400\nunit_id = 9\n",
        )
        .unwrap();

        let config = connection_config(&matches(&[
            "--config",
            path.to_str().unwrap(),
            "--unit-id",
            "4",
        ]))
        .unwrap();
        assert_eq!(config.port_name, "/dev/ttyS1");
        assert_eq!(config.baud_rate, BaudRate::B38400);
        assert_eq!(config.unit_id, 4);

        std::fs::remove_dir_all(&dir).unwrap();
    }
}
