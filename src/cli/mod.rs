pub mod actions;
pub mod config;
pub mod shell;

use clap::{Arg, ArgAction, ArgMatches, Command};

fn kind_arg() -> Arg {
    Arg::new("kind")
        .help("Register table: coils, discrete, input or holding")
        .value_name("KIND")
        .required(true)
}

fn address_arg() -> Arg {
    Arg::new("address")
        .long("address")
        .short('a')
        .help("Register address (start address for multiple access)")
        .value_name("ADDR")
        .default_value("0")
        .value_parser(clap::value_parser!(u16))
}

/// Build the command line definition.
pub fn command() -> Command {
    Command::new("rtu_client")
        .about("Modbus RTU client: read and write coils and registers over a serial line")
        .arg(
            Arg::new("list-ports")
                .long("list-ports")
                .short('l')
                .help("List all available serial ports and exit")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("json")
                .long("json")
                .short('j')
                .help("Output one-shot results in JSON format")
                .global(true)
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("config")
                .long("config")
                .short('c')
                .help("Connection settings file (.toml, otherwise JSON); flags override it")
                .value_name("FILE")
                .global(true),
        )
        .arg(
            Arg::new("port")
                .long("port")
                .short('p')
                .help("Serial port, e.g. /dev/ttyUSB0 or COM3")
                .value_name("PORT")
                .global(true),
        )
        .arg(
            Arg::new("baud-rate")
                .long("baud-rate")
                .help("Serial port baud rate")
                .value_name("BAUD")
                .default_value("9600")
                .global(true)
                .value_parser(clap::value_parser!(u32)),
        )
        .arg(
            Arg::new("data-bits")
                .long("data-bits")
                .help("Data bits (5-8)")
                .value_name("BITS")
                .default_value("8")
                .global(true)
                .value_parser(clap::value_parser!(u8).range(5..=8)),
        )
        .arg(
            Arg::new("parity")
                .long("parity")
                .help("Parity: none, even, odd, space or mark")
                .value_name("PARITY")
                .default_value("none")
                .global(true),
        )
        .arg(
            Arg::new("stop-bits")
                .long("stop-bits")
                .help("Stop bits: 1, 1.5 or 2")
                .value_name("STOP")
                .default_value("1")
                .global(true),
        )
        .arg(
            Arg::new("unit-id")
                .long("unit-id")
                .help("Modbus slave/unit id (1-247)")
                .value_name("ID")
                .default_value("1")
                .global(true)
                .value_parser(clap::value_parser!(u8).range(1..=247)),
        )
        .arg(
            Arg::new("timeout")
                .long("timeout")
                .help("Response timeout in milliseconds")
                .value_name("MS")
                .default_value("1000")
                .global(true)
                .value_parser(clap::value_parser!(u64).range(1..)),
        )
        .subcommand(
            Command::new("read")
                .about("Read registers once and print them")
                .arg(kind_arg())
                .arg(address_arg())
                .arg(
                    Arg::new("count")
                        .long("count")
                        .short('n')
                        .help("Number of registers to read")
                        .value_name("N")
                        .default_value("1")
                        .value_parser(clap::value_parser!(u16).range(1..)),
                ),
        )
        .subcommand(
            Command::new("write-coil")
                .about("Write a single coil")
                .arg(address_arg())
                .arg(
                    Arg::new("value")
                        .long("value")
                        .help("on or off")
                        .value_name("STATE")
                        .required(true),
                ),
        )
        .subcommand(
            Command::new("write-register")
                .about("Write a single holding register")
                .arg(address_arg())
                .arg(
                    Arg::new("value")
                        .long("value")
                        .help("Decimal or 0x-prefixed hex")
                        .value_name("VALUE")
                        .required(true),
                ),
        )
        .subcommand(
            Command::new("write-multiple")
                .about("Write a run of coils or holding registers")
                .arg(kind_arg())
                .arg(address_arg())
                .arg(
                    Arg::new("values")
                        .long("values")
                        .help("Comma separated values (on/off for coils)")
                        .value_name("LIST")
                        .required(true),
                ),
        )
        .subcommand(
            Command::new("shell").about("Interactive session with all four register tables"),
        )
}

/// Parse command line arguments and return ArgMatches.
pub fn parse_args() -> ArgMatches {
    command().get_matches()
}
