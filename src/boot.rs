use chrono::{DateTime, Local};
use log::LevelFilter;
use std::{
    io::{self, Write},
    path::{Path, PathBuf},
};

use env_logger::{Builder, Target};

const LOG_FILE_ENV: &str = "RTU_CLIENT_LOG_FILE";

/// Initialise logging for the binary.
///
/// `RTU_CLIENT_LOG_FILE` sends debug-level logs to a file (debug builds pick
/// one in the working directory); otherwise `env_logger` reads `RUST_LOG` and
/// writes to stderr.
pub fn init_common() {
    let log_file = std::env::var_os(LOG_FILE_ENV)
        .map(PathBuf::from)
        .or_else(|| cfg!(debug_assertions).then(|| session_log_path(Local::now())));

    if let Some(path) = log_file {
        if let Err(err) = init_file_logger(&path) {
            eprintln!("Failed to open log file {}: {err}", path.display());
            env_logger::init();
        }
    } else {
        env_logger::init();
    }
}

/// One log file per session, named after its start time.
fn session_log_path(started: DateTime<Local>) -> PathBuf {
    PathBuf::from(format!("rtu_client_{}.log", started.format("%Y%m%d_%H%M%S")))
}

fn init_file_logger(path: &Path) -> io::Result<()> {
    let file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)?;

    Builder::new()
        .format(|buf, record| {
            writeln!(
                buf,
                "{} {:<5} {}: {}",
                Local::now().format("%H:%M:%S%.3f"),
                record.level(),
                record.target(),
                record.args()
            )
        })
        .target(Target::Pipe(Box::new(file)))
        .filter_level(LevelFilter::Debug)
        .parse_default_env()
        .init();

    log::info!(
        "rtu_client {} logging to {}",
        env!("CARGO_PKG_VERSION"),
        path.display()
    );
    Ok(())
}
