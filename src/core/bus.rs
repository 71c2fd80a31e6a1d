use flume::{Receiver, Sender};

use crate::api::ReplyEvent;

/// Everything the UI loop reacts to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppEvent {
    /// A reply handed out by the transport has settled.
    ReplySettled(ReplyEvent),
    /// One line of user input.
    Input(String),
    /// Graceful shutdown request.
    Quit,
}

/// Sending and receiving halves of the input queue feeding the UI loop.
#[derive(Debug, Clone)]
pub struct Bus {
    pub tx: Sender<AppEvent>,
    pub rx: Receiver<AppEvent>,
}

impl Bus {
    pub fn new() -> Self {
        let (tx, rx) = flume::unbounded();
        Self { tx, rx }
    }
}

impl Default for Bus {
    fn default() -> Self {
        Self::new()
    }
}

/// Feed stdin lines into `tx` from a background thread.
///
/// EOF or a read error sends [`AppEvent::Quit`].
pub fn spawn_stdin_reader(tx: Sender<AppEvent>) -> std::io::Result<std::thread::JoinHandle<()>> {
    std::thread::Builder::new()
        .name("stdin-reader".to_string())
        .spawn(move || {
            let stdin = std::io::stdin();
            let mut line = String::new();
            loop {
                line.clear();
                match stdin.read_line(&mut line) {
                    Ok(0) => break,
                    Ok(_) => {
                        let trimmed = line.trim();
                        if trimmed.is_empty() {
                            continue;
                        }
                        if tx.send(AppEvent::Input(trimmed.to_string())).is_err() {
                            return;
                        }
                    }
                    Err(err) => {
                        log::warn!("Failed to read stdin: {err}");
                        break;
                    }
                }
            }
            let _ = tx.send(AppEvent::Quit);
        })
}
