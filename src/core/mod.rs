/// Application runtime shared by the interactive frontends
///
/// - `bus`: events flowing into the UI loop
/// - `logs`: timestamped notice history
/// - `runtime`: the [`Workbench`] that owns the transport and the panels
pub mod bus;
pub mod logs;
pub mod runtime;

pub use bus::{AppEvent, Bus};
pub use logs::{LogBuffer, LogEntry, LogLevel};
pub use runtime::{Frontend, LoopControl, Workbench};
