/// Request/reply core shared by every frontend.
///
/// - `transport`: the boundary to whatever moves bytes, and the reply handle
/// - `connection`: the serial RTU implementation of that boundary
/// - `single_flight`: one outstanding request per control
/// - `panel`: a register table built from four such controls
pub mod connection;
pub mod error;
pub mod panel;
pub mod single_flight;
pub mod transport;
pub mod utils;

pub use connection::ModbusConnection;
pub use error::{RequestError, Severity};
pub use panel::{Notice, NoticeLevel, PanelState, RegisterPanel, Row};
pub use single_flight::{SingleFlight, SlotAction, SlotKey, SlotView};
pub use transport::{
    reply_pair, Completer, Reply, ReplyError, ReplyEvent, ReplyId, ReplyOutcome, Transport,
};
