//! The boundary between register panels and whatever moves bytes on the bus.
//!
//! A [`Transport`] accepts an [`Operation`] and immediately hands back a
//! [`Reply`]: an owned, move-only handle to one in-flight request. The side
//! doing the I/O keeps the matching [`Completer`] and settles it exactly
//! once, which also posts a [`ReplyEvent`] onto the event queue of the
//! thread that owns the reply. Dropping a `Reply` disposes of it, settled or
//! not; a late settlement into a dropped reply is simply discarded.
use anyhow::{anyhow, ensure, Result};
use std::{
    fmt,
    sync::{
        atomic::{AtomicU64, Ordering},
        OnceLock,
    },
    time::Duration,
};

use crate::protocol::{modbus::Operation, DataUnit, RegisterKind};

static NEXT_REPLY_ID: AtomicU64 = AtomicU64::new(1);

/// Identity of one request, unique for the lifetime of the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ReplyId(u64);

impl ReplyId {
    pub fn next() -> Self {
        Self(NEXT_REPLY_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for ReplyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Transport-level failure carried by a settled reply.
#[derive(Debug, Clone, PartialEq, Eq, derive_more::Display, derive_more::Error)]
pub enum ReplyError {
    #[display("Response timeout")]
    Timeout,
    #[display("Device exception: {_0}")]
    Exception(#[error(not(source))] String),
    #[display("Protocol error: {_0}")]
    Protocol(#[error(not(source))] String),
    #[display("Connection error: {_0}")]
    Link(#[error(not(source))] String),
    #[display("Request aborted")]
    Aborted,
}

pub type ReplyOutcome = Result<DataUnit, ReplyError>;

/// Posted after a reply settles.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReplyEvent {
    pub id: ReplyId,
}

/// Owned handle to one in-flight request.
pub struct Reply {
    id: ReplyId,
    operation: Operation,
    receiver: flume::Receiver<ReplyOutcome>,
    outcome: OnceLock<ReplyOutcome>,
}

impl Reply {
    pub fn id(&self) -> ReplyId {
        self.id
    }

    pub fn operation(&self) -> &Operation {
        &self.operation
    }

    pub fn is_settled(&self) -> bool {
        self.poll();
        self.outcome.get().is_some()
    }

    /// Transport error of a settled reply.
    pub fn error(&self) -> Option<&ReplyError> {
        self.poll();
        self.outcome.get().and_then(|o| o.as_ref().err())
    }

    /// Payload of a successfully settled reply.
    pub fn result(&self) -> Option<&DataUnit> {
        self.poll();
        self.outcome.get().and_then(|o| o.as_ref().ok())
    }

    /// Block until settled.
    pub fn wait(&self) -> &ReplyOutcome {
        if self.outcome.get().is_none() {
            let outcome = self.receiver.recv().unwrap_or_else(|_| Err(orphaned()));
            let _ = self.outcome.set(outcome);
        }
        self.settled_outcome()
    }

    /// Block for at most `timeout`; true once settled.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        if self.outcome.get().is_none() {
            match self.receiver.recv_timeout(timeout) {
                Ok(outcome) => {
                    let _ = self.outcome.set(outcome);
                }
                Err(flume::RecvTimeoutError::Disconnected) => {
                    let _ = self.outcome.set(Err(orphaned()));
                }
                Err(flume::RecvTimeoutError::Timeout) => return false,
            }
        }
        true
    }

    /// Await settlement without blocking the runtime.
    pub async fn settled(&self) -> &ReplyOutcome {
        if self.outcome.get().is_none() {
            let outcome = self
                .receiver
                .recv_async()
                .await
                .unwrap_or_else(|_| Err(orphaned()));
            let _ = self.outcome.set(outcome);
        }
        self.settled_outcome()
    }

    /// Consume the handle, yielding its outcome if it has settled.
    pub fn into_outcome(self) -> Option<ReplyOutcome> {
        self.poll();
        self.outcome.into_inner()
    }

    fn poll(&self) {
        if self.outcome.get().is_some() {
            return;
        }
        match self.receiver.try_recv() {
            Ok(outcome) => {
                let _ = self.outcome.set(outcome);
            }
            Err(flume::TryRecvError::Disconnected) => {
                let _ = self.outcome.set(Err(orphaned()));
            }
            Err(flume::TryRecvError::Empty) => {}
        }
    }

    fn settled_outcome(&self) -> &ReplyOutcome {
        self.outcome.get_or_init(|| Err(orphaned()))
    }
}

impl fmt::Debug for Reply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Reply")
            .field("id", &self.id)
            .field("operation", &self.operation)
            .field("outcome", &self.outcome.get())
            .finish()
    }
}

fn orphaned() -> ReplyError {
    ReplyError::Link("transport dropped the request".to_string())
}

/// Settling side of a [`Reply`].
pub struct Completer {
    id: ReplyId,
    sender: flume::Sender<ReplyOutcome>,
    events: Option<flume::Sender<ReplyEvent>>,
}

impl Completer {
    pub fn id(&self) -> ReplyId {
        self.id
    }

    /// The owning side already dropped its reply.
    pub fn is_disposed(&self) -> bool {
        self.sender.is_disconnected()
    }

    pub fn complete(self, outcome: ReplyOutcome) {
        if self.sender.send(outcome).is_err() {
            log::debug!("Reply {} settled after disposal", self.id);
        }
        if let Some(events) = &self.events {
            if events.send(ReplyEvent { id: self.id }).is_err() {
                log::debug!("No event queue for reply {}", self.id);
            }
        }
    }
}

/// Create a connected reply/completer pair for `operation`.
pub fn reply_pair(
    operation: Operation,
    events: Option<flume::Sender<ReplyEvent>>,
) -> (Reply, Completer) {
    let id = ReplyId::next();
    let (sender, receiver) = flume::bounded(1);
    let reply = Reply {
        id,
        operation,
        receiver,
        outcome: OnceLock::new(),
    };
    let completer = Completer { id, sender, events };
    (reply, completer)
}

/// Asynchronous request/reply access to one Modbus slave.
///
/// `Err` from any request method means nothing was queued.
pub trait Transport {
    fn is_connected(&self) -> bool;

    fn submit(&self, operation: Operation) -> Result<Reply>;

    fn read_registers(&self, kind: RegisterKind, start_address: u16, count: u16) -> Result<Reply> {
        self.submit(Operation::Read {
            kind,
            start_address,
            count,
        })
    }

    fn write_single_coil(&self, address: u16, value: bool) -> Result<Reply> {
        self.submit(Operation::WriteSingleCoil { address, value })
    }

    fn write_single_register(&self, address: u16, value: u16) -> Result<Reply> {
        self.submit(Operation::WriteSingleRegister { address, value })
    }

    fn write_multiple_registers(
        &self,
        kind: RegisterKind,
        start_address: u16,
        values: &[u16],
    ) -> Result<Reply> {
        ensure!(
            kind.is_writable(),
            "Invalid register type for multiple write: {kind}"
        );
        if values.is_empty() {
            return Err(anyhow!("Nothing to write"));
        }
        self.submit(Operation::WriteMultiple {
            kind,
            start_address,
            values: values.to_vec(),
        })
    }
}
