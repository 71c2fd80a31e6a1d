//! At most one outstanding request per logical control.
//!
//! A [`SingleFlight`] slot pairs each [`Reply`] it starts with the callback
//! that should consume it. Starting a new request while one is pending
//! supersedes it: the old callback is dropped on the spot and the old reply
//! is either disposed immediately (already settled) or parked until it
//! settles. Completion events are matched by [`ReplyId`], so a late answer to
//! a superseded request never reaches the view.
use std::{
    fmt,
    time::{Duration, Instant},
};

use super::{
    error::RequestError,
    transport::{Reply, ReplyId, Transport},
};
use crate::protocol::{modbus::Operation, DataUnit, RegisterKind};

/// How long teardown waits for parked and pending replies, in total.
pub const TEARDOWN_TIMEOUT: Duration = Duration::from_secs(3);

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, strum::EnumIter, strum::Display,
)]
#[serde(rename_all = "snake_case")]
pub enum SlotAction {
    #[strum(to_string = "read single")]
    ReadSingle,
    #[strum(to_string = "read multiple")]
    ReadMultiple,
    #[strum(to_string = "write single")]
    WriteSingle,
    #[strum(to_string = "write multiple")]
    WriteMultiple,
}

/// Names one control: the register table it belongs to and what it does.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SlotKey {
    pub kind: RegisterKind,
    pub action: SlotAction,
}

impl SlotKey {
    pub fn new(kind: RegisterKind, action: SlotAction) -> Self {
        Self { kind, action }
    }
}

impl fmt::Display for SlotKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.kind, self.action)
    }
}

/// What a slot needs from whoever renders it.
pub trait SlotView {
    fn set_enabled(&mut self, slot: SlotKey, enabled: bool);
    fn report_error(&mut self, slot: SlotKey, error: &RequestError);
}

type OnComplete<V> = Box<dyn FnOnce(&mut V, DataUnit)>;

struct Pending<V> {
    reply: Reply,
    on_complete: OnComplete<V>,
}

pub struct SingleFlight<V> {
    key: SlotKey,
    pending: Option<Pending<V>>,
    retired: Vec<Reply>,
}

impl<V: SlotView> SingleFlight<V> {
    pub fn new(key: SlotKey) -> Self {
        Self {
            key,
            pending: None,
            retired: Vec::new(),
        }
    }

    pub fn key(&self) -> SlotKey {
        self.key
    }

    pub fn is_pending(&self) -> bool {
        self.pending.is_some()
    }

    pub fn pending_id(&self) -> Option<ReplyId> {
        self.pending.as_ref().map(|p| p.reply.id())
    }

    /// Superseded replies that have not settled yet.
    pub fn retired_len(&self) -> usize {
        self.retired.len()
    }

    /// Start a request in this slot.
    ///
    /// `request` is only called once the transport reports a connection.
    /// On success the control stays disabled until the reply settles and
    /// [`SingleFlight::on_reply_settled`] sees it; `on_complete` then gets
    /// the validated payload. Errors are reported to `view` before they are
    /// returned.
    pub fn start<T, F, C>(
        &mut self,
        transport: &T,
        view: &mut V,
        request: F,
        on_complete: C,
    ) -> Result<ReplyId, RequestError>
    where
        T: Transport + ?Sized,
        F: FnOnce(&T) -> anyhow::Result<Reply>,
        C: FnOnce(&mut V, DataUnit) + 'static,
    {
        if !transport.is_connected() {
            let err = RequestError::NotConnected;
            log::warn!("{}: {err}", self.key);
            view.report_error(self.key, &err);
            return Err(err);
        }

        let superseded = self.supersede();

        let reply = match request(transport) {
            Ok(reply) => reply,
            Err(err) => {
                let err = RequestError::Refused(err.to_string());
                log::warn!("{}: {err}", self.key);
                if superseded {
                    view.set_enabled(self.key, true);
                }
                view.report_error(self.key, &err);
                return Err(err);
            }
        };

        let id = reply.id();
        log::debug!("{}: started {} ({})", self.key, id, reply.operation());
        if !superseded {
            view.set_enabled(self.key, false);
        }
        self.pending = Some(Pending {
            reply,
            on_complete: Box::new(on_complete),
        });
        Ok(id)
    }

    /// Handle a settled reply. Returns `true` when `id` belonged to this slot.
    pub fn on_reply_settled(&mut self, id: ReplyId, view: &mut V) -> bool {
        if self.pending_id() == Some(id) {
            let settled = self
                .pending
                .as_ref()
                .is_some_and(|p| p.reply.is_settled());
            if !settled {
                return false;
            }
            let Some(Pending { reply, on_complete }) = self.pending.take() else {
                return false;
            };
            self.finish(reply, on_complete, view);
            return true;
        }

        if let Some(index) = self.retired.iter().position(|r| r.id() == id) {
            if self.retired[index].is_settled() {
                let reply = self.retired.swap_remove(index);
                log::debug!("{}: discarded superseded reply {}", self.key, reply.id());
            }
            return true;
        }
        false
    }

    /// Dispose of parked replies that settled without an event reaching us.
    pub fn collect_retired(&mut self) -> usize {
        let before = self.retired.len();
        self.retired.retain(|r| !r.is_settled());
        before - self.retired.len()
    }

    fn supersede(&mut self) -> bool {
        let Some(Pending { reply, on_complete }) = self.pending.take() else {
            return false;
        };
        drop(on_complete);
        if reply.is_settled() {
            log::debug!("{}: superseded settled reply {}", self.key, reply.id());
        } else {
            log::debug!("{}: superseded in-flight reply {}", self.key, reply.id());
            self.retired.push(reply);
        }
        true
    }

    fn finish(&mut self, reply: Reply, on_complete: OnComplete<V>, view: &mut V) {
        view.set_enabled(self.key, true);
        let id = reply.id();
        let operation = reply.operation().clone();
        match reply.into_outcome() {
            Some(Ok(unit)) => match check_payload(&operation, &unit) {
                Ok(()) => {
                    log::debug!("{}: reply {} ok", self.key, id);
                    on_complete(view, unit);
                }
                Err(reason) => {
                    let err = RequestError::MalformedPayload(reason);
                    log::warn!("{}: reply {}: {err}", self.key, id);
                    view.report_error(self.key, &err);
                }
            },
            Some(Err(err)) => {
                let err = RequestError::Transport(err);
                log::warn!("{}: reply {}: {err}", self.key, id);
                view.report_error(self.key, &err);
            }
            None => {
                log::warn!("{}: reply {} vanished before settling", self.key, id);
            }
        }
    }
}

impl<V> SingleFlight<V> {
    /// Wait up to `timeout` for everything this slot still holds, then drop it.
    ///
    /// Callbacks are never invoked from here; the view may already be gone.
    pub fn shutdown(&mut self, timeout: Duration) {
        let deadline = Instant::now() + timeout;
        let pending = self.pending.take().map(|p| p.reply);
        for reply in pending.into_iter().chain(self.retired.drain(..)) {
            let left = deadline.saturating_duration_since(Instant::now());
            if !reply.wait_timeout(left) {
                log::warn!(
                    "{}: reply {} still outstanding at teardown, abandoning it",
                    self.key,
                    reply.id()
                );
            }
        }
    }
}

impl<V> Drop for SingleFlight<V> {
    fn drop(&mut self) {
        self.shutdown(TEARDOWN_TIMEOUT);
    }
}

/// Sanity-check a successful payload against the request that produced it.
fn check_payload(operation: &Operation, unit: &DataUnit) -> Result<(), String> {
    if unit.kind != operation.kind() {
        return Err(format!(
            "expected {}, got {}",
            operation.kind(),
            unit.kind
        ));
    }
    if unit.is_empty() {
        return Err("no values in response".to_string());
    }
    if unit.start_address != operation.start_address() {
        return Err(format!(
            "expected start address {}, got {}",
            operation.start_address(),
            unit.start_address
        ));
    }
    if unit.len() != operation.count() as usize {
        return Err(format!(
            "expected {} value(s), got {}",
            operation.count(),
            unit.len()
        ));
    }
    Ok(())
}
