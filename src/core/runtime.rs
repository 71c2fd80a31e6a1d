/// The single-threaded UI loop shared by the interactive frontends
///
/// A [`Workbench`] owns the transport and one [`RegisterPanel`] per register
/// table. Reply completions and user input arrive on two flume queues and are
/// handled one at a time on the calling thread.
use anyhow::Result;
use std::time::Duration;

use super::{
    bus::AppEvent,
    logs::{LogBuffer, LogEntry},
};
use crate::{
    api::{
        single_flight::TEARDOWN_TIMEOUT, Notice, RegisterPanel, ReplyEvent, RequestError,
        Transport,
    },
    protocol::RegisterKind,
};

/// How often parked replies are swept when nothing else happens.
pub const SWEEP_INTERVAL: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopControl {
    Continue,
    Quit,
}

/// Hooks a frontend plugs into [`Workbench::run`].
pub trait Frontend<T: Transport> {
    /// Called for each line of user input.
    fn on_input(&mut self, bench: &mut Workbench<T>, line: &str) -> Result<LoopControl>;

    /// Called with the notices raised while handling one event.
    fn on_notices(&mut self, bench: &Workbench<T>, notices: &[Notice]);
}

pub struct Workbench<T: Transport> {
    // panels drop first so their replies settle while the transport is alive
    panels: Vec<RegisterPanel>,
    logs: LogBuffer,
    replies: flume::Receiver<ReplyEvent>,
    transport: T,
}

impl<T: Transport> Workbench<T> {
    /// `replies` must receive every [`ReplyEvent`] for replies `transport`
    /// hands out.
    pub fn new(transport: T, replies: flume::Receiver<ReplyEvent>) -> Self {
        Self {
            panels: RegisterKind::all()
                .iter()
                .map(|kind| RegisterPanel::new(*kind))
                .collect(),
            logs: LogBuffer::default(),
            replies,
            transport,
        }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn logs(&self) -> &LogBuffer {
        &self.logs
    }

    pub fn panel(&self, kind: RegisterKind) -> Option<&RegisterPanel> {
        self.panels.iter().find(|p| p.kind() == kind)
    }

    /// Run `f` against the panel for `kind` with the shared transport.
    ///
    /// Notices raised by `f` go to the log and are returned.
    pub fn with_panel<R>(
        &mut self,
        kind: RegisterKind,
        f: impl FnOnce(&mut RegisterPanel, &T) -> R,
    ) -> Option<(R, Vec<Notice>)> {
        let panel = self.panels.iter_mut().find(|p| p.kind() == kind)?;
        let result = f(panel, &self.transport);
        let notices = panel.take_notices();
        self.record(&notices);
        Some((result, notices))
    }

    pub fn read_single(
        &mut self,
        kind: RegisterKind,
        address: u16,
    ) -> (Result<(), RequestError>, Vec<Notice>) {
        self.submit(kind, |panel, t| panel.read_single(t, address).map(|_| ()))
    }

    pub fn read_multiple(
        &mut self,
        kind: RegisterKind,
        start: u16,
        count: u16,
    ) -> (Result<(), RequestError>, Vec<Notice>) {
        self.submit(kind, |panel, t| {
            panel.read_multiple(t, start, count).map(|_| ())
        })
    }

    pub fn write_single(
        &mut self,
        kind: RegisterKind,
        address: u16,
        value: u16,
    ) -> (Result<(), RequestError>, Vec<Notice>) {
        self.submit(kind, |panel, t| {
            panel.write_single(t, address, value).map(|_| ())
        })
    }

    pub fn write_multiple(
        &mut self,
        kind: RegisterKind,
        start: u16,
        values: Vec<u16>,
    ) -> (Result<(), RequestError>, Vec<Notice>) {
        self.submit(kind, |panel, t| {
            panel.write_multiple(t, start, values).map(|_| ())
        })
    }

    /// Route one settled reply to whichever slot owns it.
    pub fn dispatch(&mut self, event: ReplyEvent) -> Vec<Notice> {
        let mut notices = Vec::new();
        let mut owned = false;
        for panel in &mut self.panels {
            if !owned && panel.on_reply_settled(&self.transport, event.id) {
                owned = true;
            }
            notices.extend(panel.take_notices());
        }
        if !owned {
            log::debug!("Reply {} settled with no slot waiting for it", event.id);
        }
        self.record(&notices);
        notices
    }

    /// Requests still held by any panel, pending or superseded.
    pub fn outstanding(&self) -> usize {
        self.panels.iter().map(|p| p.outstanding()).sum()
    }

    /// Handle every reply event that is already queued.
    pub fn drain_replies(&mut self) -> Vec<Notice> {
        let mut notices = Vec::new();
        while let Ok(event) = self.replies.try_recv() {
            notices.extend(self.dispatch(event));
        }
        notices
    }

    /// Block on replies and input until the frontend or the input queue ends
    /// the session.
    pub fn run<F: Frontend<T>>(
        &mut self,
        input: &flume::Receiver<AppEvent>,
        frontend: &mut F,
    ) -> Result<()> {
        loop {
            let event = flume::Selector::new()
                .recv(&self.replies, |r| r.ok().map(AppEvent::ReplySettled))
                .recv(input, |r| Some(r.unwrap_or(AppEvent::Quit)))
                .wait_timeout(SWEEP_INTERVAL);

            match event {
                Ok(Some(AppEvent::ReplySettled(reply))) => {
                    let notices = self.dispatch(reply);
                    if !notices.is_empty() {
                        frontend.on_notices(self, &notices);
                    }
                }
                Ok(Some(AppEvent::Input(line))) => {
                    if frontend.on_input(self, &line)? == LoopControl::Quit {
                        break;
                    }
                }
                Ok(Some(AppEvent::Quit)) => break,
                Ok(None) => {
                    log::warn!("Reply queue closed");
                    break;
                }
                Err(_) => {
                    let swept = self
                        .panels
                        .iter_mut()
                        .map(|p| p.collect_retired())
                        .sum::<usize>();
                    if swept > 0 {
                        log::debug!("Swept {swept} superseded replies");
                    }
                }
            }
        }
        log::info!("Leaving UI loop with {} outstanding request(s)", self.outstanding());
        Ok(())
    }

    fn submit(
        &mut self,
        kind: RegisterKind,
        f: impl FnOnce(&mut RegisterPanel, &T) -> Result<(), RequestError>,
    ) -> (Result<(), RequestError>, Vec<Notice>) {
        match self.with_panel(kind, f) {
            Some(result) => result,
            None => (
                Err(RequestError::InvalidInput(format!("no panel for {kind}"))),
                Vec::new(),
            ),
        }
    }

    fn record(&mut self, notices: &[Notice]) {
        for notice in notices {
            self.logs.push(LogEntry::from(notice.clone()));
        }
    }
}

impl<T: Transport> Drop for Workbench<T> {
    fn drop(&mut self) {
        let outstanding = self.outstanding();
        if outstanding > 0 {
            log::info!(
                "Waiting up to {TEARDOWN_TIMEOUT:?} per slot for {outstanding} outstanding request(s)"
            );
        }
        // each slot waits for its own replies as it drops
        self.panels.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        api::{reply_pair, NoticeLevel, Reply, ReplyEvent, SlotAction},
        protocol::{modbus::Operation, DataUnit},
    };

    /// Answers every read with `address * 2` as soon as it is submitted.
    struct Echo {
        events: flume::Sender<ReplyEvent>,
    }

    impl Transport for Echo {
        fn is_connected(&self) -> bool {
            true
        }

        fn submit(&self, operation: Operation) -> Result<Reply> {
            let start = operation.start_address();
            let values = (start..start + operation.count()).map(|a| a * 2).collect();
            let unit = DataUnit::new(operation.kind(), start, values);
            let (reply, completer) = reply_pair(operation, Some(self.events.clone()));
            completer.complete(Ok(unit));
            Ok(reply)
        }
    }

    fn bench() -> Workbench<Echo> {
        let (events, replies) = flume::unbounded();
        Workbench::new(Echo { events }, replies)
    }

    #[test]
    fn replies_reach_the_owning_panel_only() {
        let mut bench = bench();
        assert!(bench.read_multiple(RegisterKind::InputRegisters, 4, 2).0.is_ok());
        assert_eq!(bench.outstanding(), 1);

        let notices = bench.drain_replies();
        assert_eq!(notices.len(), 1);
        assert_eq!(notices[0].kind, RegisterKind::InputRegisters);
        assert_eq!(bench.outstanding(), 0);

        let rows = bench
            .panel(RegisterKind::InputRegisters)
            .map(|p| p.state().read_rows().to_vec())
            .unwrap();
        assert_eq!(rows.iter().map(|r| r.value).collect::<Vec<_>>(), vec![8, 10]);
        assert!(bench
            .panel(RegisterKind::HoldingRegisters)
            .unwrap()
            .state()
            .read_rows()
            .is_empty());
        assert_eq!(bench.logs().len(), 1);
    }

    #[test]
    fn rejected_input_is_logged() {
        let mut bench = bench();
        let (result, notices) = bench.write_single(RegisterKind::InputRegisters, 0, 1);
        assert!(result.is_err());
        assert_eq!(notices[0].level, NoticeLevel::Warning);
        assert_eq!(bench.logs().entries()[0].kind, Some(RegisterKind::InputRegisters));
        assert_eq!(bench.outstanding(), 0);
    }

    struct Scripted {
        quit: flume::Sender<AppEvent>,
        seen: Vec<Notice>,
    }

    impl Frontend<Echo> for Scripted {
        fn on_input(&mut self, bench: &mut Workbench<Echo>, line: &str) -> Result<LoopControl> {
            let address = line.parse::<u16>()?;
            let _ = bench.read_single(RegisterKind::HoldingRegisters, address);
            Ok(LoopControl::Continue)
        }

        fn on_notices(&mut self, _bench: &Workbench<Echo>, notices: &[Notice]) {
            self.seen.extend_from_slice(notices);
            let _ = self.quit.send(AppEvent::Quit);
        }
    }

    #[test]
    fn run_handles_input_then_reply() {
        let mut bench = bench();
        let (tx, rx) = flume::unbounded();
        tx.send(AppEvent::Input("21".to_string())).unwrap();
        let mut frontend = Scripted {
            quit: tx,
            seen: Vec::new(),
        };

        bench.run(&rx, &mut frontend).unwrap();

        assert_eq!(frontend.seen.len(), 1);
        assert_eq!(frontend.seen[0].action, SlotAction::ReadSingle);
        let row = bench
            .panel(RegisterKind::HoldingRegisters)
            .and_then(|p| p.state().single_value().cloned())
            .unwrap();
        assert_eq!((row.address, row.value), (21, 42));
    }

    #[test]
    fn closed_input_ends_the_loop() {
        let mut bench = bench();
        let (tx, rx) = flume::unbounded::<AppEvent>();
        drop(tx);
        let mut frontend = Scripted {
            quit: flume::unbounded().0,
            seen: Vec::new(),
        };
        bench.run(&rx, &mut frontend).unwrap();
        assert!(frontend.seen.is_empty());
    }
}
