#![allow(dead_code)]

use std::{
    cell::RefCell,
    collections::VecDeque,
    io::{self, Read, Write},
};

use rmodbus::{
    server::{context::ModbusContext, storage::ModbusStorageSmall, ModbusFrame},
    ModbusProto,
};
use rtu_client::{
    api::{connection::execute, reply_pair, Completer, Reply, ReplyError, ReplyEvent, Transport},
    protocol::modbus::{Operation, PreparedRequest},
};

/// An RTU slave answering from an in-memory register bank.
pub struct SimulatedSlave {
    pub unit_id: u8,
    pub storage: ModbusStorageSmall,
    request: Vec<u8>,
    response: VecDeque<u8>,
    /// Stay silent instead of answering.
    pub mute: bool,
}

impl SimulatedSlave {
    pub fn new(unit_id: u8) -> Self {
        Self {
            unit_id,
            storage: ModbusStorageSmall::new(),
            request: Vec::new(),
            response: VecDeque::new(),
            mute: false,
        }
    }

    fn answer(&mut self) -> io::Result<()> {
        let request = std::mem::take(&mut self.request);
        if self.mute {
            return Ok(());
        }
        let invalid = |err: rmodbus::ErrorKind| {
            io::Error::new(io::ErrorKind::InvalidData, format!("{err:?}"))
        };

        let mut response = Vec::new();
        let mut frame = ModbusFrame::new(self.unit_id, &request, ModbusProto::Rtu, &mut response);
        frame.parse().map_err(invalid)?;
        if frame.processing_required {
            let result = if frame.readonly {
                frame.process_read(&self.storage)
            } else {
                frame.process_write(&mut self.storage)
            };
            result.map_err(invalid)?;
        }
        if frame.response_required {
            frame.finalize_response().map_err(invalid)?;
            self.response.extend(response);
        }
        Ok(())
    }
}

impl Write for SimulatedSlave {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.request.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.answer()
    }
}

impl Read for SimulatedSlave {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.response.is_empty() {
            return Err(io::Error::new(io::ErrorKind::TimedOut, "no response"));
        }
        let n = buf.len().min(self.response.len());
        for (slot, byte) in buf.iter_mut().zip(self.response.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }
}

struct Queued {
    prepared: PreparedRequest,
    completer: Completer,
}

/// A transport that queues requests until the test calls [`BenchTransport::pump`].
///
/// Each pumped request goes through the real RTU codec against a
/// [`SimulatedSlave`], then settles its reply and posts a [`ReplyEvent`].
pub struct BenchTransport {
    pub connected: bool,
    pub slave: RefCell<SimulatedSlave>,
    queue: RefCell<VecDeque<Queued>>,
    events: flume::Sender<ReplyEvent>,
}

impl BenchTransport {
    pub fn new(unit_id: u8) -> (Self, flume::Receiver<ReplyEvent>) {
        let (events, rx) = flume::unbounded();
        (
            Self {
                connected: true,
                slave: RefCell::new(SimulatedSlave::new(unit_id)),
                queue: RefCell::new(VecDeque::new()),
                events,
            },
            rx,
        )
    }

    pub fn queued(&self) -> usize {
        self.queue.borrow().len()
    }

    /// Run the oldest queued request. Returns false when the queue is empty.
    pub fn pump_one(&self) -> bool {
        let Some(job) = self.queue.borrow_mut().pop_front() else {
            return false;
        };
        let outcome = execute(&mut *self.slave.borrow_mut(), &job.prepared);
        job.completer.complete(outcome);
        true
    }

    pub fn pump(&self) -> usize {
        let mut n = 0;
        while self.pump_one() {
            n += 1;
        }
        n
    }

    /// Settle the oldest queued request with `error` without touching the slave.
    pub fn fail_one(&self, error: ReplyError) -> bool {
        let Some(job) = self.queue.borrow_mut().pop_front() else {
            return false;
        };
        job.completer.complete(Err(error));
        true
    }
}

impl Transport for BenchTransport {
    fn is_connected(&self) -> bool {
        self.connected
    }

    fn submit(&self, operation: Operation) -> anyhow::Result<Reply> {
        let unit_id = self.slave.borrow().unit_id;
        let prepared = PreparedRequest::new(unit_id, operation.clone())?;
        let (reply, completer) = reply_pair(operation, Some(self.events.clone()));
        self.queue.borrow_mut().push_back(Queued {
            prepared,
            completer,
        });
        Ok(reply)
    }
}

/// Seed a few registers the way a bench device would look after power-up.
pub fn seed(slave: &mut SimulatedSlave) {
    for i in 0..64u16 {
        slave.storage.set_holding(i, i * 10).unwrap();
        slave.storage.set_input(i, 0x1000 + i).unwrap();
        slave.storage.set_discrete(i, i % 3 == 0).unwrap();
    }
}
