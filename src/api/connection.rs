//! Modbus RTU transport over a local serial port.
use anyhow::{anyhow, Result};
use parking_lot::Mutex;
use std::{
    io::{Read, Write},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread::JoinHandle,
};

use super::{
    transport::{reply_pair, Completer, Reply, ReplyError, ReplyEvent, ReplyOutcome, Transport},
    utils::open_serial_port,
};
use crate::protocol::{
    modbus::{read_modbus_frame, DecodeError, FrameError, Operation, PreparedRequest},
    BaudRate, ConnectionConfig,
};

struct Job {
    prepared: PreparedRequest,
    completer: Completer,
}

struct Link {
    config: ConnectionConfig,
    jobs: flume::Sender<Job>,
    alive: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
}

/// A serial link to one slave, shared by every register panel.
///
/// Requests are queued to a worker thread that owns the port and runs them
/// strictly one after another. Each settled reply is announced on the
/// channel returned by [`ModbusConnection::events`].
pub struct ModbusConnection {
    link: Mutex<Option<Link>>,
    events_tx: flume::Sender<ReplyEvent>,
    events_rx: flume::Receiver<ReplyEvent>,
}

impl Default for ModbusConnection {
    fn default() -> Self {
        Self::new()
    }
}

impl ModbusConnection {
    pub fn new() -> Self {
        let (events_tx, events_rx) = flume::unbounded();
        Self {
            link: Mutex::new(None),
            events_tx,
            events_rx,
        }
    }

    /// Completion notifications for every reply this connection hands out.
    pub fn events(&self) -> &flume::Receiver<ReplyEvent> {
        &self.events_rx
    }

    /// Open the port and start the worker, replacing any previous link.
    pub fn connect(&self, config: &ConnectionConfig) -> Result<()> {
        config.validate()?;
        self.close();

        let port = open_serial_port(config).map_err(|err| anyhow!("Connect fail : {err}"))?;
        let (jobs_tx, jobs_rx) = flume::unbounded::<Job>();
        let alive = Arc::new(AtomicBool::new(true));

        let worker_alive = alive.clone();
        let worker = std::thread::Builder::new()
            .name(format!("rtu-{}", config.port_name))
            .spawn(move || run_worker(port, jobs_rx, worker_alive))
            .map_err(|err| anyhow!("Failed to spawn serial worker: {err}"))?;

        log::info!(
            "Modbus connection established on {} ({} baud, {} data bits, parity {}, {} stop bits, unit {})",
            config.port_name,
            config.baud_rate,
            config.data_bits,
            config.parity,
            config.stop_bits,
            config.unit_id
        );

        *self.link.lock() = Some(Link {
            config: config.clone(),
            jobs: jobs_tx,
            alive,
            worker: Some(worker),
        });
        Ok(())
    }

    /// Stop the worker. Queued requests settle as aborted.
    pub fn close(&self) {
        let Some(mut link) = self.link.lock().take() else {
            return;
        };
        link.alive.store(false, Ordering::SeqCst);
        drop(link.jobs);
        if let Some(worker) = link.worker.take() {
            if worker.join().is_err() {
                log::warn!("Serial worker for {} panicked", link.config.port_name);
            }
        }
        log::info!("Modbus connection to {} closed", link.config.port_name);
    }

    pub fn port_name(&self) -> Option<String> {
        self.link.lock().as_ref().map(|l| l.config.port_name.clone())
    }

    pub fn baud_rate(&self) -> Option<BaudRate> {
        self.link.lock().as_ref().map(|l| l.config.baud_rate)
    }

    pub fn unit_id(&self) -> Option<u8> {
        self.link.lock().as_ref().map(|l| l.config.unit_id)
    }
}

impl Transport for ModbusConnection {
    fn is_connected(&self) -> bool {
        self.link
            .lock()
            .as_ref()
            .is_some_and(|l| l.alive.load(Ordering::SeqCst))
    }

    fn submit(&self, operation: Operation) -> Result<Reply> {
        let guard = self.link.lock();
        let link = guard
            .as_ref()
            .filter(|l| l.alive.load(Ordering::SeqCst))
            .ok_or_else(|| anyhow!("Not connected"))?;

        log::debug!(
            "[Modbus request] {} | unit {}",
            operation,
            link.config.unit_id
        );
        let prepared = PreparedRequest::new(link.config.unit_id, operation.clone())?;
        let (reply, completer) = reply_pair(operation, Some(self.events_tx.clone()));
        link.jobs
            .send(Job {
                prepared,
                completer,
            })
            .map_err(|_| anyhow!("Serial worker is not running"))?;
        Ok(reply)
    }
}

impl Drop for ModbusConnection {
    fn drop(&mut self) {
        self.close();
    }
}

/// Byte stream the worker talks to.
trait LinkIo: Read + Write {
    /// Drop stale bytes before a new request goes out.
    fn clear_input(&mut self) {}
}

impl LinkIo for Box<dyn serialport::SerialPort> {
    fn clear_input(&mut self) {
        if let Err(err) = self.clear(serialport::ClearBuffer::Input) {
            log::debug!("Failed to clear input buffer: {err}");
        }
    }
}

fn run_worker<P: LinkIo>(mut port: P, jobs: flume::Receiver<Job>, alive: Arc<AtomicBool>) {
    while let Ok(job) = jobs.recv() {
        if !alive.load(Ordering::SeqCst) {
            job.completer.complete(Err(ReplyError::Aborted));
            continue;
        }

        port.clear_input();
        let outcome = execute(&mut port, &job.prepared);
        match &outcome {
            Ok(unit) => log::debug!(
                "[Modbus reply] {} ok, {} value(s)",
                job.prepared.operation,
                unit.len()
            ),
            Err(err) => log::warn!("[Modbus reply] {} failed: {err}", job.prepared.operation),
        }
        if matches!(outcome, Err(ReplyError::Link(_))) {
            alive.store(false, Ordering::SeqCst);
        }
        job.completer.complete(outcome);
    }
    log::debug!("Serial worker exiting");
}

/// Send one prepared request and decode the answer.
pub fn execute<P: Read + Write + ?Sized>(port: &mut P, prepared: &PreparedRequest) -> ReplyOutcome {
    port.write_all(&prepared.frame)
        .and_then(|_| port.flush())
        .map_err(|err| ReplyError::Link(err.to_string()))?;

    let response = match read_modbus_frame(port) {
        Ok(Some(frame)) => frame,
        Ok(None) => return Err(ReplyError::Timeout),
        Err(err @ FrameError::Io(_)) => return Err(ReplyError::Link(err.to_string())),
        // garbage on the line, the link itself is fine
        Err(err @ FrameError::Header { .. }) => return Err(ReplyError::Protocol(err.to_string())),
    };

    prepared.decode(&response).map_err(|err| match err {
        DecodeError::Exception(_) => ReplyError::Exception(err.to_string()),
        DecodeError::Frame(text) => ReplyError::Protocol(text),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::RegisterKind;
    use std::io::{self, Cursor};

    /// Records what was written and plays back a canned response.
    struct ScriptedPort {
        written: Vec<u8>,
        response: Cursor<Vec<u8>>,
    }

    impl ScriptedPort {
        fn new(response: Vec<u8>) -> Self {
            Self {
                written: Vec::new(),
                response: Cursor::new(response),
            }
        }
    }

    impl Read for ScriptedPort {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            let n = self.response.read(buf)?;
            if n == 0 && !buf.is_empty() {
                return Err(io::Error::new(io::ErrorKind::TimedOut, "timed out"));
            }
            Ok(n)
        }
    }

    impl Write for ScriptedPort {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.written.extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl LinkIo for ScriptedPort {}

    /// A port whose cable is gone. Writes may still land in the driver buffer.
    struct DeadPort {
        accepts_writes: bool,
    }

    impl Read for DeadPort {
        fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
            Err(io::Error::new(io::ErrorKind::BrokenPipe, "device removed"))
        }
    }

    impl Write for DeadPort {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            if self.accepts_writes {
                return Ok(buf.len());
            }
            Err(io::Error::new(io::ErrorKind::BrokenPipe, "device removed"))
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl LinkIo for DeadPort {}

    fn queue(jobs: &flume::Sender<Job>, prepared: PreparedRequest) -> Reply {
        let (reply, completer) = reply_pair(prepared.operation.clone(), None);
        jobs.send(Job {
            prepared,
            completer,
        })
        .unwrap();
        reply
    }

    fn crc16(body: &[u8]) -> [u8; 2] {
        let mut crc: u16 = 0xFFFF;
        for byte in body {
            crc ^= *byte as u16;
            for _ in 0..8 {
                crc = if crc & 1 != 0 { (crc >> 1) ^ 0xA001 } else { crc >> 1 };
            }
        }
        crc.to_le_bytes()
    }

    fn frame(body: &[u8]) -> Vec<u8> {
        let mut out = body.to_vec();
        out.extend_from_slice(&crc16(body));
        out
    }

    fn read_holdings(count: u16) -> PreparedRequest {
        PreparedRequest::new(
            1,
            Operation::Read {
                kind: RegisterKind::HoldingRegisters,
                start_address: 0x10,
                count,
            },
        )
        .unwrap()
    }

    #[test]
    fn executes_a_read_round_trip() {
        let prepared = read_holdings(2);
        let mut port = ScriptedPort::new(frame(&[0x01, 0x03, 0x04, 0x00, 0x2A, 0x01, 0x00]));
        let unit = execute(&mut port, &prepared).unwrap();
        assert_eq!(port.written, prepared.frame);
        assert_eq!(unit.start_address, 0x10);
        assert_eq!(unit.values, vec![42, 256]);
    }

    #[test]
    fn silence_is_a_timeout() {
        let prepared = read_holdings(1);
        let mut port = ScriptedPort::new(Vec::new());
        assert_eq!(execute(&mut port, &prepared), Err(ReplyError::Timeout));
    }

    #[test]
    fn exception_maps_to_device_error() {
        let prepared = read_holdings(1);
        let mut port = ScriptedPort::new(frame(&[0x01, 0x83, 0x02]));
        match execute(&mut port, &prepared) {
            Err(ReplyError::Exception(text)) => assert!(text.contains("illegal data address")),
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[test]
    fn worker_answers_in_submission_order() {
        let mut response = frame(&[0x01, 0x03, 0x02, 0x00, 0x07]);
        response.extend(frame(&[0x01, 0x03, 0x02, 0x00, 0x08]));
        let (jobs_tx, jobs_rx) = flume::unbounded();
        let first = queue(&jobs_tx, read_holdings(1));
        let second = queue(&jobs_tx, read_holdings(1));
        drop(jobs_tx);

        let alive = Arc::new(AtomicBool::new(true));
        run_worker(ScriptedPort::new(response), jobs_rx, alive.clone());

        assert_eq!(first.result().unwrap().values, vec![7]);
        assert_eq!(second.result().unwrap().values, vec![8]);
        assert!(alive.load(Ordering::SeqCst));
    }

    #[test]
    fn queued_jobs_abort_after_close() {
        let (jobs_tx, jobs_rx) = flume::unbounded();
        let reply = queue(&jobs_tx, read_holdings(1));
        drop(jobs_tx);

        run_worker(ScriptedPort::new(Vec::new()), jobs_rx, Arc::new(AtomicBool::new(false)));
        assert_eq!(reply.error(), Some(&ReplyError::Aborted));
    }

    #[test]
    fn link_failure_marks_the_link_dead() {
        let (jobs_tx, jobs_rx) = flume::unbounded();
        let first = queue(&jobs_tx, read_holdings(1));
        let second = queue(&jobs_tx, read_holdings(1));
        drop(jobs_tx);

        let alive = Arc::new(AtomicBool::new(true));
        run_worker(
            DeadPort {
                accepts_writes: false,
            },
            jobs_rx,
            alive.clone(),
        );

        assert!(matches!(first.error(), Some(ReplyError::Link(_))));
        assert_eq!(second.error(), Some(&ReplyError::Aborted));
        assert!(!alive.load(Ordering::SeqCst));
    }

    #[test]
    fn read_failure_is_a_link_error() {
        let prepared = read_holdings(1);
        let mut port = DeadPort {
            accepts_writes: true,
        };
        match execute(&mut port, &prepared) {
            Err(ReplyError::Link(text)) => assert!(text.contains("device removed")),
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[test]
    fn disconnected_connection_refuses_requests() {
        let connection = ModbusConnection::new();
        assert!(!connection.is_connected());
        let err = connection
            .read_registers(RegisterKind::Coils, 0, 8)
            .err()
            .unwrap();
        assert!(err.to_string().contains("Not connected"));
        assert!(connection.port_name().is_none());
        assert!(connection.baud_rate().is_none());
    }

    #[test]
    fn connect_validates_before_touching_the_port() {
        let connection = ModbusConnection::new();
        let mut config = ConnectionConfig::new("/dev/ttyUSB0");
        config.unit_id = 0;
        assert!(connection.connect(&config).is_err());
        assert!(!connection.is_connected());
    }
}
