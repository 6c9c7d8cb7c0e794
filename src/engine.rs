// Single-threaded readiness loop driving every test connection
use mio::net::TcpStream;
use mio::{Events, Interest, Poll, Token};
use std::io::ErrorKind;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use crate::catalog::{Outcome, TestCatalog};
use crate::config::Eng;
use crate::connection::{ConnState, ConnectionEntry, ConnectionTable, ReadProgress};
use crate::error::{EngineError, FailureKind};
use crate::http::{self, ResponseState};
use crate::verify;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RunSummary {
    pub passed: u64,
    pub failed: u64,
    /// Responses that completed but matched no running record.
    pub unmatched: u64,
    pub connections: u64,
    pub reused: u64,
}

enum Step {
    Wait,
    Sent,
    Complete,
    Fail(FailureKind),
}

pub struct Engine<C> {
    cfg: Eng,
    addr: SocketAddr,
    poll: Poll,
    table: ConnectionTable<TcpStream>,
    catalog: C,
    buf: Vec<u8>,
}

impl<C: TestCatalog> Engine<C> {
    pub fn new(cfg: Eng, catalog: C) -> Result<Self, EngineError> {
        let table = ConnectionTable::new(cfg.max_connections);
        Engine::with_table(cfg, catalog, table)
    }

    pub fn with_table(cfg: Eng, catalog: C, table: ConnectionTable<TcpStream>) -> Result<Self, EngineError> {
        let addr = cfg
            .target_addr
            .parse()
            .map_err(|_| EngineError::InvalidAddr(cfg.target_addr.clone()))?;
        let poll = Poll::new().map_err(EngineError::Poll)?;
        Ok(Engine { buf: vec![0u8; cfg.buffer_size.max(1)], cfg, addr, poll, table, catalog })
    }

    pub fn catalog(&self) -> &C {
        &self.catalog
    }

    #[allow(dead_code)]
    pub fn into_catalog(self) -> C {
        self.catalog
    }

    /// Run every pending request of `test_id` to an outcome.
    pub fn run(&mut self, test_id: u64) -> Result<RunSummary, EngineError> {
        let mut s = RunSummary::default();
        let mut events = Events::with_capacity(self.cfg.max_connections.clamp(16, 1024));
        let wait = Duration::from_millis(self.cfg.poll_timeout_ms.max(1));
        let mut exhausted = false;
        tracing::info!(test = test_id, target = %self.addr, "run started");

        loop {
            while !exhausted && self.table.has_room() {
                exhausted = !self.admit(test_id, &mut s)?;
            }
            if self.table.is_empty() {
                break;
            }
            if let Err(e) = self.poll.poll(&mut events, Some(wait)) {
                if e.kind() == ErrorKind::Interrupted {
                    continue;
                }
                return Err(EngineError::Wait(e));
            }
            for ev in events.iter() {
                self.dispatch(ev.token().0, &mut s);
            }
            self.sweep_idle(&mut s);
        }

        tracing::info!(
            test = test_id,
            passed = s.passed,
            failed = s.failed,
            unmatched = s.unmatched,
            connections = s.connections,
            "run finished"
        );
        Ok(s)
    }

    /// Open a connection for the next pending request. Returns false once the
    /// catalog has nothing left for this test.
    fn admit(&mut self, test_id: u64, s: &mut RunSummary) -> Result<bool, EngineError> {
        let Some(p) = self.catalog.next_pending_request(test_id, None) else {
            return Ok(false);
        };
        let request = match http::frame(p.raw) {
            Ok(r) => r,
            Err(kind) => {
                fail(&mut self.catalog, (test_id, p.request_id, p.sub_request_id), &kind, s);
                return Ok(true);
            }
        };
        let mut stream = match TcpStream::connect(self.addr) {
            Ok(st) => st,
            Err(e) => {
                fail(&mut self.catalog, (test_id, p.request_id, p.sub_request_id), &FailureKind::ConnectFailed(e.to_string()), s);
                return Ok(true);
            }
        };
        let key = self.table.next_key();
        if let Err(e) = self.poll.registry().register(&mut stream, Token(key), Interest::WRITABLE) {
            fail(&mut self.catalog, (test_id, p.request_id, p.sub_request_id), &FailureKind::Io(e.to_string()), s);
            return Err(EngineError::Register(e));
        }
        let response = ResponseState::with_limits(self.cfg.max_header_size, self.cfg.max_body_size);
        self.table.insert(ConnectionEntry::new(stream, test_id, p.request_id, p.sub_request_id, p.total_requests, request, response));
        s.connections += 1;
        crate::metrics::inc_connections();
        tracing::debug!(token = key, request = p.request_id, sub = p.sub_request_id, "connection admitted");
        Ok(true)
    }

    fn dispatch(&mut self, key: usize, s: &mut RunSummary) {
        // Stale event for a connection closed earlier in this batch.
        let Some(entry) = self.table.get_mut(key) else { return };
        let registry = self.poll.registry();

        let close = match step(entry, &mut self.buf) {
            Step::Wait => false,
            Step::Sent => match registry.reregister(&mut entry.stream, Token(key), Interest::READABLE) {
                Ok(()) => false,
                Err(e) => {
                    fail(&mut self.catalog, entry.key(), &FailureKind::Io(e.to_string()), s);
                    true
                }
            },
            Step::Fail(kind) => {
                fail(&mut self.catalog, entry.key(), &kind, s);
                true
            }
            Step::Complete => {
                match verify::verify(&mut self.catalog, Some(entry.sub_request_id), &entry.request, &entry.response) {
                    Some(o) => tally(s, &o),
                    None => s.unmatched += 1,
                }
                if entry.finish() != ConnState::Reusable {
                    true
                } else if let Some(p) = self.catalog.next_pending_request(entry.test_id, Some(entry.request_id)) {
                    match http::frame(p.raw) {
                        Ok(r) => {
                            entry.reset(p.sub_request_id, r);
                            match registry.reregister(&mut entry.stream, Token(key), Interest::WRITABLE) {
                                Ok(()) => {
                                    s.reused += 1;
                                    crate::metrics::inc_reused();
                                    tracing::debug!(
                                        token = key,
                                        sub = p.sub_request_id,
                                        remaining = entry.remaining_requests,
                                        total = entry.total_requests,
                                        "connection reused"
                                    );
                                    false
                                }
                                Err(e) => {
                                    fail(&mut self.catalog, entry.key(), &FailureKind::Io(e.to_string()), s);
                                    true
                                }
                            }
                        }
                        Err(kind) => {
                            fail(&mut self.catalog, (entry.test_id, p.request_id, p.sub_request_id), &kind, s);
                            true
                        }
                    }
                } else {
                    true
                }
            }
        };

        if close {
            self.close(key);
        }
    }

    fn sweep_idle(&mut self, s: &mut RunSummary) {
        if self.cfg.idle_timeout_ms == 0 {
            return;
        }
        let now = Instant::now();
        for key in self.table.idle_keys(now, Duration::from_millis(self.cfg.idle_timeout_ms)) {
            if let Some(e) = self.table.get_mut(key) {
                let kind = FailureKind::IdleTimeout(e.idle_for(now).as_millis());
                fail(&mut self.catalog, e.key(), &kind, s);
            }
            crate::metrics::inc_idle_evictions();
            self.close(key);
        }
    }

    fn close(&mut self, key: usize) {
        if let Some(mut e) = self.table.remove(key) {
            e.state = ConnState::Closed;
            if let Err(err) = self.poll.registry().deregister(&mut e.stream) {
                tracing::debug!(token = key, error = %err, "deregister failed");
            }
            tracing::debug!(token = key, "connection closed");
        }
    }
}

fn step(entry: &mut ConnectionEntry<TcpStream>, buf: &mut [u8]) -> Step {
    match entry.state {
        ConnState::Connecting => match connect_status(&entry.stream) {
            Ok(false) => Step::Wait,
            Ok(true) => {
                entry.state = ConnState::Sending;
                entry.touch();
                write_step(entry)
            }
            Err(e) => Step::Fail(FailureKind::ConnectFailed(e)),
        },
        ConnState::Sending => write_step(entry),
        ConnState::Receiving => match entry.read_ready(buf) {
            Ok(ReadProgress::Pending) => Step::Wait,
            Ok(ReadProgress::Complete) => Step::Complete,
            Err(kind) => Step::Fail(kind),
        },
        ConnState::Verifying | ConnState::Reusable | ConnState::Closed => Step::Wait,
    }
}

fn write_step(entry: &mut ConnectionEntry<TcpStream>) -> Step {
    match entry.write_ready() {
        Ok(true) => {
            crate::metrics::inc_requests();
            Step::Sent
        }
        Ok(false) => Step::Wait,
        Err(e) => Step::Fail(FailureKind::Io(e.to_string())),
    }
}

/// Whether a non-blocking connect has finished. `Ok(false)` means still in
/// progress.
fn connect_status(s: &TcpStream) -> Result<bool, String> {
    match s.take_error() {
        Ok(Some(e)) | Err(e) => return Err(e.to_string()),
        Ok(None) => {}
    }
    match s.peer_addr() {
        Ok(_) => Ok(true),
        Err(e) if e.kind() == ErrorKind::NotConnected => Ok(false),
        Err(e) => Err(e.to_string()),
    }
}

fn tally(s: &mut RunSummary, o: &Outcome) {
    crate::metrics::inc_outcome(o.passed);
    if o.passed {
        s.passed += 1;
    } else {
        s.failed += 1;
    }
}

/// Fail the exact `(test, request, sub)` record if it is still running.
fn fail<C: TestCatalog + ?Sized>(catalog: &mut C, (test_id, request_id, sub): (u64, u64, u64), kind: &FailureKind, s: &mut RunSummary) {
    if *kind == FailureKind::UnexpectedClose {
        crate::metrics::inc_unexpected_closes();
    }
    if let Some(o) = verify::fail_running(catalog, test_id, request_id, Some(sub), kind) {
        tally(s, &o);
    }
}
