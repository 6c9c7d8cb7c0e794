// Per-connection lifecycle and the table that owns every open connection
use slab::Slab;
use std::io::{self, ErrorKind, Read, Write};
use std::time::{Duration, Instant};

use crate::error::FailureKind;
use crate::http::{RequestState, ResponseState};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnState {
    Connecting,
    Sending,
    Receiving,
    Verifying,
    Reusable,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadProgress {
    /// Transport drained, response still incomplete.
    Pending,
    /// Response body complete; entry is now `Verifying`.
    Complete,
}

pub struct ConnectionEntry<S> {
    pub stream: S,
    pub test_id: u64,
    pub request_id: u64,
    /// Sub-request currently carried; outcomes are recorded against it.
    pub sub_request_id: u64,
    pub total_requests: u32,
    pub remaining_requests: u32,
    /// Peer shut its side after the last complete response.
    pub peer_closed: bool,
    pub last_activity: Instant,
    pub state: ConnState,
    pub request: RequestState,
    pub response: ResponseState,
}

impl<S> ConnectionEntry<S> {
    /// A freshly admitted connection. One request of the quota is consumed by
    /// the request it is created for.
    pub fn new(
        stream: S,
        test_id: u64,
        request_id: u64,
        sub_request_id: u64,
        total_requests: u32,
        request: RequestState,
        response: ResponseState,
    ) -> Self {
        ConnectionEntry {
            stream,
            test_id,
            request_id,
            sub_request_id,
            total_requests,
            remaining_requests: total_requests.saturating_sub(1),
            peer_closed: false,
            last_activity: Instant::now(),
            state: ConnState::Connecting,
            request,
            response,
        }
    }

    /// `(test, request, sub)` of the record this connection is serving.
    pub fn key(&self) -> (u64, u64, u64) {
        (self.test_id, self.request_id, self.sub_request_id)
    }

    pub fn touch(&mut self) {
        self.last_activity = Instant::now();
    }

    pub fn idle_for(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_activity)
    }

    /// Decide what follows verification.
    pub fn finish(&mut self) -> ConnState {
        let clean = self.response.excess_bytes == 0 && !self.peer_closed;
        self.state = if self.request.persistent && self.response.persistent && clean && self.remaining_requests > 0 {
            ConnState::Reusable
        } else {
            ConnState::Closed
        };
        self.state
    }

    /// Load the next request onto a reusable connection.
    pub fn reset(&mut self, sub_request_id: u64, request: RequestState) {
        self.response = self.response.reset();
        self.request = request;
        self.sub_request_id = sub_request_id;
        self.remaining_requests = self.remaining_requests.saturating_sub(1);
        self.state = ConnState::Sending;
        self.touch();
    }
}

impl<S: Read + Write> ConnectionEntry<S> {
    /// Push unsent bytes until the transport refuses more. Returns true once
    /// the whole request is out, at which point the entry is `Receiving`.
    pub fn write_ready(&mut self) -> io::Result<bool> {
        while !self.request.is_sent() {
            match self.stream.write(self.request.unsent()) {
                Ok(0) => return Err(ErrorKind::WriteZero.into()),
                Ok(n) => {
                    self.request.advance(n);
                    self.touch();
                    crate::metrics::add_bytes_out(n as u64);
                }
                Err(ref e) if e.kind() == ErrorKind::WouldBlock => return Ok(false),
                Err(ref e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
        self.state = ConnState::Receiving;
        Ok(true)
    }

    /// Drain readable bytes into the response parser.
    pub fn read_ready(&mut self, buf: &mut [u8]) -> Result<ReadProgress, FailureKind> {
        loop {
            match self.stream.read(buf) {
                Ok(0) => return Err(FailureKind::UnexpectedClose),
                Ok(n) => {
                    self.touch();
                    crate::metrics::add_bytes_in(n as u64);
                    self.response.feed(&buf[..n])?;
                    if self.response.body_complete {
                        self.probe_trailing(buf);
                        self.state = ConnState::Verifying;
                        return Ok(ReadProgress::Complete);
                    }
                }
                Err(ref e) if e.kind() == ErrorKind::WouldBlock => return Ok(ReadProgress::Pending),
                Err(ref e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(FailureKind::Io(e.to_string())),
            }
        }
    }
}

impl<S: Read> ConnectionEntry<S> {
    /// One more read after a complete response. Anything that shows up, or a
    /// close, rules the connection out for reuse.
    fn probe_trailing(&mut self, buf: &mut [u8]) {
        let res = loop {
            match self.stream.read(buf) {
                Err(ref e) if e.kind() == ErrorKind::Interrupted => continue,
                other => break other,
            }
        };
        match res {
            Ok(0) => self.peer_closed = true,
            Ok(n) => {
                crate::metrics::add_bytes_in(n as u64);
                self.response.add_excess(n);
            }
            Err(ref e) if e.kind() == ErrorKind::WouldBlock => {}
            Err(e) => {
                tracing::debug!(error = %e, "read after complete response failed");
                self.peer_closed = true;
            }
        }
    }
}

/// Arena of open connections. The slab key doubles as the poll token.
pub struct ConnectionTable<S> {
    entries: Slab<ConnectionEntry<S>>,
    limit: usize,
}

impl<S> ConnectionTable<S> {
    pub fn new(limit: usize) -> Self {
        ConnectionTable { entries: Slab::with_capacity(limit.min(1024)), limit: limit.max(1) }
    }

    pub fn has_room(&self) -> bool {
        self.entries.len() < self.limit
    }

    /// Key the next `insert` will hand out.
    pub fn next_key(&self) -> usize {
        self.entries.vacant_key()
    }

    pub fn insert(&mut self, e: ConnectionEntry<S>) -> usize {
        self.entries.insert(e)
    }

    pub fn get_mut(&mut self, key: usize) -> Option<&mut ConnectionEntry<S>> {
        self.entries.get_mut(key)
    }

    pub fn remove(&mut self, key: usize) -> Option<ConnectionEntry<S>> {
        self.entries.try_remove(key)
    }

    #[allow(dead_code)]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Keys of entries with no activity for longer than `timeout`.
    pub fn idle_keys(&self, now: Instant, timeout: Duration) -> Vec<usize> {
        self.entries
            .iter()
            .filter(|(_, e)| e.idle_for(now) > timeout)
            .map(|(k, _)| k)
            .collect()
    }
}
