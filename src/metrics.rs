// Lock-free run metrics using atomic counters
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::OnceLock;
use std::time::Instant;

static START_TIME: OnceLock<Instant> = OnceLock::new();

static CONNECTIONS_OPENED: AtomicU64 = AtomicU64::new(0);
static CONNECTIONS_REUSED: AtomicU64 = AtomicU64::new(0);
static REQUESTS_SENT: AtomicU64 = AtomicU64::new(0);
static BYTES_IN: AtomicU64 = AtomicU64::new(0);
static BYTES_OUT: AtomicU64 = AtomicU64::new(0);
static OUTCOMES_PASSED: AtomicU64 = AtomicU64::new(0);
static OUTCOMES_FAILED: AtomicU64 = AtomicU64::new(0);
static IDLE_EVICTIONS: AtomicU64 = AtomicU64::new(0);
static UNEXPECTED_CLOSES: AtomicU64 = AtomicU64::new(0);

pub fn init() {
    START_TIME.get_or_init(Instant::now);
}

#[inline]
pub fn inc_connections() { CONNECTIONS_OPENED.fetch_add(1, Ordering::Relaxed); }

#[inline]
pub fn inc_reused() { CONNECTIONS_REUSED.fetch_add(1, Ordering::Relaxed); }

#[inline]
pub fn inc_requests() { REQUESTS_SENT.fetch_add(1, Ordering::Relaxed); }

#[inline]
pub fn add_bytes_in(n: u64) { BYTES_IN.fetch_add(n, Ordering::Relaxed); }

#[inline]
pub fn add_bytes_out(n: u64) { BYTES_OUT.fetch_add(n, Ordering::Relaxed); }

#[inline]
pub fn inc_outcome(passed: bool) {
    if passed {
        OUTCOMES_PASSED.fetch_add(1, Ordering::Relaxed);
    } else {
        OUTCOMES_FAILED.fetch_add(1, Ordering::Relaxed);
    }
}

#[inline]
pub fn inc_idle_evictions() { IDLE_EVICTIONS.fetch_add(1, Ordering::Relaxed); }

#[inline]
pub fn inc_unexpected_closes() { UNEXPECTED_CLOSES.fetch_add(1, Ordering::Relaxed); }

#[derive(Debug, Clone, Copy)]
pub struct Snapshot {
    pub uptime_secs: u64,
    pub connections_opened: u64,
    pub connections_reused: u64,
    pub requests_sent: u64,
    pub bytes_in: u64,
    pub bytes_out: u64,
    pub outcomes_passed: u64,
    pub outcomes_failed: u64,
    pub idle_evictions: u64,
    pub unexpected_closes: u64,
}

pub fn snapshot() -> Snapshot {
    Snapshot {
        uptime_secs: START_TIME.get().map(|t| t.elapsed().as_secs()).unwrap_or(0),
        connections_opened: CONNECTIONS_OPENED.load(Ordering::Relaxed),
        connections_reused: CONNECTIONS_REUSED.load(Ordering::Relaxed),
        requests_sent: REQUESTS_SENT.load(Ordering::Relaxed),
        bytes_in: BYTES_IN.load(Ordering::Relaxed),
        bytes_out: BYTES_OUT.load(Ordering::Relaxed),
        outcomes_passed: OUTCOMES_PASSED.load(Ordering::Relaxed),
        outcomes_failed: OUTCOMES_FAILED.load(Ordering::Relaxed),
        idle_evictions: IDLE_EVICTIONS.load(Ordering::Relaxed),
        unexpected_closes: UNEXPECTED_CLOSES.load(Ordering::Relaxed),
    }
}

pub fn snapshot_json() -> String {
    let s = snapshot();
    format!(
        r#"{{"uptime_seconds":{},"connections_opened":{},"connections_reused":{},"requests_sent":{},"bytes_in":{},"bytes_out":{},"outcomes_passed":{},"outcomes_failed":{},"idle_evictions":{},"unexpected_closes":{}}}"#,
        s.uptime_secs,
        s.connections_opened,
        s.connections_reused,
        s.requests_sent,
        s.bytes_in,
        s.bytes_out,
        s.outcomes_passed,
        s.outcomes_failed,
        s.idle_evictions,
        s.unexpected_closes,
    )
}
