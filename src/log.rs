// Logging setup and colored run summaries
use std::io::{self, Write};
use tracing::Level;

use crate::colors::*;
use crate::catalog::TestRecord;
use crate::engine::RunSummary;

pub fn parse_level(level: &str) -> Level {
    match level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "warn" | "warning" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    }
}

/// Install the global subscriber. A second call is a no-op.
pub fn init(enabled: bool, level: &str) {
    if !enabled { return; }
    let _ = tracing_subscriber::fmt()
        .with_max_level(parse_level(level))
        .with_target(false)
        .with_writer(io::stderr)
        .try_init();
}

pub fn separator() {
    let _ = writeln!(io::stdout(), "{SEPARATOR}");
    let _ = io::stdout().flush();
}

pub fn summary(test_id: u64, s: &RunSummary) {
    let col = outcome_color(s.failed == 0);
    let _ = writeln!(
        io::stdout(),
        "{BOLD}test {test_id}{RESET}  {GREEN}✓ {}{RESET}  {col}✗ {}{RESET}  {DIM}unmatched {} | connections {} | reused {}{RESET}",
        s.passed, s.failed, s.unmatched, s.connections, s.reused
    );
    let _ = io::stdout().flush();
}

pub fn failure(r: &TestRecord) {
    let reason = r.outcome.failure_reason.as_deref().unwrap_or("");
    let _ = writeln!(io::stdout(), "  {RED}✗{RESET} {}/{}/{} {DIM}{reason}{RESET}", r.test_id, r.request_id, r.sub_request_id);
    let _ = io::stdout().flush();
}
