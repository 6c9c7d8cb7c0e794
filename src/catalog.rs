// Test catalog: pending requests, expectations and outcome records
use bytes::Bytes;
use serde::Deserialize;
use std::collections::HashMap;
use std::fs;

use crate::error::CatalogError;

/// One accepted-value rule for a response header.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct HeaderRule {
    pub name: String,
    /// Multi-valued headers are `;`-separated and every accepted value must
    /// appear. Single-valued headers must equal one accepted value.
    #[serde(default)]
    pub multi: bool,
    pub values: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Expectation {
    pub version: String,
    pub status: String,
    pub headers: Vec<HeaderRule>,
    pub body_digest: Option<String>,
}

impl Expectation {
    pub fn status_line(&self) -> String {
        format!("HTTP/{} {}", self.version, self.status)
    }
}

/// Completion state of one request execution.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Outcome {
    pub passed: bool,
    pub failure_reason: Option<String>,
    pub running: bool,
    pub completed: bool,
}

impl Outcome {
    /// Move `running` to `completed`. Returns false, changing nothing, for
    /// anything that is not currently running.
    pub fn complete(&mut self, passed: bool, reason: Option<&str>) -> bool {
        if !self.running || self.completed {
            return false;
        }
        self.running = false;
        self.completed = true;
        self.passed = passed;
        self.failure_reason = if passed { None } else { reason.map(str::to_string) };
        true
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestRecord {
    pub test_id: u64,
    pub request_id: u64,
    pub sub_request_id: u64,
    pub started: u64,
    pub outcome: Outcome,
}

#[derive(Debug, Clone)]
pub struct PendingRequest {
    pub request_id: u64,
    pub sub_request_id: u64,
    pub total_requests: u32,
    pub raw: Bytes,
}

/// What the engine needs from wherever tests are stored.
pub trait TestCatalog {
    /// Hand out the next pending request of a test, marking its record running.
    /// With `request_id` set, only sub-requests of that request qualify.
    fn next_pending_request(&mut self, test_id: u64, request_id: Option<u64>) -> Option<PendingRequest>;
    fn running_test_record(&self, test_id: u64, request_id: u64) -> Option<TestRecord>;
    /// The running record of one exact sub-request.
    fn running_sub_record(&self, test_id: u64, request_id: u64, sub_request_id: u64) -> Option<TestRecord>;
    fn expectation_for(&self, request_id: u64, sub_request_id: u64) -> Option<Expectation>;
    /// Returns false when the record was unknown or already completed.
    fn record_outcome(&mut self, record: &TestRecord, passed: bool, failure_reason: Option<&str>) -> bool;
}

#[derive(Debug, Clone)]
pub struct SubRequest {
    pub id: u64,
    pub raw: String,
    pub expect: Option<Expectation>,
}

#[derive(Debug, Clone)]
pub struct RequestTemplate {
    pub total_requests: u32,
    pub subs: Vec<SubRequest>,
}

/// Catalog kept entirely in memory. Records live in scheduling order.
#[derive(Debug, Default)]
pub struct MemoryCatalog {
    templates: HashMap<u64, RequestTemplate>,
    records: Vec<TestRecord>,
    tests: Vec<u64>,
    seq: u64,
}

impl MemoryCatalog {
    pub fn new() -> Self {
        MemoryCatalog::default()
    }

    pub fn add_request(&mut self, id: u64, t: RequestTemplate) {
        self.templates.insert(id, t);
    }

    /// Create one pending record per sub-request of each listed request.
    pub fn schedule(&mut self, test_id: u64, request_ids: &[u64]) -> Result<(), CatalogError> {
        for &rid in request_ids {
            let t = self
                .templates
                .get(&rid)
                .ok_or(CatalogError::UnknownRequest { test_id, request_id: rid })?;
            for s in &t.subs {
                self.records.push(TestRecord {
                    test_id,
                    request_id: rid,
                    sub_request_id: s.id,
                    started: 0,
                    outcome: Outcome::default(),
                });
            }
        }
        if !self.tests.contains(&test_id) {
            self.tests.push(test_id);
        }
        Ok(())
    }

    pub fn test_ids(&self) -> Vec<u64> {
        self.tests.clone()
    }

    pub fn records(&self) -> &[TestRecord] {
        &self.records
    }

    pub fn record(&self, test_id: u64, request_id: u64, sub_request_id: u64) -> Option<&TestRecord> {
        self.records.iter().find(|r| {
            r.test_id == test_id && r.request_id == request_id && r.sub_request_id == sub_request_id
        })
    }

    pub fn from_toml(txt: &str) -> Result<Self, CatalogError> {
        let f: CatalogFile = toml::from_str(txt)?;
        let mut c = MemoryCatalog::new();
        for r in f.request {
            let mut subs = Vec::with_capacity(r.sub.len());
            for s in r.sub {
                let expect = s.expect.map(|e| e.into_expectation(r.id)).transpose()?;
                subs.push(SubRequest { id: s.id, raw: s.raw, expect });
            }
            c.add_request(r.id, RequestTemplate { total_requests: r.total_requests.max(1), subs });
        }
        for t in f.test {
            c.schedule(t.id, &t.requests)?;
        }
        Ok(c)
    }

    pub fn load(path: &str) -> Result<Self, CatalogError> {
        let txt = fs::read_to_string(path)
            .map_err(|source| CatalogError::Read { path: path.to_string(), source })?;
        let c = MemoryCatalog::from_toml(&txt)?;
        tracing::info!(path, tests = c.tests.len(), records = c.records.len(), "catalog loaded");
        Ok(c)
    }
}

impl TestCatalog for MemoryCatalog {
    fn next_pending_request(&mut self, test_id: u64, request_id: Option<u64>) -> Option<PendingRequest> {
        let rec = self.records.iter_mut().find(|r| {
            r.test_id == test_id
                && request_id.map_or(true, |id| id == r.request_id)
                && !r.outcome.running
                && !r.outcome.completed
        })?;
        let t = self.templates.get(&rec.request_id)?;
        let sub = t.subs.iter().find(|s| s.id == rec.sub_request_id)?;
        self.seq += 1;
        rec.started = self.seq;
        rec.outcome.running = true;
        let raw = sub
            .raw
            .replace("{test_id}", &test_id.to_string())
            .replace("{request_id}", &rec.request_id.to_string());
        Some(PendingRequest {
            request_id: rec.request_id,
            sub_request_id: rec.sub_request_id,
            total_requests: t.total_requests,
            raw: Bytes::from(raw),
        })
    }

    fn running_test_record(&self, test_id: u64, request_id: u64) -> Option<TestRecord> {
        self.records
            .iter()
            .filter(|r| {
                r.test_id == test_id
                    && r.request_id == request_id
                    && r.outcome.running
                    && !r.outcome.completed
            })
            .min_by_key(|r| r.started)
            .cloned()
    }

    fn running_sub_record(&self, test_id: u64, request_id: u64, sub_request_id: u64) -> Option<TestRecord> {
        self.record(test_id, request_id, sub_request_id)
            .filter(|r| r.outcome.running && !r.outcome.completed)
            .cloned()
    }

    fn expectation_for(&self, request_id: u64, sub_request_id: u64) -> Option<Expectation> {
        self.templates
            .get(&request_id)?
            .subs
            .iter()
            .find(|s| s.id == sub_request_id)?
            .expect
            .clone()
    }

    fn record_outcome(&mut self, record: &TestRecord, passed: bool, failure_reason: Option<&str>) -> bool {
        let Some(r) = self.records.iter_mut().find(|r| {
            r.test_id == record.test_id
                && r.request_id == record.request_id
                && r.sub_request_id == record.sub_request_id
        }) else {
            return false;
        };
        r.outcome.complete(passed, failure_reason)
    }
}

// ── catalog file layout ──

#[derive(Deserialize)]
struct CatalogFile {
    #[serde(default)]
    request: Vec<RequestDef>,
    #[serde(default)]
    test: Vec<TestDef>,
}

#[derive(Deserialize)]
struct RequestDef {
    id: u64,
    #[serde(default = "one")]
    total_requests: u32,
    #[serde(default)]
    sub: Vec<SubDef>,
}

fn one() -> u32 { 1 }

#[derive(Deserialize)]
struct SubDef {
    id: u64,
    raw: String,
    expect: Option<ExpectDef>,
}

#[derive(Deserialize)]
struct ExpectDef {
    #[serde(default = "default_version")]
    version: String,
    status: String,
    #[serde(default)]
    headers: Vec<HeaderRule>,
    body: Option<String>,
    body_md5: Option<String>,
}

fn default_version() -> String { "1.1".to_string() }

#[derive(Deserialize)]
struct TestDef {
    id: u64,
    requests: Vec<u64>,
}

impl ExpectDef {
    fn into_expectation(self, request_id: u64) -> Result<Expectation, CatalogError> {
        for h in &self.headers {
            let bad = |reason: &str| CatalogError::InvalidRule {
                request_id,
                name: h.name.clone(),
                reason: reason.to_string(),
            };
            if http::HeaderName::from_bytes(h.name.as_bytes()).is_err() {
                return Err(bad("not a valid header name"));
            }
            if h.values.is_empty() {
                return Err(bad("no accepted values"));
            }
        }
        let body_digest = match (self.body_md5, self.body) {
            (Some(d), _) => Some(d.to_ascii_lowercase()),
            (None, Some(b)) => Some(crate::verify::body_digest(b.as_bytes())),
            (None, None) => None,
        };
        Ok(Expectation { version: self.version, status: self.status, headers: self.headers, body_digest })
    }
}
