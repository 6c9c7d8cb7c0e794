// Error kinds for a single request execution and for the run as a whole
use thiserror::Error;

/// Why one request execution failed. The `Display` text is what gets stored
/// as the failure reason in the catalog.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FailureKind {
    #[error("malformed request line: {0:?}")]
    MalformedRequest(String),

    #[error("no expectation registered for request {request_id}/{sub_request_id}")]
    MissingExpectation { request_id: u64, sub_request_id: u64 },

    #[error("Expected Status Line: {expected} does not match response: {actual}")]
    StatusLineMismatch { expected: String, actual: String },

    #[error("header missing: {name} (response has: {present})")]
    HeaderMissing { name: String, present: String },

    #[error("single-value header {name}: value {actual:?} not in accepted list {accepted:?}")]
    HeaderValueMismatch { name: String, accepted: Vec<String>, actual: String },

    #[error("multi-value header {name}: missing values {missing:?} in {actual:?}")]
    HeaderValuesMissing { name: String, missing: Vec<String>, actual: String },

    #[error("checksum differs: expected {expected}, computed {actual}")]
    BodyDigestMismatch { expected: String, actual: String },

    #[error("unexpected event during response receipt")]
    UnexpectedClose,

    #[error("chunked transfer-encoding responses are not supported")]
    ChunkedUnsupported,

    #[error("response headers exceed {0} bytes")]
    HeadersTooLarge(usize),

    #[error("content-length {len} exceeds limit of {limit} bytes")]
    BodyTooLarge { len: usize, limit: usize },

    #[error("invalid content-length: {0:?}")]
    InvalidContentLength(String),

    #[error("connection failed: {0}")]
    ConnectFailed(String),

    #[error("i/o error: {0}")]
    Io(String),

    #[error("connection idle for {0}ms, giving up")]
    IdleTimeout(u128),
}

/// Conditions that stop the whole run. Everything else is a `FailureKind`.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("invalid target address {0:?}")]
    InvalidAddr(String),

    #[error("failed to create poller: {0}")]
    Poll(#[source] std::io::Error),

    #[error("failed to register connection with poller: {0}")]
    Register(#[source] std::io::Error),

    #[error("readiness wait failed: {0}")]
    Wait(#[source] std::io::Error),
}

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("cannot read catalog {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot parse catalog: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("request {request_id}: invalid header rule {name:?}: {reason}")]
    InvalidRule { request_id: u64, name: String, reason: String },

    #[error("test {test_id} references unknown request {request_id}")]
    UnknownRequest { test_id: u64, request_id: u64 },
}
