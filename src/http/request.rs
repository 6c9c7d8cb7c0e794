// Request framing: raw template to a send-state record
use bytes::Bytes;

use super::{find_hdr_end, get_hdr, is_persistent, parse_head, HeaderMap};
use crate::error::FailureKind;

/// Send-side progress for one request.
///
/// `sent_bytes + rem_bytes_to_send == tot_bytes_to_send` holds after every
/// call to [`RequestState::advance`], and `sent_bytes` never decreases.
#[derive(Debug, Clone)]
pub struct RequestState {
    raw: Bytes,
    pub header_len: usize,
    pub body_len: usize,
    sent_bytes: usize,
    rem_bytes_to_send: usize,
    tot_bytes_to_send: usize,
    pub headers: HeaderMap,
    pub path: String,
    pub method: String,
    pub chunked: bool,
    pub persistent: bool,
}

/// Parse a raw request template. Fails when the request line lacks a method
/// and a target path, or the method is not an HTTP token.
pub fn frame(raw: impl Into<Bytes>) -> Result<RequestState, FailureKind> {
    let raw = raw.into();
    let (header_len, body_len) = match find_hdr_end(&raw) {
        Some((p, sep)) => (p, raw.len() - p - sep),
        None => (raw.len(), 0),
    };
    let text = String::from_utf8_lossy(&raw[..header_len]);
    let (rl, headers) = parse_head(&text);
    let mut toks = rl.split_whitespace();
    let (method, path) = match (toks.next(), toks.next()) {
        (Some(m), Some(p)) => (m.to_string(), p.to_string()),
        _ => return Err(FailureKind::MalformedRequest(rl.to_string())),
    };
    if http::Method::from_bytes(method.as_bytes()).is_err() {
        return Err(FailureKind::MalformedRequest(rl.to_string()));
    }
    let tot = raw.len();
    Ok(RequestState {
        header_len,
        body_len,
        sent_bytes: 0,
        rem_bytes_to_send: tot,
        tot_bytes_to_send: tot,
        chunked: get_hdr(&headers, "transfer-encoding").is_some(),
        persistent: is_persistent(&headers),
        headers,
        path,
        method,
        raw,
    })
}

impl RequestState {
    /// Bytes not yet accepted by the transport.
    pub fn unsent(&self) -> &[u8] {
        &self.raw[self.sent_bytes..]
    }

    /// Record that the transport accepted `n` more bytes.
    pub fn advance(&mut self, n: usize) {
        let n = n.min(self.rem_bytes_to_send);
        self.sent_bytes += n;
        self.rem_bytes_to_send -= n;
    }

    pub fn is_sent(&self) -> bool {
        self.rem_bytes_to_send == 0
    }

    pub fn sent_bytes(&self) -> usize { self.sent_bytes }
    pub fn rem_bytes_to_send(&self) -> usize { self.rem_bytes_to_send }
    pub fn tot_bytes_to_send(&self) -> usize { self.tot_bytes_to_send }
}
