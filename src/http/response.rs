// Incremental response parsing across read events
use bytes::BytesMut;

use super::{find_hdr_end_from, get_hdr, is_persistent, parse_head, HeaderMap, MAX_BODY_SIZE, MAX_HEADER_SIZE};
use crate::error::FailureKind;

/// Receive-side progress for one response.
///
/// Once `headers_complete` is set, `received_bytes + rem_bytes_to_read ==
/// tot_bytes_to_read`. Bytes past `tot_bytes_to_read` are dropped.
#[derive(Debug, Clone)]
pub struct ResponseState {
    header_buf: BytesMut,
    body: BytesMut,
    pub headers_complete: bool,
    pub body_complete: bool,
    pub status_line: String,
    pub headers: HeaderMap,
    pub chunked: bool,
    pub persistent: bool,
    pub received_bytes: usize,
    pub rem_bytes_to_read: usize,
    pub tot_bytes_to_read: usize,
    /// Bytes seen past `tot_bytes_to_read`. Non-zero makes the connection
    /// unfit for another request.
    pub excess_bytes: usize,
    /// Header bytes already searched for the boundary.
    scanned: usize,
    max_header_size: usize,
    max_body_size: usize,
}

impl Default for ResponseState {
    fn default() -> Self {
        ResponseState::with_limits(MAX_HEADER_SIZE, MAX_BODY_SIZE)
    }
}

impl ResponseState {
    pub fn with_limits(max_header_size: usize, max_body_size: usize) -> Self {
        ResponseState {
            header_buf: BytesMut::new(),
            body: BytesMut::new(),
            headers_complete: false,
            body_complete: false,
            status_line: String::new(),
            headers: HeaderMap::new(),
            chunked: false,
            persistent: true,
            received_bytes: 0,
            rem_bytes_to_read: 0,
            tot_bytes_to_read: 0,
            excess_bytes: 0,
            scanned: 0,
            max_header_size,
            max_body_size,
        }
    }

    /// Fresh state carrying over this one's limits.
    pub fn reset(&self) -> Self {
        ResponseState::with_limits(self.max_header_size, self.max_body_size)
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    #[allow(dead_code)]
    /// Header bytes seen so far (only the header region once complete).
    pub fn header_bytes(&self) -> &[u8] {
        &self.header_buf
    }

    /// Absorb one read's worth of bytes.
    pub fn feed(&mut self, chunk: &[u8]) -> Result<(), FailureKind> {
        if self.headers_complete {
            self.append_body(chunk);
            return Ok(());
        }

        self.header_buf.extend_from_slice(chunk);
        let Some((p, sep)) = find_hdr_end_from(&self.header_buf, self.scanned) else {
            self.scanned = self.header_buf.len();
            if self.header_buf.len() > self.max_header_size {
                return Err(FailureKind::HeadersTooLarge(self.max_header_size));
            }
            return Ok(());
        };

        let rest = self.header_buf.split_off(p + sep);
        self.header_buf.truncate(p);
        self.parse_headers()?;
        self.append_body(&rest);
        Ok(())
    }

    fn parse_headers(&mut self) -> Result<(), FailureKind> {
        let text = String::from_utf8_lossy(&self.header_buf).into_owned();
        let (sl, h) = parse_head(&text);
        self.status_line = sl.to_string();
        self.chunked = get_hdr(&h, "transfer-encoding").is_some();
        self.persistent = is_persistent(&h);
        let tot = match get_hdr(&h, "content-length") {
            Some(v) => v
                .parse::<usize>()
                .map_err(|_| FailureKind::InvalidContentLength(v.to_string()))?,
            None => 0,
        };
        self.headers = h;
        self.headers_complete = true;

        // No decoder for chunked framing; refuse it rather than miscount.
        if self.chunked {
            return Err(FailureKind::ChunkedUnsupported);
        }
        if tot > self.max_body_size {
            return Err(FailureKind::BodyTooLarge { len: tot, limit: self.max_body_size });
        }
        self.tot_bytes_to_read = tot;
        self.rem_bytes_to_read = tot;
        self.body_complete = tot == 0;
        Ok(())
    }

    fn append_body(&mut self, d: &[u8]) {
        let take = d.len().min(self.rem_bytes_to_read);
        if take < d.len() {
            self.add_excess(d.len() - take);
        }
        self.body.extend_from_slice(&d[..take]);
        self.received_bytes += take;
        self.rem_bytes_to_read = self.tot_bytes_to_read - self.received_bytes;
        if self.rem_bytes_to_read == 0 {
            self.body_complete = true;
        }
    }

    /// Record bytes that arrived after the body was complete.
    pub fn add_excess(&mut self, n: usize) {
        tracing::debug!(extra = n, "dropping bytes past content-length");
        self.excess_bytes += n;
    }
}
