// HTTP/1 framing helpers shared by the request framer and response parser
mod request;
mod response;
pub use request::{frame, RequestState};
pub use response::ResponseState;
use std::collections::HashMap;

pub const MAX_HEADER_SIZE: usize = 65_536;
pub const MAX_BODY_SIZE: usize = 16 * 1024 * 1024;

pub type HeaderMap = HashMap<String, String>;

fn find(d: &[u8], pat: &[u8], from: usize) -> Option<usize> {
    let start = from.min(d.len());
    d[start..].windows(pat.len()).position(|w| w == pat).map(|p| start + p)
}

/// Locate the header/body boundary. Returns the offset where the header
/// region ends and the length of the separator found there.
///
/// A double CRLF anywhere in the input wins over a bare double LF.
pub fn find_hdr_end(d: &[u8]) -> Option<(usize, usize)> {
    find_hdr_end_from(d, 0)
}

/// Same as [`find_hdr_end`] when `d[..scanned]` is known to hold neither
/// separator. Only the tail is searched, overlapping far enough back to catch
/// a separator split across the old and new bytes.
pub fn find_hdr_end_from(d: &[u8], scanned: usize) -> Option<(usize, usize)> {
    if let Some(p) = find(d, b"\r\n\r\n", scanned.saturating_sub(3)) { return Some((p, 4)); }
    find(d, b"\n\n", scanned.saturating_sub(1)).map(|p| (p, 2))
}

/// Split header text into its first line and a lower-cased header map.
/// Lines without a colon are skipped; later duplicates replace earlier ones.
pub fn parse_head(t: &str) -> (&str, HeaderMap) {
    let mut l = t.split('\n').map(|ln| ln.strip_suffix('\r').unwrap_or(ln));
    let first = l.next().unwrap_or("");
    let mut h = HeaderMap::new();
    for ln in l {
        if let Some((k, v)) = ln.split_once(':') {
            h.insert(k.trim().to_ascii_lowercase(), v.trim().to_string());
        }
    }
    (first, h)
}

pub fn get_hdr<'a>(h: &'a HeaderMap, n: &str) -> Option<&'a str> {
    h.get(&n.to_ascii_lowercase()).map(|v| v.as_str())
}

/// `connection: close` is the only thing that makes a message non-persistent.
pub fn is_persistent(h: &HeaderMap) -> bool {
    !get_hdr(h, "connection").is_some_and(|v| v.eq_ignore_ascii_case("close"))
}
