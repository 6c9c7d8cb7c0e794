// Response verification against catalog expectations
use std::collections::HashSet;

use crate::catalog::{Expectation, HeaderRule, Outcome, TestCatalog, TestRecord};
use crate::error::FailureKind;
use crate::http::{get_hdr, HeaderMap, RequestState, ResponseState};

/// Hex MD5 of a body. Used for equality only.
pub fn body_digest(body: &[u8]) -> String {
    format!("{:x}", md5::compute(body))
}

/// Pull `(test_id, request_id)` out of `/<test_id>/<request_id>[/...]`.
pub fn parse_target(path: &str) -> Option<(u64, u64)> {
    let path = path.split(['?', '#']).next().unwrap_or(path);
    let mut segs = path.split('/').filter(|s| !s.is_empty());
    let test_id = segs.next()?.parse().ok()?;
    let request_id = segs.next()?.parse().ok()?;
    Some((test_id, request_id))
}

pub fn check_header_rule(rule: &HeaderRule, headers: &HeaderMap) -> Result<(), FailureKind> {
    let name = rule.name.to_ascii_lowercase();
    let Some(actual) = get_hdr(headers, &name) else {
        let mut present: Vec<&str> = headers.keys().map(String::as_str).collect();
        present.sort_unstable();
        return Err(FailureKind::HeaderMissing { name, present: present.join(", ") });
    };

    if !rule.multi {
        if rule.values.iter().any(|v| v == actual) {
            return Ok(());
        }
        return Err(FailureKind::HeaderValueMismatch {
            name,
            accepted: rule.values.clone(),
            actual: actual.to_string(),
        });
    }

    let got: HashSet<&str> = actual.split(';').map(str::trim).collect();
    let mut missing: Vec<String> = Vec::new();
    for v in &rule.values {
        if !got.contains(v.as_str()) && !missing.contains(v) {
            missing.push(v.clone());
        }
    }
    if missing.is_empty() {
        Ok(())
    } else {
        Err(FailureKind::HeaderValuesMissing { name, missing, actual: actual.to_string() })
    }
}

/// Judge a complete response: status line, then header rules in order, then
/// the body digest.
pub fn check(expect: &Expectation, resp: &ResponseState) -> Result<(), FailureKind> {
    let expected = expect.status_line();
    if resp.status_line != expected {
        return Err(FailureKind::StatusLineMismatch {
            expected,
            actual: resp.status_line.clone(),
        });
    }
    for rule in &expect.headers {
        check_header_rule(rule, &resp.headers)?;
    }
    if let Some(want) = &expect.body_digest {
        let got = body_digest(resp.body());
        if !want.eq_ignore_ascii_case(&got) {
            return Err(FailureKind::BodyDigestMismatch { expected: want.clone(), actual: got });
        }
    }
    Ok(())
}

fn record<C: TestCatalog + ?Sized>(
    catalog: &mut C,
    rec: &TestRecord,
    result: Result<(), FailureKind>,
) -> Option<Outcome> {
    let reason = result.err().map(|k| k.to_string());
    let passed = reason.is_none();
    if !catalog.record_outcome(rec, passed, reason.as_deref()) {
        return None;
    }
    if passed {
        tracing::info!(test = rec.test_id, request = rec.request_id, sub = rec.sub_request_id, "passed");
    } else {
        tracing::warn!(
            test = rec.test_id,
            request = rec.request_id,
            sub = rec.sub_request_id,
            reason = reason.as_deref().unwrap_or_default(),
            "failed"
        );
    }
    Some(Outcome { passed, failure_reason: reason, running: false, completed: true })
}

/// The running record for a request. With a known sub-request only that
/// record qualifies; otherwise the earliest-started one.
fn running<C: TestCatalog + ?Sized>(catalog: &C, test_id: u64, request_id: u64, sub: Option<u64>) -> Option<TestRecord> {
    match sub {
        Some(s) => catalog.running_sub_record(test_id, request_id, s),
        None => catalog.running_test_record(test_id, request_id),
    }
}

/// Verify a completed exchange and record its outcome. `None` means nothing
/// was recorded, either because no running record matches the target path or
/// because it had already been completed.
pub fn verify<C: TestCatalog + ?Sized>(
    catalog: &mut C,
    sub: Option<u64>,
    req: &RequestState,
    resp: &ResponseState,
) -> Option<Outcome> {
    let Some((test_id, request_id)) = parse_target(&req.path) else {
        tracing::warn!(path = %req.path, "target path does not name a test, skipping verification");
        return None;
    };
    let Some(rec) = running(catalog, test_id, request_id, sub) else {
        tracing::warn!(test = test_id, request = request_id, ?sub, "no running record, skipping verification");
        return None;
    };
    let result = match catalog.expectation_for(rec.request_id, rec.sub_request_id) {
        Some(exp) => check(&exp, resp),
        None => Err(FailureKind::MissingExpectation {
            request_id: rec.request_id,
            sub_request_id: rec.sub_request_id,
        }),
    };
    record(catalog, &rec, result)
}

/// Fail whatever record is still running for this request. A completed
/// record is left untouched.
pub fn fail_running<C: TestCatalog + ?Sized>(
    catalog: &mut C,
    test_id: u64,
    request_id: u64,
    sub: Option<u64>,
    kind: &FailureKind,
) -> Option<Outcome> {
    let rec = running(catalog, test_id, request_id, sub)?;
    record(catalog, &rec, Err(kind.clone()))
}
