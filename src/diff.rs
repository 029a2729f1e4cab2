//! Pairs smuggled and control results per target and reports differences.

use std::collections::HashMap;

use serde::Serialize;

use crate::http1::Headers;
use crate::probe::ProbeResult;

/// Half-filled pairing slot; a diff is only computed once both sides exist.
#[derive(Default)]
struct Pairing {
    smuggled: Option<ProbeResult>,
    control: Option<ProbeResult>,
}

/// One side of a reported diff. Only fields that differed are populated.
#[derive(Debug, Default, Serialize)]
pub struct SideReport {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body_length: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub headers: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// A reportable difference between the two transports for one target.
#[derive(Debug, Serialize)]
pub struct DiffReport {
    pub target: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub same_headers: Option<serde_json::Value>,
    pub smuggled: SideReport,
    pub control: SideReport,
}

/// Joins probe results by target URL. Duplicate results for a side simply
/// overwrite the slot.
pub struct ResponseDiff {
    cache: HashMap<String, Pairing>,
    /// Drop the pairing after its diff has been evaluated.
    pub delete_on_show: bool,
    pub pretty: bool,
}

impl ResponseDiff {
    pub fn new(delete_on_show: bool) -> Self {
        ResponseDiff {
            cache: HashMap::new(),
            delete_on_show,
            pretty: false,
        }
    }

    /// Store a smuggled-side result; reports if the control side is present.
    pub fn record_smuggled(&mut self, result: ProbeResult) {
        let key = result.target.clone();
        self.cache.entry(key.clone()).or_default().smuggled = Some(result);
        self.show(&key);
    }

    /// Store a control-side result; reports if the smuggled side is present.
    pub fn record_control(&mut self, result: ProbeResult) {
        let key = result.target.clone();
        self.cache.entry(key.clone()).or_default().control = Some(result);
        self.show(&key);
    }

    /// Number of targets waiting for their other side.
    pub fn pending(&self) -> usize {
        self.cache.len()
    }

    fn show(&mut self, key: &str) {
        let Some(pairing) = self.cache.get(key) else {
            return;
        };
        let (Some(smuggled), Some(control)) = (&pairing.smuggled, &pairing.control) else {
            return;
        };

        if let Some(report) = compute_diff(smuggled, control) {
            self.emit(&report, smuggled, control);
        }
        if self.delete_on_show {
            self.cache.remove(key);
        }
    }

    fn emit(&self, report: &DiffReport, smuggled: &ProbeResult, control: &ProbeResult) {
        if self.pretty {
            println!("[h2c smuggling detected on {}]", report.target);
            print_side("Smuggled", smuggled);
            print_side("Normal", control);
            return;
        }

        let record = serde_json::to_string(report).unwrap_or_default();
        if tracing::enabled!(tracing::Level::DEBUG) {
            tracing::info!(
                report = %record,
                smuggled_body = %body_text(smuggled),
                control_body = %body_text(control),
                "results differ"
            );
        } else {
            tracing::info!(report = %record, "results differ");
        }
    }
}

fn body_text(result: &ProbeResult) -> String {
    result
        .response
        .as_ref()
        .map(|r| String::from_utf8_lossy(&r.body).into_owned())
        .unwrap_or_default()
}

fn print_side(label: &str, result: &ProbeResult) {
    match (&result.error, &result.response) {
        (Some(err), _) => {
            println!("[{label} error]");
            println!("{err}");
            println!();
        }
        (None, Some(response)) => {
            println!("[{label} response]");
            print!("{}", response.dump_head("HTTP/2"));
            if tracing::enabled!(tracing::Level::DEBUG) {
                println!("{}", String::from_utf8_lossy(&response.body));
            } else {
                println!("[{label} response body: {} bytes]", response.body.len());
            }
            println!();
        }
        (None, None) => {}
    }
}

/// Decide whether a pair differs and build the report. `None` means the
/// two transports agreed.
fn compute_diff(smuggled: &ProbeResult, control: &ProbeResult) -> Option<DiffReport> {
    let mut report = DiffReport {
        target: smuggled.target.clone(),
        same_headers: None,
        smuggled: SideReport::default(),
        control: SideReport::default(),
    };
    let mut differs = false;

    if smuggled.error.is_some() != control.error.is_some() {
        differs = true;
        report.smuggled.error = smuggled.error.clone();
        report.control.error = control.error.clone();
        if let Some(response) = &control.response {
            report.control.status = Some(response.status);
            report.control.body_length = Some(response.body.len());
        }
        if let Some(response) = &smuggled.response {
            report.smuggled.status = Some(response.status);
            report.smuggled.body_length = Some(response.body.len());
        }
    }

    if let (Some(sm), Some(ct)) = (&smuggled.response, &control.response) {
        if sm.status != ct.status {
            differs = true;
            report.smuggled.status = Some(sm.status);
            report.control.status = Some(ct.status);
        }

        if let Some((shared, sm_only, ct_only)) = split_headers(&sm.headers, &ct.headers) {
            differs = true;
            report.same_headers = Some(shared);
            report.smuggled.headers = Some(sm_only);
            report.control.headers = Some(ct_only);
        }

        if sm.body.len() != ct.body.len() {
            differs = true;
            report.smuggled.body_length = Some(sm.body.len());
            report.control.body_length = Some(ct.body.len());
        }

        if sm.body != ct.body {
            differs = true;
            report.smuggled.body = Some(String::from_utf8_lossy(&sm.body).into_owned());
            report.control.body = Some(String::from_utf8_lossy(&ct.body).into_owned());
        }
    }

    differs.then_some(report)
}

/// Compare header sets by name and per-name values. Returns the shared
/// headers and each side's divergent ones, or `None` when identical.
fn split_headers(
    smuggled: &Headers,
    control: &Headers,
) -> Option<(serde_json::Value, serde_json::Value, serde_json::Value)> {
    let mut names = smuggled.names();
    for name in control.names() {
        if !names.contains(&name) {
            names.push(name);
        }
    }

    let mut shared = serde_json::Map::new();
    let mut sm_only = serde_json::Map::new();
    let mut ct_only = serde_json::Map::new();

    for name in names {
        let sm_values = smuggled.get_all(&name);
        let ct_values = control.get_all(&name);
        if sm_values == ct_values {
            shared.insert(name, values_json(&sm_values));
        } else {
            if !sm_values.is_empty() {
                sm_only.insert(name.clone(), values_json(&sm_values));
            }
            if !ct_values.is_empty() {
                ct_only.insert(name, values_json(&ct_values));
            }
        }
    }

    if sm_only.is_empty() && ct_only.is_empty() {
        return None;
    }
    Some((
        serde_json::Value::Object(shared),
        serde_json::Value::Object(sm_only),
        serde_json::Value::Object(ct_only),
    ))
}

fn values_json(values: &[&str]) -> serde_json::Value {
    serde_json::Value::Array(
        values
            .iter()
            .map(|v| serde_json::Value::String((*v).to_string()))
            .collect(),
    )
}

/// Headers as a `name -> [values]` JSON object, for structured log fields.
pub(crate) fn headers_value(headers: &Headers) -> serde_json::Value {
    let mut map = serde_json::Map::new();
    for name in headers.names() {
        map.insert(name.clone(), values_json(&headers.get_all(&name)));
    }
    serde_json::Value::Object(map)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Response;
    use bytes::Bytes;

    fn response(status: u16, headers: &[(&str, &str)], body: &[u8]) -> Response {
        let mut hs = Headers::new();
        for (name, value) in headers {
            hs.insert(*name, *value);
        }
        Response {
            status,
            headers: hs,
            body: Bytes::copy_from_slice(body),
        }
    }

    fn ok(target: &str, resp: Response) -> ProbeResult {
        ProbeResult {
            target: target.to_string(),
            response: Some(resp),
            error: None,
        }
    }

    fn failed(target: &str, message: &str) -> ProbeResult {
        ProbeResult {
            target: target.to_string(),
            response: None,
            error: Some(message.to_string()),
        }
    }

    #[test]
    fn status_mismatch_is_a_diff() {
        let sm = ok("http://v/admin", response(200, &[], b"welcome"));
        let ct = ok("http://v/admin", response(403, &[], b"denied!"));
        let report = compute_diff(&sm, &ct).unwrap();
        assert_eq!(report.smuggled.status, Some(200));
        assert_eq!(report.control.status, Some(403));
    }

    #[test]
    fn identical_pairs_do_not_diff() {
        let sm = ok("http://v/", response(200, &[("server", "edge")], b"ok"));
        let ct = ok("http://v/", response(200, &[("server", "edge")], b"ok"));
        assert!(compute_diff(&sm, &ct).is_none());
    }

    #[test]
    fn extra_header_on_one_side_is_a_diff() {
        let sm = ok(
            "http://v/",
            response(200, &[("server", "edge"), ("x-internal-debug", "1")], b"ok"),
        );
        let ct = ok("http://v/", response(200, &[("server", "edge")], b"ok"));

        let report = compute_diff(&sm, &ct).unwrap();
        let sm_only = report.smuggled.headers.unwrap();
        assert!(sm_only.get("x-internal-debug").is_some());
        let shared = report.same_headers.unwrap();
        assert!(shared.get("server").is_some());
        assert_eq!(report.control.headers.unwrap(), serde_json::json!({}));
    }

    #[test]
    fn differing_values_same_cardinality_is_a_diff() {
        let sm = ok("http://v/", response(200, &[("via", "backend")], b"ok"));
        let ct = ok("http://v/", response(200, &[("via", "frontend")], b"ok"));
        assert!(compute_diff(&sm, &ct).is_some());
    }

    #[test]
    fn error_on_one_side_is_a_diff() {
        let sm = ok("http://v/x", response(200, &[], b"leaked"));
        let ct = failed("http://v/x", "connection failed: refused");
        let report = compute_diff(&sm, &ct).unwrap();
        assert_eq!(report.control.error.as_deref(), Some("connection failed: refused"));
        assert_eq!(report.smuggled.status, Some(200));

        let both_failed = compute_diff(
            &failed("http://v/x", "a"),
            &failed("http://v/x", "b"),
        );
        assert!(both_failed.is_none());
    }

    #[test]
    fn body_length_and_content_differences() {
        let sm = ok("http://v/", response(200, &[], b"aaaa"));
        let ct = ok("http://v/", response(200, &[], b"bbbb"));
        let report = compute_diff(&sm, &ct).unwrap();
        // Same length, different bytes.
        assert!(report.smuggled.body_length.is_none());
        assert_eq!(report.smuggled.body.as_deref(), Some("aaaa"));

        let sm = ok("http://v/", response(200, &[], b"aaaa"));
        let ct = ok("http://v/", response(200, &[], b"aa"));
        let report = compute_diff(&sm, &ct).unwrap();
        assert_eq!(report.smuggled.body_length, Some(4));
        assert_eq!(report.control.body_length, Some(2));
    }

    #[test]
    fn the_same_pair_always_yields_the_same_report() {
        let sm = ok("http://v/admin", response(200, &[("server", "backend")], b"welcome"));
        let ct = ok("http://v/admin", response(403, &[], b"denied"));

        let first = serde_json::to_string(&compute_diff(&sm, &ct).unwrap()).unwrap();
        let second = serde_json::to_string(&compute_diff(&sm, &ct).unwrap()).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn no_report_until_both_sides_arrive() {
        let mut differ = ResponseDiff::new(false);
        differ.record_smuggled(ok("http://v/a", response(200, &[], b"x")));
        assert_eq!(differ.pending(), 1);

        differ.record_control(ok("http://v/a", response(403, &[], b"y")));
        // Pairing is kept because delete_on_show is off.
        assert_eq!(differ.pending(), 1);
    }

    #[test]
    fn eviction_after_show() {
        let mut differ = ResponseDiff::new(true);
        differ.record_smuggled(ok("http://v/a", response(200, &[], b"x")));
        differ.record_control(ok("http://v/a", response(403, &[], b"y")));
        assert_eq!(differ.pending(), 0);
    }

    #[test]
    fn duplicate_results_overwrite_their_slot() {
        let mut differ = ResponseDiff::new(false);
        differ.record_smuggled(ok("http://v/a", response(200, &[], b"first")));
        differ.record_smuggled(ok("http://v/a", response(500, &[], b"second")));
        assert_eq!(differ.pending(), 1);
        let pairing = differ.cache.get("http://v/a").unwrap();
        assert_eq!(pairing.smuggled.as_ref().unwrap().response.as_ref().unwrap().status, 500);
        assert!(pairing.control.is_none());
    }
}
