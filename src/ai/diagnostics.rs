//! Request/response capture for troubleshooting.
//!
//! A [`DiagnosticRecord`] is built for every request when the caller asks for
//! diagnostics. Records are plain values handed back to the caller; the
//! client keeps none of them. The API key never appears in a record, only
//! its masked form.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt::Write;

use super::transport::RawResponse;
use crate::error::NetworkError;

/// Characters of a secret shown before the ellipsis.
const MASK_PREFIX: usize = 8;
/// Characters of a secret shown after the ellipsis.
const MASK_SUFFIX: usize = 4;
/// Payload/body length shown by [`DiagnosticRecord::render`].
const RENDER_LIMIT: usize = 2000;

/// Mask a secret for display: first 8 and last 4 characters around `...`.
///
/// Secrets of 12 characters or fewer would be revealed completely by that
/// rule, so they are replaced by `****` instead.
pub fn mask_secret(secret: &str) -> String {
    let chars: Vec<char> = secret.chars().collect();
    if chars.len() <= MASK_PREFIX + MASK_SUFFIX {
        return "****".to_string();
    }
    let head: String = chars[..MASK_PREFIX].iter().collect();
    let tail: String = chars[chars.len() - MASK_SUFFIX..].iter().collect();
    format!("{head}...{tail}")
}

/// The headers a chat request carries, with the key masked.
pub fn masked_request_headers(api_key: &str) -> Vec<(String, String)> {
    vec![
        ("Content-Type".to_string(), "application/json".to_string()),
        ("api-key".to_string(), mask_secret(api_key)),
    ]
}

/// One captured request/response pair.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DiagnosticRecord {
    pub request_url: String,
    pub request_headers: Vec<(String, String)>,
    pub request_payload_json: String,
    /// `None` when no response arrived.
    pub response_status: Option<u16>,
    pub response_body: Option<String>,
    /// Set when no response arrived.
    pub network_error: Option<String>,
    pub timestamp_utc: DateTime<Utc>,
}

impl DiagnosticRecord {
    pub fn capture(
        url: &str,
        api_key: &str,
        payload_json: &str,
        outcome: &Result<RawResponse, NetworkError>,
    ) -> Self {
        let (response_status, response_body, network_error) = match outcome {
            Ok(resp) => (Some(resp.status), Some(resp.body.clone()), None),
            Err(e) => (None, None, Some(e.to_string())),
        };
        Self {
            request_url: url.to_string(),
            request_headers: masked_request_headers(api_key),
            request_payload_json: payload_json.to_string(),
            response_status,
            response_body,
            network_error,
            timestamp_utc: Utc::now(),
        }
    }

    /// Human-readable block. Long payloads and bodies are cut for display.
    pub fn render(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "Time:     {}", self.timestamp_utc.to_rfc3339());
        let _ = writeln!(out, "Request:  POST {}", self.request_url);
        for (name, value) in &self.request_headers {
            let _ = writeln!(out, "  {name}: {value}");
        }
        let _ = writeln!(out, "Payload:  {}", truncate_for_display(&self.request_payload_json, RENDER_LIMIT));
        match (self.response_status, &self.network_error) {
            (Some(status), _) => {
                let _ = writeln!(out, "Status:   {status}");
                let body = self.response_body.as_deref().unwrap_or("");
                let _ = writeln!(out, "Response: {}", truncate_for_display(body, RENDER_LIMIT));
            }
            (None, Some(err)) => {
                let _ = writeln!(out, "Status:   no response ({err})");
            }
            (None, None) => {
                let _ = writeln!(out, "Status:   no response");
            }
        }
        out
    }
}

/// Render several records separated by rules.
pub fn render_report(records: &[DiagnosticRecord]) -> String {
    let rule = "─".repeat(72);
    records
        .iter()
        .enumerate()
        .map(|(i, r)| format!("{rule}\n[{}/{}]\n{}", i + 1, records.len(), r.render()))
        .collect::<Vec<_>>()
        .join("")
}

fn truncate_for_display(s: &str, limit: usize) -> String {
    match s.char_indices().nth(limit) {
        None => s.to_string(),
        Some((cut, _)) => format!("{}... ({} more bytes)", &s[..cut], s.len() - cut),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn mask_shows_eight_and_four() {
        assert_eq!(mask_secret("abcdefghijklmnop"), "abcdefgh...mnop");
    }

    #[test]
    fn mask_hides_short_secrets_entirely() {
        assert_eq!(mask_secret("abcdefghijkl"), "****");
        assert_eq!(mask_secret(""), "****");
        assert_eq!(mask_secret("abcdefghijklm"), "abcdefgh...jklm");
    }

    #[test]
    fn mask_is_char_safe() {
        assert_eq!(mask_secret("ééééééééxxxxxñññ"), "éééééééé...xñññ");
    }

    #[test]
    fn headers_never_carry_full_key() {
        let key = "0123456789abcdefXYZ";
        let headers = masked_request_headers(key);
        assert!(headers.iter().all(|(_, v)| v != key));
        assert!(headers.contains(&("api-key".to_string(), "01234567...fXYZ".to_string())));
    }

    #[test]
    fn capture_response() {
        let resp = RawResponse::new(404, r#"{"error":"DeploymentNotFound"}"#);
        let rec = DiagnosticRecord::capture("https://x/y", "0123456789abcdef", "{}", &Ok(resp));
        assert_eq!(rec.response_status, Some(404));
        assert_eq!(rec.response_body.as_deref(), Some(r#"{"error":"DeploymentNotFound"}"#));
        assert!(rec.network_error.is_none());

        let text = rec.render();
        assert!(text.contains("POST https://x/y"));
        assert!(text.contains("api-key: 01234567...cdef"));
        assert!(text.contains("Status:   404"));
        assert!(!text.contains("0123456789abcdef"));
    }

    #[test]
    fn capture_network_error() {
        let outcome = Err(NetworkError::Timeout(Duration::from_secs(30)));
        let rec = DiagnosticRecord::capture("https://x/y", "0123456789abcdef", "{}", &outcome);
        assert_eq!(rec.response_status, None);
        assert!(rec.render().contains("no response (Request timed out after 30s)"));
    }

    #[test]
    fn long_payload_truncated_for_display_only() {
        let payload = "a".repeat(RENDER_LIMIT + 50);
        let rec = DiagnosticRecord::capture("u", "0123456789abcdef", &payload, &Ok(RawResponse::new(200, "")));
        assert_eq!(rec.request_payload_json.len(), RENDER_LIMIT + 50);
        assert!(rec.render().contains("... (50 more bytes)"));
    }

    #[test]
    fn serializes_to_json() {
        let rec = DiagnosticRecord::capture("u", "0123456789abcdef", "{}", &Ok(RawResponse::new(200, "ok")));
        let v = serde_json::to_value(&rec).unwrap();
        assert_eq!(v["response_status"], 200);
        assert_eq!(v["request_headers"][1][1], "01234567...cdef");
    }

    #[test]
    fn report_numbers_records() {
        let rec = DiagnosticRecord::capture("u", "0123456789abcdef", "{}", &Ok(RawResponse::new(200, "ok")));
        let report = render_report(&[rec.clone(), rec]);
        assert!(report.contains("[1/2]"));
        assert!(report.contains("[2/2]"));
    }
}
