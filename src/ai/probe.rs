//! Staged connection test.
//!
//! ```text
//! BasicValidation ──fail──▶ report (no request sent)
//!       │
//!       ▼
//! PrimaryProbe (current version) ──200──▶ success
//!       │ 400                    └─401/404/429/5xx/other/no response──▶ failure
//!       ▼
//! FallbackProbe (legacy version) ──200──▶ success (legacy)
//!                                └─anything else──▶ failure, both versions named
//! ```
//!
//! [`LegacyCompatibilityProbe`](ProbeStage::LegacyCompatibilityProbe) is not
//! part of this chain; callers run it on its own with
//! [`AzureChatClient::test_legacy_compatibility`]. Every stage is a single
//! round trip and nothing is retried: the test exists to diagnose, not to
//! get through.

use serde::Serialize;
use std::fmt::Write;

use super::diagnostics::DiagnosticRecord;
use super::payload::build_chat_payload;
use super::transport::Transport;
use super::{AzureChatClient, Exchange, validate};
use crate::config::AzureConfig;
use crate::error::ErrorKind;

/// Prompt sent by the probes. Tiny on purpose: probes only prove reachability.
pub const PROBE_PROMPT: &str = "Reply with OK.";
pub const PROBE_MAX_TOKENS: u32 = 5;
pub const PROBE_TEMPERATURE: f64 = 0.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ProbeStage {
    BasicValidation,
    PrimaryProbe,
    FallbackProbe,
    LegacyCompatibilityProbe,
}

impl ProbeStage {
    pub fn label(&self) -> &'static str {
        match self {
            Self::BasicValidation => "basic validation",
            Self::PrimaryProbe => "primary probe",
            Self::FallbackProbe => "fallback probe",
            Self::LegacyCompatibilityProbe => "legacy compatibility probe",
        }
    }
}

/// One request sent during a connection test.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProbeAttempt {
    pub stage: ProbeStage,
    pub api_version: String,
    pub url: String,
    /// `None` when no response arrived.
    pub http_status: Option<u16>,
    /// Response body, or the network error text.
    pub detail: String,
}

/// Result of a connection test.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConnectionReport {
    pub success: bool,
    /// The stage that decided the outcome.
    pub stage: ProbeStage,
    /// API version that answered 200, or that produced the final failure.
    pub api_version: Option<String>,
    pub kind: Option<ErrorKind>,
    pub http_status: Option<u16>,
    pub message: String,
    pub attempts: Vec<ProbeAttempt>,
    /// Empty unless diagnostics were requested.
    pub diagnostics: Vec<DiagnosticRecord>,
}

impl ConnectionReport {
    /// Multi-line summary: every attempt, then the verdict.
    pub fn render(&self) -> String {
        let mut out = String::new();
        for (i, attempt) in self.attempts.iter().enumerate() {
            let outcome = match attempt.http_status {
                Some(status) => format!("HTTP {status}"),
                None => "no response".to_string(),
            };
            let _ = writeln!(
                out,
                "{}. {} (api-version {}): {outcome}",
                i + 1,
                attempt.stage.label(),
                attempt.api_version
            );
            let _ = writeln!(out, "   {}", attempt.url);
        }
        let verdict = if self.success { "OK" } else { "FAILED" };
        let _ = writeln!(out, "{verdict}: {}", self.message);
        out
    }
}

/// Accumulates attempts and diagnostics while stages run.
struct ReportBuilder {
    attempts: Vec<ProbeAttempt>,
    diagnostics: Vec<DiagnosticRecord>,
}

impl ReportBuilder {
    fn new() -> Self {
        Self {
            attempts: Vec::new(),
            diagnostics: Vec::new(),
        }
    }

    fn record(&mut self, stage: ProbeStage, api_version: &str, exchange: &mut Exchange) {
        let (http_status, detail) = match &exchange.outcome {
            Ok(resp) => (Some(resp.status), resp.body.clone()),
            Err(e) => (None, e.to_string()),
        };
        self.attempts.push(ProbeAttempt {
            stage,
            api_version: api_version.to_string(),
            url: exchange.url.clone(),
            http_status,
            detail,
        });
        if let Some(record) = exchange.diagnostic.take() {
            self.diagnostics.push(record);
        }
    }

    fn success(self, stage: ProbeStage, api_version: &str, message: String) -> ConnectionReport {
        log::info!("{message}");
        ConnectionReport {
            success: true,
            stage,
            api_version: Some(api_version.to_string()),
            kind: None,
            http_status: Some(200),
            message,
            attempts: self.attempts,
            diagnostics: self.diagnostics,
        }
    }

    fn failure(
        self,
        stage: ProbeStage,
        api_version: Option<&str>,
        kind: ErrorKind,
        http_status: Option<u16>,
        message: String,
    ) -> ConnectionReport {
        log::warn!("Connection test failed at {}: {message}", stage.label());
        ConnectionReport {
            success: false,
            stage,
            api_version: api_version.map(str::to_string),
            kind: Some(kind),
            http_status,
            message,
            attempts: self.attempts,
            diagnostics: self.diagnostics,
        }
    }
}

/// How a single probe ended.
enum ProbeOutcome {
    Ok,
    /// HTTP 400: the payload or version may be the problem.
    BadRequest { body: String },
    /// Terminal failure with its message.
    Failed {
        kind: ErrorKind,
        http_status: Option<u16>,
        message: String,
    },
}

impl<T: Transport> AzureChatClient<T> {
    /// Run the staged connection test: validation, current version, and on a
    /// 400 the legacy version.
    pub async fn test_connection(&self, config: &AzureConfig, capture_diagnostics: bool) -> ConnectionReport {
        let mut report = ReportBuilder::new();
        let deployment = config.deployment_name.trim();

        log::info!("Connection test: {}", ProbeStage::BasicValidation.label());
        if let Err(e) = validate(config) {
            return report.failure(
                ProbeStage::BasicValidation,
                None,
                e.kind(),
                None,
                format!("Configuration error: {e}"),
            );
        }

        let payload = build_chat_payload(
            PROBE_PROMPT,
            None,
            Some(deployment),
            PROBE_MAX_TOKENS,
            PROBE_TEMPERATURE,
            false,
        );

        // primary
        let current = self.versions.current.as_str();
        log::info!("Connection test: {} (api-version {current})", ProbeStage::PrimaryProbe.label());
        let mut exchange = self.dispatch(config, current, &payload, capture_diagnostics).await;
        report.record(ProbeStage::PrimaryProbe, current, &mut exchange);

        let primary_body = match classify(&exchange, deployment, None) {
            ProbeOutcome::Ok => {
                return report.success(
                    ProbeStage::PrimaryProbe,
                    current,
                    format!("Connected to deployment '{deployment}' using API version {current}."),
                );
            }
            ProbeOutcome::Failed {
                kind,
                http_status,
                message,
            } => {
                return report.failure(ProbeStage::PrimaryProbe, Some(current), kind, http_status, message);
            }
            ProbeOutcome::BadRequest { body } => body,
        };

        // fallback, only reachable from a 400
        let legacy = self.versions.legacy.as_str();
        log::info!(
            "API version {current} returned HTTP 400; trying {} (api-version {legacy})",
            ProbeStage::FallbackProbe.label()
        );
        let mut exchange = self.dispatch(config, legacy, &payload, capture_diagnostics).await;
        report.record(ProbeStage::FallbackProbe, legacy, &mut exchange);

        match classify(&exchange, deployment, Some((current, legacy))) {
            ProbeOutcome::Ok => report.success(
                ProbeStage::FallbackProbe,
                legacy,
                format!(
                    "Connected to deployment '{deployment}' using legacy API version {legacy} \
                     (API version {current} returned HTTP 400: {primary_body})."
                ),
            ),
            ProbeOutcome::BadRequest { body } => report.failure(
                ProbeStage::FallbackProbe,
                Some(legacy),
                ErrorKind::BadRequest,
                Some(400),
                format!(
                    "Bad request (HTTP 400) with both API versions {current} and {legacy} for \
                     deployment '{deployment}'. URL: {}. Response: {body}",
                    exchange.url
                ),
            ),
            ProbeOutcome::Failed {
                kind,
                http_status,
                message,
            } => report.failure(ProbeStage::FallbackProbe, Some(legacy), kind, http_status, message),
        }
    }

    /// Probe the current API version with an older-client payload: no
    /// `model` field and `max_tokens` instead of `max_completion_tokens`.
    pub async fn test_legacy_compatibility(
        &self,
        config: &AzureConfig,
        capture_diagnostics: bool,
    ) -> ConnectionReport {
        let mut report = ReportBuilder::new();
        let stage = ProbeStage::LegacyCompatibilityProbe;

        if let Err(e) = validate(config) {
            return report.failure(
                ProbeStage::BasicValidation,
                None,
                e.kind(),
                None,
                format!("Configuration error: {e}"),
            );
        }

        let deployment = config.deployment_name.trim();
        let current = self.versions.current.as_str();
        let payload = build_chat_payload(
            PROBE_PROMPT,
            None,
            None,
            PROBE_MAX_TOKENS,
            PROBE_TEMPERATURE,
            true,
        );

        log::info!("Connection test: {} (api-version {current})", stage.label());
        let mut exchange = self.dispatch(config, current, &payload, capture_diagnostics).await;
        report.record(stage, current, &mut exchange);

        match classify(&exchange, deployment, None) {
            ProbeOutcome::Ok => report.success(
                stage,
                current,
                format!(
                    "Deployment '{deployment}' accepts the legacy payload (max_tokens, no model) \
                     on API version {current}."
                ),
            ),
            ProbeOutcome::BadRequest { body } => report.failure(
                stage,
                Some(current),
                ErrorKind::BadRequest,
                Some(400),
                format!(
                    "Legacy payload rejected (HTTP 400) by deployment '{deployment}' on API version \
                     {current}. URL: {}. Response: {body}",
                    exchange.url
                ),
            ),
            ProbeOutcome::Failed {
                kind,
                http_status,
                message,
            } => report.failure(stage, Some(current), kind, http_status, message),
        }
    }
}

/// Decide what a probe response means. `both` carries the (current, legacy)
/// versions once the fallback has been tried, so messages can say so.
fn classify(exchange: &Exchange, deployment: &str, both: Option<(&str, &str)>) -> ProbeOutcome {
    let url = &exchange.url;
    let resp = match &exchange.outcome {
        Ok(resp) => resp,
        Err(e) => {
            return ProbeOutcome::Failed {
                kind: e.kind(),
                http_status: None,
                message: format!("{e}. URL: {url}"),
            };
        }
    };

    let status = resp.status;
    if status == 200 {
        return ProbeOutcome::Ok;
    }

    let kind = ErrorKind::from_status(status);
    let tried = match both {
        Some((current, legacy)) => format!(" (tried API versions {current} and {legacy})"),
        None => String::new(),
    };
    let headline = match kind {
        ErrorKind::BadRequest => {
            return ProbeOutcome::BadRequest {
                body: resp.body.clone(),
            };
        }
        ErrorKind::Unauthorized => format!(
            "Authorization failed (HTTP 401) for deployment '{deployment}'{tried}: check the API key"
        ),
        ErrorKind::NotFound => format!(
            "Deployment '{deployment}' not found (HTTP 404){tried}: check the deployment name and endpoint"
        ),
        ErrorKind::RateLimited => format!(
            "Rate limited (HTTP 429) while testing deployment '{deployment}': credentials reached the service, wait and retry"
        ),
        ErrorKind::ServerError => format!(
            "Azure OpenAI service error (HTTP {status}) for deployment '{deployment}'"
        ),
        _ => format!("Unexpected HTTP {status} for deployment '{deployment}'"),
    };

    ProbeOutcome::Failed {
        kind,
        http_status: Some(status),
        message: format!("{headline}. URL: {url}. Response: {}", resp.body),
    }
}

#[cfg(test)]
mod tests {
    use super::super::testing::*;
    use super::*;
    use crate::error::NetworkError;
    use std::time::Duration;

    // ── staged fallback ──────────────────────────────────────────────

    #[tokio::test]
    async fn primary_success_stops_immediately() {
        let client = client(ScriptedTransport::by_version(200, 200));
        let report = client.test_connection(&azure(), false).await;

        assert!(report.success);
        assert_eq!(report.stage, ProbeStage::PrimaryProbe);
        assert_eq!(report.api_version.as_deref(), Some(CURRENT));
        assert_eq!(report.attempts.len(), 1);
        assert!(report.diagnostics.is_empty());
    }

    #[tokio::test]
    async fn bad_request_falls_back_to_legacy_version() {
        let client = client(ScriptedTransport::by_version(400, 200));
        let report = client.test_connection(&azure(), false).await;

        assert!(report.success);
        assert_eq!(report.stage, ProbeStage::FallbackProbe);
        assert_eq!(report.api_version.as_deref(), Some(LEGACY));
        assert!(report.message.contains("legacy API version 2024-06-01"));

        let calls = client.transport().calls();
        assert_eq!(calls.len(), 2);
        assert!(calls[0].url.ends_with("api-version=2024-10-21"));
        assert!(calls[1].url.ends_with("api-version=2024-06-01"));
        assert_eq!(calls[0].body, calls[1].body);
    }

    #[tokio::test]
    async fn unauthorized_on_primary_is_terminal() {
        let client = client(ScriptedTransport::by_version(401, 200));
        let report = client.test_connection(&azure(), false).await;

        assert!(!report.success);
        assert_eq!(report.stage, ProbeStage::PrimaryProbe);
        assert_eq!(report.kind, Some(ErrorKind::Unauthorized));
        assert_eq!(report.http_status, Some(401));
        assert!(report.message.contains("gpt-4o-vision"));
        assert!(report.message.contains("Authorization failed"));
        assert_eq!(client.transport().calls().len(), 1);
    }

    #[tokio::test]
    async fn terminal_statuses_never_fall_back() {
        for (status, kind) in [
            (404, ErrorKind::NotFound),
            (429, ErrorKind::RateLimited),
            (500, ErrorKind::ServerError),
            (502, ErrorKind::ServerError),
            (403, ErrorKind::HttpOther),
        ] {
            let client = client(ScriptedTransport::by_version(status, 200));
            let report = client.test_connection(&azure(), false).await;
            assert!(!report.success, "status {status}");
            assert_eq!(report.kind, Some(kind), "status {status}");
            assert_eq!(client.transport().calls().len(), 1, "status {status}");
            assert!(report.message.contains("URL: https://contoso.openai.azure.com/"));
        }
    }

    #[tokio::test]
    async fn fallback_auth_failure_mentions_both_versions() {
        for (status, kind) in [(401, ErrorKind::Unauthorized), (404, ErrorKind::NotFound)] {
            let client = client(ScriptedTransport::by_version(400, status));
            let report = client.test_connection(&azure(), false).await;
            assert!(!report.success);
            assert_eq!(report.stage, ProbeStage::FallbackProbe);
            assert_eq!(report.kind, Some(kind));
            assert!(report.message.contains(CURRENT) && report.message.contains(LEGACY));
        }
    }

    #[tokio::test]
    async fn double_bad_request_reports_body() {
        let client = client(ScriptedTransport::by_version(400, 400));
        let report = client.test_connection(&azure(), false).await;
        assert!(!report.success);
        assert_eq!(report.kind, Some(ErrorKind::BadRequest));
        assert!(report.message.contains("both API versions"));
        assert!(report.message.contains(r#"{"error":400}"#));
        assert_eq!(report.attempts.len(), 2);
    }

    #[tokio::test]
    async fn network_failure_is_not_retried() {
        let client = client(ScriptedTransport::new(|_, _| {
            Err(NetworkError::NoResponse("connection refused".into()))
        }));
        let report = client.test_connection(&azure(), false).await;
        assert!(!report.success);
        assert_eq!(report.kind, Some(ErrorKind::NoResponse));
        assert_eq!(report.http_status, None);
        assert_eq!(report.attempts[0].http_status, None);
        assert_eq!(client.transport().calls().len(), 1);
    }

    #[tokio::test]
    async fn timeout_reported_as_timeout() {
        let client = client(ScriptedTransport::new(|_, _| {
            Err(NetworkError::Timeout(Duration::from_secs(30)))
        }));
        let report = client.test_connection(&azure(), false).await;
        assert_eq!(report.kind, Some(ErrorKind::Timeout));
    }

    // ── validation stage ─────────────────────────────────────────────

    #[tokio::test]
    async fn validation_failure_sends_nothing() {
        let client = client(ScriptedTransport::by_version(200, 200));
        let mut cfg = azure();
        cfg.api_key = "short".into();

        let report = client.test_connection(&cfg, true).await;
        assert!(!report.success);
        assert_eq!(report.stage, ProbeStage::BasicValidation);
        assert_eq!(report.kind, Some(ErrorKind::TooShort));
        assert!(report.attempts.is_empty());
        assert!(report.diagnostics.is_empty());
        assert!(client.transport().calls().is_empty());
    }

    // ── probe payloads ───────────────────────────────────────────────

    #[tokio::test]
    async fn primary_payload_is_minimal() {
        let client = client(ScriptedTransport::by_version(200, 200));
        client.test_connection(&azure(), false).await;

        let v: serde_json::Value = serde_json::from_str(&client.transport().calls()[0].body).unwrap();
        assert_eq!(v["max_completion_tokens"], 5);
        assert_eq!(v["temperature"], 0);
        assert_eq!(v["model"], "gpt-4o-vision");
        assert_eq!(v["messages"].as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn legacy_compatibility_probe_payload() {
        let client = client(ScriptedTransport::by_version(200, 500));
        let report = client.test_legacy_compatibility(&azure(), false).await;

        assert!(report.success);
        assert_eq!(report.stage, ProbeStage::LegacyCompatibilityProbe);
        assert_eq!(report.api_version.as_deref(), Some(CURRENT));

        let calls = client.transport().calls();
        assert_eq!(calls.len(), 1);
        assert!(calls[0].url.ends_with(CURRENT));
        let v: serde_json::Value = serde_json::from_str(&calls[0].body).unwrap();
        assert!(v.get("model").is_none());
        assert!(v.get("max_completion_tokens").is_none());
        assert_eq!(v["max_tokens"], 5);
    }

    #[tokio::test]
    async fn legacy_compatibility_probe_rejected() {
        let client = client(ScriptedTransport::by_version(400, 200));
        let report = client.test_legacy_compatibility(&azure(), false).await;
        assert!(!report.success);
        assert_eq!(report.kind, Some(ErrorKind::BadRequest));
        assert_eq!(client.transport().calls().len(), 1);
    }

    // ── diagnostics ──────────────────────────────────────────────────

    #[tokio::test]
    async fn diagnostics_capture_every_stage() {
        let client = client(ScriptedTransport::by_version(400, 200));
        let report = client.test_connection(&azure(), true).await;

        assert_eq!(report.diagnostics.len(), 2);
        assert_eq!(report.diagnostics[0].response_status, Some(400));
        assert_eq!(report.diagnostics[1].response_status, Some(200));
        for record in &report.diagnostics {
            assert!(record.request_headers.contains(&("api-key".into(), "abcdefgh...mnop".into())));
        }
        let rendered = report.render();
        assert!(rendered.contains("primary probe (api-version 2024-10-21): HTTP 400"));
        assert!(rendered.contains("fallback probe (api-version 2024-06-01): HTTP 200"));
        assert!(rendered.contains("OK: Connected"));
    }
}
