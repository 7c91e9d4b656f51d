//! Azure OpenAI chat client.
//!
//! [`AzureChatClient`] sends chat-completion requests to an Azure OpenAI
//! deployment. It is stateless: the [`AzureConfig`] is passed into every call,
//! and the client only holds the transport and constants (API versions,
//! analysis settings). One client can serve many concurrent callers.
//!
//! ```rust,no_run
//! use color_assist::ai::AzureChatClient;
//! use color_assist::config::Config;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let config = Config::load(Some("config.json".as_ref()))?;
//! let client = AzureChatClient::new(config.api_versions.clone(), config.analysis.clone());
//!
//! let report = client.test_connection(&config.azure, false).await;
//! println!("{}", report.message);
//!
//! let jpeg = std::fs::read("thumb.jpg")?;
//! let result = client.analyze(&config.azure, &jpeg, "IMG_0042.CR3").await;
//! println!("{result:?}");
//! # Ok(())
//! # }
//! ```

pub mod diagnostics;
pub mod payload;
pub mod probe;
pub mod response;
pub mod transport;
pub mod validate;

pub use diagnostics::{DiagnosticRecord, mask_secret};
pub use payload::{AnalysisRequest, PayloadBuilder, TokenLimitField, build_chat_payload};
pub use probe::{ConnectionReport, ProbeAttempt, ProbeStage};
pub use response::extract_message_text;
pub use transport::{HttpTransport, RawResponse, Transport};
pub use validate::validate;

use serde::Serialize;

use crate::config::{AnalysisSettings, ApiVersions, AzureConfig};
use crate::error::{ErrorKind, NetworkError, ValidationError};
use crate::json::JsonValue;

/// Outcome of one chat call.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ApiCallResult {
    Success {
        text: String,
    },
    Failure {
        kind: ErrorKind,
        message: String,
        http_status: Option<u16>,
    },
}

impl ApiCallResult {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    pub fn text(&self) -> Option<&str> {
        match self {
            Self::Success { text } => Some(text),
            Self::Failure { .. } => None,
        }
    }

    pub fn kind(&self) -> Option<ErrorKind> {
        match self {
            Self::Success { .. } => None,
            Self::Failure { kind, .. } => Some(*kind),
        }
    }

    pub fn message(&self) -> Option<&str> {
        match self {
            Self::Success { .. } => None,
            Self::Failure { message, .. } => Some(message),
        }
    }

    pub fn http_status(&self) -> Option<u16> {
        match self {
            Self::Success { .. } => None,
            Self::Failure { http_status, .. } => *http_status,
        }
    }

    fn invalid(err: &ValidationError) -> Self {
        Self::Failure {
            kind: err.kind(),
            message: format!("Configuration error: {err}"),
            http_status: None,
        }
    }

    fn network(err: &NetworkError, url: &str) -> Self {
        Self::Failure {
            kind: err.kind(),
            message: format!("{err}. URL: {url}"),
            http_status: None,
        }
    }
}

/// System prompt for photo analysis.
pub const ANALYSIS_SYSTEM_PROMPT: &str = "You are a professional photography color analyst helping \
color-deficient photographers. Describe color problems precisely and give corrections as concrete \
Lightroom Classic adjustments, because the photographer cannot judge hues reliably by eye.";

/// User prompt for photo analysis, embedding the photo's label.
pub fn build_analysis_prompt(photo_label: &str) -> String {
    format!(
        r#"Analyze the colors of the photo "{photo_label}" and recommend corrections.

Cover:
1. Color balance — is there a color cast? Recommend Temp and Tint changes.
2. Skin tones — if people are present, are skin tones natural? What needs to change?
3. Color harmony — do the colors work together? Anything distracting?
4. HSL specifics — which colors (Red, Orange, Yellow, Green, Aqua, Blue, Purple, Magenta) need Hue, Saturation or Luminance changes, and by roughly how much?

Use Lightroom Classic terminology (Basic panel, HSL/Color panel, Color Grading) and give numeric slider values where you can. Keep the answer concise and ordered by importance."#
    )
}

/// A sent request together with what came back.
pub(crate) struct Exchange {
    pub url: String,
    pub outcome: Result<RawResponse, NetworkError>,
    pub diagnostic: Option<DiagnosticRecord>,
}

/// Stateless Azure OpenAI chat-completions client.
pub struct AzureChatClient<T: Transport = HttpTransport> {
    transport: T,
    versions: ApiVersions,
    settings: AnalysisSettings,
}

impl AzureChatClient<HttpTransport> {
    pub fn new(versions: ApiVersions, settings: AnalysisSettings) -> Self {
        Self::with_transport(HttpTransport::new(), versions, settings)
    }
}

impl<T: Transport> AzureChatClient<T> {
    pub fn with_transport(transport: T, versions: ApiVersions, settings: AnalysisSettings) -> Self {
        Self {
            transport,
            versions,
            settings,
        }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn versions(&self) -> &ApiVersions {
        &self.versions
    }

    pub fn settings(&self) -> &AnalysisSettings {
        &self.settings
    }

    /// Send one payload to the deployment's chat-completions URL.
    pub(crate) async fn dispatch(
        &self,
        config: &AzureConfig,
        api_version: &str,
        payload: &JsonValue,
        capture: bool,
    ) -> Exchange {
        let url = chat_completions_url(config, api_version);
        let body = payload.encode();
        let api_key = config.api_key.trim();

        log::debug!("POST {url} (api-key {})", mask_secret(api_key));
        let outcome = self
            .transport
            .send(&url, &body, api_key, self.settings.timeout())
            .await;

        match &outcome {
            Ok(resp) => log::debug!("Response {}: {}", resp.status, resp.body),
            Err(e) => log::warn!("No response from {url}: {e}"),
        }

        let diagnostic = capture.then(|| DiagnosticRecord::capture(&url, api_key, &body, &outcome));
        Exchange {
            url,
            outcome,
            diagnostic,
        }
    }

    /// Send an arbitrary request against the current API version.
    ///
    /// Validates first; one round trip, no retry and no version fallback.
    pub async fn complete(
        &self,
        config: &AzureConfig,
        request: &AnalysisRequest,
        capture: bool,
    ) -> (ApiCallResult, Option<DiagnosticRecord>) {
        if let Err(e) = validate(config) {
            log::warn!("Not sending request: {e}");
            return (ApiCallResult::invalid(&e), None);
        }

        let payload = PayloadBuilder::current(config.deployment_name.trim()).build(request);
        let exchange = self
            .dispatch(config, &self.versions.current, &payload, capture)
            .await;
        let result = interpret_completion(&exchange, config);
        (result, exchange.diagnostic)
    }

    /// Ask the deployment for color-correction advice on one photo.
    pub async fn analyze(&self, config: &AzureConfig, image_bytes: &[u8], photo_label: &str) -> ApiCallResult {
        self.analyze_inner(config, image_bytes, photo_label, false).await.0
    }

    /// [`analyze`](Self::analyze), also returning the captured request/response.
    pub async fn analyze_with_diagnostics(
        &self,
        config: &AzureConfig,
        image_bytes: &[u8],
        photo_label: &str,
    ) -> (ApiCallResult, Option<DiagnosticRecord>) {
        self.analyze_inner(config, image_bytes, photo_label, true).await
    }

    async fn analyze_inner(
        &self,
        config: &AzureConfig,
        image_bytes: &[u8],
        photo_label: &str,
        capture: bool,
    ) -> (ApiCallResult, Option<DiagnosticRecord>) {
        log::info!("Analyzing {photo_label} ({} bytes)", image_bytes.len());
        let request = AnalysisRequest {
            system_prompt: ANALYSIS_SYSTEM_PROMPT.to_string(),
            user_prompt: build_analysis_prompt(photo_label),
            image_bytes: Some(image_bytes.to_vec()),
            max_output_tokens: self.settings.max_output_tokens,
            temperature: self.settings.temperature,
            top_p: self.settings.top_p,
        };
        self.complete(config, &request, capture).await
    }
}

/// `{endpoint}/openai/deployments/{deployment}/chat/completions?api-version={version}`
pub fn chat_completions_url(config: &AzureConfig, api_version: &str) -> String {
    format!(
        "{}/openai/deployments/{}/chat/completions?api-version={}",
        validate::normalize_endpoint(&config.endpoint),
        config.deployment_name.trim(),
        api_version
    )
}

/// Map a completion exchange to a result. Status decides severity; only a
/// 200 body is inspected.
fn interpret_completion(exchange: &Exchange, config: &AzureConfig) -> ApiCallResult {
    let resp = match &exchange.outcome {
        Ok(resp) => resp,
        Err(e) => return ApiCallResult::network(e, &exchange.url),
    };

    if resp.status != 200 {
        let kind = ErrorKind::from_status(resp.status);
        return ApiCallResult::Failure {
            kind,
            message: http_failure_message(kind, resp, &exchange.url, config.deployment_name.trim()),
            http_status: Some(resp.status),
        };
    }

    match response::parse_message_text(&resp.body) {
        Ok(text) => ApiCallResult::Success { text },
        Err(e) => ApiCallResult::Failure {
            kind: e.kind(),
            message: format!("Could not read the assistant reply. URL: {}. {e}", exchange.url),
            http_status: Some(resp.status),
        },
    }
}

fn http_failure_message(kind: ErrorKind, resp: &RawResponse, url: &str, deployment: &str) -> String {
    let status = resp.status;
    let headline = match kind {
        ErrorKind::Unauthorized => {
            format!("Authentication failed (HTTP {status}): the API key was rejected")
        }
        ErrorKind::NotFound => {
            format!("Deployment '{deployment}' not found (HTTP {status}): check the deployment name and endpoint")
        }
        ErrorKind::RateLimited => match resp.header("retry-after") {
            Some(secs) => format!("Rate limited (HTTP {status}): retry after {secs}s"),
            None => format!("Rate limited (HTTP {status}): wait before sending more requests"),
        },
        ErrorKind::ServerError => format!("Azure OpenAI service error (HTTP {status})"),
        _ => format!("Request failed (HTTP {status})"),
    };
    format!("{headline}. URL: {url}. Response: {}", resp.body)
}

#[cfg(test)]
pub(crate) mod testing {
    //! Scripted transport for exercising the client without a network.

    use std::sync::Mutex;
    use std::time::Duration;

    use super::transport::{RawResponse, Transport};
    use crate::config::{AnalysisSettings, ApiVersions, AzureConfig};
    use crate::error::NetworkError;

    pub const CURRENT: &str = "2024-10-21";
    pub const LEGACY: &str = "2024-06-01";

    type Responder = dyn Fn(&str, &str) -> Result<RawResponse, NetworkError> + Send + Sync;

    #[derive(Debug, Clone)]
    pub struct RecordedCall {
        pub url: String,
        pub body: String,
        pub api_key: String,
    }

    /// Answers each request with `respond(url, body)` and records it.
    pub struct ScriptedTransport {
        respond: Box<Responder>,
        calls: Mutex<Vec<RecordedCall>>,
    }

    impl ScriptedTransport {
        pub fn new(
            respond: impl Fn(&str, &str) -> Result<RawResponse, NetworkError> + Send + Sync + 'static,
        ) -> Self {
            Self {
                respond: Box::new(respond),
                calls: Mutex::new(Vec::new()),
            }
        }

        /// Same status and body for every request.
        pub fn always(status: u16, body: &'static str) -> Self {
            Self::new(move |_, _| Ok(RawResponse::new(status, body)))
        }

        /// Status chosen by the `api-version` in the URL.
        pub fn by_version(current: u16, legacy: u16) -> Self {
            Self::new(move |url, _| {
                let status = if url.ends_with(CURRENT) { current } else { legacy };
                let body = if status == 200 { ok_body("OK") } else { format!("{{\"error\":{status}}}") };
                Ok(RawResponse::new(status, body))
            })
        }

        pub fn calls(&self) -> Vec<RecordedCall> {
            self.calls.lock().map(|c| c.clone()).unwrap_or_default()
        }
    }

    #[async_trait::async_trait]
    impl Transport for ScriptedTransport {
        async fn send(
            &self,
            url: &str,
            body: &str,
            api_key: &str,
            _timeout: Duration,
        ) -> Result<RawResponse, NetworkError> {
            if let Ok(mut calls) = self.calls.lock() {
                calls.push(RecordedCall {
                    url: url.to_string(),
                    body: body.to_string(),
                    api_key: api_key.to_string(),
                });
            }
            (self.respond)(url, body)
        }
    }

    pub fn ok_body(text: &str) -> String {
        format!(r#"{{"choices":[{{"index":0,"message":{{"role":"assistant","content":"{text}"}}}}]}}"#)
    }

    pub fn versions() -> ApiVersions {
        ApiVersions {
            current: CURRENT.into(),
            legacy: LEGACY.into(),
        }
    }

    pub fn azure() -> AzureConfig {
        AzureConfig {
            endpoint: "https://contoso.openai.azure.com/".into(),
            api_key: "abcdefghijklmnop".into(),
            deployment_name: "gpt-4o-vision".into(),
        }
    }

    pub fn client(transport: ScriptedTransport) -> super::AzureChatClient<ScriptedTransport> {
        super::AzureChatClient::with_transport(transport, versions(), AnalysisSettings::default())
    }
}
