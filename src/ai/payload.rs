use base64::Engine;
use base64::engine::general_purpose::STANDARD;

use crate::json::{JsonValue, Table};

/// Which field name carries the output token limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenLimitField {
    /// `max_completion_tokens`, accepted by current API versions.
    MaxCompletionTokens,
    /// `max_tokens`, the older spelling.
    MaxTokens,
}

impl TokenLimitField {
    pub fn from_legacy_flag(use_legacy_token_param: bool) -> Self {
        if use_legacy_token_param {
            Self::MaxTokens
        } else {
            Self::MaxCompletionTokens
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MaxCompletionTokens => "max_completion_tokens",
            Self::MaxTokens => "max_tokens",
        }
    }
}

/// A chat request before it is turned into wire JSON.
#[derive(Debug, Clone, PartialEq)]
pub struct AnalysisRequest {
    /// Sent as a `system` message when non-empty.
    pub system_prompt: String,
    pub user_prompt: String,
    /// Already-encoded JPEG bytes.
    pub image_bytes: Option<Vec<u8>>,
    pub max_output_tokens: u32,
    pub temperature: f64,
    pub top_p: Option<f64>,
}

/// Shapes the wire payload. The two knobs are the ones the connection test
/// varies between stages: whether `model` is sent and how the token limit is
/// spelled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PayloadBuilder {
    model: Option<String>,
    token_field: TokenLimitField,
}

impl PayloadBuilder {
    /// Current-API payload: includes `model`, uses `max_completion_tokens`.
    pub fn current(model: impl Into<String>) -> Self {
        Self {
            model: Some(model.into()),
            token_field: TokenLimitField::MaxCompletionTokens,
        }
    }

    /// Older-client payload: no `model`, uses `max_tokens`.
    pub fn legacy_compatible() -> Self {
        Self {
            model: None,
            token_field: TokenLimitField::MaxTokens,
        }
    }

    pub fn token_field(&self) -> TokenLimitField {
        self.token_field
    }

    pub fn build(&self, request: &AnalysisRequest) -> JsonValue {
        let mut messages = Table::new();
        if !request.system_prompt.is_empty() {
            messages.push(message("system", request.system_prompt.as_str().into()));
        }
        messages.push(message(
            "user",
            user_content(&request.user_prompt, request.image_bytes.as_deref()),
        ));

        let mut payload = Table::new();
        payload.set("messages", messages);
        if let Some(ref model) = self.model {
            payload.set("model", model.as_str());
        }
        payload.set(self.token_field.as_str(), request.max_output_tokens);
        payload.set("temperature", request.temperature);
        if let Some(top_p) = request.top_p {
            payload.set("top_p", top_p);
        }
        JsonValue::Table(payload)
    }
}

/// Single-prompt payload, as used by the connectivity probes.
pub fn build_chat_payload(
    prompt: &str,
    image: Option<&[u8]>,
    model: Option<&str>,
    max_tokens: u32,
    temperature: f64,
    use_legacy_token_param: bool,
) -> JsonValue {
    let builder = PayloadBuilder {
        model: model.map(str::to_string),
        token_field: TokenLimitField::from_legacy_flag(use_legacy_token_param),
    };
    builder.build(&AnalysisRequest {
        system_prompt: String::new(),
        user_prompt: prompt.to_string(),
        image_bytes: image.map(<[u8]>::to_vec),
        max_output_tokens: max_tokens,
        temperature,
        top_p: None,
    })
}

/// `data:image/jpeg;base64,...` for embedding in an `image_url` part.
pub fn jpeg_data_url(bytes: &[u8]) -> String {
    format!("data:image/jpeg;base64,{}", STANDARD.encode(bytes))
}

fn message(role: &str, content: JsonValue) -> JsonValue {
    JsonValue::object([("role", JsonValue::from(role)), ("content", content)])
}

fn user_content(prompt: &str, image: Option<&[u8]>) -> JsonValue {
    match image {
        None => prompt.into(),
        Some(bytes) => JsonValue::array(vec![
            JsonValue::object([("type", JsonValue::from("text")), ("text", prompt.into())]),
            JsonValue::object([
                ("type", JsonValue::from("image_url")),
                (
                    "image_url",
                    JsonValue::object([("url", JsonValue::from(jpeg_data_url(bytes)))]),
                ),
            ]),
        ]),
    }
}
