//! Error taxonomy for the Azure chat client.
//!
//! | Family | Variants | Triggers a network call? |
//! |--------|----------|--------------------------|
//! | [`ValidationError`] | empty field, bad endpoint format, key too short | never |
//! | [`NetworkError`] | no response, timeout | — |
//! | [`HttpError`] | 400, 401, 404, 429, 5xx, other | — |
//! | [`ParseError`] | unrecognized response shape | — |
//!
//! [`ErrorKind`] flattens all of them into the tag carried by
//! [`ApiCallResult::Failure`](crate::ai::ApiCallResult::Failure), so a caller
//! can pick a remediation (re-enter credentials, wait, fix the deployment name)
//! without parsing the message text.

use serde::Serialize;
use std::time::Duration;
use thiserror::Error;

/// Flat classification of every failure the client can report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ErrorKind {
    /// A required configuration field is blank.
    EmptyField,
    /// The endpoint is not of the form `https://<resource>.openai.azure.com`.
    BadFormat,
    /// The API key is implausibly short.
    TooShort,
    /// The request produced no response at all.
    NoResponse,
    /// The request exceeded its per-request timeout.
    Timeout,
    /// HTTP 400.
    BadRequest,
    /// HTTP 401.
    Unauthorized,
    /// HTTP 404.
    NotFound,
    /// HTTP 429.
    RateLimited,
    /// HTTP 5xx.
    ServerError,
    /// Any other non-200 status.
    HttpOther,
    /// A 200 response whose body did not contain assistant text.
    ParseError,
}

impl ErrorKind {
    /// Classify a non-200 HTTP status.
    pub fn from_status(status: u16) -> Self {
        match status {
            400 => Self::BadRequest,
            401 => Self::Unauthorized,
            404 => Self::NotFound,
            429 => Self::RateLimited,
            500..=599 => Self::ServerError,
            _ => Self::HttpOther,
        }
    }

    /// Whether this failure was decided locally, before any request was sent.
    pub fn is_validation(&self) -> bool {
        matches!(self, Self::EmptyField | Self::BadFormat | Self::TooShort)
    }
}

/// Configuration rejected before any network call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("Azure OpenAI endpoint is empty")]
    EmptyEndpoint,

    #[error("Azure OpenAI API key is empty")]
    EmptyApiKey,

    #[error("Azure OpenAI deployment name is empty")]
    EmptyDeployment,

    #[error("Endpoint must look like https://<resource>.openai.azure.com (got '{0}')")]
    BadEndpointFormat(String),

    #[error("API key looks too short ({0} characters, expected at least 10)")]
    ApiKeyTooShort(usize),
}

impl ValidationError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::EmptyEndpoint | Self::EmptyApiKey | Self::EmptyDeployment => ErrorKind::EmptyField,
            Self::BadEndpointFormat(_) => ErrorKind::BadFormat,
            Self::ApiKeyTooShort(_) => ErrorKind::TooShort,
        }
    }
}

/// The transport produced no HTTP response.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NetworkError {
    #[error("No response from server: {0}")]
    NoResponse(String),

    #[error("Request timed out after {}s", .0.as_secs())]
    Timeout(Duration),
}

impl NetworkError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NoResponse(_) => ErrorKind::NoResponse,
            Self::Timeout(_) => ErrorKind::Timeout,
        }
    }
}

/// A response arrived with a status other than 200.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("HTTP {status}: {body}")]
pub struct HttpError {
    pub status: u16,
    pub body: String,
}

impl HttpError {
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::from_status(self.status)
    }
}

/// A 200 response whose body could not be turned into assistant text.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("Unrecognized response shape: {body}")]
    UnrecognizedShape { body: String },
}

impl ParseError {
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::ParseError
    }
}
