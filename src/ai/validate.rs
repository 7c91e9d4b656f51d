use crate::config::AzureConfig;
use crate::error::ValidationError;

/// Minimum accepted key length. A sanity check against truncated pastes,
/// not a cryptographic validation.
pub const MIN_API_KEY_LEN: usize = 10;

const ENDPOINT_SCHEME: &str = "https://";
const ENDPOINT_SUFFIX: &str = ".openai.azure.com";

/// Check that a configuration can be used for a request.
///
/// Fields are checked in order: endpoint, key, deployment presence, then the
/// endpoint shape, then the key length. Pure; never touches the network.
pub fn validate(config: &AzureConfig) -> Result<(), ValidationError> {
    let endpoint = config.endpoint.trim();
    let api_key = config.api_key.trim();

    if endpoint.is_empty() {
        return Err(ValidationError::EmptyEndpoint);
    }
    if api_key.is_empty() {
        return Err(ValidationError::EmptyApiKey);
    }
    if config.deployment_name.trim().is_empty() {
        return Err(ValidationError::EmptyDeployment);
    }

    let normalized = normalize_endpoint(endpoint);
    if !is_azure_openai_endpoint(normalized) {
        return Err(ValidationError::BadEndpointFormat(endpoint.to_string()));
    }

    let key_len = api_key.chars().count();
    if key_len < MIN_API_KEY_LEN {
        return Err(ValidationError::ApiKeyTooShort(key_len));
    }

    Ok(())
}

/// Trim whitespace and drop one trailing slash.
pub fn normalize_endpoint(endpoint: &str) -> &str {
    let trimmed = endpoint.trim();
    trimmed.strip_suffix('/').unwrap_or(trimmed)
}

/// `^https://[^/]+\.openai\.azure\.com$`
fn is_azure_openai_endpoint(endpoint: &str) -> bool {
    endpoint
        .strip_prefix(ENDPOINT_SCHEME)
        .and_then(|host| host.strip_suffix(ENDPOINT_SUFFIX))
        .is_some_and(|resource| !resource.is_empty() && !resource.contains('/'))
}
