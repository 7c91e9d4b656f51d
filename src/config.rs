use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::ai::mask_secret;

/// Top-level configuration for color-assist.
///
/// Stands in for the host's preference store: the Azure credentials, the API
/// versions the connection test walks through, analysis settings, and batch
/// scheduling. The client never reads this file itself; callers load it and
/// pass the relevant sections in.
///
/// # Loading
///
/// ```rust,no_run
/// use color_assist::config::Config;
///
/// // From a JSON file
/// let config = Config::load(Some("config.json".as_ref())).unwrap();
///
/// // Or use defaults and customize
/// let mut config = Config::default();
/// config.azure.endpoint = "https://contoso.openai.azure.com".into();
/// config.azure.api_key = "...".into();
/// config.azure.deployment_name = "gpt-4o".into();
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Endpoint, key and deployment.
    pub azure: AzureConfig,
    /// API versions tried by the connection test.
    pub api_versions: ApiVersions,
    /// Token limit, sampling and timeout for analysis requests.
    pub analysis: AnalysisSettings,
    /// Concurrency and pacing for batch runs.
    pub batch: BatchSettings,
}

/// Credentials for one Azure OpenAI deployment.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AzureConfig {
    /// `https://<resource>.openai.azure.com`
    pub endpoint: String,
    pub api_key: String,
    pub deployment_name: String,
}

/// API-version strings. These drift over time, so they live in config rather
/// than in code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiVersions {
    /// Latest stable version, tried first.
    pub current: String,
    /// Older stable version, tried after a 400.
    pub legacy: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisSettings {
    pub max_output_tokens: u32,
    pub temperature: f64,
    pub top_p: Option<f64>,
    /// Per-request timeout in seconds.
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchSettings {
    /// Maximum requests in flight.
    pub concurrency: usize,
    /// Pause between dispatching photos, in milliseconds.
    pub delay_ms: u64,
    /// Longest edge of exported thumbnails, in pixels.
    pub thumbnail_edge: u32,
}

impl Default for ApiVersions {
    fn default() -> Self {
        Self {
            current: "2024-10-21".to_string(),
            legacy: "2024-06-01".to_string(),
        }
    }
}

impl Default for AnalysisSettings {
    fn default() -> Self {
        Self {
            max_output_tokens: 1500,
            temperature: 0.3,
            top_p: None,
            timeout_secs: 30,
        }
    }
}

impl AnalysisSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for BatchSettings {
    fn default() -> Self {
        Self {
            concurrency: 2,
            delay_ms: 0,
            thumbnail_edge: 1024,
        }
    }
}

impl Config {
    /// Resolve the config file path — same directory as the executable.
    pub fn config_path() -> Result<PathBuf> {
        let exe_path = std::env::current_exe().context("Failed to get executable path")?;
        let exe_dir = exe_path
            .parent()
            .context("Failed to get executable directory")?;
        Ok(exe_dir.join("config.json"))
    }

    /// Load config from the given path, or from the default location.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config_path = match path {
            Some(p) => p.to_path_buf(),
            None => Self::config_path()?,
        };

        if !config_path.exists() {
            log::warn!(
                "Config file not found at {}. Using defaults.",
                config_path.display()
            );
            return Ok(Self::default());
        }

        let contents =
            std::fs::read_to_string(&config_path).context("Failed to read config file")?;
        let config: Config =
            serde_json::from_str(&contents).context("Failed to parse config file")?;
        Ok(config)
    }

    /// Save config to the given path, or to the default location.
    pub fn save(&self, path: Option<&Path>) -> Result<()> {
        let config_path = match path {
            Some(p) => p.to_path_buf(),
            None => Self::config_path()?,
        };

        let contents = serde_json::to_string_pretty(self).context("Failed to serialize config")?;
        std::fs::write(&config_path, contents).context("Failed to write config file")?;
        log::info!("Config saved to {}", config_path.display());
        Ok(())
    }

    /// Apply `AZURE_OPENAI_*` environment overrides.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides_from(|name| std::env::var(name).ok());
    }

    /// Apply overrides from `lookup`; unset or blank values are ignored.
    pub fn apply_overrides_from(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        if let Some(v) = get("AZURE_OPENAI_ENDPOINT") {
            self.azure.endpoint = v;
        }
        if let Some(v) = get("AZURE_OPENAI_API_KEY") {
            self.azure.api_key = v;
        }
        if let Some(v) = get("AZURE_OPENAI_DEPLOYMENT") {
            self.azure.deployment_name = v;
        }
        if let Some(v) = get("AZURE_OPENAI_API_VERSION") {
            self.api_versions.current = v;
        }
    }

    /// Settings summary for display, with the key masked.
    pub fn describe(&self) -> String {
        format!(
            "endpoint={} deployment={} api-key={} api-versions={}/{} timeout={}s concurrency={}",
            self.azure.endpoint,
            self.azure.deployment_name,
            mask_secret(self.azure.api_key.trim()),
            self.api_versions.current,
            self.api_versions.legacy,
            self.analysis.timeout_secs,
            self.batch.concurrency,
        )
    }
}
