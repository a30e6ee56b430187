use serde::Deserialize;
use shared::config::Listener;
use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Duration;
use url::Url;

pub const BACKEND_URL_ENV: &str = "MEDUSA_BACKEND_URL";
pub const PUBLISHABLE_KEY_ENV: &str = "MEDUSA_PUBLISHABLE_KEY";
pub const DEFAULT_REGION_ENV: &str = "DEFAULT_REGION";

#[derive(thiserror::Error, Debug, PartialEq)]
pub enum ValidationError {
    #[error("invalid listener: {0}")]
    Listener(#[from] shared::config::ListenerError),
    #[error("default region must be a two letter country code, got {0:?}")]
    InvalidDefaultRegion(String),
    #[error("invalid country code in allowlist: {0:?}")]
    InvalidCountry(String),
    #[error("ttl_secs cannot be 0")]
    ZeroTtl,
    #[error("backend timeout_secs cannot be 0")]
    ZeroBackendTimeout,
    #[error("publishable key cannot be empty")]
    EmptyPublishableKey,
    #[error("invalid backend url from environment: {0}")]
    InvalidBackendUrl(String),
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct BackendConfig {
    /// Base URL of the commerce backend, e.g. "http://localhost:9000"
    pub url: Url,
    /// Sent as the `x-publishable-api-key` header
    pub publishable_key: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Retries for retriable status codes. 0 disables retries.
    #[serde(default = "default_retries")]
    pub retries: u32,
}

impl BackendConfig {
    pub fn new(url: Url, publishable_key: &str) -> Self {
        BackendConfig {
            url,
            publishable_key: publishable_key.into(),
            timeout_secs: default_timeout_secs(),
            retries: default_retries(),
        }
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq, Default)]
#[serde(rename_all = "lowercase")]
#[serde(tag = "type")]
pub enum FallbackConfig {
    #[default]
    Builtin,
    Filesystem { path: PathBuf },
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct RegionsConfig {
    /// No backend means the fallback table is always served.
    #[serde(default)]
    pub backend: Option<BackendConfig>,
    #[serde(default = "default_region")]
    pub default_region: String,
    /// Only these countries are considered for routing. All when unset.
    #[serde(default)]
    pub countries: Option<Vec<String>>,
    #[serde(default = "default_ttl_secs")]
    pub ttl_secs: u64,
    /// How long a fallback table replacing a failed backend fetch is kept
    /// before the backend is tried again.
    #[serde(default = "default_fallback_retry_secs")]
    pub fallback_retry_secs: u64,
    #[serde(default)]
    pub fallback: FallbackConfig,
}

impl Default for RegionsConfig {
    fn default() -> Self {
        RegionsConfig {
            backend: None,
            default_region: default_region(),
            countries: None,
            ttl_secs: default_ttl_secs(),
            fallback_retry_secs: default_fallback_retry_secs(),
            fallback: FallbackConfig::default(),
        }
    }
}

impl RegionsConfig {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if !is_country_code(&self.default_region) {
            return Err(ValidationError::InvalidDefaultRegion(
                self.default_region.clone(),
            ));
        }

        for country in self.countries.iter().flatten() {
            if !is_country_code(country) {
                return Err(ValidationError::InvalidCountry(country.clone()));
            }
        }

        if self.ttl_secs == 0 {
            return Err(ValidationError::ZeroTtl);
        }

        if let Some(backend) = &self.backend {
            if backend.publishable_key.trim().is_empty() {
                return Err(ValidationError::EmptyPublishableKey);
            }
            if backend.timeout_secs == 0 {
                return Err(ValidationError::ZeroBackendTimeout);
            }
        }

        Ok(())
    }

    /// Applies `MEDUSA_BACKEND_URL`, `MEDUSA_PUBLISHABLE_KEY` and
    /// `DEFAULT_REGION` on top of the file values. A backend URL from the
    /// environment creates the backend section if the file has none.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ValidationError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let key = lookup(PUBLISHABLE_KEY_ENV);

        if let Some(raw_url) = lookup(BACKEND_URL_ENV).filter(|u| !u.trim().is_empty()) {
            let url = Url::parse(raw_url.trim())
                .map_err(|e| ValidationError::InvalidBackendUrl(e.to_string()))?;
            match self.backend.as_mut() {
                Some(backend) => backend.url = url,
                None => {
                    self.backend = Some(BackendConfig::new(url, key.as_deref().unwrap_or("")))
                }
            }
        }

        if let (Some(backend), Some(key)) = (self.backend.as_mut(), key) {
            backend.publishable_key = key;
        }

        if let Some(region) = lookup(DEFAULT_REGION_ENV).filter(|r| !r.trim().is_empty()) {
            self.default_region = region.trim().to_ascii_lowercase();
        }

        Ok(())
    }

    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }

    pub fn fallback_retry(&self) -> Duration {
        Duration::from_secs(self.fallback_retry_secs)
    }

    /// The country allowlist, lowercased.
    pub fn allowed_countries(&self) -> Option<HashSet<String>> {
        self.countries
            .as_ref()
            .map(|c| c.iter().map(|code| code.to_ascii_lowercase()).collect())
    }
}

/// Standalone region lookup API
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct ApiConfig {
    pub listener: Listener,
}

impl ApiConfig {
    pub fn validate(&self) -> Result<(), ValidationError> {
        Ok(self.listener.validate()?)
    }
}

fn is_country_code(code: &str) -> bool {
    code.len() == 2 && code.chars().all(|c| c.is_ascii_alphabetic())
}

fn default_region() -> String {
    "us".into()
}

fn default_ttl_secs() -> u64 {
    3600
}

fn default_fallback_retry_secs() -> u64 {
    60
}

fn default_timeout_secs() -> u64 {
    5
}

fn default_retries() -> u32 {
    1
}
