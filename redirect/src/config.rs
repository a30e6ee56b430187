use http::HeaderName;
use serde::Deserialize;
use shared::config::{Listener, ListenerError};
use std::time::Duration;
use thiserror::Error;
use url::Url;

#[derive(Error, Debug, PartialEq)]
pub enum ValidationError {
    #[error("invalid listener: {0}")]
    Listener(#[from] ListenerError),

    #[error("upstream must be an http:// URL with a host, got {0}")]
    InvalidUpstream(String),

    #[error("invalid geolocation header name: {0:?}")]
    InvalidGeoHeader(String),

    #[error("invalid cookie name: {0:?}")]
    InvalidCookieName(String),

    #[error("excluded path prefixes cannot be empty strings")]
    EmptyExcludedPrefix,
}

/// Cookie that marks a visitor whose URL already carries a country code
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct CookieConfig {
    #[serde(default = "default_cookie_name")]
    pub name: String,
    #[serde(default = "default_cookie_max_age_secs")]
    pub max_age_secs: u64,
}

impl Default for CookieConfig {
    fn default() -> Self {
        CookieConfig {
            name: default_cookie_name(),
            max_age_secs: default_cookie_max_age_secs(),
        }
    }
}

/// Redirect service configuration
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct Config {
    /// Public listener receiving storefront traffic
    pub listener: Listener,
    /// Admin listener for health and readiness probes
    pub admin_listener: Listener,
    /// Storefront application that receives every request not redirected
    pub upstream: Url,
    #[serde(default = "default_upstream_timeout_secs")]
    pub upstream_timeout_secs: u64,
    /// Header carrying the visitor's country as set by the edge network
    #[serde(default = "default_geo_header")]
    pub geo_header: String,
    #[serde(default)]
    pub cookie: CookieConfig,
    /// Paths whose text after the leading slash starts with one of these
    /// are forwarded without region handling.
    #[serde(default = "default_excluded_prefixes")]
    pub excluded_prefixes: Vec<String>,
}

impl Config {
    pub fn validate(&self) -> Result<(), ValidationError> {
        self.listener.validate()?;
        self.admin_listener.validate()?;

        // The upstream client speaks plain http only
        if self.upstream.scheme() != "http" || self.upstream.host_str().is_none() {
            return Err(ValidationError::InvalidUpstream(self.upstream.to_string()));
        }

        HeaderName::from_bytes(self.geo_header.as_bytes())
            .map_err(|_| ValidationError::InvalidGeoHeader(self.geo_header.clone()))?;

        let name = &self.cookie.name;
        if name.is_empty() || !name.chars().all(is_cookie_name_char) {
            return Err(ValidationError::InvalidCookieName(name.clone()));
        }

        if self.excluded_prefixes.iter().any(|p| p.is_empty()) {
            return Err(ValidationError::EmptyExcludedPrefix);
        }

        Ok(())
    }

    pub fn upstream_timeout(&self) -> Duration {
        Duration::from_secs(self.upstream_timeout_secs)
    }
}

// RFC 6265 cookie-name token characters
fn is_cookie_name_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || "!#$%&'*+-.^_`|~".contains(c)
}

fn default_upstream_timeout_secs() -> u64 {
    30
}

fn default_geo_header() -> String {
    "x-vercel-ip-country".into()
}

fn default_cookie_name() -> String {
    "_medusa_cache_id".into()
}

fn default_cookie_max_age_secs() -> u64 {
    60 * 60 * 24
}

pub fn default_excluded_prefixes() -> Vec<String> {
    [
        "api",
        "_next/static",
        "_next/image",
        "favicon.ico",
        "images",
        "assets",
        "png",
        "svg",
        "jpg",
        "jpeg",
        "gif",
        "webp",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_config() -> Config {
        Config {
            listener: Listener::new("0.0.0.0", 3000),
            admin_listener: Listener::new("127.0.0.1", 3001),
            upstream: Url::parse("http://127.0.0.1:8000").unwrap(),
            upstream_timeout_secs: 30,
            geo_header: default_geo_header(),
            cookie: CookieConfig::default(),
            excluded_prefixes: default_excluded_prefixes(),
        }
    }

    #[test]
    fn test_parse_valid_config() {
        let yaml = r#"
listener:
    host: "0.0.0.0"
    port: 3000
admin_listener:
    host: "127.0.0.1"
    port: 3001
upstream: "http://127.0.0.1:8000"
"#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert!(config.validate().is_ok());
        assert_eq!(config, base_config());
        assert_eq!(config.upstream_timeout(), Duration::from_secs(30));
        assert_eq!(config.cookie.name, "_medusa_cache_id");
        assert_eq!(config.cookie.max_age_secs, 86400);
        assert_eq!(config.excluded_prefixes.len(), 12);
    }

    #[test]
    fn test_parse_overrides() {
        let yaml = r#"
listener: {host: "0.0.0.0", port: 3000}
admin_listener: {host: "127.0.0.1", port: 3001}
upstream: "http://storefront:8000"
upstream_timeout_secs: 5
geo_header: cf-ipcountry
cookie:
    name: region_cache_id
excluded_prefixes: [api, static]
"#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert!(config.validate().is_ok());
        assert_eq!(config.geo_header, "cf-ipcountry");
        assert_eq!(config.cookie.name, "region_cache_id");
        assert_eq!(config.cookie.max_age_secs, 86400);
        assert_eq!(config.excluded_prefixes, vec!["api", "static"]);
    }

    #[test]
    fn test_validation_errors() {
        let mut config = base_config();
        config.listener.port = 0;
        assert_eq!(
            config.validate().unwrap_err(),
            ValidationError::Listener(ListenerError::InvalidPort)
        );

        let mut config = base_config();
        config.upstream = Url::parse("https://storefront.example.com").unwrap();
        assert!(matches!(
            config.validate().unwrap_err(),
            ValidationError::InvalidUpstream(_)
        ));

        let mut config = base_config();
        config.geo_header = "bad header".into();
        assert!(matches!(
            config.validate().unwrap_err(),
            ValidationError::InvalidGeoHeader(_)
        ));

        let mut config = base_config();
        config.cookie.name = "bad;name".into();
        assert!(matches!(
            config.validate().unwrap_err(),
            ValidationError::InvalidCookieName(_)
        ));

        let mut config = base_config();
        config.excluded_prefixes.push(String::new());
        assert_eq!(
            config.validate().unwrap_err(),
            ValidationError::EmptyExcludedPrefix
        );
    }

    #[test]
    fn test_deserialization_errors() {
        // Invalid upstream URL
        assert!(
            serde_yaml::from_str::<Config>(
                r#"
listener: {host: "0.0.0.0", port: 3000}
admin_listener: {host: "127.0.0.1", port: 3001}
upstream: "not-a-url"
"#
            )
            .is_err()
        );

        // Missing upstream
        assert!(
            serde_yaml::from_str::<Config>(
                r#"
listener: {host: "0.0.0.0", port: 3000}
admin_listener: {host: "127.0.0.1", port: 3001}
"#
            )
            .is_err()
        );
    }
}
