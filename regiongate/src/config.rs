use redirect::config::{Config as RedirectConfig, ValidationError as RedirectValidationError};
use regions::config::{ApiConfig, RegionsConfig, ValidationError as RegionsValidationError};
use serde::Deserialize;
use std::fs::File;
use std::path::Path;

#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct MetricsConfig {
    pub statsd_host: String,
    pub statsd_port: u16,
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct LoggingConfig {
    pub sentry_dsn: String,
    #[serde(default)]
    pub environment: Option<String>,
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
pub struct CommonConfig {
    pub metrics: Option<MetricsConfig>,
    pub logging: Option<LoggingConfig>,
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct Config {
    #[serde(flatten)]
    pub common: CommonConfig,
    #[serde(default)]
    pub regions: RegionsConfig,
    pub redirect: Option<RedirectConfig>,
    pub regions_api: Option<ApiConfig>,
}

impl Config {
    /// Loads `path`, applies environment overrides and validates the result.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        Self::from_file_with_env(path, |key| std::env::var(key).ok())
    }

    pub fn from_file_with_env<F>(path: &Path, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let file = File::open(path)?;
        let mut config: Config = serde_yaml::from_reader(file)?;

        config.regions.apply_env(lookup)?;
        config.validate()?;

        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.regions.validate()?;
        if let Some(redirect) = &self.redirect {
            redirect.validate()?;
        }
        if let Some(api) = &self.regions_api {
            api.validate()?;
        }
        Ok(())
    }
}

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("could not load config from file: {0}")]
    LoadError(#[from] std::io::Error),
    #[error("could not parse config: {0}")]
    ParseError(#[from] serde_yaml::Error),
    #[error("invalid regions config: {0}")]
    Regions(#[from] RegionsValidationError),
    #[error("invalid redirect config: {0}")]
    Redirect(#[from] RedirectValidationError),
    #[error("missing `{0}` section")]
    MissingSection(&'static str),
}
