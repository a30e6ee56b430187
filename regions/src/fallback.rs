//! The fallback region provider lets the cache serve regions even when the
//! backend is unavailable or not configured.
use crate::config::FallbackConfig;
use crate::types::{Country, Region};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(thiserror::Error, Debug)]
pub enum FallbackError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("invalid fallback file: {0}")]
    Json(#[from] serde_json::Error),

    #[error("fallback file contains no regions")]
    Empty,
}

#[async_trait]
pub trait FallbackRegionProvider: Send + Sync {
    async fn load(&self) -> Result<Vec<Region>, FallbackError>;
    /// Persists a region listing fetched from the backend.
    async fn store(&self, regions: &[Region]) -> Result<(), FallbackError>;
}

pub fn get_provider(config: &FallbackConfig) -> Arc<dyn FallbackRegionProvider> {
    match config {
        FallbackConfig::Builtin => Arc::new(BuiltinFallback),
        FallbackConfig::Filesystem { path } => Arc::new(FilesystemFallback::new(path)),
    }
}

const MEXICO_REGION_ID: &str = "reg_01K4HR6SSPD90W98MAA1JF6NQX";
const UNITED_STATES_REGION_ID: &str = "reg_01K4HR6SSPKHAXJQ180533WTB8";

fn builtin_region(
    id: &str,
    name: &str,
    currency_code: &str,
    country: (&str, &str, &str, &str),
) -> Region {
    let (iso_2, iso_3, num_code, display_name) = country;
    Region {
        id: id.into(),
        name: name.into(),
        currency_code: currency_code.into(),
        automatic_taxes: None,
        countries: vec![Country {
            iso_2: Some(iso_2.into()),
            iso_3: Some(iso_3.into()),
            num_code: Some(num_code.into()),
            name: Some(display_name.to_uppercase()),
            display_name: Some(display_name.into()),
            region_id: Some(id.into()),
        }],
        metadata: None,
    }
}

fn mexico() -> Region {
    builtin_region(
        MEXICO_REGION_ID,
        "Mexico",
        "mxn",
        ("mx", "mex", "484", "Mexico"),
    )
}

/// The United States region, last resort for any lookup.
pub fn builtin_default_region() -> Region {
    builtin_region(
        UNITED_STATES_REGION_ID,
        "United States",
        "usd",
        ("us", "usa", "840", "United States"),
    )
}

/// The hardcoded region table: Mexico and the United States.
pub fn builtin_regions() -> Vec<Region> {
    vec![mexico(), builtin_default_region()]
}

/// Builtin region serving `country`, if any.
pub fn builtin_region_for(country: &str) -> Option<Region> {
    builtin_regions()
        .into_iter()
        .find(|r| r.country_codes().any(|c| c == country))
}

pub struct BuiltinFallback;

#[async_trait]
impl FallbackRegionProvider for BuiltinFallback {
    async fn load(&self) -> Result<Vec<Region>, FallbackError> {
        Ok(builtin_regions())
    }

    async fn store(&self, _regions: &[Region]) -> Result<(), FallbackError> {
        Ok(())
    }
}

#[derive(Serialize, Deserialize)]
struct StoredRegions {
    regions: Vec<Region>,
}

/// Keeps the last backend listing in a JSON file.
pub struct FilesystemFallback {
    path: PathBuf,
}

impl FilesystemFallback {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        FilesystemFallback {
            path: path.as_ref().to_path_buf(),
        }
    }
}

#[async_trait]
impl FallbackRegionProvider for FilesystemFallback {
    async fn load(&self) -> Result<Vec<Region>, FallbackError> {
        let data = tokio::fs::read(&self.path).await?;
        let stored: StoredRegions = serde_json::from_slice(&data)?;
        if stored.regions.is_empty() {
            return Err(FallbackError::Empty);
        }
        Ok(stored.regions)
    }

    async fn store(&self, regions: &[Region]) -> Result<(), FallbackError> {
        let data = serde_json::to_vec(&StoredRegions {
            regions: regions.to_vec(),
        })?;

        // Write to a sibling file first so a crash never leaves a truncated copy
        let tmp_path = self.path.with_extension("tmp");
        tokio::fs::write(&tmp_path, &data).await?;
        tokio::fs::rename(&tmp_path, &self.path).await?;

        tracing::debug!(path = ?self.path, bytes = data.len(), "Stored fallback regions");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_table() {
        let regions = builtin_regions();
        assert_eq!(regions.len(), 2);

        let mx = builtin_region_for("mx").unwrap();
        assert_eq!(mx.id, "reg_01K4HR6SSPD90W98MAA1JF6NQX");
        assert_eq!(mx.currency_code, "mxn");
        assert_eq!(mx.countries[0].name.as_deref(), Some("MEXICO"));

        let us = builtin_region_for("us").unwrap();
        assert_eq!(us.id, "reg_01K4HR6SSPKHAXJQ180533WTB8");
        assert_eq!(us.name, "United States");
        assert_eq!(us.countries[0].iso_3.as_deref(), Some("usa"));
        assert_eq!(us.countries[0].num_code.as_deref(), Some("840"));

        assert!(builtin_region_for("de").is_none());
        assert_eq!(builtin_default_region(), us);
    }

    #[tokio::test]
    async fn test_filesystem() {
        let dir = tempfile::tempdir().unwrap();
        let provider = FilesystemFallback::new(dir.path().join("regions.json"));

        // Nothing stored yet
        assert!(matches!(
            provider.load().await.unwrap_err(),
            FallbackError::Io(_)
        ));

        let regions = builtin_regions();
        provider.store(&regions).await.unwrap();
        assert_eq!(provider.load().await.unwrap(), regions);
    }

    #[tokio::test]
    async fn test_filesystem_invalid() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("regions.json");

        std::fs::write(&path, "not json").unwrap();
        let provider = FilesystemFallback::new(&path);
        assert!(matches!(
            provider.load().await.unwrap_err(),
            FallbackError::Json(_)
        ));

        std::fs::write(&path, r#"{"regions": []}"#).unwrap();
        assert!(matches!(
            provider.load().await.unwrap_err(),
            FallbackError::Empty
        ));
    }

    #[tokio::test]
    async fn test_get_provider() {
        let provider = get_provider(&FallbackConfig::Builtin);
        assert_eq!(provider.load().await.unwrap(), builtin_regions());
        // Builtin store is a no-op
        provider.store(&[]).await.unwrap();
    }
}
