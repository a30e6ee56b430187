use crate::backend::{Backend, BackendError};
use crate::config::RegionsConfig;
use crate::fallback::{
    FallbackRegionProvider, builtin_default_region, builtin_region_for, builtin_regions,
    get_provider,
};
use crate::metrics_defs::{BACKEND_ERRORS, CACHE_HIT, CACHE_MISS, CACHE_REFRESH};
use crate::types::{CountryCode, Region, RegionSnapshot, Source};
use parking_lot::RwLock;
use shared::counter;
use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;

/// Tunables of the region cache.
#[derive(Clone, Debug)]
pub struct CacheOptions {
    pub default_region: CountryCode,
    pub allowed: Option<HashSet<CountryCode>>,
    pub ttl: Duration,
    pub fallback_retry: Duration,
}

impl From<&RegionsConfig> for CacheOptions {
    fn from(config: &RegionsConfig) -> Self {
        CacheOptions {
            default_region: config.default_region.to_ascii_lowercase(),
            allowed: config.allowed_countries(),
            ttl: config.ttl(),
            fallback_retry: config.fallback_retry(),
        }
    }
}

struct Cached {
    snapshot: Arc<RegionSnapshot>,
    // None never expires
    expires_at: Option<Instant>,
}

impl Cached {
    fn is_fresh(&self, now: Instant) -> bool {
        self.expires_at.is_none_or(|expires_at| now < expires_at)
    }
}

struct RegionCacheInner {
    backend: Option<Backend>,
    fallback: Arc<dyn FallbackRegionProvider>,
    options: CacheOptions,
    data: RwLock<Option<Cached>>,
    update_lock: Semaphore,
    // Used by the readiness probe. Set once any snapshot has been loaded.
    ready: AtomicBool,
}

/// Cache-aside view of the backend regions, keyed by country code.
///
/// Readers get the cached snapshot while it is fresh. Once it expires the
/// next reader refreshes it from the backend; concurrent readers wait for
/// that single refresh instead of issuing their own. When the backend fails
/// or is not configured the fallback table is served instead.
#[derive(Clone)]
pub struct RegionCache {
    inner: Arc<RegionCacheInner>,
}

impl RegionCache {
    pub fn new(config: &RegionsConfig) -> Result<Self, BackendError> {
        let backend = config.backend.as_ref().map(Backend::new).transpose()?;
        Ok(Self::from_parts(
            backend,
            get_provider(&config.fallback),
            CacheOptions::from(config),
        ))
    }

    pub fn from_parts(
        backend: Option<Backend>,
        fallback: Arc<dyn FallbackRegionProvider>,
        options: CacheOptions,
    ) -> Self {
        if backend.is_none() {
            tracing::warn!("No region backend configured, serving the fallback region table");
        }

        RegionCache {
            inner: Arc::new(RegionCacheInner {
                backend,
                fallback,
                options,
                data: RwLock::new(None),
                update_lock: Semaphore::new(1),
                ready: AtomicBool::new(false),
            }),
        }
    }

    /// Current snapshot, refreshing it first if it is missing or expired.
    pub async fn snapshot(&self) -> Arc<RegionSnapshot> {
        if let Some(snapshot) = self.fresh() {
            counter!(CACHE_HIT).increment(1);
            return snapshot;
        }
        counter!(CACHE_MISS).increment(1);

        // Hold the permit until the refresh is stored. The semaphore is never
        // closed, so acquiring only waits.
        let _permit = self.inner.update_lock.acquire().await.ok();

        // Another reader may have refreshed while we waited
        if let Some(snapshot) = self.fresh() {
            return snapshot;
        }

        self.load().await
    }

    /// Refreshes the snapshot regardless of its expiry.
    pub async fn refresh(&self) -> Arc<RegionSnapshot> {
        let _permit = self.inner.update_lock.acquire().await.ok();
        self.load().await
    }

    /// Loads the first snapshot in the background so readiness does not
    /// wait for the first lookup.
    pub fn warm(&self) -> JoinHandle<()> {
        let cache = self.clone();
        tokio::spawn(async move {
            let snapshot = cache.snapshot().await;
            tracing::info!(
                source = snapshot.source().as_str(),
                regions = snapshot.regions().len(),
                "Region cache warmed"
            );
        })
    }

    /// Region for `country`, falling back to the default region and then
    /// to the builtin table. Always returns a region.
    pub async fn get_region(&self, country: &str) -> Arc<Region> {
        let country = country.trim().to_ascii_lowercase();
        let default_region = &self.inner.options.default_region;
        let snapshot = self.snapshot().await;

        if let Some(region) = snapshot
            .get(&country)
            .or_else(|| snapshot.get(default_region))
        {
            return region.clone();
        }

        tracing::debug!(country, "Region not cached, using builtin table");
        Arc::new(builtin_region_for(default_region).unwrap_or_else(builtin_default_region))
    }

    pub async fn list_regions(&self) -> Vec<Arc<Region>> {
        self.snapshot().await.regions().to_vec()
    }

    /// Region by id. Asks the backend first, then searches the cached and
    /// builtin tables.
    pub async fn retrieve_region(&self, id: &str) -> Option<Arc<Region>> {
        if let Some(backend) = &self.inner.backend {
            match backend.retrieve_region(id).await {
                Ok(Some(region)) => return Some(Arc::new(region)),
                Ok(None) => tracing::debug!(id, "Region not found in backend"),
                Err(e) => tracing::warn!(id, error = %e, "Failed to fetch region, using fallback"),
            }
        }

        if let Some(region) = self.snapshot().await.find_by_id(id) {
            return Some(region.clone());
        }

        builtin_regions()
            .into_iter()
            .find(|r| r.id == id)
            .map(Arc::new)
    }

    pub fn default_region(&self) -> &str {
        &self.inner.options.default_region
    }

    pub fn is_ready(&self) -> bool {
        self.inner.ready.load(Ordering::Relaxed)
    }

    fn fresh(&self) -> Option<Arc<RegionSnapshot>> {
        let now = Instant::now();
        self.inner
            .data
            .read()
            .as_ref()
            .filter(|cached| cached.is_fresh(now))
            .map(|cached| cached.snapshot.clone())
    }

    /// Loads a new snapshot and stores it. Callers must hold the update permit.
    async fn load(&self) -> Arc<RegionSnapshot> {
        let options = &self.inner.options;

        let (snapshot, ttl) = match &self.inner.backend {
            None => (self.fallback_snapshot().await, options.ttl),
            Some(backend) => match self.fetch(backend).await {
                Ok(snapshot) => (snapshot, options.ttl),
                Err(e) => {
                    tracing::warn!(error = %e, "Failed to fetch regions, using fallback");
                    counter!(BACKEND_ERRORS).increment(1);
                    (self.fallback_snapshot().await, options.fallback_retry)
                }
            },
        };

        counter!(CACHE_REFRESH, "source" => snapshot.source().as_str()).increment(1);
        tracing::info!(
            source = snapshot.source().as_str(),
            countries = ?snapshot.country_codes().collect::<Vec<_>>(),
            "Region cache refreshed"
        );

        let snapshot = Arc::new(snapshot);
        *self.inner.data.write() = Some(Cached {
            snapshot: snapshot.clone(),
            expires_at: Instant::now().checked_add(ttl),
        });
        self.inner.ready.store(true, Ordering::Relaxed);

        snapshot
    }

    async fn fetch(&self, backend: &Backend) -> Result<RegionSnapshot, BackendError> {
        let regions = backend.list_regions().await?;
        let snapshot = RegionSnapshot::build(
            regions.clone(),
            self.inner.options.allowed.as_ref(),
            Source::Backend,
        );

        if snapshot.is_empty() {
            return Err(BackendError::NoRegions);
        }

        if let Err(e) = self.inner.fallback.store(&regions).await {
            tracing::warn!(error = %e, "Failed to store fallback regions");
        }

        Ok(snapshot)
    }

    async fn fallback_snapshot(&self) -> RegionSnapshot {
        let allowed = self.inner.options.allowed.as_ref();

        let regions = self.inner.fallback.load().await.unwrap_or_else(|e| {
            tracing::warn!(error = %e, "Failed to load fallback regions, using builtin table");
            builtin_regions()
        });

        let snapshot = RegionSnapshot::build(regions, allowed, Source::Fallback);
        if !snapshot.is_empty() {
            return snapshot;
        }

        // The allowlist excludes every fallback country. Serve the builtin
        // table unfiltered rather than an empty map.
        tracing::warn!("No fallback region matches the country allowlist");
        RegionSnapshot::build(builtin_regions(), None, Source::Fallback)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BackendConfig;
    use crate::fallback::{BuiltinFallback, FilesystemFallback};
    use url::Url;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const REGIONS_BODY: &str = r#"{
        "regions": [
            {
                "id": "reg_eu",
                "name": "Europe",
                "currency_code": "eur",
                "countries": [{"iso_2": "de"}, {"iso_2": "fr"}]
            },
            {
                "id": "reg_na",
                "name": "North America",
                "currency_code": "usd",
                "countries": [{"iso_2": "us"}, {"iso_2": "mx"}]
            }
        ]
    }"#;

    fn options() -> CacheOptions {
        CacheOptions {
            default_region: "us".into(),
            allowed: None,
            ttl: Duration::from_secs(3600),
            fallback_retry: Duration::from_secs(3600),
        }
    }

    fn backend(server: &MockServer) -> Backend {
        let mut config = BackendConfig::new(Url::parse(&server.uri()).unwrap(), "pk_test");
        config.retries = 0;
        Backend::new(&config).unwrap()
    }

    async fn regions_mock(server: &MockServer, status: u16, body: &str, times: u64) {
        Mock::given(method("GET"))
            .and(path("/store/regions"))
            .respond_with(ResponseTemplate::new(status).set_body_string(body))
            .expect(times)
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn test_no_backend() {
        let cache = RegionCache::new(&RegionsConfig::default()).unwrap();
        assert!(!cache.is_ready());

        let snapshot = cache.snapshot().await;
        assert!(cache.is_ready());
        assert_eq!(snapshot.source(), Source::Fallback);
        assert_eq!(snapshot.country_codes().collect::<Vec<_>>(), vec!["mx", "us"]);
        assert_eq!(snapshot.get("mx").unwrap().currency_code, "mxn");
    }

    #[tokio::test]
    async fn test_warm_loads_without_lookups() {
        let server = MockServer::start().await;
        regions_mock(&server, 200, REGIONS_BODY, 1).await;

        let cache = RegionCache::from_parts(Some(backend(&server)), Arc::new(BuiltinFallback), options());
        assert!(!cache.is_ready());

        cache.warm().await.unwrap();
        assert!(cache.is_ready());

        // The warmed snapshot is served from the cache
        assert_eq!(cache.snapshot().await.source(), Source::Backend);
    }

    #[tokio::test]
    async fn test_backend_cached() {
        let server = MockServer::start().await;
        regions_mock(&server, 200, REGIONS_BODY, 1).await;

        let cache = RegionCache::from_parts(Some(backend(&server)), Arc::new(BuiltinFallback), options());

        let first = cache.snapshot().await;
        assert_eq!(first.source(), Source::Backend);
        assert_eq!(
            first.country_codes().collect::<Vec<_>>(),
            vec!["de", "fr", "us", "mx"]
        );

        // Served from the cache, the mock expects a single request
        let second = cache.snapshot().await;
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[tokio::test]
    async fn test_expired_snapshot_is_refetched() {
        let server = MockServer::start().await;
        regions_mock(&server, 200, REGIONS_BODY, 2).await;

        let mut options = options();
        options.ttl = Duration::from_millis(50);
        let cache = RegionCache::from_parts(Some(backend(&server)), Arc::new(BuiltinFallback), options);

        let first = cache.snapshot().await;
        tokio::time::sleep(Duration::from_millis(100)).await;
        let second = cache.snapshot().await;
        assert!(!Arc::ptr_eq(&first, &second));
    }

    #[tokio::test]
    async fn test_allowlist() {
        let server = MockServer::start().await;
        regions_mock(&server, 200, REGIONS_BODY, 1).await;

        let mut options = options();
        options.allowed = Some(HashSet::from(["mx".to_string(), "us".to_string()]));
        let cache = RegionCache::from_parts(Some(backend(&server)), Arc::new(BuiltinFallback), options);

        let snapshot = cache.snapshot().await;
        assert_eq!(snapshot.country_codes().collect::<Vec<_>>(), vec!["us", "mx"]);
        // Listing keeps every region
        assert_eq!(cache.list_regions().await.len(), 2);
    }

    #[tokio::test]
    async fn test_allowlist_excluding_backend_uses_fallback() {
        let server = MockServer::start().await;
        regions_mock(&server, 200, REGIONS_BODY, 1).await;

        let mut options = options();
        options.allowed = Some(HashSet::from(["jp".to_string()]));
        let cache = RegionCache::from_parts(Some(backend(&server)), Arc::new(BuiltinFallback), options);

        let snapshot = cache.snapshot().await;
        assert_eq!(snapshot.source(), Source::Fallback);
        assert!(!snapshot.is_empty());
    }

    #[tokio::test]
    async fn test_backend_failures_use_fallback() {
        for (status, body) in [
            (500, ""),
            (200, "<html></html>"),
            (200, r#"{"regions": []}"#),
        ] {
            let server = MockServer::start().await;
            regions_mock(&server, status, body, 1).await;

            let cache =
                RegionCache::from_parts(Some(backend(&server)), Arc::new(BuiltinFallback), options());
            let snapshot = cache.snapshot().await;
            assert_eq!(snapshot.source(), Source::Fallback);
            assert_eq!(snapshot.country_codes().collect::<Vec<_>>(), vec!["mx", "us"]);
            assert!(cache.is_ready());
        }
    }

    #[tokio::test]
    async fn test_fallback_is_retried() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/store/regions"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        regions_mock(&server, 200, REGIONS_BODY, 1).await;

        let mut options = options();
        options.fallback_retry = Duration::from_millis(50);
        let cache = RegionCache::from_parts(Some(backend(&server)), Arc::new(BuiltinFallback), options);

        assert_eq!(cache.snapshot().await.source(), Source::Fallback);
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(cache.snapshot().await.source(), Source::Backend);
    }

    #[tokio::test]
    async fn test_filesystem_fallback_keeps_last_listing() {
        let dir = tempfile::tempdir().unwrap();
        let fallback = Arc::new(FilesystemFallback::new(dir.path().join("regions.json")));

        let server = MockServer::start().await;
        regions_mock(&server, 200, REGIONS_BODY, 1).await;
        let cache = RegionCache::from_parts(Some(backend(&server)), fallback.clone(), options());
        assert_eq!(cache.snapshot().await.source(), Source::Backend);

        // A new cache against a broken backend serves the stored listing
        let broken = MockServer::start().await;
        regions_mock(&broken, 500, "", 1).await;
        let cache = RegionCache::from_parts(Some(backend(&broken)), fallback, options());
        let snapshot = cache.snapshot().await;
        assert_eq!(snapshot.source(), Source::Fallback);
        assert_eq!(snapshot.get("de").unwrap().id, "reg_eu");
    }

    #[tokio::test]
    async fn test_missing_fallback_file_uses_builtin() {
        let dir = tempfile::tempdir().unwrap();
        let fallback = Arc::new(FilesystemFallback::new(dir.path().join("missing.json")));
        let cache = RegionCache::from_parts(None, fallback, options());

        let snapshot = cache.snapshot().await;
        assert_eq!(snapshot.country_codes().collect::<Vec<_>>(), vec!["mx", "us"]);
    }

    #[tokio::test]
    async fn test_concurrent_readers_share_one_fetch() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/store/regions"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string(REGIONS_BODY)
                    .set_delay(Duration::from_millis(200)),
            )
            .expect(1)
            .mount(&server)
            .await;

        let cache = RegionCache::from_parts(Some(backend(&server)), Arc::new(BuiltinFallback), options());

        let handles: Vec<_> = (0..5)
            .map(|_| {
                let cache = cache.clone();
                tokio::spawn(async move { cache.snapshot().await })
            })
            .collect();

        for handle in handles {
            assert_eq!(handle.await.unwrap().source(), Source::Backend);
        }
    }

    #[tokio::test]
    async fn test_refresh_ignores_expiry() {
        let server = MockServer::start().await;
        regions_mock(&server, 200, REGIONS_BODY, 2).await;

        let cache = RegionCache::from_parts(Some(backend(&server)), Arc::new(BuiltinFallback), options());
        let first = cache.snapshot().await;
        let refreshed = cache.refresh().await;
        assert!(!Arc::ptr_eq(&first, &refreshed));
    }

    #[tokio::test]
    async fn test_get_region() {
        let server = MockServer::start().await;
        regions_mock(&server, 200, REGIONS_BODY, 1).await;

        let cache = RegionCache::from_parts(Some(backend(&server)), Arc::new(BuiltinFallback), options());

        assert_eq!(cache.get_region("de").await.id, "reg_eu");
        assert_eq!(cache.get_region("MX").await.id, "reg_na");
        // Unknown country resolves to the default region
        assert_eq!(cache.get_region("jp").await.id, "reg_na");
    }

    #[tokio::test]
    async fn test_get_region_default_not_cached() {
        let server = MockServer::start().await;
        regions_mock(
            &server,
            200,
            r#"{"regions": [{"id": "reg_eu", "name": "Europe", "currency_code": "eur", "countries": [{"iso_2": "de"}]}]}"#,
            1,
        )
        .await;

        let cache = RegionCache::from_parts(Some(backend(&server)), Arc::new(BuiltinFallback), options());

        // Neither "jp" nor the default "us" is cached, use the builtin table
        let region = cache.get_region("jp").await;
        assert_eq!(region.id, "reg_01K4HR6SSPKHAXJQ180533WTB8");

        let mut mx_options = options();
        mx_options.default_region = "mx".into();
        let cache = RegionCache::from_parts(None, Arc::new(BuiltinFallback), mx_options);
        assert_eq!(cache.default_region(), "mx");
        assert_eq!(cache.get_region("jp").await.currency_code, "mxn");
    }

    #[tokio::test]
    async fn test_retrieve_region() {
        let server = MockServer::start().await;
        regions_mock(&server, 200, REGIONS_BODY, 1).await;
        Mock::given(method("GET"))
            .and(path("/store/regions/reg_eu"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                r#"{"region": {"id": "reg_eu", "name": "Europe (live)", "currency_code": "eur"}}"#,
            ))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/store/regions/reg_na"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let cache = RegionCache::from_parts(Some(backend(&server)), Arc::new(BuiltinFallback), options());

        assert_eq!(
            cache.retrieve_region("reg_eu").await.unwrap().name,
            "Europe (live)"
        );
        // Backend error, found in the cached snapshot
        assert_eq!(
            cache.retrieve_region("reg_na").await.unwrap().name,
            "North America"
        );
        // Backend 404, found in the builtin table
        assert_eq!(
            cache
                .retrieve_region("reg_01K4HR6SSPD90W98MAA1JF6NQX")
                .await
                .unwrap()
                .name,
            "Mexico"
        );
        assert!(cache.retrieve_region("reg_unknown").await.is_none());
    }
}
