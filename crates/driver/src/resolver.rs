//! Driver profile resolution
//!
//! Profiles are looked up by (vendor id, product id): first in an in-memory
//! cache, then with a single GET to the profile store at
//! `{store}/usb-profiles/{vendorId}/{productId}.json`. Identifiers are
//! formatted in decimal.
//!
//! Cache policy:
//! - successful fetches are cached for the process lifetime, with no eviction
//! - failures are never cached, so the next call for the same pair retries
//!   the store (a device seen during a network blip gets its profile later)
//!
//! Failure to obtain a profile is not an error. It yields
//! [`Resolution::Unavailable`] and the caller falls back to descriptor
//! heuristics.

use anyhow::{Context, Result};
use parking_lot::RwLock;
use protocol::{DriverProfile, ProfileError};
use reqwest::{Client, Url};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Why no profile could be produced
#[derive(Debug, thiserror::Error)]
pub enum ProfileUnavailable {
    #[error("no profile store configured")]
    NoStore,
    #[error("profile store request failed: {0}")]
    Request(String),
    #[error("profile store returned HTTP {0}")]
    Status(u16),
    #[error("profile rejected: {0}")]
    Invalid(#[from] ProfileError),
}

/// Outcome of a profile lookup
#[derive(Debug)]
pub enum Resolution {
    /// Served from the in-memory cache
    Cached(Arc<DriverProfile>),
    /// Fetched from the store and now cached
    Fetched(Arc<DriverProfile>),
    /// No profile; use the heuristic path
    Unavailable(ProfileUnavailable),
}

impl Resolution {
    pub fn profile(&self) -> Option<&Arc<DriverProfile>> {
        match self {
            Resolution::Cached(p) | Resolution::Fetched(p) => Some(p),
            Resolution::Unavailable(_) => None,
        }
    }

    pub fn into_profile(self) -> Option<Arc<DriverProfile>> {
        match self {
            Resolution::Cached(p) | Resolution::Fetched(p) => Some(p),
            Resolution::Unavailable(_) => None,
        }
    }
}

/// Cache-first profile resolver backed by a remote store
pub struct ProfileResolver {
    client: Client,
    store_url: Option<Url>,
    cache: RwLock<HashMap<(u16, u16), Arc<DriverProfile>>>,
}

impl ProfileResolver {
    /// Create a resolver that fetches misses from `store_url`
    pub fn new(store_url: Url, fetch_timeout: Duration) -> Result<Self> {
        Self::build(Some(store_url), fetch_timeout)
    }

    /// Create a resolver that only serves profiles inserted into its cache
    pub fn cache_only() -> Result<Self> {
        Self::build(None, Duration::from_secs(1))
    }

    fn build(store_url: Option<Url>, fetch_timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(fetch_timeout)
            .user_agent(concat!("scan-driver/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            store_url,
            cache: RwLock::new(HashMap::new()),
        })
    }

    /// Resolve the profile for a vendor/product pair
    pub async fn resolve(&self, vendor_id: u16, product_id: u16) -> Resolution {
        if let Some(profile) = self.cached(vendor_id, product_id) {
            debug!("Profile cache hit for {:04x}:{:04x}", vendor_id, product_id);
            return Resolution::Cached(profile);
        }

        debug!("Profile cache miss for {:04x}:{:04x}", vendor_id, product_id);
        match self.fetch(vendor_id, product_id).await {
            Ok(profile) => {
                let profile = self.insert(profile);
                info!(
                    "Fetched driver profile for {:04x}:{:04x}",
                    vendor_id, product_id
                );
                Resolution::Fetched(profile)
            }
            Err(reason) => {
                debug!(
                    "No profile for {:04x}:{:04x}: {}",
                    vendor_id, product_id, reason
                );
                Resolution::Unavailable(reason)
            }
        }
    }

    /// Cached profile, without touching the store
    pub fn cached(&self, vendor_id: u16, product_id: u16) -> Option<Arc<DriverProfile>> {
        self.cache.read().get(&(vendor_id, product_id)).cloned()
    }

    /// Seed the cache with a profile, replacing any cached one for its pair
    pub fn insert(&self, profile: DriverProfile) -> Arc<DriverProfile> {
        let profile = Arc::new(profile);
        self.cache.write().insert(profile.key(), profile.clone());
        profile
    }

    pub fn cached_count(&self) -> usize {
        self.cache.read().len()
    }

    /// Seed the cache from every `*.json` profile in a directory
    ///
    /// Files that fail validation are skipped with a warning. Returns the
    /// number of profiles loaded.
    pub fn load_dir(&self, dir: &Path) -> Result<usize> {
        let entries = std::fs::read_dir(dir)
            .with_context(|| format!("Failed to read profile directory: {}", dir.display()))?;

        let mut loaded = 0;
        for entry in entries {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }

            let body = std::fs::read(&path)
                .with_context(|| format!("Failed to read profile: {}", path.display()))?;
            match DriverProfile::from_json(&body) {
                Ok(profile) => {
                    self.insert(profile);
                    loaded += 1;
                }
                Err(e) => warn!("Skipping profile {}: {}", path.display(), e),
            }
        }

        info!("Loaded {} local profile(s) from {}", loaded, dir.display());
        Ok(loaded)
    }

    /// Store URL for a vendor/product pair
    pub fn profile_url(&self, vendor_id: u16, product_id: u16) -> Option<String> {
        self.store_url.as_ref().map(|base| {
            format!(
                "{}/usb-profiles/{}/{}.json",
                base.as_str().trim_end_matches('/'),
                vendor_id,
                product_id
            )
        })
    }

    async fn fetch(
        &self,
        vendor_id: u16,
        product_id: u16,
    ) -> std::result::Result<DriverProfile, ProfileUnavailable> {
        let url = self
            .profile_url(vendor_id, product_id)
            .ok_or(ProfileUnavailable::NoStore)?;

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| ProfileUnavailable::Request(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ProfileUnavailable::Status(status.as_u16()));
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| ProfileUnavailable::Request(e.to_string()))?;

        Ok(DriverProfile::from_json_for(&body, vendor_id, product_id)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn profile_json(vendor_id: u16, product_id: u16) -> serde_json::Value {
        serde_json::json!({
            "vendorId": vendor_id,
            "productId": product_id,
            "interfaceNumber": 0,
            "endpoints": [{ "endpointNumber": 2, "direction": "in", "type": "bulk" }]
        })
    }

    fn resolver_for(server: &MockServer) -> ProfileResolver {
        let url = Url::parse(&server.uri()).unwrap();
        ProfileResolver::new(url, Duration::from_secs(5)).unwrap()
    }

    #[tokio::test]
    async fn test_fetch_then_cache() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/usb-profiles/1193/4660.json"))
            .respond_with(ResponseTemplate::new(200).set_body_json(profile_json(0x04a9, 0x1234)))
            .expect(1)
            .mount(&server)
            .await;

        let resolver = resolver_for(&server);

        assert!(matches!(
            resolver.resolve(0x04a9, 0x1234).await,
            Resolution::Fetched(_)
        ));
        let second = resolver.resolve(0x04a9, 0x1234).await;
        assert!(matches!(second, Resolution::Cached(_)));
        assert_eq!(second.profile().unwrap().interface_number, 0);
    }

    #[tokio::test]
    async fn test_not_found_is_not_cached() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/usb-profiles/1/2.json"))
            .respond_with(ResponseTemplate::new(404))
            .expect(2)
            .mount(&server)
            .await;

        let resolver = resolver_for(&server);

        for _ in 0..2 {
            assert!(matches!(
                resolver.resolve(1, 2).await,
                Resolution::Unavailable(ProfileUnavailable::Status(404))
            ));
        }
        assert_eq!(resolver.cached_count(), 0);
    }

    #[tokio::test]
    async fn test_malformed_body_unavailable() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/usb-profiles/1/2.json"))
            .respond_with(ResponseTemplate::new(200).set_body_string("{ \"vendorId\": 1 }"))
            .mount(&server)
            .await;

        let resolver = resolver_for(&server);

        assert!(matches!(
            resolver.resolve(1, 2).await,
            Resolution::Unavailable(ProfileUnavailable::Invalid(_))
        ));
    }

    #[tokio::test]
    async fn test_mismatched_profile_unavailable() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/usb-profiles/1/2.json"))
            .respond_with(ResponseTemplate::new(200).set_body_json(profile_json(1, 3)))
            .mount(&server)
            .await;

        let resolver = resolver_for(&server);

        assert!(matches!(
            resolver.resolve(1, 2).await,
            Resolution::Unavailable(ProfileUnavailable::Invalid(
                ProfileError::DeviceMismatch { .. }
            ))
        ));
    }

    #[tokio::test]
    async fn test_unreachable_store_unavailable() {
        // Port 9 (discard) is not listening in test environments
        let url = Url::parse("http://127.0.0.1:9").unwrap();
        let resolver = ProfileResolver::new(url, Duration::from_secs(2)).unwrap();

        assert!(matches!(
            resolver.resolve(1, 2).await,
            Resolution::Unavailable(ProfileUnavailable::Request(_))
        ));
    }

    #[tokio::test]
    async fn test_cache_only() {
        let resolver = ProfileResolver::cache_only().unwrap();
        assert!(matches!(
            resolver.resolve(1, 2).await,
            Resolution::Unavailable(ProfileUnavailable::NoStore)
        ));

        let body = serde_json::to_vec(&profile_json(1, 2)).unwrap();
        resolver.insert(DriverProfile::from_json(&body).unwrap());
        assert!(matches!(resolver.resolve(1, 2).await, Resolution::Cached(_)));
    }

    #[test]
    fn test_profile_url() {
        let url = Url::parse("https://profiles.example.com/base/").unwrap();
        let resolver = ProfileResolver::new(url, Duration::from_secs(1)).unwrap();

        assert_eq!(
            resolver.profile_url(0x04a9, 0x1234).as_deref(),
            Some("https://profiles.example.com/base/usb-profiles/1193/4660.json")
        );
    }

    #[test]
    fn test_load_dir_skips_invalid() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("good.json"),
            serde_json::to_vec(&profile_json(5, 6)).unwrap(),
        )
        .unwrap();
        std::fs::write(dir.path().join("bad.json"), b"not json").unwrap();
        std::fs::write(dir.path().join("notes.txt"), b"ignored").unwrap();

        let resolver = ProfileResolver::cache_only().unwrap();
        assert_eq!(resolver.load_dir(dir.path()).unwrap(), 1);
        assert!(resolver.cached(5, 6).is_some());
    }
}
