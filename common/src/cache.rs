// Content-addressed cache layer: fingerprints (url, options) and (domain, source)
// pairs via SHA-256, the same hashing primitive `webhook::sign_payload` builds on,
// and wraps the page_cache/map_cache repositories with read-through lookups and
// write-behind population, storing the page body in the object store and only
// metadata in Postgres.

use crate::db::repositories::{MapCacheRepository, PageCacheRepository};
use crate::errors::CacheError;
use crate::models::{MapCache, MapSource, PageCache};
use crate::storage::minio::MinioClient;
use chrono::Duration;
use sha2::{Digest, Sha256};
use tracing::{info, instrument};

pub fn fingerprint(parts: &[&str]) -> String {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part.as_bytes());
        hasher.update(b"\0");
    }
    hex::encode(hasher.finalize())
}

/// A page fetch about to be written through to the cache. `body` is staged in the
/// object store under `object_store_key`; everything else lands in `page_cache`.
pub struct PageFetchResult {
    pub url: String,
    pub options_fingerprint: String,
    pub domain: String,
    pub body: Vec<u8>,
    pub title: Option<String>,
    pub description: Option<String>,
    pub status_code: i32,
    pub content_type: Option<String>,
    pub engine: String,
    pub has_proxy: bool,
    pub has_screenshot: bool,
}

#[async_trait::async_trait]
pub trait CacheLayer: Send + Sync {
    async fn find_fresh_page(
        &self,
        url: &str,
        options_fingerprint: &str,
        max_age: Duration,
    ) -> Result<Option<PageCache>, CacheError>;

    async fn put_page(&self, result: PageFetchResult) -> Result<PageCache, CacheError>;

    async fn fetch_page_body(&self, entry: &PageCache) -> Result<Vec<u8>, CacheError>;

    async fn find_fresh_map(
        &self,
        domain: &str,
        source: MapSource,
        max_age: Duration,
    ) -> Result<Option<MapCache>, CacheError>;

    async fn put_map(
        &self,
        domain: &str,
        source: MapSource,
        urls: Vec<String>,
        titles: Option<Vec<Option<String>>>,
        descriptions: Option<Vec<Option<String>>>,
    ) -> Result<MapCache, CacheError>;
}

pub struct ObjectStoreCacheLayer {
    pages: PageCacheRepository,
    maps: MapCacheRepository,
    object_store: MinioClient,
}

impl ObjectStoreCacheLayer {
    pub fn new(pages: PageCacheRepository, maps: MapCacheRepository, object_store: MinioClient) -> Self {
        Self { pages, maps, object_store }
    }

    fn object_key(url_hash: &str, options_hash: &str) -> String {
        format!("pages/{}/{url_hash}-{options_hash}.html", &url_hash[..2])
    }
}

#[async_trait::async_trait]
impl CacheLayer for ObjectStoreCacheLayer {
    #[instrument(skip(self), fields(url))]
    async fn find_fresh_page(
        &self,
        url: &str,
        options_fingerprint: &str,
        max_age: Duration,
    ) -> Result<Option<PageCache>, CacheError> {
        let url_hash = fingerprint(&[url]);
        Ok(self.pages.find_fresh(&url_hash, options_fingerprint, max_age).await?)
    }

    #[instrument(skip(self, result), fields(url = %result.url))]
    async fn put_page(&self, result: PageFetchResult) -> Result<PageCache, CacheError> {
        let url_hash = fingerprint(&[&result.url]);
        let content_hash = hex::encode(Sha256::digest(&result.body));
        let object_store_key = Self::object_key(&url_hash, &result.options_fingerprint);

        self.object_store.put_object(&object_store_key, &result.body).await?;

        let entry = PageCache {
            uuid: uuid::Uuid::new_v4(),
            url_hash,
            options_hash: result.options_fingerprint,
            domain: result.domain,
            content_hash,
            title: result.title,
            description: result.description,
            status_code: result.status_code,
            content_type: result.content_type,
            content_length: result.body.len() as i64,
            engine: result.engine,
            has_proxy: result.has_proxy,
            has_screenshot: result.has_screenshot,
            scraped_at: chrono::Utc::now(),
            object_store_key,
        };

        let stored = self.pages.upsert(&entry).await?;
        info!(url_hash = %stored.url_hash, "page cached");
        Ok(stored)
    }

    async fn fetch_page_body(&self, entry: &PageCache) -> Result<Vec<u8>, CacheError> {
        Ok(self.object_store.get_object(&entry.object_store_key).await?)
    }

    #[instrument(skip(self), fields(domain))]
    async fn find_fresh_map(
        &self,
        domain: &str,
        source: MapSource,
        max_age: Duration,
    ) -> Result<Option<MapCache>, CacheError> {
        let domain_hash = fingerprint(&[domain]);
        Ok(self.maps.find_fresh(&domain_hash, source, max_age).await?)
    }

    #[instrument(skip(self, urls, titles, descriptions), fields(domain))]
    async fn put_map(
        &self,
        domain: &str,
        source: MapSource,
        urls: Vec<String>,
        titles: Option<Vec<Option<String>>>,
        descriptions: Option<Vec<Option<String>>>,
    ) -> Result<MapCache, CacheError> {
        let domain_hash = fingerprint(&[domain]);
        let entry = MapCache {
            uuid: uuid::Uuid::new_v4(),
            domain_hash,
            domain: domain.to_string(),
            source,
            urls,
            titles,
            descriptions,
            discovered_at: chrono::Utc::now(),
        };
        Ok(self.maps.upsert(&entry).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fingerprint_is_deterministic() {
        assert_eq!(fingerprint(&["https://example.com"]), fingerprint(&["https://example.com"]));
    }

    #[test]
    fn fingerprint_distinguishes_part_boundaries() {
        // Without a separator "ab"+"c" would collide with "a"+"bc".
        assert_ne!(fingerprint(&["ab", "c"]), fingerprint(&["a", "bc"]));
    }

    #[test]
    fn fingerprint_changes_with_options() {
        assert_ne!(fingerprint(&["https://example.com", "opt1"]), fingerprint(&["https://example.com", "opt2"]));
    }

    #[test]
    fn object_key_is_sharded_by_hash_prefix() {
        let key = ObjectStoreCacheLayer::object_key("abcdef", "000000");
        assert!(key.starts_with("pages/ab/"));
    }
}
