// Repository for page_cache: content-addressed single-page fetch results.

use super::queries::page_cache_queries::SELECT_ALL_COLUMNS;
use crate::db::DbPool;
use crate::errors::DatabaseError;
use crate::models::PageCache;
use chrono::{DateTime, Utc};
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, FromRow)]
struct PageCacheRow {
    uuid: Uuid,
    url_hash: String,
    options_hash: String,
    domain: String,
    content_hash: String,
    title: Option<String>,
    description: Option<String>,
    status_code: i32,
    content_type: Option<String>,
    content_length: i64,
    engine: String,
    has_proxy: bool,
    has_screenshot: bool,
    scraped_at: DateTime<Utc>,
    object_store_key: String,
}

impl From<PageCacheRow> for PageCache {
    fn from(row: PageCacheRow) -> Self {
        PageCache {
            uuid: row.uuid,
            url_hash: row.url_hash,
            options_hash: row.options_hash,
            domain: row.domain,
            content_hash: row.content_hash,
            title: row.title,
            description: row.description,
            status_code: row.status_code,
            content_type: row.content_type,
            content_length: row.content_length,
            engine: row.engine,
            has_proxy: row.has_proxy,
            has_screenshot: row.has_screenshot,
            scraped_at: row.scraped_at,
            object_store_key: row.object_store_key,
        }
    }
}

#[derive(Debug, Clone)]
pub struct PageCacheRepository {
    pool: DbPool,
}

impl PageCacheRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Insert a fresh cache row, replacing any prior entry for the same
    /// `(url_hash, options_hash)` key so re-scrapes overwrite stale content.
    pub async fn upsert(&self, entry: &PageCache) -> Result<PageCache, DatabaseError> {
        let query = format!(
            "INSERT INTO page_cache (uuid, url_hash, options_hash, domain, content_hash, title,
                description, status_code, content_type, content_length, engine, has_proxy,
                has_screenshot, scraped_at, object_store_key)
             VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11,$12,$13,$14,$15)
             ON CONFLICT (url_hash, options_hash) DO UPDATE SET
                domain = EXCLUDED.domain,
                content_hash = EXCLUDED.content_hash,
                title = EXCLUDED.title,
                description = EXCLUDED.description,
                status_code = EXCLUDED.status_code,
                content_type = EXCLUDED.content_type,
                content_length = EXCLUDED.content_length,
                engine = EXCLUDED.engine,
                has_proxy = EXCLUDED.has_proxy,
                has_screenshot = EXCLUDED.has_screenshot,
                scraped_at = EXCLUDED.scraped_at,
                object_store_key = EXCLUDED.object_store_key
             RETURNING {SELECT_ALL_COLUMNS}"
        );

        let row: PageCacheRow = sqlx::query_as(&query)
            .bind(entry.uuid)
            .bind(&entry.url_hash)
            .bind(&entry.options_hash)
            .bind(&entry.domain)
            .bind(&entry.content_hash)
            .bind(&entry.title)
            .bind(&entry.description)
            .bind(entry.status_code)
            .bind(&entry.content_type)
            .bind(entry.content_length)
            .bind(&entry.engine)
            .bind(entry.has_proxy)
            .bind(entry.has_screenshot)
            .bind(entry.scraped_at)
            .bind(&entry.object_store_key)
            .fetch_one(self.pool.pool())
            .await?;

        Ok(row.into())
    }

    pub async fn find_fresh(
        &self,
        url_hash: &str,
        options_hash: &str,
        max_age: chrono::Duration,
    ) -> Result<Option<PageCache>, DatabaseError> {
        let query = format!(
            "SELECT {SELECT_ALL_COLUMNS} FROM page_cache
             WHERE url_hash = $1 AND options_hash = $2 AND scraped_at > $3"
        );
        let not_before = Utc::now() - max_age;
        let row: Option<PageCacheRow> = sqlx::query_as(&query)
            .bind(url_hash)
            .bind(options_hash)
            .bind(not_before)
            .fetch_optional(self.pool.pool())
            .await?;
        Ok(row.map(Into::into))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn row_maps_optional_fields_through() {
        let row = PageCacheRow {
            uuid: Uuid::new_v4(),
            url_hash: "a".into(),
            options_hash: "b".into(),
            domain: "example.com".into(),
            content_hash: "c".into(),
            title: None,
            description: None,
            status_code: 200,
            content_type: Some("text/html".into()),
            content_length: 128,
            engine: "cheerio".into(),
            has_proxy: false,
            has_screenshot: false,
            scraped_at: Utc::now(),
            object_store_key: "pages/a/b".into(),
        };
        let cache: PageCache = row.into();
        assert_eq!(cache.status_code, 200);
        assert!(cache.title.is_none());
    }
}
