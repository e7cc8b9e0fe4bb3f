// Repository for map_cache: cached URL discovery results keyed by (domain_hash, source).

use super::queries::map_cache_queries::SELECT_ALL_COLUMNS;
use crate::db::DbPool;
use crate::errors::DatabaseError;
use crate::models::{MapCache, MapSource};
use chrono::{DateTime, Utc};
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, FromRow)]
struct MapCacheRow {
    uuid: Uuid,
    domain_hash: String,
    domain: String,
    source: String,
    urls: Vec<String>,
    titles: Option<Vec<Option<String>>>,
    descriptions: Option<Vec<Option<String>>>,
    discovered_at: DateTime<Utc>,
}

impl From<MapCacheRow> for MapCache {
    fn from(row: MapCacheRow) -> Self {
        MapCache {
            uuid: row.uuid,
            domain_hash: row.domain_hash,
            domain: row.domain,
            source: parse_source(&row.source),
            urls: row.urls,
            titles: row.titles,
            descriptions: row.descriptions,
            discovered_at: row.discovered_at,
        }
    }
}

fn parse_source(s: &str) -> MapSource {
    match s {
        "search" => MapSource::Search,
        "crawl" => MapSource::Crawl,
        "combined" => MapSource::Combined,
        _ => MapSource::Sitemap,
    }
}

fn source_str(source: MapSource) -> &'static str {
    match source {
        MapSource::Sitemap => "sitemap",
        MapSource::Search => "search",
        MapSource::Crawl => "crawl",
        MapSource::Combined => "combined",
    }
}

#[derive(Debug, Clone)]
pub struct MapCacheRepository {
    pool: DbPool,
}

impl MapCacheRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub async fn upsert(&self, entry: &MapCache) -> Result<MapCache, DatabaseError> {
        let query = format!(
            "INSERT INTO map_cache (uuid, domain_hash, domain, source, urls, titles,
                descriptions, discovered_at)
             VALUES ($1,$2,$3,$4,$5,$6,$7,$8)
             ON CONFLICT (domain_hash, source) DO UPDATE SET
                urls = EXCLUDED.urls,
                titles = EXCLUDED.titles,
                descriptions = EXCLUDED.descriptions,
                discovered_at = EXCLUDED.discovered_at
             RETURNING {SELECT_ALL_COLUMNS}"
        );

        let row: MapCacheRow = sqlx::query_as(&query)
            .bind(entry.uuid)
            .bind(&entry.domain_hash)
            .bind(&entry.domain)
            .bind(source_str(entry.source))
            .bind(&entry.urls)
            .bind(&entry.titles)
            .bind(&entry.descriptions)
            .bind(entry.discovered_at)
            .fetch_one(self.pool.pool())
            .await?;

        Ok(row.into())
    }

    pub async fn find_fresh(
        &self,
        domain_hash: &str,
        source: MapSource,
        max_age: chrono::Duration,
    ) -> Result<Option<MapCache>, DatabaseError> {
        let query = format!(
            "SELECT {SELECT_ALL_COLUMNS} FROM map_cache
             WHERE domain_hash = $1 AND source = $2 AND discovered_at > $3"
        );
        let not_before = Utc::now() - max_age;
        let row: Option<MapCacheRow> = sqlx::query_as(&query)
            .bind(domain_hash)
            .bind(source_str(source))
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
    fn source_string_round_trips() {
        for source in [MapSource::Sitemap, MapSource::Search, MapSource::Crawl, MapSource::Combined]
        {
            assert_eq!(parse_source(source_str(source)), source);
        }
    }
}
