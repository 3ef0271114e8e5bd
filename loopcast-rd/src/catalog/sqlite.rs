//! SQLite catalog over the crawler's `media` table

use super::{CatalogFilter, CatalogSource, MediaItem};
use crate::error::{Error, Result};
use async_trait::async_trait;
use sqlx::{QueryBuilder, Sqlite, SqlitePool};
use tracing::debug;

/// Default ceiling on a single item (10 GiB)
pub const DEFAULT_MAX_ITEM_BYTES: u64 = 10 * 1024 * 1024 * 1024;

/// Items the rotation may play
const PLAYABLE_MEDIATYPE: &str = "movies";

#[derive(Debug, sqlx::FromRow)]
struct MediaRow {
    identifier: String,
    title: String,
    item_size: Option<i64>,
}

/// Catalog backed by a SQLite `media` table
pub struct SqliteCatalog {
    pool: SqlitePool,
    max_item_bytes: u64,
}

impl SqliteCatalog {
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            pool,
            max_item_bytes: DEFAULT_MAX_ITEM_BYTES,
        }
    }

    /// Only items no larger than `max_item_bytes` are offered by `random`
    pub fn with_max_item_bytes(mut self, max_item_bytes: u64) -> Self {
        self.max_item_bytes = max_item_bytes;
        self
    }

    /// Open a catalog database file read-only
    pub async fn open(path: &std::path::Path) -> Result<Self> {
        let url = format!("sqlite://{}?mode=ro", path.display());
        let pool = sqlx::sqlite::SqlitePoolOptions::new()
            .max_connections(2)
            .connect(&url)
            .await
            .map_err(|e| Error::Catalog(format!("Cannot open {}: {}", path.display(), e)))?;
        Ok(Self::new(pool))
    }

    /// Metadata endpoint the archive resolver understands
    pub fn remote_uri_for(identifier: &str) -> String {
        format!("https://archive.org/metadata/{}", identifier)
    }

    fn to_item(row: MediaRow) -> MediaItem {
        MediaItem {
            remote_uri: Self::remote_uri_for(&row.identifier),
            id: row.identifier,
            title: row.title,
            byte_size: row.item_size.and_then(|s| u64::try_from(s).ok()),
            duration_secs: None,
        }
    }

    fn size_cap(&self) -> i64 {
        self.max_item_bytes.min(i64::MAX as u64) as i64
    }
}

fn catalog_error(e: sqlx::Error) -> Error {
    Error::Catalog(e.to_string())
}

#[async_trait]
impl CatalogSource for SqliteCatalog {
    async fn list(&self, filter: &CatalogFilter) -> Result<Vec<MediaItem>> {
        let mut qb: QueryBuilder<Sqlite> =
            QueryBuilder::new("SELECT identifier, title, item_size FROM media WHERE 1 = 1");

        if let Some(mediatype) = &filter.mediatype {
            qb.push(" AND mediatype = ").push_bind(mediatype.clone());
        }
        if let Some(search) = &filter.search {
            let pattern = format!("%{}%", search);
            qb.push(" AND (title LIKE ")
                .push_bind(pattern.clone())
                .push(" OR description LIKE ")
                .push_bind(pattern.clone())
                .push(" OR creator LIKE ")
                .push_bind(pattern)
                .push(")");
        }
        if let Some(year) = filter.year {
            qb.push(" AND year = ").push_bind(year);
        }
        if let Some(max) = filter.max_item_bytes {
            qb.push(" AND item_size > 0 AND item_size <= ")
                .push_bind(max.min(i64::MAX as u64) as i64);
        }

        qb.push(" ORDER BY downloads DESC, identifier ASC");
        qb.push(" LIMIT ").push_bind(filter.limit.unwrap_or(50) as i64);
        qb.push(" OFFSET ").push_bind(filter.offset.unwrap_or(0) as i64);

        let rows: Vec<MediaRow> = qb
            .build_query_as()
            .fetch_all(&self.pool)
            .await
            .map_err(catalog_error)?;

        Ok(rows.into_iter().map(Self::to_item).collect())
    }

    async fn random(&self, exclude_ids: &[String]) -> Result<Option<MediaItem>> {
        let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new(
            "SELECT identifier, title, item_size FROM media WHERE mediatype = ",
        );
        qb.push_bind(PLAYABLE_MEDIATYPE)
            .push(" AND item_size > 0 AND item_size <= ")
            .push_bind(self.size_cap());

        if !exclude_ids.is_empty() {
            qb.push(" AND identifier NOT IN (");
            let mut separated = qb.separated(", ");
            for id in exclude_ids {
                separated.push_bind(id.clone());
            }
            separated.push_unseparated(")");
        }

        qb.push(" ORDER BY RANDOM() LIMIT 1");

        let row: Option<MediaRow> = qb
            .build_query_as()
            .fetch_optional(&self.pool)
            .await
            .map_err(catalog_error)?;

        debug!(
            excluded = exclude_ids.len(),
            found = row.is_some(),
            "Random catalog pick"
        );
        Ok(row.map(Self::to_item))
    }

    async fn get(&self, id: &str) -> Result<Option<MediaItem>> {
        let row: Option<MediaRow> =
            sqlx::query_as("SELECT identifier, title, item_size FROM media WHERE identifier = ?")
                .bind(id)
                .fetch_optional(&self.pool)
                .await
                .map_err(catalog_error)?;
        Ok(row.map(Self::to_item))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn setup_catalog() -> SqliteCatalog {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        loopcast_common::db::create_media_table(&pool).await.unwrap();

        let rows = [
            ("m1", "Night of the Fog", "movies", Some(100), 5, "Studio A", 1958, "fog horror"),
            ("m2", "Rocket Age", "movies", Some(200), 50, "Studio B", 1962, "space"),
            ("a1", "Radio Hour", "audio", Some(10), 9, "Station", 1940, "radio"),
            ("m3", "Empty Reel", "movies", Some(0), 1, "Studio A", 1958, "nothing"),
            ("m4", "Epic", "movies", Some(5000), 2, "Studio C", 1970, "too long"),
        ];
        for (id, title, mediatype, size, downloads, creator, year, desc) in rows {
            sqlx::query(
                "INSERT INTO media (identifier, title, mediatype, item_size, downloads, creator, year, description)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(id)
            .bind(title)
            .bind(mediatype)
            .bind(size)
            .bind(downloads)
            .bind(creator)
            .bind(year)
            .bind(desc)
            .execute(&pool)
            .await
            .unwrap();
        }

        SqliteCatalog::new(pool).with_max_item_bytes(1000)
    }

    #[tokio::test]
    async fn test_random_only_offers_playable_items() {
        let catalog = setup_catalog().await;

        for _ in 0..20 {
            let item = catalog.random(&[]).await.unwrap().unwrap();
            assert!(item.id == "m1" || item.id == "m2", "unexpected {}", item.id);
        }
    }

    #[tokio::test]
    async fn test_random_excludes_ids() {
        let catalog = setup_catalog().await;

        let item = catalog.random(&["m1".to_string()]).await.unwrap().unwrap();
        assert_eq!(item.id, "m2");
        assert_eq!(item.remote_uri, "https://archive.org/metadata/m2");

        let none = catalog
            .random(&["m1".to_string(), "m2".to_string()])
            .await
            .unwrap();
        assert!(none.is_none());
    }

    #[tokio::test]
    async fn test_list_filters() {
        let catalog = setup_catalog().await;

        let all = catalog.list(&CatalogFilter::default()).await.unwrap();
        assert_eq!(all.len(), 5);
        assert_eq!(all[0].id, "m2");

        let movies_1958 = catalog
            .list(&CatalogFilter {
                mediatype: Some("movies".into()),
                year: Some(1958),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(movies_1958.len(), 2);

        let fog = catalog
            .list(&CatalogFilter {
                search: Some("fog".into()),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(fog.len(), 1);
        assert_eq!(fog[0].title, "Night of the Fog");

        let small = catalog
            .list(&CatalogFilter {
                max_item_bytes: Some(150),
                ..Default::default()
            })
            .await
            .unwrap();
        let ids: Vec<&str> = small.iter().map(|i| i.id.as_str()).collect();
        assert_eq!(ids, vec!["a1", "m1"]);

        let page = catalog
            .list(&CatalogFilter {
                limit: Some(2),
                offset: Some(1),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(page.len(), 2);
    }

    #[tokio::test]
    async fn test_get() {
        let catalog = setup_catalog().await;
        let item = catalog.get("m1").await.unwrap().unwrap();
        assert_eq!(item.byte_size, Some(100));
        assert!(catalog.get("missing").await.unwrap().is_none());
    }
}
