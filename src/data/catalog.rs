//! Paged access to the album catalog.

use crate::data::models::AlbumRef;
use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::PgPool;

/// Source of albums to harvest, read one page at a time.
#[async_trait]
pub trait AlbumCatalog: Send + Sync {
    /// Albums `offset..offset + limit` in a stable order. An empty page means the
    /// catalog is exhausted.
    async fn get_page(&self, offset: i64, limit: i64) -> Result<Vec<AlbumRef>>;
}

pub struct PgCatalog {
    pool: PgPool,
}

impl PgCatalog {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AlbumCatalog for PgCatalog {
    async fn get_page(&self, offset: i64, limit: i64) -> Result<Vec<AlbumRef>> {
        sqlx::query_as::<_, AlbumRef>(
            r#"
            SELECT album_id, artist_id, artist_name, name AS album_name
            FROM albums
            ORDER BY album_id DESC
            LIMIT $1 OFFSET $2
            "#,
        )
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await
        .with_context(|| format!("Failed to read catalog page at offset {offset}"))
    }
}
