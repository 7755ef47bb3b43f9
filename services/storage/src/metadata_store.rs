use crate::error::StoreError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use sqlx::postgres::PgPool;
use sqlx::FromRow;
use tracing::{debug, instrument};
use uuid::Uuid;

/// Stored recording metadata. Written once after a successful upload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct VideoMetadata {
    /// Recording ID, shared with the blob key
    pub id: Uuid,
    /// When the upload completed
    pub created_at: DateTime<Utc>,
    /// Display name supplied with the upload
    pub file_name: String,
    /// Stored size in bytes
    #[sqlx(rename = "size_bytes")]
    pub size: i64,
}

/// Durable store of recording metadata rows
#[async_trait]
pub trait MetadataStore: Send + Sync {
    /// Insert a row. Returns false when a row with the same id already
    /// exists; the existing row is left untouched.
    async fn insert(&self, metadata: &VideoMetadata) -> Result<bool, StoreError>;

    async fn get(&self, id: Uuid) -> Result<Option<VideoMetadata>, StoreError>;

    /// All rows, newest first
    async fn list(&self) -> Result<Vec<VideoMetadata>, StoreError>;

    /// Remove a row. Returns whether a row was removed.
    async fn delete(&self, id: Uuid) -> Result<bool, StoreError>;

    /// Readiness probe
    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

/// PostgreSQL-backed metadata store
pub struct PgMetadataStore {
    pool: PgPool,
}

impl PgMetadataStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl MetadataStore for PgMetadataStore {
    #[instrument(skip(self, metadata), fields(video_id = %metadata.id))]
    async fn insert(&self, metadata: &VideoMetadata) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            INSERT INTO videos (id, created_at, file_name, size_bytes)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(metadata.id)
        .bind(metadata.created_at)
        .bind(&metadata.file_name)
        .bind(metadata.size)
        .execute(&self.pool)
        .await?;

        let inserted = result.rows_affected() == 1;
        debug!(inserted, "Video metadata written");
        Ok(inserted)
    }

    async fn get(&self, id: Uuid) -> Result<Option<VideoMetadata>, StoreError> {
        let row = sqlx::query_as::<_, VideoMetadata>(
            r#"
            SELECT id, created_at, file_name, size_bytes
            FROM videos
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row)
    }

    async fn list(&self) -> Result<Vec<VideoMetadata>, StoreError> {
        let rows = sqlx::query_as::<_, VideoMetadata>(
            r#"
            SELECT id, created_at, file_name, size_bytes
            FROM videos
            ORDER BY created_at DESC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    #[instrument(skip(self))]
    async fn delete(&self, id: Uuid) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM videos WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn ping(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

/// In-process metadata store, for the memory backend and tests
#[derive(Default)]
pub struct MemoryMetadataStore {
    rows: DashMap<Uuid, VideoMetadata>,
}

impl MemoryMetadataStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MetadataStore for MemoryMetadataStore {
    async fn insert(&self, metadata: &VideoMetadata) -> Result<bool, StoreError> {
        let mut inserted = false;
        self.rows.entry(metadata.id).or_insert_with(|| {
            inserted = true;
            metadata.clone()
        });
        Ok(inserted)
    }

    async fn get(&self, id: Uuid) -> Result<Option<VideoMetadata>, StoreError> {
        Ok(self.rows.get(&id).map(|row| row.value().clone()))
    }

    async fn list(&self) -> Result<Vec<VideoMetadata>, StoreError> {
        let mut rows: Vec<VideoMetadata> = self.rows.iter().map(|r| r.value().clone()).collect();
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(rows)
    }

    async fn delete(&self, id: Uuid) -> Result<bool, StoreError> {
        Ok(self.rows.remove(&id).is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn metadata(day: u32, name: &str) -> VideoMetadata {
        VideoMetadata {
            id: Uuid::new_v4(),
            created_at: Utc.with_ymd_and_hms(2024, 1, day, 10, 0, 0).unwrap(),
            file_name: name.to_string(),
            size: 1024,
        }
    }

    #[tokio::test]
    async fn test_list_is_newest_first() {
        let store = MemoryMetadataStore::new();
        store.insert(&metadata(1, "old.webm")).await.unwrap();
        store.insert(&metadata(3, "newest.webm")).await.unwrap();
        store.insert(&metadata(2, "middle.webm")).await.unwrap();

        let names: Vec<String> = store
            .list()
            .await
            .unwrap()
            .into_iter()
            .map(|m| m.file_name)
            .collect();
        assert_eq!(names, vec!["newest.webm", "middle.webm", "old.webm"]);
    }

    #[tokio::test]
    async fn test_insert_never_overwrites() {
        let store = MemoryMetadataStore::new();
        let original = metadata(1, "first.webm");
        assert!(store.insert(&original).await.unwrap());

        let mut replacement = original.clone();
        replacement.file_name = "second.webm".to_string();
        assert!(!store.insert(&replacement).await.unwrap());

        let stored = store.get(original.id).await.unwrap().unwrap();
        assert_eq!(stored.file_name, "first.webm");
    }

    #[tokio::test]
    async fn test_delete_reports_removal() {
        let store = MemoryMetadataStore::new();
        let row = metadata(1, "gone.webm");
        store.insert(&row).await.unwrap();

        assert!(store.delete(row.id).await.unwrap());
        assert!(!store.delete(row.id).await.unwrap());
        assert!(store.get(row.id).await.unwrap().is_none());
    }

    #[test]
    fn test_metadata_serializes_camel_case() {
        let json = serde_json::to_value(metadata(5, "clip.webm")).unwrap();
        assert!(json.get("createdAt").is_some());
        assert_eq!(json["fileName"], "clip.webm");
        assert_eq!(json["size"], 1024);
    }
}
