//! Watch analytics aggregation.
//!
//! Every write goes through [`AnalyticsStore::write_atomic`], which applies a
//! mutation to one record while holding that record exclusively. Concurrent
//! viewers of the same recording therefore never lose increments.

use crate::error::StoreError;
use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use sqlx::postgres::PgPool;
use sqlx::FromRow;
use std::sync::Arc;
use tracing::{debug, instrument};

/// Per-recording analytics
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyticsRecord {
    pub video_id: String,
    pub views: u64,
    /// Sum of the watched seconds of every sample
    pub total_watch_time: f64,
    /// Last known duration in seconds, 0 until first supplied
    pub duration: f64,
    /// Completion percentage of each sample, in arrival order
    pub watch_sessions: Vec<u8>,
}

impl AnalyticsRecord {
    /// Zero-valued record for an id that has never been observed
    pub fn empty(video_id: &str) -> Self {
        Self {
            video_id: video_id.to_string(),
            views: 0,
            total_watch_time: 0.0,
            duration: 0.0,
            watch_sessions: Vec::new(),
        }
    }

    /// Rounded mean of all completion samples, 0 when there are none
    pub fn average_completion(&self) -> u8 {
        if self.watch_sessions.is_empty() {
            return 0;
        }
        let sum: u64 = self.watch_sessions.iter().map(|&p| p as u64).sum();
        (sum as f64 / self.watch_sessions.len() as f64).round() as u8
    }

    fn apply_view(&mut self) {
        self.views += 1;
    }

    /// Fold one complete watch sample into the record.
    ///
    /// Negative or non-finite inputs are treated as zero so that
    /// `total_watch_time` never decreases and `duration` never regresses.
    fn apply_watch(&mut self, watched_seconds: f64, total_duration_seconds: f64) {
        let watched = non_negative(watched_seconds);
        let total = non_negative(total_duration_seconds);

        self.watch_sessions.push(completion_percentage(watched, total));
        self.total_watch_time += watched;
        if total > 0.0 {
            self.duration = total;
        }
    }

    pub fn summary(&self) -> AnalyticsSummary {
        AnalyticsSummary {
            views: self.views,
            total_watch_time: self.total_watch_time,
            duration: self.duration,
            average_completion: self.average_completion(),
            watch_sessions: self.watch_sessions.len(),
        }
    }
}

/// Read-side view of a record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyticsSummary {
    pub views: u64,
    pub total_watch_time: f64,
    pub duration: f64,
    pub average_completion: u8,
    /// Number of recorded watch samples
    pub watch_sessions: usize,
}

/// round(min(100, 100 * watched / total)), or 0 when total is not positive
pub fn completion_percentage(watched_seconds: f64, total_duration_seconds: f64) -> u8 {
    if !total_duration_seconds.is_finite() || total_duration_seconds <= 0.0 {
        return 0;
    }
    let watched = non_negative(watched_seconds);
    (100.0 * watched / total_duration_seconds).min(100.0).round() as u8
}

fn non_negative(value: f64) -> f64 {
    if value.is_finite() && value > 0.0 {
        value
    } else {
        0.0
    }
}

/// Mutation applied to one record under exclusive access
pub type Mutation = Box<dyn FnOnce(&mut AnalyticsRecord) + Send>;

/// Per-id keyed analytics persistence
#[async_trait]
pub trait AnalyticsStore: Send + Sync {
    /// Current record, or zero-valued defaults for an unknown id. Never
    /// creates a record.
    async fn read(&self, video_id: &str) -> Result<AnalyticsRecord, StoreError>;

    /// Apply `mutation` to the record for `video_id`, creating it first if
    /// needed, and return the stored result. Calls for the same id are
    /// serialized.
    async fn write_atomic(
        &self,
        video_id: &str,
        mutation: Mutation,
    ) -> Result<AnalyticsRecord, StoreError>;
}

/// In-process analytics store. The map entry lock serializes writers per id.
#[derive(Default)]
pub struct MemoryAnalyticsStore {
    records: DashMap<String, AnalyticsRecord>,
}

impl MemoryAnalyticsStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AnalyticsStore for MemoryAnalyticsStore {
    async fn read(&self, video_id: &str) -> Result<AnalyticsRecord, StoreError> {
        Ok(self
            .records
            .get(video_id)
            .map(|r| r.value().clone())
            .unwrap_or_else(|| AnalyticsRecord::empty(video_id)))
    }

    async fn write_atomic(
        &self,
        video_id: &str,
        mutation: Mutation,
    ) -> Result<AnalyticsRecord, StoreError> {
        let mut entry = self
            .records
            .entry(video_id.to_string())
            .or_insert_with(|| AnalyticsRecord::empty(video_id));
        mutation(entry.value_mut());
        Ok(entry.value().clone())
    }
}

#[derive(FromRow)]
struct AnalyticsRow {
    video_id: String,
    views: i64,
    total_watch_time: f64,
    duration: f64,
    watch_sessions: Vec<i32>,
}

impl From<AnalyticsRow> for AnalyticsRecord {
    fn from(row: AnalyticsRow) -> Self {
        Self {
            video_id: row.video_id,
            views: row.views.max(0) as u64,
            total_watch_time: row.total_watch_time,
            duration: row.duration,
            watch_sessions: row
                .watch_sessions
                .into_iter()
                .map(|p| p.clamp(0, 100) as u8)
                .collect(),
        }
    }
}

/// PostgreSQL analytics store. Writers take a row lock with
/// `SELECT .. FOR UPDATE` inside a transaction.
pub struct PgAnalyticsStore {
    pool: PgPool,
}

impl PgAnalyticsStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AnalyticsStore for PgAnalyticsStore {
    async fn read(&self, video_id: &str) -> Result<AnalyticsRecord, StoreError> {
        let row = sqlx::query_as::<_, AnalyticsRow>(
            r#"
            SELECT video_id, views, total_watch_time, duration, watch_sessions
            FROM video_analytics
            WHERE video_id = $1
            "#,
        )
        .bind(video_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row
            .map(AnalyticsRecord::from)
            .unwrap_or_else(|| AnalyticsRecord::empty(video_id)))
    }

    #[instrument(skip(self, mutation))]
    async fn write_atomic(
        &self,
        video_id: &str,
        mutation: Mutation,
    ) -> Result<AnalyticsRecord, StoreError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO video_analytics (video_id)
            VALUES ($1)
            ON CONFLICT (video_id) DO NOTHING
            "#,
        )
        .bind(video_id)
        .execute(&mut *tx)
        .await?;

        let row = sqlx::query_as::<_, AnalyticsRow>(
            r#"
            SELECT video_id, views, total_watch_time, duration, watch_sessions
            FROM video_analytics
            WHERE video_id = $1
            FOR UPDATE
            "#,
        )
        .bind(video_id)
        .fetch_one(&mut *tx)
        .await?;

        let mut record = AnalyticsRecord::from(row);
        mutation(&mut record);

        let sessions: Vec<i32> = record.watch_sessions.iter().map(|&p| p as i32).collect();
        sqlx::query(
            r#"
            UPDATE video_analytics
            SET views = $2,
                total_watch_time = $3,
                duration = $4,
                watch_sessions = $5,
                updated_at = NOW()
            WHERE video_id = $1
            "#,
        )
        .bind(video_id)
        .bind(record.views as i64)
        .bind(record.total_watch_time)
        .bind(record.duration)
        .bind(&sessions)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        debug!(views = record.views, sessions = sessions.len(), "Analytics record updated");
        Ok(record)
    }
}

/// Aggregates view and watch events into per-recording analytics
#[derive(Clone)]
pub struct AnalyticsEngine {
    store: Arc<dyn AnalyticsStore>,
}

impl AnalyticsEngine {
    pub fn new(store: Arc<dyn AnalyticsStore>) -> Self {
        Self { store }
    }

    /// Count one view
    #[instrument(skip(self))]
    pub async fn increment_view(&self, video_id: &str) -> Result<AnalyticsRecord, StoreError> {
        let record = self
            .store
            .write_atomic(video_id, Box::new(AnalyticsRecord::apply_view))
            .await?;

        metrics::counter!("analytics.views.recorded").increment(1);
        Ok(record)
    }

    /// Append one complete watch sample.
    ///
    /// `watched_seconds` is the cumulative playback position of the sample,
    /// not a delta since the previous sample.
    #[instrument(skip(self))]
    pub async fn record_watch_session(
        &self,
        video_id: &str,
        watched_seconds: f64,
        total_duration_seconds: f64,
    ) -> Result<AnalyticsRecord, StoreError> {
        let record = self
            .store
            .write_atomic(
                video_id,
                Box::new(move |record| {
                    record.apply_watch(watched_seconds, total_duration_seconds)
                }),
            )
            .await?;

        metrics::counter!("analytics.watch_sessions.recorded").increment(1);
        Ok(record)
    }

    /// Current record, zero-valued for unknown ids
    pub async fn read(&self, video_id: &str) -> Result<AnalyticsRecord, StoreError> {
        self.store.read(video_id).await
    }

    pub async fn average_completion(&self, video_id: &str) -> Result<u8, StoreError> {
        Ok(self.read(video_id).await?.average_completion())
    }
}
