//! The posting store port and its in-memory implementation.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::{self, BoxStream, StreamExt};
use thiserror::Error;
use tokio::sync::RwLock;
use uuid::Uuid;
use vacsift_core::{EnrichedPosting, StoredPosting};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("migration error: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("corrupt row {key}: {message}")]
    Corrupt { key: Uuid, message: String },
}

/// Persisted posting collection keyed by an opaque store key.
///
/// Every write is independent and idempotent; callers never rely on cross-record
/// transactions.
#[async_trait]
pub trait PostingStore: Send + Sync {
    /// Insert or replace postings by their store key. Returns the number written.
    async fn upsert_many(&self, postings: &[EnrichedPosting]) -> Result<usize, StoreError>;

    /// Every persisted posting, in insertion order.
    async fn find_all(&self) -> Result<Vec<StoredPosting>, StoreError>;

    /// Delete by key; missing keys are ignored. Returns the number actually removed.
    async fn delete_many(&self, keys: &[Uuid]) -> Result<u64, StoreError>;

    /// Stream postings published strictly before `cutoff`.
    fn find_older_than(&self, cutoff: DateTime<Utc>)
        -> BoxStream<'_, Result<StoredPosting, StoreError>>;
}

/// Process-local store. Upserts keep a replaced posting at its original position.
#[derive(Debug, Default)]
pub struct MemoryStore {
    rows: RwLock<Vec<StoredPosting>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed with already-keyed rows, e.g. to reproduce duplicates that share a detail URL.
    pub fn with_rows(rows: Vec<StoredPosting>) -> Self {
        Self {
            rows: RwLock::new(rows),
        }
    }

    pub async fn len(&self) -> usize {
        self.rows.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.rows.read().await.is_empty()
    }
}

#[async_trait]
impl PostingStore for MemoryStore {
    async fn upsert_many(&self, postings: &[EnrichedPosting]) -> Result<usize, StoreError> {
        let mut rows = self.rows.write().await;
        for posting in postings {
            let key = posting.store_key();
            match rows.iter_mut().find(|row| row.key == key) {
                Some(existing) => existing.posting = posting.clone(),
                None => rows.push(StoredPosting {
                    key,
                    posting: posting.clone(),
                }),
            }
        }
        Ok(postings.len())
    }

    async fn find_all(&self) -> Result<Vec<StoredPosting>, StoreError> {
        Ok(self.rows.read().await.clone())
    }

    async fn delete_many(&self, keys: &[Uuid]) -> Result<u64, StoreError> {
        let mut rows = self.rows.write().await;
        let before = rows.len();
        rows.retain(|row| !keys.contains(&row.key));
        Ok((before - rows.len()) as u64)
    }

    fn find_older_than(
        &self,
        cutoff: DateTime<Utc>,
    ) -> BoxStream<'_, Result<StoredPosting, StoreError>> {
        // Snapshot lazily on first poll so no lock is held while the caller deletes.
        stream::once(async move {
            let rows = self.rows.read().await;
            rows.iter()
                .filter(|row| row.posting.published_at < cutoff)
                .cloned()
                .map(Ok)
                .collect::<Vec<_>>()
        })
        .flat_map(stream::iter)
        .boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, FixedOffset, TimeZone};
    use futures::TryStreamExt;

    fn posting(id: &str, url: &str, published_day: u32) -> EnrichedPosting {
        let msk = FixedOffset::east_opt(3 * 3600).unwrap();
        EnrichedPosting {
            id: id.to_string(),
            title: "Data Engineer".to_string(),
            employer: Some("Acme".to_string()),
            locality: Some("Москва".to_string()),
            country: "Россия".to_string(),
            salary_from: None,
            salary_to: None,
            experience: None,
            published_at: msk.with_ymd_and_hms(2026, 3, published_day, 12, 0, 0).unwrap(),
            detail_url: url.to_string(),
            key_skills: None,
            language: None,
            language_level: None,
            schedule: None,
            description: None,
        }
    }

    #[tokio::test]
    async fn upsert_replaces_in_place_and_keeps_order() {
        let store = MemoryStore::new();
        store
            .upsert_many(&[posting("1", "u1", 1), posting("2", "u2", 2)])
            .await
            .unwrap();
        let mut updated = posting("1", "u1", 1);
        updated.title = "Senior Data Engineer".to_string();
        store.upsert_many(&[updated]).await.unwrap();

        let all = store.find_all().await.unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].posting.id, "1");
        assert_eq!(all[0].posting.title, "Senior Data Engineer");
        assert_eq!(all[1].posting.id, "2");
    }

    #[tokio::test]
    async fn delete_many_ignores_unknown_keys() {
        let store = MemoryStore::new();
        store.upsert_many(&[posting("1", "u1", 1)]).await.unwrap();
        let removed = store
            .delete_many(&[vacsift_core::posting_key("1"), Uuid::new_v4()])
            .await
            .unwrap();
        assert_eq!(removed, 1);
        assert!(store.is_empty().await);
        assert_eq!(store.delete_many(&[vacsift_core::posting_key("1")]).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn older_than_stream_allows_interleaved_deletes() {
        let store = MemoryStore::new();
        store
            .upsert_many(&[posting("1", "u1", 1), posting("2", "u2", 5), posting("3", "u3", 9)])
            .await
            .unwrap();
        let cutoff = posting("x", "x", 5).published_at.with_timezone(&Utc) + Duration::seconds(1);

        let mut stream = store.find_older_than(cutoff);
        let mut seen = Vec::new();
        while let Some(row) = stream.try_next().await.unwrap() {
            store.delete_many(&[row.key]).await.unwrap();
            seen.push(row.posting.id);
        }
        drop(stream);

        assert_eq!(seen, vec!["1".to_string(), "2".to_string()]);
        assert_eq!(store.len().await, 1);
    }
}
