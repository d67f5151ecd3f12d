//! Postgres-backed posting store.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, Utc};
use futures::stream::{BoxStream, StreamExt};
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::types::Json;
use sqlx::Row;
use tracing::debug;
use uuid::Uuid;
use vacsift_core::{EnrichedPosting, ExperienceBucket, StoredPosting};

use crate::store::{PostingStore, StoreError};

macro_rules! select_postings {
    () => {
        "SELECT id, source_posting_id, title, employer, locality, country, salary_from, salary_to, \
         experience, published_at, published_offset_secs, detail_url, key_skills, language, \
         language_level, schedule, description FROM postings"
    };
}

const FIND_ALL_SQL: &str = concat!(select_postings!(), " ORDER BY seq");
const FIND_OLDER_SQL: &str = concat!(select_postings!(), " WHERE published_at < $1 ORDER BY seq");

const UPSERT_SQL: &str = "INSERT INTO postings (id, source_posting_id, title, employer, locality, \
     country, salary_from, salary_to, experience, published_at, published_offset_secs, detail_url, \
     key_skills, language, language_level, schedule, description) \
     VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17) \
     ON CONFLICT (id) DO UPDATE SET source_posting_id = EXCLUDED.source_posting_id, \
     title = EXCLUDED.title, employer = EXCLUDED.employer, locality = EXCLUDED.locality, \
     country = EXCLUDED.country, salary_from = EXCLUDED.salary_from, \
     salary_to = EXCLUDED.salary_to, experience = EXCLUDED.experience, \
     published_at = EXCLUDED.published_at, \
     published_offset_secs = EXCLUDED.published_offset_secs, detail_url = EXCLUDED.detail_url, \
     key_skills = EXCLUDED.key_skills, language = EXCLUDED.language, \
     language_level = EXCLUDED.language_level, schedule = EXCLUDED.schedule, \
     description = EXCLUDED.description";

/// Posting store over a `postings` table; insertion order is tracked by `seq`.
///
/// Streaming reads and deletes run on separate pool connections, so the pool
/// needs at least two.
#[derive(Debug, Clone)]
pub struct PgPostingStore {
    pool: PgPool,
}

impl PgPostingStore {
    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(4)
            .acquire_timeout(Duration::from_secs(10))
            .connect(database_url)
            .await?;
        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::migrate!("../../migrations").run(&self.pool).await?;
        Ok(())
    }
}

#[async_trait]
impl PostingStore for PgPostingStore {
    async fn upsert_many(&self, postings: &[EnrichedPosting]) -> Result<usize, StoreError> {
        let mut written = 0usize;
        for posting in postings {
            sqlx::query(UPSERT_SQL)
                .bind(posting.store_key())
                .bind(&posting.id)
                .bind(&posting.title)
                .bind(posting.employer.as_deref())
                .bind(posting.locality.as_deref())
                .bind(&posting.country)
                .bind(posting.salary_from)
                .bind(posting.salary_to)
                .bind(posting.experience.map(|e| e.as_str()))
                .bind(posting.published_at.with_timezone(&Utc))
                .bind(posting.published_at.offset().local_minus_utc())
                .bind(&posting.detail_url)
                .bind(posting.key_skills.as_ref().map(Json))
                .bind(posting.language.as_deref())
                .bind(posting.language_level.as_deref())
                .bind(posting.schedule.as_deref())
                .bind(posting.description.as_deref())
                .execute(&self.pool)
                .await?;
            written += 1;
        }
        debug!(written, "upserted postings");
        Ok(written)
    }

    async fn find_all(&self) -> Result<Vec<StoredPosting>, StoreError> {
        let rows = sqlx::query(FIND_ALL_SQL).fetch_all(&self.pool).await?;
        rows.iter().map(row_to_stored).collect()
    }

    async fn delete_many(&self, keys: &[Uuid]) -> Result<u64, StoreError> {
        if keys.is_empty() {
            return Ok(0);
        }
        let result = sqlx::query("DELETE FROM postings WHERE id = ANY($1)")
            .bind(keys.to_vec())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    fn find_older_than(
        &self,
        cutoff: DateTime<Utc>,
    ) -> BoxStream<'_, Result<StoredPosting, StoreError>> {
        sqlx::query(FIND_OLDER_SQL)
            .bind(cutoff)
            .fetch(&self.pool)
            .map(|row| row.map_err(StoreError::from).and_then(|row| row_to_stored(&row)))
            .boxed()
    }
}

fn row_to_stored(row: &PgRow) -> Result<StoredPosting, StoreError> {
    let key: Uuid = row.try_get("id")?;
    let published_utc: DateTime<Utc> = row.try_get("published_at")?;
    let offset_secs: i32 = row.try_get("published_offset_secs")?;
    let offset = FixedOffset::east_opt(offset_secs).ok_or_else(|| StoreError::Corrupt {
        key,
        message: format!("utc offset {offset_secs}s out of range"),
    })?;
    let experience = match row.try_get::<Option<String>, _>("experience")? {
        Some(id) => Some(ExperienceBucket::from_api_id(&id).ok_or_else(|| StoreError::Corrupt {
            key,
            message: format!("unknown experience bucket {id:?}"),
        })?),
        None => None,
    };
    let key_skills: Option<Json<Vec<String>>> = row.try_get("key_skills")?;

    Ok(StoredPosting {
        key,
        posting: EnrichedPosting {
            id: row.try_get("source_posting_id")?,
            title: row.try_get("title")?,
            employer: row.try_get("employer")?,
            locality: row.try_get("locality")?,
            country: row.try_get("country")?,
            salary_from: row.try_get("salary_from")?,
            salary_to: row.try_get("salary_to")?,
            experience,
            published_at: published_utc.with_timezone(&offset),
            detail_url: row.try_get("detail_url")?,
            key_skills: key_skills.map(|Json(skills)| skills),
            language: row.try_get("language")?,
            language_level: row.try_get("language_level")?,
            schedule: row.try_get("schedule")?,
            description: row.try_get("description")?,
        },
    })
}
