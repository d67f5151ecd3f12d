use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Duration, FixedOffset, TimeZone, Utc};
use futures::stream::BoxStream;
use uuid::Uuid;
use vacsift_adapters::{
    AdapterError, FixtureSource, ListingBatch, RecordSource, SourceContext,
};
use vacsift_core::{DetailPayload, EnrichedPosting, RawPosting, StoredPosting};
use vacsift_storage::{MemoryStore, PostingStore, StoreError};
use vacsift_sync::{
    deduplicate, prune, run_daily_chain, PipelineError, PipelineSettings, ReferenceSource,
    RetentionSettings, SyncConfig, SyncPipeline,
};

fn fixtures() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("../../fixtures")
}

fn pipeline(
    dir: &Path,
    store: Arc<dyn PostingStore>,
    source: Box<dyn RecordSource>,
) -> SyncPipeline {
    let config = SyncConfig {
        workspace_root: dir.join("workspace"),
        artifacts_dir: dir.join("artifacts"),
        ..SyncConfig::from_lookup(|_| None)
    };
    SyncPipeline::new(config, PipelineSettings::default(), store)
        .expect("pipeline")
        .with_source(source)
        .with_reference(ReferenceSource::Files {
            rates_path: fixtures().join("rates/usd.json"),
            areas_path: fixtures().join("areas.json"),
        })
}

/// Serves fixed postings; every detail lookup fails.
struct StaticSource {
    postings: Vec<RawPosting>,
}

#[async_trait]
impl RecordSource for StaticSource {
    fn source_id(&self) -> &'static str {
        "static"
    }

    async fn fetch_postings(&self, _ctx: &SourceContext) -> Result<ListingBatch, AdapterError> {
        Ok(ListingBatch {
            pages: Vec::new(),
            postings: self.postings.clone(),
        })
    }

    async fn fetch_detail(
        &self,
        _ctx: &SourceContext,
        detail_url: &str,
    ) -> Result<DetailPayload, AdapterError> {
        Err(AdapterError::Message(format!("offline: {detail_url}")))
    }
}

fn raw(id: &str, url: &str, published_at: DateTime<FixedOffset>) -> RawPosting {
    RawPosting {
        id: id.to_string(),
        title: "Data Engineer".to_string(),
        employer: None,
        locality: Some("Москва".to_string()),
        salary_from: None,
        salary_to: None,
        currency: None,
        experience: None,
        published_at,
        detail_url: url.to_string(),
        detail: DetailPayload::default(),
    }
}

fn msk(day: u32, hour: u32) -> DateTime<FixedOffset> {
    FixedOffset::east_opt(3 * 3600)
        .unwrap()
        .with_ymd_and_hms(2026, 3, day, hour, 0, 0)
        .unwrap()
}

fn stored(id: &str, url: &str, published_at: DateTime<FixedOffset>) -> StoredPosting {
    StoredPosting::from(EnrichedPosting {
        id: id.to_string(),
        title: "Data Engineer".to_string(),
        employer: None,
        locality: None,
        country: "Страна не найдена".to_string(),
        salary_from: None,
        salary_to: None,
        experience: None,
        published_at,
        detail_url: url.to_string(),
        key_skills: None,
        language: None,
        language_level: None,
        schedule: None,
        description: None,
    })
}

fn by_id(rows: &[StoredPosting], id: &str) -> EnrichedPosting {
    rows.iter()
        .find(|row| row.posting.id == id)
        .map(|row| row.posting.clone())
        .unwrap_or_else(|| panic!("posting {id} not stored"))
}

#[tokio::test]
async fn fixture_run_enriches_persists_and_reports() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(MemoryStore::new());
    let source = FixtureSource::from_path(fixtures().join("hh/sample/bundle.json")).unwrap();
    let pipeline = pipeline(dir.path(), store.clone(), Box::new(source));

    let summary = pipeline.run_once().await.expect("sync run");
    assert_eq!(summary.postings_fetched, 4);
    assert_eq!(summary.persisted, 4);
    assert_eq!(summary.details_degraded, 1);
    assert_eq!(summary.archived_pages, 1);
    assert_eq!(summary.with_salary, 3);

    let rows = store.find_all().await.unwrap();
    assert_eq!(rows.len(), 4);

    let moscow = by_id(&rows, "101");
    assert_eq!(moscow.country, "Россия");
    assert_eq!((moscow.salary_from, moscow.salary_to), (Some(2000), Some(2860)));
    assert_eq!(
        moscow.key_skills,
        Some(vec!["Python".to_string(), "SQL".to_string(), "Apache Airflow".to_string()])
    );
    assert_eq!(moscow.language.as_deref(), Some("eng"));
    assert_eq!(moscow.language_level.as_deref(), Some("b1"));
    assert_eq!(moscow.schedule.as_deref(), Some("fullDay"));

    let minsk = by_id(&rows, "102");
    assert_eq!(minsk.country, "Беларусь");
    assert_eq!((minsk.salary_from, minsk.salary_to), (Some(1398), Some(2000)));
    assert_eq!(minsk.key_skills, None);
    assert_eq!(minsk.language, None);
    assert_eq!(minsk.schedule.as_deref(), Some("remote"));

    let almaty = by_id(&rows, "103");
    assert_eq!(almaty.country, "Казахстан");
    assert_eq!(almaty.salary_from, None);
    assert_eq!(almaty.key_skills, None);
    assert_eq!(almaty.description, None);

    let sukhum = by_id(&rows, "104");
    assert_eq!(sukhum.country, "Сухум");
    assert_eq!((sukhum.salary_from, sukhum.salary_to), (Some(3000), Some(4500)));
    assert_eq!(sukhum.description, None);

    let reports = PathBuf::from(&summary.reports_dir);
    for file in ["run_summary.json", "postings.json", "daily_brief.md", "snapshots/postings.parquet"] {
        assert!(reports.join(file).exists(), "{file} missing");
    }
    assert!(Path::new(&summary.parquet_manifest).exists());

    // Re-running replaces by source id and finds the raw page already archived.
    let again = pipeline.run_once().await.expect("second run");
    assert_eq!(again.archived_pages, 0);
    assert_eq!(store.len().await, 4);
}

#[tokio::test]
async fn newer_duplicate_survives_with_gap_filled_base_salary() {
    let dir = tempfile::tempdir().unwrap();
    let url = "https://api.hh.ru/vacancies/777";
    let mut newer = raw("a", url, msk(2, 12));
    newer.salary_from = Some(1000.0);
    newer.currency = Some("USD".into());
    let mut older = raw("b", url, msk(1, 12));
    older.salary_to = Some(2000.0);
    older.currency = Some("EUR".into());

    let store = Arc::new(MemoryStore::new());
    let pipeline = pipeline(
        dir.path(),
        store.clone(),
        Box::new(StaticSource {
            postings: vec![older, newer],
        }),
    );
    let summary = pipeline.run_once().await.expect("sync run");
    assert_eq!(summary.details_degraded, 2);
    assert_eq!(store.len().await, 2);

    let report = deduplicate(store.as_ref()).await.unwrap();
    assert_eq!(report.duplicate_groups, 1);
    assert_eq!(report.deleted, 1);

    let rows = store.find_all().await.unwrap();
    assert_eq!(rows.len(), 1);
    let survivor = &rows[0].posting;
    assert_eq!(survivor.id, "a");
    assert_eq!(survivor.salary_from, Some(1000));
    assert_eq!(survivor.salary_to, Some(1430));
    assert_eq!(survivor.country, "Россия");
    assert_eq!(survivor.key_skills, None);
}

#[tokio::test]
async fn unknown_currency_aborts_before_anything_is_persisted() {
    let dir = tempfile::tempdir().unwrap();
    let mut fine = raw("1", "u1", msk(1, 9));
    fine.salary_from = Some(1000.0);
    fine.currency = Some("USD".into());
    let mut exotic = raw("2", "u2", msk(1, 9));
    exotic.salary_to = Some(10.0);
    exotic.currency = Some("XAU".into());

    let store = Arc::new(MemoryStore::new());
    let pipeline = pipeline(
        dir.path(),
        store.clone(),
        Box::new(StaticSource {
            postings: vec![fine, exotic],
        }),
    );
    let err = pipeline.run_once().await.expect_err("run must fail");
    assert!(matches!(
        err.downcast_ref::<PipelineError>(),
        Some(PipelineError::UnknownCurrency { code, .. }) if code == "XAU"
    ));
    assert!(store.is_empty().await);
}

#[tokio::test]
async fn missing_rate_table_is_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(MemoryStore::new());
    let pipeline = pipeline(
        dir.path(),
        store.clone(),
        Box::new(StaticSource {
            postings: vec![raw("1", "u1", msk(1, 9))],
        }),
    )
    .with_reference(ReferenceSource::Files {
        rates_path: dir.path().join("no-such-rates.json"),
        areas_path: fixtures().join("areas.json"),
    });
    let err = pipeline.run_once().await.expect_err("run must fail");
    assert!(matches!(
        err.downcast_ref::<PipelineError>(),
        Some(PipelineError::RateTableUnavailable(_))
    ));
    assert!(store.is_empty().await);
}

#[tokio::test]
async fn dedup_keeps_latest_and_is_idempotent() {
    let url = "https://api.hh.ru/vacancies/1";
    let store = MemoryStore::with_rows(vec![
        stored("t1", url, msk(1, 9)),
        stored("t3", url, msk(3, 9)),
        stored("t2", url, msk(2, 9)),
        stored("solo", "https://api.hh.ru/vacancies/2", msk(1, 9)),
    ]);

    let first = deduplicate(&store).await.unwrap();
    assert_eq!(first.deleted, 2);
    let ids: Vec<_> = store
        .find_all()
        .await
        .unwrap()
        .into_iter()
        .map(|row| row.posting.id)
        .collect();
    assert_eq!(ids, vec!["t3".to_string(), "solo".to_string()]);

    let second = deduplicate(&store).await.unwrap();
    assert_eq!(second.duplicate_groups, 0);
    assert_eq!(second.deleted, 0);
}

#[tokio::test]
async fn prune_removes_only_postings_strictly_past_the_horizon() {
    let now = Utc.with_ymd_and_hms(2026, 6, 1, 12, 0, 0).unwrap();
    let at_age = |days: i64| (now - Duration::days(days)).fixed_offset();
    let store = MemoryStore::with_rows(vec![
        stored("89", "u89", at_age(89)),
        stored("90", "u90", at_age(90)),
        stored("91", "u91", at_age(91)),
    ]);

    let report = prune(&store, now, &RetentionSettings::default())
        .await
        .unwrap();
    assert_eq!(report.examined, 1);
    assert_eq!(report.deleted, 1);
    assert_eq!(report.failed, 0);

    let remaining: HashSet<_> = store
        .find_all()
        .await
        .unwrap()
        .into_iter()
        .map(|row| row.posting.id)
        .collect();
    assert_eq!(remaining, HashSet::from(["89".to_string(), "90".to_string()]));
}

#[tokio::test]
async fn negative_horizon_is_refused_without_deleting_anything() {
    let now = Utc.with_ymd_and_hms(2026, 6, 1, 12, 0, 0).unwrap();
    let store = MemoryStore::with_rows(vec![
        stored("today", "u1", now.fixed_offset()),
        stored("yesterday", "u2", (now - Duration::days(1)).fixed_offset()),
    ]);

    let err = prune(&store, now, &RetentionSettings { horizon_days: -30 })
        .await
        .unwrap_err();
    assert!(matches!(err, PipelineError::InvalidSettings(_)));
    let err = prune(&store, now, &RetentionSettings { horizon_days: 200_000_000_000 })
        .await
        .unwrap_err();
    assert!(matches!(err, PipelineError::InvalidSettings(_)));
    assert_eq!(store.find_all().await.unwrap().len(), 2);

    let dir = tempfile::tempdir().unwrap();
    let mut settings = PipelineSettings::default();
    settings.retention.horizon_days = -1;
    let built = SyncPipeline::new(
        SyncConfig {
            workspace_root: dir.path().join("workspace"),
            artifacts_dir: dir.path().join("artifacts"),
            ..SyncConfig::from_lookup(|_| None)
        },
        settings,
        Arc::new(MemoryStore::new()),
    );
    assert!(built.is_err());
}

/// Wraps a memory store and fails deletes touching `poisoned` keys while `failing` is set.
struct FlakyStore {
    inner: MemoryStore,
    poisoned: Mutex<HashSet<Uuid>>,
    failing: AtomicBool,
}

impl FlakyStore {
    fn new(inner: MemoryStore, poisoned: impl IntoIterator<Item = Uuid>) -> Self {
        Self {
            inner,
            poisoned: Mutex::new(poisoned.into_iter().collect()),
            failing: AtomicBool::new(true),
        }
    }

    fn recover(&self) {
        self.failing.store(false, Ordering::SeqCst);
    }
}

#[async_trait]
impl PostingStore for FlakyStore {
    async fn upsert_many(&self, postings: &[EnrichedPosting]) -> Result<usize, StoreError> {
        self.inner.upsert_many(postings).await
    }

    async fn find_all(&self) -> Result<Vec<StoredPosting>, StoreError> {
        self.inner.find_all().await
    }

    async fn delete_many(&self, keys: &[Uuid]) -> Result<u64, StoreError> {
        let poisoned = {
            let guard = self.poisoned.lock().unwrap();
            keys.iter().any(|key| guard.contains(key))
        };
        if poisoned && self.failing.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("injected delete failure".into()));
        }
        self.inner.delete_many(keys).await
    }

    fn find_older_than(
        &self,
        cutoff: DateTime<Utc>,
    ) -> BoxStream<'_, Result<StoredPosting, StoreError>> {
        self.inner.find_older_than(cutoff)
    }
}

#[tokio::test]
async fn failed_dedup_group_is_skipped_then_converges() {
    let rows = vec![
        stored("a1", "ua", msk(1, 9)),
        stored("a2", "ua", msk(2, 9)),
        stored("b1", "ub", msk(1, 9)),
        stored("b2", "ub", msk(2, 9)),
    ];
    let poisoned = rows[0].key;
    let store = FlakyStore::new(MemoryStore::with_rows(rows), [poisoned]);

    let first = deduplicate(&store).await.unwrap();
    assert_eq!(first.duplicate_groups, 2);
    assert_eq!(first.failed_groups, 1);
    assert_eq!(first.deleted, 1);
    assert_eq!(store.inner.len().await, 3);

    store.recover();
    let second = deduplicate(&store).await.unwrap();
    assert_eq!(second.failed_groups, 0);
    assert_eq!(second.deleted, 1);
    let ids: Vec<_> = store
        .find_all()
        .await
        .unwrap()
        .into_iter()
        .map(|row| row.posting.id)
        .collect();
    assert_eq!(ids, vec!["a2".to_string(), "b2".to_string()]);
}

#[tokio::test]
async fn failed_prune_delete_does_not_stop_the_pass() {
    let now = Utc.with_ymd_and_hms(2026, 6, 1, 12, 0, 0).unwrap();
    let old = (now - Duration::days(120)).fixed_offset();
    let rows = vec![stored("1", "u1", old), stored("2", "u2", old), stored("3", "u3", old)];
    let poisoned = rows[1].key;
    let store = FlakyStore::new(MemoryStore::with_rows(rows), [poisoned]);

    let report = prune(&store, now, &RetentionSettings::default())
        .await
        .unwrap();
    assert_eq!(report.examined, 3);
    assert_eq!(report.deleted, 2);
    assert_eq!(report.failed, 1);
    assert!(report.enumeration_error.is_none());

    store.recover();
    let retry = prune(&store, now, &RetentionSettings::default())
        .await
        .unwrap();
    assert_eq!(retry.deleted, 1);
    assert!(store.inner.is_empty().await);
}

#[tokio::test]
async fn daily_chain_runs_sync_dedup_then_prune() {
    let dir = tempfile::tempdir().unwrap();
    let recent = Utc::now().fixed_offset();
    let url = "https://api.hh.ru/vacancies/42";
    let store = Arc::new(MemoryStore::with_rows(vec![
        stored("ancient", "https://api.hh.ru/vacancies/1", (Utc::now() - Duration::days(200)).fixed_offset()),
        stored("stale-copy", url, recent - Duration::days(1)),
    ]));
    let pipeline = pipeline(
        dir.path(),
        store.clone(),
        Box::new(StaticSource {
            postings: vec![raw("fresh-copy", url, recent)],
        }),
    );

    let report = run_daily_chain(&pipeline).await.expect("daily chain");
    assert_eq!(report.sync.persisted, 1);
    assert_eq!(report.dedup.as_ref().map(|d| d.deleted), Some(1));
    assert_eq!(report.prune.deleted, 1);

    let ids: Vec<_> = store
        .find_all()
        .await
        .unwrap()
        .into_iter()
        .map(|row| row.posting.id)
        .collect();
    assert_eq!(ids, vec!["fresh-copy".to_string()]);
}
