//! Identity deduplication over the persisted collection.
//!
//! Postings sharing a detail URL are one listing. The most recently published
//! copy survives; equal timestamps keep whichever was stored first.

use std::collections::BTreeMap;

use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;
use vacsift_core::StoredPosting;
use vacsift_storage::{PostingStore, StoreError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DuplicateGroup {
    pub detail_url: String,
    pub keep: Uuid,
    pub delete: Vec<Uuid>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DedupReport {
    pub postings_scanned: usize,
    pub duplicate_groups: usize,
    pub deleted: u64,
    pub failed_groups: usize,
}

/// Group rows (given in insertion order) by detail URL and pick each group's survivor.
/// Groups of one are omitted.
pub fn plan_deletions(rows: &[StoredPosting]) -> Vec<DuplicateGroup> {
    let mut by_url: BTreeMap<&str, Vec<&StoredPosting>> = BTreeMap::new();
    for row in rows {
        by_url.entry(row.posting.detail_url.as_str()).or_default().push(row);
    }

    by_url
        .into_iter()
        .filter(|(_, group)| group.len() > 1)
        .filter_map(|(detail_url, group)| {
            let survivor = group.iter().copied().reduce(|best, candidate| {
                // Strictly newer replaces; ties keep the earlier row.
                if candidate.posting.published_at > best.posting.published_at {
                    candidate
                } else {
                    best
                }
            })?;
            Some(DuplicateGroup {
                detail_url: detail_url.to_string(),
                keep: survivor.key,
                delete: group
                    .iter()
                    .filter(|row| row.key != survivor.key)
                    .map(|row| row.key)
                    .collect(),
            })
        })
        .collect()
}

/// One dedup pass. A failed group delete is logged and skipped; rerunning converges.
pub async fn deduplicate(store: &dyn PostingStore) -> Result<DedupReport, StoreError> {
    let rows = store.find_all().await?;
    let groups = plan_deletions(&rows);
    let mut report = DedupReport {
        postings_scanned: rows.len(),
        duplicate_groups: groups.len(),
        ..Default::default()
    };

    for group in &groups {
        match store.delete_many(&group.delete).await {
            Ok(removed) => report.deleted += removed,
            Err(err) => {
                report.failed_groups += 1;
                warn!(
                    detail_url = %group.detail_url,
                    error = %err,
                    "duplicate group delete failed; leaving it for the next pass"
                );
            }
        }
    }

    info!(
        scanned = report.postings_scanned,
        groups = report.duplicate_groups,
        deleted = report.deleted,
        failed = report.failed_groups,
        "dedup pass finished"
    );
    Ok(report)
}
