//! Age-based pruning of the persisted collection.

use chrono::{DateTime, TimeDelta, Utc};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use vacsift_storage::PostingStore;

use crate::PipelineError;

pub const DEFAULT_HORIZON_DAYS: i64 = 90;

fn default_horizon_days() -> i64 {
    DEFAULT_HORIZON_DAYS
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetentionSettings {
    #[serde(default = "default_horizon_days")]
    pub horizon_days: i64,
}

impl Default for RetentionSettings {
    fn default() -> Self {
        Self {
            horizon_days: default_horizon_days(),
        }
    }
}

impl RetentionSettings {
    /// Negative or unrepresentable horizons are rejected.
    pub fn horizon(&self) -> Result<TimeDelta, PipelineError> {
        if self.horizon_days < 0 {
            return Err(PipelineError::InvalidSettings(format!(
                "retention horizon_days must not be negative, got {}",
                self.horizon_days
            )));
        }
        TimeDelta::try_days(self.horizon_days).ok_or_else(|| {
            PipelineError::InvalidSettings(format!(
                "retention horizon_days {} is out of range",
                self.horizon_days
            ))
        })
    }

    /// Postings published strictly before this instant are expired.
    pub fn cutoff(&self, now: DateTime<Utc>) -> Result<DateTime<Utc>, PipelineError> {
        let horizon = self.horizon()?;
        now.checked_sub_signed(horizon).ok_or_else(|| {
            PipelineError::InvalidSettings(format!(
                "retention horizon_days {} reaches before the earliest representable date",
                self.horizon_days
            ))
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PruneReport {
    pub cutoff: DateTime<Utc>,
    pub examined: usize,
    pub deleted: u64,
    pub failed: usize,
    /// Set when the store stopped yielding rows mid-pass.
    pub enumeration_error: Option<String>,
}

/// Stream expired postings and delete each one as it arrives.
///
/// Delete failures are counted and skipped. An enumeration failure ends the
/// pass early; anything left behind is picked up by the next run. An invalid
/// horizon fails before the store is touched.
pub async fn prune(
    store: &dyn PostingStore,
    now: DateTime<Utc>,
    settings: &RetentionSettings,
) -> Result<PruneReport, PipelineError> {
    let cutoff = settings.cutoff(now)?;
    let mut report = PruneReport {
        cutoff,
        examined: 0,
        deleted: 0,
        failed: 0,
        enumeration_error: None,
    };

    let mut expired = store.find_older_than(cutoff);
    while let Some(item) = expired.next().await {
        let row = match item {
            Ok(row) => row,
            Err(err) => {
                warn!(error = %err, "expired posting enumeration failed; ending prune pass");
                report.enumeration_error = Some(err.to_string());
                break;
            }
        };
        report.examined += 1;
        match store.delete_many(&[row.key]).await {
            Ok(removed) => {
                debug!(posting_id = %row.posting.id, published_at = %row.posting.published_at, "pruned");
                report.deleted += removed;
            }
            Err(err) => {
                report.failed += 1;
                warn!(posting_id = %row.posting.id, error = %err, "prune delete failed");
            }
        }
    }

    info!(
        cutoff = %report.cutoff,
        examined = report.examined,
        deleted = report.deleted,
        failed = report.failed,
        "prune pass finished"
    );
    Ok(report)
}
