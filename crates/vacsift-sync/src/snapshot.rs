//! Per-run report files and the parquet hand-off snapshot.

use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use arrow_array::builder::{ListBuilder, StringBuilder};
use arrow_array::{ArrayRef, Int64Array, RecordBatch, StringArray};
use arrow_schema::{DataType, Field as ArrowField, Schema};
use parquet::arrow::ArrowWriter;
use serde::Serialize;
use sha2::{Digest, Sha256};
use tokio::fs;
use vacsift_core::EnrichedPosting;

use crate::SyncRunSummary;

#[derive(Debug, Clone, Serialize)]
pub struct ParquetManifest {
    pub schema_version: u32,
    pub files: Vec<ParquetManifestFile>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ParquetManifestFile {
    pub name: String,
    pub path: String,
    pub sha256: String,
    pub bytes: u64,
}

/// Write `postings.json`, `daily_brief.md`, and the parquet snapshot. Returns the manifest path.
pub(crate) async fn write_run_reports(
    reports_dir: &Path,
    summary: &SyncRunSummary,
    postings: &[EnrichedPosting],
) -> Result<PathBuf> {
    fs::create_dir_all(reports_dir)
        .await
        .with_context(|| format!("creating {}", reports_dir.display()))?;

    let postings_json = serde_json::to_vec_pretty(postings).context("serializing postings")?;
    fs::write(reports_dir.join("postings.json"), postings_json)
        .await
        .context("writing postings.json")?;

    fs::write(reports_dir.join("daily_brief.md"), daily_brief(summary))
        .await
        .context("writing daily_brief.md")?;

    export_parquet_snapshot(reports_dir, postings).await
}

pub(crate) async fn write_run_summary(reports_dir: &Path, summary: &SyncRunSummary) -> Result<()> {
    let bytes = serde_json::to_vec_pretty(summary).context("serializing run summary")?;
    fs::write(reports_dir.join("run_summary.json"), bytes)
        .await
        .context("writing run_summary.json")
}

fn daily_brief(summary: &SyncRunSummary) -> String {
    format!(
        "# Vacsift Daily Brief\n\n- Run ID: `{}`\n- Source: {}\n- Started: {}\n- Finished: {}\n- Postings fetched: {}\n- Details unavailable: {}\n- Persisted: {}\n- With salary: {}\n\n## Postings by Country\n{}\n",
        summary.run_id,
        summary.source_id,
        summary.started_at,
        summary.finished_at,
        summary.postings_fetched,
        summary.details_degraded,
        summary.persisted,
        summary.with_salary,
        summary
            .countries
            .iter()
            .map(|(country, count)| format!("- {country}: {count}"))
            .collect::<Vec<_>>()
            .join("\n")
    )
}

async fn export_parquet_snapshot(reports_dir: &Path, postings: &[EnrichedPosting]) -> Result<PathBuf> {
    let snapshot_dir = reports_dir.join("snapshots");
    fs::create_dir_all(&snapshot_dir)
        .await
        .with_context(|| format!("creating {}", snapshot_dir.display()))?;

    let postings_path = snapshot_dir.join("postings.parquet");
    write_parquet(&postings_path, postings_batch(postings)?)?;

    let manifest = ParquetManifest {
        schema_version: 1,
        files: vec![manifest_entry("postings", reports_dir, &postings_path)?],
    };
    let manifest_path = snapshot_dir.join("manifest.json");
    let bytes = serde_json::to_vec_pretty(&manifest).context("serializing parquet manifest")?;
    fs::write(&manifest_path, bytes)
        .await
        .with_context(|| format!("writing {}", manifest_path.display()))?;
    Ok(manifest_path)
}

fn optional_strings<'a>(
    postings: &'a [EnrichedPosting],
    field: impl Fn(&'a EnrichedPosting) -> Option<&'a str>,
) -> ArrayRef {
    Arc::new(StringArray::from(postings.iter().map(field).collect::<Vec<_>>()))
}

fn postings_batch(postings: &[EnrichedPosting]) -> Result<RecordBatch> {
    let skills_item = Arc::new(ArrowField::new("item", DataType::Utf8, true));
    let schema = Arc::new(Schema::new(vec![
        ArrowField::new("id", DataType::Utf8, false),
        ArrowField::new("title", DataType::Utf8, false),
        ArrowField::new("employer", DataType::Utf8, true),
        ArrowField::new("locality", DataType::Utf8, true),
        ArrowField::new("country", DataType::Utf8, false),
        ArrowField::new("salary_from", DataType::Int64, true),
        ArrowField::new("salary_to", DataType::Int64, true),
        ArrowField::new("experience", DataType::Utf8, true),
        ArrowField::new("published_at", DataType::Utf8, false),
        ArrowField::new("detail_url", DataType::Utf8, false),
        ArrowField::new("key_skills", DataType::List(skills_item), true),
        ArrowField::new("language", DataType::Utf8, true),
        ArrowField::new("language_level", DataType::Utf8, true),
        ArrowField::new("schedule", DataType::Utf8, true),
        ArrowField::new("description", DataType::Utf8, true),
    ]));

    let mut skills = ListBuilder::new(StringBuilder::new());
    for posting in postings {
        match &posting.key_skills {
            Some(names) => {
                for name in names {
                    skills.values().append_value(name);
                }
                skills.append(true);
            }
            None => skills.append(false),
        }
    }

    let columns: Vec<ArrayRef> = vec![
        optional_strings(postings, |p| Some(p.id.as_str())),
        optional_strings(postings, |p| Some(p.title.as_str())),
        optional_strings(postings, |p| p.employer.as_deref()),
        optional_strings(postings, |p| p.locality.as_deref()),
        optional_strings(postings, |p| Some(p.country.as_str())),
        Arc::new(Int64Array::from(postings.iter().map(|p| p.salary_from).collect::<Vec<_>>())),
        Arc::new(Int64Array::from(postings.iter().map(|p| p.salary_to).collect::<Vec<_>>())),
        optional_strings(postings, |p| p.experience.map(|e| e.as_str())),
        Arc::new(StringArray::from(
            postings
                .iter()
                .map(|p| Some(p.published_at.to_rfc3339()))
                .collect::<Vec<_>>(),
        )),
        optional_strings(postings, |p| Some(p.detail_url.as_str())),
        Arc::new(skills.finish()),
        optional_strings(postings, |p| p.language.as_deref()),
        optional_strings(postings, |p| p.language_level.as_deref()),
        optional_strings(postings, |p| p.schedule.as_deref()),
        optional_strings(postings, |p| p.description.as_deref()),
    ];

    RecordBatch::try_new(schema, columns).context("building postings record batch")
}

fn write_parquet(path: &Path, batch: RecordBatch) -> Result<()> {
    let file = File::create(path).with_context(|| format!("creating {}", path.display()))?;
    let mut writer = ArrowWriter::try_new(file, batch.schema(), None)
        .with_context(|| format!("opening parquet writer {}", path.display()))?;
    writer
        .write(&batch)
        .with_context(|| format!("writing record batch {}", path.display()))?;
    writer
        .close()
        .with_context(|| format!("closing parquet writer {}", path.display()))?;
    Ok(())
}

fn manifest_entry(name: &str, reports_dir: &Path, path: &Path) -> Result<ParquetManifestFile> {
    let bytes = std::fs::read(path).with_context(|| format!("reading {}", path.display()))?;
    let sha256 = hex::encode(Sha256::digest(&bytes));
    let rel = path
        .strip_prefix(reports_dir)
        .unwrap_or(path)
        .display()
        .to_string();
    Ok(ParquetManifestFile {
        name: name.to_string(),
        path: rel,
        sha256,
        bytes: bytes.len() as u64,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow_array::Array;
    use chrono::{FixedOffset, TimeZone, Utc};
    use uuid::Uuid;

    fn posting(id: &str, skills: Option<Vec<&str>>) -> EnrichedPosting {
        EnrichedPosting {
            id: id.to_string(),
            title: "Data Engineer".to_string(),
            employer: None,
            locality: Some("Москва".to_string()),
            country: "Россия".to_string(),
            salary_from: Some(1000),
            salary_to: None,
            experience: None,
            published_at: FixedOffset::east_opt(3 * 3600)
                .unwrap()
                .with_ymd_and_hms(2026, 3, 1, 9, 0, 0)
                .unwrap(),
            detail_url: format!("https://api.hh.ru/vacancies/{id}"),
            key_skills: skills.map(|s| s.into_iter().map(String::from).collect()),
            language: None,
            language_level: None,
            schedule: None,
            description: None,
        }
    }

    #[test]
    fn batch_carries_list_and_null_skills() {
        let batch = postings_batch(&[
            posting("1", Some(vec!["SQL", "Python"])),
            posting("2", None),
        ])
        .unwrap();
        assert_eq!(batch.num_rows(), 2);
        assert_eq!(batch.num_columns(), 15);
        let skills = batch.column_by_name("key_skills").unwrap();
        assert!(skills.is_valid(0));
        assert!(skills.is_null(1));
    }

    #[tokio::test]
    async fn reports_and_manifest_land_under_run_dir() {
        let dir = tempfile::tempdir().unwrap();
        let run_id = Uuid::new_v4();
        let reports_dir = dir.path().join(run_id.to_string());
        let summary = SyncRunSummary {
            run_id,
            started_at: Utc::now(),
            finished_at: Utc::now(),
            source_id: "fixture".into(),
            listing_pages: 1,
            archived_pages: 1,
            postings_fetched: 1,
            details_degraded: 0,
            persisted: 1,
            with_salary: 1,
            countries: [("Россия".to_string(), 1)].into_iter().collect(),
            reports_dir: reports_dir.display().to_string(),
            parquet_manifest: String::new(),
        };

        let manifest_path = write_run_reports(&reports_dir, &summary, &[posting("1", None)])
            .await
            .unwrap();
        write_run_summary(&reports_dir, &summary).await.unwrap();

        let brief = std::fs::read_to_string(reports_dir.join("daily_brief.md")).unwrap();
        assert!(brief.contains("- Россия: 1"));
        assert!(reports_dir.join("run_summary.json").exists());
        assert!(reports_dir.join("snapshots/postings.parquet").exists());

        let manifest: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(manifest_path).unwrap()).unwrap();
        assert_eq!(manifest["files"][0]["path"], "snapshots/postings.parquet");
        assert_eq!(manifest["files"][0]["sha256"].as_str().unwrap().len(), 64);
    }
}
