use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use vacsift_adapters::SearchSettings;

use crate::geography::GeographySettings;
use crate::retention::RetentionSettings;
use crate::salary::NormalizationSettings;

pub const SETTINGS_FILE: &str = "pipeline.yaml";

/// Tunables read from `pipeline.yaml`; every section falls back to its defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PipelineSettings {
    #[serde(default)]
    pub search: SearchSettings,
    #[serde(default)]
    pub normalization: NormalizationSettings,
    #[serde(default)]
    pub geography: GeographySettings,
    #[serde(default)]
    pub retention: RetentionSettings,
}

impl PipelineSettings {
    pub fn from_yaml_str(text: &str) -> Result<Self> {
        serde_yaml::from_str(text).context("parsing pipeline settings")
    }

    /// Load `pipeline.yaml` under `root`, or defaults when the file does not exist.
    pub async fn load(root: &Path) -> Result<Self> {
        let path = root.join(SETTINGS_FILE);
        if !tokio::fs::try_exists(&path)
            .await
            .with_context(|| format!("checking {}", path.display()))?
        {
            return Ok(Self::default());
        }
        let text = tokio::fs::read_to_string(&path)
            .await
            .with_context(|| format!("reading {}", path.display()))?;
        Self::from_yaml_str(&text).with_context(|| format!("in {}", path.display()))
    }
}
