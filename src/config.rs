//! Service configuration
//!
//! Every field has a default, so a partial JSON document (or none at all)
//! is a valid configuration.
use super::creation::CreationLimits;
use anyhow::Context;
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, rename_all = "snake_case")]
pub struct TripConfig {
    /// sled database directory
    pub database_path: PathBuf,
    /// Candidates stored on a trip at creation time
    pub max_candidates: usize,
    pub require_verified_guides: bool,
    /// How far ahead of now a trip must start
    pub min_start_lead_minutes: u32,
    pub max_duration_minutes: u32,
}

impl Default for TripConfig {
    fn default() -> Self {
        Self {
            database_path: PathBuf::from("trips.db"),
            max_candidates: 20,
            require_verified_guides: true,
            min_start_lead_minutes: 0,
            max_duration_minutes: 24 * 60,
        }
    }
}

impl TripConfig {
    pub fn from_json_str(raw: &str) -> anyhow::Result<Self> {
        serde_json::from_str(raw).context("invalid trip service configuration")
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        Self::from_json_str(&raw)
    }

    pub fn creation_limits(&self) -> CreationLimits {
        CreationLimits {
            min_start_lead: chrono::Duration::minutes(i64::from(self.min_start_lead_minutes)),
            max_duration_minutes: self.max_duration_minutes,
        }
    }
}
