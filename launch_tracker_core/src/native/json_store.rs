// JSON document store for completed tokens
//
// One file holds every record, split into `runners` and `flops`, plus
// aggregate counters. Each completion rewrites the file through a temp file
// and a rename so readers never see a partial document.

use crate::error::CoreError;
use crate::models::{CompletionReason, TokenRecord};
use crate::sink::CompletionSink;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::debug;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreStats {
    pub total: u64,
    pub runners: u64,
    pub flops: u64,
    pub target_reached: u64,
    pub max_age: u64,
    pub inactive: u64,
    pub last_updated: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecordDocument {
    pub stats: StoreStats,
    pub runners: Vec<TokenRecord>,
    pub flops: Vec<TokenRecord>,
}

impl RecordDocument {
    pub fn add(&mut self, record: TokenRecord, now: DateTime<Utc>) {
        self.stats.total += 1;
        match record.completion_reason {
            CompletionReason::TargetReached => self.stats.target_reached += 1,
            CompletionReason::MaxAge => self.stats.max_age += 1,
            CompletionReason::Inactive => self.stats.inactive += 1,
        }
        if record.is_runner {
            self.stats.runners += 1;
            self.runners.push(record);
        } else {
            self.stats.flops += 1;
            self.flops.push(record);
        }
        self.stats.last_updated = Some(now);
    }
}

/// File-backed [`CompletionSink`]
pub struct JsonFileStore {
    path: PathBuf,
    document: Mutex<RecordDocument>,
}

impl JsonFileStore {
    /// Open the store, loading the existing document if the file exists.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self, CoreError> {
        let path = path.into();
        let document = if tokio::fs::try_exists(&path).await.unwrap_or(false) {
            let json = tokio::fs::read_to_string(&path)
                .await
                .map_err(|e| CoreError::Io(format!("Failed to read {:?}: {}", path, e)))?;
            if json.trim().is_empty() {
                RecordDocument::default()
            } else {
                serde_json::from_str(&json)?
            }
        } else {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(|e| CoreError::Io(format!("Failed to create directory: {}", e)))?;
            }
            RecordDocument::default()
        };
        debug!(
            "Record store {:?} opened with {} records",
            path, document.stats.total
        );
        Ok(Self {
            path,
            document: Mutex::new(document),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn document(&self) -> RecordDocument {
        self.document.lock().await.clone()
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "records.json".into());
        name.push(".tmp");
        self.path.with_file_name(name)
    }

    async fn persist(&self, document: &RecordDocument) -> Result<(), CoreError> {
        let json = serde_json::to_string_pretty(document)?;
        let tmp = self.temp_path();
        tokio::fs::write(&tmp, json)
            .await
            .map_err(|e| CoreError::Io(format!("Failed to write {:?}: {}", tmp, e)))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(|e| CoreError::Io(format!("Failed to replace {:?}: {}", self.path, e)))?;
        Ok(())
    }
}

#[async_trait]
impl CompletionSink for JsonFileStore {
    async fn on_token_completed(&self, record: &TokenRecord) -> Result<(), CoreError> {
        let mut document = self.document.lock().await;
        document.add(record.clone(), Utc::now());
        self.persist(&document).await?;
        debug!(
            "Stored {} in {} ({} total)",
            record.mint,
            if record.is_runner { "runners" } else { "flops" },
            document.stats.total
        );
        Ok(())
    }
}
