// Completion sink abstraction - where finalized token records go

use crate::error::CoreError;
use crate::models::TokenRecord;
use async_trait::async_trait;
use std::sync::Mutex;

/// Receives every completed token exactly once.
#[async_trait]
pub trait CompletionSink: Send + Sync {
    async fn on_token_completed(&self, record: &TokenRecord) -> Result<(), CoreError>;
}

/// Keeps records in memory. Used by tests and by embedders that read records back directly.
#[derive(Debug, Default)]
pub struct MemorySink {
    records: Mutex<Vec<TokenRecord>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<TokenRecord> {
        self.records
            .lock()
            .map(|r| r.clone())
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.records.lock().map(|r| r.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl CompletionSink for MemorySink {
    async fn on_token_completed(&self, record: &TokenRecord) -> Result<(), CoreError> {
        let mut records = self
            .records
            .lock()
            .map_err(|e| CoreError::Sink(format!("memory sink poisoned: {}", e)))?;
        records.push(record.clone());
        Ok(())
    }
}
