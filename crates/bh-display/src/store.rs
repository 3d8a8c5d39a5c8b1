//! ---
//! bh_section: "05-networking-external-interfaces"
//! bh_subsection: "module"
//! bh_type: "source"
//! bh_scope: "code"
//! bh_description: "Document stores receiving periodic latest-reading documents."
//! bh_version: "v0.1.0"
//! bh_owner: "tbd"
//! ---
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;

use crate::latest::LatestReading;

/// Errors surfaced by a [`DocumentStore`].
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to encode document: {0}")]
    Encode(#[from] serde_json::Error),
}

/// One persisted latest-reading document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorDocument {
    pub timestamp: DateTime<Utc>,
    pub temperature: String,
    pub humidity: String,
    pub people_in_room: String,
}

impl SensorDocument {
    pub fn new(timestamp: DateTime<Utc>, reading: LatestReading) -> Self {
        Self {
            timestamp,
            temperature: reading.temperature,
            humidity: reading.humidity,
            people_in_room: reading.people_in_room,
        }
    }
}

/// Insert-only document storage.
#[async_trait]
pub trait DocumentStore: Send + Sync + 'static {
    async fn insert(&self, document: &SensorDocument) -> Result<(), StoreError>;
    fn name(&self) -> &'static str;
}

/// Appends one JSON document per line to a file.
#[derive(Debug, Clone)]
pub struct JsonLinesStore {
    path: PathBuf,
}

impl JsonLinesStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl DocumentStore for JsonLinesStore {
    async fn insert(&self, document: &SensorDocument) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        let mut line = serde_json::to_vec(document)?;
        line.push(b'\n');

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(&line).await?;
        file.flush().await?;
        Ok(())
    }

    fn name(&self) -> &'static str {
        "jsonl"
    }
}

/// Keeps documents in memory; handy for tests and throwaway runs.
#[derive(Debug, Default)]
pub struct MemoryStore {
    documents: Mutex<Vec<SensorDocument>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn documents(&self) -> Vec<SensorDocument> {
        self.documents.lock().clone()
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn insert(&self, document: &SensorDocument) -> Result<(), StoreError> {
        self.documents.lock().push(document.clone());
        Ok(())
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}
