//! Test doubles shared by the integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use tempfile::TempDir;

use uptime_service::AlertError;
use uptime_service::alerts::AlertSender;
use uptime_service::error::LogError;
use uptime_service::monitoring::types::CHECKS_COLLECTION;
use uptime_service::monitoring::{Check, ProbeOutcome, Prober};
use uptime_service::storage::{FileLogStore, LogStore, MemoryRecordStore, RecordStore};
use uptime_service::{Engine, EngineConfig};

pub const CHECK_ID: &str = "abc123abc123abc123ab";

pub fn check_record(id: &str) -> Value {
    json!({
        "id": id,
        "userPhone": "5551234567",
        "protocol": "https",
        "url": "example.com",
        "method": "get",
        "successCodes": [200],
        "timeoutSeconds": 3
    })
}

/// Returns a fixed outcome per check id, `Timeout` for unknown ids
#[derive(Default)]
pub struct ScriptedProber {
    outcomes: Mutex<HashMap<String, ProbeOutcome>>,
    pub calls: AtomicUsize,
}

impl ScriptedProber {
    pub fn with(id: &str, outcome: ProbeOutcome) -> Self {
        let prober = Self::default();
        prober.set(id, outcome);
        prober
    }

    pub fn set(&self, id: &str, outcome: ProbeOutcome) {
        self.outcomes.lock().unwrap().insert(id.to_string(), outcome);
    }
}

#[async_trait]
impl Prober for ScriptedProber {
    async fn probe(&self, check: &Check) -> ProbeOutcome {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.outcomes.lock().unwrap().get(&check.id).cloned().unwrap_or(ProbeOutcome::Timeout)
    }
}

/// Records every alert, optionally failing delivery
#[derive(Default)]
pub struct RecordingSender {
    pub sent: Mutex<Vec<(String, String)>>,
    pub fail_with_status: Option<u16>,
}

#[async_trait]
impl AlertSender for RecordingSender {
    async fn send(&self, phone: &str, message: &str) -> Result<(), AlertError> {
        self.sent.lock().unwrap().push((phone.to_string(), message.to_string()));
        match self.fail_with_status {
            Some(status) => Err(AlertError::Rejected { status }),
            None => Ok(()),
        }
    }
}

/// Wraps a [`FileLogStore`] and fails selected operations
pub struct FlakyLogStore {
    pub inner: FileLogStore,
    pub failing_truncates: AtomicUsize,
    pub fail_appends: bool,
    pub fail_compress_for: Option<String>,
}

impl FlakyLogStore {
    pub fn new(inner: FileLogStore) -> Self {
        Self { inner, failing_truncates: AtomicUsize::new(0), fail_appends: false, fail_compress_for: None }
    }
}

fn injected() -> LogError {
    LogError::Io(std::io::Error::other("injected failure"))
}

#[async_trait]
impl LogStore for FlakyLogStore {
    async fn append(&self, log_name: &str, line: &str) -> Result<(), LogError> {
        if self.fail_appends {
            return Err(injected());
        }
        self.inner.append(log_name, line).await
    }

    async fn list(&self, include_compressed: bool) -> Result<Vec<String>, LogError> {
        self.inner.list(include_compressed).await
    }

    async fn compress(&self, log_id: &str, archive_id: &str) -> Result<u64, LogError> {
        if self.fail_compress_for.as_deref() == Some(log_id) {
            return Err(injected());
        }
        self.inner.compress(log_id, archive_id).await
    }

    async fn truncate(&self, log_id: &str) -> Result<(), LogError> {
        let remaining = self.failing_truncates.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failing_truncates.store(remaining - 1, Ordering::SeqCst);
            return Err(injected());
        }
        self.inner.truncate(log_id).await
    }

    async fn pending_truncation(&self, log_id: &str) -> Result<Option<u64>, LogError> {
        self.inner.pending_truncation(log_id).await
    }

    async fn read(&self, log_id: &str) -> Result<String, LogError> {
        self.inner.read(log_id).await
    }

    async fn decompress(&self, archive_id: &str) -> Result<String, LogError> {
        self.inner.decompress(archive_id).await
    }
}

pub struct Harness {
    pub dir: TempDir,
    pub records: Arc<MemoryRecordStore>,
    pub logs: Arc<dyn LogStore>,
    pub sender: Arc<RecordingSender>,
    pub engine: Engine,
}

impl Harness {
    pub async fn file_logs() -> (TempDir, FileLogStore) {
        let dir = TempDir::new().unwrap();
        let logs = FileLogStore::new(dir.path()).await.unwrap();
        (dir, logs)
    }

    pub async fn new(prober: Arc<dyn Prober>) -> Self {
        let (dir, logs) = Self::file_logs().await;
        Self::with_parts(dir, Arc::new(logs), prober, Arc::new(RecordingSender::default()))
    }

    pub fn with_parts(
        dir: TempDir,
        logs: Arc<dyn LogStore>,
        prober: Arc<dyn Prober>,
        sender: Arc<RecordingSender>,
    ) -> Self {
        let records = Arc::new(MemoryRecordStore::new());
        let engine = Engine::new(
            records.clone(),
            logs.clone(),
            prober,
            sender.clone(),
            EngineConfig::default(),
        );
        Self { dir, records, logs, sender, engine }
    }

    pub async fn store(&self, record: Value) {
        let id = record["id"].as_str().unwrap().to_string();
        self.records.create(CHECKS_COLLECTION, &id, &record).await.unwrap();
    }

    pub async fn stored(&self, id: &str) -> Value {
        self.records.read(CHECKS_COLLECTION, id).await.unwrap()
    }

    pub async fn log_lines(&self, id: &str) -> Vec<Value> {
        match self.logs.read(id).await {
            Ok(text) => text.lines().map(|line| serde_json::from_str(line).unwrap()).collect(),
            Err(LogError::NotFound(_)) => Vec::new(),
            Err(e) => panic!("unexpected log error: {e}"),
        }
    }
}
