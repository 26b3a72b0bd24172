//! Log rotation: archive every active segment, then truncate it.
//!
//! A log whose compression fails keeps its active segment untouched for
//! this cycle. A log left with a pending truncation by an earlier cycle has
//! that truncation finished first, so its archived lines are not archived
//! again.

use std::sync::Arc;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::error::EngineError;
use crate::storage::LogStore;

/// Archive name for a log rotated at `now_ms`
pub fn archive_name(log_id: &str, now_ms: i64) -> String {
    format!("{log_id}-{now_ms}")
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rotated {
    pub log_id: String,
    pub archive_id: String,
    pub bytes: u64,
    /// An interrupted truncation from an earlier cycle was completed first
    pub resumed: bool,
}

#[derive(Debug, Default)]
pub struct RotationReport {
    pub rotated: Vec<Rotated>,
    pub failures: Vec<EngineError>,
}

pub struct LogRotator {
    logs: Arc<dyn LogStore>,
}

impl LogRotator {
    pub fn new(logs: Arc<dyn LogStore>) -> Self {
        Self { logs }
    }

    /// Rotate a single active segment
    pub async fn rotate_one(&self, log_id: &str, now_ms: i64) -> Result<Rotated, EngineError> {
        let rotation = |source| EngineError::Rotation { log_id: log_id.to_string(), source };

        let resumed = match self.logs.pending_truncation(log_id).await.map_err(rotation)? {
            Some(bytes) => {
                warn!("Log {} has {} archived bytes still untruncated, finishing", log_id, bytes);
                self.logs.truncate(log_id).await.map_err(rotation)?;
                true
            }
            None => false,
        };

        let archive_id = archive_name(log_id, now_ms);
        let bytes = self.logs.compress(log_id, &archive_id).await.map_err(rotation)?;
        self.logs.truncate(log_id).await.map_err(rotation)?;

        debug!("Rotated log {} into {} ({} bytes)", log_id, archive_id, bytes);
        Ok(Rotated { log_id: log_id.to_string(), archive_id, bytes, resumed })
    }

    /// Rotate every active segment, each in its own task
    pub async fn rotate_all(self: &Arc<Self>) -> RotationReport {
        let mut report = RotationReport::default();

        let logs = match self.logs.list(false).await {
            Ok(logs) => logs,
            Err(source) => {
                error!("Could not list logs to rotate: {}", source);
                report.failures.push(EngineError::ListLogs(source));
                return report;
            }
        };
        if logs.is_empty() {
            info!("No logs to rotate");
            return report;
        }

        let now_ms = chrono::Utc::now().timestamp_millis();
        let mut tasks = JoinSet::new();
        for log_id in logs {
            let rotator = Arc::clone(self);
            tasks.spawn(async move { rotator.rotate_one(&log_id, now_ms).await });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(Ok(rotated)) => report.rotated.push(rotated),
                Ok(Err(e)) => {
                    error!("{}", e);
                    report.failures.push(e);
                }
                Err(e) => error!("Rotation task panicked: {}", e),
            }
        }

        info!(
            "Log rotation completed: {} rotated, {} failed",
            report.rotated.len(),
            report.failures.len()
        );
        report
    }
}
