//! Per-check evaluation: state transition, alert decision, log and persist.

use std::sync::Arc;
use tracing::{debug, error, info, warn};

use super::checker::Prober;
use super::types::{CHECKS_COLLECTION, Check, CheckState, LogEntry, ProbeOutcome};
use super::validation::validate_check_record;
use crate::alerts::AlertSender;
use crate::error::{AlertError, EngineError, LogError, StoreError, ValidationError};
use crate::storage::{KeyedLocks, LogStore, RecordStore};

/// Pure result of applying one probe outcome to a check
#[derive(Debug, Clone, PartialEq)]
pub struct Evaluation {
    /// The check before this evaluation
    pub previous: Check,
    /// The check with new `state` and `lastChecked`
    pub updated: Check,
    pub outcome: ProbeOutcome,
    pub alert: bool,
    pub time: i64,
}

/// Apply a probe outcome to a check.
///
/// The new state is `up` only for a response whose status is one of the
/// check's success codes. An alert is warranted when the check has been
/// evaluated before and the state changed.
pub fn evaluate(check: &Check, outcome: ProbeOutcome, now_ms: i64) -> Evaluation {
    let state = match outcome.status() {
        Some(status) if check.accepts(status) => CheckState::Up,
        _ => CheckState::Down,
    };
    let alert = check.last_checked.is_some() && check.state != state;

    let mut updated = check.clone();
    updated.state = state;
    updated.last_checked = Some(now_ms);

    Evaluation { previous: check.clone(), updated, outcome, alert, time: now_ms }
}

impl Evaluation {
    pub fn log_entry(&self) -> LogEntry {
        LogEntry {
            check: self.previous.clone(),
            outcome: self.outcome.clone(),
            state: self.updated.state,
            alert: self.alert,
            time: self.time,
        }
    }
}

/// What happened to the alert of one evaluation
#[derive(Debug)]
pub enum AlertStatus {
    NotWarranted,
    Delivered,
    Failed(AlertError),
}

/// Summary of one completed evaluation
#[derive(Debug)]
pub struct Evaluated {
    pub check_id: String,
    pub state: CheckState,
    pub outcome: ProbeOutcome,
    pub alert: AlertStatus,
}

/// Runs the read → validate → probe → log → persist → alert sequence for
/// one check id.
///
/// The sequence for a given id runs under a per-id lock, so two overlapping
/// sweeps evaluate the same check one after the other instead of racing on
/// the read-modify-write of its record.
pub struct CheckEvaluator {
    records: Arc<dyn RecordStore>,
    logs: Arc<dyn LogStore>,
    prober: Arc<dyn Prober>,
    alerts: Arc<dyn AlertSender>,
    locks: KeyedLocks,
}

impl CheckEvaluator {
    pub fn new(
        records: Arc<dyn RecordStore>,
        logs: Arc<dyn LogStore>,
        prober: Arc<dyn Prober>,
        alerts: Arc<dyn AlertSender>,
    ) -> Self {
        Self { records, logs, prober, alerts, locks: KeyedLocks::new() }
    }

    pub async fn run(&self, id: &str) -> Result<Evaluated, EngineError> {
        let guard = self.locks.lock(id).await;

        let record = self
            .records
            .read(CHECKS_COLLECTION, id)
            .await
            .map_err(|source| {
                error!("Could not read check {}: {}", id, source);
                EngineError::Read { id: id.to_string(), source }
            })?;

        // The log and the update are keyed by the body's id
        let check = validate_check_record(&record)
            .and_then(|check| {
                if check.id == id { Ok(check) } else { Err(ValidationError::IdMismatch { id: check.id }) }
            })
            .map_err(|source| {
                warn!("Skipping check {}: {}", id, source);
                EngineError::Validation { id: id.to_string(), source }
            })?;

        let outcome = self.prober.probe(&check).await;
        let evaluation = evaluate(&check, outcome, chrono::Utc::now().timestamp_millis());

        self.append_log(&evaluation).await.map_err(|source| {
            error!("Log append failed for check {}, abandoning evaluation: {}", id, source);
            EngineError::LogAppend { id: id.to_string(), source }
        })?;

        self.persist(&evaluation.updated).await.map_err(|source| {
            error!("Failed to save updates to check {}: {}", id, source);
            EngineError::Persistence { id: id.to_string(), source }
        })?;
        drop(guard);

        info!(
            "Check {} is {} ({}){}",
            id,
            evaluation.updated.state,
            evaluation.outcome,
            if evaluation.alert { ", state changed" } else { "" }
        );

        let alert = if evaluation.alert {
            self.dispatch_alert(&evaluation.updated).await
        } else {
            debug!("Check {} outcome has not changed, no alert needed", id);
            AlertStatus::NotWarranted
        };

        Ok(Evaluated {
            check_id: evaluation.updated.id.clone(),
            state: evaluation.updated.state,
            outcome: evaluation.outcome,
            alert,
        })
    }

    async fn append_log(&self, evaluation: &Evaluation) -> Result<(), LogError> {
        let line = serde_json::to_string(&evaluation.log_entry())?;
        self.logs.append(&evaluation.previous.id, &line).await
    }

    async fn persist(&self, check: &Check) -> Result<(), StoreError> {
        let value = serde_json::to_value(check)?;
        self.records.update(CHECKS_COLLECTION, &check.id, &value).await
    }

    async fn dispatch_alert(&self, check: &Check) -> AlertStatus {
        let message = check.alert_message();
        match self.alerts.send(&check.user_phone, &message).await {
            Ok(()) => {
                info!("User was alerted to a status change in check {}: {}", check.id, message);
                AlertStatus::Delivered
            }
            Err(e) => {
                error!("Could not send alert for check {}: {}", check.id, e);
                AlertStatus::Failed(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitoring::types::{HttpMethod, Protocol};
    use crate::storage::{FileLogStore, MemoryRecordStore};
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::Mutex;
    use tempfile::TempDir;

    const ID: &str = "abc123abc123abc123ab";

    fn check(state: CheckState, last_checked: Option<i64>) -> Check {
        Check {
            id: ID.into(),
            user_phone: "5551234567".into(),
            protocol: Protocol::Https,
            url: "example.com".into(),
            method: HttpMethod::Get,
            success_codes: vec![200],
            timeout_seconds: 3,
            state,
            last_checked,
            extra: Default::default(),
        }
    }

    struct FixedProber(ProbeOutcome);

    #[async_trait]
    impl Prober for FixedProber {
        async fn probe(&self, _check: &Check) -> ProbeOutcome {
            self.0.clone()
        }
    }

    #[derive(Default)]
    struct RecordingSender {
        sent: Mutex<Vec<(String, String)>>,
    }

    #[async_trait]
    impl AlertSender for RecordingSender {
        async fn send(&self, phone: &str, message: &str) -> Result<(), AlertError> {
            self.sent.lock().unwrap().push((phone.to_string(), message.to_string()));
            Ok(())
        }
    }

    #[test]
    fn test_success_code_means_up() {
        let eval = evaluate(&check(CheckState::Down, None), ProbeOutcome::Response { status: 200 }, 10);
        assert_eq!(eval.updated.state, CheckState::Up);
        assert_eq!(eval.updated.last_checked, Some(10));
    }

    #[test]
    fn test_other_outcomes_mean_down() {
        for outcome in [
            ProbeOutcome::Response { status: 500 },
            ProbeOutcome::Response { status: 201 },
            ProbeOutcome::ConnectionError { reason: "refused".into() },
            ProbeOutcome::Timeout,
        ] {
            let eval = evaluate(&check(CheckState::Up, Some(1)), outcome, 10);
            assert_eq!(eval.updated.state, CheckState::Down);
        }
    }

    #[test]
    fn test_first_evaluation_never_alerts() {
        for (state, outcome) in [
            (CheckState::Down, ProbeOutcome::Response { status: 200 }),
            (CheckState::Up, ProbeOutcome::Timeout),
            (CheckState::Down, ProbeOutcome::Timeout),
        ] {
            let eval = evaluate(&check(state, None), outcome, 10);
            assert!(!eval.alert);
        }
    }

    #[test]
    fn test_alert_iff_state_changed() {
        let up = ProbeOutcome::Response { status: 200 };
        assert!(evaluate(&check(CheckState::Down, Some(1)), up.clone(), 10).alert);
        assert!(!evaluate(&check(CheckState::Up, Some(1)), up, 10).alert);
        assert!(evaluate(&check(CheckState::Up, Some(1)), ProbeOutcome::Timeout, 10).alert);
        assert!(!evaluate(&check(CheckState::Down, Some(1)), ProbeOutcome::Timeout, 10).alert);
    }

    #[test]
    fn test_log_entry_reflects_this_evaluation() {
        let eval = evaluate(&check(CheckState::Up, Some(1)), ProbeOutcome::Timeout, 42);
        let entry = eval.log_entry();
        assert_eq!(entry.check.state, CheckState::Up);
        assert_eq!(entry.check.last_checked, Some(1));
        assert_eq!(entry.state, CheckState::Down);
        assert!(entry.alert);
        assert_eq!(entry.time, 42);
        assert_eq!(entry.outcome, ProbeOutcome::Timeout);
    }

    async fn evaluator_with(
        record: serde_json::Value,
        outcome: ProbeOutcome,
    ) -> (TempDir, Arc<MemoryRecordStore>, Arc<FileLogStore>, Arc<RecordingSender>, CheckEvaluator) {
        let dir = TempDir::new().unwrap();
        let records = Arc::new(MemoryRecordStore::new());
        records.create(CHECKS_COLLECTION, ID, &record).await.unwrap();
        let logs = Arc::new(FileLogStore::new(dir.path()).await.unwrap());
        let sender = Arc::new(RecordingSender::default());
        let evaluator = CheckEvaluator::new(
            records.clone(),
            logs.clone(),
            Arc::new(FixedProber(outcome)),
            sender.clone(),
        );
        (dir, records, logs, sender, evaluator)
    }

    #[tokio::test]
    async fn test_run_persists_logs_and_alerts_on_change() {
        let record = json!({
            "id": ID, "userPhone": "5551234567", "protocol": "https", "url": "example.com",
            "method": "get", "successCodes": [200], "timeoutSeconds": 3,
            "state": "up", "lastChecked": 1, "owner": "kept"
        });
        let (_dir, records, logs, sender, evaluator) = evaluator_with(record, ProbeOutcome::Timeout).await;

        let evaluated = evaluator.run(ID).await.unwrap();
        assert_eq!(evaluated.state, CheckState::Down);
        assert!(matches!(evaluated.alert, AlertStatus::Delivered));

        let stored = records.read(CHECKS_COLLECTION, ID).await.unwrap();
        assert_eq!(stored["state"], "down");
        assert!(stored["lastChecked"].as_i64().unwrap() > 1);
        assert_eq!(stored["owner"], "kept");

        let log = logs.read(ID).await.unwrap();
        assert_eq!(log.lines().count(), 1);
        let entry: LogEntry = serde_json::from_str(log.trim()).unwrap();
        assert!(entry.alert);

        let sent = sender.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, "5551234567");
        assert!(sent[0].1.contains("GET https://example.com is currently down"));
    }

    #[tokio::test]
    async fn test_invalid_record_is_left_untouched() {
        let record = json!({"id": ID, "protocol": "https"});
        let (_dir, records, logs, sender, evaluator) =
            evaluator_with(record.clone(), ProbeOutcome::Response { status: 200 }).await;

        let result = evaluator.run(ID).await;
        assert!(matches!(result, Err(EngineError::Validation { .. })));
        assert_eq!(records.read(CHECKS_COLLECTION, ID).await.unwrap(), record);
        assert!(logs.list(false).await.unwrap().is_empty());
        assert!(sender.sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_missing_record_is_a_read_failure() {
        let records = Arc::new(MemoryRecordStore::new());
        let dir = TempDir::new().unwrap();
        let evaluator = CheckEvaluator::new(
            records,
            Arc::new(FileLogStore::new(dir.path()).await.unwrap()),
            Arc::new(FixedProber(ProbeOutcome::Timeout)),
            Arc::new(RecordingSender::default()),
        );
        assert!(matches!(evaluator.run(ID).await, Err(EngineError::Read { .. })));
    }
}
