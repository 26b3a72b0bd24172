/// Check monitoring engine
///
/// This module is responsible for:
/// - Validating stored check records
/// - Probing HTTP/HTTPS targets with a per-check timeout
/// - Deciding up/down transitions and alerts
/// - Scheduling the check sweep and the log rotation sweep
pub mod checker;
pub mod evaluator;
pub mod rotation;
pub mod scheduler;
pub mod types;
pub mod validation;

pub use checker::{HttpProber, Prober};
pub use evaluator::{AlertStatus, CheckEvaluator, Evaluated, Evaluation, evaluate};
pub use rotation::{LogRotator, RotationReport};
pub use scheduler::{Engine, EngineConfig, EngineHandle, SweepReport};
pub use types::{Check, CheckState, LogEntry, ProbeOutcome};
