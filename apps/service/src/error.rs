use std::io::Error as IoError;

use thiserror::Error;

/// Failures of the keyed record store
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Record {collection}/{key} not found")]
    NotFound { collection: String, key: String },

    #[error("Record {collection}/{key} already exists")]
    AlreadyExists { collection: String, key: String },

    #[error("Invalid record key: {0:?}")]
    InvalidKey(String),

    #[error("{0:#}")]
    Io(#[from] IoError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Failures of the append-only log store
#[derive(Debug, Error)]
pub enum LogError {
    #[error("Log segment {0} not found")]
    NotFound(String),

    #[error("Archive {0} already exists")]
    ArchiveExists(String),

    #[error("Invalid log name: {0:?}")]
    InvalidName(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("{0:#}")]
    Io(#[from] IoError),
}

/// Shape problems found in a stored check record
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("record is not a JSON object")]
    NotAnObject,

    #[error("id must be a 20 character string")]
    InvalidId,

    #[error("userPhone must be a 10 character string")]
    InvalidUserPhone,

    #[error("protocol must be one of http, https")]
    InvalidProtocol,

    #[error("url must be a non-empty string with a host")]
    InvalidUrl,

    #[error("method must be one of get, post, put, delete")]
    InvalidMethod,

    #[error("successCodes must be a non-empty array of HTTP status codes")]
    InvalidSuccessCodes,

    #[error("timeoutSeconds must be a whole number between 1 and 5")]
    InvalidTimeout,

    #[error("id {id:?} does not match the key the record is stored under")]
    IdMismatch { id: String },
}

/// Failures of the outbound alert channel
#[derive(Debug, Error)]
pub enum AlertError {
    #[error("Invalid destination phone: {0:?}")]
    InvalidDestination(String),

    #[error("Message is {0} characters, the gateway accepts at most 1600")]
    MessageTooLong(usize),

    #[error("Gateway transport failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Gateway rejected the message with status {status}")]
    Rejected { status: u16 },
}

/// Per-item failure reported by the engine's sweeps.
///
/// None of these abort a sweep; they are logged and attached to the report
/// of the single check or log they belong to.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Could not list checks: {0}")]
    ListChecks(#[source] StoreError),

    #[error("Could not list log segments: {0}")]
    ListLogs(#[source] LogError),

    #[error("Could not read check {id}: {source}")]
    Read {
        id: String,
        #[source]
        source: StoreError,
    },

    #[error("Check {id} failed validation: {source}")]
    Validation {
        id: String,
        #[source]
        source: ValidationError,
    },

    #[error("Could not append log entry for check {id}: {source}")]
    LogAppend {
        id: String,
        #[source]
        source: LogError,
    },

    #[error("Could not persist check {id}: {source}")]
    Persistence {
        id: String,
        #[source]
        source: StoreError,
    },

    #[error("Rotation of log {log_id} failed: {source}")]
    Rotation {
        log_id: String,
        #[source]
        source: LogError,
    },
}

impl EngineError {
    /// Whether this failure is a persistence failure (log append or record update).
    pub fn is_persistence(&self) -> bool {
        matches!(self, Self::LogAppend { .. } | Self::Persistence { .. })
    }
}
