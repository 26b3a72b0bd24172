use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Length of a check identifier
pub const CHECK_ID_LEN: usize = 20;

/// Length of an owner phone identifier
pub const USER_PHONE_LEN: usize = 10;

/// Name of the record store collection holding checks
pub const CHECKS_COLLECTION: &str = "checks";

/// Scheme used to reach a check target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Http,
    Https,
}

impl Protocol {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "http" => Some(Self::Http),
            "https" => Some(Self::Https),
            _ => None,
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Protocol::Http => write!(f, "http"),
            Protocol::Https => write!(f, "https"),
        }
    }
}

/// HTTP method a probe is issued with
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Delete,
}

impl HttpMethod {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "get" => Some(Self::Get),
            "post" => Some(Self::Post),
            "put" => Some(Self::Put),
            "delete" => Some(Self::Delete),
            _ => None,
        }
    }

    pub fn as_reqwest(self) -> reqwest::Method {
        match self {
            HttpMethod::Get => reqwest::Method::GET,
            HttpMethod::Post => reqwest::Method::POST,
            HttpMethod::Put => reqwest::Method::PUT,
            HttpMethod::Delete => reqwest::Method::DELETE,
        }
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HttpMethod::Get => write!(f, "GET"),
            HttpMethod::Post => write!(f, "POST"),
            HttpMethod::Put => write!(f, "PUT"),
            HttpMethod::Delete => write!(f, "DELETE"),
        }
    }
}

/// Live status of a check
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckState {
    Up,
    #[default]
    Down,
}

impl fmt::Display for CheckState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CheckState::Up => write!(f, "up"),
            CheckState::Down => write!(f, "down"),
        }
    }
}

/// A validated check record.
///
/// Only [`crate::monitoring::validation::validate_check_record`] builds one
/// from stored JSON. Fields this engine does not own are carried in `extra`
/// so a full-record `update` does not drop them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Check {
    pub id: String,
    pub user_phone: String,
    pub protocol: Protocol,
    pub url: String,
    pub method: HttpMethod,
    pub success_codes: Vec<u16>,
    pub timeout_seconds: u64,
    #[serde(default)]
    pub state: CheckState,
    /// Epoch milliseconds of the last evaluation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_checked: Option<i64>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Check {
    /// Full target URL, e.g. `https://example.com/health`
    pub fn target(&self) -> String {
        format!("{}://{}", self.protocol, self.url)
    }

    pub fn accepts(&self, status: u16) -> bool {
        self.success_codes.contains(&status)
    }

    /// Text sent to the owner when the state flips
    pub fn alert_message(&self) -> String {
        format!(
            "Alert: your check for {} {} is currently {}",
            self.method,
            self.target(),
            self.state
        )
    }
}

/// Result of one probe: either a status code or one of two error kinds
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum ProbeOutcome {
    Response { status: u16 },
    ConnectionError { reason: String },
    Timeout,
}

impl ProbeOutcome {
    pub fn status(&self) -> Option<u16> {
        match self {
            ProbeOutcome::Response { status } => Some(*status),
            _ => None,
        }
    }
}

impl fmt::Display for ProbeOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProbeOutcome::Response { status } => write!(f, "status {status}"),
            ProbeOutcome::ConnectionError { reason } => write!(f, "connection-error ({reason})"),
            ProbeOutcome::Timeout => write!(f, "timeout"),
        }
    }
}

/// One line of a check's log segment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    /// The check as it was before this evaluation
    pub check: Check,
    pub outcome: ProbeOutcome,
    pub state: CheckState,
    pub alert: bool,
    /// Epoch milliseconds of the evaluation
    pub time: i64,
}
