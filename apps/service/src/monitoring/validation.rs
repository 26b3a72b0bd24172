//! Shape validation for stored check records.
//!
//! Records are written by the CRUD layer and read back here as raw JSON.
//! A record either converts into a [`Check`] or yields the first
//! [`ValidationError`] found, nothing is coerced halfway.

use serde_json::{Map, Value};
use url::Url;

use super::types::{CHECK_ID_LEN, Check, CheckState, HttpMethod, Protocol, USER_PHONE_LEN};
use crate::error::ValidationError;

/// Inclusive bounds on `timeoutSeconds`
pub const MIN_TIMEOUT_SECONDS: u64 = 1;
pub const MAX_TIMEOUT_SECONDS: u64 = 5;

const KNOWN_FIELDS: [&str; 9] = [
    "id",
    "userPhone",
    "protocol",
    "url",
    "method",
    "successCodes",
    "timeoutSeconds",
    "state",
    "lastChecked",
];

/// Convert a stored record into a [`Check`]
pub fn validate_check_record(record: &Value) -> Result<Check, ValidationError> {
    let object = record.as_object().ok_or(ValidationError::NotAnObject)?;

    let id = trimmed_with_len(object, "id", CHECK_ID_LEN).ok_or(ValidationError::InvalidId)?;
    let user_phone = trimmed_with_len(object, "userPhone", USER_PHONE_LEN)
        .ok_or(ValidationError::InvalidUserPhone)?;
    let protocol = object
        .get("protocol")
        .and_then(Value::as_str)
        .and_then(|raw| Protocol::parse(raw.trim()))
        .ok_or(ValidationError::InvalidProtocol)?;
    let url = validate_url(object.get("url"), protocol)?;
    let method = object
        .get("method")
        .and_then(Value::as_str)
        .and_then(|raw| HttpMethod::parse(raw.trim()))
        .ok_or(ValidationError::InvalidMethod)?;
    let success_codes = validate_success_codes(object.get("successCodes"))?;
    let timeout_seconds = validate_timeout(object.get("timeoutSeconds"))?;

    // Live status is normalised rather than rejected
    let state = match object.get("state").and_then(Value::as_str).map(str::trim) {
        Some("up") => CheckState::Up,
        _ => CheckState::Down,
    };
    let last_checked = object.get("lastChecked").and_then(Value::as_i64).filter(|ts| *ts > 0);

    let extra = object
        .iter()
        .filter(|(key, _)| !KNOWN_FIELDS.contains(&key.as_str()))
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect();

    Ok(Check {
        id,
        user_phone,
        protocol,
        url,
        method,
        success_codes,
        timeout_seconds,
        state,
        last_checked,
        extra,
    })
}

fn trimmed_with_len(object: &Map<String, Value>, field: &str, len: usize) -> Option<String> {
    object
        .get(field)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|value| value.chars().count() == len)
        .map(str::to_string)
}

/// The stored url has no scheme, it must parse once the protocol is prefixed
fn validate_url(raw: Option<&Value>, protocol: Protocol) -> Result<String, ValidationError> {
    let url = raw
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|url| !url.is_empty())
        .ok_or(ValidationError::InvalidUrl)?;

    if url.contains("://") {
        return Err(ValidationError::InvalidUrl);
    }

    match Url::parse(&format!("{protocol}://{url}")) {
        Ok(parsed) if parsed.host_str().is_some_and(|host| !host.is_empty()) => Ok(url.to_string()),
        _ => Err(ValidationError::InvalidUrl),
    }
}

fn validate_success_codes(raw: Option<&Value>) -> Result<Vec<u16>, ValidationError> {
    let codes = raw.and_then(Value::as_array).ok_or(ValidationError::InvalidSuccessCodes)?;
    if codes.is_empty() {
        return Err(ValidationError::InvalidSuccessCodes);
    }

    codes
        .iter()
        .map(|code| {
            code.as_u64()
                .filter(|code| (100..=599).contains(code))
                .map(|code| code as u16)
                .ok_or(ValidationError::InvalidSuccessCodes)
        })
        .collect()
}

fn validate_timeout(raw: Option<&Value>) -> Result<u64, ValidationError> {
    // 3.0 is accepted as whole, 3.5 is not
    let seconds = match raw {
        Some(Value::Number(number)) => number
            .as_u64()
            .or_else(|| number.as_f64().filter(|f| f.fract() == 0.0 && *f >= 0.0).map(|f| f as u64)),
        _ => None,
    };

    seconds
        .filter(|s| (MIN_TIMEOUT_SECONDS..=MAX_TIMEOUT_SECONDS).contains(s))
        .ok_or(ValidationError::InvalidTimeout)
}
