/// Outbound alert channel
///
/// An alert is a short text message addressed to the owner's phone
/// identifier. Delivery failures are reported to the caller, never retried.
pub mod twilio;

pub use twilio::TwilioSender;

use async_trait::async_trait;
use tracing::info;

use crate::error::AlertError;
use crate::monitoring::types::USER_PHONE_LEN;

/// Longest message body the gateway accepts
pub const MAX_MESSAGE_LEN: usize = 1600;

#[async_trait]
pub trait AlertSender: Send + Sync {
    async fn send(&self, phone: &str, message: &str) -> Result<(), AlertError>;
}

/// Check destination and body before anything goes on the wire
pub fn validate_sms(phone: &str, message: &str) -> Result<(), AlertError> {
    let phone = phone.trim();
    if phone.chars().count() != USER_PHONE_LEN {
        return Err(AlertError::InvalidDestination(phone.to_string()));
    }
    let len = message.trim().chars().count();
    if len > MAX_MESSAGE_LEN {
        return Err(AlertError::MessageTooLong(len));
    }
    Ok(())
}

/// Sender used when no gateway is configured: the alert only reaches the log
#[derive(Debug, Default)]
pub struct LogOnlySender;

#[async_trait]
impl AlertSender for LogOnlySender {
    async fn send(&self, phone: &str, message: &str) -> Result<(), AlertError> {
        validate_sms(phone, message)?;
        info!(phone, "No SMS gateway configured, alert: {}", message);
        Ok(())
    }
}
