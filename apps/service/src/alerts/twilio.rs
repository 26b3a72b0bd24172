use async_trait::async_trait;
use std::time::Duration;
use tracing::debug;

use super::{AlertSender, validate_sms};
use crate::config::TwilioConfig;
use crate::error::AlertError;

/// SMS delivery through the Twilio Messages API
pub struct TwilioSender {
    client: reqwest::Client,
    config: TwilioConfig,
}

impl TwilioSender {
    pub fn new(config: TwilioConfig) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder().timeout(Duration::from_secs(10)).build()?;
        Ok(Self { client, config })
    }

    fn messages_url(&self) -> String {
        format!(
            "{}/2010-04-01/Accounts/{}/Messages.json",
            self.config.api_base.trim_end_matches('/'),
            self.config.account_sid
        )
    }
}

#[async_trait]
impl AlertSender for TwilioSender {
    async fn send(&self, phone: &str, message: &str) -> Result<(), AlertError> {
        validate_sms(phone, message)?;

        let to = format!("{}{}", self.config.country_code, phone.trim());
        let form = [
            ("From", self.config.from_phone.as_str()),
            ("To", to.as_str()),
            ("Body", message.trim()),
        ];

        let response = self
            .client
            .post(self.messages_url())
            .basic_auth(&self.config.account_sid, Some(&self.config.auth_token))
            .form(&form)
            .send()
            .await?;

        let status = response.status().as_u16();
        debug!("SMS gateway answered {} for {}", status, to);
        match status {
            200 | 201 => Ok(()),
            status => Err(AlertError::Rejected { status }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_string_contains, header_exists, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn config_for(server: &MockServer) -> TwilioConfig {
        TwilioConfig {
            account_sid: "AC123".into(),
            auth_token: "secret".into(),
            from_phone: "+15550000000".into(),
            api_base: server.uri(),
            country_code: "+1".into(),
        }
    }

    #[tokio::test]
    async fn test_send_posts_form_with_basic_auth() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/2010-04-01/Accounts/AC123/Messages.json"))
            .and(header_exists("authorization"))
            .and(body_string_contains("To=%2B15551234567"))
            .and(body_string_contains("Body=Alert"))
            .respond_with(ResponseTemplate::new(201))
            .expect(1)
            .mount(&server)
            .await;

        let sender = TwilioSender::new(config_for(&server)).unwrap();
        sender.send("5551234567", "Alert").await.unwrap();
    }

    #[tokio::test]
    async fn test_non_success_status_is_a_delivery_failure() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let sender = TwilioSender::new(config_for(&server)).unwrap();
        let result = sender.send("5551234567", "Alert").await;
        assert!(matches!(result, Err(AlertError::Rejected { status: 401 })));
    }

    #[tokio::test]
    async fn test_invalid_destination_never_hits_the_gateway() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(201))
            .expect(0)
            .mount(&server)
            .await;

        let sender = TwilioSender::new(config_for(&server)).unwrap();
        assert!(matches!(
            sender.send("555", "Alert").await,
            Err(AlertError::InvalidDestination(_))
        ));
    }
}
