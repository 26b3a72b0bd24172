use async_trait::async_trait;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::debug;
use url::Url;

use super::types::{Check, ProbeOutcome};

/// Performs one probe of a check's target
#[async_trait]
pub trait Prober: Send + Sync {
    /// Exactly one outcome per call, never an error
    async fn probe(&self, check: &Check) -> ProbeOutcome;
}

/// A result slot that accepts its first value and ignores the rest.
///
/// Several event sources (request error, timeout timer, response) race to
/// finish one probe; each holds a clone of the slot and calls
/// [`CompletionSlot::complete`]. The receiver sees only the first value.
pub struct CompletionSlot<T> {
    sender: Mutex<Option<oneshot::Sender<T>>>,
}

impl<T> CompletionSlot<T> {
    pub fn new() -> (Arc<Self>, oneshot::Receiver<T>) {
        let (tx, rx) = oneshot::channel();
        (Arc::new(Self { sender: Mutex::new(Some(tx)) }), rx)
    }

    /// Returns `true` if this call filled the slot
    pub fn complete(&self, value: T) -> bool {
        let sender = self.sender.lock().unwrap_or_else(PoisonError::into_inner).take();
        match sender {
            Some(tx) => tx.send(value).is_ok(),
            None => false,
        }
    }

    pub fn is_completed(&self) -> bool {
        self.sender.lock().unwrap_or_else(PoisonError::into_inner).is_none()
    }
}

/// HTTP/HTTPS prober
pub struct HttpProber {
    client: reqwest::Client,
}

impl HttpProber {
    pub fn new() -> Result<Self, reqwest::Error> {
        // The per-check timer bounds each probe, the client itself has no timeout.
        // Redirects are reported as their own status code.
        let client = reqwest::Client::builder()
            .user_agent(concat!("uptime-service/", env!("CARGO_PKG_VERSION")))
            .redirect(reqwest::redirect::Policy::none())
            .build()?;

        Ok(Self { client })
    }
}

fn classify_error(error: &reqwest::Error) -> ProbeOutcome {
    if error.is_timeout() {
        return ProbeOutcome::Timeout;
    }
    let mut reason = error.to_string();
    let mut source = std::error::Error::source(error);
    while let Some(cause) = source {
        reason.push_str(": ");
        reason.push_str(&cause.to_string());
        source = cause.source();
    }
    ProbeOutcome::ConnectionError { reason }
}

#[async_trait]
impl Prober for HttpProber {
    async fn probe(&self, check: &Check) -> ProbeOutcome {
        let target = match Url::parse(&check.target()) {
            Ok(target) => target,
            Err(e) => return ProbeOutcome::ConnectionError { reason: format!("invalid target: {e}") },
        };
        let timeout = Duration::from_millis(check.timeout_seconds * 1000);
        let (slot, outcome_rx) = CompletionSlot::new();

        let request = self.client.request(check.method.as_reqwest(), target);
        let request_task = {
            let slot = slot.clone();
            tokio::spawn(async move {
                let outcome = match request.send().await {
                    Ok(response) => ProbeOutcome::Response { status: response.status().as_u16() },
                    Err(e) => classify_error(&e),
                };
                slot.complete(outcome);
            })
        };
        let timer_task = {
            let slot = slot.clone();
            tokio::spawn(async move {
                tokio::time::sleep(timeout).await;
                slot.complete(ProbeOutcome::Timeout);
            })
        };

        // `slot` is still held here so the timer can always deliver
        let outcome = outcome_rx.await.unwrap_or_else(|_| ProbeOutcome::ConnectionError {
            reason: "probe ended without an outcome".to_string(),
        });
        request_task.abort();
        timer_task.abort();

        debug!("Probe {} {} -> {}", check.method, check.target(), outcome);
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitoring::types::{CheckState, HttpMethod, Protocol};
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn check_for(uri: &str, route: &str, timeout_seconds: u64) -> Check {
        Check {
            id: "abcdefghij0123456789".into(),
            user_phone: "5551234567".into(),
            protocol: Protocol::Http,
            url: format!("{}{}", uri.trim_start_matches("http://"), route),
            method: HttpMethod::Get,
            success_codes: vec![200],
            timeout_seconds,
            state: CheckState::Down,
            last_checked: None,
            extra: Default::default(),
        }
    }

    #[test]
    fn test_completion_slot_first_writer_wins() {
        let (slot, mut rx) = CompletionSlot::new();
        assert!(!slot.is_completed());
        assert!(slot.complete(ProbeOutcome::Timeout));
        assert!(!slot.complete(ProbeOutcome::Response { status: 200 }));
        assert!(slot.is_completed());
        assert_eq!(rx.try_recv().unwrap(), ProbeOutcome::Timeout);
    }

    #[tokio::test]
    async fn test_completion_slot_concurrent_writers() {
        let (slot, rx) = CompletionSlot::new();
        let handles: Vec<_> = (0..16u16)
            .map(|i| {
                let slot = slot.clone();
                tokio::spawn(async move { slot.complete(i) })
            })
            .collect();

        let mut winners = 0;
        for handle in handles {
            if handle.await.unwrap() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
        assert!(rx.await.unwrap() < 16);
    }

    #[tokio::test]
    async fn test_probe_reports_status_code() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/health"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let prober = HttpProber::new().unwrap();
        let outcome = prober.probe(&check_for(&server.uri(), "/health", 2)).await;
        assert_eq!(outcome, ProbeOutcome::Response { status: 503 });
    }

    #[tokio::test]
    async fn test_probe_uses_configured_method() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .respond_with(ResponseTemplate::new(204))
            .mount(&server)
            .await;

        let mut check = check_for(&server.uri(), "/", 2);
        check.method = HttpMethod::Delete;
        let outcome = HttpProber::new().unwrap().probe(&check).await;
        assert_eq!(outcome, ProbeOutcome::Response { status: 204 });
    }

    #[tokio::test]
    async fn test_probe_does_not_follow_redirects() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(301).insert_header("location", "/elsewhere"))
            .mount(&server)
            .await;

        let outcome = HttpProber::new().unwrap().probe(&check_for(&server.uri(), "/", 2)).await;
        assert_eq!(outcome, ProbeOutcome::Response { status: 301 });
    }

    #[tokio::test]
    async fn test_probe_times_out() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(3)))
            .mount(&server)
            .await;

        let started = std::time::Instant::now();
        let outcome = HttpProber::new().unwrap().probe(&check_for(&server.uri(), "/", 1)).await;
        assert_eq!(outcome, ProbeOutcome::Timeout);
        assert!(started.elapsed() < Duration::from_millis(2500));
    }

    #[tokio::test]
    async fn test_probe_connection_error() {
        // Bind then drop to get a port nobody listens on
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let check = check_for(&format!("http://127.0.0.1:{port}"), "/", 2);
        let outcome = HttpProber::new().unwrap().probe(&check).await;
        assert!(matches!(outcome, ProbeOutcome::ConnectionError { .. }), "got {outcome:?}");
    }
}
