//! Notification sink that posts engine events to an HTTP webhook.
//!
//! Delivery runs on a spawned task so a slow endpoint never holds up the
//! state transition that produced the event.

use async_trait::async_trait;
use reqwest::{Client, Response, Url};
use serde::Serialize;
use tracing::{debug, warn};

use binflow_core::{Notification, NotificationPort, NotifyError};

/// Environment variable read by front ends to enable the webhook.
pub const WEBHOOK_URL_ENV: &str = "BINFLOW_WEBHOOK_URL";

/// JSON body posted for every event.
#[derive(Debug, Serialize)]
struct Envelope<'a> {
    source: &'static str,
    #[serde(flatten)]
    event: &'a Notification,
}

/// Posts each [`Notification`] as JSON to a fixed URL.
pub struct WebhookNotifier {
    client: Client,
    url: Url,
}

impl WebhookNotifier {
    /// Create a notifier for `url` using the shared HTTP client.
    ///
    /// # Errors
    ///
    /// Returns [`NotifyError::Transport`] when `url` is not an absolute http(s) URL.
    pub fn new(client: Client, url: &str) -> Result<Self, NotifyError> {
        let url = Url::parse(url)
            .map_err(|err| NotifyError::Transport(format!("invalid webhook url {url}: {err}")))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(NotifyError::Transport(format!(
                "unsupported webhook scheme {}",
                url.scheme()
            )));
        }
        Ok(Self { client, url })
    }

    /// Target URL.
    #[must_use]
    pub fn url(&self) -> &Url {
        &self.url
    }
}

fn body(notification: &Notification) -> Envelope<'_> {
    Envelope {
        source: "binflow",
        event: notification,
    }
}

#[async_trait]
impl NotificationPort for WebhookNotifier {
    async fn notify(&self, notification: Notification) -> Result<(), NotifyError> {
        let request = self
            .client
            .post(self.url.clone())
            .json(&body(&notification));

        tokio::spawn(async move {
            let outcome = request
                .send()
                .await
                .and_then(Response::error_for_status);
            match outcome {
                Ok(response) => debug!(status = %response.status(), "webhook delivered"),
                Err(err) => warn!(error = %err, ?notification, "webhook delivery failed"),
            }
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use binflow_core::{ActorId, BinId, BinStatus, RouteId};

    use super::*;

    #[test]
    fn rejects_relative_and_non_http_urls() {
        assert!(WebhookNotifier::new(Client::new(), "/hooks/bins").is_err());
        assert!(WebhookNotifier::new(Client::new(), "ftp://example.org/hook").is_err());

        let notifier = WebhookNotifier::new(Client::new(), "https://example.org/hook").unwrap();
        assert_eq!(notifier.url().host_str(), Some("example.org"));
    }

    #[test]
    fn envelope_flattens_the_event() {
        let bin_id = BinId::new();
        let alert = Notification::BinAlert {
            bin_id,
            qr_code: "QR-1".into(),
            status: BinStatus::Overdue,
            fill_level: 97,
        };

        let json = serde_json::to_value(body(&alert)).unwrap();
        assert_eq!(json["source"], "binflow");
        assert_eq!(json["kind"], "bin_alert");
        assert_eq!(json["bin_id"], bin_id.to_string());
        assert_eq!(json["fill_level"], 97);
    }

    #[tokio::test]
    async fn unreachable_endpoint_does_not_fail_the_caller() {
        let notifier = WebhookNotifier::new(Client::new(), "http://127.0.0.1:9/hook").unwrap();
        let event = Notification::RouteAssigned {
            route_id: RouteId::new(),
            collector: ActorId::new(),
            stops: 2,
        };

        assert_eq!(notifier.notify(event).await, Ok(()));
    }
}
