//! batchgate notification channel adapters.
//!
//! Implements [`pipeline::NotificationChannel`] and [`pipeline::AlertChannel`]:
//!
//! - [`LogChannel`] emits each notification as a structured `tracing` event.
//!   Useful on its own in development and as the default when no webhook is
//!   configured.
//! - [`WebhookChannel`] POSTs each notification as JSON to an HTTP endpoint
//!   (a topic's HTTPS subscription, a chat webhook, ...). Fan-out to individual
//!   subscribers is the endpoint's concern.
//!
//! ## Architectural Layer
//!
//! **Infrastructure.** Transport and payload encoding live here. Neither
//! adapter retries; a failed publish is reported to the caller, which logs
//! and drops it.

use std::time::Duration;

use async_trait::async_trait;
use pipeline::{AlertChannel, BudgetAlert, Notification, NotificationChannel, PublishError};
use serde::Serialize;
use tracing::{info, warn};

/// Default request timeout for webhook deliveries.
pub const DEFAULT_WEBHOOK_TIMEOUT: Duration = Duration::from_secs(10);

// ---------------------------------------------------------------------------
// Log channel
// ---------------------------------------------------------------------------

/// Channel that writes notifications to the log stream.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogChannel;

#[async_trait]
impl NotificationChannel for LogChannel {
    async fn publish(&self, notification: &Notification) -> Result<(), PublishError> {
        info!(
            target: "batchgate::notification",
            job_id = %notification.job_id,
            status = %notification.status,
            occurred_at = %notification.occurred_at,
            "{}",
            notification.message
        );
        Ok(())
    }
}

#[async_trait]
impl AlertChannel for LogChannel {
    async fn alert(&self, alert: &BudgetAlert) -> Result<(), PublishError> {
        match alert {
            BudgetAlert::Warning {
                spend,
                ceiling,
                percent_used,
                ..
            } => warn!(
                target: "batchgate::alert",
                %spend, %ceiling, percent_used,
                "Budget warning threshold crossed"
            ),
            BudgetAlert::Breached { reason, .. } => warn!(
                target: "batchgate::alert",
                reason = %reason,
                "Budget breached; job submission disabled"
            ),
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Webhook channel
// ---------------------------------------------------------------------------

/// Channel that POSTs JSON payloads to an HTTP endpoint.
#[derive(Debug, Clone)]
pub struct WebhookChannel {
    client: reqwest::Client,
    url: String,
}

impl WebhookChannel {
    /// Creates a channel posting to `url` with the given request timeout.
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, PublishError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| PublishError::Transport {
                message: e.to_string(),
            })?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    async fn post<T: Serialize + Sync>(&self, payload: &T) -> Result<(), PublishError> {
        let response = self
            .client
            .post(&self.url)
            .json(payload)
            .send()
            .await
            .map_err(|e| PublishError::Transport {
                message: e.to_string(),
            })?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        let body = response.text().await.unwrap_or_default();
        Err(PublishError::Refused {
            status: status.as_u16(),
            message: body,
        })
    }
}

#[async_trait]
impl NotificationChannel for WebhookChannel {
    async fn publish(&self, notification: &Notification) -> Result<(), PublishError> {
        self.post(notification).await
    }
}

#[async_trait]
impl AlertChannel for WebhookChannel {
    async fn alert(&self, alert: &BudgetAlert) -> Result<(), PublishError> {
        self.post(alert).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pipeline::{JobId, JobStatus, JobStatusEvent, Timestamp};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use tokio::sync::oneshot;

    fn notification() -> Notification {
        let event = JobStatusEvent::new(JobId::new("job-1").unwrap(), JobStatus::Succeeded, Timestamp::now());
        Notification::from_terminal(&event).unwrap()
    }

    /// Serves one HTTP request with `status_line` and hands back the request body.
    async fn one_shot_server(status_line: &'static str) -> (String, oneshot::Receiver<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}/hook", listener.local_addr().unwrap());
        let (tx, rx) = oneshot::channel();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = Vec::new();
            let mut chunk = [0u8; 4096];
            let body = loop {
                let n = socket.read(&mut chunk).await.unwrap();
                buf.extend_from_slice(&chunk[..n]);
                let text = String::from_utf8_lossy(&buf).to_string();
                if let Some(split) = text.find("\r\n\r\n") {
                    let headers = text[..split].to_ascii_lowercase();
                    let len = headers
                        .lines()
                        .find_map(|l| l.strip_prefix("content-length:"))
                        .and_then(|v| v.trim().parse::<usize>().ok())
                        .unwrap_or(0);
                    let body = &text[split + 4..];
                    if body.len() >= len {
                        break body.to_string();
                    }
                }
                if n == 0 {
                    break String::new();
                }
            };
            let response = format!("{status_line}\r\ncontent-length: 0\r\nconnection: close\r\n\r\n");
            socket.write_all(response.as_bytes()).await.unwrap();
            let _ = tx.send(body);
        });
        (url, rx)
    }

    #[tokio::test]
    async fn log_channel_always_accepts() {
        assert!(LogChannel.publish(&notification()).await.is_ok());
    }

    #[tokio::test]
    async fn webhook_posts_notification_json() {
        let (url, body) = one_shot_server("HTTP/1.1 204 No Content").await;
        let channel = WebhookChannel::new(url, DEFAULT_WEBHOOK_TIMEOUT).unwrap();
        channel.publish(&notification()).await.unwrap();

        let body: serde_json::Value = serde_json::from_str(&body.await.unwrap()).unwrap();
        assert_eq!(body["job_id"], "job-1");
        assert_eq!(body["status"], "SUCCEEDED");
    }

    #[tokio::test]
    async fn webhook_reports_refusal() {
        let (url, _body) = one_shot_server("HTTP/1.1 503 Service Unavailable").await;
        let channel = WebhookChannel::new(url, DEFAULT_WEBHOOK_TIMEOUT).unwrap();
        let err = channel.publish(&notification()).await.unwrap_err();
        assert!(matches!(err, PublishError::Refused { status: 503, .. }));
    }

    #[tokio::test]
    async fn webhook_reports_unreachable_endpoint() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}/hook", listener.local_addr().unwrap());
        drop(listener);
        let channel = WebhookChannel::new(url, Duration::from_secs(2)).unwrap();
        let err = channel.publish(&notification()).await.unwrap_err();
        assert!(matches!(err, PublishError::Transport { .. }));
    }
}
