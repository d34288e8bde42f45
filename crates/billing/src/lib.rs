//! batchgate cost source adapters.
//!
//! Implements [`pipeline::CostSource`] for two kinds of cost-accounting
//! collaborator:
//!
//! - [`FileCostSource`] reads a JSON report written by an external exporter
//!   (for example a scheduled job dumping the account's month-to-date spend
//!   filtered to the pipeline's cost tag).
//! - [`HttpCostSource`] fetches the same JSON report from an HTTP endpoint.
//!
//! Both expect a [`pipeline::SpendReport`]:
//!
//! ```json
//! { "period_start": "2024-03-01T00:00:00Z", "accumulated_spend": 42.17 }
//! ```
//!
//! ## Architectural Layer
//!
//! **Infrastructure.** This crate only reads spend; it never computes it.

use std::io::ErrorKind;
use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use pipeline::{CostSource, CostSourceError, SpendReport};
use tracing::debug;

/// Default request timeout for [`HttpCostSource`].
pub const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(30);

fn decode(bytes: &[u8], origin: &str) -> Result<SpendReport, CostSourceError> {
    serde_json::from_slice(bytes).map_err(|e| CostSourceError::Malformed {
        message: format!("{origin}: {e}"),
    })
}

// ---------------------------------------------------------------------------
// File
// ---------------------------------------------------------------------------

/// Reads the latest spend report from a JSON file.
#[derive(Debug, Clone)]
pub struct FileCostSource {
    path: PathBuf,
}

impl FileCostSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl CostSource for FileCostSource {
    async fn current_spend(&self) -> Result<SpendReport, CostSourceError> {
        let origin = self.path.display().to_string();
        let bytes = tokio::fs::read(&self.path).await.map_err(|e| {
            let message = if e.kind() == ErrorKind::NotFound {
                format!("{origin}: no spend report yet")
            } else {
                format!("{origin}: {e}")
            };
            CostSourceError::Unavailable { message }
        })?;
        let report = decode(&bytes, &origin)?;
        debug!(spend = %report.accumulated_spend, "Spend report read");
        Ok(report)
    }
}

// ---------------------------------------------------------------------------
// HTTP
// ---------------------------------------------------------------------------

/// Fetches the latest spend report with an HTTP GET.
#[derive(Debug, Clone)]
pub struct HttpCostSource {
    client: reqwest::Client,
    url: String,
}

impl HttpCostSource {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, CostSourceError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| CostSourceError::Unavailable {
                message: e.to_string(),
            })?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

#[async_trait]
impl CostSource for HttpCostSource {
    async fn current_spend(&self) -> Result<SpendReport, CostSourceError> {
        let response = self
            .client
            .get(&self.url)
            .send()
            .await
            .map_err(|e| CostSourceError::Unavailable {
                message: format!("{}: {e}", self.url),
            })?;
        let status = response.status();
        if !status.is_success() {
            return Err(CostSourceError::Unavailable {
                message: format!("{}: HTTP {status}", self.url),
            });
        }
        let bytes = response
            .bytes()
            .await
            .map_err(|e| CostSourceError::Unavailable {
                message: format!("{}: {e}", self.url),
            })?;
        decode(&bytes, &self.url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pipeline::{Spend, Timestamp};
    use tempfile::TempDir;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Answers one GET with `status_line` and `body`; returns the URL to fetch.
    async fn serve_once(status_line: &'static str, body: &'static str) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}/spend", listener.local_addr().unwrap());
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = Vec::new();
            let mut chunk = [0u8; 1024];
            while !request.windows(4).any(|w| w == b"\r\n\r\n") {
                let n = socket.read(&mut chunk).await.unwrap();
                if n == 0 {
                    break;
                }
                request.extend_from_slice(&chunk[..n]);
            }
            let response = format!(
                "{status_line}\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
                body.len()
            );
            socket.write_all(response.as_bytes()).await.unwrap();
        });
        url
    }

    #[tokio::test]
    async fn file_source_reads_report() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("spend.json");
        std::fs::write(
            &path,
            r#"{"period_start":"2024-03-01T00:00:00Z","accumulated_spend":42.5}"#,
        )
        .unwrap();

        let report = FileCostSource::new(&path).current_spend().await.unwrap();
        assert_eq!(report.accumulated_spend, Spend::new(42.5).unwrap());
        assert_eq!(
            report.period_start,
            Timestamp::parse_rfc3339("2024-03-01T00:00:00Z").unwrap()
        );
    }

    #[tokio::test]
    async fn missing_file_is_unavailable() {
        let dir = TempDir::new().unwrap();
        let err = FileCostSource::new(dir.path().join("absent.json"))
            .current_spend()
            .await
            .unwrap_err();
        assert!(matches!(err, CostSourceError::Unavailable { .. }));
    }

    #[tokio::test]
    async fn negative_spend_is_malformed() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("spend.json");
        std::fs::write(
            &path,
            r#"{"period_start":"2024-03-01T00:00:00Z","accumulated_spend":-1}"#,
        )
        .unwrap();
        let err = FileCostSource::new(&path).current_spend().await.unwrap_err();
        assert!(matches!(err, CostSourceError::Malformed { .. }));
    }

    #[tokio::test]
    async fn http_source_reads_report() {
        let url = serve_once(
            "HTTP/1.1 200 OK",
            r#"{"period_start":"2024-03-01T00:00:00Z","accumulated_spend":4.75}"#,
        )
        .await;
        let source = HttpCostSource::new(url, DEFAULT_HTTP_TIMEOUT).unwrap();
        let report = source.current_spend().await.unwrap();
        assert_eq!(report.accumulated_spend, Spend::new(4.75).unwrap());
        assert_eq!(
            report.period_start,
            Timestamp::parse_rfc3339("2024-03-01T00:00:00Z").unwrap()
        );
    }

    #[tokio::test]
    async fn http_error_status_is_unavailable() {
        let url = serve_once("HTTP/1.1 502 Bad Gateway", "").await;
        let source = HttpCostSource::new(url, DEFAULT_HTTP_TIMEOUT).unwrap();
        let err = source.current_spend().await.unwrap_err();
        assert!(matches!(err, CostSourceError::Unavailable { .. }));
    }

    #[tokio::test]
    async fn http_body_that_is_not_a_report_is_malformed() {
        let url = serve_once("HTTP/1.1 200 OK", r#"{"spend":"lots"}"#).await;
        let source = HttpCostSource::new(url, DEFAULT_HTTP_TIMEOUT).unwrap();
        let err = source.current_spend().await.unwrap_err();
        assert!(matches!(err, CostSourceError::Malformed { .. }));
    }

    #[tokio::test]
    async fn unreachable_endpoint_is_unavailable() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let url = format!("http://{}/spend", listener.local_addr().unwrap());
        drop(listener);
        let source = HttpCostSource::new(url, Duration::from_secs(2)).unwrap();
        let err = source.current_spend().await.unwrap_err();
        assert!(matches!(err, CostSourceError::Unavailable { .. }));
    }
}
