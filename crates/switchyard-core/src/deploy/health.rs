//! Health checks used before and after a promotion

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client as HttpClient;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

use crate::Result;

/// Result of one health check
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthReport {
    pub healthy: bool,
    pub status_code: Option<u16>,
    pub message: Option<String>,
    /// JSON body, when the endpoint returned one
    pub payload: Option<Value>,
    pub checked_at: DateTime<Utc>,
}

impl HealthReport {
    pub fn healthy() -> Self {
        Self {
            healthy: true,
            status_code: None,
            message: None,
            payload: None,
            checked_at: Utc::now(),
        }
    }

    pub fn unhealthy(message: impl Into<String>) -> Self {
        Self {
            healthy: false,
            status_code: None,
            message: Some(message.into()),
            payload: None,
            checked_at: Utc::now(),
        }
    }
}

/// Something that can tell whether the serving system is healthy.
///
/// Implementations report failures as unhealthy reports instead of errors.
#[async_trait]
pub trait HealthProbe: Send + Sync {
    async fn check(&self) -> HealthReport;
}

/// GET an endpoint; a success status within the timeout means healthy
#[derive(Debug, Clone)]
pub struct HttpHealthProbe {
    client: HttpClient,
    url: String,
}

impl HttpHealthProbe {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = HttpClient::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl HealthProbe for HttpHealthProbe {
    async fn check(&self) -> HealthReport {
        let response = match self.client.get(&self.url).send().await {
            Ok(response) => response,
            Err(e) => {
                debug!(url = %self.url, error = %e, "Health check request failed");
                return HealthReport::unhealthy(e.to_string());
            }
        };

        let status = response.status();
        let payload = response.json::<Value>().await.ok();
        debug!(url = %self.url, status = status.as_u16(), "Health check");
        HealthReport {
            healthy: status.is_success(),
            status_code: Some(status.as_u16()),
            message: if status.is_success() {
                None
            } else {
                Some(format!("endpoint returned {}", status))
            },
            payload,
            checked_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Serve `count` requests with a canned HTTP response
    async fn serve(response: &'static str, count: usize) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            for _ in 0..count {
                let (mut socket, _) = listener.accept().await.unwrap();
                let mut buf = [0u8; 1024];
                let _ = socket.read(&mut buf).await;
                socket.write_all(response.as_bytes()).await.unwrap();
                socket.shutdown().await.ok();
            }
        });
        format!("http://{}/health", addr)
    }

    #[tokio::test]
    async fn test_success_status_is_healthy() {
        let url = serve(
            "HTTP/1.1 200 OK\r\ncontent-type: application/json\r\ncontent-length: 15\r\nconnection: close\r\n\r\n{\"status\":\"ok\"}",
            1,
        )
        .await;
        let probe = HttpHealthProbe::new(url, Duration::from_secs(2)).unwrap();
        let report = probe.check().await;

        assert!(report.healthy);
        assert_eq!(report.status_code, Some(200));
        assert_eq!(report.payload.unwrap()["status"], "ok");
    }

    #[tokio::test]
    async fn test_error_status_is_unhealthy() {
        let url = serve(
            "HTTP/1.1 503 Service Unavailable\r\ncontent-length: 0\r\nconnection: close\r\n\r\n",
            1,
        )
        .await;
        let probe = HttpHealthProbe::new(url, Duration::from_secs(2)).unwrap();
        let report = probe.check().await;

        assert!(!report.healthy);
        assert_eq!(report.status_code, Some(503));
        assert!(report.payload.is_none());
    }

    #[tokio::test]
    async fn test_unreachable_is_unhealthy() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let probe = HttpHealthProbe::new(format!("http://{}/health", addr), Duration::from_millis(500)).unwrap();
        let report = probe.check().await;
        assert!(!report.healthy);
        assert!(report.status_code.is_none());
        assert!(report.message.is_some());
    }
}
