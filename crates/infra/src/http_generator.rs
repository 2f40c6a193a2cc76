// HTTP book generator
// POSTs the request to a generation service and returns its JSON body as the artifact
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use std::time::{Duration, Instant};
use tracing::{info, warn};

use quill_core::domain::{BookArtifact, BookRequest};
use quill_core::port::{BookGenerator, GenerationError};

pub struct HttpBookGenerator {
    client: Client,
    url: String,
    timeout: Duration,
}

impl HttpBookGenerator {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, GenerationError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| GenerationError::Unavailable(format!("http client: {}", e)))?;

        Ok(Self {
            client,
            url: url.into(),
            timeout,
        })
    }

    fn map_send_error(&self, e: reqwest::Error) -> GenerationError {
        if e.is_timeout() {
            GenerationError::Timeout(self.timeout.as_millis() as u64)
        } else {
            GenerationError::Unavailable(e.to_string())
        }
    }
}

#[async_trait]
impl BookGenerator for HttpBookGenerator {
    async fn generate(&self, request: &BookRequest) -> Result<BookArtifact, GenerationError> {
        let started = Instant::now();
        info!(url = %self.url, title = %request.title, "Requesting book generation");

        let response = self
            .client
            .post(&self.url)
            .json(request)
            .send()
            .await
            .map_err(|e| self.map_send_error(e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(url = %self.url, status = %status, "Generation service returned error");
            return Err(if status.is_client_error() && status != StatusCode::TOO_MANY_REQUESTS {
                GenerationError::Rejected(format!("{}: {}", status, body))
            } else {
                GenerationError::Unavailable(format!("{}: {}", status, body))
            });
        }

        let value: serde_json::Value = response.json().await.map_err(|e| {
            if e.is_timeout() {
                self.map_send_error(e)
            } else {
                GenerationError::InvalidArtifact(e.to_string())
            }
        })?;

        info!(
            url = %self.url,
            duration_ms = started.elapsed().as_millis() as u64,
            "Book generation completed"
        );
        Ok(BookArtifact::new(value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_http::{respond_once, silent};

    #[tokio::test]
    async fn test_success_returns_body() {
        let (addr, server) = respond_once(200, r#"{"title":"Ferris","chapters":[]}"#).await;
        let generator =
            HttpBookGenerator::new(format!("http://{}/generate", addr), Duration::from_secs(5)).unwrap();

        let artifact = generator.generate(&BookRequest::sample("Ferris")).await.unwrap();
        assert_eq!(artifact.as_value()["title"], "Ferris");

        let head = server.await.unwrap();
        assert!(head.starts_with("POST /generate"));
    }

    #[tokio::test]
    async fn test_client_error_is_rejected() {
        let (addr, _server) = respond_once(422, r#"{"error":"bad topic"}"#).await;
        let generator = HttpBookGenerator::new(format!("http://{}", addr), Duration::from_secs(5)).unwrap();

        let err = generator.generate(&BookRequest::sample("t")).await.unwrap_err();
        match err {
            GenerationError::Rejected(msg) => assert!(msg.contains("bad topic")),
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_server_error_is_unavailable() {
        let (addr, _server) = respond_once(503, "{}").await;
        let generator = HttpBookGenerator::new(format!("http://{}", addr), Duration::from_secs(5)).unwrap();

        let err = generator.generate(&BookRequest::sample("t")).await.unwrap_err();
        assert!(matches!(err, GenerationError::Unavailable(_)));
    }

    #[tokio::test]
    async fn test_timeout() {
        let (addr, _server) = silent().await;
        let generator =
            HttpBookGenerator::new(format!("http://{}", addr), Duration::from_millis(200)).unwrap();

        let err = generator.generate(&BookRequest::sample("t")).await.unwrap_err();
        assert_eq!(err, GenerationError::Timeout(200));
    }
}
