//! HTTP transport for the ERP bulk endpoint.
//!
//! [`BatchTransport`] is the seam the executor talks to. The production
//! implementation, [`HttpBatchTransport`], posts to
//! `<endpoint>/execute` with a bearer token using [`reqwest`].

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::wire::{parse_response, BulkRequest, BulkResponse};

/// Default per-call timeout.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

/// Errors from a single bulk call.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// No response was received (connect, DNS, TLS, timeout, ...).
    #[error("ERP request failed: {0}")]
    Network(String),

    /// The ERP answered with a non-2xx status.
    #[error("ERP API error ({status}): {body}")]
    Status {
        status: u16,
        body: String,
    },

    /// A 2xx response whose body is not a bulk response.
    #[error("ERP response could not be decoded: {0}")]
    Decode(String),

    /// No endpoint is configured for the environment.
    #[error("No ERP endpoint configured for environment '{0}'")]
    UnknownEnvironment(String),

    /// The bearer token could not be obtained.
    #[error("ERP credentials unavailable: {0}")]
    Credentials(String),
}

impl From<reqwest::Error> for TransportError {
    fn from(e: reqwest::Error) -> Self {
        Self::Network(e.to_string())
    }
}

/// Sends one program's transactions to an environment's ERP.
#[async_trait]
pub trait BatchTransport: Send + Sync {
    async fn execute(
        &self,
        environment: &str,
        request: &BulkRequest,
    ) -> Result<BulkResponse, TransportError>;
}

/// Supplies the bearer token for an environment.
#[async_trait]
pub trait BearerTokenSource: Send + Sync {
    async fn bearer_token(&self, environment: &str) -> Result<String, TransportError>;
}

/// The same pre-issued token for every environment.
pub struct StaticBearerToken(String);

impl StaticBearerToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }
}

#[async_trait]
impl BearerTokenSource for StaticBearerToken {
    async fn bearer_token(&self, _environment: &str) -> Result<String, TransportError> {
        if self.0.is_empty() {
            return Err(TransportError::Credentials("no bearer token configured".into()));
        }
        Ok(self.0.clone())
    }
}

// ---------------------------------------------------------------------------
// HttpBatchTransport
// ---------------------------------------------------------------------------

/// reqwest-backed transport with one base URL per environment.
pub struct HttpBatchTransport {
    client: reqwest::Client,
    endpoints: HashMap<String, String>,
    tokens: Arc<dyn BearerTokenSource>,
}

impl HttpBatchTransport {
    /// Build a transport whose calls time out after `timeout`.
    pub fn new(
        endpoints: HashMap<String, String>,
        tokens: Arc<dyn BearerTokenSource>,
        timeout: Duration,
    ) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self::with_client(client, endpoints, tokens))
    }

    /// Reuse an existing [`reqwest::Client`].
    pub fn with_client(
        client: reqwest::Client,
        endpoints: HashMap<String, String>,
        tokens: Arc<dyn BearerTokenSource>,
    ) -> Self {
        Self {
            client,
            endpoints,
            tokens,
        }
    }

    pub fn environments(&self) -> impl Iterator<Item = &str> {
        self.endpoints.keys().map(String::as_str)
    }

    fn execute_url(&self, environment: &str) -> Result<String, TransportError> {
        self.endpoints
            .get(environment)
            .map(|base| format!("{}/execute", base.trim_end_matches('/')))
            .ok_or_else(|| TransportError::UnknownEnvironment(environment.to_string()))
    }

    // ---- private helpers ----

    async fn ensure_success(
        response: reqwest::Response,
    ) -> Result<reqwest::Response, TransportError> {
        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            return Err(TransportError::Status {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }
}

#[async_trait]
impl BatchTransport for HttpBatchTransport {
    async fn execute(
        &self,
        environment: &str,
        request: &BulkRequest,
    ) -> Result<BulkResponse, TransportError> {
        let url = self.execute_url(environment)?;
        let token = self.tokens.bearer_token(environment).await?;

        tracing::debug!(
            environment,
            program = %request.program,
            transactions = request.transactions.len(),
            "Sending ERP bulk call",
        );

        let response = self
            .client
            .post(url)
            .bearer_auth(token)
            .json(request)
            .send()
            .await?;

        let body = Self::ensure_success(response).await?.text().await?;
        parse_response(&body).map_err(|e| TransportError::Decode(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn transport() -> HttpBatchTransport {
        let endpoints = HashMap::from([
            ("prod".to_string(), "https://erp.example.com/m3api/".to_string()),
            ("test".to_string(), "https://erp-test.example.com".to_string()),
        ]);
        HttpBatchTransport::with_client(
            reqwest::Client::new(),
            endpoints,
            Arc::new(StaticBearerToken::new("t0ken")),
        )
    }

    #[test]
    fn execute_url_joins_base() {
        let t = transport();
        assert_eq!(
            t.execute_url("prod").unwrap(),
            "https://erp.example.com/m3api/execute"
        );
        assert_eq!(
            t.execute_url("test").unwrap(),
            "https://erp-test.example.com/execute"
        );
    }

    #[tokio::test]
    async fn unknown_environment_is_rejected_before_sending() {
        let t = transport();
        let request = BulkRequest {
            program: "PMS100MI".into(),
            transactions: vec![],
        };
        let err = t.execute("dev", &request).await.unwrap_err();
        assert!(matches!(err, TransportError::UnknownEnvironment(env) if env == "dev"));
    }

    #[tokio::test]
    async fn empty_static_token_is_a_credentials_error() {
        let source = StaticBearerToken::new("");
        assert!(matches!(
            source.bearer_token("prod").await,
            Err(TransportError::Credentials(_))
        ));
    }
}
