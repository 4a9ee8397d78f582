//! Request/response transport to the metadata balancer bus.

use std::time::Duration;

use async_trait::async_trait;

use crate::error::{ProxyError, Result};

/// Service name the balancer is registered under on the bus.
pub const BALANCER_SERVICE: &str = "mastermind";

/// One msgpack request/response exchange with the balancer. Implementations
/// map failures to [`ProxyError::BalancerUnavailable`] with the original
/// message preserved.
#[async_trait]
pub trait BalancerTransport: Send + Sync {
    async fn call(&self, method: &str, payload: Vec<u8>) -> Result<Vec<u8>>;
}

/// msgpack-over-HTTP rendition of the bus: POST to
/// `{endpoint}/{service}/{method}` with a msgpack body.
pub struct HttpBalancerTransport {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpBalancerTransport {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ProxyError::Config(e.to_string()))?;

        Ok(Self {
            client,
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl BalancerTransport for HttpBalancerTransport {
    async fn call(&self, method: &str, payload: Vec<u8>) -> Result<Vec<u8>> {
        let url = format!("{}/{}/{}", self.endpoint, BALANCER_SERVICE, method);

        let response = self
            .client
            .post(&url)
            .header(reqwest::header::CONTENT_TYPE, "application/x-msgpack")
            .body(payload)
            .send()
            .await
            .map_err(|error| ProxyError::BalancerUnavailable(error.to_string()))?;

        if !response.status().is_success() {
            return Err(ProxyError::BalancerUnavailable(format!(
                "{} returned {}",
                method,
                response.status()
            )));
        }

        let body = response
            .bytes()
            .await
            .map_err(|error| ProxyError::BalancerUnavailable(error.to_string()))?;

        Ok(body.to_vec())
    }
}
