//! RPC gateway HTTP client.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;

use super::{DiscoveryFilter, RpcClient, RpcError, RpcReply, RpcRequest};

/// [`RpcClient`] that forwards requests to an RPC gateway as JSON over HTTP.
#[derive(Clone)]
pub struct HttpRpcClient {
    client: reqwest::Client,
    base_url: String,
    timeout: Duration,
}

impl HttpRpcClient {
    /// Create a new gateway client.
    pub fn new(base_url: &str, timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_default();

        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            timeout,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn post<T, R>(&self, path: &str, body: &T) -> Result<R, RpcError>
    where
        T: serde::Serialize + ?Sized,
        R: serde::de::DeserializeOwned,
    {
        let response = self
            .client
            .post(format!("{}{}", self.base_url, path))
            .json(body)
            .send()
            .await
            .map_err(|e| self.map_error(e))?;

        match response.status() {
            StatusCode::OK => response
                .json::<R>()
                .await
                .map_err(|e| RpcError::Protocol(e.to_string())),
            status => {
                let body = response.text().await.unwrap_or_default();
                Err(RpcError::Transport(format!("Status {}: {}", status, body)))
            }
        }
    }

    fn map_error(&self, e: reqwest::Error) -> RpcError {
        if e.is_timeout() {
            RpcError::Timeout(self.timeout.as_secs())
        } else {
            RpcError::Transport(e.to_string())
        }
    }
}

#[async_trait]
impl RpcClient for HttpRpcClient {
    async fn call(&self, request: &RpcRequest) -> Result<Vec<RpcReply>, RpcError> {
        tracing::debug!(
            action = %request.qualified_action(),
            nodes = request.nodes.len(),
            "Sending RPC request to gateway"
        );
        self.post("/rpc", request).await
    }

    async fn discover(&self, filter: &DiscoveryFilter) -> Result<Vec<String>, RpcError> {
        self.post("/discover", filter).await
    }
}

impl std::fmt::Debug for HttpRpcClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpRpcClient")
            .field("base_url", &self.base_url)
            .field("timeout", &self.timeout)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_url_trimmed() {
        let client = HttpRpcClient::new("http://localhost:8086/", Duration::from_secs(5));
        assert_eq!(client.base_url(), "http://localhost:8086");
    }

    #[tokio::test]
    async fn test_unreachable_gateway_is_transport_error() {
        let client = HttpRpcClient::new("http://127.0.0.1:9", Duration::from_secs(2));
        let request = RpcRequest::new("rpcutil", "ping", vec!["n1".to_string()]);

        let result = client.call(&request).await;
        assert!(matches!(
            result,
            Err(RpcError::Transport(_)) | Err(RpcError::Timeout(_))
        ));
    }
}
