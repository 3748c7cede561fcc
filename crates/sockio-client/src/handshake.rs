//! Handshake collaborator.

use crate::error::HandshakeError;
use async_trait::async_trait;
use sockio_core::{Handshake, Origin};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::debug;

/// Everything needed to perform one handshake request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeRequest {
    pub origin: Origin,
    pub resource: String,
    pub params: Vec<(String, String)>,
}

impl HandshakeRequest {
    pub fn url(&self) -> String {
        self.origin.handshake_url(&self.resource)
    }
}

/// Obtains a session id and heartbeat timeout from the server.
#[async_trait]
pub trait Handshaker: Send + Sync + 'static {
    async fn handshake(&self, request: &HandshakeRequest) -> Result<Handshake, HandshakeError>;
}

/// Performs the handshake over HTTP.
#[derive(Debug, Clone, Default)]
pub struct HttpHandshaker {
    client: reqwest::Client,
}

impl HttpHandshaker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Handshaker for HttpHandshaker {
    async fn handshake(&self, request: &HandshakeRequest) -> Result<Handshake, HandshakeError> {
        let url = request.url();
        // Cache buster, as browsers' clients send it.
        let t = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis())
            .unwrap_or_default()
            .to_string();

        let mut query: Vec<(&str, &str)> = vec![("t", t.as_str())];
        query.extend(request.params.iter().map(|(k, v)| (k.as_str(), v.as_str())));

        debug!(%url, "sending handshake");
        let response = self.client.get(&url).query(&query).send().await?;
        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(HandshakeError::Status {
                status: status.as_u16(),
                body,
            });
        }
        Ok(body.parse()?)
    }
}
