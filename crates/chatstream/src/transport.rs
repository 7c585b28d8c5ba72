use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{BoxStream, StreamExt};
use reqwest::Client;
use std::time::Duration;

use crate::errors::TransportError;
use crate::providers::base::ProviderRequest;

#[cfg(test)]
pub mod mock;

pub type ByteStream = BoxStream<'static, Result<Bytes, TransportError>>;

/// A streaming HTTP client. Dropping the returned stream releases the connection,
/// which is how an in-flight request is cancelled.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn open(&self, request: ProviderRequest) -> Result<ByteStream, TransportError>;
}

pub struct HttpTransport {
    client: Client,
}

impl HttpTransport {
    pub fn new() -> Result<Self, TransportError> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(30))
            .build()?;

        Ok(Self { client })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn open(&self, request: ProviderRequest) -> Result<ByteStream, TransportError> {
        let mut builder = self.client.post(&request.url).json(&request.body);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }

        let response = builder.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::error!(status = status.as_u16(), body = %body, "backend rejected request");
            return Err(TransportError::Status {
                status: status.as_u16(),
                body,
            });
        }

        Ok(response
            .bytes_stream()
            .map(|chunk| chunk.map_err(TransportError::from))
            .boxed())
    }
}
