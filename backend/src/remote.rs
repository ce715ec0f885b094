use async_trait::async_trait;
use reqwest::{header::CONTENT_TYPE, StatusCode};

use crate::config::RemoteSettings;
use crate::record::Outbound;

#[derive(Debug, thiserror::Error)]
pub enum DeliveryError {
    #[error("request to {url} failed: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },
}

/// Pushes a single record to the remote aggregation API.
#[async_trait]
pub trait Deliver<T>: Send + Sync {
    /// Status the remote answered with. Only `201 Created` means accepted.
    async fn deliver(&self, entry: &T) -> Result<StatusCode, DeliveryError>;
}

#[derive(Debug, Clone)]
pub struct RemoteSender {
    client: reqwest::Client,
    base_url: String,
}

impl RemoteSender {
    pub fn new(settings: &RemoteSettings) -> anyhow::Result<Self> {
        let mut builder =
            reqwest::Client::builder().danger_accept_invalid_certs(settings.accept_invalid_certs);
        if let Some(timeout) = settings.request_timeout {
            builder = builder.timeout(timeout);
        }

        Ok(Self {
            client: builder.build()?,
            base_url: settings.base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }
}

#[async_trait]
impl<T: Outbound> Deliver<T> for RemoteSender {
    async fn deliver(&self, entry: &T) -> Result<StatusCode, DeliveryError> {
        let url = self.endpoint(T::ENDPOINT);

        let resp = self
            .client
            .post(&url)
            .header(CONTENT_TYPE, "application/json")
            .json(&entry.payload())
            .send()
            .await
            .map_err(|source| DeliveryError::Transport {
                url: url.clone(),
                source,
            })?;

        Ok(resp.status())
    }
}
