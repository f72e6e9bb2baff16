//! HTTP heat layer publisher.
//!
//! Pushes each complete dataset as GeoJSON to a remote heat layer endpoint:
//! - one `PUT` per dataset, replacing whatever the endpoint held
//! - connection pooling with keep-alive
//! - no retry loop: a failed push is superseded by the next dataset

use std::time::{Duration, Instant};

use base64::Engine;
use futures::future::{BoxFuture, FutureExt};
use log::{debug, info, warn};
use reqwest::Client;

use crate::error::PublishError;
use crate::heatmap::FeatureCollection;
use crate::publish::HeatLayerPublisher;

const REQUEST_TIMEOUT_SECS: u64 = 10;

/// Publishes datasets to `url` with Basic auth.
pub struct HttpPublisher {
    client: Client,
    url: String,
    auth_header: String,
}

impl HttpPublisher {
    /// Create a publisher for `url` authenticating with `api_key`.
    pub fn new(url: &str, api_key: &str) -> Result<Self, PublishError> {
        let auth = base64::engine::general_purpose::STANDARD.encode(format!("API_KEY:{}", api_key));

        let client = Client::builder()
            .pool_idle_timeout(Duration::from_secs(60))
            .tcp_keepalive(Duration::from_secs(30))
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .map_err(|e| PublishError::Transport(format!("Failed to create HTTP client: {}", e)))?;

        info!("[HttpPublisher] Publishing to {}", url);

        Ok(Self {
            client,
            url: url.to_string(),
            auth_header: format!("Basic {}", auth),
        })
    }

    async fn put(&self, features: FeatureCollection) -> Result<(), PublishError> {
        let start = Instant::now();
        let body = features.to_geojson();

        let response = self
            .client
            .put(&self.url)
            .header("Authorization", &self.auth_header)
            .json(&body)
            .send()
            .await
            .map_err(|e| PublishError::Transport(format!("Request error: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            warn!("[HttpPublisher] {} rejected dataset: HTTP {}", self.url, status);
            return Err(PublishError::Rejected(format!("HTTP {}", status)));
        }

        debug!(
            "[HttpPublisher] Pushed {} features in {:?}",
            features.len(),
            start.elapsed()
        );
        Ok(())
    }
}

impl HeatLayerPublisher for HttpPublisher {
    fn replace_all(&self, features: FeatureCollection) -> BoxFuture<'_, Result<(), PublishError>> {
        self.put(features).boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_auth_header_encoding() {
        let publisher = HttpPublisher::new("http://localhost:9/layer", "secret").unwrap();
        // base64("API_KEY:secret")
        assert_eq!(publisher.auth_header, "Basic QVBJX0tFWTpzZWNyZXQ=");
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_is_transport_error() {
        // Port 9 (discard) is closed on test machines
        let publisher = HttpPublisher::new("http://127.0.0.1:9/layer", "k").unwrap();
        let err = publisher.replace_all(FeatureCollection::default()).await.unwrap_err();
        assert!(matches!(err, PublishError::Transport(_)));
    }
}
