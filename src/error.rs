//! Error types for the heat pipeline.
//!
//! Only validation errors reach a caller of [`Ingestor::ingest`](crate::Ingestor::ingest).
//! Store and publish failures are transient: the sweeper and view builder log
//! them and carry on with the next tick or notification.

use std::time::Duration;

use thiserror::Error;

use crate::report::ReportId;

/// Result alias used across the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level pipeline error.
#[derive(Debug, Clone, Error)]
#[cfg_attr(feature = "ffi", derive(uniffi::Error))]
#[cfg_attr(feature = "ffi", uniffi(flat_error))]
pub enum Error {
    #[error("invalid coordinate ({latitude}, {longitude})")]
    InvalidCoordinate { latitude: f64, longitude: f64 },

    #[error("invalid weight {0}: must be positive and finite")]
    InvalidWeight(f64),

    #[error("invalid accuracy {0}: must be non-negative and finite")]
    InvalidAccuracy(f64),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("publish error: {0}")]
    Publish(#[from] PublishError),

    #[error("invalid configuration: {0}")]
    Config(String),
}

/// Failure talking to the shared report store.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum StoreError {
    #[error("store call timed out after {0:?}")]
    Timeout(Duration),

    #[error("report {0} not found")]
    NotFound(ReportId),

    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Failure handing a dataset to the heat layer consumer.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum PublishError {
    #[error("dataset rejected: {0}")]
    Rejected(String),

    #[error("transport failure: {0}")]
    Transport(String),
}

/// Run a store future with a bounded timeout.
///
/// Elapsed timeouts become [`StoreError::Timeout`].
pub(crate) async fn with_timeout<T, F>(limit: Duration, fut: F) -> std::result::Result<T, StoreError>
where
    F: std::future::Future<Output = std::result::Result<T, StoreError>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(StoreError::Timeout(limit)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_with_timeout_passes_result_through() {
        let out = with_timeout(Duration::from_millis(50), async { Ok::<_, StoreError>(7) }).await;
        assert_eq!(out, Ok(7));
    }

    #[tokio::test(start_paused = true)]
    async fn test_with_timeout_elapses() {
        let out: std::result::Result<(), StoreError> = with_timeout(Duration::from_millis(20), async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        })
        .await;
        assert_eq!(out, Err(StoreError::Timeout(Duration::from_millis(20))));
    }

    #[test]
    fn test_store_error_converts() {
        let err: Error = StoreError::Unavailable("offline".into()).into();
        assert!(matches!(err, Error::Store(StoreError::Unavailable(_))));
        assert_eq!(err.to_string(), "store error: store unavailable: offline");
    }
}
