//! Semaphore-bounded concurrency limiter (§4.F).

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Semaphore, SemaphorePermit};

use crate::error::PayBridgeError;

#[derive(Debug, Clone)]
pub struct BulkheadConfig {
    pub max_concurrent_calls: usize,
    pub max_wait: Duration,
}

impl Default for BulkheadConfig {
    fn default() -> Self {
        Self { max_concurrent_calls: 16, max_wait: Duration::from_millis(500) }
    }
}

/// Bounds concurrent in-flight calls to a service. Acquiring a permit blocks
/// up to `max_wait`; a timed-out wait fails with `SATURATED` rather than
/// queuing indefinitely. Dropping the returned permit (including via
/// cancellation) releases it immediately (§5 property 7).
pub struct Bulkhead {
    service: String,
    semaphore: Arc<Semaphore>,
    config: BulkheadConfig,
}

impl Bulkhead {
    pub fn new(service: impl Into<String>, config: BulkheadConfig) -> Self {
        Self { service: service.into(), semaphore: Arc::new(Semaphore::new(config.max_concurrent_calls)), config }
    }

    pub async fn acquire(&self) -> Result<SemaphorePermit<'_>, PayBridgeError> {
        match tokio::time::timeout(self.config.max_wait, self.semaphore.acquire()).await {
            Ok(Ok(permit)) => Ok(permit),
            Ok(Err(_)) => Err(PayBridgeError::Internal(format!("bulkhead semaphore closed for {}", self.service))),
            Err(_) => Err(PayBridgeError::Saturated {
                service: self.service.clone(),
                reason: "bulkhead wait exceeded".to_string(),
            }),
        }
    }

    pub fn available_permits(&self) -> usize {
        self.semaphore.available_permits()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn acquires_permit_within_capacity() {
        let bulkhead = Bulkhead::new("clearing", BulkheadConfig { max_concurrent_calls: 2, max_wait: Duration::from_millis(50) });
        let _p1 = bulkhead.acquire().await.unwrap();
        let _p2 = bulkhead.acquire().await.unwrap();
        assert_eq!(bulkhead.available_permits(), 0);
    }

    #[tokio::test]
    async fn saturates_when_no_permits_available_within_wait() {
        let bulkhead = Bulkhead::new("clearing", BulkheadConfig { max_concurrent_calls: 1, max_wait: Duration::from_millis(20) });
        let _held = bulkhead.acquire().await.unwrap();
        let err = bulkhead.acquire().await.unwrap_err();
        assert!(matches!(err, PayBridgeError::Saturated { .. }));
    }

    #[tokio::test]
    async fn dropping_a_permit_releases_it_immediately() {
        let bulkhead = Bulkhead::new("clearing", BulkheadConfig { max_concurrent_calls: 1, max_wait: Duration::from_millis(50) });
        {
            let _held = bulkhead.acquire().await.unwrap();
        }
        assert_eq!(bulkhead.available_permits(), 1);
        assert!(bulkhead.acquire().await.is_ok());
    }
}
