//! Hard per-call deadline (§4.F). On breach the pending operation future is
//! dropped, cancelling any cooperatively-cancellable work inside it.

use std::time::Duration;

use crate::error::PayBridgeError;

pub async fn execute_with_deadline<T, Fut>(deadline: Duration, operation: Fut) -> Result<T, PayBridgeError>
where
    Fut: std::future::Future<Output = Result<T, PayBridgeError>>,
{
    match tokio::time::timeout(deadline, operation).await {
        Ok(result) => result,
        Err(_) => Err(PayBridgeError::TimedOut { elapsed_ms: deadline.as_millis() as u64 }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn completes_within_deadline() {
        let result = execute_with_deadline(Duration::from_millis(50), async { Ok::<_, PayBridgeError>(7) }).await;
        assert_eq!(result.unwrap(), 7);
    }

    #[tokio::test]
    async fn times_out_past_deadline() {
        let result = execute_with_deadline(Duration::from_millis(5), async {
            tokio::time::sleep(Duration::from_millis(200)).await;
            Ok::<_, PayBridgeError>(7)
        })
        .await;
        assert!(matches!(result, Err(PayBridgeError::TimedOut { .. })));
    }
}
