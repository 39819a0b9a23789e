use std::future::Future;

use tokio::time::sleep;

use crate::{NetError, NetResult, RetryPolicy};

/// Run `op` until it succeeds, the error is not retryable, or the policy's
/// attempt budget is spent.
///
/// `op` is a factory so each attempt gets a fresh future.
pub async fn retrying<T, F, Fut>(policy: &RetryPolicy, mut op: F) -> NetResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = NetResult<T>>,
{
    let mut attempt = 0;
    loop {
        let delay = policy.delay_for_attempt(attempt);
        if !delay.is_zero() {
            sleep(delay).await;
        }

        match op().await {
            Ok(value) => return Ok(value),
            Err(error) => {
                if !error.is_retryable() {
                    return Err(error);
                }
                if attempt >= policy.max_retries {
                    return Err(NetError::RetryExhausted {
                        max_retries: policy.max_retries,
                        source: Box::new(error),
                    });
                }
                tracing::debug!(attempt, %error, "retryable request failure");
                attempt += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        Arc,
        atomic::{AtomicU32, Ordering},
    };

    use super::*;

    fn policy(max_retries: u32) -> RetryPolicy {
        RetryPolicy {
            max_retries,
            base_delay: std::time::Duration::from_millis(1),
            max_delay: std::time::Duration::from_millis(2),
        }
    }

    #[tokio::test]
    async fn succeeds_after_transient_failures() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);
        let result = retrying(&policy(3), move || {
            let counter = Arc::clone(&counter);
            async move {
                if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(NetError::Timeout)
                } else {
                    Ok(42u32)
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn non_retryable_error_fails_fast() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);
        let result: NetResult<u32> = retrying(&policy(3), move || {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(NetError::HttpStatus {
                    status: 404,
                    url: url::Url::parse("http://example.com/u").unwrap(),
                    body: None,
                })
            }
        })
        .await;
        assert!(matches!(result, Err(NetError::HttpStatus { status: 404, .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn exhausts_attempts_and_reports() {
        let result: NetResult<u32> =
            retrying(&policy(2), || async { Err(NetError::Timeout) }).await;
        match result {
            Err(NetError::RetryExhausted { max_retries, source }) => {
                assert_eq!(max_retries, 2);
                assert!(matches!(*source, NetError::Timeout));
            }
            other => panic!("expected RetryExhausted, got {other:?}"),
        }
    }
}
