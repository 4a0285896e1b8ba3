use std::time::Duration;

use futures::future::BoxFuture;

#[derive(Clone, Debug)]
pub struct RetryConfig {
    pub max_attempts: usize,
    pub base_backoff: Duration,
    pub max_backoff: Duration,
    pub jitter_max: Option<Duration>,
}

impl RetryConfig {
    /// Budget for progress commits.
    pub fn transactional() -> Self {
        Self {
            max_attempts: 7,
            base_backoff: Duration::from_millis(50),
            max_backoff: Duration::from_millis(1000),
            jitter_max: Some(Duration::from_millis(100)),
        }
    }
}

/// Retries `f` while it fails with an error that `is_retryable` accepts.
/// Non-retryable errors are returned immediately.
pub async fn retry_when<F, Fut, T, E, P>(config: RetryConfig, is_retryable: P, mut f: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
    P: Fn(&E) -> bool,
{
    let mut attempts_left = config.max_attempts.max(1);
    let mut backoff = config.base_backoff;

    loop {
        match f().await {
            Ok(v) => return Ok(v),
            Err(e) => {
                attempts_left = attempts_left.saturating_sub(1);
                if attempts_left == 0 || !is_retryable(&e) {
                    return Err(e);
                }

                backoff = pause(&config, backoff).await;
            }
        }
    }
}

/// Like [`retry_when`], for operations that need `&mut` access to the same
/// value on every try, such as a session whose commit must be re-sent.
pub async fn retry_with<S, T, E, P>(
    config: RetryConfig,
    is_retryable: P,
    state: &mut S,
    f: for<'s> fn(&'s mut S) -> BoxFuture<'s, Result<T, E>>,
) -> Result<T, E>
where
    P: Fn(&E) -> bool,
{
    let mut attempts_left = config.max_attempts.max(1);
    let mut backoff = config.base_backoff;

    loop {
        match f(state).await {
            Ok(v) => return Ok(v),
            Err(e) => {
                attempts_left = attempts_left.saturating_sub(1);
                if attempts_left == 0 || !is_retryable(&e) {
                    return Err(e);
                }
                backoff = pause(&config, backoff).await;
            }
        }
    }
}

/// Sleeps for `backoff` plus jitter and returns the next backoff.
async fn pause(config: &RetryConfig, backoff: Duration) -> Duration {
    let jitter = config
        .jitter_max
        .map(|max| max.as_millis() as u64)
        .filter(|ms| *ms > 0)
        .map(|ms| rand::random::<u64>() % (ms + 1))
        .unwrap_or(0);
    tokio::time::sleep(backoff + Duration::from_millis(jitter)).await;

    std::cmp::min(backoff * 2, config.max_backoff)
}
