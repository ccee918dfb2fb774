//! Small `Result`-oriented helpers layered on top of what `std` and `tokio`
//! already provide. `map`, `and_then`, `map_err`, `or_else` and `collect` are
//! the standard library's own `Result`/`Iterator` methods and are used
//! directly rather than reimplemented here.

use std::{future::Future, time::Duration};

use futures::FutureExt;

/// Combine two independent results into a tuple, keeping the first error.
pub fn combine2<A, B, E>(a: Result<A, E>, b: Result<B, E>) -> Result<(A, B), E> {
    let a = a?;
    let b = b?;
    Ok((a, b))
}

/// Combine three independent results into a tuple, keeping the first error.
pub fn combine3<A, B, C, E>(
    a: Result<A, E>,
    b: Result<B, E>,
    c: Result<C, E>,
) -> Result<(A, B, C), E> {
    let a = a?;
    let b = b?;
    let c = c?;
    Ok((a, b, c))
}

/// Run every future to completion concurrently and keep the first error.
///
/// Unlike short-circuiting combinators, every future is polled to
/// completion; only the first `Err` among the settled results is returned.
pub async fn parallel<T, E, F>(futures: Vec<F>) -> Result<Vec<T>, E>
where
    F: Future<Output = Result<T, E>>,
{
    let settled = futures::future::join_all(futures).await;
    settled.into_iter().collect()
}

/// Parameters for [`retry`].
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl RetryPolicy {
    #[must_use]
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
        }
    }
}

/// Retry an async step with exponential backoff, stopping as soon as
/// `is_retryable` reports `false` for the latest error or attempts run out.
pub async fn retry<T, E, Fut, F, R>(
    policy: RetryPolicy,
    is_retryable: R,
    mut step: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    R: Fn(&E) -> bool,
{
    let mut attempt = 0;
    loop {
        attempt += 1;
        match step().await {
            Ok(value) => return Ok(value),
            Err(err) if attempt < policy.max_attempts && is_retryable(&err) => {
                let delay = policy.base_delay * 2u32.saturating_pow(attempt - 1);
                tokio::time::sleep(delay).await;
            }
            Err(err) => return Err(err),
        }
    }
}

/// Catch a panic raised by a synchronous boundary call (typically a call
/// into an external, non-`Result`-returning library) and convert it into a
/// string error rather than unwinding through the caller.
pub fn try_catch_sync<T>(f: impl FnOnce() -> T + std::panic::UnwindSafe) -> Result<T, String> {
    std::panic::catch_unwind(f).map_err(|payload| panic_message(&payload))
}

/// Catch a panic raised while awaiting an async boundary call.
pub async fn try_catch_async<T, F>(fut: F) -> Result<T, String>
where
    F: Future<Output = T> + std::panic::UnwindSafe,
{
    std::panic::AssertUnwindSafe(fut)
        .catch_unwind()
        .await
        .map_err(|payload| panic_message(&payload))
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_owned()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "panicked with a non-string payload".to_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn combine2_keeps_first_error() {
        let result: Result<(u32, u32), &str> = combine2(Ok(1), Err("boom"));
        assert_eq!(result, Err("boom"));
    }

    #[test]
    fn combine3_succeeds_when_all_ok() {
        let result: Result<(u32, u32, u32), &str> = combine3(Ok(1), Ok(2), Ok(3));
        assert_eq!(result, Ok((1, 2, 3)));
    }

    #[tokio::test]
    async fn parallel_runs_all_and_reports_first_error() {
        let futures: Vec<_> = vec![
            Box::pin(async { Ok::<_, &str>(1) }) as std::pin::Pin<Box<dyn Future<Output = _>>>,
            Box::pin(async { Err::<u32, _>("boom") }),
        ];
        let result = parallel(futures).await;
        assert_eq!(result, Err("boom"));
    }

    #[tokio::test]
    async fn retry_gives_up_when_not_retryable() {
        let mut calls = 0;
        let result = retry(
            RetryPolicy::new(5, Duration::from_millis(1)),
            |_: &&str| false,
            || {
                calls += 1;
                async { Err::<u32, _>("fatal") }
            },
        )
        .await;
        assert_eq!(result, Err("fatal"));
        assert_eq!(calls, 1);
    }

    #[tokio::test]
    async fn retry_succeeds_after_transient_failures() {
        let mut calls = 0;
        let result = retry(
            RetryPolicy::new(5, Duration::from_millis(1)),
            |_: &&str| true,
            || {
                calls += 1;
                let succeed = calls >= 3;
                async move {
                    if succeed {
                        Ok::<_, &str>(calls)
                    } else {
                        Err("transient")
                    }
                }
            },
        )
        .await;
        assert_eq!(result, Ok(3));
    }

    #[test]
    fn try_catch_sync_converts_panic_to_error() {
        let result = try_catch_sync(|| -> u32 { panic!("exploded") });
        assert!(result.is_err());
    }

    #[test]
    fn try_catch_sync_passes_through_success() {
        let result = try_catch_sync(|| 42);
        assert_eq!(result, Ok(42));
    }
}
