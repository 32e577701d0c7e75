//! Support utilities for [`keen_retry`]'s retry API.

use std::time::Duration;

use async_openai::error::OpenAIError;
use keen_retry::{ExponentialJitter, ResolvedResult, RetryResult};
use reqwest::StatusCode;

use crate::prelude::*;

/// On error, return either a [`RetryResult::Transient`] or [`RetryResult::Fatal`]
/// value, depending on the return value of [`IsKnownTransient::is_known_transient`].
macro_rules! try_potentially_transient {
    ($result:expr) => {
        match $result {
            Ok(value) => value,
            Err(error) if $crate::retry::IsKnownTransient::is_known_transient(&error) => {
                debug!("Potentially transient error: {:?}", error);
                return ::keen_retry::RetryResult::Transient {
                    input: (),
                    error: From::from(error),
                };
            }
            Err(error) => {
                return ::keen_retry::RetryResult::Fatal {
                    input: (),
                    error: From::from(error),
                };
            }
        }
    };
}

// Here's a trick to export a macro within a crate as if it were a normal
// symbol.
pub(crate) use try_potentially_transient;

/// A [`RetryResult`] for model requests. This allows model clients to
/// distinguish between errors that may be transient, and errors that are
/// definitely fatal.
pub type ModelRetryResult<T> = RetryResult<(), (), T, anyhow::Error>;

/// Build an [`RetryResult::Ok`] value.
pub(crate) fn retry_result_ok<T, E>(output: T) -> RetryResult<(), (), T, E> {
    RetryResult::Ok {
        reported_input: (),
        output,
    }
}

/// Build an [`RetryResult::Fatal`] value.
pub(crate) fn retry_result_fatal<T, E>(error: E) -> RetryResult<(), (), T, E> {
    RetryResult::Fatal { input: (), error }
}

/// Run `attempt`, retrying transient failures with exponential backoff, and
/// collapse the outcome into an ordinary [`Result`].
///
/// Errors from earlier attempts are logged and otherwise dropped. If we give
/// up, the final error is returned.
pub async fn retry_transient<T, F, Fut>(mut attempt: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = ModelRetryResult<T>>,
{
    let jitter = ExponentialJitter::FromBackoffRange {
        backoff_range_millis: 250..=10_000,
        re_attempts: 4,
        jitter_ratio: 0.2,
    };
    let resolved = attempt()
        .await
        .retry_with_async(|_| attempt())
        .with_exponential_jitter(|| jitter)
        .await
        .inspect_recovered(|_, _, retry_errors_list| {
            warn!(
                "succeeded after retrying {} times (failed attempts: [{}])",
                retry_errors_list.len(),
                keen_retry::loggable_retry_errors(retry_errors_list)
            )
        })
        .inspect_given_up(|_, retry_errors_list, fatal_error| {
            error!(
                "FAILED after exhausting all {} retrying attempts with error {fatal_error:?}. Previous transient failures: [{}]",
                retry_errors_list.len(),
                keen_retry::loggable_retry_errors(retry_errors_list)
            )
        });
    match resolved {
        ResolvedResult::Ok { output, .. } | ResolvedResult::Recovered { output, .. } => {
            Ok(output)
        }
        ResolvedResult::Fatal { error, .. } => Err(error),
        ResolvedResult::GivenUp { fatal_error, .. }
        | ResolvedResult::Unrecoverable { fatal_error, .. } => Err(fatal_error),
    }
}

/// Is this error a known transient error?
///
/// By default, we assume errors are not transient, until they're been observed
/// in the wild, investigated and determined to be transient. The prevents us
/// from doing large numbers of retries with exponential backoff on errors that
/// will never resolve.
pub trait IsKnownTransient {
    /// Is this error likely to be transient?
    fn is_known_transient(&self) -> bool;
}

impl IsKnownTransient for reqwest::Error {
    fn is_known_transient(&self) -> bool {
        if let Some(status) = self.status() {
            status.is_known_transient()
        } else {
            // Assume all other kinds of HTTP errors are transient. Model
            // servers started on demand (like Ollama loading weights) refuse
            // connections for a while.
            true
        }
    }
}

impl IsKnownTransient for StatusCode {
    fn is_known_transient(&self) -> bool {
        let transient_failures = [
            StatusCode::TOO_MANY_REQUESTS,
            StatusCode::BAD_GATEWAY,
            StatusCode::SERVICE_UNAVAILABLE,
            StatusCode::GATEWAY_TIMEOUT,
        ];
        transient_failures.contains(self)
    }
}

impl IsKnownTransient for OpenAIError {
    fn is_known_transient(&self) -> bool {
        match self {
            OpenAIError::Reqwest(err) => err.is_known_transient(),
            OpenAIError::ApiError(err) => {
                err.r#type.as_deref() == Some("server_error")
            }
            _ => false,
        }
    }
}

/// An error which occurred while calling a model server.
///
/// Used internally to represent request timeouts.
#[derive(Debug)]
pub enum ModelError<E> {
    /// An error from the underlying client.
    Native(E),

    /// The request did not complete in time.
    Timeout(Duration),
}

impl<E> IsKnownTransient for ModelError<E>
where
    E: IsKnownTransient,
{
    fn is_known_transient(&self) -> bool {
        match self {
            ModelError::Native(err) => err.is_known_transient(),
            // Runaway generations and overloaded servers can be retried with
            // hope of a better result.
            ModelError::Timeout(_) => true,
        }
    }
}

impl<E> std::fmt::Display for ModelError<E>
where
    E: std::fmt::Display,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ModelError::Native(err) => write!(f, "model error: {err}"),
            ModelError::Timeout(timeout) => {
                write!(f, "model request timed out after {}s", timeout.as_secs())
            }
        }
    }
}

impl<E> std::error::Error for ModelError<E>
where
    E: std::error::Error + 'static,
{
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ModelError::Native(err) => Some(err),
            ModelError::Timeout(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    #[test]
    fn only_overload_statuses_are_transient() {
        assert!(StatusCode::SERVICE_UNAVAILABLE.is_known_transient());
        assert!(StatusCode::TOO_MANY_REQUESTS.is_known_transient());
        assert!(!StatusCode::BAD_REQUEST.is_known_transient());
        assert!(!StatusCode::NOT_FOUND.is_known_transient());
    }

    #[tokio::test]
    async fn retry_transient_does_not_retry_fatal_errors() {
        let calls = AtomicUsize::new(0);
        let result: Result<()> = retry_transient(|| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { retry_result_fatal(anyhow!("bad request")) }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn retry_transient_returns_first_success() -> Result<()> {
        let value = retry_transient(|| async { retry_result_ok::<_, anyhow::Error>(7) })
            .await?;
        assert_eq!(value, 7);
        Ok(())
    }
}
