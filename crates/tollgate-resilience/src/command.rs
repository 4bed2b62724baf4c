use std::future::Future;
use std::time::Duration;

use thiserror::Error;

use crate::circuit_breaker::CircuitBreaker;

/// Why a guarded call produced no value.
#[derive(Debug, Error)]
pub enum CommandError<E> {
    /// The breaker refused the call; nothing was sent.
    #[error("circuit open, call short-circuited")]
    ShortCircuited,

    #[error("call timed out after {0:?}")]
    Timeout(Duration),

    #[error("call failed: {0}")]
    Failed(E),
}

impl<E> CommandError<E> {
    pub fn is_timeout(&self) -> bool {
        matches!(self, CommandError::Timeout(_))
    }
}

/// Run `call` through `breaker`, giving up after `timeout`.
///
/// Timeouts and `Err` results count as breaker failures. The call future is
/// only polled when the breaker admits it, and is dropped on timeout.
/// Dropping the returned future cancels the call without reporting an
/// outcome.
pub async fn run_command<F, T, E>(
    breaker: &CircuitBreaker,
    timeout: Duration,
    call: F,
) -> Result<T, CommandError<E>>
where
    F: Future<Output = Result<T, E>>,
{
    let Some(permit) = breaker.try_acquire() else {
        return Err(CommandError::ShortCircuited);
    };

    match tokio::time::timeout(timeout, call).await {
        Ok(Ok(value)) => {
            permit.success();
            Ok(value)
        }
        Ok(Err(e)) => {
            permit.failure();
            Err(CommandError::Failed(e))
        }
        Err(_) => {
            permit.failure();
            Err(CommandError::Timeout(timeout))
        }
    }
}
