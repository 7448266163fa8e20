// Exponential backoff with jitter for `CoordinationStoreError`, bounded by
// the calling tick's deadline. §7: "retried with exponential backoff within
// the tick budget; if deadline exceeded, tick aborted."

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tokio::time::Instant;

use crate::errors::{ServerError, ServerResult};

const INITIAL_BACKOFF: Duration = Duration::from_millis(50);
const BACKOFF_MULTIPLIER: u32 = 2;

/// retries `f` while it returns a transient error, doubling the backoff
/// each time (plus up to 20% jitter) until `deadline` passes, at which
/// point the last error (or a fresh deadline-exceeded error) is returned.
pub async fn with_backoff<T, F, Fut>(deadline: Instant, mut f: F) -> ServerResult<T>
where
  F: FnMut() -> Fut,
  Fut: Future<Output = ServerResult<T>>,
{
  let mut backoff = INITIAL_BACKOFF;
  loop {
    match f().await {
      Ok(value) => return Ok(value),
      Err(e) if e.kind.is_transient() && Instant::now() < deadline => {
        let jitter_frac = rand::thread_rng().gen_range(0.0..0.2);
        let jittered = backoff.mul_f64(1.0 + jitter_frac);
        let sleep_for = jittered.min(deadline.saturating_duration_since(Instant::now()));
        tokio::time::sleep(sleep_for).await;
        backoff *= BACKOFF_MULTIPLIER;
      }
      Err(e) if e.kind.is_transient() => {
        return Err(ServerError::coordination_store(format!("deadline exceeded, last error: {}", e)));
      }
      Err(e) => return Err(e),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::sync::atomic::{AtomicU32, Ordering};

  #[tokio::test]
  async fn succeeds_immediately_without_retrying() {
    let deadline = Instant::now() + Duration::from_secs(1);
    let calls = AtomicU32::new(0);
    let result = with_backoff(deadline, || async {
      calls.fetch_add(1, Ordering::SeqCst);
      Ok::<_, ServerError>(42)
    }).await;
    assert_eq!(result.unwrap(), 42);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
  }

  #[tokio::test]
  async fn retries_transient_errors_until_success() {
    let deadline = Instant::now() + Duration::from_secs(5);
    let calls = AtomicU32::new(0);
    let result = with_backoff(deadline, || async {
      let n = calls.fetch_add(1, Ordering::SeqCst);
      if n < 2 {
        Err(ServerError::coordination_store("transient hiccup"))
      } else {
        Ok(())
      }
    }).await;
    assert!(result.is_ok());
    assert_eq!(calls.load(Ordering::SeqCst), 3);
  }

  #[tokio::test]
  async fn does_not_retry_non_transient_errors() {
    let deadline = Instant::now() + Duration::from_secs(5);
    let calls = AtomicU32::new(0);
    let result: ServerResult<()> = with_backoff(deadline, || async {
      calls.fetch_add(1, Ordering::SeqCst);
      Err(ServerError::invalid("not transient"))
    }).await;
    assert!(result.is_err());
    assert_eq!(calls.load(Ordering::SeqCst), 1);
  }

  #[tokio::test]
  async fn gives_up_after_deadline() {
    let deadline = Instant::now() + Duration::from_millis(80);
    let result: ServerResult<()> = with_backoff(deadline, || async {
      Err(ServerError::coordination_store("always transient"))
    }).await;
    assert!(result.is_err());
  }
}
