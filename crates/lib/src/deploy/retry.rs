//! Bounded retry for idempotent remote operations.

use std::future::Future;

use tracing::warn;

/// Run `op` up to `attempts` times, returning the first success.
///
/// Failures before the last attempt are logged and dropped; the last failure
/// is returned. `op` receives the 1-based attempt number. `attempts` of zero
/// is treated as one.
pub async fn retry<T, E, F, Fut>(attempts: u32, what: &str, mut op: F) -> Result<T, E>
where
  F: FnMut(u32) -> Fut,
  Fut: Future<Output = Result<T, E>>,
  E: std::fmt::Display,
{
  let attempts = attempts.max(1);
  let mut attempt = 1;
  loop {
    match op(attempt).await {
      Ok(value) => return Ok(value),
      Err(e) if attempt < attempts => {
        warn!(what, attempt, attempts, error = %e, "attempt failed, retrying");
        attempt += 1;
      }
      Err(e) => return Err(e),
    }
  }
}
