//! Periodic liveness output for CI supervisors that kill silent jobs.

use std::time::Duration;

use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{Instrument, debug, info};

/// A background task emitting one liveness event per interval.
///
/// Events go through `tracing` under the caller's span, so the binary decides
/// how they are rendered. Start it before a long silent stretch and
/// [`stop`](Heartbeat::stop) it afterwards; stopping joins the task.
pub struct Heartbeat {
  stop: oneshot::Sender<()>,
  handle: JoinHandle<u64>,
}

impl Heartbeat {
  pub fn start(interval: Duration, label: impl Into<String>) -> Self {
    let label = label.into();
    let (stop, mut stopped) = oneshot::channel::<()>();
    let beat = async move {
      let started = Instant::now();
      let mut ticker = tokio::time::interval_at(started + interval, interval);
      ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
      let mut beats = 0u64;
      loop {
        tokio::select! {
          _ = &mut stopped => break,
          _ = ticker.tick() => {
            beats += 1;
            info!(label = %label, elapsed_secs = started.elapsed().as_secs(), "still building");
          }
        }
      }
      beats
    };
    let handle = tokio::spawn(beat.in_current_span());
    Self { stop, handle }
  }

  /// Signal the task and wait for it. Returns how many beats were emitted.
  pub async fn stop(self) -> u64 {
    // The task may already be gone if the runtime is shutting down.
    let _ = self.stop.send(());
    match self.handle.await {
      Ok(beats) => beats,
      Err(e) => {
        debug!(error = %e, "heartbeat task ended abnormally");
        0
      }
    }
  }
}
